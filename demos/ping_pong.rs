//! Two peers on an in-process hub: one hosts an echo mailbox, the other
//! pings it with a counter and a reply address embedded in the payload.

use bytes::{Buf, BufMut};
use futures::future::LocalBoxFuture;
use mailbus::{CallbackHandler, Mailbox, MailboxAddress, MailboxManager, MemoryHub, WorkerPool};
use std::sync::Arc;
use tokio::sync::{oneshot, Notify};

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt().init();

  let hub = MemoryHub::new();
  let pool_a = WorkerPool::new(1);
  let manager_a = MailboxManager::new(hub.attach(), pool_a.clone());
  let pool_b = WorkerPool::new(1);
  let manager_b = MailboxManager::new(hub.attach(), pool_b.clone());

  // Peer B: echo service. Each ping carries a reply address followed by a
  // number; the reply gets the number plus one.
  let (echo_addr_tx, echo_addr_rx) = oneshot::channel();
  let echo_teardown = Arc::new(Notify::new());
  let echo_manager = manager_b.clone();
  let echo_park = echo_teardown.clone();
  let echo_done = pool_b.run_on(0, move || async move {
    let reply_via = echo_manager.clone();
    let mailbox = Mailbox::new(
      &echo_manager,
      CallbackHandler::new(
        move |payload| {
          let manager = reply_via.clone();
          Box::pin(async move {
            let mut payload = payload;
            let reply_to = MailboxAddress::decode(&mut payload).expect("malformed ping");
            let n = payload.get_u64_le();
            println!("echo: received {n}, replying with {}", n + 1);
            mailbus::send(&manager, &reply_to, move |buf| buf.put_u64_le(n + 1));
          }) as LocalBoxFuture<'static, ()>
        },
        |_: ()| Box::pin(async {}) as LocalBoxFuture<'static, ()>,
      ),
    );
    echo_addr_tx.send(mailbox.address()).unwrap();
    echo_park.notified().await;
    mailbox.destroy().await;
  });

  let echo_addr = echo_addr_rx.await.expect("echo mailbox created");
  println!("echo mailbox lives at {echo_addr}");

  // Peer A: create a reply mailbox, then ping the echo service with its
  // address baked into the payload.
  let pong = Arc::new(Notify::new());
  let reply_teardown = Arc::new(Notify::new());
  let ping_manager = manager_a.clone();
  let ping_pong = pong.clone();
  let ping_park = reply_teardown.clone();
  let reply_done = pool_a.run_on(0, move || async move {
    let reply = Mailbox::new(
      &ping_manager,
      CallbackHandler::new(
        move |payload| {
          let pong = ping_pong.clone();
          Box::pin(async move {
            let mut payload = payload;
            println!("ping: got pong {}", payload.get_u64_le());
            pong.notify_one();
          }) as LocalBoxFuture<'static, ()>
        },
        |_: ()| Box::pin(async {}) as LocalBoxFuture<'static, ()>,
      ),
    );

    let reply_addr = reply.address();
    mailbus::send(&ping_manager, &echo_addr, move |buf| {
      reply_addr.encode(buf);
      buf.put_u64_le(1);
    });

    ping_park.notified().await;
    reply.destroy().await;
  });

  pong.notified().await;

  echo_teardown.notify_one();
  reply_teardown.notify_one();
  let _ = echo_done.await;
  let _ = reply_done.await;
  manager_a.detach().await;
  manager_b.detach().await;
}
