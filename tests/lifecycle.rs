//! Mailbox lifecycle: registration, id allocation, and drain-on-destroy.

mod common;

use futures::future::LocalBoxFuture;
use mailbus::{CallbackHandler, Mailbox};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

fn unit_handler() -> CallbackHandler<()> {
  CallbackHandler::new(
    |_payload| Box::pin(async {}) as LocalBoxFuture<'static, ()>,
    |_: ()| Box::pin(async {}) as LocalBoxFuture<'static, ()>,
  )
}

#[tokio::test]
async fn addresses_name_the_local_peer_worker_and_id() {
  common::init_tracing();
  let hub = mailbus::MemoryHub::new();
  let (manager, pool, _endpoint) = common::node(&hub, 2);

  let local_peer = manager.local_peer();
  let task_manager = manager.clone();
  timeout(
    TEST_TIMEOUT,
    pool.run_on(1, move || async move {
      let mailbox = Mailbox::new(&task_manager, unit_handler());
      let addr = mailbox.address();
      assert_eq!(addr.peer(), local_peer);
      assert_eq!(addr.thread(), 1);
      assert!(!addr.is_nil());
      mailbox.destroy().await;
    }),
  )
  .await
  .expect("test timed out")
  .expect("worker died");

  manager.detach().await;
}

#[tokio::test]
async fn ids_are_monotonic_and_never_reused() {
  common::init_tracing();
  let hub = mailbus::MemoryHub::new();
  let (manager, pool, _endpoint) = common::node(&hub, 1);

  let task_manager = manager.clone();
  timeout(
    TEST_TIMEOUT,
    pool.run_on(0, move || async move {
      let first = Mailbox::new(&task_manager, unit_handler());
      let second = Mailbox::new(&task_manager, unit_handler());
      let first_id = first.address().mailbox_id();
      let second_id = second.address().mailbox_id();
      assert!(second_id > first_id);

      let first_addr = first.address();
      first.destroy().await;

      // A destroyed id never resolves again, and new mailboxes keep minting
      // upward.
      let third = Mailbox::new(&task_manager, unit_handler());
      assert!(third.address().mailbox_id() > second_id);
      assert!(!task_manager.try_local_delivery(&first_addr, ()));

      second.destroy().await;
      third.destroy().await;
    }),
  )
  .await
  .expect("test timed out")
  .expect("worker died");

  manager.detach().await;
}

#[tokio::test]
async fn destroy_waits_for_in_flight_deliveries() {
  common::init_tracing();
  let hub = mailbus::MemoryHub::new();
  let (manager, pool, _endpoint) = common::node(&hub, 1);

  let started = Arc::new(AtomicUsize::new(0));
  let finished = Arc::new(AtomicUsize::new(0));

  let task_manager = manager.clone();
  let task_started = started.clone();
  let task_finished = finished.clone();
  timeout(
    TEST_TIMEOUT,
    pool.run_on(0, move || async move {
      let handler_started = task_started.clone();
      let handler_finished = task_finished.clone();
      let mailbox = Mailbox::new(
        &task_manager,
        CallbackHandler::new(
          |_payload| Box::pin(async {}) as LocalBoxFuture<'static, ()>,
          move |_: ()| {
            let started = handler_started.clone();
            let finished = handler_finished.clone();
            Box::pin(async move {
              started.fetch_add(1, Ordering::SeqCst);
              tokio::time::sleep(Duration::from_millis(150)).await;
              finished.fetch_add(1, Ordering::SeqCst);
            }) as LocalBoxFuture<'static, ()>
          },
        ),
      );

      let addr = mailbox.address();
      for _ in 0..10 {
        assert!(task_manager.try_local_delivery(&addr, ()));
      }
      // Let every delivery enter the handler before teardown begins.
      while task_started.load(Ordering::SeqCst) < 10 {
        tokio::task::yield_now().await;
      }
      assert_eq!(task_finished.load(Ordering::SeqCst), 0);

      mailbox.destroy().await;
      assert_eq!(
        task_finished.load(Ordering::SeqCst),
        10,
        "destroy returned before every in-flight handler finished"
      );

      // Once destruction has begun, the address no longer resolves.
      assert!(!task_manager.try_local_delivery(&addr, ()));
    }),
  )
  .await
  .expect("test timed out")
  .expect("worker died");

  assert_eq!(finished.load(Ordering::SeqCst), 10);
  manager.detach().await;
}

#[tokio::test]
async fn dropping_without_destroy_still_unregisters() {
  common::init_tracing();
  let hub = mailbus::MemoryHub::new();
  let (manager, pool, _endpoint) = common::node(&hub, 1);

  let task_manager = manager.clone();
  timeout(
    TEST_TIMEOUT,
    pool.run_on(0, move || async move {
      let mailbox = Mailbox::new(&task_manager, unit_handler());
      let addr = mailbox.address();
      drop(mailbox);
      assert!(!task_manager.try_local_delivery(&addr, ()));
    }),
  )
  .await
  .expect("test timed out")
  .expect("worker died");

  // The registry is empty, so detach tears the tables down cleanly.
  manager.detach().await;
}
