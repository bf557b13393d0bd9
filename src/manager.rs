//! The mailbox manager: lifecycle façade over the per-worker registries and
//! the peer transport.
//!
//! One manager per process (per transport endpoint). It inherits the local
//! peer identity from the transport, installs itself as the transport's
//! inbound handler, and routes every message (outbound, inbound, and
//! process-local) to the worker thread that owns the destination mailbox.

use crate::address::{MailboxAddress, MailboxId, PeerId, ANY_THREAD};
use crate::handler::LocalDeliveryFn;
use crate::protocol::{self, FrameCodec};
use crate::registry;
use crate::runtime::{self, WorkerPool};
use crate::transport::{Connectivity, MessageHandler, MessageService};
use bytes::{Bytes, BytesMut};
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use tokio_util::codec::Decoder;

static NEXT_MANAGER_ID: AtomicUsize = AtomicUsize::new(1);

/// Sends a message to a mailbox.
///
/// Safe to call from any thread, inside or outside the worker pool; it never
/// blocks and never fails observably. If the address is nil, the destination
/// mailbox no longer exists, or the peer is unreachable, the message is
/// silently dropped; reliability is a concern for the layers above.
pub fn send<F>(manager: &Arc<MailboxManager>, dest: &MailboxAddress, write: F)
where
  F: FnOnce(&mut BytesMut) + Send + 'static,
{
  manager.send(dest, write)
}

/// Per-process mailbox capability over one peer transport.
pub struct MailboxManager {
  manager_id: usize,
  local_peer: PeerId,
  transport: Arc<dyn MessageService>,
  workers: Arc<WorkerPool>,
}

impl MailboxManager {
  /// Creates a manager over `transport`, hosting mailboxes on `workers`,
  /// and installs it as the transport's inbound message handler.
  pub fn new(transport: Arc<dyn MessageService>, workers: Arc<WorkerPool>) -> Arc<MailboxManager> {
    let manager = Arc::new(MailboxManager {
      manager_id: NEXT_MANAGER_ID.fetch_add(1, Ordering::Relaxed),
      local_peer: transport.local_peer(),
      transport: transport.clone(),
      workers,
    });
    transport.register_handler(Arc::new(InboundHandler {
      manager: Arc::downgrade(&manager),
    }));
    tracing::debug!(
      manager_id = manager.manager_id,
      local_peer = %manager.local_peer,
      workers = manager.workers.count(),
      "mailbox manager attached to transport"
    );
    manager
  }

  /// This process's peer identity, inherited from the transport.
  pub fn local_peer(&self) -> PeerId {
    self.local_peer
  }

  /// The worker pool hosting this manager's mailboxes.
  pub fn workers(&self) -> &Arc<WorkerPool> {
    &self.workers
  }

  /// The transport's connectivity view, for layers that track peer liveness.
  pub fn connectivity(&self) -> Arc<dyn Connectivity> {
    self.transport.connectivity()
  }

  pub(crate) fn manager_id(&self) -> usize {
    self.manager_id
  }

  /// See the free function [`send`].
  pub fn send<F>(self: &Arc<Self>, dest: &MailboxAddress, write: F)
  where
    F: FnOnce(&mut BytesMut) + Send + 'static,
  {
    if dest.is_nil() {
      tracing::trace!("send to nil address dropped");
      return;
    }
    if dest.peer() == self.local_peer {
      // Same process: serialize now (the writer is consumed on the caller's
      // thread) and deliver through the stream path on the resolved worker,
      // skipping the transport round trip.
      let mut payload = BytesMut::new();
      write(&mut payload);
      let resolved = self.resolve_thread(dest.thread());
      self.route_frame(resolved, dest.mailbox_id(), payload.freeze());
    } else {
      let thread = dest.thread();
      let mailbox_id = dest.mailbox_id();
      self.transport.send_message(
        dest.peer(),
        Box::new(move |buf: &mut BytesMut| {
          protocol::encode_frame_with(buf, thread, mailbox_id, write);
        }),
      );
    }
  }

  /// Attempts typed in-process delivery, bypassing serialization entirely.
  ///
  /// The caller's worker registry is probed for the destination id; on a hit
  /// whose stored peer matches the address (a colliding id from a foreign
  /// peer is declined), a delivery task is started toward the resolved
  /// worker and `true` is returned. `true` means an invocation was
  /// scheduled, not that it will execute: the task re-checks registration
  /// after re-hosting and drops silently if the mailbox is gone by then.
  ///
  /// Returns `false`, with no side effects, when the address does not
  /// resolve locally; callers fall back to [`send`]. `A` must be exactly
  /// the argument type of the mailbox's local delivery callback.
  ///
  /// Must be called from a worker thread; deliveries within the same worker
  /// pass through the scheduler queue once before the handler runs, so the
  /// handler is never entered from the caller's stack frame.
  pub fn try_local_delivery<A: Send + 'static>(self: &Arc<Self>, dest: &MailboxAddress, args: A) -> bool {
    if dest.is_nil() {
      return false;
    }
    let probe = registry::try_with_table(self.manager_id, |table| table.find(dest.mailbox_id())).flatten();
    let Some(probe) = probe else {
      return false;
    };
    if probe.peer != dest.peer() {
      // A foreign peer's address whose id happens to collide with one of
      // ours. Not local; decline.
      return false;
    }

    let resolved = self.resolve_thread(dest.thread());
    let index = self.worker_index(resolved);
    let manager = self.clone();
    let mailbox_id = dest.mailbox_id();
    if runtime::current_worker() == Some(resolved) {
      tokio::task::spawn_local(async move {
        manager.deliver_local(mailbox_id, args).await;
      });
    } else {
      self.workers.spawn_on(
        index,
        Box::new(move || {
          tokio::task::spawn_local(async move {
            manager.deliver_local(mailbox_id, args).await;
          });
        }),
      );
    }
    true
  }

  /// Stops inbound routing and drops this manager's (empty) registry tables
  /// on every worker. All mailboxes must have been destroyed first.
  pub async fn detach(self: &Arc<Self>) {
    self.transport.clear_handler();
    for index in 0..self.workers.count() {
      let (tx, rx) = tokio::sync::oneshot::channel::<()>();
      let manager_id = self.manager_id;
      self.workers.spawn_on(
        index,
        Box::new(move || {
          registry::remove_table(manager_id);
          let _ = tx.send(());
        }),
      );
      let _ = rx.await;
    }
    tracing::debug!(manager_id = self.manager_id, "mailbox manager detached");
  }

  /// `ANY_THREAD` defers the choice of receiving thread to dispatch time:
  /// the caller's current worker, or the first worker when the caller is not
  /// on one.
  fn resolve_thread(&self, thread: i32) -> i32 {
    if thread == ANY_THREAD {
      runtime::current_worker().unwrap_or(0)
    } else {
      thread
    }
  }

  fn worker_index(&self, thread: i32) -> usize {
    assert!(
      thread >= 0 && (thread as usize) < self.workers.count(),
      "destination thread {thread} out of range for a pool of {} workers",
      self.workers.count()
    );
    thread as usize
  }

  /// Re-hosts one decoded (or locally produced) message onto its destination
  /// worker and delivers it through the stream handler there.
  fn route_frame(self: &Arc<Self>, resolved_thread: i32, mailbox_id: MailboxId, payload: Bytes) {
    let index = self.worker_index(resolved_thread);
    let manager = self.clone();
    self.workers.spawn_on(
      index,
      Box::new(move || {
        tokio::task::spawn_local(async move {
          manager.deliver_stream(mailbox_id, payload).await;
        });
      }),
    );
  }

  async fn deliver_stream(self: Arc<Self>, mailbox_id: MailboxId, payload: Bytes) {
    let cell = registry::try_with_table(self.manager_id, |table| table.find(mailbox_id)).flatten();
    let Some(cell) = cell else {
      tracing::trace!(%mailbox_id, "delivery dropped, mailbox gone");
      return;
    };
    let Some(_guard) = cell.drainer.acquire() else {
      tracing::trace!(%mailbox_id, "delivery dropped, mailbox draining");
      return;
    };
    cell.handler.read(payload).await;
  }

  async fn deliver_local<A: 'static>(self: Arc<Self>, mailbox_id: MailboxId, args: A) {
    let cell = registry::try_with_table(self.manager_id, |table| table.find(mailbox_id)).flatten();
    let Some(cell) = cell else {
      tracing::trace!(%mailbox_id, "local delivery dropped, mailbox gone");
      return;
    };
    let Some(_guard) = cell.drainer.acquire() else {
      tracing::trace!(%mailbox_id, "local delivery dropped, mailbox draining");
      return;
    };
    let erased = cell
      .handler
      .local_delivery()
      .unwrap_or_else(|| panic!("mailbox {mailbox_id} has no local delivery fast path"));
    let typed = erased
      .downcast_ref::<LocalDeliveryFn<A>>()
      .unwrap_or_else(|| panic!("local delivery argument type mismatch for mailbox {mailbox_id}"));
    typed(args).await;
  }

  /// Decodes every frame in one inbound transport message and routes each to
  /// its destination worker. The payload is copied into an owned buffer
  /// before this returns; the transport's buffer is not referenced later.
  fn handle_inbound(self: &Arc<Self>, source: PeerId, message: &mut BytesMut) {
    let mut codec = FrameCodec::new();
    while !message.is_empty() {
      let frame = match codec.decode(message) {
        Ok(Some(frame)) => frame,
        Ok(None) => panic!("truncated mailbox frame from peer {source}"),
        Err(error) => panic!("malformed mailbox frame from peer {source}: {error}"),
      };
      tracing::trace!(
        %source,
        thread = frame.thread,
        mailbox_id = %frame.mailbox_id,
        payload_len = frame.payload.len(),
        "inbound mailbox frame"
      );
      // A remotely sent ANY_THREAD pins to the first worker, so remote
      // senders get a deterministic destination regardless of which thread
      // the transport happens to deliver on.
      let resolved = if frame.thread == ANY_THREAD { 0 } else { frame.thread };
      self.route_frame(resolved, frame.mailbox_id, frame.payload);
    }
  }
}

impl fmt::Debug for MailboxManager {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("MailboxManager")
      .field("manager_id", &self.manager_id)
      .field("local_peer", &self.local_peer)
      .finish_non_exhaustive()
  }
}

/// The handler installed with the transport. Holds the manager weakly so a
/// forgotten transport cannot keep the manager alive.
struct InboundHandler {
  manager: Weak<MailboxManager>,
}

impl MessageHandler for InboundHandler {
  fn on_message(&self, source: PeerId, message: &mut BytesMut) {
    match self.manager.upgrade() {
      Some(manager) => manager.handle_inbound(source, message),
      None => tracing::trace!(%source, "inbound message dropped, manager gone"),
    }
  }
}
