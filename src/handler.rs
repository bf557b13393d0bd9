//! The handler seam between a mailbox and user code.
//!
//! A handler has two capabilities: a stream read path invoked with the raw
//! payload bytes of a delivered message, and an optional typed fast path that
//! local senders can invoke without any serialization. The fast path is
//! type-erased here and re-typed at the call site with a checked downcast;
//! the argument type is the tag.

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::LocalBoxFuture;
use std::any::Any;

/// The concrete type stored behind [`MailboxHandler::local_delivery`] for a
/// mailbox taking arguments of type `A`. Callers of the local fast path
/// downcast to exactly this type.
pub type LocalDeliveryFn<A> = Box<dyn Fn(A) -> LocalBoxFuture<'static, ()>>;

/// A mailbox's message handler. Runs only on the mailbox's owning thread,
/// only while the mailbox's drainer holds a guard for the delivery.
#[async_trait(?Send)]
pub trait MailboxHandler: 'static {
  /// Stream delivery: invoked with the payload bytes of one message, exactly
  /// as the sender's write-callback produced them. May suspend.
  async fn read(&self, payload: Bytes);

  /// The typed local fast-path invocable, if this handler supports one.
  ///
  /// Must return a reference to a [`LocalDeliveryFn<A>`] where `A` matches
  /// the argument type senders pass to `try_local_delivery`; the call site
  /// re-types it with `downcast_ref` and treats a mismatch as a bug.
  fn local_delivery(&self) -> Option<&dyn Any> {
    None
  }
}

/// Ready-made handler built from two closures: one for stream deliveries and
/// one for typed local deliveries of `A`.
pub struct CallbackHandler<A: 'static> {
  read_cb: Box<dyn Fn(Bytes) -> LocalBoxFuture<'static, ()>>,
  local_cb: LocalDeliveryFn<A>,
}

impl<A: 'static> CallbackHandler<A> {
  pub fn new<R, L>(read: R, local: L) -> Self
  where
    R: Fn(Bytes) -> LocalBoxFuture<'static, ()> + 'static,
    L: Fn(A) -> LocalBoxFuture<'static, ()> + 'static,
  {
    CallbackHandler {
      read_cb: Box::new(read),
      local_cb: Box::new(local),
    }
  }
}

#[async_trait(?Send)]
impl<A: 'static> MailboxHandler for CallbackHandler<A> {
  async fn read(&self, payload: Bytes) {
    (self.read_cb)(payload).await
  }

  fn local_delivery(&self) -> Option<&dyn Any> {
    Some(&self.local_cb)
  }
}
