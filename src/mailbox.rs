//! The mailbox endpoint: a receiver of messages pinned to one worker thread.

use crate::address::MailboxAddress;
use crate::handler::MailboxHandler;
use crate::manager::MailboxManager;
use crate::registry::{self, MailboxCell};
use crate::runtime::{self, Drainer};
use std::cell::Cell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// A live message endpoint.
///
/// Construct it on the worker thread that should own it; the mailbox
/// registers itself in that thread's registry under a freshly minted id and
/// serves deliveries until destroyed. The handle is deliberately `!Send`, so
/// it cannot leave its owning thread.
///
/// Tear it down with [`Mailbox::destroy`], which unregisters the mailbox
/// (stopping new deliveries), waits for in-flight handler invocations to
/// finish, and only then releases the handler. Dropping the handle without
/// `destroy` still unregisters, but cannot wait: a warning is logged if
/// deliveries were still running (they finish safely on their own references).
pub struct Mailbox {
  manager: Arc<MailboxManager>,
  cell: Rc<MailboxCell>,
  destroyed: Cell<bool>,
}

impl Mailbox {
  /// Creates and registers a mailbox on the current worker thread.
  ///
  /// Panics when called from a thread that is not a mailbox worker.
  pub fn new(manager: &Arc<MailboxManager>, handler: impl MailboxHandler) -> Mailbox {
    let worker = runtime::current_worker()
      .unwrap_or_else(|| panic!("Mailbox::new called off a worker thread"));
    let peer = manager.local_peer();
    let cell = registry::with_table(manager.manager_id(), |table| {
      table.register(|id| {
        Rc::new(MailboxCell {
          peer,
          worker,
          id,
          handler: Box::new(handler),
          drainer: Drainer::new(),
        })
      })
    });
    Mailbox {
      manager: manager.clone(),
      cell,
      destroyed: Cell::new(false),
    }
  }

  /// The transmissible name of this mailbox: local peer, owning worker,
  /// allocated id.
  pub fn address(&self) -> MailboxAddress {
    MailboxAddress::new(self.cell.peer, self.cell.worker, self.cell.id)
  }

  /// Unregisters the mailbox, then waits until every delivery already inside
  /// the handler has returned. Must run on the owning thread (guaranteed by
  /// the handle being `!Send`).
  pub async fn destroy(self) {
    self.unregister();
    self.cell.drainer.drain().await;
    // The handler is released with the last cell reference, which at this
    // point is held only by this handle and is dropped here.
  }

  fn unregister(&self) {
    if self.destroyed.replace(true) {
      return;
    }
    registry::with_table(self.manager.manager_id(), |table| {
      table.unregister(self.cell.id);
    });
  }
}

impl Drop for Mailbox {
  fn drop(&mut self) {
    if self.destroyed.get() {
      return;
    }
    self.unregister();
    let in_flight = self.cell.drainer.in_flight();
    if in_flight > 0 {
      tracing::warn!(
        address = %self.address(),
        in_flight,
        "mailbox dropped without destroy() while deliveries were running"
      );
    }
  }
}

impl fmt::Debug for Mailbox {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Mailbox")
      .field("address", &self.address().to_string())
      .finish_non_exhaustive()
  }
}
