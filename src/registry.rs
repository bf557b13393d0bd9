//! Per-worker mailbox registries.
//!
//! Every worker thread holds one table per manager, reached through a
//! thread-local map. A table is touched only by its owning thread, so there
//! is no locking anywhere on the delivery path; touching the registry from a
//! thread outside the pool is a precondition violation and aborts.

use crate::address::{MailboxId, PeerId};
use crate::handler::MailboxHandler;
use crate::runtime::{self, Drainer};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Everything the registry knows about one live mailbox. Delivery tasks hold
/// an `Rc` clone while they run, so a cell outlives its registry entry for
/// exactly as long as in-flight deliveries need it.
pub(crate) struct MailboxCell {
  pub(crate) peer: PeerId,
  pub(crate) worker: i32,
  pub(crate) id: MailboxId,
  pub(crate) handler: Box<dyn MailboxHandler>,
  pub(crate) drainer: Drainer,
}

/// One worker's `mailbox_id -> cell` map plus the monotonic id source.
/// Ids start at 1 and are never reused within the table's lifetime.
pub(crate) struct MailboxTable {
  worker: i32,
  next_id: u64,
  cells: HashMap<MailboxId, Rc<MailboxCell>>,
}

impl MailboxTable {
  fn new(worker: i32) -> Self {
    MailboxTable {
      worker,
      next_id: 1,
      cells: HashMap::new(),
    }
  }

  /// Mints the next id, builds the cell for it, and registers it.
  pub(crate) fn register(&mut self, build: impl FnOnce(MailboxId) -> Rc<MailboxCell>) -> Rc<MailboxCell> {
    let id = MailboxId::from_raw(self.next_id);
    self.next_id += 1;
    let cell = build(id);
    let previous = self.cells.insert(id, cell.clone());
    assert!(previous.is_none(), "mailbox id {id} minted twice");
    tracing::debug!(worker = self.worker, mailbox_id = %id, "mailbox registered");
    cell
  }

  /// Removes a registered mailbox. Unregistering an id that was never
  /// registered (or already removed) is a caller bug.
  pub(crate) fn unregister(&mut self, id: MailboxId) {
    let removed = self.cells.remove(&id);
    assert!(removed.is_some(), "unregister of unknown mailbox id {id}");
    tracing::debug!(worker = self.worker, mailbox_id = %id, "mailbox unregistered");
  }

  pub(crate) fn find(&self, id: MailboxId) -> Option<Rc<MailboxCell>> {
    self.cells.get(&id).cloned()
  }
}

impl Drop for MailboxTable {
  fn drop(&mut self) {
    // No mailbox may outlive its registry.
    assert!(
      self.cells.is_empty(),
      "worker {} registry torn down with {} live mailboxes",
      self.worker,
      self.cells.len()
    );
  }
}

thread_local! {
  static TABLES: RefCell<HashMap<usize, Rc<RefCell<MailboxTable>>>> = RefCell::new(HashMap::new());
}

fn current_worker_or_panic() -> i32 {
  runtime::current_worker()
    .unwrap_or_else(|| panic!("mailbox registry accessed off a worker thread"))
}

/// Runs `f` against this thread's table for `manager_id`, creating the table
/// on first use.
pub(crate) fn with_table<R>(manager_id: usize, f: impl FnOnce(&mut MailboxTable) -> R) -> R {
  let worker = current_worker_or_panic();
  let table = TABLES.with(|tables| {
    tables
      .borrow_mut()
      .entry(manager_id)
      .or_insert_with(|| Rc::new(RefCell::new(MailboxTable::new(worker))))
      .clone()
  });
  let result = f(&mut table.borrow_mut());
  result
}

/// Like [`with_table`] but does not create the table: a manager with no
/// mailboxes on this thread has nothing to deliver to.
pub(crate) fn try_with_table<R>(manager_id: usize, f: impl FnOnce(&mut MailboxTable) -> R) -> Option<R> {
  let _ = current_worker_or_panic();
  let table = TABLES.with(|tables| tables.borrow().get(&manager_id).cloned());
  table.map(|table| {
    let result = f(&mut table.borrow_mut());
    result
  })
}

/// Drops this thread's table for `manager_id`, asserting it is empty.
pub(crate) fn remove_table(manager_id: usize) {
  let _ = current_worker_or_panic();
  TABLES.with(|tables| {
    tables.borrow_mut().remove(&manager_id);
  });
}
