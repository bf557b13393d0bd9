#![allow(dead_code)]

use mailbus::{MailboxManager, MemoryEndpoint, MemoryHub, WorkerPool};
use std::sync::Arc;

/// Installs a test-friendly tracing subscriber. Safe to call from every test;
/// only the first call wins.
pub fn init_tracing() {
  let _ = tracing_subscriber::fmt()
    .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
    .with_test_writer()
    .try_init();
}

/// One cluster node: a transport endpoint attached to `hub`, a worker pool of
/// the given size, and a manager wired to both.
pub fn node(
  hub: &MemoryHub,
  workers: usize,
) -> (Arc<MailboxManager>, Arc<WorkerPool>, Arc<MemoryEndpoint>) {
  let pool = WorkerPool::new(workers);
  let endpoint = hub.attach();
  let manager = MailboxManager::new(endpoint.clone(), pool.clone());
  (manager, pool, endpoint)
}
