//! The cooperative worker pool hosting mailbox registries and deliveries.
//!
//! Each worker is an OS thread running a current-thread tokio runtime that
//! drives a `LocalSet`, so tasks on one worker are cooperatively scheduled
//! and never migrate. Cross-thread re-hosting is explicit: hand the target
//! worker a job through [`WorkerPool::spawn_on`] and it runs inside that
//! worker's event loop, where it may `spawn_local` futures that need not be
//! `Send`.

use std::cell::Cell;
use std::future::Future;
use std::thread::JoinHandle;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tokio::task::LocalSet;

/// A unit of work shipped to a worker thread. Runs inside the worker's
/// `LocalSet` context, so it may call `tokio::task::spawn_local`.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

thread_local! {
  static CURRENT_WORKER: Cell<Option<i32>> = const { Cell::new(None) };
}

/// The ordinal of the worker thread we are currently on, or `None` when
/// called from a thread outside any pool.
pub fn current_worker() -> Option<i32> {
  CURRENT_WORKER.with(|c| c.get())
}

struct Worker {
  jobs: async_channel::Sender<Job>,
  join: Mutex<Option<JoinHandle<()>>>,
}

/// A fixed set of worker threads, ordinals `0..count`.
///
/// Dropping the pool closes the job channels and joins the threads; each
/// worker finishes the local tasks it has already accepted before exiting.
pub struct WorkerPool {
  workers: Vec<Worker>,
}

impl WorkerPool {
  /// Spawns `count` worker threads named `mailbox-worker-{ordinal}`.
  pub fn new(count: usize) -> std::sync::Arc<WorkerPool> {
    assert!(count > 0, "worker pool needs at least one thread");
    let workers = (0..count)
      .map(|ordinal| {
        let (tx, rx) = async_channel::unbounded::<Job>();
        let ordinal = ordinal as i32;
        let join = std::thread::Builder::new()
          .name(format!("mailbox-worker-{ordinal}"))
          .spawn(move || worker_main(ordinal, rx))
          .expect("failed to spawn mailbox worker thread");
        Worker {
          jobs: tx,
          join: Mutex::new(Some(join)),
        }
      })
      .collect();
    std::sync::Arc::new(WorkerPool { workers })
  }

  pub fn count(&self) -> usize {
    self.workers.len()
  }

  /// Re-hosts `job` onto the given worker's event loop. Best effort: if the
  /// pool is shutting down the job is dropped silently.
  ///
  /// Panics if `worker` is out of range; a bad ordinal here means a forged or
  /// corrupted address and there is nothing to deliver to.
  pub fn spawn_on(&self, worker: usize, job: Job) {
    let target = self
      .workers
      .get(worker)
      .unwrap_or_else(|| panic!("worker ordinal {worker} out of range (pool has {})", self.count()));
    if target.jobs.try_send(job).is_err() {
      tracing::trace!(worker, "job dropped, worker pool shutting down");
    }
  }

  /// Runs a future to completion on the given worker and hands back its
  /// output. Convenience for tests and demos; the receiver errors if the
  /// pool shuts down first.
  pub fn run_on<T, F, Fut>(&self, worker: usize, f: F) -> oneshot::Receiver<T>
  where
    T: Send + 'static,
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = T> + 'static,
  {
    let (tx, rx) = oneshot::channel();
    self.spawn_on(
      worker,
      Box::new(move || {
        tokio::task::spawn_local(async move {
          let _ = tx.send(f().await);
        });
      }),
    );
    rx
  }

  /// Closes the job channels and joins the worker threads. Called from
  /// `Drop`; safe to call more than once.
  pub fn shutdown(&self) {
    for worker in &self.workers {
      worker.jobs.close();
    }
    for worker in &self.workers {
      let handle = worker.join.lock().take();
      if let Some(handle) = handle {
        // A worker cannot join itself; that only arises if the last pool
        // handle is dropped from inside a worker task.
        if handle.thread().id() == std::thread::current().id() {
          continue;
        }
        if handle.join().is_err() {
          tracing::warn!("mailbox worker panicked during shutdown");
        }
      }
    }
  }
}

impl Drop for WorkerPool {
  fn drop(&mut self) {
    self.shutdown();
  }
}

/// How long a stopping worker waits for its remaining local tasks.
const SHUTDOWN_DRAIN_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

fn worker_main(ordinal: i32, jobs: async_channel::Receiver<Job>) {
  CURRENT_WORKER.with(|c| c.set(Some(ordinal)));
  let rt = tokio::runtime::Builder::new_current_thread()
    .enable_time()
    .build()
    .expect("failed to build mailbox worker runtime");
  let local = LocalSet::new();
  tracing::debug!(worker = ordinal, "mailbox worker started");

  rt.block_on(local.run_until(async {
    while let Ok(job) = jobs.recv().await {
      job();
    }
  }));
  // Job channel closed: let deliveries already accepted run to completion,
  // within reason.
  let drained = rt.block_on(async { tokio::time::timeout(SHUTDOWN_DRAIN_TIMEOUT, local).await });
  if drained.is_err() {
    tracing::warn!(worker = ordinal, "mailbox worker stopped with tasks still pending");
  }
  tracing::debug!(worker = ordinal, "mailbox worker stopped");
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::Arc;
  use std::time::Duration;
  use tokio::time::timeout;

  #[tokio::test]
  async fn jobs_run_on_their_worker() {
    let pool = WorkerPool::new(3);
    for expected in 0..3 {
      let seen = timeout(
        Duration::from_secs(2),
        pool.run_on(expected, || async { current_worker() }),
      )
      .await
      .expect("worker answered")
      .expect("worker alive");
      assert_eq!(seen, Some(expected as i32));
    }
    assert_eq!(current_worker(), None);
  }

  #[tokio::test]
  async fn shutdown_finishes_accepted_work() {
    let pool = WorkerPool::new(1);
    let done = Arc::new(AtomicUsize::new(0));
    for _ in 0..5 {
      let done = done.clone();
      pool.spawn_on(
        0,
        Box::new(move || {
          tokio::task::spawn_local(async move {
            tokio::task::yield_now().await;
            done.fetch_add(1, Ordering::SeqCst);
          });
        }),
      );
    }
    pool.shutdown();
    assert_eq!(done.load(Ordering::SeqCst), 5);
  }

  #[test]
  #[should_panic(expected = "out of range")]
  fn out_of_range_ordinal_panics() {
    let pool = WorkerPool::new(1);
    pool.spawn_on(3, Box::new(|| {}));
  }
}
