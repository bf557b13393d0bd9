//! Counted gate that blocks mailbox teardown until in-flight deliveries exit.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

/// Tracks a count of outstanding delivery guards and lets teardown await the
/// count reaching zero. Once [`Drainer::drain`] has begun, no new guards can
/// be acquired; deliveries already holding a guard run to completion.
#[derive(Debug, Clone)]
pub(crate) struct Drainer {
  inner: Arc<DrainerInner>,
}

#[derive(Debug)]
struct DrainerInner {
  count: AtomicUsize,
  draining: AtomicBool,
  idle: Notify,
}

impl Drainer {
  pub fn new() -> Self {
    Drainer {
      inner: Arc::new(DrainerInner {
        count: AtomicUsize::new(0),
        draining: AtomicBool::new(false),
        idle: Notify::new(),
      }),
    }
  }

  /// Acquires a guard for one delivery, or `None` once draining has begun.
  pub fn acquire(&self) -> Option<DrainGuard> {
    if self.inner.draining.load(Ordering::Acquire) {
      return None;
    }
    self.inner.count.fetch_add(1, Ordering::AcqRel);
    // drain() may have flipped the flag between the check and the increment;
    // back the count out and decline so drain() cannot miss us.
    if self.inner.draining.load(Ordering::Acquire) {
      drop(DrainGuard {
        inner: self.inner.clone(),
      });
      return None;
    }
    Some(DrainGuard {
      inner: self.inner.clone(),
    })
  }

  /// Stops new acquisitions and waits until every outstanding guard has been
  /// released. Idempotent: after the first return, subsequent calls return
  /// immediately.
  pub async fn drain(&self) {
    self.inner.draining.store(true, Ordering::Release);
    loop {
      // Register interest before re-checking the count so a release between
      // the check and the await cannot be lost.
      let idle = self.inner.idle.notified();
      if self.inner.count.load(Ordering::Acquire) == 0 {
        return;
      }
      idle.await;
    }
  }

  /// Number of deliveries currently holding a guard.
  pub fn in_flight(&self) -> usize {
    self.inner.count.load(Ordering::Acquire)
  }
}

/// Scoped token for one in-flight delivery; released on drop on every handler
/// exit path.
#[derive(Debug)]
pub(crate) struct DrainGuard {
  inner: Arc<DrainerInner>,
}

impl Drop for DrainGuard {
  fn drop(&mut self) {
    let prev = self.inner.count.fetch_sub(1, Ordering::AcqRel);
    assert!(prev > 0, "drain guard released with no in-flight deliveries");
    if prev == 1 {
      self.inner.idle.notify_waiters();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::time::Duration;
  use tokio::time::timeout;

  #[tokio::test]
  async fn drain_on_idle_returns_immediately() {
    let drainer = Drainer::new();
    timeout(Duration::from_millis(50), drainer.drain())
      .await
      .expect("idle drain must not block");
    assert_eq!(drainer.in_flight(), 0);
  }

  #[tokio::test]
  async fn drain_waits_for_outstanding_guards() {
    let drainer = Drainer::new();
    let g1 = drainer.acquire().expect("guard");
    let g2 = drainer.acquire().expect("guard");
    assert_eq!(drainer.in_flight(), 2);

    let waiter = drainer.clone();
    let mut drain_task = tokio::spawn(async move { waiter.drain().await });

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(
      timeout(Duration::from_millis(10), &mut drain_task).await.is_err(),
      "drain must still be waiting on two guards"
    );

    drop(g1);
    assert!(
      timeout(Duration::from_millis(10), &mut drain_task).await.is_err(),
      "drain must still be waiting on one guard"
    );

    drop(g2);
    timeout(Duration::from_millis(100), drain_task)
      .await
      .expect("drain finishes once idle")
      .expect("drain task");
  }

  #[tokio::test]
  async fn no_acquisition_once_draining() {
    let drainer = Drainer::new();
    let guard = drainer.acquire().expect("guard");

    let waiter = drainer.clone();
    let drain_task = tokio::spawn(async move { waiter.drain().await });
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert!(drainer.acquire().is_none(), "draining refuses new guards");
    drop(guard);
    timeout(Duration::from_millis(100), drain_task)
      .await
      .expect("drain finishes")
      .expect("drain task");
    assert!(drainer.acquire().is_none(), "drained gate stays closed");
  }

  #[tokio::test]
  async fn drain_is_idempotent() {
    let drainer = Drainer::new();
    drainer.drain().await;
    drainer.drain().await;
  }
}
