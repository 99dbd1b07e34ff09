//! Cooperative cancellation for a dispatch run.
//!
//! The stop flag is checked at fixed checkpoints only:
//! - by the driver before it waits for a concurrency permit,
//! - by the driver, under the backlog lock, before admitting the next worker,
//! - by each executor before every task instance.
//!
//! Nothing is aborted mid-task. A task that is already running finishes (or
//! fails) on its own before its executor observes the flag.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Notify;

use crate::task::Assignment;

/// A worker that has been planned but not yet admitted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWorker {
    /// Position in the validated roster.
    pub index: usize,
    pub worker_id: String,
    pub assignment: Assignment,
}

/// Stop flag plus the backlog of workers still waiting for admission.
///
/// One controller exists per run, so every dispatch starts with the flag clear.
#[derive(Debug, Default)]
pub struct InterruptController {
    stop_requested: AtomicBool,
    backlog: Mutex<VecDeque<PendingWorker>>,
    wake: Notify,
}

impl InterruptController {
    pub fn new(backlog: impl IntoIterator<Item = PendingWorker>) -> Self {
        Self {
            stop_requested: AtomicBool::new(false),
            backlog: Mutex::new(backlog.into_iter().collect()),
            wake: Notify::new(),
        }
    }

    /// Set the stop flag and drop every not-yet-admitted worker.
    ///
    /// Idempotent. Returns `true` only for the call that actually set the flag.
    pub fn request_stop(&self) -> bool {
        let first = {
            let mut backlog = self.lock_backlog();
            let first = !self.stop_requested.swap(true, Ordering::SeqCst);
            backlog.clear();
            first
        };
        self.wake.notify_waiters();
        first
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    /// Pop the next worker to admit, or `None` once stopped or exhausted.
    pub fn next_admission(&self) -> Option<PendingWorker> {
        let mut backlog = self.lock_backlog();
        if self.is_stop_requested() {
            return None;
        }
        backlog.pop_front()
    }

    /// Workers still waiting for admission.
    pub fn pending(&self) -> usize {
        self.lock_backlog().len()
    }

    /// Resolves once a stop has been requested.
    pub async fn stopped(&self) {
        loop {
            let notified = self.wake.notified();
            tokio::pin!(notified);
            // Register before checking so a concurrent stop cannot be missed.
            notified.as_mut().enable();
            if self.is_stop_requested() {
                return;
            }
            notified.await;
        }
    }

    fn lock_backlog(&self) -> std::sync::MutexGuard<'_, VecDeque<PendingWorker>> {
        // The backlog holds plain data; a poisoned lock still has a usable queue.
        self.backlog.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;

    fn pending(index: usize) -> PendingWorker {
        PendingWorker {
            index,
            worker_id: format!("w{index}"),
            assignment: Vec::new(),
        }
    }

    #[test]
    fn admits_in_roster_order() {
        let ctl = InterruptController::new((0..3).map(pending));
        assert_eq!(ctl.next_admission().unwrap().index, 0);
        assert_eq!(ctl.next_admission().unwrap().index, 1);
        assert_eq!(ctl.pending(), 1);
    }

    #[test]
    fn stop_clears_backlog_and_is_idempotent() {
        let ctl = InterruptController::new((0..3).map(pending));
        assert!(!ctl.is_stop_requested());
        assert!(ctl.request_stop());
        assert!(!ctl.request_stop());
        assert!(ctl.is_stop_requested());
        assert_eq!(ctl.pending(), 0);
        assert!(ctl.next_admission().is_none());
    }

    #[tokio::test]
    async fn stopped_wakes_waiter() {
        let ctl = Arc::new(InterruptController::new(Vec::new()));
        let waiter = {
            let ctl = Arc::clone(&ctl);
            tokio::spawn(async move { ctl.stopped().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        ctl.request_stop();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should wake")
            .unwrap();
    }

    #[tokio::test]
    async fn stopped_returns_immediately_when_already_set() {
        let ctl = InterruptController::new(Vec::new());
        ctl.request_stop();
        tokio::time::timeout(Duration::from_millis(100), ctl.stopped())
            .await
            .expect("already stopped");
    }
}
