//! Result aggregation: single consumer of the result stream.
//!
//! Executors push [`TaskResult`]s into an unbounded channel; one aggregator
//! task drains it, appends each result to its worker's history, and bumps
//! the completed counter. Pollers read snapshots at any time.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::{RwLock, broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::task::TaskResult;

/// Capacity of the live result broadcast.
const RESULT_BROADCAST_CAPACITY: usize = 256;

/// Messages understood by the aggregator.
#[derive(Debug)]
pub enum AggregatorMessage {
    Result(TaskResult),
    /// Drain whatever is queued, then exit.
    Stop,
}

/// Per-worker result history, in arrival order.
pub type History = HashMap<String, Vec<TaskResult>>;

/// Compact progress view of a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionStatus {
    pub completed_count: usize,
    pub total_count: usize,
    /// Task slots that will never produce a result (skipped workers, stopped runs).
    pub forfeited_count: usize,
    pub done: bool,
}

impl ExecutionStatus {
    /// Status reported before any run has started.
    pub fn not_started() -> Self {
        Self::default()
    }
}

/// Shared status and history for one run, written only by the aggregator.
pub struct StatusTracker {
    total: usize,
    completed: AtomicUsize,
    forfeited: AtomicUsize,
    alive: AtomicBool,
    history: RwLock<History>,
    tx: broadcast::Sender<TaskResult>,
}

impl StatusTracker {
    fn new(total: usize) -> Self {
        let (tx, _rx) = broadcast::channel(RESULT_BROADCAST_CAPACITY);
        Self {
            total,
            completed: AtomicUsize::new(0),
            forfeited: AtomicUsize::new(0),
            alive: AtomicBool::new(total > 0),
            history: RwLock::new(HashMap::new()),
            tx,
        }
    }

    /// Spawn the aggregator for a run expecting `total` results.
    ///
    /// Returns the tracker, the sender executors push into, and the
    /// aggregator's join handle. With `total == 0` no consumer is started and
    /// the tracker reports "not alive" immediately.
    pub fn spawn(
        total: usize,
    ) -> (
        Arc<Self>,
        mpsc::UnboundedSender<AggregatorMessage>,
        Option<JoinHandle<()>>,
    ) {
        let tracker = Arc::new(Self::new(total));
        let (tx, rx) = mpsc::unbounded_channel();

        if total == 0 {
            debug!("Nothing to aggregate, aggregator not started");
            return (tracker, tx, None);
        }

        let handle = tokio::spawn(Arc::clone(&tracker).consume(rx));
        (tracker, tx, Some(handle))
    }

    async fn consume(self: Arc<Self>, mut rx: mpsc::UnboundedReceiver<AggregatorMessage>) {
        debug!(total = self.total, "Aggregator started");

        while let Some(msg) = rx.recv().await {
            match msg {
                AggregatorMessage::Result(result) => self.record(result).await,
                AggregatorMessage::Stop => break,
            }
        }

        // Results sent before Stop are already queued ahead of it; anything
        // racing in afterwards is still counted.
        while let Ok(msg) = rx.try_recv() {
            if let AggregatorMessage::Result(result) = msg {
                self.record(result).await;
            }
        }

        self.alive.store(false, Ordering::SeqCst);
        info!(
            completed = self.completed_count(),
            total = self.total,
            "Aggregator stopped"
        );
    }

    async fn record(&self, result: TaskResult) {
        debug!(
            worker = %result.worker_id,
            task = %result.task_name,
            status = %result.status,
            "Result recorded"
        );
        {
            let mut history = self.history.write().await;
            history
                .entry(result.worker_id.clone())
                .or_default()
                .push(result.clone());
            self.completed.fetch_add(1, Ordering::SeqCst);
        }
        // Ok if nobody is listening.
        let _ = self.tx.send(result);
    }

    /// Record task slots that will never report.
    pub fn forfeit(&self, slots: usize) {
        if slots > 0 {
            self.forfeited.fetch_add(slots, Ordering::SeqCst);
        }
    }

    pub fn completed_count(&self) -> usize {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn forfeited_count(&self) -> usize {
        self.forfeited.load(Ordering::SeqCst)
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Consistent status triple; `done` is derived on every call.
    pub fn status(&self) -> ExecutionStatus {
        let alive = self.is_alive();
        let completed_count = self.completed_count();
        let forfeited_count = self.forfeited_count();
        ExecutionStatus {
            completed_count,
            total_count: self.total,
            forfeited_count,
            done: !alive && completed_count + forfeited_count >= self.total,
        }
    }

    /// Deep copy of every worker's history.
    pub async fn history(&self) -> History {
        self.history.read().await.clone()
    }

    /// Live feed of results as they are recorded.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskResult> {
        self.tx.subscribe()
    }
}
