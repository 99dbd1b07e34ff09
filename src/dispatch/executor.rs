//! Per-worker execution of an assignment.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dispatch::aggregator::{AggregatorMessage, StatusTracker};
use crate::dispatch::gate::GatePermit;
use crate::dispatch::interrupt::InterruptController;
use crate::resource::{Resource, ResourceProvisioner, SessionInitializer};
use crate::task::{Assignment, TaskCatalog, TaskInstance, TaskOutcome, TaskResult};

/// Lifecycle phase of one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerPhase {
    /// Resource acquired, nothing run yet.
    Provisioned,
    /// One-shot session setup in progress.
    SessionInit,
    /// Working through the assignment.
    Running,
    /// Resource released and permit returned.
    Terminated,
}

impl WorkerPhase {
    /// Whether moving from this phase to `target` is a valid lifecycle step.
    pub fn can_transition_to(&self, target: WorkerPhase) -> bool {
        use WorkerPhase::*;

        matches!(
            (self, target),
            (Provisioned, SessionInit)
                | (Provisioned, Terminated)
                | (SessionInit, Running)
                | (SessionInit, Terminated)
                | (Running, Terminated)
        )
    }
}

impl std::fmt::Display for WorkerPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Provisioned => "provisioned",
            Self::SessionInit => "session_init",
            Self::Running => "running",
            Self::Terminated => "terminated",
        };
        write!(f, "{s}")
    }
}

/// How a worker's run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// Every assigned instance was executed.
    Finished { executed: usize },
    /// Session setup failed; nothing ran.
    SessionFailed,
    /// A stop was observed before the assignment was exhausted.
    Interrupted { executed: usize, skipped: usize },
}

/// Shared collaborators every executor in a run needs.
#[derive(Clone)]
pub struct ExecutorDeps {
    pub catalog: Arc<TaskCatalog>,
    pub provisioner: Arc<dyn ResourceProvisioner>,
    pub session: Arc<dyn SessionInitializer>,
    pub interrupt: Arc<InterruptController>,
    pub tracker: Arc<StatusTracker>,
    pub results: mpsc::UnboundedSender<AggregatorMessage>,
}

/// Runs one worker's assignment against its resource.
pub struct WorkerExecutor {
    worker_id: String,
    resource: Box<dyn Resource>,
    assignment: Assignment,
    permit: GatePermit,
    phase: WorkerPhase,
    deps: ExecutorDeps,
}

impl WorkerExecutor {
    pub fn new(
        worker_id: impl Into<String>,
        resource: Box<dyn Resource>,
        assignment: Assignment,
        permit: GatePermit,
        deps: ExecutorDeps,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            resource,
            assignment,
            permit,
            phase: WorkerPhase::Provisioned,
            deps,
        }
    }

    /// Drive the worker to `Terminated`.
    ///
    /// The resource is released and the gate permit dropped on every path.
    pub async fn run(mut self) -> WorkerExit {
        info!(
            worker = %self.worker_id,
            tasks = self.assignment.len(),
            "Worker starting"
        );

        let exit = self.execute().await;

        self.transition(WorkerPhase::Terminated);
        let Self {
            worker_id,
            resource,
            permit,
            deps,
            ..
        } = self;
        deps.provisioner.release(resource).await;
        drop(permit);

        match exit {
            WorkerExit::Finished { executed } => {
                info!(worker = %worker_id, executed, "Worker finished");
            }
            WorkerExit::SessionFailed => {
                warn!(worker = %worker_id, "Worker terminated after session setup failure");
            }
            WorkerExit::Interrupted { executed, skipped } => {
                info!(worker = %worker_id, executed, skipped, "Worker interrupted");
            }
        }
        exit
    }

    async fn execute(&mut self) -> WorkerExit {
        self.transition(WorkerPhase::SessionInit);
        if !self.initialize_session().await {
            self.deps.tracker.forfeit(self.assignment.len());
            return WorkerExit::SessionFailed;
        }

        self.transition(WorkerPhase::Running);
        let total = self.assignment.len();
        for (executed, instance) in self.assignment.iter().enumerate() {
            if self.deps.interrupt.is_stop_requested() {
                let skipped = total - executed;
                self.deps.tracker.forfeit(skipped);
                return WorkerExit::Interrupted { executed, skipped };
            }

            let result = self.run_instance(instance).await;
            if self.deps.results.send(AggregatorMessage::Result(result)).is_err() {
                warn!(worker = %self.worker_id, "Result stream closed, result dropped");
            }
        }

        WorkerExit::Finished { executed: total }
    }

    async fn initialize_session(&self) -> bool {
        let outcome = AssertUnwindSafe(self.deps.session.initialize(self.resource.as_ref()))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(worker = %self.worker_id, error = %e, "Session setup failed");
                false
            }
            Err(panic) => {
                warn!(
                    worker = %self.worker_id,
                    error = %panic_message(panic.as_ref()),
                    "Session setup panicked"
                );
                false
            }
        }
    }

    async fn run_instance(&self, instance: &TaskInstance) -> TaskResult {
        let name = instance.name.as_str();

        let Some(task) = self.deps.catalog.resolve(name) else {
            warn!(worker = %self.worker_id, task = %name, "Task not found in catalog");
            return TaskResult::failure(
                &self.worker_id,
                name,
                format!("No task named '{name}' is registered"),
            );
        };

        debug!(worker = %self.worker_id, task = %name, "Task starting");
        let outcome = AssertUnwindSafe(task.execute(self.resource.as_ref()))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(TaskOutcome::Completed)) => {
                debug!(worker = %self.worker_id, task = %name, "Task succeeded");
                TaskResult::success(&self.worker_id, name, "Task completed")
            }
            Ok(Ok(TaskOutcome::Failed(reason))) => {
                warn!(worker = %self.worker_id, task = %name, reason = %reason, "Task reported failure");
                TaskResult::failure(&self.worker_id, name, reason)
            }
            Ok(Err(e)) => {
                warn!(worker = %self.worker_id, task = %name, error = %e, "Task failed");
                TaskResult::failure(&self.worker_id, name, format!("Task raised an error: {e:#}"))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(worker = %self.worker_id, task = %name, error = %message, "Task panicked");
                TaskResult::failure(&self.worker_id, name, format!("Task panicked: {message}"))
            }
        }
    }

    fn transition(&mut self, next: WorkerPhase) {
        if !self.phase.can_transition_to(next) {
            warn!(
                worker = %self.worker_id,
                from = %self.phase,
                to = %next,
                "Unexpected worker phase transition"
            );
        }
        debug!(worker = %self.worker_id, from = %self.phase, to = %next, "Worker phase");
        self.phase = next;
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
