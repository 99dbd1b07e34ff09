//! Dispatch coordinator.
//!
//! `dispatch()` validates its input, plans one assignment per worker, and
//! hands the run to a driver task that admits workers through the
//! concurrency gate in roster order. Each admitted worker gets its resource
//! and runs on its own task; the driver waits for all of them, then stops
//! the aggregator.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tokio::sync::{RwLock, broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::dispatch::aggregator::{AggregatorMessage, ExecutionStatus, History, StatusTracker};
use crate::dispatch::executor::{ExecutorDeps, WorkerExecutor, WorkerExit};
use crate::dispatch::gate::ConcurrencyGate;
use crate::dispatch::interrupt::{InterruptController, PendingWorker};
use crate::dispatch::planner::AssignmentPlanner;
use crate::error::{DispatchError, ProvisionError};
use crate::resource::{Resource, ResourceProvisioner, SessionInitializer};
use crate::task::model::flattened_len;
use crate::task::{TaskCatalog, TaskDefinition, TaskLimit, TaskResult};

/// What a finished run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub run_id: Uuid,
    /// Workers whose executor was started.
    pub launched: usize,
    /// Workers skipped because their resource could not be acquired.
    pub provision_failures: usize,
    /// Workers never admitted because the run was stopped.
    pub not_admitted: usize,
    /// Workers whose session setup failed.
    pub session_failures: usize,
    /// Workers that observed a stop mid-assignment.
    pub interrupted: usize,
    pub elapsed: Duration,
}

/// State shared between a run's driver, its handle, and the dispatcher.
struct RunShared {
    run_id: Uuid,
    tracker: Arc<StatusTracker>,
    interrupt: Arc<InterruptController>,
    /// Flips to `true` once the driver has joined every executor and the aggregator.
    finished: watch::Sender<bool>,
}

impl RunShared {
    fn is_finished(&self) -> bool {
        *self.finished.borrow()
    }

    fn mark_finished(&self) {
        self.finished.send_replace(true);
    }

    /// Stop the run and wait until it has fully wound down, so the next
    /// dispatch finds it finished.
    async fn request_stop(&self, timeout: Duration) -> bool {
        if self.interrupt.request_stop() {
            info!(run_id = %self.run_id, "Stop requested");
        }
        let mut finished = self.finished.subscribe();
        let drained = tokio::time::timeout(timeout, finished.wait_for(|done| *done))
            .await
            .is_ok();
        if !drained {
            warn!(run_id = %self.run_id, ?timeout, "Run still draining after stop timeout");
        }
        drained
    }
}

/// Caller's handle on one dispatch run.
pub struct DispatchHandle {
    shared: Arc<RunShared>,
    driver: JoinHandle<RunSummary>,
    stop_timeout: Duration,
}

impl DispatchHandle {
    /// Identifier attached to this run's log span.
    pub fn run_id(&self) -> Uuid {
        self.shared.run_id
    }

    /// Current progress of this run.
    pub fn status(&self) -> ExecutionStatus {
        self.shared.tracker.status()
    }

    /// Snapshot of every result recorded so far.
    pub async fn history(&self) -> History {
        self.shared.tracker.history().await
    }

    /// Live feed of results as the aggregator records them.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskResult> {
        self.shared.tracker.subscribe()
    }

    /// Stop admitting workers and starting tasks, then wait (bounded) for
    /// the run to finish. Returns whether it finished in time.
    pub async fn request_stop(&self) -> bool {
        self.shared.request_stop(self.stop_timeout).await
    }

    /// Whether every executor and the aggregator have exited.
    pub fn is_finished(&self) -> bool {
        self.shared.is_finished()
    }

    /// Wait for the run to complete.
    pub async fn join(self) -> Result<RunSummary, DispatchError> {
        self.driver
            .await
            .map_err(|e| DispatchError::DriverFailed(e.to_string()))
    }
}

/// Coordinates dispatch runs over a fixed set of collaborators.
pub struct Dispatcher {
    config: DispatchConfig,
    planner: AssignmentPlanner,
    catalog: Arc<TaskCatalog>,
    provisioner: Arc<dyn ResourceProvisioner>,
    session: Arc<dyn SessionInitializer>,
    /// Most recent run, if any.
    current: RwLock<Option<Arc<RunShared>>>,
}

impl Dispatcher {
    /// Create a dispatcher; no run starts until [`Dispatcher::dispatch`].
    pub fn new(
        config: DispatchConfig,
        catalog: Arc<TaskCatalog>,
        provisioner: Arc<dyn ResourceProvisioner>,
        session: Arc<dyn SessionInitializer>,
    ) -> Self {
        Self {
            planner: AssignmentPlanner::from_config(&config),
            config,
            catalog,
            provisioner,
            session,
            current: RwLock::new(None),
        }
    }

    /// Start a run. Fails before any worker starts on invalid input or while
    /// another run is still in progress.
    pub async fn dispatch(
        &self,
        sequence: &[TaskDefinition],
        worker_ids: &[String],
        concurrency_limit: usize,
    ) -> Result<DispatchHandle, DispatchError> {
        let mut current = self.current.write().await;
        if let Some(run) = current.as_ref()
            && !run.is_finished()
        {
            return Err(DispatchError::AlreadyRunning);
        }

        self.validate(sequence, worker_ids, concurrency_limit)?;

        let run_id = Uuid::new_v4();
        let per_worker = flattened_len(sequence);
        let total = worker_ids.len() * per_worker;
        let assignments = self.planner.plan(sequence, worker_ids.len());

        let backlog = worker_ids
            .iter()
            .cloned()
            .zip(assignments)
            .enumerate()
            .map(|(index, (worker_id, assignment))| PendingWorker {
                index,
                worker_id,
                assignment,
            });
        let interrupt = Arc::new(InterruptController::new(backlog));
        let (tracker, results, aggregator) = StatusTracker::spawn(total);

        let shared = Arc::new(RunShared {
            run_id,
            tracker: Arc::clone(&tracker),
            interrupt: Arc::clone(&interrupt),
            finished: watch::channel(false).0,
        });

        info!(
            run_id = %run_id,
            workers = worker_ids.len(),
            tasks_per_worker = per_worker,
            total,
            concurrency_limit,
            "Dispatch started"
        );

        let driver = RunDriver {
            run_id,
            worker_count: worker_ids.len(),
            per_worker,
            gate: ConcurrencyGate::new(concurrency_limit),
            provision_timeout: self.config.provision_timeout,
            deps: ExecutorDeps {
                catalog: Arc::clone(&self.catalog),
                provisioner: Arc::clone(&self.provisioner),
                session: Arc::clone(&self.session),
                interrupt,
                tracker,
                results,
            },
            aggregator,
            shared: Arc::clone(&shared),
        };
        let span = info_span!("run", run_id = %run_id);
        let driver = tokio::spawn(driver.run().instrument(span));

        *current = Some(Arc::clone(&shared));

        Ok(DispatchHandle {
            shared,
            driver,
            stop_timeout: self.config.stop_timeout,
        })
    }

    /// Dispatch with the configured default concurrency.
    pub async fn dispatch_default(
        &self,
        sequence: &[TaskDefinition],
        worker_ids: &[String],
    ) -> Result<DispatchHandle, DispatchError> {
        self.dispatch(sequence, worker_ids, self.config.default_concurrency)
            .await
    }

    /// Status of the most recent run, or the not-started sentinel.
    pub async fn query_status(&self) -> ExecutionStatus {
        match self.current.read().await.as_ref() {
            Some(run) => run.tracker.status(),
            None => ExecutionStatus::not_started(),
        }
    }

    /// History of the most recent run.
    pub async fn query_history(&self) -> History {
        let run = self.current.read().await.clone();
        match run {
            Some(run) => run.tracker.history().await,
            None => History::new(),
        }
    }

    /// Stop the most recent run. Returns whether it finished within the
    /// configured timeout; `true` when there is nothing to stop.
    pub async fn request_stop(&self) -> bool {
        let run = self.current.read().await.clone();
        match run {
            Some(run) => run.request_stop(self.config.stop_timeout).await,
            None => true,
        }
    }

    fn validate(
        &self,
        sequence: &[TaskDefinition],
        worker_ids: &[String],
        concurrency_limit: usize,
    ) -> Result<(), DispatchError> {
        if concurrency_limit < 1 {
            return Err(DispatchError::InvalidConcurrency {
                limit: concurrency_limit,
            });
        }

        let mut seen = HashSet::with_capacity(worker_ids.len());
        for id in worker_ids {
            if !seen.insert(id.as_str()) {
                return Err(DispatchError::DuplicateWorker { id: id.clone() });
            }
        }

        let mut limited = HashSet::new();
        for (position, def) in sequence.iter().enumerate() {
            if def.name.trim().is_empty() {
                return Err(DispatchError::EmptyTaskName { position });
            }
            if def.repetition < 1 {
                return Err(DispatchError::InvalidRepetition {
                    task: def.name.clone(),
                    repetition: def.repetition,
                });
            }
            if self.catalog.limit_of(&def.name) == TaskLimit::OncePerDay
                && (def.repetition > 1 || !limited.insert(def.name.as_str()))
            {
                return Err(DispatchError::RepetitionLimited {
                    task: def.name.clone(),
                });
            }
        }

        Ok(())
    }
}

/// Owns everything the admission loop needs for one run.
struct RunDriver {
    run_id: Uuid,
    worker_count: usize,
    per_worker: usize,
    gate: ConcurrencyGate,
    provision_timeout: Duration,
    deps: ExecutorDeps,
    aggregator: Option<JoinHandle<()>>,
    shared: Arc<RunShared>,
}

impl RunDriver {
    async fn run(mut self) -> RunSummary {
        let started = Instant::now();
        let mut executors: Vec<JoinHandle<WorkerExit>> = Vec::new();
        let mut admitted = 0;
        let mut provision_failures = 0;

        loop {
            if self.deps.interrupt.is_stop_requested() {
                break;
            }

            let permit = tokio::select! {
                permit = self.gate.acquire() => permit,
                _ = self.deps.interrupt.stopped() => break,
            };

            let Some(next) = self.deps.interrupt.next_admission() else {
                drop(permit);
                break;
            };
            admitted += 1;

            let resource = match self.provision(&next.worker_id).await {
                Ok(resource) => resource,
                Err(e) => {
                    error!(worker = %next.worker_id, error = %e, "Provisioning failed, skipping worker");
                    drop(permit);
                    provision_failures += 1;
                    self.deps.tracker.forfeit(self.per_worker);
                    continue;
                }
            };

            if self.deps.interrupt.is_stop_requested() {
                debug!(worker = %next.worker_id, "Stop requested during provisioning, not launching");
                self.deps.provisioner.release(resource).await;
                drop(permit);
                admitted -= 1;
                break;
            }

            debug!(
                worker = %next.worker_id,
                index = next.index,
                in_use = self.gate.in_use(),
            limit = self.gate.limit(),
            pending = self.deps.interrupt.pending(),
                "Worker admitted"
            );
            let executor = WorkerExecutor::new(
                next.worker_id,
                resource,
                next.assignment,
                permit,
                self.deps.clone(),
            );
            executors.push(tokio::spawn(executor.run().in_current_span()));
        }

        let not_admitted = self.worker_count - admitted;
        self.deps.tracker.forfeit(not_admitted * self.per_worker);

        let launched = executors.len();
        let mut session_failures = 0;
        let mut interrupted = 0;
        for outcome in join_all(executors).await {
            match outcome {
                Ok(WorkerExit::SessionFailed) => session_failures += 1,
                Ok(WorkerExit::Interrupted { .. }) => interrupted += 1,
                Ok(WorkerExit::Finished { .. }) => {}
                Err(e) => error!(error = %e, "Worker task aborted"),
            }
        }

        self.stop_aggregator().await;
        self.shared.mark_finished();

        let summary = RunSummary {
            run_id: self.run_id,
            launched,
            provision_failures,
            not_admitted,
            session_failures,
            interrupted,
            elapsed: started.elapsed(),
        };
        let status = self.deps.tracker.status();
        info!(
            launched,
            provision_failures,
            not_admitted,
            completed = status.completed_count,
            total = status.total_count,
            elapsed_ms = summary.elapsed.as_millis() as u64,
            "Dispatch finished"
        );
        summary
    }

    async fn provision(&self, worker_id: &str) -> Result<Box<dyn Resource>, ProvisionError> {
        tokio::time::timeout(
            self.provision_timeout,
            self.deps.provisioner.acquire(worker_id),
        )
        .await
        .map_err(|_| ProvisionError::Timeout {
            worker_id: worker_id.to_string(),
            timeout: self.provision_timeout,
        })?
    }

    async fn stop_aggregator(&mut self) {
        let Some(handle) = self.aggregator.take() else {
            return;
        };
        // Every executor has returned, so the stop is queued behind all results.
        if self.deps.results.send(AggregatorMessage::Stop).is_err() {
            warn!("Aggregator already gone before stop");
        }
        if let Err(e) = handle.await {
            error!(error = %e, "Aggregator task failed");
        }
    }
}
