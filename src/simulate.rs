//! Simulated collaborators for dry runs of the dispatch engine.
//!
//! Nothing here touches a real resource: provisioning, session setup and
//! tasks sleep for a random interval and fail at a configurable rate.

use std::any::Any;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::debug;

use crate::error::{ProvisionError, SessionError};
use crate::resource::{Resource, ResourceProvisioner, SessionInitializer};
use crate::task::{ExecutableTask, TaskCatalog, TaskLimit, TaskOutcome};

/// A resource that only remembers who it belongs to.
#[derive(Debug, Clone)]
pub struct SimulatedResource {
    pub worker_id: String,
    pub endpoint: String,
}

impl Resource for SimulatedResource {
    fn worker_id(&self) -> &str {
        &self.worker_id
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Random delay in `range` milliseconds, followed by a failure roll.
fn roll(range: &Range<u64>, failure_rate: f64) -> (Duration, bool) {
    let mut rng = rand::thread_rng();
    let millis = if range.is_empty() {
        range.start
    } else {
        rng.gen_range(range.clone())
    };
    (Duration::from_millis(millis), rng.gen_bool(failure_rate.clamp(0.0, 1.0)))
}

/// Hands out [`SimulatedResource`]s and tracks how many are outstanding.
pub struct SimulatedProvisioner {
    endpoint: String,
    delay_ms: Range<u64>,
    failure_rate: f64,
    outstanding: AtomicUsize,
}

impl SimulatedProvisioner {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            delay_ms: 50..250,
            failure_rate: 0.0,
            outstanding: AtomicUsize::new(0),
        }
    }

    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate;
        self
    }

    pub fn with_delay(mut self, delay_ms: Range<u64>) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// Resources acquired and not yet released.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ResourceProvisioner for SimulatedProvisioner {
    async fn acquire(&self, worker_id: &str) -> Result<Box<dyn Resource>, ProvisionError> {
        let (delay, fail) = roll(&self.delay_ms, self.failure_rate);
        tokio::time::sleep(delay).await;
        if fail {
            return Err(ProvisionError::Unavailable {
                worker_id: worker_id.to_string(),
                reason: format!("{} did not start the session", self.endpoint),
            });
        }
        self.outstanding.fetch_add(1, Ordering::SeqCst);
        debug!(worker = %worker_id, "Simulated resource acquired");
        Ok(Box::new(SimulatedResource {
            worker_id: worker_id.to_string(),
            endpoint: self.endpoint.clone(),
        }))
    }

    async fn release(&self, resource: Box<dyn Resource>) {
        self.outstanding.fetch_sub(1, Ordering::SeqCst);
        debug!(worker = %resource.worker_id(), "Simulated resource released");
    }
}

/// Session setup that fails at a fixed rate.
#[derive(Debug, Clone, Default)]
pub struct SimulatedSession {
    pub failure_rate: f64,
}

#[async_trait]
impl SessionInitializer for SimulatedSession {
    async fn initialize(&self, resource: &dyn Resource) -> Result<(), SessionError> {
        let (delay, fail) = roll(&(20..80), self.failure_rate);
        tokio::time::sleep(delay).await;
        if fail {
            return Err(SessionError::Failed {
                worker_id: resource.worker_id().to_string(),
                reason: "wallet unlock rejected".to_string(),
            });
        }
        Ok(())
    }
}

/// A task that sleeps, then succeeds, reports a soft failure, or errors.
#[derive(Debug, Clone)]
pub struct SimulatedTask {
    name: String,
    description: String,
    limit: TaskLimit,
    duration_ms: Range<u64>,
    failure_rate: f64,
}

impl SimulatedTask {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            limit: TaskLimit::Unlimited,
            duration_ms: 200..1200,
            failure_rate: 0.1,
        }
    }

    pub fn once_per_day(mut self) -> Self {
        self.limit = TaskLimit::OncePerDay;
        self
    }

    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        self.failure_rate = rate;
        self
    }

    pub fn with_duration(mut self, duration_ms: Range<u64>) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

#[async_trait]
impl ExecutableTask for SimulatedTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn limit(&self) -> TaskLimit {
        self.limit
    }

    async fn execute(&self, resource: &dyn Resource) -> anyhow::Result<TaskOutcome> {
        let (delay, fail) = roll(&self.duration_ms, self.failure_rate);
        let hard = rand::thread_rng().gen_bool(0.5);
        tokio::time::sleep(delay).await;

        match (fail, hard) {
            (false, _) => Ok(TaskOutcome::Completed),
            (true, false) => Ok(TaskOutcome::Failed(format!(
                "{} found nothing to do for {}",
                self.name,
                resource.worker_id()
            ))),
            (true, true) => anyhow::bail!("{} lost its page after {:?}", self.name, delay),
        }
    }
}

/// Catalog of simulated tasks used by the `fleet-runner` binary.
pub fn demo_catalog() -> TaskCatalog {
    let tasks: Vec<Arc<dyn ExecutableTask>> = vec![
        Arc::new(SimulatedTask::new("portal_task_checkin", "Daily check-in").once_per_day()),
        Arc::new(SimulatedTask::new("portal_task_faucet", "Claim faucet tokens")),
        Arc::new(SimulatedTask::new("portal_task_swap", "Swap a small amount")),
        Arc::new(SimulatedTask::new("forum_task_post", "Post a short message")),
        Arc::new(SimulatedTask::new("forum_task_reply", "Reply to a thread").with_failure_rate(0.2)),
    ];
    tasks.into_iter().fold(TaskCatalog::new(), TaskCatalog::with)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn provisioner_tracks_outstanding() {
        let provisioner = SimulatedProvisioner::new("http://sim").with_delay(0..1);
        let resource = provisioner.acquire("w1").await.unwrap();
        assert_eq!(resource.worker_id(), "w1");
        assert_eq!(
            resource
                .as_any()
                .downcast_ref::<SimulatedResource>()
                .unwrap()
                .endpoint,
            "http://sim"
        );
        assert_eq!(provisioner.outstanding(), 1);
        provisioner.release(resource).await;
        assert_eq!(provisioner.outstanding(), 0);
    }

    #[tokio::test]
    async fn certain_failure_is_reported() {
        let provisioner = SimulatedProvisioner::new("http://sim")
            .with_delay(0..1)
            .with_failure_rate(1.0);
        assert!(provisioner.acquire("w1").await.is_err());
    }

    #[tokio::test]
    async fn reliable_task_completes() {
        let task = SimulatedTask::new("t", "").with_duration(0..1).with_failure_rate(0.0);
        let resource = SimulatedResource {
            worker_id: "w1".to_string(),
            endpoint: "http://sim".to_string(),
        };
        assert_eq!(task.execute(&resource).await.unwrap(), TaskOutcome::Completed);
    }

    #[test]
    fn demo_catalog_marks_daily_tasks() {
        let catalog = demo_catalog();
        assert_eq!(catalog.len(), 5);
        assert_eq!(catalog.limit_of("portal_task_checkin"), TaskLimit::OncePerDay);
        assert_eq!(catalog.limit_of("portal_task_swap"), TaskLimit::Unlimited);
    }
}
