//! Per-worker resource collaborators.
//!
//! A worker owns exactly one [`Resource`] (a browser session, a device, a
//! connection) for the lifetime of its executor. Acquisition, release and
//! one-shot session setup live outside the dispatch core; the engine only
//! talks to them through these traits.

use std::any::Any;

use async_trait::async_trait;

use crate::error::{ProvisionError, SessionError};

/// Handle to an externally provisioned resource bound to one worker.
pub trait Resource: Send + Sync {
    /// Worker identity this resource was acquired for.
    fn worker_id(&self) -> &str;

    /// Downcast hook so tasks can reach their concrete resource type.
    fn as_any(&self) -> &dyn Any;
}

/// Acquires and releases worker resources.
#[async_trait]
pub trait ResourceProvisioner: Send + Sync {
    /// Acquire the resource for a worker. Failures skip that worker only.
    async fn acquire(&self, worker_id: &str) -> Result<Box<dyn Resource>, ProvisionError>;

    /// Release a resource. Called exactly once per successful `acquire`.
    async fn release(&self, resource: Box<dyn Resource>);
}

/// One-shot, per-worker setup run before any task (e.g. logging in).
#[async_trait]
pub trait SessionInitializer: Send + Sync {
    async fn initialize(&self, resource: &dyn Resource) -> Result<(), SessionError>;
}

/// Session initializer for resources that need no setup.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoSession;

#[async_trait]
impl SessionInitializer for NoSession {
    async fn initialize(&self, _resource: &dyn Resource) -> Result<(), SessionError> {
        Ok(())
    }
}
