//! Task definitions, results, and the task catalog.

pub mod catalog;
pub mod model;

pub use catalog::{ExecutableTask, TaskCatalog, TaskDescriptor, TaskLimit, TaskOutcome};
pub use model::{Assignment, TaskDefinition, TaskInstance, TaskResult, TaskStatus};
