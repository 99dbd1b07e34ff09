//! Task catalog for resolving task names to executable handlers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;

use crate::resource::Resource;

/// Separator between a project prefix and the task part of a task name.
const PROJECT_SEPARATOR: &str = "_task_";

/// What a task reports when it returns normally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// The task did its work.
    Completed,
    /// The task ran to the end but could not do its work; the string says why.
    Failed(String),
}

/// How often a task may appear in one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskLimit {
    #[default]
    Unlimited,
    /// At most one instance per worker per run.
    OncePerDay,
}

/// A unit of work a worker can run against its resource.
#[async_trait]
pub trait ExecutableTask: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str {
        ""
    }

    fn limit(&self) -> TaskLimit {
        TaskLimit::Unlimited
    }

    /// Run the task. `Err` and panics are both recorded as failures.
    async fn execute(&self, resource: &dyn Resource) -> anyhow::Result<TaskOutcome>;
}

/// Listing entry for a registered task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskDescriptor {
    pub name: String,
    pub project: String,
    pub description: String,
    pub limit: TaskLimit,
}

/// Registry of tasks, built once at startup.
#[derive(Default)]
pub struct TaskCatalog {
    tasks: HashMap<String, Arc<dyn ExecutableTask>>,
}

impl TaskCatalog {
    /// Create an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a task. Returns `false` and keeps the existing entry if the
    /// name is already taken.
    pub fn register(&mut self, task: Arc<dyn ExecutableTask>) -> bool {
        let name = task.name().to_string();
        if self.tasks.contains_key(&name) {
            tracing::warn!(task = %name, "Rejected task registration: name already registered");
            return false;
        }
        tracing::debug!("Registered task: {}", name);
        self.tasks.insert(name, task);
        true
    }

    /// Builder-style registration for startup code.
    pub fn with(mut self, task: Arc<dyn ExecutableTask>) -> Self {
        self.register(task);
        self
    }

    /// Get a task by name.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn ExecutableTask>> {
        self.tasks.get(name).cloned()
    }

    /// Check if a task is registered.
    pub fn has(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    /// Repetition limit of a task; unknown names are unlimited.
    pub fn limit_of(&self, name: &str) -> TaskLimit {
        self.tasks
            .get(name)
            .map(|task| task.limit())
            .unwrap_or_default()
    }

    /// Number of registered tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// All registered tasks, sorted by project then name.
    pub fn descriptors(&self) -> Vec<TaskDescriptor> {
        let mut descriptors: Vec<TaskDescriptor> = self
            .tasks
            .values()
            .map(|task| TaskDescriptor {
                name: task.name().to_string(),
                project: project_of(task.name()).to_string(),
                description: task.description().to_string(),
                limit: task.limit(),
            })
            .collect();
        descriptors.sort_by(|a, b| (&a.project, &a.name).cmp(&(&b.project, &b.name)));
        descriptors
    }
}

/// Project a task belongs to: the part of its name before `_task_`, or the
/// whole name when there is no such marker.
pub fn project_of(task_name: &str) -> &str {
    task_name
        .split_once(PROJECT_SEPARATOR)
        .map(|(project, _)| project)
        .unwrap_or(task_name)
}
