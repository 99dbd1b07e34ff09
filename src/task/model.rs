//! Task sequence and result types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// A named task plus how many times each worker should run it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub name: String,
    pub repetition: u32,
}

impl TaskDefinition {
    pub fn new(name: impl Into<String>, repetition: u32) -> Self {
        Self {
            name: name.into(),
            repetition,
        }
    }

    /// Parse a comma-separated sequence such as `"checkin,swap*3"`.
    ///
    /// Each entry is a task name optionally followed by `*count`. Blank
    /// entries are ignored, so a trailing comma is accepted.
    pub fn parse_sequence(raw: &str) -> Result<Vec<Self>, ConfigError> {
        let mut sequence = Vec::new();
        for entry in raw.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (name, repetition) = match entry.split_once('*') {
                Some((name, count)) => {
                    let repetition = count.trim().parse::<u32>().map_err(|e| {
                        ConfigError::ParseError(format!("bad repetition in {entry:?}: {e}"))
                    })?;
                    (name.trim(), repetition)
                }
                None => (entry, 1),
            };
            if name.is_empty() {
                return Err(ConfigError::ParseError(format!(
                    "missing task name in {entry:?}"
                )));
            }
            if repetition == 0 {
                return Err(ConfigError::ParseError(format!(
                    "repetition must be at least 1 in {entry:?}"
                )));
            }
            sequence.push(Self::new(name, repetition));
        }
        Ok(sequence)
    }
}

/// Number of instances a sequence expands to.
pub fn flattened_len(sequence: &[TaskDefinition]) -> usize {
    sequence.iter().map(|def| def.repetition as usize).sum()
}

/// A single occurrence of a task after repetitions are expanded.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskInstance {
    pub name: String,
}

impl TaskInstance {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Ordered task instances given to one worker.
pub type Assignment = Vec<TaskInstance>;

/// Outcome recorded for one executed task instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Success,
    Failure,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Success => "SUCCESS",
            Self::Failure => "FAILURE",
        };
        write!(f, "{s}")
    }
}

/// Record produced once per executed task instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    pub worker_id: String,
    pub task_name: String,
    pub status: TaskStatus,
    pub timestamp: DateTime<Utc>,
    pub details: String,
}

impl TaskResult {
    pub fn success(
        worker_id: impl Into<String>,
        task_name: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self::with_status(worker_id, task_name, TaskStatus::Success, details)
    }

    pub fn failure(
        worker_id: impl Into<String>,
        task_name: impl Into<String>,
        details: impl Into<String>,
    ) -> Self {
        Self::with_status(worker_id, task_name, TaskStatus::Failure, details)
    }

    fn with_status(
        worker_id: impl Into<String>,
        task_name: impl Into<String>,
        status: TaskStatus,
        details: impl Into<String>,
    ) -> Self {
        Self {
            worker_id: worker_id.into(),
            task_name: task_name.into(),
            status,
            timestamp: Utc::now(),
            details: details.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == TaskStatus::Success
    }
}
