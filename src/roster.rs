//! Worker roster file.
//!
//! Plain text, one entry per line:
//!
//! ```text
//! http://127.0.0.1:50325
//! worker-a
//! worker-b
//! ```
//!
//! The first non-empty line is the endpoint of the resource API; every
//! following non-empty line is a worker identity. Surrounding whitespace is
//! ignored.

use std::collections::HashSet;
use std::path::Path;

use crate::error::ConfigError;

/// Endpoint prefix accepted for the resource API.
const ENDPOINT_PREFIX: &str = "http://";

/// Worker identities plus the resource API endpoint they are provisioned from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerRoster {
    pub endpoint: String,
    pub workers: Vec<String>,
}

impl WorkerRoster {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let roster = Self::parse(&content)?;
        tracing::info!(
            path = %path.display(),
            workers = roster.workers.len(),
            "Loaded worker roster"
        );
        Ok(roster)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let mut lines = content.lines().map(str::trim).filter(|l| !l.is_empty());

        let endpoint = lines
            .next()
            .ok_or_else(|| ConfigError::ParseError("roster is empty".to_string()))?;
        if !endpoint.starts_with(ENDPOINT_PREFIX) {
            return Err(ConfigError::InvalidValue {
                key: "endpoint".to_string(),
                message: format!("{endpoint:?} must start with {ENDPOINT_PREFIX}"),
            });
        }

        let workers: Vec<String> = lines.map(str::to_string).collect();
        if workers.is_empty() {
            tracing::warn!("Roster lists no workers");
        }

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            workers,
        })
    }

    /// Worker ids that appear more than once, in first-repeat order.
    pub fn duplicates(&self) -> Vec<&str> {
        let mut seen = HashSet::new();
        let mut repeated = Vec::new();
        for id in &self.workers {
            if !seen.insert(id.as_str()) && !repeated.contains(&id.as_str()) {
                repeated.push(id.as_str());
            }
        }
        repeated
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn parses_endpoint_and_workers() {
        let roster = WorkerRoster::parse("\n http://localhost:50325/ \nw1\n\n  w2  \n").unwrap();
        assert_eq!(roster.endpoint, "http://localhost:50325");
        assert_eq!(roster.workers, vec!["w1", "w2"]);
        assert!(roster.duplicates().is_empty());
    }

    #[test]
    fn rejects_bad_endpoint() {
        let err = WorkerRoster::parse("localhost\nw1").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn rejects_empty_file() {
        assert!(matches!(
            WorkerRoster::parse("  \n"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn reports_duplicates_once() {
        let roster = WorkerRoster::parse("http://x\nw1\nw2\nw1\nw1").unwrap();
        assert_eq!(roster.duplicates(), vec!["w1"]);
    }

    #[test]
    fn loads_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "http://127.0.0.1:50325").unwrap();
        writeln!(file, "alpha").unwrap();
        let roster = WorkerRoster::load(file.path()).unwrap();
        assert_eq!(roster.workers, vec!["alpha"]);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = WorkerRoster::load("/definitely/not/here.txt").unwrap_err();
        assert!(matches!(err, ConfigError::Io(_)));
    }
}
