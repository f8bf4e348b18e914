//! Persisted records: workflows, executions, settings.
//!
//! These mirror the relational schema in `migrations/`. Graph blobs and
//! execution logs are stored as JSON text columns and decoded lazily.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// A stored workflow definition.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Workflow {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Node records as the editor persists them.
    pub nodes: Value,
    /// Edge records as the editor persists them.
    pub edges: Value,
    pub is_active: bool,
    /// Present iff the workflow is active.
    #[serde(default)]
    pub schedule_job_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Terminal and in-flight states of an execution. Transitions exactly once
/// from `Running` to one of the terminal states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }

    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "running" => Some(ExecutionStatus::Running),
            "completed" => Some(ExecutionStatus::Completed),
            "failed" => Some(ExecutionStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

/// One line of an execution's structured log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogEntry {
    pub time: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
}

impl LogEntry {
    fn new(level: LogLevel, message: impl Into<String>) -> Self {
        Self {
            time: Utc::now(),
            level,
            message: message.into(),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(LogLevel::Error, message)
    }
}

/// A single run of a workflow, created per invocation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: i64,
    pub workflow_id: i64,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub logs: Vec<LogEntry>,
}

/// Process-wide settings singleton. The gateway API key is stored sealed
/// (see [`crate::secret`]); it is never echoed through the API.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AppSettings {
    #[serde(default, skip_serializing)]
    pub admin_password_hash: Option<String>,
    pub is_setup_complete: bool,
    #[serde(default, skip_serializing)]
    pub gateway_api_key: Option<String>,
    pub gateway_host: String,
    pub gateway_ws_url: String,
    pub updated_at: DateTime<Utc>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            admin_password_hash: None,
            is_setup_complete: false,
            gateway_api_key: None,
            gateway_host: "http://127.0.0.1:5000".to_string(),
            gateway_ws_url: "ws://127.0.0.1:8765".to_string(),
            updated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trip() {
        for status in [
            ExecutionStatus::Running,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
        ] {
            assert_eq!(ExecutionStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(ExecutionStatus::parse("paused"), None);
    }

    #[test]
    fn log_entries_serialize_lowercase_levels() {
        let entry = LogEntry::warning("careful");
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["level"], "warning");
        assert_eq!(json["message"], "careful");
    }
}
