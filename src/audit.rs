/// Audit logging for configuration and deployment operations
///
/// This module provides structured logging of every operation that changes
/// the configuration history or touches the firewalls: saves, resets,
/// rollbacks, checks and deployments.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Types of auditable events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Edit,
    Save,
    Reset,
    Rollback,
    Check,
    Deploy,
}

/// A single audit log entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// When the event occurred (UTC)
    pub timestamp: DateTime<Utc>,

    pub event_type: EventType,

    pub success: bool,

    /// Additional structured data about the event
    pub details: serde_json::Value,

    /// Error message if operation failed
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(
        event_type: EventType,
        success: bool,
        details: serde_json::Value,
        error: Option<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            event_type,
            success,
            details,
            error,
        }
    }
}

/// Audit log writer
#[derive(Debug, Clone)]
pub struct AuditLog {
    log_path: PathBuf,
}

impl AuditLog {
    /// Creates an audit log in the state directory.
    ///
    /// # Errors
    ///
    /// Returns `Err` if state directory cannot be determined
    pub fn new() -> std::io::Result<Self> {
        let mut log_path = crate::utils::get_state_dir().ok_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::NotFound, "State directory not found")
        })?;
        log_path.push("audit.log");

        Ok(Self { log_path })
    }

    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            log_path: path.into(),
        }
    }

    /// Appends an event to the audit log
    ///
    /// Events are written as JSON-lines format (one JSON object per line)
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be opened or written
    pub fn log(&self, event: &AuditEvent) -> std::io::Result<()> {
        let json = serde_json::to_string(event)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)?;

        file.write_all(json.as_bytes())?;
        file.write_all(b"\n")?;
        file.sync_all()?;

        Ok(())
    }

    /// Reads the most recent events, newest first
    ///
    /// # Errors
    ///
    /// Returns `Err` if file cannot be read
    pub fn read_recent(&self, count: usize) -> std::io::Result<Vec<AuditEvent>> {
        let content = std::fs::read_to_string(&self.log_path)?;

        let events: Vec<AuditEvent> = content
            .lines()
            .rev()
            .take(count)
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();

        Ok(events)
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }
}

/// Records an event, logging a warning if the audit log cannot be written.
pub fn record(
    event_type: EventType,
    success: bool,
    details: serde_json::Value,
    error: Option<String>,
) {
    if let Ok(audit) = AuditLog::new() {
        let event = AuditEvent::new(event_type, success, details, error);
        if let Err(e) = audit.log(&event) {
            tracing::warn!("Failed to write audit log: {}", e);
        }
    }
}

/// Logs a table edit
pub fn log_edit(table: &str, summary: Option<&str>, success: bool, error: Option<String>) {
    record(
        EventType::Edit,
        success,
        serde_json::json!({ "table": table, "summary": summary }),
        error,
    );
}

/// Logs a save operation
pub fn log_save(message: &str, success: bool, error: Option<String>) {
    record(
        EventType::Save,
        success,
        serde_json::json!({ "message": message }),
        error,
    );
}

/// Logs a reset to the last checkpoint
pub fn log_reset(success: bool, error: Option<String>) {
    record(EventType::Reset, success, serde_json::json!({}), error);
}

/// Logs a rollback to `revision`
pub fn log_rollback(revision: &str, success: bool, error: Option<String>) {
    record(
        EventType::Rollback,
        success,
        serde_json::json!({ "revision": revision }),
        error,
    );
}

/// Logs a check with the number of hosts that differ
pub fn log_check(changed_hosts: usize, success: bool, error: Option<String>) {
    record(
        EventType::Check,
        success,
        serde_json::json!({ "changed_hosts": changed_hosts }),
        error,
    );
}

/// Logs a deployment
pub fn log_deploy(converged: bool, success: bool, error: Option<String>) {
    record(
        EventType::Deploy,
        success,
        serde_json::json!({ "converged": converged }),
        error,
    );
}
