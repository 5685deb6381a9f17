//! Operator-visible run log.
//!
//! Every model request and response, every retry, every repair and every
//! warning is appended here so an operator can reconstruct what a run did
//! and why. This is a human-facing artifact, separate from `tracing`
//! diagnostics: entries are plain sentences with timestamps, optionally
//! mirrored to a JSON-lines file for later replay.

mod log;

pub use log::RunLog;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Category of a run-log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogKind {
    /// A prompt dispatched to the generation backend.
    Request,
    /// Text received from the backend.
    Response,
    /// A retry after a transient or rate-limit failure.
    Retry,
    /// A bounded repair action (rewrite, insert, delete) applied to a node.
    Repair,
    /// A recovered anomaly the operator should know about.
    Warning,
    /// Orchestrator state transitions and per-node progress.
    Phase,
    /// A failure that aborted the run.
    Failure,
}

impl std::fmt::Display for LogKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogKind::Request => "request",
            LogKind::Response => "response",
            LogKind::Retry => "retry",
            LogKind::Repair => "repair",
            LogKind::Warning => "warning",
            LogKind::Phase => "phase",
            LogKind::Failure => "failure",
        };
        write!(f, "{}", s)
    }
}

/// One timestamped run-log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub kind: LogKind,
    pub detail: String,
}

impl LogEntry {
    pub fn new(kind: LogKind, detail: impl Into<String>) -> Self {
        Self {
            at: Utc::now(),
            kind,
            detail: detail.into(),
        }
    }
}
