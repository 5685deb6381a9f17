//! Run state, stop signal and the final report.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::TargetDepth;
use crate::node::NodeKind;

/// The three structure-building levels, in pipeline order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StructureLevel {
    Outline,
    Plot,
    Chapter,
}

impl StructureLevel {
    pub const ALL: [StructureLevel; 3] = [
        StructureLevel::Outline,
        StructureLevel::Plot,
        StructureLevel::Chapter,
    ];

    /// Kind of node this level creates.
    pub fn node_kind(&self) -> NodeKind {
        match self {
            StructureLevel::Outline => NodeKind::Outline,
            StructureLevel::Plot => NodeKind::Plot,
            StructureLevel::Chapter => NodeKind::Chapter,
        }
    }

    /// Kind of node this level creates children under.
    pub fn parent_kind(&self) -> NodeKind {
        match self {
            StructureLevel::Outline => NodeKind::Root,
            StructureLevel::Plot => NodeKind::Outline,
            StructureLevel::Chapter => NodeKind::Plot,
        }
    }

    /// Does the run terminate after this level for the configured depth?
    pub fn is_terminal_for(&self, depth: TargetDepth) -> bool {
        matches!(
            (self, depth),
            (StructureLevel::Outline, TargetDepth::Outline)
                | (StructureLevel::Plot, TargetDepth::Plot)
                | (StructureLevel::Chapter, TargetDepth::Chapter)
        )
    }
}

impl fmt::Display for StructureLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StructureLevel::Outline => "outline",
            StructureLevel::Plot => "plot",
            StructureLevel::Chapter => "chapter",
        };
        write!(f, "{}", s)
    }
}

/// Orchestrator states, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    RootAudit,
    Structure(StructureLevel),
    Write,
    Done,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::RootAudit => write!(f, "root audit"),
            RunState::Structure(level) => write!(f, "structure ({})", level),
            RunState::Write => write!(f, "write prose"),
            RunState::Done => write!(f, "done"),
        }
    }
}

/// How the run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Completed,
    /// Cooperative stop; the tree and flags are valid for resume.
    Stopped,
    Error,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Completed => "completed",
            RunStatus::Stopped => "stopped",
            RunStatus::Error => "error",
        };
        write!(f, "{}", s)
    }
}

/// What a run did, for the operator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Backend requests dispatched, retries included.
    pub requests: usize,
    pub nodes_before: usize,
    pub nodes_after: usize,
    /// Present when `status` is `Error`.
    pub message: Option<String>,
}

/// Cooperative cancellation handle. Cloneable; all clones observe the same
/// flag. Checked between node-level steps; an in-flight backend call is
/// allowed to complete, never aborted.
#[derive(Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
