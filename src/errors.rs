//! Typed error hierarchy for the Quill orchestrator.
//!
//! Three top-level enums cover the three subsystems:
//! - `GateError` — request gate / generation backend failures
//! - `StoreError` — node store access and persistence failures
//! - `RunError` — orchestration failures, wrapping the other two
//!
//! Malformed model responses are deliberately absent from this hierarchy:
//! the schema decoder substitutes a safe default instead of erroring.

use crate::progress::{PhaseKey, PhaseState};
use thiserror::Error;

/// Errors from the request gate after its retry budget is exhausted.
#[derive(Debug, Error)]
pub enum GateError {
    #[error("backend rate limit persisted across {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("backend failed across {attempts} attempts: {message}")]
    Backend { attempts: u32, message: String },

    #[error("request gate worker is no longer running")]
    ChannelClosed,
}

/// Errors from the node store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("node {id} not found in store")]
    NodeNotFound { id: String },

    #[error("failed to read tree snapshot at {path}: {source}")]
    SnapshotRead {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to persist tree snapshot at {path}: {source}")]
    SnapshotWrite {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("tree snapshot at {path} is not valid JSON: {source}")]
    SnapshotDecode {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// Errors from per-node progress bookkeeping.
#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("node {node}: invalid {phase} transition {from} -> {to}")]
    InvalidTransition {
        node: String,
        phase: PhaseKey,
        from: PhaseState,
        to: PhaseState,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors that abort an orchestrator run.
///
/// Node mutations and progress flags committed before the error remain
/// valid; a later run resumes from them.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("tree has no root node")]
    MissingRoot,

    #[error("generation produced no usable items for {parent} after repeated attempts")]
    EmptyGeneration { parent: String },

    #[error("invalid run configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Gate(#[from] GateError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Progress(#[from] ProgressError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
