//! Per-node, per-phase progress bookkeeping.
//!
//! Every expensive step of the pipeline (structure generation, quality
//! checks, resource sync, prose drafting) is guarded by a phase flag stored
//! on the node record itself, so an interrupted run resumes without
//! repeating completed work or re-spending model calls.
//!
//! Phase state is an explicit three-state machine rather than a boolean:
//! `NotStarted -> InProgress -> Done`. Transitions outside the table are
//! rejected, which surfaces double-completion bugs instead of masking them.

use crate::errors::{ProgressError, StoreError};
use crate::store::{self, NodeStore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// The tracked pipeline phases, one flag per phase per node.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKey {
    /// Children for the next depth level have been generated.
    StructureExpanded,
    /// Length floor and narrative-span checks have run.
    StructureValidated,
    /// The content-quality audit (and any rewrite it requested) has run.
    QualityOptimized,
    /// The chapter's closing stretch has been validated (prose leaves only).
    EndingValidated,
    /// Resource inherit/evolve/propagate has run.
    ResourceSynced,
    /// Chapter prose has been drafted and accepted.
    ProseDrafted,
}

impl PhaseKey {
    pub const ALL: [PhaseKey; 6] = [
        PhaseKey::StructureExpanded,
        PhaseKey::StructureValidated,
        PhaseKey::QualityOptimized,
        PhaseKey::EndingValidated,
        PhaseKey::ResourceSynced,
        PhaseKey::ProseDrafted,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseKey::StructureExpanded => "structure_expanded",
            PhaseKey::StructureValidated => "structure_validated",
            PhaseKey::QualityOptimized => "quality_optimized",
            PhaseKey::EndingValidated => "ending_validated",
            PhaseKey::ResourceSynced => "resource_synced",
            PhaseKey::ProseDrafted => "prose_drafted",
        }
    }
}

impl fmt::Display for PhaseKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// State of one phase on one node. Absence of an entry means `NotStarted`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PhaseState {
    #[default]
    NotStarted,
    /// Work began but has not been confirmed complete. A re-entered run may
    /// pick the phase back up from here.
    InProgress,
    /// Terminal. No further transitions are valid.
    Done,
}

impl PhaseState {
    /// Transition table. `InProgress -> InProgress` is allowed so a run
    /// interrupted mid-phase can re-enter the same phase on resume.
    pub fn can_transition(self, next: PhaseState) -> bool {
        matches!(
            (self, next),
            (PhaseState::NotStarted, PhaseState::InProgress)
                | (PhaseState::InProgress, PhaseState::InProgress)
                | (PhaseState::InProgress, PhaseState::Done)
        )
    }

    pub fn is_done(self) -> bool {
        matches!(self, PhaseState::Done)
    }
}

impl fmt::Display for PhaseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PhaseState::NotStarted => "not_started",
            PhaseState::InProgress => "in_progress",
            PhaseState::Done => "done",
        };
        write!(f, "{}", s)
    }
}

/// Store-backed view of per-node phase flags.
///
/// Cloning is cheap; all clones share the same underlying store.
#[derive(Clone)]
pub struct ProgressTracker {
    store: Arc<dyn NodeStore>,
}

impl ProgressTracker {
    pub fn new(store: Arc<dyn NodeStore>) -> Self {
        Self { store }
    }

    /// Current state of a phase on a node. Unknown nodes read as `NotStarted`
    /// so callers racing an eventually-visible insert degrade to redoing work
    /// rather than erroring.
    pub async fn state(&self, node_id: &str, phase: PhaseKey) -> Result<PhaseState, StoreError> {
        let snapshot = self.store.snapshot().await?;
        Ok(snapshot
            .iter()
            .find(|n| n.id == node_id)
            .and_then(|n| n.phases.get(&phase).copied())
            .unwrap_or_default())
    }

    pub async fn is_done(&self, node_id: &str, phase: PhaseKey) -> Result<bool, StoreError> {
        Ok(self.state(node_id, phase).await?.is_done())
    }

    /// Mark a phase as started. Valid from `NotStarted` and (on resume) from
    /// `InProgress`; rejected once the phase is `Done`.
    pub async fn begin(&self, node_id: &str, phase: PhaseKey) -> Result<(), ProgressError> {
        self.transition(node_id, phase, PhaseState::InProgress).await
    }

    /// Mark a phase as complete. Only valid from `InProgress`.
    pub async fn complete(&self, node_id: &str, phase: PhaseKey) -> Result<(), ProgressError> {
        self.transition(node_id, phase, PhaseState::Done).await
    }

    async fn transition(
        &self,
        node_id: &str,
        phase: PhaseKey,
        to: PhaseState,
    ) -> Result<(), ProgressError> {
        let from = self.state(node_id, phase).await?;
        if !from.can_transition(to) {
            return Err(ProgressError::InvalidTransition {
                node: node_id.to_string(),
                phase,
                from,
                to,
            });
        }
        store::update_node(self.store.as_ref(), node_id, move |node| {
            node.phases.insert(phase, to);
        })
        .await?;
        Ok(())
    }
}
