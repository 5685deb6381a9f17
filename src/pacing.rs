//! Rhythm control at the plot level.
//!
//! Given the full ordered plot sequence and a pacing mode, asks whether
//! transition beats should be inserted between specific pairs, and applies
//! the insertions through the same splice-and-relink mechanics the
//! sequencer uses. Optional: runs only when a pacing mode is configured.

use crate::audit::{LogKind, RunLog};
use crate::client::RequestGate;
use crate::client::schema;
use crate::config::PacingMode;
use crate::errors::RunError;
use crate::node::{self, Node, NodeKind};
use crate::prompts;
use crate::store::{self, NodeStore, VISIBILITY_TIMEOUT};
use std::sync::Arc;

pub struct PacingPlanner {
    store: Arc<dyn NodeStore>,
    gate: RequestGate,
    log: Arc<RunLog>,
}

impl PacingPlanner {
    pub fn new(store: Arc<dyn NodeStore>, gate: RequestGate, log: Arc<RunLog>) -> Self {
        Self { store, gate, log }
    }

    /// Analyze the plot sequence under `parent_id` and insert any suggested
    /// transition beats. Returns how many were inserted.
    pub async fn apply(&self, parent_id: &str, mode: PacingMode) -> Result<usize, RunError> {
        let snapshot = self.store.snapshot().await?;
        let Some(parent) = node::find(&snapshot, parent_id) else {
            return Ok(0);
        };
        let siblings = node::children_of_kind(&snapshot, parent, NodeKind::Plot);
        if siblings.len() < 2 {
            return Ok(0);
        }

        let request = prompts::pacing_analysis(&siblings, mode);
        let text = self.gate.invoke(request).await?;
        let plan = schema::decode_pacing_plan(&text);
        if plan.insertions.is_empty() {
            return Ok(0);
        }

        let mut created = Vec::new();
        for insertion in plan.insertions {
            // Anchors must be live siblings; stale suggestions are dropped.
            if !siblings.iter().any(|s| s.id == insertion.insert_after_id) {
                continue;
            }
            if insertion.new_summary.trim().is_empty() {
                continue;
            }
            let beat = Node::new(NodeKind::Plot, "Transition")
                .with_summary(insertion.new_summary.trim());
            let beat_id = beat.id.clone();
            let parent = parent_id.to_string();
            let after = insertion.insert_after_id.clone();
            self.store
                .mutate(Box::new(move |mut nodes| {
                    node::attach(&mut nodes, &parent, Some(&after), beat);
                    nodes
                }))
                .await?;
            created.push(beat_id);
        }

        if !created.is_empty() {
            store::await_visible(self.store.as_ref(), &created, VISIBILITY_TIMEOUT).await?;
            self.log.record(
                LogKind::Repair,
                format!(
                    "inserted {} pacing beat(s) under \"{}\" ({})",
                    created.len(),
                    parent.title,
                    mode.as_str()
                ),
            );
        }
        Ok(created.len())
    }
}
