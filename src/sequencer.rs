//! Child-node generation.
//!
//! [`Sequencer::ensure_children`] grows a parent to a target child count
//! using one of three strategies, and is idempotent: a parent that already
//! has enough children of the requested kind is returned untouched, so a
//! resumed run spends no calls here.
//!
//! All three strategies insert through the same mutation path
//! ([`crate::node::attach`]), which keeps the `children` ordering and the
//! `prev_node` narrative chain consistent and clears the parent's collapsed
//! display flag.

use crate::audit::{LogKind, RunLog};
use crate::client::RequestGate;
use crate::client::schema::{self, DraftItem};
use crate::config::Strategy;
use crate::errors::RunError;
use crate::node::{self, Node, NodeId, NodeKind};
use crate::progress::PhaseKey;
use crate::prompts::{self, PositionContext};
use crate::progress::ProgressTracker;
use crate::store::{self, NodeStore, VISIBILITY_TIMEOUT};
use std::sync::Arc;

/// Largest batch requested in one call under the linear strategy.
const MAX_BATCH: usize = 5;

/// Consecutive empty generations tolerated before the run aborts.
const MAX_EMPTY_BATCHES: u32 = 2;

pub struct Sequencer {
    store: Arc<dyn NodeStore>,
    gate: RequestGate,
    log: Arc<RunLog>,
    tracker: ProgressTracker,
    strategy: Strategy,
}

impl Sequencer {
    pub fn new(
        store: Arc<dyn NodeStore>,
        gate: RequestGate,
        log: Arc<RunLog>,
        strategy: Strategy,
    ) -> Self {
        let tracker = ProgressTracker::new(store.clone());
        Self {
            store,
            gate,
            log,
            tracker,
            strategy,
        }
    }

    /// Ensure `parent` has at least `target` children of `kind`, creating
    /// the shortfall. Returns the ids of the parent's children of that kind
    /// in generation order.
    pub async fn ensure_children(
        &self,
        parent_id: &str,
        kind: NodeKind,
        target: usize,
        position: PositionContext,
    ) -> Result<Vec<NodeId>, RunError> {
        let snapshot = self.store.snapshot().await?;
        let parent = node::find(&snapshot, parent_id)
            .ok_or_else(|| crate::errors::StoreError::NodeNotFound {
                id: parent_id.to_string(),
            })?;
        let existing = node::children_of_kind(&snapshot, parent, kind);

        // A raised target on a later run re-expands a parent whose flag is
        // already Done; the terminal flag state is simply left alone then.
        let already_done = self.tracker.is_done(parent_id, PhaseKey::StructureExpanded).await?;

        if existing.len() >= target {
            if !already_done {
                self.tracker.begin(parent_id, PhaseKey::StructureExpanded).await?;
                self.tracker.complete(parent_id, PhaseKey::StructureExpanded).await?;
            }
            return Ok(existing.iter().map(|n| n.id.clone()).collect());
        }

        if !already_done {
            self.tracker.begin(parent_id, PhaseKey::StructureExpanded).await?;
        }

        // One-pass only makes sense at the plot level; spanning needs room
        // for at least one infill slot per gap. Everything else degrades to
        // the linear strategy.
        let effective = match self.strategy {
            Strategy::OnePass if kind == NodeKind::Plot => Strategy::OnePass,
            Strategy::Spanning if target >= 6 => Strategy::Spanning,
            _ => Strategy::LinearBatch,
        };

        match effective {
            Strategy::LinearBatch => {
                self.linear_fill(parent_id, kind, target, position).await?
            }
            Strategy::OnePass => self.one_pass(parent_id, kind, target, position).await?,
            Strategy::Spanning => self.spanning(parent_id, kind, target, position).await?,
        }

        if !already_done {
            self.tracker.complete(parent_id, PhaseKey::StructureExpanded).await?;
        }

        let snapshot = self.store.snapshot().await?;
        let parent = node::find(&snapshot, parent_id)
            .ok_or_else(|| crate::errors::StoreError::NodeNotFound {
                id: parent_id.to_string(),
            })?;
        let ids: Vec<NodeId> = node::children_of_kind(&snapshot, parent, kind)
            .iter()
            .map(|n| n.id.clone())
            .collect();
        self.log.record(
            LogKind::Phase,
            format!("\"{}\" now holds {} {}(s)", parent.title, ids.len(), kind.label()),
        );
        Ok(ids)
    }

    /// Sequential batches of up to five, each anchored to the last sibling.
    async fn linear_fill(
        &self,
        parent_id: &str,
        kind: NodeKind,
        target: usize,
        position: PositionContext,
    ) -> Result<(), RunError> {
        let mut empty_streak: u32 = 0;
        loop {
            let snapshot = self.store.snapshot().await?;
            let parent = node::find(&snapshot, parent_id)
                .ok_or_else(|| crate::errors::StoreError::NodeNotFound {
                    id: parent_id.to_string(),
                })?;
            let root_summary = root_summary(&snapshot);
            let existing = node::children_of_kind(&snapshot, parent, kind);
            if existing.len() >= target {
                return Ok(());
            }

            let need = (target - existing.len()).min(MAX_BATCH);
            let anchor = existing.last().copied();
            let request =
                prompts::expand_batch(parent, kind, need, anchor, &root_summary, position);
            let text = self.gate.invoke(request).await?;
            let mut items = schema::decode_draft_items(&text);
            items.truncate(need);

            if items.is_empty() {
                empty_streak += 1;
                tracing::warn!(parent = %parent_id, streak = empty_streak, "expansion yielded no items");
                if empty_streak >= MAX_EMPTY_BATCHES {
                    return Err(RunError::EmptyGeneration {
                        parent: parent.title.clone(),
                    });
                }
                continue;
            }
            empty_streak = 0;
            self.insert_items(parent_id, kind, items, None).await?;
        }
    }

    /// Everything in one call, with a linear fallback when the call yields
    /// nothing and a linear top-up when it yields too few.
    async fn one_pass(
        &self,
        parent_id: &str,
        kind: NodeKind,
        target: usize,
        position: PositionContext,
    ) -> Result<(), RunError> {
        let snapshot = self.store.snapshot().await?;
        let parent = node::find(&snapshot, parent_id)
            .ok_or_else(|| crate::errors::StoreError::NodeNotFound {
                id: parent_id.to_string(),
            })?;
        let root_summary = root_summary(&snapshot);

        let request = prompts::expand_one_pass(parent, kind, target, &root_summary, position);
        let text = self.gate.invoke(request).await?;
        let mut items = schema::decode_draft_items(&text);
        items.truncate(target);

        if items.is_empty() {
            self.log.record(
                LogKind::Warning,
                "one-pass expansion yielded nothing, falling back to linear batches",
            );
        } else {
            self.insert_items(parent_id, kind, items, None).await?;
        }
        // Covers both the empty fallback and a short reply.
        self.linear_fill(parent_id, kind, target, position).await
    }

    /// Keyframes spanning the parent's arc, then even infill per gap, then a
    /// linear top-up so the final count is exact.
    async fn spanning(
        &self,
        parent_id: &str,
        kind: NodeKind,
        target: usize,
        position: PositionContext,
    ) -> Result<(), RunError> {
        let snapshot = self.store.snapshot().await?;
        let parent = node::find(&snapshot, parent_id)
            .ok_or_else(|| crate::errors::StoreError::NodeNotFound {
                id: parent_id.to_string(),
            })?;
        let root_summary = root_summary(&snapshot);

        let keyframe_target = (target / 4).clamp(3, 5).min(target);
        let request =
            prompts::span_keyframes(parent, kind, keyframe_target, &root_summary, position);
        let text = self.gate.invoke(request).await?;
        let mut items = schema::decode_draft_items(&text);
        items.truncate(keyframe_target);

        if items.is_empty() {
            self.log.record(
                LogKind::Warning,
                "keyframe generation yielded nothing, falling back to linear batches",
            );
            return self.linear_fill(parent_id, kind, target, position).await;
        }

        let keyframe_ids = self.insert_items(parent_id, kind, items, None).await?;

        if keyframe_ids.len() >= 2 {
            let gaps = keyframe_ids.len() - 1;
            let infill_total = target.saturating_sub(keyframe_ids.len());
            let base = infill_total / gaps;
            let remainder = infill_total % gaps;

            for gap in 0..gaps {
                // Remainder lands on the earliest gaps.
                let want = base + usize::from(gap < remainder);
                if want == 0 {
                    continue;
                }
                let snapshot = self.store.snapshot().await?;
                let Some(left) = node::find(&snapshot, &keyframe_ids[gap]) else {
                    continue;
                };
                let Some(right) = node::find(&snapshot, &keyframe_ids[gap + 1]) else {
                    continue;
                };
                let Some(parent) = node::find(&snapshot, parent_id) else {
                    continue;
                };
                let request = prompts::span_infill(
                    parent,
                    kind,
                    want,
                    left,
                    right,
                    &root_summary,
                    position,
                );
                let text = self.gate.invoke(request).await?;
                let mut items = schema::decode_draft_items(&text);
                items.truncate(want);
                if items.is_empty() {
                    // The final top-up recovers the shortfall.
                    continue;
                }
                self.insert_items(parent_id, kind, items, Some(keyframe_ids[gap].clone()))
                    .await?;
            }
        }

        self.linear_fill(parent_id, kind, target, position).await
    }

    /// Shared insertion path: create nodes, splice them in order after the
    /// anchor (or append), and wait for them to become visible.
    async fn insert_items(
        &self,
        parent_id: &str,
        kind: NodeKind,
        items: Vec<DraftItem>,
        after: Option<NodeId>,
    ) -> Result<Vec<NodeId>, RunError> {
        let new_nodes: Vec<Node> = items
            .into_iter()
            .map(|item| Node::new(kind, item.title.trim()).with_summary(item.summary.trim()))
            .collect();
        let created: Vec<NodeId> = new_nodes.iter().map(|n| n.id.clone()).collect();

        let parent = parent_id.to_string();
        self.store
            .mutate(Box::new(move |mut nodes| {
                let mut anchor = after;
                for child in new_nodes {
                    let child_id = child.id.clone();
                    node::attach(&mut nodes, &parent, anchor.as_deref(), child);
                    anchor = Some(child_id);
                }
                nodes
            }))
            .await?;

        store::await_visible(self.store.as_ref(), &created, VISIBILITY_TIMEOUT).await?;
        Ok(created)
    }
}

fn root_summary(nodes: &[Node]) -> String {
    node::root(nodes).map(|r| r.summary.clone()).unwrap_or_default()
}
