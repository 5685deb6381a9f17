//! Resource lifecycle: inherit, evolve, propagate.
//!
//! Resources are the flat pool of characters, items, locations and factions
//! referenced from story nodes. When a story node is finalized it (a)
//! inherits the relevant subset of its parent's resources, (b) is analyzed
//! for brand-new entities and state changes to known ones, and (c) pushes
//! newly created resource ids up to its parent (and the root, when the
//! parent is a top-level container) so later siblings see them without
//! re-discovery.
//!
//! New resources are deduplicated by kind and case-insensitive title: a
//! duplicate becomes an association to the existing node, never a second
//! record. Updated resources keep a running change history in their
//! `content` field.

use crate::audit::{LogKind, RunLog};
use crate::client::RequestGate;
use crate::client::schema;
use crate::errors::RunError;
use crate::node::{self, Node, NodeId, NodeKind};
use crate::progress::{PhaseKey, ProgressTracker};
use crate::prompts;
use crate::store::{self, NodeStore, VISIBILITY_TIMEOUT};
use std::collections::BTreeSet;
use std::sync::Arc;

pub struct ResourceLifecycle {
    store: Arc<dyn NodeStore>,
    gate: RequestGate,
    log: Arc<RunLog>,
    tracker: ProgressTracker,
}

impl ResourceLifecycle {
    pub fn new(store: Arc<dyn NodeStore>, gate: RequestGate, log: Arc<RunLog>) -> Self {
        let tracker = ProgressTracker::new(store.clone());
        Self {
            store,
            gate,
            log,
            tracker,
        }
    }

    /// Run the full inherit/evolve/propagate cycle for one story node.
    pub async fn sync(&self, node_id: &str) -> Result<(), RunError> {
        if self.tracker.is_done(node_id, PhaseKey::ResourceSynced).await? {
            return Ok(());
        }
        self.tracker.begin(node_id, PhaseKey::ResourceSynced).await?;

        self.inherit(node_id).await?;
        let introduced = self.evolve(node_id).await?;
        self.propagate(node_id, &introduced).await?;

        self.tracker.complete(node_id, PhaseKey::ResourceSynced).await?;
        Ok(())
    }

    /// Select the subset of the parent's resources relevant to this node.
    async fn inherit(&self, node_id: &str) -> Result<(), RunError> {
        let snapshot = self.store.snapshot().await?;
        let Some(target) = node::find(&snapshot, node_id) else {
            return Ok(());
        };
        let Some(parent) = target.parent.as_deref().and_then(|p| node::find(&snapshot, p)) else {
            return Ok(());
        };

        let candidates: Vec<&Node> = parent
            .associations
            .iter()
            .filter_map(|id| node::find(&snapshot, id))
            .filter(|n| n.kind.is_resource())
            .collect();
        if candidates.is_empty() {
            return Ok(());
        }

        let request = prompts::resource_selection(target, &candidates);
        let text = self.gate.invoke(request).await?;
        let selection = schema::decode_resource_selection(&text);
        let chosen: BTreeSet<NodeId> = selection
            .selected_ids
            .into_iter()
            .filter(|id| candidates.iter().any(|c| &c.id == id))
            .collect();
        if chosen.is_empty() {
            return Ok(());
        }

        store::update_node(self.store.as_ref(), node_id, move |n| {
            n.associations.extend(chosen);
        })
        .await?;
        Ok(())
    }

    /// Extract new entities and state changes from the node's text. Returns
    /// the ids of resources introduced to this node (created or matched by
    /// dedup) that propagation should push upward.
    async fn evolve(&self, node_id: &str) -> Result<Vec<NodeId>, RunError> {
        let snapshot = self.store.snapshot().await?;
        let Some(target) = node::find(&snapshot, node_id) else {
            return Ok(Vec::new());
        };
        let associated: Vec<&Node> = target
            .associations
            .iter()
            .filter_map(|id| node::find(&snapshot, id))
            .collect();

        let request = prompts::resource_extraction(target, &associated);
        let text = self.gate.invoke(request).await?;
        let extraction = schema::decode_resource_extraction(&text);

        let mut introduced: Vec<NodeId> = Vec::new();
        let mut fresh: Vec<Node> = Vec::new();
        for raw in extraction.new_resources {
            let Some(kind) = NodeKind::resource_from_str(&raw.kind) else {
                self.log.record(
                    LogKind::Warning,
                    format!("unknown resource type \"{}\" for \"{}\"", raw.kind, raw.title),
                );
                continue;
            };
            let title = raw.title.trim().to_string();
            if title.is_empty() {
                continue;
            }
            // Dedup against the whole pool and this reply's own entries.
            let existing = snapshot
                .iter()
                .find(|n| n.kind == kind && n.title.eq_ignore_ascii_case(&title))
                .map(|n| n.id.clone())
                .or_else(|| {
                    fresh
                        .iter()
                        .find(|n| n.kind == kind && n.title.eq_ignore_ascii_case(&title))
                        .map(|n| n.id.clone())
                });
            match existing {
                Some(id) => introduced.push(id),
                None => {
                    let resource = Node::new(kind, title).with_summary(raw.summary.trim());
                    introduced.push(resource.id.clone());
                    fresh.push(resource);
                }
            }
        }

        let valid_updates: Vec<schema::ResourceUpdate> = extraction
            .updates
            .into_iter()
            .filter(|u| {
                node::find(&snapshot, &u.id).is_some_and(|n| n.kind.is_resource())
                    && !u.new_summary.trim().is_empty()
            })
            .collect();

        let mentioned: BTreeSet<NodeId> = extraction
            .mentioned_ids
            .into_iter()
            .filter(|id| node::find(&snapshot, id).is_some_and(|n| n.kind.is_resource()))
            .collect();

        if fresh.is_empty() && valid_updates.is_empty() && mentioned.is_empty() {
            return Ok(introduced);
        }

        let created_count = fresh.len();
        let updated_count = valid_updates.len();
        let created_ids: Vec<NodeId> = fresh.iter().map(|n| n.id.clone()).collect();
        self.store
            .mutate(Box::new(move |mut nodes| {
                for resource in fresh {
                    nodes.push(resource);
                }
                for update in valid_updates {
                    if let Some(n) = nodes.iter_mut().find(|n| n.id == update.id) {
                        n.summary = update.new_summary.trim().to_string();
                        let entry = update.change_log.trim();
                        if !entry.is_empty() {
                            if !n.content.is_empty() {
                                n.content.push('\n');
                            }
                            n.content.push_str(entry);
                        }
                    }
                }
                nodes
            }))
            .await?;
        if !created_ids.is_empty() {
            store::await_visible(self.store.as_ref(), &created_ids, VISIBILITY_TIMEOUT).await?;
        }

        if !mentioned.is_empty() {
            store::update_node(self.store.as_ref(), node_id, move |n| {
                n.associations.extend(mentioned);
            })
            .await?;
        }

        if created_count + updated_count > 0 {
            self.log.record(
                LogKind::Phase,
                format!(
                    "\"{}\": {} new resource(s), {} updated",
                    target.title, created_count, updated_count
                ),
            );
        }
        Ok(introduced)
    }

    /// Union newly introduced resource ids into this node, its parent, and
    /// the root when the parent is a top-level container, making them
    /// visible to all later siblings.
    async fn propagate(&self, node_id: &str, introduced: &[NodeId]) -> Result<(), RunError> {
        if introduced.is_empty() {
            return Ok(());
        }
        let snapshot = self.store.snapshot().await?;
        let Some(target) = node::find(&snapshot, node_id) else {
            return Ok(());
        };

        let mut recipients: Vec<NodeId> = vec![target.id.clone()];
        if let Some(parent) = target.parent.as_deref().and_then(|p| node::find(&snapshot, p)) {
            recipients.push(parent.id.clone());
            if parent.kind == NodeKind::Outline {
                if let Some(root) = node::root(&snapshot) {
                    recipients.push(root.id.clone());
                }
            }
        }

        let ids: BTreeSet<NodeId> = introduced.iter().cloned().collect();
        self.store
            .mutate(Box::new(move |mut nodes| {
                for n in nodes.iter_mut() {
                    if recipients.contains(&n.id) {
                        n.associations.extend(ids.iter().cloned());
                    }
                }
                nodes
            }))
            .await?;
        Ok(())
    }
}
