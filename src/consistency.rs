//! Cross-sibling consistency auditing.
//!
//! Siblings under one parent are reviewed in chunks of up to ten, each chunk
//! seeing the last two nodes of the previous chunk as read-only context for
//! continuity. A chunk is attempted at most once per run; the audit is
//! bounded, not looped to convergence. Flagged nodes are repaired in place
//! (rewrite, optional rename) or deleted, with the narrative chain re-linked
//! around the removed node. Insertion fixes are not produced here; adding
//! beats between siblings is the pacing flow's job.
//!
//! After every chunk is processed, one whole-sequence pass looks for gaps
//! invisible at chunk granularity and applies its suggestions the same way.

use crate::audit::{LogKind, RunLog};
use crate::client::RequestGate;
use crate::client::schema::{self, SequenceFix};
use crate::config::RunConfig;
use crate::errors::RunError;
use crate::node::{self, NodeId, NodeKind};
use crate::orchestrator::StopSignal;
use crate::prompts;
use crate::store::{self, NodeStore};
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

const CHUNK_SIZE: usize = 10;
const CARRYOVER: usize = 2;

pub struct ConsistencyAuditor {
    store: Arc<dyn NodeStore>,
    gate: RequestGate,
    log: Arc<RunLog>,
    config: RunConfig,
    /// Chunks already attempted this run, keyed by parent and leading node.
    attempted: Mutex<HashSet<String>>,
}

impl ConsistencyAuditor {
    pub fn new(
        store: Arc<dyn NodeStore>,
        gate: RequestGate,
        log: Arc<RunLog>,
        config: RunConfig,
    ) -> Self {
        Self {
            store,
            gate,
            log,
            config,
            attempted: Mutex::new(HashSet::new()),
        }
    }

    /// Audit the ordered children of `kind` under one parent: chunked
    /// conflict checks, then the global sequence check.
    pub async fn audit_siblings(
        &self,
        parent_id: &str,
        kind: NodeKind,
        stop: &StopSignal,
    ) -> Result<(), RunError> {
        let snapshot = self.store.snapshot().await?;
        let Some(parent) = node::find(&snapshot, parent_id) else {
            return Ok(());
        };
        let sibling_ids: Vec<NodeId> = node::children_of_kind(&snapshot, parent, kind)
            .iter()
            .map(|n| n.id.clone())
            .collect();
        if sibling_ids.len() < 2 {
            return Ok(());
        }

        let chunks: Vec<Vec<NodeId>> = sibling_ids
            .chunks(CHUNK_SIZE)
            .map(|c| c.to_vec())
            .collect();

        for (index, chunk) in chunks.iter().enumerate() {
            if stop.is_stopped() {
                return Ok(());
            }
            let Some(first) = chunk.first() else { continue };
            let key = format!("{}:{}", parent_id, first);
            if !self.attempted.lock().unwrap_or_else(|e| e.into_inner()).insert(key) {
                continue;
            }

            let carryover: Vec<NodeId> = if index == 0 {
                Vec::new()
            } else {
                let prev = &chunks[index - 1];
                prev.iter().rev().take(CARRYOVER).rev().cloned().collect()
            };
            self.review_chunk(chunk, &carryover).await?;
        }

        if stop.is_stopped() {
            return Ok(());
        }
        self.review_sequence(parent_id, kind).await
    }

    async fn review_chunk(
        &self,
        chunk: &[NodeId],
        carryover: &[NodeId],
    ) -> Result<(), RunError> {
        let snapshot = self.store.snapshot().await?;
        let chunk_nodes: Vec<&node::Node> =
            chunk.iter().filter_map(|id| node::find(&snapshot, id)).collect();
        if chunk_nodes.is_empty() {
            return Ok(());
        }
        let context_nodes: Vec<&node::Node> = carryover
            .iter()
            .filter_map(|id| node::find(&snapshot, id))
            .collect();

        let request = prompts::batch_review(&chunk_nodes, &context_nodes);
        let text = self.gate.invoke(request).await?;
        let review = schema::decode_batch_review(&text);
        if !review.has_conflicts {
            return Ok(());
        }

        for fix in review.fixes {
            // Only nodes actually under review may be touched.
            if !chunk.iter().any(|id| *id == fix.id) {
                continue;
            }
            if fix.delete {
                self.delete_node(&fix.id).await?;
            } else {
                self.apply_rewrite_fix(&fix.id, &fix.instruction, fix.new_title.as_deref())
                    .await?;
            }
        }
        Ok(())
    }

    async fn review_sequence(&self, parent_id: &str, kind: NodeKind) -> Result<(), RunError> {
        let snapshot = self.store.snapshot().await?;
        let Some(parent) = node::find(&snapshot, parent_id) else {
            return Ok(());
        };
        let siblings = node::children_of_kind(&snapshot, parent, kind);
        if siblings.len() < 2 {
            return Ok(());
        }
        let sibling_ids: HashSet<&str> = siblings.iter().map(|n| n.id.as_str()).collect();

        let request = prompts::sequence_review(&siblings);
        let text = self.gate.invoke(request).await?;
        let review = schema::decode_sequence_review(&text);
        if !review.has_gap {
            return Ok(());
        }
        self.log.record(
            LogKind::Warning,
            format!("sequence gap under \"{}\": {}", parent.title, review.gap_analysis),
        );

        let fixes: Vec<SequenceFix> = review
            .fix_suggestions
            .into_iter()
            .filter(|f| sibling_ids.contains(f.target_id.as_str()))
            .collect();
        for fix in fixes {
            self.apply_rewrite_fix(&fix.target_id, &fix.instruction, fix.new_title.as_deref())
                .await?;
        }
        Ok(())
    }

    async fn apply_rewrite_fix(
        &self,
        node_id: &str,
        instruction: &str,
        new_title: Option<&str>,
    ) -> Result<(), RunError> {
        let snapshot = self.store.snapshot().await?;
        let Some(target) = node::find(&snapshot, node_id).cloned() else {
            return Ok(());
        };

        let rewritten = if instruction.trim().is_empty() {
            None
        } else {
            let floor = self.config.length_floor(target.kind);
            let request = prompts::rewrite_with_instruction(&target, instruction, floor);
            let text = self.gate.invoke(request).await?;
            let text = text.trim().to_string();
            (!text.is_empty()).then_some(text)
        };
        let rename = new_title.map(|t| t.trim().to_string()).filter(|t| !t.is_empty());
        if rewritten.is_none() && rename.is_none() {
            return Ok(());
        }

        let to_content = target.kind == NodeKind::Chapter && !target.content.is_empty();
        store::update_node(self.store.as_ref(), node_id, move |n| {
            if let Some(text) = rewritten {
                if to_content {
                    n.content = text;
                } else {
                    n.summary = text;
                }
            }
            if let Some(title) = rename {
                n.title = title;
            }
        })
        .await?;
        self.log.record(
            LogKind::Repair,
            format!("consistency rewrite applied to \"{}\"", target.title),
        );
        Ok(())
    }

    async fn delete_node(&self, node_id: &str) -> Result<(), RunError> {
        let snapshot = self.store.snapshot().await?;
        let Some(target) = node::find(&snapshot, node_id) else {
            return Ok(());
        };
        let title = target.title.clone();

        let id = node_id.to_string();
        self.store
            .mutate(Box::new(move |mut nodes| {
                node::detach(&mut nodes, &id);
                nodes
            }))
            .await?;
        self.log.record(
            LogKind::Repair,
            format!("deleted conflicting node \"{}\"", title),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::gate::GateConfig;
    use crate::client::{ClientError, GenerationClient, GenerationRequest};
    use crate::node::Node;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct ScriptClient {
        responses: StdMutex<Vec<String>>,
        seen: StdMutex<Vec<GenerationRequest>>,
    }

    impl ScriptClient {
        fn new(responses: Vec<String>) -> Self {
            Self {
                responses: StdMutex::new(responses),
                seen: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl GenerationClient for ScriptClient {
        async fn generate(&self, request: GenerationRequest) -> Result<String, ClientError> {
            self.seen.lock().unwrap().push(request);
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                Ok(r#"{"hasConflicts":false}"#.to_string())
            } else {
                Ok(responses.remove(0))
            }
        }
    }

    fn plot(title: &str) -> Node {
        Node::new(NodeKind::Plot, title)
            .with_summary(format!("{} happens, at length, with consequences.", title))
    }

    /// Build root -> outline -> N plots and return (nodes, outline_id, plot_ids).
    fn plot_tree(plot_count: usize) -> (Vec<Node>, String, Vec<String>) {
        let root = Node::root("Book", "premise");
        let mut outline = Node::new(NodeKind::Outline, "V1").with_summary("arc");
        outline.parent = Some(root.id.clone());
        let mut root = root;
        root.children.push(outline.id.clone());
        let outline_id = outline.id.clone();
        let mut nodes = vec![root, outline];
        let mut plot_ids = Vec::new();
        for i in 0..plot_count {
            let p = plot(&format!("Plot {}", i + 1));
            plot_ids.push(p.id.clone());
            node::attach(&mut nodes, &outline_id, None, p);
        }
        (nodes, outline_id, plot_ids)
    }

    fn auditor_over(
        nodes: Vec<Node>,
        responses: Vec<String>,
    ) -> (ConsistencyAuditor, Arc<MemoryStore>, Arc<ScriptClient>) {
        let store = Arc::new(MemoryStore::with_nodes(nodes));
        let client = Arc::new(ScriptClient::new(responses));
        let log = Arc::new(RunLog::in_memory());
        let gate = RequestGate::start(
            client.clone(),
            GateConfig::default().with_spacing(Duration::from_millis(1)),
            log.clone(),
        );
        let auditor = ConsistencyAuditor::new(store.clone(), gate, log, RunConfig::default());
        (auditor, store, client)
    }

    #[tokio::test]
    async fn delete_fix_relinks_chain_and_strips_parent() {
        let (nodes, outline_id, plot_ids) = plot_tree(3);
        let responses = vec![
            format!(
                r#"{{"hasConflicts":true,"fixes":[{{"id":"{}","delete":true}}]}}"#,
                plot_ids[1]
            ),
            r#"{"hasGap":false}"#.to_string(),
        ];
        let (auditor, store, _client) = auditor_over(nodes, responses);

        auditor
            .audit_siblings(&outline_id, NodeKind::Plot, &StopSignal::new())
            .await
            .unwrap();

        let snapshot = store.snapshot().await.unwrap();
        assert!(node::find(&snapshot, &plot_ids[1]).is_none());
        let outline = node::find(&snapshot, &outline_id).unwrap();
        assert_eq!(outline.children, vec![plot_ids[0].clone(), plot_ids[2].clone()]);
        assert_eq!(
            node::find(&snapshot, &plot_ids[2]).unwrap().prev_node.as_deref(),
            Some(plot_ids[0].as_str())
        );
    }

    #[tokio::test]
    async fn rewrite_fix_replaces_summary_and_renames() {
        let (nodes, outline_id, plot_ids) = plot_tree(2);
        let responses = vec![
            format!(
                r#"{{"hasConflicts":true,"fixes":[{{"id":"{}","instruction":"merge the duplicate ambush","newTitle":"The Ambush"}}]}}"#,
                plot_ids[0]
            ),
            "the two ambushes are now a single engagement".to_string(),
            r#"{"hasGap":false}"#.to_string(),
        ];
        let (auditor, store, _client) = auditor_over(nodes, responses);

        auditor
            .audit_siblings(&outline_id, NodeKind::Plot, &StopSignal::new())
            .await
            .unwrap();

        let snapshot = store.snapshot().await.unwrap();
        let fixed = node::find(&snapshot, &plot_ids[0]).unwrap();
        assert_eq!(fixed.title, "The Ambush");
        assert!(fixed.summary.contains("single engagement"));
    }

    #[tokio::test]
    async fn chunks_are_attempted_once_per_run() {
        let (nodes, outline_id, _plot_ids) = plot_tree(3);
        let (auditor, _store, client) = auditor_over(nodes, vec![]);
        let stop = StopSignal::new();

        auditor.audit_siblings(&outline_id, NodeKind::Plot, &stop).await.unwrap();
        let first_calls = client.seen.lock().unwrap().len();
        assert_eq!(first_calls, 2, "one chunk review plus one sequence review");

        auditor.audit_siblings(&outline_id, NodeKind::Plot, &stop).await.unwrap();
        let second_calls = client.seen.lock().unwrap().len();
        // The chunk is not re-reviewed; only the sequence pass repeats.
        assert_eq!(second_calls, first_calls + 1);
    }

    #[tokio::test]
    async fn carryover_context_reaches_the_second_chunk() {
        let (nodes, outline_id, _plot_ids) = plot_tree(12);
        let (auditor, _store, client) = auditor_over(nodes, vec![]);

        auditor
            .audit_siblings(&outline_id, NodeKind::Plot, &StopSignal::new())
            .await
            .unwrap();

        let seen = client.seen.lock().unwrap();
        // chunk 1 (10 nodes), chunk 2 (2 nodes + carryover), sequence pass
        assert_eq!(seen.len(), 3);
        let second = &seen[1];
        assert!(second.user.contains("read-only"));
        assert!(second.user.contains("Plot 9"));
        assert!(second.user.contains("Plot 10"));
        assert!(second.user.contains("Plot 11"));
    }

    #[tokio::test]
    async fn sequence_gap_fixes_are_applied() {
        let (nodes, outline_id, plot_ids) = plot_tree(2);
        let responses = vec![
            r#"{"hasConflicts":false}"#.to_string(),
            format!(
                r#"{{"hasGap":true,"gapAnalysis":"a season passes unremarked","fixSuggestions":[{{"targetId":"{}","instruction":"bridge the winter"}}]}}"#,
                plot_ids[1]
            ),
            "the winter passes on the road, and the army arrives lean".to_string(),
        ];
        let (auditor, store, _client) = auditor_over(nodes, responses);

        auditor
            .audit_siblings(&outline_id, NodeKind::Plot, &StopSignal::new())
            .await
            .unwrap();

        let snapshot = store.snapshot().await.unwrap();
        assert!(node::find(&snapshot, &plot_ids[1]).unwrap().summary.contains("winter"));
    }

    #[tokio::test]
    async fn fixes_for_foreign_ids_are_ignored() {
        let (nodes, outline_id, plot_ids) = plot_tree(2);
        let responses = vec![
            r#"{"hasConflicts":true,"fixes":[{"id":"not-a-sibling","delete":true}]}"#.to_string(),
            r#"{"hasGap":false}"#.to_string(),
        ];
        let (auditor, store, _client) = auditor_over(nodes, responses);

        auditor
            .audit_siblings(&outline_id, NodeKind::Plot, &StopSignal::new())
            .await
            .unwrap();

        let snapshot = store.snapshot().await.unwrap();
        assert!(node::find(&snapshot, &plot_ids[0]).is_some());
        assert!(node::find(&snapshot, &plot_ids[1]).is_some());
        assert_eq!(snapshot.len(), 4);
    }

    #[tokio::test]
    async fn single_sibling_needs_no_audit() {
        let (nodes, outline_id, _plot_ids) = plot_tree(1);
        let (auditor, _store, client) = auditor_over(nodes, vec![]);

        auditor
            .audit_siblings(&outline_id, NodeKind::Plot, &StopSignal::new())
            .await
            .unwrap();
        assert!(client.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stop_signal_halts_between_chunks() {
        let (nodes, outline_id, _plot_ids) = plot_tree(3);
        let (auditor, _store, client) = auditor_over(nodes, vec![]);
        let stop = StopSignal::new();
        stop.stop();

        auditor.audit_siblings(&outline_id, NodeKind::Plot, &stop).await.unwrap();
        assert!(client.seen.lock().unwrap().is_empty());
    }
}
