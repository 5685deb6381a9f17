//! Per-node quality checks.
//!
//! Four independent checks, each with a bounded repair budget and each
//! skipped when its progress flag is already set:
//!
//! - expansion: effective text under the length floor gets one rewrite,
//!   whose result is accepted as-is
//! - span: containers whose scope can't support their planned split get one
//!   additive rewrite
//! - audit: the full-context rubric check; a `PASS` sentinel short-circuits,
//!   anything else is applied as a single rewrite instruction
//! - ending: prose leaves whose closing stretch lands badly get up to two
//!   tail-only rewrites, spliced onto the untouched preceding text
//!
//! Budgets exhausted means the content is accepted as-is; the pipeline
//! favors forward progress over perfection.

use crate::audit::{LogKind, RunLog};
use crate::client::RequestGate;
use crate::client::schema;
use crate::config::RunConfig;
use crate::errors::RunError;
use crate::node::{self, Node, NodeKind};
use crate::progress::{PhaseKey, ProgressTracker};
use crate::prompts;
use crate::store::{self, NodeStore};
use std::sync::Arc;

/// Characters of a chapter considered "the ending" for validation.
const ENDING_SLICE_CHARS: usize = 800;

/// Tail rewrites attempted before the ending is accepted as-is.
const MAX_ENDING_REPAIRS: u32 = 2;

pub struct QualityGate {
    store: Arc<dyn NodeStore>,
    gate: RequestGate,
    log: Arc<RunLog>,
    tracker: ProgressTracker,
    config: RunConfig,
}

impl QualityGate {
    pub fn new(
        store: Arc<dyn NodeStore>,
        gate: RequestGate,
        log: Arc<RunLog>,
        config: RunConfig,
    ) -> Self {
        let tracker = ProgressTracker::new(store.clone());
        Self {
            store,
            gate,
            log,
            tracker,
            config,
        }
    }

    /// Expansion and span checks, gated together: both validate that the
    /// node's material can structurally carry what will be built on it.
    /// `planned_children` is how many children the node will be split into
    /// (0 for leaves).
    pub async fn run_structural(
        &self,
        node_id: &str,
        planned_children: usize,
    ) -> Result<(), RunError> {
        if self.tracker.is_done(node_id, PhaseKey::StructureValidated).await? {
            return Ok(());
        }
        self.tracker.begin(node_id, PhaseKey::StructureValidated).await?;

        self.expansion_check(node_id).await?;
        self.span_check(node_id, planned_children).await?;

        self.tracker.complete(node_id, PhaseKey::StructureValidated).await?;
        Ok(())
    }

    async fn expansion_check(&self, node_id: &str) -> Result<(), RunError> {
        let Some(target) = self.load(node_id).await? else {
            return Ok(());
        };
        let floor = self.config.length_floor(target.kind);
        if target.effective_text().chars().count() >= floor {
            return Ok(());
        }

        let request = prompts::expansion_rewrite(&target, floor);
        let rewritten = self.gate.invoke(request).await?;
        // One attempt only; whatever length comes back is accepted.
        self.apply_text(&target, rewritten).await?;
        self.log.record(
            LogKind::Repair,
            format!("expanded \"{}\" toward the {}-char floor", target.title, floor),
        );
        Ok(())
    }

    async fn span_check(&self, node_id: &str, planned_children: usize) -> Result<(), RunError> {
        let Some(target) = self.load(node_id).await? else {
            return Ok(());
        };
        if !target.kind.is_container() || planned_children < 2 {
            return Ok(());
        }

        let request = prompts::span_check(&target, planned_children);
        let text = self.gate.invoke(request).await?;
        let verdict = schema::decode_span_verdict(&text);
        if verdict.sufficient || verdict.fix_instruction.trim().is_empty() {
            return Ok(());
        }

        let request = prompts::span_rewrite(&target, &verdict.fix_instruction);
        let rewritten = self.gate.invoke(request).await?;
        self.apply_text(&target, rewritten).await?;
        self.log.record(
            LogKind::Repair,
            format!(
                "widened \"{}\" to support a {}-way split",
                target.title, planned_children
            ),
        );
        Ok(())
    }

    /// The content-quality audit. `golden_opening` applies the first-chapter
    /// opening rules on top of the standard rubric.
    pub async fn run_audit(&self, node_id: &str, golden_opening: bool) -> Result<(), RunError> {
        if self.tracker.is_done(node_id, PhaseKey::QualityOptimized).await? {
            return Ok(());
        }
        self.tracker.begin(node_id, PhaseKey::QualityOptimized).await?;

        let snapshot = self.store.snapshot().await?;
        if let Some(target) = node::find(&snapshot, node_id) {
            let parent = target.parent.as_deref().and_then(|p| node::find(&snapshot, p));
            let prev = node::prev_sibling(&snapshot, target);
            let root_summary = node::root(&snapshot).map(|r| r.summary.clone()).unwrap_or_default();
            let floor = self.config.length_floor(target.kind);

            let request = prompts::quality_audit(
                target,
                parent,
                prev,
                &root_summary,
                floor,
                golden_opening,
            );
            let text = self.gate.invoke(request).await?;
            match schema::decode_audit(&text) {
                schema::AuditOutcome::Pass => {}
                schema::AuditOutcome::Rewrite(instruction) => {
                    let request = prompts::rewrite_with_instruction(target, &instruction, floor);
                    let rewritten = self.gate.invoke(request).await?;
                    self.apply_text(target, rewritten).await?;
                    self.log.record(
                        LogKind::Repair,
                        format!("audit rewrite applied to \"{}\"", target.title),
                    );
                }
            }
        }

        self.tracker.complete(node_id, PhaseKey::QualityOptimized).await?;
        Ok(())
    }

    /// Ending validation for drafted chapters. Only the trailing slice is
    /// ever rewritten; the preceding text is never touched.
    pub async fn run_ending(&self, node_id: &str) -> Result<(), RunError> {
        if self.tracker.is_done(node_id, PhaseKey::EndingValidated).await? {
            return Ok(());
        }
        self.tracker.begin(node_id, PhaseKey::EndingValidated).await?;

        for _attempt in 0..MAX_ENDING_REPAIRS {
            let Some(target) = self.load(node_id).await? else {
                break;
            };
            if target.kind != NodeKind::Chapter || target.content.is_empty() {
                break;
            }

            let tail = prompts::tail_chars(&target.content, ENDING_SLICE_CHARS);
            let text = self.gate.invoke(prompts::ending_check(&tail)).await?;
            let verdict = schema::decode_ending_verdict(&text);
            if verdict.is_valid {
                break;
            }

            let request = prompts::ending_rewrite(&tail, &verdict.fix_instruction);
            let new_tail = self.gate.invoke(request).await?;
            let total = target.content.chars().count();
            let prefix: String = target
                .content
                .chars()
                .take(total.saturating_sub(tail.chars().count()))
                .collect();
            let spliced = format!("{}{}", prefix, new_tail);
            store::update_node(self.store.as_ref(), node_id, move |n| {
                n.content = spliced;
            })
            .await?;
            self.log.record(
                LogKind::Repair,
                format!("rewrote the closing stretch of \"{}\"", target.title),
            );
        }

        self.tracker.complete(node_id, PhaseKey::EndingValidated).await?;
        Ok(())
    }

    async fn load(&self, node_id: &str) -> Result<Option<Node>, RunError> {
        let snapshot = self.store.snapshot().await?;
        Ok(node::find(&snapshot, node_id).cloned())
    }

    /// Route rewritten text to the field the check read from: drafted prose
    /// for chapters, the summary otherwise.
    async fn apply_text(&self, target: &Node, text: String) -> Result<(), RunError> {
        let to_content = target.kind == NodeKind::Chapter && !target.content.is_empty();
        let text = text.trim().to_string();
        if text.is_empty() {
            // An empty rewrite would destroy material; keep the draft.
            self.log.record(
                LogKind::Warning,
                format!("empty rewrite for \"{}\" discarded", target.title),
            );
            return Ok(());
        }
        store::update_node(self.store.as_ref(), &target.id, move |n| {
            if to_content {
                n.content = text;
            } else {
                n.summary = text;
            }
        })
        .await?;
        Ok(())
    }
}
