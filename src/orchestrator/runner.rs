use crate::audit::{LogKind, RunLog};
use crate::client::schema;
use crate::client::RequestGate;
use crate::config::RunConfig;
use crate::consistency::ConsistencyAuditor;
use crate::errors::RunError;
use crate::node::{self, NodeId, NodeKind};
use crate::orchestrator::state::{RunReport, RunState, RunStatus, StopSignal, StructureLevel};
use crate::pacing::PacingPlanner;
use crate::progress::{PhaseKey, ProgressTracker};
use crate::prompts::{self, PositionContext};
use crate::quality::QualityGate;
use crate::resources::ResourceLifecycle;
use crate::sequencer::Sequencer;
use crate::store::{self, NodeStore};
use crate::ui::RunReporter;
use chrono::Utc;
use std::sync::Arc;

/// Bounds applied to model-advised child counts.
const ADVICE_MIN: usize = 1;
const ADVICE_MAX: usize = 20;

pub struct Orchestrator {
    store: Arc<dyn NodeStore>,
    log: Arc<RunLog>,
    config: RunConfig,
    stop: StopSignal,
    sequencer: Sequencer,
    quality: QualityGate,
    consistency: ConsistencyAuditor,
    pacing: PacingPlanner,
    resources: ResourceLifecycle,
    tracker: ProgressTracker,
    gate: RequestGate,
    reporter: Option<Arc<RunReporter>>,
}

impl Orchestrator {
    pub fn new(
        store: Arc<dyn NodeStore>,
        gate: RequestGate,
        log: Arc<RunLog>,
        config: RunConfig,
    ) -> Self {
        let sequencer = Sequencer::new(store.clone(), gate.clone(), log.clone(), config.strategy);
        let quality = QualityGate::new(store.clone(), gate.clone(), log.clone(), config.clone());
        let consistency =
            ConsistencyAuditor::new(store.clone(), gate.clone(), log.clone(), config.clone());
        let pacing = PacingPlanner::new(store.clone(), gate.clone(), log.clone());
        let resources = ResourceLifecycle::new(store.clone(), gate.clone(), log.clone());
        let tracker = ProgressTracker::new(store.clone());
        Self {
            store,
            log,
            config,
            stop: StopSignal::new(),
            sequencer,
            quality,
            consistency,
            pacing,
            resources,
            tracker,
            gate,
            reporter: None,
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<RunReporter>) -> Self {
        self.reporter = Some(reporter);
        self
    }

    /// Handle for cooperative cancellation; wire it to Ctrl-C or an
    /// operator control.
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Drive the run to a terminal state. Never panics on pipeline errors:
    /// failures are logged and reported in the returned [`RunReport`], with
    /// all committed node mutations and flags left valid for resume.
    pub async fn run(&self) -> RunReport {
        let started_at = Utc::now();
        let nodes_before = self.node_count().await;
        self.log.record(
            LogKind::Phase,
            format!("run started (target depth: {})", self.config.target_depth),
        );
        if let Some(hint) = &self.config.resume_hint {
            self.log.record(LogKind::Phase, format!("resume hint: {}", hint));
        }

        let (status, message) = match self.drive().await {
            Ok(status) => {
                self.log.record(LogKind::Phase, format!("run {}", status));
                (status, None)
            }
            Err(err) => {
                tracing::error!(error = %err, "run aborted");
                self.log.record(LogKind::Failure, format!("run aborted: {}", err));
                (RunStatus::Error, Some(err.to_string()))
            }
        };

        if let Some(reporter) = &self.reporter {
            reporter.finish(status);
        }
        RunReport {
            status,
            started_at,
            finished_at: Utc::now(),
            requests: self.log.request_count(),
            nodes_before,
            nodes_after: self.node_count().await,
            message,
        }
    }

    async fn drive(&self) -> Result<RunStatus, RunError> {
        let root_id = self.root_id().await?;
        if self.stop.is_stopped() {
            return Ok(RunStatus::Stopped);
        }

        self.enter(RunState::RootAudit);
        let outline_count = self.configured_count(StructureLevel::Outline);
        self.quality.run_structural(&root_id, outline_count).await?;
        self.quality.run_audit(&root_id, false).await?;
        if self.stop.is_stopped() {
            return Ok(RunStatus::Stopped);
        }

        for level in StructureLevel::ALL {
            self.enter(RunState::Structure(level));
            if let Some(early) = self.structure_level(level).await? {
                return Ok(early);
            }
            if level.is_terminal_for(self.config.target_depth) {
                self.enter(RunState::Done);
                return Ok(RunStatus::Completed);
            }
        }

        self.enter(RunState::Write);
        if let Some(early) = self.write_prose().await? {
            return Ok(early);
        }

        self.enter(RunState::Done);
        Ok(RunStatus::Completed)
    }

    /// Phase 1, one level: ensure every parent's children exist, validate
    /// each child, audit each sibling group, sync resources. Chapter-level
    /// children are placeholders; their quality checks run against prose in
    /// phase 2, so the flags keep a single meaning.
    async fn structure_level(
        &self,
        level: StructureLevel,
    ) -> Result<Option<RunStatus>, RunError> {
        let kind = level.node_kind();
        let placeholders_only = level == StructureLevel::Chapter;

        let snapshot = self.store.snapshot().await?;
        let parents = node::story_order(&snapshot, level.parent_kind());
        let total = parents.len();
        drop(snapshot);

        for (index, parent_id) in parents.iter().enumerate() {
            if self.stop.is_stopped() {
                return Ok(Some(RunStatus::Stopped));
            }
            let position = PositionContext::new(index + 1, total);
            let target = {
                // An already-expanded parent keeps its existing count, so a
                // resumed run never re-asks for count advice.
                let snapshot = self.store.snapshot().await?;
                let existing = node::find(&snapshot, parent_id)
                    .filter(|p| p.phase_state(PhaseKey::StructureExpanded).is_done())
                    .map(|p| node::children_of_kind(&snapshot, p, kind).len())
                    .unwrap_or(0);
                if existing > 0 {
                    existing
                } else {
                    self.resolve_count(level, parent_id, position).await?
                }
            };
            let child_ids = self
                .sequencer
                .ensure_children(parent_id, kind, target, position)
                .await?;

            if !placeholders_only {
                for child_id in &child_ids {
                    if self.stop.is_stopped() {
                        return Ok(Some(RunStatus::Stopped));
                    }
                    self.ancestry_audit(child_id).await?;
                    self.quality
                        .run_structural(child_id, self.planned_split(kind))
                        .await?;
                    self.quality.run_audit(child_id, false).await?;
                    self.report_node(child_id).await;
                }
            }

            self.consistency
                .audit_siblings(parent_id, kind, &self.stop)
                .await?;

            if level == StructureLevel::Plot {
                if let Some(mode) = self.config.pacing {
                    self.pacing.apply(parent_id, mode).await?;
                }
            }

            // Consistency may have deleted children and pacing inserted new
            // ones; re-read before the final per-sibling passes.
            let snapshot = self.store.snapshot().await?;
            let refreshed: Vec<NodeId> = node::find(&snapshot, parent_id)
                .map(|p| {
                    node::children_of_kind(&snapshot, p, kind)
                        .iter()
                        .map(|n| n.id.clone())
                        .collect()
                })
                .unwrap_or_default();
            drop(snapshot);

            for child_id in &refreshed {
                if self.stop.is_stopped() {
                    return Ok(Some(RunStatus::Stopped));
                }
                if !placeholders_only {
                    self.quality
                        .run_structural(child_id, self.planned_split(kind))
                        .await?;
                    self.quality.run_audit(child_id, false).await?;
                }
                self.resources.sync(child_id).await?;
            }
        }
        Ok(None)
    }

    /// Phase 2: depth-first prose drafting over the finished skeleton.
    async fn write_prose(&self) -> Result<Option<RunStatus>, RunError> {
        let snapshot = self.store.snapshot().await?;
        let chapters = node::story_order(&snapshot, NodeKind::Chapter);
        drop(snapshot);

        for (index, chapter_id) in chapters.iter().enumerate() {
            if self.stop.is_stopped() {
                return Ok(Some(RunStatus::Stopped));
            }
            if self.tracker.is_done(chapter_id, PhaseKey::ProseDrafted).await? {
                continue;
            }

            self.ancestry_audit(chapter_id).await?;
            self.tracker.begin(chapter_id, PhaseKey::ProseDrafted).await?;
            self.draft_chapter(chapter_id).await?;

            // The very first chapter carries the golden-opening rules.
            self.quality.run_audit(chapter_id, index == 0).await?;
            self.quality.run_structural(chapter_id, 0).await?;
            self.quality.run_ending(chapter_id).await?;

            self.tracker.complete(chapter_id, PhaseKey::ProseDrafted).await?;
            self.report_node(chapter_id).await;
        }
        Ok(None)
    }

    /// Generate prose for a chapter whose content is still empty. A run
    /// resumed mid-draft re-enters here; existing prose is kept.
    async fn draft_chapter(&self, chapter_id: &str) -> Result<(), RunError> {
        let snapshot = self.store.snapshot().await?;
        let Some(chapter) = node::find(&snapshot, chapter_id) else {
            return Ok(());
        };
        if !chapter.content.is_empty() {
            return Ok(());
        }
        let parent = chapter.parent.as_deref().and_then(|p| node::find(&snapshot, p));
        let prev = node::prev_sibling(&snapshot, chapter);
        let root_summary = node::root(&snapshot)
            .map(|r| r.summary.clone())
            .unwrap_or_default();

        let request = prompts::prose_draft(
            chapter,
            parent,
            prev,
            &root_summary,
            self.config.word_count_per_chapter,
        );
        let text = self.gate.invoke(request).await?;
        let text = text.trim().to_string();
        if text.is_empty() {
            return Err(RunError::EmptyGeneration {
                parent: chapter.title.clone(),
            });
        }

        store::update_node(self.store.as_ref(), chapter_id, move |n| {
            n.content = text;
        })
        .await?;
        self.log.record(
            LogKind::Phase,
            format!("drafted prose for \"{}\"", chapter.title),
        );
        Ok(())
    }

    /// Re-validate every unfinished ancestor of a node, root first. All
    /// checks are flag-gated, so finished ancestors cost nothing.
    async fn ancestry_audit(&self, node_id: &str) -> Result<(), RunError> {
        let snapshot = self.store.snapshot().await?;
        let chain = node::ancestry(&snapshot, node_id);

        for ancestor_id in chain {
            let Some(ancestor) = node::find(&snapshot, &ancestor_id) else {
                continue;
            };
            let planned = ancestor
                .kind
                .child_kind()
                .map(|child_kind| {
                    let actual = node::children_of_kind(&snapshot, ancestor, child_kind).len();
                    if actual > 0 { actual } else { self.planned_split(ancestor.kind) }
                })
                .unwrap_or(0);
            self.quality.run_structural(&ancestor_id, planned).await?;
            self.quality.run_audit(&ancestor_id, false).await?;
        }
        Ok(())
    }

    /// Configured child count for a level; `0` means ask the model.
    fn configured_count(&self, level: StructureLevel) -> usize {
        match level {
            StructureLevel::Outline => self.config.volume_count,
            StructureLevel::Plot => self.config.plot_points_per_volume,
            StructureLevel::Chapter => self.config.chapters_per_plot,
        }
    }

    /// How many children a node of `kind` is expected to split into, for
    /// span checks.
    fn planned_split(&self, kind: NodeKind) -> usize {
        match kind {
            NodeKind::Root => self.config.volume_count,
            NodeKind::Outline => self.config.plot_points_per_volume,
            NodeKind::Plot => self.config.chapters_per_plot,
            _ => 0,
        }
    }

    async fn resolve_count(
        &self,
        level: StructureLevel,
        parent_id: &str,
        position: PositionContext,
    ) -> Result<usize, RunError> {
        let configured = self.configured_count(level);
        if configured > 0 {
            return Ok(configured);
        }

        let snapshot = self.store.snapshot().await?;
        let fallback = default_count(level);
        let Some(parent) = node::find(&snapshot, parent_id) else {
            return Ok(fallback);
        };
        let root_summary = node::root(&snapshot)
            .map(|r| r.summary.clone())
            .unwrap_or_default();

        let request =
            prompts::count_advice(parent, level.node_kind(), &root_summary, position);
        let text = self.gate.invoke(request).await?;
        match schema::decode_count_advice(&text) {
            Some(advice) => {
                let count = advice.count.clamp(ADVICE_MIN, ADVICE_MAX);
                self.log.record(
                    LogKind::Phase,
                    format!(
                        "advised {} {}(s) under \"{}\": {}",
                        count,
                        level.node_kind().label(),
                        parent.title,
                        advice.reason
                    ),
                );
                Ok(count)
            }
            None => {
                self.log.record(
                    LogKind::Warning,
                    format!("count advice unusable, defaulting to {}", fallback),
                );
                Ok(fallback)
            }
        }
    }

    async fn root_id(&self) -> Result<NodeId, RunError> {
        let snapshot = self.store.snapshot().await?;
        node::root(&snapshot)
            .map(|r| r.id.clone())
            .ok_or(RunError::MissingRoot)
    }

    async fn node_count(&self) -> usize {
        self.store.snapshot().await.map(|s| s.len()).unwrap_or(0)
    }

    fn enter(&self, state: RunState) {
        self.log.record(LogKind::Phase, format!("entering {}", state));
        if let Some(reporter) = &self.reporter {
            reporter.enter_state(state);
        }
    }

    async fn report_node(&self, node_id: &str) {
        if let Some(reporter) = &self.reporter {
            if let Ok(snapshot) = self.store.snapshot().await {
                if let Some(n) = node::find(&snapshot, node_id) {
                    reporter.node_update(&n.title);
                }
            }
        }
    }
}

fn default_count(level: StructureLevel) -> usize {
    let defaults = RunConfig::default();
    match level {
        StructureLevel::Outline => defaults.volume_count,
        StructureLevel::Plot => defaults.plot_points_per_volume,
        StructureLevel::Chapter => defaults.chapters_per_plot,
    }
}
