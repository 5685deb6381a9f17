//! Integration tests for Quill.
//!
//! The pipeline tests drive the real orchestrator against an in-memory
//! store and a scripted generation client that routes on prompt content, so
//! every backend call a run makes is deterministic and countable.

use async_trait::async_trait;
use quill::audit::RunLog;
use quill::client::{ClientError, GateConfig, GenerationClient, GenerationRequest, RequestGate};
use quill::config::{RunConfig, Strategy, TargetDepth};
use quill::node::{self, Node, NodeKind};
use quill::orchestrator::{Orchestrator, RunStatus};
use quill::progress::PhaseKey;
use quill::store::{MemoryStore, NodeStore};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Routes each request on markers in the prompt text, the way the real
/// backend would see them. Counts every call.
struct PipelineClient {
    calls: AtomicUsize,
    fail_always: bool,
}

impl PipelineClient {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_always: false,
        }
    }

    fn failing() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_always: true,
        }
    }

    fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

/// The item count requested by an expansion prompt ("... exactly N objects").
fn requested_count(user: &str) -> usize {
    user.split("exactly ")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|n| n.parse().ok())
        .unwrap_or(1)
}

fn items_reply(prefix: &str, count: usize) -> String {
    let items: Vec<String> = (0..count)
        .map(|i| {
            format!(
                r#"{{"title":"{} {}","summary":"The events of {} {} unfold with turns and consequences."}}"#,
                prefix,
                i + 1,
                prefix,
                i + 1
            )
        })
        .collect();
    format!("[{}]", items.join(","))
}

#[async_trait]
impl GenerationClient for PipelineClient {
    async fn generate(&self, request: GenerationRequest) -> Result<String, ClientError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_always {
            return Err(ClientError::Transient("backend down".into()));
        }
        let user = &request.user;

        if user.contains("JSON array of exactly") {
            let count = requested_count(user);
            let prefix = if user.contains("volume outline") {
                "Volume Arc"
            } else if user.contains("plot point") {
                "Plot Beat"
            } else {
                "Chapter"
            };
            return Ok(items_reply(prefix, count));
        }
        if user.contains("\"sufficient\"") {
            return Ok(r#"{"sufficient":true}"#.to_string());
        }
        if user.contains("\"hasConflicts\"") {
            return Ok(r#"{"hasConflicts":false,"fixes":[]}"#.to_string());
        }
        if user.contains("\"hasGap\"") {
            return Ok(r#"{"hasGap":false}"#.to_string());
        }
        if user.contains("\"isValid\"") {
            return Ok(r#"{"isValid":true}"#.to_string());
        }
        if user.contains("\"insertions\"") {
            return Ok(r#"{"insertions":[]}"#.to_string());
        }
        if user.contains("\"selectedIds\"") {
            return Ok(r#"{"selectedIds":[]}"#.to_string());
        }
        if user.contains("\"newResources\"") {
            // One new character surfaces while processing the first plot
            // beat; everything else has nothing to report.
            if user.contains("\"Plot Beat 1\"") {
                return Ok(
                    r#"{"newResources":[{"type":"character","title":"Mira","summary":"a smuggler with debts"}],"updates":[],"mentionedIds":[]}"#
                        .to_string(),
                );
            }
            return Ok(r#"{"newResources":[],"updates":[],"mentionedIds":[]}"#.to_string());
        }
        if user.contains("Write this chapter in full") {
            let mut prose = "Rain hammered the ridge as the column crested it, and the horses \
                             balked at the smell of ash from the burned granary below. "
                .repeat(12);
            prose.push_str("\"Open the gate,\" Mira said, and drew her knife.");
            return Ok(prose);
        }
        if user.contains("reply with exactly PASS") {
            return Ok("PASS".to_string());
        }
        // Any rewrite path: return something long enough to satisfy floors.
        Ok("The rewritten material carries the same events with broader incident \
            and sharper consequence, scene after scene."
            .to_string())
    }
}

fn scenario_config() -> RunConfig {
    RunConfig {
        target_depth: TargetDepth::Prose,
        volume_count: 1,
        plot_points_per_volume: 1,
        chapters_per_plot: 1,
        word_count_per_chapter: 1000,
        min_effective_len: 40,
        strategy: Strategy::LinearBatch,
        pacing: None,
        resume_hint: None,
    }
}

fn root_only_store() -> Arc<MemoryStore> {
    let root = Node::root(
        "The Ashen Throne",
        "A kingdom built on a dead god's bones, where ash falls like snow and \
         the throne remembers every oath sworn on it.",
    );
    Arc::new(MemoryStore::with_nodes(vec![root]))
}

fn orchestrator_over(
    store: Arc<MemoryStore>,
    client: Arc<PipelineClient>,
    config: RunConfig,
) -> Orchestrator {
    let log = Arc::new(RunLog::in_memory());
    let gate = RequestGate::start(
        client,
        GateConfig::default()
            .with_spacing(Duration::from_millis(1))
            .with_backoff_base(Duration::from_millis(2))
            .with_retry_delay(Duration::from_millis(2)),
        log.clone(),
    );
    Orchestrator::new(store, gate, log, config)
}

mod pipeline {
    use super::*;

    #[tokio::test]
    async fn full_scenario_builds_one_of_each_and_drafts_prose() {
        let store = root_only_store();
        let client = Arc::new(PipelineClient::new());
        let orchestrator = orchestrator_over(store.clone(), client.clone(), scenario_config());

        let report = orchestrator.run().await;
        assert_eq!(report.status, RunStatus::Completed, "{:?}", report.message);
        assert_eq!(report.requests, client.call_count());

        let snapshot = store.snapshot().await.unwrap();
        let outlines = node::story_order(&snapshot, NodeKind::Outline);
        let plots = node::story_order(&snapshot, NodeKind::Plot);
        let chapters = node::story_order(&snapshot, NodeKind::Chapter);
        assert_eq!(outlines.len(), 1);
        assert_eq!(plots.len(), 1);
        assert_eq!(chapters.len(), 1);

        // Length floor on the drafted chapter.
        let chapter = node::find(&snapshot, &chapters[0]).unwrap();
        assert!(chapter.content.chars().count() >= 1000);

        // Progress flags on every story node.
        let root = node::root(&snapshot).unwrap();
        for key in [PhaseKey::StructureExpanded, PhaseKey::StructureValidated, PhaseKey::QualityOptimized] {
            assert!(root.phase_state(key).is_done(), "root missing {}", key);
        }
        for id in outlines.iter().chain(plots.iter()) {
            let n = node::find(&snapshot, id).unwrap();
            for key in [
                PhaseKey::StructureExpanded,
                PhaseKey::StructureValidated,
                PhaseKey::QualityOptimized,
                PhaseKey::ResourceSynced,
            ] {
                assert!(n.phase_state(key).is_done(), "{} missing {}", n.title, key);
            }
        }
        for key in [
            PhaseKey::StructureValidated,
            PhaseKey::QualityOptimized,
            PhaseKey::EndingValidated,
            PhaseKey::ResourceSynced,
            PhaseKey::ProseDrafted,
        ] {
            assert!(chapter.phase_state(key).is_done(), "chapter missing {}", key);
        }

        // No orphaned ids anywhere.
        for n in &snapshot {
            for child in &n.children {
                assert!(node::find(&snapshot, child).is_some(), "orphan child id");
            }
            if let Some(prev) = &n.prev_node {
                assert!(node::find(&snapshot, prev).is_some(), "orphan prev id");
            }
            for assoc in &n.associations {
                assert!(node::find(&snapshot, assoc).is_some(), "orphan association");
            }
        }
    }

    #[tokio::test]
    async fn resources_propagate_to_plot_outline_and_root() {
        let store = root_only_store();
        let client = Arc::new(PipelineClient::new());
        let orchestrator = orchestrator_over(store.clone(), client.clone(), scenario_config());
        let report = orchestrator.run().await;
        assert_eq!(report.status, RunStatus::Completed);

        let snapshot = store.snapshot().await.unwrap();
        let mira = snapshot
            .iter()
            .find(|n| n.kind == NodeKind::Character && n.title == "Mira")
            .expect("extracted character exists");

        let plot_id = &node::story_order(&snapshot, NodeKind::Plot)[0];
        let outline_id = &node::story_order(&snapshot, NodeKind::Outline)[0];
        assert!(node::find(&snapshot, plot_id).unwrap().associations.contains(&mira.id));
        assert!(node::find(&snapshot, outline_id).unwrap().associations.contains(&mira.id));
        assert!(node::root(&snapshot).unwrap().associations.contains(&mira.id));
    }

    #[tokio::test]
    async fn second_run_spends_zero_calls_and_leaves_tree_identical() {
        let store = root_only_store();
        let client = Arc::new(PipelineClient::new());

        let first = orchestrator_over(store.clone(), client.clone(), scenario_config());
        assert_eq!(first.run().await.status, RunStatus::Completed);
        let calls_after_first = client.call_count();
        let tree_after_first =
            serde_json::to_string(&store.snapshot().await.unwrap()).unwrap();

        let second = orchestrator_over(store.clone(), client.clone(), scenario_config());
        let report = second.run().await;
        assert_eq!(report.status, RunStatus::Completed);
        assert_eq!(
            client.call_count(),
            calls_after_first,
            "a resumed run with all flags set must spend no model calls"
        );
        let tree_after_second =
            serde_json::to_string(&store.snapshot().await.unwrap()).unwrap();
        assert_eq!(tree_after_first, tree_after_second);
    }

    #[tokio::test]
    async fn target_depth_outline_stops_after_volumes() {
        let store = root_only_store();
        let client = Arc::new(PipelineClient::new());
        let config = RunConfig {
            target_depth: TargetDepth::Outline,
            ..scenario_config()
        };
        let orchestrator = orchestrator_over(store.clone(), client.clone(), config);

        let report = orchestrator.run().await;
        assert_eq!(report.status, RunStatus::Completed);

        let snapshot = store.snapshot().await.unwrap();
        assert_eq!(node::story_order(&snapshot, NodeKind::Outline).len(), 1);
        assert!(node::story_order(&snapshot, NodeKind::Plot).is_empty());
        assert!(node::story_order(&snapshot, NodeKind::Chapter).is_empty());
    }

    #[tokio::test]
    async fn pre_stopped_run_reports_stopped_without_calls() {
        let store = root_only_store();
        let client = Arc::new(PipelineClient::new());
        let orchestrator = orchestrator_over(store.clone(), client.clone(), scenario_config());
        orchestrator.stop_signal().stop();

        let report = orchestrator.run().await;
        assert_eq!(report.status, RunStatus::Stopped);
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn backend_exhaustion_aborts_with_error_and_valid_tree() {
        let store = root_only_store();
        let client = Arc::new(PipelineClient::failing());
        let orchestrator = orchestrator_over(store.clone(), client.clone(), scenario_config());

        let report = orchestrator.run().await;
        assert_eq!(report.status, RunStatus::Error);
        assert!(report.message.is_some());
        // Retried three times, then aborted.
        assert_eq!(client.call_count(), 3);

        let snapshot = store.snapshot().await.unwrap();
        assert!(node::root(&snapshot).is_some(), "tree still loadable and valid");
    }

    #[tokio::test]
    async fn missing_root_is_an_error_status() {
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(PipelineClient::new());
        let orchestrator = orchestrator_over(store, client, scenario_config());

        let report = orchestrator.run().await;
        assert_eq!(report.status, RunStatus::Error);
        assert!(report.message.unwrap().contains("root"));
    }

    #[tokio::test]
    async fn larger_structure_run_honors_configured_counts() {
        let store = root_only_store();
        let client = Arc::new(PipelineClient::new());
        let config = RunConfig {
            target_depth: TargetDepth::Chapter,
            volume_count: 2,
            plot_points_per_volume: 3,
            chapters_per_plot: 2,
            ..scenario_config()
        };
        let orchestrator = orchestrator_over(store.clone(), client.clone(), config);

        let report = orchestrator.run().await;
        assert_eq!(report.status, RunStatus::Completed, "{:?}", report.message);

        let snapshot = store.snapshot().await.unwrap();
        assert_eq!(node::story_order(&snapshot, NodeKind::Outline).len(), 2);
        assert_eq!(node::story_order(&snapshot, NodeKind::Plot).len(), 6);
        assert_eq!(node::story_order(&snapshot, NodeKind::Chapter).len(), 12);

        // Narrative chains are intact under every parent.
        for outline_id in node::story_order(&snapshot, NodeKind::Outline) {
            let outline = node::find(&snapshot, &outline_id).unwrap();
            let plots = node::children_of_kind(&snapshot, outline, NodeKind::Plot);
            assert!(plots[0].prev_node.is_none());
            for pair in plots.windows(2) {
                assert_eq!(pair[1].prev_node.as_deref(), Some(pair[0].id.as_str()));
            }
        }
    }
}

mod cli {
    use assert_cmd::Command;
    use assert_cmd::cargo::cargo_bin_cmd;
    use predicates::prelude::*;
    use tempfile::TempDir;

    fn quill() -> Command {
        cargo_bin_cmd!("quill")
    }

    #[test]
    fn test_quill_help() {
        quill().arg("--help").assert().success();
    }

    #[test]
    fn test_quill_version() {
        quill().arg("--version").assert().success();
    }

    #[test]
    fn test_init_creates_tree_and_config() {
        let dir = TempDir::new().unwrap();
        quill()
            .current_dir(dir.path())
            .args(["init", "The Ashen Throne", "--premise", "A kingdom of ash."])
            .assert()
            .success()
            .stdout(predicate::str::contains("Initialized quill project"));

        assert!(dir.path().join("tree.json").exists());
        assert!(dir.path().join("quill.toml").exists());
    }

    #[test]
    fn test_init_refuses_existing_tree() {
        let dir = TempDir::new().unwrap();
        quill()
            .current_dir(dir.path())
            .args(["init", "Book", "--premise", "p"])
            .assert()
            .success();
        quill()
            .current_dir(dir.path())
            .args(["init", "Book", "--premise", "p"])
            .assert()
            .failure();
    }

    #[test]
    fn test_status_lists_the_root() {
        let dir = TempDir::new().unwrap();
        quill()
            .current_dir(dir.path())
            .args(["init", "The Ashen Throne", "--premise", "A kingdom of ash."])
            .assert()
            .success();
        quill()
            .current_dir(dir.path())
            .arg("status")
            .assert()
            .success()
            .stdout(predicate::str::contains("The Ashen Throne"));
    }

    #[test]
    fn test_run_without_backend_endpoint_fails_cleanly() {
        let dir = TempDir::new().unwrap();
        quill()
            .current_dir(dir.path())
            .args(["init", "Book", "--premise", "p"])
            .assert()
            .success();
        quill()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .failure()
            .stderr(predicate::str::contains("endpoint"));
    }

    #[test]
    fn test_run_without_tree_points_at_init() {
        let dir = TempDir::new().unwrap();
        quill()
            .current_dir(dir.path())
            .arg("run")
            .assert()
            .failure()
            .stderr(predicate::str::contains("quill init"));
    }
}
