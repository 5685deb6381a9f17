//! Run configuration for Quill.
//!
//! Everything a run needs is read once from `quill.toml` and frozen for the
//! duration of the run; the core never mutates or persists configuration.
//!
//! # Configuration File Format
//!
//! ```toml
//! [run]
//! target_depth = "prose"
//! volume_count = 2
//! plot_points_per_volume = 8
//! chapters_per_plot = 3
//! word_count_per_chapter = 2000
//! min_effective_len = 200
//! strategy = "linear_batch"
//! pacing = "normal"
//!
//! [gate]
//! spacing_ms = 500
//! backoff_base_ms = 2000
//! retry_delay_ms = 1500
//!
//! [backend]
//! endpoint = "http://localhost:8080/v1/generate"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// How deep the run refines the tree before stopping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetDepth {
    /// Stop after volume outlines exist and are validated.
    Outline,
    /// Stop after plot points.
    Plot,
    /// Stop after chapter placeholders.
    Chapter,
    /// Draft full prose.
    #[default]
    Prose,
}

impl std::fmt::Display for TargetDepth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TargetDepth::Outline => "outline",
            TargetDepth::Plot => "plot",
            TargetDepth::Chapter => "chapter",
            TargetDepth::Prose => "prose",
        };
        write!(f, "{}", s)
    }
}

/// Child-generation strategy for the sequencer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    /// Sequential batches of up to five, each anchored to the last sibling.
    #[default]
    LinearBatch,
    /// Keyframes spanning the parent's scope, then gap infill.
    Spanning,
    /// Everything in a single call (plot level), linear fallback.
    OnePass,
}

/// Rhythm preference for the optional pacing pass at the plot level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacingMode {
    Fast,
    #[default]
    Normal,
    Slow,
}

impl PacingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PacingMode::Fast => "fast",
            PacingMode::Normal => "normal",
            PacingMode::Slow => "slow",
        }
    }
}

/// Immutable per-run settings.
///
/// A count of `0` means "ask the model": the orchestrator requests
/// structural count advice for that level at run time.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub target_depth: TargetDepth,
    pub volume_count: usize,
    pub plot_points_per_volume: usize,
    pub chapters_per_plot: usize,
    /// Floor for drafted chapter prose, in characters.
    pub word_count_per_chapter: usize,
    /// Floor for container summaries, in characters.
    pub min_effective_len: usize,
    pub strategy: Strategy,
    /// `None` disables the pacing pass entirely.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pacing: Option<PacingMode>,
    /// Operator note recorded in the run log; resumption itself is driven by
    /// the per-node progress flags, not by this hint.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resume_hint: Option<String>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            target_depth: TargetDepth::Prose,
            volume_count: 1,
            plot_points_per_volume: 6,
            chapters_per_plot: 3,
            word_count_per_chapter: 2000,
            min_effective_len: 200,
            strategy: Strategy::LinearBatch,
            pacing: None,
            resume_hint: None,
        }
    }
}

impl RunConfig {
    /// Upper bound applied to configured and model-advised child counts.
    pub const MAX_CHILDREN: usize = 200;

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("volume_count", self.volume_count),
            ("plot_points_per_volume", self.plot_points_per_volume),
            ("chapters_per_plot", self.chapters_per_plot),
        ] {
            if value > Self::MAX_CHILDREN {
                anyhow::bail!("{} is {}, maximum is {}", name, value, Self::MAX_CHILDREN);
            }
        }
        if self.word_count_per_chapter == 0 {
            anyhow::bail!("word_count_per_chapter must be positive");
        }
        if self.min_effective_len == 0 {
            anyhow::bail!("min_effective_len must be positive");
        }
        Ok(())
    }

    /// Effective-length floor for a node of the given kind.
    pub fn length_floor(&self, kind: crate::node::NodeKind) -> usize {
        match kind {
            crate::node::NodeKind::Chapter => self.word_count_per_chapter,
            _ => self.min_effective_len,
        }
    }
}

/// Request gate tuning. Retry attempt count is fixed by the gate itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateSettings {
    /// Fixed delay before every dispatched call.
    pub spacing_ms: u64,
    /// Base for exponential backoff after a rate-limit response.
    pub backoff_base_ms: u64,
    /// Fixed delay between retries of non-rate-limit failures.
    pub retry_delay_ms: u64,
}

impl Default for GateSettings {
    fn default() -> Self {
        Self {
            spacing_ms: 500,
            backoff_base_ms: 2000,
            retry_delay_ms: 1500,
        }
    }
}

/// Where the CLI's generic HTTP generation adapter points.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendSettings {
    pub endpoint: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// The full `quill.toml` document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct QuillToml {
    pub run: RunConfig,
    pub gate: GateSettings,
    pub backend: BackendSettings,
}

impl QuillToml {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config at {}", path.display()))?;
        let parsed: QuillToml = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config at {}", path.display()))?;
        parsed.run.validate()?;
        Ok(parsed)
    }

    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeKind;

    #[test]
    fn defaults_are_valid() {
        let config = RunConfig::default();
        config.validate().unwrap();
        assert_eq!(config.target_depth, TargetDepth::Prose);
        assert_eq!(config.strategy, Strategy::LinearBatch);
        assert!(config.pacing.is_none());
    }

    #[test]
    fn validate_rejects_oversized_counts() {
        let config = RunConfig {
            plot_points_per_volume: 1000,
            ..RunConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_floors() {
        let config = RunConfig {
            min_effective_len: 0,
            ..RunConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn length_floor_splits_prose_from_containers() {
        let config = RunConfig {
            word_count_per_chapter: 1500,
            min_effective_len: 120,
            ..RunConfig::default()
        };
        assert_eq!(config.length_floor(NodeKind::Chapter), 1500);
        assert_eq!(config.length_floor(NodeKind::Plot), 120);
        assert_eq!(config.length_floor(NodeKind::Root), 120);
    }

    #[test]
    fn toml_round_trip_with_partial_file() {
        let doc: QuillToml = toml::from_str(
            r#"
            [run]
            target_depth = "plot"
            volume_count = 0
            strategy = "spanning"
            pacing = "slow"

            [backend]
            endpoint = "http://localhost:9999/gen"
            "#,
        )
        .unwrap();
        assert_eq!(doc.run.target_depth, TargetDepth::Plot);
        assert_eq!(doc.run.volume_count, 0);
        assert_eq!(doc.run.strategy, Strategy::Spanning);
        assert_eq!(doc.run.pacing, Some(PacingMode::Slow));
        // Unspecified sections fall back to defaults.
        assert_eq!(doc.run.chapters_per_plot, RunConfig::default().chapters_per_plot);
        assert_eq!(doc.gate.spacing_ms, GateSettings::default().spacing_ms);
        assert_eq!(doc.backend.endpoint, "http://localhost:9999/gen");
    }
}
