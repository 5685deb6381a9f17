//! Typed decoding of backend responses.
//!
//! The backend is steered toward JSON but never trusted to produce it:
//! replies arrive bare, fenced in markdown, or wrapped in prose. Every
//! decoder here extracts the first JSON value it can find and parses it into
//! a shape with defaulted fields; anything that still fails produces that
//! operation's documented safe default (empty list, "no conflicts",
//! "sufficient") instead of an error. Malformed output costs the run one
//! no-op step, never an abort.

use serde::Deserialize;
use serde::de::DeserializeOwned;

/// Pull the first JSON value out of a possibly-noisy reply.
fn extract_json(text: &str) -> Option<serde_json::Value> {
    let start = text.find(['{', '['])?;
    serde_json::Deserializer::from_str(&text[start..])
        .into_iter::<serde_json::Value>()
        .next()?
        .ok()
}

fn decode<T: DeserializeOwned>(text: &str) -> Option<T> {
    serde_json::from_value(extract_json(text)?).ok()
}

fn default_true() -> bool {
    true
}

/// One generated child: node expansion responses are arrays of these.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DraftItem {
    pub title: String,
    #[serde(default)]
    pub summary: String,
}

/// Node expansion. Safe default: no items (the caller re-requests or
/// tops up; it never hard-fails on a count mismatch).
pub fn decode_draft_items(text: &str) -> Vec<DraftItem> {
    let items: Vec<DraftItem> = decode(text).unwrap_or_default();
    items
        .into_iter()
        .filter(|item| !item.title.trim().is_empty())
        .collect()
}

/// Quality audit: the pass sentinel or a rewrite instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuditOutcome {
    Pass,
    Rewrite(String),
}

/// An empty reply decodes to `Pass`: the safe default is to leave the
/// draft alone, not to rewrite it with an empty instruction.
pub fn decode_audit(text: &str) -> AuditOutcome {
    let trimmed = text.trim().trim_matches(['"', '`', '*']);
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("pass") {
        AuditOutcome::Pass
    } else {
        AuditOutcome::Rewrite(text.trim().to_string())
    }
}

/// One fix requested by a batch-consistency review.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchFix {
    pub id: String,
    #[serde(default)]
    pub instruction: String,
    #[serde(default)]
    pub delete: bool,
    #[serde(default)]
    pub new_title: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReview {
    #[serde(default)]
    pub has_conflicts: bool,
    #[serde(default)]
    pub fixes: Vec<BatchFix>,
}

/// Batch validation. Safe default: no conflicts.
pub fn decode_batch_review(text: &str) -> BatchReview {
    decode(text).unwrap_or_default()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceFix {
    pub target_id: String,
    #[serde(default)]
    pub instruction: String,
    #[serde(default)]
    pub new_title: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SequenceReview {
    #[serde(default)]
    pub has_gap: bool,
    #[serde(default)]
    pub gap_analysis: String,
    #[serde(default)]
    pub fix_suggestions: Vec<SequenceFix>,
}

/// Full-sequence validation. Safe default: no gap.
pub fn decode_sequence_review(text: &str) -> SequenceReview {
    decode(text).unwrap_or_default()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndingVerdict {
    #[serde(default = "default_true")]
    pub is_valid: bool,
    #[serde(default)]
    pub fix_instruction: String,
}

/// Ending validation. Safe default: valid (leave the ending alone).
pub fn decode_ending_verdict(text: &str) -> EndingVerdict {
    decode(text).unwrap_or_else(|| EndingVerdict {
        is_valid: true,
        fix_instruction: String::new(),
    })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpanVerdict {
    #[serde(default = "default_true")]
    pub sufficient: bool,
    #[serde(default)]
    pub fix_instruction: String,
}

/// Span check. Safe default: sufficient.
pub fn decode_span_verdict(text: &str) -> SpanVerdict {
    decode(text).unwrap_or_else(|| SpanVerdict {
        sufficient: true,
        fix_instruction: String::new(),
    })
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountAdvice {
    pub count: usize,
    #[serde(default)]
    pub reason: String,
}

/// Structural count advice. No safe default here: `None` tells the caller
/// to fall back to its own configured default.
pub fn decode_count_advice(text: &str) -> Option<CountAdvice> {
    decode(text)
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PacingInsertion {
    pub insert_after_id: String,
    #[serde(default)]
    pub new_summary: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PacingPlan {
    #[serde(default)]
    pub insertions: Vec<PacingInsertion>,
}

/// Pacing analysis. Safe default: no insertions.
pub fn decode_pacing_plan(text: &str) -> PacingPlan {
    decode(text).unwrap_or_default()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewResource {
    #[serde(rename = "type")]
    pub kind: String,
    pub title: String,
    #[serde(default)]
    pub summary: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceUpdate {
    pub id: String,
    #[serde(default)]
    pub new_summary: String,
    #[serde(default)]
    pub change_log: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceExtraction {
    #[serde(default)]
    pub new_resources: Vec<NewResource>,
    #[serde(default)]
    pub updates: Vec<ResourceUpdate>,
    #[serde(default)]
    pub mentioned_ids: Vec<String>,
}

/// Resource extraction. Safe default: nothing found.
pub fn decode_resource_extraction(text: &str) -> ResourceExtraction {
    decode(text).unwrap_or_default()
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSelection {
    #[serde(default)]
    pub selected_ids: Vec<String>,
}

/// Resource association. Safe default: nothing selected.
pub fn decode_resource_selection(text: &str) -> ResourceSelection {
    decode(text).unwrap_or_default()
}
