//! Prompt templates for every generation operation.
//!
//! Builders are pure: they take node context and return a
//! [`GenerationRequest`] for the gate. Narrative context always follows the
//! same shape (world bible, then the parent's scope, then the previous
//! sibling for continuity), so the backend sees a consistent frame across
//! operations.

use crate::client::GenerationRequest;
use crate::config::PacingMode;
use crate::node::{Node, NodeKind};

const SYSTEM_ARCHITECT: &str = "You are a story architect. You design novel structure: \
volume arcs, plot points and chapter outlines that follow cleanly from the material \
you are given. You reply with exactly the format requested and nothing else.";

const SYSTEM_EDITOR: &str = "You are a rigorous developmental editor. You judge drafts \
against the stated criteria and reply with exactly the format requested.";

const SYSTEM_NOVELIST: &str = "You are a novelist. You write vivid, concrete scene \
prose grounded in the outline you are given. You reply with prose only: no headings, \
no notes, no meta commentary.";

/// Where a parent sits among its own siblings, for prompt framing.
#[derive(Debug, Clone, Copy)]
pub struct PositionContext {
    /// 1-based position of the parent at its level.
    pub ordinal: usize,
    pub total: usize,
}

impl PositionContext {
    pub fn new(ordinal: usize, total: usize) -> Self {
        Self { ordinal, total }
    }
}

fn context_header(root_summary: &str, parent: &Node, position: PositionContext) -> String {
    let mut out = String::new();
    out.push_str("## World Bible\n\n");
    out.push_str(root_summary);
    out.push_str("\n\n## Current Scope\n\n");
    out.push_str(&format!(
        "{} {} of {}: \"{}\"\n\n{}\n",
        capitalize(parent.kind.label()),
        position.ordinal,
        position.total,
        parent.title,
        parent.effective_text()
    ));
    out
}

fn items_format_note(kind: NodeKind, count: usize) -> String {
    format!(
        "Respond with a JSON array of exactly {} objects, each {{\"title\": string, \
         \"summary\": string}}. Each summary should be 2-4 sentences of concrete {} \
         material. Output only the JSON array.",
        count,
        kind.label()
    )
}

/// Sequential batch expansion, anchored to the last created sibling.
pub fn expand_batch(
    parent: &Node,
    kind: NodeKind,
    count: usize,
    anchor: Option<&Node>,
    root_summary: &str,
    position: PositionContext,
) -> GenerationRequest {
    let mut user = context_header(root_summary, parent, position);
    match anchor {
        Some(prev) => {
            user.push_str("## Continue From\n\n");
            user.push_str(&format!("\"{}\": {}\n\n", prev.title, prev.effective_text()));
            user.push_str(&format!(
                "## Task\n\nWrite the next {} {}(s) that follow directly from the \
                 material above, advancing the scope toward its close.\n\n",
                count,
                kind.label()
            ));
        }
        None => {
            user.push_str(&format!(
                "## Task\n\nWrite the first {} {}(s) that open this scope.\n\n",
                count,
                kind.label()
            ));
        }
    }
    user.push_str(&items_format_note(kind, count));
    GenerationRequest::json(SYSTEM_ARCHITECT, user)
}

/// Everything in one call. Used at the plot level under the one-pass
/// strategy.
pub fn expand_one_pass(
    parent: &Node,
    kind: NodeKind,
    count: usize,
    root_summary: &str,
    position: PositionContext,
) -> GenerationRequest {
    let mut user = context_header(root_summary, parent, position);
    user.push_str(&format!(
        "## Task\n\nBreak this scope into exactly {} {}s covering its full arc from \
         opening to close.\n\n",
        count,
        kind.label()
    ));
    user.push_str(&items_format_note(kind, count));
    GenerationRequest::json(SYSTEM_ARCHITECT, user)
}

/// Keyframes for the spanning strategy: anchor points across the whole arc.
pub fn span_keyframes(
    parent: &Node,
    kind: NodeKind,
    count: usize,
    root_summary: &str,
    position: PositionContext,
) -> GenerationRequest {
    let mut user = context_header(root_summary, parent, position);
    user.push_str(&format!(
        "## Task\n\nWrite {} keyframe {}s spanning this scope's full arc: the first \
         must open it, the last must close it, and the ones between must be its major \
         turning points, evenly spread.\n\n",
        count,
        kind.label()
    ));
    user.push_str(&items_format_note(kind, count));
    GenerationRequest::json(SYSTEM_ARCHITECT, user)
}

/// Infill between two adjacent keyframes.
pub fn span_infill(
    parent: &Node,
    kind: NodeKind,
    count: usize,
    left: &Node,
    right: &Node,
    root_summary: &str,
    position: PositionContext,
) -> GenerationRequest {
    let mut user = context_header(root_summary, parent, position);
    user.push_str("## Bridge\n\n");
    user.push_str(&format!(
        "From \"{}\": {}\n\nTo \"{}\": {}\n\n",
        left.title,
        left.effective_text(),
        right.title,
        right.effective_text()
    ));
    user.push_str(&format!(
        "## Task\n\nWrite the {} {}(s) that connect the first beat to the second, \
         in order, without repeating either.\n\n",
        count,
        kind.label()
    ));
    user.push_str(&items_format_note(kind, count));
    GenerationRequest::json(SYSTEM_ARCHITECT, user)
}

/// Structural count advice for levels configured as "ask the model".
pub fn count_advice(
    parent: &Node,
    kind: NodeKind,
    root_summary: &str,
    position: PositionContext,
) -> GenerationRequest {
    let mut user = context_header(root_summary, parent, position);
    user.push_str(&format!(
        "## Task\n\nHow many {}s should this scope be split into? Consider the \
         material's density and natural act boundaries.\n\nRespond with JSON: \
         {{\"count\": number, \"reason\": string}}. Output only the JSON.",
        kind.label()
    ));
    GenerationRequest::json(SYSTEM_EDITOR, user)
}

/// One-shot rewrite for a node under the length floor.
pub fn expansion_rewrite(node: &Node, floor: usize) -> GenerationRequest {
    let body = node.effective_text();
    let user = if node.kind == NodeKind::Chapter && !node.content.is_empty() {
        format!(
            "The chapter below runs {} characters; it needs at least {}. Expand it with \
             richer descriptive detail, interiority and dialogue, without changing what \
             happens.\n\n---\n\n{}\n\nOutput only the expanded chapter text.",
            body.chars().count(),
            floor,
            body
        )
    } else {
        format!(
            "The {} summary below runs {} characters; it needs at least {}. Broaden its \
             event density: add concrete incidents, complications and consequences that \
             fit the existing material. Keep everything already there.\n\n---\n\n{}\n\n\
             Output only the rewritten summary.",
            node.kind.label(),
            body.chars().count(),
            floor,
            body
        )
    };
    GenerationRequest::text(SYSTEM_NOVELIST, user)
}

/// Does this container hold enough distinct sub-events for its split?
pub fn span_check(node: &Node, child_count: usize) -> GenerationRequest {
    let user = format!(
        "The {} below will be split into {} {}s. Does its narrative scope contain at \
         least {} distinct sub-events to support that split?\n\n---\n\n{}\n\nRespond \
         with JSON: {{\"sufficient\": bool, \"fixInstruction\": string}} where \
         fixInstruction, when insufficient, says which intermediate events to add. \
         Output only the JSON.",
        node.kind.label(),
        child_count,
        node.kind.child_kind().map(|k| k.label()).unwrap_or("child"),
        child_count,
        node.effective_text()
    );
    GenerationRequest::json(SYSTEM_EDITOR, user)
}

/// Additive rewrite applying a span-check fix instruction.
pub fn span_rewrite(node: &Node, instruction: &str) -> GenerationRequest {
    let user = format!(
        "Revise the {} summary below per this instruction, strictly additively: keep \
         every existing event and insert the new intermediate events where they \
         belong.\n\n## Instruction\n\n{}\n\n---\n\n{}\n\nOutput only the revised summary.",
        node.kind.label(),
        instruction,
        node.effective_text()
    );
    GenerationRequest::text(SYSTEM_NOVELIST, user)
}

/// Content-quality audit. Replies `PASS` or a rewrite instruction.
pub fn quality_audit(
    node: &Node,
    parent: Option<&Node>,
    prev: Option<&Node>,
    root_summary: &str,
    target_len: usize,
    golden_opening: bool,
) -> GenerationRequest {
    let mut user = String::new();
    user.push_str("## World Bible\n\n");
    user.push_str(root_summary);
    user.push('\n');
    if let Some(p) = parent {
        user.push_str(&format!(
            "\n## Parent Scope\n\n\"{}\": {}\n",
            p.title,
            p.effective_text()
        ));
    }
    if let Some(p) = prev {
        user.push_str(&format!(
            "\n## Previous {}\n\n\"{}\": {}\n",
            capitalize(p.kind.label()),
            p.title,
            p.effective_text()
        ));
    }
    user.push_str(&format!(
        "\n## Draft Under Review ({})\n\n\"{}\"\n\n{}\n",
        node.kind.label(),
        node.title,
        node.effective_text()
    ));
    user.push_str("\n## Rubric\n\n");
    user.push_str("- Every event must have a visible cause in prior material\n");
    user.push_str("- World rules, power levels and geography must stay consistent with the world bible\n");
    user.push_str("- No contradiction with the parent scope or the previous sibling\n");
    match node.kind {
        NodeKind::Chapter => {
            user.push_str("- Scenes must be concrete: place, participants, stakes\n");
        }
        _ => {
            user.push_str("- The summary must state what changes, not mood alone\n");
        }
    }
    if golden_opening {
        user.push_str(
            "- Golden opening: the very first chapter must hook within the opening \
             paragraphs, introduce the protagonist in motion, and promise the story's \
             central conflict\n",
        );
    }
    user.push_str(&format!(
        "- The draft must carry at least {} characters of effective material\n",
        target_len
    ));
    user.push_str(
        "\nIf the draft meets every point, reply with exactly PASS. Otherwise reply \
         with a single rewrite instruction (no rewritten text, just the instruction).",
    );
    GenerationRequest::text(SYSTEM_EDITOR, user)
}

/// Apply an audit or consistency instruction to a node's text.
pub fn rewrite_with_instruction(node: &Node, instruction: &str, target_len: usize) -> GenerationRequest {
    let user = format!(
        "Rewrite the {} below following the instruction. Produce at least {} characters. \
         Preserve everything the instruction does not ask you to change.\n\n\
         ## Instruction\n\n{}\n\n---\n\n{}\n\nOutput only the rewritten text.",
        node.kind.label(),
        target_len,
        instruction,
        node.effective_text()
    );
    GenerationRequest::text(SYSTEM_NOVELIST, user)
}

/// Validate a chapter's closing stretch.
pub fn ending_check(tail: &str) -> GenerationRequest {
    let user = format!(
        "Judge the closing stretch of a chapter, quoted below.\n\n---\n\n{}\n\n---\n\n\
         It fails if it: foreshadows future events, summarizes or moralizes what just \
         happened, or closes on reflection instead of action, dialogue or event.\n\n\
         Respond with JSON: {{\"isValid\": bool, \"fixInstruction\": string}}. Output \
         only the JSON.",
        tail
    );
    GenerationRequest::json(SYSTEM_EDITOR, user)
}

/// Rewrite only the closing stretch; the preceding text stays untouched.
pub fn ending_rewrite(tail: &str, instruction: &str) -> GenerationRequest {
    let user = format!(
        "Rewrite this chapter ending per the instruction. Keep its events and roughly \
         its length; change how it lands. End on action, dialogue or event.\n\n\
         ## Instruction\n\n{}\n\n---\n\n{}\n\nOutput only the rewritten ending.",
        instruction, tail
    );
    GenerationRequest::text(SYSTEM_NOVELIST, user)
}

/// Draft full chapter prose from its outline.
pub fn prose_draft(
    chapter: &Node,
    parent: Option<&Node>,
    prev: Option<&Node>,
    root_summary: &str,
    target_len: usize,
) -> GenerationRequest {
    let mut user = String::new();
    user.push_str("## World Bible\n\n");
    user.push_str(root_summary);
    user.push('\n');
    if let Some(p) = parent {
        user.push_str(&format!(
            "\n## Plot Context\n\n\"{}\": {}\n",
            p.title,
            p.effective_text()
        ));
    }
    if let Some(p) = prev {
        let prev_text = p.effective_text();
        let recap: String = tail_chars(prev_text, 600);
        user.push_str(&format!("\n## Previous Chapter Closes With\n\n{}\n", recap));
    }
    user.push_str(&format!(
        "\n## Chapter Outline\n\n\"{}\"\n\n{}\n",
        chapter.title, chapter.summary
    ));
    user.push_str(&format!(
        "\n## Task\n\nWrite this chapter in full, at least {} characters. Concrete \
         scenes, grounded sensory detail, dialogue where it earns its place. Do not \
         foreshadow beyond this chapter's events.",
        target_len
    ));
    GenerationRequest::text(SYSTEM_NOVELIST, user)
}

fn numbered_digest(nodes: &[&Node]) -> String {
    let mut out = String::new();
    for (i, node) in nodes.iter().enumerate() {
        out.push_str(&format!(
            "{}. [{}] \"{}\": {}\n",
            i + 1,
            node.id,
            node.title,
            node.effective_text()
        ));
    }
    out
}

/// Conflict check over one chunk of siblings, with trailing context from the
/// previous chunk.
pub fn batch_review(chunk: &[&Node], carryover: &[&Node]) -> GenerationRequest {
    let mut user = String::new();
    if !carryover.is_empty() {
        user.push_str("## Preceding Context (read-only, do not flag)\n\n");
        user.push_str(&numbered_digest(carryover));
        user.push('\n');
    }
    user.push_str("## Nodes Under Review\n\n");
    user.push_str(&numbered_digest(chunk));
    user.push_str(
        "\n## Task\n\nFind contradictions, duplicated beats, or continuity breaks \
         among the nodes under review. Respond with JSON: {\"hasConflicts\": bool, \
         \"fixes\": [{\"id\": string, \"instruction\": string, \"delete\": bool, \
         \"newTitle\": string}]} where id is the bracketed id of a flagged node, \
         delete marks nodes that should be removed outright, and newTitle is present \
         only when renaming. Output only the JSON.",
    );
    GenerationRequest::json(SYSTEM_EDITOR, user)
}

/// Whole-sequence gap check across the final sibling list.
pub fn sequence_review(siblings: &[&Node]) -> GenerationRequest {
    let mut user = String::new();
    user.push_str("## Full Sequence\n\n");
    user.push_str(&numbered_digest(siblings));
    user.push_str(
        "\n## Task\n\nRead the sequence end to end and look for narrative gaps \
         invisible at close range: missing transitions, unexplained reversals, \
         dropped threads. Respond with JSON: {\"hasGap\": bool, \"gapAnalysis\": \
         string, \"fixSuggestions\": [{\"targetId\": string, \"instruction\": string, \
         \"newTitle\": string}]}. Output only the JSON.",
    );
    GenerationRequest::json(SYSTEM_EDITOR, user)
}

/// Should transition beats be inserted to control rhythm?
pub fn pacing_analysis(siblings: &[&Node], mode: PacingMode) -> GenerationRequest {
    let mut user = String::new();
    user.push_str("## Plot Sequence\n\n");
    user.push_str(&numbered_digest(siblings));
    user.push_str(&format!(
        "\n## Task\n\nThe desired pacing is \"{}\". Decide whether transition beats \
         (travel, recovery, quiet character work) should be inserted between specific \
         pairs to control rhythm{}. Respond with JSON: {{\"insertions\": \
         [{{\"insertAfterId\": string, \"newSummary\": string}}]}} — empty when the \
         rhythm already fits. Output only the JSON.",
        mode.as_str(),
        match mode {
            PacingMode::Fast => "; prefer none unless the sequence whipsaws",
            PacingMode::Normal => "",
            PacingMode::Slow => "; lean toward more breathing room",
        }
    ));
    GenerationRequest::json(SYSTEM_EDITOR, user)
}

/// Which of the parent's resources matter to this node?
pub fn resource_selection(node: &Node, candidates: &[&Node]) -> GenerationRequest {
    let mut user = String::new();
    user.push_str("## Node\n\n");
    user.push_str(&format!("\"{}\": {}\n", node.title, node.effective_text()));
    user.push_str("\n## Available Resources\n\n");
    for c in candidates {
        user.push_str(&format!("- [{}] {} ({}): {}\n", c.id, c.title, c.kind.label(), c.summary));
    }
    user.push_str(
        "\n## Task\n\nSelect the resources actually relevant to this node's material. \
         Respond with JSON: {\"selectedIds\": [string]} using the bracketed ids. \
         Output only the JSON.",
    );
    GenerationRequest::json(SYSTEM_EDITOR, user)
}

/// Find new entities and state changes in a node's text.
pub fn resource_extraction(node: &Node, associated: &[&Node]) -> GenerationRequest {
    let mut user = String::new();
    user.push_str("## Node Text\n\n");
    user.push_str(&format!("\"{}\": {}\n", node.title, node.effective_text()));
    user.push_str("\n## Known Resources\n\n");
    if associated.is_empty() {
        user.push_str("(none yet)\n");
    }
    for r in associated {
        user.push_str(&format!("- [{}] {} ({}): {}\n", r.id, r.title, r.kind.label(), r.summary));
    }
    user.push_str(
        "\n## Task\n\nFind (a) brand-new named characters, items, locations or \
         factions not in the known list, and (b) known resources whose state this \
         text significantly changes. Respond with JSON: {\"newResources\": \
         [{\"type\": \"character\"|\"item\"|\"location\"|\"faction\", \"title\": \
         string, \"summary\": string}], \"updates\": [{\"id\": string, \
         \"newSummary\": string, \"changeLog\": string}], \"mentionedIds\": \
         [string]}. Output only the JSON.",
    );
    GenerationRequest::json(SYSTEM_EDITOR, user)
}

/// Last `max` characters of a string, on a char boundary.
pub fn tail_chars(text: &str, max: usize) -> String {
    let count = text.chars().count();
    if count <= max {
        text.to_string()
    } else {
        text.chars().skip(count - max).collect()
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
