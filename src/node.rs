//! The document tree: node records, the narrative chain, and the splice
//! helpers every mutating component goes through.
//!
//! Story nodes (`Root > Outline > Plot > Chapter`) form a strict hierarchy;
//! resource nodes (characters, items, locations, factions) form a flat pool
//! referenced from story nodes through `associations`. Sibling story nodes
//! additionally carry a singly-linked `prev_node` chain that records
//! narrative order independent of tree position.

use crate::progress::{PhaseKey, PhaseState};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

pub type NodeId = String;

/// Story hierarchy depth never exceeds Root -> Outline -> Plot -> Chapter.
/// The ancestry walk uses this as a hard bound alongside its cycle guard.
pub const MAX_STORY_DEPTH: usize = 4;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Root,
    Outline,
    Plot,
    Chapter,
    Character,
    Item,
    Location,
    Faction,
}

impl NodeKind {
    pub fn is_story(&self) -> bool {
        matches!(
            self,
            NodeKind::Root | NodeKind::Outline | NodeKind::Plot | NodeKind::Chapter
        )
    }

    pub fn is_resource(&self) -> bool {
        !self.is_story()
    }

    /// Story containers are split into children; chapters are prose leaves.
    pub fn is_container(&self) -> bool {
        matches!(self, NodeKind::Root | NodeKind::Outline | NodeKind::Plot)
    }

    /// The story kind one level below this one.
    pub fn child_kind(&self) -> Option<NodeKind> {
        match self {
            NodeKind::Root => Some(NodeKind::Outline),
            NodeKind::Outline => Some(NodeKind::Plot),
            NodeKind::Plot => Some(NodeKind::Chapter),
            _ => None,
        }
    }

    /// Parse the resource kind names used by the extraction response shape.
    pub fn resource_from_str(s: &str) -> Option<NodeKind> {
        match s.trim().to_ascii_lowercase().as_str() {
            "character" => Some(NodeKind::Character),
            "item" => Some(NodeKind::Item),
            "location" => Some(NodeKind::Location),
            "faction" => Some(NodeKind::Faction),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            NodeKind::Root => "book",
            NodeKind::Outline => "volume outline",
            NodeKind::Plot => "plot point",
            NodeKind::Chapter => "chapter",
            NodeKind::Character => "character",
            NodeKind::Item => "item",
            NodeKind::Location => "location",
            NodeKind::Faction => "faction",
        }
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// One node of the document tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub kind: NodeKind,
    pub title: String,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<NodeId>,
    /// Ordered by generation; narrative order lives in `prev_node`.
    #[serde(default)]
    pub children: Vec<NodeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_node: Option<NodeId>,
    /// Resource node ids this story node references.
    #[serde(default)]
    pub associations: BTreeSet<NodeId>,
    /// Per-phase progress flags, the resumability ledger.
    #[serde(default)]
    pub phases: BTreeMap<PhaseKey, PhaseState>,
    /// Display-only flag owned by the external editor; generation clears it
    /// on parents so fresh children are visible.
    #[serde(default)]
    pub collapsed: bool,
}

impl Node {
    pub fn new(kind: NodeKind, title: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            title: title.into(),
            summary: String::new(),
            content: String::new(),
            parent: None,
            children: Vec::new(),
            prev_node: None,
            associations: BTreeSet::new(),
            phases: BTreeMap::new(),
            collapsed: false,
        }
    }

    pub fn root(title: impl Into<String>, premise: impl Into<String>) -> Self {
        let mut node = Self::new(NodeKind::Root, title);
        node.summary = premise.into();
        node
    }

    pub fn with_summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }

    /// The text a quality check reads: drafted prose for chapters, the
    /// summary for everything else.
    pub fn effective_text(&self) -> &str {
        if self.kind == NodeKind::Chapter && !self.content.is_empty() {
            &self.content
        } else {
            &self.summary
        }
    }

    pub fn phase_state(&self, phase: PhaseKey) -> PhaseState {
        self.phases.get(&phase).copied().unwrap_or_default()
    }
}

pub fn find<'a>(nodes: &'a [Node], id: &str) -> Option<&'a Node> {
    nodes.iter().find(|n| n.id == id)
}

pub fn root(nodes: &[Node]) -> Option<&Node> {
    nodes.iter().find(|n| n.kind == NodeKind::Root)
}

/// A parent's children of one kind, in `children` (generation) order.
pub fn children_of_kind<'a>(nodes: &'a [Node], parent: &Node, kind: NodeKind) -> Vec<&'a Node> {
    parent
        .children
        .iter()
        .filter_map(|id| find(nodes, id))
        .filter(|n| n.kind == kind)
        .collect()
}

/// The sibling that precedes `node` in narrative order, if any.
pub fn prev_sibling<'a>(nodes: &'a [Node], node: &Node) -> Option<&'a Node> {
    node.prev_node.as_deref().and_then(|id| find(nodes, id))
}

/// Insert `child` under `parent_id`, appended or spliced after a named
/// sibling, maintaining both orderings at once: the parent's `children` list
/// and the `prev_node` narrative chain. Also clears the parent's collapsed
/// display flag so the editor shows the new material.
pub fn attach(nodes: &mut Vec<Node>, parent_id: &str, after: Option<&str>, mut child: Node) {
    let Some(parent) = nodes.iter_mut().find(|n| n.id == parent_id) else {
        return;
    };
    parent.collapsed = false;
    child.parent = Some(parent_id.to_string());

    // Resolve the anchor: the named sibling if it exists, else the current tail.
    let anchor_pos = after.and_then(|a| parent.children.iter().position(|c| c == a));
    let anchor = match anchor_pos {
        Some(i) => Some(parent.children[i].clone()),
        None => parent.children.last().cloned(),
    };
    match anchor_pos {
        Some(i) => parent.children.insert(i + 1, child.id.clone()),
        None => parent.children.push(child.id.clone()),
    }

    // Chain narrative order: child follows its anchor, and whichever node
    // used to follow the anchor now follows the child.
    child.prev_node = anchor.clone();
    let child_id = child.id.clone();
    if let Some(a) = anchor {
        for other in nodes.iter_mut() {
            if other.id != child_id && other.prev_node.as_deref() == Some(a.as_str()) {
                other.prev_node = Some(child_id.clone());
                break;
            }
        }
    }
    nodes.push(child);
}

/// Remove a node, re-linking the `prev_node` chain around it and stripping
/// it from its parent's `children`. Descendants are removed with it.
pub fn detach(nodes: &mut Vec<Node>, id: &str) {
    let Some(removed) = find(nodes, id).cloned() else {
        return;
    };

    for other in nodes.iter_mut() {
        if other.prev_node.as_deref() == Some(id) {
            other.prev_node = removed.prev_node.clone();
        }
    }
    if let Some(parent_id) = &removed.parent {
        if let Some(parent) = nodes.iter_mut().find(|n| n.id == *parent_id) {
            parent.children.retain(|c| c != id);
        }
    }

    let mut doomed: Vec<NodeId> = vec![id.to_string()];
    let mut i = 0;
    while i < doomed.len() {
        if let Some(node) = find(nodes, &doomed[i]) {
            doomed.extend(node.children.iter().cloned());
        }
        i += 1;
    }
    nodes.retain(|n| !doomed.contains(&n.id));
}

/// Ids of every story node of `kind`, in document order (preorder walk of
/// the tree following `children` lists). Carries a cycle guard since child
/// lists are mutable data.
pub fn story_order(nodes: &[Node], kind: NodeKind) -> Vec<NodeId> {
    let mut out = Vec::new();
    let Some(root) = root(nodes) else {
        return out;
    };
    let mut seen = BTreeSet::new();
    let mut stack = vec![root.id.clone()];
    while let Some(id) = stack.pop() {
        if !seen.insert(id.clone()) {
            continue;
        }
        let Some(node) = find(nodes, &id) else {
            continue;
        };
        if node.kind == kind {
            out.push(id);
        }
        for child in node.children.iter().rev() {
            stack.push(child.clone());
        }
    }
    out
}

/// Ancestor ids from the Root down to (not including) `id`.
///
/// Parent pointers are mutable data, so the walk carries a visited-set cycle
/// guard and the known maximum story depth as a hard bound.
pub fn ancestry(nodes: &[Node], id: &str) -> Vec<NodeId> {
    let mut chain = Vec::new();
    let mut seen = BTreeSet::new();
    let mut current = find(nodes, id).and_then(|n| n.parent.clone());

    while let Some(pid) = current {
        if !seen.insert(pid.clone()) || chain.len() >= MAX_STORY_DEPTH {
            tracing::warn!(node = %id, "ancestry walk hit a cycle or depth bound");
            break;
        }
        chain.push(pid.clone());
        current = find(nodes, &pid).and_then(|n| n.parent.clone());
    }

    chain.reverse();
    chain
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_with_three_plots() -> (Vec<Node>, String, Vec<String>) {
        let root = Node::root("Book", "premise");
        let mut outline = Node::new(NodeKind::Outline, "Volume I");
        outline.summary = "arc".into();
        let root_id = root.id.clone();
        let outline_id = outline.id.clone();

        let mut nodes = vec![root];
        outline.parent = Some(root_id.clone());
        nodes.iter_mut().find(|n| n.id == root_id).unwrap().children.push(outline_id.clone());
        nodes.push(outline);

        let mut plot_ids = Vec::new();
        for i in 0..3 {
            let plot = Node::new(NodeKind::Plot, format!("Plot {}", i + 1));
            plot_ids.push(plot.id.clone());
            attach(&mut nodes, &outline_id, None, plot);
        }
        (nodes, outline_id, plot_ids)
    }

    #[test]
    fn attach_appends_and_chains_prev() {
        let (nodes, outline_id, plot_ids) = tree_with_three_plots();
        let outline = find(&nodes, &outline_id).unwrap();
        assert_eq!(outline.children, plot_ids);

        assert_eq!(find(&nodes, &plot_ids[0]).unwrap().prev_node, None);
        assert_eq!(
            find(&nodes, &plot_ids[1]).unwrap().prev_node.as_deref(),
            Some(plot_ids[0].as_str())
        );
        assert_eq!(
            find(&nodes, &plot_ids[2]).unwrap().prev_node.as_deref(),
            Some(plot_ids[1].as_str())
        );
    }

    #[test]
    fn attach_after_splices_chain_and_order() {
        let (mut nodes, outline_id, plot_ids) = tree_with_three_plots();
        let inserted = Node::new(NodeKind::Plot, "Interlude");
        let inserted_id = inserted.id.clone();
        attach(&mut nodes, &outline_id, Some(&plot_ids[0]), inserted);

        let outline = find(&nodes, &outline_id).unwrap();
        assert_eq!(outline.children[0], plot_ids[0]);
        assert_eq!(outline.children[1], inserted_id);
        assert_eq!(outline.children[2], plot_ids[1]);

        assert_eq!(
            find(&nodes, &inserted_id).unwrap().prev_node.as_deref(),
            Some(plot_ids[0].as_str())
        );
        assert_eq!(
            find(&nodes, &plot_ids[1]).unwrap().prev_node.as_deref(),
            Some(inserted_id.as_str())
        );
    }

    #[test]
    fn attach_clears_collapsed_flag() {
        let (mut nodes, outline_id, _) = tree_with_three_plots();
        nodes.iter_mut().find(|n| n.id == outline_id).unwrap().collapsed = true;
        attach(&mut nodes, &outline_id, None, Node::new(NodeKind::Plot, "More"));
        assert!(!find(&nodes, &outline_id).unwrap().collapsed);
    }

    #[test]
    fn detach_relinks_chain_and_strips_parent() {
        let (mut nodes, outline_id, plot_ids) = tree_with_three_plots();
        detach(&mut nodes, &plot_ids[1]);

        assert!(find(&nodes, &plot_ids[1]).is_none());
        let outline = find(&nodes, &outline_id).unwrap();
        assert!(!outline.children.contains(&plot_ids[1]));
        assert_eq!(
            find(&nodes, &plot_ids[2]).unwrap().prev_node.as_deref(),
            Some(plot_ids[0].as_str())
        );
    }

    #[test]
    fn detach_first_node_leaves_successor_unchained() {
        let (mut nodes, _, plot_ids) = tree_with_three_plots();
        detach(&mut nodes, &plot_ids[0]);
        assert_eq!(find(&nodes, &plot_ids[1]).unwrap().prev_node, None);
    }

    #[test]
    fn detach_removes_descendants() {
        let (mut nodes, _, plot_ids) = tree_with_three_plots();
        let chapter = Node::new(NodeKind::Chapter, "Ch 1");
        let chapter_id = chapter.id.clone();
        attach(&mut nodes, &plot_ids[0], None, chapter);

        detach(&mut nodes, &plot_ids[0]);
        assert!(find(&nodes, &chapter_id).is_none());
    }

    #[test]
    fn ancestry_walks_root_down_to_parent() {
        let (mut nodes, _, plot_ids) = tree_with_three_plots();
        let chapter = Node::new(NodeKind::Chapter, "Ch 1");
        let chapter_id = chapter.id.clone();
        attach(&mut nodes, &plot_ids[0], None, chapter);

        let chain = ancestry(&nodes, &chapter_id);
        assert_eq!(chain.len(), 3);
        assert_eq!(find(&nodes, &chain[0]).unwrap().kind, NodeKind::Root);
        assert_eq!(find(&nodes, &chain[1]).unwrap().kind, NodeKind::Outline);
        assert_eq!(find(&nodes, &chain[2]).unwrap().kind, NodeKind::Plot);
    }

    #[test]
    fn ancestry_survives_a_parent_cycle() {
        let (mut nodes, outline_id, plot_ids) = tree_with_three_plots();
        // Corrupt the tree: outline's parent points at its own child.
        nodes.iter_mut().find(|n| n.id == outline_id).unwrap().parent =
            Some(plot_ids[0].clone());
        let chain = ancestry(&nodes, &plot_ids[0]);
        assert!(chain.len() <= MAX_STORY_DEPTH);
    }

    #[test]
    fn story_order_is_preorder_by_children() {
        let (mut nodes, _, plot_ids) = tree_with_three_plots();
        let ch_a = Node::new(NodeKind::Chapter, "A");
        let ch_b = Node::new(NodeKind::Chapter, "B");
        let (a_id, b_id) = (ch_a.id.clone(), ch_b.id.clone());
        attach(&mut nodes, &plot_ids[0], None, ch_a);
        attach(&mut nodes, &plot_ids[1], None, ch_b);

        assert_eq!(story_order(&nodes, NodeKind::Plot), plot_ids);
        assert_eq!(story_order(&nodes, NodeKind::Chapter), vec![a_id, b_id]);
        assert!(story_order(&nodes, NodeKind::Character).is_empty());
    }

    #[test]
    fn effective_text_prefers_prose_for_chapters() {
        let mut chapter = Node::new(NodeKind::Chapter, "Ch 1");
        chapter.summary = "outline".into();
        assert_eq!(chapter.effective_text(), "outline");
        chapter.content = "prose".into();
        assert_eq!(chapter.effective_text(), "prose");

        let outline = Node::new(NodeKind::Outline, "V1").with_summary("arc");
        assert_eq!(outline.effective_text(), "arc");
    }
}
