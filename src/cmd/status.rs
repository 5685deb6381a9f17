//! Progress inspection — `quill status`.

use crate::Cli;
use anyhow::{Context, Result};
use console::style;
use quill::node::{self, NodeKind};
use quill::progress::PhaseKey;
use quill::store::{FileStore, NodeStore};

pub async fn cmd_status(cli: &Cli) -> Result<()> {
    let store = FileStore::open(&cli.tree)
        .with_context(|| format!("no tree at {}", cli.tree.display()))?;
    let snapshot = store.snapshot().await?;

    let story_kinds = [
        NodeKind::Root,
        NodeKind::Outline,
        NodeKind::Plot,
        NodeKind::Chapter,
    ];
    for kind in story_kinds {
        let ids = node::story_order(&snapshot, kind);
        if ids.is_empty() {
            continue;
        }
        println!("{}", style(format!("{}s ({})", kind.label(), ids.len())).bold());
        for id in ids {
            let Some(n) = node::find(&snapshot, &id) else { continue };
            let flags: String = PhaseKey::ALL
                .iter()
                .filter(|key| n.phase_state(**key).is_done())
                .map(|key| key.as_str())
                .collect::<Vec<_>>()
                .join(", ");
            let flags = if flags.is_empty() {
                style("untouched").dim().to_string()
            } else {
                flags
            };
            println!("  {} — {}", n.title, flags);
        }
    }

    let resources: Vec<_> = snapshot.iter().filter(|n| n.kind.is_resource()).collect();
    if !resources.is_empty() {
        println!("{}", style(format!("resources ({})", resources.len())).bold());
        for r in resources {
            println!("  {} ({})", r.title, r.kind.label());
        }
    }
    Ok(())
}
