use crate::Cli;
use anyhow::{Context, Result};
use quill::config::QuillToml;
use quill::node::Node;
use quill::store::FileStore;

pub fn cmd_init(cli: &Cli, title: &str, premise: &str) -> Result<()> {
    let root = Node::root(title, premise);
    FileStore::create(&cli.tree, vec![root])
        .with_context(|| format!("failed to create tree at {}", cli.tree.display()))?;

    if !cli.config.exists() {
        let defaults = toml::to_string_pretty(&QuillToml::default())
            .context("failed to serialize default config")?;
        std::fs::write(&cli.config, defaults)
            .with_context(|| format!("failed to write {}", cli.config.display()))?;
    }

    println!(
        "Initialized quill project: tree at {}, config at {}",
        cli.tree.display(),
        cli.config.display()
    );
    println!("Set [backend].endpoint in the config, then run `quill run`.");
    Ok(())
}
