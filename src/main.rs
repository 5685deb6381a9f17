use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod cmd;

#[derive(Parser)]
#[command(name = "quill")]
#[command(version, about = "AI-powered novel drafting orchestrator")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the configuration file.
    #[arg(long, global = true, default_value = "quill.toml")]
    pub config: PathBuf,

    /// Path to the tree snapshot file.
    #[arg(long, global = true, default_value = "tree.json")]
    pub tree: PathBuf,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a project: tree file with a root premise, default config
    Init {
        /// Working title of the book
        title: String,
        /// Premise / world bible for the root node
        #[arg(long)]
        premise: String,
    },
    /// Run the drafting pipeline to the configured target depth
    Run {
        /// Override target depth: outline | plot | chapter | prose
        #[arg(long)]
        depth: Option<String>,
        /// Mirror the run log to a JSON-lines file
        #[arg(long)]
        log_file: Option<PathBuf>,
    },
    /// Show per-node progress flags
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Init { title, premise } => cmd::project::cmd_init(&cli, title, premise),
        Commands::Run { depth, log_file } => {
            cmd::run::cmd_run(&cli, depth.as_deref(), log_file.as_deref()).await
        }
        Commands::Status => cmd::status::cmd_status(&cli).await,
    }
}
