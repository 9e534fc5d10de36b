//! Folio CLI - build and publish mdBook documentation sites.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, EnvFilter};

mod commands;
mod config;

#[derive(Parser)]
#[command(name = "folio")]
#[command(about = "Build and publish mdBook documentation sites")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to folio.toml config file
    #[arg(short, long, default_value = "folio.toml")]
    config: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Scaffold folio.toml, .env and assets/ in the current directory
    Init {
        /// Overwrite existing files
        #[arg(short, long)]
        yes: bool,
    },

    /// Build the site into a deployable artifact
    Build {
        /// Repository root
        #[arg(short, long, default_value = ".")]
        root: PathBuf,

        /// Output directory (defaults to config or "book")
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Publish a previously built artifact
    Deploy {
        /// Artifact manifest written by `folio build`
        #[arg(short, long)]
        manifest: PathBuf,

        /// Repository root
        #[arg(short, long, default_value = ".")]
        root: PathBuf,
    },

    /// Run the full pipeline for one trigger event
    Run {
        /// Triggering event
        #[arg(short, long, value_enum)]
        event: Event,

        /// Pushed branch (push events)
        #[arg(short, long)]
        branch: Option<String>,

        /// Pull request number (pull-request events)
        #[arg(short, long)]
        number: Option<u64>,

        /// Repository root
        #[arg(short, long, default_value = ".")]
        root: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum Event {
    Push,
    PullRequest,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    fmt().with_env_filter(filter).with_target(false).init();

    match cli.command {
        Commands::Init { yes } => {
            commands::init::run(yes).await?;
        }
        Commands::Build { root, output } => {
            commands::build::run(&cli.config, root, output).await?;
        }
        Commands::Deploy { manifest, root } => {
            commands::deploy::run(&cli.config, root, manifest).await?;
        }
        Commands::Run {
            event,
            branch,
            number,
            root,
        } => {
            commands::run::run(&cli.config, root, event, branch, number).await?;
        }
    }

    Ok(())
}
