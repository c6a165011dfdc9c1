//! Itemsync CLI - Inspect item dumps and manage `itemsync.toml`

mod commands;

use clap::{Parser, Subcommand, ValueEnum};
use itemsync::{config, ui};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "itemsync")]
#[command(version)]
#[command(about = "Storage-agnostic item reconciliation - inspect dumps and configure persisters")]
#[command(long_about = r#"
Itemsync reconciles relation-rich records with a storage backend:
  • Look items up through getters, create them through creators
  • Merge duplicate items and keep cross-references consistent
  • Prune rows a sync run no longer produced

Example usage:
  itemsync init
  itemsync inspect items.json
  itemsync inspect items.json --format json
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Table,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Summarize an item dump file
    Inspect {
        /// Dump file written by `ItemGraph::dump`
        path: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: OutputFormat,
    },

    /// Write a default config file
    Init {
        /// Overwrite an existing config
        #[arg(short, long)]
        force: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let loaded = config::load_config(cli.config.as_deref())?;

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        match loaded.as_ref().and_then(|c| c.log.filter.as_deref()) {
            Some(directives) => EnvFilter::try_new(directives)?,
            None => EnvFilter::new("info"),
        }
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    let result = match cli.command {
        Commands::Inspect { path, format } => commands::run_inspect(&path, format),
        Commands::Init { force } => {
            let path = cli.config.unwrap_or_else(config::default_config_path);
            commands::run_init(&path, force)
        }
    };
    if let Err(err) = result {
        ui::error(&format!("{:#}", err));
        std::process::exit(1);
    }
    Ok(())
}
