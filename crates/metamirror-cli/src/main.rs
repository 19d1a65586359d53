//! metamirror CLI - Database metadata mirroring
//!
//! A command-line interface for browsing the catalog/schema/table structure
//! of configured data sources, snapshotting it into a SQLite sink, and
//! grouping tables by their foreign keys.
//!
//! # Usage
//!
//! ```bash
//! # Print the structure of a configured data source
//! metamirror tree shop
//!
//! # Or of a SQLite file directly
//! metamirror tree sqlite:./shop.db
//!
//! # Persist the mirrored structure
//! metamirror snapshot shop --sink shop-mirror.db
//!
//! # Show independent clusters of related tables
//! metamirror components shop
//!
//! # Register a data source in .metamirror/config.toml
//! metamirror config set data_sources.shop.url sqlite:./shop.db
//! ```

use std::path::PathBuf;
use std::str::FromStr;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use metamirror_config::{ConfigOverrides, ExhaustionMode, LogFormat, MirrorConfig};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod commands;

/// metamirror - Mirror database metadata into an observable tree
#[derive(Parser, Debug)]
#[command(name = "metamirror")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[command(flatten)]
    global: GlobalOptions,
}

/// Global options available to all commands
#[derive(Args, Debug, Clone)]
struct GlobalOptions {
    /// Path to configuration file (skips global and local config)
    #[arg(long, short = 'c', global = true, env = "METAMIRROR_CONFIG")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(long, short = 'v', global = true)]
    verbose: bool,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    quiet: bool,

    /// Maximum simultaneously borrowed connections per data source
    #[arg(long, global = true, env = "METAMIRROR_MAX_ACTIVE")]
    max_active: Option<usize>,

    /// Pool exhaustion behaviour (fail, block)
    #[arg(long, global = true, value_parser = parse_exhaustion)]
    exhaustion: Option<ExhaustionMode>,
}

fn parse_exhaustion(s: &str) -> Result<ExhaustionMode, String> {
    s.parse()
        .map_err(|e: metamirror_config::ConfigError| e.to_string())
}

impl GlobalOptions {
    /// Convert global options to config overrides
    pub fn to_config_overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            max_active: self.max_active,
            exhaustion: self.exhaustion,
            ..Default::default()
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the mirrored catalog/schema/table tree of a data source
    Tree(commands::tree::TreeArgs),

    /// Persist the mirrored tree of a data source into a SQLite sink
    Snapshot(commands::snapshot::SnapshotArgs),

    /// Group tables into clusters connected by foreign keys
    Components(commands::components::ComponentsArgs),

    /// View and manage configuration
    #[command(subcommand)]
    Config(commands::config::ConfigCommand),
}

fn init_logging(global: &GlobalOptions, config: &MirrorConfig) -> Result<()> {
    let log_level = if global.quiet {
        Level::ERROR
    } else if global.verbose {
        Level::DEBUG
    } else {
        Level::from_str(&config.logging.level).unwrap_or(Level::INFO)
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_ansi(true);
    match config.logging.format {
        LogFormat::Text => tracing::subscriber::set_global_default(builder.finish())?,
        LogFormat::Compact => {
            tracing::subscriber::set_global_default(builder.compact().finish())?
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = commands::load_config(&cli.global)?;
    init_logging(&cli.global, &config)?;

    match cli.command {
        Commands::Tree(args) => commands::tree::execute(args, &config, cli.global),
        Commands::Snapshot(args) => commands::snapshot::execute(args, &config, cli.global),
        Commands::Components(args) => commands::components::execute(args, &config, cli.global),
        Commands::Config(cmd) => commands::config::execute(cmd, &config, cli.global),
    }
}
