//! Snapshot command - persist a mirrored data source into a SQLite sink
//!
//! Attaches the change-capture listener to the database node before
//! anything is fetched, so the sink receives the database itself and then
//! every catalog, schema and table as population discovers them.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use metamirror_config::MirrorConfig;
use metamirror_core::persist::{PersisterListener, SqlitePersister};
use serde_json::json;
use tracing::info;

use super::{open_mirror, print_info};
use crate::GlobalOptions;

#[derive(Args, Debug)]
pub struct SnapshotArgs {
    /// Configured data source name or `sqlite:` URL
    source: String,

    /// Sink file (default: `persistence.sink_path` from config)
    #[arg(long, short = 's')]
    sink: Option<PathBuf>,

    /// Replace an existing sink file
    #[arg(long, short = 'f')]
    force: bool,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

pub fn execute(args: SnapshotArgs, config: &MirrorConfig, global: GlobalOptions) -> Result<()> {
    let sink_path = match args.sink {
        Some(path) => path,
        None => {
            let root = std::env::current_dir().context("Failed to get current directory")?;
            config.sink_path(&root)
        }
    };

    if sink_path.exists() {
        if !args.force {
            anyhow::bail!(
                "Sink {} already exists (use --force to replace it)",
                sink_path.display()
            );
        }
        std::fs::remove_file(&sink_path)
            .with_context(|| format!("Failed to remove {}", sink_path.display()))?;
    }

    let (mut mirror, db) = open_mirror(config, &args.source)?;
    let sink = SqlitePersister::open(&sink_path)
        .with_context(|| format!("Failed to open sink {}", sink_path.display()))?;
    mirror
        .tree_mut()
        .attach_listener(db, Box::new(PersisterListener::new(sink)))
        .context("Failed to attach persister")?;

    print_info(
        &format!("Snapshotting '{}' into {}", args.source, sink_path.display()),
        global.quiet,
    );
    let tables = mirror
        .tables(db)
        .with_context(|| format!("Failed to mirror '{}'", args.source))?;
    mirror.disconnect(db)?;

    let reader = SqlitePersister::open(&sink_path).context("Failed to reopen sink")?;
    let objects = reader.object_count()?;
    let properties = reader.property_count()?;
    info!(objects, properties, tables = tables.len(), "Snapshot complete");

    if args.json {
        let summary = json!({
            "sink": sink_path.display().to_string(),
            "objects": objects,
            "properties": properties,
            "tables": tables.len(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!(
            "Persisted {objects} objects and {properties} properties ({} tables) to {}",
            tables.len(),
            sink_path.display()
        );
    }
    Ok(())
}
