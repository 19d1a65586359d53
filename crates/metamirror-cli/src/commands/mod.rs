//! CLI command implementations

pub mod components;
pub mod config;
pub mod snapshot;
pub mod tree;

use std::sync::Arc;

use anyhow::{Context, Result};
use metamirror_config::{ConfigLoader, MirrorConfig};
use metamirror_core::metadata::{
    DataSourceParams, MetadataTree, PoolSettings, SqliteConnectionFactory, SQLITE_SCHEME,
};
use tracing::debug;
use uuid::Uuid;

use crate::GlobalOptions;

/// Load configuration, from `--config` when given, else global → local.
pub fn load_config(global: &GlobalOptions) -> Result<MirrorConfig> {
    let overrides = global.to_config_overrides();
    let mut loader = ConfigLoader::new();

    if let Some(ref config_path) = global.config {
        return loader
            .load_file(config_path, Some(&overrides))
            .with_context(|| format!("Failed to load config file {}", config_path.display()));
    }

    let root = std::env::current_dir().context("Failed to get current directory")?;
    loader
        .load(&root, Some(&overrides))
        .context("Failed to load configuration")
}

/// Resolve `source` to connection parameters.
///
/// A `sqlite:` URL is used as is; anything else must name a configured
/// data source.
pub fn resolve_source(config: &MirrorConfig, source: &str) -> Result<DataSourceParams> {
    if source.starts_with(SQLITE_SCHEME) {
        return Ok(DataSourceParams::new(source, source));
    }
    let configured = config.data_source(source).with_context(|| {
        format!("'{source}' is neither a configured data source nor a {SQLITE_SCHEME} URL")
    })?;
    Ok(DataSourceParams::from_config(source, configured))
}

/// Build a mirror holding one database for `source`.
pub fn open_mirror(config: &MirrorConfig, source: &str) -> Result<(MetadataTree, Uuid)> {
    let params = resolve_source(config, source)?;
    debug!(data_source = ?params, "Opening mirror");

    let mut mirror = MetadataTree::new();
    let db = mirror
        .add_database(
            params,
            Arc::new(SqliteConnectionFactory),
            PoolSettings::from(&config.pool),
        )
        .context("Failed to add database to mirror")?;
    Ok((mirror, db))
}

/// Print an info message to stderr (respects quiet flag).
pub fn print_info(message: &str, quiet: bool) {
    if !quiet {
        eprintln!("{}", message);
    }
}
