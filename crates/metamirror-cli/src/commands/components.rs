//! Components command - clusters of tables linked by foreign keys

use anyhow::{Context, Result};
use clap::Args;
use metamirror_config::MirrorConfig;
use metamirror_core::{find_connected_components, TableGraph};
use serde_json::json;

use super::{open_mirror, print_info};
use crate::GlobalOptions;

#[derive(Args, Debug)]
pub struct ComponentsArgs {
    /// Configured data source name or `sqlite:` URL
    source: String,

    /// Show only clusters with at least this many tables
    #[arg(long, default_value = "1")]
    min_size: usize,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

pub fn execute(args: ComponentsArgs, config: &MirrorConfig, global: GlobalOptions) -> Result<()> {
    let (mut mirror, db) = open_mirror(config, &args.source)?;
    let graph = TableGraph::build(&mut mirror, db)
        .with_context(|| format!("Failed to read relationships of '{}'", args.source))?;

    // Largest first, then alphabetical by first table
    let mut clusters: Vec<Vec<String>> = find_connected_components(&graph)
        .into_iter()
        .map(|component| {
            let mut names: Vec<String> = component
                .iter()
                .filter_map(|table| graph.table_name(*table))
                .map(str::to_string)
                .collect();
            names.sort();
            names
        })
        .filter(|names| names.len() >= args.min_size)
        .collect();
    clusters.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));

    if args.json {
        let output: Vec<_> = clusters
            .iter()
            .map(|tables| json!({ "size": tables.len(), "tables": tables }))
            .collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if clusters.is_empty() {
        print_info("No tables found.", global.quiet);
        return Ok(());
    }

    print_info(
        &format!(
            "Found {} clusters across {} tables and {} relationships:\n",
            clusters.len(),
            graph.table_count(),
            graph.relationship_count()
        ),
        global.quiet,
    );
    for (i, tables) in clusters.iter().enumerate() {
        println!("  {}. {}", i + 1, tables.join(", "));
    }
    Ok(())
}
