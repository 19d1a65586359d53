//! Tree command - print the mirrored structure of a data source

use anyhow::{Context, Result};
use clap::Args;
use metamirror_config::MirrorConfig;
use metamirror_core::metadata::{MetadataTree, TABLE_TYPE_PROPERTY};
use metamirror_core::NodeKind;
use serde_json::json;
use uuid::Uuid;

use super::{open_mirror, print_info};
use crate::GlobalOptions;

#[derive(Args, Debug)]
pub struct TreeArgs {
    /// Configured data source name or `sqlite:` URL
    source: String,

    /// Stop descending below this depth (the database is depth 0)
    #[arg(long, short = 'd')]
    depth: Option<usize>,

    /// Output as JSON
    #[arg(long)]
    json: bool,
}

pub fn execute(args: TreeArgs, config: &MirrorConfig, global: GlobalOptions) -> Result<()> {
    let (mut mirror, db) = open_mirror(config, &args.source)?;

    if args.json {
        let tree = to_json(&mut mirror, db, 0, args.depth)?;
        println!("{}", serde_json::to_string_pretty(&tree)?);
        return Ok(());
    }

    let mut lines = Vec::new();
    render(&mut mirror, db, 0, args.depth, &mut lines)?;
    for line in &lines {
        println!("{line}");
    }

    let objects = lines.len().saturating_sub(1);
    if let Some(term) = mirror.catalog_term(db)? {
        print_info(&format!("\nCatalog term: {term}"), global.quiet);
    }
    if let Some(term) = mirror.schema_term(db)? {
        print_info(&format!("Schema term: {term}"), global.quiet);
    }
    print_info(&format!("{objects} objects below the database"), global.quiet);
    Ok(())
}

fn label(mirror: &MetadataTree, uuid: Uuid) -> Result<String> {
    let node = mirror.node(uuid)?;
    let mut label = format!("{} [{}]", node.name(), node.kind());
    if *node.kind() == NodeKind::Table {
        if let Some(table_type) = node
            .property(TABLE_TYPE_PROPERTY)
            .and_then(|v| v.as_text())
            .filter(|t| *t != "TABLE")
        {
            label.push_str(&format!(" ({})", table_type.to_lowercase()));
        }
    }
    Ok(label)
}

fn render(
    mirror: &mut MetadataTree,
    uuid: Uuid,
    depth: usize,
    max_depth: Option<usize>,
    lines: &mut Vec<String>,
) -> Result<()> {
    lines.push(format!("{}{}", "  ".repeat(depth), label(mirror, uuid)?));
    if max_depth.is_some_and(|max| depth >= max) {
        return Ok(());
    }

    let name = mirror.node(uuid)?.name().to_string();
    let children = mirror
        .children(uuid)
        .with_context(|| format!("Failed to read children of '{name}'"))?;
    for child in children {
        render(mirror, child, depth + 1, max_depth, lines)?;
    }
    Ok(())
}

fn to_json(
    mirror: &mut MetadataTree,
    uuid: Uuid,
    depth: usize,
    max_depth: Option<usize>,
) -> Result<serde_json::Value> {
    let node = mirror.node(uuid)?;
    let mut value = json!({
        "name": node.name(),
        "kind": node.kind().as_str(),
    });
    if let Some(table_type) = node.property(TABLE_TYPE_PROPERTY).and_then(|v| v.as_text()) {
        value["table_type"] = json!(table_type);
    }
    if max_depth.is_some_and(|max| depth >= max) {
        return Ok(value);
    }

    let name = node.name().to_string();
    let children = mirror
        .children(uuid)
        .with_context(|| format!("Failed to read children of '{name}'"))?;
    if !children.is_empty() {
        let mut rendered = Vec::with_capacity(children.len());
        for child in children {
            rendered.push(to_json(mirror, child, depth + 1, max_depth)?);
        }
        value["children"] = serde_json::Value::Array(rendered);
    }
    Ok(value)
}
