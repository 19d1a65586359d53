//! Table relationship graph built from foreign keys.

use std::collections::HashMap;

use petgraph::graph::{NodeIndex, UnGraph};
use tracing::debug;
use uuid::Uuid;

use super::source::ForeignKeyInfo;
use super::{MetadataError, MetadataTree};
use crate::graph::GraphModel;
use crate::tree::NodeKind;

/// Undirected graph of a database's tables, linked by foreign keys.
///
/// Only keys whose referenced table lives in the same container as the
/// referencing table are linked.
#[derive(Debug, Default)]
pub struct TableGraph {
    graph: UnGraph<Uuid, ForeignKeyInfo>,
    indices: HashMap<Uuid, NodeIndex>,
    names: HashMap<Uuid, String>,
}

impl TableGraph {
    /// Populate every table of `db` and link them through their imported keys
    pub fn build(mirror: &mut MetadataTree, db: Uuid) -> Result<Self, MetadataError> {
        let tables = mirror.tables(db)?;
        let mut table_graph = Self::default();
        for table in &tables {
            let name = mirror.node(*table)?.name().to_string();
            let index = table_graph.graph.add_node(*table);
            table_graph.indices.insert(*table, index);
            table_graph.names.insert(*table, name);
        }

        let conn = mirror.get_connection(db)?;
        let md = conn.metadata()?;
        for table in &tables {
            let (catalog, schema) = mirror.container_path(*table);
            let name = &table_graph.names[table];
            let keys = md.fetch_imported_keys(catalog.as_deref(), schema.as_deref(), name)?;
            let siblings = mirror
                .node(*table)?
                .parent()
                .map(|parent| mirror.tree().children(parent))
                .transpose()?
                .unwrap_or_default();

            for key in keys {
                let target = siblings.iter().copied().find(|s| {
                    mirror.tree().get(*s).is_some_and(|n| {
                        *n.kind() == NodeKind::Table && n.name_matches(&key.referenced_table)
                    })
                });
                match target.and_then(|t| table_graph.indices.get(&t)) {
                    Some(to) => {
                        let from = table_graph.indices[table];
                        table_graph.graph.add_edge(from, *to, key);
                    }
                    None => debug!(
                        table = %name,
                        referenced = %key.referenced_table,
                        "Skipping foreign key to unknown table"
                    ),
                }
            }
        }
        Ok(table_graph)
    }

    pub fn table_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn relationship_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn table_name(&self, table: Uuid) -> Option<&str> {
        self.names.get(&table).map(String::as_str)
    }

    /// Foreign keys touching `table`, in either direction
    pub fn relationships(&self, table: Uuid) -> Vec<&ForeignKeyInfo> {
        let Some(index) = self.indices.get(&table) else {
            return Vec::new();
        };
        self.graph.edges(*index).map(|e| e.weight()).collect()
    }
}

impl GraphModel for TableGraph {
    type Node = Uuid;

    fn nodes(&self) -> Vec<Uuid> {
        self.graph.node_weights().copied().collect()
    }

    fn adjacent(&self, node: &Uuid) -> Vec<Uuid> {
        self.indices
            .get(node)
            .map(|index| {
                self.graph
                    .neighbors(*index)
                    .map(|n| self.graph[n])
                    .collect()
            })
            .unwrap_or_default()
    }
}
