//! Node records stored in the tree arena.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::event::ListenerId;
use crate::value::Value;

/// Variant of a node in the object tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// Top-level container owning databases
    Root,
    Database,
    Catalog,
    Schema,
    Table,
    /// Application-defined node type
    Custom(String),
}

impl NodeKind {
    /// Type name sent to persistence sinks
    pub fn as_str(&self) -> &str {
        match self {
            NodeKind::Root => "Root",
            NodeKind::Database => "Database",
            NodeKind::Catalog => "Catalog",
            NodeKind::Schema => "Schema",
            NodeKind::Table => "Table",
            NodeKind::Custom(name) => name,
        }
    }

    /// Whether children of this kind are fetched from a metadata source
    pub fn is_source_container(&self) -> bool {
        matches!(self, NodeKind::Database | NodeKind::Catalog | NodeKind::Schema)
    }
}

impl std::fmt::Display for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Population state of a node whose children come from an external source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PopulationState {
    Unpopulated,
    Populating,
    Populated,
}

/// A single node in the arena.
#[derive(Debug, Clone)]
pub struct Node {
    uuid: Uuid,
    kind: NodeKind,
    name: String,
    pub(crate) parent: Option<Uuid>,
    pub(crate) children: Vec<Uuid>,
    pub(crate) properties: BTreeMap<String, Value>,
    pub(crate) population: PopulationState,
    pub(crate) listeners: BTreeSet<ListenerId>,
    /// Properties only the owning container may change
    pub(crate) reserved: BTreeSet<String>,
    /// Detached only by the owning container
    pub(crate) pinned: bool,
}

impl Node {
    /// Create a populated node (synthetic nodes are born populated)
    pub fn new(kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            kind,
            name: name.into(),
            parent: None,
            children: Vec::new(),
            properties: BTreeMap::new(),
            population: PopulationState::Populated,
            listeners: BTreeSet::new(),
            reserved: BTreeSet::new(),
            pinned: false,
        }
    }

    /// Create a node whose children will be populated on first read
    pub fn unpopulated(kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            population: PopulationState::Unpopulated,
            ..Self::new(kind, name)
        }
    }

    /// Set a property before the node is attached (fires no events)
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    pub(crate) fn reserving(mut self, properties: &[&str]) -> Self {
        self.reserved
            .extend(properties.iter().map(|p| p.to_string()));
        self
    }

    pub(crate) fn pinned(mut self) -> Self {
        self.pinned = true;
        self
    }

    pub fn is_pinned(&self) -> bool {
        self.pinned
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn set_name_raw(&mut self, name: String) {
        self.name = name;
    }

    pub fn parent(&self) -> Option<Uuid> {
        self.parent
    }

    /// Children in order, without triggering population
    pub fn children(&self) -> &[Uuid] {
        &self.children
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }

    /// Properties in name order
    pub fn properties(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.properties.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn population(&self) -> PopulationState {
        self.population
    }

    pub fn is_populated(&self) -> bool {
        self.population == PopulationState::Populated
    }

    /// Listeners registered on this node
    pub fn listeners(&self) -> impl Iterator<Item = ListenerId> + '_ {
        self.listeners.iter().copied()
    }

    /// Case-insensitive name comparison used by all lookups
    pub fn name_matches(&self, name: &str) -> bool {
        self.name.to_lowercase() == name.to_lowercase()
    }
}
