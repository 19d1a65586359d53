//! Object Tree
//!
//! Arena-backed hierarchical object graph with change notification.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │                  ObjectTree                  │
//! │  ┌───────────────┐   ┌────────────────────┐  │
//! │  │   NodeArena   │   │ Listener registry  │  │
//! │  │ Uuid → Node   │   │ ListenerId → Box<> │  │
//! │  └───────────────┘   └────────────────────┘  │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! Nodes are owned by the arena and linked by UUID. A node's parent is a
//! lookup key, never an owning reference. Each node records the ids of the
//! listeners registered on it; the listeners themselves live in the tree's
//! registry, so dispatch can lend them a read-only view of the arena.

mod event;
mod node;
mod recorder;

pub use event::{ListenerError, ListenerId, PropertyChange, TreeEvent, TreeListener};
pub use node::{Node, NodeKind, PopulationState};
pub use recorder::EventRecorder;

use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::value::Value;

/// Property name under which node renames are reported
pub const NAME_PROPERTY: &str = "name";

/// Errors from tree mutation
#[derive(Debug, Error)]
pub enum TreeError {
    #[error("Node not found: {0}")]
    NotFound(Uuid),

    #[error("Node {child} is not a child of {parent}")]
    NotAChild { parent: Uuid, child: Uuid },

    #[error("Node {0} already has a parent")]
    AlreadyAttached(Uuid),

    #[error("Adding {child} under {parent} would create a cycle")]
    Cycle { parent: Uuid, child: Uuid },

    #[error("Index {index} out of bounds for {len} children")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("Property '{0}' is reserved")]
    ReservedProperty(String),

    #[error("Node {0} is pinned to its parent")]
    Pinned(Uuid),

    #[error("{listener} failed: {source}")]
    Listener {
        listener: ListenerId,
        #[source]
        source: ListenerError,
    },
}

// ============================================================================
// Arena
// ============================================================================

/// UUID-keyed node storage.
#[derive(Debug, Default)]
pub struct NodeArena {
    nodes: HashMap<Uuid, Node>,
}

impl NodeArena {
    pub fn get(&self, uuid: Uuid) -> Option<&Node> {
        self.nodes.get(&uuid)
    }

    pub(crate) fn get_mut(&mut self, uuid: Uuid) -> Option<&mut Node> {
        self.nodes.get_mut(&uuid)
    }

    pub fn contains(&self, uuid: Uuid) -> bool {
        self.nodes.contains_key(&uuid)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Position of a node within its parent's children
    pub fn index_in_parent(&self, uuid: Uuid) -> Option<usize> {
        let parent = self.get(uuid)?.parent?;
        self.get(parent)?.children.iter().position(|c| *c == uuid)
    }

    /// Pre-order walk of the subtree rooted at `root`, siblings in index order
    pub fn subtree(&self, root: Uuid) -> Vec<Uuid> {
        let mut out = Vec::new();
        let mut stack = vec![root];
        while let Some(uuid) = stack.pop() {
            if let Some(node) = self.get(uuid) {
                out.push(uuid);
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    /// Nearest ancestor (or self) of the given kind
    pub fn find_ancestor(&self, uuid: Uuid, kind: &NodeKind) -> Option<Uuid> {
        let mut current = Some(uuid);
        while let Some(id) = current {
            let node = self.get(id)?;
            if node.kind() == kind {
                return Some(id);
            }
            current = node.parent;
        }
        None
    }

    fn is_ancestor_or_self(&self, ancestor: Uuid, uuid: Uuid) -> bool {
        let mut current = Some(uuid);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.get(id).and_then(|n| n.parent);
        }
        false
    }

    fn insert(&mut self, node: Node) -> Uuid {
        let uuid = node.uuid();
        self.nodes.insert(uuid, node);
        uuid
    }

    fn remove_subtree(&mut self, root: Uuid) {
        for uuid in self.subtree(root) {
            self.nodes.remove(&uuid);
        }
    }
}

// ============================================================================
// Tree
// ============================================================================

/// Hierarchical object graph with listener dispatch.
pub struct ObjectTree {
    nodes: NodeArena,
    listeners: HashMap<ListenerId, Box<dyn TreeListener>>,
    next_listener: u64,
    root: Uuid,
}

impl Default for ObjectTree {
    fn default() -> Self {
        Self::new()
    }
}

impl ObjectTree {
    /// Create a tree containing a single root node
    pub fn new() -> Self {
        let mut nodes = NodeArena::default();
        let root = nodes.insert(Node::new(NodeKind::Root, "root"));
        Self {
            nodes,
            listeners: HashMap::new(),
            next_listener: 0,
            root,
        }
    }

    pub fn root(&self) -> Uuid {
        self.root
    }

    pub fn nodes(&self) -> &NodeArena {
        &self.nodes
    }

    pub fn get(&self, uuid: Uuid) -> Option<&Node> {
        self.nodes.get(uuid)
    }

    fn node(&self, uuid: Uuid) -> Result<&Node, TreeError> {
        self.nodes.get(uuid).ok_or(TreeError::NotFound(uuid))
    }

    fn node_mut(&mut self, uuid: Uuid) -> Result<&mut Node, TreeError> {
        self.nodes.get_mut(uuid).ok_or(TreeError::NotFound(uuid))
    }

    /// Children of a node without triggering population
    pub fn children(&self, uuid: Uuid) -> Result<&[Uuid], TreeError> {
        Ok(self.node(uuid)?.children())
    }

    /// Store a detached node in the arena. Attach it with [`ObjectTree::add_child`].
    pub fn insert(&mut self, node: Node) -> Uuid {
        self.nodes.insert(node)
    }

    /// Insert `child` under `parent` at `index` and notify the parent's listeners.
    ///
    /// The parent's listener set is registered on every node of the new
    /// subtree before `ChildAdded` is dispatched.
    pub fn add_child(&mut self, parent: Uuid, child: Uuid, index: usize) -> Result<(), TreeError> {
        let len = self.node(parent)?.children.len();
        if self.node(child)?.parent.is_some() {
            return Err(TreeError::AlreadyAttached(child));
        }
        if index > len {
            return Err(TreeError::IndexOutOfBounds { index, len });
        }
        if self.nodes.is_ancestor_or_self(child, parent) {
            return Err(TreeError::Cycle { parent, child });
        }

        let parent_node = self.node_mut(parent)?;
        parent_node.children.insert(index, child);
        let listeners: Vec<ListenerId> = parent_node.listeners().collect();
        self.node_mut(child)?.parent = Some(parent);

        for uuid in self.nodes.subtree(child) {
            if let Some(node) = self.nodes.get_mut(uuid) {
                node.listeners.extend(listeners.iter().copied());
            }
        }

        self.dispatch(
            &listeners,
            &TreeEvent::ChildAdded {
                parent,
                child,
                index,
            },
        )
    }

    /// Append `child` as the last child of `parent`, returning its index
    pub fn append_child(&mut self, parent: Uuid, child: Uuid) -> Result<usize, TreeError> {
        let index = self.node(parent)?.children.len();
        self.add_child(parent, child, index)?;
        Ok(index)
    }

    /// Detach `child` from `parent`, notify, then drop the removed subtree.
    ///
    /// Pinned nodes are refused; their owner detaches them.
    pub fn remove_child(&mut self, parent: Uuid, child: Uuid) -> Result<(), TreeError> {
        if self.nodes.get(child).is_some_and(|n| n.pinned) {
            return Err(TreeError::Pinned(child));
        }
        self.detach(parent, child)
    }

    pub(crate) fn remove_pinned_child(&mut self, parent: Uuid, child: Uuid) -> Result<(), TreeError> {
        self.detach(parent, child)
    }

    fn detach(&mut self, parent: Uuid, child: Uuid) -> Result<(), TreeError> {
        let parent_node = self.node(parent)?;
        let index = parent_node
            .children
            .iter()
            .position(|c| *c == child)
            .ok_or(TreeError::NotAChild { parent, child })?;
        let listeners: Vec<ListenerId> = parent_node.listeners().collect();

        self.node_mut(parent)?.children.remove(index);
        self.node_mut(child)?.parent = None;

        let result = self.dispatch(
            &listeners,
            &TreeEvent::ChildRemoved {
                parent,
                child,
                index,
            },
        );
        self.nodes.remove_subtree(child);
        result
    }

    /// Set or clear a scalar property.
    ///
    /// Returns the dispatched change, or `None` when the value is unchanged.
    /// `name` and properties the node reserves for its owner are refused.
    pub fn set_property(
        &mut self,
        uuid: Uuid,
        property: &str,
        value: Option<Value>,
    ) -> Result<Option<PropertyChange>, TreeError> {
        if property == NAME_PROPERTY || self.node(uuid)?.reserved.contains(property) {
            return Err(TreeError::ReservedProperty(property.to_string()));
        }
        self.write_property(uuid, property, value)
    }

    pub(crate) fn set_reserved_property(
        &mut self,
        uuid: Uuid,
        property: &str,
        value: Option<Value>,
    ) -> Result<Option<PropertyChange>, TreeError> {
        self.write_property(uuid, property, value)
    }

    fn write_property(
        &mut self,
        uuid: Uuid,
        property: &str,
        value: Option<Value>,
    ) -> Result<Option<PropertyChange>, TreeError> {
        let node = self.node_mut(uuid)?;
        let old = node.properties.get(property).cloned();
        if old == value {
            return Ok(None);
        }
        match &value {
            Some(v) => {
                node.properties.insert(property.to_string(), v.clone());
            }
            None => {
                node.properties.remove(property);
            }
        }
        let listeners: Vec<ListenerId> = node.listeners().collect();

        let change = PropertyChange {
            node: uuid,
            property: property.to_string(),
            declared_kind: value.as_ref().or(old.as_ref()).map(Value::kind),
            old,
            new: value,
        };
        self.dispatch(&listeners, &TreeEvent::PropertyChanged(change.clone()))?;
        Ok(Some(change))
    }

    /// Rename a node, reported as a change of the `name` property
    pub fn set_name(
        &mut self,
        uuid: Uuid,
        name: impl Into<String>,
    ) -> Result<Option<PropertyChange>, TreeError> {
        let name = name.into();
        let node = self.node_mut(uuid)?;
        if node.name() == name {
            return Ok(None);
        }
        let old = node.name().to_string();
        node.set_name_raw(name.clone());
        let listeners: Vec<ListenerId> = node.listeners().collect();

        let change = PropertyChange {
            node: uuid,
            property: NAME_PROPERTY.to_string(),
            old: Some(Value::Text(old)),
            new: Some(Value::Text(name)),
            declared_kind: Some(crate::value::ValueKind::Text),
        };
        self.dispatch(&listeners, &TreeEvent::PropertyChanged(change.clone()))?;
        Ok(Some(change))
    }

    pub(crate) fn set_population(
        &mut self,
        uuid: Uuid,
        state: PopulationState,
    ) -> Result<(), TreeError> {
        self.node_mut(uuid)?.population = state;
        Ok(())
    }

    /// Open a compound transaction on the listeners of `uuid`
    pub fn begin_transaction(&mut self, uuid: Uuid, label: impl Into<String>) -> Result<(), TreeError> {
        let listeners: Vec<ListenerId> = self.node(uuid)?.listeners().collect();
        self.dispatch(
            &listeners,
            &TreeEvent::TransactionStarted {
                node: uuid,
                label: label.into(),
            },
        )
    }

    pub fn commit_transaction(&mut self, uuid: Uuid) -> Result<(), TreeError> {
        let listeners: Vec<ListenerId> = self.node(uuid)?.listeners().collect();
        self.dispatch(&listeners, &TreeEvent::TransactionEnded { node: uuid })
    }

    pub fn rollback_transaction(
        &mut self,
        uuid: Uuid,
        reason: impl Into<String>,
    ) -> Result<(), TreeError> {
        let listeners: Vec<ListenerId> = self.node(uuid)?.listeners().collect();
        self.dispatch(
            &listeners,
            &TreeEvent::TransactionRolledBack {
                node: uuid,
                reason: reason.into(),
            },
        )
    }

    // ========================================================================
    // Listeners
    // ========================================================================

    /// Register a listener on `uuid` and every descendant, then call its
    /// `attached` hook.
    ///
    /// If the hook fails the listener is unregistered again and the error
    /// is returned.
    pub fn attach_listener(
        &mut self,
        uuid: Uuid,
        mut listener: Box<dyn TreeListener>,
    ) -> Result<ListenerId, TreeError> {
        self.node(uuid)?;
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;

        for node_id in self.nodes.subtree(uuid) {
            if let Some(node) = self.nodes.get_mut(node_id) {
                node.listeners.insert(id);
            }
        }

        if let Err(source) = listener.attached(&self.nodes, uuid) {
            self.unregister(id);
            return Err(TreeError::Listener {
                listener: id,
                source,
            });
        }

        self.listeners.insert(id, listener);
        debug!(listener = %id, node = %uuid, "Attached listener");
        Ok(id)
    }

    /// Remove a listener from every node and hand it back
    pub fn detach_listener(&mut self, id: ListenerId) -> Option<Box<dyn TreeListener>> {
        self.unregister(id);
        let listener = self.listeners.remove(&id);
        if listener.is_some() {
            debug!(listener = %id, "Detached listener");
        }
        listener
    }

    /// Listeners registered on a node
    pub fn listeners_of(&self, uuid: Uuid) -> Vec<ListenerId> {
        self.get(uuid)
            .map(|n| n.listeners().collect())
            .unwrap_or_default()
    }

    fn unregister(&mut self, id: ListenerId) {
        for node in self.nodes.nodes.values_mut() {
            node.listeners.remove(&id);
        }
    }

    fn dispatch(&mut self, targets: &[ListenerId], event: &TreeEvent) -> Result<(), TreeError> {
        trace!(event = event.name(), listeners = targets.len(), "Dispatching");
        for id in targets {
            if let Some(listener) = self.listeners.get_mut(id) {
                listener
                    .on_event(&self.nodes, event)
                    .map_err(|source| TreeError::Listener {
                        listener: *id,
                        source,
                    })?;
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for ObjectTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectTree")
            .field("root", &self.root)
            .field("nodes", &self.nodes.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}
