//! Change events and the listener seam.

use uuid::Uuid;

use super::NodeArena;
use crate::value::{Value, ValueKind};

/// Identifier assigned to a listener when it is attached to a tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(pub(crate) u64);

impl std::fmt::Display for ListenerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "listener#{}", self.0)
    }
}

/// Error type returned by listeners; boxed so sinks keep their own error enums
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

/// A scalar property mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyChange {
    pub node: Uuid,
    pub property: String,
    pub old: Option<Value>,
    pub new: Option<Value>,
    /// Kind of the property's value; absent only when both values are absent
    pub declared_kind: Option<ValueKind>,
}

/// A mutation notification, consumed synchronously by listeners.
#[derive(Debug, Clone, PartialEq)]
pub enum TreeEvent {
    ChildAdded {
        parent: Uuid,
        child: Uuid,
        index: usize,
    },
    ChildRemoved {
        parent: Uuid,
        child: Uuid,
        index: usize,
    },
    PropertyChanged(PropertyChange),
    TransactionStarted {
        node: Uuid,
        label: String,
    },
    TransactionEnded {
        node: Uuid,
    },
    TransactionRolledBack {
        node: Uuid,
        reason: String,
    },
}

impl TreeEvent {
    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            TreeEvent::ChildAdded { .. } => "child_added",
            TreeEvent::ChildRemoved { .. } => "child_removed",
            TreeEvent::PropertyChanged(_) => "property_changed",
            TreeEvent::TransactionStarted { .. } => "transaction_started",
            TreeEvent::TransactionEnded { .. } => "transaction_ended",
            TreeEvent::TransactionRolledBack { .. } => "transaction_rolled_back",
        }
    }
}

/// Observer of tree mutations.
///
/// Listeners receive a read-only view of the arena alongside each event. For
/// `ChildRemoved` the removed subtree is still present in the arena while the
/// event is dispatched.
pub trait TreeListener: Send {
    fn on_event(&mut self, nodes: &NodeArena, event: &TreeEvent) -> Result<(), ListenerError>;

    /// Called once after the listener is registered on `root` and its subtree
    fn attached(&mut self, _nodes: &NodeArena, _root: Uuid) -> Result<(), ListenerError> {
        Ok(())
    }
}
