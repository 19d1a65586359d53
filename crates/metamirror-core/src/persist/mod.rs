//! Change Capture and Persistence
//!
//! Translates tree mutations into an ordered stream of persist operations
//! against a transactional sink.
//!
//! ## Components
//!
//! - [`Persister`]: the sink contract
//! - [`PersisterListener`]: tree listener replaying events as persist calls
//! - [`Converter`]: maps property values to persistable primitives
//! - [`RecordingPersister`]: in-memory sink keeping the operation log
//! - [`SqlitePersister`]: durable sink in a SQLite file
//!
//! ## Operation ordering
//!
//! Subtrees are persisted pre-order: a node's `PersistObject` is followed by
//! its `PersistProperty` calls, then each child in index order. Every
//! top-level subtree write is bracketed by `Begin`/`Commit`.

mod converter;
mod listener;
mod recording;
mod schema;
mod sqlite;

pub use converter::{ConversionError, Converter, DataTypeRegistry};
pub use listener::PersisterListener;
pub use recording::RecordingPersister;
pub use schema::SINK_SCHEMA_VERSION;
pub use sqlite::{SqlitePersister, StoredObject, StoredProperty};

use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::value::{DataType, SimpleValue};

/// Errors raised by persistence sinks
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("Sink rejected {operation}: {reason}")]
    Rejected {
        operation: &'static str,
        reason: String,
    },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Node {0} is not in the tree")]
    UnknownNode(Uuid),

    #[error("Schema version mismatch: expected {expected}, found {found}")]
    SchemaVersionMismatch { expected: String, found: String },

    #[error("Stored value is corrupt: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable sink for persist operations.
pub trait Persister: Send {
    fn begin(&mut self, label: &str) -> Result<(), PersistenceError>;

    fn commit(&mut self) -> Result<(), PersistenceError>;

    fn rollback(&mut self) -> Result<(), PersistenceError>;

    fn persist_object(
        &mut self,
        uuid: Uuid,
        object_type: &str,
        parent: Option<Uuid>,
        index: usize,
    ) -> Result<(), PersistenceError>;

    fn persist_property(
        &mut self,
        uuid: Uuid,
        property: &str,
        data_type: DataType,
        old: Option<&SimpleValue>,
        new: Option<&SimpleValue>,
    ) -> Result<(), PersistenceError>;

    /// Remove `child` and, in the sink, everything beneath it
    fn remove_object(&mut self, parent: Uuid, child: Uuid) -> Result<(), PersistenceError>;
}

/// Kind of a [`PersistOperation`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Begin,
    Commit,
    Rollback,
    PersistObject,
    PersistProperty,
    RemoveObject,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Begin => "begin",
            OperationKind::Commit => "commit",
            OperationKind::Rollback => "rollback",
            OperationKind::PersistObject => "persist_object",
            OperationKind::PersistProperty => "persist_property",
            OperationKind::RemoveObject => "remove_object",
        }
    }
}

/// One call made against a [`Persister`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PersistOperation {
    Begin {
        label: String,
    },
    Commit,
    Rollback,
    PersistObject {
        uuid: Uuid,
        object_type: String,
        parent: Option<Uuid>,
        index: usize,
    },
    PersistProperty {
        uuid: Uuid,
        property: String,
        data_type: DataType,
        old: Option<SimpleValue>,
        new: Option<SimpleValue>,
    },
    RemoveObject {
        parent: Uuid,
        child: Uuid,
    },
}

impl PersistOperation {
    pub fn kind(&self) -> OperationKind {
        match self {
            PersistOperation::Begin { .. } => OperationKind::Begin,
            PersistOperation::Commit => OperationKind::Commit,
            PersistOperation::Rollback => OperationKind::Rollback,
            PersistOperation::PersistObject { .. } => OperationKind::PersistObject,
            PersistOperation::PersistProperty { .. } => OperationKind::PersistProperty,
            PersistOperation::RemoveObject { .. } => OperationKind::RemoveObject,
        }
    }
}
