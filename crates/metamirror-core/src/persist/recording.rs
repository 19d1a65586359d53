use std::sync::Arc;

use parking_lot::Mutex;
use uuid::Uuid;

use super::{OperationKind, PersistOperation, PersistenceError, Persister};
use crate::value::{DataType, SimpleValue};

#[derive(Debug, Default)]
struct RecordingState {
    operations: Vec<PersistOperation>,
    reject: Option<OperationKind>,
}

/// In-memory sink that records every operation in order.
///
/// Clones share one log. A recorder can be told to reject one operation
/// kind, which it then fails without recording.
#[derive(Debug, Clone, Default)]
pub struct RecordingPersister {
    state: Arc<Mutex<RecordingState>>,
}

impl RecordingPersister {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the operation log
    pub fn operations(&self) -> Vec<PersistOperation> {
        self.state.lock().operations.clone()
    }

    pub fn count(&self, kind: OperationKind) -> usize {
        self.state
            .lock()
            .operations
            .iter()
            .filter(|op| op.kind() == kind)
            .count()
    }

    pub fn clear(&self) {
        self.state.lock().operations.clear();
    }

    /// Fail every subsequent operation of `kind`
    pub fn reject(&self, kind: OperationKind) {
        self.state.lock().reject = Some(kind);
    }

    pub fn accept_all(&self) {
        self.state.lock().reject = None;
    }

    fn record(&self, op: PersistOperation) -> Result<(), PersistenceError> {
        let mut state = self.state.lock();
        let kind = op.kind();
        if state.reject == Some(kind) {
            return Err(PersistenceError::Rejected {
                operation: kind.as_str(),
                reason: "recorder configured to reject".to_string(),
            });
        }
        state.operations.push(op);
        Ok(())
    }
}

impl Persister for RecordingPersister {
    fn begin(&mut self, label: &str) -> Result<(), PersistenceError> {
        self.record(PersistOperation::Begin {
            label: label.to_string(),
        })
    }

    fn commit(&mut self) -> Result<(), PersistenceError> {
        self.record(PersistOperation::Commit)
    }

    fn rollback(&mut self) -> Result<(), PersistenceError> {
        self.record(PersistOperation::Rollback)
    }

    fn persist_object(
        &mut self,
        uuid: Uuid,
        object_type: &str,
        parent: Option<Uuid>,
        index: usize,
    ) -> Result<(), PersistenceError> {
        self.record(PersistOperation::PersistObject {
            uuid,
            object_type: object_type.to_string(),
            parent,
            index,
        })
    }

    fn persist_property(
        &mut self,
        uuid: Uuid,
        property: &str,
        data_type: DataType,
        old: Option<&SimpleValue>,
        new: Option<&SimpleValue>,
    ) -> Result<(), PersistenceError> {
        self.record(PersistOperation::PersistProperty {
            uuid,
            property: property.to_string(),
            data_type,
            old: old.cloned(),
            new: new.cloned(),
        })
    }

    fn remove_object(&mut self, parent: Uuid, child: Uuid) -> Result<(), PersistenceError> {
        self.record(PersistOperation::RemoveObject { parent, child })
    }
}
