use tracing::{debug, trace};
use uuid::Uuid;

use super::{Converter, PersistenceError, Persister};
use crate::tree::{ListenerError, NodeArena, PropertyChange, TreeEvent, TreeListener, NAME_PROPERTY};
use crate::value::Value;

/// Tree listener that replays every mutation against a [`Persister`].
///
/// Attaching it to a node persists the existing subtree in one transaction.
/// Afterwards each event maps to sink calls:
///
/// | Event | Sink calls |
/// |-------|------------|
/// | `ChildAdded` | `begin`, subtree walk, `commit` |
/// | `ChildRemoved` | `remove_object` |
/// | `PropertyChanged` | `persist_property` |
/// | `TransactionStarted` / `Ended` / `RolledBack` | `begin` / `commit` / `rollback` |
pub struct PersisterListener<P> {
    sink: P,
    converter: Converter,
}

impl<P: Persister> PersisterListener<P> {
    pub fn new(sink: P) -> Self {
        Self::with_converter(sink, Converter::default())
    }

    pub fn with_converter(sink: P, converter: Converter) -> Self {
        Self { sink, converter }
    }

    pub fn sink(&self) -> &P {
        &self.sink
    }

    pub fn into_sink(self) -> P {
        self.sink
    }

    /// Persist `uuid` and its descendants inside one begin/commit bracket.
    ///
    /// On failure the commit is skipped; the sink's open transaction is
    /// left for the caller to resolve.
    pub fn persist_subtree(
        &mut self,
        nodes: &NodeArena,
        uuid: Uuid,
        index: usize,
    ) -> Result<(), PersistenceError> {
        let node = nodes.get(uuid).ok_or(PersistenceError::UnknownNode(uuid))?;
        let label = format!("Persisting {} and its descendants", node.name());
        self.sink.begin(&label)?;
        self.persist_walk(nodes, uuid, index)?;
        self.sink.commit()
    }

    fn persist_walk(
        &mut self,
        nodes: &NodeArena,
        uuid: Uuid,
        index: usize,
    ) -> Result<(), PersistenceError> {
        let node = nodes.get(uuid).ok_or(PersistenceError::UnknownNode(uuid))?;
        trace!(node = %uuid, kind = %node.kind(), index, "Persisting object");
        self.sink
            .persist_object(uuid, node.kind().as_str(), node.parent(), index)?;

        let name = Value::Text(node.name().to_string());
        self.persist_value(uuid, NAME_PROPERTY, &name)?;
        for (property, value) in node.properties() {
            self.persist_value(uuid, property, value)?;
        }

        for (child_index, child) in node.children().iter().enumerate() {
            self.persist_walk(nodes, *child, child_index)?;
        }
        Ok(())
    }

    fn persist_value(
        &mut self,
        uuid: Uuid,
        property: &str,
        value: &Value,
    ) -> Result<(), PersistenceError> {
        let data_type = self.converter.registry().data_type_of(value)?;
        let simple = self.converter.to_simple(value)?;
        self.sink
            .persist_property(uuid, property, data_type, None, Some(&simple))
    }

    fn persist_change(&mut self, change: &PropertyChange) -> Result<(), PersistenceError> {
        let data_type = self
            .converter
            .registry()
            .data_type_for(change.new.as_ref(), change.old.as_ref())?;
        let old = self.converter.to_simple_opt(change.old.as_ref())?;
        let new = self.converter.to_simple_opt(change.new.as_ref())?;
        self.sink.persist_property(
            change.node,
            &change.property,
            data_type,
            old.as_ref(),
            new.as_ref(),
        )
    }

    fn handle(&mut self, nodes: &NodeArena, event: &TreeEvent) -> Result<(), PersistenceError> {
        match event {
            TreeEvent::ChildAdded { child, index, .. } => self.persist_subtree(nodes, *child, *index),
            TreeEvent::ChildRemoved { parent, child, .. } => self.sink.remove_object(*parent, *child),
            TreeEvent::PropertyChanged(change) => self.persist_change(change),
            TreeEvent::TransactionStarted { label, .. } => {
                debug!(label = %label, "Sink transaction started");
                self.sink.begin(label)
            }
            TreeEvent::TransactionEnded { .. } => {
                debug!("Sink transaction ended");
                self.sink.commit()
            }
            TreeEvent::TransactionRolledBack { reason, .. } => {
                debug!(reason = %reason, "Sink transaction rolled back");
                self.sink.rollback()
            }
        }
    }
}

impl<P: Persister> TreeListener for PersisterListener<P> {
    fn on_event(&mut self, nodes: &NodeArena, event: &TreeEvent) -> Result<(), ListenerError> {
        self.handle(nodes, event).map_err(Into::into)
    }

    fn attached(&mut self, nodes: &NodeArena, root: Uuid) -> Result<(), ListenerError> {
        let index = nodes.index_in_parent(root).unwrap_or(0);
        self.persist_subtree(nodes, root, index).map_err(Into::into)
    }
}
