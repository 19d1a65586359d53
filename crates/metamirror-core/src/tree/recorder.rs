use std::sync::Arc;

use parking_lot::Mutex;

use super::{ListenerError, NodeArena, TreeEvent, TreeListener};

/// Listener that keeps every event it receives.
///
/// Clones share one log, so a handle kept by the caller observes events
/// delivered to the copy registered on the tree.
#[derive(Debug, Clone, Default)]
pub struct EventRecorder {
    events: Arc<Mutex<Vec<TreeEvent>>>,
}

impl EventRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of recorded events
    pub fn events(&self) -> Vec<TreeEvent> {
        self.events.lock().clone()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Number of `ChildAdded` and `ChildRemoved` events
    pub fn structural_count(&self) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| {
                matches!(
                    e,
                    TreeEvent::ChildAdded { .. } | TreeEvent::ChildRemoved { .. }
                )
            })
            .count()
    }
}

impl TreeListener for EventRecorder {
    fn on_event(&mut self, _nodes: &NodeArena, event: &TreeEvent) -> Result<(), ListenerError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}
