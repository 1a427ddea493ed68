//! Chainable trigger: the "finished" signal of a triggerable.
//!
//! Listeners are held weakly. A listener is ticked in the same cascade as
//! the emitter, after it, and only when the emitter actually fired.

use crate::engine::id::{NodeId, TriggerId};
use crate::engine::triggerable::Triggerable;
use parking_lot::RwLock;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

pub struct Trigger {
    id: TriggerId,
    name: String,
    listeners: RwLock<Vec<(NodeId, Weak<dyn Triggerable>)>>,
    fired: AtomicU64,
}

impl Trigger {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: TriggerId::new(),
            name: name.into(),
            listeners: RwLock::new(Vec::new()),
            fired: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> TriggerId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Chain `target` to this trigger. Connecting the same target twice is a
    /// no-op.
    pub fn connect<T: Triggerable + 'static>(&self, target: &Arc<T>) -> bool {
        let target: Arc<dyn Triggerable> = target.clone();
        self.connect_dyn(&target)
    }

    pub fn connect_dyn(&self, target: &Arc<dyn Triggerable>) -> bool {
        let id = target.id();
        let mut listeners = self.listeners.write();
        listeners.retain(|(_, weak)| weak.strong_count() > 0);
        if listeners.iter().any(|(existing, _)| *existing == id) {
            return false;
        }
        listeners.push((id, Arc::downgrade(target)));
        true
    }

    pub fn disconnect(&self, target: NodeId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != target);
        listeners.len() != before
    }

    pub fn disconnect_all(&self) {
        self.listeners.write().clear();
    }

    /// Live listeners in connection order.
    pub fn listeners(&self) -> Vec<Arc<dyn Triggerable>> {
        self.listeners
            .read()
            .iter()
            .filter_map(|(_, weak)| weak.upgrade())
            .collect()
    }

    pub fn listener_ids(&self) -> Vec<NodeId> {
        self.listeners
            .read()
            .iter()
            .filter(|(_, weak)| weak.strong_count() > 0)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn is_connected_to(&self, target: NodeId) -> bool {
        self.listener_ids().contains(&target)
    }

    pub(crate) fn mark_fired(&self) {
        self.fired.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of times the emitter fired.
    pub fn fire_count(&self) -> u64 {
        self.fired.load(Ordering::Relaxed)
    }
}

impl fmt::Debug for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Trigger")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("listeners", &self.listener_ids())
            .finish()
    }
}
