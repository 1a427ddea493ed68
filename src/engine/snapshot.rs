//! Serializable views of a running graph for external display.

use crate::engine::id::{NodeId, TriggerId};
use crate::engine::slot::Role;
use crate::engine::triggerable::State;
use crate::engine::validity::Validity;
use crate::engine::value::DataKind;
use crate::error::Result;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SlotSnapshot {
    pub name: String,
    pub role: Role,
    pub kind: DataKind,
    pub mandatory: bool,
    pub serializable: bool,
    pub connected: bool,
    /// Version of the readable handle, if any.
    pub version: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ElementSnapshot {
    pub id: NodeId,
    pub name: String,
    /// Step type name, or `group`.
    pub element_type: String,
    pub state: Option<State>,
    pub message: Option<String>,
    /// Name of the owning looped trigger.
    pub trigger: Option<String>,
    pub slots: Vec<SlotSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub children: Option<Box<TopologySnapshot>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSnapshot {
    pub from: String,
    pub to: String,
    pub validity: Validity,
}

#[derive(Debug, Clone, Serialize)]
pub struct TriggerSnapshot {
    pub id: TriggerId,
    pub name: String,
    pub period_ms: u64,
    pub running: bool,
    pub attached: Vec<String>,
    /// `(depth, names)` in triggering order.
    pub order: Vec<(usize, Vec<String>)>,
    pub cascades: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BoundarySnapshot {
    pub role: Role,
    pub name: String,
    pub target: String,
}

/// Complete topology snapshot of a group, nested groups included.
#[derive(Debug, Clone, Serialize)]
pub struct TopologySnapshot {
    pub id: NodeId,
    pub group: String,
    pub elements: Vec<ElementSnapshot>,
    pub connections: Vec<ConnectionSnapshot>,
    pub chains: Vec<(String, String)>,
    pub triggers: Vec<TriggerSnapshot>,
    pub boundary: Vec<BoundarySnapshot>,
}

impl TopologySnapshot {
    pub fn element(&self, name: &str) -> Option<&ElementSnapshot> {
        self.elements.iter().find(|e| e.name == name)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
