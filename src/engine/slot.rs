//! Data slots.
//!
//! A slot is a named, typed attachment point on a connectable. OUTPUT and
//! BUFFER slots own a [`DataHandle`]; INPUT slots hold at most one upstream
//! binding to someone else's handle.

use crate::engine::handle::{DataHandle, WeakHandle};
use crate::engine::id::NodeId;
use crate::engine::validity::Validity;
use crate::engine::value::{DataKind, DataValue};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of a slot on its connectable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Input,
    Output,
    /// Step-internal state that is also readable from downstream.
    Buffer,
}

impl Role {
    pub const ALL: [Role; 3] = [Role::Input, Role::Output, Role::Buffer];

    /// OUTPUT and BUFFER slots own a handle and may feed a connection.
    pub fn is_producer(self) -> bool {
        matches!(self, Role::Output | Role::Buffer)
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Role::Input => "input",
            Role::Output => "output",
            Role::Buffer => "buffer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Fully qualified slot identity: owner, role, name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotAddress {
    pub node: NodeId,
    pub role: Role,
    pub name: String,
}

impl SlotAddress {
    pub fn new(node: NodeId, role: Role, name: impl Into<String>) -> Self {
        Self {
            node,
            role,
            name: name.into(),
        }
    }
}

impl fmt::Display for SlotAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.node.short(), self.role, self.name)
    }
}

/// Upstream binding of an INPUT slot.
#[derive(Debug, Clone)]
pub struct InputBinding {
    pub handle: WeakHandle,
    pub source: SlotAddress,
    /// Result of the check done when the binding was made.
    pub validity: Validity,
}

impl InputBinding {
    pub fn producer(&self) -> NodeId {
        self.source.node
    }
}

/// A declared slot.
#[derive(Debug, Clone)]
pub struct DataSlot {
    pub name: String,
    pub role: Role,
    pub kind: DataKind,
    pub mandatory: bool,
    pub serializable: bool,
    /// Set for OUTPUT and BUFFER slots.
    pub handle: Option<DataHandle>,
    /// Set for connected INPUT slots.
    pub binding: Option<InputBinding>,
}

impl DataSlot {
    /// Declare a slot of `kind`. Producer roles get a fresh handle holding
    /// the zero value.
    pub fn new(role: Role, name: impl Into<String>, kind: DataKind, mandatory: bool) -> Self {
        let handle = role.is_producer().then(|| DataHandle::new(kind.clone()));
        Self {
            name: name.into(),
            role,
            kind,
            mandatory,
            serializable: true,
            handle,
            binding: None,
        }
    }

    /// Declare a slot whose kind and initial content come from `initial`.
    pub fn with_initial(role: Role, name: impl Into<String>, initial: DataValue, mandatory: bool) -> Self {
        let kind = initial.kind();
        let handle = role.is_producer().then(|| DataHandle::with_value(initial));
        Self {
            name: name.into(),
            role,
            kind,
            mandatory,
            serializable: true,
            handle,
            binding: None,
        }
    }

    /// Live upstream handle of an INPUT slot.
    pub fn bound_handle(&self) -> Option<DataHandle> {
        self.binding.as_ref().and_then(|b| b.handle.upgrade())
    }

    /// Whether an INPUT slot has a binding whose producer is still alive.
    pub fn is_connected(&self) -> bool {
        self.binding
            .as_ref()
            .map(|b| b.handle.is_alive())
            .unwrap_or(false)
    }

    /// The handle a reader of this slot sees: own handle for producers,
    /// upstream handle for inputs.
    pub fn readable_handle(&self) -> Option<DataHandle> {
        match self.role {
            Role::Input => self.bound_handle(),
            Role::Output | Role::Buffer => self.handle.clone(),
        }
    }
}
