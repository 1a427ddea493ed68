//! The connectable capability: an ordered set of slots per role.
//!
//! Declaration order is kept (IndexMap) and is the order used by the
//! scheduler, validity checks, snapshots and persisted descriptions.

use crate::engine::handle::DataHandle;
use crate::engine::id::NodeId;
use crate::engine::slot::{DataSlot, InputBinding, Role, SlotAddress};
use crate::engine::validity::{Validity, ValidityRegistry};
use crate::engine::value::{DataKind, DataValue};
use crate::error::{EngineError, Result};
use indexmap::IndexMap;

#[derive(Debug, Clone)]
pub struct Connectable {
    owner: NodeId,
    slots: IndexMap<Role, IndexMap<String, DataSlot>>,
}

impl Connectable {
    pub fn new(owner: NodeId) -> Self {
        let slots = Role::ALL
            .iter()
            .map(|role| (*role, IndexMap::new()))
            .collect();
        Self { owner, slots }
    }

    pub fn owner(&self) -> NodeId {
        self.owner
    }

    /// Register a new slot holding the zero value of `kind`.
    pub fn declare_slot(
        &mut self,
        role: Role,
        name: &str,
        kind: DataKind,
        mandatory: bool,
    ) -> Result<()> {
        self.insert(DataSlot::new(role, name, kind, mandatory))
    }

    /// Register a new slot seeded with `initial`.
    pub fn declare_slot_with(
        &mut self,
        role: Role,
        name: &str,
        initial: DataValue,
        mandatory: bool,
    ) -> Result<()> {
        self.insert(DataSlot::with_initial(role, name, initial, mandatory))
    }

    fn insert(&mut self, slot: DataSlot) -> Result<()> {
        let role_slots = self.slots.entry(slot.role).or_default();
        if role_slots.contains_key(&slot.name) {
            return Err(EngineError::DuplicateSlot {
                role: slot.role,
                name: slot.name,
            });
        }
        role_slots.insert(slot.name.clone(), slot);
        Ok(())
    }

    /// Delete a slot. An input's binding goes with it; a producer's handle is
    /// dropped, so downstream inputs read it as disconnected from now on.
    pub fn remove_slot(&mut self, role: Role, name: &str) -> Result<DataSlot> {
        self.slots
            .get_mut(&role)
            .and_then(|slots| slots.shift_remove(name))
            .ok_or_else(|| EngineError::SlotNotFound {
                role,
                name: name.to_string(),
            })
    }

    pub fn slot(&self, role: Role, name: &str) -> Option<&DataSlot> {
        self.slots.get(&role).and_then(|slots| slots.get(name))
    }

    pub fn slot_mut(&mut self, role: Role, name: &str) -> Option<&mut DataSlot> {
        self.slots.get_mut(&role).and_then(|slots| slots.get_mut(name))
    }

    /// Look up a slot or fail with `SlotNotFound`.
    pub fn require(&self, role: Role, name: &str) -> Result<&DataSlot> {
        self.slot(role, name).ok_or_else(|| EngineError::SlotNotFound {
            role,
            name: name.to_string(),
        })
    }

    fn require_mut(&mut self, role: Role, name: &str) -> Result<&mut DataSlot> {
        self.slot_mut(role, name)
            .ok_or_else(|| EngineError::SlotNotFound {
                role,
                name: name.to_string(),
            })
    }

    /// Slots of one role in declaration order.
    pub fn slots(&self, role: Role) -> impl Iterator<Item = &DataSlot> {
        self.slots.get(&role).into_iter().flat_map(|s| s.values())
    }

    pub fn slots_mut(&mut self, role: Role) -> impl Iterator<Item = &mut DataSlot> {
        self.slots
            .get_mut(&role)
            .into_iter()
            .flat_map(|s| s.values_mut())
    }

    /// All slots, inputs first, then outputs, then buffers.
    pub fn all_slots(&self) -> impl Iterator<Item = &DataSlot> {
        Role::ALL.iter().flat_map(move |role| self.slots(*role))
    }

    pub fn slot_names(&self, role: Role) -> Vec<String> {
        self.slots(role).map(|s| s.name.clone()).collect()
    }

    /// Handle a reader of this slot sees.
    pub fn handle(&self, role: Role, name: &str) -> Option<DataHandle> {
        self.slot(role, name).and_then(|s| s.readable_handle())
    }

    /// Producer handle to feed a connection from.
    pub fn producer_handle(&self, role: Role, name: &str) -> Result<DataHandle> {
        if !role.is_producer() {
            return Err(EngineError::RoleMismatch {
                name: name.to_string(),
                expected: Role::Output,
            });
        }
        self.require(role, name)?
            .handle
            .clone()
            .ok_or_else(|| EngineError::SlotNotFound {
                role,
                name: name.to_string(),
            })
    }

    /// Address of a slot on this connectable.
    pub fn address(&self, role: Role, name: &str) -> SlotAddress {
        SlotAddress::new(self.owner, role, name)
    }

    /// Pure query: would the INPUT `input` accept `candidate`?
    pub fn check_validity(
        &self,
        input: &str,
        candidate: &DataHandle,
        registry: &ValidityRegistry,
    ) -> Result<Validity> {
        let slot = self.input_slot(input)?;
        Ok(registry.check(&slot.kind, candidate))
    }

    fn input_slot(&self, name: &str) -> Result<&DataSlot> {
        if let Some(slot) = self.slot(Role::Input, name) {
            return Ok(slot);
        }
        if self.slot(Role::Output, name).is_some() || self.slot(Role::Buffer, name).is_some() {
            return Err(EngineError::RoleMismatch {
                name: name.to_string(),
                expected: Role::Input,
            });
        }
        Err(EngineError::SlotNotFound {
            role: Role::Input,
            name: name.to_string(),
        })
    }

    /// Bind an INPUT to an upstream handle, replacing any previous binding.
    /// Returns the replaced binding.
    pub fn bind_input(
        &mut self,
        input: &str,
        handle: &DataHandle,
        source: SlotAddress,
        validity: Validity,
    ) -> Result<Option<InputBinding>> {
        self.input_slot(input)?;
        let slot = self.require_mut(Role::Input, input)?;
        Ok(slot.binding.replace(InputBinding {
            handle: handle.downgrade(),
            source,
            validity,
        }))
    }

    pub fn unbind_input(&mut self, input: &str) -> Result<Option<InputBinding>> {
        self.input_slot(input)?;
        let slot = self.require_mut(Role::Input, input)?;
        Ok(slot.binding.take())
    }

    /// Drop every input binding whose source is `producer`.
    pub fn unbind_from(&mut self, producer: NodeId) -> usize {
        let mut count = 0;
        for slot in self.slots_mut(Role::Input) {
            if slot.binding.as_ref().map(|b| b.producer()) == Some(producer) {
                slot.binding = None;
                count += 1;
            }
        }
        count
    }

    pub fn set_mandatory(&mut self, role: Role, name: &str, mandatory: bool) -> Result<()> {
        self.require_mut(role, name)?.mandatory = mandatory;
        Ok(())
    }

    pub fn set_serializable(&mut self, role: Role, name: &str, serializable: bool) -> Result<()> {
        self.require_mut(role, name)?.serializable = serializable;
        Ok(())
    }

    /// Producers of the currently live input bindings, de-duplicated, in
    /// slot order.
    pub fn upstream(&self) -> Vec<NodeId> {
        let mut nodes = Vec::new();
        for slot in self.slots(Role::Input) {
            if let Some(binding) = &slot.binding {
                if binding.handle.is_alive() && !nodes.contains(&binding.producer()) {
                    nodes.push(binding.producer());
                }
            }
        }
        nodes
    }
}
