//! Groups: composite elements holding steps, nested groups and the looped
//! triggers local to them.
//!
//! A group owns its children by unique name and records every data
//! connection and trigger chain made between them. Boundary slots let an
//! enclosing group treat a nested group as one opaque connectable:
//!
//! ```text
//! outer:   source.out ──▶ filter.in            (filter is a Group)
//! filter:                  in ═▶ smooth.in ─▶ smooth.out ═▶ out
//! ```
//!
//! A boundary INPUT forwards validity checks and bindings to the backing
//! child slot. A boundary OUTPUT resolves to the backing child's handle, so
//! readers outside see the data without a copy.
//!
//! ## Locking
//!
//! A group's element table sits behind a `parking_lot::RwLock`. Locks are
//! taken parent before child and group before step, never the other way
//! round. Calls into the parent (`unexpose`, stale boundary pruning) happen
//! after the own lock is released.

use crate::engine::connection::{Connection, Endpoint};
use crate::engine::description::{
    ChainDescription, ConnectionDescription, ElementDescription, ExposureDescription,
    GraphDescription, SlotDescription, TriggerDescription,
};
use crate::engine::handle::DataHandle;
use crate::engine::id::{NodeId, TriggerId};
use crate::engine::looped::{LoopedTrigger, LoopedTriggerConfig};
use crate::engine::registry::StepRegistry;
use crate::engine::slot::{DataSlot, Role, SlotAddress};
use crate::engine::snapshot::{
    BoundarySnapshot, ConnectionSnapshot, ElementSnapshot, SlotSnapshot, TopologySnapshot,
    TriggerSnapshot,
};
use crate::engine::step::Step;
use crate::engine::triggerable::Triggerable;
use crate::engine::validity::Validity;
use crate::engine::value::ConfigValue;
use crate::error::{EngineError, Result, ResultExt};
use indexmap::IndexMap;
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

/// A child of a group.
#[derive(Clone)]
pub enum Element {
    Step(Arc<Step>),
    Group(Arc<Group>),
}

impl Element {
    pub fn id(&self) -> NodeId {
        match self {
            Element::Step(step) => step.id(),
            Element::Group(group) => group.id(),
        }
    }

    pub fn name(&self) -> String {
        match self {
            Element::Step(step) => step.name(),
            Element::Group(group) => group.name().to_string(),
        }
    }

    pub fn as_step(&self) -> Option<&Arc<Step>> {
        match self {
            Element::Step(step) => Some(step),
            Element::Group(_) => None,
        }
    }

    pub fn as_group(&self) -> Option<&Arc<Group>> {
        match self {
            Element::Group(group) => Some(group),
            Element::Step(_) => None,
        }
    }

    /// Groups carry no state machine of their own.
    pub fn is_triggerable(&self) -> bool {
        matches!(self, Element::Step(_))
    }
}

impl std::fmt::Debug for Element {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Element::Step(step) => std::fmt::Debug::fmt(step, f),
            Element::Group(group) => std::fmt::Debug::fmt(group, f),
        }
    }
}

/// Boundary slot `name` backed by the child slot at `target`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exposure {
    pub role: Role,
    pub name: String,
    pub target: Endpoint,
}

#[derive(Default)]
struct GroupInner {
    elements: IndexMap<String, Element>,
    triggers: IndexMap<String, LoopedTrigger>,
    connections: Vec<Connection>,
    chains: Vec<(String, String)>,
    exposures: Vec<Exposure>,
}

/// A boundary slot that went away, with the step input backing it (if it
/// was an INPUT and still resolvable).
type LostBoundary = (Exposure, Option<(Arc<Step>, String)>);

pub struct Group {
    id: NodeId,
    name: String,
    inner: RwLock<GroupInner>,
    parent: RwLock<Weak<Group>>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id: NodeId::new(),
            name: name.into(),
            inner: RwLock::new(GroupInner::default()),
            parent: RwLock::new(Weak::new()),
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<Arc<Group>> {
        self.parent.read().upgrade()
    }

    fn has_ancestor(&self, id: NodeId) -> bool {
        let mut current = self.parent();
        while let Some(group) = current {
            if group.id == id {
                return true;
            }
            current = group.parent();
        }
        false
    }

    // ── Elements ─────────────────────────────────────────────────────────

    pub fn add_step(&self, step: Arc<Step>) -> Result<()> {
        let name = step.name();
        let mut inner = self.inner.write();
        if inner.elements.contains_key(&name) {
            return Err(EngineError::DuplicateElement(name));
        }
        tracing::debug!(group = %self.name, step = %name, "Step added");
        inner.elements.insert(name, Element::Step(step));
        Ok(())
    }

    /// Nest `group` under this one. A group has at most one parent.
    pub fn add_group(self: &Arc<Self>, group: Arc<Group>) -> Result<()> {
        if group.id == self.id || self.has_ancestor(group.id) {
            return Err(EngineError::Config(format!(
                "group '{}' cannot contain itself",
                group.name
            )));
        }
        if let Some(parent) = group.parent() {
            return Err(EngineError::Config(format!(
                "group '{}' is already nested in '{}'",
                group.name, parent.name
            )));
        }
        let mut inner = self.inner.write();
        if inner.elements.contains_key(&group.name) {
            return Err(EngineError::DuplicateElement(group.name.clone()));
        }
        *group.parent.write() = Arc::downgrade(self);
        tracing::debug!(group = %self.name, child = %group.name, "Group added");
        inner
            .elements
            .insert(group.name.clone(), Element::Group(group));
        Ok(())
    }

    /// Remove a child. A step is detached from its looped trigger first
    /// (waiting for an in-flight cascade); its connections and chains in
    /// this group are severed. A nested group has its triggers stopped.
    /// Removed steps that a running trigger was driving end up NOT_RUNNING.
    pub fn remove_element(&self, name: &str) -> Result<Element> {
        let element = self
            .element(name)
            .ok_or_else(|| EngineError::ElementNotFound(name.to_string()))?;

        let removed_steps = match &element {
            Element::Step(step) => vec![step.clone()],
            Element::Group(group) => group.all_steps(),
        };
        let removed_ids: HashSet<NodeId> = removed_steps.iter().map(|s| s.id()).collect();
        let drivers: Vec<LoopedTrigger> = self
            .top()
            .map(|top| top.looped_triggers())
            .unwrap_or_else(|| self.looped_triggers())
            .into_iter()
            .filter(|t| {
                t.is_running() && t.plan().entries.iter().any(|e| removed_ids.contains(&e.id))
            })
            .collect();

        match &element {
            Element::Step(step) => {
                if let Some(owner) = step.owner_trigger() {
                    owner.detach_forced(step.id());
                }
            }
            Element::Group(group) => {
                if let Err(e) = group.stop_all() {
                    tracing::warn!(group = %group.name, "Failed to stop nested triggers: {}", e);
                }
                let local: HashSet<TriggerId> =
                    group.looped_triggers().iter().map(|t| t.id()).collect();
                for step in group.all_steps() {
                    if let Some(owner) = step.owner_trigger() {
                        if !local.contains(&owner.id()) {
                            owner.detach_forced(step.id());
                        }
                    }
                }
            }
        }

        let lost = {
            let mut inner = self.inner.write();
            let lost = Self::take_exposures(&mut inner, |e| e.target.element == name);

            let (touching, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut inner.connections)
                .into_iter()
                .partition(|c| c.touches(name));
            inner.connections = kept;
            for conn in &touching {
                let backing = if conn.to.element == name {
                    backing_of(&element, &conn.to.slot, false)
                } else {
                    backing(&inner, &conn.to, false)
                };
                if let Ok((step, _, input)) = backing {
                    if let Err(e) = step.disconnect_input(&input) {
                        tracing::warn!(group = %self.name, "Failed to sever {}: {}", conn, e);
                    }
                }
            }

            let chains = std::mem::take(&mut inner.chains);
            for (from, to) in chains {
                if from != name && to != name {
                    inner.chains.push((from, to));
                    continue;
                }
                let source = if from == name {
                    Some(element.clone())
                } else {
                    inner.elements.get(&from).cloned()
                };
                let target = if to == name {
                    Some(element.id())
                } else {
                    inner.elements.get(&to).map(Element::id)
                };
                if let (Some(Element::Step(source)), Some(target)) = (source, target) {
                    source.finished().disconnect(target);
                }
            }

            inner.elements.shift_remove(name);
            lost
        };

        if let Element::Group(group) = &element {
            *group.parent.write() = Weak::new();
        }
        self.forget_in_parent(lost);

        // Out of every plan now; once the in-flight cascades are done
        // nothing ticks these steps again.
        for trigger in &drivers {
            trigger.wait_for_cascade();
        }
        for step in removed_steps.iter().filter(|s| s.is_active()) {
            step.on_stop();
        }
        tracing::info!(group = %self.name, element = %name, "Element removed");
        Ok(element)
    }

    /// Outermost enclosing group, or `None` at the top.
    fn top(&self) -> Option<Arc<Group>> {
        let mut top = self.parent()?;
        while let Some(parent) = top.parent() {
            top = parent;
        }
        Some(top)
    }

    /// Every group nested below this one, depth first.
    fn nested_groups(&self) -> Vec<Arc<Group>> {
        let children: Vec<Arc<Group>> = self
            .inner
            .read()
            .elements
            .values()
            .filter_map(|e| e.as_group().cloned())
            .collect();
        let mut groups = Vec::new();
        for child in children {
            let nested = child.nested_groups();
            groups.push(child);
            groups.extend(nested);
        }
        groups
    }

    pub fn element(&self, name: &str) -> Option<Element> {
        self.inner.read().elements.get(name).cloned()
    }

    pub fn step(&self, name: &str) -> Option<Arc<Step>> {
        self.element(name).and_then(|e| e.as_step().cloned())
    }

    pub fn group(&self, name: &str) -> Option<Arc<Group>> {
        self.element(name).and_then(|e| e.as_group().cloned())
    }

    pub fn element_names(&self) -> Vec<String> {
        self.inner.read().elements.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.read().elements.is_empty()
    }

    /// Every step of this group and its nested groups.
    pub fn all_steps(&self) -> Vec<Arc<Step>> {
        let elements: Vec<Element> = self.inner.read().elements.values().cloned().collect();
        let mut steps = Vec::new();
        for element in elements {
            match element {
                Element::Step(step) => steps.push(step),
                Element::Group(group) => steps.extend(group.all_steps()),
            }
        }
        steps
    }

    fn require_step(&self, name: &str) -> Result<Arc<Step>> {
        match self.element(name) {
            Some(Element::Step(step)) => Ok(step),
            Some(Element::Group(_)) => Err(EngineError::NotTriggerable(name.to_string())),
            None => Err(EngineError::ElementNotFound(name.to_string())),
        }
    }

    // ── Data connections ─────────────────────────────────────────────────

    /// Connect the producer slot `from` to the INPUT slot `to`, both given
    /// as `<element>.<slot>`. A second connection to the same input
    /// replaces the first.
    pub fn connect(&self, from: &str, to: &str) -> Result<Validity> {
        self.connect_endpoints(Endpoint::parse(from)?, Endpoint::parse(to)?)
    }

    pub fn connect_endpoints(&self, from: Endpoint, to: Endpoint) -> Result<Validity> {
        let (validity, step, input) = self.bind_endpoints(from, to.clone())?;
        self.release_other_feeds(&step, &input, &to);
        Ok(validity)
    }

    fn bind_endpoints(&self, from: Endpoint, to: Endpoint) -> Result<(Validity, Arc<Step>, String)> {
        let mut inner = self.inner.write();
        let (handle, source, from_role) = producer(&inner, &from)?;
        let (step, _, input) = backing(&inner, &to, false)?;
        let validity = step
            .connect_handle(&input, &handle, source)
            .map_err(|e| match e {
                EngineError::InvalidConnection { reason, .. } => EngineError::InvalidConnection {
                    from: from.to_string(),
                    to: to.to_string(),
                    reason,
                },
                other => other,
            })?;

        inner.connections.retain(|c| c.to != to);
        tracing::debug!(group = %self.name, %from, %to, %validity, "Connected");
        inner.connections.push(Connection {
            from,
            from_role,
            to,
            validity: validity.clone(),
        });
        Ok((validity, step, input))
    }

    /// An input has one feed. Drop records anywhere in the tree, other
    /// than `to` here, that still claim to feed the same step input through
    /// another path, such as a boundary slot.
    fn release_other_feeds(&self, step: &Arc<Step>, input: &str, to: &Endpoint) {
        let tree = match self.top() {
            Some(top) => {
                let mut groups = top.nested_groups();
                groups.push(top);
                groups
            }
            None => self.nested_groups(),
        };
        let others = tree.iter().map(Arc::as_ref).filter(|g| g.id != self.id);
        for group in std::iter::once(self).chain(others) {
            let own = group.id == self.id;
            let mut inner = group.inner.write();
            let (stale, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut inner.connections)
                .into_iter()
                .partition(|c| {
                    !(own && c.to == *to)
                        && backing(&inner, &c.to, false)
                            .map(|(s, _, slot)| s.id() == step.id() && slot == input)
                            .unwrap_or(false)
                });
            inner.connections = kept;
            for conn in stale {
                tracing::debug!(group = %group.name, connection = %conn, "Connection superseded");
            }
        }
    }

    pub fn disconnect(&self, from: &str, to: &str) -> Result<()> {
        let from = Endpoint::parse(from)?;
        let to = Endpoint::parse(to)?;
        let mut inner = self.inner.write();
        let position = inner
            .connections
            .iter()
            .position(|c| c.from == from && c.to == to)
            .ok_or_else(|| EngineError::ConnectionNotFound {
                from: from.to_string(),
                to: to.to_string(),
            })?;
        inner.connections.remove(position);
        if let Ok((step, _, input)) = backing(&inner, &to, false) {
            step.disconnect_input(&input)?;
        }
        tracing::debug!(group = %self.name, %from, %to, "Disconnected");
        Ok(())
    }

    /// Sever whatever feeds `to`. Returns whether a connection was recorded.
    pub fn disconnect_input(&self, to: &str) -> Result<bool> {
        let to = Endpoint::parse(to)?;
        let mut inner = self.inner.write();
        let (step, _, input) = backing(&inner, &to, false)?;
        step.disconnect_input(&input)?;
        let before = inner.connections.len();
        inner.connections.retain(|c| c.to != to);
        Ok(inner.connections.len() != before)
    }

    pub fn connections(&self) -> Vec<Connection> {
        self.inner.read().connections.clone()
    }

    // ── Boundary slots ───────────────────────────────────────────────────

    /// Expose the child slot `element.slot` as boundary slot `name`.
    pub fn expose(&self, role: Role, name: &str, element: &str, slot: &str) -> Result<()> {
        let target = Endpoint::new(element, slot);
        let mut inner = self.inner.write();
        if inner
            .exposures
            .iter()
            .any(|e| e.role == role && e.name == name)
        {
            return Err(EngineError::DuplicateSlot {
                role,
                name: name.to_string(),
            });
        }
        let (_, actual, _) = backing(&inner, &target, role.is_producer())?;
        if actual != role {
            return Err(EngineError::RoleMismatch {
                name: target.to_string(),
                expected: role,
            });
        }
        tracing::debug!(group = %self.name, %role, boundary = name, %target, "Slot exposed");
        inner.exposures.push(Exposure {
            role,
            name: name.to_string(),
            target,
        });
        Ok(())
    }

    /// Remove a boundary slot. Connections the parent made to it are
    /// severed.
    pub fn unexpose(&self, role: Role, name: &str) -> Result<()> {
        let lost = {
            let mut inner = self.inner.write();
            let lost = Self::take_exposures(&mut inner, |e| e.role == role && e.name == name);
            if lost.is_empty() {
                return Err(EngineError::SlotNotFound {
                    role,
                    name: name.to_string(),
                });
            }
            lost
        };
        self.forget_in_parent(lost);
        Ok(())
    }

    pub fn exposures(&self) -> Vec<Exposure> {
        self.inner.read().exposures.clone()
    }

    /// Boundary slot names for `role`, in exposure order.
    pub fn slot_names(&self, role: Role) -> Vec<String> {
        self.inner
            .read()
            .exposures
            .iter()
            .filter(|e| e.role == role)
            .map(|e| e.name.clone())
            .collect()
    }

    /// Readable handle behind a boundary slot.
    pub fn handle(&self, role: Role, name: &str) -> Option<DataHandle> {
        let inner = self.inner.read();
        let (step, actual, slot) = boundary(&inner, name, role.is_producer()).ok()?;
        (actual == role).then(|| step.handle(role, &slot)).flatten()
    }

    /// Validity query forwarded to the step input backing boundary `input`.
    pub fn check_validity(&self, input: &str, candidate: &DataHandle) -> Result<Validity> {
        let inner = self.inner.read();
        let (step, _, slot) = boundary(&inner, input, false)?;
        step.check_validity(&slot, candidate)
    }

    /// Remove exposures matching `pred`, resolving INPUT backings first.
    fn take_exposures(
        inner: &mut GroupInner,
        pred: impl Fn(&Exposure) -> bool,
    ) -> Vec<LostBoundary> {
        let (lost, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut inner.exposures)
            .into_iter()
            .partition(|e| pred(e));
        inner.exposures = kept;
        lost.into_iter()
            .map(|exposure| {
                let input = if exposure.role == Role::Input {
                    backing(inner, &exposure.target, false)
                        .ok()
                        .map(|(step, _, slot)| (step, slot))
                } else {
                    None
                };
                (exposure, input)
            })
            .collect()
    }

    fn forget_in_parent(&self, lost: Vec<LostBoundary>) {
        if lost.is_empty() {
            return;
        }
        if let Some(parent) = self.parent() {
            for (exposure, input) in &lost {
                parent.forget_boundary(&self.name, exposure, input.as_ref());
            }
        }
    }

    /// Drop connection records to a child's vanished boundary slot.
    fn forget_boundary(&self, child: &str, exposure: &Exposure, input: Option<&(Arc<Step>, String)>) {
        let mut inner = self.inner.write();
        let (gone, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut inner.connections)
            .into_iter()
            .partition(|c| c.touches_slot(child, exposure.role, &exposure.name));
        inner.connections = kept;
        for conn in gone {
            let target = if exposure.role == Role::Input {
                input.cloned()
            } else {
                backing(&inner, &conn.to, false)
                    .ok()
                    .map(|(step, _, slot)| (step, slot))
            };
            if let Some((step, slot)) = target {
                if let Err(e) = step.disconnect_input(&slot) {
                    tracing::warn!(group = %self.name, "Failed to sever {}: {}", conn, e);
                }
            }
            tracing::debug!(group = %self.name, connection = %conn, "Boundary connection removed");
        }
    }

    // ── Step configuration ───────────────────────────────────────────────

    /// Apply a config value to a child step. Connections to slots the step
    /// dropped are pruned; connections to rebuilt slots are re-bound.
    pub fn set_config(&self, element: &str, key: &str, value: impl Into<ConfigValue>) -> Result<()> {
        let step = self.require_step(element)?;
        step.set_config(key, value)?;
        let lost = {
            let mut inner = self.inner.write();
            self.prune_stale(&mut inner, element)
        };
        self.forget_in_parent(lost);
        Ok(())
    }

    /// Remove a slot of a child step, severing its connections first.
    pub fn remove_slot(&self, element: &str, role: Role, slot: &str) -> Result<()> {
        let step = self.require_step(element)?;
        if role == Role::Input {
            step.disconnect_input(slot)?;
        }
        step.remove_slot(role, slot)?;
        let lost = {
            let mut inner = self.inner.write();
            self.prune_stale(&mut inner, element)
        };
        self.forget_in_parent(lost);
        Ok(())
    }

    fn prune_stale(&self, inner: &mut GroupInner, element: &str) -> Vec<LostBoundary> {
        let connections = std::mem::take(&mut inner.connections);
        let mut kept = Vec::with_capacity(connections.len());
        for mut conn in connections {
            if !conn.touches(element) {
                kept.push(conn);
                continue;
            }
            let input = backing(inner, &conn.to, false);
            let source = producer(inner, &conn.from);
            match (input, source) {
                (Ok((step, _, slot)), Ok((handle, address, _))) => {
                    let current = step.with_slots(|c| {
                        c.slot(Role::Input, &slot)
                            .and_then(|s| s.binding.as_ref())
                            .map(|b| b.handle.points_to(&handle))
                            .unwrap_or(false)
                    });
                    if current {
                        kept.push(conn);
                        continue;
                    }
                    match step.connect_handle(&slot, &handle, address) {
                        Ok(validity) => {
                            tracing::debug!(group = %self.name, connection = %conn, "Connection re-bound");
                            conn.validity = validity;
                            kept.push(conn);
                        }
                        Err(e) => {
                            let _ = step.disconnect_input(&slot);
                            tracing::warn!(group = %self.name, connection = %conn, "Connection dropped: {}", e);
                        }
                    }
                }
                (Ok((step, _, slot)), Err(_)) => {
                    let _ = step.disconnect_input(&slot);
                    tracing::debug!(group = %self.name, connection = %conn, "Connection dropped: producer slot removed");
                }
                (Err(_), _) => {
                    tracing::debug!(group = %self.name, connection = %conn, "Connection dropped: input slot removed");
                }
            }
        }
        inner.connections = kept;

        let view: &GroupInner = inner;
        let stale: Vec<Exposure> = view
            .exposures
            .iter()
            .filter(|e| {
                e.target.element == element
                    && backing(view, &e.target, e.role.is_producer())
                        .map(|(_, role, _)| role != e.role)
                        .unwrap_or(true)
            })
            .cloned()
            .collect();
        Self::take_exposures(inner, |e| stale.contains(e))
    }

    // ── Looped triggers ──────────────────────────────────────────────────

    pub fn add_looped_trigger(&self, name: &str, config: LoopedTriggerConfig) -> Result<LoopedTrigger> {
        let mut inner = self.inner.write();
        if inner.triggers.contains_key(name) {
            return Err(EngineError::DuplicateTrigger(name.to_string()));
        }
        let trigger = LoopedTrigger::new(name, config);
        tracing::debug!(group = %self.name, trigger = name, period_ms = config.period_ms, "Looped trigger added");
        inner.triggers.insert(name.to_string(), trigger.clone());
        Ok(trigger)
    }

    /// Stop and drop a local looped trigger, detaching everything on it.
    pub fn remove_looped_trigger(&self, name: &str) -> Result<()> {
        let trigger = self
            .inner
            .write()
            .triggers
            .shift_remove(name)
            .ok_or_else(|| EngineError::TriggerNotFound(name.to_string()))?;
        trigger.stop()?;
        for id in trigger.attached_ids() {
            trigger.detach(id)?;
        }
        Ok(())
    }

    /// Local looped trigger by name.
    pub fn looped_trigger(&self, name: &str) -> Option<LoopedTrigger> {
        self.inner.read().triggers.get(name).cloned()
    }

    /// Local trigger first, then the enclosing groups'.
    pub fn find_trigger(&self, name: &str) -> Option<LoopedTrigger> {
        if let Some(trigger) = self.looped_trigger(name) {
            return Some(trigger);
        }
        self.parent().and_then(|p| p.find_trigger(name))
    }

    /// Step at a dotted path below this group, e.g. `filter.smooth`.
    pub fn step_at(&self, path: &str) -> Result<Arc<Step>> {
        match path.split_once('.') {
            None => self.require_step(path),
            Some((head, rest)) => self
                .group(head)
                .ok_or_else(|| EngineError::ElementNotFound(head.to_string()))?
                .step_at(rest),
        }
    }

    /// Put a step (a child, or a dotted path into nested groups) on a
    /// looped trigger of this group or an enclosing one, moving it off its
    /// previous trigger. Both must be stopped.
    pub fn assign(&self, element: &str, trigger: &str) -> Result<()> {
        let step = self.step_at(element)?;
        let looped = self
            .find_trigger(trigger)
            .ok_or_else(|| EngineError::TriggerNotFound(trigger.to_string()))?;
        looped.attach(step)
    }

    /// Take a child step off its looped trigger.
    pub fn unassign(&self, element: &str) -> Result<bool> {
        let step = self.require_step(element)?;
        match step.owner_trigger() {
            Some(owner) => owner.detach(step.id()),
            None => Ok(false),
        }
    }

    /// Chain `to` onto the finished trigger of `from`. Cycles are accepted
    /// here and reported when the cascade is planned.
    pub fn connect_trigger(&self, from: &str, to: &str) -> Result<()> {
        let source = self.require_step(from)?;
        let target = self.require_step(to)?;
        source.finished().connect(&target);
        let mut inner = self.inner.write();
        let chain = (from.to_string(), to.to_string());
        if !inner.chains.contains(&chain) {
            inner.chains.push(chain);
        }
        tracing::debug!(group = %self.name, from, to, "Trigger chained");
        Ok(())
    }

    pub fn disconnect_trigger(&self, from: &str, to: &str) -> Result<bool> {
        let source = self.require_step(from)?;
        let target = self.require_step(to)?;
        let removed = source.finished().disconnect(target.id());
        self.inner
            .write()
            .chains
            .retain(|(f, t)| !(f == from && t == to));
        Ok(removed)
    }

    pub fn chains(&self) -> Vec<(String, String)> {
        self.inner.read().chains.clone()
    }

    /// Looped triggers of this group and all nested groups, de-duplicated.
    pub fn looped_triggers(&self) -> Vec<LoopedTrigger> {
        let (mut triggers, children): (Vec<LoopedTrigger>, Vec<Arc<Group>>) = {
            let inner = self.inner.read();
            (
                inner.triggers.values().cloned().collect(),
                inner
                    .elements
                    .values()
                    .filter_map(|e| e.as_group().cloned())
                    .collect(),
            )
        };
        for child in children {
            for trigger in child.looped_triggers() {
                if !triggers.iter().any(|t| t.same_as(&trigger)) {
                    triggers.push(trigger);
                }
            }
        }
        triggers
    }

    pub fn start_all(&self) -> Result<()> {
        let triggers = self.looped_triggers();
        for trigger in &triggers {
            trigger
                .start()
                .with_context(|| format!("Failed to start '{}'", trigger.name()))?;
        }
        tracing::info!(group = %self.name, triggers = triggers.len(), "All looped triggers started");
        Ok(())
    }

    pub fn stop_all(&self) -> Result<()> {
        for trigger in self.looped_triggers() {
            trigger.stop()?;
        }
        Ok(())
    }

    // ── Views ────────────────────────────────────────────────────────────

    pub fn topology(&self) -> TopologySnapshot {
        let inner = self.inner.read();

        let elements = inner
            .elements
            .iter()
            .map(|(name, element)| match element {
                Element::Step(step) => {
                    let status = step.status();
                    ElementSnapshot {
                        id: step.id(),
                        name: name.clone(),
                        element_type: step.type_name(),
                        state: Some(status.state),
                        message: status.message,
                        trigger: step.owner_trigger().map(|t| t.name().to_string()),
                        slots: step.with_slots(|c| c.all_slots().map(slot_snapshot).collect()),
                        children: None,
                    }
                }
                Element::Group(group) => ElementSnapshot {
                    id: group.id,
                    name: name.clone(),
                    element_type: "group".to_string(),
                    state: None,
                    message: None,
                    trigger: None,
                    slots: group.boundary_snapshots(),
                    children: Some(Box::new(group.topology())),
                },
            })
            .collect();

        let connections = inner
            .connections
            .iter()
            .map(|c| ConnectionSnapshot {
                from: c.from.to_string(),
                to: c.to.to_string(),
                validity: c.validity.clone(),
            })
            .collect();

        let triggers = inner
            .triggers
            .values()
            .map(|trigger| {
                let plan = trigger.plan();
                let names: HashMap<NodeId, String> =
                    plan.entries.iter().map(|e| (e.id, e.name.clone())).collect();
                TriggerSnapshot {
                    id: trigger.id(),
                    name: trigger.name().to_string(),
                    period_ms: trigger.config().period_ms,
                    running: trigger.is_running(),
                    attached: trigger.attached().iter().map(|n| n.name()).collect(),
                    order: plan
                        .order()
                        .levels
                        .into_iter()
                        .map(|(depth, ids)| {
                            let ids = ids
                                .iter()
                                .map(|id| names.get(id).cloned().unwrap_or_else(|| id.to_string()))
                                .collect();
                            (depth, ids)
                        })
                        .collect(),
                    cascades: trigger.cascade_count(),
                }
            })
            .collect();

        TopologySnapshot {
            id: self.id,
            group: self.name.clone(),
            elements,
            connections,
            chains: inner.chains.clone(),
            triggers,
            boundary: inner
                .exposures
                .iter()
                .map(|e| BoundarySnapshot {
                    role: e.role,
                    name: e.name.clone(),
                    target: e.target.to_string(),
                })
                .collect(),
        }
    }

    fn boundary_snapshots(&self) -> Vec<SlotSnapshot> {
        let inner = self.inner.read();
        inner
            .exposures
            .iter()
            .filter_map(|exposure| {
                let (step, role, slot) =
                    backing(&inner, &exposure.target, exposure.role.is_producer()).ok()?;
                let mut snapshot = step.with_slots(|c| c.slot(role, &slot).map(slot_snapshot))?;
                snapshot.name = exposure.name.clone();
                Some(snapshot)
            })
            .collect()
    }

    /// Persistable description of this group and its nested groups. Only
    /// serializable slots are recorded.
    pub fn describe(&self) -> GraphDescription {
        let paths = self.step_paths();
        let inner = self.inner.read();

        let elements = inner
            .elements
            .iter()
            .map(|(name, element)| {
                let description = match element {
                    Element::Step(step) => ElementDescription {
                        step_type: Some(step.type_name()),
                        config: step.config(),
                        slots: step.with_slots(|c| {
                            c.all_slots()
                                .filter(|s| s.serializable)
                                .map(|s| SlotDescription {
                                    name: s.name.clone(),
                                    role: s.role,
                                    mandatory: s.mandatory,
                                    kind: s.kind.clone(),
                                })
                                .collect()
                        }),
                        group: None,
                    },
                    Element::Group(group) => ElementDescription::group(group.describe()),
                };
                (name.clone(), description)
            })
            .collect();

        let triggers = inner
            .triggers
            .iter()
            .map(|(name, trigger)| {
                let config = trigger.config();
                let attached = trigger
                    .attached_ids()
                    .iter()
                    .filter_map(|id| paths.get(id).cloned())
                    .collect();
                (name.clone(), TriggerDescription::from_config(&config, attached))
            })
            .collect();

        GraphDescription {
            elements,
            connections: inner
                .connections
                .iter()
                .map(|c| ConnectionDescription {
                    from: c.from.clone(),
                    to: c.to.clone(),
                })
                .collect(),
            triggers,
            chains: inner
                .chains
                .iter()
                .map(|(from, to)| ChainDescription {
                    from: from.clone(),
                    to: to.clone(),
                })
                .collect(),
            exposures: inner
                .exposures
                .iter()
                .map(|e| ExposureDescription {
                    role: e.role,
                    name: e.name.clone(),
                    target: e.target.clone(),
                })
                .collect(),
        }
    }

    /// Dotted path of every step at or below this group, keyed by id.
    fn step_paths(&self) -> HashMap<NodeId, String> {
        let elements: Vec<(String, Element)> = self
            .inner
            .read()
            .elements
            .iter()
            .map(|(name, element)| (name.clone(), element.clone()))
            .collect();
        let mut paths = HashMap::new();
        for (name, element) in elements {
            match element {
                Element::Step(step) => {
                    paths.insert(step.id(), name);
                }
                Element::Group(group) => {
                    for (id, path) in group.step_paths() {
                        paths.insert(id, format!("{}.{}", name, path));
                    }
                }
            }
        }
        paths
    }

    /// Rebuild a group from its description. Nested groups are built
    /// first, then boundary slots, connections, triggers and chains.
    pub fn from_description(
        registry: &StepRegistry,
        name: &str,
        desc: &GraphDescription,
    ) -> Result<Arc<Group>> {
        Self::from_description_with_defaults(registry, name, desc, LoopedTriggerConfig::default())
    }

    /// Like [`Group::from_description`], with `trigger_defaults` filling in
    /// trigger settings the description leaves out.
    pub fn from_description_with_defaults(
        registry: &StepRegistry,
        name: &str,
        desc: &GraphDescription,
        trigger_defaults: LoopedTriggerConfig,
    ) -> Result<Arc<Group>> {
        let group = Group::new(name);

        for (element, description) in &desc.elements {
            match (&description.step_type, &description.group) {
                (Some(step_type), None) => {
                    let step = registry.create(step_type, element, &description.config)?;
                    apply_slots(&step, &description.slots)
                        .with_context(|| format!("Failed to restore slots of '{}'", element))?;
                    group.add_step(step)?;
                }
                (None, Some(nested)) => {
                    let child = Group::from_description_with_defaults(
                        registry,
                        element,
                        nested,
                        trigger_defaults,
                    )?;
                    group.add_group(child)?;
                }
                _ => {
                    return Err(EngineError::Config(format!(
                        "element '{}' needs exactly one of 'step_type' and 'group'",
                        element
                    )))
                }
            }
        }

        for exposure in &desc.exposures {
            group.expose(
                exposure.role,
                &exposure.name,
                &exposure.target.element,
                &exposure.target.slot,
            )?;
        }

        for conn in &desc.connections {
            group
                .connect_endpoints(conn.from.clone(), conn.to.clone())
                .with_context(|| format!("Failed to connect {} -> {}", conn.from, conn.to))?;
        }

        for (trigger, description) in &desc.triggers {
            let looped = group.add_looped_trigger(trigger, description.config_or(trigger_defaults))?;
            for path in &description.attached {
                // By object, so a nested trigger of the same name cannot
                // shadow this one.
                looped.attach(group.step_at(path)?)?;
            }
        }

        for chain in &desc.chains {
            group.connect_trigger(&chain.from, &chain.to)?;
        }

        tracing::info!(
            group = name,
            elements = desc.elements.len(),
            connections = desc.connections.len(),
            "Group restored"
        );
        Ok(group)
    }
}

impl Drop for Group {
    fn drop(&mut self) {
        for trigger in self.inner.get_mut().triggers.values() {
            if let Err(e) = trigger.stop() {
                tracing::warn!(group = %self.name, trigger = trigger.name(), "Failed to stop: {}", e);
            }
        }
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("elements", &self.element_names())
            .finish()
    }
}

fn slot_snapshot(slot: &DataSlot) -> SlotSnapshot {
    SlotSnapshot {
        name: slot.name.clone(),
        role: slot.role,
        kind: slot.kind.clone(),
        mandatory: slot.mandatory,
        serializable: slot.serializable,
        connected: slot.is_connected(),
        version: slot.readable_handle().map(|h| h.version()),
    }
}

fn apply_slots(step: &Step, slots: &[SlotDescription]) -> Result<()> {
    for slot in slots {
        let existing = step.with_slots(|c| c.slot(slot.role, &slot.name).map(|s| s.kind.clone()));
        match existing {
            Some(kind) if kind != slot.kind => {
                return Err(EngineError::KindMismatch {
                    expected: kind,
                    actual: slot.kind.clone(),
                })
            }
            Some(_) => step.set_mandatory(slot.role, &slot.name, slot.mandatory)?,
            None => step.declare_slot(slot.role, &slot.name, slot.kind.clone(), slot.mandatory)?,
        }
    }
    Ok(())
}

/// Resolve `ep` to the step slot that backs it. With `producer` set an
/// OUTPUT or BUFFER slot is looked up, otherwise an INPUT slot.
fn backing(inner: &GroupInner, ep: &Endpoint, producer: bool) -> Result<(Arc<Step>, Role, String)> {
    let element = inner
        .elements
        .get(&ep.element)
        .ok_or_else(|| EngineError::ElementNotFound(ep.element.clone()))?;
    backing_of(element, &ep.slot, producer)
}

fn backing_of(element: &Element, slot: &str, producer: bool) -> Result<(Arc<Step>, Role, String)> {
    match element {
        Element::Step(step) => {
            let (wanted, other): (&[Role], &[Role]) = if producer {
                (&[Role::Output, Role::Buffer], &[Role::Input])
            } else {
                (&[Role::Input], &[Role::Output, Role::Buffer])
            };
            let has = |role: Role| step.with_slots(|c| c.slot(role, slot).is_some());
            if let Some(role) = wanted.iter().copied().find(|r| has(*r)) {
                return Ok((step.clone(), role, slot.to_string()));
            }
            let expected = wanted[0];
            if other.iter().any(|r| has(*r)) {
                Err(EngineError::RoleMismatch {
                    name: format!("{}.{}", step.name(), slot),
                    expected,
                })
            } else {
                Err(EngineError::SlotNotFound {
                    role: expected,
                    name: format!("{}.{}", step.name(), slot),
                })
            }
        }
        Element::Group(group) => {
            let inner = group.inner.read();
            boundary(&inner, slot, producer)
        }
    }
}

fn boundary(inner: &GroupInner, name: &str, producer: bool) -> Result<(Arc<Step>, Role, String)> {
    let exposure = inner
        .exposures
        .iter()
        .find(|e| e.name == name && e.role.is_producer() == producer)
        .ok_or_else(|| EngineError::SlotNotFound {
            role: if producer { Role::Output } else { Role::Input },
            name: name.to_string(),
        })?;
    backing(inner, &exposure.target, producer)
}

fn producer(inner: &GroupInner, ep: &Endpoint) -> Result<(DataHandle, SlotAddress, Role)> {
    let (step, role, slot) = backing(inner, ep, true)?;
    let handle = step.producer_handle(role, &slot)?;
    Ok((handle, step.address(role, &slot), role))
}
