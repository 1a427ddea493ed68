//! Steps: a computation with slots, driven by triggers.
//!
//! A `Step` combines the connectable capability (its slots) with the
//! triggerable capability (state machine plus finished trigger). Slots and
//! computation live behind one `parking_lot::Mutex`, so a tick, a function
//! call, a config change and a disconnect never interleave.
//!
//! Status callbacks are always emitted after that lock is released.

use crate::engine::callbacks::Callbacks;
use crate::engine::computation::{AnyStep, BuiltinStep, Staged, StepPlugin, TickContext};
use crate::engine::connectable::Connectable;
use crate::engine::handle::{DataHandle, HandleSnapshot};
use crate::engine::id::{CallbackId, NodeId};
use crate::engine::looped::LoopedTrigger;
use crate::engine::slot::{InputBinding, Role, SlotAddress};
use crate::engine::steps::FnStep;
use crate::engine::trigger::Trigger;
use crate::engine::triggerable::{OwnerLink, State, Status, StatusChange, TickOutcome, Triggerable};
use crate::engine::validity::{Validity, ValidityRegistry};
use crate::engine::value::{ConfigValue, DataKind, DataValue};
use crate::error::{EngineError, Result};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct StepCore {
    slots: Connectable,
    computation: AnyStep,
    ticks: u64,
}

pub struct Step {
    id: NodeId,
    name: String,
    core: Mutex<StepCore>,
    status: RwLock<Status>,
    finished: Trigger,
    owner: OwnerLink,
    /// Planned by a running looped trigger, directly or through a chain.
    active: AtomicBool,
    validity: Arc<ValidityRegistry>,
    status_callbacks: Callbacks<StatusChange>,
}

impl Step {
    /// Create a step and let the computation declare its slots.
    pub fn new(
        name: impl Into<String>,
        computation: impl Into<AnyStep>,
        validity: Arc<ValidityRegistry>,
    ) -> Result<Arc<Self>> {
        let name = name.into();
        let id = NodeId::new();
        let computation = computation.into();
        let mut slots = Connectable::new(id);
        computation.declare(&mut slots)?;

        tracing::debug!(step = %name, id = %id, kind = computation.type_name(), "Step created");
        Ok(Arc::new(Self {
            id,
            finished: Trigger::new(format!("{}.finished", name)),
            name,
            core: Mutex::new(StepCore {
                slots,
                computation,
                ticks: 0,
            }),
            status: RwLock::new(Status::default()),
            owner: OwnerLink::new(),
            active: AtomicBool::new(false),
            validity,
            status_callbacks: Callbacks::new(),
        }))
    }

    /// Built-in step with the default validity rules.
    pub fn builtin(name: impl Into<String>, step: BuiltinStep) -> Result<Arc<Self>> {
        Self::new(name, step, Arc::new(ValidityRegistry::new()))
    }

    /// Plugin step with the default validity rules.
    pub fn plugin(name: impl Into<String>, plugin: Box<dyn StepPlugin>) -> Result<Arc<Self>> {
        Self::new(name, AnyStep::Plugin(plugin), Arc::new(ValidityRegistry::new()))
    }

    /// Closure-backed step, mostly for tests and small glue computations.
    pub fn from_fn<D, C>(name: impl Into<String>, declare: D, compute: C) -> Result<Arc<Self>>
    where
        D: Fn(&mut Connectable) -> Result<()> + Send + 'static,
        C: FnMut(&mut TickContext) -> anyhow::Result<()> + Send + 'static,
    {
        let name = name.into();
        let plugin = FnStep::new(name.clone(), declare).compute(compute);
        Self::plugin(name, Box::new(plugin))
    }

    pub fn type_name(&self) -> String {
        self.core.lock().computation.type_name().to_string()
    }

    // ── Slots ────────────────────────────────────────────────────────────

    pub fn slot_names(&self, role: Role) -> Vec<String> {
        self.core.lock().slots.slot_names(role)
    }

    /// Run `f` against the slot set under the step lock.
    pub fn with_slots<R>(&self, f: impl FnOnce(&Connectable) -> R) -> R {
        f(&self.core.lock().slots)
    }

    pub fn declare_slot(&self, role: Role, name: &str, kind: DataKind, mandatory: bool) -> Result<()> {
        self.core.lock().slots.declare_slot(role, name, kind, mandatory)
    }

    pub fn declare_slot_with(
        &self,
        role: Role,
        name: &str,
        initial: DataValue,
        mandatory: bool,
    ) -> Result<()> {
        self.core
            .lock()
            .slots
            .declare_slot_with(role, name, initial, mandatory)
    }

    /// Remove a slot. Downstream inputs lose their handle with it; the
    /// owning group prunes its connection records.
    pub fn remove_slot(&self, role: Role, name: &str) -> Result<()> {
        self.core.lock().slots.remove_slot(role, name).map(|_| ())
    }

    pub fn set_mandatory(&self, role: Role, name: &str, mandatory: bool) -> Result<()> {
        self.core.lock().slots.set_mandatory(role, name, mandatory)
    }

    pub fn set_serializable(&self, role: Role, name: &str, serializable: bool) -> Result<()> {
        self.core
            .lock()
            .slots
            .set_serializable(role, name, serializable)
    }

    /// Handle a reader of this slot sees: the own handle for producers, the
    /// bound upstream handle for inputs.
    pub fn handle(&self, role: Role, name: &str) -> Option<DataHandle> {
        self.core.lock().slots.handle(role, name)
    }

    /// Read-only snapshot of a slot's data.
    pub fn read(&self, role: Role, name: &str) -> Option<HandleSnapshot> {
        self.handle(role, name).map(|h| h.snapshot())
    }

    pub fn producer_handle(&self, role: Role, name: &str) -> Result<DataHandle> {
        self.core.lock().slots.producer_handle(role, name)
    }

    pub fn address(&self, role: Role, name: &str) -> SlotAddress {
        SlotAddress::new(self.id, role, name)
    }

    // ── Connections ──────────────────────────────────────────────────────

    /// Pure query: would `input` accept `candidate`? The computation may
    /// override the registry rule per slot.
    pub fn check_validity(&self, input: &str, candidate: &DataHandle) -> Result<Validity> {
        let core = self.core.lock();
        self.validity_locked(&core, input, candidate)
    }

    fn validity_locked(&self, core: &StepCore, input: &str, candidate: &DataHandle) -> Result<Validity> {
        let default = core.slots.check_validity(input, candidate, &self.validity)?;
        Ok(core
            .computation
            .check_validity(input, candidate)
            .unwrap_or(default))
    }

    /// Bind `input` to `upstream`'s producer slot.
    pub fn connect_input(
        &self,
        input: &str,
        upstream: &Step,
        role: Role,
        output: &str,
    ) -> Result<Validity> {
        // Upstream lock is released before ours is taken.
        let handle = upstream.producer_handle(role, output)?;
        self.connect_handle(input, &handle, upstream.address(role, output))
    }

    /// Bind `input` to an arbitrary handle. On a rejected check nothing
    /// changes.
    pub fn connect_handle(
        &self,
        input: &str,
        handle: &DataHandle,
        source: SlotAddress,
    ) -> Result<Validity> {
        let mut core = self.core.lock();
        let validity = self.validity_locked(&core, input, handle)?;
        if let Validity::Error(reason) = &validity {
            return Err(EngineError::InvalidConnection {
                from: source.to_string(),
                to: format!("{}.{}", self.name, input),
                reason: reason.clone(),
            });
        }
        if let Validity::Warning(msg) = &validity {
            tracing::warn!(step = %self.name, input, "Connection accepted with warning: {}", msg);
        }
        core.slots
            .bind_input(input, handle, source, validity.clone())?;
        Ok(validity)
    }

    /// Clear an input's binding. Serialized with `tick`.
    pub fn disconnect_input(&self, input: &str) -> Result<Option<InputBinding>> {
        self.core.lock().slots.unbind_input(input)
    }

    /// Clear every input bound to `producer`.
    pub fn disconnect_from(&self, producer: NodeId) -> usize {
        self.core.lock().slots.unbind_from(producer)
    }

    // ── Configuration and functions ──────────────────────────────────────

    pub fn set_config(&self, key: &str, value: impl Into<ConfigValue>) -> Result<()> {
        let value = value.into();
        let mut core = self.core.lock();
        let StepCore {
            slots, computation, ..
        } = &mut *core;
        computation.on_config_change(key, &value, slots)?;
        tracing::debug!(step = %self.name, key, ?value, "Config applied");
        Ok(())
    }

    pub fn config(&self) -> IndexMap<String, ConfigValue> {
        self.core.lock().computation.config()
    }

    pub fn functions(&self) -> Vec<String> {
        self.core.lock().computation.functions()
    }

    /// Run a zero-argument function synchronously, serialized with ticks.
    pub fn call_function(&self, name: &str) -> Result<()> {
        let mut core = self.core.lock();
        if !core.computation.functions().iter().any(|f| f == name) {
            return Err(EngineError::UnknownFunction {
                step: self.name.clone(),
                function: name.to_string(),
            });
        }
        let StepCore {
            slots, computation, ..
        } = &mut *core;
        let result = panic::catch_unwind(AssertUnwindSafe(|| computation.call_function(name, slots)));
        let failure = match result {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(e)) => format!("{:#}", e),
            Err(payload) => panic_message(payload),
        };
        Err(EngineError::FunctionFailed {
            step: self.name.clone(),
            function: name.to_string(),
            message: failure,
        })
    }

    // ── Status ───────────────────────────────────────────────────────────

    pub fn on_status_change<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&StatusChange) + Send + Sync + 'static,
    {
        self.status_callbacks.subscribe(callback)
    }

    pub fn remove_status_callback(&self, id: CallbackId) -> bool {
        self.status_callbacks.unsubscribe(id)
    }

    pub fn state(&self) -> State {
        self.status.read().state
    }

    pub fn tick_count(&self) -> u64 {
        self.core.lock().ticks
    }

    pub fn owner_trigger(&self) -> Option<LoopedTrigger> {
        self.owner.get()
    }

    /// Whether a running looped trigger currently drives this step, either
    /// as its owner or through a chain.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
            || self.owner.get().map(|t| t.is_running()).unwrap_or(false)
    }

    fn set_status(&self, state: State, message: Option<String>) {
        let change = {
            let mut status = self.status.write();
            if status.state == state && status.message == message {
                None
            } else {
                let previous = status.state;
                *status = Status::new(state, message);
                Some(StatusChange {
                    node: self.id,
                    name: self.name.clone(),
                    previous,
                    status: status.clone(),
                })
            }
        };
        if let Some(change) = change {
            self.status_callbacks.emit(&change);
        }
    }

    /// First reason a mandatory input blocks the tick.
    fn gate_reason(&self, core: &StepCore) -> Option<String> {
        for slot in core.slots.slots(Role::Input).filter(|s| s.mandatory) {
            let Some(handle) = slot.bound_handle() else {
                return Some(format!("mandatory input '{}' is not connected", slot.name));
            };
            match self.validity_locked(core, &slot.name, &handle) {
                Ok(validity) if validity.is_accepted() => {}
                Ok(validity) => {
                    return Some(format!("input '{}' is invalid: {}", slot.name, validity));
                }
                Err(e) => return Some(e.to_string()),
            }
        }
        None
    }

    fn run_tick(&self, dt: Duration) -> TickOutcome {
        let mut core = self.core.lock();

        if let Some(reason) = self.gate_reason(&core) {
            drop(core);
            tracing::debug!(step = %self.name, "Tick gated: {}", reason);
            self.set_status(State::Initializing, Some(reason.clone()));
            return TickOutcome::Gated(reason);
        }

        core.ticks += 1;
        let mut ctx = TickContext::new(dt, core.ticks);
        for slot in core.slots.slots(Role::Input) {
            let Some(handle) = slot.bound_handle() else {
                continue;
            };
            // Optional inputs that fail their check are simply absent.
            if !slot.mandatory {
                let accepted = self
                    .validity_locked(&core, &slot.name, &handle)
                    .map(|v| v.is_accepted())
                    .unwrap_or(false);
                if !accepted {
                    continue;
                }
            }
            ctx.inputs.insert(slot.name.clone(), handle.snapshot());
        }
        for (role, target) in [(Role::Output, &mut ctx.outputs), (Role::Buffer, &mut ctx.buffers)] {
            for slot in core.slots.slots(role) {
                if let Some(handle) = &slot.handle {
                    target.insert(
                        slot.name.clone(),
                        Staged {
                            kind: slot.kind.clone(),
                            value: handle.value(),
                            annotations: None,
                            dirty: false,
                        },
                    );
                }
            }
        }

        let result = panic::catch_unwind(AssertUnwindSafe(|| core.computation.compute(&mut ctx)));
        let failure = match result {
            Ok(Ok(())) => publish(&core.slots, &ctx).err(),
            Ok(Err(e)) => Some(format!("{:#}", e)),
            Err(payload) => Some(panic_message(payload)),
        };
        drop(core);

        match failure {
            None => {
                self.set_status(State::Running, None);
                self.finished.mark_fired();
                TickOutcome::Fired
            }
            Some(message) => {
                tracing::error!(step = %self.name, "Computation failed: {}", message);
                self.set_status(State::Exception, Some(message.clone()));
                TickOutcome::Failed(message)
            }
        }
    }
}

/// Publish staged values. Kinds are checked for every written slot before
/// any handle is touched.
fn publish(slots: &Connectable, ctx: &TickContext) -> std::result::Result<(), String> {
    let written = [(Role::Output, &ctx.outputs), (Role::Buffer, &ctx.buffers)];
    for (role, staged) in written {
        for (name, value) in staged.iter().filter(|(_, s)| s.dirty) {
            if value.value.kind() != value.kind {
                return Err(format!(
                    "{} '{}' expects {}, got {}",
                    role,
                    name,
                    value.kind,
                    value.value.kind()
                ));
            }
        }
    }
    for (role, staged) in written {
        for (name, value) in staged.iter().filter(|(_, s)| s.dirty) {
            let Some(handle) = slots.slot(role, name).and_then(|s| s.handle.as_ref()) else {
                continue;
            };
            let published = match &value.annotations {
                Some(annotations) => handle.publish_with(value.value.clone(), annotations.clone()),
                None => handle.publish(value.value.clone()),
            };
            published.map_err(|e| e.to_string())?;
        }
    }
    Ok(())
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", msg)
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("panicked: {}", msg)
    } else {
        "panicked".to_string()
    }
}

impl Triggerable for Step {
    fn id(&self) -> NodeId {
        self.id
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn status(&self) -> Status {
        self.status.read().clone()
    }

    fn tick(&self, dt: Duration) -> TickOutcome {
        if self.state() == State::Exception {
            return TickOutcome::Skipped;
        }
        self.run_tick(dt)
    }

    fn finished(&self) -> &Trigger {
        &self.finished
    }

    fn on_start(&self) {
        self.active.store(true, Ordering::Release);
        self.core.lock().computation.on_start();
        if self.state() != State::Exception {
            self.set_status(State::Initializing, None);
        }
    }

    fn on_stop(&self) {
        self.active.store(false, Ordering::Release);
        self.core.lock().computation.on_stop();
        if self.state() != State::Exception {
            self.set_status(State::NotRunning, None);
        }
    }

    fn reset(&self) {
        let state = if self.is_active() {
            State::Initializing
        } else {
            State::NotRunning
        };
        tracing::info!(step = %self.name, %state, "Step reset");
        self.set_status(state, None);
    }

    fn upstream(&self) -> Vec<NodeId> {
        self.core.lock().slots.upstream()
    }

    fn owner_link(&self) -> &OwnerLink {
        &self.owner
    }
}

impl std::fmt::Debug for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}
