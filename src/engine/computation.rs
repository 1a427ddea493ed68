//! Step computations.
//!
//! Two-layer design, same as the rest of the engine:
//! - **`StepPlugin` trait** for user-defined computations.
//! - **`BuiltinStep` enum** for the built-in ones, dispatched by match.
//!
//! `AnyStep` wraps either so a [`Step`](crate::engine::step::Step) can hold
//! both uniformly.

use crate::engine::connectable::Connectable;
use crate::engine::handle::{DataHandle, HandleSnapshot};
use crate::engine::slot::Role;
use crate::engine::steps::{
    ComponentStep, ConstantStep, GainStep, RampStep, RecorderStep, ScriptStep, SumStep,
};
use crate::engine::validity::Validity;
use crate::engine::value::{Annotation, ConfigValue, DataKind, DataValue};
use crate::error::Result;
use anyhow::{anyhow, bail};
use indexmap::IndexMap;
use std::time::Duration;

/// A staged OUTPUT or BUFFER value. Published only when the computation
/// returns successfully and only if it was written.
#[derive(Debug, Clone)]
pub(crate) struct Staged {
    pub kind: DataKind,
    pub value: DataValue,
    pub annotations: Option<Vec<Annotation>>,
    pub dirty: bool,
}

/// What a computation sees during one tick.
#[derive(Debug)]
pub struct TickContext {
    /// Time since the previous cascade of the driving trigger.
    pub dt: Duration,
    /// Number of ticks this step has run, starting at 1.
    pub tick: u64,
    pub(crate) inputs: IndexMap<String, HandleSnapshot>,
    pub(crate) outputs: IndexMap<String, Staged>,
    pub(crate) buffers: IndexMap<String, Staged>,
}

impl TickContext {
    pub(crate) fn new(dt: Duration, tick: u64) -> Self {
        Self {
            dt,
            tick,
            inputs: IndexMap::new(),
            outputs: IndexMap::new(),
            buffers: IndexMap::new(),
        }
    }

    /// Value of a connected input, `None` if the input is unconnected.
    pub fn input(&self, name: &str) -> Option<&DataValue> {
        self.inputs.get(name).map(|snap| &snap.value)
    }

    pub fn input_snapshot(&self, name: &str) -> Option<&HandleSnapshot> {
        self.inputs.get(name)
    }

    /// Scalar input shortcut.
    pub fn scalar(&self, name: &str) -> Option<f64> {
        self.input(name).and_then(|v| v.as_scalar())
    }

    /// Names of the inputs that carry data this tick.
    pub fn input_names(&self) -> impl Iterator<Item = &str> {
        self.inputs.keys().map(|k| k.as_str())
    }

    pub fn dt_secs(&self) -> f64 {
        self.dt.as_secs_f64()
    }

    /// Current (staged) output value.
    pub fn output(&self, name: &str) -> Option<&DataValue> {
        self.outputs.get(name).map(|s| &s.value)
    }

    pub fn set_output(&mut self, name: &str, value: impl Into<DataValue>) -> anyhow::Result<()> {
        stage(&mut self.outputs, Role::Output, name, value.into())
    }

    /// Mutable staged output. Marks it for publishing.
    pub fn output_mut(&mut self, name: &str) -> Option<&mut DataValue> {
        self.outputs.get_mut(name).map(|s| {
            s.dirty = true;
            &mut s.value
        })
    }

    pub fn buffer(&self, name: &str) -> Option<&DataValue> {
        self.buffers.get(name).map(|s| &s.value)
    }

    pub fn set_buffer(&mut self, name: &str, value: impl Into<DataValue>) -> anyhow::Result<()> {
        stage(&mut self.buffers, Role::Buffer, name, value.into())
    }

    pub fn buffer_mut(&mut self, name: &str) -> Option<&mut DataValue> {
        self.buffers.get_mut(name).map(|s| {
            s.dirty = true;
            &mut s.value
        })
    }

    /// Replace the annotations published with an OUTPUT or BUFFER value.
    pub fn set_annotations(
        &mut self,
        role: Role,
        name: &str,
        annotations: Vec<Annotation>,
    ) -> anyhow::Result<()> {
        let staged = match role {
            Role::Output => self.outputs.get_mut(name),
            Role::Buffer => self.buffers.get_mut(name),
            Role::Input => bail!("cannot annotate input '{}'", name),
        }
        .ok_or_else(|| anyhow!("no {} slot '{}'", role, name))?;
        staged.annotations = Some(annotations);
        staged.dirty = true;
        Ok(())
    }
}

fn stage(
    slots: &mut IndexMap<String, Staged>,
    role: Role,
    name: &str,
    value: DataValue,
) -> anyhow::Result<()> {
    let staged = slots
        .get_mut(name)
        .ok_or_else(|| anyhow!("no {} slot '{}'", role, name))?;
    if value.kind() != staged.kind {
        bail!(
            "{} '{}' expects {}, got {}",
            role,
            name,
            staged.kind,
            value.kind()
        );
    }
    staged.value = value;
    staged.dirty = true;
    Ok(())
}

/// Trait for user-defined step computations.
pub trait StepPlugin: Send {
    /// Registry type name, e.g. `"gain"`.
    fn type_name(&self) -> &str;

    /// Declare the initial slot set.
    fn declare(&self, slots: &mut Connectable) -> Result<()>;

    /// Run once. Errors and panics move the step to `Exception`.
    fn compute(&mut self, ctx: &mut TickContext) -> anyhow::Result<()>;

    /// Per-slot override of the default validity check.
    fn check_validity(&self, _input: &str, _candidate: &DataHandle) -> Option<Validity> {
        None
    }

    fn on_start(&mut self) {}

    fn on_stop(&mut self) {}

    /// Apply a configuration value. May rebuild the slot set.
    fn on_config_change(
        &mut self,
        key: &str,
        value: &ConfigValue,
        _slots: &mut Connectable,
    ) -> Result<()> {
        Err(unknown_key(self.type_name(), key, value))
    }

    /// Current configuration, for persistence.
    fn config(&self) -> IndexMap<String, ConfigValue> {
        IndexMap::new()
    }

    /// Names of the zero-argument functions this step exposes.
    fn functions(&self) -> Vec<String> {
        Vec::new()
    }

    /// Run a function. Only called with a name from `functions()`.
    fn call_function(&mut self, name: &str, _slots: &mut Connectable) -> anyhow::Result<()> {
        bail!("function '{}' not implemented", name)
    }
}

pub(crate) fn unknown_key(type_name: &str, key: &str, value: &ConfigValue) -> crate::error::EngineError {
    crate::error::EngineError::Config(format!(
        "{} step has no config key '{}' (value {:?})",
        type_name, key, value
    ))
}

/// Enum dispatch for built-in steps.
pub enum BuiltinStep {
    Constant(ConstantStep),
    Ramp(RampStep),
    Gain(GainStep),
    Sum(SumStep),
    Recorder(RecorderStep),
    Script(ScriptStep),
    Component(ComponentStep),
}

impl BuiltinStep {
    pub fn type_name(&self) -> &str {
        match self {
            BuiltinStep::Constant(s) => s.type_name(),
            BuiltinStep::Ramp(s) => s.type_name(),
            BuiltinStep::Gain(s) => s.type_name(),
            BuiltinStep::Sum(s) => s.type_name(),
            BuiltinStep::Recorder(s) => s.type_name(),
            BuiltinStep::Script(s) => s.type_name(),
            BuiltinStep::Component(s) => s.type_name(),
        }
    }

    pub fn declare(&self, slots: &mut Connectable) -> Result<()> {
        match self {
            BuiltinStep::Constant(s) => s.declare(slots),
            BuiltinStep::Ramp(s) => s.declare(slots),
            BuiltinStep::Gain(s) => s.declare(slots),
            BuiltinStep::Sum(s) => s.declare(slots),
            BuiltinStep::Recorder(s) => s.declare(slots),
            BuiltinStep::Script(s) => s.declare(slots),
            BuiltinStep::Component(s) => s.declare(slots),
        }
    }

    pub fn compute(&mut self, ctx: &mut TickContext) -> anyhow::Result<()> {
        match self {
            BuiltinStep::Constant(s) => s.compute(ctx),
            BuiltinStep::Ramp(s) => s.compute(ctx),
            BuiltinStep::Gain(s) => s.compute(ctx),
            BuiltinStep::Sum(s) => s.compute(ctx),
            BuiltinStep::Recorder(s) => s.compute(ctx),
            BuiltinStep::Script(s) => s.compute(ctx),
            BuiltinStep::Component(s) => s.compute(ctx),
        }
    }

    pub fn check_validity(&self, input: &str, candidate: &DataHandle) -> Option<Validity> {
        match self {
            BuiltinStep::Constant(s) => s.check_validity(input, candidate),
            BuiltinStep::Ramp(s) => s.check_validity(input, candidate),
            BuiltinStep::Gain(s) => s.check_validity(input, candidate),
            BuiltinStep::Sum(s) => s.check_validity(input, candidate),
            BuiltinStep::Recorder(s) => s.check_validity(input, candidate),
            BuiltinStep::Script(s) => s.check_validity(input, candidate),
            BuiltinStep::Component(s) => s.check_validity(input, candidate),
        }
    }

    pub fn on_start(&mut self) {
        match self {
            BuiltinStep::Constant(s) => s.on_start(),
            BuiltinStep::Ramp(s) => s.on_start(),
            BuiltinStep::Gain(s) => s.on_start(),
            BuiltinStep::Sum(s) => s.on_start(),
            BuiltinStep::Recorder(s) => s.on_start(),
            BuiltinStep::Script(s) => s.on_start(),
            BuiltinStep::Component(s) => s.on_start(),
        }
    }

    pub fn on_stop(&mut self) {
        match self {
            BuiltinStep::Constant(s) => s.on_stop(),
            BuiltinStep::Ramp(s) => s.on_stop(),
            BuiltinStep::Gain(s) => s.on_stop(),
            BuiltinStep::Sum(s) => s.on_stop(),
            BuiltinStep::Recorder(s) => s.on_stop(),
            BuiltinStep::Script(s) => s.on_stop(),
            BuiltinStep::Component(s) => s.on_stop(),
        }
    }

    pub fn on_config_change(
        &mut self,
        key: &str,
        value: &ConfigValue,
        slots: &mut Connectable,
    ) -> Result<()> {
        match self {
            BuiltinStep::Constant(s) => s.on_config_change(key, value, slots),
            BuiltinStep::Ramp(s) => s.on_config_change(key, value, slots),
            BuiltinStep::Gain(s) => s.on_config_change(key, value, slots),
            BuiltinStep::Sum(s) => s.on_config_change(key, value, slots),
            BuiltinStep::Recorder(s) => s.on_config_change(key, value, slots),
            BuiltinStep::Script(s) => s.on_config_change(key, value, slots),
            BuiltinStep::Component(s) => s.on_config_change(key, value, slots),
        }
    }

    pub fn config(&self) -> IndexMap<String, ConfigValue> {
        match self {
            BuiltinStep::Constant(s) => s.config(),
            BuiltinStep::Ramp(s) => s.config(),
            BuiltinStep::Gain(s) => s.config(),
            BuiltinStep::Sum(s) => s.config(),
            BuiltinStep::Recorder(s) => s.config(),
            BuiltinStep::Script(s) => s.config(),
            BuiltinStep::Component(s) => s.config(),
        }
    }

    pub fn functions(&self) -> Vec<String> {
        match self {
            BuiltinStep::Constant(s) => s.functions(),
            BuiltinStep::Ramp(s) => s.functions(),
            BuiltinStep::Gain(s) => s.functions(),
            BuiltinStep::Sum(s) => s.functions(),
            BuiltinStep::Recorder(s) => s.functions(),
            BuiltinStep::Script(s) => s.functions(),
            BuiltinStep::Component(s) => s.functions(),
        }
    }

    pub fn call_function(&mut self, name: &str, slots: &mut Connectable) -> anyhow::Result<()> {
        match self {
            BuiltinStep::Constant(s) => s.call_function(name, slots),
            BuiltinStep::Ramp(s) => s.call_function(name, slots),
            BuiltinStep::Gain(s) => s.call_function(name, slots),
            BuiltinStep::Sum(s) => s.call_function(name, slots),
            BuiltinStep::Recorder(s) => s.call_function(name, slots),
            BuiltinStep::Script(s) => s.call_function(name, slots),
            BuiltinStep::Component(s) => s.call_function(name, slots),
        }
    }
}

/// Wrapper that holds either a built-in step (enum dispatch) or a plugin (trait object).
pub enum AnyStep {
    Builtin(BuiltinStep),
    Plugin(Box<dyn StepPlugin>),
}

impl AnyStep {
    pub fn type_name(&self) -> &str {
        match self {
            AnyStep::Builtin(s) => s.type_name(),
            AnyStep::Plugin(s) => s.type_name(),
        }
    }

    pub fn declare(&self, slots: &mut Connectable) -> Result<()> {
        match self {
            AnyStep::Builtin(s) => s.declare(slots),
            AnyStep::Plugin(s) => s.declare(slots),
        }
    }

    pub fn compute(&mut self, ctx: &mut TickContext) -> anyhow::Result<()> {
        match self {
            AnyStep::Builtin(s) => s.compute(ctx),
            AnyStep::Plugin(s) => s.compute(ctx),
        }
    }

    pub fn check_validity(&self, input: &str, candidate: &DataHandle) -> Option<Validity> {
        match self {
            AnyStep::Builtin(s) => s.check_validity(input, candidate),
            AnyStep::Plugin(s) => s.check_validity(input, candidate),
        }
    }

    pub fn on_start(&mut self) {
        match self {
            AnyStep::Builtin(s) => s.on_start(),
            AnyStep::Plugin(s) => s.on_start(),
        }
    }

    pub fn on_stop(&mut self) {
        match self {
            AnyStep::Builtin(s) => s.on_stop(),
            AnyStep::Plugin(s) => s.on_stop(),
        }
    }

    pub fn on_config_change(
        &mut self,
        key: &str,
        value: &ConfigValue,
        slots: &mut Connectable,
    ) -> Result<()> {
        match self {
            AnyStep::Builtin(s) => s.on_config_change(key, value, slots),
            AnyStep::Plugin(s) => s.on_config_change(key, value, slots),
        }
    }

    pub fn config(&self) -> IndexMap<String, ConfigValue> {
        match self {
            AnyStep::Builtin(s) => s.config(),
            AnyStep::Plugin(s) => s.config(),
        }
    }

    pub fn functions(&self) -> Vec<String> {
        match self {
            AnyStep::Builtin(s) => s.functions(),
            AnyStep::Plugin(s) => s.functions(),
        }
    }

    pub fn call_function(&mut self, name: &str, slots: &mut Connectable) -> anyhow::Result<()> {
        match self {
            AnyStep::Builtin(s) => s.call_function(name, slots),
            AnyStep::Plugin(s) => s.call_function(name, slots),
        }
    }
}

impl From<BuiltinStep> for AnyStep {
    fn from(step: BuiltinStep) -> Self {
        AnyStep::Builtin(step)
    }
}

impl From<Box<dyn StepPlugin>> for AnyStep {
    fn from(plugin: Box<dyn StepPlugin>) -> Self {
        AnyStep::Plugin(plugin)
    }
}
