//! Gain step: `out = in * gain`.

use crate::engine::computation::{unknown_key, StepPlugin, TickContext};
use crate::engine::connectable::Connectable;
use crate::engine::slot::Role;
use crate::engine::value::{ConfigValue, DataKind};
use crate::error::{EngineError, Result};
use anyhow::Context;
use indexmap::IndexMap;

#[derive(Debug, Clone)]
pub struct GainStep {
    gain: f64,
}

impl GainStep {
    pub fn new(gain: f64) -> Self {
        Self { gain }
    }
}

impl Default for GainStep {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl StepPlugin for GainStep {
    fn type_name(&self) -> &str {
        "gain"
    }

    fn declare(&self, slots: &mut Connectable) -> Result<()> {
        slots.declare_slot(Role::Input, "in", DataKind::Scalar, true)?;
        slots.declare_slot(Role::Output, "out", DataKind::Scalar, false)
    }

    fn compute(&mut self, ctx: &mut TickContext) -> anyhow::Result<()> {
        let input = ctx.scalar("in").context("input 'in' has no scalar value")?;
        ctx.set_output("out", input * self.gain)
    }

    fn on_config_change(
        &mut self,
        key: &str,
        value: &ConfigValue,
        _slots: &mut Connectable,
    ) -> Result<()> {
        match key {
            "gain" => {
                self.gain = value
                    .as_float()
                    .ok_or_else(|| EngineError::Config("gain 'gain' must be a number".into()))?;
                Ok(())
            }
            _ => Err(unknown_key(self.type_name(), key, value)),
        }
    }

    fn config(&self) -> IndexMap<String, ConfigValue> {
        IndexMap::from([("gain".to_string(), ConfigValue::Float(self.gain))])
    }
}
