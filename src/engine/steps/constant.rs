//! Constant step: publishes a configured scalar on every tick.

use crate::engine::computation::{unknown_key, StepPlugin, TickContext};
use crate::engine::connectable::Connectable;
use crate::engine::slot::Role;
use crate::engine::value::{ConfigValue, DataKind};
use crate::error::{EngineError, Result};
use indexmap::IndexMap;

#[derive(Debug, Clone)]
pub struct ConstantStep {
    value: f64,
}

impl ConstantStep {
    pub fn new(value: f64) -> Self {
        Self { value }
    }

    pub fn value(&self) -> f64 {
        self.value
    }
}

impl Default for ConstantStep {
    fn default() -> Self {
        Self::new(0.0)
    }
}

impl StepPlugin for ConstantStep {
    fn type_name(&self) -> &str {
        "constant"
    }

    fn declare(&self, slots: &mut Connectable) -> Result<()> {
        slots.declare_slot(Role::Output, "out", DataKind::Scalar, false)
    }

    fn compute(&mut self, ctx: &mut TickContext) -> anyhow::Result<()> {
        ctx.set_output("out", self.value)
    }

    fn on_config_change(
        &mut self,
        key: &str,
        value: &ConfigValue,
        _slots: &mut Connectable,
    ) -> Result<()> {
        match key {
            "value" => {
                self.value = value
                    .as_float()
                    .ok_or_else(|| EngineError::Config("constant 'value' must be a number".into()))?;
                Ok(())
            }
            _ => Err(unknown_key(self.type_name(), key, value)),
        }
    }

    fn config(&self) -> IndexMap<String, ConfigValue> {
        IndexMap::from([("value".to_string(), ConfigValue::Float(self.value))])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::id::NodeId;

    #[test]
    fn test_config_value() {
        let mut step = ConstantStep::default();
        let mut slots = Connectable::new(NodeId::new());
        step.declare(&mut slots).unwrap();
        step.on_config_change("value", &ConfigValue::Int(4), &mut slots)
            .unwrap();
        assert_eq!(step.value(), 4.0);
        assert!(step
            .on_config_change("value", &ConfigValue::from("x"), &mut slots)
            .is_err());
        assert!(step
            .on_config_change("rate", &ConfigValue::Float(1.0), &mut slots)
            .is_err());
    }
}
