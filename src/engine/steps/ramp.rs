//! Ramp step: integrates a constant rate over the tick interval.

use crate::engine::computation::{unknown_key, StepPlugin, TickContext};
use crate::engine::connectable::Connectable;
use crate::engine::slot::Role;
use crate::engine::value::{ConfigValue, DataKind};
use crate::error::{EngineError, Result};
use indexmap::IndexMap;

#[derive(Debug, Clone)]
pub struct RampStep {
    /// Units per second.
    rate: f64,
    start: f64,
    current: f64,
}

impl RampStep {
    pub fn new(rate: f64) -> Self {
        Self {
            rate,
            start: 0.0,
            current: 0.0,
        }
    }

    pub fn with_start(mut self, start: f64) -> Self {
        self.start = start;
        self.current = start;
        self
    }
}

impl Default for RampStep {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl StepPlugin for RampStep {
    fn type_name(&self) -> &str {
        "ramp"
    }

    fn declare(&self, slots: &mut Connectable) -> Result<()> {
        slots.declare_slot(Role::Output, "out", DataKind::Scalar, false)
    }

    fn compute(&mut self, ctx: &mut TickContext) -> anyhow::Result<()> {
        self.current += self.rate * ctx.dt_secs();
        ctx.set_output("out", self.current)
    }

    fn on_start(&mut self) {
        self.current = self.start;
    }

    fn on_config_change(
        &mut self,
        key: &str,
        value: &ConfigValue,
        _slots: &mut Connectable,
    ) -> Result<()> {
        let number = || {
            value
                .as_float()
                .ok_or_else(|| EngineError::Config(format!("ramp '{}' must be a number", key)))
        };
        match key {
            "rate" => self.rate = number()?,
            "start" => {
                self.start = number()?;
                self.current = self.start;
            }
            _ => return Err(unknown_key(self.type_name(), key, value)),
        }
        Ok(())
    }

    fn config(&self) -> IndexMap<String, ConfigValue> {
        IndexMap::from([
            ("rate".to_string(), ConfigValue::Float(self.rate)),
            ("start".to_string(), ConfigValue::Float(self.start)),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_integrates_rate() {
        let mut step = RampStep::new(2.0).with_start(1.0);
        let mut ctx = TickContext::new(Duration::from_millis(500), 1);
        ctx.outputs.insert(
            "out".to_string(),
            crate::engine::computation::Staged {
                kind: DataKind::Scalar,
                value: crate::engine::value::DataValue::Scalar(0.0),
                annotations: None,
                dirty: false,
            },
        );
        step.compute(&mut ctx).unwrap();
        step.compute(&mut ctx).unwrap();
        assert_eq!(ctx.output("out").and_then(|v| v.as_scalar()), Some(3.0));

        step.on_start();
        assert_eq!(step.current, 1.0);
    }
}
