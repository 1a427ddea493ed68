//! Recorder step: keeps the last `capacity` input values in a buffer.
//!
//! The buffer slot `history` is readable downstream like an output. The
//! `clear` function empties it outside of any trigger.

use crate::engine::computation::{unknown_key, StepPlugin, TickContext};
use crate::engine::connectable::Connectable;
use crate::engine::slot::Role;
use crate::engine::value::{ConfigValue, DataKind, DataValue};
use crate::error::{EngineError, Result};
use anyhow::{bail, Context};
use indexmap::IndexMap;

pub const DEFAULT_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct RecorderStep {
    capacity: usize,
}

impl RecorderStep {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for RecorderStep {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl StepPlugin for RecorderStep {
    fn type_name(&self) -> &str {
        "recorder"
    }

    fn declare(&self, slots: &mut Connectable) -> Result<()> {
        slots.declare_slot(Role::Input, "in", DataKind::Scalar, true)?;
        slots.declare_slot(Role::Buffer, "history", DataKind::Vector, false)?;
        // History is runtime data, not part of a saved graph.
        slots.set_serializable(Role::Buffer, "history", false)
    }

    fn compute(&mut self, ctx: &mut TickContext) -> anyhow::Result<()> {
        let sample = ctx.scalar("in").context("input 'in' has no scalar value")?;
        let capacity = self.capacity;
        let Some(DataValue::Vector(history)) = ctx.buffer_mut("history") else {
            bail!("buffer 'history' is missing");
        };
        history.push(sample);
        if history.len() > capacity {
            let excess = history.len() - capacity;
            history.drain(..excess);
        }
        Ok(())
    }

    fn on_config_change(
        &mut self,
        key: &str,
        value: &ConfigValue,
        _slots: &mut Connectable,
    ) -> Result<()> {
        match key {
            "capacity" => match value.as_int() {
                Some(n) if n > 0 => {
                    self.capacity = n as usize;
                    Ok(())
                }
                _ => Err(EngineError::Config(
                    "recorder 'capacity' must be a positive integer".into(),
                )),
            },
            _ => Err(unknown_key(self.type_name(), key, value)),
        }
    }

    fn config(&self) -> IndexMap<String, ConfigValue> {
        IndexMap::from([(
            "capacity".to_string(),
            ConfigValue::Int(self.capacity as i64),
        )])
    }

    fn functions(&self) -> Vec<String> {
        vec!["clear".to_string()]
    }

    fn call_function(&mut self, name: &str, slots: &mut Connectable) -> anyhow::Result<()> {
        match name {
            "clear" => {
                let handle = slots.producer_handle(Role::Buffer, "history")?;
                handle.publish(DataValue::Vector(Vec::new()))?;
                Ok(())
            }
            _ => bail!("unknown function '{}'", name),
        }
    }
}
