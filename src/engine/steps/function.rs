//! Closure-backed step plugin.

use crate::engine::computation::{StepPlugin, TickContext};
use crate::engine::connectable::Connectable;
use crate::engine::value::ConfigValue;
use crate::error::Result;
use anyhow::bail;
use indexmap::IndexMap;

type DeclareFn = Box<dyn Fn(&mut Connectable) -> Result<()> + Send>;
type ComputeFn = Box<dyn FnMut(&mut TickContext) -> anyhow::Result<()> + Send>;
type FunctionFn = Box<dyn FnMut(&mut Connectable) -> anyhow::Result<()> + Send>;

/// Step built from closures. Config values are stored as given.
pub struct FnStep {
    type_name: String,
    declare: DeclareFn,
    compute: ComputeFn,
    functions: IndexMap<String, FunctionFn>,
    config: IndexMap<String, ConfigValue>,
}

impl FnStep {
    pub fn new<D>(type_name: impl Into<String>, declare: D) -> Self
    where
        D: Fn(&mut Connectable) -> Result<()> + Send + 'static,
    {
        Self {
            type_name: type_name.into(),
            declare: Box::new(declare),
            compute: Box::new(|_| Ok(())),
            functions: IndexMap::new(),
            config: IndexMap::new(),
        }
    }

    pub fn compute<C>(mut self, compute: C) -> Self
    where
        C: FnMut(&mut TickContext) -> anyhow::Result<()> + Send + 'static,
    {
        self.compute = Box::new(compute);
        self
    }

    pub fn function<F>(mut self, name: impl Into<String>, function: F) -> Self
    where
        F: FnMut(&mut Connectable) -> anyhow::Result<()> + Send + 'static,
    {
        self.functions.insert(name.into(), Box::new(function));
        self
    }
}

impl StepPlugin for FnStep {
    fn type_name(&self) -> &str {
        &self.type_name
    }

    fn declare(&self, slots: &mut Connectable) -> Result<()> {
        (self.declare)(slots)
    }

    fn compute(&mut self, ctx: &mut TickContext) -> anyhow::Result<()> {
        (self.compute)(ctx)
    }

    fn on_config_change(
        &mut self,
        key: &str,
        value: &ConfigValue,
        _slots: &mut Connectable,
    ) -> Result<()> {
        self.config.insert(key.to_string(), value.clone());
        Ok(())
    }

    fn config(&self) -> IndexMap<String, ConfigValue> {
        self.config.clone()
    }

    fn functions(&self) -> Vec<String> {
        self.functions.keys().cloned().collect()
    }

    fn call_function(&mut self, name: &str, slots: &mut Connectable) -> anyhow::Result<()> {
        match self.functions.get_mut(name) {
            Some(function) => function(slots),
            None => bail!("unknown function '{}'", name),
        }
    }
}
