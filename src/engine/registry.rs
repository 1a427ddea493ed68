//! Step registry: maps step type names to factories.
//!
//! There is no global registry. A `StepRegistry` is built by the caller,
//! filled with factories and passed to `Group::from_description`.

use crate::engine::computation::{AnyStep, BuiltinStep};
use crate::engine::step::Step;
use crate::engine::steps::{
    ConstantStep, GainStep, RampStep, RecorderStep, ScriptStep, SumStep,
};
use crate::engine::validity::ValidityRegistry;
use crate::engine::value::ConfigValue;
use crate::error::{EngineError, Result, ResultExt};
use indexmap::IndexMap;
use std::sync::Arc;

/// Builds a fresh computation for one step type.
pub type StepFactory = Box<dyn Fn() -> Result<AnyStep> + Send + Sync>;

pub struct StepRegistry {
    factories: IndexMap<String, StepFactory>,
    validity: Arc<ValidityRegistry>,
}

impl StepRegistry {
    /// Empty registry using the default validity rules.
    pub fn new() -> Self {
        Self::with_validity(Arc::new(ValidityRegistry::new()))
    }

    pub fn with_validity(validity: Arc<ValidityRegistry>) -> Self {
        Self {
            factories: IndexMap::new(),
            validity,
        }
    }

    /// Registry with every built-in step that needs no external object.
    ///
    /// `component` is not included since its catalogue of devices is
    /// application specific; register it with [`StepRegistry::register`].
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_builtins();
        registry
    }

    pub fn register_builtins(&mut self) {
        self.register("constant", || {
            Ok(BuiltinStep::Constant(ConstantStep::default()).into())
        });
        self.register("ramp", || Ok(BuiltinStep::Ramp(RampStep::default()).into()));
        self.register("gain", || Ok(BuiltinStep::Gain(GainStep::default()).into()));
        self.register("sum", || Ok(BuiltinStep::Sum(SumStep::new()).into()));
        self.register("recorder", || {
            Ok(BuiltinStep::Recorder(RecorderStep::default()).into())
        });
        self.register("script", || {
            let step = ScriptStep::new(Vec::<String>::new())?;
            Ok(BuiltinStep::Script(step).into())
        });
    }

    /// Register (or replace) the factory for `step_type`.
    pub fn register<F>(&mut self, step_type: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<AnyStep> + Send + Sync + 'static,
    {
        let step_type = step_type.into();
        tracing::debug!(step_type = %step_type, "Step type registered");
        self.factories.insert(step_type, Box::new(factory));
    }

    pub fn contains(&self, step_type: &str) -> bool {
        self.factories.contains_key(step_type)
    }

    pub fn step_types(&self) -> Vec<String> {
        self.factories.keys().cloned().collect()
    }

    pub fn validity(&self) -> &Arc<ValidityRegistry> {
        &self.validity
    }

    /// Create a step named `name` and apply `config` in order.
    pub fn create(
        &self,
        step_type: &str,
        name: &str,
        config: &IndexMap<String, ConfigValue>,
    ) -> Result<Arc<Step>> {
        let factory = self
            .factories
            .get(step_type)
            .ok_or_else(|| EngineError::UnknownStepType(step_type.to_string()))?;
        let step = Step::new(name, factory()?, self.validity.clone())?;
        for (key, value) in config {
            step.set_config(key, value.clone())
                .with_context(|| format!("Failed to configure step '{}'", name))?;
        }
        Ok(step)
    }
}

impl Default for StepRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl std::fmt::Debug for StepRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepRegistry")
            .field("step_types", &self.step_types())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::slot::Role;
    use crate::engine::steps::FnStep;
    use crate::engine::value::DataKind;

    #[test]
    fn test_builtins_are_registered() {
        let registry = StepRegistry::with_builtins();
        for name in ["constant", "ramp", "gain", "sum", "recorder", "script"] {
            assert!(registry.contains(name), "missing {}", name);
        }
        assert!(!registry.contains("component"));
    }

    #[test]
    fn test_create_applies_config() {
        let registry = StepRegistry::with_builtins();
        let config = IndexMap::from([("gain".to_string(), ConfigValue::Float(3.0))]);
        let step = registry.create("gain", "amp", &config).unwrap();
        assert_eq!(step.type_name(), "gain");
        assert_eq!(step.config()["gain"], ConfigValue::Float(3.0));
    }

    #[test]
    fn test_unknown_type() {
        let registry = StepRegistry::new();
        let err = registry
            .create("gain", "amp", &IndexMap::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::UnknownStepType(t) if t == "gain"));
    }

    #[test]
    fn test_bad_config_carries_context() {
        let registry = StepRegistry::with_builtins();
        let config = IndexMap::from([("bogus".to_string(), ConfigValue::Int(1))]);
        let err = registry.create("constant", "c", &config).unwrap_err();
        assert!(err.to_string().contains("Failed to configure step 'c'"));
        assert!(err.is_configuration());
    }

    #[test]
    fn test_custom_factory() {
        let mut registry = StepRegistry::new();
        registry.register("tap", || {
            let step = FnStep::new("tap", |slots| {
                slots.declare_slot(Role::Output, "level", DataKind::Scalar, false)
            });
            Ok(AnyStep::Plugin(Box::new(step)))
        });
        let step = registry.create("tap", "p1", &IndexMap::new()).unwrap();
        assert_eq!(step.slot_names(Role::Output), vec!["level"]);
    }
}
