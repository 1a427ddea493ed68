//! Script step: evaluates a Rhai expression over its scalar inputs.
//!
//! ## Script Interface
//!
//! The script receives:
//! - one `f64` variable per declared input, named after the input slot
//! - `dt` - seconds since the previous tick
//! - `tick` - tick counter of this step
//! - `prev` - the value published on `out` by the previous tick
//!
//! The value of the last expression is published on `out`.
//!
//! ```rhai
//! clamp(a * 0.5 + b, -1.0, 1.0)
//! ```
//!
//! The input set comes from the `inputs` config value (comma separated).
//! Changing it rebuilds the INPUT slots; inputs that disappear lose their
//! connection.

use crate::engine::computation::{unknown_key, StepPlugin, TickContext};
use crate::engine::connectable::Connectable;
use crate::engine::slot::Role;
use crate::engine::value::{ConfigValue, DataKind};
use crate::error::{EngineError, Result};
use anyhow::{anyhow, Context};
use indexmap::IndexMap;
use rhai::{Dynamic, Engine, Scope, AST};

pub struct ScriptStep {
    inputs: Vec<String>,
    source: String,
    compiled: Option<AST>,
    engine: Engine,
}

impl ScriptStep {
    /// Script step with the given input names and no script yet.
    pub fn new<I, S>(inputs: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let inputs: Vec<String> = inputs.into_iter().map(Into::into).collect();
        for name in &inputs {
            validate_identifier(name)?;
        }
        Ok(Self {
            inputs,
            source: String::new(),
            compiled: None,
            engine: build_engine(),
        })
    }

    /// Set and compile the script.
    pub fn with_script(mut self, source: &str) -> Result<Self> {
        self.set_script(source)?;
        Ok(self)
    }

    pub fn set_script(&mut self, source: &str) -> Result<()> {
        if source.trim().is_empty() {
            self.source.clear();
            self.compiled = None;
            return Ok(());
        }
        let ast = self
            .engine
            .compile(source)
            .map_err(|e| EngineError::Config(format!("Compile error: {}", e)))?;
        self.source = source.to_string();
        self.compiled = Some(ast);
        tracing::debug!("ScriptStep: Script compiled successfully");
        Ok(())
    }

    pub fn script_source(&self) -> &str {
        &self.source
    }

    pub fn inputs(&self) -> &[String] {
        &self.inputs
    }

    fn rebuild_inputs(&mut self, names: Vec<String>, slots: &mut Connectable) -> Result<()> {
        for name in &names {
            validate_identifier(name)?;
        }
        for old in slots.slot_names(Role::Input) {
            if !names.contains(&old) {
                slots.remove_slot(Role::Input, &old)?;
            }
        }
        for name in &names {
            if slots.slot(Role::Input, name).is_none() {
                slots.declare_slot(Role::Input, name, DataKind::Scalar, true)?;
            }
        }
        self.inputs = names;
        Ok(())
    }
}

impl StepPlugin for ScriptStep {
    fn type_name(&self) -> &str {
        "script"
    }

    fn declare(&self, slots: &mut Connectable) -> Result<()> {
        for name in &self.inputs {
            slots.declare_slot(Role::Input, name, DataKind::Scalar, true)?;
        }
        slots.declare_slot(Role::Output, "out", DataKind::Scalar, false)
    }

    fn compute(&mut self, ctx: &mut TickContext) -> anyhow::Result<()> {
        let ast = self
            .compiled
            .as_ref()
            .ok_or_else(|| anyhow!("No compiled script"))?;

        let mut scope = Scope::new();
        for name in &self.inputs {
            let value = ctx
                .scalar(name)
                .with_context(|| format!("input '{}' has no scalar value", name))?;
            scope.push(name.clone(), value);
        }
        scope.push("dt", ctx.dt_secs());
        scope.push("tick", ctx.tick as i64);
        scope.push(
            "prev",
            ctx.output("out").and_then(|v| v.as_scalar()).unwrap_or(0.0),
        );

        let result = self
            .engine
            .eval_ast_with_scope::<Dynamic>(&mut scope, ast)
            .map_err(|e| anyhow!("Execution error: {}", e))?;
        let value = result
            .as_float()
            .or_else(|_| result.as_int().map(|i| i as f64))
            .map_err(|type_name| anyhow!("Script must return a number, got {}", type_name))?;
        ctx.set_output("out", value)
    }

    fn on_start(&mut self) {
        // Recompile in case the engine limits changed.
        if !self.source.is_empty() {
            let source = self.source.clone();
            if let Err(e) = self.set_script(&source) {
                tracing::warn!("ScriptStep: {}", e);
            }
        }
    }

    fn on_config_change(
        &mut self,
        key: &str,
        value: &ConfigValue,
        slots: &mut Connectable,
    ) -> Result<()> {
        match key {
            "script" => {
                let source = value
                    .as_str()
                    .ok_or_else(|| EngineError::Config("script 'script' must be a string".into()))?;
                self.set_script(source)
            }
            "inputs" => {
                let list = value
                    .as_str()
                    .ok_or_else(|| EngineError::Config("script 'inputs' must be a string".into()))?;
                let names = list
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect();
                self.rebuild_inputs(names, slots)
            }
            _ => Err(unknown_key(self.type_name(), key, value)),
        }
    }

    fn config(&self) -> IndexMap<String, ConfigValue> {
        IndexMap::from([
            (
                "inputs".to_string(),
                ConfigValue::String(self.inputs.join(",")),
            ),
            ("script".to_string(), ConfigValue::String(self.source.clone())),
        ])
    }
}

impl std::fmt::Debug for ScriptStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptStep")
            .field("inputs", &self.inputs)
            .field("script_len", &self.source.len())
            .field("compiled", &self.compiled.is_some())
            .finish()
    }
}

fn validate_identifier(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);
    if !valid_start || !chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(EngineError::Config(format!(
            "'{}' is not a valid script input name",
            name
        )));
    }
    if matches!(name, "dt" | "tick" | "prev") {
        return Err(EngineError::Config(format!("'{}' is reserved", name)));
    }
    Ok(())
}

fn build_engine() -> Engine {
    let mut engine = Engine::new();

    // Safety limits
    engine.set_max_expr_depths(64, 64);
    engine.set_max_call_levels(32);
    engine.set_max_operations(10_000);
    engine.set_max_string_size(10_000);
    engine.set_max_array_size(1_000);

    engine.register_fn("abs", |x: f64| x.abs());
    engine.register_fn("sqrt", |x: f64| x.sqrt());
    engine.register_fn("pow", |x: f64, y: f64| x.powf(y));
    engine.register_fn("exp", |x: f64| x.exp());
    engine.register_fn("ln", |x: f64| x.ln());
    engine.register_fn("sin", |x: f64| x.sin());
    engine.register_fn("cos", |x: f64| x.cos());
    engine.register_fn("atan2", |y: f64, x: f64| y.atan2(x));
    engine.register_fn("floor", |x: f64| x.floor());
    engine.register_fn("round", |x: f64| x.round());
    engine.register_fn("clamp", |x: f64, min: f64, max: f64| x.clamp(min, max));
    engine.register_fn("min", |a: f64, b: f64| a.min(b));
    engine.register_fn("max", |a: f64, b: f64| a.max(b));
    engine.register_fn("pi", || std::f64::consts::PI);

    engine
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::computation::Staged;
    use crate::engine::handle::DataHandle;
    use crate::engine::id::NodeId;
    use crate::engine::value::DataValue;
    use std::time::Duration;

    fn context(inputs: &[(&str, f64)]) -> TickContext {
        let mut ctx = TickContext::new(Duration::from_millis(100), 7);
        for (name, value) in inputs {
            ctx.inputs.insert(
                name.to_string(),
                DataHandle::with_value(DataValue::Scalar(*value)).snapshot(),
            );
        }
        ctx.outputs.insert(
            "out".to_string(),
            Staged {
                kind: DataKind::Scalar,
                value: DataValue::Scalar(1.0),
                annotations: None,
                dirty: false,
            },
        );
        ctx
    }

    #[test]
    fn test_expression_over_inputs() {
        let mut step = ScriptStep::new(["a", "b"])
            .unwrap()
            .with_script("a * 2.0 + b")
            .unwrap();
        let mut ctx = context(&[("a", 1.5), ("b", 1.0)]);
        step.compute(&mut ctx).unwrap();
        assert_eq!(ctx.output("out"), Some(&DataValue::Scalar(4.0)));
    }

    #[test]
    fn test_builtins_in_scope() {
        let mut step = ScriptStep::new(["x"])
            .unwrap()
            .with_script("prev + x * dt + tick")
            .unwrap();
        let mut ctx = context(&[("x", 10.0)]);
        step.compute(&mut ctx).unwrap();
        // 1 + 10 * 0.1 + 7
        let out = ctx.output("out").and_then(|v| v.as_scalar()).unwrap();
        assert!((out - 9.0).abs() < 1e-9);
    }

    #[test]
    fn test_integer_result_is_widened() {
        let mut step = ScriptStep::new(Vec::<String>::new())
            .unwrap()
            .with_script("40 + 2")
            .unwrap();
        let mut ctx = context(&[]);
        step.compute(&mut ctx).unwrap();
        assert_eq!(ctx.output("out"), Some(&DataValue::Scalar(42.0)));
    }

    #[test]
    fn test_invalid_script_is_config_error() {
        let mut step = ScriptStep::new(["x"]).unwrap();
        let err = step.set_script("this is not valid rhai syntax !!!@#$").unwrap_err();
        assert!(err.is_configuration());
        assert!(step.script_source().is_empty());
    }

    #[test]
    fn test_non_numeric_result_fails() {
        let mut step = ScriptStep::new(["x"]).unwrap().with_script("\"text\"").unwrap();
        let mut ctx = context(&[("x", 1.0)]);
        assert!(step.compute(&mut ctx).is_err());
    }

    #[test]
    fn test_inputs_config_rebuilds_slots() {
        let mut step = ScriptStep::new(["a", "b"]).unwrap();
        let mut slots = Connectable::new(NodeId::new());
        step.declare(&mut slots).unwrap();
        step.on_config_change("inputs", &ConfigValue::from("b, c"), &mut slots)
            .unwrap();
        assert_eq!(slots.slot_names(Role::Input), vec!["b", "c"]);
        assert_eq!(step.inputs(), ["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_reserved_input_name() {
        assert!(ScriptStep::new(["dt"]).is_err());
        assert!(ScriptStep::new(["1x"]).is_err());
    }
}
