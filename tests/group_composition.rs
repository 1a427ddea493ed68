//! Integration tests for group composition and persistence
//!
//! - Nested groups with boundary slots
//! - Saving and restoring a graph through the engine config file
//! - Removing elements from a live graph
//! - Step functions, script steps and user components

mod common;

use common::builders::{constant, gain, out, ramp};
use common::{assert_float_eq, test_timeout, wait_until};
use serial_test::serial;
use std::time::Duration;
use tempfile::TempDir;
use tickflow::engine::steps::{Component, ComponentStep, RecorderStep, ScriptStep};
use tickflow::engine::{
    AnyStep, BuiltinStep, DataKind, DataValue, Group, LoopedTriggerConfig, Role, State, Step,
    StepRegistry, Triggerable,
};
use tickflow::{EngineConfig, EngineError};

/// `source (constant 8) -> [filter: smooth (gain 0.5)] -> sink (gain 1)`
fn nested_plant() -> std::sync::Arc<Group> {
    let root = Group::new("root");
    let filter = Group::new("filter");
    filter.add_step(gain("smooth", 0.5)).unwrap();
    filter.expose(Role::Input, "in", "smooth", "in").unwrap();
    filter.expose(Role::Output, "out", "smooth", "out").unwrap();

    root.add_step(constant("source", 8.0)).unwrap();
    root.add_group(filter.clone()).unwrap();
    root.add_step(gain("sink", 1.0)).unwrap();
    root.connect("source.out", "filter.in").unwrap();
    root.connect("filter.out", "sink.in").unwrap();

    root.add_looped_trigger("main", LoopedTriggerConfig::with_period_ms(5))
        .unwrap();
    root.assign("source", "main").unwrap();
    root.assign("sink", "main").unwrap();
    filter.add_looped_trigger("inner", LoopedTriggerConfig::with_period_ms(5))
        .unwrap();
    filter.assign("smooth", "inner").unwrap();
    root
}

#[test]
fn test_two_level_nesting() {
    let root = Group::new("root");
    let outer = Group::new("outer");
    let inner = Group::new("inner");
    inner.add_step(gain("k", 2.0)).unwrap();
    inner.expose(Role::Input, "x", "k", "in").unwrap();
    inner.expose(Role::Output, "y", "k", "out").unwrap();
    outer.add_group(inner.clone()).unwrap();
    outer.expose(Role::Input, "x", "inner", "x").unwrap();
    outer.expose(Role::Output, "y", "inner", "y").unwrap();

    root.add_step(constant("source", 1.5)).unwrap();
    root.add_group(outer.clone()).unwrap();
    root.add_step(gain("sink", 1.0)).unwrap();
    root.connect("source.out", "outer.x").unwrap();
    root.connect("outer.y", "sink.in").unwrap();

    let trigger = root
        .add_looped_trigger("main", LoopedTriggerConfig::default())
        .unwrap();
    root.assign("source", "main").unwrap();
    root.assign("sink", "main").unwrap();
    inner.assign("k", "main").unwrap();

    let report = trigger.fire();
    assert_eq!(report.ran.len(), 3);
    assert!(report.failed.is_empty());
    assert_eq!(out(&root.step("sink").unwrap()), Some(3.0));
    assert_eq!(root.all_steps().len(), 3);
    assert_eq!(inner.parent().unwrap().name(), "outer");
}

#[test]
fn test_group_cannot_join_two_parents() {
    let a = Group::new("a");
    let b = Group::new("b");
    let child = Group::new("child");
    a.add_group(child.clone()).unwrap();
    assert!(b.add_group(child).is_err());
    assert!(b.is_empty());
}

#[test]
fn test_config_file_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("graphs").join("plant.toml");

    let root = nested_plant();
    root.connect_trigger("source", "sink").unwrap();
    let config = EngineConfig::default().with_graph(root.describe());
    config.save(&path).unwrap();

    let loaded = EngineConfig::load(&path).unwrap();
    assert_eq!(loaded, config);

    let registry = loaded.registry();
    let restored = loaded.build_graph(&registry).unwrap().unwrap();
    assert_eq!(restored.describe(), root.describe());
    assert_eq!(restored.element_names(), vec!["source", "filter", "sink"]);
    assert_eq!(restored.chains(), vec![("source".to_string(), "sink".to_string())]);

    let filter = restored.group("filter").unwrap();
    restored.looped_trigger("main").unwrap().fire();
    filter.looped_trigger("inner").unwrap().fire();
    restored.looped_trigger("main").unwrap().fire();
    assert_eq!(out(&restored.step("sink").unwrap()), Some(4.0));
}

#[test]
fn test_load_missing_file_is_config_error() {
    let dir = TempDir::new().unwrap();
    let err = EngineConfig::load(dir.path().join("absent.toml")).unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));

    let fallback = EngineConfig::load_or_default(dir.path().join("absent.toml"));
    assert_eq!(fallback, EngineConfig::default());
}

#[test]
fn test_unknown_step_type_in_file() {
    let config = EngineConfig::from_toml(
        r#"
        [graph.elements.mystery]
        step_type = "flux_capacitor"
        "#,
    )
    .unwrap();
    let err = config.build_graph(&config.registry()).unwrap_err();
    assert!(err.to_string().contains("flux_capacitor"));
}

#[test]
#[serial]
fn test_remove_element_while_running() {
    let group = Group::new("live");
    group.add_step(ramp("wave", 1.0)).unwrap();
    group.add_step(gain("amp", 2.0)).unwrap();
    group.connect("wave.out", "amp.in").unwrap();
    group.connect_trigger("wave", "amp").unwrap();
    let trigger = group
        .add_looped_trigger("t", LoopedTriggerConfig::with_period_ms(2))
        .unwrap();
    group.assign("wave", "t").unwrap();

    trigger.start().unwrap();
    let amp = group.step("amp").unwrap();
    assert!(wait_until(test_timeout(), || amp.state() == State::Running));

    let removed = group.remove_element("amp").unwrap();
    assert_eq!(removed.name(), "amp");
    assert!(group.connections().is_empty());
    assert!(group.chains().is_empty());
    assert!(amp.handle(Role::Input, "in").is_none());
    assert_eq!(amp.state(), State::NotRunning);
    assert!(!amp.is_active());
    amp.reset();
    assert_eq!(amp.state(), State::NotRunning);

    let ticks = amp.tick_count();
    let wave = group.step("wave").unwrap();
    let wave_ticks = wave.tick_count();
    assert!(wait_until(test_timeout(), || wave.tick_count() > wave_ticks + 3));
    assert_eq!(amp.tick_count(), ticks);
    trigger.stop().unwrap();
}

#[test]
fn test_recorder_history_and_clear() {
    let group = Group::new("log");
    group.add_step(ramp("wave", 100.0)).unwrap();
    let recorder = Step::builtin("rec", BuiltinStep::Recorder(RecorderStep::new(4))).unwrap();
    group.add_step(recorder.clone()).unwrap();
    group.connect("wave.out", "rec.in").unwrap();
    group.connect_trigger("wave", "rec").unwrap();
    let trigger = group
        .add_looped_trigger("t", LoopedTriggerConfig::default())
        .unwrap();
    group.assign("wave", "t").unwrap();

    for _ in 0..6 {
        trigger.fire();
    }
    let history = recorder.read(Role::Buffer, "history").unwrap();
    assert_eq!(history.value.as_vector().map(<[f64]>::len), Some(4));

    assert_eq!(recorder.functions(), vec!["clear"]);
    recorder.call_function("clear").unwrap();
    let history = recorder.read(Role::Buffer, "history").unwrap();
    assert_eq!(history.value, DataValue::Vector(Vec::new()));

    let err = recorder.call_function("rewind").unwrap_err();
    assert!(matches!(err, EngineError::UnknownFunction { .. }));

    // Runtime history stays out of saved graphs.
    let desc = group.describe();
    assert!(desc.elements["rec"]
        .slots
        .iter()
        .all(|slot| slot.name != "history"));
}

#[test]
fn test_script_step_in_graph() {
    let group = Group::new("math");
    group.add_step(constant("a", 3.0)).unwrap();
    group.add_step(constant("b", 4.0)).unwrap();
    let script = ScriptStep::new(["a", "b"])
        .unwrap()
        .with_script("sqrt(a * a + b * b)")
        .unwrap();
    group
        .add_step(Step::builtin("norm", BuiltinStep::Script(script)).unwrap())
        .unwrap();
    group.connect("a.out", "norm.a").unwrap();
    group.connect("b.out", "norm.b").unwrap();
    let trigger = group
        .add_looped_trigger("t", LoopedTriggerConfig::default())
        .unwrap();
    for name in ["a", "b", "norm"] {
        group.assign(name, "t").unwrap();
    }

    trigger.fire();
    let norm = group.step("norm").unwrap();
    assert_float_eq(out(&norm).unwrap(), 5.0, 1e-12);

    // A runaway script trips the operation limit and lands in EXCEPTION.
    group
        .set_config("norm", "script", "let x = 0; loop { x += 1; }")
        .unwrap();
    let report = trigger.fire();
    assert_eq!(report.failed.len(), 1);
    assert_eq!(norm.state(), State::Exception);
    assert_float_eq(out(&norm).unwrap(), 5.0, 1e-12);

    // Shrinking the input list drops the connection feeding `b`.
    group.set_config("norm", "inputs", "a").unwrap();
    assert_eq!(group.connections().len(), 1);
    assert!(group.set_config("norm", "inputs", "dt").is_err());
}

/// Fake thermometer: temperature rises with time, heater power adds to it.
struct Thermometer {
    celsius: f64,
    heater: f64,
}

impl Component for Thermometer {
    fn channels(&self) -> Vec<(String, DataKind)> {
        vec![("celsius".to_string(), DataKind::Scalar)]
    }

    fn commands(&self) -> Vec<(String, DataKind)> {
        vec![("heater".to_string(), DataKind::Scalar)]
    }

    fn read(&mut self, dt: Duration) -> anyhow::Result<Vec<(String, DataValue)>> {
        self.celsius += self.heater * dt.as_secs_f64();
        Ok(vec![("celsius".to_string(), self.celsius.into())])
    }

    fn write(&mut self, command: &str, value: &DataValue) -> anyhow::Result<()> {
        match command {
            "heater" => {
                self.heater = value
                    .as_scalar()
                    .ok_or_else(|| anyhow::anyhow!("heater power must be a scalar"))?;
                Ok(())
            }
            _ => anyhow::bail!("unknown command '{}'", command),
        }
    }
}

#[test]
fn test_user_component_from_registry() {
    let mut registry = StepRegistry::with_builtins();
    assert!(!registry.contains("component"));
    registry.register("component", || {
        let step = ComponentStep::new().with_component(
            "thermo",
            Box::new(Thermometer {
                celsius: 20.0,
                heater: 0.0,
            }),
        );
        Ok(AnyStep::Plugin(Box::new(step)))
    });

    let group = Group::new("lab");
    let sensor = registry
        .create("component", "sensor", &Default::default())
        .unwrap();
    assert_eq!(sensor.slot_names(Role::Output), vec!["celsius"]);
    assert_eq!(sensor.slot_names(Role::Input), vec!["heater"]);
    group.add_step(sensor.clone()).unwrap();
    group.add_step(constant("power", 1000.0)).unwrap();
    group.connect("power.out", "sensor.heater").unwrap();

    let trigger = group
        .add_looped_trigger("t", LoopedTriggerConfig::default())
        .unwrap();
    group.assign("power", "t").unwrap();
    group.assign("sensor", "t").unwrap();

    trigger.fire();
    trigger.fire();
    let celsius = sensor
        .read(Role::Output, "celsius")
        .and_then(|s| s.value.as_scalar())
        .unwrap();
    assert!(celsius > 20.0);
    assert_eq!(sensor.status().state, State::Running);

    let err = group.set_config("sensor", "component", "barometer").unwrap_err();
    assert!(matches!(err, EngineError::Config(_)));
}
