//! Component step: adapter between the graph and an external device object.
//!
//! The step holds a catalogue of named [`Component`]s. The `component`
//! config value picks one; the OUTPUT slot set then mirrors its channels and
//! the INPUT slot set its commands. Picking another component rebuilds both.

use crate::engine::computation::{unknown_key, StepPlugin, TickContext};
use crate::engine::connectable::Connectable;
use crate::engine::slot::Role;
use crate::engine::value::{ConfigValue, DataKind, DataValue};
use crate::error::{EngineError, Result};
use anyhow::anyhow;
use indexmap::IndexMap;
use std::time::Duration;

/// Device object read and written synchronously inside a tick.
#[cfg_attr(test, mockall::automock)]
pub trait Component: Send {
    /// Readable channels, published as OUTPUT slots.
    fn channels(&self) -> Vec<(String, DataKind)>;

    /// Writable commands, exposed as optional INPUT slots.
    fn commands(&self) -> Vec<(String, DataKind)> {
        Vec::new()
    }

    /// Read the current channel values.
    fn read(&mut self, dt: Duration) -> anyhow::Result<Vec<(String, DataValue)>>;

    /// Apply one command value.
    fn write(&mut self, _command: &str, _value: &DataValue) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct ComponentStep {
    components: IndexMap<String, Box<dyn Component>>,
    selected: Option<String>,
}

impl ComponentStep {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a component to the catalogue. The first one added is selected.
    pub fn with_component(mut self, name: impl Into<String>, component: Box<dyn Component>) -> Self {
        let name = name.into();
        if self.selected.is_none() {
            self.selected = Some(name.clone());
        }
        self.components.insert(name, component);
        self
    }

    pub fn selected(&self) -> Option<&str> {
        self.selected.as_deref()
    }

    pub fn component_names(&self) -> Vec<String> {
        self.components.keys().cloned().collect()
    }

    fn declare_for(&self, name: &str, slots: &mut Connectable) -> Result<()> {
        let component = self
            .components
            .get(name)
            .ok_or_else(|| EngineError::Config(format!("unknown component '{}'", name)))?;
        for (channel, kind) in component.channels() {
            slots.declare_slot(Role::Output, &channel, kind, false)?;
        }
        for (command, kind) in component.commands() {
            slots.declare_slot(Role::Input, &command, kind, false)?;
        }
        Ok(())
    }
}

impl StepPlugin for ComponentStep {
    fn type_name(&self) -> &str {
        "component"
    }

    fn declare(&self, slots: &mut Connectable) -> Result<()> {
        match &self.selected {
            Some(name) => self.declare_for(name, slots),
            None => Ok(()),
        }
    }

    fn compute(&mut self, ctx: &mut TickContext) -> anyhow::Result<()> {
        let name = self
            .selected
            .as_ref()
            .ok_or_else(|| anyhow!("no component selected"))?;
        let component = self
            .components
            .get_mut(name)
            .ok_or_else(|| anyhow!("component '{}' missing", name))?;

        for (command, _) in component.commands() {
            if let Some(value) = ctx.input(&command) {
                component.write(&command, value)?;
            }
        }
        for (channel, value) in component.read(ctx.dt)? {
            ctx.set_output(&channel, value)?;
        }
        Ok(())
    }

    fn on_config_change(
        &mut self,
        key: &str,
        value: &ConfigValue,
        slots: &mut Connectable,
    ) -> Result<()> {
        match key {
            "component" => {
                let name = value
                    .as_str()
                    .ok_or_else(|| EngineError::Config("'component' must be a string".into()))?;
                if !self.components.contains_key(name) {
                    return Err(EngineError::Config(format!("unknown component '{}'", name)));
                }
                for role in [Role::Input, Role::Output] {
                    for slot in slots.slot_names(role) {
                        slots.remove_slot(role, &slot)?;
                    }
                }
                self.declare_for(name, slots)?;
                self.selected = Some(name.to_string());
                Ok(())
            }
            _ => Err(unknown_key(self.type_name(), key, value)),
        }
    }

    fn config(&self) -> IndexMap<String, ConfigValue> {
        self.selected
            .iter()
            .map(|name| ("component".to_string(), ConfigValue::String(name.clone())))
            .collect()
    }
}

impl std::fmt::Debug for ComponentStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentStep")
            .field("components", &self.component_names())
            .field("selected", &self.selected)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::computation::Staged;
    use crate::engine::handle::DataHandle;
    use crate::engine::id::NodeId;
    use mockall::predicate::eq;

    fn imu() -> MockComponent {
        let mut mock = MockComponent::new();
        mock.expect_channels().returning(|| {
            vec![
                ("accel".to_string(), DataKind::Vector),
                ("temp".to_string(), DataKind::Scalar),
            ]
        });
        mock.expect_commands()
            .returning(|| vec![("rate".to_string(), DataKind::Scalar)]);
        mock
    }

    fn motor() -> MockComponent {
        let mut mock = MockComponent::new();
        mock.expect_channels()
            .returning(|| vec![("speed".to_string(), DataKind::Scalar)]);
        mock.expect_commands().returning(Vec::new);
        mock
    }

    #[test]
    fn test_selected_component_declares_slots() {
        let step = ComponentStep::new()
            .with_component("imu", Box::new(imu()))
            .with_component("motor", Box::new(motor()));
        let mut slots = Connectable::new(NodeId::new());
        step.declare(&mut slots).unwrap();
        assert_eq!(slots.slot_names(Role::Output), vec!["accel", "temp"]);
        assert_eq!(slots.slot_names(Role::Input), vec!["rate"]);
    }

    #[test]
    fn test_switching_component_rebuilds_outputs() {
        let mut step = ComponentStep::new()
            .with_component("imu", Box::new(imu()))
            .with_component("motor", Box::new(motor()));
        let mut slots = Connectable::new(NodeId::new());
        step.declare(&mut slots).unwrap();
        step.on_config_change("component", &ConfigValue::from("motor"), &mut slots)
            .unwrap();
        assert_eq!(slots.slot_names(Role::Output), vec!["speed"]);
        assert!(slots.slot_names(Role::Input).is_empty());
        assert_eq!(step.selected(), Some("motor"));

        let err = step
            .on_config_change("component", &ConfigValue::from("lidar"), &mut slots)
            .unwrap_err();
        assert!(err.is_configuration());
        assert_eq!(slots.slot_names(Role::Output), vec!["speed"]);
    }

    #[test]
    fn test_compute_writes_commands_and_reads_channels() {
        let mut mock = MockComponent::new();
        mock.expect_commands()
            .returning(|| vec![("target".to_string(), DataKind::Scalar)]);
        mock.expect_write()
            .with(eq("target"), eq(DataValue::Scalar(3.0)))
            .times(1)
            .returning(|_, _| Ok(()));
        mock.expect_read()
            .times(1)
            .returning(|_| Ok(vec![("speed".to_string(), DataValue::Scalar(2.5))]));

        let mut step = ComponentStep::new().with_component("motor", Box::new(mock));
        let mut ctx = TickContext::new(Duration::from_millis(10), 1);
        ctx.inputs.insert(
            "target".to_string(),
            DataHandle::with_value(DataValue::Scalar(3.0)).snapshot(),
        );
        ctx.outputs.insert(
            "speed".to_string(),
            Staged {
                kind: DataKind::Scalar,
                value: DataValue::Scalar(0.0),
                annotations: None,
                dirty: false,
            },
        );
        step.compute(&mut ctx).unwrap();
        assert_eq!(ctx.output("speed"), Some(&DataValue::Scalar(2.5)));
    }
}
