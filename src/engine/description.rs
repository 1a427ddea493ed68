//! Persisted form of a group graph.
//!
//! A `GraphDescription` is what `Group::describe()` produces and
//! `Group::from_description()` rebuilds. It stores element types, their
//! config values and serializable slot tuples, plus the connection edge list,
//! looped triggers, trigger chains and boundary exposures. The engine does
//! not pick an encoding; `config::EngineConfig` embeds it in TOML.

use crate::engine::connection::Endpoint;
use crate::engine::looped::LoopedTriggerConfig;
use crate::engine::slot::Role;
use crate::engine::value::{ConfigValue, DataKind};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphDescription {
    #[serde(default)]
    pub elements: IndexMap<String, ElementDescription>,
    #[serde(default)]
    pub connections: Vec<ConnectionDescription>,
    #[serde(default)]
    pub triggers: IndexMap<String, TriggerDescription>,
    #[serde(default)]
    pub chains: Vec<ChainDescription>,
    #[serde(default)]
    pub exposures: Vec<ExposureDescription>,
}

impl GraphDescription {
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Total number of steps, nested groups included.
    pub fn step_count(&self) -> usize {
        self.elements
            .values()
            .map(|e| match &e.group {
                Some(group) => group.step_count(),
                None => 1,
            })
            .sum()
    }
}

/// One child element. Exactly one of `step_type` and `group` is set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ElementDescription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_type: Option<String>,
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub config: IndexMap<String, ConfigValue>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub slots: Vec<SlotDescription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<Box<GraphDescription>>,
}

impl ElementDescription {
    pub fn step(step_type: impl Into<String>) -> Self {
        Self {
            step_type: Some(step_type.into()),
            ..Self::default()
        }
    }

    pub fn group(graph: GraphDescription) -> Self {
        Self {
            group: Some(Box::new(graph)),
            ..Self::default()
        }
    }

    pub fn with_config(mut self, key: impl Into<String>, value: impl Into<ConfigValue>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }
}

/// Slot tuple `(name, role, mandatory, kind)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotDescription {
    pub name: String,
    pub role: Role,
    #[serde(default)]
    pub mandatory: bool,
    pub kind: DataKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionDescription {
    pub from: Endpoint,
    pub to: Endpoint,
}

/// A looped trigger. Unset fields fall back to the engine-wide trigger
/// defaults when the graph is built.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerDescription {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tick_on_start: Option<bool>,
    /// Attached steps. A step of a nested group is named by its path,
    /// e.g. `filter.smooth`.
    #[serde(default)]
    pub attached: Vec<String>,
}

impl TriggerDescription {
    /// Settings of a live trigger, every field written out.
    pub fn from_config(config: &LoopedTriggerConfig, attached: Vec<String>) -> Self {
        Self {
            period_ms: Some(config.period_ms),
            tick_on_start: Some(config.tick_on_start),
            attached,
        }
    }

    pub fn config(&self) -> LoopedTriggerConfig {
        self.config_or(LoopedTriggerConfig::default())
    }

    /// Resolve against `defaults` for the fields left unset.
    pub fn config_or(&self, defaults: LoopedTriggerConfig) -> LoopedTriggerConfig {
        LoopedTriggerConfig::with_period_ms(self.period_ms.unwrap_or(defaults.period_ms))
            .tick_on_start(self.tick_on_start.unwrap_or(defaults.tick_on_start))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainDescription {
    pub from: String,
    pub to: String,
}

/// Boundary slot `name` of the group backed by `target`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExposureDescription {
    pub role: Role,
    pub name: String,
    pub target: Endpoint,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::looped::DEFAULT_PERIOD_MS;

    #[test]
    fn test_toml_shape() {
        let text = r#"
            [elements.source]
            step_type = "constant"
            config = { value = 2.0 }

            [elements.amp]
            step_type = "gain"
            slots = [{ name = "in", role = "input", mandatory = true, kind = "scalar" }]

            [[connections]]
            from = "source.out"
            to = "amp.in"

            [triggers.main]
            period_ms = 20
            attached = ["source"]

            [[chains]]
            from = "source"
            to = "amp"
        "#;
        let desc: GraphDescription = toml::from_str(text).unwrap();
        assert_eq!(desc.elements.len(), 2);
        assert_eq!(
            desc.elements["source"].config["value"],
            ConfigValue::Float(2.0)
        );
        assert_eq!(desc.elements["amp"].slots[0].role, Role::Input);
        assert_eq!(desc.connections[0].to, Endpoint::new("amp", "in"));
        assert_eq!(desc.triggers["main"].config().period_ms, 20);
        assert_eq!(desc.triggers["main"].tick_on_start, None);
        assert_eq!(desc.triggers["main"].attached, vec!["source"]);
        assert_eq!(desc.chains[0].to, "amp");
    }

    #[test]
    fn test_trigger_period_default() {
        let desc: TriggerDescription = toml::from_str("attached = []").unwrap();
        assert_eq!(desc.period_ms, None);
        assert_eq!(desc.config().period_ms, DEFAULT_PERIOD_MS);
    }

    #[test]
    fn test_unset_trigger_fields_take_defaults() {
        let defaults = LoopedTriggerConfig::with_period_ms(25).tick_on_start(true);

        let bare: TriggerDescription = toml::from_str("attached = []").unwrap();
        assert_eq!(bare.config_or(defaults), defaults);

        let partial: TriggerDescription = toml::from_str("period_ms = 40").unwrap();
        let config = partial.config_or(defaults);
        assert_eq!(config.period_ms, 40);
        assert!(config.tick_on_start);

        // Written-out fields survive a text round trip; unset ones stay unset.
        let text = toml::to_string(&bare).unwrap();
        assert!(!text.contains("period_ms"));
        let full = TriggerDescription::from_config(&LoopedTriggerConfig::with_period_ms(7), vec![]);
        let back: TriggerDescription = toml::from_str(&toml::to_string(&full).unwrap()).unwrap();
        assert_eq!(back, full);
    }

    #[test]
    fn test_step_count_includes_nested() {
        let mut inner = GraphDescription::default();
        inner
            .elements
            .insert("a".into(), ElementDescription::step("constant"));
        inner.elements.insert("b".into(), ElementDescription::step("gain"));
        let mut outer = GraphDescription::default();
        outer.elements.insert("sub".into(), ElementDescription::group(inner));
        outer.elements.insert("c".into(), ElementDescription::step("sum"));
        assert_eq!(outer.step_count(), 3);
    }
}
