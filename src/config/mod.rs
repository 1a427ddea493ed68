//! Configuration module for tickflow
//!
//! This module handles engine configuration including:
//! - Logging setup (filter, output format)
//! - Defaults for new looped triggers
//! - Which validity rules are active
//! - An optional persisted graph, restored with [`EngineConfig::build_graph`]
//!
//! # File Format
//!
//! Configuration files are TOML:
//!
//! ```toml
//! [logging]
//! filter = "info,tickflow=debug"
//! format = "compact"
//!
//! [triggers]
//! period_ms = 10
//! tick_on_start = false
//!
//! [validity]
//! annotation_warnings = true
//!
//! [graph.elements.source]
//! step_type = "constant"
//! config = { value = 2.0 }
//! ```
//!
//! # Example
//!
//! ```ignore
//! use tickflow::config::EngineConfig;
//! use tickflow::engine::StepRegistry;
//!
//! let config = EngineConfig::load("engine.toml")?;
//! tickflow::logging::init(&config.logging)?;
//!
//! let registry = config.registry();
//! if let Some(graph) = config.build_graph(&registry)? {
//!     graph.start_all()?;
//! }
//! ```

use crate::engine::description::GraphDescription;
use crate::engine::group::Group;
use crate::engine::looped::{LoopedTriggerConfig, DEFAULT_PERIOD_MS};
use crate::engine::registry::StepRegistry;
use crate::engine::validity::ValidityRegistry;
use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// Configuration file extension
pub const CONFIG_FILE_EXTENSION: &str = "toml";

/// Default log filter when `RUST_LOG` is not set
pub const DEFAULT_LOG_FILTER: &str = "info,tickflow=debug";

/// Name given to the root group restored from a config file
pub const ROOT_GROUP_NAME: &str = "root";

// ==================== Logging ====================

/// Output format of the log layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Default multi-field single-line format
    #[default]
    Full,
    /// Shorter single-line format
    Compact,
    /// Multi-line human readable format
    Pretty,
}

/// Logging settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `EnvFilter` directive, overridden by `RUST_LOG`
    pub filter: String,

    /// Output format
    pub format: LogFormat,

    /// Include the event target (module path)
    pub with_target: bool,

    /// Include thread names; trigger threads are named `trigger-<name>`
    pub thread_names: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            format: LogFormat::Full,
            with_target: true,
            thread_names: true,
        }
    }
}

// ==================== Validity ====================

/// Which validity rules new steps are checked with
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidityConfig {
    /// Compare range annotations of vectors and matrices with their shape
    /// and accept mismatches with a warning
    pub annotation_warnings: bool,
}

impl Default for ValidityConfig {
    fn default() -> Self {
        Self {
            annotation_warnings: true,
        }
    }
}

impl ValidityConfig {
    pub fn registry(&self) -> ValidityRegistry {
        if self.annotation_warnings {
            ValidityRegistry::new()
        } else {
            ValidityRegistry::kinds_only()
        }
    }
}

// ==================== Engine Config ====================

/// Complete engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Version for future migration support
    #[serde(default = "default_config_version")]
    pub version: u32,

    /// Logging settings
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Defaults for looped triggers created without explicit settings
    #[serde(default)]
    pub triggers: LoopedTriggerConfig,

    /// Validity rules
    #[serde(default)]
    pub validity: ValidityConfig,

    /// Persisted graph, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph: Option<GraphDescription>,
}

fn default_config_version() -> u32 {
    1
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: 1,
            logging: LoggingConfig::default(),
            triggers: LoopedTriggerConfig::with_period_ms(DEFAULT_PERIOD_MS),
            validity: ValidityConfig::default(),
            graph: None,
        }
    }
}

impl EngineConfig {
    /// Load a config file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            EngineError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_toml(&content).map_err(|e| {
            EngineError::Config(format!("Failed to parse config file {:?}: {}", path, e))
        })
    }

    /// Load a config file, returning defaults if any error occurs
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save the config to disk as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    EngineError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|e| {
            EngineError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Attach a graph description
    pub fn with_graph(mut self, graph: GraphDescription) -> Self {
        self.graph = Some(graph);
        self
    }

    /// Step registry with the built-in steps and the configured validity
    /// rules
    pub fn registry(&self) -> StepRegistry {
        let mut registry = StepRegistry::with_validity(Arc::new(self.validity.registry()));
        registry.register_builtins();
        registry
    }

    /// Rebuild the persisted graph, if the config carries one. Triggers
    /// that leave a setting out take it from `[triggers]`.
    pub fn build_graph(&self, registry: &StepRegistry) -> Result<Option<Arc<Group>>> {
        self.graph
            .as_ref()
            .map(|graph| {
                Group::from_description_with_defaults(registry, ROOT_GROUP_NAME, graph, self.triggers)
            })
            .transpose()
    }
}
