//! # tickflow: step graph execution at fixed rates
//!
//! A dataflow engine for control and measurement loops. Steps declare typed
//! INPUT, OUTPUT and BUFFER slots; groups connect them and nest; looped
//! triggers tick them on their own threads at fixed periods, cascading
//! through the steps chained on each step's `finished` trigger.
//!
//! ## Architecture
//!
//! - **Engine**: slots, handles, steps, cascade planning, looped triggers and
//!   groups (`engine`)
//! - **Steps**: built-in computations plus the `StepPlugin` trait for custom
//!   ones, including Rhai script steps (`engine::steps`)
//! - **Configuration**: TOML engine config with an optional persisted graph
//!   (`config`)
//! - **Logging**: `tracing` subscriber setup (`logging`)
//!
//! ## Example
//!
//! ```ignore
//! use tickflow::engine::{BuiltinStep, Group, LoopedTriggerConfig, Step};
//! use tickflow::engine::steps::{ConstantStep, GainStep};
//!
//! let group = Group::new("root");
//! group.add_step(Step::builtin("source", BuiltinStep::Constant(ConstantStep::new(2.0)))?)?;
//! group.add_step(Step::builtin("amp", BuiltinStep::Gain(GainStep::new(3.0)))?)?;
//! group.connect("source.out", "amp.in")?;
//!
//! group.add_looped_trigger("control", LoopedTriggerConfig::with_period_ms(10))?;
//! group.assign("source", "control")?;
//! group.connect_trigger("source", "amp")?;
//! group.start_all()?;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod logging;

// Re-export commonly used types
pub use config::EngineConfig;
pub use engine::{
    DataHandle, DataKind, DataValue, Group, LoopedTrigger, LoopedTriggerConfig, Role, Step,
    StepRegistry, Triggerable,
};
pub use error::{EngineError, Result};
