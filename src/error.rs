//! Error handling for the tickflow engine
//!
//! This module defines the engine error type and a Result alias used
//! throughout the crate. Configuration errors are reported synchronously to
//! the caller and never leave a partial mutation behind. Runtime validity
//! failures and computation failures are absorbed by the step state machine
//! instead and only show up in step status and cascade reports.

use crate::engine::slot::Role;
use crate::engine::value::DataKind;
use thiserror::Error;

/// Main error type for tickflow operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// A slot with this name is already declared for the role
    #[error("Slot '{name}' is already declared as {role}")]
    DuplicateSlot { role: Role, name: String },

    /// The addressed slot does not exist
    #[error("Slot '{name}' ({role}) not found")]
    SlotNotFound { role: Role, name: String },

    /// The slot exists but cannot be used in the requested direction
    #[error("Slot '{name}' cannot be used as {expected}")]
    RoleMismatch { name: String, expected: Role },

    /// No element with this name in the group
    #[error("Element '{0}' not found")]
    ElementNotFound(String),

    /// An element with this name already exists in the group
    #[error("Element '{0}' already exists")]
    DuplicateElement(String),

    /// The destination rejected the candidate handle
    #[error("Connection {from} -> {to} rejected: {reason}")]
    InvalidConnection {
        from: String,
        to: String,
        reason: String,
    },

    /// No such connection in the group
    #[error("Connection {from} -> {to} not found")]
    ConnectionNotFound { from: String, to: String },

    /// Endpoint strings have the form `<element>.<slot>`
    #[error("Invalid endpoint '{0}': expected <element>.<slot>")]
    InvalidEndpoint(String),

    /// The element has no triggerable capability
    #[error("Element '{0}' is not triggerable")]
    NotTriggerable(String),

    /// The operation requires the looped trigger to be stopped
    #[error("Looped trigger '{0}' is running")]
    TriggerRunning(String),

    /// No looped trigger with this name is reachable
    #[error("Looped trigger '{0}' not found")]
    TriggerNotFound(String),

    /// A looped trigger with this name already exists in the group
    #[error("Looped trigger '{0}' already exists")]
    DuplicateTrigger(String),

    /// A trigger chain revisits a triggerable within one cascade
    #[error("Trigger cycle: '{from}' -> '{to}' revisits a triggerable within one cascade")]
    TriggerCycle { from: String, to: String },

    /// A value or handle of the wrong kind was supplied
    #[error("Data kind mismatch: expected {expected}, got {actual}")]
    KindMismatch { expected: DataKind, actual: DataKind },

    /// The step registry has no factory for this type
    #[error("Unknown step type '{0}'")]
    UnknownStepType(String),

    /// The step does not expose the requested function
    #[error("Unknown function '{function}' on step '{step}'")]
    UnknownFunction { step: String, function: String },

    /// A step function returned an error or panicked
    #[error("Function '{function}' on step '{step}' failed: {message}")]
    FunctionFailed {
        step: String,
        function: String,
        message: String,
    },

    /// Errors related to configuration values and graph descriptions
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<EngineError>,
    },
}

impl EngineError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        EngineError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Whether this error describes a structural/configuration problem
    pub fn is_configuration(&self) -> bool {
        match self {
            EngineError::Io(_) | EngineError::Serialization(_) => false,
            EngineError::FunctionFailed { .. } => false,
            EngineError::WithContext { source, .. } => source.is_configuration(),
            _ => true,
        }
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

impl From<toml::ser::Error> for EngineError {
    fn from(err: toml::ser::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(err: serde_json::Error) -> Self {
        EngineError::Serialization(err.to_string())
    }
}

/// Result type alias for tickflow operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}
