//! Values flowing through data handles, and step configuration values.
//!
//! `DataKind` is the explicit tag every slot and handle carries. The default
//! validity rule compares kinds for equality, so there is no runtime type
//! reflection anywhere in the engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of data a slot accepts or a handle holds.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataKind {
    /// Single floating point value.
    Scalar,
    /// Single boolean flag.
    Boolean,
    /// One-dimensional numeric array.
    Vector,
    /// Two-dimensional numeric array, row-major.
    Matrix,
    /// UTF-8 text.
    Text,
    /// Application-defined kind, compared by name.
    Custom(String),
}

impl DataKind {
    /// Get the display name for this kind.
    pub fn display_name(&self) -> &str {
        match self {
            DataKind::Scalar => "scalar",
            DataKind::Boolean => "boolean",
            DataKind::Vector => "vector",
            DataKind::Matrix => "matrix",
            DataKind::Text => "text",
            DataKind::Custom(name) => name,
        }
    }

    /// Number of dimensions a value of this kind has, if it is an array kind.
    pub fn dimensions(&self) -> Option<usize> {
        match self {
            DataKind::Vector => Some(1),
            DataKind::Matrix => Some(2),
            _ => None,
        }
    }
}

impl fmt::Display for DataKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// A value held by a data handle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataValue {
    Scalar(f64),
    Boolean(bool),
    Vector(Vec<f64>),
    Matrix {
        rows: usize,
        cols: usize,
        data: Vec<f64>,
    },
    Text(String),
    Custom {
        kind: String,
        value: serde_json::Value,
    },
}

impl DataValue {
    /// The kind of this value.
    pub fn kind(&self) -> DataKind {
        match self {
            DataValue::Scalar(_) => DataKind::Scalar,
            DataValue::Boolean(_) => DataKind::Boolean,
            DataValue::Vector(_) => DataKind::Vector,
            DataValue::Matrix { .. } => DataKind::Matrix,
            DataValue::Text(_) => DataKind::Text,
            DataValue::Custom { kind, .. } => DataKind::Custom(kind.clone()),
        }
    }

    /// The zero value of a kind. Used as the initial content of declared
    /// output and buffer slots.
    pub fn empty(kind: &DataKind) -> Self {
        match kind {
            DataKind::Scalar => DataValue::Scalar(0.0),
            DataKind::Boolean => DataValue::Boolean(false),
            DataKind::Vector => DataValue::Vector(Vec::new()),
            DataKind::Matrix => DataValue::Matrix {
                rows: 0,
                cols: 0,
                data: Vec::new(),
            },
            DataKind::Text => DataValue::Text(String::new()),
            DataKind::Custom(name) => DataValue::Custom {
                kind: name.clone(),
                value: serde_json::Value::Null,
            },
        }
    }

    /// Build a matrix value. Returns `None` if `data` does not hold
    /// `rows * cols` elements.
    pub fn matrix(rows: usize, cols: usize, data: Vec<f64>) -> Option<Self> {
        if rows * cols != data.len() {
            return None;
        }
        Some(DataValue::Matrix { rows, cols, data })
    }

    /// Extent per dimension. Scalars and other non-array values have no
    /// dimensions.
    pub fn shape(&self) -> Vec<usize> {
        match self {
            DataValue::Vector(v) => vec![v.len()],
            DataValue::Matrix { rows, cols, .. } => vec![*rows, *cols],
            _ => Vec::new(),
        }
    }

    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            DataValue::Scalar(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            DataValue::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[f64]> {
        match self {
            DataValue::Vector(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            DataValue::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl From<f64> for DataValue {
    fn from(v: f64) -> Self {
        DataValue::Scalar(v)
    }
}

impl From<bool> for DataValue {
    fn from(v: bool) -> Self {
        DataValue::Boolean(v)
    }
}

impl From<Vec<f64>> for DataValue {
    fn from(v: Vec<f64>) -> Self {
        DataValue::Vector(v)
    }
}

/// Shape/semantic annotation attached to a data handle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Annotation {
    /// Valid index range `[start, end)` along one dimension.
    Range {
        dimension: usize,
        start: usize,
        end: usize,
    },
    /// Free-form key/value label (units, channel names, ...).
    Label { key: String, value: String },
}

/// A typed configuration value applied to a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl ConfigValue {
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric view; integers are widened.
    pub fn as_float(&self) -> Option<f64> {
        match self {
            ConfigValue::Float(v) => Some(*v),
            ConfigValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(v) => Some(v),
            _ => None,
        }
    }
}

impl From<f64> for ConfigValue {
    fn from(v: f64) -> Self {
        ConfigValue::Float(v)
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        ConfigValue::Int(v)
    }
}

impl From<bool> for ConfigValue {
    fn from(v: bool) -> Self {
        ConfigValue::Bool(v)
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        ConfigValue::String(v.to_string())
    }
}

impl From<String> for ConfigValue {
    fn from(v: String) -> Self {
        ConfigValue::String(v)
    }
}
