//! Connection validity checks.
//!
//! Every INPUT slot asks "can I read this handle?" before a connection is
//! recorded and again before every tick. The base rule is an exact
//! [`DataKind`] match; the [`ValidityRegistry`] lets individual kinds add
//! further rules on top (array kinds compare range annotations with the
//! published shape and downgrade to a warning on mismatch).

use crate::engine::handle::DataHandle;
use crate::engine::value::{Annotation, DataKind};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Outcome of a validity check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Validity {
    Valid,
    /// Accepted, with a diagnostic.
    Warning(String),
    /// Rejected.
    Error(String),
}

impl Validity {
    /// Valid and Warning both allow the connection / tick.
    pub fn is_accepted(&self) -> bool {
        !matches!(self, Validity::Error(_))
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Validity::Valid => None,
            Validity::Warning(msg) | Validity::Error(msg) => Some(msg),
        }
    }
}

impl fmt::Display for Validity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Validity::Valid => write!(f, "valid"),
            Validity::Warning(msg) => write!(f, "warning: {}", msg),
            Validity::Error(msg) => write!(f, "error: {}", msg),
        }
    }
}

/// Extra per-kind rule, run after the kind itself matched.
pub type ValidityCheck = Arc<dyn Fn(&DataKind, &DataHandle) -> Validity + Send + Sync>;

/// Open mapping from data kind to its extra validity rule.
#[derive(Clone)]
pub struct ValidityRegistry {
    checks: HashMap<DataKind, ValidityCheck>,
}

impl ValidityRegistry {
    /// Registry with the shape rules for vectors and matrices.
    pub fn new() -> Self {
        let mut registry = Self::kinds_only();
        let shape: ValidityCheck = Arc::new(check_range_annotations);
        registry.register(DataKind::Vector, shape.clone());
        registry.register(DataKind::Matrix, shape);
        registry
    }

    /// Registry that only compares kinds.
    pub fn kinds_only() -> Self {
        Self {
            checks: HashMap::new(),
        }
    }

    /// Register (or replace) the rule for a kind.
    pub fn register(&mut self, kind: DataKind, check: ValidityCheck) {
        self.checks.insert(kind, check);
    }

    pub fn has_rule(&self, kind: &DataKind) -> bool {
        self.checks.contains_key(kind)
    }

    /// Check `candidate` against a slot declared with `expected`.
    pub fn check(&self, expected: &DataKind, candidate: &DataHandle) -> Validity {
        if candidate.kind() != expected {
            return Validity::Error(format!(
                "expected {}, got {}",
                expected,
                candidate.kind()
            ));
        }
        match self.checks.get(expected) {
            Some(check) => check(expected, candidate),
            None => Validity::Valid,
        }
    }
}

impl Default for ValidityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ValidityRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidityRegistry")
            .field("kinds", &self.checks.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn check_range_annotations(_kind: &DataKind, candidate: &DataHandle) -> Validity {
    let snapshot = candidate.snapshot();
    let shape = snapshot.value.shape();
    for annotation in &snapshot.annotations {
        if let Annotation::Range {
            dimension,
            start,
            end,
        } = annotation
        {
            let Some(extent) = shape.get(*dimension) else {
                return Validity::Warning(format!(
                    "range annotation on dimension {} but value has {} dimensions",
                    dimension,
                    shape.len()
                ));
            };
            if start > end || end > extent {
                return Validity::Warning(format!(
                    "range {}..{} on dimension {} exceeds extent {}",
                    start, end, dimension, extent
                ));
            }
        }
    }
    Validity::Valid
}
