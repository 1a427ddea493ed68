//! Shared data handles.
//!
//! A handle is the unit of data exchange between steps. The OUTPUT or BUFFER
//! slot that declares it keeps the strong reference; INPUT slots only keep a
//! [`WeakHandle`], which reads as gone once the producing slot is removed.
//!
//! Publishing swaps the whole value under the write lock and bumps the
//! version, so a reader always sees either the previous or the next value in
//! full.

use crate::engine::value::{Annotation, DataKind, DataValue};
use crate::error::{EngineError, Result};
use parking_lot::RwLock;
use std::sync::{Arc, Weak};

#[derive(Debug)]
struct HandleState {
    value: DataValue,
    annotations: Vec<Annotation>,
    version: u64,
}

#[derive(Debug)]
struct HandleCell {
    kind: DataKind,
    state: RwLock<HandleState>,
}

/// Point-in-time copy of a handle's content.
#[derive(Debug, Clone, PartialEq)]
pub struct HandleSnapshot {
    pub kind: DataKind,
    pub value: DataValue,
    pub annotations: Vec<Annotation>,
    /// Number of publishes since creation. Zero means never published.
    pub version: u64,
}

/// Strong reference to a shared data cell.
#[derive(Debug, Clone)]
pub struct DataHandle {
    cell: Arc<HandleCell>,
}

impl DataHandle {
    /// Create a handle holding the zero value of `kind`.
    pub fn new(kind: DataKind) -> Self {
        let value = DataValue::empty(&kind);
        Self::with_value(value)
    }

    /// Create a handle whose kind is taken from the initial value.
    pub fn with_value(value: DataValue) -> Self {
        Self {
            cell: Arc::new(HandleCell {
                kind: value.kind(),
                state: RwLock::new(HandleState {
                    value,
                    annotations: Vec::new(),
                    version: 0,
                }),
            }),
        }
    }

    pub fn kind(&self) -> &DataKind {
        &self.cell.kind
    }

    /// Replace the value. Annotations are kept.
    pub fn publish(&self, value: DataValue) -> Result<u64> {
        self.check_kind(&value)?;
        let mut state = self.cell.state.write();
        state.value = value;
        state.version += 1;
        Ok(state.version)
    }

    /// Replace value and annotations in one write.
    pub fn publish_with(&self, value: DataValue, annotations: Vec<Annotation>) -> Result<u64> {
        self.check_kind(&value)?;
        let mut state = self.cell.state.write();
        state.value = value;
        state.annotations = annotations;
        state.version += 1;
        Ok(state.version)
    }

    pub fn set_annotations(&self, annotations: Vec<Annotation>) {
        self.cell.state.write().annotations = annotations;
    }

    pub fn snapshot(&self) -> HandleSnapshot {
        let state = self.cell.state.read();
        HandleSnapshot {
            kind: self.cell.kind.clone(),
            value: state.value.clone(),
            annotations: state.annotations.clone(),
            version: state.version,
        }
    }

    pub fn value(&self) -> DataValue {
        self.cell.state.read().value.clone()
    }

    pub fn annotations(&self) -> Vec<Annotation> {
        self.cell.state.read().annotations.clone()
    }

    pub fn version(&self) -> u64 {
        self.cell.state.read().version
    }

    pub fn downgrade(&self) -> WeakHandle {
        WeakHandle {
            cell: Arc::downgrade(&self.cell),
        }
    }

    /// Whether both references point at the same cell.
    pub fn same_as(&self, other: &DataHandle) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }

    fn check_kind(&self, value: &DataValue) -> Result<()> {
        let actual = value.kind();
        if actual != self.cell.kind {
            return Err(EngineError::KindMismatch {
                expected: self.cell.kind.clone(),
                actual,
            });
        }
        Ok(())
    }
}

/// Non-owning reference held by INPUT slots.
#[derive(Debug, Clone)]
pub struct WeakHandle {
    cell: Weak<HandleCell>,
}

impl WeakHandle {
    pub fn upgrade(&self) -> Option<DataHandle> {
        self.cell.upgrade().map(|cell| DataHandle { cell })
    }

    pub fn is_alive(&self) -> bool {
        self.cell.strong_count() > 0
    }

    pub fn points_to(&self, handle: &DataHandle) -> bool {
        Weak::ptr_eq(&self.cell, &Arc::downgrade(&handle.cell))
    }
}
