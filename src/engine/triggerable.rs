//! The triggerable capability: a lifecycle state machine driven by ticks.

use crate::engine::id::{NodeId, TriggerId};
use crate::engine::looped::{LoopedTrigger, WeakLoopedTrigger};
use crate::engine::trigger::Trigger;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Lifecycle state of a triggerable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    NotRunning,
    /// Started, but waiting for mandatory inputs or a first successful tick.
    Initializing,
    Running,
    /// Computation failed. Stays here until reset.
    Exception,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            State::NotRunning => "not running",
            State::Initializing => "initializing",
            State::Running => "running",
            State::Exception => "exception",
        };
        write!(f, "{}", text)
    }
}

/// State plus diagnostic and time of the last change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    pub state: State,
    pub message: Option<String>,
    pub since: DateTime<Utc>,
}

impl Status {
    pub fn new(state: State, message: Option<String>) -> Self {
        Self {
            state,
            message,
            since: Utc::now(),
        }
    }
}

impl Default for Status {
    fn default() -> Self {
        Self::new(State::NotRunning, None)
    }
}

/// Published to status callbacks on every state or message change.
#[derive(Debug, Clone)]
pub struct StatusChange {
    pub node: NodeId,
    pub name: String,
    pub previous: State,
    pub status: Status,
}

/// What a single `tick` did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Computation ran and outputs were published.
    Fired,
    /// A mandatory input was missing or invalid; nothing ran.
    Gated(String),
    /// Computation returned an error or panicked.
    Failed(String),
    /// Already in `Exception`.
    Skipped,
}

impl TickOutcome {
    pub fn fired(&self) -> bool {
        matches!(self, TickOutcome::Fired)
    }
}

/// Anything a looped trigger can drive.
pub trait Triggerable: Send + Sync {
    fn id(&self) -> NodeId;

    fn name(&self) -> String;

    fn status(&self) -> Status;

    /// Run once. Never panics because of the computation.
    fn tick(&self, dt: Duration) -> TickOutcome;

    /// Raised after every successful tick; its listeners are chained.
    fn finished(&self) -> &Trigger;

    /// Called when the owning looped trigger starts.
    fn on_start(&self) {}

    /// Called when the owning looped trigger stops.
    fn on_stop(&self) {}

    /// Leave `Exception` and wait for the next tick again.
    fn reset(&self);

    /// Nodes this one reads data from.
    fn upstream(&self) -> Vec<NodeId> {
        Vec::new()
    }

    /// Back reference to the owning looped trigger.
    fn owner_link(&self) -> &OwnerLink;
}

/// Zero or one owning looped trigger, held weakly.
#[derive(Default)]
pub struct OwnerLink {
    owner: Mutex<Option<WeakLoopedTrigger>>,
}

impl OwnerLink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self) -> Option<LoopedTrigger> {
        self.owner.lock().as_ref().and_then(|weak| weak.upgrade())
    }

    pub fn owner_id(&self) -> Option<TriggerId> {
        self.get().map(|t| t.id())
    }

    pub(crate) fn set(&self, owner: &LoopedTrigger) {
        *self.owner.lock() = Some(owner.downgrade());
    }

    /// Clear the link if it still points at `owner`.
    pub(crate) fn clear_if(&self, owner: TriggerId) {
        let mut link = self.owner.lock();
        let matches = link
            .as_ref()
            .map(|weak| weak.id() == owner)
            .unwrap_or(false);
        if matches {
            *link = None;
        }
    }
}

impl fmt::Debug for OwnerLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OwnerLink").field(&self.owner_id()).finish()
    }
}
