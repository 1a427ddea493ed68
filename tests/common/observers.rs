//! Collecting trigger events in tests

use parking_lot::Mutex;
use std::sync::Arc;
use tickflow::engine::{LoopedTrigger, TriggerEvent};

/// Records every event a looped trigger publishes
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<TriggerEvent>>>,
}

impl EventLog {
    pub fn attach(trigger: &LoopedTrigger) -> Self {
        let log = Self::default();
        let events = log.events.clone();
        trigger.subscribe(move |event| events.lock().push(event.clone()));
        log
    }

    pub fn events(&self) -> Vec<TriggerEvent> {
        self.events.lock().clone()
    }

    pub fn configuration_errors(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                TriggerEvent::ConfigurationError { error, .. } => Some(error),
                _ => None,
            })
            .collect()
    }

    pub fn step_failures(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, TriggerEvent::StepFailed { .. }))
            .count()
    }

    pub fn cascades(&self) -> usize {
        self.events()
            .iter()
            .filter(|event| matches!(event, TriggerEvent::CascadeCompleted(_)))
            .count()
    }
}
