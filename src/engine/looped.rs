//! Looped triggers: fixed-period timers that drive cascades.
//!
//! Each started looped trigger owns one OS thread. The thread waits on a
//! crossbeam stop channel with a timeout equal to the time left in the
//! current period, then runs one cascade. Stopping sends on that channel
//! and joins, so an in-flight cascade always completes first.
//!
//! A cascade runs under the trigger's cascade lock. `fire()` takes the same
//! lock, so manual stepping never overlaps the timer thread. Neither
//! `fire()` nor `detach_forced()` may be called from inside a cascade of the
//! same trigger.

use crate::engine::callbacks::Callbacks;
use crate::engine::cascade::{CascadeCompiler, CascadePlan, ChainCycle, PlanStats, TriggeringOrder};
use crate::engine::id::{CallbackId, NodeId, TriggerId};
use crate::engine::triggerable::{TickOutcome, Triggerable};
use crate::error::{EngineError, Result};
use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle, ThreadId};
use std::time::{Duration, Instant};

/// Default timer period.
pub const DEFAULT_PERIOD_MS: u64 = 10;

/// Shortest accepted period.
pub const MIN_PERIOD_MS: u64 = 1;

/// Looped trigger settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopedTriggerConfig {
    /// Timer period in milliseconds.
    pub period_ms: u64,
    /// Run one cascade immediately on start instead of after one period.
    pub tick_on_start: bool,
}

impl Default for LoopedTriggerConfig {
    fn default() -> Self {
        Self {
            period_ms: DEFAULT_PERIOD_MS,
            tick_on_start: false,
        }
    }
}

impl LoopedTriggerConfig {
    pub fn with_period_ms(period_ms: u64) -> Self {
        Self {
            period_ms,
            ..Self::default()
        }
    }

    pub fn tick_on_start(mut self, tick_on_start: bool) -> Self {
        self.tick_on_start = tick_on_start;
        self
    }

    pub fn period(&self) -> Duration {
        Duration::from_millis(self.period_ms.max(MIN_PERIOD_MS))
    }
}

/// What one cascade did.
#[derive(Debug, Clone, Serialize)]
pub struct CascadeReport {
    pub trigger: String,
    /// Cascade counter of this trigger, starting at 1.
    pub sequence: u64,
    pub started_at: DateTime<Utc>,
    /// Time since the previous cascade (one period for the first).
    pub dt: Duration,
    /// Wall time of this cascade.
    pub duration: Duration,
    /// Ticked and published, in execution order.
    pub ran: Vec<NodeId>,
    pub gated: Vec<(NodeId, String)>,
    pub failed: Vec<(NodeId, String)>,
    /// In `Exception`, not ticked.
    pub skipped: Vec<NodeId>,
    /// Chained nodes whose predecessors did not fire.
    pub not_triggered: Vec<NodeId>,
    pub cycles: Vec<ChainCycle>,
}

impl CascadeReport {
    /// Every node that was asked to tick, in execution order.
    pub fn ticked(&self) -> usize {
        self.ran.len() + self.gated.len() + self.failed.len()
    }

    pub fn has_errors(&self) -> bool {
        !self.failed.is_empty() || !self.cycles.is_empty()
    }

    pub fn cycle_errors(&self) -> Vec<EngineError> {
        self.cycles.iter().map(ChainCycle::to_error).collect()
    }
}

/// Lifecycle and cascade notifications.
#[derive(Debug, Clone)]
pub enum TriggerEvent {
    Started { trigger: String },
    Stopped { trigger: String },
    CascadeCompleted(CascadeReport),
    /// A chain cycle appeared in the plan.
    ConfigurationError { trigger: String, error: String },
    StepFailed {
        trigger: String,
        node: NodeId,
        name: String,
        message: String,
    },
}

struct CascadeState {
    last_tick: Option<Instant>,
    last_order: TriggeringOrder,
    last_cycles: Vec<ChainCycle>,
    stats: PlanStats,
}

struct Worker {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
    thread: ThreadId,
}

struct LoopedShared {
    id: TriggerId,
    name: String,
    config: RwLock<LoopedTriggerConfig>,
    attached: RwLock<Vec<Arc<dyn Triggerable>>>,
    running: AtomicBool,
    sequence: AtomicU64,
    cascade: Mutex<CascadeState>,
    worker: Mutex<Option<Worker>>,
    /// Thread told to stop from its own cascade, not yet joined.
    exiting: Mutex<Option<JoinHandle<()>>>,
    last_report: RwLock<Option<CascadeReport>>,
    callbacks: Callbacks<TriggerEvent>,
    event_senders: Mutex<Vec<Sender<TriggerEvent>>>,
}

/// Fixed-period trigger. Cloning yields another handle to the same trigger.
#[derive(Clone)]
pub struct LoopedTrigger {
    shared: Arc<LoopedShared>,
}

/// Non-owning reference to a looped trigger.
#[derive(Clone)]
pub struct WeakLoopedTrigger {
    id: TriggerId,
    shared: Weak<LoopedShared>,
}

impl WeakLoopedTrigger {
    pub fn id(&self) -> TriggerId {
        self.id
    }

    pub fn upgrade(&self) -> Option<LoopedTrigger> {
        self.shared.upgrade().map(|shared| LoopedTrigger { shared })
    }
}

impl LoopedTrigger {
    /// Create a stopped trigger with nothing attached.
    pub fn new(name: impl Into<String>, config: LoopedTriggerConfig) -> Self {
        Self {
            shared: Arc::new(LoopedShared {
                id: TriggerId::new(),
                name: name.into(),
                config: RwLock::new(config),
                attached: RwLock::new(Vec::new()),
                running: AtomicBool::new(false),
                sequence: AtomicU64::new(0),
                cascade: Mutex::new(CascadeState {
                    last_tick: None,
                    last_order: TriggeringOrder::default(),
                    last_cycles: Vec::new(),
                    stats: PlanStats::default(),
                }),
                worker: Mutex::new(None),
                exiting: Mutex::new(None),
                last_report: RwLock::new(None),
                callbacks: Callbacks::new(),
                event_senders: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn id(&self) -> TriggerId {
        self.shared.id
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn config(&self) -> LoopedTriggerConfig {
        self.shared.config.read().clone()
    }

    /// Change the period. A running trigger picks it up on its next wait.
    pub fn set_period(&self, period: Duration) {
        self.shared.config.write().period_ms = (period.as_millis() as u64).max(MIN_PERIOD_MS);
    }

    pub fn set_tick_on_start(&self, tick_on_start: bool) {
        self.shared.config.write().tick_on_start = tick_on_start;
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    pub fn downgrade(&self) -> WeakLoopedTrigger {
        WeakLoopedTrigger {
            id: self.shared.id,
            shared: Arc::downgrade(&self.shared),
        }
    }

    pub fn same_as(&self, other: &LoopedTrigger) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    // ── Attachment ───────────────────────────────────────────────────────

    /// Attach a triggerable directly. Both this trigger and the node's
    /// current owner (if any) must be stopped; the node moves over.
    pub fn attach(&self, node: Arc<dyn Triggerable>) -> Result<()> {
        self.ensure_stopped()?;
        if let Some(previous) = node.owner_link().get() {
            if previous.same_as(self) {
                return Ok(());
            }
            previous.ensure_stopped()?;
            previous.remove_attached(node.id());
        }
        {
            let mut attached = self.shared.attached.write();
            if !attached.iter().any(|n| n.id() == node.id()) {
                attached.push(node.clone());
            }
        }
        node.owner_link().set(self);
        tracing::debug!(trigger = %self.name(), node = %node.name(), "Triggerable attached");
        Ok(())
    }

    /// Detach a triggerable. Requires the trigger to be stopped.
    pub fn detach(&self, node: NodeId) -> Result<bool> {
        self.ensure_stopped()?;
        Ok(self.remove_attached(node))
    }

    /// Detach while running. Waits for the in-flight cascade.
    pub fn detach_forced(&self, node: NodeId) -> bool {
        let _cascade = self.shared.cascade.lock();
        self.remove_attached(node)
    }

    fn remove_attached(&self, node: NodeId) -> bool {
        let removed = {
            let mut attached = self.shared.attached.write();
            let position = attached.iter().position(|n| n.id() == node);
            position.map(|i| attached.remove(i))
        };
        match removed {
            Some(node) => {
                node.owner_link().clear_if(self.id());
                true
            }
            None => false,
        }
    }

    fn ensure_stopped(&self) -> Result<()> {
        if self.is_running() {
            return Err(EngineError::TriggerRunning(self.name().to_string()));
        }
        Ok(())
    }

    pub fn attached(&self) -> Vec<Arc<dyn Triggerable>> {
        self.shared.attached.read().clone()
    }

    pub fn attached_ids(&self) -> Vec<NodeId> {
        self.shared.attached.read().iter().map(|n| n.id()).collect()
    }

    pub fn is_attached(&self, node: NodeId) -> bool {
        self.attached_ids().contains(&node)
    }

    // ── Planning ─────────────────────────────────────────────────────────

    pub fn plan(&self) -> CascadePlan {
        CascadeCompiler::compile(&self.attached())
    }

    /// Current ordering of every triggerable this trigger reaches.
    pub fn triggering_order(&self) -> TriggeringOrder {
        self.plan().order()
    }

    /// Configuration errors (chain cycles) of the current plan.
    pub fn validate(&self) -> Vec<EngineError> {
        self.plan().errors()
    }

    /// Statistics of the plan used by the most recent cascade.
    pub fn plan_stats(&self) -> PlanStats {
        self.shared.cascade.lock().stats.clone()
    }

    // ── Lifecycle ────────────────────────────────────────────────────────

    /// Start the timer thread. Starting a running trigger is a no-op. A
    /// thread still winding down from a stop issued inside its own cascade
    /// is joined first, so start() right after such a stop restarts.
    pub fn start(&self) -> Result<()> {
        self.join_exiting()?;
        let mut worker = self.shared.worker.lock();
        if worker.is_some() || self.is_running() {
            tracing::debug!(trigger = %self.name(), "Looped trigger already running");
            return Ok(());
        }

        let plan = self.plan();
        for cycle in &plan.cycles {
            tracing::warn!(trigger = %self.name(), "{}", cycle.to_error());
        }
        for entry in &plan.entries {
            entry.node.on_start();
        }

        {
            let mut cascade = self.shared.cascade.lock();
            cascade.last_tick = None;
            cascade.last_order = plan.order();
        }
        self.shared.running.store(true, Ordering::Release);
        tracing::info!(
            trigger = %self.name(),
            period_ms = self.config().period_ms,
            nodes = plan.entries.len(),
            "Looped trigger started"
        );
        self.shared.emit(TriggerEvent::Started {
            trigger: self.name().to_string(),
        });

        let (stop_tx, stop_rx) = bounded::<()>(1);
        let weak = Arc::downgrade(&self.shared);
        let spawned = thread::Builder::new()
            .name(format!("trigger-{}", self.name()))
            .spawn(move || run_loop(weak, stop_rx));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                self.shared.on_loop_exit();
                return Err(EngineError::Io(e));
            }
        };
        *worker = Some(Worker {
            stop_tx,
            thread: handle.thread().id(),
            handle,
        });
        Ok(())
    }

    /// Stop the timer thread after the in-flight cascade. Called from the
    /// trigger's own thread it only signals; the thread exits after the
    /// current cascade.
    pub fn stop(&self) -> Result<()> {
        let Some(worker) = self.shared.worker.lock().take() else {
            // A stop from the trigger's own thread may still be unwinding.
            return match self.join_exiting() {
                Err(EngineError::TriggerRunning(_)) => Ok(()),
                other => other,
            };
        };
        // Full channel means a stop is already pending.
        let _ = worker.stop_tx.try_send(());
        if thread::current().id() == worker.thread {
            tracing::debug!(trigger = %self.name(), "Stop requested from own cascade");
            *self.shared.exiting.lock() = Some(worker.handle);
            return Ok(());
        }
        self.join(worker.handle);
        Ok(())
    }

    /// Join a thread left behind by a stop from inside its own cascade.
    /// Fails when called from that very thread, which cannot wait on itself.
    fn join_exiting(&self) -> Result<()> {
        let mut exiting = self.shared.exiting.lock();
        let Some(handle) = exiting.take() else {
            return Ok(());
        };
        if handle.thread().id() == thread::current().id() {
            *exiting = Some(handle);
            return Err(EngineError::TriggerRunning(self.name().to_string()));
        }
        drop(exiting);
        self.join(handle);
        Ok(())
    }

    fn join(&self, handle: JoinHandle<()>) {
        if handle.join().is_err() {
            tracing::error!(trigger = %self.name(), "Looped trigger thread panicked");
            self.shared.running.store(false, Ordering::Release);
        }
    }

    /// Block until the in-flight cascade, if any, has finished.
    pub(crate) fn wait_for_cascade(&self) {
        drop(self.shared.cascade.lock());
    }

    /// Run one cascade synchronously on the calling thread.
    pub fn fire(&self) -> CascadeReport {
        self.shared.run_cascade()
    }

    pub fn last_report(&self) -> Option<CascadeReport> {
        self.shared.last_report.read().clone()
    }

    /// Number of cascades run so far.
    pub fn cascade_count(&self) -> u64 {
        self.shared.sequence.load(Ordering::Relaxed)
    }

    // ── Notifications ────────────────────────────────────────────────────

    pub fn subscribe<F>(&self, callback: F) -> CallbackId
    where
        F: Fn(&TriggerEvent) + Send + Sync + 'static,
    {
        self.shared.callbacks.subscribe(callback)
    }

    pub fn unsubscribe(&self, id: CallbackId) -> bool {
        self.shared.callbacks.unsubscribe(id)
    }

    /// Receive events over a bounded channel. Events are dropped when the
    /// receiver falls behind.
    pub fn event_channel(&self, capacity: usize) -> Receiver<TriggerEvent> {
        let (tx, rx) = bounded(capacity.max(1));
        self.shared.event_senders.lock().push(tx);
        rx
    }
}

impl std::fmt::Debug for LoopedTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoopedTrigger")
            .field("id", &self.id())
            .field("name", &self.name())
            .field("period_ms", &self.config().period_ms)
            .field("running", &self.is_running())
            .finish()
    }
}

impl LoopedShared {
    fn run_cascade(&self) -> CascadeReport {
        let mut state = self.cascade.lock();
        let started = Instant::now();
        let period = self.config.read().period();
        let dt = state
            .last_tick
            .map(|t| started.duration_since(t))
            .unwrap_or(period);
        state.last_tick = Some(started);

        let roots = self.attached.read().clone();
        let plan = CascadeCompiler::compile(&roots);
        let order = plan.order();
        if order != state.last_order {
            // Nodes chained in while running get the same start notice as
            // the ones planned at start().
            if self.running.load(Ordering::Acquire) {
                for entry in &plan.entries {
                    if state.last_order.depth_of(entry.id).is_none() {
                        entry.node.on_start();
                    }
                }
            }
            tracing::debug!(
                trigger = %self.name,
                nodes = plan.stats.total_nodes,
                depths = plan.stats.depth_count,
                compile_time_us = plan.stats.compile_time_us,
                "Cascade plan recompiled"
            );
            state.last_order = order;
        }
        state.stats = plan.stats.clone();

        let mut events = Vec::new();
        if plan.cycles != state.last_cycles {
            for cycle in &plan.cycles {
                let error = cycle.to_error();
                tracing::warn!(trigger = %self.name, "{}", error);
                events.push(TriggerEvent::ConfigurationError {
                    trigger: self.name.clone(),
                    error: error.to_string(),
                });
            }
            state.last_cycles = plan.cycles.clone();
        }

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let mut report = CascadeReport {
            trigger: self.name.clone(),
            sequence,
            started_at: Utc::now(),
            dt,
            duration: Duration::ZERO,
            ran: Vec::new(),
            gated: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            not_triggered: Vec::new(),
            cycles: plan.cycles.clone(),
        };

        let mut fired = vec![false; plan.entries.len()];
        for (position, entry) in plan.entries.iter().enumerate() {
            let eligible = entry.root || entry.chain_preds.iter().any(|&p| fired[p]);
            if !eligible {
                report.not_triggered.push(entry.id);
                continue;
            }
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| entry.node.tick(dt)))
                .unwrap_or_else(|_| TickOutcome::Failed("triggerable panicked".to_string()));
            match outcome {
                TickOutcome::Fired => {
                    fired[position] = true;
                    report.ran.push(entry.id);
                }
                TickOutcome::Gated(reason) => report.gated.push((entry.id, reason)),
                TickOutcome::Failed(message) => {
                    events.push(TriggerEvent::StepFailed {
                        trigger: self.name.clone(),
                        node: entry.id,
                        name: entry.name.clone(),
                        message: message.clone(),
                    });
                    report.failed.push((entry.id, message));
                }
                TickOutcome::Skipped => report.skipped.push(entry.id),
            }
        }
        report.duration = started.elapsed();
        drop(state);

        tracing::trace!(
            trigger = %self.name,
            sequence,
            ran = report.ran.len(),
            gated = report.gated.len(),
            failed = report.failed.len(),
            "Cascade completed"
        );
        *self.last_report.write() = Some(report.clone());
        for event in events {
            self.emit(event);
        }
        self.emit(TriggerEvent::CascadeCompleted(report.clone()));
        report
    }

    fn emit(&self, event: TriggerEvent) {
        self.callbacks.emit(&event);
        let mut senders = self.event_senders.lock();
        senders.retain(|tx| !matches!(tx.try_send(event.clone()), Err(TrySendError::Disconnected(_))));
    }

    fn on_loop_exit(&self) {
        let plan = CascadeCompiler::compile(&self.attached.read().clone());
        for entry in &plan.entries {
            entry.node.on_stop();
        }
        self.running.store(false, Ordering::Release);
        tracing::info!(trigger = %self.name, cascades = self.sequence.load(Ordering::Relaxed), "Looped trigger stopped");
        self.emit(TriggerEvent::Stopped {
            trigger: self.name.clone(),
        });
    }
}

/// Timer thread body. Holds the trigger only weakly between cascades, so
/// dropping every handle ends the loop.
fn run_loop(weak: Weak<LoopedShared>, stop_rx: Receiver<()>) {
    let Some(shared) = weak.upgrade() else {
        return;
    };
    let config = shared.config.read().clone();
    if config.tick_on_start {
        shared.run_cascade();
    }
    let mut next = Instant::now() + config.period();
    drop(shared);

    loop {
        let wait = next.saturating_duration_since(Instant::now());
        match stop_rx.recv_timeout(wait) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }
        let Some(shared) = weak.upgrade() else {
            return;
        };
        shared.run_cascade();

        // Skip missed periods instead of bursting to catch up.
        let period = shared.config.read().period();
        next += period;
        let now = Instant::now();
        if next < now {
            next = now + period;
        }
    }

    if let Some(shared) = weak.upgrade() {
        shared.on_loop_exit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::computation::BuiltinStep;
    use crate::engine::slot::Role;
    use crate::engine::step::Step;
    use crate::engine::steps::{ConstantStep, GainStep};
    use crate::engine::triggerable::State;

    fn constant(name: &str, value: f64) -> Arc<Step> {
        Step::builtin(name, BuiltinStep::Constant(ConstantStep::new(value))).unwrap()
    }

    fn gain(name: &str, k: f64) -> Arc<Step> {
        Step::builtin(name, BuiltinStep::Gain(GainStep::new(k))).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = LoopedTriggerConfig::default();
        assert_eq!(config.period(), Duration::from_millis(DEFAULT_PERIOD_MS));
        assert!(!config.tick_on_start);
        assert_eq!(
            LoopedTriggerConfig::with_period_ms(0).period(),
            Duration::from_millis(MIN_PERIOD_MS)
        );
    }

    #[test]
    fn test_fire_runs_cascade_in_order() {
        let trigger = LoopedTrigger::new("t", LoopedTriggerConfig::default());
        let a = constant("a", 2.0);
        let b = gain("b", 3.0);
        b.connect_input("in", &a, Role::Output, "out").unwrap();
        trigger.attach(b.clone()).unwrap();
        trigger.attach(a.clone()).unwrap();

        let report = trigger.fire();
        assert_eq!(report.ran, vec![a.id(), b.id()]);
        assert_eq!(report.sequence, 1);
        assert_eq!(
            b.read(Role::Output, "out").unwrap().value.as_scalar(),
            Some(6.0)
        );
        assert_eq!(trigger.cascade_count(), 1);
    }

    #[test]
    fn test_chained_node_waits_for_predecessor() {
        let trigger = LoopedTrigger::new("t", LoopedTriggerConfig::default());
        let a = gain("a", 1.0);
        let b = constant("b", 1.0);
        a.finished().connect(&b);
        trigger.attach(a.clone()).unwrap();

        // a is gated (no input), so b is not triggered.
        let report = trigger.fire();
        assert_eq!(report.gated.len(), 1);
        assert_eq!(report.not_triggered, vec![b.id()]);
        assert_eq!(b.tick_count(), 0);
    }

    #[test]
    fn test_attach_requires_stopped() {
        let t1 = LoopedTrigger::new("t1", LoopedTriggerConfig::with_period_ms(50));
        let t2 = LoopedTrigger::new("t2", LoopedTriggerConfig::with_period_ms(50));
        let a = constant("a", 1.0);
        t1.attach(a.clone()).unwrap();
        t1.start().unwrap();

        let err = t2.attach(a.clone()).unwrap_err();
        assert!(matches!(err, EngineError::TriggerRunning(ref name) if name == "t1"));
        assert!(matches!(t1.detach(a.id()), Err(EngineError::TriggerRunning(_))));

        t1.stop().unwrap();
        t2.attach(a.clone()).unwrap();
        assert!(!t1.is_attached(a.id()));
        assert!(t2.is_attached(a.id()));
        assert!(a.owner_trigger().unwrap().same_as(&t2));
    }

    #[test]
    fn test_detach_clears_owner() {
        let t = LoopedTrigger::new("t", LoopedTriggerConfig::default());
        let a = constant("a", 1.0);
        t.attach(a.clone()).unwrap();
        assert!(t.detach(a.id()).unwrap());
        assert!(a.owner_trigger().is_none());
        assert!(!t.detach(a.id()).unwrap());
    }

    #[test]
    fn test_start_stop_lifecycle() {
        let t = LoopedTrigger::new("t", LoopedTriggerConfig::with_period_ms(5).tick_on_start(true));
        let a = constant("a", 1.0);
        t.attach(a.clone()).unwrap();
        let events = t.event_channel(64);

        t.start().unwrap();
        assert!(t.is_running());
        thread::sleep(Duration::from_millis(40));
        t.stop().unwrap();
        assert!(!t.is_running());
        assert_eq!(a.state(), State::NotRunning);
        assert!(t.cascade_count() >= 1);

        let received: Vec<TriggerEvent> = events.try_iter().collect();
        assert!(matches!(received.first(), Some(TriggerEvent::Started { .. })));
        assert!(matches!(received.last(), Some(TriggerEvent::Stopped { .. })));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let t = LoopedTrigger::new("t", LoopedTriggerConfig::default());
        t.stop().unwrap();
        t.start().unwrap();
        t.start().unwrap();
        t.stop().unwrap();
        t.stop().unwrap();
        assert!(!t.is_running());
    }

    #[test]
    fn test_failure_event_published() {
        let t = LoopedTrigger::new("t", LoopedTriggerConfig::default());
        let bad = Step::from_fn("bad", |_| Ok(()), |_| anyhow::bail!("nope")).unwrap();
        t.attach(bad.clone()).unwrap();
        let failures = Arc::new(AtomicU64::new(0));
        let counter = failures.clone();
        t.subscribe(move |event| {
            if let TriggerEvent::StepFailed { .. } = event {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        });
        let first = t.fire();
        assert_eq!(first.failed.len(), 1);
        let second = t.fire();
        assert_eq!(second.skipped, vec![bad.id()]);
        assert_eq!(failures.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dropping_trigger_ends_thread() {
        let t = LoopedTrigger::new("t", LoopedTriggerConfig::with_period_ms(1));
        let a = constant("a", 1.0);
        t.attach(a.clone()).unwrap();
        t.start().unwrap();
        let weak = t.downgrade();
        drop(t);
        thread::sleep(Duration::from_millis(20));
        assert!(weak.upgrade().is_none());
        assert!(a.owner_trigger().is_none());
    }
}
