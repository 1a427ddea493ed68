//! Step graph execution engine.
//!
//! Steps declare typed data slots, groups wire them together, and looped
//! triggers tick them at fixed periods. Each period a trigger compiles a
//! cascade plan from its attached steps, the steps chained on their
//! `finished` triggers, and the data connections between them, then runs it
//! depth by depth on its own thread.
//!
//! # Architecture
//!
//! ```text
//! LoopedTrigger "control" (10 ms)
//!   ├──► [sensor] ──finished──► [filter] ──finished──► [controller]
//!   │        out ─────────────► in    out ──────────► in
//!   └──► [logger]
//! ```
//!
//! # Design
//!
//! - **Enum dispatch for built-ins**: `BuiltinStep` for the shipped steps,
//!   `StepPlugin` trait objects for everything else.
//! - **Shared handles**: producers own a `DataHandle`, inputs hold a weak
//!   reference to it. Publishing is atomic and versioned.
//! - **Staged outputs**: a step publishes only after its computation returns.
//! - **Explicit plans**: cascades are compiled iteratively (BFS, DFS, Kahn),
//!   never by recursion.
//! - **One thread per looped trigger**, stopped over a crossbeam channel.

pub mod callbacks;
pub mod cascade;
pub mod computation;
pub mod connectable;
pub mod connection;
pub mod description;
pub mod group;
pub mod handle;
pub mod id;
pub mod looped;
pub mod registry;
pub mod slot;
pub mod snapshot;
pub mod step;
pub mod steps;
pub mod trigger;
pub mod triggerable;
pub mod validity;
pub mod value;

pub use cascade::{CascadeCompiler, CascadePlan, ChainCycle, PlanStats, TriggeringOrder};
pub use computation::{AnyStep, BuiltinStep, StepPlugin, TickContext};
pub use connectable::Connectable;
pub use connection::{Connection, Endpoint};
pub use description::{
    ChainDescription, ConnectionDescription, ElementDescription, ExposureDescription,
    GraphDescription, SlotDescription, TriggerDescription,
};
pub use group::{Element, Exposure, Group};
pub use handle::{DataHandle, HandleSnapshot, WeakHandle};
pub use id::{CallbackId, NodeId, TriggerId};
pub use looped::{
    CascadeReport, LoopedTrigger, LoopedTriggerConfig, TriggerEvent, WeakLoopedTrigger,
    DEFAULT_PERIOD_MS, MIN_PERIOD_MS,
};
pub use registry::{StepFactory, StepRegistry};
pub use slot::{DataSlot, InputBinding, Role, SlotAddress};
pub use snapshot::{
    BoundarySnapshot, ConnectionSnapshot, ElementSnapshot, SlotSnapshot, TopologySnapshot,
    TriggerSnapshot,
};
pub use step::Step;
pub use trigger::Trigger;
pub use triggerable::{OwnerLink, State, Status, StatusChange, TickOutcome, Triggerable};
pub use validity::{Validity, ValidityCheck, ValidityRegistry};
pub use value::{Annotation, ConfigValue, DataKind, DataValue};
