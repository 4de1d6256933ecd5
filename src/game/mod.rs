//! Game simulation modules

pub mod action_buffer;
pub mod arena;
pub mod body;
pub mod combat;
pub mod hill;
pub mod r#match;
pub mod physics;
pub mod snapshot;
pub mod worker;

pub use action_buffer::{ActionBuffer, ActionError};
pub use arena::{ArenaSettings, KothArena, Simulation, StepResult};
pub use body::{BodySpec, BodySpecError};
pub use r#match::{Game, GameError, GameSettings, TickResult};
pub use snapshot::{EffectKind, StateSnapshot, TimedEvent, Transform};
pub use worker::{SimWorker, StepHandle, WorkerCommand, WorkerError, WorkerState};

/// Index of one fixed-length advance of the authoritative simulation
pub type Tick = u64;

/// Position of a participant in connect order
pub type PlayerIndex = usize;

/// Id of a short-lived simulation object such as a bullet
pub type EntityId = u32;

/// Input flags for one player at one tick
pub type ActionVector = Vec<i32>;
