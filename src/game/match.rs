//! Authoritative tick driver

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::ServerConfig;
use crate::util::time::{TickSchedule, DEFAULT_SUB_STEPS, DEFAULT_TICK_LENGTH};

use super::action_buffer::{ActionBuffer, ActionError};
use super::arena::{ArenaSettings, KothArena};
use super::body::BodySpec;
use super::combat::RewardConfig;
use super::snapshot::{TimedEvent, Transform};
use super::worker::{SimWorker, WorkerError};
use super::{ActionVector, EntityId, PlayerIndex, Tick};

/// Match configuration
#[derive(Debug, Clone)]
pub struct GameSettings {
    /// Seconds per authoritative tick
    pub tick_length: f64,
    /// `AdvanceOnly` sub-steps issued before each tick's `Advance`
    pub sub_steps: u32,
    pub required_players: usize,
    pub arena: ArenaSettings,
}

impl GameSettings {
    pub fn from_config(config: &ServerConfig) -> Self {
        Self {
            tick_length: config.tick_length,
            sub_steps: config.sub_steps,
            required_players: config.required_players,
            arena: ArenaSettings {
                max_ticks: config.max_ticks,
                seed: config.seed,
                rewards: RewardConfig::default(),
            },
        }
    }
}

impl Default for GameSettings {
    fn default() -> Self {
        Self {
            tick_length: DEFAULT_TICK_LENGTH,
            sub_steps: DEFAULT_SUB_STEPS,
            required_players: 2,
            arena: ArenaSettings::default(),
        }
    }
}

/// Everything broadcast for one tick
#[derive(Debug, Clone, PartialEq)]
pub struct TickResult {
    pub tick_index: Tick,
    pub agent_transforms: Vec<Transform>,
    pub entity_transforms: BTreeMap<EntityId, Transform>,
    pub events: Vec<TimedEvent>,
    pub hps: Vec<f32>,
    pub scores: Vec<f32>,
    pub done: bool,
    pub victor: Option<PlayerIndex>,
}

/// The authoritative game.
///
/// Collects body specs until enough participants joined, then owns the
/// worker and the action buffer and advances one tick per `tick()` call.
pub struct Game {
    settings: GameSettings,
    schedule: TickSchedule,
    body_specs: Vec<BodySpec>,
    worker: Option<SimWorker>,
    actions: Option<Arc<ActionBuffer>>,
    current_tick: Tick,
    last_tick_time: f64,
}

impl Game {
    pub fn new(settings: GameSettings) -> Self {
        Self {
            schedule: TickSchedule::new(settings.tick_length),
            settings,
            body_specs: Vec::new(),
            worker: None,
            actions: None,
            current_tick: 0,
            last_tick_time: 0.0,
        }
    }

    /// Add a participant. Returns true on the call that completes the roster.
    pub fn register_body(&mut self, spec: BodySpec) -> Result<bool, GameError> {
        if self.is_set_up() {
            return Err(GameError::AlreadySetUp);
        }

        self.body_specs.push(spec);
        if self.body_specs.len() < self.settings.required_players {
            return Ok(false);
        }

        self.setup()?;
        Ok(true)
    }

    fn setup(&mut self) -> Result<(), GameError> {
        let actions_per_player = self.body_specs.iter().map(|s| s.num_actions).collect();
        let actions = ActionBuffer::new(actions_per_player)?;
        let arena = KothArena::new(self.body_specs.clone(), self.settings.arena.clone());

        self.worker = Some(SimWorker::with_simulation(arena)?);
        self.actions = Some(Arc::new(actions));

        info!(
            players = self.body_specs.len(),
            tick_length = self.settings.tick_length,
            sub_steps = self.settings.sub_steps,
            "Game set up"
        );
        Ok(())
    }

    pub fn is_set_up(&self) -> bool {
        self.worker.is_some()
    }

    /// True when set up and a full tick length has passed since the last tick
    pub fn ready_to_tick(&self, now: f64) -> bool {
        self.is_set_up() && now - self.last_tick_time >= self.schedule.tick_length()
    }

    /// Whole ticks owed at `now`; more than one means the loop is lagging
    pub fn ticks_behind(&self, now: f64) -> u64 {
        self.schedule.split(now - self.last_tick_time).0
    }

    /// Start pacing ticks from `now`
    pub fn anchor_clock(&mut self, now: f64) {
        self.last_tick_time = now;
    }

    pub fn set_action(
        &self,
        tick: Tick,
        player: PlayerIndex,
        action: ActionVector,
    ) -> Result<(), GameError> {
        let actions = self.actions.as_ref().ok_or(GameError::NotSetUp)?;
        actions.set_action(tick, player, action)?;
        Ok(())
    }

    /// Shared handle for writers on other threads
    pub fn action_buffer(&self) -> Option<Arc<ActionBuffer>> {
        self.actions.clone()
    }

    /// Advance exactly one tick
    pub fn tick(&mut self) -> Result<TickResult, GameError> {
        let (Some(worker), Some(actions)) = (self.worker.as_ref(), self.actions.as_ref()) else {
            return Err(GameError::NotSetUp);
        };

        let step_length = self.schedule.sub_step_length(self.settings.sub_steps) as f32;
        let tick_actions = actions.get_actions(self.current_tick);

        for _ in 0..self.settings.sub_steps {
            worker.advance_only(step_length)?;
        }
        let step = worker.advance(step_length, tick_actions)?.wait()?;

        self.current_tick += 1;
        self.last_tick_time += self.schedule.tick_length();
        actions.evict_before(self.current_tick);

        let snapshot = step.snapshot.with_tick(self.current_tick);
        debug!(
            tick = self.current_tick,
            entities = snapshot.entity_transforms().len(),
            events = step.events.len(),
            "Ticked"
        );

        Ok(TickResult {
            tick_index: self.current_tick,
            agent_transforms: snapshot.agent_transforms().to_vec(),
            entity_transforms: snapshot.entity_transforms().clone(),
            events: step.events,
            hps: step.hps,
            scores: step.scores,
            done: step.done,
            victor: step.victor,
        })
    }

    /// Reset the arena without advancing the tick counter
    pub fn reset(&mut self) -> Result<TickResult, GameError> {
        let worker = self.worker.as_ref().ok_or(GameError::NotSetUp)?;
        let step = worker.reset()?.wait()?;
        let snapshot = step.snapshot.with_tick(self.current_tick);

        Ok(TickResult {
            tick_index: self.current_tick,
            agent_transforms: snapshot.agent_transforms().to_vec(),
            entity_transforms: snapshot.entity_transforms().clone(),
            events: step.events,
            hps: step.hps,
            scores: step.scores,
            done: false,
            victor: None,
        })
    }

    pub fn current_tick(&self) -> Tick {
        self.current_tick
    }

    pub fn last_tick_time(&self) -> f64 {
        self.last_tick_time
    }

    pub fn tick_length(&self) -> f64 {
        self.schedule.tick_length()
    }

    pub fn required_players(&self) -> usize {
        self.settings.required_players
    }

    pub fn body_specs(&self) -> &[BodySpec] {
        &self.body_specs
    }

    /// Stop the worker, draining anything still queued
    pub fn shutdown(&mut self) {
        if let Some(mut worker) = self.worker.take() {
            worker.shutdown();
            info!(ticks = self.current_tick, "Game shut down");
        }
    }
}

/// Game sequencing and execution errors
#[derive(Debug, thiserror::Error)]
pub enum GameError {
    #[error("Game is not set up yet")]
    NotSetUp,

    #[error("Game is already set up")]
    AlreadySetUp,

    #[error(transparent)]
    Action(#[from] ActionError),

    #[error(transparent)]
    Worker(#[from] WorkerError),
}
