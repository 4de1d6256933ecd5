//! Client-side playback of server snapshots.
//!
//! Snapshots arrive at the server tick rate, possibly out of order or
//! duplicated. The engine keeps the two newest distinct ticks and renders
//! continuous motion between them at whatever rate `update` is called.
//! Timed events are replayed at their exact simulation time.

use std::collections::BTreeMap;

use crate::game::snapshot::{StateSnapshot, TimedEvent, Transform};
use crate::game::Tick;
use crate::util::time::TickSchedule;

use super::world::{PoseSet, WorldView};

/// Tolerance, in tick units, for "exactly on a tick"
const TICK_EPSILON: f64 = 1e-6;

/// Snapshots retained for interpolation, keyed by tick
#[derive(Debug, Default)]
pub struct SnapshotBuffer {
    snapshots: BTreeMap<Tick, StateSnapshot>,
    /// Ticks below this were pruned and are refused
    floor: Tick,
}

impl SnapshotBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a snapshot. Duplicates and ticks older than the retained pair are refused.
    pub fn insert(&mut self, snapshot: StateSnapshot) -> bool {
        let tick = snapshot.tick();
        if tick < self.floor || self.snapshots.contains_key(&tick) {
            return false;
        }
        self.snapshots.insert(tick, snapshot);
        true
    }

    /// Drop everything but the two newest distinct ticks, returning `(prev, next)`
    pub fn prune(&mut self) -> Option<(Tick, Tick)> {
        let mut newest = self.snapshots.keys().rev();
        let next = *newest.next()?;
        let prev = *newest.next()?;
        self.snapshots = self.snapshots.split_off(&prev);
        self.floor = prev;
        Some((prev, next))
    }

    pub fn get(&self, tick: Tick) -> Option<&StateSnapshot> {
        self.snapshots.get(&tick)
    }

    pub fn latest_tick(&self) -> Option<Tick> {
        self.snapshots.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }
}

/// Turns discrete snapshots into per-frame poses
#[derive(Debug)]
pub struct PlaybackEngine {
    schedule: TickSchedule,
    snapshots: SnapshotBuffer,
    /// Not yet triggered, sorted by time
    pending: Vec<TimedEvent>,
    current_playback_tick: f64,
    poses: PoseSet,
}

impl PlaybackEngine {
    pub fn new(tick_length: f64, num_agents: usize) -> Self {
        Self {
            schedule: TickSchedule::new(tick_length),
            snapshots: SnapshotBuffer::new(),
            pending: Vec::new(),
            current_playback_tick: 0.0,
            poses: PoseSet {
                agents: vec![Transform::default(); num_agents],
                entities: BTreeMap::new(),
            },
        }
    }

    /// Queue one tick's snapshot and its events. Returns false if the tick was stale or seen.
    pub fn add_state(&mut self, snapshot: StateSnapshot, events: Vec<TimedEvent>) -> bool {
        if !self.snapshots.insert(snapshot) {
            return false;
        }
        self.pending.extend(events);
        self.pending.sort_by(|a, b| a.time().total_cmp(&b.time()));
        true
    }

    /// Advance playback by `delta_time` seconds and push the result into `world`.
    ///
    /// Holds the last pose (and does not advance) until two distinct ticks are known.
    pub fn update<W: WorldView + ?Sized>(&mut self, delta_time: f64, world: &mut W) -> bool {
        let Some((prev_tick, next_tick)) = self.snapshots.prune() else {
            return false;
        };

        self.current_playback_tick += self.schedule.to_ticks(delta_time);
        // Fell behind: skip to the oldest retained tick
        if self.current_playback_tick < prev_tick as f64 {
            self.current_playback_tick = prev_tick as f64;
        }

        if let Some(poses) = self.compute_poses(prev_tick, next_tick) {
            world.apply_poses(&poses);
            self.poses = poses;
        }

        self.trigger_due(world);
        true
    }

    fn compute_poses(&self, prev_tick: Tick, next_tick: Tick) -> Option<PoseSet> {
        let prev = self.snapshots.get(prev_tick)?;
        let next = self.snapshots.get(next_tick)?;
        let current = self.current_playback_tick;

        if (current - prev_tick as f64).abs() < TICK_EPSILON {
            return Some(exact(prev));
        }
        // Never extrapolate past the newest tick
        if current >= next_tick as f64 - TICK_EPSILON {
            return Some(exact(next));
        }

        let span = (next_tick - prev_tick) as f64;
        let interpolation = ((current - prev_tick as f64) / span) as f32;

        let agents = prev
            .agent_transforms()
            .iter()
            .zip(next.agent_transforms())
            .map(|(from, to)| from.lerp(to, interpolation))
            .collect();

        let mut entities = BTreeMap::new();
        for (id, from) in prev.entity_transforms() {
            if let Some(to) = next.entity_transforms().get(id) {
                entities.insert(*id, from.lerp(to, interpolation));
                continue;
            }

            // Destroyed mid-interval: travel toward where it died
            let Some(event) = self.pending.iter().find(|e| e.destroyed_entity() == Some(*id))
            else {
                continue;
            };
            let event_tick = self.schedule.to_ticks(event.time());
            if current >= event_tick {
                continue;
            }
            let event_span = event_tick - prev_tick as f64;
            let fraction = if event_span > 0.0 {
                ((current - prev_tick as f64) / event_span) as f32
            } else {
                1.0
            };
            entities.insert(*id, from.lerp(&event.transform(), fraction));
        }

        Some(PoseSet { agents, entities })
    }

    fn trigger_due<W: WorldView + ?Sized>(&mut self, world: &mut W) {
        let current = self.current_playback_tick + TICK_EPSILON;
        let due = self
            .pending
            .partition_point(|event| self.schedule.to_ticks(event.time()) <= current);
        for event in self.pending.drain(..due) {
            world.trigger(&event);
        }
    }

    pub fn current_playback_tick(&self) -> f64 {
        self.current_playback_tick
    }

    /// Playback position in simulation seconds
    pub fn playback_time(&self) -> f64 {
        self.schedule.to_secs(self.current_playback_tick)
    }

    /// Most recently applied poses
    pub fn poses(&self) -> &PoseSet {
        &self.poses
    }

    pub fn latest_tick(&self) -> Option<Tick> {
        self.snapshots.latest_tick()
    }

    pub fn pending_events(&self) -> usize {
        self.pending.len()
    }

    pub fn retained_snapshots(&self) -> usize {
        self.snapshots.len()
    }
}

fn exact(snapshot: &StateSnapshot) -> PoseSet {
    PoseSet {
        agents: snapshot.agent_transforms().to_vec(),
        entities: snapshot.entity_transforms().clone(),
    }
}
