//! Snapshot data model: transforms, tick snapshots and timed events

use std::collections::BTreeMap;
use std::f32::consts::{PI, TAU};

use serde::{Deserialize, Serialize};

use super::{EntityId, Tick};

/// Wrap an angle into `(-π, π]`
pub fn wrap_angle(angle: f32) -> f32 {
    let wrapped = angle.rem_euclid(TAU);
    if wrapped > PI {
        wrapped - TAU
    } else {
        wrapped
    }
}

/// Interpolate between two angles along the shorter arc.
///
/// The result is wrapped into `(-π, π]`.
pub fn lerp_angle(from: f32, to: f32, t: f32) -> f32 {
    let from = wrap_angle(from);
    let mut diff = wrap_angle(to) - from;
    if diff > PI {
        diff -= TAU;
    } else if diff < -PI {
        diff += TAU;
    }
    wrap_angle(from + diff * t)
}

/// 2D pose: position plus rotation in radians
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    pub x: f32,
    pub y: f32,
    /// Rotation in radians, `(-π, π]`
    pub rotation: f32,
}

impl Transform {
    pub fn new(x: f32, y: f32, rotation: f32) -> Self {
        Self {
            x,
            y,
            rotation: wrap_angle(rotation),
        }
    }

    /// Linear position interpolation, shortest-arc rotation interpolation
    pub fn lerp(&self, other: &Transform, t: f32) -> Transform {
        Transform {
            x: self.x + (other.x - self.x) * t,
            y: self.y + (other.y - self.y) * t,
            rotation: lerp_angle(self.rotation, other.rotation, t),
        }
    }
}

/// Immutable, tick-tagged record of every tracked transform
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    tick: Tick,
    agent_transforms: Vec<Transform>,
    entity_transforms: BTreeMap<EntityId, Transform>,
}

impl StateSnapshot {
    pub fn new(
        tick: Tick,
        agent_transforms: Vec<Transform>,
        entity_transforms: BTreeMap<EntityId, Transform>,
    ) -> Self {
        Self {
            tick,
            agent_transforms,
            entity_transforms,
        }
    }

    pub fn tick(&self) -> Tick {
        self.tick
    }

    pub fn agent_transforms(&self) -> &[Transform] {
        &self.agent_transforms
    }

    pub fn entity_transforms(&self) -> &BTreeMap<EntityId, Transform> {
        &self.entity_transforms
    }

    /// Same transforms, re-tagged with a different tick
    pub fn with_tick(self, tick: Tick) -> Self {
        Self { tick, ..self }
    }
}

/// Client-side effects a simulation can ask playback to spawn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectKind {
    /// Exhaust puff behind a thrusting body
    ThrusterParticles,
    /// Flash at a gun muzzle when a bullet is fired
    MuzzleFlash,
}

/// Sub-tick occurrence replayed client-side at its exact simulation time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TimedEvent {
    EntityDestroyed {
        id: EntityId,
        /// Simulation time in seconds
        time: f64,
        transform: Transform,
    },
    EffectTriggered {
        kind: EffectKind,
        /// Simulation time in seconds
        time: f64,
        transform: Transform,
    },
}

impl TimedEvent {
    pub fn time(&self) -> f64 {
        match self {
            Self::EntityDestroyed { time, .. } | Self::EffectTriggered { time, .. } => *time,
        }
    }

    pub fn transform(&self) -> Transform {
        match self {
            Self::EntityDestroyed { transform, .. } | Self::EffectTriggered { transform, .. } => {
                *transform
            }
        }
    }

    /// Entity id for destruction events
    pub fn destroyed_entity(&self) -> Option<EntityId> {
        match self {
            Self::EntityDestroyed { id, .. } => Some(*id),
            Self::EffectTriggered { .. } => None,
        }
    }
}
