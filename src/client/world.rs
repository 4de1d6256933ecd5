//! Render-side world the playback engine writes into

use std::collections::{BTreeMap, BTreeSet};

use crate::game::snapshot::{EffectKind, TimedEvent, Transform};
use crate::game::EntityId;

/// Poses computed for one rendered frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoseSet {
    pub agents: Vec<Transform>,
    pub entities: BTreeMap<EntityId, Transform>,
}

/// Anything that can display playback output
pub trait WorldView {
    /// Replace every agent and entity pose
    fn apply_poses(&mut self, poses: &PoseSet);

    /// Dispatch an event whose playback time has come
    fn trigger(&mut self, event: &TimedEvent);
}

/// Effects kept before the oldest are dropped
pub const MAX_EFFECTS: usize = 256;

/// Headless world: keeps what a renderer would draw
#[derive(Debug, Clone, Default)]
pub struct RenderState {
    pub agents: Vec<Transform>,
    pub entities: BTreeMap<EntityId, Transform>,
    /// Destroyed ids that incoming poses still carry
    pub destroyed: BTreeSet<EntityId>,
    /// Triggered effects not yet taken, oldest first
    pub effects: Vec<(EffectKind, Transform)>,
}

impl RenderState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Hand over every effect triggered since the last call
    pub fn take_effects(&mut self) -> Vec<(EffectKind, Transform)> {
        std::mem::take(&mut self.effects)
    }
}

impl WorldView for RenderState {
    fn apply_poses(&mut self, poses: &PoseSet) {
        self.agents.clone_from(&poses.agents);
        // Once the poses stop carrying an id it can no longer be revived
        self.destroyed.retain(|id| poses.entities.contains_key(id));
        self.entities = poses
            .entities
            .iter()
            .filter(|(id, _)| !self.destroyed.contains(id))
            .map(|(id, transform)| (*id, *transform))
            .collect();
    }

    fn trigger(&mut self, event: &TimedEvent) {
        match event {
            TimedEvent::EntityDestroyed { id, .. } => {
                self.entities.remove(id);
                self.destroyed.insert(*id);
            }
            TimedEvent::EffectTriggered {
                kind, transform, ..
            } => {
                if self.effects.len() >= MAX_EFFECTS {
                    let excess = self.effects.len() + 1 - MAX_EFFECTS;
                    self.effects.drain(..excess);
                }
                self.effects.push((*kind, *transform));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn destroyed_entities_stay_gone() {
        let mut world = RenderState::new();
        let mut poses = PoseSet::default();
        poses.entities.insert(1, Transform::new(1.0, 0.0, 0.0));
        poses.entities.insert(2, Transform::new(2.0, 0.0, 0.0));
        world.apply_poses(&poses);
        assert_eq!(world.entities.len(), 2);

        world.trigger(&TimedEvent::EntityDestroyed {
            id: 1,
            time: 0.1,
            transform: Transform::default(),
        });
        assert_eq!(world.entities.keys().copied().collect::<Vec<_>>(), vec![2]);

        // A stale pose set cannot resurrect it
        world.apply_poses(&poses);
        assert!(!world.entities.contains_key(&1));
        assert!(world.destroyed.contains(&1));

        // Forgotten once the poses drop it
        poses.entities.remove(&1);
        world.apply_poses(&poses);
        assert!(world.destroyed.is_empty());
    }

    #[test]
    fn effects_are_recorded() {
        let mut world = RenderState::new();
        world.trigger(&TimedEvent::EffectTriggered {
            kind: EffectKind::MuzzleFlash,
            time: 0.3,
            transform: Transform::new(0.0, 1.0, 0.0),
        });
        assert_eq!(world.effects, vec![(EffectKind::MuzzleFlash, Transform::new(0.0, 1.0, 0.0))]);

        let taken = world.take_effects();
        assert_eq!(taken.len(), 1);
        assert!(world.effects.is_empty());
    }

    #[test]
    fn effects_are_capped_oldest_first() {
        let mut world = RenderState::new();
        for i in 0..MAX_EFFECTS + 10 {
            world.trigger(&TimedEvent::EffectTriggered {
                kind: EffectKind::MuzzleFlash,
                time: i as f64,
                transform: Transform::new(i as f32, 0.0, 0.0),
            });
        }
        assert_eq!(world.effects.len(), MAX_EFFECTS);
        assert_eq!(world.effects[0].1.x, 10.0);
        assert_eq!(world.effects[MAX_EFFECTS - 1].1.x, (MAX_EFFECTS + 9) as f32);
    }
}
