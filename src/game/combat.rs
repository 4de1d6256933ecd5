//! Combat system - bullets, damage, rewards

use super::body::BodySpec;
use super::physics::ColliderHandle;
use super::{EntityId, PlayerIndex};

/// Bullet lifetime in `Advance` ticks
pub const BULLET_LIFETIME_TICKS: u32 = 10;

/// Weapon stats derived from a body spec
#[derive(Debug, Clone, Copy)]
pub struct WeaponStats {
    /// Damage per hit
    pub damage: f32,
    /// Bullet speed
    pub bullet_speed: f32,
    /// Cooldown between shots (seconds)
    pub cooldown: f32,
    /// Bullet hitbox radius
    pub bullet_radius: f32,
}

impl WeaponStats {
    pub fn for_body(spec: &BodySpec) -> Self {
        Self {
            damage: 1.0,
            bullet_speed: spec.bullet_speed,
            cooldown: 0.5,
            bullet_radius: 0.1,
        }
    }
}

/// Reward shaping applied by the arena.
///
/// Rewards are accumulated per player between two `Advance` calls and
/// handed back with the snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RewardConfig {
    pub hill_tick_reward: f32,
    pub enemy_hill_tick_punishment: f32,
    pub hit_enemy_reward: f32,
    pub hit_self_punishment: f32,
    pub victory_reward: f32,
    pub loss_punishment: f32,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            hill_tick_reward: 1.0,
            enemy_hill_tick_punishment: -1.0,
            hit_enemy_reward: 10.0,
            hit_self_punishment: -10.0,
            victory_reward: 100.0,
            loss_punishment: -100.0,
        }
    }
}

/// Live bullet in the arena
#[derive(Debug, Clone)]
pub struct Bullet {
    pub id: EntityId,
    pub owner: PlayerIndex,
    pub collider: ColliderHandle,
    pub damage: f32,
    pub ticks_remaining: u32,
}

impl Bullet {
    pub fn new(id: EntityId, owner: PlayerIndex, collider: ColliderHandle, stats: &WeaponStats) -> Self {
        Self {
            id,
            owner,
            collider,
            damage: stats.damage,
            ticks_remaining: BULLET_LIFETIME_TICKS,
        }
    }

    /// Count down one tick, returns false once expired
    pub fn age(&mut self) -> bool {
        self.ticks_remaining = self.ticks_remaining.saturating_sub(1);
        self.ticks_remaining > 0
    }
}

/// Combat system for managing weapons and damage
pub struct CombatSystem;

impl CombatSystem {
    /// Check if a player can fire (cooldown check)
    pub fn can_fire(weapon_cooldown: f32) -> bool {
        weapon_cooldown <= 0.0
    }

    /// Update weapon cooldown
    pub fn update_cooldown(cooldown: f32, dt: f32) -> f32 {
        (cooldown - dt).max(0.0)
    }

    /// Apply damage to health, returns (new_health, is_dead)
    pub fn apply_damage(current_health: f32, damage: f32) -> (f32, bool) {
        let new_health = (current_health - damage).max(0.0);
        (new_health, new_health <= 0.0)
    }
}

/// Hit result from combat resolution
#[derive(Debug, Clone, PartialEq)]
pub struct HitResult {
    pub bullet_id: EntityId,
    pub shooter: PlayerIndex,
    pub target: PlayerIndex,
    pub damage: f32,
    pub target_killed: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::physics::{Collider, ColliderKind, Participant, PhysicsWorld, Shape};

    #[test]
    fn damage_clamps_at_zero() {
        assert_eq!(CombatSystem::apply_damage(3.0, 1.0), (2.0, false));
        assert_eq!(CombatSystem::apply_damage(1.0, 1.0), (0.0, true));
        assert_eq!(CombatSystem::apply_damage(0.5, 2.0), (0.0, true));
    }

    #[test]
    fn cooldown_counts_down_to_zero() {
        let cooldown = CombatSystem::update_cooldown(0.05, 0.1);
        assert_eq!(cooldown, 0.0);
        assert!(CombatSystem::can_fire(cooldown));
        assert!(!CombatSystem::can_fire(0.2));
    }

    #[test]
    fn bullet_expires_after_lifetime() {
        let stats = WeaponStats::for_body(&BodySpec::test_body());
        let mut world = PhysicsWorld::new();
        let handle = world.insert(Collider::new(
            Participant::Bullet(1),
            Shape::Circle { radius: 0.1 },
            ColliderKind::Kinematic,
            0.0,
            0.0,
        ));
        let mut bullet = Bullet::new(1, 0, handle, &stats);

        let alive_ticks = (0..20).take_while(|_| bullet.age()).count();
        assert_eq!(alive_ticks as u32, BULLET_LIFETIME_TICKS - 1);
    }
}
