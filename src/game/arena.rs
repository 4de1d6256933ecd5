//! The simulation a worker owns: a two-player king-of-the-hill arena

use std::collections::BTreeMap;
use std::f32::consts::PI;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use super::body::{BodySpec, ACTION_FIRE, ACTION_THRUST, ACTION_TURN_LEFT, ACTION_TURN_RIGHT};
use super::combat::{Bullet, CombatSystem, HitResult, RewardConfig, WeaponStats};
use super::hill::{Hill, HILL_RADIUS};
use super::physics::{
    Collider, ColliderHandle, ColliderKind, Contact, ContactPhase, Participant, PhysicsWorld, Shape,
};
use super::snapshot::{EffectKind, StateSnapshot, TimedEvent, Transform};
use super::{ActionVector, EntityId, PlayerIndex};

/// Score bonus for every body still standing when another one is destroyed
const SURVIVOR_SCORE: f32 = 100.0;

/// Fraction of linear velocity bodies lose per second
const BODY_LINEAR_DAMPING: f32 = 1.5;

/// Max random deviation of a bullet from the muzzle direction (radians)
const BULLET_SPREAD: f32 = 0.02;

/// Wall boxes as `(left, bottom, width, height)`
const WALLS: [(f32, f32, f32, f32); 6] = [
    (-10.0, -20.0, 20.0, 0.1),
    (-10.0, -20.0, 0.1, 40.0),
    (-10.0, 19.9, 20.0, 0.1),
    (9.9, -20.0, 0.1, 40.0),
    (-2.5, -9.9, 5.0, 0.2),
    (-2.5, 10.1, 5.0, 0.2),
];

/// Something the worker can own and step.
///
/// `advance` applies actions, steps, scores and checks for the end of the
/// episode. When the episode ends the implementation resets itself before
/// returning, but the returned snapshot holds the pre-reset transforms.
pub trait Simulation: Send + 'static {
    fn num_players(&self) -> usize;

    fn advance(&mut self, step_length: f32, actions: &[ActionVector]) -> StepResult;

    /// Step physics without consuming input or producing a snapshot
    fn advance_only(&mut self, step_length: f32);

    /// Force the terminal reset and report the fresh state
    fn reset(&mut self) -> StepResult;
}

/// Outcome of one `Advance` (or `Reset`)
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub snapshot: StateSnapshot,
    /// Events since the previous `Advance`, sub-steps included
    pub events: Vec<TimedEvent>,
    /// Per-player reward accumulated since the previous `Advance`
    pub rewards: Vec<f32>,
    pub hps: Vec<f32>,
    pub scores: Vec<f32>,
    pub done: bool,
    pub victor: Option<PlayerIndex>,
}

/// Arena construction parameters
#[derive(Debug, Clone)]
pub struct ArenaSettings {
    /// Episode length in `Advance` calls
    pub max_ticks: u64,
    pub seed: u64,
    pub rewards: RewardConfig,
}

impl Default for ArenaSettings {
    fn default() -> Self {
        Self {
            max_ticks: 600,
            seed: 0,
            rewards: RewardConfig::default(),
        }
    }
}

#[derive(Debug)]
struct Agent {
    spec: BodySpec,
    weapon: WeaponStats,
    collider: ColliderHandle,
    hp: f32,
    weapon_cooldown: f32,
    action: ActionVector,
}

impl Agent {
    fn flag(&self, index: usize) -> bool {
        self.action.get(index).copied().unwrap_or(0) != 0
    }
}

/// Walled 20 x 40 field with two inner walls and a hill at the origin
pub struct KothArena {
    world: PhysicsWorld,
    agents: Vec<Agent>,
    bullets: BTreeMap<EntityId, Bullet>,
    next_entity_id: EntityId,
    hill: Hill,
    rng: ChaCha8Rng,
    settings: ArenaSettings,

    rewards: Vec<f32>,
    scores: Vec<f32>,
    events: Vec<TimedEvent>,

    /// Simulation seconds since construction; never rewinds on reset
    elapsed: f64,
    episode_ticks: u64,
    total_ticks: u64,
}

impl KothArena {
    pub fn new(specs: Vec<BodySpec>, settings: ArenaSettings) -> Self {
        let mut world = PhysicsWorld::new();

        for (index, (left, bottom, width, height)) in WALLS.iter().enumerate() {
            world.insert(Collider::new(
                Participant::Wall(index),
                Shape::Rect {
                    half_width: width / 2.0,
                    half_height: height / 2.0,
                },
                ColliderKind::Static,
                left + width / 2.0,
                bottom + height / 2.0,
            ));
        }

        world.insert(Collider::new(
            Participant::Hill,
            Shape::Circle {
                radius: HILL_RADIUS,
            },
            ColliderKind::Sensor,
            0.0,
            0.0,
        ));

        let agents = specs
            .into_iter()
            .enumerate()
            .map(|(player, spec)| {
                let spawn = spawn_transform(player);
                let mut collider = Collider::new(
                    Participant::Body(player),
                    Shape::Circle {
                        radius: spec.radius,
                    },
                    ColliderKind::Dynamic,
                    spawn.x,
                    spawn.y,
                );
                collider.rotation = spawn.rotation;
                collider.linear_damping = BODY_LINEAR_DAMPING;
                Agent {
                    weapon: WeaponStats::for_body(&spec),
                    collider: world.insert(collider),
                    hp: spec.max_hp,
                    weapon_cooldown: 0.0,
                    action: vec![0; spec.num_actions],
                    spec,
                }
            })
            .collect::<Vec<_>>();

        let players = agents.len();
        Self {
            world,
            agents,
            bullets: BTreeMap::new(),
            next_entity_id: 0,
            hill: Hill::new(),
            rng: ChaCha8Rng::seed_from_u64(settings.seed),
            settings,
            rewards: vec![0.0; players],
            scores: vec![0.0; players],
            events: Vec::new(),
            elapsed: 0.0,
            episode_ticks: 0,
            total_ticks: 0,
        }
    }

    pub fn elapsed_time(&self) -> f64 {
        self.elapsed
    }

    pub fn hps(&self) -> Vec<f32> {
        self.agents.iter().map(|a| a.hp).collect()
    }

    pub fn scores(&self) -> &[f32] {
        &self.scores
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let agent_transforms = self
            .agents
            .iter()
            .map(|a| self.transform_of(a.collider))
            .collect();
        let entity_transforms = self
            .bullets
            .values()
            .map(|b| (b.id, self.transform_of(b.collider)))
            .collect();
        StateSnapshot::new(self.total_ticks, agent_transforms, entity_transforms)
    }

    fn transform_of(&self, handle: ColliderHandle) -> Transform {
        self.world
            .get(handle)
            .map(Collider::transform)
            .unwrap_or_default()
    }

    /// Apply held actions to the bodies for one physics step
    fn drive_bodies(&mut self, dt: f32) {
        for agent in &mut self.agents {
            agent.weapon_cooldown = CombatSystem::update_cooldown(agent.weapon_cooldown, dt);
            let thrusting = agent.flag(ACTION_THRUST);
            let turn = agent.flag(ACTION_TURN_LEFT) as i32 - agent.flag(ACTION_TURN_RIGHT) as i32;
            let Some(body) = self.world.get_mut(agent.collider) else {
                continue;
            };
            body.angular_velocity = turn as f32 * agent.spec.turn_rate;
            if thrusting {
                let (fx, fy) = forward(body.rotation);
                body.vel_x += fx * agent.spec.thrust * dt;
                body.vel_y += fy * agent.spec.thrust * dt;
            }
        }
    }

    /// Effects and bullets spawned by freshly received actions
    fn act(&mut self) {
        for player in 0..self.agents.len() {
            let agent = &self.agents[player];
            let Some(body) = self.world.get(agent.collider) else {
                continue;
            };
            let transform = body.transform();
            let (fx, fy) = forward(transform.rotation);

            if agent.flag(ACTION_THRUST) {
                let offset = agent.spec.radius;
                self.events.push(TimedEvent::EffectTriggered {
                    kind: EffectKind::ThrusterParticles,
                    time: self.elapsed,
                    transform: Transform::new(
                        transform.x - fx * offset,
                        transform.y - fy * offset,
                        transform.rotation + PI,
                    ),
                });
            }

            if agent.flag(ACTION_FIRE) && CombatSystem::can_fire(agent.weapon_cooldown) {
                self.fire(player, transform);
            }
        }
    }

    fn fire(&mut self, player: PlayerIndex, muzzle: Transform) {
        let agent = &self.agents[player];
        let weapon = agent.weapon;
        let direction = muzzle.rotation + self.rng.gen_range(-BULLET_SPREAD..=BULLET_SPREAD);
        let (fx, fy) = forward(direction);
        let offset = agent.spec.radius + weapon.bullet_radius * 2.0;
        let x = muzzle.x + fx * offset;
        let y = muzzle.y + fy * offset;

        let id = self.next_entity_id;
        self.next_entity_id = self.next_entity_id.wrapping_add(1);

        let mut collider = Collider::new(
            Participant::Bullet(id),
            Shape::Circle {
                radius: weapon.bullet_radius,
            },
            ColliderKind::Kinematic,
            x,
            y,
        );
        collider.rotation = direction;
        collider.vel_x = fx * weapon.bullet_speed;
        collider.vel_y = fy * weapon.bullet_speed;
        let handle = self.world.insert(collider);

        self.bullets
            .insert(id, Bullet::new(id, player, handle, &weapon));
        self.agents[player].weapon_cooldown = weapon.cooldown;
        self.events.push(TimedEvent::EffectTriggered {
            kind: EffectKind::MuzzleFlash,
            time: self.elapsed,
            transform: Transform::new(x, y, direction),
        });
    }

    /// One physics step plus contact dispatch
    fn forward(&mut self, step_length: f32) {
        self.drive_bodies(step_length);
        let step_start = self.elapsed;
        let contacts = self.world.step(step_length);
        for contact in contacts {
            let time = step_start + f64::from(contact.at) * f64::from(step_length);
            match contact.phase {
                ContactPhase::Begin => self.begin_contact(&contact, time),
                ContactPhase::End => self.end_contact(&contact),
            }
        }
        self.elapsed = step_start + f64::from(step_length);
    }

    fn begin_contact(&mut self, contact: &Contact, time: f64) {
        let sides = [
            (contact.a, contact.b, contact.a_transform),
            (contact.b, contact.a, contact.b_transform),
        ];
        for (this, other, pose) in sides {
            match (this, other) {
                (Participant::Hill, Participant::Body(player)) => self.hill.enter(player),
                (Participant::Bullet(_), Participant::Hill) => {}
                (Participant::Bullet(id), Participant::Body(target)) => {
                    let Some(bullet) = self.bullets.get(&id) else {
                        continue;
                    };
                    if bullet.owner == target {
                        continue;
                    }
                    let hit = self.apply_hit(id, bullet.owner, target, bullet.damage);
                    debug!(
                        bullet = hit.bullet_id,
                        shooter = hit.shooter,
                        target = hit.target,
                        killed = hit.target_killed,
                        "Bullet hit"
                    );
                    self.destroy_bullet(id, time, Some(pose));
                }
                (Participant::Bullet(id), _) => self.destroy_bullet(id, time, Some(pose)),
                _ => {}
            }
        }
    }

    fn end_contact(&mut self, contact: &Contact) {
        for (this, other) in [(contact.a, contact.b), (contact.b, contact.a)] {
            if let (Participant::Hill, Participant::Body(player)) = (this, other) {
                self.hill.leave(player);
            }
        }
    }

    fn apply_hit(
        &mut self,
        bullet_id: EntityId,
        shooter: PlayerIndex,
        target: PlayerIndex,
        damage: f32,
    ) -> HitResult {
        let (hp, killed) = CombatSystem::apply_damage(self.agents[target].hp, damage);
        self.agents[target].hp = hp;
        self.rewards[shooter] += self.settings.rewards.hit_enemy_reward;
        self.rewards[target] += self.settings.rewards.hit_self_punishment;
        HitResult {
            bullet_id,
            shooter,
            target,
            damage,
            target_killed: killed,
        }
    }

    /// Remove a bullet. `pose` is where it was at `time`; expiry uses its current pose.
    fn destroy_bullet(&mut self, id: EntityId, time: f64, pose: Option<Transform>) {
        let Some(bullet) = self.bullets.remove(&id) else {
            return;
        };
        if let Some(collider) = self.world.remove(bullet.collider) {
            self.events.push(TimedEvent::EntityDestroyed {
                id,
                time,
                transform: pose.unwrap_or_else(|| collider.transform()),
            });
        }
    }

    fn age_bullets(&mut self) {
        let expired: Vec<EntityId> = self
            .bullets
            .values_mut()
            .filter_map(|b| (!b.age()).then_some(b.id))
            .collect();
        for id in expired {
            self.destroy_bullet(id, self.elapsed, None);
        }
    }

    fn score_hill(&mut self) {
        let Some(holder) = self.hill.holder() else {
            return;
        };
        self.scores[holder] += 1.0;
        for player in 0..self.agents.len() {
            self.rewards[player] += if player == holder {
                self.settings.rewards.hill_tick_reward
            } else {
                self.settings.rewards.enemy_hill_tick_punishment
            };
        }
    }

    /// Highest scoring survivor wins; ties have no victor
    fn decide_victor(&self, defeated: &[PlayerIndex]) -> Option<PlayerIndex> {
        let survivors: Vec<PlayerIndex> = (0..self.scores.len())
            .filter(|player| !defeated.contains(player))
            .collect();
        let best = survivors
            .iter()
            .map(|&player| self.scores[player])
            .fold(f32::MIN, f32::max);
        let mut leaders = survivors
            .into_iter()
            .filter(|&player| self.scores[player] == best);
        match (leaders.next(), leaders.next()) {
            (Some(player), None) => Some(player),
            _ => None,
        }
    }

    fn reset_episode(&mut self) {
        for (player, agent) in self.agents.iter_mut().enumerate() {
            agent.hp = agent.spec.max_hp;
            agent.weapon_cooldown = 0.0;
            agent.action.iter_mut().for_each(|flag| *flag = 0);
            if let Some(body) = self.world.get_mut(agent.collider) {
                let spawn = spawn_transform(player);
                body.x = spawn.x;
                body.y = spawn.y;
                body.rotation = spawn.rotation;
                body.vel_x = 0.0;
                body.vel_y = 0.0;
                body.angular_velocity = 0.0;
            }
        }

        let ids: Vec<EntityId> = self.bullets.keys().copied().collect();
        for id in ids {
            self.destroy_bullet(id, self.elapsed, None);
        }

        self.hill.clear();
        self.scores.iter_mut().for_each(|s| *s = 0.0);
        self.episode_ticks = 0;
    }

    fn take_rewards(&mut self) -> Vec<f32> {
        let zeroed = vec![0.0; self.rewards.len()];
        std::mem::replace(&mut self.rewards, zeroed)
    }

    #[cfg(test)]
    fn place_body(&mut self, player: PlayerIndex, transform: Transform) {
        if let Some(body) = self.world.get_mut(self.agents[player].collider) {
            body.x = transform.x;
            body.y = transform.y;
            body.rotation = transform.rotation;
        }
    }
}

impl Simulation for KothArena {
    fn num_players(&self) -> usize {
        self.agents.len()
    }

    fn advance(&mut self, step_length: f32, actions: &[ActionVector]) -> StepResult {
        for (agent, action) in self.agents.iter_mut().zip(actions) {
            agent.action.clone_from(action);
        }

        self.age_bullets();
        self.act();
        self.forward(step_length);
        self.score_hill();

        let mut done = false;
        let defeated: Vec<PlayerIndex> = (0..self.agents.len())
            .filter(|&p| self.agents[p].hp <= 0.0)
            .collect();
        if !defeated.is_empty() {
            for player in 0..self.agents.len() {
                if !defeated.contains(&player) {
                    self.scores[player] += SURVIVOR_SCORE;
                }
            }
            done = true;
        }

        self.total_ticks += 1;
        self.episode_ticks += 1;
        done |= self.episode_ticks >= self.settings.max_ticks;

        let mut victor = None;
        if done {
            victor = self.decide_victor(&defeated);
            for player in 0..self.agents.len() {
                self.rewards[player] += if Some(player) == victor {
                    self.settings.rewards.victory_reward
                } else {
                    self.settings.rewards.loss_punishment
                };
            }
        }

        let snapshot = self.snapshot();
        let hps = self.hps();
        let scores = self.scores.clone();
        let events = std::mem::take(&mut self.events);
        let rewards = self.take_rewards();

        if done {
            debug!(victor = ?victor, "Episode finished, resetting arena");
            self.reset_episode();
        }

        StepResult {
            snapshot,
            events,
            rewards,
            hps,
            scores,
            done,
            victor,
        }
    }

    fn advance_only(&mut self, step_length: f32) {
        self.forward(step_length);
    }

    fn reset(&mut self) -> StepResult {
        self.reset_episode();
        StepResult {
            snapshot: self.snapshot(),
            events: std::mem::take(&mut self.events),
            rewards: self.take_rewards(),
            hps: self.hps(),
            scores: self.scores.clone(),
            done: false,
            victor: None,
        }
    }
}

/// Unit vector a body with `rotation` faces; rotation 0 faces +y
fn forward(rotation: f32) -> (f32, f32) {
    (-rotation.sin(), rotation.cos())
}

/// Even players start at the south end facing north, odd players the reverse
fn spawn_transform(player: PlayerIndex) -> Transform {
    let row_offset = (player / 2) as f32 * 2.0;
    if player % 2 == 0 {
        Transform::new(row_offset, -15.0, 0.0)
    } else {
        Transform::new(-row_offset, 15.0, PI)
    }
}
