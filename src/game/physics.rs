//! Minimal 2D rigid-body world: integration, wall resolution and contact reporting.
//!
//! The arena treats this as an opaque stepping primitive: it creates colliders,
//! reads and writes their transforms and velocities, calls `step(dt)` and
//! receives begin/end contacts tagged with the logical owner of each shape.

use std::collections::HashSet;

use super::snapshot::{wrap_angle, Transform};
use super::{EntityId, PlayerIndex};

/// Longest distance a collider may travel in one internal iteration.
/// Keeps fast bullets from tunnelling through thin walls.
const MAX_TRAVEL_PER_ITERATION: f32 = 0.1;

/// Upper bound on internal iterations per `step`
const MAX_ITERATIONS: u32 = 64;

/// Logical owner of a physical shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Participant {
    Body(PlayerIndex),
    Bullet(EntityId),
    Wall(usize),
    Hill,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Shape {
    Circle { radius: f32 },
    /// Axis-aligned box given by its half extents
    Rect { half_width: f32, half_height: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColliderKind {
    /// Moves, and is pushed out of static colliders
    Dynamic,
    /// Moves, but passes through everything (reports contacts only)
    Kinematic,
    /// Never moves
    Static,
    /// Never moves, reports contacts, never resolves
    Sensor,
}

/// Handle to a collider in a `PhysicsWorld`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ColliderHandle(usize);

#[derive(Debug, Clone)]
pub struct Collider {
    pub owner: Participant,
    pub shape: Shape,
    pub kind: ColliderKind,
    pub x: f32,
    pub y: f32,
    pub rotation: f32,
    pub vel_x: f32,
    pub vel_y: f32,
    pub angular_velocity: f32,
    /// Fraction of velocity lost per second
    pub linear_damping: f32,
}

impl Collider {
    pub fn new(owner: Participant, shape: Shape, kind: ColliderKind, x: f32, y: f32) -> Self {
        Self {
            owner,
            shape,
            kind,
            x,
            y,
            rotation: 0.0,
            vel_x: 0.0,
            vel_y: 0.0,
            angular_velocity: 0.0,
            linear_damping: 0.0,
        }
    }

    pub fn transform(&self) -> Transform {
        Transform::new(self.x, self.y, self.rotation)
    }

    fn moves(&self) -> bool {
        matches!(self.kind, ColliderKind::Dynamic | ColliderKind::Kinematic)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContactPhase {
    Begin,
    End,
}

/// A begin or end of overlap between two participants
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Contact {
    pub phase: ContactPhase,
    pub a: Participant,
    pub b: Participant,
    /// Fraction of the step (0..=1) at which the contact was detected
    pub at: f32,
    /// Poses of `a` and `b` when the contact was detected
    pub a_transform: Transform,
    pub b_transform: Transform,
}

/// The physics world
#[derive(Debug, Default)]
pub struct PhysicsWorld {
    colliders: Vec<Option<Collider>>,
    touching: HashSet<(ColliderHandle, ColliderHandle)>,
}

impl PhysicsWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, collider: Collider) -> ColliderHandle {
        if let Some(slot) = self.colliders.iter().position(Option::is_none) {
            self.colliders[slot] = Some(collider);
            ColliderHandle(slot)
        } else {
            self.colliders.push(Some(collider));
            ColliderHandle(self.colliders.len() - 1)
        }
    }

    /// Remove a collider. Pairs it was part of are forgotten without End contacts.
    pub fn remove(&mut self, handle: ColliderHandle) -> Option<Collider> {
        self.touching.retain(|(a, b)| *a != handle && *b != handle);
        self.colliders.get_mut(handle.0).and_then(Option::take)
    }

    pub fn get(&self, handle: ColliderHandle) -> Option<&Collider> {
        self.colliders.get(handle.0).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, handle: ColliderHandle) -> Option<&mut Collider> {
        self.colliders.get_mut(handle.0).and_then(Option::as_mut)
    }

    pub fn len(&self) -> usize {
        self.colliders.iter().flatten().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Advance the world by `dt` seconds and report contacts that began or ended
    pub fn step(&mut self, dt: f32) -> Vec<Contact> {
        let mut contacts = Vec::new();
        if dt <= 0.0 {
            return contacts;
        }

        let max_speed = self
            .colliders
            .iter()
            .flatten()
            .filter(|c| c.moves())
            .map(|c| (c.vel_x * c.vel_x + c.vel_y * c.vel_y).sqrt())
            .fold(0.0f32, f32::max);
        let iterations = ((max_speed * dt / MAX_TRAVEL_PER_ITERATION).ceil() as u32)
            .clamp(1, MAX_ITERATIONS);
        let sub_dt = dt / iterations as f32;

        for iteration in 0..iterations {
            self.integrate(sub_dt);
            self.resolve_penetrations();
            let at = (iteration + 1) as f32 / iterations as f32;
            self.detect_contacts(at, &mut contacts);
        }

        contacts
    }

    fn integrate(&mut self, dt: f32) {
        for collider in self.colliders.iter_mut().flatten() {
            if !collider.moves() {
                continue;
            }
            let damping = (1.0 - collider.linear_damping * dt).max(0.0);
            collider.vel_x *= damping;
            collider.vel_y *= damping;
            collider.x += collider.vel_x * dt;
            collider.y += collider.vel_y * dt;
            collider.rotation = wrap_angle(collider.rotation + collider.angular_velocity * dt);
        }
    }

    /// Push dynamic circles out of static geometry and out of each other
    fn resolve_penetrations(&mut self) {
        let statics: Vec<Collider> = self
            .colliders
            .iter()
            .flatten()
            .filter(|c| c.kind == ColliderKind::Static)
            .cloned()
            .collect();

        for collider in self.colliders.iter_mut().flatten() {
            if collider.kind != ColliderKind::Dynamic {
                continue;
            }
            let Shape::Circle { radius } = collider.shape else {
                continue;
            };
            for wall in &statics {
                if let Shape::Rect {
                    half_width,
                    half_height,
                } = wall.shape
                {
                    PhysicsSystem::push_circle_out_of_rect(
                        collider,
                        radius,
                        wall.x,
                        wall.y,
                        half_width,
                        half_height,
                    );
                }
            }
        }

        let dynamic: Vec<usize> = self
            .colliders
            .iter()
            .enumerate()
            .filter_map(|(i, c)| match c {
                Some(c) if c.kind == ColliderKind::Dynamic => Some(i),
                _ => None,
            })
            .collect();
        for (n, &i) in dynamic.iter().enumerate() {
            for &j in &dynamic[n + 1..] {
                let (Some(a), Some(b)) = (self.colliders[i].clone(), self.colliders[j].clone())
                else {
                    continue;
                };
                let (Shape::Circle { radius: r1 }, Shape::Circle { radius: r2 }) =
                    (a.shape, b.shape)
                else {
                    continue;
                };
                if PhysicsSystem::circles_overlap(a.x, a.y, r1, b.x, b.y, r2) {
                    let ((x1, y1), (x2, y2)) =
                        PhysicsSystem::resolve_circle_pair(a.x, a.y, r1, b.x, b.y, r2);
                    if let Some(a) = self.colliders[i].as_mut() {
                        a.x = x1;
                        a.y = y1;
                    }
                    if let Some(b) = self.colliders[j].as_mut() {
                        b.x = x2;
                        b.y = y2;
                    }
                }
            }
        }
    }

    fn detect_contacts(&mut self, at: f32, contacts: &mut Vec<Contact>) {
        let mut now_touching = HashSet::new();
        for i in 0..self.colliders.len() {
            let Some(a) = self.colliders[i].as_ref() else {
                continue;
            };
            for j in (i + 1)..self.colliders.len() {
                let Some(b) = self.colliders[j].as_ref() else {
                    continue;
                };
                // At least one side has to move for anything to change
                if !a.moves() && !b.moves() {
                    continue;
                }
                if PhysicsSystem::shapes_touch(a, b) {
                    now_touching.insert((ColliderHandle(i), ColliderHandle(j)));
                }
            }
        }

        let mut began: Vec<_> = now_touching.difference(&self.touching).copied().collect();
        let mut ended: Vec<_> = self.touching.difference(&now_touching).copied().collect();
        // HashSet order is unspecified; keep contact order deterministic
        began.sort_unstable();
        ended.sort_unstable();

        for (phase, pairs) in [(ContactPhase::End, ended), (ContactPhase::Begin, began)] {
            for (a, b) in pairs {
                if let (Some(ca), Some(cb)) = (self.get(a), self.get(b)) {
                    contacts.push(Contact {
                        phase,
                        a: ca.owner,
                        b: cb.owner,
                        at,
                        a_transform: ca.transform(),
                        b_transform: cb.transform(),
                    });
                }
            }
        }

        self.touching = now_touching;
    }
}

/// Stateless geometry helpers
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Check overlap between two circles
    pub fn circles_overlap(x1: f32, y1: f32, radius1: f32, x2: f32, y2: f32, radius2: f32) -> bool {
        let dx = x2 - x1;
        let dy = y2 - y1;
        let combined_radius = radius1 + radius2;
        dx * dx + dy * dy < combined_radius * combined_radius
    }

    /// Check overlap between a circle and an axis-aligned rectangle
    pub fn circle_overlaps_rect(
        cx: f32,
        cy: f32,
        radius: f32,
        rx: f32,
        ry: f32,
        half_width: f32,
        half_height: f32,
    ) -> bool {
        let closest_x = cx.clamp(rx - half_width, rx + half_width);
        let closest_y = cy.clamp(ry - half_height, ry + half_height);
        let dx = cx - closest_x;
        let dy = cy - closest_y;
        dx * dx + dy * dy < radius * radius
    }

    fn shapes_touch(a: &Collider, b: &Collider) -> bool {
        match (a.shape, b.shape) {
            (Shape::Circle { radius: r1 }, Shape::Circle { radius: r2 }) => {
                Self::circles_overlap(a.x, a.y, r1, b.x, b.y, r2)
            }
            (
                Shape::Circle { radius },
                Shape::Rect {
                    half_width,
                    half_height,
                },
            ) => Self::circle_overlaps_rect(a.x, a.y, radius, b.x, b.y, half_width, half_height),
            (
                Shape::Rect {
                    half_width,
                    half_height,
                },
                Shape::Circle { radius },
            ) => Self::circle_overlaps_rect(b.x, b.y, radius, a.x, a.y, half_width, half_height),
            (Shape::Rect { .. }, Shape::Rect { .. }) => false,
        }
    }

    /// Resolve overlap between two circles (pushes them apart)
    /// Returns ((new_x1, new_y1), (new_x2, new_y2))
    pub fn resolve_circle_pair(
        x1: f32,
        y1: f32,
        radius1: f32,
        x2: f32,
        y2: f32,
        radius2: f32,
    ) -> ((f32, f32), (f32, f32)) {
        let dx = x2 - x1;
        let dy = y2 - y1;
        let dist = (dx * dx + dy * dy).sqrt();

        if dist < 0.001 {
            // Same position, push apart arbitrarily
            return ((x1 - radius1, y1), (x2 + radius2, y2));
        }

        let overlap = radius1 + radius2 - dist;
        if overlap <= 0.0 {
            return ((x1, y1), (x2, y2));
        }

        let nx = dx / dist;
        let ny = dy / dist;
        let push = overlap / 2.0;

        ((x1 - nx * push, y1 - ny * push), (x2 + nx * push, y2 + ny * push))
    }

    /// Move a circle out of a rectangle and cancel its velocity into the wall
    fn push_circle_out_of_rect(
        circle: &mut Collider,
        radius: f32,
        rx: f32,
        ry: f32,
        half_width: f32,
        half_height: f32,
    ) {
        if !Self::circle_overlaps_rect(circle.x, circle.y, radius, rx, ry, half_width, half_height)
        {
            return;
        }

        let closest_x = circle.x.clamp(rx - half_width, rx + half_width);
        let closest_y = circle.y.clamp(ry - half_height, ry + half_height);
        let dx = circle.x - closest_x;
        let dy = circle.y - closest_y;
        let dist = (dx * dx + dy * dy).sqrt();

        let (nx, ny, depth) = if dist > 1e-6 {
            (dx / dist, dy / dist, radius - dist)
        } else {
            // Center inside the rectangle: leave along the shallowest axis
            let left = circle.x - (rx - half_width);
            let right = (rx + half_width) - circle.x;
            let bottom = circle.y - (ry - half_height);
            let top = (ry + half_height) - circle.y;
            let min = left.min(right).min(bottom).min(top);
            if min == left {
                (-1.0, 0.0, left + radius)
            } else if min == right {
                (1.0, 0.0, right + radius)
            } else if min == bottom {
                (0.0, -1.0, bottom + radius)
            } else {
                (0.0, 1.0, top + radius)
            }
        };

        circle.x += nx * depth;
        circle.y += ny * depth;

        let into_wall = circle.vel_x * nx + circle.vel_y * ny;
        if into_wall < 0.0 {
            circle.vel_x -= into_wall * nx;
            circle.vel_y -= into_wall * ny;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn circle(owner: Participant, kind: ColliderKind, x: f32, y: f32, radius: f32) -> Collider {
        Collider::new(owner, Shape::Circle { radius }, kind, x, y)
    }

    #[test]
    fn integrates_velocity() {
        let mut world = PhysicsWorld::new();
        let mut body = circle(Participant::Body(0), ColliderKind::Dynamic, 0.0, 0.0, 0.5);
        body.vel_x = 2.0;
        body.angular_velocity = 1.0;
        let handle = world.insert(body);

        world.step(0.5);

        let body = world.get(handle).unwrap();
        assert!((body.x - 1.0).abs() < 1e-4);
        assert!((body.rotation - 0.5).abs() < 1e-4);
    }

    #[test]
    fn reports_begin_and_end_contacts_with_sensor() {
        let mut world = PhysicsWorld::new();
        world.insert(circle(Participant::Hill, ColliderKind::Sensor, 0.0, 0.0, 1.0));
        let mut body = circle(Participant::Body(1), ColliderKind::Dynamic, -3.0, 0.0, 0.5);
        body.vel_x = 2.0;
        let handle = world.insert(body);

        let contacts = world.step(1.0);
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].phase, ContactPhase::Begin);
        assert_eq!(contacts[0].a, Participant::Hill);
        assert_eq!(contacts[0].b, Participant::Body(1));
        assert!(contacts[0].at > 0.0 && contacts[0].at <= 1.0);

        // Still inside: nothing new
        world.get_mut(handle).unwrap().vel_x = 0.0;
        assert!(world.step(0.1).is_empty());

        world.get_mut(handle).unwrap().x = 5.0;
        let contacts = world.step(0.1);
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].phase, ContactPhase::End);
    }

    #[test]
    fn fast_bullet_does_not_tunnel_through_wall() {
        let mut world = PhysicsWorld::new();
        world.insert(Collider::new(
            Participant::Wall(0),
            Shape::Rect {
                half_width: 0.05,
                half_height: 5.0,
            },
            ColliderKind::Static,
            1.0,
            0.0,
        ));
        let mut bullet = circle(Participant::Bullet(3), ColliderKind::Kinematic, 0.0, 0.0, 0.1);
        bullet.vel_x = 100.0;
        world.insert(bullet);

        let contacts = world.step(1.0 / 60.0);
        assert!(contacts
            .iter()
            .any(|c| c.phase == ContactPhase::Begin && c.b == Participant::Bullet(3)));
    }

    #[test]
    fn dynamic_circle_stopped_by_wall() {
        let mut world = PhysicsWorld::new();
        world.insert(Collider::new(
            Participant::Wall(0),
            Shape::Rect {
                half_width: 0.5,
                half_height: 5.0,
            },
            ColliderKind::Static,
            2.0,
            0.0,
        ));
        let mut body = circle(Participant::Body(0), ColliderKind::Dynamic, 0.0, 0.0, 0.5);
        body.vel_x = 10.0;
        let handle = world.insert(body);

        for _ in 0..30 {
            world.step(1.0 / 60.0);
        }

        let body = world.get(handle).unwrap();
        assert!(body.x <= 1.0 + 1e-3, "body went through wall: x = {}", body.x);
        assert!(body.vel_x.abs() < 1e-3);
    }

    #[test]
    fn overlapping_bodies_are_separated() {
        let ((x1, _), (x2, _)) = PhysicsSystem::resolve_circle_pair(0.0, 0.0, 1.0, 1.0, 0.0, 1.0);
        assert!((x2 - x1 - 2.0).abs() < 1e-4);
    }

    #[test]
    fn removed_slots_are_reused() {
        let mut world = PhysicsWorld::new();
        let a = world.insert(circle(Participant::Bullet(1), ColliderKind::Kinematic, 0.0, 0.0, 0.1));
        world.insert(circle(Participant::Bullet(2), ColliderKind::Kinematic, 5.0, 0.0, 0.1));
        assert!(world.remove(a).is_some());
        assert_eq!(world.len(), 1);
        let c = world.insert(circle(Participant::Bullet(3), ColliderKind::Kinematic, 0.0, 0.0, 0.1));
        assert_eq!(a, c);
        assert!(world.remove(a).is_some());
        assert!(world.remove(a).is_none());
    }
}
