use std::f32::consts::{PI, TAU};

use bitflags::bitflags;
use glam::Vec3;
use serde::{Deserialize, Serialize};

use crate::transport::PeerId;

pub type EntityId = u64;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DirtyFields: u8 {
        const POSITION = 1 << 0;
        const ROTATION = 1 << 1;
        const VELOCITY = 1 << 2;
        const HEALTH = 1 << 3;
    }
}

/// Networked attributes of one entity. Rotation is a yaw angle in radians.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct NetworkedState {
    pub position: Vec3,
    pub rotation: f32,
    pub velocity: Vec3,
    pub health: f32,
}

impl NetworkedState {
    pub fn new(position: Vec3, rotation: f32, velocity: Vec3, health: f32) -> Self {
        Self {
            position,
            rotation,
            velocity,
            health,
        }
    }

    pub fn at(position: Vec3) -> Self {
        Self {
            position,
            ..Default::default()
        }
    }

    pub fn lerp(&self, to: &Self, t: f32) -> Self {
        if t <= 0.0 {
            return *self;
        }
        if t >= 1.0 {
            return *to;
        }
        Self {
            position: self.position.lerp(to.position, t),
            rotation: lerp_angle(self.rotation, to.rotation, t),
            velocity: self.velocity.lerp(to.velocity, t),
            health: self.health + (to.health - self.health) * t,
        }
    }
}

/// Read side of the simulation. Anything the server replicates implements this.
pub trait Networked {
    fn network_id(&self) -> EntityId;

    fn networked_state(&self) -> NetworkedState;

    fn in_combat(&self) -> bool {
        false
    }
}

/// Write side used on the client to push render-time state back into the view.
pub trait NetworkedMut: Networked {
    fn apply_networked_state(&mut self, state: &NetworkedState);
}

#[derive(Debug, Clone)]
pub struct EntityNetworkState {
    pub id: EntityId,
    pub state: NetworkedState,
    pub dirty: DirtyFields,
    pub priority: f32,
    pub owner: Option<PeerId>,
    pub last_update: f64,
    pub in_combat: bool,
}

impl EntityNetworkState {
    pub fn new(id: EntityId) -> Self {
        Self::with_state(id, NetworkedState::default(), 0.0)
    }

    pub fn with_state(id: EntityId, state: NetworkedState, now: f64) -> Self {
        Self {
            id,
            state,
            dirty: DirtyFields::empty(),
            priority: 0.0,
            owner: None,
            last_update: now,
            in_combat: false,
        }
    }

    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }
}

pub fn wrap_angle(angle: f32) -> f32 {
    let mut wrapped = angle % TAU;
    if wrapped > PI {
        wrapped -= TAU;
    } else if wrapped <= -PI {
        wrapped += TAU;
    }
    wrapped
}

/// Signed shortest rotation taking `from` onto `to`.
pub fn shortest_angle(from: f32, to: f32) -> f32 {
    wrap_angle(to - from)
}

pub fn lerp_angle(from: f32, to: f32, t: f32) -> f32 {
    if t <= 0.0 {
        return from;
    }
    if t >= 1.0 {
        return to;
    }
    wrap_angle(from + shortest_angle(from, to) * t)
}
