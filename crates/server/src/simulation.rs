use std::collections::BTreeMap;

use glam::Vec3;

use netsync::{
    ClientInput, EntityId, LinearMotion, LocalInput, MotionModel, Networked, NetworkedState,
    PeerId,
};

pub const MAX_HEALTH: f32 = 100.0;
const COMBAT_COOLDOWN: f32 = 5.0;
const ARRIVE_DISTANCE: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ActorKind {
    Npc { target: Vec3 },
    Player { client_id: PeerId },
}

#[derive(Debug, Clone)]
pub struct Actor {
    pub id: EntityId,
    pub kind: ActorKind,
    pub state: NetworkedState,
    pub combat_timer: f32,
}

impl Networked for Actor {
    fn network_id(&self) -> EntityId {
        self.id
    }

    fn networked_state(&self) -> NetworkedState {
        self.state
    }

    fn in_combat(&self) -> bool {
        self.combat_timer > 0.0
    }
}

/// xorshift64*, enough for wander targets.
#[derive(Debug, Clone)]
pub struct Wander {
    state: u64,
}

impl Wander {
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed.max(1),
        }
    }

    pub fn from_time() -> Self {
        use std::collections::hash_map::RandomState;
        use std::hash::{BuildHasher, Hasher};

        let mut hasher = RandomState::new().build_hasher();
        hasher.write_u64(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_nanos() as u64)
                .unwrap_or_default(),
        );
        Self::new(hasher.finish())
    }

    /// Uniform in `[0, 1)`.
    pub fn next_f32(&mut self) -> f32 {
        self.state ^= self.state >> 12;
        self.state ^= self.state << 25;
        self.state ^= self.state >> 27;
        let bits = self.state.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 40;
        bits as f32 / (1u64 << 24) as f32
    }

    pub fn point_in(&mut self, extent: f32) -> Vec3 {
        let x = (self.next_f32() * 2.0 - 1.0) * extent;
        let z = (self.next_f32() * 2.0 - 1.0) * extent;
        Vec3::new(x, 0.0, z)
    }
}

pub struct World {
    actors: BTreeMap<EntityId, Actor>,
    wander: Wander,
    extent: f32,
    npc_speed: f32,
}

impl World {
    pub fn new(extent: f32, npc_speed: f32, wander: Wander) -> Self {
        Self {
            actors: BTreeMap::new(),
            wander,
            extent,
            npc_speed,
        }
    }

    pub fn random_point(&mut self) -> Vec3 {
        self.wander.point_in(self.extent)
    }

    pub fn insert(&mut self, id: EntityId, kind: ActorKind, state: NetworkedState) {
        self.actors.insert(
            id,
            Actor {
                id,
                kind,
                state,
                combat_timer: 0.0,
            },
        );
    }

    pub fn remove(&mut self, id: EntityId) -> Option<Actor> {
        self.actors.remove(&id)
    }

    pub fn player_entity(&self, client_id: PeerId) -> Option<EntityId> {
        self.actors
            .values()
            .find(|a| a.kind == ActorKind::Player { client_id })
            .map(|a| a.id)
    }

    pub fn get(&self, id: EntityId) -> Option<&Actor> {
        self.actors.get(&id)
    }

    pub fn actors(&self) -> impl Iterator<Item = &Actor> {
        self.actors.values()
    }

    pub fn len(&self) -> usize {
        self.actors.len()
    }

    /// Moves the player with the same model the client predicts with.
    pub fn apply_input(
        &mut self,
        id: EntityId,
        input: &ClientInput,
        motion: &LinearMotion,
        dt: f32,
    ) -> bool {
        let Some(actor) = self.actors.get_mut(&id) else {
            return false;
        };
        let local = LocalInput {
            frame: input.frame,
            timestamp: input.timestamp,
            movement: input.movement.unwrap_or(Vec3::ZERO),
            commands: Vec::new(),
        };
        actor.state = motion.step(&actor.state, &local, dt);
        true
    }

    pub fn simulate_npcs(&mut self, dt: f32) {
        for actor in self.actors.values_mut() {
            actor.combat_timer = (actor.combat_timer - dt).max(0.0);

            let ActorKind::Npc { target } = actor.kind else {
                continue;
            };

            let to_target = target - actor.state.position;
            if to_target.length() < ARRIVE_DISTANCE {
                actor.kind = ActorKind::Npc {
                    target: self.wander.point_in(self.extent),
                };
                actor.state.velocity = Vec3::ZERO;
                continue;
            }

            let velocity = to_target.normalize() * self.npc_speed;
            actor.state.velocity = velocity;
            actor.state.position += velocity * dt;
            actor.state.rotation = velocity.x.atan2(velocity.z);
        }
    }

    /// Returns the remaining health. A target brought to zero respawns elsewhere.
    pub fn damage(&mut self, id: EntityId, amount: f32) -> Option<f32> {
        let respawn_at = self.wander.point_in(self.extent);
        let actor = self.actors.get_mut(&id)?;

        actor.combat_timer = COMBAT_COOLDOWN;
        actor.state.health = (actor.state.health - amount).max(0.0);
        if actor.state.health <= 0.0 {
            log::info!("Entity {} defeated, respawning", id);
            actor.state = NetworkedState::new(respawn_at, 0.0, Vec3::ZERO, MAX_HEALTH);
            actor.combat_timer = 0.0;
        }
        Some(actor.state.health)
    }

    pub fn engage(&mut self, id: EntityId) {
        if let Some(actor) = self.actors.get_mut(&id) {
            actor.combat_timer = COMBAT_COOLDOWN;
        }
    }
}
