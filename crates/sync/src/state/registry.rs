use std::collections::HashMap;

use crate::config::Precision;
use crate::transport::PeerId;

use super::entity::{
    DirtyFields, EntityId, EntityNetworkState, Networked, NetworkedState, shortest_angle,
};

#[derive(Debug)]
pub struct EntityRegistry {
    entities: HashMap<EntityId, EntityNetworkState>,
    precision: Precision,
    next_entity_id: EntityId,
    removed_entities: Vec<EntityId>,
}

impl EntityRegistry {
    pub fn new(precision: Precision) -> Self {
        Self {
            entities: HashMap::new(),
            precision,
            next_entity_id: 1,
            removed_entities: Vec::new(),
        }
    }

    pub fn precision(&self) -> &Precision {
        &self.precision
    }

    /// Hands out ids that are never reused for the lifetime of the registry.
    pub fn allocate_id(&mut self) -> EntityId {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        id
    }

    pub fn register(&mut self, id: EntityId) -> bool {
        self.register_with(id, NetworkedState::default(), 0.0)
    }

    pub fn register_with(&mut self, id: EntityId, state: NetworkedState, now: f64) -> bool {
        if self.entities.contains_key(&id) {
            return false;
        }
        if id >= self.next_entity_id {
            self.next_entity_id = id + 1;
        }
        self.entities
            .insert(id, EntityNetworkState::with_state(id, state, now));
        log::trace!("Registered entity {}", id);
        true
    }

    pub fn spawn(&mut self, state: NetworkedState, now: f64) -> EntityId {
        let id = self.allocate_id();
        self.register_with(id, state, now);
        id
    }

    pub fn unregister(&mut self, id: EntityId) -> Option<EntityNetworkState> {
        let entity = self.entities.remove(&id);
        if entity.is_some() {
            self.removed_entities.push(id);
            log::trace!("Unregistered entity {}", id);
        }
        entity
    }

    /// Diffs `observed` against the stored state and returns the fields that
    /// became dirty. Unknown ids are ignored.
    pub fn observe(
        &mut self,
        id: EntityId,
        observed: &NetworkedState,
        now: f64,
    ) -> Option<DirtyFields> {
        let precision = self.precision;
        let entity = self.entities.get_mut(&id)?;
        let changed = changed_fields(&entity.state, observed, &precision);

        if changed.contains(DirtyFields::POSITION) {
            entity.state.position = observed.position;
        }
        if changed.contains(DirtyFields::ROTATION) {
            entity.state.rotation = observed.rotation;
        }
        if changed.contains(DirtyFields::VELOCITY) {
            entity.state.velocity = observed.velocity;
        }
        if changed.contains(DirtyFields::HEALTH) {
            entity.state.health = observed.health;
        }

        if !changed.is_empty() {
            entity.dirty |= changed;
            entity.last_update = now;
        }

        Some(changed)
    }

    pub fn observe_entity<N: Networked + ?Sized>(
        &mut self,
        entity: &N,
        now: f64,
    ) -> Option<DirtyFields> {
        let id = entity.network_id();
        let changed = self.observe(id, &entity.networked_state(), now)?;
        self.set_in_combat(id, entity.in_combat());
        Some(changed)
    }

    pub fn set_owner(&mut self, id: EntityId, owner: Option<PeerId>) {
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.owner = owner;
        }
    }

    pub fn set_in_combat(&mut self, id: EntityId, in_combat: bool) {
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.in_combat = in_combat;
        }
    }

    pub(crate) fn set_priority(&mut self, id: EntityId, priority: f32) {
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.priority = priority;
        }
    }

    pub fn clear_dirty(&mut self, id: EntityId, fields: DirtyFields) {
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.dirty.remove(fields);
        }
    }

    pub fn get(&self, id: EntityId) -> Option<&EntityNetworkState> {
        self.entities.get(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntityNetworkState> {
        self.entities.values()
    }

    pub fn ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.entities.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn dirty_count(&self) -> usize {
        self.entities.values().filter(|e| e.is_dirty()).count()
    }

    pub fn removed_this_tick(&self) -> &[EntityId] {
        &self.removed_entities
    }

    pub fn end_tick(&mut self) {
        self.removed_entities.clear();
    }
}

fn changed_fields(
    stored: &NetworkedState,
    observed: &NetworkedState,
    precision: &Precision,
) -> DirtyFields {
    let mut changed = DirtyFields::empty();

    if stored.position.distance(observed.position) >= precision.position {
        changed |= DirtyFields::POSITION;
    }
    if shortest_angle(stored.rotation, observed.rotation).abs() >= precision.rotation {
        changed |= DirtyFields::ROTATION;
    }
    if stored.velocity.distance(observed.velocity) >= precision.velocity {
        changed |= DirtyFields::VELOCITY;
    }
    if (stored.health - observed.health).abs() >= precision.health {
        changed |= DirtyFields::HEALTH;
    }

    changed
}
