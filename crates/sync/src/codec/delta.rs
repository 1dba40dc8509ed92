use std::collections::HashMap;

use crate::config::Precision;
use crate::state::{DirtyFields, EntityId, EntityNetworkState, NetworkedState};

use super::protocol::{EntityDelta, FieldSet, StateFrame};
use super::quantize::quantize_state;

pub const RAW_ENTITY_BYTES: usize = 8 + 4 * 8;

const TOMBSTONE_FRAMES: u64 = 256;

#[derive(Debug, Clone, PartialEq)]
pub struct NetworkUpdate {
    pub entity_id: EntityId,
    pub fields: FieldSet,
    pub priority: f32,
    pub timestamp: f64,
}

#[derive(Debug, Clone)]
pub struct DeltaEncoder {
    precision: Precision,
    delta_compression: bool,
}

impl DeltaEncoder {
    pub fn new(precision: Precision, delta_compression: bool) -> Self {
        Self {
            precision,
            delta_compression,
        }
    }

    pub fn delta_compression(&self) -> bool {
        self.delta_compression
    }

    /// Builds the update for `mask` fields of `entity`. With compression off
    /// every field goes out raw regardless of the mask.
    pub fn build_update(
        &self,
        entity: &EntityNetworkState,
        mask: DirtyFields,
        priority: f32,
    ) -> NetworkUpdate {
        let fields = if self.delta_compression {
            let quantized = quantize_state(&entity.state, &self.precision);
            FieldSet::from_state(&quantized, mask)
        } else {
            FieldSet::full(&entity.state)
        };

        NetworkUpdate {
            entity_id: entity.id,
            fields,
            priority,
            timestamp: entity.last_update,
        }
    }

    pub fn encode(
        &self,
        frame: u64,
        server_time: f64,
        updates: &[NetworkUpdate],
        removed: &[EntityId],
    ) -> StateFrame {
        let mut state = StateFrame::new(frame, server_time);
        state.entities = updates
            .iter()
            .filter(|u| !u.fields.is_empty())
            .map(|u| EntityDelta::from_fields(u.entity_id, &u.fields))
            .collect();
        state.removed = removed.to_vec();
        state
    }

    pub fn raw_size(updates: &[NetworkUpdate], removed: &[EntityId]) -> usize {
        16 + updates.len() * RAW_ENTITY_BYTES + removed.len() * 8
    }
}

#[derive(Debug, Clone)]
pub struct ShadowEntity {
    pub state: NetworkedState,
    pub last_frame: u64,
    pub last_server_time: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodedFrame {
    pub frame: u64,
    pub server_time: f64,
    pub applied: Vec<(EntityId, DirtyFields)>,
    pub appeared: Vec<EntityId>,
    pub removed: Vec<EntityId>,
    pub stale: usize,
    pub malformed: usize,
}

#[derive(Debug, Default)]
pub struct ShadowRegistry {
    entities: HashMap<EntityId, ShadowEntity>,
    tombstones: HashMap<EntityId, u64>,
    latest_frame: u64,
}

impl ShadowRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn decode(&mut self, frame: &StateFrame) -> DecodedFrame {
        let mut decoded = DecodedFrame {
            frame: frame.frame,
            server_time: frame.server_time,
            ..Default::default()
        };

        for &id in &frame.removed {
            if self.entities.get(&id).is_some_and(|e| e.last_frame >= frame.frame) {
                decoded.stale += 1;
                continue;
            }
            if self.entities.remove(&id).is_some() {
                decoded.removed.push(id);
            }
            self.tombstones.insert(id, frame.frame);
        }

        for delta in &frame.entities {
            let fields = match delta.to_fields() {
                Ok(fields) => fields,
                Err(e) => {
                    log::debug!("Dropping delta in frame {}: {}", frame.frame, e);
                    decoded.malformed += 1;
                    continue;
                }
            };

            let id = delta.entity_id;
            if self.tombstones.get(&id).is_some_and(|&f| frame.frame <= f) {
                decoded.stale += 1;
                continue;
            }

            match self.entities.get_mut(&id) {
                Some(entity) => {
                    if frame.frame <= entity.last_frame {
                        decoded.stale += 1;
                        continue;
                    }
                    fields.apply_to(&mut entity.state);
                    entity.last_frame = frame.frame;
                    entity.last_server_time = frame.server_time;
                }
                None => {
                    let mut state = NetworkedState::default();
                    fields.apply_to(&mut state);
                    self.entities.insert(
                        id,
                        ShadowEntity {
                            state,
                            last_frame: frame.frame,
                            last_server_time: frame.server_time,
                        },
                    );
                    self.tombstones.remove(&id);
                    decoded.appeared.push(id);
                }
            }
            decoded.applied.push((id, fields.mask()));
        }

        if frame.frame > self.latest_frame {
            self.latest_frame = frame.frame;
            let horizon = self.latest_frame.saturating_sub(TOMBSTONE_FRAMES);
            self.tombstones.retain(|_, &mut f| f > horizon);
        }

        decoded
    }

    pub fn get(&self, id: EntityId) -> Option<&ShadowEntity> {
        self.entities.get(&id)
    }

    pub fn state(&self, id: EntityId) -> Option<&NetworkedState> {
        self.entities.get(&id).map(|e| &e.state)
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &ShadowEntity)> {
        self.entities.iter().map(|(&id, e)| (id, e))
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn latest_frame(&self) -> u64 {
        self.latest_frame
    }

    pub fn clear(&mut self) {
        self.entities.clear();
        self.tombstones.clear();
        self.latest_frame = 0;
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;

    fn encoder() -> DeltaEncoder {
        DeltaEncoder::new(Precision::default(), true)
    }

    fn entity(id: EntityId, state: NetworkedState) -> EntityNetworkState {
        EntityNetworkState::with_state(id, state, 0.0)
    }

    fn frame_with(frame: u64, deltas: Vec<EntityDelta>) -> StateFrame {
        let mut state = StateFrame::new(frame, frame as f64 * 0.05);
        state.entities = deltas;
        state
    }

    #[test]
    fn only_masked_fields_are_encoded() {
        let e = entity(1, NetworkedState::new(Vec3::new(1.04, 0.0, 0.0), 0.5, Vec3::ONE, 90.0));
        let update = encoder().build_update(&e, DirtyFields::POSITION, 1.0);

        assert!(update.fields.rotation.is_none());
        assert!(update.fields.health.is_none());
        let position = update.fields.position.unwrap();
        assert!((position.x - 1.0).abs() < 1e-6);
    }

    #[test]
    fn compression_off_sends_everything_raw() {
        let state = NetworkedState::new(Vec3::new(1.04, 2.0, 3.0), 0.123, Vec3::ZERO, 77.7);
        let e = entity(1, state);
        let update = DeltaEncoder::new(Precision::default(), false).build_update(
            &e,
            DirtyFields::HEALTH,
            1.0,
        );

        assert_eq!(update.fields, FieldSet::full(&state));
    }

    #[test]
    fn absent_fields_keep_previous_values() {
        let mut shadow = ShadowRegistry::new();
        let full = FieldSet::full(&NetworkedState::new(Vec3::ONE, 1.0, Vec3::X, 100.0));
        shadow.decode(&frame_with(1, vec![EntityDelta::from_fields(5, &full)]));

        let partial = FieldSet {
            health: Some(40.0),
            ..Default::default()
        };
        let decoded = shadow.decode(&frame_with(2, vec![EntityDelta::from_fields(5, &partial)]));

        assert_eq!(decoded.applied, vec![(5, DirtyFields::HEALTH)]);
        let state = shadow.state(5).unwrap();
        assert_eq!(state.position, Vec3::ONE);
        assert_eq!(state.rotation, 1.0);
        assert_eq!(state.health, 40.0);
    }

    #[test]
    fn sequential_deltas_equal_union_of_latest() {
        let updates = [
            FieldSet {
                position: Some(Vec3::new(1.0, 0.0, 0.0)),
                health: Some(100.0),
                ..Default::default()
            },
            FieldSet {
                position: Some(Vec3::new(2.0, 0.0, 0.0)),
                rotation: Some(0.5),
                ..Default::default()
            },
            FieldSet {
                velocity: Some(Vec3::Y),
                health: Some(80.0),
                ..Default::default()
            },
        ];

        let mut shadow = ShadowRegistry::new();
        let mut union = FieldSet::default();
        for (i, fields) in updates.iter().enumerate() {
            shadow.decode(&frame_with(
                i as u64 + 1,
                vec![EntityDelta::from_fields(1, fields)],
            ));
            union.merge(fields);
        }

        let mut expected = NetworkedState::default();
        union.apply_to(&mut expected);
        assert_eq!(shadow.state(1), Some(&expected));
    }

    #[test]
    fn stale_frames_are_dropped() {
        let mut shadow = ShadowRegistry::new();
        let newer = FieldSet {
            health: Some(10.0),
            ..Default::default()
        };
        let older = FieldSet {
            health: Some(99.0),
            ..Default::default()
        };

        shadow.decode(&frame_with(5, vec![EntityDelta::from_fields(1, &newer)]));
        let decoded = shadow.decode(&frame_with(4, vec![EntityDelta::from_fields(1, &older)]));
        let duplicate = shadow.decode(&frame_with(5, vec![EntityDelta::from_fields(1, &older)]));

        assert_eq!(decoded.stale, 1);
        assert_eq!(duplicate.stale, 1);
        assert_eq!(shadow.state(1).unwrap().health, 10.0);
    }

    #[test]
    fn malformed_delta_is_counted_not_applied() {
        let mut shadow = ShadowRegistry::new();
        let bad = EntityDelta {
            entity_id: 2,
            fields: DirtyFields::POSITION.bits(),
            values: vec![1.0],
        };
        let decoded = shadow.decode(&frame_with(1, vec![bad]));

        assert_eq!(decoded.malformed, 1);
        assert!(shadow.is_empty());
    }

    #[test]
    fn removal_blocks_late_updates_but_allows_reentry() {
        let mut shadow = ShadowRegistry::new();
        let fields = FieldSet::full(&NetworkedState::at(Vec3::ONE));
        shadow.decode(&frame_with(1, vec![EntityDelta::from_fields(3, &fields)]));

        let mut removal = StateFrame::new(3, 0.15);
        removal.removed.push(3);
        assert_eq!(shadow.decode(&removal).removed, vec![3]);

        let late = shadow.decode(&frame_with(2, vec![EntityDelta::from_fields(3, &fields)]));
        assert_eq!(late.stale, 1);
        assert!(!shadow.contains(3));

        let reentry = shadow.decode(&frame_with(6, vec![EntityDelta::from_fields(3, &fields)]));
        assert_eq!(reentry.appeared, vec![3]);
    }

    #[test]
    fn encode_skips_empty_updates() {
        let e = entity(1, NetworkedState::default());
        let empty = NetworkUpdate {
            entity_id: 2,
            fields: FieldSet::default(),
            priority: 1.0,
            timestamp: 0.0,
        };
        let full = encoder().build_update(&e, DirtyFields::all(), 1.0);
        let frame = encoder().encode(7, 0.35, &[full, empty], &[9]);

        assert_eq!(frame.frame, 7);
        assert_eq!(frame.entities.len(), 1);
        assert_eq!(frame.entities[0].entity_id, 1);
        assert_eq!(frame.removed, vec![9]);
    }
}
