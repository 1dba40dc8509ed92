use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};

use glam::Vec3;

use crate::codec::{DeltaEncoder, NetworkUpdate};
use crate::config::{PriorityWeights, SyncConfig};
use crate::state::{DirtyFields, EntityId, EntityNetworkState, EntityRegistry};
use crate::transport::PeerId;

#[derive(Debug, Clone)]
pub struct Viewer {
    pub peer: PeerId,
    pub position: Vec3,
    pub entity: Option<EntityId>,
    visible: HashSet<EntityId>,
    backlog: HashMap<EntityId, DirtyFields>,
    /// Removed ids and how many more frames still repeat them.
    departing: BTreeMap<EntityId, u32>,
    ticks_since_resync: u32,
}

impl Viewer {
    pub fn new(peer: PeerId, position: Vec3) -> Self {
        Self {
            peer,
            position,
            entity: None,
            visible: HashSet::new(),
            backlog: HashMap::new(),
            departing: BTreeMap::new(),
            ticks_since_resync: 0,
        }
    }

    pub fn with_entity(mut self, entity: EntityId) -> Self {
        self.entity = Some(entity);
        self
    }

    pub fn is_visible(&self, id: EntityId) -> bool {
        self.visible.contains(&id)
    }

    pub fn visible_count(&self) -> usize {
        self.visible.len()
    }

    pub fn backlog(&self, id: EntityId) -> DirtyFields {
        self.backlog.get(&id).copied().unwrap_or_default()
    }

    pub fn pending_removals(&self) -> usize {
        self.departing.len()
    }

    fn depart(&mut self, id: EntityId, repeats: u32) {
        self.backlog.remove(&id);
        if self.visible.remove(&id) {
            self.departing.insert(id, repeats);
        }
    }

    fn take_removals(&mut self, limit: usize) -> Vec<EntityId> {
        let taken: Vec<EntityId> = self.departing.keys().copied().take(limit).collect();
        for id in &taken {
            if let Some(left) = self.departing.get_mut(id) {
                *left = left.saturating_sub(1);
                if *left == 0 {
                    self.departing.remove(id);
                }
            }
        }
        taken
    }
}

#[derive(Debug, Clone, Default)]
pub struct ViewerBatch {
    pub peer: PeerId,
    pub updates: Vec<NetworkUpdate>,
    pub removed: Vec<EntityId>,
}

impl ViewerBatch {
    pub fn is_empty(&self) -> bool {
        self.updates.is_empty() && self.removed.is_empty()
    }
}

struct Candidate {
    id: EntityId,
    mask: DirtyFields,
    priority: f32,
    first_sync: bool,
}

#[derive(Debug, Clone)]
pub struct UpdateCollector {
    max_updates_per_tick: usize,
    priority_radius: f32,
    culling_distance: f32,
    weights: PriorityWeights,
    full_resync_interval: u32,
    removal_repeat_ticks: u32,
    max_removals_per_tick: usize,
}

impl UpdateCollector {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            max_updates_per_tick: config.max_updates_per_tick,
            priority_radius: config.priority_radius,
            culling_distance: config.culling_distance,
            weights: config.weights,
            full_resync_interval: config.full_resync_interval,
            removal_repeat_ticks: config.removal_repeat_ticks,
            max_removals_per_tick: config.max_removals_per_tick,
        }
    }

    pub fn distance_weight(&self, distance: f32) -> f32 {
        if distance <= self.priority_radius {
            1.0
        } else {
            self.priority_radius / distance
        }
    }

    pub fn priority(
        &self,
        entity: &EntityNetworkState,
        viewer: &Viewer,
        pending: DirtyFields,
        distance: f32,
    ) -> f32 {
        let w = &self.weights;

        let speed = entity.state.velocity.length();
        let velocity = if w.velocity_reference > 0.0 {
            1.0 + (speed / w.velocity_reference).min(1.0)
        } else {
            1.0
        };
        let health = if pending.contains(DirtyFields::HEALTH) {
            w.health_changed
        } else {
            1.0
        };
        let ownership = if entity.owner == Some(viewer.peer) {
            w.owned
        } else {
            1.0
        };
        let combat = if entity.in_combat { w.combat } else { 1.0 };

        self.distance_weight(distance) * velocity * health * ownership * combat
    }

    /// Builds one batch per viewer, then clears every dirty bit that at least
    /// one batch carried. Viewers that skipped a candidate keep its fields in
    /// their backlog. Removals repeat for `removal_repeat_ticks` frames.
    pub fn collect(
        &self,
        registry: &mut EntityRegistry,
        viewers: &mut [Viewer],
        encoder: &DeltaEncoder,
    ) -> Vec<ViewerBatch> {
        let ids = registry.ids();
        let mut sent_bits: HashMap<EntityId, DirtyFields> = HashMap::new();
        let mut priorities: HashMap<EntityId, f32> = HashMap::new();
        let mut batches = Vec::with_capacity(viewers.len());

        for viewer in viewers.iter_mut() {
            let mut batch = ViewerBatch {
                peer: viewer.peer,
                ..Default::default()
            };

            viewer.ticks_since_resync += 1;
            let resync = self.full_resync_interval > 0
                && viewer.ticks_since_resync >= self.full_resync_interval;
            if resync {
                viewer.ticks_since_resync = 0;
            }

            for &id in registry.removed_this_tick() {
                viewer.depart(id, self.removal_repeat_ticks);
            }
            let vanished: Vec<EntityId> = viewer
                .visible
                .iter()
                .copied()
                .filter(|&id| !registry.contains(id))
                .collect();
            for id in vanished {
                viewer.depart(id, self.removal_repeat_ticks);
            }

            let mut candidates = Vec::new();
            for &id in &ids {
                let Some(entity) = registry.get(id) else {
                    continue;
                };

                let distance = viewer.position.distance(entity.state.position);
                if distance > self.culling_distance {
                    viewer.depart(id, self.removal_repeat_ticks);
                    continue;
                }

                let pending = entity.dirty | viewer.backlog(id);
                let first_sync = !viewer.visible.contains(&id);
                let mask = if first_sync || resync {
                    DirtyFields::all()
                } else {
                    pending
                };
                if mask.is_empty() {
                    continue;
                }

                candidates.push(Candidate {
                    id,
                    mask,
                    priority: self.priority(entity, viewer, pending, distance),
                    first_sync,
                });
            }

            candidates.sort_by(|a, b| {
                b.priority
                    .partial_cmp(&a.priority)
                    .unwrap_or(Ordering::Equal)
                    .then(a.id.cmp(&b.id))
            });

            for (rank, candidate) in candidates.into_iter().enumerate() {
                let Some(entity) = registry.get(candidate.id) else {
                    continue;
                };

                let best = priorities.entry(candidate.id).or_insert(0.0);
                *best = best.max(candidate.priority);

                if rank < self.max_updates_per_tick {
                    batch
                        .updates
                        .push(encoder.build_update(entity, candidate.mask, candidate.priority));
                    *sent_bits.entry(candidate.id).or_default() |= entity.dirty & candidate.mask;
                    viewer.visible.insert(candidate.id);
                    viewer.backlog.remove(&candidate.id);
                    viewer.departing.remove(&candidate.id);
                } else if !candidate.first_sync {
                    viewer.backlog.insert(candidate.id, candidate.mask);
                }
            }

            batch.removed = viewer.take_removals(self.max_removals_per_tick);

            log::trace!(
                "Viewer {}: {} updates, {} removed",
                viewer.peer,
                batch.updates.len(),
                batch.removed.len()
            );
            batches.push(batch);
        }

        for (id, bits) in sent_bits {
            registry.clear_dirty(id, bits);
        }
        for (id, priority) in priorities {
            registry.set_priority(id, priority);
        }

        batches
    }

    pub fn requeue(&self, viewer: &mut Viewer, batch: &ViewerBatch) {
        for update in &batch.updates {
            if viewer.visible.contains(&update.entity_id) {
                *viewer.backlog.entry(update.entity_id).or_default() |= update.fields.mask();
            }
        }
        for &id in &batch.removed {
            if !viewer.visible.contains(&id) {
                viewer.departing.insert(id, self.removal_repeat_ticks);
            }
        }
    }
}
