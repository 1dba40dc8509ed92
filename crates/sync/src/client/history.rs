use std::collections::{HashMap, VecDeque};

use crate::config::SyncConfig;
use crate::state::{EntityId, NetworkedState};

const TIME_CORRECTION_RATE: f64 = 0.1;
const CLOCK_SNAP_THRESHOLD: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntitySnapshot {
    pub timestamp: f64,
    pub state: NetworkedState,
}

#[derive(Debug, Clone)]
pub struct SnapshotHistory {
    snapshots: VecDeque<EntitySnapshot>,
    capacity: usize,
}

impl SnapshotHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            snapshots: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, snapshot: EntitySnapshot) -> bool {
        if self
            .snapshots
            .back()
            .is_some_and(|last| snapshot.timestamp <= last.timestamp)
        {
            return false;
        }
        while self.snapshots.len() >= self.capacity {
            self.snapshots.pop_front();
        }
        self.snapshots.push_back(snapshot);
        true
    }

    pub fn oldest(&self) -> Option<&EntitySnapshot> {
        self.snapshots.front()
    }

    pub fn newest(&self) -> Option<&EntitySnapshot> {
        self.snapshots.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EntitySnapshot> {
        self.snapshots.iter()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Snapshots `(a, b)` with `a.timestamp <= t <= b.timestamp`.
    pub fn bracket(&self, t: f64) -> Option<(&EntitySnapshot, &EntitySnapshot)> {
        let next = self.snapshots.iter().position(|s| s.timestamp >= t)?;
        if next == 0 {
            return None;
        }
        Some((&self.snapshots[next - 1], &self.snapshots[next]))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleMode {
    Interpolated,
    HeldOldest,
    HeldNewest,
    Extrapolated,
    Raw,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub state: NetworkedState,
    pub mode: SampleMode,
    pub render_time: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ServerClock {
    offset: Option<f64>,
}

impl ServerClock {
    pub fn observe(&mut self, server_time: f64, local_now: f64) {
        let sample = server_time - local_now;
        self.offset = Some(match self.offset {
            Some(offset) if (sample - offset).abs() < CLOCK_SNAP_THRESHOLD => {
                offset + (sample - offset) * TIME_CORRECTION_RATE
            }
            _ => sample,
        });
    }

    pub fn offset(&self) -> Option<f64> {
        self.offset
    }

    pub fn server_now(&self, local_now: f64) -> Option<f64> {
        self.offset.map(|offset| local_now + offset)
    }

    pub fn reset(&mut self) {
        self.offset = None;
    }
}

#[derive(Debug)]
pub struct Interpolator {
    histories: HashMap<EntityId, SnapshotHistory>,
    capacity: usize,
    delay: f64,
    interpolation: bool,
    extrapolation: bool,
    max_extrapolation: f64,
    clock: ServerClock,
}

impl Interpolator {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            histories: HashMap::new(),
            capacity: config.snapshot_history_capacity,
            delay: config.interpolation_delay(),
            interpolation: config.enable_interpolation,
            extrapolation: config.enable_extrapolation,
            max_extrapolation: config.max_extrapolation,
            clock: ServerClock::default(),
        }
    }

    pub fn delay(&self) -> f64 {
        self.delay
    }

    pub fn clock(&self) -> &ServerClock {
        &self.clock
    }

    pub fn observe_server_time(&mut self, server_time: f64, local_now: f64) {
        self.clock.observe(server_time, local_now);
    }

    pub fn render_time(&self, local_now: f64) -> Option<f64> {
        self.clock
            .server_now(local_now)
            .map(|server_now| server_now - self.delay)
    }

    pub fn push(&mut self, id: EntityId, timestamp: f64, state: NetworkedState) -> bool {
        let capacity = self.capacity;
        self.histories
            .entry(id)
            .or_insert_with(|| SnapshotHistory::new(capacity))
            .push(EntitySnapshot { timestamp, state })
    }

    pub fn remove(&mut self, id: EntityId) {
        self.histories.remove(&id);
    }

    pub fn history(&self, id: EntityId) -> Option<&SnapshotHistory> {
        self.histories.get(&id)
    }

    pub fn entity_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.histories.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn sample(&self, id: EntityId, local_now: f64) -> Option<Sample> {
        let render_time = self.render_time(local_now)?;
        self.sample_at(id, render_time)
    }

    pub fn sample_at(&self, id: EntityId, render_time: f64) -> Option<Sample> {
        let history = self.histories.get(&id)?;
        let oldest = history.oldest()?;
        let newest = history.newest()?;

        let sample = |state, mode| Sample {
            state,
            mode,
            render_time,
        };

        if !self.interpolation {
            return Some(sample(newest.state, SampleMode::Raw));
        }

        if render_time <= oldest.timestamp {
            let mode = if render_time == oldest.timestamp {
                SampleMode::Interpolated
            } else {
                SampleMode::HeldOldest
            };
            return Some(sample(oldest.state, mode));
        }

        if render_time >= newest.timestamp {
            let ahead = render_time - newest.timestamp;
            if ahead == 0.0 {
                return Some(sample(newest.state, SampleMode::Interpolated));
            }
            if self.extrapolation && ahead <= self.max_extrapolation {
                let mut state = newest.state;
                state.position += state.velocity * ahead as f32;
                return Some(sample(state, SampleMode::Extrapolated));
            }
            return Some(sample(newest.state, SampleMode::HeldNewest));
        }

        let (from, to) = history.bracket(render_time)?;
        if to.timestamp == render_time {
            return Some(sample(to.state, SampleMode::Interpolated));
        }

        let span = to.timestamp - from.timestamp;
        let t = ((render_time - from.timestamp) / span).clamp(0.0, 1.0) as f32;
        Some(sample(from.state.lerp(&to.state, t), SampleMode::Interpolated))
    }

    pub fn sample_all(&self, local_now: f64) -> Vec<(EntityId, Sample)> {
        let Some(render_time) = self.render_time(local_now) else {
            return Vec::new();
        };
        self.entity_ids()
            .into_iter()
            .filter_map(|id| self.sample_at(id, render_time).map(|s| (id, s)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.histories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.histories.is_empty()
    }

    pub fn clear(&mut self) {
        self.histories.clear();
        self.clock.reset();
    }
}
