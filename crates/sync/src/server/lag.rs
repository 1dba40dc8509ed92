use std::collections::{HashMap, VecDeque};

use glam::Vec3;

use crate::config::SyncConfig;
use crate::state::{EntityId, EntityRegistry};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    Exact,
    Interpolated,
    Clamped,
    BestEffort,
}

#[derive(Debug, Clone)]
pub struct LagCompensationFrame {
    pub timestamp: f64,
    pub positions: HashMap<EntityId, Vec3>,
}

#[derive(Debug, Clone)]
pub struct Rewind {
    pub requested: f64,
    pub positions: HashMap<EntityId, Vec3>,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HitCheck {
    pub hit: bool,
    pub confidence: Confidence,
    pub distance: f32,
}

#[derive(Debug)]
pub struct LagCompensator {
    frames: VecDeque<LagCompensationFrame>,
    capacity: usize,
    enabled: bool,
}

impl LagCompensator {
    pub fn new(window: f64, tick_period: f64, enabled: bool) -> Self {
        let capacity = if enabled && tick_period > 0.0 {
            (window / tick_period).ceil() as usize + 1
        } else {
            1
        };
        Self {
            frames: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            enabled,
        }
    }

    pub fn from_config(config: &SyncConfig) -> Self {
        Self::new(
            config.lag_compensation_window,
            config.network_tick_period(),
            config.enable_lag_compensation,
        )
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn oldest_timestamp(&self) -> Option<f64> {
        self.frames.front().map(|f| f.timestamp)
    }

    pub fn newest_timestamp(&self) -> Option<f64> {
        self.frames.back().map(|f| f.timestamp)
    }

    pub fn record(&mut self, now: f64, registry: &EntityRegistry) {
        let positions = registry
            .iter()
            .map(|e| (e.id, e.state.position))
            .collect();
        self.push(LagCompensationFrame {
            timestamp: now,
            positions,
        });
    }

    pub fn push(&mut self, frame: LagCompensationFrame) {
        if self
            .frames
            .back()
            .is_some_and(|last| frame.timestamp <= last.timestamp)
        {
            self.frames.pop_back();
        }
        while self.frames.len() >= self.capacity {
            self.frames.pop_front();
        }
        self.frames.push_back(frame);
    }

    pub fn rewind(&self, timestamp: f64) -> Option<Rewind> {
        let oldest = self.frames.front()?;
        let newest = self.frames.back()?;

        let snap = |frame: &LagCompensationFrame, confidence| Rewind {
            requested: timestamp,
            positions: frame.positions.clone(),
            confidence,
        };
        let exact_or = |frame: &LagCompensationFrame, otherwise| {
            if frame.timestamp == timestamp {
                Confidence::Exact
            } else {
                otherwise
            }
        };

        if !self.enabled || timestamp >= newest.timestamp {
            return Some(snap(newest, exact_or(newest, Confidence::Clamped)));
        }
        if timestamp <= oldest.timestamp {
            return Some(snap(oldest, exact_or(oldest, Confidence::BestEffort)));
        }

        let next = self
            .frames
            .iter()
            .position(|f| f.timestamp >= timestamp)?;
        let after = &self.frames[next];
        if after.timestamp == timestamp {
            return Some(snap(after, Confidence::Exact));
        }
        let before = &self.frames[next - 1];

        let t = ((timestamp - before.timestamp) / (after.timestamp - before.timestamp)) as f32;
        let mut positions = before.positions.clone();
        for (&id, &to) in &after.positions {
            let blended = match before.positions.get(&id) {
                Some(&from) => from.lerp(to, t),
                None => to,
            };
            positions.insert(id, blended);
        }

        Some(Rewind {
            requested: timestamp,
            positions,
            confidence: Confidence::Interpolated,
        })
    }

    pub fn position_at(&self, id: EntityId, timestamp: f64) -> Option<(Vec3, Confidence)> {
        let rewind = self.rewind(timestamp)?;
        rewind
            .positions
            .get(&id)
            .map(|&position| (position, rewind.confidence))
    }

    /// Checks `point` against where `target` was at `timestamp`. `None` when the
    /// target is unknown at that time.
    pub fn validate_hit(
        &self,
        target: EntityId,
        timestamp: f64,
        point: Vec3,
        radius: f32,
    ) -> Option<HitCheck> {
        let (position, confidence) = self.position_at(target, timestamp)?;
        let distance = position.distance(point);
        Some(HitCheck {
            hit: distance <= radius,
            confidence,
            distance,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PERIOD: f64 = 0.033;

    fn moving_history(ticks: u64) -> LagCompensator {
        let mut lag = LagCompensator::new(3.0, PERIOD, true);
        for k in 0..=ticks {
            let t = k as f64 * PERIOD;
            lag.push(LagCompensationFrame {
                timestamp: t,
                positions: HashMap::from([(1, Vec3::new(t as f32 * 10.0, 0.0, 0.0))]),
            });
        }
        lag
    }

    #[test]
    fn capacity_covers_window() {
        let lag = moving_history(200);
        assert_eq!(lag.capacity(), 92);
        assert_eq!(lag.len(), 92);
    }

    #[test]
    fn rewind_half_second_interpolates() {
        let lag = moving_history(120);
        let now = lag.newest_timestamp().unwrap();
        let rewind = lag.rewind(now - 0.5).unwrap();

        assert_eq!(rewind.confidence, Confidence::Interpolated);
        let x = rewind.positions[&1].x;
        let expected = ((now - 0.5) * 10.0) as f32;
        assert!((x - expected).abs() < 1e-3, "x={x} expected={expected}");

        let before = (((now - 0.5) / PERIOD).floor() * PERIOD * 10.0) as f32;
        assert!(x > before);
    }

    #[test]
    fn rewind_on_recorded_frame_is_exact() {
        let lag = moving_history(50);
        let frame = &lag.frames[20];
        let rewind = lag.rewind(frame.timestamp).unwrap();

        assert_eq!(rewind.confidence, Confidence::Exact);
        assert_eq!(rewind.positions, frame.positions);
    }

    #[test]
    fn before_window_is_best_effort() {
        let lag = moving_history(200);
        let oldest = lag.oldest_timestamp().unwrap();
        let rewind = lag.rewind(oldest - 1.0).unwrap();

        assert_eq!(rewind.confidence, Confidence::BestEffort);
        assert_eq!(rewind.positions, lag.frames[0].positions);
    }

    #[test]
    fn after_newest_is_clamped() {
        let lag = moving_history(10);
        let newest = lag.newest_timestamp().unwrap();
        let (position, confidence) = lag.position_at(1, newest + 0.2).unwrap();

        assert_eq!(confidence, Confidence::Clamped);
        assert_eq!(position, lag.frames.back().unwrap().positions[&1]);
    }

    #[test]
    fn validate_hit_uses_past_position() {
        let lag = moving_history(60);
        let t = 30.0 * PERIOD;
        let past = (t * 10.0) as f32;

        let hit = lag.validate_hit(1, t, Vec3::new(past + 0.2, 0.0, 0.0), 0.5).unwrap();
        assert!(hit.hit);
        assert_eq!(hit.confidence, Confidence::Exact);

        let current = lag.validate_hit(1, t, Vec3::new(19.8, 0.0, 0.0), 0.5).unwrap();
        assert!(!current.hit);
        assert!(lag.validate_hit(42, t, Vec3::ZERO, 1.0).is_none());
    }

    #[test]
    fn disabled_uses_current_positions() {
        let mut lag = LagCompensator::new(3.0, PERIOD, false);
        for k in 0..10 {
            let t = k as f64 * PERIOD;
            lag.push(LagCompensationFrame {
                timestamp: t,
                positions: HashMap::from([(1, Vec3::splat(k as f32))]),
            });
        }
        assert_eq!(lag.len(), 1);
        let (position, _) = lag.position_at(1, 0.0).unwrap();
        assert_eq!(position, Vec3::splat(9.0));
    }
}
