use std::collections::VecDeque;

use glam::Vec3;

use crate::config::SyncConfig;
use crate::state::NetworkedState;

use super::input::LocalInput;

const OFFSET_EPSILON: f32 = 1e-4;

pub trait MotionModel {
    fn step(&self, state: &NetworkedState, input: &LocalInput, dt: f32) -> NetworkedState;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearMotion {
    pub speed: f32,
}

impl Default for LinearMotion {
    fn default() -> Self {
        Self { speed: 5.0 }
    }
}

impl MotionModel for LinearMotion {
    fn step(&self, state: &NetworkedState, input: &LocalInput, dt: f32) -> NetworkedState {
        let movement = input.movement.clamp_length_max(1.0);
        let mut next = *state;
        next.velocity = movement * self.speed;
        next.position += next.velocity * dt;
        if movement.x != 0.0 || movement.z != 0.0 {
            next.rotation = movement.x.atan2(movement.z);
        }
        next
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionFrame {
    pub frame: u64,
    pub timestamp: f64,
    pub state: NetworkedState,
    pub input: LocalInput,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reconciliation {
    Confirmed,
    Corrected {
        frame: u64,
        error: Vec3,
        replayed: usize,
    },
    Unmatched,
    Stale,
    PassThrough,
}

#[derive(Debug)]
pub struct Predictor<M> {
    model: M,
    frames: VecDeque<PredictionFrame>,
    capacity: usize,
    tolerance: f32,
    smoothing_rate: f32,
    snap_distance: f32,
    dt: f32,
    enabled: bool,
    state: NetworkedState,
    visual_offset: Vec3,
    last_reconciled: Option<u64>,
    initialized: bool,
}

impl<M: MotionModel> Predictor<M> {
    pub fn new(config: &SyncConfig, model: M) -> Self {
        Self {
            model,
            frames: VecDeque::with_capacity(config.prediction_buffer_depth),
            capacity: config.prediction_buffer_depth.max(1),
            tolerance: config.prediction_tolerance,
            smoothing_rate: config.prediction_smoothing_rate,
            snap_distance: config.prediction_snap_distance,
            dt: config.client_tick_period() as f32,
            enabled: config.enable_prediction,
            state: NetworkedState::default(),
            visual_offset: Vec3::ZERO,
            last_reconciled: None,
            initialized: false,
        }
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn state(&self) -> &NetworkedState {
        &self.state
    }

    pub fn visual_state(&self) -> NetworkedState {
        let mut visual = self.state;
        visual.position += self.visual_offset;
        visual
    }

    pub fn visual_offset(&self) -> Vec3 {
        self.visual_offset
    }

    pub fn pending_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn frames(&self) -> impl Iterator<Item = &PredictionFrame> {
        self.frames.iter()
    }

    pub fn reset(&mut self, state: NetworkedState) {
        self.state = state;
        self.frames.clear();
        self.visual_offset = Vec3::ZERO;
        self.last_reconciled = None;
        self.initialized = true;
    }

    pub fn predict(&mut self, input: LocalInput) -> NetworkedState {
        if !self.enabled {
            return self.state;
        }

        self.state = self.model.step(&self.state, &input, self.dt);

        while self.frames.len() >= self.capacity {
            if let Some(evicted) = self.frames.pop_front() {
                log::trace!("Evicting unreconciled prediction frame {}", evicted.frame);
            }
        }
        self.frames.push_back(PredictionFrame {
            frame: input.frame,
            timestamp: input.timestamp,
            state: self.state,
            input,
        });

        self.state
    }

    /// Compares the authoritative state after input `frame` with what was
    /// predicted for it. Out of tolerance, the logical state snaps and every
    /// newer input is replayed on top.
    pub fn reconcile(&mut self, frame: u64, authoritative: &NetworkedState) -> Reconciliation {
        if !self.enabled {
            self.state = *authoritative;
            self.initialized = true;
            return Reconciliation::PassThrough;
        }
        if self.last_reconciled.is_some_and(|last| frame <= last) {
            return Reconciliation::Stale;
        }
        self.last_reconciled = Some(frame);

        let predicted = self
            .frames
            .iter()
            .find(|f| f.frame == frame)
            .map(|f| f.state);
        while self.frames.front().is_some_and(|f| f.frame <= frame) {
            self.frames.pop_front();
        }

        let Some(predicted) = predicted else {
            return Reconciliation::Unmatched;
        };

        // Server-owned fields are taken regardless of position agreement.
        self.state.health = authoritative.health;
        for f in &mut self.frames {
            f.state.health = authoritative.health;
        }

        let error = authoritative.position - predicted.position;
        if error.length() <= self.tolerance {
            return Reconciliation::Confirmed;
        }

        let before = self.state.position;
        let mut replayed_state = *authoritative;
        for f in &mut self.frames {
            replayed_state = self.model.step(&replayed_state, &f.input, self.dt);
            f.state = replayed_state;
        }
        self.state = replayed_state;

        let correction = self.state.position - before;
        if self.smoothing_rate <= 0.0 || correction.length() > self.snap_distance {
            self.visual_offset = Vec3::ZERO;
        } else {
            self.visual_offset -= correction;
        }

        log::debug!(
            "Prediction corrected at frame {}: error {:.3}, replayed {}",
            frame,
            error.length(),
            self.frames.len()
        );

        Reconciliation::Corrected {
            frame,
            error,
            replayed: self.frames.len(),
        }
    }

    pub fn update(&mut self, dt: f32) {
        if self.smoothing_rate <= 0.0 {
            self.visual_offset = Vec3::ZERO;
            return;
        }
        self.visual_offset *= (-self.smoothing_rate * dt).exp();
        if self.visual_offset.length() < OFFSET_EPSILON {
            self.visual_offset = Vec3::ZERO;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(tolerance: f32) -> SyncConfig {
        SyncConfig {
            client_tick_rate: 10,
            prediction_tolerance: tolerance,
            ..Default::default()
        }
    }

    fn run(predictor: &mut Predictor<LinearMotion>, frames: std::ops::RangeInclusive<u64>) {
        for frame in frames {
            predictor.predict(LocalInput {
                frame,
                timestamp: frame as f64 * 0.1,
                movement: Vec3::X,
                commands: Vec::new(),
            });
        }
    }

    fn at(x: f32) -> NetworkedState {
        NetworkedState::new(Vec3::new(x, 0.0, 0.0), 0.0, Vec3::new(5.0, 0.0, 0.0), 100.0)
    }

    fn predictor(tolerance: f32) -> Predictor<LinearMotion> {
        let mut predictor = Predictor::new(&config(tolerance), LinearMotion { speed: 5.0 });
        predictor.reset(NetworkedState::new(Vec3::ZERO, 0.0, Vec3::ZERO, 100.0));
        predictor
    }

    #[test]
    fn linear_motion_reaches_target() {
        let mut predictor = predictor(0.05);
        run(&mut predictor, 1..=10);
        assert_eq!(predictor.state().position, Vec3::new(5.0, 0.0, 0.0));
        assert_eq!(predictor.pending_frames(), 10);
    }

    #[test]
    fn matching_update_confirms_without_snap() {
        let mut predictor = predictor(0.05);
        run(&mut predictor, 1..=10);

        let result = predictor.reconcile(10, &at(5.0));
        assert_eq!(result, Reconciliation::Confirmed);
        assert_eq!(predictor.visual_offset(), Vec3::ZERO);
        assert_eq!(predictor.visual_state().position, Vec3::new(5.0, 0.0, 0.0));
        assert_eq!(predictor.pending_frames(), 0);
    }

    #[test]
    fn divergent_update_snaps_and_replays() {
        let mut predictor = predictor(0.05);
        run(&mut predictor, 1..=13);

        let result = predictor.reconcile(10, &at(4.5));
        match result {
            Reconciliation::Corrected {
                frame,
                error,
                replayed,
            } => {
                assert_eq!(frame, 10);
                assert!((error.x + 0.5).abs() < 1e-5);
                assert_eq!(replayed, 3);
            }
            other => panic!("Expected correction, got {:?}", other),
        }

        assert!((predictor.state().position.x - 6.0).abs() < 1e-5);
        let frames: Vec<u64> = predictor.frames().map(|f| f.frame).collect();
        assert_eq!(frames, vec![11, 12, 13]);

        // Visual starts where the old prediction was and converges.
        assert!((predictor.visual_state().position.x - 6.5).abs() < 1e-5);
        predictor.update(0.05);
        let x = predictor.visual_state().position.x;
        assert!(x > 6.0 && x < 6.5);
    }

    #[test]
    fn large_correction_is_not_smoothed() {
        let mut predictor = predictor(0.05);
        run(&mut predictor, 1..=10);
        predictor.reconcile(10, &at(0.0));
        assert_eq!(predictor.visual_offset(), Vec3::ZERO);
        assert_eq!(predictor.state().position.x, 0.0);
    }

    #[test]
    fn older_frames_are_stale() {
        let mut predictor = predictor(0.05);
        run(&mut predictor, 1..=10);
        predictor.reconcile(8, &at(4.0));
        assert_eq!(predictor.reconcile(7, &at(3.5)), Reconciliation::Stale);
        assert_eq!(predictor.reconcile(8, &at(4.0)), Reconciliation::Stale);
    }

    #[test]
    fn buffer_evicts_oldest() {
        let mut config = config(0.05);
        config.prediction_buffer_depth = 4;
        let mut predictor = Predictor::new(&config, LinearMotion::default());
        predictor.reset(NetworkedState::default());
        run(&mut predictor, 1..=10);

        assert_eq!(predictor.pending_frames(), 4);
        assert_eq!(predictor.reconcile(3, &at(1.5)), Reconciliation::Unmatched);
    }

    #[test]
    fn disabled_predictor_passes_through() {
        let config = SyncConfig {
            enable_prediction: false,
            ..Default::default()
        };
        let mut predictor = Predictor::new(&config, LinearMotion::default());
        predictor.predict(LocalInput {
            frame: 1,
            movement: Vec3::X,
            ..Default::default()
        });
        assert_eq!(predictor.state().position, Vec3::ZERO);

        assert_eq!(predictor.reconcile(1, &at(2.0)), Reconciliation::PassThrough);
        assert_eq!(predictor.state(), &at(2.0));
    }
}
