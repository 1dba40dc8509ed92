use std::collections::VecDeque;

use glam::Vec3;

use crate::codec::{Command, InputMessage};

/// Input sampled on one local tick.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LocalInput {
    pub frame: u64,
    pub timestamp: f64,
    pub movement: Vec3,
    pub commands: Vec<Command>,
}

impl LocalInput {
    pub fn to_message(&self) -> InputMessage {
        InputMessage {
            frame: self.frame,
            client_time: self.timestamp,
            movement: (self.movement != Vec3::ZERO).then(|| self.movement.to_array()),
            commands: self.commands.clone(),
        }
    }
}

/// Numbers local inputs and keeps those the server has not acknowledged yet.
#[derive(Debug)]
pub struct InputBuffer {
    unacked: VecDeque<LocalInput>,
    capacity: usize,
    next_frame: u64,
    last_acked: Option<u64>,
}

impl InputBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            unacked: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            next_frame: 1,
            last_acked: None,
        }
    }

    pub fn record(&mut self, movement: Vec3, commands: Vec<Command>, now: f64) -> LocalInput {
        let input = LocalInput {
            frame: self.next_frame,
            timestamp: now,
            movement,
            commands,
        };
        self.next_frame += 1;

        while self.unacked.len() >= self.capacity {
            self.unacked.pop_front();
        }
        self.unacked.push_back(input.clone());
        input
    }

    pub fn acknowledge(&mut self, frame: u64) {
        if self.last_acked.is_some_and(|last| frame <= last) {
            return;
        }
        self.last_acked = Some(frame);
        while self.unacked.front().is_some_and(|i| i.frame <= frame) {
            self.unacked.pop_front();
        }
    }

    pub fn last_acked(&self) -> Option<u64> {
        self.last_acked
    }

    pub fn current_frame(&self) -> u64 {
        self.next_frame.saturating_sub(1)
    }

    pub fn unacked(&self) -> impl Iterator<Item = &LocalInput> {
        self.unacked.iter()
    }

    pub fn unacked_count(&self) -> usize {
        self.unacked.len()
    }
}
