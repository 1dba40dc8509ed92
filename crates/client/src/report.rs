use std::collections::VecDeque;

use netsync::ClientEvent;

const SAMPLE_COUNT: usize = 60;

/// Session counters logged periodically by the bot.
#[derive(Debug, Default)]
pub struct SessionReport {
    pub appeared: u64,
    pub removed: u64,
    pub corrections: u64,
    pub largest_correction: f32,
    pub dropped_payloads: u64,
    tick_times: VecDeque<f64>,
    tick_rate: f64,
}

impl SessionReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_event(&mut self, event: &ClientEvent) {
        match event {
            ClientEvent::EntityAppeared(_) => self.appeared += 1,
            ClientEvent::EntityRemoved(_) => self.removed += 1,
            ClientEvent::Corrected { error, .. } => {
                self.corrections += 1;
                self.largest_correction = self.largest_correction.max(error.length());
            }
            ClientEvent::PayloadDropped(_) => self.dropped_payloads += 1,
            ClientEvent::Connected | ClientEvent::Disconnected => {}
        }
    }

    pub fn record_tick(&mut self, now: f64) {
        if self.tick_times.len() >= SAMPLE_COUNT {
            self.tick_times.pop_front();
        }
        self.tick_times.push_back(now);

        if let (Some(oldest), true) = (self.tick_times.front(), self.tick_times.len() >= 2) {
            let elapsed = now - oldest;
            if elapsed > 0.0 {
                self.tick_rate = (self.tick_times.len() - 1) as f64 / elapsed;
            }
        }
    }

    pub fn tick_rate(&self) -> f64 {
        self.tick_rate
    }
}
