use std::collections::{HashMap, VecDeque};

use crate::codec::DecodedFrame;
use crate::transport::PeerId;

const UPDATE_WINDOW_SECS: f64 = 1.0;

/// Smoothed round-trip estimate in milliseconds (RFC 6298 gains).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RttEstimator {
    srtt: f32,
    rtt_var: f32,
    samples: u64,
}

impl Default for RttEstimator {
    fn default() -> Self {
        Self::new()
    }
}

impl RttEstimator {
    const ALPHA: f32 = 0.125;
    const BETA: f32 = 0.25;

    pub fn new() -> Self {
        Self {
            srtt: 100.0,
            rtt_var: 50.0,
            samples: 0,
        }
    }

    pub fn record(&mut self, rtt_ms: f32) {
        if !rtt_ms.is_finite() || rtt_ms < 0.0 {
            return;
        }
        if self.samples == 0 {
            self.srtt = rtt_ms;
            self.rtt_var = rtt_ms / 2.0;
        } else {
            let diff = (rtt_ms - self.srtt).abs();
            self.rtt_var = (1.0 - Self::BETA) * self.rtt_var + Self::BETA * diff;
            self.srtt = (1.0 - Self::ALPHA) * self.srtt + Self::ALPHA * rtt_ms;
        }
        self.samples += 1;
    }

    pub fn srtt(&self) -> f32 {
        self.srtt
    }

    pub fn rtt_var(&self) -> f32 {
        self.rtt_var
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }
}

#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub updates_sent: u64,
    pub updates_received: u64,
    pub raw_bytes: u64,
    pub encoded_bytes: u64,
    pub stale_dropped: u64,
    pub malformed_dropped: u64,
    pub send_failures: u64,
    pings: HashMap<PeerId, RttEstimator>,
    recent_updates: VecDeque<(f64, u64)>,
}

impl SyncStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sent(&mut self, encoded: usize, raw: usize, updates: usize, now: f64) {
        self.packets_sent += 1;
        self.bytes_sent += encoded as u64;
        self.encoded_bytes += encoded as u64;
        self.raw_bytes += raw as u64;
        self.updates_sent += updates as u64;
        self.push_updates(updates as u64, now);
    }

    pub fn record_control_sent(&mut self, bytes: usize) {
        self.packets_sent += 1;
        self.bytes_sent += bytes as u64;
    }

    pub fn record_received(&mut self, bytes: usize) {
        self.packets_received += 1;
        self.bytes_received += bytes as u64;
    }

    pub fn record_decoded(&mut self, decoded: &DecodedFrame, now: f64) {
        let updates = decoded.applied.len() as u64;
        self.updates_received += updates;
        self.stale_dropped += decoded.stale as u64;
        self.malformed_dropped += decoded.malformed as u64;
        self.push_updates(updates, now);
    }

    pub fn record_malformed(&mut self) {
        self.malformed_dropped += 1;
    }

    pub fn record_send_failure(&mut self) {
        self.send_failures += 1;
    }

    pub fn record_rtt(&mut self, peer: PeerId, rtt_ms: f32) {
        self.pings.entry(peer).or_default().record(rtt_ms);
    }

    pub fn rtt(&self, peer: PeerId) -> Option<&RttEstimator> {
        self.pings.get(&peer).filter(|r| r.samples() > 0)
    }

    pub fn ping_ms(&self, peer: PeerId) -> Option<f32> {
        self.rtt(peer).map(RttEstimator::srtt)
    }

    pub fn forget_peer(&mut self, peer: PeerId) {
        self.pings.remove(&peer);
    }

    /// Raw-equivalent bytes over encoded bytes. 1.0 until something is sent.
    pub fn compression_ratio(&self) -> f32 {
        if self.encoded_bytes == 0 {
            return 1.0;
        }
        self.raw_bytes as f32 / self.encoded_bytes as f32
    }

    pub fn update_frequency(&self, now: f64) -> f64 {
        let since = now - UPDATE_WINDOW_SECS;
        let total: u64 = self
            .recent_updates
            .iter()
            .filter(|(t, _)| *t > since)
            .map(|(_, n)| n)
            .sum();
        total as f64 / UPDATE_WINDOW_SECS
    }

    fn push_updates(&mut self, count: u64, now: f64) {
        self.recent_updates.push_back((now, count));
        let since = now - UPDATE_WINDOW_SECS;
        while self.recent_updates.front().is_some_and(|(t, _)| *t <= since) {
            self.recent_updates.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_rtt_sample_seeds_estimate() {
        let mut rtt = RttEstimator::new();
        rtt.record(80.0);
        assert_eq!(rtt.srtt(), 80.0);
        assert_eq!(rtt.rtt_var(), 40.0);

        rtt.record(160.0);
        assert!((rtt.srtt() - 90.0).abs() < 1e-4);
        assert!((rtt.rtt_var() - 50.0).abs() < 1e-4);
    }

    #[test]
    fn ping_unknown_until_sampled() {
        let mut stats = SyncStats::new();
        assert_eq!(stats.ping_ms(3), None);
        stats.record_rtt(3, 42.0);
        assert_eq!(stats.ping_ms(3), Some(42.0));

        stats.forget_peer(3);
        assert_eq!(stats.ping_ms(3), None);
    }

    #[test]
    fn compression_ratio_is_raw_over_encoded() {
        let mut stats = SyncStats::new();
        assert_eq!(stats.compression_ratio(), 1.0);

        stats.record_sent(100, 400, 10, 0.0);
        assert_eq!(stats.compression_ratio(), 4.0);
    }

    #[test]
    fn update_frequency_uses_sliding_window() {
        let mut stats = SyncStats::new();
        stats.record_sent(10, 10, 5, 0.0);
        stats.record_sent(10, 10, 5, 0.5);
        stats.record_sent(10, 10, 5, 1.2);

        assert_eq!(stats.update_frequency(1.2), 10.0);
        assert_eq!(stats.update_frequency(3.0), 0.0);
    }
}
