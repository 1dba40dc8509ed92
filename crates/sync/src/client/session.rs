use glam::Vec3;

use crate::codec::{Command, DecodedFrame, Packet, PacketType, ShadowRegistry, StateFrame};
use crate::config::{ConfigError, SyncConfig};
use crate::event::{ClientEvent, EventQueue};
use crate::state::{EntityId, NetworkedMut, NetworkedState};
use crate::stats::SyncStats;
use crate::transport::{Channel, Inbox, Incoming, SERVER_PEER, Transport};

use super::history::{Interpolator, Sample};
use super::input::{InputBuffer, LocalInput};
use super::prediction::{LinearMotion, MotionModel, Predictor, Reconciliation};

pub struct SyncClient<T: Transport, M: MotionModel = LinearMotion> {
    config: SyncConfig,
    transport: T,
    inbox: Inbox,
    shadow: ShadowRegistry,
    interpolator: Interpolator,
    predictor: Predictor<M>,
    inputs: InputBuffer,
    controlled: Option<EntityId>,
    stats: SyncStats,
    events: EventQueue<ClientEvent>,
    connected: bool,
    last_ping: Option<f64>,
}

impl<T: Transport> SyncClient<T, LinearMotion> {
    pub fn new(config: SyncConfig, transport: T) -> Result<Self, ConfigError> {
        Self::with_model(config, transport, LinearMotion::default())
    }
}

impl<T: Transport, M: MotionModel> SyncClient<T, M> {
    pub fn with_model(config: SyncConfig, transport: T, model: M) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            inbox: Inbox::new(),
            shadow: ShadowRegistry::new(),
            interpolator: Interpolator::new(&config),
            predictor: Predictor::new(&config, model),
            inputs: InputBuffer::new(config.command_buffer_capacity),
            controlled: None,
            stats: SyncStats::new(),
            events: EventQueue::default(),
            connected: false,
            last_ping: None,
            transport,
            config,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn shadow(&self) -> &ShadowRegistry {
        &self.shadow
    }

    pub fn interpolator(&self) -> &Interpolator {
        &self.interpolator
    }

    pub fn predictor(&self) -> &Predictor<M> {
        &self.predictor
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    pub fn controlled(&self) -> Option<EntityId> {
        self.controlled
    }

    pub fn drain_events(&mut self) -> Vec<ClientEvent> {
        self.events.drain()
    }

    pub fn set_controlled(&mut self, entity: Option<EntityId>) {
        if self.controlled == entity {
            return;
        }
        self.controlled = entity;
        match entity.and_then(|id| self.shadow.state(id).copied()) {
            Some(state) => self.predictor.reset(state),
            None => self.predictor.reset(NetworkedState::default()),
        }
    }

    pub fn receive(&mut self, now: f64) {
        if let Err(e) = self.transport.poll(&mut self.inbox) {
            log::warn!("Transport poll failed: {}", e);
        }

        while let Some(incoming) = self.inbox.pop() {
            match incoming {
                Incoming::Connected(_) => {
                    if !self.connected {
                        self.connected = true;
                        self.events.push(ClientEvent::Connected);
                        log::info!("Connected to server");
                    }
                }
                Incoming::Disconnected(_) => {
                    if self.connected {
                        self.connected = false;
                        self.shadow.clear();
                        self.interpolator.clear();
                        self.set_controlled(None);
                        self.events.push(ClientEvent::Disconnected);
                        log::info!("Disconnected from server");
                    }
                }
                Incoming::Payload { bytes, .. } => self.handle_payload(&bytes, now),
            }
        }
    }

    fn handle_payload(&mut self, bytes: &[u8], now: f64) {
        self.stats.record_received(bytes.len());

        let packet = match Packet::deserialize(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                log::debug!("Dropping payload: {}", e);
                self.stats.record_malformed();
                self.events.push(ClientEvent::PayloadDropped(e.to_string()));
                return;
            }
        };

        match packet.payload {
            PacketType::State(frame) => self.apply_frame(&frame, now),
            PacketType::Ping { sent_at } => self.send_control(PacketType::Pong { sent_at }),
            PacketType::Pong { sent_at } => {
                self.stats
                    .record_rtt(SERVER_PEER, ((now - sent_at) * 1000.0) as f32);
            }
            PacketType::Input(_) => log::debug!("Ignoring input packet from server"),
        }
    }

    fn apply_frame(&mut self, frame: &StateFrame, now: f64) {
        self.interpolator.observe_server_time(frame.server_time, now);

        let decoded = self.shadow.decode(frame);
        self.stats.record_decoded(&decoded, now);
        if decoded.stale > 0 {
            log::debug!("Frame {}: {} stale entries dropped", frame.frame, decoded.stale);
        }

        for &id in &decoded.removed {
            self.interpolator.remove(id);
            self.events.push(ClientEvent::EntityRemoved(id));
        }
        for &id in &decoded.appeared {
            self.events.push(ClientEvent::EntityAppeared(id));
        }
        for &(id, _) in &decoded.applied {
            if let Some(state) = self.shadow.state(id) {
                self.interpolator.push(id, frame.server_time, *state);
            }
        }

        if frame.controlled.is_some() && frame.controlled != self.controlled {
            self.set_controlled(frame.controlled);
        }
        if let Some(ack) = frame.input_ack {
            self.inputs.acknowledge(ack);
        }
        self.reconcile_controlled(frame, &decoded);
    }

    fn reconcile_controlled(&mut self, frame: &StateFrame, decoded: &DecodedFrame) {
        let Some(id) = self.controlled else {
            return;
        };
        if !decoded.applied.iter().any(|&(applied, _)| applied == id) {
            return;
        }
        let Some(&authoritative) = self.shadow.state(id) else {
            return;
        };

        if !self.predictor.is_initialized() || decoded.appeared.contains(&id) {
            self.predictor.reset(authoritative);
            return;
        }
        let Some(ack) = frame.input_ack else {
            return;
        };

        if let Reconciliation::Corrected {
            frame,
            error,
            replayed,
        } = self.predictor.reconcile(ack, &authoritative)
        {
            self.events.push(ClientEvent::Corrected {
                entity: id,
                frame,
                error,
                replayed,
            });
        }
    }

    /// Stamps a command with the server time currently being rendered, which
    /// is what the server rewinds to when validating it.
    pub fn command(&self, entity: EntityId, kind: u16, now: f64) -> Command {
        let issued_at = self.interpolator.render_time(now).unwrap_or(0.0);
        Command::new(entity, kind, issued_at)
    }

    pub fn local_tick(&mut self, movement: Vec3, commands: Vec<Command>, now: f64) -> LocalInput {
        let input = self.inputs.record(movement, commands, now);

        if self.controlled.is_some() && self.predictor.is_initialized() {
            self.predictor.predict(input.clone());
        }

        let packet = Packet::new(PacketType::Input(input.to_message()));
        match packet.serialize() {
            Ok(bytes) => match self.transport.send_to(SERVER_PEER, Channel::Reliable, &bytes) {
                Ok(sent) => self.stats.record_control_sent(sent),
                Err(e) => {
                    log::warn!("Failed to send input {}: {}", input.frame, e);
                    self.stats.record_send_failure();
                }
            },
            Err(e) => log::warn!("Failed to encode input {}: {}", input.frame, e),
        }

        input
    }

    fn send_control(&mut self, payload: PacketType) {
        let bytes = match Packet::new(payload).serialize() {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("Failed to encode control packet: {}", e);
                return;
            }
        };
        match self
            .transport
            .send_to(SERVER_PEER, Channel::Unreliable, &bytes)
        {
            Ok(sent) => self.stats.record_control_sent(sent),
            Err(e) => {
                log::warn!("Control packet failed: {}", e);
                self.stats.record_send_failure();
            }
        }
    }

    pub fn update(&mut self, delta: f64, now: f64) {
        self.receive(now);
        self.predictor.update(delta as f32);

        let ping_due = self
            .last_ping
            .is_none_or(|last| now - last >= self.config.ping_interval);
        if ping_due {
            self.last_ping = Some(now);
            self.send_control(PacketType::Ping { sent_at: now });
        }
    }

    pub fn ping_ms(&self) -> Option<f32> {
        self.stats.ping_ms(SERVER_PEER)
    }

    pub fn sample_remote(&self, id: EntityId, now: f64) -> Option<Sample> {
        self.interpolator.sample(id, now)
    }

    pub fn sample(&self, id: EntityId, now: f64) -> Option<NetworkedState> {
        if self.controlled == Some(id)
            && self.predictor.is_enabled()
            && self.predictor.is_initialized()
        {
            return Some(self.predictor.visual_state());
        }
        self.interpolator.sample(id, now).map(|s| s.state)
    }

    pub fn render_states(&self, now: f64) -> Vec<(EntityId, NetworkedState)> {
        self.interpolator
            .entity_ids()
            .into_iter()
            .filter_map(|id| self.sample(id, now).map(|state| (id, state)))
            .collect()
    }

    pub fn apply_render_state<N: NetworkedMut + ?Sized>(&self, entity: &mut N, now: f64) -> bool {
        match self.sample(entity.network_id(), now) {
            Some(state) => {
                entity.apply_networked_state(&state);
                true
            }
            None => false,
        }
    }

    pub fn predicted_state(&self) -> Option<&NetworkedState> {
        self.controlled
            .filter(|_| self.predictor.is_initialized())
            .map(|_| self.predictor.state())
    }

    pub fn current_frame(&self) -> u64 {
        self.inputs.current_frame()
    }

    pub fn unacked_inputs(&self) -> usize {
        self.inputs.unacked_count()
    }
}

#[cfg(test)]
mod tests {
    use crate::transport::MemoryHub;

    use super::*;

    #[test]
    fn invalid_config_fails_fast() {
        let hub = MemoryHub::new();
        let _server = hub.server();
        let config = SyncConfig {
            client_tick_rate: 0,
            ..Default::default()
        };
        assert!(SyncClient::new(config, hub.connect()).is_err());
    }

    #[test]
    fn garbage_payload_is_dropped() {
        let hub = MemoryHub::new();
        let mut server = hub.server();
        let mut client = SyncClient::new(SyncConfig::default(), hub.connect()).unwrap();
        let peer = client.transport().id();

        server.send_to(peer, Channel::Unreliable, &[1, 2, 3]).unwrap();
        client.receive(0.0);

        assert_eq!(client.stats().malformed_dropped, 1);
        let events = client.drain_events();
        assert_eq!(events[0], ClientEvent::Connected);
        assert!(matches!(events[1], ClientEvent::PayloadDropped(_)));
    }

    #[test]
    fn disconnect_forgets_remote_world() {
        let hub = MemoryHub::new();
        let mut server = crate::server::SyncServer::new(SyncConfig::default(), hub.server()).unwrap();
        let mut client = SyncClient::new(SyncConfig::default(), hub.connect()).unwrap();
        server.receive(0.0);
        let id = server.spawn(NetworkedState::default(), 0.0);
        server.network_tick(0.05);
        client.receive(0.05);
        assert!(client.shadow().contains(id));

        drop(server);
        client.receive(0.1);
        assert!(!client.is_connected());
        assert!(client.shadow().is_empty());
        assert!(client.interpolator().is_empty());
        assert!(client.render_states(0.1).is_empty());
    }
}
