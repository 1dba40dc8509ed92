use glam::Vec3;

use crate::codec::{DeltaEncoder, Packet, PacketType};
use crate::config::{ConfigError, SyncConfig};
use crate::event::{EventQueue, SyncEvent};
use crate::state::{DirtyFields, EntityId, EntityRegistry, Networked, NetworkedState};
use crate::stats::SyncStats;
use crate::time::FixedTimestep;
use crate::transport::{Channel, Inbox, Incoming, PeerId, Transport};

use super::collector::{UpdateCollector, Viewer, ViewerBatch};
use super::commands::{ClientInput, CommandBuffer};
use super::lag::{HitCheck, LagCompensator};

pub struct SyncServer<T: Transport> {
    config: SyncConfig,
    transport: T,
    inbox: Inbox,
    registry: EntityRegistry,
    collector: UpdateCollector,
    encoder: DeltaEncoder,
    commands: CommandBuffer,
    lag: LagCompensator,
    viewers: Vec<Viewer>,
    stats: SyncStats,
    events: EventQueue<SyncEvent>,
    timestep: FixedTimestep,
    frame: u64,
    last_ping: Option<f64>,
}

impl<T: Transport> SyncServer<T> {
    pub fn new(config: SyncConfig, transport: T) -> Result<Self, ConfigError> {
        config.validate()?;

        log::info!(
            "Sync server: {} Hz network tick, {} updates/tick, culling at {}",
            config.network_tick_rate,
            config.max_updates_per_tick,
            config.culling_distance
        );

        Ok(Self {
            inbox: Inbox::new(),
            registry: EntityRegistry::new(config.precision),
            collector: UpdateCollector::new(&config),
            encoder: DeltaEncoder::new(config.precision, config.enable_delta_compression),
            commands: CommandBuffer::new(config.command_buffer_capacity),
            lag: LagCompensator::from_config(&config),
            viewers: Vec::new(),
            stats: SyncStats::new(),
            events: EventQueue::default(),
            timestep: FixedTimestep::new(config.network_tick_rate),
            frame: 0,
            last_ping: None,
            transport,
            config,
        })
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut EntityRegistry {
        &mut self.registry
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn stats(&self) -> &SyncStats {
        &self.stats
    }

    pub fn lag_compensator(&self) -> &LagCompensator {
        &self.lag
    }

    pub fn viewers(&self) -> &[Viewer] {
        &self.viewers
    }

    pub fn viewer(&self, peer: PeerId) -> Option<&Viewer> {
        self.viewers.iter().find(|v| v.peer == peer)
    }

    pub fn drain_events(&mut self) -> Vec<SyncEvent> {
        self.events.drain()
    }

    pub fn spawn(&mut self, state: NetworkedState, now: f64) -> EntityId {
        self.registry.spawn(state, now)
    }

    pub fn register_entity<N: Networked + ?Sized>(&mut self, entity: &N, now: f64) -> bool {
        let id = entity.network_id();
        let created = self.registry.register_with(id, entity.networked_state(), now);
        self.registry.set_in_combat(id, entity.in_combat());
        created
    }

    pub fn despawn(&mut self, id: EntityId) -> bool {
        for viewer in &mut self.viewers {
            if viewer.entity == Some(id) {
                viewer.entity = None;
            }
        }
        self.registry.unregister(id).is_some()
    }

    pub fn observe(&mut self, id: EntityId, state: &NetworkedState, now: f64) -> Option<DirtyFields> {
        self.registry.observe(id, state, now)
    }

    pub fn observe_entity<N: Networked + ?Sized>(
        &mut self,
        entity: &N,
        now: f64,
    ) -> Option<DirtyFields> {
        self.registry.observe_entity(entity, now)
    }

    pub fn observe_all<'a, N, I>(&mut self, entities: I, now: f64)
    where
        N: Networked + 'a,
        I: IntoIterator<Item = &'a N>,
    {
        for entity in entities {
            self.registry.observe_entity(entity, now);
        }
    }

    pub fn add_viewer(&mut self, peer: PeerId, position: Vec3) {
        if self.viewer(peer).is_some() {
            return;
        }
        self.viewers.push(Viewer::new(peer, position));
        self.events.push(SyncEvent::ViewerJoined(peer));
        log::info!("Viewer {} joined", peer);
    }

    pub fn remove_viewer(&mut self, peer: PeerId) {
        let before = self.viewers.len();
        self.viewers.retain(|v| v.peer != peer);
        if self.viewers.len() == before {
            return;
        }
        self.commands.remove_client(peer);
        self.stats.forget_peer(peer);
        self.events.push(SyncEvent::ViewerLeft(peer));
        log::info!("Viewer {} left", peer);
    }

    pub fn attach_entity(&mut self, peer: PeerId, entity: EntityId) -> bool {
        if !self.registry.contains(entity) {
            return false;
        }
        let Some(viewer) = self.viewers.iter_mut().find(|v| v.peer == peer) else {
            return false;
        };
        viewer.entity = Some(entity);
        self.registry.set_owner(entity, Some(peer));
        true
    }

    pub fn set_viewer_position(&mut self, peer: PeerId, position: Vec3) {
        if let Some(viewer) = self.viewers.iter_mut().find(|v| v.peer == peer) {
            viewer.position = position;
        }
    }

    pub fn receive(&mut self, now: f64) {
        if let Err(e) = self.transport.poll(&mut self.inbox) {
            log::warn!("Transport poll failed: {}", e);
        }

        while let Some(incoming) = self.inbox.pop() {
            match incoming {
                Incoming::Connected(peer) => self.add_viewer(peer, Vec3::ZERO),
                Incoming::Disconnected(peer) => self.remove_viewer(peer),
                Incoming::Payload { peer, bytes } => self.handle_payload(peer, &bytes, now),
            }
        }
    }

    fn handle_payload(&mut self, peer: PeerId, bytes: &[u8], now: f64) {
        self.stats.record_received(bytes.len());

        let packet = match Packet::deserialize(bytes) {
            Ok(packet) => packet,
            Err(e) => {
                log::debug!("Dropping payload from {}: {}", peer, e);
                self.stats.record_malformed();
                self.events.push(SyncEvent::PayloadDropped {
                    peer,
                    reason: e.to_string(),
                });
                return;
            }
        };

        if self.viewer(peer).is_none() {
            self.add_viewer(peer, Vec3::ZERO);
        }

        match packet.payload {
            PacketType::Input(input) => {
                if !self.commands.push(peer, input) {
                    log::trace!("Stale input from {}", peer);
                }
            }
            PacketType::Ping { sent_at } => {
                self.send_control(peer, PacketType::Pong { sent_at });
            }
            PacketType::Pong { sent_at } => {
                self.stats
                    .record_rtt(peer, ((now - sent_at) * 1000.0) as f32);
            }
            PacketType::State(_) => {
                log::debug!("Ignoring state frame from client {}", peer);
            }
        }
    }

    pub fn drain_commands(&mut self) -> Vec<ClientInput> {
        self.commands.drain_pending()
    }

    pub fn last_processed_input(&self, peer: PeerId) -> Option<u64> {
        self.commands.last_processed(peer)
    }

    pub fn network_tick(&mut self, now: f64) {
        self.frame += 1;
        self.lag.record(now, &self.registry);

        for viewer in &mut self.viewers {
            if let Some(entity) = viewer.entity.and_then(|id| self.registry.get(id)) {
                viewer.position = entity.state.position;
            }
        }

        let batches = self
            .collector
            .collect(&mut self.registry, &mut self.viewers, &self.encoder);
        for batch in batches {
            self.send_batch(batch, now);
        }

        self.registry.end_tick();

        let ping_due = self
            .last_ping
            .is_none_or(|last| now - last >= self.config.ping_interval);
        if ping_due {
            self.last_ping = Some(now);
            let peers: Vec<PeerId> = self.viewers.iter().map(|v| v.peer).collect();
            for peer in peers {
                self.send_control(peer, PacketType::Ping { sent_at: now });
            }
        }
    }

    fn send_batch(&mut self, batch: ViewerBatch, now: f64) {
        let peer = batch.peer;
        let mut frame = self
            .encoder
            .encode(self.frame, now, &batch.updates, &batch.removed);
        frame.input_ack = self.commands.last_processed(peer);
        frame.controlled = self.viewer(peer).and_then(|v| v.entity);

        let raw = DeltaEncoder::raw_size(&batch.updates, &batch.removed);
        let bytes = match Packet::new(PacketType::State(frame)).serialize() {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("Failed to encode frame {} for {}: {}", self.frame, peer, e);
                self.requeue(&batch);
                self.send_failed(peer, e.to_string());
                return;
            }
        };

        match self.transport.send_to(peer, Channel::Unreliable, &bytes) {
            Ok(sent) => {
                self.stats.record_sent(sent, raw, batch.updates.len(), now);
            }
            Err(e) => {
                log::warn!("Dropping frame {} for {}: {}", self.frame, peer, e);
                self.requeue(&batch);
                self.send_failed(peer, e.to_string());
            }
        }
    }

    fn requeue(&mut self, batch: &ViewerBatch) {
        if let Some(viewer) = self.viewers.iter_mut().find(|v| v.peer == batch.peer) {
            self.collector.requeue(viewer, batch);
        }
    }

    fn send_control(&mut self, peer: PeerId, payload: PacketType) {
        let result = Packet::new(payload)
            .serialize()
            .map_err(|e| e.to_string())
            .and_then(|bytes| {
                self.transport
                    .send_to(peer, Channel::Unreliable, &bytes)
                    .map_err(|e| e.to_string())
            });
        match result {
            Ok(sent) => self.stats.record_control_sent(sent),
            Err(reason) => {
                log::warn!("Control packet to {} failed: {}", peer, reason);
                self.send_failed(peer, reason);
            }
        }
    }

    fn send_failed(&mut self, peer: PeerId, reason: String) {
        self.stats.record_send_failure();
        self.events.push(SyncEvent::SendFailed { peer, reason });
    }

    /// Runs as many network ticks as `delta` covers, the last one stamped
    /// `now` and earlier ones one period apart. Returns the tick count.
    pub fn update(&mut self, delta: f64, now: f64) -> u32 {
        self.receive(now);
        self.timestep.accumulate(delta);

        let mut ticks = 0;
        while self.timestep.consume_tick() {
            ticks += 1;
        }
        let period = self.timestep.dt();
        for remaining in (0..ticks).rev() {
            self.network_tick(now - remaining as f64 * period);
        }
        ticks
    }

    /// `issued_at` is in server time, as stamped by the client from its render clock.
    pub fn validate_hit(
        &self,
        target: EntityId,
        issued_at: f64,
        point: Vec3,
        radius: f32,
    ) -> Option<HitCheck> {
        self.lag.validate_hit(target, issued_at, point, radius)
    }
}
