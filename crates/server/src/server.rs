use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use anyhow::Context;
use glam::Vec3;

use netsync::{
    Command, EntityId, FixedTimestep, LinearMotion, NetworkedState, SyncEvent, SyncServer,
    SyncStats, Transport, UdpTransport,
};

use crate::config::ServerConfig;
use crate::events::ServerEvent;
use crate::simulation::{ActorKind, MAX_HEALTH, Wander, World};

pub struct GameServer<T: Transport = UdpTransport> {
    sync: SyncServer<T>,
    world: World,
    config: ServerConfig,
    motion: LinearMotion,
    simulation_step: FixedTimestep,
    start_time: Instant,
    last_tick_time: Instant,
    running: Arc<AtomicBool>,
    pending_events: VecDeque<ServerEvent>,
}

impl GameServer<UdpTransport> {
    pub fn bind(bind_addr: &str, config: ServerConfig) -> anyhow::Result<Self> {
        let transport = UdpTransport::bind(bind_addr)
            .with_context(|| format!("failed to bind {}", bind_addr))?
            .with_max_peers(config.max_clients);
        Self::new(transport, config, Wander::from_time())
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.sync.transport().local_addr()
    }
}

impl<T: Transport> GameServer<T> {
    pub fn new(transport: T, config: ServerConfig, wander: Wander) -> anyhow::Result<Self> {
        let sync = SyncServer::new(config.sync.clone(), transport)?;
        let world = World::new(config.world_extent, config.npc_speed, wander);
        let now = Instant::now();

        let mut server = Self {
            simulation_step: FixedTimestep::new(config.sync.client_tick_rate),
            sync,
            world,
            motion: LinearMotion::default(),
            start_time: now,
            last_tick_time: now,
            running: Arc::new(AtomicBool::new(true)),
            pending_events: VecDeque::new(),
            config,
        };

        for _ in 0..server.config.npc_count {
            let position = server.world.random_point();
            server.spawn_npc(position, 0.0);
        }
        log::info!("Spawned {} NPCs", server.config.npc_count);

        Ok(server)
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn drain_events(&mut self) -> impl Iterator<Item = ServerEvent> + '_ {
        self.pending_events.drain(..)
    }

    pub fn sync(&self) -> &SyncServer<T> {
        &self.sync
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn spawn_npc(&mut self, position: Vec3, now: f64) -> EntityId {
        let state = NetworkedState::new(position, 0.0, Vec3::ZERO, MAX_HEALTH);
        let id = self.sync.spawn(state, now);
        let target = self.world.random_point();
        self.world.insert(id, ActorKind::Npc { target }, state);
        id
    }

    pub fn tick_once(&mut self) {
        let now = Instant::now();
        let delta = (now - self.last_tick_time).as_secs_f64();
        self.last_tick_time = now;
        self.step(delta, (now - self.start_time).as_secs_f64());
    }

    /// Simulation at the client tick rate, then network ticks at their own rate.
    pub fn step(&mut self, delta: f64, now: f64) {
        self.sync.receive(now);
        self.handle_sync_events(now);

        self.simulation_step.accumulate(delta);
        while self.simulation_step.consume_tick() {
            self.simulate(now);
        }

        self.sync.update(delta, now);
        self.handle_sync_events(now);
    }

    fn simulate(&mut self, now: f64) {
        let dt = self.simulation_step.dt() as f32;

        for input in self.sync.drain_commands() {
            let Some(entity) = self.world.player_entity(input.client) else {
                continue;
            };
            self.world.apply_input(entity, &input, &self.motion, dt);
            for command in &input.commands {
                if command.kind == Command::KIND_ATTACK {
                    self.resolve_attack(entity, command);
                }
            }
        }

        self.world.simulate_npcs(dt);
        self.sync.observe_all(self.world.actors(), now);
    }

    /// The command targets `entity_id` at the point in `params`, as seen by
    /// the client at `client_time`.
    fn resolve_attack(&mut self, attacker: EntityId, command: &Command) {
        let target = command.entity_id;
        let [x, y, z] = match command.params.as_slice() {
            [x, y, z, ..] => [*x, *y, *z],
            _ => {
                log::debug!("Attack from {} without aim point", attacker);
                return;
            }
        };

        let Some(check) = self.sync.validate_hit(
            target,
            command.client_time,
            Vec3::new(x, y, z),
            self.config.attack_radius,
        ) else {
            log::debug!("Attack on unknown entity {}", target);
            return;
        };

        self.world.engage(attacker);
        if check.hit {
            self.world.damage(target, self.config.attack_damage);
            self.pending_events.push_back(ServerEvent::Hit {
                attacker,
                target,
                confidence: check.confidence,
            });
        } else {
            self.pending_events.push_back(ServerEvent::Miss {
                attacker,
                target,
                distance: check.distance,
            });
        }
    }

    fn handle_sync_events(&mut self, now: f64) {
        for event in self.sync.drain_events() {
            match event {
                SyncEvent::ViewerJoined(client_id) => {
                    let state = NetworkedState::new(Vec3::ZERO, 0.0, Vec3::ZERO, MAX_HEALTH);
                    let entity_id = self.sync.spawn(state, now);
                    self.world
                        .insert(entity_id, ActorKind::Player { client_id }, state);
                    self.sync.attach_entity(client_id, entity_id);
                    self.pending_events.push_back(ServerEvent::ClientConnected {
                        client_id,
                        entity_id,
                    });
                }
                SyncEvent::ViewerLeft(client_id) => {
                    if let Some(entity_id) = self.world.player_entity(client_id) {
                        self.world.remove(entity_id);
                        self.sync.despawn(entity_id);
                    }
                    self.pending_events
                        .push_back(ServerEvent::ClientDisconnected { client_id });
                }
                SyncEvent::SendFailed { peer, reason } => {
                    self.pending_events.push_back(ServerEvent::Error {
                        message: format!("Send to {} failed: {}", peer, reason),
                    });
                }
                SyncEvent::PayloadDropped { peer, reason } => {
                    log::debug!("Dropped payload from {}: {}", peer, reason);
                }
            }
        }
    }

    pub fn stats(&self) -> ServerStats {
        let now = self.start_time.elapsed().as_secs_f64();
        ServerStats {
            frame: self.sync.frame(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            client_count: self.sync.viewers().len(),
            max_clients: self.config.max_clients,
            entity_count: self.sync.registry().len(),
            dirty_count: self.sync.registry().dirty_count(),
            updates_per_sec: self.sync.stats().update_frequency(now),
            network_stats: self.sync.stats().clone(),
        }
    }

    pub fn client_infos(&self) -> Vec<ClientInfo> {
        self.sync
            .viewers()
            .iter()
            .map(|v| ClientInfo {
                client_id: v.peer,
                entity_id: v.entity,
                visible: v.visible_count(),
                ping_ms: self.sync.stats().ping_ms(v.peer),
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct ServerStats {
    pub frame: u64,
    pub uptime_secs: u64,
    pub client_count: usize,
    pub max_clients: usize,
    pub entity_count: usize,
    pub dirty_count: usize,
    pub updates_per_sec: f64,
    pub network_stats: SyncStats,
}

#[derive(Debug, Clone)]
pub struct ClientInfo {
    pub client_id: u32,
    pub entity_id: Option<EntityId>,
    pub visible: usize,
    pub ping_ms: Option<f32>,
}
