use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use anyhow::Context;

use netsync::{
    ClientEvent, Command, EntityId, FixedTimestep, NetworkedState, SyncClient, SyncConfig,
    Transport, UdpTransport,
};

use crate::report::SessionReport;
use crate::script::CircleScript;

#[derive(Debug, Clone, Copy)]
pub struct BotSettings {
    pub script: CircleScript,
    /// Seconds between attacks on the nearest entity. Zero disables.
    pub attack_interval: f64,
    pub report_interval: f64,
}

/// Headless viewer: walks a scripted path, attacks whatever is closest and
/// logs what the sync layer does about it.
pub struct Bot<T: Transport = UdpTransport> {
    client: SyncClient<T>,
    settings: BotSettings,
    local_step: FixedTimestep,
    report: SessionReport,
    start_time: Instant,
    last_tick_time: Instant,
    last_attack: f64,
    last_report: f64,
    running: Arc<AtomicBool>,
}

impl Bot<UdpTransport> {
    pub fn connect(
        server_addr: SocketAddr,
        config: SyncConfig,
        settings: BotSettings,
    ) -> anyhow::Result<Self> {
        log::info!("Connecting to {}", server_addr);
        let mut transport =
            UdpTransport::bind("0.0.0.0:0").context("failed to bind client socket")?;
        transport.connect(server_addr);
        let client = SyncClient::new(config, transport)?;
        Ok(Self::new(client, settings))
    }
}

impl<T: Transport> Bot<T> {
    pub fn new(client: SyncClient<T>, settings: BotSettings) -> Self {
        let now = Instant::now();
        Self {
            local_step: FixedTimestep::new(client.config().client_tick_rate),
            client,
            settings,
            report: SessionReport::new(),
            start_time: now,
            last_tick_time: now,
            last_attack: 0.0,
            last_report: 0.0,
            running: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn client(&self) -> &SyncClient<T> {
        &self.client
    }

    pub fn report(&self) -> &SessionReport {
        &self.report
    }

    pub fn elapsed(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    pub fn tick_once(&mut self) {
        let now = Instant::now();
        let delta = (now - self.last_tick_time).as_secs_f64();
        self.last_tick_time = now;
        self.step(delta, (now - self.start_time).as_secs_f64());
    }

    pub fn step(&mut self, delta: f64, now: f64) {
        self.client.update(delta, now);
        self.handle_events();

        self.local_step.accumulate(delta);
        while self.local_step.consume_tick() {
            let commands = self.attack(now).into_iter().collect();
            let movement = self.settings.script.movement(now);
            self.client.local_tick(movement, commands, now);
            self.report.record_tick(now);
        }

        if self.settings.report_interval > 0.0
            && now - self.last_report >= self.settings.report_interval
        {
            self.last_report = now;
            self.log_report();
        }
    }

    fn handle_events(&mut self) {
        for event in self.client.drain_events() {
            self.report.record_event(&event);
            match event {
                ClientEvent::Connected => log::info!("Connected"),
                ClientEvent::Disconnected => {
                    log::warn!("Server connection lost");
                    self.running.store(false, Ordering::SeqCst);
                }
                ClientEvent::Corrected {
                    entity,
                    frame,
                    error,
                    replayed,
                } => log::debug!(
                    "Entity {} corrected at input {}: {:.3} off, {} replayed",
                    entity,
                    frame,
                    error.length(),
                    replayed
                ),
                ClientEvent::PayloadDropped(reason) => log::debug!("Dropped payload: {}", reason),
                ClientEvent::EntityAppeared(_) | ClientEvent::EntityRemoved(_) => {}
            }
        }
    }

    /// Nearest rendered entity other than our own.
    pub fn nearest_target(&self, now: f64) -> Option<(EntityId, NetworkedState)> {
        let origin = self.client.predicted_state()?.position;
        let own = self.client.controlled();

        self.client
            .render_states(now)
            .into_iter()
            .filter(|(id, _)| Some(*id) != own)
            .min_by(|(_, a), (_, b)| {
                a.position
                    .distance_squared(origin)
                    .total_cmp(&b.position.distance_squared(origin))
            })
    }

    fn attack(&mut self, now: f64) -> Option<Command> {
        if self.settings.attack_interval <= 0.0
            || now - self.last_attack < self.settings.attack_interval
        {
            return None;
        }
        let (target, state) = self.nearest_target(now)?;
        self.last_attack = now;

        let aim = state.position;
        log::debug!("Attacking {} at {:?}", target, aim);
        Some(
            self.client
                .command(target, Command::KIND_ATTACK, now)
                .with_params(vec![aim.x, aim.y, aim.z]),
        )
    }

    fn log_report(&self) {
        let stats = self.client.stats();
        let ping = self
            .client
            .ping_ms()
            .map_or_else(|| "?".to_string(), |ms| format!("{:.1}ms", ms));
        let position = self
            .client
            .predicted_state()
            .map(|s| s.position)
            .unwrap_or_default();

        log::info!(
            "tick {:.0}Hz | ping {} | tracked {} | updates {} | stale {} | corrections {} (max {:.2}) | at {:.1} {:.1} {:.1}",
            self.report.tick_rate(),
            ping,
            self.client.shadow().len(),
            stats.updates_received,
            stats.stale_dropped,
            self.report.corrections,
            self.report.largest_correction,
            position.x,
            position.y,
            position.z
        );
    }
}
