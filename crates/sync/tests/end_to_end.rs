use glam::Vec3;

use netsync::codec::quantize_vec3;
use netsync::{
    ClientEvent, Confidence, DirtyFields, EntityId, Inbox, Incoming, LinearMotion, LocalInput,
    MemoryHub, MemoryTransport, MotionModel, NetworkedState, Packet, PacketType, SampleMode,
    StateFrame, SyncClient, SyncConfig, SyncServer, Transport,
};

const TICK: f64 = 0.05;

struct Harness {
    hub: MemoryHub,
    server: SyncServer<MemoryTransport>,
    client: SyncClient<MemoryTransport>,
    now: f64,
}

impl Harness {
    fn new(config: SyncConfig) -> Self {
        let hub = MemoryHub::new();
        let mut server = SyncServer::new(config.clone(), hub.server()).unwrap();
        let mut client = SyncClient::new(config, hub.connect()).unwrap();
        server.receive(0.0);
        client.receive(0.0);
        Self {
            hub,
            server,
            client,
            now: 0.0,
        }
    }

    fn peer(&self) -> u32 {
        self.client.transport().id()
    }

    fn tick(&mut self) {
        self.now += TICK;
        self.server.receive(self.now);
        self.server.network_tick(self.now);
        self.client.receive(self.now);
    }
}

fn state_frames(raw: &mut MemoryTransport) -> Vec<StateFrame> {
    let mut inbox = Inbox::new();
    raw.poll(&mut inbox).unwrap();
    std::iter::from_fn(|| inbox.pop())
        .filter_map(|incoming| match incoming {
            Incoming::Payload { bytes, .. } => match Packet::deserialize(&bytes).unwrap().payload {
                PacketType::State(frame) => Some(frame),
                _ => None,
            },
            _ => None,
        })
        .collect()
}

#[test]
fn client_shadow_holds_quantized_server_state() {
    let mut h = Harness::new(SyncConfig::default());
    let raw = NetworkedState::new(Vec3::new(12.34, 0.0, 5.67), 1.234, Vec3::new(0.26, 0.0, 0.0), 99.6);
    let id = h.server.spawn(raw, 0.0);

    h.tick();

    let shadow = h.client.shadow().state(id).unwrap();
    assert_eq!(shadow.position, quantize_vec3(raw.position, 0.1));
    assert_eq!(shadow.health, 100.0);
    assert!(h.client.drain_events().contains(&ClientEvent::EntityAppeared(id)));
}

#[test]
fn unchanged_health_is_absent_from_next_payload() {
    let hub = MemoryHub::new();
    let mut server = SyncServer::new(SyncConfig::default(), hub.server()).unwrap();
    let mut raw = hub.connect();
    server.receive(0.0);

    let id = server.spawn(NetworkedState::new(Vec3::ZERO, 0.0, Vec3::ZERO, 100.0), 0.0);
    server.network_tick(0.05);
    let first = state_frames(&mut raw);
    assert_eq!(first[0].entities[0].fields, DirtyFields::all().bits());

    let changed = server
        .observe(id, &NetworkedState::new(Vec3::new(1.0, 0.0, 0.0), 0.0, Vec3::ZERO, 100.0), 0.06)
        .unwrap();
    assert_eq!(changed, DirtyFields::POSITION);
    server.network_tick(0.1);

    let second = state_frames(&mut raw);
    let delta = &second[0].entities[0];
    assert_eq!(delta.fields, DirtyFields::POSITION.bits());
    let fields = delta.to_fields().unwrap();
    assert!(fields.health.is_none());
    assert_eq!(fields.position, Some(Vec3::new(1.0, 0.0, 0.0)));
}

#[test]
fn distant_entity_never_reaches_viewer() {
    let mut h = Harness::new(SyncConfig::default());
    let player = h.server.spawn(NetworkedState::at(Vec3::ZERO), 0.0);
    let near = h.server.spawn(NetworkedState::at(Vec3::new(50.0, 0.0, 0.0)), 0.0);
    let far = h.server.spawn(NetworkedState::at(Vec3::new(150.0, 0.0, 0.0)), 0.0);
    let peer = h.peer();
    assert!(h.server.attach_entity(peer, player));

    for step in 0..10 {
        let wiggle = NetworkedState::at(Vec3::new(150.0, step as f32, 0.0));
        h.server.observe(far, &wiggle, h.now);
        h.tick();
        assert!(!h.client.shadow().contains(far));
    }
    assert!(h.client.shadow().contains(near));
    assert_eq!(h.client.controlled(), Some(player));
}

#[test]
fn budget_bounds_every_payload() {
    let config = SyncConfig::default();
    let hub = MemoryHub::new();
    let mut server = SyncServer::new(config.clone(), hub.server()).unwrap();
    let mut raw = hub.connect();
    server.receive(0.0);

    for i in 0..100 {
        server.spawn(NetworkedState::at(Vec3::new(i as f32 * 0.5, 0.0, 0.0)), 0.0);
    }

    let mut seen = std::collections::HashSet::new();
    for tick in 1..=7 {
        server.network_tick(tick as f64 * TICK);
        for frame in state_frames(&mut raw) {
            assert!(frame.entities.len() <= config.max_updates_per_tick);
            seen.extend(frame.entities.iter().map(|e| e.entity_id));
        }
    }
    // Unsent entities stay pending until every one has reached the viewer.
    assert_eq!(seen.len(), 100);
}

#[test]
fn despawn_reaches_client() {
    let mut h = Harness::new(SyncConfig::default());
    let id = h.server.spawn(NetworkedState::at(Vec3::ONE), 0.0);
    h.tick();
    h.tick();
    assert!(h.client.interpolator().history(id).is_some());

    assert!(h.server.despawn(id));
    h.tick();

    assert!(!h.client.shadow().contains(id));
    assert!(h.client.interpolator().history(id).is_none());
    assert!(h.client.drain_events().contains(&ClientEvent::EntityRemoved(id)));
}

#[test]
fn lost_despawn_frame_still_removes_entity() {
    let mut h = Harness::new(SyncConfig {
        full_resync_interval: 10,
        ..Default::default()
    });
    let id = h.server.spawn(NetworkedState::at(Vec3::ONE), 0.0);
    h.tick();
    h.tick();
    assert!(h.client.shadow().contains(id));

    h.hub.set_drop_unreliable(true);
    assert!(h.server.despawn(id));
    h.tick();
    assert!(h.client.shadow().contains(id));

    h.hub.set_drop_unreliable(false);
    h.tick();

    assert!(!h.client.shadow().contains(id));
    assert!(h.client.interpolator().history(id).is_none());
    assert!(h.client.render_states(h.now).is_empty());
    assert!(h.client.drain_events().contains(&ClientEvent::EntityRemoved(id)));

    // Repeats that arrive after the removal change nothing.
    for _ in 0..30 {
        h.tick();
    }
    assert!(!h.client.shadow().contains(id));
    assert_eq!(h.server.viewer(h.peer()).unwrap().pending_removals(), 0);
}

#[test]
fn remote_entity_is_interpolated_between_frames() {
    let mut h = Harness::new(SyncConfig::default());
    let id = h.server.spawn(NetworkedState::at(Vec3::ZERO), 0.0);

    for step in 1..=10 {
        h.server.observe(id, &NetworkedState::at(Vec3::new(step as f32, 0.0, 0.0)), h.now);
        h.tick();
    }

    // Renders between the eighth and ninth frames.
    let sample = h.client.sample_remote(id, h.now + 0.025).unwrap();
    assert_eq!(sample.mode, SampleMode::Interpolated);
    assert!(sample.state.position.x > 8.0 && sample.state.position.x < 9.5);
}

fn controlled_setup(config: SyncConfig) -> (Harness, EntityId, NetworkedState) {
    let mut h = Harness::new(config);
    let start = NetworkedState::new(Vec3::ZERO, 0.0, Vec3::ZERO, 100.0);
    let id = h.server.spawn(start, 0.0);
    let peer = h.peer();
    h.server.attach_entity(peer, id);
    h.tick();
    assert_eq!(h.client.controlled(), Some(id));
    assert!(h.client.predicted_state().is_some());
    (h, id, start)
}

fn step_server(
    h: &mut Harness,
    id: EntityId,
    state: &mut NetworkedState,
    dt: f32,
    extra: Vec3,
) {
    let motion = LinearMotion::default();
    h.server.receive(h.now);
    for input in h.server.drain_commands() {
        let local = LocalInput {
            frame: input.frame,
            timestamp: input.timestamp,
            movement: input.movement.unwrap_or(Vec3::ZERO),
            commands: input.commands,
        };
        *state = motion.step(state, &local, dt);
    }
    state.position += extra;
    h.server.observe(id, state, h.now);
}

#[test]
fn agreeing_server_causes_no_correction() {
    let config = SyncConfig::default();
    let dt = config.client_tick_period() as f32;
    let (mut h, id, mut state) = controlled_setup(config);
    h.client.drain_events();

    for _ in 0..30 {
        h.now += dt as f64;
        h.client.local_tick(Vec3::X, Vec::new(), h.now);
        step_server(&mut h, id, &mut state, dt, Vec3::ZERO);
        h.server.network_tick(h.now);
        h.client.receive(h.now);
    }

    let events = h.client.drain_events();
    assert!(
        !events.iter().any(|e| matches!(e, ClientEvent::Corrected { .. })),
        "{events:?}"
    );
    let predicted = h.client.predicted_state().unwrap().position;
    assert!((predicted.x - 30.0 * 5.0 * dt).abs() < 1e-3);
    assert!(h.client.unacked_inputs() <= 1);
}

#[test]
fn diverging_server_forces_correction() {
    let config = SyncConfig::default();
    let dt = config.client_tick_period() as f32;
    let (mut h, id, mut state) = controlled_setup(config);
    h.client.drain_events();

    for step in 0..5 {
        h.now += dt as f64;
        h.client.local_tick(Vec3::X, Vec::new(), h.now);
        let push = if step == 4 { Vec3::new(2.0, 0.0, 0.0) } else { Vec3::ZERO };
        step_server(&mut h, id, &mut state, dt, push);
        h.server.network_tick(h.now);
        h.client.receive(h.now);
    }

    let corrected = h
        .client
        .drain_events()
        .into_iter()
        .find_map(|e| match e {
            ClientEvent::Corrected { error, .. } => Some(error),
            _ => None,
        })
        .expect("expected a correction");
    assert!((corrected.x - 2.0).abs() < 0.1);

    let predicted = h.client.predicted_state().unwrap().position;
    assert!((predicted.x - state.position.x).abs() < 0.1);
}

#[test]
fn hit_validated_against_rewound_position() {
    let config = SyncConfig {
        network_tick_rate: 30,
        lag_compensation_window: 3.0,
        ..Default::default()
    };
    let period = config.network_tick_period();
    let hub = MemoryHub::new();
    let mut server = SyncServer::new(config, hub.server()).unwrap();
    let target = server.spawn(NetworkedState::at(Vec3::ZERO), 0.0);

    let mut now = 0.0;
    for tick in 1..=120 {
        now = tick as f64 * period;
        let position = Vec3::new(now as f32 * 10.0, 0.0, 0.0);
        server.observe(target, &NetworkedState::at(position), now);
        server.network_tick(now);
    }

    let issued_at = now - 0.51;
    let past = Vec3::new(issued_at as f32 * 10.0, 0.0, 0.0);

    let check = server.validate_hit(target, issued_at, past, 0.3).unwrap();
    assert!(check.hit, "{check:?}");
    assert_eq!(check.confidence, Confidence::Interpolated);

    let present = Vec3::new(now as f32 * 10.0, 0.0, 0.0);
    let miss = server.validate_hit(target, issued_at, present, 0.3).unwrap();
    assert!(!miss.hit);
}

#[test]
fn ping_is_measured_both_ways() {
    let mut h = Harness::new(SyncConfig::default());
    h.client.update(0.0, h.now);
    h.tick();
    h.now += 0.02;
    h.client.update(0.02, h.now);
    h.server.receive(h.now);

    assert!(h.client.ping_ms().is_some());
    assert!(h.server.stats().ping_ms(h.peer()).is_some());
}

#[test]
fn lost_state_frames_do_not_break_client() {
    let mut h = Harness::new(SyncConfig::default());
    let id = h.server.spawn(NetworkedState::at(Vec3::ZERO), 0.0);
    h.tick();

    h.hub.set_drop_unreliable(true);
    for step in 1..=5 {
        h.server.observe(id, &NetworkedState::at(Vec3::new(step as f32, 0.0, 0.0)), h.now);
        h.tick();
    }
    assert_eq!(h.client.shadow().state(id).unwrap().position, Vec3::ZERO);

    h.hub.set_drop_unreliable(false);
    h.server.observe(id, &NetworkedState::at(Vec3::new(6.0, 0.0, 0.0)), h.now);
    h.tick();
    assert_eq!(h.client.shadow().state(id).unwrap().position.x, 6.0);
}
