use std::thread;
use std::time::{Duration, Instant};

use glam::Vec3;

use netsync::{
    Channel, Inbox, Incoming, NetworkedState, SERVER_PEER, SyncClient, SyncConfig, SyncServer,
    Transport, TransportError, UdpTransport,
};

fn wait_for_payloads(transport: &mut UdpTransport, timeout_ms: u64) -> Vec<Incoming> {
    let start = Instant::now();
    let mut inbox = Inbox::new();
    let mut received = Vec::new();
    while start.elapsed() < Duration::from_millis(timeout_ms) {
        transport.poll(&mut inbox).unwrap();
        received.extend(std::iter::from_fn(|| inbox.pop()));
        if received
            .iter()
            .any(|i| matches!(i, Incoming::Payload { .. }))
        {
            break;
        }
        thread::sleep(Duration::from_millis(1));
    }
    received
}

fn pair() -> (UdpTransport, UdpTransport) {
    let server = UdpTransport::bind("127.0.0.1:0").unwrap();
    let mut client = UdpTransport::bind("127.0.0.1:0").unwrap();
    client.connect(server.local_addr());
    (server, client)
}

#[test]
fn first_datagram_registers_peer() {
    let (mut server, mut client) = pair();
    assert_eq!(client.peers(), vec![SERVER_PEER]);

    client
        .send_to(SERVER_PEER, Channel::Reliable, b"hello")
        .unwrap();

    let received = wait_for_payloads(&mut server, 500);
    let peer = match received.as_slice() {
        [Incoming::Connected(peer), Incoming::Payload { peer: from, bytes }] => {
            assert_eq!(peer, from);
            assert_eq!(bytes.as_slice(), b"hello");
            *peer
        }
        other => panic!("Unexpected events: {:?}", other),
    };
    assert_ne!(peer, SERVER_PEER);
    assert_eq!(server.peers(), vec![peer]);
    assert_eq!(server.peer_addr(peer), Some(client.local_addr()));

    server.send_to(peer, Channel::Unreliable, b"world").unwrap();
    let reply = wait_for_payloads(&mut client, 500);
    assert!(reply.iter().any(|i| matches!(
        i,
        Incoming::Payload { peer: SERVER_PEER, bytes } if bytes.as_slice() == b"world"
    )));
}

#[test]
fn oversize_and_unknown_peer_are_rejected() {
    let (_server, mut client) = pair();

    let big = vec![0u8; 4096];
    assert!(matches!(
        client.send_to(SERVER_PEER, Channel::Unreliable, &big),
        Err(TransportError::Oversize { size: 4096, .. })
    ));
    assert!(matches!(
        client.send_to(42, Channel::Unreliable, b"x"),
        Err(TransportError::UnknownPeer(42))
    ));
}

#[test]
fn silent_peer_times_out() {
    let (mut server, mut client) = pair();
    server.set_timeout(Duration::from_millis(20));

    client.send_to(SERVER_PEER, Channel::Reliable, b"hi").unwrap();
    let received = wait_for_payloads(&mut server, 500);
    let Some(Incoming::Connected(peer)) = received.first().cloned() else {
        panic!("No connect: {:?}", received);
    };

    thread::sleep(Duration::from_millis(50));
    let mut inbox = Inbox::new();
    server.poll(&mut inbox).unwrap();
    let events: Vec<Incoming> = std::iter::from_fn(|| inbox.pop()).collect();
    assert_eq!(events, vec![Incoming::Disconnected(peer)]);
    assert!(server.peers().is_empty());
}

#[test]
fn peer_limit_rejects_extra_clients() {
    let mut server = UdpTransport::bind("127.0.0.1:0").unwrap().with_max_peers(1);
    let mut first = UdpTransport::bind("127.0.0.1:0").unwrap();
    let mut second = UdpTransport::bind("127.0.0.1:0").unwrap();
    first.connect(server.local_addr());
    second.connect(server.local_addr());

    first.send_to(SERVER_PEER, Channel::Reliable, b"a").unwrap();
    wait_for_payloads(&mut server, 500);
    second.send_to(SERVER_PEER, Channel::Reliable, b"b").unwrap();
    thread::sleep(Duration::from_millis(20));
    wait_for_payloads(&mut server, 50);

    assert_eq!(server.peers().len(), 1);
}

#[test]
fn state_reaches_client_over_udp() {
    let config = SyncConfig::default();
    let (server_transport, client_transport) = pair();
    let mut server = SyncServer::new(config.clone(), server_transport).unwrap();
    let mut client = SyncClient::new(config, client_transport).unwrap();

    let id = server.spawn(NetworkedState::at(Vec3::new(3.0, 0.0, 4.0)), 0.0);

    // The server only learns about the client from its first datagram.
    client.update(0.0, 0.0);

    let start = Instant::now();
    let mut now = 0.0;
    while start.elapsed() < Duration::from_secs(2) && !client.shadow().contains(id) {
        now += 0.05;
        server.receive(now);
        if !server.viewers().is_empty() {
            server.network_tick(now);
        }
        thread::sleep(Duration::from_millis(2));
        client.receive(now);
    }

    let state = client.shadow().state(id).expect("state never arrived");
    assert_eq!(state.position, Vec3::new(3.0, 0.0, 4.0));
    assert!(client.is_connected());
    assert_eq!(server.viewers().len(), 1);
}
