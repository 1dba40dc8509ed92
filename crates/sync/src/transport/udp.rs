use std::collections::HashMap;
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::{Duration, Instant};

use super::{Channel, Inbox, Incoming, PeerId, SERVER_PEER, Transport, TransportError};

pub const MAX_DATAGRAM_SIZE: usize = 1400;
pub const DEFAULT_PEER_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct UdpPeer {
    addr: SocketAddr,
    last_receive_time: Instant,
}

/// Non-blocking UDP transport. Peers are learned from their first datagram.
/// The reliable channel is delivered best-effort.
pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
    peers: HashMap<PeerId, UdpPeer>,
    peers_by_addr: HashMap<SocketAddr, PeerId>,
    next_peer_id: PeerId,
    max_peers: usize,
    timeout: Duration,
    recv_buffer: [u8; MAX_DATAGRAM_SIZE],
    pending: Vec<Incoming>,
}

impl UdpTransport {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        let local_addr = socket.local_addr()?;

        log::info!("UDP transport bound to {}", local_addr);

        Ok(Self {
            socket,
            local_addr,
            peers: HashMap::new(),
            peers_by_addr: HashMap::new(),
            next_peer_id: SERVER_PEER + 1,
            max_peers: 64,
            timeout: DEFAULT_PEER_TIMEOUT,
            recv_buffer: [0u8; MAX_DATAGRAM_SIZE],
            pending: Vec::new(),
        })
    }

    pub fn with_max_peers(mut self, max_peers: usize) -> Self {
        self.max_peers = max_peers;
        self
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self, peer: PeerId) -> Option<SocketAddr> {
        self.peers.get(&peer).map(|p| p.addr)
    }

    /// Registers `remote` as the server peer. Used by clients.
    pub fn connect(&mut self, remote: SocketAddr) -> PeerId {
        self.insert_peer(SERVER_PEER, remote);
        SERVER_PEER
    }

    fn insert_peer(&mut self, id: PeerId, addr: SocketAddr) {
        self.peers.insert(
            id,
            UdpPeer {
                addr,
                last_receive_time: Instant::now(),
            },
        );
        self.peers_by_addr.insert(addr, id);
        self.pending.push(Incoming::Connected(id));
        log::info!("Peer {} at {}", id, addr);
    }

    fn accept(&mut self, addr: SocketAddr) -> Option<PeerId> {
        if let Some(&id) = self.peers_by_addr.get(&addr) {
            return Some(id);
        }
        if self.peers.len() >= self.max_peers {
            log::warn!("Rejecting datagram from {}: peer limit reached", addr);
            return None;
        }
        let id = self.next_peer_id;
        self.next_peer_id += 1;
        self.insert_peer(id, addr);
        Some(id)
    }

    fn cleanup_timed_out(&mut self) {
        let timed_out: Vec<PeerId> = self
            .peers
            .iter()
            .filter(|(_, p)| p.last_receive_time.elapsed() > self.timeout)
            .map(|(&id, _)| id)
            .collect();

        for id in timed_out {
            if let Some(peer) = self.peers.remove(&id) {
                self.peers_by_addr.remove(&peer.addr);
                log::info!("Peer {} timed out", id);
                self.pending.push(Incoming::Disconnected(id));
            }
        }
    }
}

impl Transport for UdpTransport {
    fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.peers.keys().copied().collect();
        peers.sort_unstable();
        peers
    }

    fn send_to(
        &mut self,
        peer: PeerId,
        _channel: Channel,
        bytes: &[u8],
    ) -> Result<usize, TransportError> {
        if bytes.len() > MAX_DATAGRAM_SIZE {
            return Err(TransportError::Oversize {
                size: bytes.len(),
                max: MAX_DATAGRAM_SIZE,
            });
        }
        let addr = self
            .peers
            .get(&peer)
            .map(|p| p.addr)
            .ok_or(TransportError::UnknownPeer(peer))?;

        Ok(self.socket.send_to(bytes, addr)?)
    }

    fn poll(&mut self, inbox: &mut Inbox) -> Result<(), TransportError> {
        loop {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((size, addr)) => {
                    let Some(peer) = self.accept(addr) else {
                        continue;
                    };
                    if let Some(p) = self.peers.get_mut(&peer) {
                        p.last_receive_time = Instant::now();
                    }
                    self.pending.push(Incoming::Payload {
                        peer,
                        bytes: self.recv_buffer[..size].to_vec(),
                    });
                }
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                // ICMP port unreachable from a vanished peer surfaces here on some platforms.
                Err(ref e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e.into()),
            }
        }

        self.cleanup_timed_out();

        for incoming in self.pending.drain(..) {
            inbox.push(incoming);
        }
        Ok(())
    }
}
