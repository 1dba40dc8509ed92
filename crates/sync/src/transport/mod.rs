mod memory;
mod udp;

use std::collections::VecDeque;

pub use memory::{MemoryHub, MemoryTransport};
pub use udp::{DEFAULT_PEER_TIMEOUT, MAX_DATAGRAM_SIZE, UdpTransport};

pub type PeerId = u32;

pub const SERVER_PEER: PeerId = 0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Unreliable,
    Reliable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Connected(PeerId),
    Disconnected(PeerId),
    Payload { peer: PeerId, bytes: Vec<u8> },
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("transport io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("unknown peer {0}")]
    UnknownPeer(PeerId),
    #[error("payload of {size} bytes exceeds limit of {max}")]
    Oversize { size: usize, max: usize },
    #[error("transport closed")]
    Closed,
}

#[derive(Debug, Default)]
pub struct Inbox {
    queue: VecDeque<Incoming>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, incoming: Incoming) {
        self.queue.push_back(incoming);
    }

    pub fn pop(&mut self) -> Option<Incoming> {
        self.queue.pop_front()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

pub trait Transport {
    fn peers(&self) -> Vec<PeerId>;

    fn send_to(
        &mut self,
        peer: PeerId,
        channel: Channel,
        bytes: &[u8],
    ) -> Result<usize, TransportError>;

    /// Sends to every peer. All peers are attempted; the last failure is returned.
    fn broadcast(&mut self, channel: Channel, bytes: &[u8]) -> Result<usize, TransportError> {
        let mut sent = 0;
        let mut failure = None;
        for peer in self.peers() {
            match self.send_to(peer, channel, bytes) {
                Ok(n) => sent += n,
                Err(e) => failure = Some(e),
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(sent),
        }
    }

    fn poll(&mut self, inbox: &mut Inbox) -> Result<(), TransportError>;
}
