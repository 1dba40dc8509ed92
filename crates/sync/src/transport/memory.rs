use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::{Channel, Inbox, Incoming, PeerId, SERVER_PEER, Transport, TransportError};

#[derive(Debug, Default)]
struct HubState {
    mailboxes: HashMap<PeerId, VecDeque<Incoming>>,
    next_peer_id: PeerId,
    drop_unreliable: bool,
}

impl HubState {
    fn deliver(&mut self, to: PeerId, incoming: Incoming) -> bool {
        match self.mailboxes.get_mut(&to) {
            Some(mailbox) => {
                mailbox.push_back(incoming);
                true
            }
            None => false,
        }
    }
}

/// In-process star network: one server, any number of clients.
#[derive(Debug, Clone, Default)]
pub struct MemoryHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryHub {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HubState> {
        lock(&self.state)
    }

    pub fn server(&self) -> MemoryTransport {
        self.lock().mailboxes.entry(SERVER_PEER).or_default();
        MemoryTransport {
            id: SERVER_PEER,
            state: Arc::clone(&self.state),
        }
    }

    /// Attaches a client. Both ends see `Connected` on their next poll.
    pub fn connect(&self) -> MemoryTransport {
        let mut state = self.lock();
        state.next_peer_id += 1;
        let id = state.next_peer_id;

        let mut mailbox = VecDeque::new();
        mailbox.push_back(Incoming::Connected(SERVER_PEER));
        state.mailboxes.insert(id, mailbox);
        state.deliver(SERVER_PEER, Incoming::Connected(id));

        MemoryTransport {
            id,
            state: Arc::clone(&self.state),
        }
    }

    /// Simulates total loss on the unreliable channel.
    pub fn set_drop_unreliable(&self, drop: bool) {
        self.lock().drop_unreliable = drop;
    }
}

fn lock(state: &Mutex<HubState>) -> MutexGuard<'_, HubState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct MemoryTransport {
    id: PeerId,
    state: Arc<Mutex<HubState>>,
}

impl MemoryTransport {
    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn disconnect(&mut self) {
        let mut state = lock(&self.state);
        if state.mailboxes.remove(&self.id).is_none() {
            return;
        }
        let others: Vec<PeerId> = if self.id == SERVER_PEER {
            state.mailboxes.keys().copied().collect()
        } else {
            vec![SERVER_PEER]
        };
        for peer in others {
            state.deliver(peer, Incoming::Disconnected(self.id));
        }
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl Transport for MemoryTransport {
    fn peers(&self) -> Vec<PeerId> {
        let state = lock(&self.state);
        if !state.mailboxes.contains_key(&self.id) {
            return Vec::new();
        }
        let mut peers: Vec<PeerId> = if self.id == SERVER_PEER {
            state
                .mailboxes
                .keys()
                .copied()
                .filter(|&p| p != SERVER_PEER)
                .collect()
        } else if state.mailboxes.contains_key(&SERVER_PEER) {
            vec![SERVER_PEER]
        } else {
            Vec::new()
        };
        peers.sort_unstable();
        peers
    }

    fn send_to(
        &mut self,
        peer: PeerId,
        channel: Channel,
        bytes: &[u8],
    ) -> Result<usize, TransportError> {
        let mut state = lock(&self.state);
        if !state.mailboxes.contains_key(&self.id) {
            return Err(TransportError::Closed);
        }
        if self.id != SERVER_PEER && peer != SERVER_PEER {
            return Err(TransportError::UnknownPeer(peer));
        }
        if !state.mailboxes.contains_key(&peer) {
            return Err(TransportError::UnknownPeer(peer));
        }
        if channel == Channel::Unreliable && state.drop_unreliable {
            return Ok(bytes.len());
        }

        state.deliver(
            peer,
            Incoming::Payload {
                peer: self.id,
                bytes: bytes.to_vec(),
            },
        );
        Ok(bytes.len())
    }

    fn poll(&mut self, inbox: &mut Inbox) -> Result<(), TransportError> {
        let mut state = lock(&self.state);
        let mailbox = state
            .mailboxes
            .get_mut(&self.id)
            .ok_or(TransportError::Closed)?;
        for incoming in mailbox.drain(..) {
            inbox.push(incoming);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_notifies_both_sides() {
        let hub = MemoryHub::new();
        let mut server = hub.server();
        let mut client = hub.connect();

        let mut inbox = Inbox::new();
        server.poll(&mut inbox).unwrap();
        assert_eq!(inbox.pop(), Some(Incoming::Connected(client.id())));

        client.poll(&mut inbox).unwrap();
        assert_eq!(inbox.pop(), Some(Incoming::Connected(SERVER_PEER)));
        assert_eq!(server.peers(), vec![client.id()]);
    }

    #[test]
    fn payload_reaches_server() {
        let hub = MemoryHub::new();
        let mut server = hub.server();
        let mut client = hub.connect();

        client
            .send_to(SERVER_PEER, Channel::Reliable, &[1, 2, 3])
            .unwrap();

        let mut inbox = Inbox::new();
        server.poll(&mut inbox).unwrap();
        let payloads: Vec<Incoming> = std::iter::from_fn(|| inbox.pop())
            .filter(|i| matches!(i, Incoming::Payload { .. }))
            .collect();
        assert_eq!(
            payloads,
            vec![Incoming::Payload {
                peer: client.id(),
                bytes: vec![1, 2, 3]
            }]
        );
    }

    #[test]
    fn dropped_client_disconnects() {
        let hub = MemoryHub::new();
        let mut server = hub.server();
        let client = hub.connect();
        let id = client.id();
        drop(client);

        let mut inbox = Inbox::new();
        server.poll(&mut inbox).unwrap();
        let events: Vec<Incoming> = std::iter::from_fn(|| inbox.pop()).collect();
        assert_eq!(
            events,
            vec![Incoming::Connected(id), Incoming::Disconnected(id)]
        );
        assert!(server.peers().is_empty());
        assert!(matches!(
            server.send_to(id, Channel::Unreliable, &[0]),
            Err(TransportError::UnknownPeer(_))
        ));
    }

    #[test]
    fn unreliable_loss_keeps_reliable() {
        let hub = MemoryHub::new();
        let mut server = hub.server();
        let mut client = hub.connect();
        hub.set_drop_unreliable(true);

        server
            .send_to(client.id(), Channel::Unreliable, &[9])
            .unwrap();
        server.send_to(client.id(), Channel::Reliable, &[7]).unwrap();

        let mut inbox = Inbox::new();
        client.poll(&mut inbox).unwrap();
        let payloads: Vec<Vec<u8>> = std::iter::from_fn(|| inbox.pop())
            .filter_map(|i| match i {
                Incoming::Payload { bytes, .. } => Some(bytes),
                _ => None,
            })
            .collect();
        assert_eq!(payloads, vec![vec![7]]);
    }
}
