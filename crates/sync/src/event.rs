use std::collections::VecDeque;

use glam::Vec3;

use crate::state::EntityId;
use crate::transport::PeerId;

#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    ViewerJoined(PeerId),
    ViewerLeft(PeerId),
    SendFailed { peer: PeerId, reason: String },
    PayloadDropped { peer: PeerId, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Connected,
    Disconnected,
    EntityAppeared(EntityId),
    EntityRemoved(EntityId),
    Corrected {
        entity: EntityId,
        frame: u64,
        error: Vec3,
        replayed: usize,
    },
    PayloadDropped(String),
}

/// Events raised during a tick, drained once by the owner in raise order.
#[derive(Debug)]
pub struct EventQueue<E> {
    pending: VecDeque<E>,
    max_pending: usize,
}

impl<E> Default for EventQueue<E> {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl<E> EventQueue<E> {
    pub fn new(max_pending: usize) -> Self {
        Self {
            pending: VecDeque::new(),
            max_pending: max_pending.max(1),
        }
    }

    pub fn push(&mut self, event: E) {
        if self.pending.len() >= self.max_pending {
            self.pending.pop_front();
        }
        self.pending.push_back(event);
    }

    pub fn drain(&mut self) -> Vec<E> {
        self.pending.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
