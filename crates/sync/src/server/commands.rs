use std::collections::{HashMap, VecDeque};

use glam::Vec3;

use crate::codec::{Command, InputMessage};
use crate::transport::PeerId;

#[derive(Debug, Clone, PartialEq)]
pub struct ClientInput {
    pub client: PeerId,
    pub frame: u64,
    pub timestamp: f64,
    pub movement: Option<Vec3>,
    pub commands: Vec<Command>,
    pub processed: bool,
}

impl ClientInput {
    pub fn from_message(client: PeerId, message: InputMessage) -> Self {
        Self {
            client,
            frame: message.frame,
            timestamp: message.client_time,
            movement: message.movement.map(Vec3::from_array),
            commands: message.commands,
            processed: false,
        }
    }
}

/// Inputs received from clients, consumed once by the simulation.
#[derive(Debug)]
pub struct CommandBuffer {
    inputs: VecDeque<ClientInput>,
    max_size: usize,
    last_received: HashMap<PeerId, u64>,
    last_processed: HashMap<PeerId, u64>,
}

impl CommandBuffer {
    pub fn new(max_size: usize) -> Self {
        Self {
            inputs: VecDeque::with_capacity(max_size),
            max_size: max_size.max(1),
            last_received: HashMap::new(),
            last_processed: HashMap::new(),
        }
    }

    /// Returns `false` for duplicates and frames older than one already queued.
    pub fn push(&mut self, client: PeerId, message: InputMessage) -> bool {
        if self
            .last_received
            .get(&client)
            .is_some_and(|&last| message.frame <= last)
        {
            return false;
        }
        self.last_received.insert(client, message.frame);

        if self.inputs.len() >= self.max_size {
            if let Some(evicted) = self.inputs.pop_front() {
                log::warn!(
                    "Command buffer full, dropping input {} from client {}",
                    evicted.frame,
                    evicted.client
                );
            }
        }
        self.inputs
            .push_back(ClientInput::from_message(client, message));
        true
    }

    /// Hands out every queued input in arrival order, marked processed.
    pub fn drain_pending(&mut self) -> Vec<ClientInput> {
        let mut drained = Vec::with_capacity(self.inputs.len());
        while let Some(mut input) = self.inputs.pop_front() {
            input.processed = true;
            let last = self.last_processed.entry(input.client).or_insert(input.frame);
            *last = (*last).max(input.frame);
            drained.push(input);
        }
        drained
    }

    pub fn last_processed(&self, client: PeerId) -> Option<u64> {
        self.last_processed.get(&client).copied()
    }

    pub fn remove_client(&mut self, client: PeerId) {
        self.inputs.retain(|i| i.client != client);
        self.last_received.remove(&client);
        self.last_processed.remove(&client);
    }

    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }
}
