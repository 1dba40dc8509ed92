use glam::Vec3;
use rkyv::{Archive, Deserialize, Serialize, rancor};

use crate::state::{DirtyFields, EntityId, NetworkedState};

pub const PROTOCOL_MAGIC: u32 = 0x4E53_594E;
pub const PROTOCOL_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Archive, Serialize, Deserialize)]
#[rkyv(compare(PartialEq), derive(Debug))]
pub struct PacketHeader {
    pub magic: u32,
    pub version: u32,
}

impl Default for PacketHeader {
    fn default() -> Self {
        Self {
            magic: PROTOCOL_MAGIC,
            version: PROTOCOL_VERSION,
        }
    }
}

impl PacketHeader {
    pub fn is_valid(&self) -> bool {
        self.magic == PROTOCOL_MAGIC && self.version == PROTOCOL_VERSION
    }
}

#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub enum PacketType {
    State(StateFrame),
    Input(InputMessage),
    Ping { sent_at: f64 },
    Pong { sent_at: f64 },
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct StateFrame {
    pub frame: u64,
    pub server_time: f64,
    pub input_ack: Option<u64>,
    pub controlled: Option<u64>,
    pub entities: Vec<EntityDelta>,
    pub removed: Vec<u64>,
}

impl StateFrame {
    pub fn new(frame: u64, server_time: f64) -> Self {
        Self {
            frame,
            server_time,
            input_ack: None,
            controlled: None,
            entities: Vec::new(),
            removed: Vec::new(),
        }
    }
}

/// Present fields packed in `DirtyFields` bit order:
/// position (3), rotation (1), velocity (3), health (1).
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct EntityDelta {
    pub entity_id: u64,
    pub fields: u8,
    pub values: Vec<f32>,
}

impl EntityDelta {
    pub fn from_fields(entity_id: EntityId, fields: &FieldSet) -> Self {
        let mut values = Vec::with_capacity(8);
        if let Some(p) = fields.position {
            values.extend_from_slice(&p.to_array());
        }
        if let Some(r) = fields.rotation {
            values.push(r);
        }
        if let Some(v) = fields.velocity {
            values.extend_from_slice(&v.to_array());
        }
        if let Some(h) = fields.health {
            values.push(h);
        }

        Self {
            entity_id,
            fields: fields.mask().bits(),
            values,
        }
    }

    pub fn to_fields(&self) -> Result<FieldSet, PacketError> {
        let mask = DirtyFields::from_bits(self.fields).ok_or(PacketError::Malformed {
            entity_id: self.entity_id,
            reason: "unknown field bits",
        })?;

        let expected = expected_value_count(mask);
        if self.values.len() != expected {
            return Err(PacketError::Malformed {
                entity_id: self.entity_id,
                reason: "field values do not match field mask",
            });
        }
        if self.values.iter().any(|v| !v.is_finite()) {
            return Err(PacketError::Malformed {
                entity_id: self.entity_id,
                reason: "non-finite field value",
            });
        }

        let mut values = self.values.iter().copied();
        let mut next = || values.next().unwrap_or_default();
        let mut set = FieldSet::default();

        if mask.contains(DirtyFields::POSITION) {
            set.position = Some(Vec3::new(next(), next(), next()));
        }
        if mask.contains(DirtyFields::ROTATION) {
            set.rotation = Some(next());
        }
        if mask.contains(DirtyFields::VELOCITY) {
            set.velocity = Some(Vec3::new(next(), next(), next()));
        }
        if mask.contains(DirtyFields::HEALTH) {
            set.health = Some(next());
        }

        Ok(set)
    }
}

fn expected_value_count(mask: DirtyFields) -> usize {
    let mut count = 0;
    if mask.contains(DirtyFields::POSITION) {
        count += 3;
    }
    if mask.contains(DirtyFields::ROTATION) {
        count += 1;
    }
    if mask.contains(DirtyFields::VELOCITY) {
        count += 3;
    }
    if mask.contains(DirtyFields::HEALTH) {
        count += 1;
    }
    count
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FieldSet {
    pub position: Option<Vec3>,
    pub rotation: Option<f32>,
    pub velocity: Option<Vec3>,
    pub health: Option<f32>,
}

impl FieldSet {
    pub fn full(state: &NetworkedState) -> Self {
        Self::from_state(state, DirtyFields::all())
    }

    pub fn from_state(state: &NetworkedState, mask: DirtyFields) -> Self {
        Self {
            position: mask
                .contains(DirtyFields::POSITION)
                .then_some(state.position),
            rotation: mask
                .contains(DirtyFields::ROTATION)
                .then_some(state.rotation),
            velocity: mask
                .contains(DirtyFields::VELOCITY)
                .then_some(state.velocity),
            health: mask.contains(DirtyFields::HEALTH).then_some(state.health),
        }
    }

    pub fn mask(&self) -> DirtyFields {
        let mut mask = DirtyFields::empty();
        mask.set(DirtyFields::POSITION, self.position.is_some());
        mask.set(DirtyFields::ROTATION, self.rotation.is_some());
        mask.set(DirtyFields::VELOCITY, self.velocity.is_some());
        mask.set(DirtyFields::HEALTH, self.health.is_some());
        mask
    }

    pub fn is_empty(&self) -> bool {
        self.mask().is_empty()
    }

    pub fn apply_to(&self, state: &mut NetworkedState) {
        if let Some(position) = self.position {
            state.position = position;
        }
        if let Some(rotation) = self.rotation {
            state.rotation = rotation;
        }
        if let Some(velocity) = self.velocity {
            state.velocity = velocity;
        }
        if let Some(health) = self.health {
            state.health = health;
        }
    }

    pub fn merge(&mut self, later: &FieldSet) {
        self.position = later.position.or(self.position);
        self.rotation = later.rotation.or(self.rotation);
        self.velocity = later.velocity.or(self.velocity);
        self.health = later.health.or(self.health);
    }
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct InputMessage {
    pub frame: u64,
    pub client_time: f64,
    pub movement: Option<[f32; 3]>,
    pub commands: Vec<Command>,
}

#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Command {
    pub entity_id: u64,
    pub kind: u16,
    pub params: Vec<f32>,
    pub client_time: f64,
}

impl Command {
    pub const KIND_ATTACK: u16 = 1;
    pub const KIND_USE: u16 = 2;

    pub fn new(entity_id: EntityId, kind: u16, client_time: f64) -> Self {
        Self {
            entity_id,
            kind,
            params: Vec::new(),
            client_time,
        }
    }

    pub fn with_params(mut self, params: Vec<f32>) -> Self {
        self.params = params;
        self
    }
}

#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
#[rkyv(derive(Debug))]
pub struct Packet {
    pub header: PacketHeader,
    pub payload: PacketType,
}

#[derive(Debug, thiserror::Error)]
pub enum PacketError {
    #[error("serialization failed: {0}")]
    Serialize(rancor::Error),
    #[error("deserialization failed: {0}")]
    Deserialize(rancor::Error),
    #[error("invalid packet header")]
    InvalidHeader,
    #[error("malformed delta for entity {entity_id}: {reason}")]
    Malformed {
        entity_id: u64,
        reason: &'static str,
    },
}

impl Packet {
    pub fn new(payload: PacketType) -> Self {
        Self {
            header: PacketHeader::default(),
            payload,
        }
    }

    pub fn serialize(&self) -> Result<Vec<u8>, PacketError> {
        rkyv::to_bytes::<rancor::Error>(self)
            .map(|aligned| aligned.to_vec())
            .map_err(PacketError::Serialize)
    }

    pub fn deserialize(data: &[u8]) -> Result<Self, PacketError> {
        // Datagrams land in arbitrarily aligned buffers.
        let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(data.len());
        aligned.extend_from_slice(data);

        let packet = rkyv::from_bytes::<Self, rancor::Error>(&aligned)
            .map_err(PacketError::Deserialize)?;
        if !packet.header.is_valid() {
            return Err(PacketError::InvalidHeader);
        }
        Ok(packet)
    }
}
