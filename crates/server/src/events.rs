use netsync::{Confidence, EntityId, PeerId};

#[derive(Debug, Clone)]
pub enum ServerEvent {
    ClientConnected {
        client_id: PeerId,
        entity_id: EntityId,
    },
    ClientDisconnected {
        client_id: PeerId,
    },
    Hit {
        attacker: EntityId,
        target: EntityId,
        confidence: Confidence,
    },
    Miss {
        attacker: EntityId,
        target: EntityId,
        distance: f32,
    },
    Error {
        message: String,
    },
}
