mod delta;
mod protocol;
mod quantize;

pub use delta::{
    DecodedFrame, DeltaEncoder, NetworkUpdate, RAW_ENTITY_BYTES, ShadowEntity, ShadowRegistry,
};
pub use protocol::{
    Command, EntityDelta, FieldSet, InputMessage, PROTOCOL_MAGIC, PROTOCOL_VERSION, Packet,
    PacketError, PacketHeader, PacketType, StateFrame,
};
pub use quantize::{quantize, quantize_angle, quantize_state, quantize_vec3};
