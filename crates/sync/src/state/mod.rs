mod entity;
mod registry;

pub use entity::{
    DirtyFields, EntityId, EntityNetworkState, Networked, NetworkedMut, NetworkedState,
    lerp_angle, shortest_angle, wrap_angle,
};
pub use registry::EntityRegistry;
