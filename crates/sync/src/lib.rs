pub mod client;
pub mod codec;
pub mod config;
pub mod event;
pub mod server;
pub mod state;
pub mod stats;
pub mod time;
pub mod transport;

pub use client::{
    EntitySnapshot, InputBuffer, Interpolator, LinearMotion, LocalInput, MotionModel,
    PredictionFrame, Predictor, Reconciliation, Sample, SampleMode, SnapshotHistory, SyncClient,
};
pub use codec::{
    Command, DeltaEncoder, EntityDelta, FieldSet, InputMessage, NetworkUpdate, Packet,
    PacketError, PacketType, ShadowRegistry, StateFrame, quantize,
};
pub use config::{
    ConfigError, DEFAULT_CLIENT_TICK_RATE, DEFAULT_NETWORK_TICK_RATE, Precision, PriorityWeights,
    SyncConfig,
};
pub use event::{ClientEvent, EventQueue, SyncEvent};
pub use server::{
    ClientInput, CommandBuffer, Confidence, HitCheck, LagCompensationFrame, LagCompensator,
    SyncServer, UpdateCollector, Viewer, ViewerBatch,
};
pub use state::{
    DirtyFields, EntityId, EntityNetworkState, EntityRegistry, Networked, NetworkedMut,
    NetworkedState,
};
pub use stats::{RttEstimator, SyncStats};
pub use time::FixedTimestep;
pub use transport::{
    Channel, Inbox, Incoming, MemoryHub, MemoryTransport, PeerId, SERVER_PEER, Transport,
    TransportError, UdpTransport,
};
