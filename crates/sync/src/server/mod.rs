mod collector;
mod commands;
mod host;
mod lag;

pub use collector::{UpdateCollector, Viewer, ViewerBatch};
pub use commands::{ClientInput, CommandBuffer};
pub use host::SyncServer;
pub use lag::{Confidence, HitCheck, LagCompensationFrame, LagCompensator, Rewind};
