mod history;
mod input;
mod prediction;
mod session;

pub use history::{EntitySnapshot, Interpolator, Sample, SampleMode, ServerClock, SnapshotHistory};
pub use input::{InputBuffer, LocalInput};
pub use prediction::{LinearMotion, MotionModel, PredictionFrame, Predictor, Reconciliation};
pub use session::SyncClient;
