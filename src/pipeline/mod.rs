pub mod buffer;
pub mod consumer;
pub mod control;
pub mod producer;
pub mod shutdown;
pub mod stats;

pub use buffer::FrameBuffer;
pub use consumer::{ConsumerReport, FrameConsumer, Pacing};
pub use control::{ControlLoop, DriveMode};
pub use producer::FrameProducer;
pub use shutdown::{ShutdownCoordinator, ShutdownOutcome, ShutdownRequest, ShutdownState};
pub use stats::{RateStats, SharedStats, StatsReport};

use crate::StreamError;

/// Things the session's control thread reacts to
#[derive(Debug)]
pub enum SessionEvent {
    ConsumerEnded(Result<ConsumerReport, StreamError>),
    ProducerFailed(StreamError),
    ShutdownComplete(ShutdownRequest, ShutdownOutcome),
}
