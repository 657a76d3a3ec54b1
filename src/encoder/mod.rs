//! External encoder process: argument vector, spawn and termination

pub mod args;
pub mod process;

use std::io::Write;

pub use args::EncoderArgs;
pub use process::{EncoderProcess, FfmpegLauncher};

use crate::StreamError;

/// Process control for the encoder. Never exposes its input stream.
pub trait EncoderControl: Send {
    /// Interrupt request when `graceful`, otherwise a kill
    fn stop(&mut self, graceful: bool) -> Result<(), StreamError>;

    /// Non-blocking exit check; reaps the process once it is gone
    fn has_exited(&mut self) -> Result<bool, StreamError>;
}

/// Writable raw-frame input of a running encoder
pub type EncoderInput = Box<dyn Write + Send>;

/// Starts one encoder per session
pub trait EncoderLauncher: Send + Sync {
    type Process: EncoderControl + 'static;

    fn launch(&self, args: &EncoderArgs) -> Result<(Self::Process, EncoderInput), StreamError>;
}
