use std::io;

use thiserror::Error;

/// Errors that end a streaming session.
///
/// Every variant is fatal to the current session; the supervisor decides
/// whether to start another one.
#[derive(Debug, Error)]
pub enum StreamError {
    #[error("failed to connect to {host}:{port}: {reason}")]
    Connect {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("data source error: {0}")]
    Source(String),

    #[error("no blueprint matches {0:?}")]
    BlueprintNotFound(String),

    #[error("failed to spawn encoder `{program}`: {source}")]
    EncoderSpawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("encoder input closed: {0}")]
    EncoderWrite(#[source] io::Error),

    #[error("failed to signal encoder: {0}")]
    EncoderSignal(String),

    #[error("malformed frame #{sequence}: expected {expected} bytes, got {actual}")]
    MalformedFrame {
        sequence: u64,
        expected: usize,
        actual: usize,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Config(#[from] config::ConfigError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

