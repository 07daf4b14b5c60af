//! Error types.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use dslab_network::{TopologyError, TransportError};

/// Errors of a pacing engine.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PacingError {
    #[error("invalid pacing config: {0}")]
    InvalidConfig(String),
    #[error("pacing engine is not configured")]
    NotConfigured,
    #[error("pacing engine is already running")]
    AlreadyRunning,
    #[error("send event {event} fired while the engine is {state}")]
    SchedulingRace { event: u64, state: String },
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Error recorded by a trace sink.
#[derive(Error, Debug)]
pub enum TraceError {
    #[error("record at {time} precedes the last record at {last} in {path}")]
    OutOfOrder { path: String, time: f64, last: f64 },
    #[error("failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: io::Error,
    },
}

/// Errors returned by [`TraceHarness::flush`](crate::trace::TraceHarness::flush).
#[derive(Error, Debug)]
pub enum FlushError {
    #[error("traces were already flushed")]
    AlreadyFlushed,
    #[error("{} trace error(s): {}", .0.len(), .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Failed(Vec<TraceError>),
}

/// Experiment errors.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error(transparent)]
    Topology(#[from] TopologyError),
    #[error("flows {first} and {second} both receive on port {port} of node `{node}`")]
    DuplicatePort {
        node: String,
        port: u16,
        first: usize,
        second: usize,
    },
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("failed to read config {}: {source}", .path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse config: {0}")]
    ConfigParse(#[from] serde_yaml::Error),
    #[error(transparent)]
    Flush(#[from] FlushError),
}

impl From<PacingError> for Error {
    fn from(err: PacingError) -> Self {
        match err {
            PacingError::Transport(err) => Error::Transport(err),
            other => Error::InvalidConfig(other.to_string()),
        }
    }
}
