//! Error types for endpoint resolution, capture and engine lifecycle

use std::time::Duration;

use thiserror::Error;

/// Failure to turn connection parameters into a playable stream address.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("camera host is empty")]
    EmptyHost,
    #[error("invalid stream uri `{uri}`: {reason}")]
    InvalidUri { uri: String, reason: String },
    #[error("unsupported stream scheme `{0}`")]
    UnsupportedScheme(String),
    #[error("endpoint discovery failed: {0}")]
    Discovery(String),
}

/// Failure reported by a stream source or one of its handles.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("failed to build capture pipeline: {0}")]
    Pipeline(String),
    #[error("stream did not open within {0:?}")]
    OpenTimeout(Duration),
    #[error("no frame within {0:?}")]
    ReadTimeout(Duration),
    #[error("end of stream")]
    EndOfStream,
    #[error("stream error: {0}")]
    Stream(String),
    #[error("failed to map frame buffer: {0}")]
    BufferMap(String),
    #[error("stream handle is closed")]
    Closed,
}

impl CaptureError {
    /// Clean end of stream, as opposed to an error
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, CaptureError::EndOfStream)
    }
}

/// Failure of a `start()` attempt. Never raised by the engine, only reported.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("endpoint resolution failed: {0}")]
    Resolve(#[from] ResolveError),
    #[error("failed to open stream: {0}")]
    Open(#[source] CaptureError),
    #[error("failed to spawn acquisition thread: {0}")]
    Spawn(String),
}

/// Failure to load or validate configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T, E = CaptureError> = std::result::Result<T, E>;
