//! Error types for stream subscriptions.

use thiserror::Error;

use crate::channel::StreamKind;

/// Errors raised while subscribing to and processing a live stream.
///
/// Variants carry rendered messages rather than source errors so that an
/// error can be cloned into every consumer's view alongside the last good
/// value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    /// Opening the push channel failed.
    #[error("Failed to open {stream} channel: {reason}")]
    Connect { stream: StreamKind, reason: String },

    /// The channel broke or the backend sent an error frame.
    #[error("Transport fault: {0}")]
    Transport(String),

    /// A payload did not match the expected shape.
    #[error("Failed to decode {stream} payload: {reason}")]
    Decode { stream: StreamKind, reason: String },

    /// The one-shot log backlog query failed.
    #[error("Failed to fetch log backlog: {0}")]
    Backlog(String),

    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// The channel has already been closed.
    #[error("Channel closed")]
    Closed,
}

impl Error {
    /// Transport and connect faults are recovered by reconnecting.
    pub fn is_transport(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Connect { .. })
    }

    pub fn is_decode(&self) -> bool {
        matches!(self, Error::Decode { .. })
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Error::Config(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Backlog("request timed out".to_string())
        } else {
            Error::Backlog(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
