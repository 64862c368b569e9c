//! Error types for trackq.
//!
//! `Error` is what callers see through callbacks and facade methods. It is
//! `Clone` because a single outcome is fanned out to every duplicate caller.
//! Failures inside work logic that nobody planned for travel as
//! `anyhow::Error` and stay on the operational side (logs, metrics).

use thiserror::Error;

use crate::model::{ErrorInformation, TrackableId};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    #[error("publisher has been stopped")]
    Stopped,

    #[error("work queue is full")]
    QueueFull,

    #[error("connection failed for trackable {trackable_id}: {reason}")]
    Connection {
        trackable_id: TrackableId,
        reason: String,
    },

    #[error("trackable {0} was removed before it finished being added")]
    RemovalRequested(TrackableId),

    /// The transport refused in a way retrying will not fix.
    #[error("fatal transport failure: {}", .0.message)]
    Fatal(ErrorInformation),

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("invalid presence data: {0}")]
    InvalidPresenceData(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("unexpected error: {0}")]
    Unexpected(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Wrap an unexpected work failure so it can be delivered to a callback.
    pub fn unexpected(error: &anyhow::Error) -> Self {
        Error::Unexpected(format!("{error:#}"))
    }

    /// Whether the failure means the publisher no longer accepts work.
    pub fn is_stopped(&self) -> bool {
        matches!(self, Error::Stopped)
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Fatal(_))
    }
}

impl From<std::io::Error> for Error {
    fn from(error: std::io::Error) -> Self {
        Error::Other(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
