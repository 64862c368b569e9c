//! Core data model.
//!
//! A trackable is something whose location is being published. It has
//! identity (a string id) and, optionally, the constraints that drive the
//! resolution decision for it.

pub mod presence;

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::resolution::ResolutionConstraints;

// ---------------------------------------------------------------------------
// Trackable
// ---------------------------------------------------------------------------

/// Newtype for trackable identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TrackableId(pub String);

impl TrackableId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TrackableId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for TrackableId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for TrackableId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// An object being tracked.
///
/// Immutable once built. Two trackables are the same trackable when their ids
/// match, regardless of constraints.
#[derive(Debug, Clone)]
pub struct Trackable {
    pub id: TrackableId,
    pub constraints: Option<ResolutionConstraints>,
}

impl Trackable {
    pub fn new(id: impl Into<TrackableId>) -> Self {
        Self {
            id: id.into(),
            constraints: None,
        }
    }

    /// Attach resolution constraints.
    pub fn constraints(mut self, constraints: ResolutionConstraints) -> Self {
        self.constraints = Some(constraints);
        self
    }
}

impl PartialEq for Trackable {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Trackable {}

impl std::hash::Hash for Trackable {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Accuracy class, from coarsest to finest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Accuracy {
    Minimum,
    Low,
    Balanced,
    High,
    Maximum,
}

impl std::fmt::Display for Accuracy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Accuracy::Minimum => "minimum",
            Accuracy::Low => "low",
            Accuracy::Balanced => "balanced",
            Accuracy::High => "high",
            Accuracy::Maximum => "maximum",
        };
        write!(f, "{s}")
    }
}

/// Desired accuracy, update interval and minimum displacement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub accuracy: Accuracy,

    /// How often an update is wanted. Serialized as whole milliseconds.
    #[serde(rename = "desired_interval_ms", with = "duration_ms")]
    pub desired_interval: Duration,

    /// Minimum movement in metres before a new update is worth sending.
    pub minimum_displacement: f64,
}

impl Resolution {
    pub fn new(accuracy: Accuracy, desired_interval: Duration, minimum_displacement: f64) -> Self {
        Self {
            accuracy,
            desired_interval,
            minimum_displacement,
        }
    }

    /// Is `self` a lower (cheaper) resolution than `other`?
    ///
    /// The longer interval is lower. With equal intervals the coarser
    /// accuracy is lower, and after that the larger displacement.
    pub fn is_lower_than(&self, other: &Resolution) -> bool {
        if self.desired_interval != other.desired_interval {
            return self.desired_interval > other.desired_interval;
        }
        if self.accuracy != other.accuracy {
            return self.accuracy < other.accuracy;
        }
        self.minimum_displacement > other.minimum_displacement
    }

    /// The lower of two resolutions ("lowest wins").
    pub fn lowest(self, other: Resolution) -> Resolution {
        if other.is_lower_than(&self) { other } else { self }
    }

    /// The higher of two resolutions.
    pub fn highest(self, other: Resolution) -> Resolution {
        if self.is_lower_than(&other) { other } else { self }
    }

    /// Copy with the interval scaled by `multiplier`, rounded to whole milliseconds.
    pub fn with_interval_multiplied(self, multiplier: f32) -> Resolution {
        let millis = (self.desired_interval.as_millis() as f64 * f64::from(multiplier)).round();
        Resolution {
            desired_interval: Duration::from_millis(millis.max(0.0) as u64),
            ..self
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

// ---------------------------------------------------------------------------
// Trackable state
// ---------------------------------------------------------------------------

/// Error details carried by failed or offline states.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInformation {
    pub code: Option<i32>,
    pub message: String,
}

impl ErrorInformation {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            message: message.into(),
        }
    }
}

impl From<&crate::error::Error> for ErrorInformation {
    fn from(error: &crate::error::Error) -> Self {
        match error {
            crate::error::Error::Fatal(information) => information.clone(),
            other => Self::new(other.to_string()),
        }
    }
}

/// Lifecycle state of a tracked object as seen by consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum TrackableState {
    /// Connected, present on the channel and subscribed to its presence.
    Online,
    /// Connected, but presence has not been entered or subscribed to yet.
    Publishing,
    Offline { error: Option<ErrorInformation> },
    Failed { error: ErrorInformation },
}

impl TrackableState {
    pub fn offline() -> Self {
        TrackableState::Offline { error: None }
    }
}

/// Read side of a trackable's state stream.
pub type StateStream = tokio::sync::watch::Receiver<TrackableState>;

// ---------------------------------------------------------------------------
// Publisher state
// ---------------------------------------------------------------------------

/// Connection lifecycle of the publisher as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PublisherState {
    /// No transport connection, nothing tracked.
    #[default]
    Idle,
    /// Transport connection is being started for the first trackable.
    Connecting,
    Connected,
    /// The last trackable went away and the transport is shutting down.
    Disconnecting,
    /// Terminal. No further work is executed.
    Stopped,
}

impl std::fmt::Display for PublisherState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            PublisherState::Idle => "idle",
            PublisherState::Connecting => "connecting",
            PublisherState::Connected => "connected",
            PublisherState::Disconnecting => "disconnecting",
            PublisherState::Stopped => "stopped",
        };
        write!(f, "{s}")
    }
}
