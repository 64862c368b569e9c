//! Work specifications and step results for the publisher queue.

use std::fmt;
use std::time::Duration;

use crate::callback::ResultCallback;
use crate::error::{Error, Result};
use crate::model::presence::{ConnectionStateChange, PresenceMessage};
use crate::model::{ErrorInformation, StateStream, Trackable, TrackableId};
use crate::transport::{ChannelStateListener, PresenceListener};

/// Listeners a trackable's channel is wired to.
#[derive(Clone)]
pub struct Listeners {
    pub presence: PresenceListener,
    pub channel_state: ChannelStateListener,
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Listeners")
    }
}

/// Everything the publisher queue can be asked to do.
pub enum WorkerSpecification {
    AddTrackable {
        trackable: Trackable,
        callback: ResultCallback<StateStream>,
        listeners: Listeners,
    },
    ConnectionCreated {
        trackable: Trackable,
        callback: ResultCallback<StateStream>,
        listeners: Listeners,
    },
    ConnectionReady {
        trackable: Trackable,
        callback: ResultCallback<StateStream>,
        listeners: Listeners,
        is_subscribed_to_presence: bool,
        has_entered_presence: bool,
    },
    AddTrackableFailed {
        trackable: Trackable,
        callback: ResultCallback<StateStream>,
        error: Error,
        /// Whether the shared transport connection is up and may need stopping.
        is_connected: bool,
    },
    TrackableRemovalRequested {
        trackable: Trackable,
        callback: ResultCallback<StateStream>,
        /// Outcome of disconnecting the half-added trackable.
        result: Result<()>,
    },
    RemoveTrackable {
        trackable: Trackable,
        callback: ResultCallback<bool>,
    },
    DisconnectSuccess {
        trackable: Trackable,
        callback: ResultCallback<bool>,
    },
    StoppingConnectionFinished,
    RetrySubscribeToPresence {
        trackable: Trackable,
        presence_listener: PresenceListener,
    },
    RetrySubscribeToPresenceSuccess {
        trackable: Trackable,
    },
    RetryEnterPresence {
        trackable: Trackable,
    },
    RetryEnterPresenceSuccess {
        trackable: Trackable,
    },
    /// Give up on a trackable: its stream ends in `Failed`.
    FailTrackable {
        trackable: Trackable,
        error: ErrorInformation,
    },
    PresenceMessage {
        trackable_id: TrackableId,
        message: PresenceMessage,
    },
    ChannelConnectionStateChange {
        trackable_id: TrackableId,
        change: ConnectionStateChange,
    },
    /// The shared connection changed state.
    ConnectionStateChange {
        change: ConnectionStateChange,
    },
    BatteryLevelChanged {
        level: f32,
    },
    ProximityChanged {
        trackable_id: TrackableId,
        proximity: Option<f64>,
    },
    Stop {
        callback: ResultCallback<()>,
        timeout: Duration,
    },
}

impl WorkerSpecification {
    /// Name of the worker this specification turns into.
    pub fn name(&self) -> &'static str {
        match self {
            WorkerSpecification::AddTrackable { .. } => "add_trackable",
            WorkerSpecification::ConnectionCreated { .. } => "connection_created",
            WorkerSpecification::ConnectionReady { .. } => "connection_ready",
            WorkerSpecification::AddTrackableFailed { .. } => "add_trackable_failed",
            WorkerSpecification::TrackableRemovalRequested { .. } => "trackable_removal_requested",
            WorkerSpecification::RemoveTrackable { .. } => "remove_trackable",
            WorkerSpecification::DisconnectSuccess { .. } => "disconnect_success",
            WorkerSpecification::StoppingConnectionFinished => "stopping_connection_finished",
            WorkerSpecification::RetrySubscribeToPresence { .. } => "retry_subscribe_to_presence",
            WorkerSpecification::RetrySubscribeToPresenceSuccess { .. } => {
                "retry_subscribe_to_presence_success"
            }
            WorkerSpecification::RetryEnterPresence { .. } => "retry_enter_presence",
            WorkerSpecification::RetryEnterPresenceSuccess { .. } => "retry_enter_presence_success",
            WorkerSpecification::FailTrackable { .. } => "fail_trackable",
            WorkerSpecification::PresenceMessage { .. } => "presence_message",
            WorkerSpecification::ChannelConnectionStateChange { .. } => {
                "channel_connection_state_change"
            }
            WorkerSpecification::ConnectionStateChange { .. } => "connection_state_change",
            WorkerSpecification::BatteryLevelChanged { .. } => "battery_level_changed",
            WorkerSpecification::ProximityChanged { .. } => "proximity_changed",
            WorkerSpecification::Stop { .. } => "stop",
        }
    }
}

impl fmt::Debug for WorkerSpecification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("WorkerSpecification").field(&self.name()).finish()
    }
}

/// Outcome of an add's connect call.
#[derive(Debug)]
pub enum AddTrackableResult {
    Connected {
        trackable: Trackable,
        callback: ResultCallback<StateStream>,
        listeners: Listeners,
    },
    Failed {
        trackable: Trackable,
        callback: ResultCallback<StateStream>,
        error: Error,
        is_connected: bool,
    },
}

/// Outcome of entering and subscribing to presence right after connecting.
#[derive(Debug)]
pub enum ConnectionCreatedResult {
    PresenceSubscribed {
        trackable: Trackable,
        callback: ResultCallback<StateStream>,
        listeners: Listeners,
        has_entered_presence: bool,
    },
    PresenceFailed {
        trackable: Trackable,
        callback: ResultCallback<StateStream>,
        listeners: Listeners,
        has_entered_presence: bool,
        error: Error,
    },
}

#[derive(Debug)]
pub enum RemoveTrackableResult {
    Disconnected {
        trackable: Trackable,
        callback: ResultCallback<bool>,
    },
    Failed {
        callback: ResultCallback<bool>,
        error: Error,
    },
    NotTracked {
        callback: ResultCallback<bool>,
    },
}

pub enum RetrySubscribeResult {
    Subscribed {
        trackable: Trackable,
    },
    Failed {
        trackable: Trackable,
        presence_listener: PresenceListener,
        error: Error,
    },
    ChannelNotAttached {
        trackable_id: TrackableId,
        error: Error,
    },
}

#[derive(Debug)]
pub enum RetryEnterPresenceResult {
    Entered { trackable: Trackable },
    /// Worth another try; the retry delay has already passed.
    Failed { trackable: Trackable, error: Error },
    Fatal {
        trackable: Trackable,
        error: ErrorInformation,
    },
}

/// What a publisher work step produced.
pub enum WorkResult {
    AddTrackable(AddTrackableResult),
    ConnectionCreated(ConnectionCreatedResult),
    /// A half-added trackable was disconnected because its removal was requested.
    RemovalRequested {
        trackable: Trackable,
        callback: ResultCallback<StateStream>,
        result: Result<()>,
    },
    RemoveTrackable(RemoveTrackableResult),
    RetrySubscribeToPresence(RetrySubscribeResult),
    RetryEnterPresence(RetryEnterPresenceResult),
    /// A failed trackable left its channel; the shared connection was
    /// stopped too when nothing else was left.
    TrackableFailed {
        trackable_id: TrackableId,
        disconnected: Result<()>,
        connection_stopped: Option<Result<()>>,
    },
    /// Presence pushes after a resolution change, one per trackable.
    PresenceUpdated(Vec<(TrackableId, Result<()>)>),
    ConnectionStopped(Result<()>),
    Stop {
        callback: ResultCallback<()>,
        result: Result<()>,
    },
    /// Try the given specification again.
    Retry(Box<WorkerSpecification>),
}
