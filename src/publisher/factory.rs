//! Turns publisher specifications into workers and step results into
//! follow-up specifications.

use std::sync::Arc;
use tracing::{debug, warn};

use super::properties::PublisherProperties;
use super::specification::{
    AddTrackableResult, ConnectionCreatedResult, RemoveTrackableResult, RetryEnterPresenceResult,
    RetrySubscribeResult, WorkResult, WorkerSpecification,
};
use super::workers::*;
use crate::queue::{BoxedWorker, WorkerFactory};
use crate::transport::Transport;

pub struct PublisherWorkerFactory {
    transport: Arc<dyn Transport>,
    timings: WorkerTimings,
}

impl PublisherWorkerFactory {
    pub fn new(transport: Arc<dyn Transport>, timings: WorkerTimings) -> Self {
        Self { transport, timings }
    }

    fn transport(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }
}

impl WorkerFactory for PublisherWorkerFactory {
    type Properties = PublisherProperties;
    type Specification = WorkerSpecification;
    type Result = WorkResult;

    fn create_worker(&self, spec: WorkerSpecification) -> BoxedWorker<Self> {
        match spec {
            WorkerSpecification::AddTrackable {
                trackable,
                callback,
                listeners,
            } => Box::new(AddTrackableWorker::new(
                trackable,
                callback,
                listeners,
                self.transport(),
                self.timings.clone(),
            )),
            WorkerSpecification::ConnectionCreated {
                trackable,
                callback,
                listeners,
            } => Box::new(ConnectionCreatedWorker::new(
                trackable,
                callback,
                listeners,
                self.transport(),
                self.timings.clone(),
            )),
            WorkerSpecification::ConnectionReady {
                trackable,
                callback,
                listeners,
                is_subscribed_to_presence,
                has_entered_presence,
            } => Box::new(ConnectionReadyWorker::new(
                trackable,
                callback,
                listeners,
                is_subscribed_to_presence,
                has_entered_presence,
                self.transport(),
            )),
            WorkerSpecification::AddTrackableFailed {
                trackable,
                callback,
                error,
                is_connected,
            } => Box::new(AddTrackableFailedWorker::new(
                trackable,
                callback,
                error,
                is_connected,
                self.transport(),
            )),
            WorkerSpecification::TrackableRemovalRequested {
                trackable,
                callback,
                result,
            } => Box::new(TrackableRemovalRequestedWorker::new(
                trackable,
                callback,
                result,
                self.transport(),
            )),
            WorkerSpecification::RemoveTrackable {
                trackable,
                callback,
            } => Box::new(RemoveTrackableWorker::new(
                trackable,
                callback,
                self.transport(),
            )),
            WorkerSpecification::DisconnectSuccess {
                trackable,
                callback,
            } => Box::new(DisconnectSuccessWorker::new(
                trackable,
                callback,
                self.transport(),
            )),
            WorkerSpecification::StoppingConnectionFinished => {
                Box::new(StoppingConnectionFinishedWorker)
            }
            WorkerSpecification::RetrySubscribeToPresence {
                trackable,
                presence_listener,
            } => Box::new(RetrySubscribeToPresenceWorker::new(
                trackable,
                presence_listener,
                self.transport(),
                self.timings.add_retry_delay,
            )),
            WorkerSpecification::RetrySubscribeToPresenceSuccess { trackable } => {
                Box::new(RetrySubscribeToPresenceSuccessWorker::new(trackable))
            }
            WorkerSpecification::RetryEnterPresence { trackable } => {
                Box::new(RetryEnterPresenceWorker::new(
                    trackable,
                    self.transport(),
                    self.timings.enter_presence_retry_delay,
                ))
            }
            WorkerSpecification::RetryEnterPresenceSuccess { trackable } => {
                Box::new(RetryEnterPresenceSuccessWorker::new(trackable))
            }
            WorkerSpecification::FailTrackable { trackable, error } => Box::new(
                FailTrackableWorker::new(trackable, error, self.transport()),
            ),
            WorkerSpecification::PresenceMessage {
                trackable_id,
                message,
            } => Box::new(PresenceMessageWorker::new(
                trackable_id,
                message,
                self.transport(),
            )),
            WorkerSpecification::ChannelConnectionStateChange {
                trackable_id,
                change,
            } => Box::new(ChannelConnectionStateChangeWorker::new(trackable_id, change)),
            WorkerSpecification::ConnectionStateChange { change } => {
                Box::new(ConnectionStateChangeWorker::new(change))
            }
            WorkerSpecification::BatteryLevelChanged { level } => {
                Box::new(BatteryLevelChangedWorker::new(level, self.transport()))
            }
            WorkerSpecification::ProximityChanged {
                trackable_id,
                proximity,
            } => Box::new(ProximityChangedWorker::new(
                trackable_id,
                proximity,
                self.transport(),
            )),
            WorkerSpecification::Stop { callback, timeout } => {
                Box::new(StopWorker::new(callback, timeout, self.transport()))
            }
        }
    }

    fn handle_result(&self, result: WorkResult) -> Option<WorkerSpecification> {
        match result {
            WorkResult::AddTrackable(result) => handle_add_trackable(result),
            WorkResult::ConnectionCreated(result) => handle_connection_created(result),
            WorkResult::RemovalRequested {
                trackable,
                callback,
                result,
            } => Some(WorkerSpecification::TrackableRemovalRequested {
                trackable,
                callback,
                result,
            }),
            WorkResult::RemoveTrackable(result) => handle_remove_trackable(result),
            WorkResult::RetrySubscribeToPresence(result) => handle_retry_subscribe(result),
            WorkResult::RetryEnterPresence(result) => handle_retry_enter_presence(result),
            WorkResult::TrackableFailed {
                trackable_id,
                disconnected,
                connection_stopped,
            } => {
                if let Err(error) = disconnected {
                    warn!(%trackable_id, %error, "leaving the failed trackable's channel failed");
                }
                let stopped = connection_stopped?;
                if let Err(error) = stopped {
                    warn!(%error, "stopping the connection failed");
                }
                Some(WorkerSpecification::StoppingConnectionFinished)
            }
            WorkResult::PresenceUpdated(results) => {
                for (trackable_id, result) in results {
                    if let Err(error) = result {
                        warn!(%trackable_id, %error, "updating presence data failed");
                    }
                }
                None
            }
            WorkResult::ConnectionStopped(result) => {
                if let Err(error) = result {
                    warn!(%error, "stopping the connection failed");
                }
                Some(WorkerSpecification::StoppingConnectionFinished)
            }
            WorkResult::Stop { callback, result } => {
                callback.call(result);
                None
            }
            WorkResult::Retry(spec) => Some(*spec),
        }
    }
}

fn handle_add_trackable(result: AddTrackableResult) -> Option<WorkerSpecification> {
    match result {
        AddTrackableResult::Connected {
            trackable,
            callback,
            listeners,
        } => Some(WorkerSpecification::ConnectionCreated {
            trackable,
            callback,
            listeners,
        }),
        AddTrackableResult::Failed {
            trackable,
            callback,
            error,
            is_connected,
        } => Some(WorkerSpecification::AddTrackableFailed {
            trackable,
            callback,
            error,
            is_connected,
        }),
    }
}

fn handle_connection_created(result: ConnectionCreatedResult) -> Option<WorkerSpecification> {
    match result {
        ConnectionCreatedResult::PresenceSubscribed {
            trackable,
            callback,
            listeners,
            has_entered_presence,
        } => Some(WorkerSpecification::ConnectionReady {
            trackable,
            callback,
            listeners,
            is_subscribed_to_presence: true,
            has_entered_presence,
        }),
        ConnectionCreatedResult::PresenceFailed {
            trackable,
            callback,
            listeners,
            error,
            has_entered_presence,
        } => {
            warn!(trackable_id = %trackable.id, %error, "presence subscription failed, continuing without it");
            Some(WorkerSpecification::ConnectionReady {
                trackable,
                callback,
                listeners,
                is_subscribed_to_presence: false,
                has_entered_presence,
            })
        }
    }
}

fn handle_remove_trackable(result: RemoveTrackableResult) -> Option<WorkerSpecification> {
    match result {
        RemoveTrackableResult::Disconnected {
            trackable,
            callback,
        } => Some(WorkerSpecification::DisconnectSuccess {
            trackable,
            callback,
        }),
        RemoveTrackableResult::Failed { callback, error } => {
            callback.failure(error);
            None
        }
        RemoveTrackableResult::NotTracked { callback } => {
            callback.success(false);
            None
        }
    }
}

fn handle_retry_subscribe(result: RetrySubscribeResult) -> Option<WorkerSpecification> {
    match result {
        RetrySubscribeResult::Subscribed { trackable } => {
            Some(WorkerSpecification::RetrySubscribeToPresenceSuccess { trackable })
        }
        RetrySubscribeResult::Failed {
            trackable,
            presence_listener,
            error,
        } => {
            debug!(trackable_id = %trackable.id, %error, "presence subscription failed, retrying");
            Some(WorkerSpecification::RetrySubscribeToPresence {
                trackable,
                presence_listener,
            })
        }
        RetrySubscribeResult::ChannelNotAttached {
            trackable_id,
            error,
        } => {
            warn!(%trackable_id, %error, "channel never attached, giving up on presence");
            None
        }
    }
}

fn handle_retry_enter_presence(result: RetryEnterPresenceResult) -> Option<WorkerSpecification> {
    match result {
        RetryEnterPresenceResult::Entered { trackable } => {
            Some(WorkerSpecification::RetryEnterPresenceSuccess { trackable })
        }
        RetryEnterPresenceResult::Failed { trackable, error } => {
            debug!(trackable_id = %trackable.id, %error, "entering presence failed, retrying");
            Some(WorkerSpecification::RetryEnterPresence { trackable })
        }
        RetryEnterPresenceResult::Fatal { trackable, error } => {
            Some(WorkerSpecification::FailTrackable { trackable, error })
        }
    }
}
