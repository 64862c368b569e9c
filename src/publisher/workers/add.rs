//! The add flow: add, then connection created, then connection ready.
//!
//! Any step may find the trackable marked for removal. It then disconnects and
//! hands over to [`TrackableRemovalRequestedWorker`], so a trackable removed
//! mid-add never lands in the tracked set.

use anyhow::bail;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{Ctx, WorkerTimings, record_trackable, stop_connection_if_idle};
use crate::callback::ResultCallback;
use crate::error::{Error, Result};
use crate::model::{PublisherState, StateStream, Trackable};
use crate::publisher::properties::PublisherProperties;
use crate::publisher::specification::{
    AddTrackableResult, ConnectionCreatedResult, Listeners, WorkResult, WorkerSpecification,
};
use crate::queue::Worker;
use crate::transport::Transport;

/// Disconnect a half-added trackable whose removal was requested.
fn disconnect_for_removal(
    properties: &PublisherProperties,
    ctx: &mut Ctx,
    transport: &Arc<dyn Transport>,
    trackable: Trackable,
    callback: ResultCallback<StateStream>,
) {
    let presence = properties.presence_data(&trackable.id);
    let transport = Arc::clone(transport);
    ctx.spawn(async move {
        let result = transport.disconnect(&trackable.id, &presence).await;
        Ok(WorkResult::RemovalRequested {
            trackable,
            callback,
            result,
        })
    });
}

// ---------------------------------------------------------------------------
// AddTrackable
// ---------------------------------------------------------------------------

pub(crate) struct AddTrackableWorker {
    trackable: Trackable,
    callback: ResultCallback<StateStream>,
    listeners: Listeners,
    transport: Arc<dyn Transport>,
    timings: WorkerTimings,
    delaying: bool,
}

impl AddTrackableWorker {
    pub(crate) fn new(
        trackable: Trackable,
        callback: ResultCallback<StateStream>,
        listeners: Listeners,
        transport: Arc<dyn Transport>,
        timings: WorkerTimings,
    ) -> Self {
        Self {
            trackable,
            callback,
            listeners,
            transport,
            timings,
            delaying: false,
        }
    }

    fn retry_spec(&self) -> WorkerSpecification {
        WorkerSpecification::AddTrackable {
            trackable: self.trackable.clone(),
            callback: self.callback.clone(),
            listeners: self.listeners.clone(),
        }
    }
}

impl Worker<PublisherProperties, WorkerSpecification, WorkResult> for AddTrackableWorker {
    fn name(&self) -> &'static str {
        "add_trackable"
    }

    fn do_work(
        &mut self,
        mut properties: PublisherProperties,
        ctx: &mut Ctx,
    ) -> anyhow::Result<PublisherProperties> {
        let id = self.trackable.id.clone();
        record_trackable(&id);
        let marked = properties.removal_guard.is_marked_for_removal(&id);

        if properties.is_tracked(&id) && !marked {
            let Some(stream) = properties.state_stream(&id) else {
                bail!("trackable {id} is tracked without a state stream");
            };
            debug!("trackable already added");
            self.callback.success(stream);
            return Ok(properties);
        }

        if properties.duplicate_guard.is_in_progress(&id) {
            debug!("add already in progress, parking callback");
            properties
                .duplicate_guard
                .save_duplicate_callback(id, self.callback.clone());
            return Ok(properties);
        }

        // The shared connection is changing state, or an earlier removal of
        // this trackable has not settled yet.
        let busy = matches!(
            properties.state,
            PublisherState::Connecting | PublisherState::Disconnecting
        );
        if busy || marked {
            debug!(state = %properties.state, marked, "delaying add");
            self.delaying = true;
            let delay = self.timings.add_retry_delay;
            let retry = self.retry_spec();
            ctx.spawn(async move {
                tokio::time::sleep(delay).await;
                Ok(WorkResult::Retry(Box::new(retry)))
            });
            return Ok(properties);
        }

        properties.duplicate_guard.start(id.clone());
        let is_first = properties.state == PublisherState::Idle;
        if is_first {
            properties.transition(PublisherState::Connecting);
        }

        let transport = Arc::clone(&self.transport);
        let trackable = self.trackable.clone();
        let callback = self.callback.clone();
        let listeners = self.listeners.clone();
        ctx.spawn(async move {
            if is_first {
                if let Err(error) = transport.start_connection().await {
                    return Ok(WorkResult::AddTrackable(AddTrackableResult::Failed {
                        trackable,
                        callback,
                        error,
                        is_connected: false,
                    }));
                }
            }
            let outcome = match transport.connect(&trackable.id, true).await {
                Ok(()) => AddTrackableResult::Connected {
                    trackable,
                    callback,
                    listeners,
                },
                Err(error) => AddTrackableResult::Failed {
                    trackable,
                    callback,
                    error,
                    is_connected: true,
                },
            };
            Ok(WorkResult::AddTrackable(outcome))
        });
        Ok(properties)
    }

    fn do_when_stopped(&mut self, error: Error) -> anyhow::Result<()> {
        self.callback.failure(error);
        Ok(())
    }

    fn on_unexpected_error(&mut self, error: &anyhow::Error, _ctx: &mut Ctx) {
        self.callback.failure(Error::unexpected(error));
    }

    fn on_unexpected_async_error(&mut self, error: &anyhow::Error) -> Option<WorkerSpecification> {
        if self.delaying {
            return Some(self.retry_spec());
        }
        Some(WorkerSpecification::AddTrackableFailed {
            trackable: self.trackable.clone(),
            callback: self.callback.clone(),
            error: Error::unexpected(error),
            is_connected: true,
        })
    }
}

// ---------------------------------------------------------------------------
// ConnectionCreated
// ---------------------------------------------------------------------------

pub(crate) struct ConnectionCreatedWorker {
    trackable: Trackable,
    callback: ResultCallback<StateStream>,
    listeners: Listeners,
    transport: Arc<dyn Transport>,
    timings: WorkerTimings,
    removing: bool,
}

impl ConnectionCreatedWorker {
    pub(crate) fn new(
        trackable: Trackable,
        callback: ResultCallback<StateStream>,
        listeners: Listeners,
        transport: Arc<dyn Transport>,
        timings: WorkerTimings,
    ) -> Self {
        Self {
            trackable,
            callback,
            listeners,
            transport,
            timings,
            removing: false,
        }
    }
}

impl Worker<PublisherProperties, WorkerSpecification, WorkResult> for ConnectionCreatedWorker {
    fn name(&self) -> &'static str {
        "connection_created"
    }

    fn do_work(
        &mut self,
        mut properties: PublisherProperties,
        ctx: &mut Ctx,
    ) -> anyhow::Result<PublisherProperties> {
        let id = self.trackable.id.clone();
        record_trackable(&id);
        if properties.state == PublisherState::Connecting {
            properties.transition(PublisherState::Connected);
        }

        if properties.removal_guard.is_marked_for_removal(&id) {
            self.removing = true;
            disconnect_for_removal(
                &properties,
                ctx,
                &self.transport,
                self.trackable.clone(),
                self.callback.clone(),
            );
            return Ok(properties);
        }

        let presence = properties.presence_data(&id);
        let transport = Arc::clone(&self.transport);
        let timeout = self.timings.presence_subscribe_timeout;
        let trackable = self.trackable.clone();
        let callback = self.callback.clone();
        let listeners = self.listeners.clone();
        ctx.spawn(async move {
            let has_entered_presence = match transport.enter_presence(&trackable.id, &presence).await {
                Ok(()) => true,
                Err(error) => {
                    warn!(%error, "entering presence failed, will retry");
                    false
                }
            };
            let subscribe = transport
                .subscribe_for_presence_messages(&trackable.id, listeners.presence.clone());
            let outcome = match tokio::time::timeout(timeout, subscribe).await {
                Ok(Ok(())) => ConnectionCreatedResult::PresenceSubscribed {
                    trackable,
                    callback,
                    listeners,
                    has_entered_presence,
                },
                Ok(Err(error)) => ConnectionCreatedResult::PresenceFailed {
                    trackable,
                    callback,
                    listeners,
                    has_entered_presence,
                    error,
                },
                Err(_) => ConnectionCreatedResult::PresenceFailed {
                    trackable,
                    callback,
                    listeners,
                    has_entered_presence,
                    error: Error::Timeout("presence subscription".to_string()),
                },
            };
            Ok(WorkResult::ConnectionCreated(outcome))
        });
        Ok(properties)
    }

    fn do_when_stopped(&mut self, error: Error) -> anyhow::Result<()> {
        self.callback.failure(error);
        Ok(())
    }

    fn on_unexpected_error(&mut self, error: &anyhow::Error, ctx: &mut Ctx) {
        ctx.post(WorkerSpecification::AddTrackableFailed {
            trackable: self.trackable.clone(),
            callback: self.callback.clone(),
            error: Error::unexpected(error),
            is_connected: true,
        });
    }

    fn on_unexpected_async_error(&mut self, error: &anyhow::Error) -> Option<WorkerSpecification> {
        if self.removing {
            return Some(WorkerSpecification::TrackableRemovalRequested {
                trackable: self.trackable.clone(),
                callback: self.callback.clone(),
                result: Err(Error::unexpected(error)),
            });
        }
        // Carry on without presence; the ready step schedules retries.
        Some(WorkerSpecification::ConnectionReady {
            trackable: self.trackable.clone(),
            callback: self.callback.clone(),
            listeners: self.listeners.clone(),
            is_subscribed_to_presence: false,
            has_entered_presence: false,
        })
    }
}

// ---------------------------------------------------------------------------
// ConnectionReady
// ---------------------------------------------------------------------------

pub(crate) struct ConnectionReadyWorker {
    trackable: Trackable,
    callback: ResultCallback<StateStream>,
    listeners: Listeners,
    is_subscribed_to_presence: bool,
    has_entered_presence: bool,
    transport: Arc<dyn Transport>,
    removing: bool,
}

impl ConnectionReadyWorker {
    pub(crate) fn new(
        trackable: Trackable,
        callback: ResultCallback<StateStream>,
        listeners: Listeners,
        is_subscribed_to_presence: bool,
        has_entered_presence: bool,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            trackable,
            callback,
            listeners,
            is_subscribed_to_presence,
            has_entered_presence,
            transport,
            removing: false,
        }
    }
}

impl Worker<PublisherProperties, WorkerSpecification, WorkResult> for ConnectionReadyWorker {
    fn name(&self) -> &'static str {
        "connection_ready"
    }

    fn do_work(
        &mut self,
        mut properties: PublisherProperties,
        ctx: &mut Ctx,
    ) -> anyhow::Result<PublisherProperties> {
        let id = self.trackable.id.clone();
        record_trackable(&id);

        if properties.removal_guard.is_marked_for_removal(&id) {
            self.removing = true;
            disconnect_for_removal(
                &properties,
                ctx,
                &self.transport,
                self.trackable.clone(),
                self.callback.clone(),
            );
            return Ok(properties);
        }

        self.transport
            .subscribe_for_channel_state_change(&id, self.listeners.channel_state.clone());

        properties.trackables.insert(id.clone(), self.trackable.clone());
        properties
            .subscribed_to_presence
            .insert(id.clone(), self.is_subscribed_to_presence);
        properties
            .entered_presence
            .insert(id.clone(), self.has_entered_presence);
        let initial = properties.derive_trackable_state(&id);
        let stream = properties.ensure_state_flow(&id, initial);
        let changed = properties.refresh_resolution(&id);

        self.callback.success(stream.clone());
        properties.duplicate_guard.finish(&id, Ok(stream));

        if !self.is_subscribed_to_presence {
            ctx.post(WorkerSpecification::RetrySubscribeToPresence {
                trackable: self.trackable.clone(),
                presence_listener: self.listeners.presence.clone(),
            });
        }
        if !self.has_entered_presence {
            ctx.post(WorkerSpecification::RetryEnterPresence {
                trackable: self.trackable.clone(),
            });
        }
        if changed.is_some() {
            super::push_presence_updates(&properties, ctx, &self.transport, vec![id]);
        }
        Ok(properties)
    }

    fn do_when_stopped(&mut self, error: Error) -> anyhow::Result<()> {
        self.callback.failure(error);
        Ok(())
    }

    fn on_unexpected_error(&mut self, error: &anyhow::Error, ctx: &mut Ctx) {
        ctx.post(WorkerSpecification::AddTrackableFailed {
            trackable: self.trackable.clone(),
            callback: self.callback.clone(),
            error: Error::unexpected(error),
            is_connected: true,
        });
    }

    fn on_unexpected_async_error(&mut self, error: &anyhow::Error) -> Option<WorkerSpecification> {
        if self.removing {
            return Some(WorkerSpecification::TrackableRemovalRequested {
                trackable: self.trackable.clone(),
                callback: self.callback.clone(),
                result: Err(Error::unexpected(error)),
            });
        }
        warn!(error = %format!("{error:#}"), "presence update after add failed");
        None
    }
}

// ---------------------------------------------------------------------------
// AddTrackableFailed
// ---------------------------------------------------------------------------

pub(crate) struct AddTrackableFailedWorker {
    trackable: Trackable,
    callback: ResultCallback<StateStream>,
    error: Error,
    is_connected: bool,
    transport: Arc<dyn Transport>,
}

impl AddTrackableFailedWorker {
    pub(crate) fn new(
        trackable: Trackable,
        callback: ResultCallback<StateStream>,
        error: Error,
        is_connected: bool,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            trackable,
            callback,
            error,
            is_connected,
            transport,
        }
    }
}

impl Worker<PublisherProperties, WorkerSpecification, WorkResult> for AddTrackableFailedWorker {
    fn name(&self) -> &'static str {
        "add_trackable_failed"
    }

    fn do_work(
        &mut self,
        mut properties: PublisherProperties,
        ctx: &mut Ctx,
    ) -> anyhow::Result<PublisherProperties> {
        let id = self.trackable.id.clone();
        record_trackable(&id);
        warn!(error = %self.error, "adding trackable failed");

        self.callback.failure(self.error.clone());
        properties.duplicate_guard.finish(&id, Err(self.error.clone()));
        // Nothing was added, so a pending removal has nothing left to do.
        properties.removal_guard.remove_marked(&id, Ok(true));

        if self.is_connected {
            stop_connection_if_idle(&mut properties, ctx, &self.transport);
        } else if properties.has_no_trackables_adding_or_added()
            && properties.state == PublisherState::Connecting
        {
            properties.transition(PublisherState::Idle);
        }
        Ok(properties)
    }

    fn do_when_stopped(&mut self, error: Error) -> anyhow::Result<()> {
        self.callback.failure(error);
        Ok(())
    }

    fn on_unexpected_async_error(&mut self, _error: &anyhow::Error) -> Option<WorkerSpecification> {
        Some(WorkerSpecification::StoppingConnectionFinished)
    }
}

// ---------------------------------------------------------------------------
// TrackableRemovalRequested
// ---------------------------------------------------------------------------

pub(crate) struct TrackableRemovalRequestedWorker {
    trackable: Trackable,
    callback: ResultCallback<StateStream>,
    result: Option<Result<()>>,
    transport: Arc<dyn Transport>,
}

impl TrackableRemovalRequestedWorker {
    pub(crate) fn new(
        trackable: Trackable,
        callback: ResultCallback<StateStream>,
        result: Result<()>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            trackable,
            callback,
            result: Some(result),
            transport,
        }
    }
}

impl Worker<PublisherProperties, WorkerSpecification, WorkResult>
    for TrackableRemovalRequestedWorker
{
    fn name(&self) -> &'static str {
        "trackable_removal_requested"
    }

    fn do_work(
        &mut self,
        mut properties: PublisherProperties,
        ctx: &mut Ctx,
    ) -> anyhow::Result<PublisherProperties> {
        let id = self.trackable.id.clone();
        record_trackable(&id);

        let disconnected = self.result.take().unwrap_or(Ok(()));
        properties
            .removal_guard
            .remove_marked(&id, disconnected.map(|()| true));

        let error = Error::RemovalRequested(id.clone());
        self.callback.failure(error.clone());
        properties.duplicate_guard.finish(&id, Err(error));

        stop_connection_if_idle(&mut properties, ctx, &self.transport);
        Ok(properties)
    }

    fn do_when_stopped(&mut self, error: Error) -> anyhow::Result<()> {
        self.callback.failure(error);
        Ok(())
    }

    fn on_unexpected_async_error(&mut self, _error: &anyhow::Error) -> Option<WorkerSpecification> {
        Some(WorkerSpecification::StoppingConnectionFinished)
    }
}
