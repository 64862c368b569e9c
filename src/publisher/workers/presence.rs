//! Presence subscriptions and events arriving from trackable channels.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use super::{Ctx, push_presence_updates, record_trackable};
use crate::error::Error;
use crate::model::presence::{ClientType, ConnectionStateChange, PresenceAction, PresenceMessage};
use crate::model::{ErrorInformation, Trackable, TrackableId};
use crate::publisher::properties::{PublisherProperties, SubscriberEntry};
use crate::publisher::specification::{
    RetryEnterPresenceResult, RetrySubscribeResult, WorkResult, WorkerSpecification,
};
use crate::queue::Worker;
use crate::transport::{PresenceListener, Transport};

// ---------------------------------------------------------------------------
// Presence subscription retries
// ---------------------------------------------------------------------------

pub(crate) struct RetrySubscribeToPresenceWorker {
    trackable: Trackable,
    presence_listener: PresenceListener,
    transport: Arc<dyn Transport>,
    retry_delay: Duration,
}

impl RetrySubscribeToPresenceWorker {
    pub(crate) fn new(
        trackable: Trackable,
        presence_listener: PresenceListener,
        transport: Arc<dyn Transport>,
        retry_delay: Duration,
    ) -> Self {
        Self {
            trackable,
            presence_listener,
            transport,
            retry_delay,
        }
    }
}

impl Worker<PublisherProperties, WorkerSpecification, WorkResult> for RetrySubscribeToPresenceWorker {
    fn name(&self) -> &'static str {
        "retry_subscribe_to_presence"
    }

    fn do_work(
        &mut self,
        properties: PublisherProperties,
        ctx: &mut Ctx,
    ) -> anyhow::Result<PublisherProperties> {
        let id = self.trackable.id.clone();
        record_trackable(&id);
        if !properties.is_tracked(&id) {
            debug!("trackable no longer tracked, dropping presence retry");
            return Ok(properties);
        }

        let transport = Arc::clone(&self.transport);
        let trackable = self.trackable.clone();
        let listener = Arc::clone(&self.presence_listener);
        let retry_delay = self.retry_delay;
        ctx.spawn(async move {
            if let Err(error) = transport.wait_for_channel_to_attach(&trackable.id).await {
                return Ok(WorkResult::RetrySubscribeToPresence(
                    RetrySubscribeResult::ChannelNotAttached {
                        trackable_id: trackable.id,
                        error,
                    },
                ));
            }
            let outcome = match transport
                .subscribe_for_presence_messages(&trackable.id, Arc::clone(&listener))
                .await
            {
                Ok(()) => RetrySubscribeResult::Subscribed { trackable },
                Err(error) => {
                    tokio::time::sleep(retry_delay).await;
                    RetrySubscribeResult::Failed {
                        trackable,
                        presence_listener: listener,
                        error,
                    }
                }
            };
            Ok(WorkResult::RetrySubscribeToPresence(outcome))
        });
        Ok(properties)
    }

    fn do_when_stopped(&mut self, _error: Error) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_unexpected_async_error(&mut self, _error: &anyhow::Error) -> Option<WorkerSpecification> {
        Some(WorkerSpecification::RetrySubscribeToPresence {
            trackable: self.trackable.clone(),
            presence_listener: Arc::clone(&self.presence_listener),
        })
    }
}

pub(crate) struct RetrySubscribeToPresenceSuccessWorker {
    trackable: Trackable,
}

impl RetrySubscribeToPresenceSuccessWorker {
    pub(crate) fn new(trackable: Trackable) -> Self {
        Self { trackable }
    }
}

impl Worker<PublisherProperties, WorkerSpecification, WorkResult>
    for RetrySubscribeToPresenceSuccessWorker
{
    fn name(&self) -> &'static str {
        "retry_subscribe_to_presence_success"
    }

    fn do_work(
        &mut self,
        mut properties: PublisherProperties,
        _ctx: &mut Ctx,
    ) -> anyhow::Result<PublisherProperties> {
        let id = &self.trackable.id;
        record_trackable(id);
        if !properties.is_tracked(id) {
            return Ok(properties);
        }
        properties.subscribed_to_presence.insert(id.clone(), true);
        properties.update_trackable_state(id);
        Ok(properties)
    }

    fn do_when_stopped(&mut self, _error: Error) -> anyhow::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Presence entry retries
// ---------------------------------------------------------------------------

pub(crate) struct RetryEnterPresenceWorker {
    trackable: Trackable,
    transport: Arc<dyn Transport>,
    retry_delay: Duration,
}

impl RetryEnterPresenceWorker {
    pub(crate) fn new(trackable: Trackable, transport: Arc<dyn Transport>, retry_delay: Duration) -> Self {
        Self {
            trackable,
            transport,
            retry_delay,
        }
    }
}

impl Worker<PublisherProperties, WorkerSpecification, WorkResult> for RetryEnterPresenceWorker {
    fn name(&self) -> &'static str {
        "retry_enter_presence"
    }

    fn do_work(
        &mut self,
        properties: PublisherProperties,
        ctx: &mut Ctx,
    ) -> anyhow::Result<PublisherProperties> {
        let id = self.trackable.id.clone();
        record_trackable(&id);
        if !properties.is_tracked(&id) || properties.removal_guard.is_marked_for_removal(&id) {
            debug!("trackable is going away, dropping presence entry retry");
            return Ok(properties);
        }

        let presence = properties.presence_data(&id);
        let transport = Arc::clone(&self.transport);
        let trackable = self.trackable.clone();
        let retry_delay = self.retry_delay;
        ctx.spawn(async move {
            if let Err(error) = transport.wait_for_channel_to_attach(&trackable.id).await {
                return Ok(WorkResult::RetryEnterPresence(RetryEnterPresenceResult::Fatal {
                    trackable,
                    error: ErrorInformation::from(&error),
                }));
            }
            let outcome = match transport.enter_presence(&trackable.id, &presence).await {
                Ok(()) => RetryEnterPresenceResult::Entered { trackable },
                Err(error) if error.is_fatal() => RetryEnterPresenceResult::Fatal {
                    trackable,
                    error: ErrorInformation::from(&error),
                },
                Err(error) => {
                    tokio::time::sleep(retry_delay).await;
                    RetryEnterPresenceResult::Failed { trackable, error }
                }
            };
            Ok(WorkResult::RetryEnterPresence(outcome))
        });
        Ok(properties)
    }

    fn do_when_stopped(&mut self, _error: Error) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_unexpected_async_error(&mut self, _error: &anyhow::Error) -> Option<WorkerSpecification> {
        Some(WorkerSpecification::RetryEnterPresence {
            trackable: self.trackable.clone(),
        })
    }
}

pub(crate) struct RetryEnterPresenceSuccessWorker {
    trackable: Trackable,
}

impl RetryEnterPresenceSuccessWorker {
    pub(crate) fn new(trackable: Trackable) -> Self {
        Self { trackable }
    }
}

impl Worker<PublisherProperties, WorkerSpecification, WorkResult> for RetryEnterPresenceSuccessWorker {
    fn name(&self) -> &'static str {
        "retry_enter_presence_success"
    }

    fn do_work(
        &mut self,
        mut properties: PublisherProperties,
        _ctx: &mut Ctx,
    ) -> anyhow::Result<PublisherProperties> {
        let id = &self.trackable.id;
        record_trackable(id);
        if !properties.is_tracked(id) {
            return Ok(properties);
        }
        properties.entered_presence.insert(id.clone(), true);
        properties.update_trackable_state(id);
        Ok(properties)
    }

    fn do_when_stopped(&mut self, _error: Error) -> anyhow::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Presence messages
// ---------------------------------------------------------------------------

pub(crate) struct PresenceMessageWorker {
    trackable_id: TrackableId,
    message: PresenceMessage,
    transport: Arc<dyn Transport>,
}

impl PresenceMessageWorker {
    pub(crate) fn new(
        trackable_id: TrackableId,
        message: PresenceMessage,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            trackable_id,
            message,
            transport,
        }
    }
}

impl Worker<PublisherProperties, WorkerSpecification, WorkResult> for PresenceMessageWorker {
    fn name(&self) -> &'static str {
        "presence_message"
    }

    fn do_work(
        &mut self,
        mut properties: PublisherProperties,
        ctx: &mut Ctx,
    ) -> anyhow::Result<PublisherProperties> {
        let id = self.trackable_id.clone();
        record_trackable(&id);
        if !properties.is_tracked(&id) {
            debug!("presence for untracked trackable ignored");
            return Ok(properties);
        }

        let data = match self.message.presence_data() {
            Ok(data) => data,
            Err(error) => {
                warn!(client_id = %self.message.client_id, %error, "ignoring presence message");
                return Ok(properties);
            }
        };
        if data.client_type != ClientType::Subscriber {
            return Ok(properties);
        }

        let client_id = self.message.client_id.clone();
        let timestamp = self.message.timestamp;
        let subscribers = properties.subscribers.entry(id.clone()).or_default();
        let stale = subscribers
            .get(&client_id)
            .is_some_and(|existing| timestamp < existing.last_seen);
        if stale {
            debug!(%client_id, "stale presence message ignored");
            return Ok(properties);
        }

        let present = self.message.action != PresenceAction::Leave;
        subscribers.insert(
            client_id,
            SubscriberEntry {
                requested_resolution: data.resolution.filter(|_| present),
                last_seen: timestamp,
                present,
            },
        );

        if properties.refresh_resolution(&id).is_some() {
            push_presence_updates(&properties, ctx, &self.transport, vec![id]);
        }
        Ok(properties)
    }

    fn do_when_stopped(&mut self, _error: Error) -> anyhow::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Channel connection state
// ---------------------------------------------------------------------------

pub(crate) struct ChannelConnectionStateChangeWorker {
    trackable_id: TrackableId,
    change: ConnectionStateChange,
}

impl ChannelConnectionStateChangeWorker {
    pub(crate) fn new(trackable_id: TrackableId, change: ConnectionStateChange) -> Self {
        Self {
            trackable_id,
            change,
        }
    }
}

impl Worker<PublisherProperties, WorkerSpecification, WorkResult>
    for ChannelConnectionStateChangeWorker
{
    fn name(&self) -> &'static str {
        "channel_connection_state_change"
    }

    fn do_work(
        &mut self,
        mut properties: PublisherProperties,
        _ctx: &mut Ctx,
    ) -> anyhow::Result<PublisherProperties> {
        let id = &self.trackable_id;
        record_trackable(id);
        if !properties.is_tracked(id) {
            return Ok(properties);
        }

        properties
            .channel_states
            .insert(id.clone(), self.change.clone());
        properties.update_trackable_state(id);
        Ok(properties)
    }

    fn do_when_stopped(&mut self, _error: Error) -> anyhow::Result<()> {
        Ok(())
    }
}

pub(crate) struct ConnectionStateChangeWorker {
    change: ConnectionStateChange,
}

impl ConnectionStateChangeWorker {
    pub(crate) fn new(change: ConnectionStateChange) -> Self {
        Self { change }
    }
}

impl Worker<PublisherProperties, WorkerSpecification, WorkResult> for ConnectionStateChangeWorker {
    fn name(&self) -> &'static str {
        "connection_state_change"
    }

    fn do_work(
        &mut self,
        mut properties: PublisherProperties,
        _ctx: &mut Ctx,
    ) -> anyhow::Result<PublisherProperties> {
        debug!(state = ?self.change.state, "connection state changed");
        properties.connection_state = Some(self.change.clone());
        for id in properties.trackables.keys() {
            properties.update_trackable_state(id);
        }
        Ok(properties)
    }

    fn do_when_stopped(&mut self, _error: Error) -> anyhow::Result<()> {
        Ok(())
    }
}
