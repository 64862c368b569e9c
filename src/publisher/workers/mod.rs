//! Workers behind each publisher specification.
//!
//! Each worker owns the data of its specification. The synchronous step reads
//! and writes [`PublisherProperties`]; transport calls only ever happen inside
//! the continuation registered on the [`WorkContext`].

mod add;
mod presence;
mod remove;
mod resolution;
mod stop;

pub(crate) use add::{
    AddTrackableFailedWorker, AddTrackableWorker, ConnectionCreatedWorker, ConnectionReadyWorker,
    TrackableRemovalRequestedWorker,
};
pub(crate) use presence::{
    ChannelConnectionStateChangeWorker, ConnectionStateChangeWorker, PresenceMessageWorker,
    RetryEnterPresenceSuccessWorker, RetryEnterPresenceWorker, RetrySubscribeToPresenceSuccessWorker,
    RetrySubscribeToPresenceWorker,
};
pub(crate) use remove::{
    DisconnectSuccessWorker, FailTrackableWorker, RemoveTrackableWorker,
    StoppingConnectionFinishedWorker,
};
pub(crate) use resolution::{BatteryLevelChangedWorker, ProximityChangedWorker};
pub(crate) use stop::StopWorker;

use std::sync::Arc;
use std::time::Duration;

use super::properties::PublisherProperties;
use super::specification::{WorkResult, WorkerSpecification};
use crate::model::{PublisherState, TrackableId};
use crate::queue::WorkContext;
use crate::transport::Transport;

pub(crate) type Ctx = WorkContext<WorkerSpecification, WorkResult>;

/// Timings shared by the publisher's workers.
#[derive(Debug, Clone)]
pub struct WorkerTimings {
    /// Wait before retrying an add that arrived at a bad moment.
    pub add_retry_delay: Duration,
    /// Bound on the first presence subscription after connecting.
    pub presence_subscribe_timeout: Duration,
    /// Wait between attempts to enter a channel's presence.
    pub enter_presence_retry_delay: Duration,
}

impl Default for WorkerTimings {
    fn default() -> Self {
        Self {
            add_retry_delay: Duration::from_millis(200),
            presence_subscribe_timeout: Duration::from_secs(5),
            enter_presence_retry_delay: Duration::from_secs(15),
        }
    }
}

/// Tag the current work span with the trackable being worked on.
fn record_trackable(id: &TrackableId) {
    tracing::Span::current().record("work.trackable", id.as_str());
}

/// Shut the transport connection once nothing is added or being added.
fn stop_connection_if_idle(
    properties: &mut PublisherProperties,
    ctx: &mut Ctx,
    transport: &Arc<dyn Transport>,
) {
    if !properties.has_no_trackables_adding_or_added() {
        return;
    }
    match properties.state {
        PublisherState::Connecting | PublisherState::Connected => {
            properties.transition(PublisherState::Disconnecting);
            let transport = Arc::clone(transport);
            ctx.spawn(async move {
                let result = transport.stop_connection().await;
                Ok(WorkResult::ConnectionStopped(result))
            });
        }
        PublisherState::Idle | PublisherState::Disconnecting | PublisherState::Stopped => {}
    }
}

/// Push fresh presence data for every trackable in `ids`, one after another.
fn push_presence_updates(
    properties: &PublisherProperties,
    ctx: &mut Ctx,
    transport: &Arc<dyn Transport>,
    ids: Vec<TrackableId>,
) {
    if ids.is_empty() {
        return;
    }
    let updates: Vec<_> = ids
        .into_iter()
        .map(|id| {
            let presence = properties.presence_data(&id);
            (id, presence)
        })
        .collect();
    let transport = Arc::clone(transport);
    ctx.spawn(async move {
        let mut results = Vec::with_capacity(updates.len());
        for (id, presence) in updates {
            let result = transport.update_presence_data(&id, &presence).await;
            results.push((id, result));
        }
        Ok(WorkResult::PresenceUpdated(results))
    });
}
