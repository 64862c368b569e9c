//! State owned by the publisher's queue.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;

use crate::guard::{DuplicateOperationGuard, PendingRemovalGuard};
use crate::model::presence::{ConnectionState, ConnectionStateChange, PresenceData};
use crate::model::{
    ErrorInformation, PublisherState, Resolution, StateStream, Trackable, TrackableId,
    TrackableState,
};
use crate::queue::QueueProperties;
use crate::resolution::{self, DecisionInput, ResolutionConstraints};
use crate::telemetry::work::record_state_transition;

/// A subscriber seen on a trackable's channel.
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriberEntry {
    pub requested_resolution: Option<Resolution>,
    /// Timestamp of the newest presence message seen from this client.
    pub last_seen: DateTime<Utc>,
    /// False once the subscriber has left. The entry stays so that older
    /// messages arriving late are still recognised as stale.
    pub present: bool,
}

/// Everything the publisher's workers read and write.
///
/// Only the queue's actor holds the live copy. Each step gets a clone; state
/// streams are shared between clones so consumers keep seeing one stream.
#[derive(Clone)]
pub struct PublisherProperties {
    pub state: PublisherState,
    pub trackables: HashMap<TrackableId, Trackable>,
    pub state_flows: HashMap<TrackableId, Arc<watch::Sender<TrackableState>>>,
    pub subscribed_to_presence: HashMap<TrackableId, bool>,
    pub entered_presence: HashMap<TrackableId, bool>,
    /// Last state of the shared connection, `None` until the transport reports one.
    pub connection_state: Option<ConnectionStateChange>,
    /// Last state of each trackable's channel.
    pub channel_states: HashMap<TrackableId, ConnectionStateChange>,
    /// Subscribers per trackable, keyed by client id.
    pub subscribers: HashMap<TrackableId, HashMap<String, SubscriberEntry>>,
    pub proximities: HashMap<TrackableId, f64>,
    pub battery_level: Option<f32>,
    /// Last decided resolution per trackable.
    pub resolutions: HashMap<TrackableId, Resolution>,
    /// Rate the location engine should sample at across all trackables.
    pub location_sampling: Resolution,
    pub default_resolution: Resolution,
    pub duplicate_guard: DuplicateOperationGuard<TrackableId, StateStream>,
    pub removal_guard: PendingRemovalGuard<TrackableId, bool>,
}

impl QueueProperties for PublisherProperties {
    fn is_stopped(&self) -> bool {
        self.state == PublisherState::Stopped
    }
}

impl PublisherProperties {
    pub fn new(default_resolution: Resolution) -> Self {
        Self {
            state: PublisherState::Idle,
            trackables: HashMap::new(),
            state_flows: HashMap::new(),
            subscribed_to_presence: HashMap::new(),
            entered_presence: HashMap::new(),
            connection_state: None,
            channel_states: HashMap::new(),
            subscribers: HashMap::new(),
            proximities: HashMap::new(),
            battery_level: None,
            resolutions: HashMap::new(),
            location_sampling: default_resolution,
            default_resolution,
            duplicate_guard: DuplicateOperationGuard::new(),
            removal_guard: PendingRemovalGuard::new(),
        }
    }

    pub fn is_tracked(&self, id: &TrackableId) -> bool {
        self.trackables.contains_key(id)
    }

    /// No trackable is added and none is on its way in.
    pub fn has_no_trackables_adding_or_added(&self) -> bool {
        self.trackables.is_empty() && self.duplicate_guard.in_progress().next().is_none()
    }

    /// Move the publisher to `to`, recording the transition on the current span.
    pub fn transition(&mut self, to: PublisherState) {
        if self.state != to {
            record_state_transition(
                &tracing::Span::current(),
                &self.state.to_string(),
                &to.to_string(),
            );
            self.state = to;
        }
    }

    /// Presence this publisher shows on a trackable's channel.
    pub fn presence_data(&self, id: &TrackableId) -> PresenceData {
        PresenceData::publisher(self.resolutions.get(id).copied())
    }

    pub fn state_stream(&self, id: &TrackableId) -> Option<StateStream> {
        self.state_flows.get(id).map(|sender| sender.subscribe())
    }

    /// Create the state stream for `id` unless one exists, and return it.
    pub fn ensure_state_flow(&mut self, id: &TrackableId, initial: TrackableState) -> StateStream {
        let sender = self
            .state_flows
            .entry(id.clone())
            .or_insert_with(|| Arc::new(watch::channel(initial.clone()).0));
        sender.send_replace(initial);
        sender.subscribe()
    }

    pub fn set_trackable_state(&self, id: &TrackableId, state: TrackableState) {
        if let Some(sender) = self.state_flows.get(id) {
            sender.send_if_modified(|current| {
                if *current == state {
                    false
                } else {
                    *current = state;
                    true
                }
            });
        }
    }

    pub fn current_trackable_state(&self, id: &TrackableId) -> Option<TrackableState> {
        self.state_flows.get(id).map(|sender| sender.borrow().clone())
    }

    /// State of `id` as implied by the shared connection, its channel and its
    /// presence flags. A failure anywhere wins over an offline, and both win
    /// over the presence flags.
    pub fn derive_trackable_state(&self, id: &TrackableId) -> TrackableState {
        let changes = [self.connection_state.as_ref(), self.channel_states.get(id)];
        for (change, fallback) in changes.into_iter().zip(["connection failed", "channel failed"]) {
            if let Some(change) = change.filter(|c| c.state == ConnectionState::Failed) {
                let error = change
                    .error
                    .clone()
                    .unwrap_or_else(|| ErrorInformation::new(fallback));
                return TrackableState::Failed { error };
            }
        }
        for change in changes.into_iter().flatten() {
            if change.state == ConnectionState::Offline {
                return TrackableState::Offline {
                    error: change.error.clone(),
                };
            }
        }

        let subscribed = self.subscribed_to_presence.get(id).copied().unwrap_or(false);
        let entered = self.entered_presence.get(id).copied().unwrap_or(false);
        if subscribed && entered {
            TrackableState::Online
        } else {
            TrackableState::Publishing
        }
    }

    /// Push the derived state of `id` to its stream.
    pub fn update_trackable_state(&self, id: &TrackableId) {
        self.set_trackable_state(id, self.derive_trackable_state(id));
    }

    /// Forget everything known about `id` apart from the guards.
    ///
    /// The state stream receives `final_state` before it is dropped.
    pub fn forget_trackable(&mut self, id: &TrackableId, final_state: TrackableState) {
        self.set_trackable_state(id, final_state);
        self.trackables.remove(id);
        self.state_flows.remove(id);
        self.subscribed_to_presence.remove(id);
        self.entered_presence.remove(id);
        self.channel_states.remove(id);
        self.subscribers.remove(id);
        self.proximities.remove(id);
        self.resolutions.remove(id);
        self.refresh_location_sampling();
    }

    /// Subscriber requests for `id`, one entry per subscriber.
    pub fn subscriber_requests(&self, id: &TrackableId) -> Vec<Option<Resolution>> {
        self.subscribers
            .get(id)
            .map(|subscribers| {
                subscribers
                    .values()
                    .filter(|entry| entry.present)
                    .map(|entry| entry.requested_resolution)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Run the decision engine for a tracked trackable.
    pub fn decide_resolution(&self, trackable: &Trackable) -> Resolution {
        let unconstrained;
        let constraints = match &trackable.constraints {
            Some(constraints) => constraints,
            None => {
                unconstrained = ResolutionConstraints::unconstrained(self.default_resolution);
                &unconstrained
            }
        };
        let requests = self.subscriber_requests(&trackable.id);
        let input = DecisionInput::from_constraints(
            constraints,
            self.battery_level,
            self.proximities.get(&trackable.id).copied(),
            &requests,
        );
        resolution::decide(&input)
    }

    /// Recompute and store the resolution for `id`.
    ///
    /// Returns the new resolution when it differs from the stored one.
    pub fn refresh_resolution(&mut self, id: &TrackableId) -> Option<Resolution> {
        let trackable = self.trackables.get(id)?;
        let decided = self.decide_resolution(trackable);
        let previous = self.resolutions.insert(id.clone(), decided);
        let changed = previous != Some(decided);

        crate::telemetry::metrics::resolution_decisions().add(
            1,
            &[opentelemetry::KeyValue::new("changed", changed.to_string())],
        );
        self.refresh_location_sampling();
        changed.then_some(decided)
    }

    fn refresh_location_sampling(&mut self) {
        self.location_sampling =
            resolution::location_sampling(self.resolutions.values().copied(), self.default_resolution);
    }
}
