//! The publisher: a work queue specialised for publishing trackables.
//!
//! [`Publisher`] is the async facade. Each call becomes a
//! [`WorkerSpecification`] on the publisher's queue and, where there is an
//! outcome to wait for, a oneshot-backed callback. Listeners handed to the
//! transport post their events back into the same queue, so presence,
//! channel-state and connection-state changes are serialized with everything
//! else.

pub mod factory;
pub mod properties;
pub mod specification;
mod workers;

pub use factory::PublisherWorkerFactory;
pub use properties::PublisherProperties;
pub use specification::{Listeners, WorkResult, WorkerSpecification};
pub use workers::WorkerTimings;

use std::sync::Arc;
use std::time::Duration;

use crate::callback::{self, ResultCallback};
use crate::config::Config;
use crate::error::Result;
use crate::model::{Accuracy, Resolution, StateStream, Trackable, TrackableId};
use crate::queue::{QueueOptions, WorkQueue};
use crate::resolution::ResolutionConstraints;
use crate::transport::Transport;

#[derive(Debug, Clone)]
pub struct PublisherOptions {
    pub queue: QueueOptions,
    /// Used when a trackable has no constraints or the policy has no answer.
    pub default_resolution: Resolution,
    /// Applied to trackables added without their own constraints.
    pub default_constraints: Option<ResolutionConstraints>,
    pub timings: WorkerTimings,
    /// Bound on closing the transport during [`Publisher::stop`].
    pub stop_timeout: Duration,
}

impl Default for PublisherOptions {
    fn default() -> Self {
        Self {
            queue: QueueOptions::default(),
            default_resolution: Resolution::new(Accuracy::Balanced, Duration::from_secs(1), 0.0),
            default_constraints: None,
            timings: WorkerTimings::default(),
            stop_timeout: Duration::from_secs(30),
        }
    }
}

impl PublisherOptions {
    /// Options derived from loaded configuration.
    ///
    /// Reads the constraints file when one is configured and takes its default
    /// resolution as the publisher's default.
    pub fn from_config(config: &Config) -> Result<Self> {
        let mut options = Self {
            queue: QueueOptions {
                capacity: config.queue_capacity,
            },
            ..Self::default()
        };
        if let Some(constraints) = config.constraints()? {
            options.default_resolution = constraints.default_resolution;
            options.default_constraints = Some(constraints);
        }
        Ok(options)
    }
}

/// Async handle to a running publisher. Cheap to clone.
#[derive(Clone)]
pub struct Publisher {
    queue: WorkQueue<PublisherWorkerFactory>,
    default_constraints: Option<ResolutionConstraints>,
    stop_timeout: Duration,
}

impl Publisher {
    /// Start the publisher's queue on the current tokio runtime.
    pub fn start(transport: Arc<dyn Transport>, options: PublisherOptions) -> Self {
        let properties = PublisherProperties::new(options.default_resolution);
        let factory = PublisherWorkerFactory::new(Arc::clone(&transport), options.timings);
        let queue = WorkQueue::spawn(properties, factory, options.queue);
        let connection_queue = queue.clone();
        transport.subscribe_for_connection_state_change(Arc::new(move |change| {
            connection_queue.post(WorkerSpecification::ConnectionStateChange { change })
        }));
        tracing::info!(queue.id = %queue.id(), "publisher started");
        Self {
            queue,
            default_constraints: options.default_constraints,
            stop_timeout: options.stop_timeout,
        }
    }

    /// Start tracking `trackable` and wait for its state stream.
    ///
    /// Adding a trackable that is already tracked returns its existing
    /// stream; adding one whose add is in flight waits for that add.
    pub async fn add(&self, trackable: Trackable) -> Result<StateStream> {
        let (callback, receiver) = ResultCallback::oneshot();
        self.add_with_callback(trackable, callback).await;
        callback::wait(receiver).await
    }

    pub async fn add_with_callback(&self, trackable: Trackable, callback: ResultCallback<StateStream>) {
        let trackable = match (&trackable.constraints, &self.default_constraints) {
            (None, Some(defaults)) => trackable.constraints(defaults.clone()),
            _ => trackable,
        };
        let listeners = self.listeners_for(&trackable.id);
        self.queue
            .enqueue(WorkerSpecification::AddTrackable {
                trackable,
                callback,
                listeners,
            })
            .await;
    }

    /// Stop tracking `trackable`. Resolves to `false` if it was not tracked.
    pub async fn remove(&self, trackable: Trackable) -> Result<bool> {
        let (callback, receiver) = ResultCallback::oneshot();
        self.remove_with_callback(trackable, callback).await;
        callback::wait(receiver).await
    }

    pub async fn remove_with_callback(&self, trackable: Trackable, callback: ResultCallback<bool>) {
        self.queue
            .enqueue(WorkerSpecification::RemoveTrackable {
                trackable,
                callback,
            })
            .await;
    }

    /// Report the device battery level, in percent.
    pub async fn set_battery_level(&self, level: f32) {
        self.queue
            .enqueue(WorkerSpecification::BatteryLevelChanged { level })
            .await;
    }

    /// Report how close a trackable is to its destination, or `None` when unknown.
    pub async fn set_proximity(&self, trackable_id: TrackableId, proximity: Option<f64>) {
        self.queue
            .enqueue(WorkerSpecification::ProximityChanged {
                trackable_id,
                proximity,
            })
            .await;
    }

    /// Stop the publisher. Everything enqueued afterwards fails with
    /// [`Error::Stopped`](crate::error::Error::Stopped).
    pub async fn stop(&self) -> Result<()> {
        let (callback, receiver) = ResultCallback::oneshot();
        self.queue
            .enqueue(WorkerSpecification::Stop {
                callback,
                timeout: self.stop_timeout,
            })
            .await;
        callback::wait(receiver).await
    }

    pub fn queue(&self) -> &WorkQueue<PublisherWorkerFactory> {
        &self.queue
    }

    fn listeners_for(&self, trackable_id: &TrackableId) -> Listeners {
        let presence_queue = self.queue.clone();
        let presence_id = trackable_id.clone();
        let channel_queue = self.queue.clone();
        let channel_id = trackable_id.clone();
        Listeners {
            presence: Arc::new(move |message| {
                presence_queue.post(WorkerSpecification::PresenceMessage {
                    trackable_id: presence_id.clone(),
                    message,
                })
            }),
            channel_state: Arc::new(move |change| {
                channel_queue.post(WorkerSpecification::ChannelConnectionStateChange {
                    trackable_id: channel_id.clone(),
                    change,
                })
            }),
        }
    }
}
