//! Removing trackables and winding the shared connection down.

use std::sync::Arc;
use tracing::{debug, warn};

use super::{Ctx, record_trackable, stop_connection_if_idle};
use crate::callback::ResultCallback;
use crate::error::Error;
use crate::model::{ErrorInformation, PublisherState, Trackable, TrackableState};
use crate::publisher::properties::PublisherProperties;
use crate::publisher::specification::{RemoveTrackableResult, WorkResult, WorkerSpecification};
use crate::queue::Worker;
use crate::transport::Transport;

pub(crate) struct RemoveTrackableWorker {
    trackable: Trackable,
    callback: ResultCallback<bool>,
    transport: Arc<dyn Transport>,
}

impl RemoveTrackableWorker {
    pub(crate) fn new(
        trackable: Trackable,
        callback: ResultCallback<bool>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            trackable,
            callback,
            transport,
        }
    }
}

impl Worker<PublisherProperties, WorkerSpecification, WorkResult> for RemoveTrackableWorker {
    fn name(&self) -> &'static str {
        "remove_trackable"
    }

    fn do_work(
        &mut self,
        mut properties: PublisherProperties,
        ctx: &mut Ctx,
    ) -> anyhow::Result<PublisherProperties> {
        let id = self.trackable.id.clone();
        record_trackable(&id);

        if properties.is_tracked(&id) {
            let presence = properties.presence_data(&id);
            properties.forget_trackable(&id, TrackableState::offline());

            let transport = Arc::clone(&self.transport);
            let trackable = self.trackable.clone();
            let callback = self.callback.clone();
            ctx.spawn(async move {
                let outcome = match transport.disconnect(&trackable.id, &presence).await {
                    Ok(()) => RemoveTrackableResult::Disconnected {
                        trackable,
                        callback,
                    },
                    Err(error) => RemoveTrackableResult::Failed { callback, error },
                };
                Ok(WorkResult::RemoveTrackable(outcome))
            });
        } else if properties.duplicate_guard.is_in_progress(&id) {
            debug!("trackable is still being added, marking for removal");
            properties
                .removal_guard
                .mark_for_removal(id, self.callback.clone());
        } else {
            ctx.complete(WorkResult::RemoveTrackable(RemoveTrackableResult::NotTracked {
                callback: self.callback.clone(),
            }));
        }
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
        self.callback.failure(Error::unexpected(error));
        None
    }
}

pub(crate) struct DisconnectSuccessWorker {
    trackable: Trackable,
    callback: ResultCallback<bool>,
    transport: Arc<dyn Transport>,
}

impl DisconnectSuccessWorker {
    pub(crate) fn new(
        trackable: Trackable,
        callback: ResultCallback<bool>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            trackable,
            callback,
            transport,
        }
    }
}

impl Worker<PublisherProperties, WorkerSpecification, WorkResult> for DisconnectSuccessWorker {
    fn name(&self) -> &'static str {
        "disconnect_success"
    }

    fn do_work(
        &mut self,
        mut properties: PublisherProperties,
        ctx: &mut Ctx,
    ) -> anyhow::Result<PublisherProperties> {
        record_trackable(&self.trackable.id);
        self.callback.success(true);
        stop_connection_if_idle(&mut properties, ctx, &self.transport);
        Ok(properties)
    }

    fn do_when_stopped(&mut self, error: Error) -> anyhow::Result<()> {
        self.callback.failure(error);
        Ok(())
    }

    fn on_unexpected_error(&mut self, error: &anyhow::Error, _ctx: &mut Ctx) {
        self.callback.failure(Error::unexpected(error));
    }

    fn on_unexpected_async_error(&mut self, _error: &anyhow::Error) -> Option<WorkerSpecification> {
        Some(WorkerSpecification::StoppingConnectionFinished)
    }
}

/// Drops a trackable whose channel can never work, leaving its stream `Failed`.
pub(crate) struct FailTrackableWorker {
    trackable: Trackable,
    error: ErrorInformation,
    transport: Arc<dyn Transport>,
}

impl FailTrackableWorker {
    pub(crate) fn new(
        trackable: Trackable,
        error: ErrorInformation,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            trackable,
            error,
            transport,
        }
    }
}

impl Worker<PublisherProperties, WorkerSpecification, WorkResult> for FailTrackableWorker {
    fn name(&self) -> &'static str {
        "fail_trackable"
    }

    fn do_work(
        &mut self,
        mut properties: PublisherProperties,
        ctx: &mut Ctx,
    ) -> anyhow::Result<PublisherProperties> {
        let id = self.trackable.id.clone();
        record_trackable(&id);
        if !properties.is_tracked(&id) {
            return Ok(properties);
        }

        warn!(error = %self.error.message, "trackable failed, removing it");
        let presence = properties.presence_data(&id);
        properties.forget_trackable(
            &id,
            TrackableState::Failed {
                error: self.error.clone(),
            },
        );

        let stop_connection = properties.has_no_trackables_adding_or_added()
            && matches!(
                properties.state,
                PublisherState::Connecting | PublisherState::Connected
            );
        if stop_connection {
            properties.transition(PublisherState::Disconnecting);
        }

        let transport = Arc::clone(&self.transport);
        ctx.spawn(async move {
            let disconnected = transport.disconnect(&id, &presence).await;
            let connection_stopped = if stop_connection {
                Some(transport.stop_connection().await)
            } else {
                None
            };
            Ok(WorkResult::TrackableFailed {
                trackable_id: id,
                disconnected,
                connection_stopped,
            })
        });
        Ok(properties)
    }

    fn do_when_stopped(&mut self, _error: Error) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_unexpected_async_error(&mut self, _error: &anyhow::Error) -> Option<WorkerSpecification> {
        Some(WorkerSpecification::StoppingConnectionFinished)
    }
}

pub(crate) struct StoppingConnectionFinishedWorker;

impl Worker<PublisherProperties, WorkerSpecification, WorkResult>
    for StoppingConnectionFinishedWorker
{
    fn name(&self) -> &'static str {
        "stopping_connection_finished"
    }

    fn do_work(
        &mut self,
        mut properties: PublisherProperties,
        _ctx: &mut Ctx,
    ) -> anyhow::Result<PublisherProperties> {
        if properties.state == PublisherState::Disconnecting {
            properties.transition(PublisherState::Idle);
        }
        Ok(properties)
    }

    fn do_when_stopped(&mut self, _error: Error) -> anyhow::Result<()> {
        Ok(())
    }
}
