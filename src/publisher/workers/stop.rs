use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use super::Ctx;
use crate::callback::ResultCallback;
use crate::error::Error;
use crate::model::presence::PresenceData;
use crate::model::{PublisherState, TrackableId, TrackableState};
use crate::publisher::properties::PublisherProperties;
use crate::publisher::specification::{WorkResult, WorkerSpecification};
use crate::queue::Worker;
use crate::transport::Transport;

/// Terminal step: fails whatever is pending and closes the transport.
pub(crate) struct StopWorker {
    callback: ResultCallback<()>,
    timeout: Duration,
    transport: Arc<dyn Transport>,
}

impl StopWorker {
    pub(crate) fn new(
        callback: ResultCallback<()>,
        timeout: Duration,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            callback,
            timeout,
            transport,
        }
    }
}

impl Worker<PublisherProperties, WorkerSpecification, WorkResult> for StopWorker {
    fn name(&self) -> &'static str {
        "stop"
    }

    fn do_work(
        &mut self,
        mut properties: PublisherProperties,
        ctx: &mut Ctx,
    ) -> anyhow::Result<PublisherProperties> {
        info!(trackables = properties.trackables.len(), "stopping publisher");

        let adding: Vec<TrackableId> = properties.duplicate_guard.in_progress().cloned().collect();
        for id in &adding {
            properties.duplicate_guard.finish(id, Err(Error::Stopped));
        }
        let removing: Vec<TrackableId> = properties.removal_guard.marked().cloned().collect();
        for id in &removing {
            properties.removal_guard.remove_marked(id, Err(Error::Stopped));
        }

        let tracked: Vec<TrackableId> = properties.trackables.keys().cloned().collect();
        for id in &tracked {
            properties.forget_trackable(id, TrackableState::offline());
        }
        properties.transition(PublisherState::Stopped);

        let transport = Arc::clone(&self.transport);
        let callback = self.callback.clone();
        let timeout = self.timeout;
        let presence = PresenceData::publisher(None);
        ctx.spawn(async move {
            let result = match tokio::time::timeout(timeout, transport.close(&presence)).await {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout("closing the transport".to_string())),
            };
            Ok(WorkResult::Stop { callback, result })
        });
        Ok(properties)
    }

    /// Stopping twice is not an error.
    fn do_when_stopped(&mut self, error: Error) -> anyhow::Result<()> {
        match error {
            Error::Stopped => self.callback.success(()),
            other => self.callback.failure(other),
        }
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
