//! Inputs to the resolution decision that arrive from outside the channels.

use std::sync::Arc;
use tracing::debug;

use super::{Ctx, push_presence_updates, record_trackable};
use crate::error::Error;
use crate::model::TrackableId;
use crate::publisher::properties::PublisherProperties;
use crate::publisher::specification::{WorkResult, WorkerSpecification};
use crate::queue::Worker;
use crate::transport::Transport;

pub(crate) struct BatteryLevelChangedWorker {
    level: f32,
    transport: Arc<dyn Transport>,
}

impl BatteryLevelChangedWorker {
    pub(crate) fn new(level: f32, transport: Arc<dyn Transport>) -> Self {
        Self { level, transport }
    }
}

impl Worker<PublisherProperties, WorkerSpecification, WorkResult> for BatteryLevelChangedWorker {
    fn name(&self) -> &'static str {
        "battery_level_changed"
    }

    fn do_work(
        &mut self,
        mut properties: PublisherProperties,
        ctx: &mut Ctx,
    ) -> anyhow::Result<PublisherProperties> {
        debug!(level = self.level, "battery level changed");
        properties.battery_level = Some(self.level);

        let mut ids: Vec<TrackableId> = properties.trackables.keys().cloned().collect();
        ids.sort();
        let changed: Vec<TrackableId> = ids
            .into_iter()
            .filter(|id| properties.refresh_resolution(id).is_some())
            .collect();
        push_presence_updates(&properties, ctx, &self.transport, changed);
        Ok(properties)
    }

    fn do_when_stopped(&mut self, _error: Error) -> anyhow::Result<()> {
        Ok(())
    }
}

pub(crate) struct ProximityChangedWorker {
    trackable_id: TrackableId,
    proximity: Option<f64>,
    transport: Arc<dyn Transport>,
}

impl ProximityChangedWorker {
    pub(crate) fn new(
        trackable_id: TrackableId,
        proximity: Option<f64>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            trackable_id,
            proximity,
            transport,
        }
    }
}

impl Worker<PublisherProperties, WorkerSpecification, WorkResult> for ProximityChangedWorker {
    fn name(&self) -> &'static str {
        "proximity_changed"
    }

    fn do_work(
        &mut self,
        mut properties: PublisherProperties,
        ctx: &mut Ctx,
    ) -> anyhow::Result<PublisherProperties> {
        let id = self.trackable_id.clone();
        record_trackable(&id);
        if !properties.is_tracked(&id) {
            return Ok(properties);
        }

        match self.proximity {
            Some(proximity) => properties.proximities.insert(id.clone(), proximity),
            None => properties.proximities.remove(&id),
        };
        if properties.refresh_resolution(&id).is_some() {
            push_presence_updates(&properties, ctx, &self.transport, vec![id]);
        }
        Ok(properties)
    }

    fn do_when_stopped(&mut self, _error: Error) -> anyhow::Result<()> {
        Ok(())
    }
}
