//! Boundary to the realtime transport.
//!
//! The queue never performs network I/O itself. Work items call into a
//! [`Transport`] from their async continuations; listeners handed to the
//! transport are opaque to the core and passed through specifications as-is.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::Result;
use crate::model::TrackableId;
use crate::model::presence::{ConnectionStateChange, PresenceData, PresenceMessage};

/// Called for every presence event on a trackable's channel.
pub type PresenceListener = Arc<dyn Fn(PresenceMessage) + Send + Sync>;

/// Called whenever a trackable's channel changes connection state.
pub type ChannelStateListener = Arc<dyn Fn(ConnectionStateChange) + Send + Sync>;

/// Called whenever the shared connection changes state.
pub type ConnectionStateListener = Arc<dyn Fn(ConnectionStateChange) + Send + Sync>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the shared connection. Called before the first channel is joined.
    async fn start_connection(&self) -> Result<()>;

    /// Register `listener` for state changes of the shared connection.
    fn subscribe_for_connection_state_change(&self, listener: ConnectionStateListener);

    /// Join the channel for `trackable_id`.
    async fn connect(&self, trackable_id: &TrackableId, will_subscribe: bool) -> Result<()>;

    /// Enter presence on a joined channel. [`Error::Fatal`] means entering
    /// will never succeed on this channel.
    ///
    /// [`Error::Fatal`]: crate::error::Error::Fatal
    async fn enter_presence(&self, trackable_id: &TrackableId, presence: &PresenceData) -> Result<()>;

    async fn subscribe_for_presence_messages(
        &self,
        trackable_id: &TrackableId,
        listener: PresenceListener,
    ) -> Result<()>;

    /// Register `listener` for channel state changes. Registration itself cannot fail.
    fn subscribe_for_channel_state_change(
        &self,
        trackable_id: &TrackableId,
        listener: ChannelStateListener,
    );

    /// Resolve once the channel for `trackable_id` is attached.
    async fn wait_for_channel_to_attach(&self, trackable_id: &TrackableId) -> Result<()>;

    async fn update_presence_data(
        &self,
        trackable_id: &TrackableId,
        presence: &PresenceData,
    ) -> Result<()>;

    /// Leave presence and detach from the channel for `trackable_id`.
    async fn disconnect(&self, trackable_id: &TrackableId, presence: &PresenceData) -> Result<()>;

    /// Close the shared connection once no channel is left.
    async fn stop_connection(&self) -> Result<()>;

    /// Leave every channel and close the connection for good.
    async fn close(&self, presence: &PresenceData) -> Result<()>;
}
