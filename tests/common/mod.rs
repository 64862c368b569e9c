//! Shared helpers for integration tests: an in-memory transport and polling.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use trackq::error::{Error, Result};
use trackq::model::{ErrorInformation, TrackableId};
use trackq::model::presence::{ConnectionStateChange, PresenceData, PresenceMessage};
use trackq::transport::{
    ChannelStateListener, ConnectionStateListener, PresenceListener, Transport,
};

/// Transport that records calls and can be told to fail or stall.
#[derive(Default)]
pub struct FakeTransport {
    calls: Mutex<Vec<String>>,
    connect_count: AtomicUsize,
    disconnect_count: AtomicUsize,
    connect_delay_ms: AtomicUsize,
    fail_connect: AtomicBool,
    /// Presence subscriptions left to fail before one succeeds.
    presence_failures: AtomicUsize,
    /// Presence entries left to fail before one succeeds.
    enter_failures: AtomicUsize,
    fatal_enter: AtomicBool,
    connection_listener: Mutex<Option<ConnectionStateListener>>,
    presence_updates: Mutex<Vec<(TrackableId, PresenceData)>>,
    presence_listeners: Mutex<HashMap<TrackableId, PresenceListener>>,
    channel_listeners: Mutex<HashMap<TrackableId, ChannelStateListener>>,
}

impl FakeTransport {
    pub fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self::default())
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.connect_delay_ms
            .store(delay.as_millis() as usize, Ordering::SeqCst);
    }

    pub fn set_fail_connect(&self, fail: bool) {
        self.fail_connect.store(fail, Ordering::SeqCst);
    }

    pub fn fail_presence_subscriptions(&self, times: usize) {
        self.presence_failures.store(times, Ordering::SeqCst);
    }

    pub fn fail_presence_enters(&self, times: usize) {
        self.enter_failures.store(times, Ordering::SeqCst);
    }

    /// Make every presence entry fail in a way that will never recover.
    pub fn set_fatal_enter(&self, fatal: bool) {
        self.fatal_enter.store(fatal, Ordering::SeqCst);
    }

    pub fn connect_count(&self) -> usize {
        self.connect_count.load(Ordering::SeqCst)
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnect_count.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count_calls(&self, name: &str) -> usize {
        self.calls().iter().filter(|call| call.as_str() == name).count()
    }

    pub fn presence_updates(&self) -> Vec<(TrackableId, PresenceData)> {
        self.presence_updates.lock().unwrap().clone()
    }

    /// Deliver a presence message as the realtime service would.
    pub fn emit_presence(&self, trackable_id: &TrackableId, message: PresenceMessage) {
        let listener = self
            .presence_listeners
            .lock()
            .unwrap()
            .get(trackable_id)
            .cloned()
            .expect("no presence listener registered");
        listener(message);
    }

    pub fn emit_channel_state(&self, trackable_id: &TrackableId, change: ConnectionStateChange) {
        let listener = self
            .channel_listeners
            .lock()
            .unwrap()
            .get(trackable_id)
            .cloned()
            .expect("no channel state listener registered");
        listener(change);
    }

    pub fn emit_connection_state(&self, change: ConnectionStateChange) {
        let listener = self
            .connection_listener
            .lock()
            .unwrap()
            .clone()
            .expect("no connection state listener registered");
        listener(change);
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn start_connection(&self) -> Result<()> {
        self.record("start_connection");
        Ok(())
    }

    async fn connect(
        &self,
        trackable_id: &TrackableId,
        _will_subscribe: bool,
    ) -> Result<()> {
        self.record("connect");
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        let delay = self.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        }
        if self.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::Connection {
                trackable_id: trackable_id.clone(),
                reason: "refused".to_string(),
            });
        }
        Ok(())
    }

    async fn enter_presence(
        &self,
        _trackable_id: &TrackableId,
        _presence: &PresenceData,
    ) -> Result<()> {
        self.record("enter_presence");
        if self.fatal_enter.load(Ordering::SeqCst) {
            return Err(Error::Fatal(ErrorInformation::new("presence entry refused")));
        }
        let failed = self
            .enter_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(Error::Other("presence entry unavailable".to_string()));
        }
        Ok(())
    }

    async fn subscribe_for_presence_messages(
        &self,
        trackable_id: &TrackableId,
        listener: PresenceListener,
    ) -> Result<()> {
        self.record("subscribe_for_presence_messages");
        let failed = self
            .presence_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failed {
            return Err(Error::Other("presence unavailable".to_string()));
        }
        self.presence_listeners
            .lock()
            .unwrap()
            .insert(trackable_id.clone(), listener);
        Ok(())
    }

    fn subscribe_for_channel_state_change(
        &self,
        trackable_id: &TrackableId,
        listener: ChannelStateListener,
    ) {
        self.record("subscribe_for_channel_state_change");
        self.channel_listeners
            .lock()
            .unwrap()
            .insert(trackable_id.clone(), listener);
    }

    fn subscribe_for_connection_state_change(&self, listener: ConnectionStateListener) {
        self.record("subscribe_for_connection_state_change");
        *self.connection_listener.lock().unwrap() = Some(listener);
    }

    async fn wait_for_channel_to_attach(&self, _trackable_id: &TrackableId) -> Result<()> {
        self.record("wait_for_channel_to_attach");
        Ok(())
    }

    async fn update_presence_data(
        &self,
        trackable_id: &TrackableId,
        presence: &PresenceData,
    ) -> Result<()> {
        self.record("update_presence_data");
        self.presence_updates
            .lock()
            .unwrap()
            .push((trackable_id.clone(), presence.clone()));
        Ok(())
    }

    async fn disconnect(&self, trackable_id: &TrackableId, _presence: &PresenceData) -> Result<()> {
        self.record("disconnect");
        self.disconnect_count.fetch_add(1, Ordering::SeqCst);
        self.presence_listeners.lock().unwrap().remove(trackable_id);
        self.channel_listeners.lock().unwrap().remove(trackable_id);
        Ok(())
    }

    async fn stop_connection(&self) -> Result<()> {
        self.record("stop_connection");
        Ok(())
    }

    async fn close(&self, _presence: &PresenceData) -> Result<()> {
        self.record("close");
        Ok(())
    }
}

/// Poll `condition` until it holds, failing the test after two seconds.
pub async fn eventually<F: FnMut() -> bool>(mut condition: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within two seconds"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Like [`eventually`], for conditions that have to await.
pub async fn eventually_async<F, Fut>(mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition().await {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not met within two seconds"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

/// Await `future`, failing the test if it takes longer than two seconds.
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), future)
        .await
        .expect("timed out")
}
