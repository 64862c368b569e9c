//! Integration tests for the publisher's work items over a fake transport.

mod common;

use chrono::{Duration as ChronoDuration, Utc};
use std::sync::Arc;
use std::time::Duration;

use common::{FakeTransport, eventually, within};
use trackq::error::Error;
use trackq::model::presence::{
    ConnectionState, ConnectionStateChange, PresenceAction, PresenceData, PresenceMessage,
};
use trackq::model::{
    Accuracy, ErrorInformation, Resolution, Trackable, TrackableId, TrackableState,
};
use trackq::publisher::{Publisher, PublisherOptions, WorkerTimings};
use trackq::resolution::ResolutionConstraints;

fn options() -> PublisherOptions {
    PublisherOptions {
        timings: WorkerTimings {
            add_retry_delay: Duration::from_millis(10),
            presence_subscribe_timeout: Duration::from_millis(500),
            enter_presence_retry_delay: Duration::from_millis(10),
        },
        stop_timeout: Duration::from_secs(1),
        ..PublisherOptions::default()
    }
}

fn start() -> (Publisher, Arc<FakeTransport>) {
    let transport = FakeTransport::new();
    let publisher = Publisher::start(transport.clone(), options());
    (publisher, transport)
}

fn resolution(accuracy: Accuracy, interval_ms: u64) -> Resolution {
    Resolution::new(accuracy, Duration::from_millis(interval_ms), 0.0)
}

fn subscriber_enter(client_id: &str, requested: Option<Resolution>) -> PresenceMessage {
    PresenceMessage {
        action: PresenceAction::Enter,
        client_id: client_id.to_string(),
        timestamp: Utc::now(),
        data: PresenceData::subscriber(requested).to_json(),
    }
}

/// Wait until everything handed to the queue so far has been handled.
async fn settle(publisher: &Publisher) {
    let removed = within(publisher.remove(Trackable::new("settle"))).await.unwrap();
    assert!(!removed);
}

fn change(state: ConnectionState, error: Option<&str>) -> ConnectionStateChange {
    ConnectionStateChange {
        state,
        error: error.map(ErrorInformation::new),
    }
}

/// Whether any presence update carried `expected`.
fn published(transport: &FakeTransport, expected: Resolution) -> bool {
    transport
        .presence_updates()
        .iter()
        .any(|(_, presence)| presence.resolution == Some(expected))
}

// ---------------------------------------------------------------------------
// Adding
// ---------------------------------------------------------------------------

#[tokio::test]
async fn add_connects_and_reports_online() {
    let (publisher, transport) = start();

    let stream = within(publisher.add(Trackable::new("parcel-1"))).await.unwrap();

    assert_eq!(*stream.borrow(), TrackableState::Online);
    assert_eq!(transport.connect_count(), 1);
    assert_eq!(transport.count_calls("start_connection"), 1);
    assert_eq!(transport.count_calls("subscribe_for_channel_state_change"), 1);
}

#[tokio::test]
async fn adding_a_tracked_trackable_returns_the_existing_stream() {
    let (publisher, transport) = start();

    let first = publisher.add(Trackable::new("parcel-1")).await.unwrap();
    let second = publisher.add(Trackable::new("parcel-1")).await.unwrap();

    assert!(first.same_channel(&second));
    assert_eq!(transport.connect_count(), 1);
}

#[tokio::test]
async fn concurrent_duplicate_adds_share_one_connect() {
    let (publisher, transport) = start();
    transport.set_connect_delay(Duration::from_millis(50));

    let (first, second) = within(async {
        tokio::join!(
            publisher.add(Trackable::new("parcel-1")),
            publisher.add(Trackable::new("parcel-1")),
        )
    })
    .await;

    let first = first.unwrap();
    let second = second.unwrap();
    assert!(first.same_channel(&second));
    assert_eq!(transport.connect_count(), 1);
}

#[tokio::test]
async fn second_trackable_waits_for_the_connection_then_connects() {
    let (publisher, transport) = start();
    transport.set_connect_delay(Duration::from_millis(30));

    let (a, b) = within(async {
        tokio::join!(
            publisher.add(Trackable::new("parcel-a")),
            publisher.add(Trackable::new("parcel-b")),
        )
    })
    .await;

    assert!(a.is_ok());
    assert!(b.is_ok());
    assert_eq!(transport.connect_count(), 2);
    assert_eq!(transport.count_calls("start_connection"), 1);
}

#[tokio::test]
async fn failed_connect_fails_the_add_and_a_later_add_succeeds() {
    let (publisher, transport) = start();
    transport.set_fail_connect(true);

    let error = within(publisher.add(Trackable::new("parcel-1")))
        .await
        .unwrap_err();
    assert!(matches!(error, Error::Connection { .. }));

    transport.set_fail_connect(false);
    let stream = within(publisher.add(Trackable::new("parcel-1"))).await.unwrap();
    assert_eq!(*stream.borrow(), TrackableState::Online);
    assert_eq!(transport.count_calls("stop_connection"), 1);
}

#[tokio::test]
async fn presence_subscription_failure_publishes_then_goes_online_after_retry() {
    let (publisher, transport) = start();
    transport.fail_presence_subscriptions(1);

    let mut stream = within(publisher.add(Trackable::new("parcel-1"))).await.unwrap();

    within(stream.wait_for(|state| *state == TrackableState::Online))
        .await
        .unwrap();
    assert_eq!(transport.count_calls("subscribe_for_presence_messages"), 2);
    assert_eq!(transport.count_calls("wait_for_channel_to_attach"), 1);
}

#[tokio::test]
async fn presence_entry_failure_keeps_publishing_until_a_retry_enters() {
    let (publisher, transport) = start();
    transport.fail_presence_enters(usize::MAX);

    let mut stream = within(publisher.add(Trackable::new("parcel-1"))).await.unwrap();

    eventually(|| transport.count_calls("enter_presence") >= 3).await;
    assert_eq!(*stream.borrow(), TrackableState::Publishing);

    transport.fail_presence_enters(0);
    within(stream.wait_for(|state| *state == TrackableState::Online))
        .await
        .unwrap();
}

#[tokio::test]
async fn fatal_presence_entry_fails_the_trackable_and_stops_the_connection() {
    let (publisher, transport) = start();
    transport.set_fatal_enter(true);

    let mut stream = within(publisher.add(Trackable::new("parcel-1"))).await.unwrap();

    let failed = within(stream.wait_for(|state| matches!(state, TrackableState::Failed { .. })))
        .await
        .unwrap()
        .clone();
    assert_eq!(
        failed,
        TrackableState::Failed {
            error: ErrorInformation::new("presence entry refused")
        }
    );
    eventually(|| transport.disconnect_count() == 1).await;
    eventually(|| transport.count_calls("stop_connection") == 1).await;

    // No longer tracked.
    let removed = within(publisher.remove(Trackable::new("parcel-1"))).await.unwrap();
    assert!(!removed);
}

// ---------------------------------------------------------------------------
// Removing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn remove_disconnects_and_marks_the_stream_offline() {
    let (publisher, transport) = start();
    let stream = publisher.add(Trackable::new("parcel-1")).await.unwrap();

    let removed = within(publisher.remove(Trackable::new("parcel-1"))).await.unwrap();

    assert!(removed);
    assert_eq!(*stream.borrow(), TrackableState::offline());
    assert_eq!(transport.disconnect_count(), 1);
    eventually(|| transport.count_calls("stop_connection") == 1).await;
}

#[tokio::test]
async fn removing_an_unknown_trackable_reports_false() {
    let (publisher, transport) = start();

    let removed = within(publisher.remove(Trackable::new("ghost"))).await.unwrap();

    assert!(!removed);
    assert_eq!(transport.disconnect_count(), 0);
}

#[tokio::test]
async fn remove_during_add_fails_the_add_and_succeeds_the_remove() {
    let (publisher, transport) = start();
    transport.set_connect_delay(Duration::from_millis(100));

    let (added, removed) = within(async {
        tokio::join!(publisher.add(Trackable::new("parcel-1")), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.remove(Trackable::new("parcel-1")).await
        })
    })
    .await;

    assert_eq!(
        added.unwrap_err(),
        Error::RemovalRequested(TrackableId::new("parcel-1"))
    );
    assert!(removed.unwrap());
    assert_eq!(transport.disconnect_count(), 1);

    // Never landed in the tracked set.
    let again = within(publisher.remove(Trackable::new("parcel-1"))).await.unwrap();
    assert!(!again);
}

// ---------------------------------------------------------------------------
// Channel events
// ---------------------------------------------------------------------------

#[tokio::test]
async fn channel_state_changes_reach_the_state_stream() {
    let (publisher, transport) = start();
    let id = TrackableId::new("parcel-1");
    let mut stream = publisher.add(Trackable::new(id.clone())).await.unwrap();

    transport.emit_channel_state(
        &id,
        ConnectionStateChange {
            state: ConnectionState::Offline,
            error: None,
        },
    );
    within(stream.wait_for(|state| matches!(state, TrackableState::Offline { .. })))
        .await
        .unwrap();

    transport.emit_channel_state(
        &id,
        ConnectionStateChange {
            state: ConnectionState::Online,
            error: None,
        },
    );
    within(stream.wait_for(|state| *state == TrackableState::Online))
        .await
        .unwrap();
}

#[tokio::test]
async fn connection_state_changes_reach_every_stream() {
    let (publisher, transport) = start();
    let mut first = publisher.add(Trackable::new("parcel-1")).await.unwrap();
    let mut second = publisher.add(Trackable::new("parcel-2")).await.unwrap();

    transport.emit_connection_state(change(ConnectionState::Offline, Some("network lost")));
    for stream in [&mut first, &mut second] {
        let state = within(stream.wait_for(|state| matches!(state, TrackableState::Offline { .. })))
            .await
            .unwrap()
            .clone();
        assert_eq!(
            state,
            TrackableState::Offline {
                error: Some(ErrorInformation::new("network lost"))
            }
        );
    }

    transport.emit_connection_state(change(ConnectionState::Online, None));
    for stream in [&mut first, &mut second] {
        within(stream.wait_for(|state| *state == TrackableState::Online))
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn failed_connection_wins_over_an_online_channel() {
    let (publisher, transport) = start();
    let id = TrackableId::new("parcel-1");
    let stream = publisher.add(Trackable::new(id.clone())).await.unwrap();

    transport.emit_connection_state(change(ConnectionState::Failed, None));
    transport.emit_channel_state(&id, change(ConnectionState::Online, None));
    settle(&publisher).await;

    assert_eq!(
        *stream.borrow(),
        TrackableState::Failed {
            error: ErrorInformation::new("connection failed")
        }
    );
}

#[tokio::test]
async fn offline_channel_keeps_its_stream_offline_while_the_connection_is_online() {
    let (publisher, transport) = start();
    let id = TrackableId::new("parcel-1");
    let stream = publisher.add(Trackable::new(id.clone())).await.unwrap();

    transport.emit_channel_state(&id, change(ConnectionState::Offline, None));
    transport.emit_connection_state(change(ConnectionState::Online, None));
    settle(&publisher).await;

    assert_eq!(*stream.borrow(), TrackableState::offline());
}

#[tokio::test]
async fn single_subscriber_request_is_published_as_the_resolution() {
    let (publisher, transport) = start();
    let id = TrackableId::new("parcel-1");
    publisher.add(Trackable::new(id.clone())).await.unwrap();

    let requested = resolution(Accuracy::High, 250);
    transport.emit_presence(&id, subscriber_enter("subscriber-1", Some(requested)));

    eventually(|| published(&transport, requested)).await;
}

#[tokio::test]
async fn stale_presence_messages_are_ignored() {
    let (publisher, transport) = start();
    let id = TrackableId::new("parcel-1");
    publisher.add(Trackable::new(id.clone())).await.unwrap();

    let fresh = resolution(Accuracy::High, 250);
    transport.emit_presence(&id, subscriber_enter("subscriber-1", Some(fresh)));
    eventually(|| published(&transport, fresh)).await;

    let old = resolution(Accuracy::Low, 5_000);
    let mut stale = subscriber_enter("subscriber-1", Some(old));
    stale.action = PresenceAction::Update;
    stale.timestamp = Utc::now() - ChronoDuration::seconds(60);
    transport.emit_presence(&id, stale);

    // Messages are handled in order, so once the newer request is published
    // the stale one has been seen and dropped.
    let newer = resolution(Accuracy::Maximum, 100);
    transport.emit_presence(&id, subscriber_enter("subscriber-1", Some(newer)));
    eventually(|| published(&transport, newer)).await;
    assert!(!published(&transport, old));
}

#[tokio::test]
async fn enter_older_than_a_leave_does_not_bring_the_subscriber_back() {
    let (publisher, transport) = start();
    let id = TrackableId::new("parcel-1");
    publisher.add(Trackable::new(id.clone())).await.unwrap();

    let requested = resolution(Accuracy::High, 250);
    transport.emit_presence(&id, subscriber_enter("subscriber-1", Some(requested)));
    eventually(|| published(&transport, requested)).await;

    let mut leave = subscriber_enter("subscriber-1", None);
    leave.action = PresenceAction::Leave;
    transport.emit_presence(&id, leave);

    let late = resolution(Accuracy::Low, 4_000);
    let mut late_enter = subscriber_enter("subscriber-1", Some(late));
    late_enter.timestamp = Utc::now() - ChronoDuration::seconds(60);
    transport.emit_presence(&id, late_enter);
    settle(&publisher).await;

    assert!(!published(&transport, late));

    // A genuinely newer enter is still honoured.
    let back = resolution(Accuracy::Maximum, 500);
    transport.emit_presence(&id, subscriber_enter("subscriber-1", Some(back)));
    eventually(|| published(&transport, back)).await;
    assert!(!published(&transport, late));
}

#[tokio::test]
async fn low_battery_stretches_the_published_interval() {
    let (publisher, transport) = start();
    let default = resolution(Accuracy::Balanced, 1_000);
    let constraints = ResolutionConstraints {
        battery_threshold: 20.0,
        low_battery_multiplier: 2.0,
        ..ResolutionConstraints::unconstrained(default)
    };
    publisher
        .add(Trackable::new("parcel-1").constraints(constraints))
        .await
        .unwrap();

    publisher.set_battery_level(10.0).await;

    eventually(|| published(&transport, resolution(Accuracy::Balanced, 2_000))).await;
}

// ---------------------------------------------------------------------------
// Stopping
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stop_closes_the_transport_and_rejects_later_work() {
    let (publisher, transport) = start();
    let stream = publisher.add(Trackable::new("parcel-1")).await.unwrap();

    within(publisher.stop()).await.unwrap();

    assert_eq!(transport.count_calls("close"), 1);
    assert_eq!(*stream.borrow(), TrackableState::offline());
    assert_eq!(
        within(publisher.add(Trackable::new("parcel-2"))).await.unwrap_err(),
        Error::Stopped
    );
    assert_eq!(
        within(publisher.remove(Trackable::new("parcel-1"))).await.unwrap_err(),
        Error::Stopped
    );
    // Stopping again is harmless.
    within(publisher.stop()).await.unwrap();
}

#[tokio::test]
async fn stop_fails_an_add_in_flight() {
    let (publisher, transport) = start();
    transport.set_connect_delay(Duration::from_millis(100));

    let (added, stopped) = within(async {
        tokio::join!(publisher.add(Trackable::new("parcel-1")), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.stop().await
        })
    })
    .await;

    assert_eq!(added.unwrap_err(), Error::Stopped);
    assert!(stopped.is_ok());
}
