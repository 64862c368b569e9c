//! Integration tests for the duplicate-operation and pending-removal guards.

use std::sync::{Arc, Mutex};

use trackq::callback::ResultCallback;
use trackq::error::{Error, Result};
use trackq::guard::{DuplicateOperationGuard, PendingRemovalGuard};

/// A callback that appends `(label, result)` to a shared log.
fn recording<T: Send + 'static>(
    log: &Arc<Mutex<Vec<(&'static str, Result<T>)>>>,
    label: &'static str,
) -> ResultCallback<T> {
    let log = Arc::clone(log);
    ResultCallback::new(move |result| log.lock().unwrap().push((label, result)))
}

// ---------------------------------------------------------------------------
// DuplicateOperationGuard
// ---------------------------------------------------------------------------

#[test]
fn finish_calls_duplicates_in_save_order_then_clears() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut guard: DuplicateOperationGuard<String, u32> = DuplicateOperationGuard::new();

    guard.start("parcel".to_string());
    guard.save_duplicate_callback("parcel".to_string(), recording(&log, "first"));
    guard.save_duplicate_callback("parcel".to_string(), recording(&log, "second"));
    assert!(guard.is_in_progress(&"parcel".to_string()));

    guard.finish(&"parcel".to_string(), Ok(7));

    assert_eq!(
        *log.lock().unwrap(),
        vec![("first", Ok(7)), ("second", Ok(7))]
    );
    assert!(!guard.is_in_progress(&"parcel".to_string()));

    // A second finish has nobody left to call.
    guard.finish(&"parcel".to_string(), Ok(8));
    assert_eq!(log.lock().unwrap().len(), 2);
}

#[test]
fn failures_fan_out_to_every_duplicate() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut guard: DuplicateOperationGuard<String, u32> = DuplicateOperationGuard::new();

    guard.start("parcel".to_string());
    guard.save_duplicate_callback("parcel".to_string(), recording(&log, "a"));
    guard.save_duplicate_callback("parcel".to_string(), recording(&log, "b"));
    guard.finish(&"parcel".to_string(), Err(Error::Stopped));

    assert_eq!(
        *log.lock().unwrap(),
        vec![("a", Err(Error::Stopped)), ("b", Err(Error::Stopped))]
    );
}

#[test]
fn keys_are_independent() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut guard: DuplicateOperationGuard<String, u32> = DuplicateOperationGuard::new();

    guard.start("a".to_string());
    guard.start("b".to_string());
    guard.save_duplicate_callback("a".to_string(), recording(&log, "a"));
    guard.save_duplicate_callback("b".to_string(), recording(&log, "b"));

    guard.finish(&"a".to_string(), Ok(1));

    assert_eq!(*log.lock().unwrap(), vec![("a", Ok(1))]);
    assert!(guard.is_in_progress(&"b".to_string()));
    assert_eq!(guard.in_progress().collect::<Vec<_>>(), vec!["b"]);
}

#[test]
fn clear_drops_callbacks_without_calling_them() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut guard: DuplicateOperationGuard<String, u32> = DuplicateOperationGuard::new();

    guard.start("a".to_string());
    guard.save_duplicate_callback("a".to_string(), recording(&log, "a"));
    guard.clear(&"a".to_string());
    guard.finish(&"a".to_string(), Ok(1));

    assert!(log.lock().unwrap().is_empty());
    assert!(!guard.is_in_progress(&"a".to_string()));
}

// ---------------------------------------------------------------------------
// PendingRemovalGuard
// ---------------------------------------------------------------------------

#[test]
fn remove_marked_notifies_every_waiter_once() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut guard: PendingRemovalGuard<String, bool> = PendingRemovalGuard::new();

    guard.mark_for_removal("parcel".to_string(), recording(&log, "first"));
    guard.mark_for_removal("parcel".to_string(), recording(&log, "second"));
    assert!(guard.is_marked_for_removal(&"parcel".to_string()));

    guard.remove_marked(&"parcel".to_string(), Ok(true));
    guard.remove_marked(&"parcel".to_string(), Ok(false));

    assert_eq!(
        *log.lock().unwrap(),
        vec![("first", Ok(true)), ("second", Ok(true))]
    );
    assert!(!guard.is_marked_for_removal(&"parcel".to_string()));
}

#[test]
fn remove_marked_on_an_unmarked_key_does_nothing() {
    let mut guard: PendingRemovalGuard<String, bool> = PendingRemovalGuard::new();

    guard.remove_marked(&"ghost".to_string(), Ok(true));

    assert!(!guard.is_marked_for_removal(&"ghost".to_string()));
    assert_eq!(guard.marked().count(), 0);
}

#[test]
fn guards_are_copied_with_properties() {
    let log = Arc::new(Mutex::new(Vec::new()));
    let mut guard: PendingRemovalGuard<String, bool> = PendingRemovalGuard::new();
    guard.mark_for_removal("parcel".to_string(), recording(&log, "waiter"));

    let mut snapshot = guard.clone();
    snapshot.remove_marked(&"parcel".to_string(), Ok(true));

    // The original still holds its mark; only the snapshot was resolved.
    assert!(guard.is_marked_for_removal(&"parcel".to_string()));
    assert_eq!(log.lock().unwrap().len(), 1);
}
