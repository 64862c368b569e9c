//! Metric instrument factories for trackq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"trackq"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for trackq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("trackq")
}

/// Counter: work items handed to a queue.
/// Labels: `work`.
pub fn work_enqueued() -> Counter<u64> {
    meter()
        .u64_counter("trackq.work.enqueued")
        .with_description("Number of work items enqueued")
        .build()
}

/// Counter: synchronous steps executed.
/// Labels: `work`, `result` ("ok" | "error").
pub fn work_executed() -> Counter<u64> {
    meter()
        .u64_counter("trackq.work.executed")
        .with_description("Number of work steps executed")
        .build()
}

/// Counter: work items routed to their stopped path.
/// Labels: `work`.
pub fn work_stopped() -> Counter<u64> {
    meter()
        .u64_counter("trackq.work.stopped")
        .with_description("Number of work items rejected by a stopped queue")
        .build()
}

/// Counter: unexpected errors escaping work logic.
/// Labels: `work`, `phase` ("sync" | "async").
pub fn unexpected_errors() -> Counter<u64> {
    meter()
        .u64_counter("trackq.work.unexpected_errors")
        .with_description("Number of unexpected errors raised by work items")
        .build()
}

/// Histogram: async continuation duration in milliseconds.
/// Labels: `work`.
pub fn async_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("trackq.work.async_duration_ms")
        .with_description("Async continuation duration in milliseconds")
        .with_unit("ms")
        .build()
}

/// Counter: resolution decisions made.
/// Labels: `changed` ("true" | "false").
pub fn resolution_decisions() -> Counter<u64> {
    meter()
        .u64_counter("trackq.resolution.decisions")
        .with_description("Number of resolution decisions")
        .build()
}
