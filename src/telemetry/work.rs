//! Work execution span helpers.
//!
//! Provides span creation and state-transition recording for work items
//! flowing through a queue.

use tracing::Span;
use uuid::Uuid;

/// Start a span for one work step.
///
/// The `work.trackable` field is declared empty and can be filled in by the
/// worker once it knows which trackable it acts on.
pub fn start_work_span(work: &str, queue_id: &Uuid) -> Span {
    tracing::info_span!(
        "work.execute",
        "work.kind" = work,
        "queue.id" = %queue_id,
        "work.trackable" = tracing::field::Empty,
    )
}

/// Record a publisher state transition as an event on `span`.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
