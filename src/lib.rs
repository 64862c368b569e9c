//! # trackq
//!
//! Work-serialization core for a location-tracking publisher.
//!
//! All mutable state lives behind a single-consumer work queue
//! ([`queue::WorkQueue`]). Public operations become specifications, a factory
//! turns them into workers, and workers split their work into a synchronous
//! step on the queue's actor and an optional async continuation whose result
//! re-enters the queue. Duplicate adds and removals that race an add are
//! coordinated by the guards in [`guard`]; per-trackable sampling rates come
//! from the decision engine in [`resolution`].

pub mod callback;
pub mod config;
pub mod error;
pub mod guard;
pub mod model;
pub mod publisher;
pub mod queue;
pub mod resolution;
pub mod telemetry;
pub mod transport;
