//! Coordination guards for operations keyed by object identity.
//!
//! Both guards are plain data owned by the queue's properties. They are only
//! ever touched from inside a synchronous work step, so they carry no locks.

pub mod duplicate;
pub mod removal;

pub use duplicate::DuplicateOperationGuard;
pub use removal::PendingRemovalGuard;
