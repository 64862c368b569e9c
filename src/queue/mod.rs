//! Actor-style work queue.
//!
//! Callers never touch shared state. They describe what they want as a
//! specification, the queue turns it into a [`Worker`] through its
//! [`WorkerFactory`], and a single drain task runs workers one at a time
//! against properties it owns exclusively.
//!
//! A worker's step is split in two. [`Worker::do_work`] runs synchronously on
//! the actor and may mutate the properties snapshot it is handed; anything that
//! waits (network, timers) goes into an async continuation registered with
//! [`WorkContext::spawn`]. The continuation runs on its own task and its result
//! comes back through the queue's channel, so every state change stays on the
//! actor.

pub mod actor;

pub use actor::{DEFAULT_QUEUE_CAPACITY, QueueOptions, WorkQueue};

use std::future::Future;
use std::pin::Pin;

use crate::error::Error;

/// Deferred part of a work step.
pub type AsyncWork<R> = Pin<Box<dyn Future<Output = anyhow::Result<R>> + Send>>;

/// State owned by a queue.
///
/// Cloned once per step: the worker mutates the copy and the actor keeps it
/// only if the step succeeded.
pub trait QueueProperties: Clone + Send + 'static {
    /// Once true, workers are routed to [`Worker::do_when_stopped`].
    fn is_stopped(&self) -> bool;
}

/// Executable unit derived from a specification.
///
/// `P` is the properties type, `S` the specification type used to post
/// follow-up work, `R` the result type produced by steps and continuations.
pub trait Worker<P, S, R>: Send + 'static {
    /// Short name used in logs, spans and metrics.
    fn name(&self) -> &'static str;

    /// Synchronous step. Must not block; defer waiting to [`WorkContext::spawn`].
    fn do_work(&mut self, properties: P, ctx: &mut WorkContext<S, R>) -> anyhow::Result<P>;

    /// Runs instead of `do_work` when the work cannot run: the queue is
    /// stopped ([`Error::Stopped`]) or a post found no room
    /// ([`Error::QueueFull`]). Usually fails the worker's callback with `error`.
    fn do_when_stopped(&mut self, error: Error) -> anyhow::Result<()>;

    /// Recovery hook for a failed synchronous step (or a failed `do_when_stopped`).
    fn on_unexpected_error(&mut self, error: &anyhow::Error, ctx: &mut WorkContext<S, R>) {
        let _ = (error, ctx);
    }

    /// Recovery hook for a failed async continuation. Runs off the actor, so it
    /// can only ask for follow-up work.
    fn on_unexpected_async_error(&mut self, error: &anyhow::Error) -> Option<S> {
        let _ = error;
        None
    }
}

/// Maps specifications to workers and results to follow-up specifications.
pub trait WorkerFactory: Send + Sync + 'static {
    type Properties: QueueProperties;
    type Specification: Send + 'static;
    type Result: Send + 'static;

    fn create_worker(&self, spec: Self::Specification) -> BoxedWorker<Self>;

    /// Consume a step's result. Returns the next specification for
    /// multi-step operations, `None` when the result was terminal.
    fn handle_result(&self, result: Self::Result) -> Option<Self::Specification>;
}

pub type BoxedWorker<F> = Box<
    dyn Worker<
            <F as WorkerFactory>::Properties,
            <F as WorkerFactory>::Specification,
            <F as WorkerFactory>::Result,
        >,
>;

/// What a synchronous step asks the queue to do next.
pub struct WorkContext<S, R> {
    posted: Vec<S>,
    result: Option<R>,
    async_work: Option<AsyncWork<R>>,
}

impl<S, R> Default for WorkContext<S, R> {
    fn default() -> Self {
        Self {
            posted: Vec::new(),
            result: None,
            async_work: None,
        }
    }
}

impl<S, R> WorkContext<S, R> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue follow-up work on the same queue. Follow-ups run ahead of
    /// anything still waiting in the channel, in the order they were posted.
    pub fn post(&mut self, spec: S) {
        self.posted.push(spec);
    }

    /// Report a result synchronously. It is handled right after the step.
    pub fn complete(&mut self, result: R) {
        self.result = Some(result);
    }

    /// Register the step's async continuation. A step has at most one; a
    /// second call replaces the first.
    pub fn spawn<Fut>(&mut self, work: Fut)
    where
        Fut: Future<Output = anyhow::Result<R>> + Send + 'static,
    {
        if self.async_work.is_some() {
            tracing::warn!("async continuation replaced within one step");
        }
        self.async_work = Some(Box::pin(work));
    }

    pub(crate) fn into_parts(self) -> (Vec<S>, Option<R>, Option<AsyncWork<R>>) {
        (self.posted, self.result, self.async_work)
    }
}
