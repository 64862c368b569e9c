//! The drain loop that owns a queue's properties.

use opentelemetry::KeyValue;
use std::any::Any;
use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc::{self, error::SendError, error::TrySendError};
use tracing::{Instrument, debug, error, info, warn};
use uuid::Uuid;

use super::{AsyncWork, BoxedWorker, QueueProperties, WorkContext, WorkerFactory};
use crate::error::Error;
use crate::telemetry::metrics;
use crate::telemetry::work::start_work_span;

/// Channel capacity used when none is configured.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

#[derive(Debug, Clone)]
pub struct QueueOptions {
    /// Bound on queued items. Enqueuers wait once it is reached.
    pub capacity: usize,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

enum Envelope<F: WorkerFactory> {
    Work(BoxedWorker<F>),
    /// Result of an async continuation, coming back to the actor.
    Result {
        source: &'static str,
        result: F::Result,
    },
}

/// Handle to a running queue. Cloning is cheap; every clone feeds the same actor.
pub struct WorkQueue<F: WorkerFactory> {
    id: Uuid,
    sender: mpsc::Sender<Envelope<F>>,
    factory: Arc<F>,
    /// Posts parked in background sends; never more than the capacity.
    overflow: Arc<AtomicUsize>,
    capacity: usize,
}

impl<F: WorkerFactory> Clone for WorkQueue<F> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            sender: self.sender.clone(),
            factory: Arc::clone(&self.factory),
            overflow: Arc::clone(&self.overflow),
            capacity: self.capacity,
        }
    }
}

impl<F: WorkerFactory> WorkQueue<F> {
    /// Start the actor on the current tokio runtime.
    ///
    /// The actor runs until every handle (and every in-flight continuation)
    /// has been dropped and the channel is drained.
    pub fn spawn(properties: F::Properties, factory: F, options: QueueOptions) -> Self {
        let capacity = options.capacity.max(1);
        let (sender, receiver) = mpsc::channel(capacity);
        let factory = Arc::new(factory);
        let id = Uuid::new_v4();

        let actor = Actor {
            id,
            properties,
            factory: Arc::clone(&factory),
            receiver,
            sender: sender.downgrade(),
            follow_ups: VecDeque::new(),
        };
        tokio::spawn(
            actor
                .run()
                .instrument(tracing::info_span!("work_queue", "queue.id" = %id)),
        );

        Self {
            id,
            sender,
            factory,
            overflow: Arc::new(AtomicUsize::new(0)),
            capacity,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Hand a specification to the queue, waiting while the channel is full.
    ///
    /// If the actor is gone the work item's stopped path runs right away.
    pub async fn enqueue(&self, spec: F::Specification) {
        let worker = self.factory.create_worker(spec);
        metrics::work_enqueued().add(1, &[KeyValue::new("work", worker.name())]);
        if let Err(SendError(envelope)) = self.sender.send(Envelope::Work(worker)).await {
            reject(envelope, Error::Stopped);
        }
    }

    /// Hand a specification to the queue from synchronous code, such as a
    /// transport listener.
    ///
    /// A full channel blocks the caller. Off a runtime, or on a multi-threaded
    /// runtime, the thread waits for room. A current-thread runtime cannot
    /// block without stalling the actor, so there the send is parked on a
    /// background task; at most `capacity` posts are parked at once and any
    /// beyond that fail with [`Error::QueueFull`]. Parked posts may land after
    /// work handed in later.
    ///
    /// Not for use inside a work step; use [`WorkContext::post`] there.
    ///
    /// [`WorkContext::post`]: super::WorkContext::post
    pub fn post(&self, spec: F::Specification) {
        let worker = self.factory.create_worker(spec);
        metrics::work_enqueued().add(1, &[KeyValue::new("work", worker.name())]);
        let envelope = match self.sender.try_send(Envelope::Work(worker)) {
            Ok(()) => return,
            Err(TrySendError::Closed(envelope)) => return reject(envelope, Error::Stopped),
            Err(TrySendError::Full(envelope)) => envelope,
        };

        let Ok(handle) = Handle::try_current() else {
            if let Err(SendError(envelope)) = self.sender.blocking_send(envelope) {
                reject(envelope, Error::Stopped);
            }
            return;
        };

        match handle.runtime_flavor() {
            RuntimeFlavor::CurrentThread => self.park(&handle, envelope),
            _ => {
                let sender = self.sender.clone();
                let sent = tokio::task::block_in_place(|| handle.block_on(sender.send(envelope)));
                if let Err(SendError(envelope)) = sent {
                    reject(envelope, Error::Stopped);
                }
            }
        }
    }

    fn park(&self, handle: &Handle, envelope: Envelope<F>) {
        if self.overflow.fetch_add(1, Ordering::SeqCst) >= self.capacity {
            self.overflow.fetch_sub(1, Ordering::SeqCst);
            warn!("work queue full, rejecting posted work");
            reject(envelope, Error::QueueFull);
            return;
        }
        let sender = self.sender.clone();
        let overflow = Arc::clone(&self.overflow);
        handle.spawn(async move {
            if let Err(SendError(envelope)) = sender.send(envelope).await {
                reject(envelope, Error::Stopped);
            }
            overflow.fetch_sub(1, Ordering::SeqCst);
        });
    }
}

/// The work cannot be queued: answer it through its stopped path.
fn reject<F: WorkerFactory>(envelope: Envelope<F>, reason: Error) {
    match envelope {
        Envelope::Work(mut worker) => {
            let name = worker.name();
            metrics::work_stopped().add(1, &[KeyValue::new("work", name)]);
            if let Err(error) = worker.do_when_stopped(reason) {
                error!(work = name, error = %format!("{error:#}"), "stopped handler failed on rejected work");
            }
        }
        Envelope::Result { source, .. } => {
            warn!(work = source, "work queue closed, dropping async result");
        }
    }
}

struct Actor<F: WorkerFactory> {
    id: Uuid,
    properties: F::Properties,
    factory: Arc<F>,
    receiver: mpsc::Receiver<Envelope<F>>,
    /// Weak, so the actor alone does not keep its own channel open.
    sender: mpsc::WeakSender<Envelope<F>>,
    /// Work posted by steps and result handlers. Drained before the channel,
    /// so the actor never waits on its own backpressure.
    follow_ups: VecDeque<BoxedWorker<F>>,
}

impl<F: WorkerFactory> Actor<F> {
    async fn run(mut self) {
        info!("work queue started");

        loop {
            let envelope = match self.follow_ups.pop_front() {
                Some(worker) => Envelope::Work(worker),
                None => match self.receiver.recv().await {
                    Some(envelope) => envelope,
                    None => break,
                },
            };
            match envelope {
                Envelope::Work(worker) => self.execute(worker),
                Envelope::Result { source, result } => {
                    let span = start_work_span(source, &self.id);
                    let _entered = span.enter();
                    debug!("handling async result");
                    self.handle_result(result);
                }
            }
        }

        info!("work queue closed");
    }

    fn execute(&mut self, mut worker: BoxedWorker<F>) {
        let name = worker.name();
        let span = start_work_span(name, &self.id);
        let _entered = span.enter();

        if self.properties.is_stopped() {
            metrics::work_stopped().add(1, &[KeyValue::new("work", name)]);
            let outcome = catch_unwind(AssertUnwindSafe(|| worker.do_when_stopped(Error::Stopped)))
                .unwrap_or_else(|panic| Err(panic_error(panic)));
            if let Err(error) = outcome {
                self.on_unexpected_error(worker, error);
            }
            return;
        }

        let mut ctx = WorkContext::new();
        let snapshot = self.properties.clone();
        let outcome = catch_unwind(AssertUnwindSafe(|| worker.do_work(snapshot, &mut ctx)))
            .unwrap_or_else(|panic| Err(panic_error(panic)));

        match outcome {
            Ok(properties) => {
                self.properties = properties;
                metrics::work_executed().add(
                    1,
                    &[KeyValue::new("work", name), KeyValue::new("result", "ok")],
                );
                self.dispatch(worker, ctx);
            }
            // The failed step's snapshot and context are discarded.
            Err(error) => self.on_unexpected_error(worker, error),
        }
    }

    fn on_unexpected_error(&mut self, mut worker: BoxedWorker<F>, error: anyhow::Error) {
        let name = worker.name();
        error!(work = name, error = %format!("{error:#}"), "unexpected error in synchronous work");
        metrics::work_executed().add(
            1,
            &[KeyValue::new("work", name), KeyValue::new("result", "error")],
        );
        metrics::unexpected_errors().add(
            1,
            &[KeyValue::new("work", name), KeyValue::new("phase", "sync")],
        );

        let mut ctx = WorkContext::new();
        let recovered = catch_unwind(AssertUnwindSafe(|| worker.on_unexpected_error(&error, &mut ctx)));
        if recovered.is_err() {
            error!(work = name, "unexpected error handler panicked");
            return;
        }
        self.dispatch(worker, ctx);
    }

    fn dispatch(&mut self, worker: BoxedWorker<F>, ctx: WorkContext<F::Specification, F::Result>) {
        let (posted, result, async_work) = ctx.into_parts();
        for spec in posted {
            self.post(spec);
        }
        if let Some(result) = result {
            self.handle_result(result);
        }
        if let Some(work) = async_work {
            self.spawn_async(worker, work);
        }
    }

    fn handle_result(&mut self, result: F::Result) {
        if let Some(spec) = self.factory.handle_result(result) {
            self.post(spec);
        }
    }

    fn post(&mut self, spec: F::Specification) {
        let worker = self.factory.create_worker(spec);
        metrics::work_enqueued().add(1, &[KeyValue::new("work", worker.name())]);
        self.follow_ups.push_back(worker);
    }

    fn spawn_async(&self, mut worker: BoxedWorker<F>, work: AsyncWork<F::Result>) {
        let name = worker.name();
        let Some(sender) = self.sender.upgrade() else {
            warn!(work = name, "no handle left to receive async result");
            reject::<F>(Envelope::Work(worker), Error::Stopped);
            return;
        };
        let factory = Arc::clone(&self.factory);
        let span = tracing::Span::current();

        tokio::spawn(
            async move {
                let started = Instant::now();
                // Spawned separately so a panic surfaces as a JoinError.
                let outcome = match tokio::spawn(work.in_current_span()).await {
                    Ok(outcome) => outcome,
                    Err(join_error) => Err(anyhow::anyhow!("async work aborted: {join_error}")),
                };
                metrics::async_duration_ms().record(
                    started.elapsed().as_secs_f64() * 1000.0,
                    &[KeyValue::new("work", name)],
                );

                let envelope = match outcome {
                    Ok(result) => Envelope::Result {
                        source: name,
                        result,
                    },
                    Err(error) => {
                        error!(work = name, error = %format!("{error:#}"), "unexpected error in async work");
                        metrics::unexpected_errors().add(
                            1,
                            &[KeyValue::new("work", name), KeyValue::new("phase", "async")],
                        );
                        match worker.on_unexpected_async_error(&error) {
                            Some(spec) => Envelope::Work(factory.create_worker(spec)),
                            None => return,
                        }
                    }
                };

                if let Err(SendError(envelope)) = sender.send(envelope).await {
                    reject(envelope, Error::Stopped);
                }
            }
            .instrument(span),
        );
    }
}

fn panic_error(panic: Box<dyn Any + Send>) -> anyhow::Error {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string());
    anyhow::anyhow!("panicked: {message}")
}
