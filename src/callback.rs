//! Result callbacks.
//!
//! Every public operation reports its outcome through a [`ResultCallback`].
//! Callbacks are cheap to clone so they can sit inside specifications and
//! guard maps that are copied with the actor's properties. Delivering the
//! outcome exactly once is the job of the work item holding the callback.

use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

use crate::error::{Error, Result};

pub struct ResultCallback<T> {
    inner: Arc<dyn Fn(Result<T>) + Send + Sync>,
}

impl<T> ResultCallback<T> {
    pub fn new(f: impl Fn(Result<T>) + Send + Sync + 'static) -> Self {
        Self { inner: Arc::new(f) }
    }

    /// A callback that ignores its result.
    pub fn noop() -> Self
    where
        T: 'static,
    {
        Self::new(|_| {})
    }

    pub fn call(&self, result: Result<T>) {
        (self.inner)(result)
    }

    pub fn success(&self, value: T) {
        self.call(Ok(value))
    }

    pub fn failure(&self, error: Error) {
        self.call(Err(error))
    }
}

impl<T: Send + 'static> ResultCallback<T> {
    /// A callback backed by a oneshot channel, for async callers.
    ///
    /// Only the first delivered result reaches the receiver.
    pub fn oneshot() -> (Self, oneshot::Receiver<Result<T>>) {
        let (tx, rx) = oneshot::channel();
        let slot = Mutex::new(Some(tx));
        let callback = Self::new(move |result| {
            let sender = slot.lock().ok().and_then(|mut slot| slot.take());
            if let Some(sender) = sender {
                let _ = sender.send(result);
            }
        });
        (callback, rx)
    }
}

impl<T> Clone for ResultCallback<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for ResultCallback<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ResultCallback")
    }
}

/// Await a oneshot-backed callback.
///
/// A dropped sender means the work item was dropped without reporting, which
/// only happens once the queue is gone.
pub async fn wait<T>(receiver: oneshot::Receiver<Result<T>>) -> Result<T> {
    receiver.await.unwrap_or(Err(Error::Stopped))
}
