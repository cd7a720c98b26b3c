use crate::{Handle, Spawner};
use std::future::Future;
use tokio::runtime;
use tracing::trace;

/// Implementation of [`Spawner`] for the [tokio] runtime.
///
/// On a multi-threaded runtime, spawned tasks run in parallel on the runtime's worker threads.
/// On a current-thread runtime, they are interleaved on the thread driving the runtime.
#[derive(Clone, Debug)]
pub struct Tokio {
    runtime: runtime::Handle,
}

impl Tokio {
    /// Creates a [`Spawner`] that spawns tasks onto `runtime`.
    pub fn new(runtime: runtime::Handle) -> Self {
        Self { runtime }
    }

    /// Creates a [`Spawner`] that spawns tasks onto the runtime of the current context.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a tokio runtime.
    pub fn current() -> Self {
        Self::new(runtime::Handle::current())
    }
}

impl From<runtime::Handle> for Tokio {
    fn from(runtime: runtime::Handle) -> Self {
        Self::new(runtime)
    }
}

impl Spawner for Tokio {
    fn spawn<F, T>(&self, future: F) -> Handle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (task, handle) = Handle::init_future(future);

        // The join handle is not needed: the output is delivered to the handle
        self.runtime.spawn(task);
        trace!("spawned task");
        handle
    }
}

/// Implementation of [`Spawner`] that never leaves the caller's task.
///
/// Each "spawned" future is polled only when its [`Handle`] is polled, so concurrency comes
/// solely from the caller awaiting several handles at once (cooperative scheduling on a single
/// thread).
#[derive(Clone, Copy, Debug, Default)]
pub struct Inline;

impl Spawner for Inline {
    fn spawn<F, T>(&self, future: F) -> Handle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        Handle::init_inline(future)
    }
}
