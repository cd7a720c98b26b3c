//! Map sequences and streams with a bounded number of concurrent tasks.
//!
//! # Overview
//!
//! Every operation applies a (possibly failing, possibly suspending) transform or predicate to
//! each element of its input, running the invocations as tasks created by a [`Spawner`]. The
//! caller bounds how many of those tasks may be in flight at once with `max_workers`.
//!
//! **Sequences** ([`map`], [`filter`], [`map_all`]):
//! - Output order always matches input order
//! - Elements are dispatched in chunks of `max_workers`; a chunk must complete before the next
//!   one starts
//!
//! **Streams** ([`merge_map`], [`merge_filter`]):
//! - At most `max_workers` tasks are in flight; a completed task immediately frees its slot for
//!   the next source element
//! - Results are emitted in completion order, not input order
//!
//! **Running folds** ([`running`]): strictly sequential prefix reductions over streams.
//!
//! # Chunks vs Sliding Windows
//!
//! The sequence mappers wait for a whole chunk before dispatching the next one, so a single
//! slow element stalls its chunk. This keeps output order trivial to preserve (each task owns
//! one slot of the chunk's output) at the cost of throughput. The stream mappers use a sliding
//! window instead and, in exchange, give up ordering.
//!
//! # Spawners
//!
//! - [`Tokio`]: Spawns tasks onto a tokio runtime. On a multi-threaded runtime tasks run in
//!   parallel; on a current-thread runtime they are interleaved on one thread, which preserves
//!   every contract (including unordered emission) but yields no speed-up.
//! - [`Inline`]: Does not spawn at all; tasks are polled by whoever awaits their [`Handle`].
//!
//! # Failures
//!
//! The first failing transform aborts the whole operation: sibling tasks still running are
//! aborted, results already computed are discarded, and no new task is started. Nothing is
//! retried.
//!
//! # Example
//!
//! ```
//! use foldwork_mapper::{map, Inline};
//! use std::convert::Infallible;
//!
//! let doubled = futures::executor::block_on(map(&Inline, [1, 2, 3], 1000, |x| async move {
//!     Ok::<_, Infallible>(x * 2)
//! }));
//! assert_eq!(doubled.unwrap(), vec![2, 4, 6]);
//! ```

use std::{future::Future, num::NonZeroUsize, thread};
use thiserror::Error;

mod chunked;
pub use chunked::{filter, map, map_all};
mod handle;
pub use handle::Handle;
mod merge;
pub use merge::{merge_filter, merge_map, MergeMap};
pub mod running;
mod spawner;
pub use spawner::{Inline, Tokio};

/// Errors that can occur when running a mapping operation.
#[derive(Error, Debug)]
pub enum Error<E> {
    #[error("max_workers must be at least 1")]
    InvalidConcurrency,
    #[error("operation failed: {0}")]
    Operation(E),
    #[error("task failed: {0}")]
    Task(#[from] TaskError),
}

/// Errors that can occur when awaiting a [`Handle`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskError {
    #[error("exited")]
    Exited,
    #[error("aborted")]
    Aborted,
}

/// Converts the outcome of a transform task into the outcome of an operation.
fn flatten<R, E>(result: Result<Result<R, E>, TaskError>) -> Result<R, Error<E>> {
    match result {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(Error::Operation(err)),
        Err(err) => Err(Error::Task(err)),
    }
}

/// Interface that any task scheduler must implement to run transforms.
pub trait Spawner: Clone + Send + Sync + 'static {
    /// Starts running `future` as a new task and returns a [`Handle`] to its output.
    ///
    /// Dropping the [`Handle`] aborts the task.
    fn spawn<F, T>(&self, future: F) -> Handle<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static;
}

/// Configuration for a [`Mapper`].
#[derive(Clone, Debug)]
pub struct Config {
    /// Maximum number of transform tasks in flight at once.
    pub max_workers: NonZeroUsize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_workers: thread::available_parallelism().unwrap_or(NonZeroUsize::MIN),
        }
    }
}

/// Bundles a [`Spawner`] with a concurrency budget.
#[derive(Clone, Debug)]
pub struct Mapper<S: Spawner> {
    spawner: S,
    max_workers: NonZeroUsize,
}

impl<S: Spawner> Mapper<S> {
    /// Creates a new [`Mapper`] that spawns tasks with `spawner`.
    pub fn new(spawner: S, cfg: Config) -> Self {
        Self {
            spawner,
            max_workers: cfg.max_workers,
        }
    }

    /// Returns the configured concurrency budget.
    pub fn max_workers(&self) -> NonZeroUsize {
        self.max_workers
    }

    /// See [`map`].
    pub async fn map<I, T, R, E, F, Fut>(&self, items: I, transform: F) -> Result<Vec<R>, Error<E>>
    where
        I: IntoIterator<Item = T>,
        F: FnMut(T) -> Fut,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        R: Send + 'static,
        E: Send + 'static,
    {
        map(&self.spawner, items, self.max_workers.get(), transform).await
    }

    /// See [`filter`].
    pub async fn filter<I, T, E, P, Fut>(&self, items: I, predicate: P) -> Result<Vec<T>, Error<E>>
    where
        I: IntoIterator<Item = T>,
        T: Send + 'static,
        P: FnMut(&T) -> Fut,
        Fut: Future<Output = Result<bool, E>> + Send + 'static,
        E: Send + 'static,
    {
        filter(&self.spawner, items, self.max_workers.get(), predicate).await
    }

    /// See [`merge_map`].
    pub fn merge_map<St, R, E, F, Fut>(
        &self,
        stream: St,
        transform: F,
    ) -> Result<MergeMap<S, St, F, R, E>, Error<E>>
    where
        St: futures::Stream,
        F: FnMut(St::Item) -> Fut,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        R: Send + 'static,
        E: Send + 'static,
    {
        merge_map(self.spawner.clone(), stream, self.max_workers.get(), transform)
    }

    /// See [`merge_filter`].
    pub fn merge_filter<St, E, P, Fut>(
        &self,
        stream: St,
        predicate: P,
    ) -> Result<impl futures::stream::FusedStream<Item = Result<St::Item, Error<E>>>, Error<E>>
    where
        St: futures::Stream,
        St::Item: Send + 'static,
        P: FnMut(&St::Item) -> Fut,
        Fut: Future<Output = Result<bool, E>> + Send + 'static,
        E: Send + 'static,
    {
        merge_filter(self.spawner.clone(), stream, self.max_workers.get(), predicate)
    }
}

/// Yields once to the scheduler, so tests can interleave tasks deterministically.
#[cfg(test)]
pub(crate) async fn reschedule() {
    use std::{
        pin::Pin,
        task::{Context, Poll},
    };

    struct Reschedule {
        yielded: bool,
    }

    impl Future for Reschedule {
        type Output = ();

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
            if self.yielded {
                Poll::Ready(())
            } else {
                self.yielded = true;
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        }
    }

    Reschedule { yielded: false }.await
}

#[cfg(test)]
pub(crate) fn traced() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}
