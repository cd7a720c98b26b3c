//! Unordered mapping of streams through a sliding window of concurrent tasks.

use crate::{flatten, Error, Handle, Spawner};
use futures::{
    future,
    stream::{FusedStream, FuturesUnordered},
    Stream, StreamExt as _, TryStreamExt as _,
};
use std::{
    future::Future,
    num::NonZeroUsize,
    pin::Pin,
    task::{Context, Poll},
};
use tracing::{debug, trace};

/// Stream returned by [`merge_map`].
///
/// Pulls elements from its source only while fewer than `max_workers` transforms are in flight,
/// and yields each result as soon as its transform completes.
///
/// After yielding a failure the stream terminates: in-flight transforms are aborted and the
/// source is dropped without being pulled again. Dropping the stream (or calling
/// [`MergeMap::cancel`]) has the same effect at any time.
#[must_use = "streams do nothing unless polled"]
pub struct MergeMap<S, St, F, R, E>
where
    R: Send + 'static,
    E: Send + 'static,
{
    spawner: S,
    source: Option<Pin<Box<St>>>,
    transform: F,
    in_flight: FuturesUnordered<Handle<Result<R, E>>>,
    max_workers: NonZeroUsize,
    terminated: bool,
}

// The transform is never pinned and the source is boxed
impl<S, St, F, R, E> Unpin for MergeMap<S, St, F, R, E>
where
    R: Send + 'static,
    E: Send + 'static,
{
}

impl<S, St, F, R, E> MergeMap<S, St, F, R, E>
where
    R: Send + 'static,
    E: Send + 'static,
{
    /// Returns the number of transforms currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    /// Stops the stream: aborts every in-flight transform and drops the source.
    ///
    /// Subsequent polls yield `None`.
    pub fn cancel(&mut self) {
        if self.terminated {
            return;
        }
        debug!(aborted = self.in_flight.len(), "cancelling merge");
        self.terminate();
    }

    fn terminate(&mut self) {
        // Dropping a handle aborts its task
        self.in_flight.clear();
        self.source = None;
        self.terminated = true;
    }
}

impl<S, St, F, Fut, R, E> MergeMap<S, St, F, R, E>
where
    S: Spawner,
    St: Stream,
    F: FnMut(St::Item) -> Fut,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    /// Pulls from the source until the window is full, the source is pending, or the source is
    /// exhausted.
    fn fill(&mut self, cx: &mut Context<'_>) {
        while self.in_flight.len() < self.max_workers.get() {
            let Some(source) = self.source.as_mut() else {
                return;
            };
            match source.as_mut().poll_next(cx) {
                Poll::Ready(Some(item)) => {
                    let handle = self.spawner.spawn((self.transform)(item));
                    self.in_flight.push(handle);
                    trace!(in_flight = self.in_flight.len(), "dispatched element");
                }
                Poll::Ready(None) => {
                    debug!(in_flight = self.in_flight.len(), "source exhausted");
                    self.source = None;
                }
                Poll::Pending => return,
            }
        }
    }
}

impl<S, St, F, Fut, R, E> Stream for MergeMap<S, St, F, R, E>
where
    S: Spawner,
    St: Stream,
    F: FnMut(St::Item) -> Fut,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    type Item = Result<R, Error<E>>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.terminated {
            return Poll::Ready(None);
        }

        this.fill(cx);
        match this.in_flight.poll_next_unpin(cx) {
            Poll::Ready(Some(result)) => match flatten(result) {
                Ok(value) => {
                    // Hand the freed slot to the next element before yielding
                    this.fill(cx);
                    Poll::Ready(Some(Ok(value)))
                }
                Err(err) => {
                    debug!(aborted = this.in_flight.len(), "terminating merge after failure");
                    this.terminate();
                    Poll::Ready(Some(Err(err)))
                }
            },
            Poll::Ready(None) if this.source.is_none() => {
                this.terminated = true;
                Poll::Ready(None)
            }
            // Nothing in flight and the source is pending (it registered the waker)
            Poll::Ready(None) => Poll::Pending,
            Poll::Pending => Poll::Pending,
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.terminated {
            return (0, Some(0));
        }
        let (lower, upper) = self
            .source
            .as_ref()
            .map_or((0, Some(0)), |source| source.size_hint());
        let in_flight = self.in_flight.len();

        // Any result may be a failure that ends the stream early
        let lower = if lower.saturating_add(in_flight) > 0 { 1 } else { 0 };
        (lower, upper.and_then(|upper| upper.checked_add(in_flight)))
    }
}

impl<S, St, F, Fut, R, E> FusedStream for MergeMap<S, St, F, R, E>
where
    S: Spawner,
    St: Stream,
    F: FnMut(St::Item) -> Fut,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    fn is_terminated(&self) -> bool {
        self.terminated
    }
}

/// Applies `transform` to every element of `stream`, keeping at most `max_workers` transforms in
/// flight, and yields the results in completion order.
///
/// Unlike [`map`](crate::map), a completed transform immediately frees its slot for the next
/// source element, so one slow element never stalls the others. The source is pulled lazily:
/// no element is taken from it while the window is full.
///
/// The returned stream yields `Ok` for every successful transform and terminates after yielding
/// the first `Err`. It ends once the source is exhausted and every transform has completed.
///
/// # Failures
///
/// Returns [`Error::InvalidConcurrency`] without pulling from `stream` if `max_workers` is `0`.
///
/// # Examples
///
/// ```
/// use foldwork_mapper::{merge_map, Inline};
/// use futures::{executor::block_on, stream, StreamExt};
/// use std::convert::Infallible;
///
/// let merged = merge_map(Inline, stream::iter([1, 2, 3, 4]), 2, |x| async move {
///     Ok::<_, Infallible>(x * 2)
/// })
/// .unwrap();
/// let mut doubled: Vec<i32> = block_on(merged.map(Result::unwrap).collect());
/// doubled.sort();
/// assert_eq!(doubled, vec![2, 4, 6, 8]);
/// ```
pub fn merge_map<S, St, F, Fut, R, E>(
    spawner: S,
    stream: St,
    max_workers: usize,
    transform: F,
) -> Result<MergeMap<S, St, F, R, E>, Error<E>>
where
    S: Spawner,
    St: Stream,
    F: FnMut(St::Item) -> Fut,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    let max_workers = NonZeroUsize::new(max_workers).ok_or(Error::InvalidConcurrency)?;
    Ok(MergeMap {
        spawner,
        source: Some(Box::pin(stream)),
        transform,
        in_flight: FuturesUnordered::new(),
        max_workers,
        terminated: false,
    })
}

/// Yields the elements of `stream` for which `predicate` resolves to `true`, keeping at most
/// `max_workers` predicates in flight, in completion order.
///
/// An element rejected by its predicate frees its slot without yielding anything. A failing
/// predicate is yielded as an `Err` and terminates the stream, as in [`merge_map`].
pub fn merge_filter<S, St, E, P, Fut>(
    spawner: S,
    stream: St,
    max_workers: usize,
    mut predicate: P,
) -> Result<impl FusedStream<Item = Result<St::Item, Error<E>>>, Error<E>>
where
    S: Spawner,
    St: Stream,
    St::Item: Send + 'static,
    P: FnMut(&St::Item) -> Fut,
    Fut: Future<Output = Result<bool, E>> + Send + 'static,
    E: Send + 'static,
{
    let kept = merge_map(spawner, stream, max_workers, move |item| {
        let keep = predicate(&item);
        async move { Ok::<_, E>(keep.await?.then_some(item)) }
    })?;
    Ok(kept.try_filter_map(|item| future::ready(Ok(item))))
}
