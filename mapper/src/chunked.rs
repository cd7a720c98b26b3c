//! Order-preserving mapping of sequences in chunks of concurrent tasks.

use crate::{flatten, Error, Spawner};
use futures::future::try_join_all;
use std::{future::Future, num::NonZeroUsize};
use tracing::{debug, trace};

/// Applies `transform` to every element of `items`, running at most `max_workers` transforms
/// concurrently, and returns the results in input order.
///
/// `items` is consumed in consecutive chunks of `max_workers` elements (the last chunk may be
/// shorter). Every element of a chunk is spawned as its own task, and the whole chunk must
/// complete before the next chunk is dispatched. A slow element therefore stalls the rest of
/// its chunk; with `max_workers == 1`, elements are transformed one at a time, in order.
///
/// # Failures
///
/// Returns [`Error::InvalidConcurrency`] without calling `transform` if `max_workers` is `0`.
///
/// The first failure observed while awaiting a chunk is returned immediately: the chunk's
/// remaining tasks are aborted, results already computed are discarded, and later chunks are
/// never dispatched.
///
/// # Examples
///
/// ```
/// use foldwork_mapper::{map, Inline};
///
/// let result = futures::executor::block_on(map(&Inline, [1, 2, 3, 4], 2, |x| async move {
///     if x == 3 {
///         return Err("three");
///     }
///     Ok(x * 2)
/// }));
/// assert!(matches!(result, Err(foldwork_mapper::Error::Operation("three"))));
/// ```
pub async fn map<S, I, T, R, E, F, Fut>(
    spawner: &S,
    items: I,
    max_workers: usize,
    mut transform: F,
) -> Result<Vec<R>, Error<E>>
where
    S: Spawner,
    I: IntoIterator<Item = T>,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    let max_workers = NonZeroUsize::new(max_workers).ok_or(Error::InvalidConcurrency)?;
    let mut items = items.into_iter();
    let mut output = Vec::with_capacity(items.size_hint().0);
    for chunk in 0u64.. {
        let handles: Vec<_> = items
            .by_ref()
            .take(max_workers.get())
            .map(|item| spawner.spawn(transform(item)))
            .collect();
        if handles.is_empty() {
            break;
        }
        trace!(chunk, size = handles.len(), "dispatched chunk");

        // Each task owns one slot of the chunk's output; dropping the remaining handles on the
        // first failure aborts them
        let chunk_results = handles
            .into_iter()
            .map(|handle| async move { flatten(handle.await) });
        match try_join_all(chunk_results).await {
            Ok(results) => output.extend(results),
            Err(err) => {
                debug!(chunk, completed = output.len(), "aborting map after failure");
                return Err(err);
            }
        }
    }
    Ok(output)
}

/// Keeps the elements of `items` for which `predicate` resolves to `true`, evaluating at most
/// `max_workers` predicates concurrently, and returns them in input order.
///
/// Built on [`map`], so chunking and failure handling are identical.
pub async fn filter<S, I, T, E, P, Fut>(
    spawner: &S,
    items: I,
    max_workers: usize,
    mut predicate: P,
) -> Result<Vec<T>, Error<E>>
where
    S: Spawner,
    I: IntoIterator<Item = T>,
    T: Send + 'static,
    P: FnMut(&T) -> Fut,
    Fut: Future<Output = Result<bool, E>> + Send + 'static,
    E: Send + 'static,
{
    let kept = map(spawner, items, max_workers, |item| {
        let keep = predicate(&item);
        async move { Ok::<_, E>(keep.await?.then_some(item)) }
    })
    .await?;
    Ok(kept.into_iter().flatten().collect())
}

/// Applies `transform` to every element of `items`, spawning one task per element with no cap
/// on concurrency, and returns the results in input order.
///
/// Fails as soon as any transform fails, aborting all other tasks.
pub async fn map_all<S, I, T, R, E, F, Fut>(
    spawner: &S,
    items: I,
    transform: F,
) -> Result<Vec<R>, Error<E>>
where
    S: Spawner,
    I: IntoIterator<Item = T>,
    F: FnMut(T) -> Fut,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: Send + 'static,
    E: Send + 'static,
{
    map(spawner, items, usize::MAX, transform).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{reschedule, traced, Inline, TaskError, Tokio};
    use futures::executor::block_on;
    use proptest::prelude::*;
    use rand::Rng;
    use std::{
        convert::Infallible,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc, Mutex,
        },
        time::Duration,
    };
    use test_case::test_case;
    use tokio::runtime::{Builder, Runtime};

    fn multi_thread() -> Runtime {
        Builder::new_multi_thread()
            .worker_threads(4)
            .enable_time()
            .build()
            .unwrap()
    }

    /// Tracks the number of tasks running at once.
    #[derive(Clone, Default)]
    struct Gauge {
        running: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl Gauge {
        fn enter(&self) {
            let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(running, Ordering::SeqCst);
        }

        fn exit(&self) {
            self.running.fetch_sub(1, Ordering::SeqCst);
        }

        fn peak(&self) -> usize {
            self.peak.load(Ordering::SeqCst)
        }
    }

    #[test]
    fn map_doubles() {
        let runtime = multi_thread();
        let spawner = Tokio::new(runtime.handle().clone());
        let result = runtime.block_on(map(&spawner, [1, 2, 3], 1000, |x| async move {
            Ok::<_, Infallible>(x * 2)
        }));
        assert_eq!(result.unwrap(), vec![2, 4, 6]);
    }

    #[test]
    fn filter_odd() {
        let runtime = multi_thread();
        let spawner = Tokio::new(runtime.handle().clone());
        let result = runtime.block_on(filter(&spawner, [1, 2, 3], 1000, |x| {
            let odd = x % 2 != 0;
            async move { Ok::<_, Infallible>(odd) }
        }));
        assert_eq!(result.unwrap(), vec![1, 3]);
    }

    #[test]
    fn map_empty() {
        let result = block_on(map(&Inline, Vec::<u32>::new(), 4, |x| async move {
            Ok::<_, Infallible>(x)
        }));
        assert!(result.unwrap().is_empty());
    }

    #[test]
    fn zero_workers_fails_before_work() {
        let calls = AtomicUsize::new(0);
        let result = block_on(map(&Inline, [1, 2, 3], 0, |x| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, Infallible>(x) }
        }));
        assert!(matches!(result, Err(Error::InvalidConcurrency)));
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        let result = block_on(filter(&Inline, [1, 2, 3], 0, |_| async {
            Ok::<_, Infallible>(true)
        }));
        assert!(matches!(result, Err(Error::InvalidConcurrency)));
    }

    #[test_case(1; "sequential")]
    #[test_case(3; "uneven chunks")]
    #[test_case(4; "even chunks")]
    #[test_case(64; "single chunk")]
    fn concurrency_is_bounded(max_workers: usize) {
        traced();
        let runtime = multi_thread();
        let spawner = Tokio::new(runtime.handle().clone());
        let gauge = Gauge::default();

        let result = runtime.block_on(map(&spawner, 0..16u64, max_workers, |x| {
            let gauge = gauge.clone();
            async move {
                gauge.enter();
                tokio::time::sleep(Duration::from_millis(5)).await;
                gauge.exit();
                Ok::<_, Infallible>(x)
            }
        }));

        assert_eq!(result.unwrap(), (0..16).collect::<Vec<_>>());
        assert!(gauge.peak() <= max_workers);
        assert!(gauge.peak() >= 1);
    }

    #[test]
    fn chunks_are_barriers() {
        // Record the order in which tasks start; no task of chunk n+1 may start before every
        // task of chunk n has finished.
        let runtime = multi_thread();
        let spawner = Tokio::new(runtime.handle().clone());
        let events = Arc::new(Mutex::new(Vec::new()));

        runtime
            .block_on(map(&spawner, 0..9u64, 3, |x| {
                let events = events.clone();
                async move {
                    events.lock().unwrap().push(("start", x));
                    // The first element of each chunk is slow
                    let delay = if x % 3 == 0 { 30 } else { 1 };
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    events.lock().unwrap().push(("end", x));
                    Ok::<_, Infallible>(x)
                }
            }))
            .unwrap();

        let events = events.lock().unwrap();
        for (i, (kind, x)) in events.iter().enumerate() {
            if *kind != "start" {
                continue;
            }
            let chunk = x / 3;
            for previous in 0..chunk * 3 {
                let ended = events[..i].contains(&("end", previous));
                assert!(ended, "{x} started before {previous} ended");
            }
        }
    }

    #[test]
    fn first_failure_stops_later_chunks() {
        traced();
        let runtime = multi_thread();
        let spawner = Tokio::new(runtime.handle().clone());
        let started = Arc::new(AtomicUsize::new(0));

        let result = runtime.block_on(map(&spawner, 0..20u32, 4, |x| {
            started.fetch_add(1, Ordering::SeqCst);
            async move {
                if x == 5 {
                    return Err(format!("failed on {x}"));
                }
                Ok(x)
            }
        }));

        match result {
            Err(Error::Operation(err)) => assert_eq!(err, "failed on 5"),
            other => panic!("unexpected result: {other:?}"),
        }
        // Chunks [0..4) and [4..8) were dispatched; nothing after
        assert_eq!(started.load(Ordering::SeqCst), 8);
    }

    #[test]
    fn failure_aborts_slow_siblings() {
        let runtime = multi_thread();
        let spawner = Tokio::new(runtime.handle().clone());
        let finished = Arc::new(AtomicUsize::new(0));

        let result = runtime.block_on(async {
            let result = map(&spawner, 0..4u32, 4, |x| {
                let finished = finished.clone();
                async move {
                    if x == 0 {
                        return Err("fast failure");
                    }
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok(x)
                }
            })
            .await;

            // Give aborted siblings time to (not) complete
            tokio::time::sleep(Duration::from_millis(400)).await;
            result
        });

        assert!(matches!(result, Err(Error::Operation("fast failure"))));
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn cancelled_map_aborts_running_tasks() {
        let runtime = multi_thread();
        let spawner = Tokio::new(runtime.handle().clone());
        let started = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(AtomicUsize::new(0));

        let timed_out = runtime.block_on(async {
            let operation = map(&spawner, 0..8u32, 4, |x| {
                let started = started.clone();
                let finished = finished.clone();
                async move {
                    started.fetch_add(1, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    finished.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, Infallible>(x)
                }
            });

            // Dropping the operation mid-chunk must abort every task of the chunk
            let result = tokio::time::timeout(Duration::from_millis(50), operation).await;
            tokio::time::sleep(Duration::from_millis(400)).await;
            result.is_err()
        });

        assert!(timed_out);
        assert_eq!(started.load(Ordering::SeqCst), 4);
        assert_eq!(finished.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn panic_is_task_failure() {
        let runtime = multi_thread();
        let spawner = Tokio::new(runtime.handle().clone());
        let result = runtime.block_on(map(&spawner, [1, 2, 3], 3, |x| async move {
            if x == 2 {
                panic!("transform panicked");
            }
            Ok::<_, Infallible>(x)
        }));
        assert!(matches!(result, Err(Error::Task(TaskError::Exited))));
    }

    #[test]
    fn inline_interleaves_within_chunk() {
        // With the inline spawner, the tasks of a chunk are polled cooperatively by the caller.
        let events = Arc::new(Mutex::new(Vec::new()));
        let result = block_on(map(&Inline, 0..4u32, 2, |x| {
            let events = events.clone();
            async move {
                events.lock().unwrap().push(("start", x));
                reschedule().await;
                events.lock().unwrap().push(("end", x));
                Ok::<_, Infallible>(x * 10)
            }
        }));

        assert_eq!(result.unwrap(), vec![0, 10, 20, 30]);
        assert_eq!(
            *events.lock().unwrap(),
            vec![
                ("start", 0),
                ("start", 1),
                ("end", 0),
                ("end", 1),
                ("start", 2),
                ("start", 3),
                ("end", 2),
                ("end", 3),
            ]
        );
    }

    #[test]
    fn map_all_is_unbounded() {
        let runtime = multi_thread();
        let spawner = Tokio::new(runtime.handle().clone());
        let gauge = Gauge::default();

        let result = runtime.block_on(map_all(&spawner, 0..32u32, |x| {
            let gauge = gauge.clone();
            async move {
                gauge.enter();
                tokio::time::sleep(Duration::from_millis(50)).await;
                gauge.exit();
                Ok::<_, Infallible>(x + 1)
            }
        }));

        assert_eq!(result.unwrap(), (1..=32).collect::<Vec<_>>());
        assert!(gauge.peak() > 4);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn order_is_preserved_under_random_delays(
            data in prop::collection::vec(any::<i32>(), 0..64),
            max_workers in 1usize..12,
        ) {
            let runtime = multi_thread();
            let spawner = Tokio::new(runtime.handle().clone());

            let result = runtime.block_on(map(&spawner, data.clone(), max_workers, |x| {
                let delay = rand::thread_rng().gen_range(0..3);
                async move {
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                    Ok::<_, Infallible>(x.wrapping_mul(3))
                }
            })).unwrap();

            let expected: Vec<i32> = data.iter().map(|x| x.wrapping_mul(3)).collect();
            prop_assert_eq!(result, expected);
        }
    }
}
