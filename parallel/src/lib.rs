//! Reduce sequences with associative operators, sequentially or in parallel.
//!
//! This crate provides the [`Strategy`] trait, which abstracts over sequential and parallel
//! execution of divide-and-conquer reductions. A reduction is written once and executed
//! either sequentially or in parallel depending on the chosen strategy.
//!
//! # Overview
//!
//! **Core Operations:**
//! - [`reduce`](Strategy::reduce): Combines a sequence with an associative operator by
//!   splitting it in the middle, reducing both halves and combining the two results
//! - [`try_reduce`](Strategy::try_reduce): Like `reduce`, but with a fallible operator
//!
//! **Sequential Engines:**
//! - [`balanced_reduce`] / [`try_balanced_reduce`]: Balanced reduction on the current thread
//! - [`eager_reduce`] / [`try_eager_reduce`]: Iterative pairwise passes
//! - [`running`]: Prefix reductions (running totals, averages and deltas)
//! - [`monoid`]: Product and map-merging combine operations
//!
//! Two strategies are provided:
//!
//! - [`Sequential`]: Reduces both halves of every split on the current thread (works in `no_std`)
//! - [`Parallel`]: Reduces both halves of every split concurrently on a rayon thread pool
//!   (requires `std`)
//!
//! # No Result
//!
//! Balanced and eager reduction do not accept an identity value. An empty sequence yields
//! `None` and callers that want fold-with-seed semantics fall back explicitly:
//!
//! ```
//! use foldwork_parallel::balanced_reduce;
//!
//! let empty: Vec<String> = vec![];
//! let joined = balanced_reduce(empty, |a, b| a + &b).unwrap_or_default();
//! assert_eq!(joined, "");
//! ```
//!
//! # Why Balanced
//!
//! All reductions in this crate return the same value as a left fold whenever the combine
//! operation is associative. They exist because a fold is inefficient when the cost of
//! `combine` scales with the size of its operands (e.g. concatenation): pairing keeps operand
//! sizes balanced.
//!
//! # Features
//!
//! - `std` (default): Enables the [`Parallel`] strategy backed by rayon
//!
//! # Example
//!
//! ```
//! use foldwork_parallel::{Sequential, Strategy};
//!
//! fn concat<S: Strategy>(strategy: &S, parts: &[&str]) -> Option<String> {
//!     strategy.reduce(parts.iter().map(|s| s.to_string()), |a, b| a + &b)
//! }
//!
//! let parts = ["abc", "def", "ghi", "jkl", "mno"];
//! assert_eq!(concat(&Sequential, &parts).as_deref(), Some("abcdefghijklmno"));
//! ```

#![cfg_attr(not(any(test, feature = "std")), no_std)]

extern crate alloc;

use alloc::vec::Vec;
use cfg_if::cfg_if;
use core::{convert::Infallible, fmt, sync::atomic::AtomicBool};

pub mod monoid;
mod reduce;
pub mod running;

pub use reduce::{balanced_reduce, eager_reduce, try_balanced_reduce, try_eager_reduce};
use reduce::{split, Abort};

cfg_if! {
    if #[cfg(feature = "std")] {
        use rayon::{ThreadPool, ThreadPoolBuildError, ThreadPoolBuilder};
        use std::{num::NonZeroUsize, sync::Arc, thread};
        use thiserror::Error;
        use tracing::debug;
    }
}

/// A strategy for executing divide-and-conquer reductions.
///
/// Implementations only decide how the two halves of a split are executed; the splitting
/// policy, the order in which results are combined and the handling of failures are shared
/// by all strategies. For any pure associative `combine`, every strategy returns the same
/// value.
pub trait Strategy: Clone + Send + Sync + fmt::Debug + 'static {
    /// Runs `left` and `right` and returns both results once both have completed.
    ///
    /// Implementations must not return before both closures have finished (or panicked).
    fn join<A, B, RA, RB>(&self, left: A, right: B) -> (RA, RB)
    where
        A: FnOnce() -> RA + Send,
        B: FnOnce() -> RB + Send,
        RA: Send,
        RB: Send;

    /// Splits holding at most this many elements are reduced without calling
    /// [`join`](Self::join).
    ///
    /// The default of `1` forks at every level down to single elements.
    fn sequential_threshold(&self) -> usize {
        1
    }

    /// Reduces a sequence with a fallible associative operator.
    ///
    /// Returns `Ok(None)` if the sequence is empty, `Ok(Some(item))` if it holds a single item,
    /// and otherwise splits it at `len / 2`, reduces both halves and returns
    /// `combine(left, right)`. The left half is never longer than the right half.
    ///
    /// The first failure aborts the reduction: the failing half's error is returned at the
    /// enclosing join point, the sibling half's result is discarded, and subtrees of the same
    /// call that have not started yet are skipped. If both halves of a split fail, the error of
    /// the left half is returned.
    ///
    /// # Examples
    ///
    /// ```
    /// use foldwork_parallel::{Sequential, Strategy};
    ///
    /// let result = Sequential.try_reduce([1u8, 2, 250, 4], |a, b| a.checked_add(b).ok_or("overflow"));
    /// assert_eq!(result, Err("overflow"));
    ///
    /// let result = Sequential.try_reduce(Vec::<u8>::new(), |a, b| a.checked_add(b).ok_or("overflow"));
    /// assert_eq!(result, Ok(None));
    /// ```
    fn try_reduce<I, T, E, F>(&self, items: I, combine: F) -> Result<Option<T>, E>
    where
        I: IntoIterator<Item = T>,
        T: Send,
        E: Send,
        F: Fn(T, T) -> Result<T, E> + Send + Sync,
    {
        let mut slots: Vec<Option<T>> = items.into_iter().map(Some).collect();
        let cancelled = AtomicBool::new(false);
        match split(self, &mut slots, &combine, &cancelled) {
            Ok(result) => Ok(result),
            Err(Abort::Failed(err)) => Err(err),
            Err(Abort::Cancelled) => unreachable!("cancellation is only requested by a failure"),
        }
    }

    /// Reduces a sequence with a total associative operator.
    ///
    /// See [`try_reduce`](Self::try_reduce) for the splitting policy.
    ///
    /// # Examples
    ///
    /// ```
    /// use foldwork_parallel::{Sequential, Strategy};
    ///
    /// assert_eq!(Sequential.reduce(1..=100u64, |a, b| a + b), Some(5050));
    /// assert_eq!(Sequential.reduce(Vec::<u64>::new(), |a, b| a + b), None);
    /// ```
    fn reduce<I, T, F>(&self, items: I, combine: F) -> Option<T>
    where
        I: IntoIterator<Item = T>,
        T: Send,
        F: Fn(T, T) -> T + Send + Sync,
    {
        match self.try_reduce(items, |left, right| Ok::<_, Infallible>(combine(left, right))) {
            Ok(result) => result,
            Err(never) => match never {},
        }
    }
}

/// A sequential execution strategy.
///
/// Both halves of every split are reduced on the current thread, left first. It is useful for:
///
/// - Debugging and testing (deterministic execution)
/// - `no_std` environments where threading is unavailable
/// - Small inputs where the overhead of parallelism exceeds its benefits
///
/// # Examples
///
/// ```
/// use foldwork_parallel::{Sequential, Strategy};
///
/// let words = vec!["a".to_string(), "b".to_string(), "c".to_string()];
/// assert_eq!(Sequential.reduce(words, |a, b| a + &b).as_deref(), Some("abc"));
/// ```
#[derive(Default, Debug, Clone)]
pub struct Sequential;

impl Strategy for Sequential {
    fn join<A, B, RA, RB>(&self, left: A, right: B) -> (RA, RB)
    where
        A: FnOnce() -> RA + Send,
        B: FnOnce() -> RB + Send,
        RA: Send,
        RB: Send,
    {
        (left(), right())
    }
}

cfg_if! {
    if #[cfg(feature = "std")] {
        /// Errors that can occur when initializing a [`Parallel`] strategy.
        #[derive(Error, Debug)]
        pub enum Error {
            #[error("thread pool must have at least one thread")]
            InvalidThreads,
            #[error("failed to build thread pool: {0}")]
            ThreadPool(#[from] ThreadPoolBuildError),
        }

        /// Configuration for [`Parallel::init`].
        #[derive(Clone, Debug)]
        pub struct Config {
            /// Number of threads in the pool.
            pub threads: usize,

            /// Splits holding at most this many elements are reduced on the current thread
            /// instead of being forked.
            ///
            /// `1` forks all the way down to single elements. Larger values bound the number of
            /// tasks a reduction creates to roughly `2 * len / sequential_threshold`.
            pub sequential_threshold: usize,

            /// Prefix of the names given to pool threads.
            pub thread_name: String,
        }

        impl Default for Config {
            fn default() -> Self {
                Self {
                    threads: thread::available_parallelism()
                        .map(NonZeroUsize::get)
                        .unwrap_or(2),
                    sequential_threshold: 1,
                    thread_name: "foldwork".into(),
                }
            }
        }

        /// A parallel execution strategy backed by a rayon thread pool.
        ///
        /// Both halves of every split are submitted to [`rayon::join`], which pushes the right
        /// half onto the current worker's deque (where idle workers may steal it) while the
        /// current worker reduces the left half.
        ///
        /// # Resource Usage
        ///
        /// With the default `sequential_threshold` of `1`, a reduction forks at every level
        /// down to single elements and so creates `O(n)` short-lived tasks. Rayon amortizes this
        /// with its work-stealing deques (un-stolen tasks are executed inline and never
        /// allocate a thread), which is cheap for inputs of a few thousand elements but is not
        /// free at arbitrary scale. Raise the threshold with
        /// [`with_sequential_threshold`](Self::with_sequential_threshold) to bound the fan-out.
        ///
        /// # Thread Pool Ownership
        ///
        /// `Parallel` holds an [`Arc<ThreadPool>`], so it can be cheaply cloned and shared
        /// across threads.
        ///
        /// # Examples
        ///
        /// ```
        /// use foldwork_parallel::{Parallel, Strategy};
        /// use rayon::ThreadPoolBuilder;
        /// use std::sync::Arc;
        ///
        /// let pool = Arc::new(ThreadPoolBuilder::new().num_threads(2).build().unwrap());
        /// let strategy = Parallel::new(pool);
        ///
        /// let parts = ["abc", "def", "ghi", "jkl", "mno"].map(String::from);
        /// let joined = strategy.reduce(parts, |a, b| a + &b);
        /// assert_eq!(joined.as_deref(), Some("abcdefghijklmno"));
        /// ```
        #[derive(Debug, Clone)]
        pub struct Parallel {
            thread_pool: Arc<ThreadPool>,
            sequential_threshold: usize,
        }

        impl Parallel {
            /// Creates a new [`Parallel`] strategy with the given [`ThreadPool`].
            pub const fn new(thread_pool: Arc<ThreadPool>) -> Self {
                Self {
                    thread_pool,
                    sequential_threshold: 1,
                }
            }

            /// Builds a dedicated thread pool from `cfg`.
            pub fn init(cfg: Config) -> Result<Self, Error> {
                if cfg.threads == 0 {
                    return Err(Error::InvalidThreads);
                }
                let prefix = cfg.thread_name;
                let thread_pool = ThreadPoolBuilder::new()
                    .num_threads(cfg.threads)
                    .thread_name(move |index| format!("{prefix}-{index}"))
                    .build()?;
                debug!(
                    threads = cfg.threads,
                    sequential_threshold = cfg.sequential_threshold,
                    "initialized thread pool"
                );
                Ok(Self::new(Arc::new(thread_pool))
                    .with_sequential_threshold(cfg.sequential_threshold))
            }

            /// Reduces splits holding at most `threshold` elements on the current thread.
            ///
            /// A `threshold` of `0` is treated as `1`.
            pub fn with_sequential_threshold(mut self, threshold: usize) -> Self {
                self.sequential_threshold = threshold.max(1);
                self
            }

            /// Returns the number of threads in the underlying pool.
            pub fn threads(&self) -> usize {
                self.thread_pool.current_num_threads()
            }
        }

        impl From<Arc<ThreadPool>> for Parallel {
            fn from(thread_pool: Arc<ThreadPool>) -> Self {
                Self::new(thread_pool)
            }
        }

        impl Strategy for Parallel {
            fn join<A, B, RA, RB>(&self, left: A, right: B) -> (RA, RB)
            where
                A: FnOnce() -> RA + Send,
                B: FnOnce() -> RB + Send,
                RA: Send,
                RB: Send,
            {
                // Runs inline when already on one of the pool's workers.
                self.thread_pool.install(|| rayon::join(left, right))
            }

            fn sequential_threshold(&self) -> usize {
                self.sequential_threshold
            }
        }
    }
}
