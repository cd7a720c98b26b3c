//! Running (prefix) reductions.
//!
//! Every function in this module makes a single, strictly sequential pass over its input and
//! preserves input order. Outputs are produced lazily where the signature returns an
//! [`Iterator`].

use alloc::vec::Vec;
use core::ops::{Add, Sub};

/// Returns an iterator over the running reduction of `items`.
///
/// The first output is the first input; every later output is `combine(previous_output, input)`.
///
/// # Examples
///
/// ```
/// use foldwork_parallel::running;
///
/// let maxima: Vec<u32> = running::scan([3, 1, 4, 1, 5], u32::max).collect();
/// assert_eq!(maxima, vec![3, 3, 4, 4, 5]);
/// ```
pub fn scan<I, T, F>(items: I, mut combine: F) -> impl Iterator<Item = T>
where
    I: IntoIterator<Item = T>,
    T: Clone,
    F: FnMut(T, T) -> T,
{
    let mut accumulator: Option<T> = None;
    items.into_iter().map(move |item| {
        let next = match accumulator.take() {
            Some(previous) => combine(previous, item),
            None => item,
        };
        accumulator = Some(next.clone());
        next
    })
}

/// Collects the running reduction of `items`.
///
/// The output has the same length as the input.
pub fn fold<I, T, F>(items: I, combine: F) -> Vec<T>
where
    I: IntoIterator<Item = T>,
    T: Clone,
    F: FnMut(T, T) -> T,
{
    scan(items, combine).collect()
}

/// Running total.
///
/// ```
/// use foldwork_parallel::running;
///
/// assert_eq!(running::total([1, 2, 3, 4, 5]), vec![1, 3, 6, 10, 15]);
/// ```
pub fn total<I, T>(items: I) -> Vec<T>
where
    I: IntoIterator<Item = T>,
    T: Add<Output = T> + Clone,
{
    fold(items, |acc, x| acc + x)
}

/// Running blend of each input with the previous output: `(previous + input) / 2`.
///
/// This weighs recent inputs exponentially more than older ones and is not the running
/// arithmetic mean.
///
/// ```
/// use foldwork_parallel::running;
///
/// assert_eq!(
///     running::average([0.0, 1.0, 2.0, 2.0, 2.0]),
///     vec![0.0, 0.5, 1.25, 1.625, 1.8125]
/// );
/// ```
pub fn average<I>(items: I) -> Vec<f64>
where
    I: IntoIterator<Item = f64>,
{
    fold(items, |acc, x| (acc + x) / 2.0)
}

/// Returns an iterator over the differences between adjacent inputs: `input[i + 1] - input[i]`.
///
/// The first input produces no delta, so the output is one element shorter than the input
/// (and empty if the input holds at most one element).
///
/// ```
/// use foldwork_parallel::running;
///
/// let deltas: Vec<i32> = running::deltas([1, 1, 2, 1, 3]).collect();
/// assert_eq!(deltas, vec![0, 1, -1, 2]);
/// ```
pub fn deltas<I, T>(items: I) -> impl Iterator<Item = T>
where
    I: IntoIterator<Item = T>,
    T: Sub<Output = T> + Clone,
{
    let mut items = items.into_iter();
    let first = items.next();
    items.scan(first, |previous, item| {
        let previous = previous.replace(item.clone())?;
        Some(item - previous)
    })
}
