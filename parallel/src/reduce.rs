//! Balanced and eager reduction.

use crate::{Sequential, Strategy};
use alloc::vec::Vec;
use core::{
    convert::Infallible,
    sync::atomic::{AtomicBool, Ordering},
};
use tracing::trace;

/// Why a subtree stopped before producing a result.
pub(crate) enum Abort<E> {
    /// `combine` failed in this subtree.
    Failed(E),
    /// Another subtree of the same call failed first.
    Cancelled,
}

/// Reduces `slots` by splitting at the midpoint and joining both halves with `strategy`.
///
/// Every slot is `Some` on entry and is taken exactly once.
pub(crate) fn split<S, T, E, F>(
    strategy: &S,
    slots: &mut [Option<T>],
    combine: &F,
    cancelled: &AtomicBool,
) -> Result<Option<T>, Abort<E>>
where
    S: Strategy,
    T: Send,
    E: Send,
    F: Fn(T, T) -> Result<T, E> + Send + Sync,
{
    if cancelled.load(Ordering::Relaxed) {
        return Err(Abort::Cancelled);
    }
    let len = slots.len();
    match len {
        0 => return Ok(None),
        1 => return Ok(slots[0].take()),
        _ => {}
    }

    let (left, right) = slots.split_at_mut(len / 2);
    let (left, right) = if len <= strategy.sequential_threshold() {
        (
            split(&Sequential, left, combine, cancelled),
            split(&Sequential, right, combine, cancelled),
        )
    } else {
        strategy.join(
            || split(strategy, left, combine, cancelled),
            || split(strategy, right, combine, cancelled),
        )
    };

    // Both children have completed: surface the left-most failure, if any.
    let (left, right) = match (left, right) {
        (Err(Abort::Failed(err)), _) | (_, Err(Abort::Failed(err))) => {
            return Err(Abort::Failed(err))
        }
        (Err(Abort::Cancelled), _) | (_, Err(Abort::Cancelled)) => return Err(Abort::Cancelled),
        (Ok(left), Ok(right)) => (left, right),
    };
    match (left, right) {
        (Some(left), Some(right)) => combine(left, right).map(Some).map_err(|err| {
            trace!(len, "combine failed, cancelling remaining splits");
            cancelled.store(true, Ordering::Relaxed);
            Abort::Failed(err)
        }),
        (left, right) => Ok(left.or(right)),
    }
}

/// Reduces `items` with a fallible associative operator by recursively splitting the sequence
/// in the middle, on the current thread.
///
/// Returns `Ok(None)` for an empty sequence. The recursion depth is `O(log n)`.
///
/// # Examples
///
/// ```
/// use foldwork_parallel::try_balanced_reduce;
///
/// let parts = vec![vec![1], vec![2], vec![3]];
/// let flat = try_balanced_reduce(parts, |mut a: Vec<u8>, b| {
///     if a.len() + b.len() > 2 {
///         return Err("too long");
///     }
///     a.extend(b);
///     Ok(a)
/// });
/// assert_eq!(flat, Err("too long"));
/// ```
pub fn try_balanced_reduce<I, T, E, F>(items: I, combine: F) -> Result<Option<T>, E>
where
    I: IntoIterator<Item = T>,
    T: Send,
    E: Send,
    F: Fn(T, T) -> Result<T, E> + Send + Sync,
{
    Sequential.try_reduce(items, combine)
}

/// Reduces `items` with an associative operator by recursively splitting the sequence in the
/// middle, on the current thread.
///
/// # Examples
///
/// ```
/// use foldwork_parallel::balanced_reduce;
///
/// let parts = ["abc", "def", "ghi", "jkl", "mno"].map(String::from);
/// let joined = balanced_reduce(parts, |a, b| a + &b);
/// assert_eq!(joined.as_deref(), Some("abcdefghijklmno"));
/// ```
pub fn balanced_reduce<I, T, F>(items: I, combine: F) -> Option<T>
where
    I: IntoIterator<Item = T>,
    T: Send,
    F: Fn(T, T) -> T + Send + Sync,
{
    Sequential.reduce(items, combine)
}

/// Reduces `items` with a fallible associative operator by repeatedly combining adjacent pairs.
///
/// Each pass combines `(0, 1)`, `(2, 3)`, ... from left to right. When a pass holds an odd
/// number of elements, the last one is carried into the next pass unchanged. Passes repeat
/// until a single element remains. The loop is iterative, so the stack does not grow with the
/// length of `items`.
pub fn try_eager_reduce<I, T, E, F>(items: I, mut combine: F) -> Result<Option<T>, E>
where
    I: IntoIterator<Item = T>,
    F: FnMut(T, T) -> Result<T, E>,
{
    let mut pass: Vec<T> = items.into_iter().collect();
    while pass.len() > 1 {
        let mut next = Vec::with_capacity(pass.len().div_ceil(2));
        let mut items = pass.into_iter();
        while let Some(left) = items.next() {
            match items.next() {
                Some(right) => next.push(combine(left, right)?),
                None => next.push(left),
            }
        }
        pass = next;
    }
    Ok(pass.pop())
}

/// Reduces `items` with an associative operator by repeatedly combining adjacent pairs.
///
/// See [`try_eager_reduce`].
///
/// # Examples
///
/// ```
/// use foldwork_parallel::eager_reduce;
///
/// let parts = ["abc", "def", "ghi", "jkl", "mno"].map(String::from);
/// let joined = eager_reduce(parts, |a, b| a + &b);
/// assert_eq!(joined.as_deref(), Some("abcdefghijklmno"));
/// ```
pub fn eager_reduce<I, T, F>(items: I, mut combine: F) -> Option<T>
where
    I: IntoIterator<Item = T>,
    F: FnMut(T, T) -> T,
{
    match try_eager_reduce(items, |left, right| Ok::<_, Infallible>(combine(left, right))) {
        Ok(result) => result,
        Err(never) => match never {},
    }
}
