//! Running folds over streams.
//!
//! Each operation is a strictly sequential prefix computation: elements are consumed in order,
//! one at a time, and every output depends on all the inputs before it.

use futures::{future, stream, Stream, StreamExt as _};
use std::ops::Sub;

/// Yields the difference between each element of `stream` and the element before it.
///
/// The first element has no predecessor and produces nothing, so the output is one element
/// shorter than the input (and empty if the input has fewer than two elements).
///
/// ```
/// use foldwork_mapper::running::delta;
/// use futures::{executor::block_on, stream, StreamExt};
///
/// let deltas: Vec<i32> = block_on(delta(stream::iter([1, 1, 2, 1, 3])).collect());
/// assert_eq!(deltas, vec![0, 1, -1, 2]);
/// ```
pub fn delta<St, T>(stream: St) -> impl Stream<Item = T::Output>
where
    St: Stream<Item = T>,
    T: Sub + Clone,
{
    stream
        .scan(None, |previous: &mut Option<T>, item: T| {
            let delta = previous.replace(item.clone()).map(|previous| item - previous);
            future::ready(Some(delta))
        })
        .filter_map(future::ready)
}

/// Change applied to a running total by [`states`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Add(i64),
    Subtract(i64),
}

impl Action {
    /// Returns the total after applying this action to `total`.
    ///
    /// Arithmetic wraps around at the bounds of `i64`.
    pub fn apply(self, total: i64) -> i64 {
        match self {
            Self::Add(amount) => total.wrapping_add(amount),
            Self::Subtract(amount) => total.wrapping_sub(amount),
        }
    }
}

/// Yields `initial` and then the state obtained after applying each action of `actions`, in
/// order, with `apply(state, action)`.
///
/// ```
/// use foldwork_mapper::running::{states, Action};
/// use futures::{executor::block_on, stream, StreamExt};
///
/// let actions = stream::iter([Action::Add(1), Action::Add(20), Action::Subtract(5)]);
/// let totals: Vec<i64> = block_on(states(0, actions, |total, action| action.apply(total)).collect());
/// assert_eq!(totals, vec![0, 1, 21, 16]);
/// ```
pub fn states<St, S, F>(initial: S, actions: St, mut apply: F) -> impl Stream<Item = S>
where
    St: Stream,
    S: Clone,
    F: FnMut(S, St::Item) -> S,
{
    let transitions = actions.scan(initial.clone(), move |state: &mut S, action| {
        *state = apply(state.clone(), action);
        future::ready(Some(state.clone()))
    });
    stream::once(future::ready(initial)).chain(transitions)
}
