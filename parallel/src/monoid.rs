//! Combine operations built from other combine operations.
//!
//! A combine operation is not necessarily commutative, so every combinator here passes the
//! left operand's parts as the left arguments of the nested operations.

use crate::balanced_reduce;
use alloc::{collections::BTreeMap, string::String, vec::Vec};

/// Combines pairs component-wise with `left` and `right`.
///
/// If both operations are associative, so is the product.
///
/// # Examples
///
/// ```
/// use foldwork_parallel::monoid::product;
///
/// let concat_minus = product(|a: String, b: String| a + &b, |a: i32, b: i32| a - b);
/// assert_eq!(
///     concat_minus(("Left".into(), 4), ("Right".into(), 1)),
///     ("LeftRight".to_string(), 3)
/// );
/// ```
pub fn product<L, R, FL, FR>(left: FL, right: FR) -> impl Fn((L, R), (L, R)) -> (L, R)
where
    FL: Fn(L, L) -> L,
    FR: Fn(R, R) -> R,
{
    move |(left_a, right_a), (left_b, right_b)| (left(left_a, left_b), right(right_a, right_b))
}

/// Computes the arithmetic mean of `items` in a single pass by reducing `(sum, count)` pairs
/// with the product of two additions.
///
/// The sum is accumulated in `i128`, so it cannot overflow for any slice of `i64`.
///
/// Returns `None` if `items` is empty.
///
/// ```
/// use foldwork_parallel::monoid::mean;
///
/// assert_eq!(mean(&[1, 2, 3, 4, 5]), Some(3.0));
/// assert_eq!(mean(&[]), None);
/// ```
pub fn mean(items: &[i64]) -> Option<f64> {
    let sum_and_count = product(|a: i128, b| a + b, |a: u64, b| a + b);
    let (sum, count) =
        balanced_reduce(items.iter().map(|&item| (i128::from(item), 1)), sum_and_count)?;
    Some(sum as f64 / count as f64)
}

/// Merges two maps, combining the values of keys present in both with
/// `combine(left_value, right_value)`.
///
/// The smaller map is folded into the larger one.
///
/// ```
/// use foldwork_parallel::monoid::merge_maps;
/// use std::collections::BTreeMap;
///
/// let left = BTreeMap::from([("a", 1), ("b", 2)]);
/// let right = BTreeMap::from([("b", 10), ("c", 20), ("d", 30)]);
/// let merged = merge_maps(left, right, |l, r| l - r);
/// assert_eq!(merged, BTreeMap::from([("a", 1), ("b", -8), ("c", 20), ("d", 30)]));
/// ```
pub fn merge_maps<K, V, F>(left: BTreeMap<K, V>, right: BTreeMap<K, V>, mut combine: F) -> BTreeMap<K, V>
where
    K: Ord,
    F: FnMut(V, V) -> V,
{
    if left.len() < right.len() {
        let mut merged = right;
        for (key, value) in left {
            let value = match merged.remove(&key) {
                Some(right_value) => combine(value, right_value),
                None => value,
            };
            merged.insert(key, value);
        }
        merged
    } else {
        let mut merged = left;
        for (key, value) in right {
            let value = match merged.remove(&key) {
                Some(left_value) => combine(left_value, value),
                None => value,
            };
            merged.insert(key, value);
        }
        merged
    }
}

/// Merges two multimaps by concatenating the values of keys present in both.
pub fn merge_multimaps<K, V>(
    left: BTreeMap<K, Vec<V>>,
    right: BTreeMap<K, Vec<V>>,
) -> BTreeMap<K, Vec<V>>
where
    K: Ord,
{
    merge_maps(left, right, |mut left, right| {
        left.extend(right);
        left
    })
}

/// Merges two maps of maps: outer keys are merged, inner keys are merged, and strings of
/// inner keys present in both are concatenated.
pub fn merge_nested_maps<K, J>(
    left: BTreeMap<K, BTreeMap<J, String>>,
    right: BTreeMap<K, BTreeMap<J, String>>,
) -> BTreeMap<K, BTreeMap<J, String>>
where
    K: Ord,
    J: Ord,
{
    merge_maps(left, right, |left, right| {
        merge_maps(left, right, |left, right| left + &right)
    })
}
