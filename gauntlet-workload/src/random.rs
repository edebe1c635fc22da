//! Random and deterministic value generation.
//!
//! There is no process-wide generator. A run owns one seed; setup, teardown
//! and every executor each draw from their own ChaCha stream of that seed, so
//! a run is reproducible and no generator is ever shared between threads.

use gauntlet_core::Tid;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::{json, Value};
use thiserror::Error;

/// Stream used by the setup hook.
pub const SETUP_STREAM: u64 = 0;

/// Stream used by the teardown hook.
pub const TEARDOWN_STREAM: u64 = u64::MAX;

/// Errors from random helpers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RandomError {
    /// `rand_range` was called with `high <= low`.
    #[error("empty range: high ({high}) must be greater than low ({low})")]
    EmptyRange {
        /// Lower bound.
        low: i64,
        /// Upper bound.
        high: i64,
    },

    /// A choice was requested from an empty set.
    #[error("cannot choose from an empty set")]
    EmptyChoice,
}

/// Returns the generator for one stream of a run seed.
#[must_use]
pub fn seeded_stream(seed: u64, stream: u64) -> ChaCha8Rng {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    rng.set_stream(stream);
    rng
}

/// Returns the stream an executor draws from.
#[must_use]
pub const fn executor_stream(tid: Tid) -> u64 {
    tid.get() + 1
}

/// Returns an integer uniformly chosen in `[low, high]`.
///
/// # Errors
/// Returns `RandomError::EmptyRange` unless `high > low`.
pub fn rand_range<R: Rng + ?Sized>(rng: &mut R, low: i64, high: i64) -> Result<i64, RandomError> {
    if high <= low {
        return Err(RandomError::EmptyRange { low, high });
    }
    Ok(rng.gen_range(low..=high))
}

/// Picks a value from `values` deterministically by thread id.
///
/// # Errors
/// Returns `RandomError::EmptyChoice` if `values` is empty.
#[allow(clippy::cast_possible_truncation)] // Result of `%` is below `values.len()`.
pub fn choose_by_tid<T>(tid: Tid, values: &[T]) -> Result<&T, RandomError> {
    if values.is_empty() {
        return Err(RandomError::EmptyChoice);
    }
    let index = (tid.get() % values.len() as u64) as usize;
    Ok(&values[index])
}

/// Picks a value from `values` uniformly at random.
///
/// # Errors
/// Returns `RandomError::EmptyChoice` if `values` is empty.
pub fn choose<'a, R: Rng + ?Sized, T>(rng: &mut R, values: &'a [T]) -> Result<&'a T, RandomError> {
    if values.is_empty() {
        return Err(RandomError::EmptyChoice);
    }
    Ok(&values[rng.gen_range(0..values.len())])
}

/// Number of distinct value shapes produced by [`heterogeneous_value`].
pub const HETEROGENEOUS_KINDS: u64 = 7;

/// Returns a value whose type depends on `tid` and whose content is unique to it.
///
/// Clients `tid` and `tid + HETEROGENEOUS_KINDS` share a type but never a
/// value, so a per-client equality query only ever matches that client's own
/// documents.
#[must_use]
#[allow(clippy::cast_precision_loss)] // Thread ids are far below 2^52.
pub fn heterogeneous_value(tid: Tid) -> Value {
    let n = tid.get();
    match n % HETEROGENEOUS_KINDS {
        0 => json!(n),
        1 => json!(n as f64 + 0.5),
        2 => json!(format!("tid-{n}")),
        3 => json!([n]),
        4 => json!({ "tid": n }),
        5 => json!(["tid", n.to_string()]),
        _ => json!({ "nested": { "tid": n, "odd": n % 2 == 1 } }),
    }
}

/// Returns a random JSON value of random type, for filler documents.
pub fn random_value<R: Rng + ?Sized>(rng: &mut R) -> Value {
    match rng.gen_range(0..6) {
        0 => json!(rng.gen_range(-1_000_000..1_000_000_i64)),
        1 => json!(rng.gen::<f64>()),
        2 => json!(random_string(rng, 12)),
        3 => json!(rng.gen::<bool>()),
        4 => Value::Null,
        _ => json!([rng.gen_range(0..100_u32), random_string(rng, 4)]),
    }
}

/// Returns a random lowercase ASCII string of `len` characters.
pub fn random_string<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| char::from(b'a' + rng.gen_range(0..26_u8)))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn test_rand_range_inclusive() {
        let mut rng = seeded_stream(7, 1);
        let mut seen = HashSet::new();
        for _ in 0..1000 {
            let v = rand_range(&mut rng, 3, 5).unwrap();
            assert!((3..=5).contains(&v));
            seen.insert(v);
        }
        assert_eq!(seen.len(), 3);
    }

    #[test]
    fn test_rand_range_rejects_empty() {
        let mut rng = seeded_stream(7, 1);
        assert_eq!(
            rand_range(&mut rng, 5, 5),
            Err(RandomError::EmptyRange { low: 5, high: 5 })
        );
        assert!(rand_range(&mut rng, 6, 5).is_err());
    }

    #[test]
    fn test_streams_are_reproducible_and_distinct() {
        let mut first = seeded_stream(42, 1);
        let mut second = seeded_stream(42, 1);
        let a: Vec<u64> = (0..4).map(|_| first.gen()).collect();
        let b: Vec<u64> = (0..4).map(|_| second.gen()).collect();
        assert_eq!(a, b);

        let mut other = seeded_stream(42, 2);
        let c: Vec<u64> = (0..4).map(|_| other.gen()).collect();
        assert_ne!(a, c);
    }

    #[test]
    fn test_choose_by_tid() {
        let values = ["a", "b", "c"];
        assert_eq!(*choose_by_tid(Tid::new(0), &values).unwrap(), "a");
        assert_eq!(*choose_by_tid(Tid::new(4), &values).unwrap(), "b");
        let empty: [&str; 0] = [];
        assert_eq!(choose_by_tid(Tid::new(0), &empty), Err(RandomError::EmptyChoice));
    }

    #[test]
    fn test_heterogeneous_values_are_unique() {
        let values: Vec<Value> = (0..50).map(|n| heterogeneous_value(Tid::new(n))).collect();
        for (i, a) in values.iter().enumerate() {
            for b in &values[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert!(values[0].is_u64());
        assert!(values[2].is_string());
        assert!(values[4].is_object());
    }
}
