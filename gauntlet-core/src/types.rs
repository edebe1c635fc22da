//! Strongly-typed identifiers for harness entities.
//!
//! A thread id and a state index are both small integers; wrapping them keeps
//! a `Tid` from being used to index the state list and vice versa.

use std::fmt;

/// Macro to generate strongly-typed ID wrappers.
///
/// Each ID type wraps a u64 and provides:
/// - Type safety (can't mix `Tid` with `StateId`)
/// - Debug/Display formatting
/// - Conversion to a `usize` index for dense tables
macro_rules! define_id {
    ($name:ident, $prefix:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Creates a new ID from a raw u64 value.
            #[inline]
            #[must_use]
            pub const fn new(value: u64) -> Self {
                Self(value)
            }

            /// Creates an ID from a position in a dense table.
            #[inline]
            #[must_use]
            pub const fn from_index(index: usize) -> Self {
                Self(index as u64)
            }

            /// Returns the raw u64 value.
            #[inline]
            #[must_use]
            pub const fn get(self) -> u64 {
                self.0
            }

            /// Returns the ID as a position in a dense table.
            #[inline]
            #[must_use]
            #[allow(clippy::cast_possible_truncation)] // Bounded by harness limits.
            pub const fn index(self) -> usize {
                self.0 as usize
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", $prefix, self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}-{}", $prefix, self.0)
            }
        }

        impl From<u64> for $name {
            fn from(value: u64) -> Self {
                Self::new(value)
            }
        }

        impl From<$name> for u64 {
            fn from(id: $name) -> Self {
                id.get()
            }
        }
    };
}

define_id!(
    Tid,
    "tid",
    "Identifier of one simulated client within a run, dense in `[0, thread_count)`."
);
define_id!(
    StateId,
    "state",
    "Index of a state in a compiled workload's ordered state list."
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_display() {
        let tid = Tid::new(3);
        assert_eq!(format!("{tid}"), "tid-3");
        assert_eq!(format!("{tid:?}"), "tid(3)");
    }

    #[test]
    fn test_id_index_roundtrip() {
        let state = StateId::from_index(7);
        assert_eq!(state.index(), 7);
        assert_eq!(state.get(), 7);
    }

    #[test]
    fn test_id_ordering() {
        let a = Tid::new(1);
        let b = Tid::new(2);
        assert!(a < b);
        assert_eq!(a, Tid::from(1));
    }
}
