//! Per-workload scratch data.
//!
//! A workload declares an initial `Data` bag. Setup may extend it, and every
//! executor then receives its own clone, so writes made by one simulated
//! client are never visible to another.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Errors from typed access to a [`Data`] bag.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DataError {
    /// The key is not present.
    #[error("data key '{key}' is missing")]
    Missing {
        /// The requested key.
        key: String,
    },

    /// The key holds a value of another type.
    #[error("data key '{key}' is not {expected}")]
    WrongType {
        /// The requested key.
        key: String,
        /// The type the caller asked for.
        expected: &'static str,
    },

    /// An arithmetic update left the representable range.
    #[error("data key '{key}' overflowed")]
    Overflow {
        /// The updated key.
        key: String,
    },
}

/// Heterogeneous key/value bag holding JSON-like values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Data(BTreeMap<String, Value>);

impl Data {
    /// Creates an empty bag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the bag with `key` set to `value`.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Sets `key` to `value`, returning the previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    /// Returns the raw value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Removes `key`, returning its value.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Returns true if `key` is present.
    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Returns the number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the bag holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterates over entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Returns the value under `key`, failing if it is absent.
    ///
    /// # Errors
    /// Returns `DataError::Missing` if the key is not present.
    pub fn require(&self, key: &str) -> Result<&Value, DataError> {
        self.0.get(key).ok_or_else(|| DataError::Missing {
            key: key.to_string(),
        })
    }

    /// Returns the integer stored under `key`.
    ///
    /// # Errors
    /// Returns an error if the key is missing or not an integer.
    pub fn get_i64(&self, key: &str) -> Result<i64, DataError> {
        self.require(key)?
            .as_i64()
            .ok_or_else(|| wrong_type(key, "an integer"))
    }

    /// Returns the unsigned integer stored under `key`.
    ///
    /// # Errors
    /// Returns an error if the key is missing or not a non-negative integer.
    pub fn get_u64(&self, key: &str) -> Result<u64, DataError> {
        self.require(key)?
            .as_u64()
            .ok_or_else(|| wrong_type(key, "a non-negative integer"))
    }

    /// Returns the number stored under `key`.
    ///
    /// # Errors
    /// Returns an error if the key is missing or not a number.
    pub fn get_f64(&self, key: &str) -> Result<f64, DataError> {
        self.require(key)?
            .as_f64()
            .ok_or_else(|| wrong_type(key, "a number"))
    }

    /// Returns the string stored under `key`.
    ///
    /// # Errors
    /// Returns an error if the key is missing or not a string.
    pub fn get_str(&self, key: &str) -> Result<&str, DataError> {
        self.require(key)?
            .as_str()
            .ok_or_else(|| wrong_type(key, "a string"))
    }

    /// Returns the boolean stored under `key`.
    ///
    /// # Errors
    /// Returns an error if the key is missing or not a boolean.
    pub fn get_bool(&self, key: &str) -> Result<bool, DataError> {
        self.require(key)?
            .as_bool()
            .ok_or_else(|| wrong_type(key, "a boolean"))
    }

    /// Adds `by` to the integer under `key` and returns the new value.
    ///
    /// A missing key counts as zero.
    ///
    /// # Errors
    /// Returns an error if the key holds a non-integer or the sum overflows.
    pub fn increment(&mut self, key: &str, by: i64) -> Result<i64, DataError> {
        let current = match self.0.get(key) {
            None => 0,
            Some(value) => value
                .as_i64()
                .ok_or_else(|| wrong_type(key, "an integer"))?,
        };
        let next = current.checked_add(by).ok_or_else(|| DataError::Overflow {
            key: key.to_string(),
        })?;
        self.0.insert(key.to_string(), Value::from(next));
        Ok(next)
    }
}

impl FromIterator<(String, Value)> for Data {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn wrong_type(key: &str, expected: &'static str) -> DataError {
    DataError::WrongType {
        key: key.to_string(),
        expected,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_typed_accessors() {
        let data = Data::new()
            .with("count", 3)
            .with("ratio", 0.5)
            .with("field", "x")
            .with("enabled", true);

        assert_eq!(data.get_i64("count").unwrap(), 3);
        assert_eq!(data.get_u64("count").unwrap(), 3);
        assert!((data.get_f64("ratio").unwrap() - 0.5).abs() < f64::EPSILON);
        assert_eq!(data.get_str("field").unwrap(), "x");
        assert!(data.get_bool("enabled").unwrap());
    }

    #[test]
    fn test_missing_and_wrong_type() {
        let data = Data::new().with("field", "x");

        assert_eq!(
            data.get_i64("nope"),
            Err(DataError::Missing {
                key: "nope".to_string()
            })
        );
        assert!(matches!(
            data.get_i64("field"),
            Err(DataError::WrongType { .. })
        ));
    }

    #[test]
    fn test_increment() {
        let mut data = Data::new();
        assert_eq!(data.increment("n", 1).unwrap(), 1);
        assert_eq!(data.increment("n", 4).unwrap(), 5);

        data.set("n", i64::MAX);
        assert!(matches!(
            data.increment("n", 1),
            Err(DataError::Overflow { .. })
        ));
    }

    #[test]
    fn test_clone_is_independent() {
        let original = Data::new().with("doc", json!({"nested": [1, 2]}));
        let mut copy = original.clone();
        copy.set("doc", json!({"nested": []}));

        assert_eq!(original.get("doc"), Some(&json!({"nested": [1, 2]})));
    }
}
