//! The database under test, as seen by workloads.
//!
//! The harness never interprets documents itself. State functions and hooks
//! reach the shared database through the [`Database`] trait, so the same
//! workload runs against the in-process [`MemoryDatabase`](crate::MemoryDatabase)
//! or an adapter for a real server.

use gauntlet_core::Tid;
use serde_json::{Map, Value};
use thiserror::Error;

/// A document: a JSON object.
pub type Document = Map<String, Value>;

/// Result type for database calls.
pub type DbResult<T> = Result<T, DbError>;

/// Errors returned by the database.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DbError {
    /// The collection does not exist.
    #[error("namespace not found: {collection}")]
    NamespaceNotFound {
        /// Collection name.
        collection: String,
    },

    /// The collection already exists.
    #[error("namespace already exists: {collection}")]
    NamespaceExists {
        /// Collection name.
        collection: String,
    },

    /// A unique index rejected a write.
    #[error("duplicate key in {collection}: {field} = {value}")]
    DuplicateKey {
        /// Collection name.
        collection: String,
        /// Indexed field.
        field: String,
        /// Offending value, rendered as JSON.
        value: String,
    },

    /// The named index does not exist.
    #[error("index not found in {collection}: {field}")]
    IndexNotFound {
        /// Collection name.
        collection: String,
        /// Indexed field.
        field: String,
    },

    /// An index on the field exists with different options.
    #[error("index options conflict in {collection}: {field}")]
    IndexConflict {
        /// Collection name.
        collection: String,
        /// Indexed field.
        field: String,
    },

    /// A concurrent write won; the operation may be retried.
    #[error("write conflict in {collection}")]
    WriteConflict {
        /// Collection name.
        collection: String,
    },

    /// A filter or pipeline could not be interpreted.
    #[error("bad query: {message}")]
    BadQuery {
        /// What was wrong.
        message: String,
    },

    /// Generic error with error code.
    #[error("{message} (code {code})")]
    Other {
        /// Server error code.
        code: i32,
        /// Error message.
        message: String,
    },
}

impl DbError {
    /// Returns the server-compatible error code.
    #[must_use]
    pub const fn code(&self) -> i32 {
        match self {
            Self::NamespaceNotFound { .. } => 26,
            Self::NamespaceExists { .. } => 48,
            Self::DuplicateKey { .. } => 11000,
            Self::IndexNotFound { .. } => 27,
            Self::IndexConflict { .. } => 85,
            Self::WriteConflict { .. } => 112,
            Self::BadQuery { .. } => 2,
            Self::Other { code, .. } => *code,
        }
    }

    /// Returns true if the collection was missing.
    #[must_use]
    pub const fn is_namespace_not_found(&self) -> bool {
        matches!(self, Self::NamespaceNotFound { .. })
    }

    /// Returns true if the collection already existed.
    #[must_use]
    pub const fn is_namespace_exists(&self) -> bool {
        matches!(self, Self::NamespaceExists { .. })
    }

    /// Returns true if a unique index rejected the write.
    #[must_use]
    pub const fn is_duplicate_key(&self) -> bool {
        matches!(self, Self::DuplicateKey { .. })
    }

    /// Returns true if retrying the same operation may succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::WriteConflict { .. })
    }
}

/// An index on a single top-level field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSpec {
    /// Indexed field.
    pub field: String,
    /// Whether the index rejects duplicate values.
    pub unique: bool,
}

impl IndexSpec {
    /// Creates a non-unique index on `field`.
    #[must_use]
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            unique: false,
        }
    }

    /// Creates a unique index on `field`.
    #[must_use]
    pub fn unique(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            unique: true,
        }
    }
}

/// One stage of an aggregation pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// Keep documents matching the filter.
    Match(Document),
    /// Order documents by a field.
    Sort {
        /// Sort key.
        field: String,
        /// Ascending if true.
        ascending: bool,
    },
    /// Keep at most this many documents.
    Limit(usize),
    /// Replace the named collection with the pipeline output. Must be last.
    Out(String),
}

/// Operations the harness and its workloads perform against the database.
///
/// Calls block the calling executor thread until the database answers; that
/// blocking is where concurrent executors interleave.
pub trait Database: Send + Sync {
    /// Creates an empty collection.
    ///
    /// # Errors
    /// `NamespaceExists` if the collection is already present.
    fn create_collection(&self, collection: &str) -> DbResult<()>;

    /// Drops a collection and its indexes.
    ///
    /// # Errors
    /// `NamespaceNotFound` if the collection is absent.
    fn drop_collection(&self, collection: &str) -> DbResult<()>;

    /// Lists collection names in sorted order.
    fn list_collections(&self) -> DbResult<Vec<String>>;

    /// Renames a collection, optionally replacing an existing target.
    fn rename_collection(&self, from: &str, to: &str, drop_target: bool) -> DbResult<()>;

    /// Creates an index, creating the collection if needed.
    fn create_index(&self, collection: &str, index: IndexSpec) -> DbResult<()>;

    /// Drops the index on `field`.
    fn drop_index(&self, collection: &str, field: &str) -> DbResult<()>;

    /// Lists the indexes of a collection.
    fn list_indexes(&self, collection: &str) -> DbResult<Vec<IndexSpec>>;

    /// Inserts a document, creating the collection if needed, and returns its `_id`.
    fn insert_one(&self, collection: &str, document: Document) -> DbResult<Value>;

    /// Inserts documents in order, stopping at the first failure.
    fn insert_many(&self, collection: &str, documents: Vec<Document>) -> DbResult<Vec<Value>> {
        documents
            .into_iter()
            .map(|document| self.insert_one(collection, document))
            .collect()
    }

    /// Returns documents matching `filter`. A missing collection is empty.
    fn find(&self, collection: &str, filter: &Document) -> DbResult<Vec<Document>>;

    /// Counts documents matching `filter`.
    fn count(&self, collection: &str, filter: &Document) -> DbResult<u64> {
        self.find(collection, filter).map(|docs| docs.len() as u64)
    }

    /// Sets the fields of `update` on every matching document; returns the number modified.
    fn update_many(&self, collection: &str, filter: &Document, update: &Document) -> DbResult<u64>;

    /// Deletes every matching document; returns the number deleted.
    fn delete_many(&self, collection: &str, filter: &Document) -> DbResult<u64>;

    /// Runs an aggregation pipeline over a collection.
    fn aggregate(&self, collection: &str, pipeline: &[Stage]) -> DbResult<Vec<Document>>;

    /// Drops every collection whose name starts with `prefix` and returns the dropped names.
    ///
    /// Collections that disappear between listing and dropping are skipped,
    /// since other executors of the same workload may drop them concurrently.
    fn drop_collections_with_prefix(&self, prefix: &str) -> DbResult<Vec<String>> {
        let mut dropped = Vec::new();
        for name in self.list_collections()? {
            if !name.starts_with(prefix) {
                continue;
            }
            match self.drop_collection(&name) {
                Ok(()) => dropped.push(name),
                Err(e) if e.is_namespace_not_found() => {}
                Err(e) => return Err(e),
            }
        }
        Ok(dropped)
    }
}

/// Returns the per-thread output collection name `<coll>_out_<workload>_<tid>`.
#[must_use]
pub fn out_collection_name(collection: &str, workload: &str, tid: Tid) -> String {
    format!("{}{}", workload_prefix(collection, workload), tid.get())
}

/// Returns the prefix shared by every output collection of a workload.
#[must_use]
pub fn workload_prefix(collection: &str, workload: &str) -> String {
    format!("{collection}_out_{workload}_")
}

/// Builds a filter document from `(field, value)` pairs.
#[must_use]
pub fn filter<I, K>(pairs: I) -> Document
where
    I: IntoIterator<Item = (K, Value)>,
    K: Into<String>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_error_codes() {
        let err = DbError::NamespaceNotFound {
            collection: "c".to_string(),
        };
        assert_eq!(err.code(), 26);
        assert!(err.is_namespace_not_found());
        assert!(!err.is_retryable());

        let err = DbError::WriteConflict {
            collection: "c".to_string(),
        };
        assert!(err.is_retryable());

        let err = DbError::Other {
            code: 42,
            message: "test".to_string(),
        };
        assert_eq!(err.code(), 42);
    }

    #[test]
    fn test_naming_convention() {
        let name = out_collection_name("coll", "agg_out", Tid::new(3));
        assert_eq!(name, "coll_out_agg_out_3");
        assert!(name.starts_with(&workload_prefix("coll", "agg_out")));
    }

    #[test]
    fn test_filter_builder() {
        let f = filter([("x", json!(1)), ("tid", json!(2))]);
        assert_eq!(f.len(), 2);
        assert_eq!(f.get("x"), Some(&json!(1)));
    }
}
