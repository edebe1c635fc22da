//! In-process database.
//!
//! Collections of JSON documents behind one reader/writer lock. Every call is
//! atomic with respect to every other call, which is enough to run workloads
//! without an external server and to check the harness itself.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde_json::Value;
use tracing::debug;

use crate::database::{Database, DbError, DbResult, Document, IndexSpec, Stage};

/// Field holding a document's primary key.
pub const ID_FIELD: &str = "_id";

#[derive(Debug, Default, Clone)]
struct Collection {
    documents: Vec<Document>,
    indexes: Vec<IndexSpec>,
}

impl Collection {
    /// Returns the first unique-index violation `candidate` would cause,
    /// ignoring the document at `skip`.
    fn violation(
        &self,
        name: &str,
        candidate: &Document,
        skip: Option<usize>,
    ) -> Option<DbError> {
        let unique_fields = std::iter::once(ID_FIELD).chain(
            self.indexes
                .iter()
                .filter(|index| index.unique)
                .map(|index| index.field.as_str()),
        );

        for field in unique_fields {
            let Some(value) = candidate.get(field) else {
                continue;
            };
            let clash = self
                .documents
                .iter()
                .enumerate()
                .any(|(i, doc)| Some(i) != skip && doc.get(field) == Some(value));
            if clash {
                return Some(DbError::DuplicateKey {
                    collection: name.to_string(),
                    field: field.to_string(),
                    value: value.to_string(),
                });
            }
        }
        None
    }
}

/// A database held entirely in memory.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    collections: RwLock<BTreeMap<String, Collection>>,
    next_id: AtomicU64,
}

impl MemoryDatabase {
    /// Creates an empty database.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> DbResult<RwLockReadGuard<'_, BTreeMap<String, Collection>>> {
        self.collections.read().map_err(|_| poisoned())
    }

    fn write(&self) -> DbResult<RwLockWriteGuard<'_, BTreeMap<String, Collection>>> {
        self.collections.write().map_err(|_| poisoned())
    }

    fn matching(collection: Option<&Collection>, filter: &Document) -> DbResult<Vec<Document>> {
        let Some(collection) = collection else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for doc in &collection.documents {
            if matches(doc, filter)? {
                out.push(doc.clone());
            }
        }
        Ok(out)
    }
}

fn poisoned() -> DbError {
    DbError::Other {
        code: 1,
        message: "memory database lock poisoned".to_string(),
    }
}

fn not_found(collection: &str) -> DbError {
    DbError::NamespaceNotFound {
        collection: collection.to_string(),
    }
}

impl Database for MemoryDatabase {
    fn create_collection(&self, collection: &str) -> DbResult<()> {
        let mut collections = self.write()?;
        if collections.contains_key(collection) {
            return Err(DbError::NamespaceExists {
                collection: collection.to_string(),
            });
        }
        collections.insert(collection.to_string(), Collection::default());
        debug!(collection, "created collection");
        Ok(())
    }

    fn drop_collection(&self, collection: &str) -> DbResult<()> {
        let mut collections = self.write()?;
        collections
            .remove(collection)
            .map(|_| debug!(collection, "dropped collection"))
            .ok_or_else(|| not_found(collection))
    }

    fn list_collections(&self) -> DbResult<Vec<String>> {
        Ok(self.read()?.keys().cloned().collect())
    }

    fn rename_collection(&self, from: &str, to: &str, drop_target: bool) -> DbResult<()> {
        let mut collections = self.write()?;
        if !collections.contains_key(from) {
            return Err(not_found(from));
        }
        if collections.contains_key(to) && !drop_target {
            return Err(DbError::NamespaceExists {
                collection: to.to_string(),
            });
        }
        let moved = collections.remove(from).ok_or_else(|| not_found(from))?;
        collections.insert(to.to_string(), moved);
        Ok(())
    }

    fn create_index(&self, collection: &str, index: IndexSpec) -> DbResult<()> {
        let mut collections = self.write()?;
        let coll = collections.entry(collection.to_string()).or_default();

        if let Some(existing) = coll.indexes.iter().find(|i| i.field == index.field) {
            if existing.unique == index.unique {
                return Ok(());
            }
            return Err(DbError::IndexConflict {
                collection: collection.to_string(),
                field: index.field,
            });
        }

        if index.unique {
            let mut seen: Vec<&Value> = Vec::new();
            for doc in &coll.documents {
                if let Some(value) = doc.get(&index.field) {
                    if seen.contains(&value) {
                        return Err(DbError::DuplicateKey {
                            collection: collection.to_string(),
                            field: index.field,
                            value: value.to_string(),
                        });
                    }
                    seen.push(value);
                }
            }
        }

        coll.indexes.push(index);
        Ok(())
    }

    fn drop_index(&self, collection: &str, field: &str) -> DbResult<()> {
        let mut collections = self.write()?;
        let coll = collections
            .get_mut(collection)
            .ok_or_else(|| not_found(collection))?;
        let before = coll.indexes.len();
        coll.indexes.retain(|index| index.field != field);
        if coll.indexes.len() == before {
            return Err(DbError::IndexNotFound {
                collection: collection.to_string(),
                field: field.to_string(),
            });
        }
        Ok(())
    }

    fn list_indexes(&self, collection: &str) -> DbResult<Vec<IndexSpec>> {
        self.read()?
            .get(collection)
            .map(|coll| coll.indexes.clone())
            .ok_or_else(|| not_found(collection))
    }

    fn insert_one(&self, collection: &str, mut document: Document) -> DbResult<Value> {
        if !document.contains_key(ID_FIELD) {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            document.insert(ID_FIELD.to_string(), Value::from(id));
        }
        let id = document.get(ID_FIELD).cloned().unwrap_or(Value::Null);

        let mut collections = self.write()?;
        let coll = collections.entry(collection.to_string()).or_default();
        if let Some(err) = coll.violation(collection, &document, None) {
            return Err(err);
        }
        coll.documents.push(document);
        Ok(id)
    }

    fn find(&self, collection: &str, filter: &Document) -> DbResult<Vec<Document>> {
        let collections = self.read()?;
        Self::matching(collections.get(collection), filter)
    }

    fn update_many(&self, collection: &str, filter: &Document, update: &Document) -> DbResult<u64> {
        if update.contains_key(ID_FIELD) {
            return Err(DbError::BadQuery {
                message: "cannot modify _id".to_string(),
            });
        }

        let mut collections = self.write()?;
        let Some(coll) = collections.get_mut(collection) else {
            return Ok(0);
        };

        // Apply to a copy so a unique-index violation leaves the collection untouched.
        let mut staged = coll.clone();
        let mut modified = 0u64;
        for i in 0..staged.documents.len() {
            if !matches(&staged.documents[i], filter)? {
                continue;
            }
            for (field, value) in update {
                staged.documents[i].insert(field.clone(), value.clone());
            }
            let candidate = staged.documents[i].clone();
            if let Some(err) = staged.violation(collection, &candidate, Some(i)) {
                return Err(err);
            }
            modified += 1;
        }

        *coll = staged;
        Ok(modified)
    }

    fn delete_many(&self, collection: &str, filter: &Document) -> DbResult<u64> {
        let mut collections = self.write()?;
        let Some(coll) = collections.get_mut(collection) else {
            return Ok(0);
        };

        let mut doomed = Vec::with_capacity(coll.documents.len());
        for doc in &coll.documents {
            doomed.push(matches(doc, filter)?);
        }
        let mut verdicts = doomed.iter();
        coll.documents.retain(|_| !verdicts.next().copied().unwrap_or(false));
        Ok(doomed.iter().filter(|d| **d).count() as u64)
    }

    fn aggregate(&self, collection: &str, pipeline: &[Stage]) -> DbResult<Vec<Document>> {
        let out_target = match pipeline.split_last() {
            Some((Stage::Out(target), rest)) => {
                if rest.iter().any(|stage| matches!(stage, Stage::Out(_))) {
                    return Err(DbError::BadQuery {
                        message: "$out must be the last stage".to_string(),
                    });
                }
                Some(target.as_str())
            }
            _ => {
                if pipeline.iter().any(|stage| matches!(stage, Stage::Out(_))) {
                    return Err(DbError::BadQuery {
                        message: "$out must be the last stage".to_string(),
                    });
                }
                None
            }
        };

        let mut collections = self.write()?;
        let mut docs = Self::matching(collections.get(collection), &Document::new())?;

        for stage in pipeline {
            match stage {
                Stage::Match(filter) => {
                    let mut kept = Vec::with_capacity(docs.len());
                    for doc in docs {
                        if matches(&doc, filter)? {
                            kept.push(doc);
                        }
                    }
                    docs = kept;
                }
                Stage::Sort { field, ascending } => {
                    docs.sort_by(|a, b| {
                        let ord = compare_optional(a.get(field), b.get(field));
                        if *ascending {
                            ord
                        } else {
                            ord.reverse()
                        }
                    });
                }
                Stage::Limit(n) => docs.truncate(*n),
                Stage::Out(_) => {}
            }
        }

        let Some(target) = out_target else {
            return Ok(docs);
        };

        let indexes = collections
            .get(target)
            .map(|coll| coll.indexes.clone())
            .unwrap_or_default();
        let mut replacement = Collection {
            documents: Vec::with_capacity(docs.len()),
            indexes,
        };
        for doc in docs {
            if let Some(err) = replacement.violation(target, &doc, None) {
                return Err(err);
            }
            replacement.documents.push(doc);
        }
        collections.insert(target.to_string(), replacement);
        debug!(collection, target, "aggregation wrote output collection");
        Ok(Vec::new())
    }
}

/// Returns true if `doc` satisfies every clause of `filter`.
///
/// A clause is either `field: value` (equality) or `field: {op: operand}`
/// with `$eq`, `$ne`, `$gt`, `$gte`, `$lt`, `$lte`, `$in` or `$exists`.
///
/// # Errors
/// Returns `BadQuery` for unknown operators or malformed operands.
pub fn matches(doc: &Document, filter: &Document) -> DbResult<bool> {
    for (field, condition) in filter {
        let actual = doc.get(field);
        let ok = match condition {
            Value::Object(ops) if ops.keys().any(|k| k.starts_with('$')) => {
                let mut all = true;
                for (op, operand) in ops {
                    if !apply_operator(op, actual, operand)? {
                        all = false;
                        break;
                    }
                }
                all
            }
            expected => actual == Some(expected),
        };
        if !ok {
            return Ok(false);
        }
    }
    Ok(true)
}

fn apply_operator(op: &str, actual: Option<&Value>, operand: &Value) -> DbResult<bool> {
    let ordered = |accept: fn(CmpOrdering) -> bool| -> bool {
        actual
            .and_then(|value| compare(value, operand))
            .is_some_and(accept)
    };

    match op {
        "$eq" => Ok(actual == Some(operand)),
        "$ne" => Ok(actual != Some(operand)),
        "$gt" => Ok(ordered(|o| o == CmpOrdering::Greater)),
        "$gte" => Ok(ordered(|o| o != CmpOrdering::Less)),
        "$lt" => Ok(ordered(|o| o == CmpOrdering::Less)),
        "$lte" => Ok(ordered(|o| o != CmpOrdering::Greater)),
        "$in" => {
            let Value::Array(candidates) = operand else {
                return Err(DbError::BadQuery {
                    message: "$in needs an array".to_string(),
                });
            };
            Ok(actual.is_some_and(|value| candidates.contains(value)))
        }
        "$exists" => {
            let Value::Bool(wanted) = operand else {
                return Err(DbError::BadQuery {
                    message: "$exists needs a boolean".to_string(),
                });
            };
            Ok(actual.is_some() == *wanted)
        }
        other => Err(DbError::BadQuery {
            message: format!("unknown operator {other}"),
        }),
    }
}

/// Orders two values of the same scalar kind; other pairs are incomparable.
fn compare(a: &Value, b: &Value) -> Option<CmpOrdering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Total order for sorting: missing < null < incomparable kinds < comparable values.
fn compare_optional(a: Option<&Value>, b: Option<&Value>) -> CmpOrdering {
    match (a, b) {
        (None, None) => CmpOrdering::Equal,
        (None, Some(_)) => CmpOrdering::Less,
        (Some(_), None) => CmpOrdering::Greater,
        (Some(x), Some(y)) => compare(x, y).unwrap_or_else(|| kind_rank(x).cmp(&kind_rank(y))),
    }
}

const fn kind_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Number(_) => 1,
        Value::String(_) => 2,
        Value::Object(_) => 3,
        Value::Array(_) => 4,
        Value::Bool(_) => 5,
    }
}
