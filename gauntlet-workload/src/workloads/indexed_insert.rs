//! Concurrent inserts into an indexed field.
//!
//! Every client inserts documents carrying its own value in the indexed field
//! and periodically checks that lookups by tid and by indexed value both see
//! exactly the documents it inserted. The variants derive from the base with
//! [`extend_workload`](crate::extend_workload).

use std::convert::Infallible;

use serde_json::{json, Value};

use crate::config::{HookContext, StateError, WorkloadConfig};
use crate::database::{filter, Database, Document, IndexSpec};
use crate::executor::ThreadContext;
use crate::random::heterogeneous_value;
use crate::state_assert;

/// Name of the base workload.
pub const NAME: &str = "indexed_insert";
/// Name of the variant writing values of mixed types.
pub const HETEROGENEOUS_NAME: &str = "indexed_insert_heterogeneous";
/// Name of the variant that also deletes its documents.
pub const DELETE_NAME: &str = "indexed_insert_delete";

const INDEXED_FIELD: &str = "indexed_field";
const INDEXED_VALUE: &str = "indexed_value";
const INSERTED: &str = "n_inserted";

fn own_document(ctx: &ThreadContext) -> Result<Document, StateError> {
    let field = ctx.data.get_str(INDEXED_FIELD)?;
    let value = ctx.data.require(INDEXED_VALUE)?.clone();
    Ok(filter([
        (field, value),
        ("tid", json!(ctx.tid.get())),
    ]))
}

fn init(ctx: &mut ThreadContext, _: &dyn Database, _: &str) -> Result<(), StateError> {
    let value = Value::from(ctx.tid.get());
    ctx.data.set(INDEXED_VALUE, value);
    ctx.data.set(INSERTED, 0);
    Ok(())
}

fn insert(ctx: &mut ThreadContext, db: &dyn Database, coll: &str) -> Result<(), StateError> {
    let doc = own_document(ctx)?;
    db.insert_one(coll, doc)?;
    ctx.data.increment(INSERTED, 1)?;
    Ok(())
}

fn find(ctx: &mut ThreadContext, db: &dyn Database, coll: &str) -> Result<(), StateError> {
    let field = ctx.data.get_str(INDEXED_FIELD)?;
    let value = ctx.data.require(INDEXED_VALUE)?.clone();
    let expected = ctx.data.get_u64(INSERTED)?;

    let by_tid = db.count(coll, &filter([("tid", json!(ctx.tid.get()))]))?;
    state_assert!(
        by_tid == expected,
        "{}: expected {expected} documents by tid, found {by_tid}",
        ctx.tid
    );

    let by_value = db.count(coll, &filter([(field, value)]))?;
    state_assert!(
        by_value == expected,
        "{}: expected {expected} documents by indexed value, found {by_value}",
        ctx.tid
    );
    Ok(())
}

fn setup(ctx: &mut HookContext<'_>) -> Result<(), StateError> {
    let field = ctx.data.get_str(INDEXED_FIELD)?.to_string();
    ctx.db.create_index(ctx.collection, IndexSpec::new(field))?;
    Ok(())
}

fn teardown(ctx: &mut HookContext<'_>) -> Result<(), StateError> {
    let field = ctx.data.get_str(INDEXED_FIELD)?;
    let indexes = ctx.db.list_indexes(ctx.collection)?;
    StateError::check(
        indexes.iter().any(|index| index.field == field),
        format!("index on '{field}' disappeared"),
    )
}

/// The base workload: `init -> insert <-> find`.
#[must_use]
pub fn workload() -> WorkloadConfig {
    WorkloadConfig::builder(NAME)
        .thread_count(10)
        .iterations(50)
        .start_state("init")
        .data(INDEXED_FIELD, "x")
        .state("init", init)
        .state("insert", insert)
        .state("find", find)
        .transition("init", "insert", 1.0)
        .transition("insert", "find", 1.0)
        .transition("find", "insert", 1.0)
        .setup(setup)
        .teardown(teardown)
        .build()
}

/// Like the base, but each client writes an indexed value of a different type.
#[must_use]
pub fn heterogeneous() -> WorkloadConfig {
    let derived = workload().extend(|mut derived, base| {
        derived.name = HETEROGENEOUS_NAME.to_string();
        let base_init = base.state_fn("init");
        derived.set_state("init", move |ctx, db, coll| {
            if let Some(base_init) = &base_init {
                base_init(&mut *ctx, db, coll)?;
            }
            ctx.data.set(INDEXED_VALUE, heterogeneous_value(ctx.tid));
            Ok(())
        });
        Ok::<_, Infallible>(derived)
    });
    match derived {
        Ok(config) => config,
        Err(never) => match never {},
    }
}

fn remove(ctx: &mut ThreadContext, db: &dyn Database, coll: &str) -> Result<(), StateError> {
    let expected = ctx.data.get_u64(INSERTED)?;
    let deleted = db.delete_many(coll, &filter([("tid", json!(ctx.tid.get()))]))?;
    state_assert!(
        deleted == expected,
        "{}: deleted {deleted} documents, expected {expected}",
        ctx.tid
    );
    ctx.data.set(INSERTED, 0);
    Ok(())
}

/// Like the base, but clients sometimes delete everything they inserted.
#[must_use]
pub fn delete() -> WorkloadConfig {
    let mut derived = workload();
    derived.name = DELETE_NAME.to_string();
    derived.set_state("remove", remove);
    derived.set_transitions("insert", [("find", 0.8), ("remove", 0.2)]);
    derived.set_transitions("remove", [("insert", 1.0)]);
    derived
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_variants_do_not_touch_base() {
        let base = workload();
        let hetero = heterogeneous();
        let delete = delete();

        assert_eq!(hetero.name, HETEROGENEOUS_NAME);
        assert!(!Arc::ptr_eq(&base.states["init"], &hetero.states["init"]));
        assert!(!base.states.contains_key("remove"));
        assert!(delete.states.contains_key("remove"));
        assert_eq!(base.transitions["insert"].len(), 1);
    }

    #[test]
    fn test_all_variants_validate() {
        let limits = gauntlet_core::Limits::default();
        for config in [workload(), heterogeneous(), delete()] {
            assert!(config.validate(&limits).is_ok(), "{}", config.name);
        }
    }
}
