//! Concurrent collection create and drop.
//!
//! Clients race to create and drop a small, shared set of collections named
//! `<coll>_out_create_drop_<n>`. Losing a race is expected, so
//! `NamespaceExists` and `NamespaceNotFound` are tolerated.

use crate::config::{HookContext, StateError, WorkloadConfig};
use crate::database::{workload_prefix, Database};
use crate::executor::ThreadContext;
use crate::random::rand_range;
use crate::state_assert;

/// Workload name.
pub const NAME: &str = "create_drop";

const NUM_COLLECTIONS: &str = "num_collections";

fn pick(ctx: &mut ThreadContext, coll: &str) -> Result<String, StateError> {
    let count = ctx.data.get_i64(NUM_COLLECTIONS)?;
    let n = rand_range(&mut ctx.rng, 0, count - 1)?;
    Ok(format!("{}{n}", workload_prefix(coll, ctx.workload())))
}

fn create(ctx: &mut ThreadContext, db: &dyn Database, coll: &str) -> Result<(), StateError> {
    let name = pick(ctx, coll)?;
    match db.create_collection(&name) {
        Err(e) if !e.is_namespace_exists() => Err(e.into()),
        _ => Ok(()),
    }
}

fn drop_one(ctx: &mut ThreadContext, db: &dyn Database, coll: &str) -> Result<(), StateError> {
    let name = pick(ctx, coll)?;
    match db.drop_collection(&name) {
        Err(e) if !e.is_namespace_not_found() => Err(e.into()),
        _ => Ok(()),
    }
}

fn list(ctx: &mut ThreadContext, db: &dyn Database, coll: &str) -> Result<(), StateError> {
    let prefix = workload_prefix(coll, ctx.workload());
    let count = ctx.data.get_i64(NUM_COLLECTIONS)?;
    for name in db.list_collections()? {
        let Some(suffix) = name.strip_prefix(&prefix) else {
            continue;
        };
        let n: Option<i64> = suffix.parse().ok();
        state_assert!(
            n.is_some_and(|n| (0..count).contains(&n)),
            "unexpected collection {name}"
        );
    }
    Ok(())
}

fn teardown(ctx: &mut HookContext<'_>) -> Result<(), StateError> {
    let prefix = workload_prefix(ctx.collection, ctx.workload);
    ctx.db.drop_collections_with_prefix(&prefix)?;
    let remaining = ctx
        .db
        .list_collections()?
        .into_iter()
        .filter(|name| name.starts_with(&prefix))
        .count();
    StateError::check(remaining == 0, format!("{remaining} collections left behind"))
}

/// The workload.
#[must_use]
pub fn workload() -> WorkloadConfig {
    let next = [("create", 0.5), ("drop", 0.4), ("list", 0.1)];
    WorkloadConfig::builder(NAME)
        .thread_count(8)
        .iterations(40)
        .start_state("create")
        .data(NUM_COLLECTIONS, 5)
        .state("create", create)
        .state("drop", drop_one)
        .state("list", list)
        .transitions("create", next)
        .transitions("drop", next)
        .transitions("list", next)
        .teardown(teardown)
        .build()
}
