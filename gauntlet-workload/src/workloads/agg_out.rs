//! Aggregations writing to per-client output collections.
//!
//! Setup fills the workload collection. Each client repeatedly runs a
//! `$match` + `$out` pipeline into `<coll>_out_agg_out_<tid>`, checks the
//! output, and sometimes drops it. Teardown removes every output collection
//! by prefix.

use serde_json::json;

use crate::config::{HookContext, StateError, WorkloadConfig};
use crate::database::{filter, out_collection_name, workload_prefix, Database, Document, Stage};
use crate::executor::ThreadContext;
use crate::random::random_string;
use crate::state_assert;

/// Workload name.
pub const NAME: &str = "agg_out";

const NUM_DOCS: &str = "num_docs";
const EXPECTED_OUT: &str = "expected_out";

fn matching_pipeline(out: &str) -> Vec<Stage> {
    vec![
        Stage::Match(filter([("flag", json!(true))])),
        Stage::Out(out.to_string()),
    ]
}

fn setup(ctx: &mut HookContext<'_>) -> Result<(), StateError> {
    let num_docs = ctx.data.get_u64(NUM_DOCS)?;
    let mut flagged = 0u64;
    let docs: Vec<Document> = (0..num_docs)
        .map(|i| {
            let flag = i % 2 == 0;
            flagged += u64::from(flag);
            filter([
                ("i", json!(i)),
                ("flag", json!(flag)),
                ("pad", json!(random_string(&mut *ctx.rng, 16))),
            ])
        })
        .collect();
    ctx.db.insert_many(ctx.collection, docs)?;
    ctx.data.set(EXPECTED_OUT, flagged);
    Ok(())
}

fn query(ctx: &mut ThreadContext, db: &dyn Database, coll: &str) -> Result<(), StateError> {
    let out = out_collection_name(coll, ctx.workload(), ctx.tid);
    let returned = db.aggregate(coll, &matching_pipeline(&out))?;
    state_assert!(returned.is_empty(), "$out pipeline returned {} documents", returned.len());

    let expected = ctx.data.get_u64(EXPECTED_OUT)?;
    let written = db.count(&out, &Document::new())?;
    state_assert!(
        written == expected,
        "{out}: expected {expected} documents, found {written}"
    );
    Ok(())
}

fn top(ctx: &mut ThreadContext, db: &dyn Database, coll: &str) -> Result<(), StateError> {
    let num_docs = ctx.data.get_u64(NUM_DOCS)?;
    let pipeline = [
        Stage::Sort {
            field: "i".to_string(),
            ascending: false,
        },
        Stage::Limit(1),
    ];
    let docs = db.aggregate(coll, &pipeline)?;
    let first = docs.first().and_then(|doc| doc.get("i")).and_then(serde_json::Value::as_u64);
    state_assert!(
        first == num_docs.checked_sub(1),
        "largest i is {first:?}, expected {}",
        num_docs.saturating_sub(1)
    );
    Ok(())
}

fn drop_out(ctx: &mut ThreadContext, db: &dyn Database, coll: &str) -> Result<(), StateError> {
    let out = out_collection_name(coll, ctx.workload(), ctx.tid);
    match db.drop_collection(&out) {
        Ok(()) => Ok(()),
        Err(e) if e.is_namespace_not_found() => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn teardown(ctx: &mut HookContext<'_>) -> Result<(), StateError> {
    let prefix = workload_prefix(ctx.collection, ctx.workload);
    ctx.db.drop_collections_with_prefix(&prefix)?;

    let leftovers: Vec<String> = ctx
        .db
        .list_collections()?
        .into_iter()
        .filter(|name| name.starts_with(&prefix))
        .collect();
    StateError::check(
        leftovers.is_empty(),
        format!("output collections left behind: {leftovers:?}"),
    )
}

/// The workload.
#[must_use]
pub fn workload() -> WorkloadConfig {
    WorkloadConfig::builder(NAME)
        .thread_count(5)
        .iterations(20)
        .start_state("query")
        .data(NUM_DOCS, 100)
        .state("query", query)
        .state("top", top)
        .state("drop_out", drop_out)
        .transitions("query", [("query", 0.2), ("top", 0.4), ("drop_out", 0.4)])
        .transitions("top", [("query", 1.0)])
        .transitions("drop_out", [("query", 1.0)])
        .setup(setup)
        .teardown(teardown)
        .build()
}
