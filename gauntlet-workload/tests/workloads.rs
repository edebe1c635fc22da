//! Built-in workloads and suites against the in-process database.

use std::convert::Infallible;
use std::sync::Arc;

use gauntlet_workload::profiles::{load_profile, ScaleSection};
use gauntlet_workload::workloads::{agg_out, create_drop, indexed_insert};
use gauntlet_workload::{
    builtin_registry, extend_workload, filter, workload_prefix, Database, Harness, MemoryDatabase,
    RunOptions, StateError, SuiteRunner, SuiteSelection, WorkloadConfig, WorkloadRegistry,
};
use serde_json::json;

fn small_scale() -> ScaleSection {
    ScaleSection {
        threads: Some(4),
        iterations: Some(25),
        ..ScaleSection::default()
    }
}

fn leftovers(db: &MemoryDatabase, prefix: &str) -> Vec<String> {
    db.list_collections()
        .unwrap()
        .into_iter()
        .filter(|name| name.starts_with(prefix))
        .collect()
}

#[tokio::test]
async fn test_builtins_pass() {
    let runner = SuiteRunner::new(builtin_registry())
        .scale(small_scale())
        .options(RunOptions::new().seed(11));
    let db = Arc::new(MemoryDatabase::new());

    let report = runner.run(db.clone()).await.unwrap();

    assert_eq!(report.entries.len(), builtin_registry().len());
    for entry in &report.entries {
        let run = entry.outcome.as_ref().unwrap();
        assert!(
            entry.is_success(),
            "{}: {:?} teardown {:?}",
            entry.workload,
            run.failures().collect::<Vec<_>>(),
            run.teardown
        );
        assert_eq!(run.results.len(), 4);
    }
    assert!(report.is_success());
    assert!(leftovers(&db, "gauntlet_").is_empty());
}

#[tokio::test]
async fn test_builtins_pass_at_default_scale() {
    for name in [agg_out::NAME, indexed_insert::NAME, indexed_insert::DELETE_NAME] {
        let config = builtin_registry().get(name).unwrap();
        let report = Harness::new(RunOptions::new().seed(3))
            .run(&config, Arc::new(MemoryDatabase::new()), "fsm")
            .await
            .unwrap();
        assert!(report.is_success(), "{name}: {:?}", report.into_result().unwrap_err());
    }
}

#[tokio::test]
async fn test_sequential_workloads_leave_nothing_behind() {
    let db = Arc::new(MemoryDatabase::new());
    let harness = Harness::new(RunOptions::new().seed(21));

    for (name, config) in [
        (agg_out::NAME, agg_out::workload()),
        (create_drop::NAME, create_drop::workload()),
    ] {
        let collection = format!("fsm_{name}");
        let report = harness.run(&config, db.clone(), &collection).await.unwrap();
        assert!(report.is_success(), "{name}: {:?}", report.into_result().unwrap_err());
        assert!(leftovers(&db, &workload_prefix(&collection, name)).is_empty(), "{name}");
    }

    // The workload collection itself belongs to the caller.
    assert!(db
        .list_collections()
        .unwrap()
        .contains(&"fsm_agg_out".to_string()));
}

#[tokio::test]
async fn test_agg_out_writes_per_client_collections() {
    let mut config = agg_out::workload();
    config.teardown = None;
    config.iterations = 1;
    let db = Arc::new(MemoryDatabase::new());

    let report = Harness::new(RunOptions::new())
        .run(&config, db.clone(), "fsm")
        .await
        .unwrap();

    assert!(report.is_success());
    let mut outputs = leftovers(&db, &workload_prefix("fsm", agg_out::NAME));
    outputs.sort();
    let expected: Vec<String> = (0..config.thread_count)
        .map(|tid| format!("fsm_out_agg_out_{tid}"))
        .collect();
    assert_eq!(outputs, expected);
}

#[tokio::test]
async fn test_extended_workload_runs_its_own_states() {
    let base = indexed_insert::workload();
    let variant = extend_workload(&base, |mut config, _| {
        config.name = "indexed_insert_checked".to_string();
        config.set_state("find", |ctx, db, coll| {
            let count = db.count(coll, &filter([("tid", json!(ctx.tid.get()))]))?;
            StateError::check(count == ctx.data.get_u64("n_inserted")?, "lost an insert")
        });
        Ok::<_, Infallible>(config)
    })
    .unwrap();

    let report = Harness::new(RunOptions::new().seed(4))
        .run(&variant, Arc::new(MemoryDatabase::new()), "fsm")
        .await
        .unwrap();
    assert!(report.is_success());
    assert_eq!(report.workload, "indexed_insert_checked");
    assert_eq!(base.name, indexed_insert::NAME);
}

#[tokio::test]
async fn test_selection_limits_what_runs() {
    let selection = SuiteSelection {
        include: vec![
            indexed_insert::NAME.to_string(),
            indexed_insert::DELETE_NAME.to_string(),
            create_drop::NAME.to_string(),
        ],
        exclude: vec![create_drop::NAME.to_string()],
    };
    let runner = SuiteRunner::new(builtin_registry())
        .selection(selection)
        .scale(small_scale());

    let report = runner.run(Arc::new(MemoryDatabase::new())).await.unwrap();

    let ran: Vec<&str> = report.entries.iter().map(|e| e.workload.as_str()).collect();
    assert_eq!(ran, [indexed_insert::NAME, indexed_insert::DELETE_NAME]);
    assert!(report.is_success());
}

#[tokio::test]
async fn test_failing_workload_does_not_stop_suite() {
    fn broken() -> WorkloadConfig {
        WorkloadConfig::builder("broken")
            .thread_count(2)
            .iterations(2)
            .state("fail", |_, _, _| Err(StateError::assertion("always")))
            .transition("fail", "fail", 1.0)
            .build()
    }

    let mut registry = WorkloadRegistry::new();
    registry.register("broken", broken).unwrap();
    registry.register(agg_out::NAME, agg_out::workload).unwrap();

    let runner = SuiteRunner::new(registry).db_prefix("suite").scale(small_scale());
    let db = Arc::new(MemoryDatabase::new());
    let report = runner.run(db.clone()).await.unwrap();

    assert!(!report.is_success());
    assert_eq!(report.entries.len(), 2);
    assert_eq!(report.failed().collect::<Vec<_>>(), ["broken"]);
    assert_eq!(report.entries[0].collection, "suite_agg_out");
    assert!(report.entries[0].is_success());
    assert!(leftovers(&db, "suite_").is_empty());
}

#[tokio::test]
async fn test_smoke_profile_runs_everything() {
    let profile = load_profile("smoke").unwrap();
    let runner = SuiteRunner::from_profile(builtin_registry(), &profile);

    let report = runner.run(Arc::new(MemoryDatabase::new())).await.unwrap();

    assert!(report.is_success());
    for entry in &report.entries {
        let run = entry.outcome.as_ref().unwrap();
        assert_eq!(run.results.len(), 2);
        assert!(run.results.iter().all(|r| r.steps == 10));
    }
}
