//! Gauntlet Workload: concurrent FSM workloads against a shared database
//!
//! A workload is a finite state machine run by many simulated clients at once.
//! Each client takes a fixed number of steps; every step runs the current
//! state's function against the database and then draws the next state from a
//! weighted transition table. The harness surfaces concurrency bugs by
//! reporting every client whose assertions fail.
//!
//! # Architecture
//!
//! - [`WorkloadConfig`] defines states, transitions, data and hooks;
//!   [`extend_workload`] derives variants without touching the base.
//! - [`Harness::run`] validates, runs setup, spawns one [`Executor`] per client
//!   on tokio's blocking pool, joins them under an optional wall-clock cap,
//!   runs teardown and returns a [`RunReport`].
//! - [`SuiteRunner`] runs a selection of registered workloads one after
//!   another, configured by a [`HarnessProfile`].
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use gauntlet_workload::{Harness, MemoryDatabase, RunOptions, WorkloadConfig};
//!
//! let config = WorkloadConfig::builder("ping_pong")
//!     .thread_count(5)
//!     .iterations(10)
//!     .state("a", |_, _, _| Ok(()))
//!     .state("b", |_, _, _| Ok(()))
//!     .transition("a", "b", 1.0)
//!     .transition("b", "a", 1.0)
//!     .build();
//!
//! let harness = Harness::new(RunOptions::new().seed(42));
//! let report = harness.run(&config, Arc::new(MemoryDatabase::new()), "coll").await?;
//!
//! report.stats().print_summary();
//! assert!(report.is_success());
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]

mod config;
mod data;
mod database;
mod executor;
mod lifecycle;
mod memory;
mod report;
mod transition;

pub mod profiles;
pub mod random;
pub mod suite;
pub mod workloads;

pub use config::{
    extend_workload, ClusterInfo, ConfigError, HookContext, HookFn, StateError, StateFn, Topology,
    WorkloadBuilder, WorkloadConfig,
};
pub use data::{Data, DataError};
pub use database::{
    filter, out_collection_name, workload_prefix, Database, DbError, DbResult, Document,
    IndexSpec, Stage,
};
pub use executor::{CompiledWorkload, Executor, ExecutorProgress, StepError, ThreadContext};
pub use lifecycle::{Harness, RunError, RunOptions};
pub use memory::{matches, MemoryDatabase, ID_FIELD};
pub use report::{
    latency_histogram, ExecutionResult, ExecutorFailure, HookError, RunFailure, RunReport,
    RunStats,
};
pub use transition::TransitionTable;

// Re-export suite and profile types.
pub use profiles::{HarnessProfile, ProfileError};
pub use random::RandomError;
pub use suite::{SuiteReport, SuiteRunner, SuiteSelection, WorkloadRegistry};
pub use workloads::builtin_registry;
