//! FSM executor: one simulated client.
//!
//! An executor owns a [`ThreadContext`] and runs on its own blocking thread.
//! Each step calls the current state's function, then draws the next state
//! from the shared [`TransitionTable`] with the executor's private random
//! stream. The only state shared with other executors is read-only, plus the
//! cancellation flag and a progress record the controller reads on timeout.

use std::any::Any;
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use gauntlet_core::{Limits, StateId, Tid};
use rand_chacha::ChaCha8Rng;
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::{ConfigError, StateError, StateFn, WorkloadConfig};
use crate::data::Data;
use crate::database::Database;
use crate::report::{latency_histogram, ExecutionResult, ExecutorFailure};
use crate::transition::TransitionTable;

/// Why an executor stopped before finishing its iterations.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StepError {
    /// The state function returned an error.
    #[error(transparent)]
    State(#[from] StateError),

    /// The current state has no transition with positive weight.
    #[error("no viable transition out of state '{state}'")]
    NoViableTransition {
        /// The stuck state.
        state: String,
    },

    /// The run was cancelled and the executor stopped between steps.
    #[error("cancelled")]
    Cancelled,

    /// The executor was still running when the cancellation grace period ended.
    #[error("timed out")]
    TimedOut,

    /// The state function panicked.
    #[error("panicked: {message}")]
    Panicked {
        /// Panic payload, when it was a string.
        message: String,
    },
}

/// Per-executor state, passed to every state function.
#[derive(Debug)]
pub struct ThreadContext {
    /// Simulated client id, unique in `[0, thread_count)`.
    pub tid: Tid,
    /// Private copy of the workload data.
    pub data: Data,
    /// Private random stream.
    pub rng: ChaCha8Rng,
    workload: Arc<str>,
    thread_count: u32,
    state: String,
    iteration: u64,
    iterations: u64,
}

impl ThreadContext {
    /// Creates a context for executor `tid`.
    #[must_use]
    pub fn new(
        tid: Tid,
        workload: impl Into<Arc<str>>,
        thread_count: u32,
        iterations: u64,
        data: Data,
        rng: ChaCha8Rng,
    ) -> Self {
        Self {
            tid,
            data,
            rng,
            workload: workload.into(),
            thread_count,
            state: String::new(),
            iteration: 0,
            iterations,
        }
    }

    /// Returns the running workload's name.
    #[must_use]
    pub fn workload(&self) -> &str {
        &self.workload
    }

    /// Returns the number of executors in the run.
    #[must_use]
    pub const fn thread_count(&self) -> u32 {
        self.thread_count
    }

    /// Returns the name of the state being executed.
    #[must_use]
    pub fn state(&self) -> &str {
        &self.state
    }

    /// Returns the zero-based index of the current step.
    #[must_use]
    pub const fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Returns the number of steps left after the current one.
    #[must_use]
    pub const fn remaining(&self) -> u64 {
        self.iterations.saturating_sub(self.iteration + 1)
    }
}

/// A validated workload in executable form, shared by every executor of a run.
pub struct CompiledWorkload {
    name: Arc<str>,
    table: TransitionTable,
    /// Indexed by `StateId`.
    states: Vec<StateFn>,
    start: StateId,
    thread_count: u32,
    iterations: u64,
}

impl std::fmt::Debug for CompiledWorkload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledWorkload")
            .field("name", &self.name)
            .field("table", &self.table)
            .field("start", &self.start)
            .field("thread_count", &self.thread_count)
            .field("iterations", &self.iterations)
            .finish_non_exhaustive()
    }
}

impl CompiledWorkload {
    /// Validates `config` and compiles it.
    ///
    /// # Errors
    /// Returns the first configuration error found.
    pub fn compile(config: &WorkloadConfig, limits: &Limits) -> Result<Self, ConfigError> {
        config.validate(limits)?;

        let table = TransitionTable::build(config.states.keys(), &config.transitions);
        // BTreeMap order matches the table's name order.
        let states: Vec<StateFn> = config.states.values().cloned().collect();

        let start = config
            .initial_state()
            .and_then(|name| table.state_id(name))
            .ok_or_else(|| ConfigError::NoStates {
                workload: config.name.clone(),
            })?;

        Ok(Self {
            name: Arc::from(config.name.as_str()),
            table,
            states,
            start,
            thread_count: config.thread_count,
            iterations: config.iterations,
        })
    }

    /// Returns the workload name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the transition table.
    #[must_use]
    pub const fn table(&self) -> &TransitionTable {
        &self.table
    }

    /// Returns the initial state.
    #[must_use]
    pub const fn start(&self) -> StateId {
        self.start
    }

    /// Returns the number of executors to spawn.
    #[must_use]
    pub const fn thread_count(&self) -> u32 {
        self.thread_count
    }

    /// Returns the steps each executor takes.
    #[must_use]
    pub const fn iterations(&self) -> u64 {
        self.iterations
    }

    /// Returns the name of `state`, or an empty string for an unknown id.
    #[must_use]
    pub fn state_name(&self, state: StateId) -> &str {
        self.table.state_name(state).unwrap_or_default()
    }
}

/// Where an executor is, readable by the controller while it runs.
#[derive(Debug, Default)]
pub struct ExecutorProgress {
    state: AtomicUsize,
    iteration: AtomicU64,
    steps: AtomicU64,
}

impl ExecutorProgress {
    /// Creates a progress record positioned at `start`.
    #[must_use]
    pub fn new(start: StateId) -> Self {
        Self {
            state: AtomicUsize::new(start.index()),
            iteration: AtomicU64::new(0),
            steps: AtomicU64::new(0),
        }
    }

    fn enter(&self, state: StateId, iteration: u64) {
        self.state.store(state.index(), Ordering::Relaxed);
        self.iteration.store(iteration, Ordering::Relaxed);
    }

    fn complete_step(&self) {
        self.steps.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the state being executed.
    #[must_use]
    pub fn state(&self) -> StateId {
        StateId::from_index(self.state.load(Ordering::Relaxed))
    }

    /// Returns the index of the step being executed.
    #[must_use]
    pub fn iteration(&self) -> u64 {
        self.iteration.load(Ordering::Relaxed)
    }

    /// Returns the number of completed steps.
    #[must_use]
    pub fn steps(&self) -> u64 {
        self.steps.load(Ordering::Relaxed)
    }
}

/// Runs one simulated client to completion.
pub struct Executor {
    workload: Arc<CompiledWorkload>,
    db: Arc<dyn Database>,
    collection: Arc<str>,
    cancel: Arc<AtomicBool>,
    progress: Arc<ExecutorProgress>,
}

impl Executor {
    /// Creates an executor.
    #[must_use]
    pub fn new(
        workload: Arc<CompiledWorkload>,
        db: Arc<dyn Database>,
        collection: Arc<str>,
        cancel: Arc<AtomicBool>,
        progress: Arc<ExecutorProgress>,
    ) -> Self {
        Self {
            workload,
            db,
            collection,
            cancel,
            progress,
        }
    }

    /// Takes `iterations` steps, stopping at the first failure or on cancellation.
    ///
    /// Blocks the calling thread. Panics raised by state functions are caught
    /// and reported as [`StepError::Panicked`].
    #[must_use]
    pub fn run(self, mut ctx: ThreadContext) -> ExecutionResult {
        let started = Instant::now();
        let workload = &*self.workload;
        let mut latencies = latency_histogram();
        let mut visits: BTreeMap<String, u64> = BTreeMap::new();
        let mut current = workload.start;
        let mut steps = 0u64;

        debug!(tid = %ctx.tid, workload = %workload.name, "executor started");

        let outcome = loop {
            if steps == workload.iterations {
                break Ok(());
            }
            let name = workload.state_name(current);
            if self.cancel.load(Ordering::Acquire) {
                break Err(self.failure(&ctx, name, steps, StepError::Cancelled));
            }

            self.progress.enter(current, steps);
            ctx.state.clear();
            ctx.state.push_str(name);
            ctx.iteration = steps;

            let Some(state_fn) = workload.states.get(current.index()) else {
                break Err(self.failure(
                    &ctx,
                    name,
                    steps,
                    StepError::NoViableTransition {
                        state: name.to_string(),
                    },
                ));
            };

            let step_started = Instant::now();
            let result = catch_unwind(AssertUnwindSafe(|| {
                state_fn(&mut ctx, self.db.as_ref(), &*self.collection)
            }));
            #[allow(clippy::cast_possible_truncation)] // A step never takes 2^64 microseconds.
            let _ = latencies.record(step_started.elapsed().as_micros() as u64);

            match result {
                Ok(Ok(())) => {}
                Ok(Err(e)) => break Err(self.failure(&ctx, name, steps, StepError::State(e))),
                Err(payload) => {
                    let error = StepError::Panicked {
                        message: panic_message(payload.as_ref()),
                    };
                    break Err(self.failure(&ctx, name, steps, error));
                }
            }

            steps += 1;
            self.progress.complete_step();
            *visits.entry(name.to_string()).or_default() += 1;

            match workload.table.sample(current, &mut ctx.rng) {
                Some(next) => current = next,
                None => {
                    let error = StepError::NoViableTransition {
                        state: name.to_string(),
                    };
                    break Err(self.failure(&ctx, name, steps, error));
                }
            }
        };

        if outcome.is_ok() {
            debug!(tid = %ctx.tid, steps, "executor finished");
        }

        ExecutionResult {
            tid: ctx.tid,
            steps,
            visits,
            latencies,
            elapsed: started.elapsed(),
            outcome,
        }
    }

    fn failure(&self, ctx: &ThreadContext, state: &str, iteration: u64, error: StepError) -> ExecutorFailure {
        warn!(
            tid = %ctx.tid,
            workload = %self.workload.name,
            state,
            iteration,
            error = %error,
            "executor failed"
        );
        ExecutorFailure {
            tid: ctx.tid,
            state: state.to_string(),
            iteration,
            error,
        }
    }
}

/// Extracts the message of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
