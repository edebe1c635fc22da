//! Lifecycle controller.
//!
//! [`Harness::run`] drives one workload through validate, setup, spawn, join,
//! teardown and report. Executors run on tokio's blocking pool; the
//! controller itself only awaits them.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use gauntlet_core::{Limits, Tid};
use thiserror::Error;
use tokio::task::JoinSet;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::config::{ClusterInfo, ConfigError, HookContext, HookFn, StateError, WorkloadConfig};
use crate::data::Data;
use crate::database::Database;
use crate::executor::{panic_message, CompiledWorkload, Executor, ExecutorProgress, StepError, ThreadContext};
use crate::random::{executor_stream, seeded_stream, SETUP_STREAM, TEARDOWN_STREAM};
use crate::report::{ExecutionResult, HookError, RunReport};

/// Errors that prevent a run from producing a report.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RunError {
    /// The workload definition is invalid.
    #[error("invalid workload: {0}")]
    Config(#[from] ConfigError),

    /// Setup returned an error. No executor was started.
    #[error("setup failed: {0}")]
    Setup(StateError),

    /// Setup panicked. No executor was started.
    #[error("setup panicked: {message}")]
    SetupPanicked {
        /// Panic payload, when it was a string.
        message: String,
    },

    /// The async runtime failed to run a task.
    #[error("runtime error: {message}")]
    Runtime {
        /// Description of the failure.
        message: String,
    },
}

/// Options for one run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Seed for every random stream of the run.
    pub seed: u64,
    /// Wall-clock cap on the executor phase.
    pub timeout: Option<Duration>,
    /// How long cancelled executors get to stop before they are reported as timed out.
    pub cancel_grace: Duration,
    /// Deployment description handed to hooks.
    pub cluster: ClusterInfo,
    /// Bounds checked during validation.
    pub limits: Limits,
}

impl Default for RunOptions {
    fn default() -> Self {
        let limits = Limits::default();
        Self {
            seed: 0,
            timeout: None,
            cancel_grace: Duration::from_micros(limits.cancel_grace_us),
            cluster: ClusterInfo::default(),
            limits,
        }
    }
}

impl RunOptions {
    /// Creates default options.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the seed.
    #[must_use]
    pub const fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the wall-clock cap.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Sets the cancellation grace period.
    #[must_use]
    pub const fn cancel_grace(mut self, grace: Duration) -> Self {
        self.cancel_grace = grace;
        self
    }

    /// Sets the cluster description.
    #[must_use]
    pub const fn cluster(mut self, cluster: ClusterInfo) -> Self {
        self.cluster = cluster;
        self
    }

    /// Sets the limits.
    #[must_use]
    pub const fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    fn check_timeout(&self) -> Result<(), ConfigError> {
        let Some(timeout) = self.timeout else {
            return Ok(());
        };
        #[allow(clippy::cast_possible_truncation)] // Saturates far above any sane cap.
        let actual = timeout.as_micros().min(u128::from(u64::MAX)) as u64;
        if actual > self.limits.max_run_timeout_us {
            return Err(ConfigError::LimitExceeded(gauntlet_core::Error::LimitExceeded {
                limit: "max_run_timeout_us",
                max: self.limits.max_run_timeout_us,
                actual,
            }));
        }
        Ok(())
    }
}

/// Runs workloads.
#[derive(Debug, Clone, Default)]
pub struct Harness {
    options: RunOptions,
}

/// Which hook a blocking task runs.
#[derive(Debug, Clone, Copy)]
enum Hook {
    Setup,
    Teardown,
}

impl Hook {
    const fn stream(self) -> u64 {
        match self {
            Self::Setup => SETUP_STREAM,
            Self::Teardown => TEARDOWN_STREAM,
        }
    }
}

impl Harness {
    /// Creates a harness.
    #[must_use]
    pub const fn new(options: RunOptions) -> Self {
        Self { options }
    }

    /// Returns the run options.
    #[must_use]
    pub const fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Runs `config` against `db`, using `collection` as the workload's collection.
    ///
    /// Setup runs once before any executor starts. Exactly `thread_count`
    /// executors are spawned with tids `0..thread_count`. Teardown runs once
    /// after all of them finished or timed out, whatever their outcome.
    ///
    /// # Errors
    /// Returns `RunError` if the workload is invalid or setup fails. Executor
    /// and teardown failures are reported in the returned [`RunReport`].
    pub async fn run(
        &self,
        config: &WorkloadConfig,
        db: Arc<dyn Database>,
        collection: &str,
    ) -> Result<RunReport, RunError> {
        let started = Instant::now();
        let seed = self.options.seed;

        self.options.check_timeout()?;
        let workload = Arc::new(CompiledWorkload::compile(config, &self.options.limits)?);
        info!(
            workload = %config.name,
            collection,
            threads = config.thread_count,
            iterations = config.iterations,
            seed,
            "starting workload"
        );

        let mut data = config.data.clone();
        if let Some(setup) = config.setup_fn() {
            let (after_setup, outcome) = self
                .run_hook(Hook::Setup, setup, config, &db, collection, data)
                .await?;
            match outcome {
                Ok(()) => data = after_setup,
                Err(HookError::Failed(e)) => {
                    warn!(workload = %config.name, error = %e, "setup failed");
                    return Err(RunError::Setup(e));
                }
                Err(HookError::Panicked { message }) => {
                    warn!(workload = %config.name, %message, "setup panicked");
                    return Err(RunError::SetupPanicked { message });
                }
            }
            debug!(workload = %config.name, "setup complete");
        }

        let (results, timed_out) = self.run_executors(&workload, &db, collection, &data).await;

        let teardown = match config.teardown_fn() {
            Some(teardown) => {
                let (_, outcome) = self
                    .run_hook(Hook::Teardown, teardown, config, &db, collection, data)
                    .await?;
                if let Err(e) = &outcome {
                    warn!(workload = %config.name, error = %e, "teardown failed");
                }
                outcome
            }
            None => Ok(()),
        };

        let report = RunReport {
            workload: config.name.clone(),
            collection: collection.to_string(),
            seed,
            results,
            teardown,
            timed_out,
            duration: started.elapsed(),
        };
        info!(
            workload = %report.workload,
            success = report.is_success(),
            failed = report.failures().count(),
            duration = ?report.duration,
            "workload finished"
        );
        Ok(report)
    }

    /// Spawns every executor and joins them. Returns results ordered by tid
    /// and whether the wall-clock cap expired.
    async fn run_executors(
        &self,
        workload: &Arc<CompiledWorkload>,
        db: &Arc<dyn Database>,
        collection: &str,
        data: &Data,
    ) -> (Vec<ExecutionResult>, bool) {
        let seed = self.options.seed;
        let thread_count = workload.thread_count();
        let collection: Arc<str> = Arc::from(collection);
        let cancel = Arc::new(AtomicBool::new(false));

        let mut progress = Vec::with_capacity(thread_count as usize);
        let mut set = JoinSet::new();
        for index in 0..thread_count {
            let tid = Tid::new(u64::from(index));
            let record = Arc::new(ExecutorProgress::new(workload.start()));
            progress.push(Arc::clone(&record));

            let executor = Executor::new(
                Arc::clone(workload),
                Arc::clone(db),
                Arc::clone(&collection),
                Arc::clone(&cancel),
                record,
            );
            let ctx = ThreadContext::new(
                tid,
                workload.name(),
                thread_count,
                workload.iterations(),
                data.clone(),
                seeded_stream(seed, executor_stream(tid)),
            );
            set.spawn_blocking(move || executor.run(ctx));
        }
        debug!(workload = %workload.name(), thread_count, "executors spawned");

        let mut results: Vec<Option<ExecutionResult>> = vec![None; thread_count as usize];
        let deadline = self.options.timeout.map(|t| Instant::now() + t);
        let mut timed_out = false;

        loop {
            let next = match deadline {
                Some(deadline) => {
                    let joined = timeout_at(deadline, set.join_next()).await;
                    if let Ok(next) = joined {
                        next
                    } else {
                        timed_out = true;
                        cancel.store(true, Ordering::Release);
                        warn!(
                            workload = %workload.name(),
                            running = set.len(),
                            "wall-clock cap expired, cancelling executors"
                        );
                        let grace = Instant::now() + self.options.cancel_grace;
                        Self::drain(&mut set, &mut results, grace).await;
                        break;
                    }
                }
                None => set.join_next().await,
            };

            match next {
                Some(joined) => Self::collect(joined, &mut results),
                None => break,
            }
        }

        if !set.is_empty() {
            warn!(
                workload = %workload.name(),
                stuck = set.len(),
                "executors did not stop within the grace period"
            );
            // Blocking tasks cannot be aborted; let them finish unobserved.
            set.detach_all();
        }

        let results = results
            .into_iter()
            .enumerate()
            .map(|(index, result)| {
                result.unwrap_or_else(|| {
                    let record = &progress[index];
                    let error = if timed_out {
                        StepError::TimedOut
                    } else {
                        StepError::Panicked {
                            message: "executor task ended without a result".to_string(),
                        }
                    };
                    ExecutionResult::interrupted(
                        Tid::from_index(index),
                        workload.state_name(record.state()),
                        record.iteration(),
                        record.steps(),
                        error,
                    )
                })
            })
            .collect();

        (results, timed_out)
    }

    /// Collects executors that stop before `grace`.
    async fn drain(
        set: &mut JoinSet<ExecutionResult>,
        results: &mut [Option<ExecutionResult>],
        grace: Instant,
    ) {
        while let Ok(Some(joined)) = timeout_at(grace, set.join_next()).await {
            Self::collect(joined, results);
        }
    }

    fn collect(
        joined: Result<ExecutionResult, tokio::task::JoinError>,
        results: &mut [Option<ExecutionResult>],
    ) {
        match joined {
            Ok(result) => {
                let index = result.tid.index();
                if let Some(slot) = results.get_mut(index) {
                    *slot = Some(result);
                }
            }
            Err(e) => warn!(error = %e, "executor task failed"),
        }
    }

    /// Runs a hook on a blocking thread and returns the data it leaves behind.
    async fn run_hook(
        &self,
        hook: Hook,
        f: HookFn,
        config: &WorkloadConfig,
        db: &Arc<dyn Database>,
        collection: &str,
        mut data: Data,
    ) -> Result<(Data, Result<(), HookError>), RunError> {
        let db = Arc::clone(db);
        let collection = collection.to_string();
        let workload = config.name.clone();
        let cluster = self.options.cluster;
        let thread_count = config.thread_count;
        let mut rng = seeded_stream(self.options.seed, hook.stream());
        debug!(workload = %workload, ?hook, "running hook");

        tokio::task::spawn_blocking(move || {
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                let mut ctx = HookContext {
                    db: db.as_ref(),
                    collection: &collection,
                    cluster: &cluster,
                    data: &mut data,
                    rng: &mut rng,
                    workload: &workload,
                    thread_count,
                };
                f(&mut ctx)
            }));
            let outcome = match outcome {
                Ok(result) => result.map_err(HookError::Failed),
                Err(payload) => Err(HookError::Panicked {
                    message: panic_message(payload.as_ref()),
                }),
            };
            (data, outcome)
        })
        .await
        .map_err(|e| RunError::Runtime {
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_above_limit_rejected() {
        let options = RunOptions::new().timeout(Duration::from_secs(7 * 60 * 60));
        assert!(matches!(
            options.check_timeout(),
            Err(ConfigError::LimitExceeded(_))
        ));
        assert!(RunOptions::new().timeout(Duration::from_secs(1)).check_timeout().is_ok());
    }

    #[test]
    fn test_default_grace_comes_from_limits() {
        let options = RunOptions::default();
        assert_eq!(options.cancel_grace, Duration::from_secs(5));
        assert!(options.timeout.is_none());
    }
}
