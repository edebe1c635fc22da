//! Run results.

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use gauntlet_core::Tid;
use hdrhistogram::Histogram;
use thiserror::Error;

use crate::config::StateError;
use crate::executor::StepError;

/// Returns an empty step-latency histogram (microseconds, 3 significant figures).
///
/// # Panics
///
/// Panics if histogram creation fails (should not happen with valid parameters).
#[must_use]
pub fn latency_histogram() -> Histogram<u64> {
    Histogram::<u64>::new(3).expect("histogram creation")
}

/// A failed executor.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutorFailure {
    /// The executor.
    pub tid: Tid,
    /// State it was in.
    pub state: String,
    /// Step index at which it failed.
    pub iteration: u64,
    /// What went wrong.
    pub error: StepError,
}

impl fmt::Display for ExecutorFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} failed in state '{}' at iteration {}: {}",
            self.tid, self.state, self.iteration, self.error
        )
    }
}

/// Outcome of one executor.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// The executor.
    pub tid: Tid,
    /// Steps that completed successfully.
    pub steps: u64,
    /// Successful steps per state name.
    pub visits: BTreeMap<String, u64>,
    /// Step latencies in microseconds.
    pub latencies: Histogram<u64>,
    /// Wall time the executor ran.
    pub elapsed: Duration,
    /// `Ok` if every iteration completed.
    pub outcome: Result<(), ExecutorFailure>,
}

impl ExecutionResult {
    /// Result for an executor that never returned on its own.
    #[must_use]
    pub fn interrupted(tid: Tid, state: &str, iteration: u64, steps: u64, error: StepError) -> Self {
        Self {
            tid,
            steps,
            visits: BTreeMap::new(),
            latencies: latency_histogram(),
            elapsed: Duration::ZERO,
            outcome: Err(ExecutorFailure {
                tid,
                state: state.to_string(),
                iteration,
                error,
            }),
        }
    }

    /// Returns true if every iteration completed.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Returns the failure, if any.
    #[must_use]
    pub fn failure(&self) -> Option<&ExecutorFailure> {
        self.outcome.as_ref().err()
    }
}

/// A setup or teardown hook that did not complete.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HookError {
    /// The hook returned an error.
    #[error(transparent)]
    Failed(#[from] StateError),

    /// The hook panicked.
    #[error("panicked: {message}")]
    Panicked {
        /// Panic payload, when it was a string.
        message: String,
    },
}

/// Everything a run produced.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Workload name.
    pub workload: String,
    /// Collection the workload ran against.
    pub collection: String,
    /// Seed every random stream was derived from.
    pub seed: u64,
    /// One result per executor, ordered by tid.
    pub results: Vec<ExecutionResult>,
    /// Teardown outcome. `Ok` when the workload has no teardown.
    pub teardown: Result<(), HookError>,
    /// Whether the wall-clock cap expired.
    pub timed_out: bool,
    /// Wall time of the whole run, setup and teardown included.
    pub duration: Duration,
}

impl RunReport {
    /// Returns true if every executor and the teardown succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.teardown.is_ok() && self.results.iter().all(ExecutionResult::is_success)
    }

    /// Iterates over executor failures in tid order.
    pub fn failures(&self) -> impl Iterator<Item = &ExecutorFailure> {
        self.results.iter().filter_map(ExecutionResult::failure)
    }

    /// Returns the report if the run succeeded, or every failure otherwise.
    ///
    /// # Errors
    /// Returns `RunFailure` if any executor or the teardown failed.
    pub fn into_result(self) -> Result<Self, RunFailure> {
        if self.is_success() {
            return Ok(self);
        }
        Err(RunFailure {
            workload: self.workload.clone(),
            failures: self.failures().cloned().collect(),
            teardown: self.teardown.clone().err(),
        })
    }

    /// Aggregates statistics over every executor.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    #[allow(clippy::cast_possible_truncation)] // duration_ms won't overflow u64.
    pub fn stats(&self) -> RunStats {
        let mut latencies = latency_histogram();
        let mut visits: BTreeMap<String, u64> = BTreeMap::new();
        let mut total_steps = 0;

        for result in &self.results {
            let _ = latencies.add(&result.latencies);
            total_steps += result.steps;
            for (state, count) in &result.visits {
                *visits.entry(state.clone()).or_default() += count;
            }
        }

        let secs = self.duration.as_secs_f64();
        RunStats {
            executors: self.results.len(),
            failed_executors: self.failures().count(),
            total_steps,
            visits,
            step_latency_p50: latencies.value_at_percentile(50.0) as f64 / 1000.0,
            step_latency_p95: latencies.value_at_percentile(95.0) as f64 / 1000.0,
            step_latency_p99: latencies.value_at_percentile(99.0) as f64 / 1000.0,
            step_latency_max: latencies.max() as f64 / 1000.0,
            steps_per_sec: if secs > 0.0 { total_steps as f64 / secs } else { 0.0 },
            duration_ms: self.duration.as_millis() as u64,
        }
    }
}

/// A failed run: every executor failure and the teardown error, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct RunFailure {
    /// Workload name.
    pub workload: String,
    /// Failed executors in tid order.
    pub failures: Vec<ExecutorFailure>,
    /// Teardown error.
    pub teardown: Option<HookError>,
}

impl fmt::Display for RunFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "workload '{}' failed: {} executor(s) failed",
            self.workload,
            self.failures.len()
        )?;
        for failure in &self.failures {
            write!(f, "\n  {failure}")?;
        }
        if let Some(teardown) = &self.teardown {
            write!(f, "\n  teardown failed: {teardown}")?;
        }
        Ok(())
    }
}

impl std::error::Error for RunFailure {}

/// Aggregate statistics of a run.
#[derive(Debug, Clone)]
pub struct RunStats {
    /// Executors spawned.
    pub executors: usize,
    /// Executors that did not complete.
    pub failed_executors: usize,
    /// Successful steps across all executors.
    pub total_steps: u64,
    /// Successful steps per state.
    pub visits: BTreeMap<String, u64>,

    /// Step latency p50 in milliseconds.
    pub step_latency_p50: f64,
    /// Step latency p95 in milliseconds.
    pub step_latency_p95: f64,
    /// Step latency p99 in milliseconds.
    pub step_latency_p99: f64,
    /// Step latency max in milliseconds.
    pub step_latency_max: f64,

    /// Steps per second over the whole run.
    pub steps_per_sec: f64,
    /// Total duration in milliseconds.
    pub duration_ms: u64,
}

impl RunStats {
    /// Prints a human-readable summary.
    pub fn print_summary(&self) {
        println!(
            "Executors: {} total, {} failed",
            self.executors, self.failed_executors
        );
        println!("Steps: {} ({:.0} steps/sec)", self.total_steps, self.steps_per_sec);
        println!(
            "Step latency: p50={:.2}ms p95={:.2}ms p99={:.2}ms max={:.2}ms",
            self.step_latency_p50,
            self.step_latency_p95,
            self.step_latency_p99,
            self.step_latency_max
        );
        for (state, count) in &self.visits {
            println!("  {state}: {count}");
        }
        println!("Duration: {}ms", self.duration_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_result(tid: u64, steps: u64) -> ExecutionResult {
        let mut latencies = latency_histogram();
        for us in 1..=steps {
            latencies.record(us * 100).unwrap();
        }
        ExecutionResult {
            tid: Tid::new(tid),
            steps,
            visits: BTreeMap::from([("a".to_string(), steps)]),
            latencies,
            elapsed: Duration::from_millis(5),
            outcome: Ok(()),
        }
    }

    fn report(results: Vec<ExecutionResult>) -> RunReport {
        RunReport {
            workload: "w".to_string(),
            collection: "c".to_string(),
            seed: 1,
            results,
            teardown: Ok(()),
            timed_out: false,
            duration: Duration::from_millis(10),
        }
    }

    #[test]
    fn test_stats_aggregate_executors() {
        let stats = report(vec![ok_result(0, 4), ok_result(1, 6)]).stats();
        assert_eq!(stats.executors, 2);
        assert_eq!(stats.failed_executors, 0);
        assert_eq!(stats.total_steps, 10);
        assert_eq!(stats.visits.get("a"), Some(&10));
        assert!(stats.step_latency_max >= 0.6);
    }

    #[test]
    fn test_into_result_lists_every_failure() {
        let failed = ExecutionResult::interrupted(
            Tid::new(1),
            "b",
            7,
            7,
            StepError::State(StateError::assertion("count mismatch")),
        );
        let mut run = report(vec![ok_result(0, 3), failed]);
        run.teardown = Err(HookError::Panicked {
            message: "teardown".to_string(),
        });
        assert!(!run.is_success());

        let failure = run.into_result().unwrap_err();
        assert_eq!(failure.failures.len(), 1);
        let text = failure.to_string();
        assert!(text.contains("tid-1 failed in state 'b' at iteration 7"));
        assert!(text.contains("count mismatch"));
        assert!(text.contains("teardown failed"));
    }

    #[test]
    fn test_teardown_failure_alone_fails_run() {
        let mut run = report(vec![ok_result(0, 1)]);
        assert!(run.is_success());
        run.teardown = Err(HookError::Failed(StateError::assertion("leftovers")));
        assert!(!run.is_success());
        assert_eq!(run.failures().count(), 0);
    }
}
