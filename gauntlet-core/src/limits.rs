//! Harness limits and configuration bounds.
//!
//! Every workload dimension the harness multiplies (threads, iterations,
//! states) has an explicit maximum, so a typo in a profile fails validation
//! instead of spawning a million threads.

/// Limits enforced when a workload is validated and run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    /// Maximum number of concurrent executors in one run.
    pub max_thread_count: u32,
    /// Maximum number of steps a single executor may take.
    pub max_iterations: u64,
    /// Maximum number of states in one workload.
    pub max_states: u32,
    /// Maximum number of outgoing transitions from a single state.
    pub max_targets_per_state: u32,

    // Timeout limits (in microseconds).
    /// How long cancelled executors get to observe the cancellation flag.
    pub cancel_grace_us: u64,
    /// Maximum allowed wall-clock cap for a run.
    pub max_run_timeout_us: u64,
}

impl Limits {
    /// Creates limits with safe defaults.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            // Threads: tokio's blocking pool defaults to 512 threads.
            max_thread_count: 512,
            max_iterations: 1_000_000,
            max_states: 256,
            max_targets_per_state: 256,

            // Timeouts: 5s grace, 6h cap.
            cancel_grace_us: 5 * 1_000_000,
            max_run_timeout_us: 6 * 60 * 60 * 1_000_000,
        }
    }

    /// Validates that all limits are internally consistent.
    ///
    /// # Errors
    /// Returns an error if any limits are invalid or inconsistent.
    pub fn validate(&self) -> crate::Result<()> {
        if self.max_thread_count == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "max_thread_count",
                reason: "must be positive",
            });
        }

        if self.max_iterations == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "max_iterations",
                reason: "must be positive",
            });
        }

        if self.max_states == 0 {
            return Err(crate::Error::InvalidArgument {
                name: "max_states",
                reason: "must be positive",
            });
        }

        if self.max_targets_per_state > self.max_states {
            return Err(crate::Error::InvalidArgument {
                name: "max_targets_per_state",
                reason: "must be <= max_states",
            });
        }

        if self.cancel_grace_us > self.max_run_timeout_us {
            return Err(crate::Error::InvalidArgument {
                name: "cancel_grace_us",
                reason: "must be <= max_run_timeout_us",
            });
        }

        Ok(())
    }

    /// Checks a requested thread count against `max_thread_count`.
    ///
    /// # Errors
    /// Returns `LimitExceeded` if the count is above the maximum.
    pub fn check_thread_count(&self, thread_count: u32) -> crate::Result<()> {
        if thread_count > self.max_thread_count {
            return Err(crate::Error::LimitExceeded {
                limit: "max_thread_count",
                max: u64::from(self.max_thread_count),
                actual: u64::from(thread_count),
            });
        }
        Ok(())
    }

    /// Checks a requested per-thread iteration count against `max_iterations`.
    ///
    /// # Errors
    /// Returns `LimitExceeded` if the count is above the maximum.
    pub fn check_iterations(&self, iterations: u64) -> crate::Result<()> {
        if iterations > self.max_iterations {
            return Err(crate::Error::LimitExceeded {
                limit: "max_iterations",
                max: self.max_iterations,
                actual: iterations,
            });
        }
        Ok(())
    }

    /// Checks a workload's state count against `max_states`.
    ///
    /// # Errors
    /// Returns `LimitExceeded` if the count is above the maximum.
    pub fn check_state_count(&self, states: usize) -> crate::Result<()> {
        let actual = states as u64;
        if actual > u64::from(self.max_states) {
            return Err(crate::Error::LimitExceeded {
                limit: "max_states",
                max: u64::from(self.max_states),
                actual,
            });
        }
        Ok(())
    }

    /// Checks one state's outgoing transition count against `max_targets_per_state`.
    ///
    /// # Errors
    /// Returns `LimitExceeded` if the count is above the maximum.
    pub fn check_target_count(&self, targets: usize) -> crate::Result<()> {
        let actual = targets as u64;
        if actual > u64::from(self.max_targets_per_state) {
            return Err(crate::Error::LimitExceeded {
                limit: "max_targets_per_state",
                max: u64::from(self.max_targets_per_state),
                actual,
            });
        }
        Ok(())
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::new()
    }
}
