//! Workload definitions.
//!
//! A [`WorkloadConfig`] is a plain value: a name, a thread and iteration
//! count, a map of state functions, a weighted transition map, an initial
//! [`Data`] bag, and optional setup and teardown hooks. Functions are held as
//! shared `Arc<dyn Fn>` values, so cloning a config is cheap and a derived
//! config can replace entries without touching its base.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use gauntlet_core::Limits;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::data::{Data, DataError};
use crate::database::{Database, DbError};
use crate::executor::ThreadContext;
use crate::random::RandomError;

/// A state function: one step of a simulated client.
pub type StateFn =
    Arc<dyn Fn(&mut ThreadContext, &dyn Database, &str) -> Result<(), StateError> + Send + Sync>;

/// A setup or teardown hook.
pub type HookFn = Arc<dyn Fn(&mut HookContext<'_>) -> Result<(), StateError> + Send + Sync>;

/// Errors in a workload definition, found before anything runs.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// The workload has no name.
    #[error("workload name is empty")]
    EmptyName,

    /// The workload defines no states.
    #[error("workload '{workload}' defines no states")]
    NoStates {
        /// Workload name.
        workload: String,
    },

    /// `thread_count` is zero.
    #[error("workload '{workload}': thread_count must be positive")]
    ThreadCountZero {
        /// Workload name.
        workload: String,
    },

    /// `iterations` is zero.
    #[error("workload '{workload}': iterations must be positive")]
    IterationsZero {
        /// Workload name.
        workload: String,
    },

    /// A dimension of the workload is above the harness limits.
    #[error(transparent)]
    LimitExceeded(#[from] gauntlet_core::Error),

    /// `start_state` names a state that does not exist.
    #[error("start state '{state}' is not a defined state")]
    UnknownStartState {
        /// The missing state.
        state: String,
    },

    /// A transition is declared from a state that does not exist.
    #[error("transitions declared from undefined state '{state}'")]
    UnknownTransitionSource {
        /// The missing state.
        state: String,
    },

    /// A transition targets a state that does not exist.
    #[error("transition {from} -> {to} targets an undefined state")]
    UnknownTransitionTarget {
        /// Source state.
        from: String,
        /// The missing target.
        to: String,
    },

    /// A weight is negative, NaN or infinite.
    #[error("transition {from} -> {to} has invalid weight {weight}")]
    InvalidWeight {
        /// Source state.
        from: String,
        /// Target state.
        to: String,
        /// The offending weight.
        weight: f64,
    },

    /// A reachable state has no transition with positive weight.
    #[error("state '{state}' is reachable but has no transition with positive weight")]
    NoViableTransition {
        /// The stuck state.
        state: String,
    },
}

/// Errors returned by state functions and hooks.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StateError {
    /// A workload assertion did not hold.
    #[error("assertion failed: {message}")]
    Assertion {
        /// What was expected.
        message: String,
    },

    /// The database returned an error the workload does not tolerate.
    #[error("database error: {0}")]
    Database(#[from] DbError),

    /// A random helper was misused.
    #[error("random: {0}")]
    Random(#[from] RandomError),

    /// Scratch data was missing or of the wrong type.
    #[error("data: {0}")]
    Data(#[from] DataError),
}

impl StateError {
    /// Creates an assertion failure.
    #[must_use]
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::Assertion {
            message: message.into(),
        }
    }

    /// Returns an assertion failure unless `condition` holds.
    ///
    /// # Errors
    /// Returns `StateError::Assertion` carrying `message` if `condition` is false.
    pub fn check(condition: bool, message: impl Into<String>) -> Result<(), Self> {
        if condition {
            Ok(())
        } else {
            Err(Self::assertion(message))
        }
    }
}

/// Returns early with a [`StateError::Assertion`] unless the condition holds.
///
/// ```ignore
/// state_assert!(count == expected, "expected {expected} documents, found {count}");
/// ```
#[macro_export]
macro_rules! state_assert {
    ($cond:expr, $($arg:tt)+) => {
        if !$cond {
            return Err($crate::StateError::assertion(format!($($arg)+)));
        }
    };
}

/// Shape of the database deployment under test.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Topology {
    /// A single server.
    #[default]
    Standalone,
    /// A replicated deployment.
    ReplicaSet {
        /// Number of members.
        nodes: u32,
    },
    /// A partitioned deployment.
    Sharded {
        /// Number of shards.
        shards: u32,
    },
}

/// What hooks know about the deployment they run against.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterInfo {
    /// Deployment shape.
    #[serde(default)]
    pub topology: Topology,
}

impl ClusterInfo {
    /// Returns cluster info for the given topology.
    #[must_use]
    pub const fn new(topology: Topology) -> Self {
        Self { topology }
    }

    /// Returns true if the deployment is sharded.
    #[must_use]
    pub const fn is_sharded(&self) -> bool {
        matches!(self.topology, Topology::Sharded { .. })
    }

    /// Returns true if the deployment is a replica set.
    #[must_use]
    pub const fn is_replica_set(&self) -> bool {
        matches!(self.topology, Topology::ReplicaSet { .. })
    }
}

/// Everything a setup or teardown hook receives.
pub struct HookContext<'a> {
    /// The database under test.
    pub db: &'a dyn Database,
    /// The collection the workload runs against.
    pub collection: &'a str,
    /// Deployment description.
    pub cluster: &'a ClusterInfo,
    /// Workload data. Writes made by setup become every executor's starting data.
    pub data: &'a mut Data,
    /// Random stream reserved for this hook.
    pub rng: &'a mut ChaCha8Rng,
    /// Name of the running workload.
    pub workload: &'a str,
    /// Number of executors in the run.
    pub thread_count: u32,
}

/// A workload: a finite state machine run concurrently by `thread_count` clients.
#[derive(Clone)]
pub struct WorkloadConfig {
    /// Name used in reports and collection name prefixes.
    pub name: String,
    /// Number of concurrent executors.
    pub thread_count: u32,
    /// Steps each executor takes.
    pub iterations: u64,
    /// Initial state; defaults to the first state name in order.
    pub start_state: Option<String>,
    /// State functions by name.
    pub states: BTreeMap<String, StateFn>,
    /// Relative transition weights: source -> target -> weight.
    pub transitions: BTreeMap<String, BTreeMap<String, f64>>,
    /// Initial scratch data.
    pub data: Data,
    /// Runs once before any executor starts.
    pub setup: Option<HookFn>,
    /// Runs once after every executor finished.
    pub teardown: Option<HookFn>,
}

impl fmt::Debug for WorkloadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkloadConfig")
            .field("name", &self.name)
            .field("thread_count", &self.thread_count)
            .field("iterations", &self.iterations)
            .field("start_state", &self.start_state)
            .field("states", &self.states.keys().collect::<Vec<_>>())
            .field("transitions", &self.transitions)
            .field("data", &self.data)
            .field("setup", &self.setup.is_some())
            .field("teardown", &self.teardown.is_some())
            .finish()
    }
}

impl WorkloadConfig {
    /// Starts building a workload named `name`.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> WorkloadBuilder {
        WorkloadBuilder::new(name)
    }

    /// Returns the state the executors start in.
    ///
    /// This is `start_state` when set, otherwise the first state name in
    /// lexicographic order.
    #[must_use]
    pub fn initial_state(&self) -> Option<&str> {
        self.start_state
            .as_deref()
            .or_else(|| self.states.keys().next().map(String::as_str))
    }

    /// Returns the state function registered under `name`.
    ///
    /// Derived workloads call this on their base to delegate to it.
    #[must_use]
    pub fn state_fn(&self, name: &str) -> Option<StateFn> {
        self.states.get(name).cloned()
    }

    /// Returns the setup hook.
    #[must_use]
    pub fn setup_fn(&self) -> Option<HookFn> {
        self.setup.clone()
    }

    /// Returns the teardown hook.
    #[must_use]
    pub fn teardown_fn(&self) -> Option<HookFn> {
        self.teardown.clone()
    }

    /// Registers or replaces a state function.
    pub fn set_state<F>(&mut self, name: impl Into<String>, f: F)
    where
        F: Fn(&mut ThreadContext, &dyn Database, &str) -> Result<(), StateError>
            + Send
            + Sync
            + 'static,
    {
        self.states.insert(name.into(), Arc::new(f));
    }

    /// Replaces the outgoing transitions of `from`.
    pub fn set_transitions<I, S>(&mut self, from: impl Into<String>, targets: I)
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let targets = targets.into_iter().map(|(to, w)| (to.into(), w)).collect();
        self.transitions.insert(from.into(), targets);
    }

    /// Replaces the setup hook.
    pub fn set_setup<F>(&mut self, f: F)
    where
        F: Fn(&mut HookContext<'_>) -> Result<(), StateError> + Send + Sync + 'static,
    {
        self.setup = Some(Arc::new(f));
    }

    /// Replaces the teardown hook.
    pub fn set_teardown<F>(&mut self, f: F)
    where
        F: Fn(&mut HookContext<'_>) -> Result<(), StateError> + Send + Sync + 'static,
    {
        self.teardown = Some(Arc::new(f));
    }

    /// Derives a new workload from this one. See [`extend_workload`].
    ///
    /// # Errors
    /// Returns whatever error `customize` returns.
    pub fn extend<F, E>(&self, customize: F) -> Result<Self, E>
    where
        F: FnOnce(Self, &Self) -> Result<Self, E>,
    {
        extend_workload(self, customize)
    }

    /// Checks the definition against `limits`.
    ///
    /// Beyond the structural checks, every state reachable from the initial
    /// state through positive-weight transitions must itself have at least one
    /// positive-weight transition, since executors sample after every step.
    ///
    /// # Errors
    /// Returns the first problem found.
    pub fn validate(&self, limits: &Limits) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::EmptyName);
        }
        if self.states.is_empty() {
            return Err(ConfigError::NoStates {
                workload: self.name.clone(),
            });
        }
        if self.thread_count == 0 {
            return Err(ConfigError::ThreadCountZero {
                workload: self.name.clone(),
            });
        }
        if self.iterations == 0 {
            return Err(ConfigError::IterationsZero {
                workload: self.name.clone(),
            });
        }
        limits.check_thread_count(self.thread_count)?;
        limits.check_iterations(self.iterations)?;
        limits.check_state_count(self.states.len())?;

        if let Some(start) = &self.start_state {
            if !self.states.contains_key(start) {
                return Err(ConfigError::UnknownStartState {
                    state: start.clone(),
                });
            }
        }

        for (from, targets) in &self.transitions {
            if !self.states.contains_key(from) {
                return Err(ConfigError::UnknownTransitionSource {
                    state: from.clone(),
                });
            }
            limits.check_target_count(targets.len())?;
            for (to, &weight) in targets {
                if !self.states.contains_key(to) {
                    return Err(ConfigError::UnknownTransitionTarget {
                        from: from.clone(),
                        to: to.clone(),
                    });
                }
                if !weight.is_finite() || weight < 0.0 {
                    return Err(ConfigError::InvalidWeight {
                        from: from.clone(),
                        to: to.clone(),
                        weight,
                    });
                }
            }
        }

        self.check_reachable_states()
    }

    fn check_reachable_states(&self) -> Result<(), ConfigError> {
        let Some(start) = self.initial_state() else {
            return Ok(());
        };

        let mut seen = BTreeSet::from([start]);
        let mut queue = VecDeque::from([start]);
        while let Some(state) = queue.pop_front() {
            let viable: Vec<&str> = self
                .transitions
                .get(state)
                .into_iter()
                .flatten()
                .filter(|(_, &weight)| weight > 0.0)
                .map(|(to, _)| to.as_str())
                .collect();

            if viable.is_empty() {
                return Err(ConfigError::NoViableTransition {
                    state: state.to_string(),
                });
            }
            for to in viable {
                if seen.insert(to) {
                    queue.push_back(to);
                }
            }
        }
        Ok(())
    }
}

/// Derives a workload from `base`.
///
/// `customize` receives a copy of `base` and `base` itself. The copy owns its
/// own state, transition and data maps, so nothing it does is visible through
/// `base`. To delegate to a base state or hook, fetch it with
/// [`WorkloadConfig::state_fn`] (or `setup_fn`/`teardown_fn`) and call it from
/// the replacement closure.
///
/// No validation happens here; the result is validated when it is run.
///
/// # Errors
/// Returns whatever error `customize` returns.
pub fn extend_workload<F, E>(base: &WorkloadConfig, customize: F) -> Result<WorkloadConfig, E>
where
    F: FnOnce(WorkloadConfig, &WorkloadConfig) -> Result<WorkloadConfig, E>,
{
    customize(base.clone(), base)
}

/// Builder for [`WorkloadConfig`].
#[derive(Debug)]
pub struct WorkloadBuilder {
    config: WorkloadConfig,
}

impl WorkloadBuilder {
    /// Creates a builder with one thread, one iteration and no states.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            config: WorkloadConfig {
                name: name.into(),
                thread_count: 1,
                iterations: 1,
                start_state: None,
                states: BTreeMap::new(),
                transitions: BTreeMap::new(),
                data: Data::new(),
                setup: None,
                teardown: None,
            },
        }
    }

    /// Sets the number of concurrent executors.
    #[must_use]
    pub const fn thread_count(mut self, thread_count: u32) -> Self {
        self.config.thread_count = thread_count;
        self
    }

    /// Sets the number of steps per executor.
    #[must_use]
    pub const fn iterations(mut self, iterations: u64) -> Self {
        self.config.iterations = iterations;
        self
    }

    /// Sets the initial state.
    #[must_use]
    pub fn start_state(mut self, state: impl Into<String>) -> Self {
        self.config.start_state = Some(state.into());
        self
    }

    /// Adds a state function.
    #[must_use]
    pub fn state<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&mut ThreadContext, &dyn Database, &str) -> Result<(), StateError>
            + Send
            + Sync
            + 'static,
    {
        self.config.set_state(name, f);
        self
    }

    /// Adds one weighted transition.
    #[must_use]
    pub fn transition(mut self, from: impl Into<String>, to: impl Into<String>, weight: f64) -> Self {
        self.config
            .transitions
            .entry(from.into())
            .or_default()
            .insert(to.into(), weight);
        self
    }

    /// Sets all outgoing transitions of `from`.
    #[must_use]
    pub fn transitions<I, S>(mut self, from: impl Into<String>, targets: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        self.config.set_transitions(from, targets);
        self
    }

    /// Sets one data entry.
    #[must_use]
    pub fn data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.data.set(key, value);
        self
    }

    /// Sets the setup hook.
    #[must_use]
    pub fn setup<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut HookContext<'_>) -> Result<(), StateError> + Send + Sync + 'static,
    {
        self.config.set_setup(f);
        self
    }

    /// Sets the teardown hook.
    #[must_use]
    pub fn teardown<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut HookContext<'_>) -> Result<(), StateError> + Send + Sync + 'static,
    {
        self.config.set_teardown(f);
        self
    }

    /// Returns the workload.
    #[must_use]
    pub fn build(self) -> WorkloadConfig {
        self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &mut ThreadContext, _: &dyn Database, _: &str) -> Result<(), StateError> {
        Ok(())
    }

    fn ping_pong() -> WorkloadConfig {
        WorkloadConfig::builder("ping_pong")
            .thread_count(2)
            .iterations(4)
            .state("a", noop)
            .state("b", noop)
            .transition("a", "b", 1.0)
            .transition("b", "a", 1.0)
            .build()
    }

    #[test]
    fn test_valid_config() {
        let config = ping_pong();
        assert!(config.validate(&Limits::default()).is_ok());
        assert_eq!(config.initial_state(), Some("a"));
    }

    #[test]
    fn test_structural_errors() {
        let limits = Limits::default();

        let mut config = ping_pong();
        config.thread_count = 0;
        assert!(matches!(
            config.validate(&limits),
            Err(ConfigError::ThreadCountZero { .. })
        ));

        let mut config = ping_pong();
        config.start_state = Some("c".to_string());
        assert!(matches!(
            config.validate(&limits),
            Err(ConfigError::UnknownStartState { .. })
        ));

        let mut config = ping_pong();
        config.set_transitions("a", [("c", 1.0)]);
        assert!(matches!(
            config.validate(&limits),
            Err(ConfigError::UnknownTransitionTarget { .. })
        ));

        let mut config = ping_pong();
        config.set_transitions("zzz", [("a", 1.0)]);
        assert!(matches!(
            config.validate(&limits),
            Err(ConfigError::UnknownTransitionSource { .. })
        ));

        let mut config = ping_pong();
        config.set_transitions("a", [("b", f64::NAN)]);
        assert!(matches!(
            config.validate(&limits),
            Err(ConfigError::InvalidWeight { .. })
        ));
    }

    #[test]
    fn test_limits_are_enforced() {
        let mut config = ping_pong();
        config.thread_count = Limits::default().max_thread_count + 1;
        assert!(matches!(
            config.validate(&Limits::default()),
            Err(ConfigError::LimitExceeded(_))
        ));
    }

    #[test]
    fn test_zero_weights_on_reachable_state() {
        let mut config = ping_pong();
        config.set_transitions("b", [("a", 0.0)]);
        assert_eq!(
            config.validate(&Limits::default()),
            Err(ConfigError::NoViableTransition {
                state: "b".to_string()
            })
        );
    }

    #[test]
    fn test_unreachable_dead_end_is_allowed() {
        let mut config = ping_pong();
        config.set_state("orphan", noop);
        assert!(config.validate(&Limits::default()).is_ok());
    }

    #[test]
    fn test_extension_isolation() {
        let base = ping_pong().extend(|mut d, _| {
            d.data.set("field", "x");
            Ok::<_, ConfigError>(d)
        });
        let base = base.unwrap();

        let derived = base
            .extend(|mut derived, base| {
                let inner = base.state_fn("a").ok_or(ConfigError::NoStates {
                    workload: base.name.clone(),
                })?;
                derived.set_state("a", move |ctx, db, coll| {
                    ctx.data.set("called", true);
                    inner(ctx, db, coll)
                });
                derived.data.set("field", "y");
                derived.name = "derived".to_string();
                Ok::<_, ConfigError>(derived)
            })
            .unwrap();

        assert_eq!(base.data.get_str("field").unwrap(), "x");
        assert_eq!(derived.data.get_str("field").unwrap(), "y");
        assert_eq!(base.name, "ping_pong");
        assert!(!Arc::ptr_eq(&base.states["a"], &derived.states["a"]));
        assert!(Arc::ptr_eq(&base.states["b"], &derived.states["b"]));
    }

    #[test]
    fn test_extension_error_propagates() {
        let result: Result<WorkloadConfig, &str> = ping_pong().extend(|_, _| Err("nope"));
        assert_eq!(result.unwrap_err(), "nope");
    }

    #[test]
    fn test_check_helper() {
        assert!(StateError::check(true, "fine").is_ok());
        assert_eq!(
            StateError::check(false, "broken"),
            Err(StateError::assertion("broken"))
        );
    }
}
