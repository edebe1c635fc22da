//! Workload registry and serial suite runner.
//!
//! The registry maps workload names to factories. A [`SuiteRunner`] picks
//! workloads from it with a [`SuiteSelection`], scales them, and runs them
//! one after another, each against its own collection
//! `<db_prefix>_<workload>`.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::WorkloadConfig;
use crate::database::{Database, DbError};
use crate::lifecycle::{Harness, RunError, RunOptions};
use crate::profiles::{HarnessProfile, ScaleSection};
use crate::report::RunReport;

/// Errors from building or running a suite.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SuiteError {
    /// A selection names a workload the registry does not have.
    #[error("unknown workload: {name}")]
    UnknownWorkload {
        /// The missing name.
        name: String,
    },

    /// A workload name was registered twice.
    #[error("workload registered twice: {name}")]
    DuplicateWorkload {
        /// The repeated name.
        name: String,
    },

    /// The selection matched nothing.
    #[error("selection matches no workload")]
    EmptySelection,
}

/// Builds a fresh workload definition.
pub type WorkloadFactory = Arc<dyn Fn() -> WorkloadConfig + Send + Sync>;

/// Named workload factories.
#[derive(Default, Clone)]
pub struct WorkloadRegistry {
    factories: BTreeMap<String, WorkloadFactory>,
}

impl std::fmt::Debug for WorkloadRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.factories.keys()).finish()
    }
}

impl WorkloadRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a factory under `name`.
    ///
    /// # Errors
    /// Returns `DuplicateWorkload` if the name is taken.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> Result<(), SuiteError>
    where
        F: Fn() -> WorkloadConfig + Send + Sync + 'static,
    {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(SuiteError::DuplicateWorkload { name });
        }
        self.factories.insert(name, Arc::new(factory));
        Ok(())
    }

    /// Returns the registered names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.factories.keys().map(String::as_str)
    }

    /// Returns the number of registered workloads.
    #[must_use]
    pub fn len(&self) -> usize {
        self.factories.len()
    }

    /// Returns true if nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }

    /// Builds the workload registered under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<WorkloadConfig> {
        self.factories.get(name).map(|factory| factory())
    }

    /// Builds every workload `selection` picks, in name order.
    ///
    /// # Errors
    /// Returns `UnknownWorkload` if the selection names an unregistered
    /// workload, or `EmptySelection` if nothing is left.
    pub fn select(&self, selection: &SuiteSelection) -> Result<Vec<WorkloadConfig>, SuiteError> {
        for name in selection.include.iter().chain(&selection.exclude) {
            if !self.factories.contains_key(name) {
                return Err(SuiteError::UnknownWorkload { name: name.clone() });
            }
        }

        let chosen: Vec<WorkloadConfig> = self
            .factories
            .iter()
            .filter(|(name, _)| selection.selects(name))
            .map(|(_, factory)| factory())
            .collect();

        if chosen.is_empty() {
            return Err(SuiteError::EmptySelection);
        }
        Ok(chosen)
    }
}

impl FromIterator<(String, WorkloadFactory)> for WorkloadRegistry {
    /// Later entries replace earlier ones with the same name.
    fn from_iter<I: IntoIterator<Item = (String, WorkloadFactory)>>(iter: I) -> Self {
        Self {
            factories: iter.into_iter().collect(),
        }
    }
}

/// Which workloads a suite runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuiteSelection {
    /// Workloads to run; empty means all.
    pub include: Vec<String>,
    /// Workloads to skip, even if included.
    pub exclude: Vec<String>,
}

impl SuiteSelection {
    /// Returns true if `name` is selected.
    #[must_use]
    pub fn selects(&self, name: &str) -> bool {
        let included = self.include.is_empty() || self.include.iter().any(|n| n == name);
        included && !self.exclude.iter().any(|n| n == name)
    }
}

/// One workload's outcome within a suite.
#[derive(Debug, Clone)]
pub struct SuiteEntry {
    /// Workload name.
    pub workload: String,
    /// Collection it ran against.
    pub collection: String,
    /// The run report, or why there is none.
    pub outcome: Result<RunReport, RunError>,
    /// Error raised while dropping the workload's collections afterwards.
    pub cleanup: Option<DbError>,
}

impl SuiteEntry {
    /// Returns true if the run succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.cleanup.is_none() && self.outcome.as_ref().is_ok_and(RunReport::is_success)
    }
}

/// Outcome of a suite.
#[derive(Debug, Clone, Default)]
pub struct SuiteReport {
    /// One entry per workload, in run order.
    pub entries: Vec<SuiteEntry>,
}

impl SuiteReport {
    /// Returns true if every workload succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.entries.iter().all(SuiteEntry::is_success)
    }

    /// Names of workloads that did not succeed.
    pub fn failed(&self) -> impl Iterator<Item = &str> {
        self.entries
            .iter()
            .filter(|entry| !entry.is_success())
            .map(|entry| entry.workload.as_str())
    }

    /// Prints a human-readable summary.
    pub fn print_summary(&self) {
        println!("=== Suite ===");
        for entry in &self.entries {
            println!("--- {} ({}) ---", entry.workload, entry.collection);
            match &entry.outcome {
                Ok(report) => {
                    report.stats().print_summary();
                    if let Err(failure) = report.clone().into_result() {
                        println!("{failure}");
                    }
                }
                Err(e) => println!("not run: {e}"),
            }
            if let Some(e) = &entry.cleanup {
                println!("cleanup failed: {e}");
            }
        }
        let failed: Vec<&str> = self.failed().collect();
        println!(
            "Workloads: {} run, {} failed{}",
            self.entries.len(),
            failed.len(),
            if failed.is_empty() {
                String::new()
            } else {
                format!(" ({})", failed.join(", "))
            }
        );
    }
}

/// Runs selected workloads one after another.
#[derive(Debug, Clone)]
pub struct SuiteRunner {
    registry: WorkloadRegistry,
    selection: SuiteSelection,
    scale: ScaleSection,
    options: RunOptions,
    db_prefix: String,
}

impl SuiteRunner {
    /// Creates a runner over `registry` that runs everything at its own scale.
    #[must_use]
    pub fn new(registry: WorkloadRegistry) -> Self {
        Self::from_profile(registry, &HarnessProfile::default())
    }

    /// Creates a runner configured by `profile`.
    #[must_use]
    pub fn from_profile(registry: WorkloadRegistry, profile: &HarnessProfile) -> Self {
        Self {
            registry,
            selection: profile.selection.clone(),
            scale: profile.scale.clone(),
            options: profile.run_options(),
            db_prefix: profile.run.db_prefix.clone(),
        }
    }

    /// Sets the selection.
    #[must_use]
    pub fn selection(mut self, selection: SuiteSelection) -> Self {
        self.selection = selection;
        self
    }

    /// Sets the scale overrides.
    #[must_use]
    pub fn scale(mut self, scale: ScaleSection) -> Self {
        self.scale = scale;
        self
    }

    /// Sets the run options.
    #[must_use]
    pub fn options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    /// Sets the collection prefix.
    #[must_use]
    pub fn db_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.db_prefix = prefix.into();
        self
    }

    /// Returns the collection a workload runs against.
    #[must_use]
    pub fn collection_for(&self, workload: &str) -> String {
        format!("{}_{workload}", self.db_prefix)
    }

    /// Runs every selected workload against `db`.
    ///
    /// A failing workload does not stop the suite. After each workload its
    /// collection and every collection prefixed by it are dropped.
    ///
    /// # Errors
    /// Returns `SuiteError` if the selection is unusable.
    pub async fn run(&self, db: Arc<dyn Database>) -> Result<SuiteReport, SuiteError> {
        let workloads = self.registry.select(&self.selection)?;
        let harness = Harness::new(self.options.clone());
        let mut report = SuiteReport::default();

        info!(count = workloads.len(), prefix = %self.db_prefix, "starting suite");
        for mut config in workloads {
            self.scale.apply(&mut config);
            let collection = self.collection_for(&config.name);

            let outcome = harness.run(&config, Arc::clone(&db), &collection).await;
            if let Err(e) = &outcome {
                warn!(workload = %config.name, error = %e, "workload did not run");
            }

            let cleanup = Self::cleanup(Arc::clone(&db), collection.clone()).await;
            report.entries.push(SuiteEntry {
                workload: config.name.clone(),
                collection,
                outcome,
                cleanup,
            });
        }

        info!(
            success = report.is_success(),
            failed = report.failed().count(),
            "suite finished"
        );
        Ok(report)
    }

    async fn cleanup(db: Arc<dyn Database>, collection: String) -> Option<DbError> {
        let dropped = tokio::task::spawn_blocking(move || db.drop_collections_with_prefix(&collection)).await;
        match dropped {
            Ok(Ok(_)) => None,
            Ok(Err(e)) => {
                warn!(error = %e, "failed to drop workload collections");
                Some(e)
            }
            Err(e) => Some(DbError::Other {
                code: 1,
                message: e.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> WorkloadRegistry {
        let mut registry = WorkloadRegistry::new();
        for name in ["a", "b", "c"] {
            registry
                .register(name, move || WorkloadConfig::builder(name).build())
                .unwrap();
        }
        registry
    }

    fn names(configs: &[WorkloadConfig]) -> Vec<&str> {
        configs.iter().map(|c| c.name.as_str()).collect()
    }

    #[test]
    fn test_empty_include_selects_all() {
        let chosen = registry().select(&SuiteSelection::default()).unwrap();
        assert_eq!(names(&chosen), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_exclude_wins() {
        let selection = SuiteSelection {
            include: vec!["a".to_string(), "b".to_string()],
            exclude: vec!["b".to_string()],
        };
        let chosen = registry().select(&selection).unwrap();
        assert_eq!(names(&chosen), vec!["a"]);
    }

    #[test]
    fn test_unknown_and_empty_selection() {
        let unknown = SuiteSelection {
            include: vec!["zzz".to_string()],
            exclude: Vec::new(),
        };
        assert_eq!(
            registry().select(&unknown).unwrap_err(),
            SuiteError::UnknownWorkload {
                name: "zzz".to_string()
            }
        );

        let nothing = SuiteSelection {
            include: vec!["a".to_string()],
            exclude: vec!["a".to_string()],
        };
        assert_eq!(registry().select(&nothing).unwrap_err(), SuiteError::EmptySelection);
    }

    #[test]
    fn test_duplicate_registration() {
        let mut registry = registry();
        let err = registry
            .register("a", || WorkloadConfig::builder("a").build())
            .unwrap_err();
        assert!(matches!(err, SuiteError::DuplicateWorkload { .. }));
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_collection_naming() {
        let runner = SuiteRunner::new(registry()).db_prefix("fsm");
        assert_eq!(runner.collection_for("agg_out"), "fsm_agg_out");
    }
}
