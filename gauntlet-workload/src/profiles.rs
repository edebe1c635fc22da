//! Run profiles.
//!
//! A profile bundles everything about a suite run that is not the workloads
//! themselves: seed, wall-clock cap, collection prefix, scale overrides,
//! workload selection and the cluster description.
//!
//! # Example
//!
//! ```ignore
//! use gauntlet_workload::profiles::{load_profile, HarnessProfile};
//!
//! // Load a named profile
//! let profile = load_profile("smoke").unwrap();
//!
//! // Or load from a TOML file
//! let profile = HarnessProfile::from_file("nightly.toml").unwrap();
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{ClusterInfo, WorkloadConfig};
use crate::lifecycle::RunOptions;
use crate::suite::SuiteSelection;

/// How each workload is run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunSection {
    /// Seed for every random stream.
    pub seed: u64,
    /// Wall-clock cap per workload in seconds; 0 disables it.
    pub timeout_secs: u64,
    /// Grace period for cancelled executors in seconds.
    pub cancel_grace_secs: u64,
    /// Prefix of the per-workload collection names.
    pub db_prefix: String,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            seed: 0,
            timeout_secs: 600,
            cancel_grace_secs: 5,
            db_prefix: "gauntlet".to_string(),
        }
    }
}

/// Overrides applied to every selected workload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScaleSection {
    /// Replaces each workload's thread count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threads: Option<u32>,
    /// Replaces each workload's iteration count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iterations: Option<u64>,
    /// Multiplies the thread count after any override, rounding up.
    pub thread_multiplier: f64,
}

impl Default for ScaleSection {
    fn default() -> Self {
        Self {
            threads: None,
            iterations: None,
            thread_multiplier: 1.0,
        }
    }
}

impl ScaleSection {
    /// Applies the overrides to `config`.
    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::cast_sign_loss)] // The multiplier is validated positive.
    pub fn apply(&self, config: &mut WorkloadConfig) {
        if let Some(threads) = self.threads {
            config.thread_count = threads;
        }
        if let Some(iterations) = self.iterations {
            config.iterations = iterations;
        }
        if (self.thread_multiplier - 1.0).abs() > f64::EPSILON {
            let scaled = (f64::from(config.thread_count) * self.thread_multiplier).ceil();
            config.thread_count = (scaled.min(f64::from(u32::MAX)) as u32).max(1);
        }
    }
}

/// A complete run profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessProfile {
    /// Profile name.
    pub name: String,
    /// What the profile is for.
    pub description: String,
    /// Run settings.
    pub run: RunSection,
    /// Scale overrides.
    pub scale: ScaleSection,
    /// Which workloads to run.
    pub selection: SuiteSelection,
    /// Deployment description.
    pub cluster: ClusterInfo,
}

impl Default for HarnessProfile {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            description: "Every workload at its own scale".to_string(),
            run: RunSection::default(),
            scale: ScaleSection::default(),
            selection: SuiteSelection::default(),
            cluster: ClusterInfo::default(),
        }
    }
}

impl HarnessProfile {
    /// Load a profile from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ProfileError> {
        let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| ProfileError::Io {
            path: path.as_ref().display().to_string(),
            source: e,
        })?;
        Self::from_toml(&contents)
    }

    /// Parse a profile from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML cannot be parsed or the profile is invalid.
    pub fn from_toml(toml: &str) -> Result<Self, ProfileError> {
        let profile: Self = toml::from_str(toml).map_err(|e| ProfileError::Parse {
            message: e.to_string(),
        })?;
        profile.validate()?;
        Ok(profile)
    }

    /// Serialize the profile to a TOML string.
    #[must_use]
    pub fn to_toml(&self) -> String {
        toml::to_string_pretty(self).unwrap_or_default()
    }

    /// Checks values serde cannot.
    ///
    /// # Errors
    ///
    /// Returns `ProfileError::Invalid` naming the offending field.
    pub fn validate(&self) -> Result<(), ProfileError> {
        let multiplier = self.scale.thread_multiplier;
        if !multiplier.is_finite() || multiplier <= 0.0 {
            return Err(ProfileError::Invalid {
                field: "scale.thread_multiplier",
                reason: format!("must be a positive number, got {multiplier}"),
            });
        }
        if self.scale.threads == Some(0) {
            return Err(ProfileError::Invalid {
                field: "scale.threads",
                reason: "must be positive".to_string(),
            });
        }
        if self.scale.iterations == Some(0) {
            return Err(ProfileError::Invalid {
                field: "scale.iterations",
                reason: "must be positive".to_string(),
            });
        }
        if self.run.db_prefix.is_empty() {
            return Err(ProfileError::Invalid {
                field: "run.db_prefix",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Returns the options each workload run uses.
    #[must_use]
    pub fn run_options(&self) -> RunOptions {
        let mut options = RunOptions::new()
            .seed(self.run.seed)
            .cancel_grace(Duration::from_secs(self.run.cancel_grace_secs))
            .cluster(self.cluster);
        if self.run.timeout_secs > 0 {
            options = options.timeout(Duration::from_secs(self.run.timeout_secs));
        }
        options
    }
}

/// Error type for profile operations.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    /// I/O error reading profile file.
    #[error("failed to read profile from {path}: {source}")]
    Io {
        /// File path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },
    /// Parse error in TOML.
    #[error("failed to parse profile: {message}")]
    Parse {
        /// Error message.
        message: String,
    },
    /// A field holds an unusable value.
    #[error("invalid profile field {field}: {reason}")]
    Invalid {
        /// Dotted field path.
        field: &'static str,
        /// What is wrong with it.
        reason: String,
    },
    /// Profile not found.
    #[error("profile not found: {name}")]
    NotFound {
        /// Profile name.
        name: String,
    },
}

fn profile(
    name: &str,
    desc: &str,
    timeout_secs: u64,
    threads: Option<u32>,
    iterations: Option<u64>,
    thread_multiplier: f64,
) -> HarnessProfile {
    HarnessProfile {
        name: name.to_string(),
        description: desc.to_string(),
        run: RunSection {
            timeout_secs,
            ..RunSection::default()
        },
        scale: ScaleSection {
            threads,
            iterations,
            thread_multiplier,
        },
        selection: SuiteSelection::default(),
        cluster: ClusterInfo::default(),
    }
}

/// Built-in profiles.
#[must_use]
pub fn builtin_profiles() -> HashMap<&'static str, HarnessProfile> {
    HashMap::from([
        ("smoke", profile("smoke", "Quick sanity pass with two clients", 60, Some(2), Some(10), 1.0)),
        ("default", profile("default", "Every workload at its own scale", 600, None, None, 1.0)),
        ("stress", profile("stress", "Four times the clients, long runs", 3600, None, Some(1000), 4.0)),
    ])
}

/// Load a built-in profile by name.
///
/// # Errors
///
/// Returns an error if the profile name is not found.
pub fn load_profile(name: &str) -> Result<HarnessProfile, ProfileError> {
    builtin_profiles()
        .remove(name)
        .ok_or_else(|| ProfileError::NotFound {
            name: name.to_string(),
        })
}

/// List all available built-in profile names.
#[must_use]
pub fn list_profiles() -> Vec<&'static str> {
    let mut names: Vec<_> = builtin_profiles().keys().copied().collect();
    names.sort_unstable();
    names
}
