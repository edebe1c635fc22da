//! Built-in workloads.

use std::sync::Arc;

use crate::config::WorkloadConfig;
use crate::suite::{WorkloadFactory, WorkloadRegistry};

pub mod agg_out;
pub mod create_drop;
pub mod indexed_insert;

const BUILTINS: [(&str, fn() -> WorkloadConfig); 5] = [
    (agg_out::NAME, agg_out::workload),
    (create_drop::NAME, create_drop::workload),
    (indexed_insert::NAME, indexed_insert::workload),
    (indexed_insert::HETEROGENEOUS_NAME, indexed_insert::heterogeneous),
    (indexed_insert::DELETE_NAME, indexed_insert::delete),
];

/// Returns a registry holding every built-in workload.
#[must_use]
pub fn builtin_registry() -> WorkloadRegistry {
    BUILTINS
        .into_iter()
        .map(|(name, factory)| (name.to_string(), Arc::new(factory) as WorkloadFactory))
        .collect()
}

#[cfg(test)]
mod tests {
    use gauntlet_core::Limits;

    use super::*;

    #[test]
    fn test_builtins_are_registered_under_their_names() {
        let registry = builtin_registry();
        assert_eq!(registry.len(), BUILTINS.len());
        for name in registry.names() {
            let config = registry.get(name).unwrap();
            assert_eq!(config.name, name);
            assert!(config.validate(&Limits::default()).is_ok(), "{name}");
        }
    }
}
