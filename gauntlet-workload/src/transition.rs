//! Compiled transition table.
//!
//! States are numbered densely in name order. For each source state the table
//! keeps only targets with positive weight, alongside a running sum of their
//! weights, so sampling is one uniform draw and a binary search.

use std::collections::BTreeMap;

use gauntlet_core::StateId;
use rand::Rng;

/// Viable outgoing transitions of one state.
#[derive(Debug, Clone, Default)]
struct Row {
    targets: Vec<StateId>,
    /// `cumulative[i]` is the sum of weights of `targets[..=i]`.
    cumulative: Vec<f64>,
}

impl Row {
    fn total(&self) -> f64 {
        self.cumulative.last().copied().unwrap_or(0.0)
    }
}

/// Immutable weighted transition table shared by every executor of a run.
#[derive(Debug, Clone)]
pub struct TransitionTable {
    names: Vec<String>,
    rows: Vec<Row>,
}

impl TransitionTable {
    /// Builds the table for `states` from a source -> target -> weight map.
    ///
    /// Targets with zero weight, and sources or targets that are not in
    /// `states`, are left out. Validation reports those before a table is
    /// built.
    pub fn build<'a, I>(states: I, transitions: &BTreeMap<String, BTreeMap<String, f64>>) -> Self
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut names: Vec<String> = states.into_iter().cloned().collect();
        names.sort();
        names.dedup();

        let mut table = Self {
            rows: vec![Row::default(); names.len()],
            names,
        };

        for (from, targets) in transitions {
            let Some(from) = table.state_id(from) else {
                continue;
            };
            let mut row = Row::default();
            let mut total = 0.0;
            for (to, &weight) in targets {
                let Some(to) = table.state_id(to) else {
                    continue;
                };
                if weight > 0.0 && weight.is_finite() {
                    total += weight;
                    row.targets.push(to);
                    row.cumulative.push(total);
                }
            }
            table.rows[from.index()] = row;
        }

        table
    }

    /// Returns the number of states.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns true if the table has no states.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Looks up a state by name.
    #[must_use]
    pub fn state_id(&self, name: &str) -> Option<StateId> {
        self.names
            .binary_search_by(|probe| probe.as_str().cmp(name))
            .ok()
            .map(StateId::from_index)
    }

    /// Returns the name of a state.
    #[must_use]
    pub fn state_name(&self, id: StateId) -> Option<&str> {
        self.names.get(id.index()).map(String::as_str)
    }

    /// Returns the sum of viable weights out of `from`.
    #[must_use]
    pub fn total_weight(&self, from: StateId) -> f64 {
        self.rows.get(from.index()).map_or(0.0, Row::total)
    }

    /// Returns the normalized probability of moving from `from` to `to`.
    #[must_use]
    pub fn probability(&self, from: StateId, to: StateId) -> f64 {
        let Some(row) = self.rows.get(from.index()) else {
            return 0.0;
        };
        let total = row.total();
        if total <= 0.0 {
            return 0.0;
        }
        let Some(pos) = row.targets.iter().position(|&t| t == to) else {
            return 0.0;
        };
        let previous = if pos == 0 { 0.0 } else { row.cumulative[pos - 1] };
        (row.cumulative[pos] - previous) / total
    }

    /// Draws the next state after `from`.
    ///
    /// Returns `None` if `from` has no transition with positive weight.
    pub fn sample<R: Rng + ?Sized>(&self, from: StateId, rng: &mut R) -> Option<StateId> {
        let row = self.rows.get(from.index())?;
        let total = row.total();
        if row.targets.is_empty() || total <= 0.0 {
            return None;
        }
        let u = rng.gen_range(0.0..total);
        let pos = row.cumulative.partition_point(|&c| c <= u);
        // Rounding can leave `u` at the very top of the range.
        row.targets
            .get(pos)
            .or_else(|| row.targets.last())
            .copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::seeded_stream;

    fn table(edges: &[(&str, &str, f64)]) -> TransitionTable {
        let mut transitions: BTreeMap<String, BTreeMap<String, f64>> = BTreeMap::new();
        let mut states = Vec::new();
        for &(from, to, weight) in edges {
            transitions
                .entry(from.to_string())
                .or_default()
                .insert(to.to_string(), weight);
            states.push(from.to_string());
            states.push(to.to_string());
        }
        TransitionTable::build(&states, &transitions)
    }

    #[test]
    fn test_ids_follow_name_order() {
        let t = table(&[("b", "a", 1.0), ("a", "b", 1.0)]);
        assert_eq!(t.len(), 2);
        assert_eq!(t.state_id("a"), Some(StateId::new(0)));
        assert_eq!(t.state_name(StateId::new(1)), Some("b"));
        assert_eq!(t.state_id("c"), None);
    }

    #[test]
    fn test_single_target_is_certain() {
        let t = table(&[("a", "b", 0.3), ("b", "a", 7.0)]);
        let a = t.state_id("a").unwrap();
        let b = t.state_id("b").unwrap();
        let mut rng = seeded_stream(1, 1);
        for _ in 0..100 {
            assert_eq!(t.sample(a, &mut rng), Some(b));
        }
    }

    #[test]
    fn test_zero_weight_targets_never_drawn() {
        let t = table(&[("a", "b", 0.0), ("a", "c", 1.0)]);
        let a = t.state_id("a").unwrap();
        let c = t.state_id("c").unwrap();
        let mut rng = seeded_stream(2, 1);
        for _ in 0..1000 {
            assert_eq!(t.sample(a, &mut rng), Some(c));
        }
        assert!((t.probability(a, c) - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_no_viable_transition() {
        let t = table(&[("a", "b", 0.0)]);
        let a = t.state_id("a").unwrap();
        let b = t.state_id("b").unwrap();
        let mut rng = seeded_stream(3, 1);
        assert_eq!(t.sample(a, &mut rng), None);
        assert_eq!(t.sample(b, &mut rng), None);
        assert!(t.total_weight(a).abs() < f64::EPSILON);
    }

    #[test]
    fn test_frequencies_converge_to_weights() {
        let t = table(&[("s", "x", 1.0), ("s", "y", 2.0), ("s", "z", 7.0)]);
        let s = t.state_id("s").unwrap();
        let mut counts = [0u32; 4];
        let mut rng = seeded_stream(4, 1);
        let draws = 10_000;
        for _ in 0..draws {
            let next = t.sample(s, &mut rng).unwrap();
            counts[next.index()] += 1;
        }

        for (name, expected) in [("x", 0.1), ("y", 0.2), ("z", 0.7)] {
            let id = t.state_id(name).unwrap();
            let observed = f64::from(counts[id.index()]) / f64::from(draws);
            assert!(
                (observed - expected).abs() < 0.02,
                "{name}: observed {observed}, expected {expected}"
            );
            assert!((t.probability(s, id) - expected).abs() < 1e-9);
        }
    }
}
