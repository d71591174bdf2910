//! Model configuration: the node partition, proposer schedule, and value book.

use crate::{NodeId, Round, Value};
use std::collections::{BTreeMap, BTreeSet};

/// Errors that can occur when validating a model configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A node appears in both the correct and the faulty set.
    #[error("process {0} is listed as both correct and faulty")]
    OverlappingSets(NodeId),

    /// A round has a configured value but no proposer.
    #[error("round {0} has a value but no proposer")]
    MissingProposer(Round),

    /// A configured round is negative.
    #[error("round {0} is negative")]
    NegativeRound(Round),
}

/// Static configuration of one consensus instance.
///
/// Fixes the node set (partitioned into correct and faulty processes), the
/// Byzantine bound `f`, the proposer schedule, and the value each proposer
/// would propose per round. A value is *valid* iff some round whose proposer
/// is correct carries it; correct proposers only ever propose their
/// configured value (or a carried valid value), so this is exactly the set
/// of values a correct process may decide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelConfig {
    f: usize,
    correct: BTreeSet<NodeId>,
    faulty: BTreeSet<NodeId>,
    proposer: BTreeMap<Round, NodeId>,
    values: BTreeMap<Round, Value>,
    /// Precomputed `{ values[r] | proposer[r] correct }`.
    valid_values: BTreeSet<Value>,
}

impl ModelConfig {
    /// Create and validate a configuration.
    ///
    /// # Arguments
    ///
    /// * `f` - Upper bound on the number of faulty processes
    /// * `correct` / `faulty` - Disjoint node sets; their union is the network
    /// * `proposer` - Proposer per round; must cover every round in `values`
    /// * `values` - The value each round's proposer would propose
    pub fn new(
        f: usize,
        correct: impl IntoIterator<Item = NodeId>,
        faulty: impl IntoIterator<Item = NodeId>,
        proposer: BTreeMap<Round, NodeId>,
        values: BTreeMap<Round, Value>,
    ) -> Result<Self, ConfigError> {
        let correct: BTreeSet<NodeId> = correct.into_iter().collect();
        let faulty: BTreeSet<NodeId> = faulty.into_iter().collect();

        if let Some(&node) = correct.intersection(&faulty).next() {
            return Err(ConfigError::OverlappingSets(node));
        }
        for &round in proposer.keys().chain(values.keys()) {
            if round < 0 {
                return Err(ConfigError::NegativeRound(round));
            }
        }
        for &round in values.keys() {
            if !proposer.contains_key(&round) {
                return Err(ConfigError::MissingProposer(round));
            }
        }

        let valid_values = values
            .iter()
            .filter(|(round, _)| proposer.get(round).is_some_and(|p| correct.contains(p)))
            .map(|(_, &value)| value)
            .collect();

        Ok(Self {
            f,
            correct,
            faulty,
            proposer,
            values,
            valid_values,
        })
    }

    // ─── Node partition ───

    /// The Byzantine bound.
    pub fn f(&self) -> usize {
        self.f
    }

    /// The correct processes.
    pub fn correct(&self) -> &BTreeSet<NodeId> {
        &self.correct
    }

    /// The faulty processes.
    pub fn faulty(&self) -> &BTreeSet<NodeId> {
        &self.faulty
    }

    /// All processes, correct and faulty.
    pub fn nodes(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.correct.iter().chain(self.faulty.iter()).copied()
    }

    // ─── Schedule ───

    /// The proposer of `round`, if the schedule covers it.
    pub fn proposer_of(&self, round: Round) -> Option<NodeId> {
        self.proposer.get(&round).copied()
    }

    /// The configured value for `round`, if any.
    pub fn value_of(&self, round: Round) -> Option<Value> {
        self.values.get(&round).copied()
    }

    /// The rounds the value book covers.
    pub fn rounds(&self) -> impl Iterator<Item = Round> + '_ {
        self.values.keys().copied()
    }

    /// The full value book.
    pub fn values(&self) -> &BTreeMap<Round, Value> {
        &self.values
    }

    // ─── Derived quantities ───

    /// The quorum size: `2f + 1` distinct sources.
    pub fn quorum(&self) -> usize {
        2 * self.f + 1
    }

    /// The set of valid values.
    pub fn valid_values(&self) -> &BTreeSet<Value> {
        &self.valid_values
    }

    /// Whether `value` is valid, i.e. proposable by a correct proposer.
    pub fn is_valid(&self, value: Value) -> bool {
        self.valid_values.contains(&value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P1: NodeId = NodeId("p1");
    const P2: NodeId = NodeId("p2");
    const P3: NodeId = NodeId("p3");
    const P4: NodeId = NodeId("p4");
    const V0: Value = Value("v0");
    const V1: Value = Value("v1");
    const V2: Value = Value("v2");

    fn four_node_config() -> ModelConfig {
        ModelConfig::new(
            1,
            [P1, P2, P3],
            [P4],
            BTreeMap::from([(0, P1), (1, P2), (2, P3), (3, P4), (4, P1)]),
            BTreeMap::from([(0, V0), (1, V1), (2, V0), (3, V2), (4, V0)]),
        )
        .expect("valid configuration")
    }

    #[test]
    fn test_quorum_is_two_f_plus_one() {
        let config = four_node_config();
        assert_eq!(config.quorum(), 3);
    }

    #[test]
    fn test_valid_values_exclude_faulty_proposers() {
        let config = four_node_config();

        // v2 is only ever proposed by p4 (round 3), which is faulty.
        assert!(config.is_valid(V0));
        assert!(config.is_valid(V1));
        assert!(!config.is_valid(V2));
        assert_eq!(
            config.valid_values(),
            &BTreeSet::from([V0, V1]),
            "valid values are exactly those with a correct proposer round"
        );
    }

    #[test]
    fn test_overlapping_sets_rejected() {
        let err = ModelConfig::new(
            1,
            [P1, P2],
            [P2, P3],
            BTreeMap::new(),
            BTreeMap::new(),
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::OverlappingSets(P2));
    }

    #[test]
    fn test_value_round_without_proposer_rejected() {
        let err = ModelConfig::new(
            1,
            [P1],
            [],
            BTreeMap::from([(0, P1)]),
            BTreeMap::from([(0, V0), (1, V1)]),
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::MissingProposer(1));
    }

    #[test]
    fn test_negative_round_rejected() {
        let err = ModelConfig::new(
            1,
            [P1],
            [],
            BTreeMap::from([(-1, P1)]),
            BTreeMap::new(),
        )
        .unwrap_err();
        assert_eq!(err, ConfigError::NegativeRound(-1));
    }

    #[test]
    fn test_schedule_lookups() {
        let config = four_node_config();
        assert_eq!(config.proposer_of(0), Some(P1));
        assert_eq!(config.proposer_of(3), Some(P4));
        assert_eq!(config.proposer_of(99), None);
        assert_eq!(config.value_of(2), Some(V0));
        assert_eq!(config.value_of(99), None);
        assert_eq!(config.nodes().count(), 4);
    }
}
