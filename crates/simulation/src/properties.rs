//! Safety property checks over a simulation.
//!
//! These are observers: they read the environment and the evidence pool and
//! never mutate either. Property violations are the model's user-visible
//! failures; the accompanying trace is whatever schedule produced them.

use crate::scenario::TendermintSimulation;
use std::collections::BTreeSet;
use tendersim_bft::EvidencePool;
use tendersim_types::{Message, ModelConfig, NodeId, Round, Stage, Value};

/// Agreement: no two correct processes hold different decisions.
pub fn agreement(sim: &TendermintSimulation, config: &ModelConfig) -> bool {
    let decisions: Vec<Value> = config
        .correct()
        .iter()
        .filter_map(|&node| sim.state(node).and_then(|s| s.decision()))
        .collect();
    decisions.windows(2).all(|pair| pair[0] == pair[1])
}

/// Validity: every correct decision is a valid value.
pub fn validity(sim: &TendermintSimulation, config: &ModelConfig) -> bool {
    config
        .correct()
        .iter()
        .filter_map(|&node| sim.state(node).and_then(|s| s.decision()))
        .all(|value| config.is_valid(value))
}

/// Whether `node` equivocated within `set`: two distinct messages of the
/// same kind, same source, same round.
pub fn equivocates_in(set: &BTreeSet<Message>, node: NodeId) -> bool {
    let mut rounds = BTreeSet::new();
    for message in set.iter().filter(|m| m.src() == node) {
        // Distinct set elements sharing a round differ in payload.
        if !rounds.insert(message.round()) {
            return true;
        }
    }
    false
}

/// Equivocation: `node` sent two conflicting same-kind messages for one
/// round, as witnessed by the evidence pool.
pub fn equivocation_by(evidence: &EvidencePool, node: NodeId) -> bool {
    equivocates_in(&evidence.proposals, node)
        || equivocates_in(&evidence.prevotes, node)
        || equivocates_in(&evidence.precommits, node)
}

/// Amnesia: `node` proposed two different valid values in rounds `r1 < r2`,
/// each proposal carrying its own round as the valid round, while every
/// round in `[r1, r2)` shows a prevote quorum for the later value in
/// evidence - so the second proposal "forgot" a lock it must have known.
pub fn amnesia_by(evidence: &EvidencePool, config: &ModelConfig, node: NodeId) -> bool {
    let proposals: Vec<(Round, Value)> = evidence
        .proposals
        .iter()
        .filter_map(|m| match *m {
            Message::Propose {
                src,
                round,
                proposal,
                valid_round,
            } if src == node && valid_round == round => Some((round, proposal)),
            _ => None,
        })
        .collect();

    proposals.iter().any(|&(r1, v1)| {
        proposals.iter().any(|&(r2, v2)| {
            r1 < r2
                && v1 != v2
                && config.is_valid(v1)
                && config.is_valid(v2)
                && (r1..r2).all(|round| prevote_quorum_in_evidence(evidence, config, round, v2))
        })
    })
}

/// Whether the evidence holds a prevote quorum for `value` at `round`.
fn prevote_quorum_in_evidence(
    evidence: &EvidencePool,
    config: &ModelConfig,
    round: Round,
    value: Value,
) -> bool {
    let sources: BTreeSet<NodeId> = evidence
        .prevotes
        .iter()
        .filter(|m| m.round() == round && m.vote_id() == Some(value.id()))
        .map(Message::src)
        .collect();
    sources.len() >= config.quorum()
}

/// Accountability: agreement holds, or at least `f + 1` faulty processes
/// each exhibit equivocation or amnesia in the evidence.
pub fn accountability(sim: &TendermintSimulation, config: &ModelConfig) -> bool {
    if agreement(sim, config) {
        return true;
    }
    let evidence = sim.bookkeeping();
    let guilty = config
        .faulty()
        .iter()
        .filter(|&&node| equivocation_by(evidence, node) || amnesia_by(evidence, config, node))
        .count();
    guilty > config.f()
}

/// A per-process state invariant violation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InvariantViolation {
    /// `locked_round` ran ahead of the process's current round.
    #[error("{process} locked round {locked_round} is ahead of its round {round}")]
    LockedRoundAhead {
        process: NodeId,
        locked_round: Round,
        round: Round,
    },

    /// `valid_round` ran ahead of the process's current round.
    #[error("{process} valid round {valid_round} is ahead of its round {round}")]
    ValidRoundAhead {
        process: NodeId,
        valid_round: Round,
        round: Round,
    },

    /// A valid value is held without the round it was justified in.
    #[error("{process} holds a valid value with no valid round")]
    ValidValueWithoutRound { process: NodeId },

    /// The decided stage was reached without a decision.
    #[error("{process} is in the decided stage with no decision")]
    DecidedWithoutDecision { process: NodeId },
}

/// Check the per-process state invariants on every process.
///
/// Checked on reachable states in schedules without Byzantine injections;
/// Byzantine proposals can carry arbitrary rounds into the locking rule, so
/// round-bound invariants only hold for correct-message schedules.
pub fn check_invariants(sim: &TendermintSimulation) -> Result<(), InvariantViolation> {
    for process in sim.processes() {
        let Some(state) = sim.state(process) else {
            continue;
        };
        if state.locked_round() > state.round() {
            return Err(InvariantViolation::LockedRoundAhead {
                process,
                locked_round: state.locked_round(),
                round: state.round(),
            });
        }
        if state.valid_round() > state.round() {
            return Err(InvariantViolation::ValidRoundAhead {
                process,
                valid_round: state.valid_round(),
                round: state.round(),
            });
        }
        if state.valid_value().is_some() && state.valid_round() < 0 {
            return Err(InvariantViolation::ValidValueWithoutRound { process });
        }
        if state.stage() == Stage::Decided && state.decision().is_none() {
            return Err(InvariantViolation::DecidedWithoutDecision { process });
        }
    }
    Ok(())
}
