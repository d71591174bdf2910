//! Timeout events.

use crate::Round;

/// The phase a timeout belongs to.
///
/// The derived ordering follows the phase progression within a round,
/// `Propose < PreVote < PreCommit`; the timeout replacement policy compares
/// phases with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TimeoutKind {
    /// Waiting for the round's proposal.
    Propose,
    /// Waiting for prevotes to converge after a prevote quorum.
    PreVote,
    /// Waiting for precommits to converge after a precommit quorum.
    PreCommit,
}

impl TimeoutKind {
    /// Human-readable kind name.
    pub fn name(self) -> &'static str {
        match self {
            TimeoutKind::Propose => "ProposeTimeout",
            TimeoutKind::PreVote => "PreVoteTimeout",
            TimeoutKind::PreCommit => "PreCommitTimeout",
        }
    }
}

/// A scheduled timeout for a round.
///
/// Timeouts are modelled events delivered by the harness, not wall-clock
/// time. Each process has at most one active timeout; starting a new one
/// either replaces the old one or is ignored, per the replacement policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TimeoutEvent {
    pub kind: TimeoutKind,
    pub round: Round,
}

impl TimeoutEvent {
    /// Create a timeout event.
    pub fn new(kind: TimeoutKind, round: Round) -> Self {
        Self { kind, round }
    }
}
