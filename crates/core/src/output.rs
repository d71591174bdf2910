//! Output commands produced by consensus transitions.

/// Outputs a transition wants applied to the environment.
///
/// Outputs are **commands** - they describe something to do. The harness
/// applies them; the transition itself performs no I/O.
///
/// Every variant is monotonic-commutative (buffer and evidence insertion,
/// flag latching, timeout replacement), so the order in which the outputs of
/// a single transition are applied does not matter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusOutput<M, T> {
    /// Insert a message into every process's buffer, including the sender's,
    /// so the sender observes its own vote through the normal message path.
    Broadcast(M),

    /// Start a timeout for the sending process.
    ///
    /// If a timeout is already active, the replacement policy
    /// ([`crate::ConsensusProcess::should_replace`]) decides whether the new
    /// one takes over or is dropped.
    StartTimeout(T),

    /// Record a message examined while firing a quorum-dependent rule.
    ///
    /// Evidence feeds the accountability analysis only; it never influences
    /// protocol decisions.
    CollectEvidence(M),

    /// Latch the bookkeeping breakpoint flag, for debugging rare rules.
    Breakpoint,
}

impl<M, T> ConsensusOutput<M, T> {
    /// Get the output type name for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            ConsensusOutput::Broadcast(_) => "Broadcast",
            ConsensusOutput::StartTimeout(_) => "StartTimeout",
            ConsensusOutput::CollectEvidence(_) => "CollectEvidence",
            ConsensusOutput::Breakpoint => "Breakpoint",
        }
    }
}
