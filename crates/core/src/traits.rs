//! The trait per-process consensus logic implements.

use crate::ConsensusOutput;
use std::fmt;

/// Per-process consensus logic, as seen by the harness.
///
/// Implementors are the per-process state itself: a transition mutates the
/// state and returns the outputs the harness must apply. The harness owns
/// everything else - buffers, active timeouts, and bookkeeping - and calls
/// back through the associated functions to apply the policy-shaped parts
/// (timeout replacement, evidence folding).
///
/// # Guarantees required of implementations
///
/// - **Synchronous**: Transitions never block or await
/// - **Deterministic**: Same state + input = same new state + outputs
/// - **Total**: An unexpected message or timeout is ignored (no outputs,
///   state unchanged), never an error
pub trait ConsensusProcess {
    /// Process identifier; keys the environment maps.
    type Id: Copy + Ord + fmt::Debug;

    /// Message type carried by buffers and broadcasts.
    type Message: Clone + Ord + fmt::Debug;

    /// Timeout payload; at most one is active per process.
    type Timeout: Clone + PartialEq + fmt::Debug;

    /// Auxiliary bookkeeping owned by the harness (evidence, debug flags).
    type Bookkeeping;

    /// Process one inbound message, returning outputs to apply.
    fn receive_message(
        &mut self,
        msg: Self::Message,
    ) -> Vec<ConsensusOutput<Self::Message, Self::Timeout>>;

    /// Process one expired timeout, returning outputs to apply.
    fn fire_timeout(
        &mut self,
        timeout: Self::Timeout,
    ) -> Vec<ConsensusOutput<Self::Message, Self::Timeout>>;

    /// Decide whether a newly started timeout replaces an active one.
    ///
    /// Returns `true` if `new` should take over from `old`; otherwise `new`
    /// is dropped and `old` stays active.
    fn should_replace(old: &Self::Timeout, new: &Self::Timeout) -> bool;

    /// Fold one `CollectEvidence` output into the bookkeeping.
    fn collect_evidence(book: &mut Self::Bookkeeping, msg: Self::Message);

    /// Fold one `Breakpoint` output into the bookkeeping.
    fn hit_breakpoint(book: &mut Self::Bookkeeping);
}
