//! Evidence accumulated for accountability analysis.

use std::collections::BTreeSet;
use tendersim_types::{Message, MessageKind};

/// Messages examined while firing quorum-dependent rules, partitioned by
/// kind, plus the breakpoint latch the harness exposes for debugging.
///
/// Evidence only ever grows within a run. It feeds the accountability
/// checks (equivocation and amnesia detection) and never influences
/// protocol decisions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvidencePool {
    /// Proposals examined by quorum rules.
    pub proposals: BTreeSet<Message>,
    /// Prevotes that contributed to a quorum.
    pub prevotes: BTreeSet<Message>,
    /// Precommits that contributed to a quorum.
    pub precommits: BTreeSet<Message>,
    /// Latched when a transition hits its breakpoint output.
    pub breakpoint: bool,
}

impl EvidencePool {
    /// Record one examined message under its kind.
    pub fn record(&mut self, msg: Message) {
        match msg.kind() {
            MessageKind::Propose => self.proposals.insert(msg),
            MessageKind::PreVote => self.prevotes.insert(msg),
            MessageKind::PreCommit => self.precommits.insert(msg),
        };
    }

    /// Total number of recorded messages.
    pub fn len(&self) -> usize {
        self.proposals.len() + self.prevotes.len() + self.precommits.len()
    }

    /// Whether nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
