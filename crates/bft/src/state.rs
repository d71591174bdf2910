//! Per-process Tendermint state and transitions.
//!
//! The upon-rules follow the algorithm of the Tendermint paper (arXiv
//! 1807.04938), one height only. Rules are referenced by the paper's
//! pseudocode line numbers. Several rules can fire from one inbound message;
//! they are threaded through the state in a fixed order and their outputs
//! unioned.

use crate::evidence::EvidencePool;
use std::collections::BTreeSet;
use std::sync::Arc;
use tendersim_core::{ConsensusOutput, ConsensusProcess};
use tendersim_types::{
    Message, ModelConfig, NodeId, Round, Stage, TimeoutEvent, TimeoutKind, Value, NIL_ROUND,
};
use tracing::{debug, info, trace};

/// Outputs produced by one Tendermint transition.
pub type Output = ConsensusOutput<Message, TimeoutEvent>;

/// Per-process Tendermint state for a single height.
///
/// Created in the state a non-proposer is in right after entering round 0:
/// propose stage, nothing locked, nothing received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessState {
    /// This process's name.
    id: NodeId,

    /// Shared model configuration (proposer schedule, value book, quorum).
    config: Arc<ModelConfig>,

    // ─── Round state ───
    round: Round,
    stage: Stage,
    decision: Option<Value>,

    // ─── Locking ───
    locked_value: Option<Value>,
    locked_round: Round,
    valid_value: Option<Value>,
    valid_round: Round,

    // ─── Received messages (insert-only) ───
    received_proposals: BTreeSet<Message>,
    received_prevotes: BTreeSet<Message>,
    received_precommits: BTreeSet<Message>,

    // ─── Rule latches ───
    /// Set on entering the prevote stage via a proposal; consumed by the
    /// first prevote quorum of the round (L34).
    after_prevote_for_first_time: bool,
    /// Latches the precommit-quorum timeout rule (L47), once per round.
    precommit_quorum: bool,
}

/// Count the distinct sources among a slice of messages.
fn distinct_sources(msgs: &[Message]) -> usize {
    msgs.iter()
        .map(Message::src)
        .collect::<BTreeSet<NodeId>>()
        .len()
}

impl ProcessState {
    /// Create the initial state for `id`.
    pub fn new(id: NodeId, config: Arc<ModelConfig>) -> Self {
        Self {
            id,
            config,
            round: 0,
            stage: Stage::Propose,
            decision: None,
            locked_value: None,
            locked_round: NIL_ROUND,
            valid_value: None,
            valid_round: NIL_ROUND,
            received_proposals: BTreeSet::new(),
            received_prevotes: BTreeSet::new(),
            received_precommits: BTreeSet::new(),
            after_prevote_for_first_time: false,
            precommit_quorum: false,
        }
    }

    // ─── Accessors ───

    /// This process's name.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The model configuration this process runs under.
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Current round.
    pub fn round(&self) -> Round {
        self.round
    }

    /// Current stage within the round.
    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// The decided value, if any.
    pub fn decision(&self) -> Option<Value> {
        self.decision
    }

    /// The locked value, if any.
    pub fn locked_value(&self) -> Option<Value> {
        self.locked_value
    }

    /// The round the lock was taken in, or [`NIL_ROUND`].
    pub fn locked_round(&self) -> Round {
        self.locked_round
    }

    /// The most recent value a prevote quorum was seen for, if any.
    pub fn valid_value(&self) -> Option<Value> {
        self.valid_value
    }

    /// The round of the last prevote quorum, or [`NIL_ROUND`].
    pub fn valid_round(&self) -> Round {
        self.valid_round
    }

    /// All proposals received so far.
    pub fn received_proposals(&self) -> &BTreeSet<Message> {
        &self.received_proposals
    }

    /// All prevotes received so far.
    pub fn received_prevotes(&self) -> &BTreeSet<Message> {
        &self.received_prevotes
    }

    /// All precommits received so far.
    pub fn received_precommits(&self) -> &BTreeSet<Message> {
        &self.received_precommits
    }

    // ─── Message filters ───

    /// Prevotes for `round` carrying exactly `id`.
    fn prevotes_for(&self, round: Round, id: Option<tendersim_types::ValueId>) -> Vec<Message> {
        self.received_prevotes
            .iter()
            .filter(|m| m.round() == round && m.vote_id() == id)
            .copied()
            .collect()
    }

    /// Prevotes for `round`, any value.
    fn prevotes_at(&self, round: Round) -> Vec<Message> {
        self.received_prevotes
            .iter()
            .filter(|m| m.round() == round)
            .copied()
            .collect()
    }

    /// Precommits for `round` carrying exactly `id`.
    fn precommits_for(&self, round: Round, id: Option<tendersim_types::ValueId>) -> Vec<Message> {
        self.received_precommits
            .iter()
            .filter(|m| m.round() == round && m.vote_id() == id)
            .copied()
            .collect()
    }

    /// Precommits for `round`, any value.
    fn precommits_at(&self, round: Round) -> Vec<Message> {
        self.received_precommits
            .iter()
            .filter(|m| m.round() == round)
            .copied()
            .collect()
    }

    fn quorum(&self) -> usize {
        self.config.quorum()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Message dispatch
    // ═══════════════════════════════════════════════════════════════════════

    /// Process one inbound message.
    pub fn on_message(&mut self, msg: Message) -> Vec<Output> {
        trace!(process = %self.id, message = msg.type_name(), src = %msg.src(), round = msg.round(), "receiving");
        match msg {
            Message::Propose { .. } => self.on_proposal(msg),
            Message::PreVote { .. } => self.on_prevote(msg),
            Message::PreCommit { .. } => self.on_precommit(msg),
        }
    }

    /// Process one expired timeout.
    pub fn on_timeout(&mut self, timeout: TimeoutEvent) -> Vec<Output> {
        trace!(process = %self.id, timeout = timeout.kind.name(), round = timeout.round, "timeout fired");
        match timeout.kind {
            TimeoutKind::Propose => self.on_propose_timeout(timeout.round),
            TimeoutKind::PreVote => self.on_prevote_timeout(timeout.round),
            TimeoutKind::PreCommit => self.on_precommit_timeout(timeout.round),
        }
    }

    fn on_proposal(&mut self, m: Message) -> Vec<Output> {
        self.received_proposals.insert(m);
        let mut out = self.proposal_at_propose_stage(m);
        out.extend(self.proposal_with_quorum_at_propose_stage(m));
        out.extend(self.proposal_with_quorum_after_prevote(m));
        out
    }

    fn on_prevote(&mut self, m: Message) -> Vec<Output> {
        self.received_prevotes.insert(m);
        let mut out = Vec::new();
        // A new prevote can complete a quorum for a proposal received
        // earlier. Re-check those rules first; the any-value quorum rule
        // consumes the first-time latch.
        let proposals: Vec<Message> = self.received_proposals.iter().copied().collect();
        for p in proposals {
            out.extend(self.proposal_with_quorum_at_propose_stage(p));
            out.extend(self.proposal_with_quorum_after_prevote(p));
        }
        out.extend(self.prevote_quorum_schedules_timeout(m));
        out
    }

    fn on_precommit(&mut self, m: Message) -> Vec<Output> {
        self.received_precommits.insert(m);
        let mut out = self.precommit_quorum_schedules_timeout(m);
        // A new precommit can complete a decision quorum for any proposal.
        let proposals: Vec<Message> = self.received_proposals.iter().copied().collect();
        for p in proposals {
            out.extend(self.decide_on_quorum(p));
        }
        out
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Upon-rules
    // ═══════════════════════════════════════════════════════════════════════

    /// L22: fresh proposal from the round's proposer while at the propose
    /// stage. Move to prevote; vote for the value if it is valid and we are
    /// not locked on something else.
    fn proposal_at_propose_stage(&mut self, m: Message) -> Vec<Output> {
        let Message::Propose {
            src,
            proposal,
            valid_round,
            ..
        } = m
        else {
            return Vec::new();
        };
        if valid_round != NIL_ROUND
            || self.config.proposer_of(self.round) != Some(src)
            || self.stage != Stage::Propose
        {
            return Vec::new();
        }

        self.stage = Stage::PreVote;
        self.after_prevote_for_first_time = true;
        let vote = (self.config.is_valid(proposal)
            && (self.locked_round == NIL_ROUND || self.locked_value == Some(proposal)))
        .then(|| proposal.id());

        debug!(process = %self.id, round = self.round, value = %proposal, vote = ?vote, "prevoting on fresh proposal");
        vec![
            Output::Broadcast(Message::PreVote {
                src: self.id,
                round: self.round,
                id: vote,
            }),
            Output::CollectEvidence(m),
        ]
    }

    /// L28: proposal re-proposed with an earlier valid round, backed by a
    /// prevote quorum from that round, while at the propose stage. Move to
    /// prevote; vote for the value if it is valid and our lock does not
    /// forbid it.
    fn proposal_with_quorum_at_propose_stage(&mut self, m: Message) -> Vec<Output> {
        let Message::Propose {
            src,
            proposal,
            valid_round,
            ..
        } = m
        else {
            return Vec::new();
        };
        if self.config.proposer_of(self.round) != Some(src)
            || self.stage != Stage::Propose
            || valid_round < 0
            || valid_round >= self.round
        {
            return Vec::new();
        }
        let prevotes = self.prevotes_for(valid_round, Some(proposal.id()));
        if distinct_sources(&prevotes) < self.quorum() {
            return Vec::new();
        }

        self.stage = Stage::PreVote;
        self.after_prevote_for_first_time = true;
        let vote = (self.config.is_valid(proposal)
            && (self.locked_round <= valid_round || self.locked_value == Some(proposal)))
        .then(|| proposal.id());

        debug!(
            process = %self.id,
            round = self.round,
            value = %proposal,
            valid_round,
            vote = ?vote,
            "prevoting on re-proposal with quorum from earlier round"
        );
        let mut out = vec![Output::Broadcast(Message::PreVote {
            src: self.id,
            round: self.round,
            id: vote,
        })];
        out.push(Output::CollectEvidence(m));
        out.extend(prevotes.into_iter().map(Output::CollectEvidence));
        out.push(Output::Breakpoint);
        out
    }

    /// L36: a prevote quorum for the proposed value at the current round,
    /// seen at or after the prevote stage for the first time. Remember the
    /// value as valid; if still at the prevote stage, also lock it and
    /// precommit.
    fn proposal_with_quorum_after_prevote(&mut self, m: Message) -> Vec<Output> {
        let Message::Propose {
            src,
            round: proposal_round,
            proposal,
            ..
        } = m
        else {
            return Vec::new();
        };
        if self.config.proposer_of(self.round) != Some(src)
            || !matches!(self.stage, Stage::PreVote | Stage::PreCommit)
            || !self.after_prevote_for_first_time
        {
            return Vec::new();
        }
        let prevotes = self.prevotes_for(self.round, Some(proposal.id()));
        if distinct_sources(&prevotes) < self.quorum() {
            return Vec::new();
        }

        self.valid_value = Some(proposal);
        self.valid_round = self.round;

        let mut out = Vec::new();
        if self.stage == Stage::PreVote {
            self.locked_value = Some(proposal);
            self.locked_round = proposal_round;
            self.stage = Stage::PreCommit;
            debug!(process = %self.id, round = self.round, value = %proposal, "locked value, precommitting");
            out.push(Output::Broadcast(Message::PreCommit {
                src: self.id,
                round: self.round,
                id: Some(proposal.id()),
            }));
        }
        out.push(Output::CollectEvidence(m));
        out.extend(prevotes.into_iter().map(Output::CollectEvidence));
        out
    }

    /// L34: first prevote quorum of the current round (any value) while at
    /// the prevote stage. Schedule the prevote timeout.
    fn prevote_quorum_schedules_timeout(&mut self, m: Message) -> Vec<Output> {
        if self.stage != Stage::PreVote || !self.after_prevote_for_first_time {
            return Vec::new();
        }
        let prevotes = self.prevotes_at(self.round);
        if distinct_sources(&prevotes) < self.quorum() {
            return Vec::new();
        }

        self.after_prevote_for_first_time = false;
        debug!(process = %self.id, round = self.round, "prevote quorum, scheduling prevote timeout");
        let mut out: Vec<Output> = prevotes.into_iter().map(Output::CollectEvidence).collect();
        out.push(Output::StartTimeout(TimeoutEvent::new(
            TimeoutKind::PreVote,
            m.round(),
        )));
        out
    }

    /// L44: a prevote quorum for nil at the prevote stage precommits nil.
    ///
    /// Not wired into the prevote dispatch.
    pub fn nil_prevote_quorum_precommits_nil(&mut self) -> Vec<Output> {
        if self.stage != Stage::PreVote {
            return Vec::new();
        }
        let prevotes = self.prevotes_for(self.round, None);
        if distinct_sources(&prevotes) < self.quorum() {
            return Vec::new();
        }

        self.stage = Stage::PreCommit;
        debug!(process = %self.id, round = self.round, "nil prevote quorum, precommitting nil");
        let mut out = vec![Output::Broadcast(Message::PreCommit {
            src: self.id,
            round: self.round,
            id: None,
        })];
        out.extend(prevotes.into_iter().map(Output::CollectEvidence));
        out
    }

    /// L47: first precommit quorum of the current round (any value).
    /// Schedule the precommit timeout, once per round.
    fn precommit_quorum_schedules_timeout(&mut self, m: Message) -> Vec<Output> {
        if self.precommit_quorum {
            return Vec::new();
        }
        let precommits = self.precommits_at(self.round);
        if distinct_sources(&precommits) < self.quorum() {
            return Vec::new();
        }

        self.precommit_quorum = true;
        debug!(process = %self.id, round = self.round, "precommit quorum, scheduling precommit timeout");
        let mut out: Vec<Output> = precommits
            .into_iter()
            .map(Output::CollectEvidence)
            .collect();
        out.push(Output::StartTimeout(TimeoutEvent::new(
            TimeoutKind::PreCommit,
            m.round(),
        )));
        out
    }

    /// L49: a precommit quorum for a received proposal's value decides it,
    /// provided the value is valid and nothing was decided yet.
    fn decide_on_quorum(&mut self, p: Message) -> Vec<Output> {
        let Message::Propose {
            src,
            round: proposal_round,
            proposal,
            ..
        } = p
        else {
            return Vec::new();
        };
        if self.config.proposer_of(proposal_round) != Some(src) || self.decision.is_some() {
            return Vec::new();
        }
        let precommits = self.precommits_for(proposal_round, Some(proposal.id()));
        if distinct_sources(&precommits) < self.quorum() {
            return Vec::new();
        }
        if !self.config.is_valid(proposal) {
            return Vec::new();
        }

        self.decision = Some(proposal);
        self.stage = Stage::Decided;
        info!(process = %self.id, round = proposal_round, value = %proposal, "decided");
        let mut out = vec![Output::CollectEvidence(p)];
        out.extend(precommits.into_iter().map(Output::CollectEvidence));
        out
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Timeout handlers
    // ═══════════════════════════════════════════════════════════════════════

    /// L55: the round's proposal never arrived. Prevote nil.
    fn on_propose_timeout(&mut self, round: Round) -> Vec<Output> {
        if self.round != round || self.stage != Stage::Propose {
            return Vec::new();
        }
        self.stage = Stage::PreVote;
        debug!(process = %self.id, round = self.round, "propose timeout, prevoting nil");
        vec![Output::Broadcast(Message::PreVote {
            src: self.id,
            round: self.round,
            id: None,
        })]
    }

    /// L61: prevotes never converged on a value. Precommit nil.
    fn on_prevote_timeout(&mut self, round: Round) -> Vec<Output> {
        if self.round != round || self.stage != Stage::PreVote {
            return Vec::new();
        }
        self.stage = Stage::PreCommit;
        debug!(process = %self.id, round = self.round, "prevote timeout, precommitting nil");
        vec![Output::Broadcast(Message::PreCommit {
            src: self.id,
            round: self.round,
            id: None,
        })]
    }

    /// L65: precommits never converged. Move to the next round, whatever the
    /// stage.
    fn on_precommit_timeout(&mut self, round: Round) -> Vec<Output> {
        if self.round != round {
            return Vec::new();
        }
        self.start_round(self.round + 1)
    }

    /// L11-L21: enter a round. The proposer broadcasts its valid value if it
    /// carries one, else the round's configured value; everyone else waits
    /// on the propose timeout.
    ///
    /// Received sets, locks, and the first-time latch survive the round
    /// change; only the stage and the precommit latch reset.
    fn start_round(&mut self, round: Round) -> Vec<Output> {
        self.round = round;
        self.stage = Stage::Propose;
        self.precommit_quorum = false;

        if self.config.proposer_of(round) == Some(self.id) {
            if let Some(proposal) = self.valid_value.or_else(|| self.config.value_of(round)) {
                debug!(process = %self.id, round, value = %proposal, valid_round = self.valid_round, "entering round as proposer");
                return vec![Output::Broadcast(Message::Propose {
                    src: self.id,
                    round,
                    proposal,
                    valid_round: self.valid_round,
                })];
            }
            // Proposer with no value to propose: wait like everyone else.
        }
        trace!(process = %self.id, round, "entering round");
        vec![Output::StartTimeout(TimeoutEvent::new(
            TimeoutKind::Propose,
            round,
        ))]
    }
}

impl ConsensusProcess for ProcessState {
    type Id = NodeId;
    type Message = Message;
    type Timeout = TimeoutEvent;
    type Bookkeeping = EvidencePool;

    fn receive_message(&mut self, msg: Message) -> Vec<Output> {
        self.on_message(msg)
    }

    fn fire_timeout(&mut self, timeout: TimeoutEvent) -> Vec<Output> {
        self.on_timeout(timeout)
    }

    /// A new timeout wins if it is for a later round, or for the same round
    /// and a later phase of the round's progression.
    fn should_replace(old: &TimeoutEvent, new: &TimeoutEvent) -> bool {
        new.round > old.round || (new.round == old.round && new.kind > old.kind)
    }

    fn collect_evidence(book: &mut EvidencePool, msg: Message) {
        book.record(msg);
    }

    fn hit_breakpoint(book: &mut EvidencePool) {
        book.breakpoint = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    const P1: NodeId = NodeId("p1");
    const P2: NodeId = NodeId("p2");
    const P3: NodeId = NodeId("p3");
    const P4: NodeId = NodeId("p4");
    const V0: Value = Value("v0");
    const V1: Value = Value("v1");
    const V2: Value = Value("v2");

    fn config() -> Arc<ModelConfig> {
        Arc::new(
            ModelConfig::new(
                1,
                [P1, P2, P3],
                [P4],
                BTreeMap::from([(0, P1), (1, P2), (2, P3), (3, P4), (4, P1)]),
                BTreeMap::from([(0, V0), (1, V1), (2, V0), (3, V2), (4, V0)]),
            )
            .expect("valid configuration"),
        )
    }

    fn initial_proposal() -> Message {
        Message::Propose {
            src: P1,
            round: 0,
            proposal: V0,
            valid_round: NIL_ROUND,
        }
    }

    fn prevote(src: NodeId, round: Round, value: Value) -> Message {
        Message::PreVote {
            src,
            round,
            id: Some(value.id()),
        }
    }

    fn precommit(src: NodeId, round: Round, value: Value) -> Message {
        Message::PreCommit {
            src,
            round,
            id: Some(value.id()),
        }
    }

    fn broadcasts(outputs: &[Output]) -> Vec<Message> {
        outputs
            .iter()
            .filter_map(|o| match o {
                Output::Broadcast(m) => Some(*m),
                _ => None,
            })
            .collect()
    }

    fn timeouts(outputs: &[Output]) -> Vec<TimeoutEvent> {
        outputs
            .iter()
            .filter_map(|o| match o {
                Output::StartTimeout(t) => Some(*t),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_initial_state_is_round_zero_propose() {
        let state = ProcessState::new(P2, config());
        assert_eq!(state.round(), 0);
        assert_eq!(state.stage(), Stage::Propose);
        assert_eq!(state.decision(), None);
        assert_eq!(state.locked_round(), NIL_ROUND);
        assert_eq!(state.valid_round(), NIL_ROUND);
        assert!(state.received_prevotes().is_empty());
    }

    #[test]
    fn test_fresh_proposal_triggers_prevote() {
        let mut state = ProcessState::new(P2, config());
        let out = state.on_message(initial_proposal());

        assert_eq!(state.stage(), Stage::PreVote);
        assert_eq!(broadcasts(&out), vec![prevote(P2, 0, V0)]);
        assert!(out.contains(&Output::CollectEvidence(initial_proposal())));
    }

    #[test]
    fn test_proposal_from_wrong_proposer_is_ignored() {
        let mut state = ProcessState::new(P2, config());
        let out = state.on_message(Message::Propose {
            src: P3,
            round: 0,
            proposal: V0,
            valid_round: NIL_ROUND,
        });

        assert_eq!(state.stage(), Stage::Propose);
        assert!(broadcasts(&out).is_empty());
        // The proposal is still recorded.
        assert_eq!(state.received_proposals().len(), 1);
    }

    #[test]
    fn test_invalid_value_gets_nil_prevote() {
        // p4 is faulty, so v2 (proposed only in p4's round) is not valid.
        // Reach p4's round via three precommit timeouts.
        let mut state = ProcessState::new(P2, config());
        state.on_timeout(TimeoutEvent::new(TimeoutKind::PreCommit, 0));
        state.on_timeout(TimeoutEvent::new(TimeoutKind::PreCommit, 1));
        state.on_timeout(TimeoutEvent::new(TimeoutKind::PreCommit, 2));
        assert_eq!(state.round(), 3);
        assert_eq!(state.stage(), Stage::Propose);

        let out = state.on_message(Message::Propose {
            src: P4,
            round: 3,
            proposal: V2,
            valid_round: NIL_ROUND,
        });
        assert_eq!(
            broadcasts(&out),
            vec![Message::PreVote {
                src: P2,
                round: 3,
                id: None
            }],
            "a value no correct proposer carries must draw a nil prevote"
        );
    }

    #[test]
    fn test_locked_process_prevotes_nil_for_other_value() {
        let mut state = ProcessState::new(P2, config());
        state.on_message(initial_proposal());
        // Quorum for v0 at round 0: lock v0.
        state.on_message(prevote(P1, 0, V0));
        state.on_message(prevote(P2, 0, V0));
        state.on_message(prevote(P3, 0, V0));
        assert_eq!(state.locked_value(), Some(V0));
        assert_eq!(state.locked_round(), 0);

        // Round 1 proposes v1 fresh; the lock forbids it.
        state.on_timeout(TimeoutEvent::new(TimeoutKind::PreCommit, 0));
        let out = state.on_message(Message::Propose {
            src: P2,
            round: 1,
            proposal: V1,
            valid_round: NIL_ROUND,
        });
        assert_eq!(
            broadcasts(&out),
            vec![Message::PreVote {
                src: P2,
                round: 1,
                id: None
            }]
        );
    }

    #[test]
    fn test_prevote_quorum_locks_and_precommits() {
        let mut state = ProcessState::new(P2, config());
        state.on_message(initial_proposal());
        state.on_message(prevote(P1, 0, V0));
        state.on_message(prevote(P2, 0, V0));
        let out = state.on_message(prevote(P3, 0, V0));

        assert_eq!(state.stage(), Stage::PreCommit);
        assert_eq!(state.locked_value(), Some(V0));
        assert_eq!(state.locked_round(), 0);
        assert_eq!(state.valid_value(), Some(V0));
        assert_eq!(state.valid_round(), 0);
        assert_eq!(broadcasts(&out), vec![precommit(P2, 0, V0)]);
        // Quorum evidence covers the contributing prevotes.
        assert!(out.contains(&Output::CollectEvidence(prevote(P1, 0, V0))));
        assert!(out.contains(&Output::CollectEvidence(prevote(P3, 0, V0))));
    }

    #[test]
    fn test_quorum_counts_distinct_sources_only() {
        let mut state = ProcessState::new(P2, config());
        state.on_message(initial_proposal());
        // Three prevotes but only two distinct sources: p1 equivocates.
        state.on_message(prevote(P1, 0, V0));
        state.on_message(prevote(P1, 0, V1));
        let out = state.on_message(prevote(P2, 0, V0));

        assert_eq!(state.received_prevotes().len(), 3);
        assert_eq!(
            state.stage(),
            Stage::PreVote,
            "two distinct sources must not reach a quorum of three"
        );
        assert!(broadcasts(&out).is_empty());
        assert!(timeouts(&out).is_empty());
    }

    #[test]
    fn test_prevote_quorum_without_proposal_schedules_timeout() {
        let mut state = ProcessState::new(P2, config());
        state.on_message(initial_proposal());
        // Quorum at round 0, but split across values: no lock, only the
        // timeout rule fires.
        state.on_message(prevote(P1, 0, V0));
        state.on_message(prevote(P3, 0, V1));
        let out = state.on_message(Message::PreVote {
            src: P2,
            round: 0,
            id: None,
        });

        assert_eq!(state.stage(), Stage::PreVote);
        assert_eq!(
            timeouts(&out),
            vec![TimeoutEvent::new(TimeoutKind::PreVote, 0)]
        );
        assert!(
            broadcasts(&out).is_empty(),
            "a nil quorum must not precommit: the nil-quorum rule is not dispatched"
        );
    }

    #[test]
    fn test_nil_prevote_quorum_transition_in_isolation() {
        let mut state = ProcessState::new(P2, config());
        state.on_message(initial_proposal());
        for src in [P1, P2, P3] {
            state.on_message(Message::PreVote {
                src,
                round: 0,
                id: None,
            });
        }
        assert_eq!(state.stage(), Stage::PreVote);

        let out = state.nil_prevote_quorum_precommits_nil();
        assert_eq!(state.stage(), Stage::PreCommit);
        assert_eq!(
            broadcasts(&out),
            vec![Message::PreCommit {
                src: P2,
                round: 0,
                id: None
            }]
        );
    }

    #[test]
    fn test_precommit_quorum_schedules_timeout_once() {
        let mut state = ProcessState::new(P2, config());
        state.on_message(precommit(P1, 0, V0));
        state.on_message(precommit(P2, 0, V1));
        let out = state.on_message(Message::PreCommit {
            src: P3,
            round: 0,
            id: None,
        });
        assert_eq!(
            timeouts(&out),
            vec![TimeoutEvent::new(TimeoutKind::PreCommit, 0)]
        );

        // A fourth precommit does not re-fire the latched rule.
        let out = state.on_message(precommit(P4, 0, V0));
        assert!(timeouts(&out).is_empty());
    }

    #[test]
    fn test_precommit_quorum_for_value_decides() {
        let mut state = ProcessState::new(P2, config());
        state.on_message(initial_proposal());
        state.on_message(precommit(P1, 0, V0));
        state.on_message(precommit(P3, 0, V0));
        assert_eq!(state.decision(), None);

        let out = state.on_message(precommit(P4, 0, V0));
        assert_eq!(state.decision(), Some(V0));
        assert_eq!(state.stage(), Stage::Decided);
        assert!(out.contains(&Output::CollectEvidence(initial_proposal())));

        // Decisions are final: further quorums change nothing.
        let before = state.clone();
        state.on_message(precommit(P2, 0, V0));
        assert_eq!(state.decision(), before.decision());
        assert_eq!(state.stage(), Stage::Decided);
    }

    #[test]
    fn test_invalid_value_is_never_decided() {
        let mut state = ProcessState::new(P2, config());
        // A proposal for v2 in p4's round, with a full precommit quorum.
        state.on_message(Message::Propose {
            src: P4,
            round: 3,
            proposal: V2,
            valid_round: NIL_ROUND,
        });
        state.on_message(precommit(P1, 3, V2));
        state.on_message(precommit(P3, 3, V2));
        state.on_message(precommit(P4, 3, V2));

        assert_eq!(
            state.decision(),
            None,
            "a value with no correct proposer round must never be decided"
        );
    }

    #[test]
    fn test_propose_timeout_prevotes_nil() {
        let mut state = ProcessState::new(P2, config());
        let out = state.on_timeout(TimeoutEvent::new(TimeoutKind::Propose, 0));
        assert_eq!(state.stage(), Stage::PreVote);
        assert_eq!(
            broadcasts(&out),
            vec![Message::PreVote {
                src: P2,
                round: 0,
                id: None
            }]
        );

        // Stale round: ignored.
        let mut state = ProcessState::new(P2, config());
        let out = state.on_timeout(TimeoutEvent::new(TimeoutKind::Propose, 1));
        assert_eq!(state.stage(), Stage::Propose);
        assert!(out.is_empty());
    }

    #[test]
    fn test_prevote_timeout_precommits_nil() {
        let mut state = ProcessState::new(P2, config());
        state.on_message(initial_proposal());
        let out = state.on_timeout(TimeoutEvent::new(TimeoutKind::PreVote, 0));
        assert_eq!(state.stage(), Stage::PreCommit);
        assert_eq!(
            broadcasts(&out),
            vec![Message::PreCommit {
                src: P2,
                round: 0,
                id: None
            }]
        );
    }

    #[test]
    fn test_precommit_timeout_advances_round_regardless_of_stage() {
        let mut state = ProcessState::new(P2, config());
        assert_eq!(state.stage(), Stage::Propose);
        let out = state.on_timeout(TimeoutEvent::new(TimeoutKind::PreCommit, 0));

        assert_eq!(state.round(), 1);
        assert_eq!(state.stage(), Stage::Propose);
        // p2 proposes in round 1; no valid value carried, so the configured
        // value goes out with a nil valid round.
        assert_eq!(
            broadcasts(&out),
            vec![Message::Propose {
                src: P2,
                round: 1,
                proposal: V1,
                valid_round: NIL_ROUND,
            }]
        );
    }

    #[test]
    fn test_new_round_non_proposer_waits_on_propose_timeout() {
        let mut state = ProcessState::new(P3, config());
        let out = state.on_timeout(TimeoutEvent::new(TimeoutKind::PreCommit, 0));
        assert_eq!(state.round(), 1);
        assert_eq!(
            timeouts(&out),
            vec![TimeoutEvent::new(TimeoutKind::Propose, 1)]
        );
    }

    #[test]
    fn test_proposer_carries_valid_value_into_new_round() {
        let mut state = ProcessState::new(P2, config());
        state.on_message(initial_proposal());
        state.on_message(prevote(P1, 0, V0));
        state.on_message(prevote(P2, 0, V0));
        state.on_message(prevote(P3, 0, V0));
        assert_eq!(state.valid_value(), Some(V0));

        let out = state.on_timeout(TimeoutEvent::new(TimeoutKind::PreCommit, 0));
        assert_eq!(
            broadcasts(&out),
            vec![Message::Propose {
                src: P2,
                round: 1,
                proposal: V0,
                valid_round: 0,
            }],
            "the proposer must re-propose its valid value, not the round's configured value"
        );
    }

    #[test]
    fn test_reproposal_with_quorum_from_earlier_round() {
        let mut state = ProcessState::new(P2, config());
        state.on_message(initial_proposal());
        state.on_message(prevote(P1, 0, V0));
        state.on_message(prevote(P2, 0, V0));
        state.on_message(prevote(P3, 0, V0));
        state.on_timeout(TimeoutEvent::new(TimeoutKind::PreCommit, 0));
        assert_eq!(state.round(), 1);
        assert_eq!(state.stage(), Stage::Propose);

        let reproposal = Message::Propose {
            src: P2,
            round: 1,
            proposal: V0,
            valid_round: 0,
        };
        let out = state.on_message(reproposal);
        assert_eq!(state.stage(), Stage::PreVote);
        assert_eq!(broadcasts(&out), vec![prevote(P2, 1, V0)]);
        assert!(
            out.contains(&Output::Breakpoint),
            "the re-proposal rule must hit the breakpoint"
        );
    }

    #[test]
    fn test_guard_miss_leaves_state_unchanged() {
        let mut state = ProcessState::new(P2, config());
        state.on_message(initial_proposal());
        let before = state.clone();

        // A single stale-round prevote satisfies no guard.
        let out = state.on_message(prevote(P3, 7, V1));
        assert!(out.is_empty());

        let mut expected = before;
        expected.received_prevotes.insert(prevote(P3, 7, V1));
        assert_eq!(state, expected, "only the received set may change");
    }

    #[test]
    fn test_timeout_replacement_policy() {
        use TimeoutKind::*;
        let replace = <ProcessState as ConsensusProcess>::should_replace;

        // Later round wins, whatever the phases.
        assert!(replace(
            &TimeoutEvent::new(Propose, 0),
            &TimeoutEvent::new(PreVote, 1)
        ));
        assert!(replace(
            &TimeoutEvent::new(PreCommit, 0),
            &TimeoutEvent::new(Propose, 1)
        ));
        // Earlier round never wins.
        assert!(!replace(
            &TimeoutEvent::new(PreVote, 1),
            &TimeoutEvent::new(Propose, 0)
        ));
        // Same round: later phase wins.
        assert!(replace(
            &TimeoutEvent::new(PreVote, 0),
            &TimeoutEvent::new(PreCommit, 0)
        ));
        assert!(!replace(
            &TimeoutEvent::new(PreCommit, 0),
            &TimeoutEvent::new(PreVote, 0)
        ));
        // Same round and phase: keep the old one.
        assert!(!replace(
            &TimeoutEvent::new(PreVote, 0),
            &TimeoutEvent::new(PreVote, 0)
        ));
    }
}
