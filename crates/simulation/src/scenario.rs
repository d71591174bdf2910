//! Tendermint instantiation and deterministic scenario actions.
//!
//! Regression traces need to name their steps exactly: "deliver the one
//! pending prevote from p2 to p1". The actions here locate the unique
//! matching buffer entry (failing the scenario if there are zero or several)
//! and drive the harness primitives with it.

use crate::runner::{HarnessError, SimConfig, Simulation};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tendersim_bft::{byzantine_messages, EvidencePool, ProcessState};
use tendersim_types::{Message, MessageKind, ModelConfig, NodeId, Round, TimeoutEvent, NIL_ROUND};

/// A simulation instantiated with the Tendermint process.
pub type TendermintSimulation = Simulation<ProcessState>;

/// Errors from deterministic scenario actions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScenarioError {
    /// No buffered message matches the requested kind and source.
    #[error("no {kind} from {src} pending for {process}")]
    NoMatch {
        process: NodeId,
        src: NodeId,
        kind: &'static str,
    },

    /// Several buffered messages match; the action is ambiguous.
    #[error("{count} {kind} messages from {src} pending for {process}; expected exactly one")]
    Ambiguous {
        process: NodeId,
        src: NodeId,
        kind: &'static str,
        count: usize,
    },

    /// The underlying harness operation failed its precondition.
    #[error(transparent)]
    Harness(#[from] HarnessError),
}

/// The messages every buffer holds at initialization: the single round-0
/// proposal from the round-0 proposer, carrying a nil valid round.
pub fn initial_messages(config: &ModelConfig) -> BTreeSet<Message> {
    let mut messages = BTreeSet::new();
    if let (Some(src), Some(proposal)) = (config.proposer_of(0), config.value_of(0)) {
        messages.insert(Message::Propose {
            src,
            round: 0,
            proposal,
            valid_round: NIL_ROUND,
        });
    }
    messages
}

/// Build a Tendermint simulation from a model configuration.
///
/// Every process (correct and faulty alike) starts in the round-0 propose
/// stage with the round-0 proposal buffered and no active timeout; the
/// Byzantine candidate set is seeded for round 0.
pub fn new_simulation(config: Arc<ModelConfig>, sim_config: SimConfig) -> TendermintSimulation {
    let states: BTreeMap<NodeId, ProcessState> = config
        .nodes()
        .map(|node| (node, ProcessState::new(node, Arc::clone(&config))))
        .collect();
    let byzantine = byzantine_messages(&config, &BTreeSet::from([0]));
    Simulation::new(
        states,
        initial_messages(&config),
        EvidencePool::default(),
        byzantine,
        sim_config,
    )
}

impl Simulation<ProcessState> {
    /// Deliver the unique pending proposal from `src` to `process`.
    pub fn receive_proposal_from(
        &mut self,
        process: NodeId,
        src: NodeId,
    ) -> Result<Message, ScenarioError> {
        self.receive_unique(process, src, MessageKind::Propose)
    }

    /// Deliver the unique pending prevote from `src` to `process`.
    pub fn receive_prevote_from(
        &mut self,
        process: NodeId,
        src: NodeId,
    ) -> Result<Message, ScenarioError> {
        self.receive_unique(process, src, MessageKind::PreVote)
    }

    /// Deliver the unique pending precommit from `src` to `process`.
    pub fn receive_precommit_from(
        &mut self,
        process: NodeId,
        src: NodeId,
    ) -> Result<Message, ScenarioError> {
        self.receive_unique(process, src, MessageKind::PreCommit)
    }

    /// Inject a Byzantine message directly into `process`.
    pub fn receive_byzantine(
        &mut self,
        process: NodeId,
        message: Message,
    ) -> Result<(), ScenarioError> {
        Ok(self.inject(process, message)?)
    }

    /// Fire the single active timeout of `process`.
    pub fn expire_timeout(&mut self, process: NodeId) -> Result<TimeoutEvent, ScenarioError> {
        Ok(self.fire_timeout(process)?)
    }

    fn receive_unique(
        &mut self,
        process: NodeId,
        src: NodeId,
        kind: MessageKind,
    ) -> Result<Message, ScenarioError> {
        let matches: Vec<Message> = self
            .buffer(process)
            .map(|buffer| {
                buffer
                    .iter()
                    .filter(|m| m.kind() == kind && m.src() == src)
                    .copied()
                    .collect()
            })
            .unwrap_or_default();
        match matches[..] {
            [] => Err(ScenarioError::NoMatch {
                process,
                src,
                kind: kind.name(),
            }),
            [message] => {
                self.deliver(process, &message)?;
                Ok(message)
            }
            _ => Err(ScenarioError::Ambiguous {
                process,
                src,
                kind: kind.name(),
                count: matches.len(),
            }),
        }
    }

    /// The set of rounds correct processes are currently in.
    pub fn observed_rounds(&self, config: &ModelConfig) -> BTreeSet<Round> {
        config
            .correct()
            .iter()
            .filter_map(|&node| self.state(node).map(ProcessState::round))
            .collect()
    }

    /// Recompute the Byzantine candidate set from the rounds correct
    /// processes have reached.
    pub fn refresh_byzantine_candidates(&mut self, config: &ModelConfig) {
        let observed = self.observed_rounds(config);
        self.set_byzantine_candidates(byzantine_messages(config, &observed));
    }
}
