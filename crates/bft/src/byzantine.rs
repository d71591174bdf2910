//! Candidate messages faulty processes could send.

use std::collections::BTreeSet;
use tendersim_types::{Message, ModelConfig, Round, Value, NIL_ROUND};

/// Enumerate every message a faulty process could send, given the rounds
/// currently observed across correct processes.
///
/// Proposals range over faulty sources, observed rounds, the value book's
/// values, and every justifiable valid round (the book's rounds plus the
/// nil round). Prevotes and precommits range over faulty sources, observed
/// rounds, and value identifiers. The set is finite because the
/// configuration is.
///
/// The harness injects candidates from this set directly into a recipient,
/// bypassing the buffers; nothing here is ever sent on behalf of a correct
/// process.
pub fn byzantine_messages(
    config: &ModelConfig,
    observed_rounds: &BTreeSet<Round>,
) -> BTreeSet<Message> {
    let values: BTreeSet<Value> = config.values().values().copied().collect();
    let mut justifiable_rounds: Vec<Round> = config.rounds().collect();
    justifiable_rounds.push(NIL_ROUND);

    let mut out = BTreeSet::new();
    for &src in config.faulty() {
        for &round in observed_rounds {
            for &value in &values {
                for &valid_round in &justifiable_rounds {
                    out.insert(Message::Propose {
                        src,
                        round,
                        proposal: value,
                        valid_round,
                    });
                }
                out.insert(Message::PreVote {
                    src,
                    round,
                    id: Some(value.id()),
                });
                out.insert(Message::PreCommit {
                    src,
                    round,
                    id: Some(value.id()),
                });
            }
        }
    }
    out
}
