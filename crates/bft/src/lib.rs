//! Tendermint consensus state machine, one height.
//!
//! This crate provides a synchronous, per-process implementation of the
//! Tendermint algorithm's single-height core, driven by the simulation
//! harness.
//!
//! # Architecture
//!
//! Each process runs the same pure state machine:
//!
//! - inbound `Propose` / `PreVote` / `PreCommit` → upon-rules fire
//! - expired timeout → timeout handler fires
//!
//! All environment mutation is performed by the harness via returned
//! [`Output`]s (broadcasts, timeout starts, evidence collection).
//!
//! # Terminology
//!
//! - **Round**: Attempt number for reaching a decision. Multiple rounds may
//!   be needed if a proposal fails (timeout, Byzantine proposer, split
//!   votes). Each round has a designated proposer.
//!
//! - **Quorum**: 2f+1 messages with **distinct sources**. Equivocating
//!   duplicates from one source contribute once.
//!
//! - **Locked value/round**: The value this process committed to keep
//!   prevoting for, and the round it locked in. Prevents a process from
//!   helping certify two different values.
//!
//! - **Valid value/round**: The most recent value this process saw a prevote
//!   quorum for. Carried across rounds so a later proposer can re-propose it
//!   with its justifying round.
//!
//! # Safety
//!
//! - **Quorum intersection**: Any two quorums of 2f+1 overlap in at least
//!   one correct process, so conflicting values cannot both gather precommit
//!   quorums while at most f processes are faulty.
//!
//! - **Locking**: Once a process precommits a value it only prevotes for
//!   that value again, unless a later prevote quorum justifies unlocking.
//!
//! - **Evidence**: Every message examined while firing a quorum rule is
//!   recorded in the [`EvidencePool`], so forks beyond the fault bound can
//!   be blamed on equivocation or amnesia by specific processes.

mod byzantine;
mod evidence;
mod state;

pub use byzantine::byzantine_messages;
pub use evidence::EvidencePool;
pub use state::{Output, ProcessState};
