//! Core abstractions for the consensus simulator.
//!
//! This crate provides the seam between per-process consensus logic and the
//! harness that drives it:
//!
//! - [`ConsensusOutput`]: All possible outputs of a consensus transition
//! - [`ConsensusProcess`]: The trait per-process logic implements
//!
//! # Architecture
//!
//! The simulator is built on a simple event-driven model:
//!
//! ```text
//! message or timeout → ConsensusProcess transition → outputs
//! ```
//!
//! A transition is:
//! - **Synchronous**: No async, no `.await`
//! - **Deterministic**: Same state + input = same outputs
//! - **Pure-ish**: Mutates self, but performs no I/O
//!
//! All environment mutation is handled by the harness, which:
//! 1. Selects one pending message or active timeout (nondeterministically)
//! 2. Runs the matching transition on that process
//! 3. Folds the returned outputs back into the environment
//!
//! The trait is generic over process id, message, timeout, and bookkeeping,
//! so the harness works for any consensus logic with this shape.

mod output;
mod traits;

pub use output::ConsensusOutput;
pub use traits::ConsensusProcess;
