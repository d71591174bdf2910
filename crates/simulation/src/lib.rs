//! Deterministic consensus simulation harness.
//!
//! This crate owns the distributed environment - per-process state, message
//! buffers, active timeouts, and bookkeeping - and advances it one event per
//! step:
//!
//! ```text
//! step = deliver one buffered message
//!      | fire one active timeout
//!      | inject one Byzantine message
//! ```
//!
//! Nondeterministic choices (which branch, which process, which message) are
//! drawn from a seeded ChaCha8 RNG, so a run is a pure function of its seed:
//! same seed, same trace. Accelerated step variants batch several deliveries
//! or timeout firings into one harness action for faster exploration.
//!
//! The harness is generic over the consensus logic via
//! [`tendersim_core::ConsensusProcess`]; [`scenario`] instantiates it for
//! the Tendermint process and adds deterministic, named actions for
//! regression traces, and [`properties`] provides the safety checks
//! (agreement, validity, accountability) evaluated over the environment.

mod runner;
pub mod properties;
pub mod scenario;

pub use runner::{HarnessError, SimConfig, Simulation, SimulationStats, StepOutcome};
pub use scenario::{new_simulation, ScenarioError, TendermintSimulation};
