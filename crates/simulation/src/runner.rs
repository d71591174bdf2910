//! The generic simulation harness.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::{BTreeMap, BTreeSet};
use tendersim_core::{ConsensusOutput, ConsensusProcess};
use tracing::{debug, trace};

/// Harness configuration.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Percentage chance, in `[0, 100]`, that the timeout branch is enabled
    /// in a step when some process has an active timeout.
    pub timeout_chance: u8,
    /// RNG seed; same seed, same run.
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            timeout_chance: 50,
            seed: 0,
        }
    }
}

/// Statistics collected during a run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SimulationStats {
    /// Steps taken through any step variant.
    pub steps: u64,
    /// Buffered messages delivered.
    pub messages_delivered: u64,
    /// Byzantine messages injected.
    pub byzantine_injected: u64,
    /// Timeouts fired.
    pub timeouts_fired: u64,
    /// Broadcast outputs applied.
    pub broadcasts: u64,
    /// Timeouts started with no prior active timeout.
    pub timeouts_started: u64,
    /// Active timeouts replaced by a newer one.
    pub timeouts_replaced: u64,
    /// Timeout starts dropped by the replacement policy.
    pub timeouts_ignored: u64,
}

/// What one step did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome<I, M, T> {
    /// A buffered message was delivered.
    Delivered { process: I, message: M },
    /// An active timeout was fired.
    TimeoutFired { process: I, timeout: T },
    /// A Byzantine candidate was injected, bypassing the buffer.
    Injected { process: I, message: M },
}

/// Errors from harness operations whose preconditions do not hold.
///
/// The step functions never produce these - their branch guards filter out
/// disabled cases - but the direct primitives (`deliver`, `fire_timeout`,
/// `inject`) surface them to scenario code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HarnessError {
    /// The named process does not exist in the environment.
    #[error("unknown process {0}")]
    UnknownProcess(String),

    /// The message to deliver is not in the process's buffer.
    #[error("message {message} is not pending for {process}")]
    MessageNotPending { process: String, message: String },

    /// The process has no active timeout to fire.
    #[error("{0} has no active timeout")]
    NoActiveTimeout(String),
}

enum Branch {
    Timeout,
    Message,
    Byzantine,
}

/// The simulation environment and its step semantics.
///
/// Owns everything shared: per-process state, per-process message buffers,
/// at most one active timeout per process, the bookkeeping, and the
/// Byzantine candidate set. Every step owns the environment exclusively and
/// applies all outputs of its transition before returning, so steps are
/// atomic.
pub struct Simulation<P: ConsensusProcess> {
    states: BTreeMap<P::Id, P>,
    buffers: BTreeMap<P::Id, BTreeSet<P::Message>>,
    active_timeouts: BTreeMap<P::Id, P::Timeout>,
    bookkeeping: P::Bookkeeping,
    byzantine: BTreeSet<P::Message>,
    timeout_chance: u8,
    rng: ChaCha8Rng,
    stats: SimulationStats,
}

impl<P: ConsensusProcess> Simulation<P> {
    /// Create a new environment.
    ///
    /// Every process starts with a buffer holding all of `initial_messages`
    /// and no active timeout.
    pub fn new(
        states: BTreeMap<P::Id, P>,
        initial_messages: BTreeSet<P::Message>,
        bookkeeping: P::Bookkeeping,
        byzantine: BTreeSet<P::Message>,
        config: SimConfig,
    ) -> Self {
        let buffers = states
            .keys()
            .map(|&id| (id, initial_messages.clone()))
            .collect();
        debug!(
            processes = states.len(),
            initial_messages = initial_messages.len(),
            byzantine_candidates = byzantine.len(),
            seed = config.seed,
            "created simulation"
        );
        Self {
            states,
            buffers,
            active_timeouts: BTreeMap::new(),
            bookkeeping,
            byzantine,
            timeout_chance: config.timeout_chance.min(100),
            rng: ChaCha8Rng::seed_from_u64(config.seed),
            stats: SimulationStats::default(),
        }
    }

    // ─── Accessors ───

    /// A process's state.
    pub fn state(&self, process: P::Id) -> Option<&P> {
        self.states.get(&process)
    }

    /// All process ids.
    pub fn processes(&self) -> impl Iterator<Item = P::Id> + '_ {
        self.states.keys().copied()
    }

    /// A process's inbound buffer.
    pub fn buffer(&self, process: P::Id) -> Option<&BTreeSet<P::Message>> {
        self.buffers.get(&process)
    }

    /// A process's active timeout, if any.
    pub fn active_timeout(&self, process: P::Id) -> Option<&P::Timeout> {
        self.active_timeouts.get(&process)
    }

    /// The harness bookkeeping.
    pub fn bookkeeping(&self) -> &P::Bookkeeping {
        &self.bookkeeping
    }

    /// The Byzantine candidate set.
    pub fn byzantine_candidates(&self) -> &BTreeSet<P::Message> {
        &self.byzantine
    }

    /// Replace the Byzantine candidate set.
    pub fn set_byzantine_candidates(&mut self, candidates: BTreeSet<P::Message>) {
        self.byzantine = candidates;
    }

    /// Run statistics.
    pub fn stats(&self) -> &SimulationStats {
        &self.stats
    }

    // ─── Primitives ───

    /// Deliver one buffered message to a process, consuming exactly that
    /// buffer entry, and apply the transition's outputs.
    pub fn deliver(&mut self, process: P::Id, message: &P::Message) -> Result<(), HarnessError> {
        let Some(buffer) = self.buffers.get_mut(&process) else {
            return Err(HarnessError::UnknownProcess(format!("{process:?}")));
        };
        if !buffer.remove(message) {
            return Err(HarnessError::MessageNotPending {
                process: format!("{process:?}"),
                message: format!("{message:?}"),
            });
        }
        self.stats.messages_delivered += 1;
        let outputs = match self.states.get_mut(&process) {
            Some(state) => state.receive_message(message.clone()),
            None => Vec::new(),
        };
        self.apply(process, outputs);
        Ok(())
    }

    /// Fire a process's active timeout, consuming it, and apply the
    /// transition's outputs.
    pub fn fire_timeout(&mut self, process: P::Id) -> Result<P::Timeout, HarnessError> {
        let Some(timeout) = self.active_timeouts.remove(&process) else {
            return Err(HarnessError::NoActiveTimeout(format!("{process:?}")));
        };
        self.stats.timeouts_fired += 1;
        let outputs = match self.states.get_mut(&process) {
            Some(state) => state.fire_timeout(timeout.clone()),
            None => Vec::new(),
        };
        self.apply(process, outputs);
        Ok(timeout)
    }

    /// Deliver a Byzantine message directly to a process, bypassing the
    /// buffer.
    pub fn inject(&mut self, process: P::Id, message: P::Message) -> Result<(), HarnessError> {
        let Some(state) = self.states.get_mut(&process) else {
            return Err(HarnessError::UnknownProcess(format!("{process:?}")));
        };
        self.stats.byzantine_injected += 1;
        let outputs = state.receive_message(message);
        self.apply(process, outputs);
        Ok(())
    }

    /// Fold one transition's outputs into the environment.
    fn apply(&mut self, from: P::Id, outputs: Vec<ConsensusOutput<P::Message, P::Timeout>>) {
        for output in outputs {
            trace!(process = ?from, output = output.type_name(), "applying output");
            match output {
                ConsensusOutput::Broadcast(message) => {
                    self.stats.broadcasts += 1;
                    for buffer in self.buffers.values_mut() {
                        buffer.insert(message.clone());
                    }
                }
                ConsensusOutput::StartTimeout(new) => {
                    let start = match self.active_timeouts.get(&from) {
                        Some(old) if P::should_replace(old, &new) => {
                            self.stats.timeouts_replaced += 1;
                            true
                        }
                        Some(_) => {
                            self.stats.timeouts_ignored += 1;
                            false
                        }
                        None => {
                            self.stats.timeouts_started += 1;
                            true
                        }
                    };
                    if start {
                        self.active_timeouts.insert(from, new);
                    }
                }
                ConsensusOutput::CollectEvidence(message) => {
                    P::collect_evidence(&mut self.bookkeeping, message);
                }
                ConsensusOutput::Breakpoint => {
                    P::hit_breakpoint(&mut self.bookkeeping);
                }
            }
        }
    }

    // ─── Step semantics ───

    /// Advance the environment by exactly one event.
    ///
    /// Picks uniformly among the enabled branches: fire one timeout (enabled
    /// when any process has one active and a `[1, 100]` draw lands within
    /// `timeout_chance`), deliver one buffered message, or inject one
    /// Byzantine candidate. Returns `None` when nothing is enabled.
    pub fn step(&mut self) -> Option<StepOutcome<P::Id, P::Message, P::Timeout>> {
        self.step_inner(true, true)
    }

    /// Advance by one buffered message delivery only.
    pub fn step_no_timeout(&mut self) -> Option<StepOutcome<P::Id, P::Message, P::Timeout>> {
        let outcome = self.pick_message().map(|(process, message)| {
            let _ = self.deliver(process, &message);
            StepOutcome::Delivered { process, message }
        });
        if outcome.is_some() {
            self.stats.steps += 1;
        }
        outcome
    }

    fn step_inner(
        &mut self,
        allow_timeout: bool,
        allow_byzantine: bool,
    ) -> Option<StepOutcome<P::Id, P::Message, P::Timeout>> {
        let mut branches = Vec::new();
        if allow_timeout && self.timeout_branch_enabled() {
            branches.push(Branch::Timeout);
        }
        if self.buffers.values().any(|b| !b.is_empty()) {
            branches.push(Branch::Message);
        }
        if allow_byzantine && !self.byzantine.is_empty() {
            branches.push(Branch::Byzantine);
        }
        if branches.is_empty() {
            return None;
        }

        let branch = &branches[self.rng.gen_range(0..branches.len())];
        let outcome = match branch {
            Branch::Timeout => {
                let candidates: Vec<P::Id> = self.active_timeouts.keys().copied().collect();
                let process = candidates[self.rng.gen_range(0..candidates.len())];
                let timeout = self.fire_timeout(process).ok()?;
                Some(StepOutcome::TimeoutFired { process, timeout })
            }
            Branch::Message => {
                let (process, message) = self.pick_message()?;
                self.deliver(process, &message).ok()?;
                Some(StepOutcome::Delivered { process, message })
            }
            Branch::Byzantine => {
                let candidates: Vec<P::Message> = self.byzantine.iter().cloned().collect();
                let message = candidates[self.rng.gen_range(0..candidates.len())].clone();
                let processes: Vec<P::Id> = self.states.keys().copied().collect();
                let process = processes[self.rng.gen_range(0..processes.len())];
                self.inject(process, message.clone()).ok()?;
                Some(StepOutcome::Injected { process, message })
            }
        };
        if outcome.is_some() {
            self.stats.steps += 1;
        }
        outcome
    }

    /// Whether the timeout branch is enabled this step.
    ///
    /// Draws from the oracle only when a timeout exists, so disabled runs
    /// stay on the same random trajectory.
    fn timeout_branch_enabled(&mut self) -> bool {
        !self.active_timeouts.is_empty()
            && self.rng.gen_range(1..=100) <= i32::from(self.timeout_chance)
    }

    /// Pick a process with a non-empty buffer, then a message from it.
    fn pick_message(&mut self) -> Option<(P::Id, P::Message)> {
        let candidates: Vec<P::Id> = self
            .buffers
            .iter()
            .filter(|(_, buffer)| !buffer.is_empty())
            .map(|(&id, _)| id)
            .collect();
        if candidates.is_empty() {
            return None;
        }
        let process = candidates[self.rng.gen_range(0..candidates.len())];
        let buffer = &self.buffers[&process];
        let message = buffer
            .iter()
            .nth(self.rng.gen_range(0..buffer.len()))?
            .clone();
        Some((process, message))
    }

    // ─── Accelerated step semantics ───

    /// One accelerated step: like [`step`](Self::step) without the Byzantine
    /// branch, but batching - either a subset of every buffer is delivered,
    /// or the timeouts of a subset of processes fire, in one harness action.
    pub fn step_accelerated(&mut self) -> Vec<StepOutcome<P::Id, P::Message, P::Timeout>> {
        let timeouts_enabled = self.timeout_branch_enabled();
        let messages_enabled = self.buffers.values().any(|b| !b.is_empty());
        match (timeouts_enabled, messages_enabled) {
            (true, true) => {
                if self.rng.gen_bool(0.5) {
                    self.fire_timeouts_accelerated()
                } else {
                    self.deliver_accelerated()
                }
            }
            (true, false) => self.fire_timeouts_accelerated(),
            (false, true) => self.deliver_accelerated(),
            (false, false) => Vec::new(),
        }
    }

    /// For each process, deliver a nondeterministically chosen subset of its
    /// current buffer, in sequence.
    ///
    /// The subset is a snapshot: messages broadcast by the batched
    /// deliveries themselves stay buffered for later steps.
    pub fn deliver_accelerated(&mut self) -> Vec<StepOutcome<P::Id, P::Message, P::Timeout>> {
        let mut outcomes = Vec::new();
        let processes: Vec<P::Id> = self.buffers.keys().copied().collect();
        for process in processes {
            let snapshot: Vec<P::Message> = self.buffers[&process].iter().cloned().collect();
            for message in snapshot {
                if !self.rng.gen_bool(0.5) {
                    continue;
                }
                if self.deliver(process, &message).is_ok() {
                    outcomes.push(StepOutcome::Delivered { process, message });
                }
            }
        }
        if !outcomes.is_empty() {
            self.stats.steps += 1;
        }
        outcomes
    }

    /// Fire the timeouts of a nondeterministically chosen non-empty subset
    /// of the processes that have one active.
    pub fn fire_timeouts_accelerated(&mut self) -> Vec<StepOutcome<P::Id, P::Message, P::Timeout>> {
        let candidates: Vec<P::Id> = self.active_timeouts.keys().copied().collect();
        if candidates.is_empty() {
            return Vec::new();
        }
        let mut chosen: Vec<P::Id> = candidates
            .iter()
            .copied()
            .filter(|_| self.rng.gen_bool(0.5))
            .collect();
        if chosen.is_empty() {
            chosen.push(candidates[self.rng.gen_range(0..candidates.len())]);
        }

        let mut outcomes = Vec::new();
        for process in chosen {
            if let Ok(timeout) = self.fire_timeout(process) {
                outcomes.push(StepOutcome::TimeoutFired { process, timeout });
            }
        }
        self.stats.steps += 1;
        outcomes
    }
}
