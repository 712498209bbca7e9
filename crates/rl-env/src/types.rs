//! Core RL types for the civgym environment

use civgym_engine::Command;
use ndarray::{Array1, Array2};

use super::ObservationTensors;

/// Discrete action identifier: an index into the current turn's legal-action list
pub type ActionId = u32;

/// Reward value (float)
pub type Reward = f32;

/// Per-step diagnostics returned alongside the observation
#[derive(Clone, Debug, PartialEq)]
pub struct StepInfo {
    /// Engine turn after this step
    pub turn: u32,

    /// Validity mask over the legal-action list, length = capacity.
    /// Exactly `num_legal_actions` leading ones.
    pub action_mask: Array1<f32>,

    /// `capacity × 4` array of `[type, actor_slot, target, sub_target]`
    pub legal_actions: Array2<i32>,

    pub num_legal_actions: usize,

    /// Command the action decoded to. None for reset().
    pub command: Option<Command>,

    /// Free-form message from the engine for the last command
    pub engine_info: String,
}

/// The result of either reset() or step() in an environment
#[derive(Clone, Debug, PartialEq)]
pub struct EnvStep<O = ObservationTensors, R = Reward> {
    /// Observation of the controlled player after this step
    pub observation: O,

    /// Reward for the most recent transition. Zero for reset().
    pub reward: R,

    /// True if the game ended (win, loss or turn limit)
    pub terminated: bool,

    /// True if the engine cut the episode short
    pub truncated: bool,

    pub info: StepInfo,
}

impl<O, R> EnvStep<O, R> {
    /// Episode over for either reason
    pub fn is_done(&self) -> bool {
        self.terminated || self.truncated
    }
}
