//! Agent API for action selection

use ndarray::Array1;
use rand::Rng;

use super::{ActionId, ObservationTensors};

/// Inputs provided to an agent when selecting an action
pub struct AgentInput<'a> {
    /// Observation tensors of the controlled player
    pub observation: &'a ObservationTensors,

    /// Mask over action IDs:
    /// action_mask[id] == 1.0 if the action is legal
    pub action_mask: &'a Array1<f32>,

    /// Number of populated entries in the legal-action list
    pub num_legal_actions: usize,
}

/// Trait for anything that can choose actions in the environment:
/// random policy, neural-net-based policy, or scripted play.
pub trait Agent {
    /// Choose an action given an observation and validity mask.
    ///
    /// Requirement:
    /// - Should only return ActionIds for which action_mask[id] == 1.0.
    ///   Anything else decodes to NOOP.
    /// - May use rng for exploration.
    fn select_action(&mut self, input: &AgentInput, rng: &mut impl Rng) -> ActionId;
}

/// Random agent that uniformly samples from legal actions
#[derive(Clone, Debug, Default)]
pub struct RandomAgent;

impl RandomAgent {
    pub fn new() -> Self {
        Self
    }
}

impl Agent for RandomAgent {
    /// Falls back to index 0 when nothing is legal; the environment decodes
    /// that to NOOP.
    fn select_action(&mut self, input: &AgentInput, rng: &mut impl Rng) -> ActionId {
        let legal_ids: Vec<ActionId> = input
            .action_mask
            .iter()
            .enumerate()
            .filter(|(_, &v)| v > 0.0)
            .map(|(id, _)| id as ActionId)
            .collect();

        if legal_ids.is_empty() {
            return 0;
        }
        legal_ids[rng.random_range(0..legal_ids.len())]
    }
}
