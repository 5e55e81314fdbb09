//! Experience storage for on-policy training.

use crate::twin::types::ACTION_DIM;

/// One step of experience as seen by the policy.
#[derive(Debug, Clone)]
pub struct Transition {
    /// Observation the action was chosen from.
    pub obs: Vec<f32>,
    /// Action components actually applied.
    pub action: [f32; ACTION_DIM],
    /// Log-probability of the action under the collecting policy.
    pub log_prob: f32,
    /// Reward received after the action.
    pub reward: f32,
    /// Value estimate at the observation, recorded at collection time.
    pub value: f32,
    /// Whether the episode ended on this step.
    pub done: bool,
}

/// FIFO buffer of transitions consumed whole by each PPO update.
#[derive(Debug, Default)]
pub struct TrajectoryBuffer {
    transitions: Vec<Transition>,
}

impl TrajectoryBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, t: Transition) {
        self.transitions.push(t);
    }

    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    pub fn transitions(&self) -> &[Transition] {
        &self.transitions
    }

    pub fn clear(&mut self) {
        self.transitions.clear();
    }
}
