//! Control strategies: the rule-based legacy controller and the
//! learned policy wrapper, behind a common trait.

use crate::config::ScenarioConfig;
use crate::rl::policy::PolicyNetwork;
use crate::twin::types::{Action, GridState, Observation};

/// Anything that can choose an action for the current grid state.
pub trait DecisionMaker {
    fn decide(&self, state: &GridState, obs: &Observation) -> Action;
    fn name(&self) -> &'static str;
}

/// Threshold-based controller mirroring the plant's legacy automation.
/// Deterministic, stateless, and deliberately conservative; it also
/// serves as the safety fallback when the learned policy misbehaves.
pub struct RuleBasedController {
    max_rate_kw: f32,
}

impl RuleBasedController {
    pub fn new(cfg: &ScenarioConfig) -> Self {
        Self {
            max_rate_kw: cfg.battery.max_rate_kw,
        }
    }
}

impl DecisionMaker for RuleBasedController {
    fn decide(&self, state: &GridState, _obs: &Observation) -> Action {
        let surplus = state.solar_kw + state.wind_kw - state.load_kw;

        let battery_charge = if surplus > 0.0 && state.battery_soc < 0.8 {
            (surplus / self.max_rate_kw).min(1.0)
        } else {
            0.0
        };
        let battery_discharge = if surplus < 0.0 && state.battery_soc > 0.2 {
            (-surplus / self.max_rate_kw).min(1.0)
        } else {
            0.0
        };
        let load_shift = if state.stability < 0.85 { 0.5 } else { 0.0 };
        let grid_import = if surplus < -100.0 {
            0.8
        } else if surplus < 0.0 {
            0.3
        } else {
            0.0
        };
        let curtailment = if state.battery_soc > 0.95 && surplus > 200.0 {
            0.3
        } else {
            0.0
        };

        Action {
            battery_charge,
            battery_discharge,
            load_shift,
            grid_import,
            curtailment,
        }
    }

    fn name(&self) -> &'static str {
        "legacy"
    }
}

/// Wraps a trained policy. Inference is greedy: the action is the
/// policy mean, not a sample.
pub struct LearnedController {
    policy: PolicyNetwork,
}

impl LearnedController {
    pub fn new(policy: PolicyNetwork) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &PolicyNetwork {
        &self.policy
    }

    pub fn policy_mut(&mut self) -> &mut PolicyNetwork {
        &mut self.policy
    }
}

impl DecisionMaker for LearnedController {
    fn decide(&self, _state: &GridState, obs: &Observation) -> Action {
        Action::from_vec(&self.policy.mean(obs.as_slice()))
    }

    fn name(&self) -> &'static str {
        "ppo"
    }
}
