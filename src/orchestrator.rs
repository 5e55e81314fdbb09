//! The control loop: ties the twin, forecaster, controllers, and
//! trainer together with safety fallback supervision.

use std::fmt;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::{info, warn};

use crate::config::ScenarioConfig;
use crate::controller::{DecisionMaker, LearnedController, RuleBasedController};
use crate::error::GridError;
use crate::forecast::Forecaster;
use crate::rl::policy::PolicyNetwork;
use crate::rl::trainer::PpoTrainer;
use crate::rl::trajectory::{Transition, TrajectoryBuffer};
use crate::stats::{GridStatistics, StatsReport};
use crate::twin::engine::DigitalTwin;
use crate::twin::event::{ActiveEvent, EventKind};
use crate::twin::types::{Action, GridState, Observation};

/// Forecaster refit cadence in recorded samples.
const FORECAST_REFIT_INTERVAL: usize = 100;

/// Lifecycle phase of the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Training,
    Ready,
    Running,
    Paused,
    Stopped,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Idle => "idle",
            Phase::Training => "training",
            Phase::Ready => "ready",
            Phase::Running => "running",
            Phase::Paused => "paused",
            Phase::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Which controller drives the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Legacy,
    Learned,
}

/// Per-tick status returned by [`Orchestrator::step`].
#[derive(Debug, Clone)]
pub struct LoopStatus {
    pub phase: Phase,
    pub step: usize,
    pub controller: &'static str,
    pub rationale: String,
    pub fallback_active: bool,
    pub action: Action,
    pub state: GridState,
    pub reward: f32,
    pub episode_done: bool,
}

/// Summary of one training session.
#[derive(Debug, Clone)]
pub struct TrainingSummary {
    pub episodes: usize,
    pub episode_rewards: Vec<f32>,
    pub updates: usize,
    pub discarded_updates: usize,
}

impl TrainingSummary {
    pub fn mean_reward(&self) -> f32 {
        if self.episode_rewards.is_empty() {
            0.0
        } else {
            self.episode_rewards.iter().sum::<f32>() / self.episode_rewards.len() as f32
        }
    }
}

/// Supervises the control loop.
///
/// The orchestrator owns the twin, the forecaster, both controllers,
/// and the fallback state machine. When the learned policy drives the
/// grid, sustained low stability, repeated hard violations, or numeric
/// instability hand control to the legacy controller until conditions
/// recover.
pub struct Orchestrator {
    cfg: ScenarioConfig,
    twin: DigitalTwin,
    forecaster: Forecaster,
    legacy: RuleBasedController,
    learned: Option<LearnedController>,
    trainer: Option<PpoTrainer>,
    buffer: TrajectoryBuffer,
    rng: StdRng,
    phase: Phase,
    strategy: Strategy,
    loop_steps: usize,
    episode_index: u64,
    trained_episodes: usize,
    fallback_active: bool,
    consecutive_low: usize,
    consecutive_violating: usize,
    consecutive_ok: usize,
    instability_count: usize,
    stats: GridStatistics,
    comparison: Option<(DigitalTwin, GridStatistics)>,
}

impl Orchestrator {
    /// Builds an orchestrator after validating the configuration.
    ///
    /// # Errors
    ///
    /// Returns the first configuration error if validation fails.
    pub fn new(cfg: ScenarioConfig, strategy: Strategy) -> Result<Self, GridError> {
        if let Some(e) = cfg.validate().into_iter().next() {
            return Err(e.into());
        }
        let legacy = RuleBasedController::new(&cfg);
        let forecaster = Forecaster::new(cfg.forecast.clone());
        let twin = DigitalTwin::new(cfg.clone());
        let rng = StdRng::seed_from_u64(cfg.simulation.seed.wrapping_add(1));
        Ok(Self {
            cfg,
            twin,
            forecaster,
            legacy,
            learned: None,
            trainer: None,
            buffer: TrajectoryBuffer::new(),
            rng,
            phase: Phase::Idle,
            strategy,
            loop_steps: 0,
            episode_index: 0,
            trained_episodes: 0,
            fallback_active: false,
            consecutive_low: 0,
            consecutive_violating: 0,
            consecutive_ok: 0,
            instability_count: 0,
            stats: GridStatistics::new(),
            comparison: None,
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    pub fn fallback_active(&self) -> bool {
        self.fallback_active
    }

    pub fn trained_episodes(&self) -> usize {
        self.trained_episodes
    }

    pub fn state(&self) -> &GridState {
        self.twin.state()
    }

    /// Installs a pre-trained policy and moves to `Ready`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the policy's observation
    /// dimension does not match the scenario's.
    pub fn install_policy(&mut self, policy: PolicyNetwork) -> Result<(), GridError> {
        if policy.obs_dim() != self.obs_dim() {
            return Err(GridError::Configuration(crate::config::ConfigError {
                field: "policy".to_string(),
                message: format!(
                    "policy expects {} observation features, scenario produces {}",
                    policy.obs_dim(),
                    self.obs_dim()
                ),
            }));
        }
        let trainer = PpoTrainer::new(self.cfg.ppo.clone(), &policy, &mut self.rng);
        self.learned = Some(LearnedController::new(policy));
        self.trainer = Some(trainer);
        self.set_phase(Phase::Ready);
        Ok(())
    }

    /// Enables the side-by-side legacy baseline: an identically seeded
    /// twin stepped in lockstep under the legacy controller.
    pub fn enable_comparison(&mut self) {
        self.comparison = Some((DigitalTwin::new(self.cfg.clone()), GridStatistics::new()));
    }

    pub fn comparison_report(&self) -> Option<StatsReport> {
        self.comparison
            .as_ref()
            .map(|(_, stats)| stats.report(&self.cfg.costs))
    }

    pub fn stats_report(&self) -> StatsReport {
        self.stats.report(&self.cfg.costs)
    }

    /// Injects a disturbance into the live twin (and the comparison
    /// twin, so both see the same conditions).
    pub fn inject_event(&mut self, kind: EventKind) {
        info!(event = %kind, "injecting event");
        self.twin.inject_default_event(kind);
        if let Some((twin, _)) = self.comparison.as_mut() {
            twin.inject_default_event(kind);
        }
        self.stats.record_event_injection();
    }

    /// Injects a disturbance with explicit magnitude and duration.
    pub fn inject_custom_event(&mut self, event: ActiveEvent) {
        info!(event = %event.kind, magnitude = event.magnitude, "injecting event");
        self.twin.inject_event(event.clone());
        if let Some((twin, _)) = self.comparison.as_mut() {
            twin.inject_event(event);
        }
        self.stats.record_event_injection();
    }

    fn set_phase(&mut self, phase: Phase) {
        if self.phase != phase {
            info!(from = %self.phase, to = %phase, "phase transition");
            self.phase = phase;
        }
    }

    fn obs_dim(&self) -> usize {
        use crate::twin::types::{OBS_BASE_DIM, OBS_FORECAST_DIM};
        if self.cfg.forecast.enabled {
            OBS_BASE_DIM + OBS_FORECAST_DIM
        } else {
            OBS_BASE_DIM
        }
    }

    fn forecast_features(&self) -> Option<[f32; 3]> {
        if self.cfg.forecast.enabled {
            Some(self.forecaster.predict())
        } else {
            None
        }
    }

    fn observe(&self) -> Observation {
        self.twin.observe(self.forecast_features())
    }

    fn feed_forecaster(&mut self, state: &GridState) {
        self.forecaster.record(state);
        if self.forecaster.has_window()
            && self.forecaster.history_len() % FORECAST_REFIT_INTERVAL == 0
        {
            self.forecaster.train();
        }
    }

    /// Trains a fresh (or installed) policy for the given number of
    /// episodes, then moves to `Ready`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the strategy is `Legacy`.
    pub fn train(&mut self, episodes: usize) -> Result<TrainingSummary, GridError> {
        if self.strategy == Strategy::Legacy {
            return Err(GridError::Configuration(crate::config::ConfigError {
                field: "strategy".to_string(),
                message: "legacy strategy does not train".to_string(),
            }));
        }
        if self.learned.is_none() {
            let obs_dim = self.obs_dim();
            let policy = PolicyNetwork::new(&mut self.rng, obs_dim, self.cfg.ppo.hidden_dim);
            let trainer = PpoTrainer::new(self.cfg.ppo.clone(), &policy, &mut self.rng);
            self.learned = Some(LearnedController::new(policy));
            self.trainer = Some(trainer);
        }
        self.set_phase(Phase::Training);

        let mut summary = TrainingSummary {
            episodes,
            episode_rewards: Vec::with_capacity(episodes),
            updates: 0,
            discarded_updates: 0,
        };

        for ep in 0..episodes {
            self.episode_index += 1;
            let seed = self.cfg.simulation.seed.wrapping_add(self.episode_index);
            self.twin.reset(seed);
            let mut episode_reward = 0.0;

            loop {
                let obs = self.observe();
                let (Some(learned), Some(trainer)) = (self.learned.as_ref(), self.trainer.as_ref())
                else {
                    break;
                };
                let (raw, log_prob) = learned.policy().sample(&mut self.rng, obs.as_slice());
                let value = trainer.value(obs.as_slice());
                let action = Action::from_vec(&raw);

                let outcome = match self.twin.step(&action) {
                    Ok(o) => o,
                    Err(e) => {
                        warn!(episode = ep, error = %e, "discarding unstable step");
                        break;
                    }
                };
                episode_reward += outcome.reward;
                self.feed_forecaster(&outcome.state);
                self.buffer.push(Transition {
                    obs: obs.as_slice().to_vec(),
                    action: raw,
                    log_prob,
                    reward: outcome.reward,
                    value,
                    done: outcome.done,
                });

                let buffer_full = self.buffer.len() >= self.cfg.ppo.update_threshold;
                if buffer_full || outcome.done {
                    let last_value = if outcome.done {
                        0.0
                    } else {
                        let next = self.observe();
                        self.trainer
                            .as_ref()
                            .map(|t| t.value(next.as_slice()))
                            .unwrap_or(0.0)
                    };
                    self.run_update(last_value, &mut summary);
                }
                if outcome.done {
                    break;
                }
            }
            summary.episode_rewards.push(episode_reward);
        }

        self.trained_episodes += episodes;
        self.set_phase(Phase::Ready);
        Ok(summary)
    }

    fn run_update(&mut self, last_value: f32, summary: &mut TrainingSummary) {
        let (Some(learned), Some(trainer)) = (self.learned.as_mut(), self.trainer.as_mut()) else {
            return;
        };
        match trainer.update(learned.policy_mut(), &self.buffer, last_value, &mut self.rng) {
            Ok(report) => {
                summary.updates += 1;
                tracing::debug!(
                    policy_loss = report.policy_loss,
                    value_loss = report.value_loss,
                    clip_fraction = report.clip_fraction,
                    "policy update"
                );
            }
            Err(e) => {
                summary.discarded_updates += 1;
                warn!(error = %e, "discarded policy update");
            }
        }
        self.buffer.clear();
    }

    /// Takes the trained policy out of the orchestrator, e.g. for
    /// snapshotting.
    pub fn policy(&self) -> Option<&PolicyNetwork> {
        self.learned.as_ref().map(|c| c.policy())
    }

    /// Moves to `Running`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the learned strategy is
    /// selected but no policy has been trained or installed.
    pub fn start(&mut self) -> Result<(), GridError> {
        if self.strategy == Strategy::Learned && self.learned.is_none() {
            return Err(GridError::Configuration(crate::config::ConfigError {
                field: "strategy".to_string(),
                message: "learned strategy requires a trained or loaded policy".to_string(),
            }));
        }
        self.set_phase(Phase::Running);
        Ok(())
    }

    pub fn pause(&mut self) {
        if self.phase == Phase::Running {
            self.set_phase(Phase::Paused);
        }
    }

    pub fn resume(&mut self) {
        if self.phase == Phase::Paused {
            self.set_phase(Phase::Running);
        }
    }

    pub fn stop(&mut self) {
        self.set_phase(Phase::Stopped);
    }

    /// Executes one control tick.
    ///
    /// The step bound is checked before the tick, so exactly
    /// `simulation.max_steps` ticks execute before the loop halts
    /// itself with a warning. Discarded (numerically unstable) ticks
    /// count toward the bound.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if called in any phase other than
    /// `Running`.
    pub fn step(&mut self) -> Result<LoopStatus, GridError> {
        if self.phase != Phase::Running {
            return Err(GridError::Configuration(crate::config::ConfigError {
                field: "phase".to_string(),
                message: format!("step requires the running phase, currently {}", self.phase),
            }));
        }
        if self.loop_steps >= self.cfg.simulation.max_steps {
            let e = GridError::RunawayLoop {
                max_steps: self.cfg.simulation.max_steps,
            };
            warn!(error = %e, "halting control loop");
            self.set_phase(Phase::Stopped);
            return Ok(self.idle_status("step-limit"));
        }

        let obs = self.observe();
        let use_legacy = self.strategy == Strategy::Legacy || self.fallback_active;
        let (action, controller): (Action, &'static str) = match self.learned.as_ref() {
            Some(learned) if !use_legacy => {
                (learned.decide(self.twin.state(), &obs), learned.name())
            }
            _ => (self.legacy.decide(self.twin.state(), &obs), self.legacy.name()),
        };
        let rationale = decision_rationale(&action, self.twin.state());

        let outcome = match self.twin.step(&action) {
            Ok(o) => o,
            Err(e) => {
                warn!(error = %e, "discarding unstable step");
                // a discarded tick still consumes a step slot so a
                // persistently erroring twin cannot spin forever
                self.loop_steps += 1;
                self.instability_count += 1;
                self.maybe_engage_fallback(None);
                return Ok(self.idle_status("instability-discard"));
            }
        };
        self.loop_steps += 1;
        self.feed_forecaster(&outcome.state);
        self.stats.record(&outcome);

        self.step_comparison();

        if self.strategy == Strategy::Learned {
            if self.fallback_active {
                self.update_recovery(&outcome);
            } else {
                self.maybe_engage_fallback(Some(&outcome));
            }
        }

        let episode_done = outcome.done;
        if episode_done {
            self.episode_index += 1;
            let seed = self.cfg.simulation.seed.wrapping_add(self.episode_index);
            info!(
                reason = ?outcome.termination,
                next_seed = seed,
                "episode ended, resetting twin"
            );
            self.twin.reset(seed);
        }

        Ok(LoopStatus {
            phase: self.phase,
            step: self.loop_steps,
            controller,
            rationale,
            fallback_active: self.fallback_active,
            action,
            state: outcome.state,
            reward: outcome.reward,
            episode_done,
        })
    }

    fn idle_status(&self, rationale: &str) -> LoopStatus {
        LoopStatus {
            phase: self.phase,
            step: self.loop_steps,
            controller: "none",
            rationale: rationale.to_string(),
            fallback_active: self.fallback_active,
            action: Action::idle(),
            state: self.twin.state().clone(),
            reward: 0.0,
            episode_done: false,
        }
    }

    fn step_comparison(&mut self) {
        if let Some((twin, stats)) = self.comparison.as_mut() {
            let obs = twin.observe(None);
            let action = self.legacy.decide(twin.state(), &obs);
            match twin.step(&action) {
                Ok(outcome) => {
                    stats.record(&outcome);
                    if outcome.done {
                        twin.reset(self.cfg.simulation.seed.wrapping_add(self.episode_index + 1));
                    }
                }
                Err(e) => warn!(error = %e, "comparison twin discarded a step"),
            }
        }
    }

    fn maybe_engage_fallback(&mut self, outcome: Option<&crate::twin::types::StepOutcome>) {
        let safety = &self.cfg.safety;
        if let Some(outcome) = outcome {
            if outcome.state.stability < safety.fallback_threshold {
                self.consecutive_low += 1;
            } else {
                self.consecutive_low = 0;
            }
            if outcome.violations.is_empty() {
                self.consecutive_violating = 0;
            } else {
                self.consecutive_violating += 1;
            }
        }
        let trigger = if self.consecutive_low >= safety.fallback_steps {
            Some("sustained low stability")
        } else if self.consecutive_violating >= safety.violation_limit {
            Some("repeated safety violations")
        } else if self.instability_count >= safety.instability_limit {
            Some("numeric instability")
        } else {
            None
        };
        if let Some(reason) = trigger {
            warn!(reason, "engaging legacy fallback");
            self.fallback_active = true;
            self.consecutive_low = 0;
            self.consecutive_violating = 0;
            self.consecutive_ok = 0;
            self.stats.record_fallback_engagement();
        }
    }

    fn update_recovery(&mut self, outcome: &crate::twin::types::StepOutcome) {
        if outcome.state.stability >= self.cfg.safety.fallback_threshold
            && outcome.violations.is_empty()
        {
            self.consecutive_ok += 1;
        } else {
            self.consecutive_ok = 0;
        }
        if self.consecutive_ok >= self.cfg.safety.recovery_steps {
            info!(
                recovered_steps = self.consecutive_ok,
                "releasing fallback, policy resumes control"
            );
            self.fallback_active = false;
            self.consecutive_ok = 0;
            self.instability_count = 0;
        }
    }
}

/// Decision-log rationale: the dominant action dimension paired with
/// the state feature that drove it. Comma-free so it stays a single
/// telemetry column.
fn decision_rationale(action: &Action, state: &GridState) -> String {
    let surplus = state.solar_kw + state.wind_kw - state.load_kw;
    match action.dominant_component() {
        "battery_charge" => format!(
            "battery_charge: surplus {surplus:.0} kW soc {:.2}",
            state.battery_soc
        ),
        "battery_discharge" => format!(
            "battery_discharge: deficit {:.0} kW soc {:.2}",
            -surplus, state.battery_soc
        ),
        "load_shift" => format!("load_shift: stability {:.2}", state.stability),
        "grid_import" => format!("grid_import: deficit {:.0} kW", -surplus),
        "curtailment" => format!(
            "curtailment: surplus {surplus:.0} kW soc {:.2}",
            state.battery_soc
        ),
        other => other.to_string(),
    }
}
