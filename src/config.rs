//! TOML-based scenario configuration and preset definitions.

use std::fmt;
use std::fs;
use std::path::Path;

use serde::Deserialize;

/// Top-level scenario configuration parsed from TOML.
///
/// All fields have defaults matching the baseline microgrid. Load from
/// TOML with [`ScenarioConfig::from_toml_file`] or use
/// [`ScenarioConfig::baseline`] for the built-in default.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Simulation timing and global parameters.
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Solar array parameters.
    #[serde(default)]
    pub solar: SolarConfig,
    /// Wind turbine parameters.
    #[serde(default)]
    pub wind: WindConfig,
    /// Load profile parameters.
    #[serde(default)]
    pub load: LoadConfig,
    /// Battery storage parameters.
    #[serde(default)]
    pub battery: BatteryConfig,
    /// Energy pricing parameters.
    #[serde(default)]
    pub costs: CostConfig,
    /// Reward shaping weights.
    #[serde(default)]
    pub reward: RewardConfig,
    /// PPO training hyperparameters.
    #[serde(default)]
    pub ppo: PpoConfig,
    /// Forecaster parameters.
    #[serde(default)]
    pub forecast: ForecastConfig,
    /// Safety fallback thresholds.
    #[serde(default)]
    pub safety: SafetyConfig,
}

/// Simulation timing and global parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Duration of one timestep in hours.
    pub dt_hours: f32,
    /// Master random seed.
    pub seed: u64,
    /// Hard bound on control-loop steps; the loop halts at this count.
    pub max_steps: usize,
    /// Episode length cap used by the twin's termination check.
    pub episode_max_steps: usize,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            dt_hours: 0.1,
            seed: 42,
            max_steps: 1000,
            episode_max_steps: 1000,
        }
    }
}

/// Solar array parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SolarConfig {
    /// Nameplate capacity (kW).
    pub capacity_kw: f32,
    /// Cloud attenuation coefficient: output scales by `1 - coeff * cloud_cover`.
    pub cloud_attenuation: f32,
}

impl Default for SolarConfig {
    fn default() -> Self {
        Self {
            capacity_kw: 500.0,
            cloud_attenuation: 0.8,
        }
    }
}

/// Wind turbine parameters. The power curve is piecewise:
/// zero below cut-in, linear ramp to rated, flat to cut-out, zero above.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WindConfig {
    /// Nameplate capacity (kW).
    pub capacity_kw: f32,
    /// Cut-in wind speed (m/s).
    pub cut_in_ms: f32,
    /// Rated wind speed (m/s).
    pub rated_ms: f32,
    /// Cut-out wind speed (m/s).
    pub cut_out_ms: f32,
}

impl Default for WindConfig {
    fn default() -> Self {
        Self {
            capacity_kw: 300.0,
            cut_in_ms: 3.0,
            rated_ms: 12.0,
            cut_out_ms: 25.0,
        }
    }
}

/// Load profile parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoadConfig {
    /// Peak demand (kW).
    pub peak_kw: f32,
    /// Gaussian noise standard deviation as a fraction of load.
    pub noise_std: f32,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            peak_kw: 800.0,
            noise_std: 0.1,
        }
    }
}

/// Battery storage parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatteryConfig {
    /// Total energy capacity (kWh).
    pub capacity_kwh: f32,
    /// Maximum charge/discharge power (kW).
    pub max_rate_kw: f32,
    /// One-way conversion efficiency applied on each leg (0.0 to 1.0).
    pub efficiency: f32,
    /// Per-step multiplicative health decay.
    pub health_decay: f32,
}

impl Default for BatteryConfig {
    fn default() -> Self {
        Self {
            capacity_kwh: 1000.0,
            max_rate_kw: 200.0,
            efficiency: 0.95,
            health_decay: 0.9999,
        }
    }
}

/// Energy pricing parameters (currency units per kWh).
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CostConfig {
    /// Price paid per kWh imported from the upstream grid.
    pub import_per_kwh: f32,
    /// Price received per kWh exported.
    pub export_per_kwh: f32,
    /// Battery wear cost per kWh of throughput.
    pub degradation_per_kwh: f32,
    /// Grid emission factor (kg CO2 per kWh) used for avoided-emission stats.
    pub grid_co2_per_kwh: f32,
}

impl Default for CostConfig {
    fn default() -> Self {
        Self {
            import_per_kwh: 7.0,
            export_per_kwh: 4.0,
            degradation_per_kwh: 0.5,
            grid_co2_per_kwh: 0.82,
        }
    }
}

/// Reward shaping weights combined per step into a scalar reward.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RewardConfig {
    /// Weight on the composite stability score.
    pub stability_weight: f32,
    /// Weight on the renewable utilization ratio.
    pub renewable_weight: f32,
    /// Weight on battery health.
    pub health_weight: f32,
    /// Penalty applied when SOC leaves `[soc_low, soc_high]` (negative).
    pub soc_penalty: f32,
    /// Penalty applied when stability drops below the outage level (negative).
    pub instability_penalty: f32,
    /// Lower SOC bound for the penalty band.
    pub soc_low: f32,
    /// Upper SOC bound for the penalty band.
    pub soc_high: f32,
}

impl Default for RewardConfig {
    fn default() -> Self {
        Self {
            stability_weight: 100.0,
            renewable_weight: 20.0,
            health_weight: 10.0,
            soc_penalty: -50.0,
            instability_penalty: -100.0,
            soc_low: 0.15,
            soc_high: 0.95,
        }
    }
}

/// PPO training hyperparameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PpoConfig {
    /// Adam learning rate.
    pub learning_rate: f32,
    /// Discount factor gamma.
    pub gamma: f32,
    /// GAE lambda.
    pub gae_lambda: f32,
    /// PPO clip range epsilon.
    pub clip_epsilon: f32,
    /// Minibatch size.
    pub batch_size: usize,
    /// Optimization epochs per consumed buffer.
    pub epochs_per_update: usize,
    /// Entropy bonus coefficient.
    pub entropy_coef: f32,
    /// Global gradient-norm clip applied before each optimizer step.
    pub max_grad_norm: f32,
    /// Hidden layer width for both networks.
    pub hidden_dim: usize,
    /// Buffer size that triggers an update during collection.
    pub update_threshold: usize,
}

impl Default for PpoConfig {
    fn default() -> Self {
        Self {
            learning_rate: 3e-4,
            gamma: 0.99,
            gae_lambda: 0.95,
            clip_epsilon: 0.2,
            batch_size: 64,
            epochs_per_update: 10,
            entropy_coef: 0.01,
            max_grad_norm: 0.5,
            hidden_dim: 64,
            update_threshold: 256,
        }
    }
}

/// Forecaster parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ForecastConfig {
    /// Whether forecast features are appended to the observation.
    pub enabled: bool,
    /// Input window length in steps.
    pub sequence_length: usize,
    /// Maximum retained history length.
    pub history_cap: usize,
    /// Training epochs when fitting the regressor.
    pub train_epochs: usize,
    /// Gradient-descent learning rate for the regressor.
    pub learning_rate: f32,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sequence_length: 10,
            history_cap: 1000,
            train_epochs: 50,
            learning_rate: 0.01,
        }
    }
}

/// Safety fallback thresholds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SafetyConfig {
    /// Stability level below which a step counts toward fallback engagement.
    pub fallback_threshold: f32,
    /// Consecutive low-stability steps that engage the fallback controller.
    pub fallback_steps: usize,
    /// Consecutive recovered steps required to release the fallback.
    pub recovery_steps: usize,
    /// Hard-bound safety violations that engage the fallback.
    pub violation_limit: usize,
    /// Numeric-instability events that escalate to the fallback.
    pub instability_limit: usize,
}

impl Default for SafetyConfig {
    fn default() -> Self {
        Self {
            fallback_threshold: 0.7,
            fallback_steps: 5,
            recovery_steps: 10,
            violation_limit: 3,
            instability_limit: 3,
        }
    }
}

/// Configuration error with field path and constraint description.
#[derive(Debug)]
pub struct ConfigError {
    /// Dotted field path (e.g., `"battery.capacity_kwh"`).
    pub field: String,
    /// Human-readable constraint description.
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigError {}

fn err(errors: &mut Vec<ConfigError>, field: &str, message: impl Into<String>) {
    errors.push(ConfigError {
        field: field.to_string(),
        message: message.into(),
    });
}

impl ScenarioConfig {
    /// Returns the baseline scenario.
    pub fn baseline() -> Self {
        Self {
            simulation: SimulationConfig::default(),
            solar: SolarConfig::default(),
            wind: WindConfig::default(),
            load: LoadConfig::default(),
            battery: BatteryConfig::default(),
            costs: CostConfig::default(),
            reward: RewardConfig::default(),
            ppo: PpoConfig::default(),
            forecast: ForecastConfig::default(),
            safety: SafetyConfig::default(),
        }
    }

    /// Returns the stress preset: heavier load, smaller battery, pricier imports.
    pub fn stress() -> Self {
        Self {
            load: LoadConfig {
                peak_kw: 1000.0,
                noise_std: 0.15,
            },
            battery: BatteryConfig {
                capacity_kwh: 600.0,
                max_rate_kw: 150.0,
                ..BatteryConfig::default()
            },
            costs: CostConfig {
                import_per_kwh: 10.0,
                ..CostConfig::default()
            },
            ..Self::baseline()
        }
    }

    /// Returns the high-renewables preset with oversized solar and wind plant.
    pub fn high_renewables() -> Self {
        Self {
            solar: SolarConfig {
                capacity_kw: 900.0,
                ..SolarConfig::default()
            },
            wind: WindConfig {
                capacity_kw: 600.0,
                ..WindConfig::default()
            },
            battery: BatteryConfig {
                capacity_kwh: 1500.0,
                max_rate_kw: 300.0,
                ..BatteryConfig::default()
            },
            ..Self::baseline()
        }
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["baseline", "stress", "high_renewables"];

    /// Loads a scenario from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "baseline" => Ok(Self::baseline()),
            "stress" => Ok(Self::stress()),
            "high_renewables" => Ok(Self::high_renewables()),
            _ => Err(ConfigError {
                field: "preset".to_string(),
                message: format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            }),
        }
    }

    /// Parses a scenario from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError {
            field: "scenario".to_string(),
            message: format!("cannot read \"{}\": {e}", path.display()),
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a scenario from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError {
            field: "toml".to_string(),
            message: e.to_string(),
        })
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if the configuration is valid. Must pass
    /// before any twin is constructed or any step executes.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        let s = &self.simulation;
        if s.dt_hours <= 0.0 || !s.dt_hours.is_finite() {
            err(&mut errors, "simulation.dt_hours", "must be a finite value > 0");
        }
        if s.max_steps == 0 {
            err(&mut errors, "simulation.max_steps", "must be > 0");
        }
        if s.episode_max_steps == 0 {
            err(&mut errors, "simulation.episode_max_steps", "must be > 0");
        }

        if self.solar.capacity_kw <= 0.0 {
            err(&mut errors, "solar.capacity_kw", "must be > 0");
        }
        if !(0.0..=1.0).contains(&self.solar.cloud_attenuation) {
            err(&mut errors, "solar.cloud_attenuation", "must be in [0.0, 1.0]");
        }

        let w = &self.wind;
        if w.capacity_kw <= 0.0 {
            err(&mut errors, "wind.capacity_kw", "must be > 0");
        }
        if !(w.cut_in_ms < w.rated_ms && w.rated_ms < w.cut_out_ms) {
            err(
                &mut errors,
                "wind.cut_in_ms",
                "must satisfy cut_in < rated < cut_out",
            );
        }

        if self.load.peak_kw <= 0.0 {
            err(&mut errors, "load.peak_kw", "must be > 0");
        }
        if self.load.noise_std < 0.0 {
            err(&mut errors, "load.noise_std", "must be >= 0");
        }

        let b = &self.battery;
        if b.capacity_kwh <= 0.0 {
            err(&mut errors, "battery.capacity_kwh", "must be > 0");
        }
        if b.max_rate_kw <= 0.0 {
            err(&mut errors, "battery.max_rate_kw", "must be > 0");
        }
        if !(b.efficiency > 0.0 && b.efficiency <= 1.0) {
            err(&mut errors, "battery.efficiency", "must be in (0.0, 1.0]");
        }
        if !(0.0..=1.0).contains(&b.health_decay) {
            err(&mut errors, "battery.health_decay", "must be in [0.0, 1.0]");
        }

        let r = &self.reward;
        for (field, value) in [
            ("reward.stability_weight", r.stability_weight),
            ("reward.renewable_weight", r.renewable_weight),
            ("reward.health_weight", r.health_weight),
            ("reward.soc_penalty", r.soc_penalty),
            ("reward.instability_penalty", r.instability_penalty),
        ] {
            if !value.is_finite() {
                err(&mut errors, field, "must be finite");
            }
        }
        if !(r.soc_low < r.soc_high && (0.0..=1.0).contains(&r.soc_low) && r.soc_high <= 1.0) {
            err(
                &mut errors,
                "reward.soc_low",
                "band must satisfy 0 <= low < high <= 1",
            );
        }

        let p = &self.ppo;
        if p.learning_rate <= 0.0 {
            err(&mut errors, "ppo.learning_rate", "must be > 0");
        }
        if !(p.gamma > 0.0 && p.gamma <= 1.0) {
            err(&mut errors, "ppo.gamma", "must be in (0.0, 1.0]");
        }
        if !(0.0..=1.0).contains(&p.gae_lambda) {
            err(&mut errors, "ppo.gae_lambda", "must be in [0.0, 1.0]");
        }
        if !(p.clip_epsilon > 0.0 && p.clip_epsilon < 1.0) {
            err(&mut errors, "ppo.clip_epsilon", "must be in (0.0, 1.0)");
        }
        if p.batch_size == 0 {
            err(&mut errors, "ppo.batch_size", "must be > 0");
        }
        if p.epochs_per_update == 0 {
            err(&mut errors, "ppo.epochs_per_update", "must be > 0");
        }
        if p.hidden_dim == 0 {
            err(&mut errors, "ppo.hidden_dim", "must be > 0");
        }
        if p.update_threshold == 0 {
            err(&mut errors, "ppo.update_threshold", "must be > 0");
        }
        if p.max_grad_norm <= 0.0 {
            err(&mut errors, "ppo.max_grad_norm", "must be > 0");
        }

        let f = &self.forecast;
        if f.sequence_length == 0 {
            err(&mut errors, "forecast.sequence_length", "must be > 0");
        }
        if f.history_cap < f.sequence_length {
            err(
                &mut errors,
                "forecast.history_cap",
                "must be >= forecast.sequence_length",
            );
        }

        let sf = &self.safety;
        if !(sf.fallback_threshold > 0.0 && sf.fallback_threshold < 1.0) {
            err(&mut errors, "safety.fallback_threshold", "must be in (0.0, 1.0)");
        }
        if sf.fallback_steps == 0 {
            err(&mut errors, "safety.fallback_steps", "must be > 0");
        }
        if sf.recovery_steps == 0 {
            err(&mut errors, "safety.recovery_steps", "must be > 0");
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_preset_valid() {
        let cfg = ScenarioConfig::baseline();
        let errors = cfg.validate();
        assert!(errors.is_empty(), "baseline should be valid: {errors:?}");
    }

    #[test]
    fn all_presets_are_valid() {
        for name in ScenarioConfig::PRESETS {
            let cfg = ScenarioConfig::from_preset(name).unwrap();
            let errors = cfg.validate();
            assert!(
                errors.is_empty(),
                "preset \"{name}\" should be valid: {errors:?}"
            );
        }
    }

    #[test]
    fn from_preset_unknown() {
        let e = ScenarioConfig::from_preset("nonexistent").unwrap_err();
        assert!(e.message.contains("unknown preset"));
    }

    #[test]
    fn valid_toml_parses_with_defaults() {
        let toml = r#"
[simulation]
dt_hours = 0.25
seed = 7
max_steps = 500

[solar]
capacity_kw = 750.0

[ppo]
learning_rate = 0.001
batch_size = 32
"#;
        let cfg = ScenarioConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.simulation.max_steps, 500);
        assert_eq!(cfg.solar.capacity_kw, 750.0);
        assert_eq!(cfg.ppo.batch_size, 32);
        // unspecified sections fall back to defaults
        assert_eq!(cfg.load.peak_kw, 800.0);
        assert_eq!(cfg.battery.capacity_kwh, 1000.0);
    }

    #[test]
    fn unknown_field_rejected() {
        let toml = r#"
[simulation]
dt_hours = 0.1
bogus_field = true
"#;
        assert!(ScenarioConfig::from_toml_str(toml).is_err());
    }

    #[test]
    fn validation_catches_bad_efficiency() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.battery.efficiency = 1.5;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "battery.efficiency"));
    }

    #[test]
    fn validation_catches_bad_clip_epsilon() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.ppo.clip_epsilon = 0.0;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "ppo.clip_epsilon"));
    }

    #[test]
    fn validation_catches_inverted_wind_curve() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.wind.rated_ms = 2.0;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "wind.cut_in_ms"));
    }

    #[test]
    fn validation_catches_non_finite_weight() {
        let mut cfg = ScenarioConfig::baseline();
        cfg.reward.stability_weight = f32::NAN;
        let errors = cfg.validate();
        assert!(errors.iter().any(|e| e.field == "reward.stability_weight"));
    }

    #[test]
    fn stress_has_heavier_load_and_smaller_battery() {
        let base = ScenarioConfig::baseline();
        let stress = ScenarioConfig::stress();
        assert!(stress.load.peak_kw > base.load.peak_kw);
        assert!(stress.battery.capacity_kwh < base.battery.capacity_kwh);
    }
}
