//! State, action and observation types shared across the twin.

use rand::Rng;
use serde::{Deserialize, Serialize};

/// Number of base observation features.
pub const OBS_BASE_DIM: usize = 10;
/// Number of forecast features appended when forecasting is enabled.
pub const OBS_FORECAST_DIM: usize = 3;
/// Number of action dimensions.
pub const ACTION_DIM: usize = 5;

/// Full physical state of the microgrid at one timestep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridState {
    /// Simulation time in hours since episode start.
    pub time_hours: f32,
    /// Steps elapsed in the current episode.
    pub step: usize,
    /// Solar generation (kW).
    pub solar_kw: f32,
    /// Wind generation (kW).
    pub wind_kw: f32,
    /// Load demand (kW).
    pub load_kw: f32,
    /// Battery state of charge (0.0 to 1.0).
    pub battery_soc: f32,
    /// Battery health (1.0 new, decays with use).
    pub battery_health: f32,
    /// Grid frequency (Hz, nominal 50).
    pub frequency_hz: f32,
    /// Bus voltage (per-unit, nominal 1.0).
    pub voltage_pu: f32,
    /// Composite stability score (0.0 to 1.0).
    pub stability: f32,
    /// Power drawn from the upstream grid this step (kW).
    pub grid_import_kw: f32,
    /// Net power balance after control, generation minus demand (kW).
    pub balance_kw: f32,
    /// Cloud cover fraction (0.0 clear to 1.0 overcast).
    pub cloud_cover: f32,
    /// Wind speed (m/s).
    pub wind_speed_ms: f32,
    /// Ambient temperature (degrees C).
    pub temperature_c: f32,
}

impl GridState {
    /// Initial state at episode start: half-charged healthy battery,
    /// nominal electrical quantities, mild weather.
    pub fn initial() -> Self {
        Self {
            time_hours: 0.0,
            step: 0,
            solar_kw: 0.0,
            wind_kw: 0.0,
            load_kw: 0.0,
            battery_soc: 0.5,
            battery_health: 1.0,
            frequency_hz: 50.0,
            voltage_pu: 1.0,
            stability: 1.0,
            grid_import_kw: 0.0,
            balance_kw: 0.0,
            cloud_cover: 0.3,
            wind_speed_ms: 8.0,
            temperature_c: 25.0,
        }
    }

    /// Hour of day in [0, 24).
    pub fn hour_of_day(&self) -> f32 {
        self.time_hours % 24.0
    }

    /// Day index since episode start.
    pub fn day(&self) -> u32 {
        (self.time_hours / 24.0) as u32
    }

    /// True when any field is NaN or infinite.
    pub fn has_non_finite(&self) -> bool {
        ![
            self.time_hours,
            self.solar_kw,
            self.wind_kw,
            self.load_kw,
            self.battery_soc,
            self.battery_health,
            self.frequency_hz,
            self.voltage_pu,
            self.stability,
            self.grid_import_kw,
            self.balance_kw,
            self.cloud_cover,
            self.wind_speed_ms,
            self.temperature_c,
        ]
        .iter()
        .all(|v| v.is_finite())
    }
}

/// Control action applied to the twin each step. All components are
/// fractions of the relevant capability and are clamped to [0, 1] on
/// construction.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Action {
    /// Battery charge command as a fraction of max rate.
    pub battery_charge: f32,
    /// Battery discharge command as a fraction of max rate.
    pub battery_discharge: f32,
    /// Fraction of load deferred to later steps.
    pub load_shift: f32,
    /// Grid import command as a fraction of peak load.
    pub grid_import: f32,
    /// Fraction of renewable output curtailed.
    pub curtailment: f32,
}

impl Action {
    /// Builds an action from a raw component vector, clamping each
    /// component to [0, 1]. Non-finite inputs clamp to 0.
    pub fn from_vec(raw: &[f32; ACTION_DIM]) -> Self {
        let c = |v: f32| if v.is_finite() { v.clamp(0.0, 1.0) } else { 0.0 };
        Self {
            battery_charge: c(raw[0]),
            battery_discharge: c(raw[1]),
            load_shift: c(raw[2]),
            grid_import: c(raw[3]),
            curtailment: c(raw[4]),
        }
    }

    /// The do-nothing action.
    pub fn idle() -> Self {
        Self::from_vec(&[0.0; ACTION_DIM])
    }

    /// Components as a fixed-size array in canonical order.
    pub fn as_vec(&self) -> [f32; ACTION_DIM] {
        [
            self.battery_charge,
            self.battery_discharge,
            self.load_shift,
            self.grid_import,
            self.curtailment,
        ]
    }

    /// Name of the largest component, used for decision-log rationale.
    pub fn dominant_component(&self) -> &'static str {
        let v = self.as_vec();
        let names = [
            "battery_charge",
            "battery_discharge",
            "load_shift",
            "grid_import",
            "curtailment",
        ];
        let mut best = 0;
        for i in 1..ACTION_DIM {
            if v[i] > v[best] {
                best = i;
            }
        }
        if v[best] < 0.05 { "idle" } else { names[best] }
    }
}

/// Normalized observation vector presented to controllers. Base layout:
///
/// | index | feature                    | scale      |
/// |-------|----------------------------|------------|
/// | 0     | hour of day                | / 24       |
/// | 1     | solar output               | / capacity |
/// | 2     | wind output                | / capacity |
/// | 3     | load demand                | / peak     |
/// | 4     | battery SOC                | raw        |
/// | 5     | battery health             | raw        |
/// | 6     | frequency deviation        | / 2 Hz     |
/// | 7     | voltage deviation          | / 0.1 pu   |
/// | 8     | stability score            | raw        |
/// | 9     | balance                    | / peak     |
///
/// When forecasting is enabled, three more features follow: predicted
/// solar, wind and load for the next step, on the same scales.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    values: Vec<f32>,
}

impl Observation {
    /// Wraps a feature vector, replacing any non-finite entry with 0
    /// and clamping to [-1, 1].
    pub fn new(values: Vec<f32>) -> Self {
        let values = values
            .into_iter()
            .map(|v| if v.is_finite() { v.clamp(-1.0, 1.0) } else { 0.0 })
            .collect();
        Self { values }
    }

    /// Feature vector length.
    pub fn dim(&self) -> usize {
        self.values.len()
    }

    /// Features as a slice.
    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }
}

/// Result of a single twin step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// State after the step.
    pub state: GridState,
    /// Scalar reward for the step.
    pub reward: f32,
    /// Whether the episode terminated this step.
    pub done: bool,
    /// Why the episode terminated, if it did.
    pub termination: Option<Termination>,
    /// Hard safety bounds crossed during this step.
    pub violations: Vec<SafetyViolation>,
    /// Per-step economics.
    pub economics: StepEconomics,
}

/// Reasons an episode ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Stability collapsed below the outage level.
    StabilityCollapse,
    /// Battery health fell below the retirement level.
    BatteryExhausted,
    /// Frequency excursion beyond the protective relay bound.
    FrequencyExcursion,
    /// Episode step cap reached.
    StepLimit,
}

/// Soft safety bounds checked every step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SafetyViolation {
    /// |frequency - 50| exceeded 0.5 Hz.
    FrequencyDeviation,
    /// |voltage - 1.0| exceeded 0.05 pu.
    VoltageDeviation,
    /// SOC left the [0.1, 0.95] operating band.
    SocOutOfBand,
}

/// Per-step energy economics.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepEconomics {
    /// Energy imported from the upstream grid (kWh).
    pub imported_kwh: f32,
    /// Energy exported to the upstream grid (kWh).
    pub exported_kwh: f32,
    /// Renewable energy consumed or stored (kWh).
    pub renewable_used_kwh: f32,
    /// Renewable energy curtailed (kWh).
    pub curtailed_kwh: f32,
    /// Battery throughput (kWh).
    pub battery_throughput_kwh: f32,
    /// Net cost for the step (currency units).
    pub cost: f32,
}

/// Samples from N(0, std) using the Box-Muller transform.
pub fn gaussian_noise<R: Rng>(rng: &mut R, std: f32) -> f32 {
    let u1: f32 = rng.random::<f32>().max(1e-10);
    let u2: f32 = rng.random::<f32>();
    let mag = (-2.0 * u1.ln()).sqrt();
    mag * (2.0 * std::f32::consts::PI * u2).cos() * std
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn action_clamps_components() {
        let a = Action::from_vec(&[1.5, -0.2, 0.5, f32::NAN, 2.0]);
        assert_eq!(a.battery_charge, 1.0);
        assert_eq!(a.battery_discharge, 0.0);
        assert_eq!(a.load_shift, 0.5);
        assert_eq!(a.grid_import, 0.0);
        assert_eq!(a.curtailment, 1.0);
    }

    #[test]
    fn dominant_component_names_largest() {
        let a = Action::from_vec(&[0.1, 0.8, 0.2, 0.3, 0.0]);
        assert_eq!(a.dominant_component(), "battery_discharge");
        assert_eq!(Action::idle().dominant_component(), "idle");
    }

    #[test]
    fn observation_sanitizes_non_finite() {
        let obs = Observation::new(vec![0.5, f32::INFINITY, -3.0, f32::NAN]);
        assert_eq!(obs.as_slice(), &[0.5, 0.0, -1.0, 0.0]);
    }

    #[test]
    fn initial_state_is_finite() {
        assert!(!GridState::initial().has_non_finite());
    }

    #[test]
    fn hour_of_day_wraps() {
        let mut s = GridState::initial();
        s.time_hours = 26.5;
        assert!((s.hour_of_day() - 2.5).abs() < 1e-5);
        assert_eq!(s.day(), 1);
    }

    #[test]
    fn gaussian_noise_bounded_in_practice() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..1000 {
            let n = gaussian_noise(&mut rng, 0.1);
            assert!(n.is_finite());
            assert!(n.abs() < 1.0, "5+ sigma draw is vanishingly unlikely");
        }
    }
}
