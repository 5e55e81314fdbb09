//! The digital twin: a stepwise physical model of the microgrid.

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::config::ScenarioConfig;
use crate::error::GridError;
use crate::twin::event::{ActiveEvent, EventKind, EventOverlay};
use crate::twin::types::{
    Action, GridState, Observation, SafetyViolation, StepEconomics, StepOutcome, Termination,
};
use crate::twin::weather::{self, Weather};

/// Fraction of load that the load-shift action can defer.
const SHIFTABLE_FRACTION: f32 = 0.3;
/// Frequency droop: Hz of deviation per kW of imbalance.
const FREQ_DROOP_HZ_PER_KW: f32 = 1.0 / 1000.0;
/// Voltage sag: pu of deviation per kW of imbalance.
const VOLT_SAG_PU_PER_KW: f32 = 1.0 / 2000.0;
/// Imbalance (kW) at which the stability balance term bottoms out.
const BALANCE_SCALE_KW: f32 = 1000.0;

/// Deterministic microgrid simulator.
///
/// Each [`step`](DigitalTwin::step) advances the model by one timestep:
/// weather evolves, renewables and load are sampled, the action is
/// applied, the electrical state is updated and the reward computed.
/// All randomness flows through one seeded generator, so equal seeds
/// and equal action sequences produce identical trajectories.
pub struct DigitalTwin {
    cfg: ScenarioConfig,
    rng: StdRng,
    state: GridState,
    weather: Weather,
    events: EventOverlay,
    deferred_load_kwh: f32,
    violation_count: usize,
}

impl DigitalTwin {
    pub fn new(cfg: ScenarioConfig) -> Self {
        let seed = cfg.simulation.seed;
        Self {
            cfg,
            rng: StdRng::seed_from_u64(seed),
            state: GridState::initial(),
            weather: Weather::mild(),
            events: EventOverlay::new(),
            deferred_load_kwh: 0.0,
            violation_count: 0,
        }
    }

    /// Resets to the initial state, reseeding the generator.
    pub fn reset(&mut self, seed: u64) {
        self.rng = StdRng::seed_from_u64(seed);
        self.state = GridState::initial();
        self.weather = Weather::mild();
        self.events.clear();
        self.deferred_load_kwh = 0.0;
        self.violation_count = 0;
    }

    pub fn state(&self) -> &GridState {
        &self.state
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.cfg
    }

    /// Total hard safety violations since the last reset.
    pub fn violation_count(&self) -> usize {
        self.violation_count
    }

    /// Events currently overlaying the model.
    pub fn active_events(&self) -> &[ActiveEvent] {
        self.events.active()
    }

    /// Injects a disturbance. A battery fault applies its one-time
    /// health hit immediately.
    pub fn inject_event(&mut self, event: ActiveEvent) {
        if let Some(health_factor) = self.events.inject(event) {
            self.state.battery_health *= health_factor;
        }
    }

    /// Injects a disturbance of the given kind with default magnitude
    /// and duration.
    pub fn inject_default_event(&mut self, kind: EventKind) {
        self.inject_event(ActiveEvent::with_defaults(kind));
    }

    /// Advances the twin by one timestep under the given action.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::NumericInstability`] if the update produced
    /// a non-finite state; the pre-step state is restored before the
    /// error is returned, so the twin remains usable.
    pub fn step(&mut self, action: &Action) -> Result<StepOutcome, GridError> {
        let saved_state = self.state.clone();
        let saved_weather = self.weather;

        let outcome = self.step_inner(action);
        if self.state.has_non_finite() {
            self.state = saved_state;
            self.weather = saved_weather;
            return Err(GridError::NumericInstability {
                context: format!("twin step {}", self.state.step + 1),
            });
        }
        Ok(outcome)
    }

    fn step_inner(&mut self, action: &Action) -> StepOutcome {
        let dt = self.cfg.simulation.dt_hours;
        let s = &mut self.state;

        s.step += 1;
        s.time_hours += dt;
        let hour = s.time_hours % 24.0;
        let day = (s.time_hours / 24.0) as u32;

        self.weather.advance(&mut self.rng, hour);
        s.cloud_cover = self.events.cloud_cover(self.weather.cloud_cover);
        s.wind_speed_ms = self.events.wind_speed(self.weather.wind_speed_ms);
        s.temperature_c = self.weather.temperature_c;

        let effective_weather = Weather {
            cloud_cover: s.cloud_cover,
            wind_speed_ms: s.wind_speed_ms,
            temperature_c: s.temperature_c,
        };
        let solar_raw = weather::solar_output(&self.cfg.solar, hour, day, &effective_weather);
        let wind_raw = weather::wind_output(&self.cfg.wind, &effective_weather);
        let available_kw = solar_raw + wind_raw;
        let curtailed_kw = available_kw * action.curtailment;
        s.solar_kw = solar_raw * (1.0 - action.curtailment);
        s.wind_kw = wind_raw * (1.0 - action.curtailment);
        let generation_kw = s.solar_kw + s.wind_kw;

        let base_load = weather::load_demand(&self.cfg.load, &mut self.rng, hour, day);
        let surged_load = self.events.load(base_load);
        // shifted load is deferred and returned over later steps
        let shifted_kw = surged_load * SHIFTABLE_FRACTION * action.load_shift;
        let returned_kw = (self.deferred_load_kwh / dt).min(surged_load * 0.1);
        self.deferred_load_kwh += shifted_kw * dt - returned_kw * dt;
        s.load_kw = surged_load - shifted_kw + returned_kw;

        // battery: the larger of the two commands wins, the other is ignored
        let b = &self.cfg.battery;
        let rate_cap = b.max_rate_kw * s.battery_health;
        let (charge_kw, discharge_kw) = if action.battery_charge >= action.battery_discharge {
            let requested = action.battery_charge * rate_cap;
            let headroom_kw = (1.0 - s.battery_soc) * b.capacity_kwh / (dt * b.efficiency);
            (requested.min(headroom_kw).max(0.0), 0.0)
        } else {
            let requested = action.battery_discharge * rate_cap;
            let stored_kw = s.battery_soc * b.capacity_kwh * b.efficiency / dt;
            (0.0, requested.min(stored_kw).max(0.0))
        };
        s.battery_soc += (charge_kw * b.efficiency - discharge_kw / b.efficiency) * dt
            / b.capacity_kwh;
        s.battery_soc = s.battery_soc.clamp(0.0, 1.0);
        s.battery_health *= b.health_decay;

        let import_kw = action.grid_import * self.cfg.load.peak_kw;
        s.grid_import_kw = import_kw;
        s.balance_kw = generation_kw + discharge_kw + import_kw - s.load_kw - charge_kw;

        s.frequency_hz = (50.0 - s.balance_kw * FREQ_DROOP_HZ_PER_KW).clamp(47.0, 53.0);
        s.voltage_pu = (1.0 - s.balance_kw.abs() * VOLT_SAG_PU_PER_KW).clamp(0.9, 1.1);

        let freq_score = 1.0 - ((s.frequency_hz - 50.0).abs() / 2.0).min(1.0);
        let volt_score = 1.0 - ((s.voltage_pu - 1.0).abs() / 0.1).min(1.0);
        let balance_score = 1.0 - (s.balance_kw.abs() / BALANCE_SCALE_KW).min(1.0);
        s.stability =
            0.3 * freq_score + 0.3 * volt_score + 0.2 * s.battery_health + 0.2 * balance_score;

        let economics = self.settle_economics(import_kw, charge_kw, discharge_kw, curtailed_kw, dt);
        let violations = self.check_violations();
        self.violation_count += violations.len();
        let reward = self.compute_reward(&economics);
        let termination = self.check_termination();

        let expired = self.events.tick();
        for kind in expired {
            tracing::debug!(event = %kind, "event expired");
        }

        StepOutcome {
            state: self.state.clone(),
            reward,
            done: termination.is_some(),
            termination,
            violations,
            economics,
        }
    }

    fn settle_economics(
        &self,
        import_kw: f32,
        charge_kw: f32,
        discharge_kw: f32,
        curtailed_kw: f32,
        dt: f32,
    ) -> StepEconomics {
        let s = &self.state;
        let exported_kw = s.balance_kw.max(0.0);
        let shortfall_kw = (-s.balance_kw).max(0.0);
        // shortfall beyond the commanded import is billed as emergency import
        let imported_kwh = (import_kw + shortfall_kw) * dt;
        let exported_kwh = exported_kw * dt;
        let generation_kw = s.solar_kw + s.wind_kw;
        let renewable_used_kwh = (generation_kw * dt - exported_kwh).max(0.0);
        let battery_throughput_kwh = (charge_kw + discharge_kw) * dt;
        let c = &self.cfg.costs;
        let cost = imported_kwh * c.import_per_kwh - exported_kwh * c.export_per_kwh
            + battery_throughput_kwh * c.degradation_per_kwh;
        StepEconomics {
            imported_kwh,
            exported_kwh,
            renewable_used_kwh,
            curtailed_kwh: curtailed_kw * dt,
            battery_throughput_kwh,
            cost,
        }
    }

    fn check_violations(&self) -> Vec<SafetyViolation> {
        let s = &self.state;
        let mut v = Vec::new();
        if (s.frequency_hz - 50.0).abs() > 0.5 {
            v.push(SafetyViolation::FrequencyDeviation);
        }
        if (s.voltage_pu - 1.0).abs() > 0.05 {
            v.push(SafetyViolation::VoltageDeviation);
        }
        if s.battery_soc < 0.1 || s.battery_soc > 0.95 {
            v.push(SafetyViolation::SocOutOfBand);
        }
        v
    }

    fn compute_reward(&self, economics: &StepEconomics) -> f32 {
        let s = &self.state;
        let r = &self.cfg.reward;
        let total_kwh = economics.renewable_used_kwh + economics.imported_kwh;
        let renewable_ratio = if total_kwh > 0.0 {
            economics.renewable_used_kwh / total_kwh
        } else {
            0.0
        };
        let mut reward = r.stability_weight * s.stability - economics.cost
            + r.renewable_weight * renewable_ratio
            + r.health_weight * s.battery_health;
        if s.battery_soc < r.soc_low || s.battery_soc > r.soc_high {
            reward += r.soc_penalty;
        }
        if s.stability < 0.7 {
            reward += r.instability_penalty;
        }
        reward
    }

    fn check_termination(&self) -> Option<Termination> {
        let s = &self.state;
        if s.stability < 0.5 {
            Some(Termination::StabilityCollapse)
        } else if s.battery_health < 0.5 {
            Some(Termination::BatteryExhausted)
        } else if (s.frequency_hz - 50.0).abs() > 2.0 {
            Some(Termination::FrequencyExcursion)
        } else if s.step >= self.cfg.simulation.episode_max_steps {
            Some(Termination::StepLimit)
        } else {
            None
        }
    }

    /// Builds the normalized observation for the current state,
    /// appending forecast features when provided.
    pub fn observe(&self, forecast: Option<[f32; 3]>) -> Observation {
        let s = &self.state;
        let mut values = vec![
            s.hour_of_day() / 24.0,
            s.solar_kw / self.cfg.solar.capacity_kw,
            s.wind_kw / self.cfg.wind.capacity_kw,
            s.load_kw / self.cfg.load.peak_kw,
            s.battery_soc,
            s.battery_health,
            (s.frequency_hz - 50.0) / 2.0,
            (s.voltage_pu - 1.0) / 0.1,
            s.stability,
            s.balance_kw / self.cfg.load.peak_kw,
        ];
        if let Some(f) = forecast {
            values.push(f[0] / self.cfg.solar.capacity_kw);
            values.push(f[1] / self.cfg.wind.capacity_kw);
            values.push(f[2] / self.cfg.load.peak_kw);
        }
        Observation::new(values)
    }
}
