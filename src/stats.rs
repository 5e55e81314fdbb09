//! Run statistics accumulated over a control session.

use std::fmt;

use crate::config::CostConfig;
use crate::twin::types::{SafetyViolation, StepOutcome, Termination};

/// Streaming accumulator over step outcomes.
#[derive(Debug, Clone, Default)]
pub struct GridStatistics {
    steps: usize,
    total_reward: f64,
    stability_sum: f64,
    min_stability: f32,
    stable_steps: usize,
    freq_violations: usize,
    volt_violations: usize,
    soc_violations: usize,
    imported_kwh: f64,
    exported_kwh: f64,
    renewable_used_kwh: f64,
    curtailed_kwh: f64,
    battery_throughput_kwh: f64,
    total_cost: f64,
    peak_step_cost: f32,
    outages: usize,
    fallback_engagements: usize,
    events_injected: usize,
}

impl GridStatistics {
    pub fn new() -> Self {
        Self {
            min_stability: 1.0,
            ..Self::default()
        }
    }

    pub fn record(&mut self, outcome: &StepOutcome) {
        self.steps += 1;
        self.total_reward += outcome.reward as f64;
        self.stability_sum += outcome.state.stability as f64;
        self.min_stability = self.min_stability.min(outcome.state.stability);
        if outcome.state.stability >= 0.7 {
            self.stable_steps += 1;
        }
        for v in &outcome.violations {
            match v {
                SafetyViolation::FrequencyDeviation => self.freq_violations += 1,
                SafetyViolation::VoltageDeviation => self.volt_violations += 1,
                SafetyViolation::SocOutOfBand => self.soc_violations += 1,
            }
        }
        let e = &outcome.economics;
        self.imported_kwh += e.imported_kwh as f64;
        self.exported_kwh += e.exported_kwh as f64;
        self.renewable_used_kwh += e.renewable_used_kwh as f64;
        self.curtailed_kwh += e.curtailed_kwh as f64;
        self.battery_throughput_kwh += e.battery_throughput_kwh as f64;
        self.total_cost += e.cost as f64;
        self.peak_step_cost = self.peak_step_cost.max(e.cost);
        if outcome.termination == Some(Termination::StabilityCollapse) {
            self.outages += 1;
        }
    }

    pub fn record_fallback_engagement(&mut self) {
        self.fallback_engagements += 1;
    }

    pub fn record_event_injection(&mut self) {
        self.events_injected += 1;
    }

    pub fn steps(&self) -> usize {
        self.steps
    }

    /// Finalizes into a report. Per-kWh avoided emissions use the
    /// configured grid emission factor.
    pub fn report(&self, costs: &CostConfig) -> StatsReport {
        let steps = self.steps.max(1) as f64;
        StatsReport {
            steps: self.steps,
            total_reward: self.total_reward,
            mean_stability: self.stability_sum / steps,
            min_stability: self.min_stability,
            uptime_fraction: self.stable_steps as f64 / steps,
            freq_violations: self.freq_violations,
            volt_violations: self.volt_violations,
            soc_violations: self.soc_violations,
            imported_kwh: self.imported_kwh,
            exported_kwh: self.exported_kwh,
            renewable_used_kwh: self.renewable_used_kwh,
            curtailed_kwh: self.curtailed_kwh,
            battery_throughput_kwh: self.battery_throughput_kwh,
            total_cost: self.total_cost,
            mean_step_cost: self.total_cost / steps,
            peak_step_cost: self.peak_step_cost,
            outages: self.outages,
            avoided_co2_kg: self.renewable_used_kwh * costs.grid_co2_per_kwh as f64,
            fallback_engagements: self.fallback_engagements,
            events_injected: self.events_injected,
        }
    }
}

/// Finalized session report.
#[derive(Debug, Clone)]
pub struct StatsReport {
    pub steps: usize,
    pub total_reward: f64,
    pub mean_stability: f64,
    pub min_stability: f32,
    pub uptime_fraction: f64,
    pub freq_violations: usize,
    pub volt_violations: usize,
    pub soc_violations: usize,
    pub imported_kwh: f64,
    pub exported_kwh: f64,
    pub renewable_used_kwh: f64,
    pub curtailed_kwh: f64,
    pub battery_throughput_kwh: f64,
    pub total_cost: f64,
    pub mean_step_cost: f64,
    pub peak_step_cost: f32,
    pub outages: usize,
    pub avoided_co2_kg: f64,
    pub fallback_engagements: usize,
    pub events_injected: usize,
}

impl StatsReport {
    /// Renewable fraction of all energy consumed.
    pub fn renewable_fraction(&self) -> f64 {
        let total = self.renewable_used_kwh + self.imported_kwh;
        if total > 0.0 {
            self.renewable_used_kwh / total
        } else {
            0.0
        }
    }
}

impl fmt::Display for StatsReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "=== session report ===")?;
        writeln!(f, "steps:               {}", self.steps)?;
        writeln!(f, "total reward:        {:.1}", self.total_reward)?;
        writeln!(
            f,
            "stability:           mean {:.3}, min {:.3}, uptime {:.1}%",
            self.mean_stability,
            self.min_stability,
            self.uptime_fraction * 100.0
        )?;
        writeln!(
            f,
            "violations:          freq {}, volt {}, soc {}",
            self.freq_violations, self.volt_violations, self.soc_violations
        )?;
        writeln!(
            f,
            "energy:              imported {:.1} kWh, exported {:.1} kWh",
            self.imported_kwh, self.exported_kwh
        )?;
        writeln!(
            f,
            "renewables:          used {:.1} kWh ({:.1}%), curtailed {:.1} kWh",
            self.renewable_used_kwh,
            self.renewable_fraction() * 100.0,
            self.curtailed_kwh
        )?;
        writeln!(
            f,
            "battery throughput:  {:.1} kWh",
            self.battery_throughput_kwh
        )?;
        writeln!(
            f,
            "cost:                total {:.2}, mean {:.3}/step, peak {:.2}/step",
            self.total_cost, self.mean_step_cost, self.peak_step_cost
        )?;
        writeln!(f, "outages:             {}", self.outages)?;
        writeln!(f, "avoided CO2:         {:.1} kg", self.avoided_co2_kg)?;
        writeln!(
            f,
            "fallback/events:     {} engagements, {} events",
            self.fallback_engagements, self.events_injected
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::twin::types::{GridState, StepEconomics, StepOutcome};

    fn outcome(stability: f32, reward: f32, renewable_kwh: f32) -> StepOutcome {
        let mut state = GridState::initial();
        state.stability = stability;
        StepOutcome {
            state,
            reward,
            done: false,
            termination: None,
            violations: vec![],
            economics: StepEconomics {
                renewable_used_kwh: renewable_kwh,
                imported_kwh: 10.0,
                cost: 1.0,
                ..StepEconomics::default()
            },
        }
    }

    #[test]
    fn report_aggregates_steps() {
        let mut stats = GridStatistics::new();
        stats.record(&outcome(0.9, 50.0, 30.0));
        stats.record(&outcome(0.6, -10.0, 20.0));
        let report = stats.report(&CostConfig::default());
        assert_eq!(report.steps, 2);
        assert!((report.total_reward - 40.0).abs() < 1e-9);
        assert!((report.mean_stability - 0.75).abs() < 1e-6);
        assert_eq!(report.min_stability, 0.6);
        assert!((report.uptime_fraction - 0.5).abs() < 1e-9);
    }

    #[test]
    fn avoided_co2_scales_with_renewable_use() {
        let mut stats = GridStatistics::new();
        stats.record(&outcome(0.9, 0.0, 100.0));
        let report = stats.report(&CostConfig::default());
        assert!((report.avoided_co2_kg - 82.0).abs() < 1e-3);
    }

    #[test]
    fn violation_counts_by_kind() {
        let mut stats = GridStatistics::new();
        let mut o = outcome(0.9, 0.0, 0.0);
        o.violations = vec![
            SafetyViolation::FrequencyDeviation,
            SafetyViolation::SocOutOfBand,
        ];
        stats.record(&o);
        let report = stats.report(&CostConfig::default());
        assert_eq!(report.freq_violations, 1);
        assert_eq!(report.volt_violations, 0);
        assert_eq!(report.soc_violations, 1);
    }

    #[test]
    fn cost_peaks_and_outages_tracked() {
        let mut stats = GridStatistics::new();
        let mut cheap = outcome(0.9, 0.0, 0.0);
        cheap.economics.cost = 1.0;
        let mut dear = outcome(0.4, 0.0, 0.0);
        dear.economics.cost = 9.0;
        dear.termination = Some(Termination::StabilityCollapse);
        stats.record(&cheap);
        stats.record(&dear);
        let report = stats.report(&CostConfig::default());
        assert_eq!(report.peak_step_cost, 9.0);
        assert!((report.mean_step_cost - 5.0).abs() < 1e-9);
        assert_eq!(report.outages, 1);
    }

    #[test]
    fn empty_stats_report_is_sane() {
        let report = GridStatistics::new().report(&CostConfig::default());
        assert_eq!(report.steps, 0);
        assert_eq!(report.renewable_fraction(), 0.0);
        let text = report.to_string();
        assert!(text.contains("session report"));
    }
}
