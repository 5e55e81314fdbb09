//! Short-horizon generation and demand forecasting.
//!
//! A linear regressor over a flattened window of recent feature
//! samples predicts next-step solar, wind and load. Until enough
//! history accumulates it falls back to persistence (repeat the last
//! sample) and, with no history at all, to fixed defaults.

use std::collections::VecDeque;

use crate::config::ForecastConfig;
use crate::twin::types::GridState;

/// Features recorded per step, all normalized to roughly [0, 1].
const FEATURES: usize = 7;
/// Predicted quantities: solar, wind, load (kW).
const TARGETS: usize = 3;

/// Default prediction when no history exists: no renewables, baseline load.
const DEFAULT_PREDICTION: [f32; TARGETS] = [0.0, 0.0, 400.0];

#[derive(Debug, Clone, Copy)]
struct Sample {
    features: [f32; FEATURES],
    targets: [f32; TARGETS],
}

/// Rolling-window linear forecaster.
pub struct Forecaster {
    cfg: ForecastConfig,
    history: VecDeque<Sample>,
    // weights are (seq_len * FEATURES + 1) x TARGETS, last row is bias
    weights: Vec<[f32; TARGETS]>,
    trained: bool,
}

impl Forecaster {
    pub fn new(cfg: ForecastConfig) -> Self {
        let rows = cfg.sequence_length * FEATURES + 1;
        Self {
            cfg,
            history: VecDeque::new(),
            weights: vec![[0.0; TARGETS]; rows],
            trained: false,
        }
    }

    fn featurize(state: &GridState) -> Sample {
        Sample {
            features: [
                state.hour_of_day() / 24.0,
                state.solar_kw / 500.0,
                state.wind_kw / 300.0,
                state.load_kw / 1000.0,
                state.cloud_cover,
                state.wind_speed_ms / 25.0,
                state.temperature_c / 50.0,
            ],
            targets: [state.solar_kw, state.wind_kw, state.load_kw],
        }
    }

    /// Records one observed state, evicting the oldest sample past the
    /// history cap.
    pub fn record(&mut self, state: &GridState) {
        self.history.push_back(Self::featurize(state));
        while self.history.len() > self.cfg.history_cap {
            self.history.pop_front();
        }
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Whether enough history exists for the regressor to be used.
    pub fn has_window(&self) -> bool {
        self.history.len() >= self.cfg.sequence_length
    }

    fn window_input(&self, end: usize) -> Vec<f32> {
        let seq = self.cfg.sequence_length;
        let mut input = Vec::with_capacity(seq * FEATURES + 1);
        for i in (end - seq)..end {
            input.extend_from_slice(&self.history[i].features);
        }
        input.push(1.0); // bias
        input
    }

    fn regress(&self, input: &[f32]) -> [f32; TARGETS] {
        let mut out = [0.0; TARGETS];
        for (row, w) in input.iter().zip(self.weights.iter()) {
            for t in 0..TARGETS {
                out[t] += row * w[t];
            }
        }
        out
    }

    /// Predicts next-step solar, wind and load (kW).
    ///
    /// Uses the trained regressor when history fills the window,
    /// persistence when any history exists, fixed defaults otherwise.
    /// Predictions are clamped to be non-negative.
    pub fn predict(&self) -> [f32; TARGETS] {
        if self.trained && self.has_window() {
            let input = self.window_input(self.history.len());
            let mut out = self.regress(&input);
            for v in &mut out {
                *v = if v.is_finite() { v.max(0.0) } else { 0.0 };
            }
            out
        } else if let Some(last) = self.history.back() {
            last.targets
        } else {
            DEFAULT_PREDICTION
        }
    }

    /// Predicts `horizon` steps ahead by repeated single-step rollout,
    /// feeding each prediction back as a synthetic sample.
    pub fn predict_horizon(&self, horizon: usize) -> Vec<[f32; TARGETS]> {
        let mut out = Vec::with_capacity(horizon);
        let mut scratch = self.clone_window();
        for _ in 0..horizon {
            let pred = scratch.predict();
            out.push(pred);
            if let Some(last) = scratch.history.back().copied() {
                let mut next = last;
                next.targets = pred;
                next.features[1] = pred[0] / 500.0;
                next.features[2] = pred[1] / 300.0;
                next.features[3] = pred[2] / 1000.0;
                next.features[0] = (next.features[0] + 0.1 / 24.0) % 1.0;
                scratch.history.push_back(next);
                if scratch.history.len() > scratch.cfg.history_cap {
                    scratch.history.pop_front();
                }
            }
        }
        out
    }

    fn clone_window(&self) -> Forecaster {
        Forecaster {
            cfg: self.cfg.clone(),
            history: self.history.clone(),
            weights: self.weights.clone(),
            trained: self.trained,
        }
    }

    /// Fits the regressor on the recorded history by full-batch
    /// gradient descent. A no-op until the history holds at least one
    /// window-plus-target pair.
    pub fn train(&mut self) {
        let seq = self.cfg.sequence_length;
        if self.history.len() <= seq {
            return;
        }
        let n = self.history.len() - seq;
        let lr = self.cfg.learning_rate / n as f32;
        // targets are in kW; scale down so the gradient step is stable
        let target_scale = 1000.0;
        for _ in 0..self.cfg.train_epochs {
            let mut grads = vec![[0.0f32; TARGETS]; self.weights.len()];
            for i in 0..n {
                let input = self.window_input(i + seq);
                let pred = self.regress(&input);
                let target = self.history[i + seq].targets;
                for t in 0..TARGETS {
                    let err = (pred[t] - target[t]) / target_scale;
                    for (g, x) in grads.iter_mut().zip(input.iter()) {
                        g[t] += err * x;
                    }
                }
            }
            for (w, g) in self.weights.iter_mut().zip(grads.iter()) {
                for t in 0..TARGETS {
                    w[t] -= lr * g[t] * target_scale;
                }
            }
        }
        self.trained = true;
    }
}
