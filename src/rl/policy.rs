//! Hand-rolled policy and value networks.
//!
//! Both are small two-hidden-layer perceptrons over `Vec<f32>` weights.
//! The policy head is a squashed Gaussian: the network outputs action
//! means through a sigmoid, with a learnable state-independent log
//! standard deviation per action dimension. Samples are clamped to
//! [0, 1]; the log-probability is evaluated at the clamped action with
//! no squash correction.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::twin::types::{ACTION_DIM, gaussian_noise};

const LN_2PI: f32 = 1.837_877_1;
/// Log-std bounds keep the exploration scale sane during training.
const LOG_STD_MIN: f32 = -5.0;
const LOG_STD_MAX: f32 = 1.0;

/// One dense layer, weights stored row-major (out x in).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Layer {
    pub w: Vec<f32>,
    pub b: Vec<f32>,
    pub in_dim: usize,
    pub out_dim: usize,
}

impl Layer {
    fn xavier<R: Rng>(rng: &mut R, in_dim: usize, out_dim: usize) -> Self {
        let bound = (6.0 / (in_dim + out_dim) as f32).sqrt();
        let w = (0..in_dim * out_dim)
            .map(|_| (rng.random::<f32>() * 2.0 - 1.0) * bound)
            .collect();
        Self {
            w,
            b: vec![0.0; out_dim],
            in_dim,
            out_dim,
        }
    }

    fn forward(&self, x: &[f32]) -> Vec<f32> {
        let mut z = self.b.clone();
        for (o, zo) in z.iter_mut().enumerate() {
            let row = &self.w[o * self.in_dim..(o + 1) * self.in_dim];
            for (wi, xi) in row.iter().zip(x.iter()) {
                *zo += wi * xi;
            }
        }
        z
    }

    /// Accumulates dL/dW and dL/db from dL/dz and returns dL/dx.
    fn backward(&self, x: &[f32], dz: &[f32], grads: &mut LayerGrads) -> Vec<f32> {
        let mut dx = vec![0.0; self.in_dim];
        for (o, dzo) in dz.iter().enumerate() {
            grads.db[o] += dzo;
            let row = &self.w[o * self.in_dim..(o + 1) * self.in_dim];
            let grow = &mut grads.dw[o * self.in_dim..(o + 1) * self.in_dim];
            for i in 0..self.in_dim {
                grow[i] += dzo * x[i];
                dx[i] += row[i] * dzo;
            }
        }
        dx
    }

    fn param_count(&self) -> usize {
        self.w.len() + self.b.len()
    }
}

/// Gradient buffers matching one layer.
#[derive(Debug, Clone)]
pub struct LayerGrads {
    pub dw: Vec<f32>,
    pub db: Vec<f32>,
}

impl LayerGrads {
    fn zeros(layer: &Layer) -> Self {
        Self {
            dw: vec![0.0; layer.w.len()],
            db: vec![0.0; layer.b.len()],
        }
    }

    fn zero(&mut self) {
        self.dw.fill(0.0);
        self.db.fill(0.0);
    }
}

fn relu(z: &[f32]) -> Vec<f32> {
    z.iter().map(|v| v.max(0.0)).collect()
}

fn relu_backward(z: &[f32], da: &[f32]) -> Vec<f32> {
    z.iter()
        .zip(da.iter())
        .map(|(zi, dai)| if *zi > 0.0 { *dai } else { 0.0 })
        .collect()
}

/// Two hidden ReLU layers, linear output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Net {
    pub l1: Layer,
    pub l2: Layer,
    pub l3: Layer,
}

/// Intermediate activations saved by a cached forward pass.
pub struct NetCache {
    x0: Vec<f32>,
    z1: Vec<f32>,
    a1: Vec<f32>,
    z2: Vec<f32>,
    a2: Vec<f32>,
    pub out: Vec<f32>,
}

/// Gradient buffers matching one network.
#[derive(Debug, Clone)]
pub struct NetGrads {
    pub l1: LayerGrads,
    pub l2: LayerGrads,
    pub l3: LayerGrads,
}

impl NetGrads {
    pub fn zeros(net: &Net) -> Self {
        Self {
            l1: LayerGrads::zeros(&net.l1),
            l2: LayerGrads::zeros(&net.l2),
            l3: LayerGrads::zeros(&net.l3),
        }
    }

    pub fn zero(&mut self) {
        self.l1.zero();
        self.l2.zero();
        self.l3.zero();
    }

    pub fn values(&self) -> impl Iterator<Item = &f32> {
        self.l1
            .dw
            .iter()
            .chain(self.l1.db.iter())
            .chain(self.l2.dw.iter())
            .chain(self.l2.db.iter())
            .chain(self.l3.dw.iter())
            .chain(self.l3.db.iter())
    }

    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut f32> {
        self.l1
            .dw
            .iter_mut()
            .chain(self.l1.db.iter_mut())
            .chain(self.l2.dw.iter_mut())
            .chain(self.l2.db.iter_mut())
            .chain(self.l3.dw.iter_mut())
            .chain(self.l3.db.iter_mut())
    }
}

impl Net {
    pub fn new<R: Rng>(rng: &mut R, in_dim: usize, hidden: usize, out_dim: usize) -> Self {
        Self {
            l1: Layer::xavier(rng, in_dim, hidden),
            l2: Layer::xavier(rng, hidden, hidden),
            l3: Layer::xavier(rng, hidden, out_dim),
        }
    }

    pub fn in_dim(&self) -> usize {
        self.l1.in_dim
    }

    pub fn forward(&self, x: &[f32]) -> Vec<f32> {
        let a1 = relu(&self.l1.forward(x));
        let a2 = relu(&self.l2.forward(&a1));
        self.l3.forward(&a2)
    }

    pub fn forward_cached(&self, x: &[f32]) -> NetCache {
        let z1 = self.l1.forward(x);
        let a1 = relu(&z1);
        let z2 = self.l2.forward(&a1);
        let a2 = relu(&z2);
        let out = self.l3.forward(&a2);
        NetCache {
            x0: x.to_vec(),
            z1,
            a1,
            z2,
            a2,
            out,
        }
    }

    /// Accumulates gradients for dL/d(out).
    pub fn backward(&self, cache: &NetCache, d_out: &[f32], grads: &mut NetGrads) {
        let da2 = self.l3.backward(&cache.a2, d_out, &mut grads.l3);
        let dz2 = relu_backward(&cache.z2, &da2);
        let da1 = self.l2.backward(&cache.a1, &dz2, &mut grads.l2);
        let dz1 = relu_backward(&cache.z1, &da1);
        let _ = self.l1.backward(&cache.x0, &dz1, &mut grads.l1);
    }

    pub fn param_count(&self) -> usize {
        self.l1.param_count() + self.l2.param_count() + self.l3.param_count()
    }

    pub fn params(&self) -> impl Iterator<Item = &f32> {
        let Net { l1, l2, l3 } = self;
        l1.w.iter()
            .chain(l1.b.iter())
            .chain(l2.w.iter())
            .chain(l2.b.iter())
            .chain(l3.w.iter())
            .chain(l3.b.iter())
    }

    pub fn params_mut(&mut self) -> impl Iterator<Item = &mut f32> {
        let Net { l1, l2, l3 } = self;
        l1.w.iter_mut()
            .chain(l1.b.iter_mut())
            .chain(l2.w.iter_mut())
            .chain(l2.b.iter_mut())
            .chain(l3.w.iter_mut())
            .chain(l3.b.iter_mut())
    }

    pub fn is_finite(&self) -> bool {
        self.params().all(|p| p.is_finite())
    }
}

fn sigmoid(z: f32) -> f32 {
    1.0 / (1.0 + (-z).exp())
}

/// Stochastic control policy: Gaussian over the action box with a
/// sigmoid-squashed mean.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyNetwork {
    pub net: Net,
    pub log_std: [f32; ACTION_DIM],
}

/// Cached forward pass through the policy, used for backprop.
pub struct PolicyCache {
    pub net: NetCache,
    pub mean: [f32; ACTION_DIM],
}

impl PolicyNetwork {
    pub fn new<R: Rng>(rng: &mut R, obs_dim: usize, hidden: usize) -> Self {
        Self {
            net: Net::new(rng, obs_dim, hidden, ACTION_DIM),
            log_std: [-0.5; ACTION_DIM],
        }
    }

    pub fn obs_dim(&self) -> usize {
        self.net.in_dim()
    }

    /// Action means in [0, 1].
    pub fn mean(&self, obs: &[f32]) -> [f32; ACTION_DIM] {
        let out = self.net.forward(obs);
        let mut mean = [0.0; ACTION_DIM];
        for (m, z) in mean.iter_mut().zip(out.iter()) {
            *m = sigmoid(*z);
        }
        mean
    }

    pub fn forward_cached(&self, obs: &[f32]) -> PolicyCache {
        let net = self.net.forward_cached(obs);
        let mut mean = [0.0; ACTION_DIM];
        for (m, z) in mean.iter_mut().zip(net.out.iter()) {
            *m = sigmoid(*z);
        }
        PolicyCache { net, mean }
    }

    /// Samples an action and returns it with its log-probability.
    pub fn sample<R: Rng>(&self, rng: &mut R, obs: &[f32]) -> ([f32; ACTION_DIM], f32) {
        let mean = self.mean(obs);
        let mut action = [0.0; ACTION_DIM];
        for k in 0..ACTION_DIM {
            let sigma = self.std(k);
            action[k] = (mean[k] + sigma * gaussian_noise(rng, 1.0)).clamp(0.0, 1.0);
        }
        let log_prob = self.log_prob_given_mean(&mean, &action);
        (action, log_prob)
    }

    /// Log-probability of an action under the current policy.
    pub fn log_prob(&self, obs: &[f32], action: &[f32; ACTION_DIM]) -> f32 {
        self.log_prob_given_mean(&self.mean(obs), action)
    }

    pub fn log_prob_given_mean(&self, mean: &[f32; ACTION_DIM], action: &[f32; ACTION_DIM]) -> f32 {
        let mut logp = 0.0;
        for k in 0..ACTION_DIM {
            let sigma = self.std(k);
            let z = (action[k] - mean[k]) / sigma;
            logp += -0.5 * z * z - self.log_std[k] - 0.5 * LN_2PI;
        }
        logp
    }

    /// Differential entropy of the Gaussian (before clamping).
    pub fn entropy(&self) -> f32 {
        self.log_std
            .iter()
            .map(|ls| ls + 0.5 * (LN_2PI + 1.0))
            .sum()
    }

    pub fn std(&self, k: usize) -> f32 {
        self.log_std[k].clamp(LOG_STD_MIN, LOG_STD_MAX).exp()
    }

    pub fn is_finite(&self) -> bool {
        self.net.is_finite() && self.log_std.iter().all(|v| v.is_finite())
    }

    pub fn param_count(&self) -> usize {
        self.net.param_count() + ACTION_DIM
    }
}

/// State-value estimator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueNetwork {
    pub net: Net,
}

impl ValueNetwork {
    pub fn new<R: Rng>(rng: &mut R, obs_dim: usize, hidden: usize) -> Self {
        Self {
            net: Net::new(rng, obs_dim, hidden, 1),
        }
    }

    pub fn value(&self, obs: &[f32]) -> f32 {
        self.net.forward(obs)[0]
    }

    pub fn is_finite(&self) -> bool {
        self.net.is_finite()
    }
}
