//! Proximal policy optimization over the hand-rolled networks.
//!
//! Gradients are derived analytically per sample and accumulated over
//! minibatches; both networks are updated with Adam after a global
//! gradient-norm clip. A minibatch with a non-finite loss or gradient
//! is skipped, and an update that still leaves either network
//! non-finite is rolled back wholesale, optimizer state included.

use rand::Rng;
use rand::seq::SliceRandom;

use crate::config::PpoConfig;
use crate::error::GridError;
use crate::rl::policy::{NetGrads, PolicyNetwork, ValueNetwork};
use crate::rl::trajectory::{Transition, TrajectoryBuffer};
use crate::twin::types::ACTION_DIM;

/// The PPO clipped surrogate objective for one sample:
/// `min(ratio * adv, clamp(ratio, 1-eps, 1+eps) * adv)`.
pub fn clipped_surrogate(ratio: f32, advantage: f32, epsilon: f32) -> f32 {
    let unclipped = ratio * advantage;
    let clipped = ratio.clamp(1.0 - epsilon, 1.0 + epsilon) * advantage;
    unclipped.min(clipped)
}

/// Generalized advantage estimation by backward recursion.
///
/// Returns `(advantages, returns)` where returns are the raw
/// (unnormalized) advantages plus the recorded values.
pub fn compute_gae(
    transitions: &[Transition],
    last_value: f32,
    gamma: f32,
    lambda: f32,
) -> (Vec<f32>, Vec<f32>) {
    let n = transitions.len();
    let mut advantages = vec![0.0; n];
    let mut acc = 0.0;
    for t in (0..n).rev() {
        let tr = &transitions[t];
        let not_done = if tr.done { 0.0 } else { 1.0 };
        let next_value = if t + 1 < n {
            transitions[t + 1].value
        } else {
            last_value
        };
        let delta = tr.reward + gamma * next_value * not_done - tr.value;
        acc = delta + gamma * lambda * not_done * acc;
        advantages[t] = acc;
    }
    let returns = advantages
        .iter()
        .zip(transitions.iter())
        .map(|(a, tr)| a + tr.value)
        .collect();
    (advantages, returns)
}

fn normalize(advantages: &mut [f32]) {
    let n = advantages.len() as f32;
    if n < 2.0 {
        return;
    }
    let mean = advantages.iter().sum::<f32>() / n;
    let var = advantages.iter().map(|a| (a - mean).powi(2)).sum::<f32>() / n;
    let std = var.sqrt().max(1e-8);
    for a in advantages.iter_mut() {
        *a = (*a - mean) / std;
    }
}

/// Adam optimizer over a flat parameter sequence.
#[derive(Clone)]
struct Adam {
    lr: f32,
    t: u64,
    m: Vec<f32>,
    v: Vec<f32>,
}

impl Adam {
    const BETA1: f32 = 0.9;
    const BETA2: f32 = 0.999;
    const EPS: f32 = 1e-8;

    fn new(lr: f32, param_count: usize) -> Self {
        Self {
            lr,
            t: 0,
            m: vec![0.0; param_count],
            v: vec![0.0; param_count],
        }
    }

    fn step<'a>(
        &mut self,
        params: impl Iterator<Item = &'a mut f32>,
        grads: impl Iterator<Item = f32>,
    ) {
        self.t += 1;
        let bc1 = 1.0 - Self::BETA1.powi(self.t as i32);
        let bc2 = 1.0 - Self::BETA2.powi(self.t as i32);
        for (i, (p, g)) in params.zip(grads).enumerate() {
            self.m[i] = Self::BETA1 * self.m[i] + (1.0 - Self::BETA1) * g;
            self.v[i] = Self::BETA2 * self.v[i] + (1.0 - Self::BETA2) * g * g;
            let m_hat = self.m[i] / bc1;
            let v_hat = self.v[i] / bc2;
            *p -= self.lr * m_hat / (v_hat.sqrt() + Self::EPS);
        }
    }
}

/// Aggregate diagnostics from one PPO update.
#[derive(Debug, Clone, Default)]
pub struct UpdateReport {
    pub policy_loss: f32,
    pub value_loss: f32,
    pub entropy: f32,
    pub clip_fraction: f32,
    pub approx_kl: f32,
    pub minibatches: usize,
    pub skipped_minibatches: usize,
}

/// Owns the value network and both optimizers; updates a borrowed
/// policy in place.
pub struct PpoTrainer {
    cfg: PpoConfig,
    value: ValueNetwork,
    policy_opt: Adam,
    value_opt: Adam,
}

impl PpoTrainer {
    pub fn new<R: Rng>(cfg: PpoConfig, policy: &PolicyNetwork, rng: &mut R) -> Self {
        let value = ValueNetwork::new(rng, policy.obs_dim(), cfg.hidden_dim);
        let policy_opt = Adam::new(cfg.learning_rate, policy.param_count());
        let value_opt = Adam::new(cfg.learning_rate, value.net.param_count());
        Self {
            cfg,
            value,
            policy_opt,
            value_opt,
        }
    }

    /// Current state-value estimate for an observation.
    pub fn value(&self, obs: &[f32]) -> f32 {
        self.value.value(obs)
    }

    /// Runs a full PPO update on the buffered experience.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::NumericInstability`] if the update produced
    /// non-finite parameters; both networks are restored to their
    /// pre-update snapshots first.
    pub fn update<R: Rng>(
        &mut self,
        policy: &mut PolicyNetwork,
        buffer: &TrajectoryBuffer,
        last_value: f32,
        rng: &mut R,
    ) -> Result<UpdateReport, GridError> {
        let transitions = buffer.transitions();
        if transitions.is_empty() {
            return Ok(UpdateReport::default());
        }

        let policy_snapshot = policy.clone();
        let value_snapshot = self.value.clone();
        let policy_opt_snapshot = self.policy_opt.clone();
        let value_opt_snapshot = self.value_opt.clone();

        let (mut advantages, returns) =
            compute_gae(transitions, last_value, self.cfg.gamma, self.cfg.gae_lambda);
        normalize(&mut advantages);

        let mut report = UpdateReport {
            entropy: policy.entropy(),
            ..UpdateReport::default()
        };
        let mut indices: Vec<usize> = (0..transitions.len()).collect();
        let mut pgrads = NetGrads::zeros(&policy.net);
        let mut vgrads = NetGrads::zeros(&self.value.net);
        let mut dlog_std = [0.0f32; ACTION_DIM];

        for _ in 0..self.cfg.epochs_per_update {
            indices.shuffle(rng);
            for batch in indices.chunks(self.cfg.batch_size) {
                pgrads.zero();
                vgrads.zero();
                dlog_std.fill(0.0);
                let scale = 1.0 / batch.len() as f32;
                let mut batch_policy_loss = 0.0;
                let mut batch_value_loss = 0.0;
                let mut clipped = 0usize;
                let mut kl = 0.0;

                for &i in batch {
                    let tr = &transitions[i];
                    let adv = advantages[i];

                    let cache = policy.forward_cached(&tr.obs);
                    let logp_new = policy.log_prob_given_mean(&cache.mean, &tr.action);
                    let ratio = (logp_new - tr.log_prob).clamp(-20.0, 20.0).exp();
                    let surrogate = clipped_surrogate(ratio, adv, self.cfg.clip_epsilon);
                    batch_policy_loss += -surrogate;
                    kl += tr.log_prob - logp_new;
                    if (ratio - 1.0).abs() > self.cfg.clip_epsilon {
                        clipped += 1;
                    }

                    // gradient flows only through the unclipped branch of min
                    let unclipped_active = ratio * adv
                        <= ratio.clamp(1.0 - self.cfg.clip_epsilon, 1.0 + self.cfg.clip_epsilon)
                            * adv;
                    let d_logp = if unclipped_active {
                        -ratio * adv * scale
                    } else {
                        0.0
                    };

                    let mut d_out = vec![0.0; ACTION_DIM];
                    for k in 0..ACTION_DIM {
                        let sigma = policy.std(k);
                        let diff = tr.action[k] - cache.mean[k];
                        let d_mean = d_logp * diff / (sigma * sigma);
                        d_out[k] = d_mean * cache.mean[k] * (1.0 - cache.mean[k]);
                        dlog_std[k] += d_logp * (diff * diff / (sigma * sigma) - 1.0)
                            - self.cfg.entropy_coef * scale;
                    }
                    policy.net.backward(&cache.net, &d_out, &mut pgrads);

                    let vcache = self.value.net.forward_cached(&tr.obs);
                    let v = vcache.out[0];
                    let err = v - returns[i];
                    batch_value_loss += err * err;
                    self.value
                        .net
                        .backward(&vcache, &[2.0 * err * scale], &mut vgrads);
                }

                let grads_finite = pgrads.values().all(|g| g.is_finite())
                    && dlog_std.iter().all(|g| g.is_finite())
                    && vgrads.values().all(|g| g.is_finite());
                if !batch_policy_loss.is_finite() || !batch_value_loss.is_finite() || !grads_finite
                {
                    tracing::warn!("non-finite minibatch loss, step skipped");
                    report.skipped_minibatches += 1;
                    continue;
                }

                clip_global_norm(&mut pgrads, Some(&mut dlog_std), self.cfg.max_grad_norm);
                clip_global_norm(&mut vgrads, None, self.cfg.max_grad_norm);

                self.policy_opt.step(
                    policy.net.params_mut().chain(policy.log_std.iter_mut()),
                    pgrads.values().copied().chain(dlog_std.iter().copied()),
                );
                self.value_opt
                    .step(self.value.net.params_mut(), vgrads.values().copied());

                report.policy_loss += batch_policy_loss * scale;
                report.value_loss += batch_value_loss * scale;
                report.clip_fraction += clipped as f32 / batch.len() as f32;
                report.approx_kl += kl * scale;
                report.minibatches += 1;
            }
        }

        if !policy.is_finite() || !self.value.is_finite() {
            *policy = policy_snapshot;
            self.value = value_snapshot;
            self.policy_opt = policy_opt_snapshot;
            self.value_opt = value_opt_snapshot;
            return Err(GridError::NumericInstability {
                context: "policy update".to_string(),
            });
        }

        if report.minibatches > 0 {
            let n = report.minibatches as f32;
            report.policy_loss /= n;
            report.value_loss /= n;
            report.clip_fraction /= n;
            report.approx_kl /= n;
        }
        report.entropy = policy.entropy();
        Ok(report)
    }
}

fn clip_global_norm(grads: &mut NetGrads, extra: Option<&mut [f32]>, max_norm: f32) {
    let mut sq: f32 = grads.values().map(|g| g * g).sum();
    if let Some(ref extra) = extra {
        sq += extra.iter().map(|g| g * g).sum::<f32>();
    }
    let norm = sq.sqrt();
    if norm > max_norm {
        let scale = max_norm / norm;
        for g in grads.values_mut() {
            *g *= scale;
        }
        if let Some(extra) = extra {
            for g in extra.iter_mut() {
                *g *= scale;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn surrogate_equals_unclipped_inside_range() {
        assert_eq!(clipped_surrogate(1.0, 2.0, 0.2), 2.0);
        assert_eq!(clipped_surrogate(1.1, 2.0, 0.2), 2.2);
    }

    #[test]
    fn surrogate_caps_positive_advantage() {
        // ratio above 1+eps with positive advantage is clipped
        assert_eq!(clipped_surrogate(1.5, 2.0, 0.2), 1.2 * 2.0);
        // exactly at the boundary the two branches agree
        assert_eq!(clipped_surrogate(1.2, 2.0, 0.2), 1.2 * 2.0);
    }

    #[test]
    fn surrogate_pessimistic_for_negative_advantage() {
        // min picks the unclipped branch when advantage is negative and
        // ratio is large, keeping the penalty unbounded
        assert_eq!(clipped_surrogate(1.5, -2.0, 0.2), -3.0);
        assert_eq!(clipped_surrogate(0.5, -2.0, 0.2), -1.6);
    }

    fn dummy_transition(reward: f32, value: f32, done: bool) -> Transition {
        Transition {
            obs: vec![0.5; 10],
            action: [0.5; ACTION_DIM],
            log_prob: -2.0,
            reward,
            value,
            done,
        }
    }

    #[test]
    fn gae_single_step_is_delta() {
        let tr = vec![dummy_transition(1.0, 0.5, false)];
        let (adv, ret) = compute_gae(&tr, 0.2, 0.99, 0.95);
        let expected = 1.0 + 0.99 * 0.2 - 0.5;
        assert!((adv[0] - expected).abs() < 1e-6);
        assert!((ret[0] - (expected + 0.5)).abs() < 1e-6);
    }

    #[test]
    fn gae_resets_across_episode_boundary() {
        let tr = vec![
            dummy_transition(1.0, 0.0, true),
            dummy_transition(100.0, 0.0, false),
        ];
        let (adv, _) = compute_gae(&tr, 0.0, 0.99, 0.95);
        // the terminal step's advantage ignores everything after it
        assert!((adv[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn gae_discounts_future_deltas() {
        let tr = vec![
            dummy_transition(0.0, 0.0, false),
            dummy_transition(1.0, 0.0, false),
        ];
        let (adv, _) = compute_gae(&tr, 0.0, 0.5, 0.5);
        // delta1 = 1.0, delta0 = 0, adv0 = 0 + 0.5*0.5*1.0
        assert!((adv[1] - 1.0).abs() < 1e-6);
        assert!((adv[0] - 0.25).abs() < 1e-6);
    }

    #[test]
    fn update_leaves_networks_finite() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut policy = PolicyNetwork::new(&mut rng, 10, 16);
        let cfg = PpoConfig {
            hidden_dim: 16,
            batch_size: 8,
            epochs_per_update: 2,
            ..PpoConfig::default()
        };
        let mut trainer = PpoTrainer::new(cfg, &policy, &mut rng);

        let mut buffer = TrajectoryBuffer::new();
        for i in 0..32 {
            let obs = vec![(i as f32 / 32.0); 10];
            let (action, log_prob) = policy.sample(&mut rng, &obs);
            buffer.push(Transition {
                value: trainer.value(&obs),
                obs,
                action,
                log_prob,
                reward: (i % 5) as f32,
                done: i == 31,
            });
        }

        let report = trainer.update(&mut policy, &buffer, 0.0, &mut rng).unwrap();
        assert!(policy.is_finite());
        assert!(report.minibatches > 0);
        assert!(report.policy_loss.is_finite());
        assert!(report.value_loss.is_finite());
    }

    #[test]
    fn poisoned_reward_skips_minibatches_without_touching_weights() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut policy = PolicyNetwork::new(&mut rng, 10, 16);
        let cfg = PpoConfig {
            hidden_dim: 16,
            batch_size: 8,
            epochs_per_update: 1,
            ..PpoConfig::default()
        };
        let mut trainer = PpoTrainer::new(cfg, &policy, &mut rng);

        let mut buffer = TrajectoryBuffer::new();
        for i in 0..16 {
            let obs = vec![0.5; 10];
            let (action, log_prob) = policy.sample(&mut rng, &obs);
            buffer.push(Transition {
                value: trainer.value(&obs),
                obs,
                action,
                log_prob,
                reward: if i == 3 { f32::NAN } else { 1.0 },
                done: i == 15,
            });
        }

        // the NaN reward poisons every normalized advantage, so no
        // minibatch may be applied and the policy must be untouched
        let before = policy.mean(&vec![0.5; 10]);
        let report = trainer.update(&mut policy, &buffer, 0.0, &mut rng).unwrap();
        assert_eq!(report.minibatches, 0);
        assert!(report.skipped_minibatches > 0);
        assert_eq!(policy.mean(&vec![0.5; 10]), before);
    }

    #[test]
    fn update_on_empty_buffer_is_noop() {
        let mut rng = StdRng::seed_from_u64(8);
        let mut policy = PolicyNetwork::new(&mut rng, 10, 16);
        let cfg = PpoConfig {
            hidden_dim: 16,
            ..PpoConfig::default()
        };
        let mut trainer = PpoTrainer::new(cfg, &policy, &mut rng);
        let buffer = TrajectoryBuffer::new();
        let report = trainer.update(&mut policy, &buffer, 0.0, &mut rng).unwrap();
        assert_eq!(report.minibatches, 0);
    }

    #[test]
    fn repeated_updates_improve_surrogate_on_fixed_batch() {
        let mut rng = StdRng::seed_from_u64(9);
        let mut policy = PolicyNetwork::new(&mut rng, 10, 16);
        let cfg = PpoConfig {
            hidden_dim: 16,
            batch_size: 16,
            epochs_per_update: 1,
            ..PpoConfig::default()
        };
        let mut trainer = PpoTrainer::new(cfg, &policy, &mut rng);

        // reward the first action dimension being high
        let mut buffer = TrajectoryBuffer::new();
        for i in 0..64 {
            let obs = vec![0.5; 10];
            let (action, log_prob) = policy.sample(&mut rng, &obs);
            buffer.push(Transition {
                value: trainer.value(&obs),
                reward: action[0] * 10.0,
                obs,
                action,
                log_prob,
                done: i == 63,
            });
        }
        let before = policy.mean(&vec![0.5; 10])[0];
        for _ in 0..20 {
            trainer.update(&mut policy, &buffer, 0.0, &mut rng).unwrap();
        }
        let after = policy.mean(&vec![0.5; 10])[0];
        assert!(
            after > before - 0.05,
            "mean for the rewarded dimension should not collapse: {before} -> {after}"
        );
    }
}
