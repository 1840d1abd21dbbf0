use std::path::Path;
use std::time::Instant;

use burn::grad_clipping::GradientClippingConfig;
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::record::DefaultRecorder;
use burn::tensor::activation::{log_softmax, softmax};
use burn::tensor::TensorData;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::ai::agent::{Agent, SaveModel, UpdateMetrics};
use crate::ai::networks::{PolicyValueNetwork, PolicyValueNetworkConfig};
use crate::ai::state_encoding::{encode_state, encode_states_batch, legal_mask_batch, to_host};
use crate::ai::{InferBackend, TrainBackend};
use crate::config::PpoConfig;
use crate::env::{AlphaEnv, AlphaState};
use crate::error::{CheckpointError, TrainingError};
use crate::expr::SIZE_ACTION;
use crate::training::callback::{Callback, RolloutContext};
use crate::training::logger::MetricLogger;
use crate::training::metrics::{EpisodeResult, TimingMetrics, TrainingMetrics};

type PpoOptimizer = burn::optim::adaptor::OptimizerAdaptor<
    burn::optim::Adam,
    PolicyValueNetwork<TrainBackend>,
    TrainBackend,
>;

/// One environment step recorded during a rollout.
#[derive(Debug, Clone)]
struct RolloutStep {
    state: AlphaState,
    action: usize,
    reward: f32,
    done: bool,
    value: f32,
    log_prob: f32,
}

/// Maskable PPO: illegal actions get -1e9 logits before every softmax.
pub struct PpoAgent {
    network: PolicyValueNetwork<TrainBackend>,
    optimizer: PpoOptimizer,
    config: PpoConfig,
    device: <TrainBackend as Backend>::Device,
    num_timesteps: u64,
    rng: StdRng,
    metrics: TrainingMetrics,
}

impl PpoAgent {
    pub fn new(config: PpoConfig, rng: StdRng) -> Self {
        let device = Default::default();
        let network = PolicyValueNetworkConfig::new()
            .with_hidden_size(config.hidden_size)
            .init(&device);
        let optimizer = AdamConfig::new()
            .with_grad_clipping(Some(GradientClippingConfig::Norm(config.max_grad_norm)))
            .init();

        PpoAgent {
            network,
            optimizer,
            config,
            device,
            num_timesteps: 0,
            rng,
            metrics: TrainingMetrics::new(),
        }
    }

    pub fn config(&self) -> &PpoConfig {
        &self.config
    }

    /// Restore network weights written by [`SaveModel::save_model`].
    pub fn load_model(&mut self, stem: &Path) -> Result<(), CheckpointError> {
        let recorder = DefaultRecorder::default();
        self.network = PolicyValueNetworkConfig::new()
            .with_hidden_size(self.config.hidden_size)
            .init::<TrainBackend>(&self.device)
            .load_file(stem.to_path_buf(), &recorder, &self.device)
            .map_err(|e| CheckpointError::ModelLoad(e.to_string()))?;
        Ok(())
    }

    /// Action probabilities over the full action space plus the state value.
    fn policy(&self, state: &AlphaState) -> (Vec<f32>, f32) {
        let input = encode_state::<InferBackend>(state, &self.device);
        let (logits, value) = self.network.valid().forward(input);
        let probs = masked_softmax(&to_host(logits), &state.mask);
        (probs, to_host(value)[0])
    }

    /// Sample an action and return it with its log-probability and the state value.
    fn act(&mut self, state: &AlphaState) -> (usize, f32, f32) {
        let (probs, value) = self.policy(state);
        let action = sample_categorical(&probs, &mut self.rng);
        (action, probs[action].max(f32::MIN_POSITIVE).ln(), value)
    }

    fn collect_rollout(
        &mut self,
        env: &mut AlphaEnv,
        state: &mut AlphaState,
        episode: &mut (f32, usize),
    ) -> Result<Vec<RolloutStep>, TrainingError> {
        let mut rollout = Vec::with_capacity(self.config.n_steps);
        for _ in 0..self.config.n_steps {
            let (action, log_prob, value) = self.act(state);
            let result = env.step(action)?;
            self.num_timesteps += 1;
            episode.0 += result.reward;
            episode.1 += 1;

            rollout.push(RolloutStep {
                state: std::mem::replace(state, result.state),
                action,
                reward: result.reward,
                done: result.done,
                value,
                log_prob,
            });

            if result.done {
                self.metrics.record_episode(EpisodeResult {
                    reward: episode.0,
                    length: episode.1,
                });
                *episode = (0.0, 0);
                *state = env.reset();
            }
        }
        Ok(rollout)
    }

    /// Several epochs of clipped-surrogate updates over shuffled minibatches.
    fn train(&mut self, rollout: &[RolloutStep], last_value: f32) -> UpdateMetrics {
        let (advantages, returns) = compute_gae(
            rollout,
            last_value,
            self.config.gamma,
            self.config.gae_lambda,
        );
        let mut order: Vec<usize> = (0..rollout.len()).collect();
        let mut last = UpdateMetrics::default();

        for _epoch in 0..self.config.n_epochs {
            order.shuffle(&mut self.rng);
            for chunk in order.chunks(self.config.batch_size) {
                last = self.update_minibatch(rollout, chunk, &advantages, &returns);
                self.metrics.record_update(last.loss);
            }
        }
        last
    }

    fn update_minibatch(
        &mut self,
        rollout: &[RolloutStep],
        indices: &[usize],
        advantages: &[f32],
        returns: &[f32],
    ) -> UpdateMetrics {
        let n = indices.len();
        let states: Vec<AlphaState> = indices.iter().map(|&i| rollout[i].state.clone()).collect();

        let mut adv: Vec<f32> = indices.iter().map(|&i| advantages[i]).collect();
        normalize(&mut adv);
        let old_log_probs: Vec<f32> = indices.iter().map(|&i| rollout[i].log_prob).collect();
        let batch_returns: Vec<f32> = indices.iter().map(|&i| returns[i]).collect();
        let mut action_mask = vec![0.0f32; n * SIZE_ACTION];
        for (row, &i) in indices.iter().enumerate() {
            action_mask[row * SIZE_ACTION + rollout[i].action] = 1.0;
        }

        let device = &self.device;
        let input = encode_states_batch::<TrainBackend>(&states, device);
        let (logits, values) = self.network.forward(input);
        let masked = logits + legal_mask_batch::<TrainBackend>(&states, device);
        let log_probs = log_softmax(masked.clone(), 1);

        let action_mask = Tensor::<TrainBackend, 1>::from_data(TensorData::from(action_mask.as_slice()), device)
            .reshape([n as i32, SIZE_ACTION as i32]);
        let selected = (log_probs.clone() * action_mask).sum_dim(1).reshape([n as i32]);
        let old = Tensor::<TrainBackend, 1>::from_data(TensorData::from(old_log_probs.as_slice()), device);
        let adv = Tensor::<TrainBackend, 1>::from_data(TensorData::from(adv.as_slice()), device);

        let ratio = (selected - old).exp();
        let surr1 = ratio.clone() * adv.clone();
        let surr2 = ratio.clamp(1.0 - self.config.clip_range, 1.0 + self.config.clip_range) * adv;
        // min(a, b) = (a + b - |a - b|) / 2
        let policy_objective = (surr1.clone() + surr2.clone() - (surr1 - surr2).abs()) / 2.0;
        let policy_loss = -policy_objective.mean();

        let returns = Tensor::<TrainBackend, 1>::from_data(TensorData::from(batch_returns.as_slice()), device)
            .reshape([n as i32, 1]);
        let value_diff = values - returns;
        let value_loss = (value_diff.clone() * value_diff).mean();

        let entropy = -(softmax(masked, 1) * log_probs).sum_dim(1).mean();
        let entropy_value = to_host(entropy.clone())[0];

        let loss = policy_loss + value_loss * self.config.vf_coef - entropy * self.config.ent_coef;
        let loss_value = to_host(loss.clone())[0];

        let grads = loss.backward();
        let grads = GradientsParams::from_grads(grads, &self.network);
        self.network = self
            .optimizer
            .step(self.config.learning_rate, self.network.clone(), grads);

        UpdateMetrics {
            loss: loss_value,
            policy_entropy: Some(entropy_value),
        }
    }
}

impl SaveModel for PpoAgent {
    fn save_model(&self, stem: &Path) -> Result<(), CheckpointError> {
        self.network
            .valid()
            .save_file(stem.to_path_buf(), &DefaultRecorder::default())
            .map_err(|e| CheckpointError::ModelSave(e.to_string()))
    }
}

impl Agent for PpoAgent {
    fn algorithm_name(&self) -> &str {
        "PPO"
    }

    fn select_action(&mut self, state: &AlphaState, training: bool) -> usize {
        if training {
            return self.act(state).0;
        }
        let (probs, _) = self.policy(state);
        argmax_legal(&probs, &state.mask)
    }

    fn num_timesteps(&self) -> u64 {
        self.num_timesteps
    }

    fn learn(
        &mut self,
        env: &mut AlphaEnv,
        total_timesteps: u64,
        callback: &mut dyn Callback,
        logger: &mut dyn MetricLogger,
    ) -> Result<(), TrainingError> {
        callback.on_run_start()?;
        let mut timing = TimingMetrics::new();
        let mut state = env.reset();
        let mut episode = (0.0f32, 0usize);

        while self.num_timesteps < total_timesteps {
            let rollout = self.collect_rollout(env, &mut state, &mut episode)?;
            timing.record_steps(rollout.len() as u64);
            let last_value = self.policy(&state).1;

            let started = Instant::now();
            callback.on_rollout_end(RolloutContext {
                num_timesteps: self.num_timesteps,
                model: &*self,
                logger: &mut *logger,
            })?;
            timing.record_overhead(started.elapsed());

            let update = self.train(&rollout, last_value);

            if let Some(mean) = self.metrics.mean_reward(100) {
                logger.record("rollout/ep_rew_mean", mean as f64);
            }
            if let Some(len) = self.metrics.average_length(100) {
                logger.record("rollout/ep_len_mean", len as f64);
            }
            logger.record("train/loss", update.loss as f64);
            if let Some(entropy) = update.policy_entropy {
                logger.record("train/entropy", entropy as f64);
            }
            logger.record("time/fps", timing.steps_per_sec() as f64);
            logger.dump(self.num_timesteps)?;
            tracing::info!(
                steps = self.num_timesteps,
                episodes = self.metrics.total_episodes(),
                loss = update.loss,
                "ppo update"
            );
            timing.reset_window();
        }
        Ok(())
    }
}

/// GAE(lambda) over a rollout that may span several episodes. Returns
/// (advantages, returns).
fn compute_gae(rollout: &[RolloutStep], last_value: f32, gamma: f32, lam: f32) -> (Vec<f32>, Vec<f32>) {
    let n = rollout.len();
    let mut advantages = vec![0.0f32; n];
    let mut returns = vec![0.0f32; n];
    let mut gae = 0.0f32;
    for i in (0..n).rev() {
        let non_terminal = if rollout[i].done { 0.0 } else { 1.0 };
        let next_value = if i + 1 < n { rollout[i + 1].value } else { last_value };
        let delta = rollout[i].reward + gamma * next_value * non_terminal - rollout[i].value;
        gae = delta + gamma * lam * non_terminal * gae;
        advantages[i] = gae;
        returns[i] = gae + rollout[i].value;
    }
    (advantages, returns)
}

fn normalize(values: &mut [f32]) {
    let n = values.len();
    if n < 2 {
        return;
    }
    let mean = values.iter().sum::<f32>() / n as f32;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n as f32;
    let std = var.sqrt().max(1e-8);
    for v in values {
        *v = (*v - mean) / std;
    }
}

/// Softmax restricted to the legal actions; illegal entries are exactly zero.
fn masked_softmax(logits: &[f32], mask: &[bool]) -> Vec<f32> {
    let max_val = logits
        .iter()
        .zip(mask)
        .filter(|(_, ok)| **ok)
        .map(|(&l, _)| l)
        .fold(f32::NEG_INFINITY, f32::max);
    let mut probs: Vec<f32> = logits
        .iter()
        .zip(mask)
        .map(|(&l, &ok)| if ok { (l - max_val).exp() } else { 0.0 })
        .collect();
    let sum: f32 = probs.iter().sum();
    if sum > 0.0 {
        for p in &mut probs {
            *p /= sum;
        }
    }
    probs
}

fn sample_categorical(probs: &[f32], rng: &mut StdRng) -> usize {
    let r: f32 = rng.random_range(0.0..1.0);
    let mut cumulative = 0.0;
    for (i, &p) in probs.iter().enumerate() {
        cumulative += p;
        if r < cumulative {
            return i;
        }
    }
    // rounding left r above the final cumulative sum
    probs.iter().rposition(|&p| p > 0.0).unwrap_or(0)
}

fn argmax_legal(values: &[f32], mask: &[bool]) -> usize {
    let mut best = (0, f32::NEG_INFINITY);
    for (i, (&v, &ok)) in values.iter().zip(mask).enumerate() {
        if ok && v > best.1 {
            best = (i, v);
        }
    }
    best.0
}
