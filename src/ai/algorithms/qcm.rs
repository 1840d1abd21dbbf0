use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use burn::grad_clipping::GradientClippingConfig;
use burn::module::AutodiffModule;
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::record::DefaultRecorder;
use burn::tensor::TensorData;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::{Rng, SeedableRng};

use crate::ai::agent::{Agent, SaveModel};
use crate::ai::networks::{
    FractionProposalNetwork, FractionProposalNetworkConfig, ImplicitQuantileNetwork,
    ImplicitQuantileNetworkConfig, QuantileNetwork, QuantileNetworkConfig,
};
use crate::ai::state_encoding::{encode_states_batch, to_host};
use crate::ai::{InferBackend, TrainBackend};
use crate::config::QcmConfig;
use crate::env::{AlphaEnv, AlphaState};
use crate::error::{CheckpointError, ConfigError, TrainingError};
use crate::expr::SIZE_ACTION;
use crate::training::callback::{Callback, RolloutContext};
use crate::training::logger::MetricLogger;
use crate::training::metrics::{EpisodeResult, TimingMetrics, TrainingMetrics};
use crate::training::replay_buffer::{
    MultiStepAccumulator, PrioritizedReplayBuffer, ReplayBuffer, ReplayMemory,
};

type Opt<M> = burn::optim::adaptor::OptimizerAdaptor<burn::optim::Adam, M, TrainBackend>;

/// Distributional value learner behind a quantile agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QcmVariant {
    /// Fixed, evenly spaced quantile fractions.
    Qrdqn,
    /// Fractions sampled uniformly and embedded with a cosine basis.
    Iqn,
    /// Fractions proposed per state by a second network.
    Fqf,
}

impl QcmVariant {
    pub const ALL: [QcmVariant; 3] = [QcmVariant::Qrdqn, QcmVariant::Iqn, QcmVariant::Fqf];

    /// Lower-case key used on the command line and for config file names.
    pub fn key(self) -> &'static str {
        match self {
            QcmVariant::Qrdqn => "qrdqn",
            QcmVariant::Iqn => "iqn",
            QcmVariant::Fqf => "fqf",
        }
    }

    pub fn algorithm_name(self) -> &'static str {
        match self {
            QcmVariant::Qrdqn => "QRDQN",
            QcmVariant::Iqn => "IQN",
            QcmVariant::Fqf => "FQF",
        }
    }
}

impl fmt::Display for QcmVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

enum QuantileHead {
    Fixed {
        online: QuantileNetwork<TrainBackend>,
        target: QuantileNetwork<InferBackend>,
        optimizer: Opt<QuantileNetwork<TrainBackend>>,
    },
    Implicit {
        online: ImplicitQuantileNetwork<TrainBackend>,
        target: ImplicitQuantileNetwork<InferBackend>,
        optimizer: Opt<ImplicitQuantileNetwork<TrainBackend>>,
    },
}

struct FractionHead {
    net: FractionProposalNetwork<TrainBackend>,
    optimizer: Opt<FractionProposalNetwork<TrainBackend>>,
    lr: f64,
    ent_coef: f32,
}

/// Host copy of a quantile distribution: `values` is [batch, n, SIZE_ACTION] and
/// `weights` [batch, n] holds the probability mass of each quantile.
struct QuantileSet {
    values: Vec<f32>,
    weights: Vec<f32>,
    batch: usize,
    n: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    /// Online network, used for acting.
    Act,
    /// Target network, used for bootstrapped returns.
    Target,
}

/// Quantile agent that acts on `mean + std_lam * std` of each action's return
/// distribution. Bootstrapped targets stay greedy on the mean.
pub struct QcmAgent {
    variant: QcmVariant,
    head: QuantileHead,
    fraction: Option<FractionHead>,
    memory: Box<dyn ReplayMemory>,
    multi_step: MultiStepAccumulator,
    config: QcmConfig,
    lr: f64,
    std_lam: f32,
    device: <TrainBackend as Backend>::Device,
    num_timesteps: u64,
    learning_steps: u64,
    rng: StdRng,
    metrics: TrainingMetrics,
}

impl QcmAgent {
    pub fn new(
        variant: QcmVariant,
        config: QcmConfig,
        std_lam: f64,
        mut rng: StdRng,
    ) -> Result<Self, ConfigError> {
        config.validate(variant)?;
        let lr = config.learning_rate(variant)?;
        let device = Default::default();
        let n = config.n_quantiles;

        let head = match variant {
            QcmVariant::Qrdqn => {
                let online: QuantileNetwork<TrainBackend> = QuantileNetworkConfig::new(n)
                    .with_hidden_size(config.hidden_size)
                    .init(&device);
                QuantileHead::Fixed {
                    target: online.valid(),
                    online,
                    optimizer: adam(&config),
                }
            }
            QcmVariant::Iqn | QcmVariant::Fqf => {
                let online: ImplicitQuantileNetwork<TrainBackend> = ImplicitQuantileNetworkConfig::new()
                    .with_hidden_size(config.hidden_size)
                    .init(&device);
                QuantileHead::Implicit {
                    target: online.valid(),
                    online,
                    optimizer: adam(&config),
                }
            }
        };
        let fraction = (variant == QcmVariant::Fqf).then(|| FractionHead {
            net: FractionProposalNetworkConfig::new(n).init(&device),
            optimizer: adam(&config),
            lr: config.fraction_lr,
            ent_coef: config.ent_coef as f32,
        });

        let memory_rng = StdRng::from_rng(&mut rng);
        let memory: Box<dyn ReplayMemory> = if config.use_per {
            let beta_increment = (1.0 - config.per_beta) / config.num_steps.max(1) as f64;
            Box::new(PrioritizedReplayBuffer::new(
                config.memory_size,
                config.per_alpha,
                config.per_beta,
                beta_increment,
                memory_rng,
            ))
        } else {
            Box::new(ReplayBuffer::new(config.memory_size, memory_rng))
        };

        Ok(QcmAgent {
            variant,
            head,
            fraction,
            memory,
            multi_step: MultiStepAccumulator::new(config.multi_step, config.gamma as f32),
            lr,
            std_lam: std_lam as f32,
            device,
            num_timesteps: 0,
            learning_steps: 0,
            rng,
            metrics: TrainingMetrics::new(),
            config,
        })
    }

    pub fn variant(&self) -> QcmVariant {
        self.variant
    }

    pub fn config(&self) -> &QcmConfig {
        &self.config
    }

    pub fn learning_steps(&self) -> u64 {
        self.learning_steps
    }

    /// Train for the configured `num_steps`.
    pub fn run(
        &mut self,
        env: &mut AlphaEnv,
        callback: &mut dyn Callback,
        logger: &mut dyn MetricLogger,
    ) -> Result<(), TrainingError> {
        let steps = self.config.num_steps;
        self.learn(env, steps, callback, logger)
    }

    /// Exploration rate: 1 during warm-up, then linear decay to `epsilon_train`.
    pub fn epsilon(&self) -> f64 {
        let start = self.config.start_steps;
        if self.num_timesteps < start {
            return 1.0;
        }
        let progress = ((self.num_timesteps - start) as f64
            / self.config.epsilon_decay_steps.max(1) as f64)
            .min(1.0);
        1.0 + progress * (self.config.epsilon_train - 1.0)
    }

    fn explore(&mut self, state: &AlphaState) -> usize {
        if self.rng.random::<f64>() < self.epsilon() {
            let legal: Vec<usize> = state.legal_actions().collect();
            if let Some(&action) = legal.choose(&mut self.rng) {
                return action;
            }
        }
        self.exploit(state)
    }

    fn exploit(&mut self, state: &AlphaState) -> usize {
        let set = self.distribution(std::slice::from_ref(state), Role::Act);
        let scores = score_actions(&set, self.std_lam);
        masked_argmax(&scores, &state.mask)
    }

    /// Quantile values of every action for a batch of states, without gradients.
    fn distribution(&mut self, states: &[AlphaState], role: Role) -> QuantileSet {
        let batch = states.len();
        let obs = encode_states_batch::<InferBackend>(states, &self.device);
        match &self.head {
            QuantileHead::Fixed { online, target, .. } => {
                let n = self.config.n_quantiles;
                let q = match role {
                    Role::Act => online.valid().forward(obs),
                    Role::Target => target.forward(obs),
                };
                QuantileSet {
                    values: to_host(q),
                    weights: vec![1.0 / n as f32; batch * n],
                    batch,
                    n,
                }
            }
            QuantileHead::Implicit { online, target, .. } => {
                let (taus, weights, n) = match &self.fraction {
                    Some(fraction) => {
                        let n = self.config.n_quantiles;
                        let proposed = fraction.net.valid().forward(obs.clone());
                        let bounds = to_host(proposed.taus);
                        let weights = (0..batch)
                            .flat_map(|row| {
                                let b = &bounds[row * (n + 1)..(row + 1) * (n + 1)];
                                b.windows(2).map(|w| w[1] - w[0]).collect::<Vec<_>>()
                            })
                            .collect();
                        (proposed.tau_hats, weights, n)
                    }
                    None => {
                        let n = match role {
                            Role::Act => self.config.k,
                            Role::Target => self.config.n_target(),
                        };
                        let taus = uniform_taus::<InferBackend>(&mut self.rng, batch, n, &self.device);
                        (taus, vec![1.0 / n as f32; batch * n], n)
                    }
                };
                let q = match role {
                    Role::Act => online.valid().forward(obs, taus),
                    Role::Target => target.forward(obs, taus),
                };
                QuantileSet {
                    values: to_host(q),
                    weights,
                    batch,
                    n,
                }
            }
        }
    }

    /// One gradient step on a replay minibatch. Returns the weighted loss.
    fn train_step(&mut self) -> f32 {
        let batch = self.memory.sample(self.config.batch_size);
        let b = batch.experiences.len();
        let n = self.config.n_quantiles;
        let kappa = self.config.kappa;
        let device = self.device.clone();

        let states: Vec<AlphaState> = batch.experiences.iter().map(|e| e.state.clone()).collect();
        let next_states: Vec<AlphaState> = batch
            .experiences
            .iter()
            .map(|e| e.next_state.clone())
            .collect();
        let actions: Vec<usize> = batch.experiences.iter().map(|e| e.action).collect();

        // Bootstrapped targets, greedy on the target distribution's mean.
        let next = self.distribution(&next_states, Role::Target);
        let next_means = score_actions(&next, 0.0);
        let mut target = vec![0.0f32; b * next.n];
        for (row, exp) in batch.experiences.iter().enumerate() {
            let a = masked_argmax(
                &next_means[row * SIZE_ACTION..(row + 1) * SIZE_ACTION],
                &exp.next_state.mask,
            );
            let bootstrap = if exp.done { 0.0 } else { exp.discount };
            for j in 0..next.n {
                target[row * next.n + j] =
                    exp.reward + bootstrap * next.values[(row * next.n + j) * SIZE_ACTION + a];
            }
        }
        let target = Tensor::<TrainBackend, 1>::from_data(TensorData::from(target.as_slice()), &device)
            .reshape([b, next.n]);

        let obs = encode_states_batch::<TrainBackend>(&states, &device);
        let one_hot = one_hot_actions::<TrainBackend>(&actions, n, &device);

        let (loss_value, priorities) = match &mut self.head {
            QuantileHead::Fixed {
                online, optimizer, ..
            } => {
                let taus = fixed_tau_hats::<TrainBackend>(b, n, &device);
                let q = select_quantiles(online.forward(obs), one_hot);
                let (loss, priorities, value) = weighted_quantile_loss(q, taus, target, &batch.weights, kappa);
                *online = apply_step(optimizer, online.clone(), self.lr, loss);
                (value, priorities)
            }
            QuantileHead::Implicit {
                online, optimizer, ..
            } => {
                let fractions = self.fraction.as_ref().map(|f| f.net.forward(obs.clone()));
                let taus = match &fractions {
                    Some(f) => f.tau_hats.clone().detach(),
                    None => uniform_taus::<TrainBackend>(&mut self.rng, b, n, &device),
                };
                let q = select_quantiles(online.forward(obs.clone(), taus.clone()), one_hot);

                // Quantiles at the inner fraction boundaries, from the pre-step network.
                let boundary_grads = match &fractions {
                    Some(f) if n >= 2 => {
                        let bounds = to_host(f.taus.clone());
                        let inner: Vec<f32> = (0..b)
                            .flat_map(|row| bounds[row * (n + 1) + 1..row * (n + 1) + n].to_vec())
                            .collect();
                        let inner = Tensor::<InferBackend, 1>::from_data(TensorData::from(inner.as_slice()), &device)
                            .reshape([b, n - 1]);
                        let obs_infer = encode_states_batch::<InferBackend>(&states, &device);
                        let q_inner = to_host(online.valid().forward(obs_infer, inner));
                        Some(fraction_gradients(&q_inner, &to_host(q.clone()), &actions, n))
                    }
                    _ => None,
                };

                let (loss, priorities, value) = weighted_quantile_loss(q, taus, target, &batch.weights, kappa);
                *online = apply_step(optimizer, online.clone(), self.lr, loss);

                if let (Some(fractions), Some(grads), Some(head)) =
                    (fractions, boundary_grads, self.fraction.as_mut())
                {
                    let grads = Tensor::<TrainBackend, 1>::from_data(TensorData::from(grads.as_slice()), &device)
                        .reshape([b, n - 1]);
                    let inner = fractions.taus.slice([0..b, 1..n]);
                    let loss = (inner * grads).sum_dim(1).mean()
                        - fractions.entropy.mean() * head.ent_coef;
                    head.net = apply_step(&mut head.optimizer, head.net.clone(), head.lr, loss);
                }
                (value, priorities)
            }
        };

        self.memory.update_priorities(&batch.indices, &priorities);
        self.learning_steps += 1;
        loss_value
    }

    fn sync_target(&mut self) {
        match &mut self.head {
            QuantileHead::Fixed { online, target, .. } => *target = online.valid(),
            QuantileHead::Implicit { online, target, .. } => *target = online.valid(),
        }
    }

    /// Restore the networks written by [`SaveModel::save_model`] under `stem`.
    /// The target network is reset to the loaded weights.
    pub fn load_model(&mut self, stem: &Path) -> Result<(), CheckpointError> {
        let recorder = DefaultRecorder::default();
        let load_error = |e: burn::record::RecorderError| CheckpointError::ModelLoad(e.to_string());
        match &mut self.head {
            QuantileHead::Fixed { online, .. } => {
                *online = online
                    .clone()
                    .load_file(stem.to_path_buf(), &recorder, &self.device)
                    .map_err(load_error)?;
            }
            QuantileHead::Implicit { online, .. } => {
                *online = online
                    .clone()
                    .load_file(stem.to_path_buf(), &recorder, &self.device)
                    .map_err(load_error)?;
            }
        }
        if let Some(fraction) = &mut self.fraction {
            fraction.net = fraction
                .net
                .clone()
                .load_file(fraction_stem(stem), &recorder, &self.device)
                .map_err(load_error)?;
        }
        self.sync_target();
        Ok(())
    }
}

impl SaveModel for QcmAgent {
    fn save_model(&self, stem: &Path) -> Result<(), CheckpointError> {
        let recorder = DefaultRecorder::default();
        let saved = match &self.head {
            QuantileHead::Fixed { online, .. } => online.valid().save_file(stem.to_path_buf(), &recorder),
            QuantileHead::Implicit { online, .. } => online.valid().save_file(stem.to_path_buf(), &recorder),
        };
        saved.map_err(|e| CheckpointError::ModelSave(e.to_string()))?;
        if let Some(fraction) = &self.fraction {
            fraction
                .net
                .valid()
                .save_file(fraction_stem(stem), &recorder)
                .map_err(|e| CheckpointError::ModelSave(e.to_string()))?;
        }
        Ok(())
    }
}

/// `<stem>_fraction`, next to the quantile network.
fn fraction_stem(stem: &Path) -> PathBuf {
    let mut path = stem.as_os_str().to_owned();
    path.push("_fraction");
    PathBuf::from(path)
}

impl Agent for QcmAgent {
    fn algorithm_name(&self) -> &str {
        self.variant.algorithm_name()
    }

    fn select_action(&mut self, state: &AlphaState, training: bool) -> usize {
        if training {
            self.explore(state)
        } else {
            self.exploit(state)
        }
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

        while self.num_timesteps < total_timesteps {
            let mut state = env.reset();
            let mut episode = (0.0f32, 0usize);
            self.multi_step.clear();

            loop {
                let action = self.explore(&state);
                let result = env.step(action)?;
                self.num_timesteps += 1;
                episode.0 += result.reward;
                episode.1 += 1;
                timing.record_steps(1);

                for exp in self
                    .multi_step
                    .push(state, action, result.reward, &result.state, result.done)
                {
                    self.memory.push(exp);
                }

                let step = self.num_timesteps;
                if step % self.config.update_interval == 0
                    && step >= self.config.start_steps
                    && self.memory.len() >= self.config.batch_size
                {
                    let loss = self.train_step();
                    self.metrics.record_update(loss);
                }
                if step % self.config.target_update_interval == 0 {
                    self.sync_target();
                }
                if result.done {
                    self.metrics.record_episode(EpisodeResult {
                        reward: episode.0,
                        length: episode.1,
                    });
                }

                let log_now = step % self.config.log_interval == 0;
                let eval_now = step % self.config.eval_interval == 0;
                if log_now {
                    if let Some(mean) = self.metrics.mean_reward(100) {
                        logger.record("rollout/ep_rew_mean", mean as f64);
                    }
                    if let Some(loss) = self.metrics.average_loss(100) {
                        logger.record("train/loss", loss as f64);
                    }
                    logger.record("rollout/exploration_rate", self.epsilon());
                    logger.record("time/fps", timing.steps_per_sec() as f64);
                    timing.reset_window();
                }
                if eval_now {
                    let started = Instant::now();
                    callback.on_rollout_end(RolloutContext {
                        num_timesteps: step,
                        model: &*self,
                        logger: &mut *logger,
                    })?;
                    timing.record_overhead(started.elapsed());
                    tracing::info!(
                        steps = step,
                        episodes = self.metrics.total_episodes(),
                        updates = self.learning_steps,
                        "{} evaluation",
                        self.variant.algorithm_name()
                    );
                }
                if log_now || eval_now {
                    logger.dump(step)?;
                }

                if result.done || step >= total_timesteps {
                    break;
                }
                state = result.state;
            }
        }
        Ok(())
    }
}

fn adam<M: AutodiffModule<TrainBackend>>(config: &QcmConfig) -> Opt<M> {
    let adam = AdamConfig::new().with_epsilon(1e-2 / config.batch_size as f32);
    let adam = if config.grad_clipping > 0.0 {
        adam.with_grad_clipping(Some(GradientClippingConfig::Norm(config.grad_clipping)))
    } else {
        adam
    };
    adam.init()
}

fn apply_step<M: AutodiffModule<TrainBackend>>(
    optimizer: &mut Opt<M>,
    net: M,
    lr: f64,
    loss: Tensor<TrainBackend, 1>,
) -> M {
    let grads = loss.backward();
    let grads = GradientsParams::from_grads(grads, &net);
    optimizer.step(lr, net, grads)
}

/// Per-action `mean + std_lam * std` of a quantile set: [batch * SIZE_ACTION].
fn score_actions(set: &QuantileSet, std_lam: f32) -> Vec<f32> {
    let mut scores = vec![0.0f32; set.batch * SIZE_ACTION];
    for row in 0..set.batch {
        let weights = &set.weights[row * set.n..(row + 1) * set.n];
        for a in 0..SIZE_ACTION {
            let value = |i: usize| set.values[(row * set.n + i) * SIZE_ACTION + a];
            let mean: f32 = weights.iter().enumerate().map(|(i, w)| w * value(i)).sum();
            let var: f32 = weights
                .iter()
                .enumerate()
                .map(|(i, w)| w * (value(i) - mean).powi(2))
                .sum();
            scores[row * SIZE_ACTION + a] = mean + std_lam * var.max(0.0).sqrt();
        }
    }
    scores
}

fn masked_argmax(values: &[f32], mask: &[bool]) -> usize {
    let mut best = (0, f32::NEG_INFINITY);
    for (i, (&v, &ok)) in values.iter().zip(mask).enumerate() {
        if ok && v > best.1 {
            best = (i, v);
        }
    }
    best.0
}

/// d W1 / d tau_i = 2 q(tau_i) - q(tau_hat_i) - q(tau_hat_{i-1}) for the inner
/// boundaries, evaluated at the taken action.
///
/// `q_inner` is [batch, n - 1, SIZE_ACTION]; `q_hats` is [batch, n] at the taken action.
fn fraction_gradients(q_inner: &[f32], q_hats: &[f32], actions: &[usize], n: usize) -> Vec<f32> {
    let mut grads = Vec::with_capacity(actions.len() * (n - 1));
    for (row, &a) in actions.iter().enumerate() {
        for i in 1..n {
            let q_tau = q_inner[(row * (n - 1) + i - 1) * SIZE_ACTION + a];
            grads.push(2.0 * q_tau - q_hats[row * n + i] - q_hats[row * n + i - 1]);
        }
    }
    grads
}

/// Quantile Huber loss between `current` [batch, n] at fractions `taus` [batch, n]
/// and `target` [batch, n']. Returns the per-sample loss [batch] and the pairwise
/// TD errors [batch, n, n'].
pub fn quantile_huber_loss<B: Backend>(
    current: Tensor<B, 2>,
    taus: Tensor<B, 2>,
    target: Tensor<B, 2>,
    kappa: f32,
) -> (Tensor<B, 1>, Tensor<B, 3>) {
    let [batch, n] = current.dims();
    let n_target = target.dims()[1];
    let td = target.reshape([batch, 1, n_target]).repeat_dim(1, n)
        - current.reshape([batch, n, 1]).repeat_dim(2, n_target);

    let abs = td.clone().abs();
    let quad = abs.clone().clamp_max(kappa);
    let huber = quad.clone() * quad.clone() * 0.5 + (abs - quad) * kappa;
    let below = td.clone().lower_elem(0.0).float();
    let weight = (taus.reshape([batch, n, 1]).repeat_dim(2, n_target) - below).abs();

    let loss = (weight * huber / kappa)
        .sum_dim(1)
        .mean_dim(2)
        .reshape([batch]);
    (loss, td)
}

/// Importance-weighted batch loss plus per-sample priorities (mean |TD|).
fn weighted_quantile_loss(
    current: Tensor<TrainBackend, 2>,
    taus: Tensor<TrainBackend, 2>,
    target: Tensor<TrainBackend, 2>,
    weights: &[f32],
    kappa: f32,
) -> (Tensor<TrainBackend, 1>, Vec<f32>, f32) {
    let device = current.device();
    let [batch, n] = current.dims();
    let n_target = target.dims()[1];
    let (per_sample, td) = quantile_huber_loss(current, taus, target, kappa);

    let td = to_host(td);
    let pairs = n * n_target;
    let priorities = td
        .chunks(pairs)
        .map(|c| c.iter().map(|v| v.abs()).sum::<f32>() / pairs as f32)
        .collect();

    let weights = Tensor::<TrainBackend, 1>::from_data(TensorData::from(weights), &device)
        .reshape([batch]);
    let loss = (per_sample * weights).mean();
    let value = to_host(loss.clone())[0];
    (loss, priorities, value)
}

/// Pick each row's quantiles at its taken action: [batch, n, A] -> [batch, n].
fn select_quantiles<B: Backend>(q: Tensor<B, 3>, one_hot: Tensor<B, 3>) -> Tensor<B, 2> {
    let [batch, n, _] = q.dims();
    (q * one_hot).sum_dim(2).reshape([batch, n])
}

fn one_hot_actions<B: Backend>(actions: &[usize], n: usize, device: &B::Device) -> Tensor<B, 3> {
    let mut data = vec![0.0f32; actions.len() * n * SIZE_ACTION];
    for (row, &a) in actions.iter().enumerate() {
        for i in 0..n {
            data[(row * n + i) * SIZE_ACTION + a] = 1.0;
        }
    }
    Tensor::<B, 1>::from_data(TensorData::from(data.as_slice()), device).reshape([
        actions.len(),
        n,
        SIZE_ACTION,
    ])
}

/// Midpoints `(2i + 1) / 2n` repeated for every row.
fn fixed_tau_hats<B: Backend>(batch: usize, n: usize, device: &B::Device) -> Tensor<B, 2> {
    let row: Vec<f32> = (0..n).map(|i| (2 * i + 1) as f32 / (2 * n) as f32).collect();
    Tensor::<B, 1>::from_data(TensorData::from(row.as_slice()), device)
        .reshape([1, n])
        .repeat_dim(0, batch)
}

fn uniform_taus<B: Backend>(rng: &mut StdRng, batch: usize, n: usize, device: &B::Device) -> Tensor<B, 2> {
    let data: Vec<f32> = (0..batch * n).map(|_| rng.random::<f32>()).collect();
    Tensor::<B, 1>::from_data(TensorData::from(data.as_slice()), device).reshape([batch, n])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::testing::FixedCalculator;
    use crate::pool::{AlphaPool, AlphaPoolConfig};
    use crate::training::logger::InMemoryLogger;
    use burn::backend::NdArray;
    use std::cell::RefCell;
    use std::rc::Rc;

    type TestBackend = NdArray<f32>;

    fn small_config() -> QcmConfig {
        toml::from_str(
            "N = 4\nlr = 1e-3\nquantile_lr = 1e-3\nuse_per = false\ngamma = 0.9\nmulti_step = 2\n\
             hidden_size = 16\nbatch_size = 8\nmemory_size = 64\nstart_steps = 10\n\
             target_update_interval = 5\nlog_interval = 10\neval_interval = 20\nK = 4\n",
        )
        .unwrap()
    }

    fn env() -> AlphaEnv {
        let calculator = FixedCalculator {
            single: Default::default(),
            mutual: 0.0,
        };
        let pool = AlphaPool::new(AlphaPoolConfig::new(3), Rc::new(calculator));
        AlphaEnv::new(Rc::new(RefCell::new(pool)))
    }

    struct Ticks(Vec<u64>);

    impl Callback for Ticks {
        fn on_rollout_end(&mut self, ctx: RolloutContext<'_>) -> Result<(), TrainingError> {
            self.0.push(ctx.num_timesteps);
            Ok(())
        }
    }

    fn scalar(t: Tensor<TestBackend, 1>) -> f32 {
        to_host(t)[0]
    }

    #[test]
    fn test_variant_keys() {
        let keys: Vec<&str> = QcmVariant::ALL.iter().map(|v| v.key()).collect();
        assert_eq!(keys, vec!["qrdqn", "iqn", "fqf"]);
        assert_eq!(QcmVariant::Fqf.to_string(), "fqf");
    }

    #[test]
    fn test_quantile_huber_loss_values() {
        let device = Default::default();
        let t = |v: f32| Tensor::<TestBackend, 1>::from_floats([v], &device).reshape([1, 1]);

        // td = 2 lies in the linear region: 0.5 * 1 + (2 - 1) = 1.5, weighted by tau
        let (loss, td) = quantile_huber_loss(t(0.0), t(0.5), t(2.0), 1.0);
        assert!((scalar(loss) - 0.75).abs() < 1e-6);
        assert_eq!(td.dims(), [1, 1, 1]);

        // td = -0.5 is quadratic and below zero: |0.25 - 1| * 0.125
        let (loss, _) = quantile_huber_loss(t(0.5), t(0.25), t(0.0), 1.0);
        assert!((scalar(loss) - 0.09375).abs() < 1e-6);
    }

    #[test]
    fn test_quantile_huber_loss_shapes() {
        let device = Default::default();
        let current = Tensor::<TestBackend, 2>::zeros([3, 4], &device);
        let taus = fixed_tau_hats::<TestBackend>(3, 4, &device);
        let target = Tensor::<TestBackend, 2>::ones([3, 5], &device);
        let (loss, td) = quantile_huber_loss(current, taus, target, 1.0);
        assert_eq!(loss.dims(), [3]);
        assert_eq!(td.dims(), [3, 4, 5]);
    }

    #[test]
    fn test_score_actions_adds_spread() {
        // two equally weighted quantiles; action 0 is certain, action 1 is spread out
        let mut values = vec![0.0f32; 2 * SIZE_ACTION];
        values[0] = 1.0;
        values[SIZE_ACTION] = 1.0;
        values[1] = 0.0;
        values[SIZE_ACTION + 1] = 1.8;
        let set = QuantileSet {
            values,
            weights: vec![0.5, 0.5],
            batch: 1,
            n: 2,
        };
        let greedy = score_actions(&set, 0.0);
        assert!((greedy[0] - 1.0).abs() < 1e-6);
        assert!((greedy[1] - 0.9).abs() < 1e-6);
        let optimistic = score_actions(&set, 1.0);
        assert!((optimistic[1] - 1.8).abs() < 1e-6);

        let mask: Vec<bool> = (0..SIZE_ACTION).map(|a| a < 2).collect();
        assert_eq!(masked_argmax(&greedy, &mask), 0);
        assert_eq!(masked_argmax(&optimistic, &mask), 1);
    }

    #[test]
    fn test_fraction_gradients() {
        let n = 3;
        let mut q_inner = vec![0.0f32; (n - 1) * SIZE_ACTION];
        q_inner[2] = 1.0; // boundary 1, action 2
        q_inner[SIZE_ACTION + 2] = 2.0; // boundary 2, action 2
        let q_hats = vec![0.5, 1.5, 2.5];
        let grads = fraction_gradients(&q_inner, &q_hats, &[2], n);
        assert_eq!(grads, vec![2.0 - 1.5 - 0.5, 4.0 - 2.5 - 1.5]);
    }

    #[test]
    fn test_epsilon_schedule() {
        let mut config = small_config();
        config.epsilon_decay_steps = 10;
        config.epsilon_train = 0.1;
        let mut agent =
            QcmAgent::new(QcmVariant::Qrdqn, config, 1.0, StdRng::seed_from_u64(0)).unwrap();
        assert_eq!(agent.epsilon(), 1.0);
        agent.num_timesteps = 15;
        assert!((agent.epsilon() - 0.55).abs() < 1e-9);
        agent.num_timesteps = 100;
        assert!((agent.epsilon() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = small_config();
        config.quantile_lr = None;
        assert!(QcmAgent::new(QcmVariant::Fqf, config, 1.0, StdRng::seed_from_u64(0)).is_err());
    }

    fn run_variant(variant: QcmVariant, config: QcmConfig) {
        let mut agent = QcmAgent::new(variant, config, 1.0, StdRng::seed_from_u64(3)).unwrap();
        let mut env = env();
        let state = env.state();
        for training in [true, false] {
            let action = agent.select_action(&state, training);
            assert!(state.mask[action]);
        }

        let mut ticks = Ticks(Vec::new());
        let mut logger = InMemoryLogger::new();
        agent.learn(&mut env, 40, &mut ticks, &mut logger).unwrap();
        assert_eq!(agent.num_timesteps(), 40);
        assert_eq!(ticks.0, vec![20, 40]);
        assert!(agent.learning_steps() > 0);
        let steps: Vec<u64> = logger.records().iter().map(|r| r.0).collect();
        assert_eq!(steps, vec![10, 20, 30, 40]);
        assert!(logger.records()[3].1.contains_key("train/loss"));

        let dir = tempfile::tempdir().unwrap();
        agent.save_model(&dir.path().join("40_steps")).unwrap();
        assert!(dir.path().join("40_steps.mpk").exists());
        assert_eq!(
            dir.path().join("40_steps_fraction.mpk").exists(),
            variant == QcmVariant::Fqf
        );
    }

    fn outputs(agent: &mut QcmAgent, state: &AlphaState) -> (Vec<f32>, Vec<f32>, usize) {
        let states = std::slice::from_ref(state);
        agent.rng = StdRng::seed_from_u64(11);
        let online = agent.distribution(states, Role::Act).values;
        agent.rng = StdRng::seed_from_u64(11);
        let target = agent.distribution(states, Role::Target).values;
        agent.rng = StdRng::seed_from_u64(11);
        let action = agent.exploit(state);
        (online, target, action)
    }

    fn assert_checkpoint_restores(variant: QcmVariant) {
        let state = env().state();
        let mut saved = QcmAgent::new(variant, small_config(), 1.0, StdRng::seed_from_u64(1)).unwrap();
        let mut fresh = QcmAgent::new(variant, small_config(), 1.0, StdRng::seed_from_u64(2)).unwrap();
        let expected = outputs(&mut saved, &state);
        assert_ne!(outputs(&mut fresh, &state).0, expected.0);

        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("100_steps");
        saved.save_model(&stem).unwrap();
        fresh.load_model(&stem).unwrap();

        let (online, target, action) = outputs(&mut fresh, &state);
        assert_eq!(online.len(), expected.0.len());
        for (a, b) in online.iter().zip(&expected.0) {
            assert!((a - b).abs() < 1e-6, "{variant}: {a} vs {b}");
        }
        // target follows the loaded weights
        assert_eq!(target.len(), expected.1.len());
        for (a, b) in target.iter().zip(&expected.1) {
            assert!((a - b).abs() < 1e-6, "{variant}: {a} vs {b}");
        }
        assert_eq!(action, expected.2);
    }

    #[test]
    fn test_load_model_restores_qrdqn() {
        assert_checkpoint_restores(QcmVariant::Qrdqn);
    }

    #[test]
    fn test_load_model_restores_iqn() {
        assert_checkpoint_restores(QcmVariant::Iqn);
    }

    #[test]
    fn test_load_model_restores_fqf() {
        assert_checkpoint_restores(QcmVariant::Fqf);
    }

    #[test]
    fn test_load_model_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut agent =
            QcmAgent::new(QcmVariant::Fqf, small_config(), 1.0, StdRng::seed_from_u64(0)).unwrap();
        let err = agent.load_model(&dir.path().join("nothing")).unwrap_err();
        assert!(matches!(err, CheckpointError::ModelLoad(_)));
    }

    #[test]
    fn test_qrdqn_learns() {
        run_variant(QcmVariant::Qrdqn, small_config());
    }

    #[test]
    fn test_iqn_learns_with_per() {
        let mut config = small_config();
        config.use_per = true;
        config.n_target = Some(6);
        run_variant(QcmVariant::Iqn, config);
    }

    #[test]
    fn test_fqf_learns() {
        let mut config = small_config();
        config.ent_coef = 0.01;
        run_variant(QcmVariant::Fqf, config);
    }
}
