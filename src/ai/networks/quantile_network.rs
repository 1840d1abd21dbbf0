use std::f32::consts::PI;

use burn::nn::{Linear, LinearConfig, Relu};
use burn::prelude::*;
use burn::tensor::activation::log_softmax;
use burn::tensor::TensorData;

use crate::ai::state_encoding::OBS_DIM;
use crate::expr::SIZE_ACTION;

/// Number of cosine basis functions used to embed a quantile fraction.
pub const N_COS: usize = 64;

/// Quantile regression network with fixed, evenly spaced fractions.
///
/// ```text
/// Input:  [batch, OBS_DIM]
/// FC1:    OBS_DIM -> hidden, ReLU
/// FC2:    hidden -> hidden, ReLU
/// Head:   hidden -> n_quantiles * SIZE_ACTION
/// Output: [batch, n_quantiles, SIZE_ACTION]
/// ```
#[derive(Module, Debug)]
pub struct QuantileNetwork<B: Backend> {
    fc1: Linear<B>,
    fc2: Linear<B>,
    head: Linear<B>,
    relu: Relu,
}

#[derive(Config, Debug)]
pub struct QuantileNetworkConfig {
    pub n_quantiles: usize,
    #[config(default = 128)]
    pub hidden_size: usize,
}

impl QuantileNetworkConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> QuantileNetwork<B> {
        QuantileNetwork {
            fc1: LinearConfig::new(OBS_DIM, self.hidden_size).init(device),
            fc2: LinearConfig::new(self.hidden_size, self.hidden_size).init(device),
            head: LinearConfig::new(self.hidden_size, self.n_quantiles * SIZE_ACTION).init(device),
            relu: Relu::new(),
        }
    }
}

impl<B: Backend> QuantileNetwork<B> {
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 3> {
        let [batch, _] = input.dims();
        let x = self.relu.forward(self.fc1.forward(input));
        let x = self.relu.forward(self.fc2.forward(x));
        self.head
            .forward(x)
            .reshape([batch as i32, -1, SIZE_ACTION as i32])
    }
}

/// Quantile network evaluated at arbitrary fractions (IQN, and FQF's value head).
///
/// ```text
/// psi:    OBS_DIM -> hidden, ReLU                       [batch, hidden]
/// phi:    cos(pi * i * tau), i < N_COS -> hidden, ReLU  [batch, taus, hidden]
/// merge:  psi * phi -> hidden, ReLU -> SIZE_ACTION      [batch, taus, SIZE_ACTION]
/// ```
#[derive(Module, Debug)]
pub struct ImplicitQuantileNetwork<B: Backend> {
    psi: Linear<B>,
    phi: Linear<B>,
    merge: Linear<B>,
    head: Linear<B>,
    relu: Relu,
}

#[derive(Config, Debug)]
pub struct ImplicitQuantileNetworkConfig {
    #[config(default = 128)]
    pub hidden_size: usize,
}

impl ImplicitQuantileNetworkConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> ImplicitQuantileNetwork<B> {
        ImplicitQuantileNetwork {
            psi: LinearConfig::new(OBS_DIM, self.hidden_size).init(device),
            phi: LinearConfig::new(N_COS, self.hidden_size).init(device),
            merge: LinearConfig::new(self.hidden_size, self.hidden_size).init(device),
            head: LinearConfig::new(self.hidden_size, SIZE_ACTION).init(device),
            relu: Relu::new(),
        }
    }
}

impl<B: Backend> ImplicitQuantileNetwork<B> {
    /// Forward pass: obs [batch, OBS_DIM], taus [batch, n_taus] -> [batch, n_taus, SIZE_ACTION].
    pub fn forward(&self, input: Tensor<B, 2>, taus: Tensor<B, 2>) -> Tensor<B, 3> {
        let [batch, n_taus] = taus.dims();
        let hidden = self.relu.forward(self.psi.forward(input));
        let hidden_size = hidden.dims()[1];
        let psi = hidden
            .reshape([batch, 1, hidden_size])
            .repeat_dim(1, n_taus);
        let phi = self.relu.forward(self.phi.forward(cosine_embedding(taus)));
        let x = self.relu.forward(self.merge.forward(psi * phi));
        self.head.forward(x)
    }
}

/// `cos(pi * i * tau)` for `i` in `0..N_COS`: [batch, n_taus] -> [batch, n_taus, N_COS].
fn cosine_embedding<B: Backend>(taus: Tensor<B, 2>) -> Tensor<B, 3> {
    let [batch, n_taus] = taus.dims();
    let device = taus.device();
    let freqs: Vec<f32> = (0..N_COS).map(|i| PI * i as f32).collect();
    let freqs = Tensor::<B, 1>::from_data(TensorData::from(freqs.as_slice()), &device)
        .reshape([1, 1, N_COS])
        .repeat_dim(0, batch)
        .repeat_dim(1, n_taus);
    (taus.reshape([batch, n_taus, 1]).repeat_dim(2, N_COS) * freqs).cos()
}

/// Fraction proposal network for FQF.
///
/// Proposes `n_quantiles` probability masses per state; their running sum gives the
/// fraction boundaries `tau_0 = 0 < tau_1 < ... < tau_N = 1`.
#[derive(Module, Debug)]
pub struct FractionProposalNetwork<B: Backend> {
    fc: Linear<B>,
}

#[derive(Config, Debug)]
pub struct FractionProposalNetworkConfig {
    pub n_quantiles: usize,
}

impl FractionProposalNetworkConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> FractionProposalNetwork<B> {
        FractionProposalNetwork {
            fc: LinearConfig::new(OBS_DIM, self.n_quantiles).init(device),
        }
    }
}

/// Output of [`FractionProposalNetwork::forward`].
#[derive(Debug, Clone)]
pub struct Fractions<B: Backend> {
    /// [batch, N + 1], starting at 0 and ending at 1.
    pub taus: Tensor<B, 2>,
    /// Midpoints of consecutive `taus`: [batch, N].
    pub tau_hats: Tensor<B, 2>,
    /// Entropy of the proposed masses: [batch].
    pub entropy: Tensor<B, 1>,
}

impl<B: Backend> FractionProposalNetwork<B> {
    pub fn forward(&self, input: Tensor<B, 2>) -> Fractions<B> {
        let [batch, _] = input.dims();
        let device = input.device();
        let log_probs = log_softmax(self.fc.forward(input), 1);
        let probs = log_probs.clone().exp();
        let n = probs.dims()[1];

        let entropy = -(log_probs * probs.clone()).sum_dim(1).reshape([batch]);

        // Running sum via an upper-triangular matmul.
        let mut upper = vec![0.0f32; n * n];
        for i in 0..n {
            for j in i..n {
                upper[i * n + j] = 1.0;
            }
        }
        let upper = Tensor::<B, 1>::from_data(TensorData::from(upper.as_slice()), &device)
            .reshape([n, n]);
        let cumulative = probs.matmul(upper);
        let taus = Tensor::cat(vec![Tensor::zeros([batch, 1], &device), cumulative], 1);
        let tau_hats = (taus.clone().slice([0..batch, 0..n]) + taus.clone().slice([0..batch, 1..n + 1]))
            / 2.0;

        Fractions {
            taus,
            tau_hats,
            entropy,
        }
    }
}
