use burn::nn::{Linear, LinearConfig, Relu};
use burn::prelude::*;

use crate::ai::state_encoding::OBS_DIM;
use crate::expr::SIZE_ACTION;

/// Actor-critic network for the PPO agent.
///
/// ```text
/// Input:       [batch, OBS_DIM]   one-hot token slots
/// FC1:         OBS_DIM -> hidden, ReLU
/// FC2:         hidden -> hidden, ReLU
/// Policy head: hidden -> SIZE_ACTION (logits)
/// Value head:  hidden -> 1
/// ```
#[derive(Module, Debug)]
pub struct PolicyValueNetwork<B: Backend> {
    fc1: Linear<B>,
    fc2: Linear<B>,
    policy_head: Linear<B>,
    value_head: Linear<B>,
    relu: Relu,
}

#[derive(Config, Debug)]
pub struct PolicyValueNetworkConfig {
    #[config(default = 128)]
    pub hidden_size: usize,
}

impl PolicyValueNetworkConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> PolicyValueNetwork<B> {
        PolicyValueNetwork {
            fc1: LinearConfig::new(OBS_DIM, self.hidden_size).init(device),
            fc2: LinearConfig::new(self.hidden_size, self.hidden_size).init(device),
            policy_head: LinearConfig::new(self.hidden_size, SIZE_ACTION).init(device),
            value_head: LinearConfig::new(self.hidden_size, 1).init(device),
            relu: Relu::new(),
        }
    }
}

impl<B: Backend> PolicyValueNetwork<B> {
    /// Forward pass: [batch, OBS_DIM] -> (logits [batch, SIZE_ACTION], value [batch, 1]).
    pub fn forward(&self, input: Tensor<B, 2>) -> (Tensor<B, 2>, Tensor<B, 2>) {
        let x = self.relu.forward(self.fc1.forward(input));
        let x = self.relu.forward(self.fc2.forward(x));
        let logits = self.policy_head.forward(x.clone());
        let value = self.value_head.forward(x);
        (logits, value)
    }
}
