mod policy_value_network;
mod quantile_network;

pub use policy_value_network::{PolicyValueNetwork, PolicyValueNetworkConfig};
pub use quantile_network::{
    FractionProposalNetwork, FractionProposalNetworkConfig, Fractions, ImplicitQuantileNetwork,
    ImplicitQuantileNetworkConfig, QuantileNetwork, QuantileNetworkConfig,
};
