//! # alpha_qcm
//!
//! Reinforcement-learning search for formulaic alpha factors. An agent writes
//! expressions token by token; a bounded, linearly weighted alpha pool scores each
//! finished expression on the training data and the ensemble improvement is the
//! reward. A training supervisor reports pool health at every rollout, scores the
//! pool out of sample and writes checkpoints.
//!
//! ## Modules
//!
//! - [`expr`]: Tokens, expression trees, reverse-Polish builder
//! - [`data`]: Market data panels, CSV loading, IC calculators
//! - [`pool`]: Alpha pool and its read-only snapshot view
//! - [`env`]: Token-by-token expression environment
//! - [`ai`]: Agent traits, PPO and quantile (QR-DQN, IQN, FQF) agents, networks
//! - [`training`]: Callbacks, supervisor, metric logging, replay memories
//! - [`checkpoint`]: Model and pool persistence
//! - [`run`]: Seeding, dataset splits, log naming, run assembly
//! - [`config`]: TOML hyperparameters and validation
//! - [`error`]: Structured error types

#![recursion_limit = "256"]

pub mod ai;
pub mod checkpoint;
pub mod config;
pub mod data;
pub mod env;
pub mod error;
pub mod expr;
pub mod pool;
pub mod run;
pub mod training;
