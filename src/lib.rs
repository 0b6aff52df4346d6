//! # Pallas - Configurable Deep Reinforcement Learning Agents
//!
//! Pallas builds reinforcement learning agents from declarative JSON
//! configuration: states and actions are declared once, networks are
//! described as layer stacks, and models compose networks, action
//! distributions, baselines and optimizers over a shared variable store.
//!
//! ## Key Features
//!
//! - **Variables**: named, scoped parameter store with templates that reuse
//!   variables across calls
//! - **Networks**: layered networks with dense, convolutional, recurrent and
//!   structural layers, plus state-action critics
//! - **Models**: policy-gradient distribution model and a deterministic
//!   policy gradient model with target networks
//! - **Agents**: preprocessing, exploration and replay memory around a model
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pallas::agent::{Agent, AgentConfig, DdpgAgent};
//! use pallas::types::OneOrNamed;
//! use ndarray::array;
//!
//! let config = AgentConfig::from_json_str(r#"{
//!     "states": {"shape": [3]},
//!     "actions": {"type": "float", "min_value": -2.0, "max_value": 2.0},
//!     "exploration": {"type": "ornstein_uhlenbeck"},
//!     "model": {"network": [{"type": "dense", "size": 64}, {"type": "dense", "size": 64}]}
//! }"#).unwrap();
//! let mut agent = DdpgAgent::new(config).unwrap();
//!
//! agent.reset().unwrap();
//! for _ in 0..100 {
//!     let state = OneOrNamed::Single(array![0.0, 1.0, 0.0].into_dyn());
//!     let (state, action) = agent.act(state).unwrap();
//!     agent.observe(state, action, 0.0, false).unwrap();
//! }
//! agent.save_model("pendulum.bin").unwrap();
//! ```
//!
//! ## Module Organization
//!
//! - [`activations`] - Activation functions (ReLU, Sigmoid, Tanh, etc.)
//! - [`agent`] - Agents and their JSON configuration
//! - [`baselines`] - State-value baselines for variance reduction
//! - [`distributions`] - Categorical and Gaussian action distributions
//! - [`error`] - Error types and result handling
//! - [`exploration`] - Exploration schedules and noise processes
//! - [`layers`] - Network layers and the layer registry
//! - [`loss`] - Loss functions for training
//! - [`models`] - Models that turn transitions into parameter updates
//! - [`networks`] - Layered networks and critics
//! - [`optimizer`] - Optimizers, update operations and target synchronization
//! - [`preprocessing`] - State preprocessing stacks
//! - [`replay_buffer`] - Experience replay memory
//! - [`types`] - State and action declarations
//! - [`variables`] - Variable store and templates

pub mod activations;
pub mod agent;
pub mod baselines;
pub mod distributions;
pub mod error;
pub mod exploration;
pub mod layers;
pub mod loss;
pub mod models;
pub mod networks;
pub mod optimizer;
pub mod preprocessing;
pub mod replay_buffer;
pub mod types;
pub mod variables;

#[cfg(test)]
mod tests;
