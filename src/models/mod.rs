//! # Models Module
//!
//! A model owns the variable store and every network built in it, turns
//! states into actions and transition batches into parameter updates.
//!
//! - [`DistributionModel`] - actor network with one distribution head per
//!   action, trained by a log-likelihood policy gradient
//! - [`DpgTargetModel`] - deterministic policy gradient actor-critic with
//!   target actor and target critic kept in sync on a schedule
//!
//! Every update is built from the current parameter values and committed as
//! one grouped [`UpdateOp`](crate::optimizer::UpdateOp), so a failed update
//! leaves the model unchanged.

mod distribution_model;
mod dpg_target_model;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::baselines::BaselineSpec;
use crate::error::{PallasError, Result};
use crate::networks::{CriticNetworkSpec, NetworkSpec};
use crate::optimizer::OptimizerSpec;
use crate::types::{describe_shape, ActionSpec, Batch, StateSpec, Tensor};
use crate::variables::VariableId;

pub use distribution_model::DistributionModel;
pub use dpg_target_model::DpgTargetModel;

/// Trait defining the interface between an agent and its model
pub trait Model {
    /// Initial internal states for a new episode, one tensor per slot without
    /// a batch axis.
    fn reset(&mut self) -> Result<Vec<Tensor>>;

    /// Actions for a batch of states together with the next internal states.
    /// Advances the model timestep by the batch size.
    fn get_action(&mut self, states: &Batch, internals: &[Tensor], deterministic: bool)
        -> Result<(Batch, Vec<Tensor>)>;

    /// Build and commit one optimization step on `batch`.
    fn update(&mut self, batch: &TransitionBatch) -> Result<UpdateStats>;

    /// Trainable parameters, plus optimizer slots, target networks and
    /// synchronization counters when `include_non_trainable` is set.
    fn get_variables(&self, include_non_trainable: bool) -> Vec<VariableId>;

    fn save_model(&self, path: &str) -> Result<()>;

    fn load_model(&mut self, path: &str) -> Result<()>;

    fn timestep(&self) -> usize;
}

fn default_discount() -> f32 {
    0.99
}

fn default_batch_size() -> usize {
    64
}

fn default_frequency() -> usize {
    4
}

fn default_capacity() -> usize {
    10_000
}

fn default_include_next_states() -> bool {
    true
}

fn default_target_sync_frequency() -> usize {
    10_000
}

fn default_target_update_weight() -> f32 {
    1.0
}

/// When and on how much data the agent asks for an update.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UpdateMode {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_frequency")]
    pub frequency: usize,
}

impl Default for UpdateMode {
    fn default() -> Self {
        UpdateMode {
            batch_size: default_batch_size(),
            frequency: default_frequency(),
        }
    }
}

/// Replay storage configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
    #[serde(default = "default_include_next_states")]
    pub include_next_states: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        MemoryConfig {
            capacity: default_capacity(),
            include_next_states: default_include_next_states(),
        }
    }
}

/// Model hyperparameters.
///
/// `states` and `actions` are the normalised, named declarations; an agent
/// fills them from its own configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(default)]
    pub states: BTreeMap<String, StateSpec>,
    #[serde(default)]
    pub actions: BTreeMap<String, ActionSpec>,
    pub network: NetworkSpec,
    #[serde(default)]
    pub optimizer: OptimizerSpec,
    #[serde(default = "default_discount")]
    pub discount: f32,
    #[serde(default)]
    pub entropy_regularization: f32,
    #[serde(default)]
    pub update_mode: UpdateMode,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub critic_network: CriticNetworkSpec,
    #[serde(default)]
    pub critic_optimizer: OptimizerSpec,
    #[serde(default = "default_target_sync_frequency")]
    pub target_sync_frequency: usize,
    #[serde(default = "default_target_update_weight")]
    pub target_update_weight: f32,
    #[serde(default)]
    pub baseline: Option<BaselineSpec>,
    #[serde(default)]
    pub baseline_optimizer: OptimizerSpec,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl ModelConfig {
    pub fn new(
        states: BTreeMap<String, StateSpec>,
        actions: BTreeMap<String, ActionSpec>,
        network: NetworkSpec,
    ) -> Self {
        ModelConfig {
            states,
            actions,
            network,
            optimizer: OptimizerSpec::default(),
            discount: default_discount(),
            entropy_regularization: 0.0,
            update_mode: UpdateMode::default(),
            memory: MemoryConfig::default(),
            critic_network: CriticNetworkSpec::default(),
            critic_optimizer: OptimizerSpec::default(),
            target_sync_frequency: default_target_sync_frequency(),
            target_update_weight: default_target_update_weight(),
            baseline: None,
            baseline_optimizer: OptimizerSpec::default(),
            seed: None,
        }
    }

    /// Check everything that can be checked before building.
    pub fn validate(&self) -> Result<()> {
        if self.states.is_empty() {
            return Err(PallasError::configuration("no states declared"));
        }
        if self.actions.is_empty() {
            return Err(PallasError::configuration("no actions declared"));
        }
        if !(0.0..=1.0).contains(&self.discount) {
            return Err(PallasError::configuration(format!(
                "discount must lie in [0, 1], got {}",
                self.discount
            )));
        }
        if self.entropy_regularization < 0.0 {
            return Err(PallasError::configuration("entropy_regularization must be non-negative"));
        }
        if self.update_mode.batch_size == 0 || self.update_mode.frequency == 0 {
            return Err(PallasError::configuration("update_mode batch_size and frequency must be positive"));
        }
        if self.memory.capacity < self.update_mode.batch_size {
            return Err(PallasError::configuration(format!(
                "memory capacity {} is smaller than batch size {}",
                self.memory.capacity, self.update_mode.batch_size
            )));
        }
        Ok(())
    }
}

/// A minibatch of transitions. Every tensor has the batch on axis 0.
#[derive(Clone, Debug)]
pub struct TransitionBatch {
    pub states: Batch,
    pub internals: Vec<Tensor>,
    pub actions: Batch,
    pub terminal: Vec<bool>,
    pub reward: Tensor,
    pub next_states: Option<Batch>,
    pub next_internals: Vec<Tensor>,
}

impl TransitionBatch {
    pub fn batch_size(&self) -> usize {
        self.reward.len()
    }

    /// Every entry must carry exactly `batch_size` instances.
    pub fn validate(&self) -> Result<()> {
        let batch_size = self.batch_size();
        if batch_size == 0 {
            return Err(PallasError::EmptyBuffer("transition batch is empty".to_string()));
        }
        if self.reward.ndim() != 1 {
            return Err(PallasError::shape_mismatch(
                "(batch,) rewards".to_string(),
                describe_shape(self.reward.shape()),
            ));
        }
        if self.terminal.len() != batch_size {
            return Err(PallasError::shape_mismatch(
                format!("{} terminal flags", batch_size),
                format!("{} terminal flags", self.terminal.len()),
            ));
        }
        let tensors = self
            .states
            .values()
            .chain(self.actions.values())
            .chain(self.internals.iter())
            .chain(self.next_states.iter().flat_map(|states| states.values()))
            .chain(self.next_internals.iter());
        for tensor in tensors {
            if tensor.shape().first() != Some(&batch_size) {
                return Err(PallasError::shape_mismatch(
                    format!("{} instances", batch_size),
                    describe_shape(tensor.shape()),
                ));
            }
        }
        Ok(())
    }
}

/// Losses and events of one committed update.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UpdateStats {
    pub actor_loss: f32,
    pub critic_loss: Option<f32>,
    pub baseline_loss: Option<f32>,
    pub synchronized: bool,
}
