use ndarray::IxDyn;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

use super::{Model, ModelConfig, TransitionBatch, UpdateStats};
use crate::baselines::{self, Baseline};
use crate::distributions::Distribution;
use crate::error::{PallasError, Result};
use crate::networks::{self, Network};
use crate::optimizer::{self, Gradients, Optimizer, OptimizerWrapper, UpdateOp};
use crate::types::{add_batch_axis, describe_shape, Batch, StateSpec, Tensor};
use crate::variables::{VariableId, VariableStore};

/// Actor network plus one distribution head per action.
pub(crate) struct Policy {
    network: Box<dyn Network>,
    distributions: BTreeMap<String, Distribution>,
}

impl Policy {
    pub(crate) fn new(
        store: &mut VariableStore,
        config: &ModelConfig,
        network_scope: &str,
        distributions_scope: &str,
    ) -> Result<Self> {
        let network = networks::from_spec(&config.network, store, network_scope)?;
        let mut distributions = BTreeMap::new();
        for (name, spec) in &config.actions {
            let scope = format!("{}/{}", distributions_scope, name);
            distributions.insert(name.clone(), Distribution::from_action_spec(store, &scope, spec)?);
        }
        Ok(Policy { network, distributions })
    }

    pub(crate) fn internal_inits(&self) -> Vec<Tensor> {
        self.network.internal_inits()
    }

    /// Sample one action per distribution from the embedding of `states`.
    pub(crate) fn act<R: Rng>(
        &mut self,
        store: &mut VariableStore,
        states: &Batch,
        internals: &[Tensor],
        deterministic: bool,
        rng: &mut R,
    ) -> Result<(Batch, Vec<Tensor>)> {
        let out = self.network.apply(store, states, internals, false)?;
        let mut actions = Batch::new();
        for (name, distribution) in self.distributions.iter_mut() {
            distribution.parameterize(store, &out.output, false)?;
            actions.insert(name.clone(), distribution.sample(deterministic, rng)?);
        }
        Ok((actions, out.internals))
    }

    /// Log-likelihood policy gradient loss weighted by `reward`, accumulating
    /// parameter gradients.
    ///
    /// The loss is the batch mean of `-mean_j(log_prob_j) * reward` plus the
    /// network regularization minus `entropy_regularization` times the mean
    /// entropy.
    pub(crate) fn loss(
        &mut self,
        store: &mut VariableStore,
        batch: &TransitionBatch,
        reward: &Tensor,
        entropy_regularization: f32,
        gradients: &mut Gradients,
    ) -> Result<f32> {
        let batch_size = batch.batch_size();
        if reward.ndim() != 1 || reward.len() != batch_size {
            return Err(PallasError::shape_mismatch(
                format!("[{}]", batch_size),
                describe_shape(reward.shape()),
            ));
        }
        let mut entries = 0;
        for name in self.distributions.keys() {
            let action = batch
                .actions
                .get(name)
                .ok_or_else(|| PallasError::configuration(format!("batch has no action '{}'", name)))?;
            entries += action.len() / batch_size;
        }
        if entries == 0 {
            return Err(PallasError::EmptyBuffer("actions have no entries".to_string()));
        }
        let scale = 1.0 / (entries * batch_size) as f32;
        let rewards: Vec<f32> = reward.iter().copied().collect();

        let embedding = self.network.apply(store, &batch.states, &batch.internals, true)?.output;
        let mut grad_embedding = Tensor::zeros(embedding.raw_dim());
        let mut policy_loss = 0.0;
        let mut entropy_sum = 0.0;

        for (name, distribution) in self.distributions.iter_mut() {
            let action = &batch.actions[name];
            distribution.parameterize(store, &embedding, true)?;
            let log_prob = distribution.log_probability(action)?;
            let entropy = distribution.entropy()?;

            policy_loss -= log_prob
                .indexed_iter()
                .map(|(index, &lp)| lp * rewards[index[0]])
                .sum::<f32>()
                * scale;
            entropy_sum += entropy.sum();

            let grad_log_prob = Tensor::from_shape_fn(log_prob.raw_dim(), |index| -rewards[index[0]] * scale);
            let grad_entropy = Tensor::from_elem(entropy.raw_dim(), -entropy_regularization * scale);
            grad_embedding += &distribution.backward(store, action, &grad_log_prob, &grad_entropy, gradients)?;
        }

        let mut loss = policy_loss - entropy_regularization * entropy_sum * scale;
        if let Some(regularization) = self.network.regularization_loss(store)? {
            loss += regularization;
            self.network.regularization_backward(store, gradients)?;
        }
        self.network.backward(store, &grad_embedding, gradients)?;

        if !loss.is_finite() {
            return Err(PallasError::NumericalError(format!("policy loss is {}", loss)));
        }
        Ok(loss)
    }

    pub(crate) fn network_variables(&self) -> Vec<VariableId> {
        self.network.get_variables()
    }

    /// Distribution parameters, ordered by action name.
    pub(crate) fn distribution_variables(&self) -> Vec<VariableId> {
        self.distributions
            .values()
            .flat_map(|distribution| distribution.get_variables())
            .collect()
    }

    pub(crate) fn get_variables(&self) -> Vec<VariableId> {
        let mut variables = self.network_variables();
        variables.extend(self.distribution_variables());
        variables
    }
}

/// A batch of one all-zero instance per declared state.
pub(crate) fn zero_states(states: &BTreeMap<String, StateSpec>) -> Batch {
    states
        .iter()
        .map(|(name, spec)| {
            let mut shape = vec![1];
            shape.extend(&spec.shape);
            (name.clone(), Tensor::zeros(IxDyn(&shape)))
        })
        .collect()
}

struct BaselineTrainer {
    baseline: Box<dyn Baseline>,
    optimizer: OptimizerWrapper,
}

/// Policy gradient model over an actor network with one distribution per action.
///
/// With a baseline configured, the reward is replaced by the advantage
/// `reward - baseline(states)` and the baseline is regressed onto the reward
/// in the same update.
pub struct DistributionModel {
    config: ModelConfig,
    pub(crate) store: VariableStore,
    pub(crate) policy: Policy,
    optimizer: OptimizerWrapper,
    baseline: Option<BaselineTrainer>,
    pub(crate) rng: StdRng,
    timestep: usize,
}

impl DistributionModel {
    pub fn new(config: ModelConfig) -> Result<Self> {
        config.validate()?;
        let (mut store, mut rng) = match config.seed {
            Some(seed) => (VariableStore::with_seed(seed), StdRng::seed_from_u64(seed.wrapping_add(1))),
            None => (VariableStore::new(), StdRng::from_entropy()),
        };

        let mut policy = Policy::new(&mut store, &config, "network", "distributions")?;
        let mut policy_optimizer = optimizer::from_spec(&config.optimizer, &mut store, "optimizer")?;
        let mut baseline = match &config.baseline {
            Some(spec) => Some(BaselineTrainer {
                baseline: baselines::from_spec(spec, &mut store, "baseline")?,
                optimizer: optimizer::from_spec(&config.baseline_optimizer, &mut store, "baseline-optimizer")?,
            }),
            None => None,
        };

        // One forward pass creates every parameter up front.
        let states = zero_states(&config.states);
        let internals: Vec<Tensor> = policy.internal_inits().iter().map(add_batch_axis).collect();
        policy.act(&mut store, &states, &internals, true, &mut rng)?;
        policy_optimizer.initialize(&mut store, &policy.get_variables())?;
        if let Some(trainer) = baseline.as_mut() {
            trainer.baseline.predict(&mut store, &states)?;
            let variables = trainer.baseline.get_variables();
            trainer.optimizer.initialize(&mut store, &variables)?;
        }

        log::info!(
            "built distribution model with {} actions and {} variables",
            config.actions.len(),
            store.len()
        );
        Ok(DistributionModel {
            config,
            store,
            policy,
            optimizer: policy_optimizer,
            baseline,
            rng,
            timestep: 0,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn store(&self) -> &VariableStore {
        &self.store
    }

    /// Each declared state must be present with shape `(batch, *shape)`.
    pub(crate) fn check_states(&self, states: &Batch) -> Result<usize> {
        let mut batch_size = None;
        for (name, spec) in &self.config.states {
            let tensor = states
                .get(name)
                .ok_or_else(|| PallasError::configuration(format!("missing state '{}'", name)))?;
            if tensor.ndim() == 0 || tensor.shape()[1..] != spec.shape[..] {
                return Err(PallasError::shape_mismatch(
                    format!("(batch, {:?}) for state '{}'", spec.shape, name),
                    describe_shape(tensor.shape()),
                ));
            }
            let size = tensor.shape()[0];
            if *batch_size.get_or_insert(size) != size {
                return Err(PallasError::shape_mismatch(
                    format!("{} instances", batch_size.unwrap_or(size)),
                    format!("{} instances for state '{}'", size, name),
                ));
            }
        }
        if states.len() != self.config.states.len() {
            return Err(PallasError::configuration(format!(
                "expected states {:?}",
                self.config.states.keys().collect::<Vec<_>>()
            )));
        }
        Ok(batch_size.unwrap_or(0))
    }

    /// Build the policy update for `batch` weighted by `reward`.
    pub(crate) fn policy_update(&mut self, batch: &TransitionBatch, reward: &Tensor) -> Result<(f32, UpdateOp)> {
        let mut gradients = Gradients::new();
        let loss = self.policy.loss(
            &mut self.store,
            batch,
            reward,
            self.config.entropy_regularization,
            &mut gradients,
        )?;
        let variables = self.policy.get_variables();
        let op = self
            .optimizer
            .minimize(self.timestep, &mut self.store, &variables, &gradients)?;
        Ok((loss, op))
    }

    /// Baseline loss, advantage and update for `batch`, if a baseline is configured.
    fn baseline_update(&mut self, batch: &TransitionBatch) -> Result<Option<(f32, Tensor, UpdateOp)>> {
        let trainer = match self.baseline.as_mut() {
            Some(trainer) => trainer,
            None => return Ok(None),
        };
        let prediction = trainer.baseline.predict(&mut self.store, &batch.states)?;
        let advantage = &batch.reward - &prediction;
        let (loss, gradients) = trainer.baseline.loss(&mut self.store, &batch.states, &batch.reward)?;
        let variables = trainer.baseline.get_variables();
        let op = trainer
            .optimizer
            .minimize(self.timestep, &mut self.store, &variables, &gradients)?;
        Ok(Some((loss, advantage, op)))
    }
}

impl Model for DistributionModel {
    fn reset(&mut self) -> Result<Vec<Tensor>> {
        Ok(self.policy.internal_inits())
    }

    fn get_action(
        &mut self,
        states: &Batch,
        internals: &[Tensor],
        deterministic: bool,
    ) -> Result<(Batch, Vec<Tensor>)> {
        let batch_size = self.check_states(states)?;
        let result = self
            .policy
            .act(&mut self.store, states, internals, deterministic, &mut self.rng)?;
        self.timestep += batch_size;
        Ok(result)
    }

    fn update(&mut self, batch: &TransitionBatch) -> Result<UpdateStats> {
        batch.validate()?;
        let (baseline_loss, reward, baseline_op) = match self.baseline_update(batch)? {
            Some((loss, advantage, op)) => (Some(loss), advantage, op),
            None => (None, batch.reward.clone(), UpdateOp::no_op()),
        };
        let (actor_loss, policy_op) = self.policy_update(batch, &reward)?;
        UpdateOp::group(vec![policy_op, baseline_op]).apply(&mut self.store)?;
        log::debug!("timestep {}: actor loss {:.6}", self.timestep, actor_loss);
        Ok(UpdateStats {
            actor_loss,
            critic_loss: None,
            baseline_loss,
            synchronized: false,
        })
    }

    fn get_variables(&self, include_non_trainable: bool) -> Vec<VariableId> {
        let mut variables = self.policy.get_variables();
        if let Some(trainer) = &self.baseline {
            variables.extend(trainer.baseline.get_variables());
        }
        if include_non_trainable {
            variables.extend(self.optimizer.get_variables());
            if let Some(trainer) = &self.baseline {
                variables.extend(trainer.optimizer.get_variables());
            }
        }
        variables
    }

    fn save_model(&self, path: &str) -> Result<()> {
        self.store.save(path)
    }

    fn load_model(&mut self, path: &str) -> Result<()> {
        self.store.load(path)
    }

    fn timestep(&self) -> usize {
        self.timestep
    }
}
