use super::distribution_model::{zero_states, Policy};
use super::{DistributionModel, Model, ModelConfig, TransitionBatch, UpdateStats};
use crate::error::{PallasError, Result};
use crate::loss::{L2Loss, Loss};
use crate::networks::CriticNetwork;
use crate::optimizer::{self, Gradients, Optimizer, OptimizerWrapper, Synchronization, UpdateOp};
use crate::types::{add_batch_axis, Batch, Tensor};
use crate::variables::{VariableId, VariableStore};

/// Deterministic policy gradient actor-critic with target networks.
///
/// One update runs five stages against the pre-update parameters:
///
/// 1. the target actor proposes deterministic actions for the next states
/// 2. the target critic scores them into `reward + discount * Q'(s', a')`,
///    a constant regression target
/// 3. the critic `Q(s, a)` is regressed onto that target with an L2 loss
/// 4. the actor takes a log-likelihood policy gradient step weighted by `Q(s, a)`
/// 5. target actor (with its distributions) and target critic are
///    synchronized, each on its own schedule
///
/// All stages are grouped into one update and committed together.
pub struct DpgTargetModel {
    base: DistributionModel,
    discount: f32,
    target_policy: Policy,
    target_network_sync: Synchronization,
    critic: CriticNetwork,
    critic_optimizer: OptimizerWrapper,
    target_critic: CriticNetwork,
    target_critic_sync: Synchronization,
}

impl DpgTargetModel {
    pub fn new(config: ModelConfig) -> Result<Self> {
        if !config.memory.include_next_states {
            return Err(PallasError::PreconditionViolation(
                "target network models need a memory that includes next states".to_string(),
            ));
        }
        if config.baseline.is_some() {
            return Err(PallasError::configuration("target network models do not take a baseline"));
        }
        let discount = config.discount;
        let states = zero_states(&config.states);
        let target_config = config.clone();
        let mut base = DistributionModel::new(config)?;
        let store = &mut base.store;

        let mut target_policy = Policy::new(store, &target_config, "target-network", "target-distributions")?;
        let target_network_sync = Synchronization::new(
            store,
            target_config.target_sync_frequency,
            target_config.target_update_weight,
        )?;

        let mut critic = CriticNetwork::new(store, "critic", &target_config.critic_network);
        let mut critic_optimizer = optimizer::from_spec(&target_config.critic_optimizer, store, "critic-optimizer")?;
        // Same scope string as the critic; the store hands out an independent scope.
        let mut target_critic = CriticNetwork::new(store, "critic", &target_config.critic_network);
        let target_critic_sync = Synchronization::new(
            store,
            target_config.target_sync_frequency,
            target_config.target_update_weight,
        )?;

        let internals: Vec<Tensor> = target_policy.internal_inits().iter().map(add_batch_axis).collect();
        let (actions, _) = target_policy.act(store, &states, &internals, true, &mut base.rng)?;
        critic.apply(store, &states, &actions, false)?;
        target_critic.apply(store, &states, &actions, false)?;
        critic_optimizer.initialize(store, &critic.get_variables())?;

        log::info!(
            "built target network model: critic {}, target critic {}, {} variables",
            critic.scope(),
            target_critic.scope(),
            store.len()
        );
        Ok(DpgTargetModel {
            base,
            discount,
            target_policy,
            target_network_sync,
            critic,
            critic_optimizer,
            target_critic,
            target_critic_sync,
        })
    }

    pub fn store(&self) -> &VariableStore {
        self.base.store()
    }

    /// Live actor parameters: network, then distributions by action name.
    pub fn actor_variables(&self) -> Vec<VariableId> {
        self.base.policy.get_variables()
    }

    /// Target actor parameters, ordered like [`actor_variables`](Self::actor_variables).
    pub fn target_actor_variables(&self) -> Vec<VariableId> {
        self.target_policy.get_variables()
    }

    pub fn critic_variables(&self) -> Vec<VariableId> {
        self.critic.get_variables()
    }

    pub fn target_critic_variables(&self) -> Vec<VariableId> {
        self.target_critic.get_variables()
    }

    /// Q-values of `actions` in `states` under the live critic.
    pub fn predict_q(&mut self, states: &Batch, actions: &Batch) -> Result<Tensor> {
        self.critic.apply(&mut self.base.store, states, actions, false)
    }
}

impl Model for DpgTargetModel {
    fn reset(&mut self) -> Result<Vec<Tensor>> {
        self.base.reset()
    }

    fn get_action(
        &mut self,
        states: &Batch,
        internals: &[Tensor],
        deterministic: bool,
    ) -> Result<(Batch, Vec<Tensor>)> {
        self.base.get_action(states, internals, deterministic)
    }

    fn update(&mut self, batch: &TransitionBatch) -> Result<UpdateStats> {
        batch.validate()?;
        let next_states = batch.next_states.as_ref().ok_or_else(|| {
            PallasError::PreconditionViolation("transition batch carries no next states".to_string())
        })?;
        let time = self.base.timestep();

        let (target_actions, _) = self.target_policy.act(
            &mut self.base.store,
            next_states,
            &batch.next_internals,
            true,
            &mut self.base.rng,
        )?;

        let target_q = self
            .target_critic
            .apply(&mut self.base.store, next_states, &target_actions, false)?;
        let predicted_q = &batch.reward + &(target_q * self.discount);

        let real_q = self
            .critic
            .apply(&mut self.base.store, &batch.states, &batch.actions, true)?;
        let critic_loss = L2Loss.compute(&real_q, &predicted_q)?;
        let mut critic_gradients = Gradients::new();
        let grad_q = L2Loss.gradient(&real_q, &predicted_q)?;
        self.critic
            .backward(&self.base.store, &grad_q, &mut critic_gradients)?;
        let critic_variables = self.critic.get_variables();
        let critic_op =
            self.critic_optimizer
                .minimize(time, &mut self.base.store, &critic_variables, &critic_gradients)?;

        let (actor_loss, actor_op) = self.base.policy_update(batch, &real_q)?;

        let target_actor_variables = self.target_policy.get_variables();
        let actor_variables = self.base.policy.get_variables();
        let network_sync = self.target_network_sync.minimize(
            time,
            &mut self.base.store,
            &target_actor_variables,
            &actor_variables,
        )?;
        let target_critic_variables = self.target_critic.get_variables();
        let critic_sync = self.target_critic_sync.minimize(
            time,
            &mut self.base.store,
            &target_critic_variables,
            &critic_variables,
        )?;
        let synchronized = !network_sync.is_no_op() || !critic_sync.is_no_op();

        UpdateOp::group(vec![critic_op, actor_op, network_sync, critic_sync]).apply(&mut self.base.store)?;
        log::debug!(
            "timestep {}: critic loss {:.6}, actor loss {:.6}, synchronized {}",
            time,
            critic_loss,
            actor_loss,
            synchronized
        );
        Ok(UpdateStats {
            actor_loss,
            critic_loss: Some(critic_loss),
            baseline_loss: None,
            synchronized,
        })
    }

    fn get_variables(&self, include_non_trainable: bool) -> Vec<VariableId> {
        let mut variables = self.base.get_variables(include_non_trainable);
        variables.extend(self.critic.get_variables());
        if include_non_trainable {
            variables.extend(self.critic_optimizer.get_variables());
            variables.extend(self.target_policy.get_variables());
            variables.extend(self.target_network_sync.get_variables());
            variables.extend(self.target_critic.get_variables());
            variables.extend(self.target_critic_sync.get_variables());
        }
        variables
    }

    fn save_model(&self, path: &str) -> Result<()> {
        self.base.save_model(path)
    }

    fn load_model(&mut self, path: &str) -> Result<()> {
        self.base.load_model(path)
    }

    fn timestep(&self) -> usize {
        self.base.timestep()
    }
}
