use crate::agent::{Agent, AgentConfig, AgentCore};
use crate::error::Result;
use crate::models::{DpgTargetModel, Model, UpdateMode, UpdateStats};
use crate::replay_buffer::{ReplayBuffer, Transition};
use crate::types::{ActionValue, OneOrNamed, Tensor};

/// Deep deterministic policy gradient agent.
///
/// Observed steps go into a replay memory. A step's successor state is only
/// known at the next `observe`, so the latest step is held back until then,
/// or stored at once with itself as successor when it ends the episode. A
/// step still held back at `reset` is stored the same way, so no transition
/// spans two episodes.
pub struct DdpgAgent {
    core: AgentCore<DpgTargetModel>,
    memory: ReplayBuffer,
    pending: Option<Transition>,
    update_mode: UpdateMode,
    observed: usize,
    last_stats: Option<UpdateStats>,
}

impl DdpgAgent {
    pub fn new(config: AgentConfig) -> Result<Self> {
        let update_mode = config.model.update_mode.clone();
        let memory = ReplayBuffer::new(config.model.memory.capacity, config.model.memory.include_next_states);
        let core = AgentCore::new(config, DpgTargetModel::new)?;
        log::info!(
            "DDPG agent ready: batch size {}, update every {} steps, memory {}",
            update_mode.batch_size,
            update_mode.frequency,
            memory.capacity()
        );
        Ok(DdpgAgent {
            core,
            memory,
            pending: None,
            update_mode,
            observed: 0,
            last_stats: None,
        })
    }

    pub fn from_json(path: &str) -> Result<Self> {
        Self::new(AgentConfig::from_json(path)?)
    }

    pub fn memory(&self) -> &ReplayBuffer {
        &self.memory
    }

    /// Statistics of the most recent model update, if any ran.
    pub fn last_stats(&self) -> Option<&UpdateStats> {
        self.last_stats.as_ref()
    }

    fn maybe_update(&mut self) -> Result<()> {
        if self.memory.len() < self.update_mode.batch_size || self.observed % self.update_mode.frequency != 0 {
            return Ok(());
        }
        let batch = self.memory.sample(self.update_mode.batch_size, self.core.rng_mut())?;
        let stats = self.core.model.update(&batch)?;
        log::debug!(
            "update at step {}: actor loss {:.4}, critic loss {:?}",
            self.observed,
            stats.actor_loss,
            stats.critic_loss
        );
        self.last_stats = Some(stats);
        Ok(())
    }
}

impl Agent for DdpgAgent {
    type Model = DpgTargetModel;

    fn core(&self) -> &AgentCore<DpgTargetModel> {
        &self.core
    }

    fn core_mut(&mut self) -> &mut AgentCore<DpgTargetModel> {
        &mut self.core
    }

    fn reset(&mut self) -> Result<()> {
        if let Some(previous) = self.pending.take() {
            self.memory.add(previous);
        }
        self.core.reset()
    }

    fn observe(
        &mut self,
        state: OneOrNamed<Tensor>,
        action: OneOrNamed<ActionValue>,
        reward: f32,
        terminal: bool,
    ) -> Result<()> {
        let states = self.core.states_to_named(state)?;
        let actions = self.core.actions_to_named(action)?;
        let internals = self.core.internals().map(<[Tensor]>::to_vec).unwrap_or_default();
        let next_internals = self.core.next_internals().to_vec();

        if let Some(mut previous) = self.pending.take() {
            previous.next_states = states.clone();
            self.memory.add(previous);
        }

        let transition = Transition {
            next_states: states.clone(),
            states,
            internals,
            actions,
            reward,
            terminal,
            next_internals,
        };
        if terminal {
            self.memory.add(transition);
        } else {
            self.pending = Some(transition);
        }

        self.observed += 1;
        self.maybe_update()
    }
}
