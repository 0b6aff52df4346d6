//! # Agents Module
//!
//! An agent mediates between an environment and a [`Model`]: it normalises
//! states and actions between the caller's form (a single unnamed value or a
//! named mapping) and the model's named batches, runs preprocessing before the
//! model and exploration after it, and threads recurrent internal state from
//! one `act` to the next.
//!
//! ## Control loop
//!
//! - `reset()` starts an episode: the internal state is re-initialised from
//!   the model and every preprocessing stack and exploration is reset
//! - `act(state)` returns the (preprocessed) state and the action to take
//! - `observe(state, action, reward, terminal)` hands the outcome back; what
//!   happens with it is up to the concrete agent
//!
//! ```rust,no_run
//! use pallas::agent::{Agent, AgentConfig, DdpgAgent};
//! use pallas::types::OneOrNamed;
//! use ndarray::array;
//!
//! let config = AgentConfig::from_json("ddpg.json").unwrap();
//! let mut agent = DdpgAgent::new(config).unwrap();
//!
//! agent.reset().unwrap();
//! let state = OneOrNamed::Single(array![0.1, -0.2, 0.3].into_dyn());
//! let (state, action) = agent.act(state).unwrap();
//! agent.observe(state, action, 1.0, false).unwrap();
//! ```

mod config;
mod ddpg;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;

use crate::error::{PallasError, Result};
use crate::exploration::Exploration;
use crate::models::{Model, ModelConfig};
use crate::preprocessing::Preprocessing;
use crate::types::{
    add_batch_axis, describe_shape, remove_batch_axis, ActionSpec, ActionType, ActionValue, Batch, OneOrNamed,
    StateSpec, Tensor,
};

pub use config::AgentConfig;
pub use ddpg::DdpgAgent;

/// Name under which a single unnamed state is passed to the model.
pub const UNIQUE_STATE: &str = "state";

/// Name under which a single unnamed action is passed to the model.
pub const UNIQUE_ACTION: &str = "action";

/// Trait for reinforcement learning agents
pub trait Agent {
    type Model: Model;

    fn core(&self) -> &AgentCore<Self::Model>;

    fn core_mut(&mut self) -> &mut AgentCore<Self::Model>;

    /// Start a new episode.
    fn reset(&mut self) -> Result<()> {
        self.core_mut().reset()
    }

    /// Select an action for `state`, with exploration applied.
    fn act(&mut self, state: OneOrNamed<Tensor>) -> Result<(OneOrNamed<Tensor>, OneOrNamed<ActionValue>)> {
        self.core_mut().act(state, false)
    }

    /// Select an action for `state` with deterministic model sampling.
    ///
    /// Only the distribution sampling is deterministic: configured exploration
    /// is still applied to the result. Build the agent without exploration to
    /// evaluate the bare policy.
    fn act_deterministic(
        &mut self,
        state: OneOrNamed<Tensor>,
    ) -> Result<(OneOrNamed<Tensor>, OneOrNamed<ActionValue>)> {
        self.core_mut().act(state, true)
    }

    /// Record the outcome of the last action.
    fn observe(
        &mut self,
        state: OneOrNamed<Tensor>,
        action: OneOrNamed<ActionValue>,
        reward: f32,
        terminal: bool,
    ) -> Result<()>;

    fn save_model(&self, path: &str) -> Result<()> {
        self.core().model.save_model(path)
    }

    fn load_model(&mut self, path: &str) -> Result<()> {
        self.core_mut().model.load_model(path)
    }
}

/// Normalise a caller value into a named mapping with exactly `names` as keys.
fn normalize<'a, T>(
    value: OneOrNamed<T>,
    unique: bool,
    unique_name: &str,
    names: impl Iterator<Item = &'a String>,
    what: &str,
) -> Result<BTreeMap<String, T>> {
    match (unique, value.is_unique()) {
        (true, false) => {
            return Err(PallasError::configuration(format!("expected a single unnamed {}", what)));
        }
        (false, true) => {
            return Err(PallasError::configuration(format!("expected named {}s", what)));
        }
        _ => {}
    }
    let named = value.into_named(unique_name);
    let expected = names.collect::<Vec<_>>();
    if named.len() != expected.len() || expected.iter().any(|name| !named.contains_key(*name)) {
        return Err(PallasError::configuration(format!(
            "expected {}s {:?}, got {:?}",
            what,
            expected,
            named.keys().collect::<Vec<_>>()
        )));
    }
    Ok(named)
}

/// Check that per-name configuration refers only to declared names and uses
/// the same single-or-named form as the declarations.
fn named_config<'a, T>(
    value: Option<OneOrNamed<T>>,
    unique: bool,
    unique_name: &str,
    names: impl Iterator<Item = &'a String>,
    what: &str,
) -> Result<BTreeMap<String, T>> {
    let value = match value {
        Some(value) => value,
        None => return Ok(BTreeMap::new()),
    };
    if unique != value.is_unique() {
        return Err(PallasError::configuration(format!(
            "{} must be {} like the declarations it refers to",
            what,
            if unique { "a single entry" } else { "a named mapping" }
        )));
    }
    let named = value.into_named(unique_name);
    let declared = names.collect::<Vec<_>>();
    if let Some(unknown) = named.keys().find(|name| !declared.contains(name)) {
        return Err(PallasError::configuration(format!("{} for undeclared name '{}'", what, unknown)));
    }
    Ok(named)
}

/// Shared agent machinery: normalisation, preprocessing, exploration and
/// internal-state threading around a model.
pub struct AgentCore<M: Model> {
    pub model: M,
    raw_states: BTreeMap<String, StateSpec>,
    states: BTreeMap<String, StateSpec>,
    actions: BTreeMap<String, ActionSpec>,
    unique_state: bool,
    unique_action: bool,
    preprocessing: BTreeMap<String, Preprocessing>,
    exploration: BTreeMap<String, Exploration>,
    rng: StdRng,
    episode: usize,
    timestep: usize,
    internals: Option<Vec<Tensor>>,
    next_internals: Vec<Tensor>,
}

impl<M: Model> AgentCore<M> {
    /// Resolve the configuration and build the model with `build`.
    ///
    /// Preprocessing rewrites the declared state shapes before the model sees them.
    pub fn new<F>(config: AgentConfig, build: F) -> Result<Self>
    where
        F: FnOnce(ModelConfig) -> Result<M>,
    {
        let unique_state = config.states.is_unique();
        let unique_action = config.actions.is_unique();
        let raw_states = config.states.into_named(UNIQUE_STATE);
        let actions = config.actions.into_named(UNIQUE_ACTION);

        let preprocessing_specs = named_config(
            config.preprocessing,
            unique_state,
            UNIQUE_STATE,
            raw_states.keys(),
            "preprocessing",
        )?;
        let mut preprocessing = BTreeMap::new();
        for (name, specs) in preprocessing_specs {
            preprocessing.insert(name, Preprocessing::from_specs(&specs)?);
        }
        let mut states = raw_states.clone();
        for (name, state) in states.iter_mut() {
            if let Some(stack) = preprocessing.get(name) {
                state.shape = stack.processed_shape(&state.shape);
            }
        }

        let exploration_specs = named_config(
            config.exploration,
            unique_action,
            UNIQUE_ACTION,
            actions.keys(),
            "exploration",
        )?;
        let mut exploration = BTreeMap::new();
        for (name, spec) in exploration_specs {
            exploration.insert(name, Exploration::from_spec(&spec)?);
        }

        let mut model_config = config.model;
        model_config.states = states.clone();
        model_config.actions = actions.clone();
        let rng = match model_config.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(2)),
            None => StdRng::from_entropy(),
        };
        let model = build(model_config)?;

        Ok(AgentCore {
            model,
            raw_states,
            states,
            actions,
            unique_state,
            unique_action,
            preprocessing,
            exploration,
            rng,
            episode: 0,
            timestep: 0,
            internals: None,
            next_internals: Vec::new(),
        })
    }

    /// State declarations as the model sees them, after preprocessing.
    pub fn states(&self) -> &BTreeMap<String, StateSpec> {
        &self.states
    }

    pub fn actions(&self) -> &BTreeMap<String, ActionSpec> {
        &self.actions
    }

    pub fn episode(&self) -> usize {
        self.episode
    }

    pub fn timestep(&self) -> usize {
        self.timestep
    }

    /// Internal state the last `act` ran with.
    pub fn internals(&self) -> Option<&[Tensor]> {
        self.internals.as_deref()
    }

    /// Internal state the next `act` will run with.
    pub fn next_internals(&self) -> &[Tensor] {
        &self.next_internals
    }

    pub(crate) fn rng_mut(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    pub fn reset(&mut self) -> Result<()> {
        self.episode += 1;
        let internals = self.model.reset()?;
        self.next_internals = internals.clone();
        self.internals = Some(internals);
        for stack in self.preprocessing.values_mut() {
            stack.reset();
        }
        for exploration in self.exploration.values_mut() {
            exploration.reset();
        }
        log::debug!("episode {} started", self.episode);
        Ok(())
    }

    pub fn act(
        &mut self,
        state: OneOrNamed<Tensor>,
        deterministic: bool,
    ) -> Result<(OneOrNamed<Tensor>, OneOrNamed<ActionValue>)> {
        if self.internals.is_none() {
            return Err(PallasError::PreconditionViolation("act called before reset".to_string()));
        }
        self.timestep += 1;
        let internals = self.next_internals.clone();

        let mut states = self.states_to_named(state)?;
        for (name, state) in states.iter_mut() {
            let raw_shape = &self.raw_states[name].shape;
            if state.shape() != raw_shape.as_slice() {
                return Err(PallasError::shape_mismatch(
                    format!("{:?} for state '{}'", raw_shape, name),
                    describe_shape(state.shape()),
                ));
            }
            if let Some(stack) = self.preprocessing.get_mut(name) {
                *state = stack.process(state)?;
            }
        }

        let batch: Batch = states.iter().map(|(name, s)| (name.clone(), add_batch_axis(s))).collect();
        let batched_internals: Vec<Tensor> = internals.iter().map(add_batch_axis).collect();
        let (batched_actions, next_internals) = self.model.get_action(&batch, &batched_internals, deterministic)?;

        let mut actions = BTreeMap::new();
        for (name, spec) in &self.actions {
            let batched = batched_actions
                .get(name)
                .ok_or_else(|| PallasError::configuration(format!("model produced no action '{}'", name)))?;
            let mut action = remove_batch_axis(batched)?;
            if let Some(exploration) = self.exploration.get_mut(name) {
                let value = exploration.value(self.episode, self.timestep, &mut self.rng);
                match spec.kind {
                    ActionType::Float { .. } => action.mapv_inplace(|a| a + value),
                    ActionType::Int { num_actions } => {
                        if self.rng.gen::<f32>() < value {
                            let rng = &mut self.rng;
                            action.mapv_inplace(|_| rng.gen_range(0..num_actions) as f32);
                        }
                    }
                }
            }
            actions.insert(name.clone(), ActionValue::from_tensor(spec, action));
        }

        self.internals = Some(internals);
        self.next_internals = next_internals
            .iter()
            .map(remove_batch_axis)
            .collect::<Result<Vec<_>>>()?;

        let state = OneOrNamed::from_named(states, self.unique_state.then_some(UNIQUE_STATE))?;
        let action = OneOrNamed::from_named(actions, self.unique_action.then_some(UNIQUE_ACTION))?;
        Ok((state, action))
    }

    /// Normalise a caller state into named tensors.
    pub fn states_to_named(&self, state: OneOrNamed<Tensor>) -> Result<Batch> {
        normalize(state, self.unique_state, UNIQUE_STATE, self.states.keys(), "state")
    }

    /// Normalise a caller action into named float tensors.
    pub fn actions_to_named(&self, action: OneOrNamed<ActionValue>) -> Result<Batch> {
        let named = normalize(action, self.unique_action, UNIQUE_ACTION, self.actions.keys(), "action")?;
        Ok(named
            .into_iter()
            .map(|(name, value)| (name, value.to_tensor()))
            .collect())
    }
}
