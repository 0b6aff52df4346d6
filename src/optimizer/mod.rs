//! # Optimizer Module
//!
//! Optimizers turn accumulated [`Gradients`] into an [`UpdateOp`]. Slot state
//! (moments, step counters) lives in each optimizer's own template and is
//! advanced through the returned update, so nothing changes until the update
//! is applied.
//!
//! [`Synchronization`] copies or blends one parameter set into another on a
//! fixed schedule.

pub mod synchronization;
pub mod update;

use ndarray::arr0;
use serde::{Deserialize, Serialize};

use crate::error::{PallasError, Result};
use crate::layers::Initializer;
use crate::variables::{Template, VariableId, VariableStore};

pub use synchronization::Synchronization;
pub use update::{Gradients, UpdateOp};

pub trait Optimizer {
    /// Build the update applying `gradients` to `variables`. Variables with no
    /// gradient are left untouched.
    fn minimize(
        &mut self,
        time: usize,
        store: &mut VariableStore,
        variables: &[VariableId],
        gradients: &Gradients,
    ) -> Result<UpdateOp>;

    /// Create the slot variables for `variables` ahead of the first update.
    fn initialize(&mut self, _store: &mut VariableStore, _variables: &[VariableId]) -> Result<()> {
        Ok(())
    }

    /// Slot variables created so far.
    fn get_variables(&self) -> Vec<VariableId>;
}

fn default_learning_rate() -> f32 {
    1e-3
}

fn default_beta1() -> f32 {
    0.9
}

fn default_beta2() -> f32 {
    0.999
}

fn default_epsilon() -> f32 {
    1e-8
}

fn default_decay() -> f32 {
    0.9
}

/// Optimizer configuration, tagged by `type`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OptimizerSpec {
    Sgd {
        #[serde(default = "default_learning_rate")]
        learning_rate: f32,
    },
    Adam {
        #[serde(default = "default_learning_rate")]
        learning_rate: f32,
        #[serde(default = "default_beta1")]
        beta1: f32,
        #[serde(default = "default_beta2")]
        beta2: f32,
        #[serde(default = "default_epsilon")]
        epsilon: f32,
    },
    #[serde(rename = "rmsprop")]
    RmsProp {
        #[serde(default = "default_learning_rate")]
        learning_rate: f32,
        #[serde(default = "default_decay")]
        decay: f32,
        #[serde(default = "default_epsilon")]
        epsilon: f32,
    },
}

impl Default for OptimizerSpec {
    fn default() -> Self {
        OptimizerSpec::Adam {
            learning_rate: default_learning_rate(),
            beta1: default_beta1(),
            beta2: default_beta2(),
            epsilon: default_epsilon(),
        }
    }
}

pub enum OptimizerWrapper {
    Sgd(Sgd),
    Adam(Adam),
    RmsProp(RmsProp),
}

impl Optimizer for OptimizerWrapper {
    fn minimize(
        &mut self,
        time: usize,
        store: &mut VariableStore,
        variables: &[VariableId],
        gradients: &Gradients,
    ) -> Result<UpdateOp> {
        match self {
            OptimizerWrapper::Sgd(optimizer) => optimizer.minimize(time, store, variables, gradients),
            OptimizerWrapper::Adam(optimizer) => optimizer.minimize(time, store, variables, gradients),
            OptimizerWrapper::RmsProp(optimizer) => optimizer.minimize(time, store, variables, gradients),
        }
    }

    fn initialize(&mut self, store: &mut VariableStore, variables: &[VariableId]) -> Result<()> {
        match self {
            OptimizerWrapper::Sgd(optimizer) => optimizer.initialize(store, variables),
            OptimizerWrapper::Adam(optimizer) => optimizer.initialize(store, variables),
            OptimizerWrapper::RmsProp(optimizer) => optimizer.initialize(store, variables),
        }
    }

    fn get_variables(&self) -> Vec<VariableId> {
        match self {
            OptimizerWrapper::Sgd(optimizer) => optimizer.get_variables(),
            OptimizerWrapper::Adam(optimizer) => optimizer.get_variables(),
            OptimizerWrapper::RmsProp(optimizer) => optimizer.get_variables(),
        }
    }
}

/// Build an optimizer from its configuration under `scope`.
pub fn from_spec(spec: &OptimizerSpec, store: &mut VariableStore, scope: &str) -> Result<OptimizerWrapper> {
    let learning_rate = match spec {
        OptimizerSpec::Sgd { learning_rate }
        | OptimizerSpec::Adam { learning_rate, .. }
        | OptimizerSpec::RmsProp { learning_rate, .. } => *learning_rate,
    };
    if !(learning_rate > 0.0) {
        return Err(PallasError::configuration(format!(
            "learning_rate must be positive, got {}",
            learning_rate
        )));
    }
    Ok(match spec {
        OptimizerSpec::Sgd { learning_rate } => OptimizerWrapper::Sgd(Sgd::new(store, scope, *learning_rate)),
        OptimizerSpec::Adam {
            learning_rate,
            beta1,
            beta2,
            epsilon,
        } => OptimizerWrapper::Adam(Adam::new(store, scope, *learning_rate, *beta1, *beta2, *epsilon)),
        OptimizerSpec::RmsProp {
            learning_rate,
            decay,
            epsilon,
        } => OptimizerWrapper::RmsProp(RmsProp::new(store, scope, *learning_rate, *decay, *epsilon)),
    })
}

/// Name of a slot variable for `variable` within an optimizer template.
fn slot_name(store: &VariableStore, variable: VariableId, slot: &str) -> Result<String> {
    Ok(format!("{}/{}", store.name(variable)?, slot))
}

pub struct Sgd {
    pub learning_rate: f32,
    template: Template,
}

impl Sgd {
    pub fn new(store: &mut VariableStore, scope: &str, learning_rate: f32) -> Self {
        Sgd {
            learning_rate,
            template: Template::new(store, scope),
        }
    }
}

impl Optimizer for Sgd {
    fn minimize(
        &mut self,
        _time: usize,
        store: &mut VariableStore,
        variables: &[VariableId],
        gradients: &Gradients,
    ) -> Result<UpdateOp> {
        let mut op = UpdateOp::no_op();
        for &id in variables {
            if let Some(grad) = gradients.get(id) {
                op.assign(id, store.value(id)? - &(grad * self.learning_rate));
            }
        }
        Ok(op)
    }

    fn get_variables(&self) -> Vec<VariableId> {
        self.template.get_variables()
    }
}

pub struct Adam {
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub epsilon: f32,
    template: Template,
}

impl Adam {
    pub fn new(store: &mut VariableStore, scope: &str, learning_rate: f32, beta1: f32, beta2: f32, epsilon: f32) -> Self {
        Adam {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            template: Template::new(store, scope),
        }
    }

    fn step(&mut self, store: &mut VariableStore) -> Result<VariableId> {
        self.template.capture(store, |vars| {
            vars.get_variable("step", &[], &Initializer::Zeros, false)
        })
    }

    /// First and second moment slots of `variable`.
    fn moments(&mut self, store: &mut VariableStore, variable: VariableId) -> Result<(VariableId, VariableId)> {
        let shape = store.value(variable)?.shape().to_vec();
        let m_name = slot_name(store, variable, "m")?;
        let v_name = slot_name(store, variable, "v")?;
        self.template.capture(store, |vars| {
            let m = vars.get_variable(&m_name, &shape, &Initializer::Zeros, false)?;
            let v = vars.get_variable(&v_name, &shape, &Initializer::Zeros, false)?;
            Ok((m, v))
        })
    }
}

impl Optimizer for Adam {
    fn minimize(
        &mut self,
        _time: usize,
        store: &mut VariableStore,
        variables: &[VariableId],
        gradients: &Gradients,
    ) -> Result<UpdateOp> {
        let mut op = UpdateOp::no_op();
        let step = self.step(store)?;
        let t = store.value(step)?.iter().next().copied().unwrap_or(0.0) + 1.0;
        let bias1 = 1.0 - self.beta1.powf(t);
        let bias2 = 1.0 - self.beta2.powf(t);

        for &id in variables {
            let grad = match gradients.get(id) {
                Some(grad) => grad,
                None => continue,
            };
            let (m_id, v_id) = self.moments(store, id)?;

            let m = store.value(m_id)? * self.beta1 + &(grad * (1.0 - self.beta1));
            let v = store.value(v_id)? * self.beta2 + &(grad.mapv(|g| g * g) * (1.0 - self.beta2));
            let m_hat = &m / bias1;
            let v_hat = &v / bias2;
            let epsilon = self.epsilon;
            let step_size = m_hat / &v_hat.mapv(|x| x.sqrt() + epsilon) * self.learning_rate;

            op.assign(id, store.value(id)? - &step_size);
            op.assign(m_id, m);
            op.assign(v_id, v);
        }
        if !op.is_no_op() {
            op.assign(step, arr0(t).into_dyn());
        }
        Ok(op)
    }

    fn initialize(&mut self, store: &mut VariableStore, variables: &[VariableId]) -> Result<()> {
        self.step(store)?;
        for &id in variables {
            self.moments(store, id)?;
        }
        Ok(())
    }

    fn get_variables(&self) -> Vec<VariableId> {
        self.template.get_variables()
    }
}

pub struct RmsProp {
    pub learning_rate: f32,
    pub decay: f32,
    pub epsilon: f32,
    template: Template,
}

impl RmsProp {
    pub fn new(store: &mut VariableStore, scope: &str, learning_rate: f32, decay: f32, epsilon: f32) -> Self {
        RmsProp {
            learning_rate,
            decay,
            epsilon,
            template: Template::new(store, scope),
        }
    }

    fn mean_square(&mut self, store: &mut VariableStore, variable: VariableId) -> Result<VariableId> {
        let shape = store.value(variable)?.shape().to_vec();
        let name = slot_name(store, variable, "mean-square")?;
        self.template.capture(store, |vars| {
            vars.get_variable(&name, &shape, &Initializer::Zeros, false)
        })
    }
}

impl Optimizer for RmsProp {
    fn minimize(
        &mut self,
        _time: usize,
        store: &mut VariableStore,
        variables: &[VariableId],
        gradients: &Gradients,
    ) -> Result<UpdateOp> {
        let mut op = UpdateOp::no_op();
        for &id in variables {
            let grad = match gradients.get(id) {
                Some(grad) => grad,
                None => continue,
            };
            let slot = self.mean_square(store, id)?;

            let mean_square = store.value(slot)? * self.decay + &(grad.mapv(|g| g * g) * (1.0 - self.decay));
            let epsilon = self.epsilon;
            let step_size = grad / &mean_square.mapv(|x| x.sqrt() + epsilon) * self.learning_rate;

            op.assign(id, store.value(id)? - &step_size);
            op.assign(slot, mean_square);
        }
        Ok(op)
    }

    fn initialize(&mut self, store: &mut VariableStore, variables: &[VariableId]) -> Result<()> {
        for &id in variables {
            self.mean_square(store, id)?;
        }
        Ok(())
    }

    fn get_variables(&self) -> Vec<VariableId> {
        self.template.get_variables()
    }
}
