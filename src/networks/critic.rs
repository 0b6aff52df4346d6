use ndarray::{concatenate, s, Axis, Ix2};
use serde::{Deserialize, Serialize};

use super::layer_based::LayerBasedNetwork;
use super::single_input;
use crate::activations::Activation;
use crate::error::{PallasError, Result};
use crate::layers::{BiasSpec, Dense};
use crate::optimizer::Gradients;
use crate::types::{flatten_batch, Batch, Tensor};
use crate::variables::{VariableId, VariableStore};

fn default_size_t0() -> usize {
    400
}

fn default_size_t1() -> usize {
    300
}

/// Hidden sizes of the critic network.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CriticNetworkSpec {
    #[serde(default = "default_size_t0")]
    pub size_t0: usize,
    #[serde(default = "default_size_t1")]
    pub size_t1: usize,
}

impl Default for CriticNetworkSpec {
    fn default() -> Self {
        CriticNetworkSpec {
            size_t0: default_size_t0(),
            size_t1: default_size_t1(),
        }
    }
}

/// Q-value network of deterministic policy gradient models.
///
/// `dense(size_t0, relu)` embeds the single state, the single action is
/// flattened to `(batch, -1)` and concatenated to the embedding, followed by
/// `dense(size_t1, relu)` and `dense(1, tanh)`. The output has shape `(batch,)`.
pub struct CriticNetwork {
    base: LayerBasedNetwork,
    embedding_width: Option<usize>,
}

impl CriticNetwork {
    pub fn new(store: &mut VariableStore, scope: &str, spec: &CriticNetworkSpec) -> Self {
        let mut base = LayerBasedNetwork::new(store, scope);
        let network_scope = base.scope().to_string();
        let bias = BiasSpec::default();
        base.add_layer(Box::new(Dense::new(
            store,
            &format!("{}/t0", network_scope),
            spec.size_t0,
            &bias,
            Activation::Relu,
            0.0,
        )));
        base.add_layer(Box::new(Dense::new(
            store,
            &format!("{}/t1", network_scope),
            spec.size_t1,
            &bias,
            Activation::Relu,
            0.0,
        )));
        base.add_layer(Box::new(Dense::new(
            store,
            &format!("{}/t2", network_scope),
            1,
            &bias,
            Activation::Tanh,
            0.0,
        )));
        CriticNetwork {
            base,
            embedding_width: None,
        }
    }

    pub fn scope(&self) -> &str {
        self.base.scope()
    }

    /// Q-values of `actions` taken in `states`.
    pub fn apply(&mut self, store: &mut VariableStore, states: &Batch, actions: &Batch, update: bool) -> Result<Tensor> {
        let (_, state) = single_input(states, "critic network state")?;
        let (_, action) = single_input(actions, "critic network action")?;
        let batch_size = state.shape().first().copied().unwrap_or(0);
        if action.shape().first().copied().unwrap_or(0) != batch_size {
            return Err(PallasError::shape_mismatch(
                format!("{} actions", batch_size),
                format!("{:?}", action.shape()),
            ));
        }
        let action = flatten_batch(action)?;

        let embedding = self.base.layer_mut(0)?.apply(store, state, &[], update)?.output;
        let embedding = embedding.into_dimensionality::<Ix2>()?;
        self.embedding_width = Some(embedding.ncols());

        let joint = concatenate(Axis(1), &[embedding.view(), action.view()])?.into_dyn();
        let hidden = self.base.layer_mut(1)?.apply(store, &joint, &[], update)?.output;
        let q = self.base.layer_mut(2)?.apply(store, &hidden, &[], update)?.output;
        Ok(q.into_shape(batch_size)?.into_dyn())
    }

    /// Reverse pass from `grad_q` of shape `(batch,)`. Returns the gradient
    /// with respect to the state input.
    pub fn backward(&mut self, store: &VariableStore, grad_q: &Tensor, gradients: &mut Gradients) -> Result<Tensor> {
        let width = self
            .embedding_width
            .ok_or_else(|| PallasError::PreconditionViolation("critic backward before apply".to_string()))?;
        let batch_size = grad_q.len();
        let grad = grad_q.as_standard_layout().to_owned().into_shape((batch_size, 1))?.into_dyn();

        let grad = self.base.layer_mut(2)?.backward(store, &grad, gradients)?;
        let grad_joint = self.base.layer_mut(1)?.backward(store, &grad, gradients)?;
        let grad_joint = grad_joint.into_dimensionality::<Ix2>()?;
        let grad_embedding = grad_joint.slice(s![.., 0..width]).to_owned().into_dyn();
        self.base.layer_mut(0)?.backward(store, &grad_embedding, gradients)
    }

    pub fn regularization_loss(&self, store: &VariableStore) -> Result<Option<f32>> {
        self.base.regularization_loss(store)
    }

    pub fn get_variables(&self) -> Vec<VariableId> {
        self.base.get_variables()
    }
}
