use super::initialization::Initializer;
use super::linear::{BiasSpec, Linear};
use super::nonlinearity::Nonlinearity;
use super::traits::{Layer, LayerOutput};
use crate::activations::Activation;
use crate::error::Result;
use crate::optimizer::Gradients;
use crate::types::Tensor;
use crate::variables::{VariableId, VariableStore};

/// Dense layer: a linear fully connected layer followed by a nonlinearity.
///
/// Regularization comes from the inner linear layer.
pub struct Dense {
    linear: Linear,
    nonlinearity: Nonlinearity,
}

impl Dense {
    pub fn new(
        store: &mut VariableStore,
        scope: &str,
        size: usize,
        bias: &BiasSpec,
        activation: Activation,
        l2_regularization: f32,
    ) -> Self {
        Self::with_weights(store, scope, size, None, bias, activation, l2_regularization)
    }

    pub fn with_weights(
        store: &mut VariableStore,
        scope: &str,
        size: usize,
        weights: Option<Initializer>,
        bias: &BiasSpec,
        activation: Activation,
        l2_regularization: f32,
    ) -> Self {
        let linear = Linear::new(
            store,
            &format!("{}/linear", scope),
            size,
            weights,
            bias,
            l2_regularization,
        );
        let nonlinearity = Nonlinearity::new(store, &format!("{}/nonlinearity", scope), activation);
        Dense { linear, nonlinearity }
    }

    pub fn size(&self) -> usize {
        self.linear.size
    }

    pub fn activation(&self) -> Activation {
        self.nonlinearity.activation
    }
}

impl Layer for Dense {
    fn layer_type(&self) -> &'static str {
        "dense"
    }

    fn apply(
        &mut self,
        store: &mut VariableStore,
        x: &Tensor,
        internals: &[Tensor],
        update: bool,
    ) -> Result<LayerOutput> {
        let hidden = self.linear.apply(store, x, internals, update)?;
        self.nonlinearity.apply(store, &hidden.output, &[], update)
    }

    fn backward(&mut self, store: &VariableStore, grad_output: &Tensor, gradients: &mut Gradients) -> Result<Tensor> {
        let grad = self.nonlinearity.backward(store, grad_output, gradients)?;
        self.linear.backward(store, &grad, gradients)
    }

    fn regularization_loss(&self, store: &VariableStore) -> Result<Option<f32>> {
        self.linear.regularization_loss(store)
    }

    fn regularization_backward(&self, store: &VariableStore, gradients: &mut Gradients) -> Result<()> {
        self.linear.regularization_backward(store, gradients)
    }

    fn get_variables(&self) -> Vec<VariableId> {
        let mut variables = self.linear.get_variables();
        variables.extend(self.nonlinearity.get_variables());
        variables
    }
}
