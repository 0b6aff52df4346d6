use ndarray::{Array2, Axis, Ix2};
use serde::{Deserialize, Serialize};

use super::initialization::Initializer;
use super::traits::{Layer, LayerOutput};
use crate::error::{PallasError, Result};
use crate::optimizer::Gradients;
use crate::types::Tensor;
use crate::variables::{Template, VariableId, VariableStore};

/// Bias configuration of a linear layer: a flag, a constant or an initializer.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BiasSpec {
    Enabled(bool),
    Value(f32),
    Initializer(Initializer),
}

impl Default for BiasSpec {
    fn default() -> Self {
        BiasSpec::Enabled(true)
    }
}

impl BiasSpec {
    fn resolve(&self) -> Option<Initializer> {
        match self {
            BiasSpec::Enabled(true) => Some(Initializer::Zeros),
            BiasSpec::Enabled(false) => None,
            BiasSpec::Value(value) => Some(Initializer::constant(*value)),
            BiasSpec::Initializer(init) => Some(init.clone()),
        }
    }
}

/// Linear fully connected layer, `x W + b`.
pub struct Linear {
    pub size: usize,
    pub l2_regularization: f32,
    weights_init: Option<Initializer>,
    bias_init: Option<Initializer>,
    template: Template,
    weights: Option<VariableId>,
    bias: Option<VariableId>,
    input: Option<Array2<f32>>,
}

impl Linear {
    pub fn new(
        store: &mut VariableStore,
        scope: &str,
        size: usize,
        weights: Option<Initializer>,
        bias: &BiasSpec,
        l2_regularization: f32,
    ) -> Self {
        Linear {
            size,
            l2_regularization,
            weights_init: weights,
            bias_init: bias.resolve(),
            template: Template::new(store, scope),
            weights: None,
            bias: None,
            input: None,
        }
    }

    /// Weight and bias ids, available after the first `apply`.
    pub fn parameters(&self) -> (Option<VariableId>, Option<VariableId>) {
        (self.weights, self.bias)
    }
}

impl Layer for Linear {
    fn layer_type(&self) -> &'static str {
        "linear"
    }

    fn apply(
        &mut self,
        store: &mut VariableStore,
        x: &Tensor,
        _internals: &[Tensor],
        _update: bool,
    ) -> Result<LayerOutput> {
        if x.ndim() != 2 {
            return Err(PallasError::invalid_rank("linear", 2, x.ndim()));
        }
        let x = x.view().into_dimensionality::<Ix2>()?.to_owned();
        let fan_in = x.ncols();
        let size = self.size;
        let weights_init = self
            .weights_init
            .clone()
            .unwrap_or_else(|| Initializer::for_linear(fan_in, size));
        let bias_init = self.bias_init.clone();

        let (weights, bias) = self.template.capture(store, |vars| {
            let weights = vars.get_variable("W", &[fan_in, size], &weights_init, true)?;
            let bias = match &bias_init {
                Some(init) => Some(vars.get_variable("b", &[size], init, true)?),
                None => None,
            };
            Ok((weights, bias))
        })?;
        self.weights = Some(weights);
        self.bias = bias;

        let w = store.value(weights)?.view().into_dimensionality::<Ix2>()?;
        let mut output = x.dot(&w);
        if let Some(bias) = bias {
            output += store.value(bias)?;
        }
        self.input = Some(x);
        Ok(LayerOutput::stateless(output.into_dyn()))
    }

    fn backward(&mut self, store: &VariableStore, grad_output: &Tensor, gradients: &mut Gradients) -> Result<Tensor> {
        let (input, weights) = match (&self.input, self.weights) {
            (Some(input), Some(weights)) => (input, weights),
            _ => return Err(PallasError::PreconditionViolation("linear backward before apply".to_string())),
        };
        let grad = grad_output.view().into_dimensionality::<Ix2>()?;
        let w = store.value(weights)?.view().into_dimensionality::<Ix2>()?;

        gradients.accumulate(weights, input.t().dot(&grad).into_dyn())?;
        if let Some(bias) = self.bias {
            gradients.accumulate(bias, grad.sum_axis(Axis(0)).into_dyn())?;
        }
        Ok(grad.dot(&w.t()).into_dyn())
    }

    fn regularization_loss(&self, store: &VariableStore) -> Result<Option<f32>> {
        if self.l2_regularization <= 0.0 {
            return Ok(None);
        }
        let mut total = 0.0;
        for id in self.weights.iter().chain(self.bias.iter()) {
            total += store.value(*id)?.mapv(|v| v * v).sum() / 2.0;
        }
        Ok(Some(self.l2_regularization * total))
    }

    fn regularization_backward(&self, store: &VariableStore, gradients: &mut Gradients) -> Result<()> {
        if self.l2_regularization <= 0.0 {
            return Ok(());
        }
        for id in self.weights.iter().chain(self.bias.iter()) {
            gradients.accumulate(*id, store.value(*id)? * self.l2_regularization)?;
        }
        Ok(())
    }

    fn get_variables(&self) -> Vec<VariableId> {
        self.template.get_variables()
    }
}
