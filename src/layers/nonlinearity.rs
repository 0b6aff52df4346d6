use super::traits::{Layer, LayerOutput};
use crate::activations::Activation;
use crate::error::{PallasError, Result};
use crate::optimizer::Gradients;
use crate::types::Tensor;
use crate::variables::{Template, VariableId, VariableStore};

/// Elementwise nonlinearity layer. Accepts input of any rank.
pub struct Nonlinearity {
    pub activation: Activation,
    template: Template,
    cache: Option<(Tensor, Tensor)>,
}

impl Nonlinearity {
    pub fn new(store: &mut VariableStore, scope: &str, activation: Activation) -> Self {
        Nonlinearity {
            activation,
            template: Template::new(store, scope),
            cache: None,
        }
    }
}

impl Layer for Nonlinearity {
    fn layer_type(&self) -> &'static str {
        "nonlinearity"
    }

    fn apply(
        &mut self,
        _store: &mut VariableStore,
        x: &Tensor,
        _internals: &[Tensor],
        _update: bool,
    ) -> Result<LayerOutput> {
        let output = self.activation.apply(x);
        self.cache = Some((x.clone(), output.clone()));
        Ok(LayerOutput::stateless(output))
    }

    fn backward(&mut self, _store: &VariableStore, grad_output: &Tensor, _gradients: &mut Gradients) -> Result<Tensor> {
        let (input, output) = self
            .cache
            .as_ref()
            .ok_or_else(|| PallasError::PreconditionViolation("nonlinearity backward before apply".to_string()))?;
        Ok(self.activation.backward(input, output, grad_output))
    }

    fn get_variables(&self) -> Vec<VariableId> {
        self.template.get_variables()
    }
}
