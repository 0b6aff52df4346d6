use ndarray::IxDyn;

use super::traits::{Layer, LayerOutput};
use crate::error::{PallasError, Result};
use crate::optimizer::Gradients;
use crate::types::{flatten_batch, Tensor};
use crate::variables::{Template, VariableId, VariableStore};

/// Reshape a batch to `(batch, prod(rest))`.
pub struct Flatten {
    template: Template,
    input_shape: Option<Vec<usize>>,
}

impl Flatten {
    pub fn new(store: &mut VariableStore, scope: &str) -> Self {
        Flatten {
            template: Template::new(store, scope),
            input_shape: None,
        }
    }
}

impl Layer for Flatten {
    fn layer_type(&self) -> &'static str {
        "flatten"
    }

    fn apply(
        &mut self,
        _store: &mut VariableStore,
        x: &Tensor,
        _internals: &[Tensor],
        _update: bool,
    ) -> Result<LayerOutput> {
        if x.ndim() < 2 {
            return Err(PallasError::invalid_rank("flatten", 2, x.ndim()));
        }
        self.input_shape = Some(x.shape().to_vec());
        Ok(LayerOutput::stateless(flatten_batch(x)?.into_dyn()))
    }

    fn backward(&mut self, _store: &VariableStore, grad_output: &Tensor, _gradients: &mut Gradients) -> Result<Tensor> {
        let shape = self
            .input_shape
            .as_ref()
            .ok_or_else(|| PallasError::PreconditionViolation("flatten backward before apply".to_string()))?;
        Ok(grad_output
            .as_standard_layout()
            .to_owned()
            .into_shape(IxDyn(shape))?)
    }

    fn get_variables(&self) -> Vec<VariableId> {
        self.template.get_variables()
    }
}
