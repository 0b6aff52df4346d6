use crate::error::Result;
use crate::optimizer::Gradients;
use crate::types::Tensor;
use crate::variables::{VariableId, VariableStore};

/// Result of applying a layer: the output plus the outgoing internal states,
/// which is empty for a stateless layer.
#[derive(Clone, Debug)]
pub struct LayerOutput {
    pub output: Tensor,
    pub internals: Vec<Tensor>,
}

impl LayerOutput {
    pub fn stateless(output: Tensor) -> Self {
        LayerOutput {
            output,
            internals: Vec::new(),
        }
    }
}

/// Trait defining the interface for network layers
///
/// Parameters are created inside the layer's template on the first `apply`
/// and reused afterwards. `apply` caches what the reverse pass needs, so
/// `backward` refers to the most recent `apply`.
pub trait Layer: Send {
    /// Short type tag, e.g. `"dense"`.
    fn layer_type(&self) -> &'static str;

    /// Perform forward propagation on a batch.
    fn apply(
        &mut self,
        store: &mut VariableStore,
        x: &Tensor,
        internals: &[Tensor],
        update: bool,
    ) -> Result<LayerOutput>;

    /// Propagate `grad_output` back through the last `apply`, accumulating
    /// parameter gradients. Returns the gradient with respect to the input.
    fn backward(&mut self, store: &VariableStore, grad_output: &Tensor, gradients: &mut Gradients) -> Result<Tensor>;

    /// Number of internal state slots.
    fn num_internals(&self) -> usize {
        0
    }

    /// Per-instance shape of each internal state slot.
    fn internal_inputs(&self) -> Vec<Vec<usize>> {
        Vec::new()
    }

    /// Per-instance initial value of each internal state slot.
    fn internal_inits(&self) -> Vec<Tensor> {
        Vec::new()
    }

    /// Regularization penalty, `None` when the layer has none.
    fn regularization_loss(&self, _store: &VariableStore) -> Result<Option<f32>> {
        Ok(None)
    }

    /// Accumulate the gradient of [`regularization_loss`](Layer::regularization_loss).
    fn regularization_backward(&self, _store: &VariableStore, _gradients: &mut Gradients) -> Result<()> {
        Ok(())
    }

    /// Parameters of this layer sorted by name.
    fn get_variables(&self) -> Vec<VariableId>;
}
