use crate::error::{PallasError, Result};
use crate::layers::{Layer, LayerOutput};
use crate::optimizer::Gradients;
use crate::types::{describe_shape, Tensor};
use crate::variables::{Template, VariableId, VariableStore};

/// An ordered sequence of layers sharing one scope.
///
/// Parameters, regularization and internal-state declarations are aggregated
/// over the layers in order. Internal states are sliced per layer by arity on
/// the way in and concatenated again on the way out.
pub struct LayerBasedNetwork {
    template: Template,
    layers: Vec<Box<dyn Layer>>,
}

impl LayerBasedNetwork {
    pub fn new(store: &mut VariableStore, scope: &str) -> Self {
        LayerBasedNetwork {
            template: Template::new(store, scope),
            layers: Vec::new(),
        }
    }

    pub fn scope(&self) -> &str {
        self.template.scope()
    }

    pub fn add_layer(&mut self, layer: Box<dyn Layer>) {
        self.layers.push(layer);
    }

    pub fn layers(&self) -> &[Box<dyn Layer>] {
        &self.layers
    }

    pub(crate) fn layer_mut(&mut self, index: usize) -> Result<&mut Box<dyn Layer>> {
        let count = self.layers.len();
        self.layers
            .get_mut(index)
            .ok_or_else(|| PallasError::PreconditionViolation(format!("layer {} of {}", index, count)))
    }

    /// Run every layer in order, threading internal states.
    pub fn apply_layers(
        &mut self,
        store: &mut VariableStore,
        x: &Tensor,
        internals: &[Tensor],
        update: bool,
    ) -> Result<LayerOutput> {
        let expected = self.num_internals();
        if internals.len() != expected {
            return Err(PallasError::shape_mismatch(
                format!("{} internal states", expected),
                format!("{} internal states", internals.len()),
            ));
        }

        let mut x = x.clone();
        let mut internal_outputs = Vec::with_capacity(expected);
        let mut index = 0;
        for layer in self.layers.iter_mut() {
            let arity = layer.num_internals();
            let layer_internals = &internals[index..index + arity];
            index += arity;

            let out = layer.apply(store, &x, layer_internals, update)?;
            if out.internals.len() != arity {
                return Err(PallasError::shape_mismatch(
                    format!("{} internal outputs from {}", arity, layer.layer_type()),
                    out.internals.len().to_string(),
                ));
            }
            internal_outputs.extend(out.internals);
            x = out.output;
        }
        Ok(LayerOutput {
            output: x,
            internals: internal_outputs,
        })
    }

    /// Reverse pass through every layer, last to first.
    pub fn backward_layers(
        &mut self,
        store: &VariableStore,
        grad_output: &Tensor,
        gradients: &mut Gradients,
    ) -> Result<Tensor> {
        let mut grad = grad_output.clone();
        for layer in self.layers.iter_mut().rev() {
            grad = layer.backward(store, &grad, gradients)?;
        }
        Ok(grad)
    }

    pub fn num_internals(&self) -> usize {
        self.layers.iter().map(|layer| layer.num_internals()).sum()
    }

    pub fn internal_inputs(&self) -> Vec<Vec<usize>> {
        self.layers.iter().flat_map(|layer| layer.internal_inputs()).collect()
    }

    pub fn internal_inits(&self) -> Vec<Tensor> {
        self.layers.iter().flat_map(|layer| layer.internal_inits()).collect()
    }

    /// Sum of the layers' penalties, `None` if no layer has one.
    pub fn regularization_loss(&self, store: &VariableStore) -> Result<Option<f32>> {
        let mut total: Option<f32> = None;
        for layer in &self.layers {
            if let Some(loss) = layer.regularization_loss(store)? {
                total = Some(total.unwrap_or(0.0) + loss);
            }
        }
        Ok(total)
    }

    pub fn regularization_backward(&self, store: &VariableStore, gradients: &mut Gradients) -> Result<()> {
        for layer in &self.layers {
            layer.regularization_backward(store, gradients)?;
        }
        Ok(())
    }

    /// Own parameters followed by each layer's, in layer order.
    pub fn get_variables(&self) -> Vec<VariableId> {
        let mut variables = self.template.get_variables();
        for layer in &self.layers {
            variables.extend(layer.get_variables());
        }
        variables
    }

    /// Check batched internal states against the declared per-instance shapes.
    pub fn check_internals(&self, internals: &[Tensor]) -> Result<()> {
        let declared = self.internal_inputs();
        if declared.len() != internals.len() {
            return Err(PallasError::shape_mismatch(
                format!("{} internal states", declared.len()),
                format!("{} internal states", internals.len()),
            ));
        }
        for (shape, internal) in declared.iter().zip(internals) {
            if internal.ndim() == 0 || &internal.shape()[1..] != shape.as_slice() {
                return Err(PallasError::shape_mismatch(
                    format!("(batch, {:?})", shape),
                    describe_shape(internal.shape()),
                ));
            }
        }
        Ok(())
    }
}
