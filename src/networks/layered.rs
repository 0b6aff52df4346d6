use std::collections::HashMap;
use std::fs;

use super::layer_based::LayerBasedNetwork;
use super::{single_input, Network};
use crate::error::Result;
use crate::layers::{self, LayerOutput, LayerSpec};
use crate::optimizer::Gradients;
use crate::types::{Batch, Tensor};
use crate::variables::{VariableId, VariableStore};

/// Network consisting of a sequence of layers created from layer specs.
///
/// Layer scopes are `<scope>/<type><counter>`, counting per layer type.
pub struct LayeredNetwork {
    base: LayerBasedNetwork,
    specs: Vec<LayerSpec>,
}

impl LayeredNetwork {
    pub fn from_spec(specs: &[LayerSpec], scope: &str, store: &mut VariableStore) -> Result<Self> {
        let mut base = LayerBasedNetwork::new(store, scope);
        let network_scope = base.scope().to_string();
        let mut counters: HashMap<&'static str, usize> = HashMap::new();
        for spec in specs {
            let name = spec.type_name();
            let counter = counters.entry(name).or_insert(0);
            let layer_scope = format!("{}/{}{}", network_scope, name, counter);
            *counter += 1;
            base.add_layer(layers::from_spec(spec, store, &layer_scope)?);
        }
        log::debug!("built layered network {} with {} layers", network_scope, specs.len());
        Ok(LayeredNetwork {
            base,
            specs: specs.to_vec(),
        })
    }

    /// Build from a JSON file holding an array of layer specs.
    pub fn from_json(path: &str, scope: &str, store: &mut VariableStore) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let specs: Vec<LayerSpec> = serde_json::from_str(&contents)?;
        Self::from_spec(&specs, scope, store)
    }

    pub fn specs(&self) -> &[LayerSpec] {
        &self.specs
    }

    pub fn layers(&self) -> &LayerBasedNetwork {
        &self.base
    }

    /// Apply to a single tensor rather than a named mapping.
    pub fn apply_tensor(
        &mut self,
        store: &mut VariableStore,
        x: &Tensor,
        internals: &[Tensor],
        update: bool,
    ) -> Result<LayerOutput> {
        self.base.apply_layers(store, x, internals, update)
    }
}

impl Network for LayeredNetwork {
    fn apply(&mut self, store: &mut VariableStore, x: &Batch, internals: &[Tensor], update: bool) -> Result<LayerOutput> {
        let (_, x) = single_input(x, "layered network")?;
        self.base.apply_layers(store, x, internals, update)
    }

    fn backward(&mut self, store: &VariableStore, grad_output: &Tensor, gradients: &mut Gradients) -> Result<Tensor> {
        self.base.backward_layers(store, grad_output, gradients)
    }

    fn internal_inputs(&self) -> Vec<Vec<usize>> {
        self.base.internal_inputs()
    }

    fn internal_inits(&self) -> Vec<Tensor> {
        self.base.internal_inits()
    }

    fn regularization_loss(&self, store: &VariableStore) -> Result<Option<f32>> {
        self.base.regularization_loss(store)
    }

    fn regularization_backward(&self, store: &VariableStore, gradients: &mut Gradients) -> Result<()> {
        self.base.regularization_backward(store, gradients)
    }

    fn get_variables(&self) -> Vec<VariableId> {
        self.base.get_variables()
    }
}
