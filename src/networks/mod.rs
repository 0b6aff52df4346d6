//! # Networks Module
//!
//! Compositions of layers into one differentiable transform.
//!
//! - [`LayerBasedNetwork`] - ordered layers sharing one scope, with aggregated
//!   parameters, regularization and internal-state declarations
//! - [`LayeredNetwork`] - a layer-based network built from layer specs
//! - [`CriticNetwork`] - the Q-value network of deterministic policy gradient models

mod critic;
mod layer_based;
mod layered;

use serde::{Deserialize, Serialize};

use crate::error::{PallasError, Result};
use crate::layers::{LayerOutput, LayerSpec};
use crate::optimizer::Gradients;
use crate::types::{Batch, Tensor};
use crate::variables::{VariableId, VariableStore};

pub use critic::{CriticNetwork, CriticNetworkSpec};
pub use layer_based::LayerBasedNetwork;
pub use layered::LayeredNetwork;

/// Trait defining the interface for networks applied to named inputs
pub trait Network: Send {
    /// Forward pass on a batch. Returns the output and outgoing internal states.
    fn apply(&mut self, store: &mut VariableStore, x: &Batch, internals: &[Tensor], update: bool) -> Result<LayerOutput>;

    /// Reverse pass through the most recent `apply`.
    fn backward(&mut self, store: &VariableStore, grad_output: &Tensor, gradients: &mut Gradients) -> Result<Tensor>;

    /// Per-instance shapes of the internal state slots.
    fn internal_inputs(&self) -> Vec<Vec<usize>>;

    /// Per-instance initial values of the internal state slots.
    fn internal_inits(&self) -> Vec<Tensor>;

    fn regularization_loss(&self, store: &VariableStore) -> Result<Option<f32>>;

    fn regularization_backward(&self, store: &VariableStore, gradients: &mut Gradients) -> Result<()>;

    fn get_variables(&self) -> Vec<VariableId>;
}

/// Network configuration: either a bare list of layer specs or a tagged spec.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NetworkSpec {
    Layers(Vec<LayerSpec>),
    Tagged(TaggedNetworkSpec),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaggedNetworkSpec {
    Layered { layers: Vec<LayerSpec> },
}

impl From<Vec<LayerSpec>> for NetworkSpec {
    fn from(layers: Vec<LayerSpec>) -> Self {
        NetworkSpec::Layers(layers)
    }
}

/// Build a network from its configuration under `scope`.
pub fn from_spec(spec: &NetworkSpec, store: &mut VariableStore, scope: &str) -> Result<Box<dyn Network>> {
    match spec {
        NetworkSpec::Layers(layers) | NetworkSpec::Tagged(TaggedNetworkSpec::Layered { layers }) => {
            Ok(Box::new(LayeredNetwork::from_spec(layers, scope, store)?))
        }
    }
}

/// The only entry of a one-entry mapping.
pub(crate) fn single_input<'a>(x: &'a Batch, what: &str) -> Result<(&'a str, &'a Tensor)> {
    let mut entries = x.iter();
    match (entries.next(), entries.next()) {
        (Some((name, tensor)), None) => Ok((name.as_str(), tensor)),
        _ => Err(PallasError::UnsupportedOperation(format!(
            "{} must have exactly one input, but {} given",
            what,
            x.len()
        ))),
    }
}
