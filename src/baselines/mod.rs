//! # Baselines Module
//!
//! State-value estimators used to turn rewards into advantages.
//!
//! - `mlp` - dense ReLU hidden layers of the given sizes and a linear output
//! - `custom` - an arbitrary layer stack ending in a single output unit

use serde::{Deserialize, Serialize};

use crate::activations::Activation;
use crate::error::{PallasError, Result};
use crate::layers::{BiasSpec, LayerSpec};
use crate::loss::{L2Loss, Loss};
use crate::networks::{LayeredNetwork, Network};
use crate::optimizer::Gradients;
use crate::types::{describe_shape, Batch, Tensor};
use crate::variables::{VariableId, VariableStore};

/// Trait defining the interface for value-function baselines
pub trait Baseline: Send {
    /// Predicted state values, shape `(batch,)`.
    fn predict(&mut self, store: &mut VariableStore, states: &Batch) -> Result<Tensor>;

    /// L2 loss between predictions and `reward`, with its parameter gradients.
    fn loss(&mut self, store: &mut VariableStore, states: &Batch, reward: &Tensor) -> Result<(f32, Gradients)>;

    fn get_variables(&self) -> Vec<VariableId>;
}

/// Baseline configuration, tagged by `type`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BaselineSpec {
    Mlp { sizes: Vec<usize> },
    Custom { layers: Vec<LayerSpec> },
}

/// Baseline computed by a layered network over the single state input.
pub struct NetworkBaseline {
    network: LayeredNetwork,
}

impl NetworkBaseline {
    pub fn new(store: &mut VariableStore, scope: &str, layers: &[LayerSpec]) -> Result<Self> {
        if layers.is_empty() {
            return Err(PallasError::configuration("baseline needs at least one layer"));
        }
        Ok(NetworkBaseline {
            network: LayeredNetwork::from_spec(layers, scope, store)?,
        })
    }

    pub fn mlp(store: &mut VariableStore, scope: &str, sizes: &[usize]) -> Result<Self> {
        let mut layers: Vec<LayerSpec> = sizes
            .iter()
            .map(|&size| LayerSpec::dense(size, Activation::Relu))
            .collect();
        layers.push(LayerSpec::Linear {
            size: 1,
            weights: None,
            bias: BiasSpec::default(),
            l2_regularization: 0.0,
        });
        Self::new(store, scope, &layers)
    }

    fn squeeze(prediction: Tensor) -> Result<Tensor> {
        let shape = prediction.shape().to_vec();
        match shape.as_slice() {
            [batch, 1] => Ok(prediction.into_shape(*batch)?.into_dyn()),
            _ => Err(PallasError::shape_mismatch(
                "(batch, 1) baseline output".to_string(),
                describe_shape(&shape),
            )),
        }
    }
}

impl Baseline for NetworkBaseline {
    fn predict(&mut self, store: &mut VariableStore, states: &Batch) -> Result<Tensor> {
        let output = self.network.apply(store, states, &[], false)?.output;
        Self::squeeze(output)
    }

    fn loss(&mut self, store: &mut VariableStore, states: &Batch, reward: &Tensor) -> Result<(f32, Gradients)> {
        let output = self.network.apply(store, states, &[], true)?.output;
        let batch_size = output.shape()[0];
        let prediction = Self::squeeze(output)?;

        let loss = L2Loss.compute(&prediction, reward)?;
        let grad = L2Loss.gradient(&prediction, reward)?.into_shape((batch_size, 1))?.into_dyn();

        let mut gradients = Gradients::new();
        self.network.backward(store, &grad, &mut gradients)?;
        Ok((loss, gradients))
    }

    fn get_variables(&self) -> Vec<VariableId> {
        self.network.get_variables()
    }
}

/// Build a baseline from its configuration under `scope`.
pub fn from_spec(spec: &BaselineSpec, store: &mut VariableStore, scope: &str) -> Result<Box<dyn Baseline>> {
    let baseline = match spec {
        BaselineSpec::Mlp { sizes } => NetworkBaseline::mlp(store, scope, sizes)?,
        BaselineSpec::Custom { layers } => NetworkBaseline::new(store, scope, layers)?,
    };
    Ok(Box::new(baseline))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    fn states(batch_size: usize) -> Batch {
        let mut states = Batch::new();
        states.insert("state".to_string(), Tensor::ones(IxDyn(&[batch_size, 3])));
        states
    }

    #[test]
    fn test_mlp_predicts_one_value_per_instance() {
        let spec: BaselineSpec = serde_json::from_str(r#"{"type": "mlp", "sizes": [8, 8]}"#).unwrap();
        let mut store = VariableStore::with_seed(0);
        let mut baseline = from_spec(&spec, &mut store, "baseline").unwrap();
        let prediction = baseline.predict(&mut store, &states(4)).unwrap();
        assert_eq!(prediction.shape(), &[4]);
        assert_eq!(baseline.get_variables().len(), 6);
    }

    #[test]
    fn test_loss_gradients_cover_all_parameters() {
        let mut store = VariableStore::with_seed(0);
        let mut baseline = NetworkBaseline::mlp(&mut store, "baseline", &[4]).unwrap();
        let reward = Tensor::ones(IxDyn(&[2]));
        let (loss, gradients) = baseline.loss(&mut store, &states(2), &reward).unwrap();
        assert!(loss >= 0.0);
        for id in baseline.get_variables() {
            assert!(gradients.contains(id));
        }
    }

    #[test]
    fn test_custom_baseline_must_end_in_single_unit() {
        let spec = BaselineSpec::Custom {
            layers: vec![LayerSpec::dense(3, Activation::Tanh)],
        };
        let mut store = VariableStore::new();
        let mut baseline = from_spec(&spec, &mut store, "baseline").unwrap();
        assert!(baseline.predict(&mut store, &states(2)).is_err());
    }
}
