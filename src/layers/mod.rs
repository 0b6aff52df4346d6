//! # Layers Module
//!
//! Single differentiable transforms composed by networks. Every layer owns a
//! [`Template`](crate::variables::Template), creates its parameters on the
//! first `apply` and returns a uniform [`LayerOutput`].
//!
//! Layers are usually built from a [`LayerSpec`]:
//!
//! ```rust
//! use pallas::layers::{self, LayerSpec};
//! use pallas::variables::VariableStore;
//!
//! let spec: LayerSpec = serde_json::from_str(r#"{"type": "dense", "size": 16}"#).unwrap();
//! let mut store = VariableStore::new();
//! let layer = layers::from_spec(&spec, &mut store, "dense0").unwrap();
//! assert_eq!(layer.layer_type(), "dense");
//! ```

pub mod conv;
pub mod dense;
pub mod flatten;
pub mod initialization;
pub mod linear;
pub mod lstm;
pub mod nonlinearity;
pub mod traits;

use serde::{Deserialize, Serialize};

use crate::activations::Activation;
use crate::error::Result;
use crate::variables::VariableStore;

pub use conv::{Conv2d, Padding};
pub use dense::Dense;
pub use flatten::Flatten;
pub use initialization::Initializer;
pub use linear::{BiasSpec, Linear};
pub use lstm::Lstm;
pub use nonlinearity::Nonlinearity;
pub use traits::{Layer, LayerOutput};

fn default_window() -> usize {
    3
}

fn default_stride() -> usize {
    1
}

/// Layer configuration, tagged by `type`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LayerSpec {
    Flatten,
    Nonlinearity {
        #[serde(default)]
        name: Activation,
    },
    Linear {
        size: usize,
        #[serde(default)]
        weights: Option<Initializer>,
        #[serde(default)]
        bias: BiasSpec,
        #[serde(default)]
        l2_regularization: f32,
    },
    Dense {
        size: usize,
        #[serde(default)]
        bias: BiasSpec,
        #[serde(default)]
        activation: Activation,
        #[serde(default)]
        l2_regularization: f32,
    },
    Conv2d {
        size: usize,
        #[serde(default = "default_window")]
        window: usize,
        #[serde(default = "default_stride")]
        stride: usize,
        #[serde(default)]
        padding: Padding,
        #[serde(default)]
        bias: bool,
        #[serde(default)]
        activation: Activation,
        #[serde(default)]
        l2_regularization: f32,
    },
    Lstm {
        size: usize,
    },
}

impl LayerSpec {
    pub fn dense(size: usize, activation: Activation) -> Self {
        LayerSpec::Dense {
            size,
            bias: BiasSpec::default(),
            activation,
            l2_regularization: 0.0,
        }
    }

    /// The `type` tag, used to name layer scopes.
    pub fn type_name(&self) -> &'static str {
        match self {
            LayerSpec::Flatten => "flatten",
            LayerSpec::Nonlinearity { .. } => "nonlinearity",
            LayerSpec::Linear { .. } => "linear",
            LayerSpec::Dense { .. } => "dense",
            LayerSpec::Conv2d { .. } => "conv2d",
            LayerSpec::Lstm { .. } => "lstm",
        }
    }
}

/// Build a layer from its configuration under `scope`.
pub fn from_spec(spec: &LayerSpec, store: &mut VariableStore, scope: &str) -> Result<Box<dyn Layer>> {
    let layer: Box<dyn Layer> = match spec {
        LayerSpec::Flatten => Box::new(Flatten::new(store, scope)),
        LayerSpec::Nonlinearity { name } => Box::new(Nonlinearity::new(store, scope, *name)),
        LayerSpec::Linear {
            size,
            weights,
            bias,
            l2_regularization,
        } => Box::new(Linear::new(store, scope, *size, weights.clone(), bias, *l2_regularization)),
        LayerSpec::Dense {
            size,
            bias,
            activation,
            l2_regularization,
        } => Box::new(Dense::new(store, scope, *size, bias, *activation, *l2_regularization)),
        LayerSpec::Conv2d {
            size,
            window,
            stride,
            padding,
            bias,
            activation,
            l2_regularization,
        } => Box::new(Conv2d::new(
            store,
            scope,
            *size,
            *window,
            *stride,
            *padding,
            *bias,
            *activation,
            *l2_regularization,
        )?),
        LayerSpec::Lstm { size } => Box::new(Lstm::new(store, scope, *size)),
    };
    Ok(layer)
}
