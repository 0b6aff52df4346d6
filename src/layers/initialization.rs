use ndarray::IxDyn;
use ndarray_rand::rand_distr::Normal;
use ndarray_rand::RandomExt;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{PallasError, Result};
use crate::types::{describe_shape, Tensor};

/// Parameter initialization strategies
///
/// Resolved once before a parameter is created; an explicit tensor must match
/// the requested shape exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Initializer {
    /// All zeros
    Zeros,

    /// Every entry set to the same value
    Constant { value: f32 },

    /// Normal distribution with custom mean and std
    RandomNormal {
        #[serde(default)]
        mean: f32,
        stddev: f32,
    },

    /// A fixed tensor supplied by the caller
    Explicit { value: Tensor },
}

impl Initializer {
    pub fn constant(value: f32) -> Self {
        if value == 0.0 {
            Initializer::Zeros
        } else {
            Initializer::Constant { value }
        }
    }

    pub fn normal(stddev: f32) -> Self {
        Initializer::RandomNormal { mean: 0.0, stddev }
    }

    /// Produce the initial value of a parameter of the given shape.
    pub fn initialize<R: Rng + ?Sized>(&self, shape: &[usize], rng: &mut R) -> Result<Tensor> {
        match self {
            Initializer::Zeros => Ok(Tensor::zeros(IxDyn(shape))),

            Initializer::Constant { value } => Ok(Tensor::from_elem(IxDyn(shape), *value)),

            Initializer::RandomNormal { mean, stddev } => {
                let normal = Normal::new(*mean, *stddev)
                    .map_err(|e| PallasError::NumericalError(e.to_string()))?;
                Ok(Tensor::random_using(IxDyn(shape), normal, rng))
            }

            Initializer::Explicit { value } => {
                if value.shape() != shape {
                    return Err(PallasError::shape_mismatch(
                        describe_shape(shape),
                        describe_shape(value.shape()),
                    ));
                }
                Ok(value.clone())
            }
        }
    }

    /// Default weight initializer of a fully connected layer.
    pub fn for_linear(fan_in: usize, fan_out: usize) -> Self {
        let stddev = (2.0 / (fan_in + fan_out) as f32).sqrt().min(0.1);
        Initializer::normal(stddev)
    }
}
