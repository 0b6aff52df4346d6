use ndarray::{Array, IxDyn, Zip};
use rand::Rng;
use rand_distr::StandardNormal;

use crate::error::{PallasError, Result};
use crate::layers::{BiasSpec, Layer, Linear};
use crate::optimizer::Gradients;
use crate::types::{describe_shape, Tensor};
use crate::variables::{VariableId, VariableStore};

const LOG_STDDEV_MIN: f32 = -20.0;
const LOG_STDDEV_MAX: f32 = 2.0;
const HALF_LN_2PI: f32 = 0.918_938_5;

struct GaussianParams {
    mean: Tensor,
    log_stddev: Tensor,
    // zero where the raw log-stddev was clipped
    log_stddev_active: Tensor,
}

/// Diagonal Gaussian over continuous actions with learned mean and log-stddev.
///
/// The log-stddev is clipped to `[-20, 2]`. Samples are clipped to the
/// declared bounds, if any.
pub struct Gaussian {
    pub shape: Vec<usize>,
    pub min_value: Option<f32>,
    pub max_value: Option<f32>,
    mean: Linear,
    log_stddev: Linear,
    params: Option<GaussianParams>,
}

impl Gaussian {
    pub fn new(
        store: &mut VariableStore,
        scope: &str,
        shape: &[usize],
        min_value: Option<f32>,
        max_value: Option<f32>,
    ) -> Result<Self> {
        if let (Some(min), Some(max)) = (min_value, max_value) {
            if min >= max {
                return Err(PallasError::configuration(format!(
                    "gaussian bounds must satisfy min < max, got [{}, {}]",
                    min, max
                )));
            }
        }
        let size = shape.iter().product::<usize>();
        Ok(Gaussian {
            shape: shape.to_vec(),
            min_value,
            max_value,
            mean: Linear::new(store, &format!("{}/mean", scope), size, None, &BiasSpec::default(), 0.0),
            log_stddev: Linear::new(store, &format!("{}/log-stddev", scope), size, None, &BiasSpec::default(), 0.0),
            params: None,
        })
    }

    fn params(&self) -> Result<&GaussianParams> {
        self.params
            .as_ref()
            .ok_or_else(|| PallasError::PreconditionViolation("gaussian distribution not parameterized".to_string()))
    }

    fn check_action(&self, action: &Tensor, params: &GaussianParams) -> Result<()> {
        if action.shape() != params.mean.shape() {
            return Err(PallasError::shape_mismatch(
                describe_shape(params.mean.shape()),
                describe_shape(action.shape()),
            ));
        }
        Ok(())
    }

    fn clip(&self, value: f32) -> f32 {
        let value = match self.min_value {
            Some(min) => value.max(min),
            None => value,
        };
        match self.max_value {
            Some(max) => value.min(max),
            None => value,
        }
    }

    pub fn parameterize(&mut self, store: &mut VariableStore, embedding: &Tensor, update: bool) -> Result<()> {
        let mean = self.mean.apply(store, embedding, &[], update)?.output;
        let raw_log_stddev = self.log_stddev.apply(store, embedding, &[], update)?.output;
        let mut shape = vec![mean.shape()[0]];
        shape.extend(&self.shape);

        let log_stddev_active = raw_log_stddev.mapv(|v| {
            if (LOG_STDDEV_MIN..=LOG_STDDEV_MAX).contains(&v) {
                1.0
            } else {
                0.0
            }
        });
        let log_stddev = raw_log_stddev.mapv(|v| v.clamp(LOG_STDDEV_MIN, LOG_STDDEV_MAX));
        self.params = Some(GaussianParams {
            mean: mean.into_shape(IxDyn(&shape))?,
            log_stddev: log_stddev.into_shape(IxDyn(&shape))?,
            log_stddev_active: log_stddev_active.into_shape(IxDyn(&shape))?,
        });
        Ok(())
    }

    /// The mean when deterministic, otherwise `mean + stddev * N(0, 1)`.
    pub fn sample<R: Rng>(&self, deterministic: bool, rng: &mut R) -> Result<Tensor> {
        let params = self.params()?;
        if deterministic {
            return Ok(params.mean.mapv(|m| self.clip(m)));
        }
        let noise: Tensor = Array::from_shape_simple_fn(params.mean.raw_dim(), || rng.sample::<f32, _>(StandardNormal));
        let mut sample = params.mean.clone();
        Zip::from(&mut sample)
            .and(&params.log_stddev)
            .and(&noise)
            .for_each(|s, &log_std, &n| *s = self.clip(*s + log_std.exp() * n));
        Ok(sample)
    }

    pub fn log_probability(&self, action: &Tensor) -> Result<Tensor> {
        let params = self.params()?;
        self.check_action(action, params)?;
        let mut result = action.clone();
        Zip::from(&mut result)
            .and(&params.mean)
            .and(&params.log_stddev)
            .for_each(|a, &mean, &log_std| {
                let z = (*a - mean) / log_std.exp();
                *a = -0.5 * z * z - log_std - HALF_LN_2PI;
            });
        Ok(result)
    }

    pub fn entropy(&self) -> Result<Tensor> {
        let params = self.params()?;
        Ok(params.log_stddev.mapv(|log_std| log_std + HALF_LN_2PI + 0.5))
    }

    /// Reverse pass given the loss gradients with respect to the
    /// log-probability of `action` and to the entropy. Returns the gradient
    /// with respect to the embedding.
    pub fn backward(
        &mut self,
        store: &VariableStore,
        action: &Tensor,
        grad_log_prob: &Tensor,
        grad_entropy: &Tensor,
        gradients: &mut Gradients,
    ) -> Result<Tensor> {
        let params = self.params()?;
        self.check_action(action, params)?;
        self.check_action(grad_log_prob, params)?;
        self.check_action(grad_entropy, params)?;

        let mut grad_mean = action.clone();
        Zip::from(&mut grad_mean)
            .and(&params.mean)
            .and(&params.log_stddev)
            .and(grad_log_prob)
            .for_each(|a, &mean, &log_std, &g| {
                let variance = (2.0 * log_std).exp();
                *a = g * (*a - mean) / variance;
            });

        let mut grad_log_std = action.clone();
        Zip::from(&mut grad_log_std)
            .and(&params.mean)
            .and(&params.log_stddev)
            .and(&params.log_stddev_active)
            .for_each(|a, &mean, &log_std, &active| {
                let z = (*a - mean) / log_std.exp();
                *a = active * (z * z - 1.0);
            });
        grad_log_std = grad_log_std * grad_log_prob + &(grad_entropy * &params.log_stddev_active);

        let batch_size = grad_mean.shape()[0];
        let width = grad_mean.len() / batch_size.max(1);
        let grad_mean = grad_mean.into_shape(IxDyn(&[batch_size, width]))?;
        let grad_log_std = grad_log_std.into_shape(IxDyn(&[batch_size, width]))?;

        let grad_embedding = self.mean.backward(store, &grad_mean, gradients)?;
        let grad_embedding = grad_embedding + self.log_stddev.backward(store, &grad_log_std, gradients)?;
        Ok(grad_embedding)
    }

    pub fn get_variables(&self) -> Vec<VariableId> {
        let mut variables = self.log_stddev.get_variables();
        variables.extend(self.mean.get_variables());
        variables
    }
}
