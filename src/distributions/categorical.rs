use ndarray::{Axis, IxDyn};
use rand::Rng;

use crate::activations::Activation;
use crate::error::{PallasError, Result};
use crate::layers::{BiasSpec, Layer, Linear};
use crate::optimizer::Gradients;
use crate::types::{describe_shape, Tensor};
use crate::variables::{VariableId, VariableStore};

/// Categorical distribution over `num_actions` classes per action entry.
///
/// Logits have shape `(batch, *shape, num_actions)`.
pub struct Categorical {
    pub shape: Vec<usize>,
    pub num_actions: usize,
    logits: Linear,
    probabilities: Option<Tensor>,
}

impl Categorical {
    pub fn new(store: &mut VariableStore, scope: &str, shape: &[usize], num_actions: usize) -> Result<Self> {
        if num_actions == 0 {
            return Err(PallasError::configuration("categorical distribution needs at least one action"));
        }
        let size = shape.iter().product::<usize>() * num_actions;
        Ok(Categorical {
            shape: shape.to_vec(),
            num_actions,
            logits: Linear::new(store, &format!("{}/logits", scope), size, None, &BiasSpec::default(), 0.0),
            probabilities: None,
        })
    }

    fn params_shape(&self, batch_size: usize) -> Vec<usize> {
        let mut shape = vec![batch_size];
        shape.extend(&self.shape);
        shape.push(self.num_actions);
        shape
    }

    fn probabilities(&self) -> Result<&Tensor> {
        self.probabilities
            .as_ref()
            .ok_or_else(|| PallasError::PreconditionViolation("categorical distribution not parameterized".to_string()))
    }

    fn check_action(&self, action: &Tensor, probabilities: &Tensor) -> Result<()> {
        let expected = &probabilities.shape()[..probabilities.ndim() - 1];
        if action.shape() != expected {
            return Err(PallasError::shape_mismatch(
                describe_shape(expected),
                describe_shape(action.shape()),
            ));
        }
        Ok(())
    }

    fn class_of(&self, value: f32) -> usize {
        (value.max(0.0).round() as usize).min(self.num_actions - 1)
    }

    pub fn parameterize(&mut self, store: &mut VariableStore, embedding: &Tensor, update: bool) -> Result<()> {
        let logits = self.logits.apply(store, embedding, &[], update)?.output;
        let batch_size = logits.shape()[0];
        let logits = logits.into_shape(IxDyn(&self.params_shape(batch_size)))?;
        self.probabilities = Some(Activation::Softmax.apply(&logits));
        Ok(())
    }

    /// Argmax when deterministic, otherwise a draw from the class probabilities.
    pub fn sample<R: Rng>(&self, deterministic: bool, rng: &mut R) -> Result<Tensor> {
        let probabilities = self.probabilities()?;
        let last = Axis(probabilities.ndim() - 1);
        Ok(probabilities.map_axis(last, |lane| {
            let class = if deterministic {
                lane.iter()
                    .enumerate()
                    .fold((0, f32::NEG_INFINITY), |best, (i, &p)| if p > best.1 { (i, p) } else { best })
                    .0
            } else {
                let draw: f32 = rng.gen();
                let mut cumulative = 0.0;
                let mut class = lane.len() - 1;
                for (i, &p) in lane.iter().enumerate() {
                    cumulative += p;
                    if draw < cumulative {
                        class = i;
                        break;
                    }
                }
                class
            };
            class as f32
        }))
    }

    /// Log-probability of `action` (class indices), shape `(batch, *shape)`.
    pub fn log_probability(&self, action: &Tensor) -> Result<Tensor> {
        let probabilities = self.probabilities()?;
        self.check_action(action, probabilities)?;
        let last = Axis(probabilities.ndim() - 1);
        let mut result = action.clone();
        for (value, lane) in result.iter_mut().zip(probabilities.lanes(last)) {
            let class = self.class_of(*value);
            *value = lane[class].max(f32::MIN_POSITIVE).ln();
        }
        Ok(result)
    }

    /// Entropy per action entry, shape `(batch, *shape)`.
    pub fn entropy(&self) -> Result<Tensor> {
        let probabilities = self.probabilities()?;
        let last = Axis(probabilities.ndim() - 1);
        Ok(probabilities.map_axis(last, |lane| {
            -lane.iter().map(|&p| if p > 0.0 { p * p.ln() } else { 0.0 }).sum::<f32>()
        }))
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
        let probabilities = self.probabilities()?;
        self.check_action(action, probabilities)?;
        self.check_action(grad_log_prob, probabilities)?;
        self.check_action(grad_entropy, probabilities)?;
        let entropy = self.entropy()?;
        let last = Axis(probabilities.ndim() - 1);

        let mut grad_logits = probabilities.clone();
        for ((((mut lane, probs), &a), &g_log), (&g_ent, &h)) in grad_logits
            .lanes_mut(last)
            .into_iter()
            .zip(probabilities.lanes(last))
            .zip(action.iter())
            .zip(grad_log_prob.iter())
            .zip(grad_entropy.iter().zip(entropy.iter()))
        {
            let class = self.class_of(a);
            for (k, value) in lane.iter_mut().enumerate() {
                let p = probs[k];
                let indicator = if k == class { 1.0 } else { 0.0 };
                let d_log = indicator - p;
                let d_entropy = -p * (p.max(f32::MIN_POSITIVE).ln() + h);
                *value = g_log * d_log + g_ent * d_entropy;
            }
        }

        let batch_size = grad_logits.shape()[0];
        let width = grad_logits.len() / batch_size.max(1);
        let grad_logits = grad_logits.into_shape(IxDyn(&[batch_size, width]))?;
        self.logits.backward(store, &grad_logits, gradients)
    }

    pub fn get_variables(&self) -> Vec<VariableId> {
        self.logits.get_variables()
    }
}
