//! # Distributions Module
//!
//! Action distributions parameterized from a network embedding: one head per
//! action name. Discrete actions use [`Categorical`], continuous actions use
//! [`Gaussian`].

pub mod categorical;
pub mod gaussian;

use rand::Rng;

use crate::error::Result;
use crate::optimizer::Gradients;
use crate::types::{ActionSpec, ActionType, Tensor};
use crate::variables::{VariableId, VariableStore};

pub use categorical::Categorical;
pub use gaussian::Gaussian;

/// A distribution head, dispatched on the action type.
pub enum Distribution {
    Categorical(Categorical),
    Gaussian(Gaussian),
}

impl Distribution {
    /// Head matching the declared action type, scoped under `scope`.
    pub fn from_action_spec(store: &mut VariableStore, scope: &str, spec: &ActionSpec) -> Result<Self> {
        match spec.kind {
            ActionType::Int { num_actions } => Ok(Distribution::Categorical(Categorical::new(
                store,
                scope,
                &spec.shape,
                num_actions,
            )?)),
            ActionType::Float { min_value, max_value } => Ok(Distribution::Gaussian(Gaussian::new(
                store, scope, &spec.shape, min_value, max_value,
            )?)),
        }
    }

    /// Compute and cache the distribution parameters for `embedding`.
    pub fn parameterize(&mut self, store: &mut VariableStore, embedding: &Tensor, update: bool) -> Result<()> {
        match self {
            Distribution::Categorical(d) => d.parameterize(store, embedding, update),
            Distribution::Gaussian(d) => d.parameterize(store, embedding, update),
        }
    }

    pub fn sample<R: Rng>(&self, deterministic: bool, rng: &mut R) -> Result<Tensor> {
        match self {
            Distribution::Categorical(d) => d.sample(deterministic, rng),
            Distribution::Gaussian(d) => d.sample(deterministic, rng),
        }
    }

    pub fn log_probability(&self, action: &Tensor) -> Result<Tensor> {
        match self {
            Distribution::Categorical(d) => d.log_probability(action),
            Distribution::Gaussian(d) => d.log_probability(action),
        }
    }

    pub fn entropy(&self) -> Result<Tensor> {
        match self {
            Distribution::Categorical(d) => d.entropy(),
            Distribution::Gaussian(d) => d.entropy(),
        }
    }

    pub fn backward(
        &mut self,
        store: &VariableStore,
        action: &Tensor,
        grad_log_prob: &Tensor,
        grad_entropy: &Tensor,
        gradients: &mut Gradients,
    ) -> Result<Tensor> {
        match self {
            Distribution::Categorical(d) => d.backward(store, action, grad_log_prob, grad_entropy, gradients),
            Distribution::Gaussian(d) => d.backward(store, action, grad_log_prob, grad_entropy, gradients),
        }
    }

    pub fn get_variables(&self) -> Vec<VariableId> {
        match self {
            Distribution::Categorical(d) => d.get_variables(),
            Distribution::Gaussian(d) => d.get_variables(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{array, IxDyn};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_categorical_log_probability_and_entropy() {
        let mut store = VariableStore::with_seed(0);
        let mut distribution = Distribution::from_action_spec(&mut store, "action", &ActionSpec::discrete(4)).unwrap();
        // Zero embedding gives zero logits and a uniform distribution.
        distribution
            .parameterize(&mut store, &Tensor::zeros(IxDyn(&[2, 3])), false)
            .unwrap();

        let log_prob = distribution.log_probability(&array![0.0, 3.0].into_dyn()).unwrap();
        for value in log_prob.iter() {
            assert!((value - 0.25f32.ln()).abs() < 1e-5);
        }
        let entropy = distribution.entropy().unwrap();
        for value in entropy.iter() {
            assert!((value - 4.0f32.ln()).abs() < 1e-5);
        }
    }

    #[test]
    fn test_deterministic_gaussian_sample_is_clipped_mean() {
        let mut store = VariableStore::with_seed(0);
        let mut distribution =
            Distribution::from_action_spec(&mut store, "action", &ActionSpec::bounded(-1.0, 1.0)).unwrap();
        distribution
            .parameterize(&mut store, &Tensor::zeros(IxDyn(&[3, 2])), false)
            .unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        let sample = distribution.sample(true, &mut rng).unwrap();
        assert_eq!(sample, Tensor::zeros(IxDyn(&[3])));
    }

    #[test]
    fn test_gaussian_log_probability_gradient() {
        let mut store = VariableStore::with_seed(4);
        let mut distribution = Distribution::from_action_spec(&mut store, "action", &ActionSpec::continuous()).unwrap();
        let embedding = array![[0.5, -0.2]].into_dyn();
        let action = array![0.3].into_dyn();
        distribution.parameterize(&mut store, &embedding, true).unwrap();

        let mut gradients = Gradients::new();
        let ones = Tensor::ones(IxDyn(&[1]));
        let zeros = Tensor::zeros(IxDyn(&[1]));
        let grad_embedding = distribution
            .backward(&store, &action, &ones, &zeros, &mut gradients)
            .unwrap();

        let eps = 1e-3;
        for i in 0..2 {
            let mut plus = embedding.clone();
            plus[[0, i]] += eps;
            let mut minus = embedding.clone();
            minus[[0, i]] -= eps;
            distribution.parameterize(&mut store, &plus, false).unwrap();
            let up = distribution.log_probability(&action).unwrap()[[0]];
            distribution.parameterize(&mut store, &minus, false).unwrap();
            let down = distribution.log_probability(&action).unwrap()[[0]];
            let numeric = (up - down) / (2.0 * eps);
            assert!((numeric - grad_embedding[[0, i]]).abs() < 1e-2);
        }
        assert_eq!(gradients.len(), 4);
    }

    #[test]
    fn test_categorical_sampling_frequencies() {
        let mut store = VariableStore::with_seed(0);
        let mut distribution = Distribution::from_action_spec(&mut store, "action", &ActionSpec::discrete(2)).unwrap();
        distribution
            .parameterize(&mut store, &Tensor::zeros(IxDyn(&[1000, 1])), false)
            .unwrap();
        let mut rng = StdRng::seed_from_u64(7);
        let sample = distribution.sample(false, &mut rng).unwrap();
        let ones = sample.iter().filter(|&&v| v == 1.0).count();
        assert!(ones > 400 && ones < 600);
    }
}
