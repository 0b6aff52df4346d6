//! # Exploration Module
//!
//! Per-action exploration policies. Each produces one scalar per call from
//! the current episode and timestep:
//!
//! - for continuous actions the scalar is added to the model's action
//! - for discrete actions it is the probability of replacing the model's
//!   action with a uniformly drawn one
//!
//! | type | value |
//! |---|---|
//! | `constant` | `value` |
//! | `linear_decay` | `initial_value` to `final_value` over `timesteps` |
//! | `epsilon_decay` | `initial_epsilon` until `start_timestep`, then linearly to `final_epsilon` over `timesteps` |
//! | `gaussian_noise` | `mu + sigma * N(0, 1)` |
//! | `ornstein_uhlenbeck` | mean-reverting noise around `mu`, reset every episode |

use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::error::{PallasError, Result};

fn default_sigma() -> f32 {
    0.3
}

fn default_theta() -> f32 {
    0.15
}

/// Exploration configuration, tagged by `type`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExplorationSpec {
    Constant {
        value: f32,
    },
    LinearDecay {
        initial_value: f32,
        final_value: f32,
        timesteps: usize,
    },
    EpsilonDecay {
        initial_epsilon: f32,
        final_epsilon: f32,
        timesteps: usize,
        #[serde(default)]
        start_timestep: usize,
    },
    GaussianNoise {
        #[serde(default)]
        mu: f32,
        #[serde(default = "default_sigma")]
        sigma: f32,
    },
    OrnsteinUhlenbeck {
        #[serde(default = "default_sigma")]
        sigma: f32,
        #[serde(default)]
        mu: f32,
        #[serde(default = "default_theta")]
        theta: f32,
    },
}

/// An exploration policy built from its spec, carrying any running state.
#[derive(Clone, Debug)]
pub struct Exploration {
    spec: ExplorationSpec,
    state: f32,
}

impl Exploration {
    pub fn from_spec(spec: &ExplorationSpec) -> Result<Self> {
        match *spec {
            ExplorationSpec::LinearDecay { timesteps, .. } | ExplorationSpec::EpsilonDecay { timesteps, .. }
                if timesteps == 0 =>
            {
                return Err(PallasError::configuration("exploration decay needs at least one timestep"));
            }
            ExplorationSpec::GaussianNoise { sigma, .. } | ExplorationSpec::OrnsteinUhlenbeck { sigma, .. }
                if sigma < 0.0 =>
            {
                return Err(PallasError::configuration(format!("sigma must be non-negative, got {}", sigma)));
            }
            _ => {}
        }
        let mut exploration = Exploration {
            spec: spec.clone(),
            state: 0.0,
        };
        exploration.reset();
        Ok(exploration)
    }

    pub fn spec(&self) -> &ExplorationSpec {
        &self.spec
    }

    /// Reset running state at the start of an episode.
    pub fn reset(&mut self) {
        if let ExplorationSpec::OrnsteinUhlenbeck { mu, .. } = self.spec {
            self.state = mu;
        }
    }

    pub fn value<R: Rng>(&mut self, _episode: usize, timestep: usize, rng: &mut R) -> f32 {
        match self.spec {
            ExplorationSpec::Constant { value } => value,
            ExplorationSpec::LinearDecay {
                initial_value,
                final_value,
                timesteps,
            } => {
                let ratio = (timestep as f32 / timesteps as f32).min(1.0);
                initial_value + ratio * (final_value - initial_value)
            }
            ExplorationSpec::EpsilonDecay {
                initial_epsilon,
                final_epsilon,
                timesteps,
                start_timestep,
            } => {
                if timestep < start_timestep {
                    initial_epsilon
                } else if timestep > start_timestep + timesteps {
                    final_epsilon
                } else {
                    let ratio = (timestep - start_timestep) as f32 / timesteps as f32;
                    initial_epsilon + ratio * (final_epsilon - initial_epsilon)
                }
            }
            ExplorationSpec::GaussianNoise { mu, sigma } => {
                if sigma == 0.0 {
                    mu
                } else {
                    mu + sigma * rng.sample::<f32, _>(StandardNormal)
                }
            }
            ExplorationSpec::OrnsteinUhlenbeck { sigma, mu, theta } => {
                let noise: f32 = rng.sample(StandardNormal);
                self.state += theta * (mu - self.state) + sigma * noise;
                self.state
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_linear_decay_reaches_final_value() {
        let spec: ExplorationSpec = serde_json::from_str(
            r#"{"type": "linear_decay", "initial_value": 1.0, "final_value": 0.0, "timesteps": 10}"#,
        )
        .unwrap();
        let mut exploration = Exploration::from_spec(&spec).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(exploration.value(0, 0, &mut rng), 1.0);
        assert!((exploration.value(0, 5, &mut rng) - 0.5).abs() < 1e-6);
        assert_eq!(exploration.value(0, 50, &mut rng), 0.0);
    }

    #[test]
    fn test_epsilon_decay_holds_until_start() {
        let spec = ExplorationSpec::EpsilonDecay {
            initial_epsilon: 1.0,
            final_epsilon: 0.1,
            timesteps: 100,
            start_timestep: 10,
        };
        let mut exploration = Exploration::from_spec(&spec).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(exploration.value(0, 5, &mut rng), 1.0);
        assert!((exploration.value(0, 60, &mut rng) - 0.55).abs() < 1e-6);
        assert_eq!(exploration.value(0, 500, &mut rng), 0.1);
    }

    #[test]
    fn test_ornstein_uhlenbeck_reverts_to_mean_after_reset() {
        let spec = ExplorationSpec::OrnsteinUhlenbeck {
            sigma: 0.0,
            mu: 2.0,
            theta: 0.5,
        };
        let mut exploration = Exploration::from_spec(&spec).unwrap();
        let mut rng = StdRng::seed_from_u64(0);
        assert_eq!(exploration.value(0, 0, &mut rng), 2.0);
        exploration.state = 0.0;
        assert_eq!(exploration.value(0, 1, &mut rng), 1.0);
        exploration.reset();
        assert_eq!(exploration.value(1, 2, &mut rng), 2.0);
    }

    #[test]
    fn test_zero_decay_length_rejected() {
        let spec = ExplorationSpec::LinearDecay {
            initial_value: 1.0,
            final_value: 0.0,
            timesteps: 0,
        };
        assert!(Exploration::from_spec(&spec).is_err());
    }
}
