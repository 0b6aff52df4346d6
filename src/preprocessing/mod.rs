//! # Preprocessing Module
//!
//! A state passes through a stack of preprocessors before it reaches the
//! model. Stateful preprocessors are reset at the start of every episode.
//!
//! - `clip` - clamp every entry to `[min_value, max_value]`
//! - `standardize` - zero mean, unit variance over the whole state
//! - `running_standardize` - per-entry running mean and variance over the episode
//! - `sequence` - stack the last `length` states along a new trailing axis

use ndarray::{stack, Axis};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

use crate::error::{PallasError, Result};
use crate::types::{describe_shape, Tensor};

const EPSILON: f32 = 1e-8;

/// Preprocessor configuration, tagged by `type`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PreprocessorSpec {
    Clip { min_value: f32, max_value: f32 },
    Standardize,
    RunningStandardize,
    Sequence { length: usize },
}

#[derive(Clone, Debug)]
enum Preprocessor {
    Clip {
        min_value: f32,
        max_value: f32,
    },
    Standardize,
    RunningStandardize {
        count: usize,
        mean: Option<Tensor>,
        sum_squares: Option<Tensor>,
    },
    Sequence {
        length: usize,
        history: VecDeque<Tensor>,
    },
}

impl Preprocessor {
    fn from_spec(spec: &PreprocessorSpec) -> Result<Self> {
        Ok(match *spec {
            PreprocessorSpec::Clip { min_value, max_value } => {
                if min_value > max_value {
                    return Err(PallasError::configuration(format!(
                        "clip bounds must satisfy min <= max, got [{}, {}]",
                        min_value, max_value
                    )));
                }
                Preprocessor::Clip { min_value, max_value }
            }
            PreprocessorSpec::Standardize => Preprocessor::Standardize,
            PreprocessorSpec::RunningStandardize => Preprocessor::RunningStandardize {
                count: 0,
                mean: None,
                sum_squares: None,
            },
            PreprocessorSpec::Sequence { length } => {
                if length == 0 {
                    return Err(PallasError::configuration("sequence length must be at least 1"));
                }
                Preprocessor::Sequence {
                    length,
                    history: VecDeque::with_capacity(length),
                }
            }
        })
    }

    fn processed_shape(&self, shape: &[usize]) -> Vec<usize> {
        let mut shape = shape.to_vec();
        if let Preprocessor::Sequence { length, .. } = self {
            shape.push(*length);
        }
        shape
    }

    fn reset(&mut self) {
        match self {
            Preprocessor::RunningStandardize {
                count,
                mean,
                sum_squares,
            } => {
                *count = 0;
                *mean = None;
                *sum_squares = None;
            }
            Preprocessor::Sequence { history, .. } => history.clear(),
            Preprocessor::Clip { .. } | Preprocessor::Standardize => {}
        }
    }

    fn process(&mut self, state: &Tensor) -> Result<Tensor> {
        match self {
            Preprocessor::Clip { min_value, max_value } => {
                let (min_value, max_value) = (*min_value, *max_value);
                Ok(state.mapv(|x| x.clamp(min_value, max_value)))
            }
            Preprocessor::Standardize => {
                let mean = state.mean().unwrap_or(0.0);
                let std = state.std(0.0);
                Ok(state.mapv(|x| (x - mean) / (std + EPSILON)))
            }
            Preprocessor::RunningStandardize {
                count,
                mean,
                sum_squares,
            } => {
                // Welford's online update, per entry
                *count += 1;
                let n = *count as f32;
                let previous = mean.take().unwrap_or_else(|| Tensor::zeros(state.raw_dim()));
                if previous.shape() != state.shape() {
                    return Err(PallasError::shape_mismatch(
                        describe_shape(previous.shape()),
                        describe_shape(state.shape()),
                    ));
                }
                let updated = &previous + &((state - &previous) / n);
                let squares = sum_squares.take().unwrap_or_else(|| Tensor::zeros(state.raw_dim()));
                let squares = squares + &((state - &previous) * &(state - &updated));
                let variance = if *count > 1 { &squares / (n - 1.0) } else { Tensor::zeros(state.raw_dim()) };
                let result = (state - &updated) / &variance.mapv(|v| v.sqrt() + EPSILON);
                *mean = Some(updated);
                *sum_squares = Some(squares);
                Ok(result)
            }
            Preprocessor::Sequence { length, history } => {
                if let Some(last) = history.back() {
                    if last.shape() != state.shape() {
                        return Err(PallasError::shape_mismatch(
                            describe_shape(last.shape()),
                            describe_shape(state.shape()),
                        ));
                    }
                }
                if history.is_empty() {
                    history.extend(std::iter::repeat(state.clone()).take(*length));
                } else {
                    history.pop_front();
                    history.push_back(state.clone());
                }
                let views = history.iter().map(|s| s.view()).collect::<Vec<_>>();
                Ok(stack(Axis(state.ndim()), &views)?)
            }
        }
    }
}

/// A stack of preprocessors applied in order to one named state.
#[derive(Clone, Debug)]
pub struct Preprocessing {
    preprocessors: Vec<Preprocessor>,
}

impl Preprocessing {
    pub fn from_specs(specs: &[PreprocessorSpec]) -> Result<Self> {
        let preprocessors = specs.iter().map(Preprocessor::from_spec).collect::<Result<Vec<_>>>()?;
        Ok(Preprocessing { preprocessors })
    }

    pub fn len(&self) -> usize {
        self.preprocessors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.preprocessors.is_empty()
    }

    /// Shape of a processed state given the raw state shape.
    pub fn processed_shape(&self, shape: &[usize]) -> Vec<usize> {
        self.preprocessors
            .iter()
            .fold(shape.to_vec(), |shape, preprocessor| preprocessor.processed_shape(&shape))
    }

    pub fn reset(&mut self) {
        for preprocessor in self.preprocessors.iter_mut() {
            preprocessor.reset();
        }
    }

    /// Process a single state instance (no batch axis).
    pub fn process(&mut self, state: &Tensor) -> Result<Tensor> {
        let mut state = state.clone();
        for preprocessor in self.preprocessors.iter_mut() {
            state = preprocessor.process(&state)?;
        }
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn preprocessing(json: &str) -> Preprocessing {
        let specs: Vec<PreprocessorSpec> = serde_json::from_str(json).unwrap();
        Preprocessing::from_specs(&specs).unwrap()
    }

    #[test]
    fn test_clip() {
        let mut p = preprocessing(r#"[{"type": "clip", "min_value": -1.0, "max_value": 1.0}]"#);
        let out = p.process(&array![-3.0, 0.5, 2.0].into_dyn()).unwrap();
        assert_eq!(out, array![-1.0, 0.5, 1.0].into_dyn());
    }

    #[test]
    fn test_standardize_zero_mean() {
        let mut p = preprocessing(r#"[{"type": "standardize"}]"#);
        let out = p.process(&array![1.0, 2.0, 3.0, 4.0].into_dyn()).unwrap();
        assert!(out.sum().abs() < 1e-5);
        assert!((out.std(0.0) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_sequence_stacks_history() {
        let mut p = preprocessing(r#"[{"type": "sequence", "length": 3}]"#);
        assert_eq!(p.processed_shape(&[2]), vec![2, 3]);

        let first = p.process(&array![1.0, 2.0].into_dyn()).unwrap();
        assert_eq!(first, array![[1.0, 1.0, 1.0], [2.0, 2.0, 2.0]].into_dyn());
        let second = p.process(&array![3.0, 4.0].into_dyn()).unwrap();
        assert_eq!(second, array![[1.0, 1.0, 3.0], [2.0, 2.0, 4.0]].into_dyn());

        p.reset();
        let reset = p.process(&array![5.0, 6.0].into_dyn()).unwrap();
        assert_eq!(reset, array![[5.0, 5.0, 5.0], [6.0, 6.0, 6.0]].into_dyn());
    }

    #[test]
    fn test_running_standardize_tracks_episode() {
        let mut p = preprocessing(r#"[{"type": "running_standardize"}]"#);
        assert_eq!(p.process(&array![4.0].into_dyn()).unwrap(), array![0.0].into_dyn());
        let second = p.process(&array![6.0].into_dyn()).unwrap();
        // mean 5, sample std sqrt(2)
        assert!((second[[0]] - 1.0 / 2f32.sqrt()).abs() < 1e-4);
        p.reset();
        assert_eq!(p.process(&array![10.0].into_dyn()).unwrap(), array![0.0].into_dyn());
    }

    #[test]
    fn test_invalid_clip_rejected() {
        let specs = vec![PreprocessorSpec::Clip {
            min_value: 1.0,
            max_value: 0.0,
        }];
        assert!(Preprocessing::from_specs(&specs).is_err());
    }
}
