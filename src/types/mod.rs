//! # State and Action Specifications
//!
//! Declarations of what an environment produces and consumes. A configuration
//! may declare a single unnamed state/action or a mapping of named ones; the
//! [`OneOrNamed`] wrapper carries either form and normalises it to a mapping.

use ndarray::{ArrayD, Axis, IxDyn};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{PallasError, Result};

/// Dense tensor used throughout the crate. Batched data keeps the batch on axis 0.
pub type Tensor = ArrayD<f32>;

/// Named tensors, e.g. the states of a minibatch keyed by state name.
pub type Batch = BTreeMap<String, Tensor>;

/// Element type of a state
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StateType {
    #[default]
    Float,
    Int,
    Bool,
}

/// Declared shape and type of one state input.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateSpec {
    pub shape: Vec<usize>,
    #[serde(rename = "type", default)]
    pub kind: StateType,
}

impl StateSpec {
    pub fn new(shape: &[usize]) -> Self {
        StateSpec {
            shape: shape.to_vec(),
            kind: StateType::Float,
        }
    }
}

/// Element type of an action: bounded discrete or continuous.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ActionType {
    Int {
        num_actions: usize,
    },
    Float {
        #[serde(default)]
        min_value: Option<f32>,
        #[serde(default)]
        max_value: Option<f32>,
    },
}

/// Declared shape and type of one action output.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionSpec {
    #[serde(default)]
    pub shape: Vec<usize>,
    #[serde(flatten)]
    pub kind: ActionType,
}

impl ActionSpec {
    pub fn discrete(num_actions: usize) -> Self {
        ActionSpec {
            shape: Vec::new(),
            kind: ActionType::Int { num_actions },
        }
    }

    pub fn continuous() -> Self {
        ActionSpec {
            shape: Vec::new(),
            kind: ActionType::Float {
                min_value: None,
                max_value: None,
            },
        }
    }

    pub fn bounded(min_value: f32, max_value: f32) -> Self {
        ActionSpec {
            shape: Vec::new(),
            kind: ActionType::Float {
                min_value: Some(min_value),
                max_value: Some(max_value),
            },
        }
    }

    pub fn with_shape(mut self, shape: &[usize]) -> Self {
        self.shape = shape.to_vec();
        self
    }

    pub fn is_continuous(&self) -> bool {
        matches!(self.kind, ActionType::Float { .. })
    }

    /// Number of scalar entries per action instance.
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn num_actions(&self) -> Option<usize> {
        match self.kind {
            ActionType::Int { num_actions } => Some(num_actions),
            ActionType::Float { .. } => None,
        }
    }
}

/// A single unnamed entry or a mapping of named entries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrNamed<T> {
    Single(T),
    Named(BTreeMap<String, T>),
}

impl<T> OneOrNamed<T> {
    pub fn is_unique(&self) -> bool {
        matches!(self, OneOrNamed::Single(_))
    }

    /// Normalise into a mapping, storing a single entry under `unique_name`.
    pub fn into_named(self, unique_name: &str) -> BTreeMap<String, T> {
        match self {
            OneOrNamed::Single(value) => {
                let mut named = BTreeMap::new();
                named.insert(unique_name.to_string(), value);
                named
            }
            OneOrNamed::Named(named) => named,
        }
    }

    /// Restore the caller's form from a normalised mapping.
    pub fn from_named(mut named: BTreeMap<String, T>, unique_name: Option<&str>) -> Result<Self> {
        match unique_name {
            Some(name) => named
                .remove(name)
                .map(OneOrNamed::Single)
                .ok_or_else(|| PallasError::configuration(format!("missing entry '{}'", name))),
            None => Ok(OneOrNamed::Named(named)),
        }
    }

    pub fn single(self) -> Option<T> {
        match self {
            OneOrNamed::Single(value) => Some(value),
            OneOrNamed::Named(_) => None,
        }
    }

    pub fn named(self) -> Option<BTreeMap<String, T>> {
        match self {
            OneOrNamed::Single(_) => None,
            OneOrNamed::Named(named) => Some(named),
        }
    }
}

/// An action value as seen by the environment.
#[derive(Clone, Debug, PartialEq)]
pub enum ActionValue {
    Discrete(ArrayD<usize>),
    Continuous(ArrayD<f32>),
}

impl ActionValue {
    pub fn is_discrete(&self) -> bool {
        matches!(self, ActionValue::Discrete(_))
    }

    /// Float view of the action; discrete actions hold their class index.
    pub fn to_tensor(&self) -> Tensor {
        match self {
            ActionValue::Discrete(indices) => indices.mapv(|i| i as f32),
            ActionValue::Continuous(values) => values.clone(),
        }
    }

    pub fn from_tensor(spec: &ActionSpec, tensor: Tensor) -> Self {
        match spec.kind {
            ActionType::Int { .. } => ActionValue::Discrete(tensor.mapv(|v| v.max(0.0).round() as usize)),
            ActionType::Float { .. } => ActionValue::Continuous(tensor),
        }
    }

    pub fn as_discrete(&self) -> Option<&ArrayD<usize>> {
        match self {
            ActionValue::Discrete(indices) => Some(indices),
            ActionValue::Continuous(_) => None,
        }
    }

    pub fn as_continuous(&self) -> Option<&ArrayD<f32>> {
        match self {
            ActionValue::Discrete(_) => None,
            ActionValue::Continuous(values) => Some(values),
        }
    }
}

pub(crate) fn describe_shape(shape: &[usize]) -> String {
    format!("{:?}", shape)
}

/// Wrap a single instance into a batch of one.
pub(crate) fn add_batch_axis(tensor: &Tensor) -> Tensor {
    tensor.clone().insert_axis(Axis(0))
}

/// Take the first instance out of a batch.
pub(crate) fn remove_batch_axis(tensor: &Tensor) -> Result<Tensor> {
    if tensor.ndim() == 0 || tensor.shape()[0] != 1 {
        return Err(PallasError::shape_mismatch(
            "a batch of one".to_string(),
            describe_shape(tensor.shape()),
        ));
    }
    Ok(tensor.index_axis(Axis(0), 0).to_owned())
}

/// Stack single instances along a new batch axis.
pub(crate) fn stack_instances(instances: &[Tensor]) -> Result<Tensor> {
    if instances.is_empty() {
        return Err(PallasError::EmptyBuffer("no instances to stack".to_string()));
    }
    let views = instances.iter().map(|t| t.view()).collect::<Vec<_>>();
    Ok(ndarray::stack(Axis(0), &views)?)
}

/// Reshape a batched tensor to (batch, -1).
pub(crate) fn flatten_batch(tensor: &Tensor) -> Result<ndarray::Array2<f32>> {
    let batch = tensor.shape().first().copied().unwrap_or(1);
    let rest = if batch == 0 { 0 } else { tensor.len() / batch };
    let flat = tensor
        .as_standard_layout()
        .to_owned()
        .into_shape((batch, rest))?;
    Ok(flat)
}

pub(crate) fn zeros(shape: &[usize]) -> Tensor {
    ArrayD::zeros(IxDyn(shape))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_state_parses_as_unique() {
        let spec: OneOrNamed<StateSpec> = serde_json::from_str(r#"{"shape": [4], "type": "float"}"#).unwrap();
        assert!(spec.is_unique());
    }

    #[test]
    fn test_named_states_parse_as_mapping() {
        let spec: OneOrNamed<StateSpec> =
            serde_json::from_str(r#"{"position": {"shape": [2]}, "velocity": {"shape": [2]}}"#).unwrap();
        let named = spec.named().unwrap();
        assert_eq!(named.len(), 2);
        assert_eq!(named["velocity"].shape, vec![2]);
    }

    #[test]
    fn test_action_spec_parses_type_tag() {
        let spec: OneOrNamed<ActionSpec> = serde_json::from_str(r#"{"type": "int", "num_actions": 4}"#).unwrap();
        let spec = spec.single().unwrap();
        assert_eq!(spec.num_actions(), Some(4));
        assert_eq!(spec.size(), 1);
    }

    #[test]
    fn test_one_or_named_round_trip() {
        let single = OneOrNamed::Single(3);
        let named = single.into_named("state");
        let restored = OneOrNamed::from_named(named, Some("state")).unwrap();
        assert_eq!(restored, OneOrNamed::Single(3));
    }

    #[test]
    fn test_discrete_action_tensor_conversion() {
        let spec = ActionSpec::discrete(4);
        let value = ActionValue::from_tensor(&spec, ndarray::arr0(2.0).into_dyn());
        assert_eq!(value.as_discrete().unwrap().iter().copied().collect::<Vec<_>>(), vec![2]);
        assert_eq!(value.to_tensor().iter().copied().collect::<Vec<_>>(), vec![2.0]);
    }
}
