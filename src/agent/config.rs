use serde::{Deserialize, Serialize};
use std::fs;

use crate::error::Result;
use crate::exploration::ExplorationSpec;
use crate::models::ModelConfig;
use crate::preprocessing::PreprocessorSpec;
use crate::types::{ActionSpec, OneOrNamed, StateSpec};

/// Everything needed to build an agent.
///
/// `states` and `actions` take either a single unnamed declaration or a
/// mapping of named ones. `preprocessing` and `exploration` must use the same
/// form as the declarations they refer to.
///
/// ```rust
/// use pallas::agent::AgentConfig;
///
/// let config: AgentConfig = serde_json::from_str(r#"{
///     "states": {"shape": [3]},
///     "actions": {"type": "float", "min_value": -2.0, "max_value": 2.0},
///     "exploration": {"type": "ornstein_uhlenbeck", "sigma": 0.2},
///     "model": {"network": [{"type": "dense", "size": 64}]}
/// }"#).unwrap();
/// assert!(config.states.is_unique());
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    pub states: OneOrNamed<StateSpec>,
    pub actions: OneOrNamed<ActionSpec>,
    #[serde(default)]
    pub preprocessing: Option<OneOrNamed<Vec<PreprocessorSpec>>>,
    #[serde(default)]
    pub exploration: Option<OneOrNamed<ExplorationSpec>>,
    pub model: ModelConfig,
}

impl AgentConfig {
    pub fn from_json(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn from_json_str(contents: &str) -> Result<Self> {
        Ok(serde_json::from_str(contents)?)
    }
}
