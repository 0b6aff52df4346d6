use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;

use crate::error::{PallasError, Result};
use crate::types::{describe_shape, Tensor};

/// Handle of a variable inside a [`VariableStore`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VariableId(usize);

impl VariableId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// A named, owned, mutable tensor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    pub value: Tensor,
    pub trainable: bool,
}

/// Arena of every variable created for one model.
///
/// Variables are only ever created through a [`Template`](super::Template), which
/// records them under its scope. Names are fully qualified (`scope/name`) and
/// unique within the store.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VariableStore {
    variables: Vec<Variable>,
    index: HashMap<String, VariableId>,
    scopes: HashSet<String>,
    #[serde(skip, default = "StdRng::from_entropy")]
    rng: StdRng,
}

impl Default for VariableStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableStore {
    pub fn new() -> Self {
        VariableStore {
            variables: Vec::new(),
            index: HashMap::new(),
            scopes: HashSet::new(),
            rng: StdRng::from_entropy(),
        }
    }

    /// Store whose random initializers draw from a seeded generator.
    pub fn with_seed(seed: u64) -> Self {
        let mut store = Self::new();
        store.rng = StdRng::seed_from_u64(seed);
        store
    }

    /// Reserve a scope name. A scope that is already taken gets a numeric
    /// suffix, so two components never share parameters by accident.
    pub fn unique_scope(&mut self, scope: &str) -> String {
        let mut candidate = scope.to_string();
        let mut counter = 0;
        while self.scopes.contains(&candidate) {
            counter += 1;
            candidate = format!("{}_{}", scope, counter);
        }
        self.scopes.insert(candidate.clone());
        candidate
    }

    pub(crate) fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    pub(crate) fn create(&mut self, name: String, value: Tensor, trainable: bool) -> Result<VariableId> {
        if self.index.contains_key(&name) {
            return Err(PallasError::configuration(format!("variable '{}' already exists", name)));
        }
        let id = VariableId(self.variables.len());
        log::trace!("creating variable {} with shape {:?}", name, value.shape());
        self.index.insert(name.clone(), id);
        self.variables.push(Variable { name, value, trainable });
        Ok(id)
    }

    pub fn get(&self, id: VariableId) -> Result<&Variable> {
        self.variables
            .get(id.0)
            .ok_or_else(|| PallasError::PreconditionViolation(format!("unknown variable id {}", id.0)))
    }

    pub fn value(&self, id: VariableId) -> Result<&Tensor> {
        Ok(&self.get(id)?.value)
    }

    pub fn name(&self, id: VariableId) -> Result<&str> {
        Ok(self.get(id)?.name.as_str())
    }

    pub fn find(&self, name: &str) -> Option<VariableId> {
        self.index.get(name).copied()
    }

    /// Overwrite a variable with a value of the same shape.
    pub fn assign(&mut self, id: VariableId, value: Tensor) -> Result<()> {
        let variable = self
            .variables
            .get_mut(id.0)
            .ok_or_else(|| PallasError::PreconditionViolation(format!("unknown variable id {}", id.0)))?;
        if variable.value.shape() != value.shape() {
            return Err(PallasError::shape_mismatch(
                describe_shape(variable.value.shape()),
                describe_shape(value.shape()),
            ));
        }
        variable.value = value;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.variables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
    }

    pub fn names(&self) -> Vec<&str> {
        self.variables.iter().map(|v| v.name.as_str()).collect()
    }

    /// Write every variable value to disk, keyed by name.
    pub fn save(&self, path: &str) -> Result<()> {
        let values: BTreeMap<&str, &Tensor> = self
            .variables
            .iter()
            .map(|v| (v.name.as_str(), &v.value))
            .collect();
        let serialized = bincode::serialize(&values)?;
        fs::write(path, serialized)?;
        Ok(())
    }

    /// Restore values written by [`save`](Self::save). Every variable of this
    /// store must be present with an identical shape; nothing is assigned otherwise.
    pub fn load(&mut self, path: &str) -> Result<()> {
        let data = fs::read(path)?;
        let mut values: BTreeMap<String, Tensor> = bincode::deserialize(&data)?;

        let mut restored = Vec::with_capacity(self.variables.len());
        for variable in &self.variables {
            let value = values.remove(&variable.name).ok_or_else(|| {
                PallasError::SerializationError(format!("checkpoint has no variable '{}'", variable.name))
            })?;
            if value.shape() != variable.value.shape() {
                return Err(PallasError::shape_mismatch(
                    describe_shape(variable.value.shape()),
                    describe_shape(value.shape()),
                ));
            }
            restored.push(value);
        }
        for (variable, value) in self.variables.iter_mut().zip(restored) {
            variable.value = value;
        }
        if !values.is_empty() {
            log::warn!("checkpoint {} holds {} unused variables", path, values.len());
        }
        Ok(())
    }
}
