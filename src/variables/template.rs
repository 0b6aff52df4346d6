use std::collections::BTreeMap;

use super::store::{VariableId, VariableStore};
use crate::error::{PallasError, Result};
use crate::layers::Initializer;
use crate::types::describe_shape;

/// A scoped parameter registry wrapped around a computation.
///
/// The first [`capture`](Template::capture) under a scope creates every
/// parameter the computation requests and records it by name; later captures
/// hand back the recorded parameters instead of creating new ones.
#[derive(Clone, Debug)]
pub struct Template {
    scope: String,
    variables: BTreeMap<String, VariableId>,
    invocations: usize,
}

impl Template {
    /// Register a new template. The scope is made unique within `store`.
    pub fn new(store: &mut VariableStore, scope: &str) -> Self {
        Template {
            scope: store.unique_scope(scope),
            variables: BTreeMap::new(),
            invocations: 0,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    /// Run `compute` with a getter bound to this template's scope.
    pub fn capture<T, F>(&mut self, store: &mut VariableStore, compute: F) -> Result<T>
    where
        F: FnOnce(&mut VariableGetter<'_>) -> Result<T>,
    {
        let mut getter = VariableGetter {
            scope: &self.scope,
            variables: &mut self.variables,
            store,
        };
        let result = compute(&mut getter)?;
        self.invocations += 1;
        Ok(result)
    }

    /// Number of completed captures.
    pub fn invocations(&self) -> usize {
        self.invocations
    }

    pub fn variable(&self, name: &str) -> Option<VariableId> {
        self.variables.get(name).copied()
    }

    /// Captured parameters sorted by name.
    pub fn get_variables(&self) -> Vec<VariableId> {
        self.variables.values().copied().collect()
    }
}

/// Parameter-creation hook handed to a captured computation.
pub struct VariableGetter<'a> {
    scope: &'a str,
    variables: &'a mut BTreeMap<String, VariableId>,
    store: &'a mut VariableStore,
}

impl<'a> VariableGetter<'a> {
    /// Return the parameter recorded under `name`, creating it on first request.
    ///
    /// A recorded parameter whose shape differs from `shape` is a ShapeMismatch.
    pub fn get_variable(
        &mut self,
        name: &str,
        shape: &[usize],
        initializer: &Initializer,
        trainable: bool,
    ) -> Result<VariableId> {
        if let Some(&id) = self.variables.get(name) {
            let existing = self.store.value(id)?.shape();
            if existing != shape {
                return Err(PallasError::shape_mismatch(
                    format!("{} for {}/{}", describe_shape(existing), self.scope, name),
                    describe_shape(shape),
                ));
            }
            return Ok(id);
        }

        let value = initializer.initialize(shape, self.store.rng())?;
        let id = self
            .store
            .create(format!("{}/{}", self.scope, name), value, trainable)?;
        self.variables.insert(name.to_string(), id);
        Ok(id)
    }

    pub fn store(&self) -> &VariableStore {
        self.store
    }
}
