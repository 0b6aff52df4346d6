use std::collections::HashMap;

use crate::error::{PallasError, Result};
use crate::types::{describe_shape, Tensor};
use crate::variables::{VariableId, VariableStore};

/// Parameter gradients accumulated by backward passes.
#[derive(Clone, Debug, Default)]
pub struct Gradients {
    grads: HashMap<VariableId, Tensor>,
}

impl Gradients {
    pub fn new() -> Self {
        Gradients { grads: HashMap::new() }
    }

    /// Add `grad` to whatever has already been accumulated for `id`.
    pub fn accumulate(&mut self, id: VariableId, grad: Tensor) -> Result<()> {
        match self.grads.get_mut(&id) {
            Some(existing) => {
                if existing.shape() != grad.shape() {
                    return Err(PallasError::shape_mismatch(
                        describe_shape(existing.shape()),
                        describe_shape(grad.shape()),
                    ));
                }
                *existing += &grad;
            }
            None => {
                self.grads.insert(id, grad);
            }
        }
        Ok(())
    }

    pub fn get(&self, id: VariableId) -> Option<&Tensor> {
        self.grads.get(&id)
    }

    pub fn contains(&self, id: VariableId) -> bool {
        self.grads.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.grads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.grads.is_empty()
    }

    pub fn global_norm(&self) -> f32 {
        self.grads
            .values()
            .map(|g| g.iter().map(|v| v * v).sum::<f32>())
            .sum::<f32>()
            .sqrt()
    }
}

/// A set of pending variable assignments.
///
/// Building an update never touches variable values; [`apply`](UpdateOp::apply)
/// validates every assignment before committing any of them.
#[derive(Clone, Debug, Default)]
pub struct UpdateOp {
    assignments: Vec<(VariableId, Tensor)>,
}

impl UpdateOp {
    pub fn no_op() -> Self {
        UpdateOp { assignments: Vec::new() }
    }

    pub fn assign(&mut self, id: VariableId, value: Tensor) {
        self.assignments.push((id, value));
    }

    /// Combine several updates into one.
    pub fn group<I: IntoIterator<Item = UpdateOp>>(ops: I) -> Self {
        let assignments = ops.into_iter().flat_map(|op| op.assignments).collect();
        UpdateOp { assignments }
    }

    pub fn is_no_op(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn len(&self) -> usize {
        self.assignments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assignments.is_empty()
    }

    pub fn touches(&self, id: VariableId) -> bool {
        self.assignments.iter().any(|(target, _)| *target == id)
    }

    pub fn value_for(&self, id: VariableId) -> Option<&Tensor> {
        self.assignments
            .iter()
            .rev()
            .find(|(target, _)| *target == id)
            .map(|(_, value)| value)
    }

    /// Commit every assignment, or none of them if any is invalid.
    pub fn apply(self, store: &mut VariableStore) -> Result<()> {
        for (id, value) in &self.assignments {
            let current = store.value(*id)?;
            if current.shape() != value.shape() {
                return Err(PallasError::shape_mismatch(
                    format!("{} for {}", describe_shape(current.shape()), store.name(*id)?),
                    describe_shape(value.shape()),
                ));
            }
        }
        for (id, value) in self.assignments {
            store.assign(id, value)?;
        }
        Ok(())
    }
}
