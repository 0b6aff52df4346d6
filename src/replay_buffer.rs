use rand::seq::index;
use rand::Rng;
use std::collections::VecDeque;

use crate::error::{PallasError, Result};
use crate::models::TransitionBatch;
use crate::types::{stack_instances, Batch, Tensor};

/// One observed step. Tensors hold a single instance, without a batch axis.
#[derive(Clone, Debug, PartialEq)]
pub struct Transition {
    pub states: Batch,
    pub internals: Vec<Tensor>,
    pub actions: Batch,
    pub reward: f32,
    pub terminal: bool,
    pub next_states: Batch,
    pub next_internals: Vec<Tensor>,
}

/// Bounded FIFO replay memory with uniform sampling.
#[derive(Clone)]
pub struct ReplayBuffer {
    buffer: VecDeque<Transition>,
    capacity: usize,
    include_next_states: bool,
}

impl ReplayBuffer {
    pub fn new(capacity: usize, include_next_states: bool) -> Self {
        ReplayBuffer {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
            include_next_states,
        }
    }

    pub fn add(&mut self, transition: Transition) {
        if self.capacity == 0 {
            return;
        }
        if self.buffer.len() == self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(transition);
    }

    /// Draw `batch_size` distinct transitions uniformly at random.
    pub fn sample<R: Rng>(&self, batch_size: usize, rng: &mut R) -> Result<TransitionBatch> {
        if self.buffer.len() < batch_size || batch_size == 0 {
            return Err(PallasError::EmptyBuffer(format!(
                "need {} transitions, memory holds {}",
                batch_size,
                self.buffer.len()
            )));
        }
        let transitions = index::sample(rng, self.buffer.len(), batch_size)
            .into_iter()
            .map(|i| &self.buffer[i])
            .collect::<Vec<_>>();
        self.collate(&transitions)
    }

    /// Stack transitions into one batch.
    fn collate(&self, transitions: &[&Transition]) -> Result<TransitionBatch> {
        let reward = Tensor::from_shape_vec(
            vec![transitions.len()],
            transitions.iter().map(|t| t.reward).collect(),
        )?;
        Ok(TransitionBatch {
            states: stack_named(transitions, |t| &t.states)?,
            internals: stack_slots(transitions, |t| &t.internals)?,
            actions: stack_named(transitions, |t| &t.actions)?,
            terminal: transitions.iter().map(|t| t.terminal).collect(),
            reward,
            next_states: if self.include_next_states {
                Some(stack_named(transitions, |t| &t.next_states)?)
            } else {
                None
            },
            next_internals: if self.include_next_states {
                stack_slots(transitions, |t| &t.next_internals)?
            } else {
                Vec::new()
            },
        })
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn include_next_states(&self) -> bool {
        self.include_next_states
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

fn stack_named<F>(transitions: &[&Transition], field: F) -> Result<Batch>
where
    F: Fn(&Transition) -> &Batch,
{
    let mut batch = Batch::new();
    let first = match transitions.first() {
        Some(first) => field(first),
        None => return Ok(batch),
    };
    for name in first.keys() {
        let instances = transitions
            .iter()
            .map(|t| {
                field(t)
                    .get(name)
                    .cloned()
                    .ok_or_else(|| PallasError::configuration(format!("transition has no entry '{}'", name)))
            })
            .collect::<Result<Vec<_>>>()?;
        batch.insert(name.clone(), stack_instances(&instances)?);
    }
    Ok(batch)
}

fn stack_slots<F>(transitions: &[&Transition], field: F) -> Result<Vec<Tensor>>
where
    F: Fn(&Transition) -> &Vec<Tensor>,
{
    let slots = transitions.first().map(|t| field(t).len()).unwrap_or(0);
    (0..slots)
        .map(|slot| {
            let instances = transitions
                .iter()
                .map(|t| {
                    field(t).get(slot).cloned().ok_or_else(|| {
                        PallasError::shape_mismatch(format!("{} internal states", slots), field(t).len().to_string())
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            stack_instances(&instances)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr0, array};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn transition(value: f32) -> Transition {
        let mut states = Batch::new();
        states.insert("state".to_string(), array![value, value].into_dyn());
        let mut actions = Batch::new();
        actions.insert("action".to_string(), arr0(value).into_dyn());
        Transition {
            next_states: states.clone(),
            states,
            internals: Vec::new(),
            actions,
            reward: value,
            terminal: false,
            next_internals: Vec::new(),
        }
    }

    #[test]
    fn test_oldest_transition_evicted() {
        let mut buffer = ReplayBuffer::new(2, true);
        for i in 0..3 {
            buffer.add(transition(i as f32));
        }
        assert_eq!(buffer.len(), 2);
        let mut rng = StdRng::seed_from_u64(0);
        let batch = buffer.sample(2, &mut rng).unwrap();
        assert!(batch.reward.iter().all(|&r| r >= 1.0));
    }

    #[test]
    fn test_sample_stacks_batch_axis() {
        let mut buffer = ReplayBuffer::new(10, true);
        for i in 0..5 {
            buffer.add(transition(i as f32));
        }
        let mut rng = StdRng::seed_from_u64(1);
        let batch = buffer.sample(3, &mut rng).unwrap();
        assert!(batch.validate().is_ok());
        assert_eq!(batch.states["state"].shape(), &[3, 2]);
        assert_eq!(batch.actions["action"].shape(), &[3]);
        assert_eq!(batch.next_states.as_ref().unwrap()["state"].shape(), &[3, 2]);
    }

    #[test]
    fn test_sample_draws_distinct_transitions() {
        let mut buffer = ReplayBuffer::new(100, true);
        for i in 0..100 {
            buffer.add(transition(i as f32));
        }
        let mut rng = StdRng::seed_from_u64(4);
        for batch_size in [1, 10, 100] {
            let batch = buffer.sample(batch_size, &mut rng).unwrap();
            let mut rewards = batch.reward.iter().map(|&r| r as usize).collect::<Vec<_>>();
            rewards.sort_unstable();
            rewards.dedup();
            assert_eq!(rewards.len(), batch_size);
        }
    }

    #[test]
    fn test_next_states_dropped_when_not_retained() {
        let mut buffer = ReplayBuffer::new(10, false);
        buffer.add(transition(1.0));
        let mut rng = StdRng::seed_from_u64(2);
        assert!(buffer.sample(1, &mut rng).unwrap().next_states.is_none());
    }

    #[test]
    fn test_sampling_more_than_stored_fails() {
        let buffer = ReplayBuffer::new(10, true);
        let mut rng = StdRng::seed_from_u64(3);
        assert!(matches!(buffer.sample(1, &mut rng), Err(PallasError::EmptyBuffer(_))));
    }
}
