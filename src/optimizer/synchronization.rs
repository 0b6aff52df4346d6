use crate::error::{PallasError, Result};
use crate::layers::Initializer;
use crate::optimizer::UpdateOp;
use crate::types::{describe_shape, Tensor};
use crate::variables::{Template, VariableId, VariableStore};

const WORD: usize = 1 << 24;

fn encode_time(time: usize) -> Tensor {
    ndarray::arr1(&[(time / WORD) as f32, (time % WORD) as f32]).into_dyn()
}

fn decode_time(value: &Tensor) -> Option<usize> {
    match value.as_slice() {
        Some(&[high, low]) if high >= 0.0 && low >= 0.0 => Some(high as usize * WORD + low as usize),
        _ => None,
    }
}

/// Scheduled hard or soft copy of one parameter set into another.
///
/// On steps where `time % sync_frequency == 0` the target variables become
/// `(1 - update_weight) * target + update_weight * source`; on every other
/// step the returned update is a no-op. A second call at the same `time` is
/// also a no-op, tracked through the non-trainable `last-sync` counter.
///
/// The counter holds the timestep as two 24-bit words, each exact in `f32`,
/// so the schedule stays exact for timesteps below 2^48.
#[derive(Clone, Debug)]
pub struct Synchronization {
    pub sync_frequency: usize,
    pub update_weight: f32,
    template: Template,
}

impl Synchronization {
    pub fn new(store: &mut VariableStore, sync_frequency: usize, update_weight: f32) -> Result<Self> {
        if sync_frequency == 0 {
            return Err(PallasError::configuration("sync_frequency must be at least 1"));
        }
        if !(update_weight > 0.0 && update_weight <= 1.0) {
            return Err(PallasError::configuration(format!(
                "update_weight must lie in (0, 1], got {}",
                update_weight
            )));
        }
        let mut synchronization = Synchronization {
            sync_frequency,
            update_weight,
            template: Template::new(store, "synchronization"),
        };
        synchronization.last_sync(store)?;
        Ok(synchronization)
    }

    fn last_sync(&mut self, store: &mut VariableStore) -> Result<VariableId> {
        self.template.capture(store, |vars| {
            vars.get_variable("last-sync", &[2], &Initializer::constant(-1.0), false)
        })
    }

    /// Build the update copying `source_variables` into `variables`.
    pub fn minimize(
        &mut self,
        time: usize,
        store: &mut VariableStore,
        variables: &[VariableId],
        source_variables: &[VariableId],
    ) -> Result<UpdateOp> {
        if variables.len() != source_variables.len() {
            return Err(PallasError::shape_mismatch(
                format!("{} source variables", variables.len()),
                format!("{} source variables", source_variables.len()),
            ));
        }
        for (&target, &source) in variables.iter().zip(source_variables) {
            let target_shape = store.value(target)?.shape();
            let source_shape = store.value(source)?.shape();
            if target_shape != source_shape {
                return Err(PallasError::shape_mismatch(
                    format!("{} for {}", describe_shape(target_shape), store.name(target)?),
                    format!("{} for {}", describe_shape(source_shape), store.name(source)?),
                ));
            }
        }

        let last_sync = self.last_sync(store)?;
        let already_synced = decode_time(store.value(last_sync)?) == Some(time);
        if time % self.sync_frequency != 0 || already_synced {
            return Ok(UpdateOp::no_op());
        }

        let mut op = UpdateOp::no_op();
        for (&target, &source) in variables.iter().zip(source_variables) {
            let source_value = store.value(source)?;
            let value = if self.update_weight == 1.0 {
                source_value.clone()
            } else {
                store.value(target)? * (1.0 - self.update_weight) + source_value * self.update_weight
            };
            op.assign(target, value);
        }
        op.assign(last_sync, encode_time(time));
        log::debug!(
            "synchronizing {} variables at time {} (weight {})",
            variables.len(),
            time,
            self.update_weight
        );
        Ok(op)
    }

    /// The internal `last-sync` counter.
    pub fn get_variables(&self) -> Vec<VariableId> {
        self.template.get_variables()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn setup(values: (Tensor, Tensor)) -> (VariableStore, VariableId, VariableId) {
        let mut store = VariableStore::new();
        let mut template = Template::new(&mut store, "net");
        let (target, source) = template
            .capture(&mut store, |vars| {
                let target = vars.get_variable(
                    "target",
                    values.0.shape(),
                    &Initializer::Explicit { value: values.0.clone() },
                    true,
                )?;
                let source = vars.get_variable(
                    "source",
                    values.1.shape(),
                    &Initializer::Explicit { value: values.1.clone() },
                    true,
                )?;
                Ok((target, source))
            })
            .unwrap();
        (store, target, source)
    }

    #[test]
    fn test_hard_copy_on_schedule() {
        let (mut store, target, source) = setup((array![0.0, 0.0].into_dyn(), array![1.0, 2.0].into_dyn()));
        let mut sync = Synchronization::new(&mut store, 3, 1.0).unwrap();

        let op = sync.minimize(1, &mut store, &[target], &[source]).unwrap();
        assert!(op.is_no_op());

        let op = sync.minimize(3, &mut store, &[target], &[source]).unwrap();
        op.apply(&mut store).unwrap();
        assert_eq!(store.value(target).unwrap(), store.value(source).unwrap());
    }

    #[test]
    fn test_soft_update_blends() {
        let (mut store, target, source) = setup((array![1.0, 1.0].into_dyn(), array![3.0, 5.0].into_dyn()));
        let mut sync = Synchronization::new(&mut store, 1, 0.25).unwrap();

        sync.minimize(0, &mut store, &[target], &[source])
            .unwrap()
            .apply(&mut store)
            .unwrap();
        assert_eq!(store.value(target).unwrap(), &array![1.5, 2.0].into_dyn());
    }

    #[test]
    fn test_repeated_call_at_same_time_is_no_op() {
        let (mut store, target, source) = setup((array![1.0].into_dyn(), array![3.0].into_dyn()));
        let mut sync = Synchronization::new(&mut store, 2, 0.5).unwrap();

        sync.minimize(4, &mut store, &[target], &[source])
            .unwrap()
            .apply(&mut store)
            .unwrap();
        let op = sync.minimize(4, &mut store, &[target], &[source]).unwrap();
        assert!(op.is_no_op());
        assert_eq!(store.value(target).unwrap(), &array![2.0].into_dyn());
    }

    #[test]
    fn test_consecutive_large_timesteps_both_sync() {
        let (mut store, target, source) = setup((array![0.0].into_dyn(), array![1.0].into_dyn()));
        let mut sync = Synchronization::new(&mut store, 1, 0.5).unwrap();
        let time = 1 << 24;

        sync.minimize(time, &mut store, &[target], &[source])
            .unwrap()
            .apply(&mut store)
            .unwrap();
        assert_eq!(store.value(target).unwrap(), &array![0.5].into_dyn());

        let op = sync.minimize(time + 1, &mut store, &[target], &[source]).unwrap();
        assert!(!op.is_no_op());
        op.apply(&mut store).unwrap();
        assert_eq!(store.value(target).unwrap(), &array![0.75].into_dyn());

        assert!(sync
            .minimize(time + 1, &mut store, &[target], &[source])
            .unwrap()
            .is_no_op());
    }

    #[test]
    fn test_counter_round_trips_exactly() {
        for time in [0, 1, WORD - 1, WORD, WORD + 1, (1 << 40) + 12345] {
            assert_eq!(decode_time(&encode_time(time)), Some(time));
        }
        assert_eq!(decode_time(&array![-1.0, -1.0].into_dyn()), None);
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let (mut store, target, source) = setup((array![1.0].into_dyn(), array![1.0, 2.0].into_dyn()));
        let mut sync = Synchronization::new(&mut store, 1, 1.0).unwrap();
        assert!(matches!(
            sync.minimize(0, &mut store, &[target], &[source]),
            Err(PallasError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_schedule_rejected() {
        let mut store = VariableStore::new();
        assert!(Synchronization::new(&mut store, 0, 1.0).is_err());
        assert!(Synchronization::new(&mut store, 1, 0.0).is_err());
        assert!(Synchronization::new(&mut store, 1, 1.5).is_err());
    }
}
