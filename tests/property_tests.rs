#[cfg(test)]
mod property_tests {
    use proptest::prelude::*;
    use pallas::exploration::{Exploration, ExplorationSpec};
    use pallas::layers::{Initializer, LayerSpec};
    use pallas::loss::{L2Loss, Loss};
    use pallas::networks::{LayeredNetwork, Network};
    use pallas::optimizer::Synchronization;
    use pallas::preprocessing::{Preprocessing, PreprocessorSpec};
    use pallas::types::Tensor;
    use pallas::variables::{Template, VariableId, VariableStore};
    use ndarray::{Array1, IxDyn};
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    // Strategy for generating finite tensors of a given length
    fn tensor_strategy(len: usize) -> impl Strategy<Value = Tensor> {
        prop::collection::vec(-100.0f32..100.0, len).prop_map(|v| Array1::from_vec(v).into_dyn())
    }

    fn variable(store: &mut VariableStore, scope: &str, value: f32) -> VariableId {
        let mut template = Template::new(store, scope);
        template
            .capture(store, |vars| vars.get_variable("x", &[], &Initializer::constant(value), true))
            .unwrap()
    }

    // Strategy for layer stacks mixing dense and lstm layers
    fn layer_stack_strategy() -> impl Strategy<Value = Vec<(bool, usize)>> {
        prop::collection::vec((any::<bool>(), 1usize..6), 1..5)
    }

    proptest! {
        #[test]
        fn test_l2_loss_non_negative(pair in (1usize..20).prop_flat_map(|n| (tensor_strategy(n), tensor_strategy(n)))) {
            let (prediction, target) = pair;
            let loss = L2Loss.compute(&prediction, &target).unwrap();
            prop_assert!(loss >= 0.0);
            prop_assert_eq!(L2Loss.compute(&prediction, &prediction).unwrap(), 0.0);
        }

        #[test]
        fn test_synchronization_schedule(
            frequency in 1usize..20,
            weight in 0.01f32..=1.0,
            time in 0usize..200,
            target_value in -10.0f32..10.0,
            source_value in -10.0f32..10.0,
        ) {
            let mut store = VariableStore::new();
            let target = variable(&mut store, "target", target_value);
            let source = variable(&mut store, "source", source_value);
            let mut sync = Synchronization::new(&mut store, frequency, weight).unwrap();

            let op = sync.minimize(time, &mut store, &[target], &[source]).unwrap();
            prop_assert_eq!(op.is_no_op(), time % frequency != 0);
            op.apply(&mut store).unwrap();

            let expected = if time % frequency == 0 {
                (1.0 - weight) * target_value + weight * source_value
            } else {
                target_value
            };
            let actual = store.value(target).unwrap().iter().copied().next().unwrap();
            prop_assert!((actual - expected).abs() < 1e-4);

            // a second call at the same time never syncs again
            prop_assert!(sync.minimize(time, &mut store, &[target], &[source]).unwrap().is_no_op());
        }

        #[test]
        fn test_template_capture_idempotent(size in 1usize..10, captures in 2usize..5) {
            let mut store = VariableStore::with_seed(0);
            let mut template = Template::new(&mut store, "scope");
            let first = template
                .capture(&mut store, |vars| vars.get_variable("w", &[size], &Initializer::normal(1.0), true))
                .unwrap();
            let value = store.value(first).unwrap().clone();
            for _ in 1..captures {
                let again = template
                    .capture(&mut store, |vars| vars.get_variable("w", &[size], &Initializer::normal(1.0), true))
                    .unwrap();
                prop_assert_eq!(again, first);
            }
            prop_assert_eq!(store.len(), 1);
            prop_assert_eq!(store.value(first).unwrap(), &value);
            prop_assert_eq!(template.invocations(), captures);
        }

        #[test]
        fn test_layered_internal_declarations(stack in layer_stack_strategy()) {
            let specs: Vec<LayerSpec> = stack
                .iter()
                .map(|&(recurrent, size)| {
                    if recurrent {
                        LayerSpec::Lstm { size }
                    } else {
                        LayerSpec::dense(size, Default::default())
                    }
                })
                .collect();
            let mut store = VariableStore::with_seed(0);
            let mut network = LayeredNetwork::from_spec(&specs, "network", &mut store).unwrap();

            let expected: Vec<Vec<usize>> = stack
                .iter()
                .filter(|(recurrent, _)| *recurrent)
                .map(|&(_, size)| vec![2, size])
                .collect();
            prop_assert_eq!(network.internal_inputs(), expected.clone());

            let internals: Vec<Tensor> = network
                .internal_inits()
                .into_iter()
                .map(|init| init.insert_axis(ndarray::Axis(0)))
                .collect();
            let mut x = pallas::types::Batch::new();
            x.insert("state".to_string(), Tensor::ones(IxDyn(&[1, 3])));
            let out = network.apply(&mut store, &x, &internals, false).unwrap();
            prop_assert_eq!(out.internals.len(), expected.len());
            for (internal, shape) in out.internals.iter().zip(&expected) {
                prop_assert_eq!(&internal.shape()[1..], shape.as_slice());
            }
        }

        #[test]
        fn test_clip_bounds_output(state in tensor_strategy(6), low in -50.0f32..0.0, high in 0.0f32..50.0) {
            let mut stack = Preprocessing::from_specs(&[PreprocessorSpec::Clip { min_value: low, max_value: high }]).unwrap();
            let out = stack.process(&state).unwrap();
            prop_assert!(out.iter().all(|&v| v >= low && v <= high));
        }

        #[test]
        fn test_linear_decay_between_endpoints(
            initial in 0.0f32..1.0,
            last in 0.0f32..1.0,
            timesteps in 1usize..1000,
            timestep in 0usize..2000,
        ) {
            let spec = ExplorationSpec::LinearDecay { initial_value: initial, final_value: last, timesteps };
            let mut exploration = Exploration::from_spec(&spec).unwrap();
            let mut rng = StdRng::seed_from_u64(0);
            let value = exploration.value(0, timestep, &mut rng);
            prop_assert!(value >= initial.min(last) - 1e-6 && value <= initial.max(last) + 1e-6);
            if timestep >= timesteps {
                prop_assert!((value - last).abs() < 1e-6);
            }
        }
    }
}
