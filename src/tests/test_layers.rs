use ndarray::{array, IxDyn};
use crate::activations::Activation;
use crate::error::PallasError;
use crate::layers::{self, BiasSpec, Conv2d, Dense, Flatten, Initializer, Layer, LayerSpec, Lstm, Padding};
use crate::optimizer::Gradients;
use crate::types::{add_batch_axis, Tensor};
use crate::variables::VariableStore;

#[test]
fn test_dense_output_shape() {
    let mut store = VariableStore::with_seed(0);
    let mut dense = Dense::new(&mut store, "dense", 5, &BiasSpec::default(), Activation::Relu, 0.0);
    let out = dense.apply(&mut store, &Tensor::ones(IxDyn(&[3, 4])), &[], false).unwrap();
    assert_eq!(out.output.shape(), &[3, 5]);
    assert!(out.internals.is_empty());
    assert!(out.output.iter().all(|&v| v >= 0.0));
    assert_eq!(dense.get_variables().len(), 2);
}

#[test]
fn test_dense_reuses_parameters_across_applies() {
    let mut store = VariableStore::with_seed(0);
    let mut dense = Dense::new(&mut store, "dense", 2, &BiasSpec::default(), Activation::Tanh, 0.0);
    let x = Tensor::ones(IxDyn(&[1, 3]));
    let first = dense.apply(&mut store, &x, &[], false).unwrap();
    let count = store.len();
    let second = dense.apply(&mut store, &x, &[], false).unwrap();
    assert_eq!(store.len(), count);
    assert_eq!(first.output, second.output);
}

#[test]
fn test_dense_rejects_other_input_width_after_first_apply() {
    let mut store = VariableStore::with_seed(0);
    let mut dense = Dense::new(&mut store, "dense", 2, &BiasSpec::default(), Activation::Relu, 0.0);
    dense.apply(&mut store, &Tensor::ones(IxDyn(&[1, 3])), &[], false).unwrap();
    let result = dense.apply(&mut store, &Tensor::ones(IxDyn(&[1, 4])), &[], false);
    assert!(matches!(result, Err(PallasError::ShapeMismatch { .. })));
}

#[test]
fn test_dense_requires_rank_two() {
    let mut store = VariableStore::new();
    let mut dense = Dense::new(&mut store, "dense", 2, &BiasSpec::default(), Activation::Relu, 0.0);
    let result = dense.apply(&mut store, &Tensor::ones(IxDyn(&[2, 3, 4])), &[], false);
    assert!(matches!(result, Err(PallasError::InvalidInputShape { .. })));
}

#[test]
fn test_dense_gradient_matches_finite_difference() {
    let mut store = VariableStore::with_seed(7);
    let mut dense = Dense::with_weights(
        &mut store,
        "dense",
        2,
        Some(Initializer::Explicit {
            value: array![[0.5, -0.3], [0.2, 0.8]].into_dyn(),
        }),
        &BiasSpec::Value(0.1),
        Activation::Tanh,
        0.0,
    );
    let x = array![[0.4, -0.6]].into_dyn();
    dense.apply(&mut store, &x, &[], false).unwrap();
    let mut gradients = Gradients::new();
    let grad_x = dense
        .backward(&store, &Tensor::ones(IxDyn(&[1, 2])), &mut gradients)
        .unwrap();

    let eps = 1e-3;
    for i in 0..2 {
        let mut plus = x.clone();
        plus[[0, i]] += eps;
        let mut minus = x.clone();
        minus[[0, i]] -= eps;
        let f_plus = dense.apply(&mut store, &plus, &[], false).unwrap().output.sum();
        let f_minus = dense.apply(&mut store, &minus, &[], false).unwrap().output.sum();
        let numeric = (f_plus - f_minus) / (2.0 * eps);
        assert!((numeric - grad_x[[0, i]]).abs() < 1e-2);
    }
    assert_eq!(gradients.len(), 2);
}

#[test]
fn test_bias_disabled_creates_weights_only() {
    let mut store = VariableStore::with_seed(0);
    let spec: LayerSpec = serde_json::from_str(r#"{"type": "linear", "size": 3, "bias": false}"#).unwrap();
    let mut layer = layers::from_spec(&spec, &mut store, "linear").unwrap();
    layer.apply(&mut store, &Tensor::ones(IxDyn(&[2, 2])), &[], false).unwrap();
    assert_eq!(layer.get_variables().len(), 1);
    assert!(store.find("linear/W").is_some());
    assert!(store.find("linear/b").is_none());
}

#[test]
fn test_l2_regularization_only_when_configured() {
    let mut store = VariableStore::with_seed(0);
    let mut plain = Dense::new(&mut store, "plain", 2, &BiasSpec::default(), Activation::Relu, 0.0);
    let mut regularized = Dense::new(&mut store, "regularized", 2, &BiasSpec::default(), Activation::Relu, 0.5);
    let x = Tensor::ones(IxDyn(&[1, 2]));
    plain.apply(&mut store, &x, &[], false).unwrap();
    regularized.apply(&mut store, &x, &[], false).unwrap();

    assert_eq!(plain.regularization_loss(&store).unwrap(), None);
    let loss = regularized.regularization_loss(&store).unwrap().unwrap();
    assert!(loss > 0.0);

    let mut gradients = Gradients::new();
    regularized.regularization_backward(&store, &mut gradients).unwrap();
    assert_eq!(gradients.len(), 2);
}

#[test]
fn test_flatten_round_trips_gradient_shape() {
    let mut store = VariableStore::new();
    let mut flatten = Flatten::new(&mut store, "flatten");
    let out = flatten.apply(&mut store, &Tensor::ones(IxDyn(&[2, 3, 4])), &[], false).unwrap();
    assert_eq!(out.output.shape(), &[2, 12]);
    let grad = flatten
        .backward(&store, &Tensor::ones(IxDyn(&[2, 12])), &mut Gradients::new())
        .unwrap();
    assert_eq!(grad.shape(), &[2, 3, 4]);
    assert!(flatten.get_variables().is_empty());
}

#[test]
fn test_conv2d_padding_modes() {
    let mut store = VariableStore::with_seed(0);
    let x = Tensor::ones(IxDyn(&[1, 5, 5, 2]));

    let mut same = Conv2d::new(&mut store, "same", 4, 3, 2, Padding::Same, false, Activation::Relu, 0.0).unwrap();
    assert_eq!(same.apply(&mut store, &x, &[], false).unwrap().output.shape(), &[1, 3, 3, 4]);

    let mut valid = Conv2d::new(&mut store, "valid", 4, 3, 1, Padding::Valid, true, Activation::Relu, 0.0).unwrap();
    assert_eq!(valid.apply(&mut store, &x, &[], false).unwrap().output.shape(), &[1, 3, 3, 4]);
    assert_eq!(valid.get_variables().len(), 2);
    assert_eq!(same.get_variables().len(), 1);
}

#[test]
fn test_conv2d_zero_window_rejected() {
    let mut store = VariableStore::new();
    assert!(Conv2d::new(&mut store, "conv", 4, 0, 1, Padding::Same, false, Activation::Relu, 0.0).is_err());
}

#[test]
fn test_lstm_requires_internal_state() {
    let mut store = VariableStore::with_seed(0);
    let mut lstm = Lstm::new(&mut store, "lstm", 3);
    let x = Tensor::ones(IxDyn(&[1, 2]));
    assert!(lstm.apply(&mut store, &x, &[], false).is_err());

    let init = add_batch_axis(&lstm.internal_inits()[0]);
    let out = lstm.apply(&mut store, &x, &[init], false).unwrap();
    assert_eq!(out.internals.len(), 1);
    assert_eq!(out.internals[0].shape(), &[1, 2, 3]);
}

#[test]
fn test_layer_spec_defaults() {
    let spec: LayerSpec = serde_json::from_str(r#"{"type": "conv2d", "size": 8}"#).unwrap();
    match spec {
        LayerSpec::Conv2d {
            window,
            stride,
            padding,
            bias,
            ..
        } => {
            assert_eq!(window, 3);
            assert_eq!(stride, 1);
            assert_eq!(padding, Padding::Same);
            assert!(!bias);
        }
        other => panic!("unexpected spec {:?}", other),
    }
    assert!(serde_json::from_str::<LayerSpec>(r#"{"type": "attention", "size": 8}"#).is_err());
}
