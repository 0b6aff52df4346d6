use ndarray::Axis;
use serde::{Deserialize, Serialize};

use crate::types::Tensor;

const SELU_ALPHA: f32 = 1.673_263_2;
const SELU_SCALE: f32 = 1.050_701;

/// An enumeration of the nonlinearities a layer can apply elementwise.
///
/// `Softmax` normalises over the last axis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Activation {
    #[default]
    Relu,
    Linear,
    Elu,
    Selu,
    Sigmoid,
    Softmax,
    Softplus,
    Tanh,
}

fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

fn softplus(v: f32) -> f32 {
    // log(1 + e^v) without overflow for large v
    if v > 20.0 {
        v
    } else {
        v.exp().ln_1p()
    }
}

impl Activation {
    /// Apply the activation to a tensor of any rank.
    pub fn apply(&self, input: &Tensor) -> Tensor {
        match self {
            Activation::Relu => input.mapv(|v| v.max(0.0)),
            Activation::Linear => input.clone(),
            Activation::Elu => input.mapv(|v| if v > 0.0 { v } else { v.exp() - 1.0 }),
            Activation::Selu => input.mapv(|v| {
                if v > 0.0 {
                    SELU_SCALE * v
                } else {
                    SELU_SCALE * SELU_ALPHA * (v.exp() - 1.0)
                }
            }),
            Activation::Sigmoid => input.mapv(sigmoid),
            Activation::Softmax => {
                let mut output = input.clone();
                if output.ndim() == 0 {
                    output.fill(1.0);
                    return output;
                }
                let last = Axis(output.ndim() - 1);
                for mut lane in output.lanes_mut(last) {
                    let max = lane.fold(f32::NEG_INFINITY, |a, &b| a.max(b));
                    lane.mapv_inplace(|v| (v - max).exp());
                    let sum = lane.sum();
                    lane.mapv_inplace(|v| v / sum);
                }
                output
            }
            Activation::Softplus => input.mapv(softplus),
            Activation::Tanh => input.mapv(|v| v.tanh()),
        }
    }

    /// Gradient with respect to the input, given the forward input, the forward
    /// output and the gradient flowing into the output.
    pub fn backward(&self, input: &Tensor, output: &Tensor, grad_output: &Tensor) -> Tensor {
        match self {
            Activation::Relu => grad_output * &input.mapv(|v| if v > 0.0 { 1.0 } else { 0.0 }),
            Activation::Linear => grad_output.clone(),
            Activation::Elu => grad_output * &input.mapv(|v| if v > 0.0 { 1.0 } else { v.exp() }),
            Activation::Selu => {
                grad_output
                    * &input.mapv(|v| {
                        if v > 0.0 {
                            SELU_SCALE
                        } else {
                            SELU_SCALE * SELU_ALPHA * v.exp()
                        }
                    })
            }
            Activation::Sigmoid => grad_output * &output.mapv(|s| s * (1.0 - s)),
            Activation::Softmax => {
                if output.ndim() == 0 {
                    return grad_output.mapv(|_| 0.0);
                }
                // dx = y * (dy - sum(dy * y)) along the softmax axis
                let last = Axis(output.ndim() - 1);
                let weighted = (grad_output * output).sum_axis(last).insert_axis(last);
                output * &(grad_output - &weighted)
            }
            Activation::Softplus => grad_output * &input.mapv(sigmoid),
            Activation::Tanh => grad_output * &output.mapv(|t| 1.0 - t * t),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let x = array![[1.0, 2.0, 3.0], [0.0, 0.0, 0.0]].into_dyn();
        let y = Activation::Softmax.apply(&x);
        for row in y.lanes(Axis(1)) {
            assert!((row.sum() - 1.0).abs() < 1e-6);
        }
        assert!((y[[1, 0]] - 1.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn test_backward_matches_finite_difference() {
        let x = array![[0.3, -0.7, 1.2]].into_dyn();
        let upstream = array![[0.5, -1.0, 2.0]].into_dyn();
        let eps = 1e-3;
        for activation in [
            Activation::Elu,
            Activation::Selu,
            Activation::Sigmoid,
            Activation::Softmax,
            Activation::Softplus,
            Activation::Tanh,
        ] {
            let y = activation.apply(&x);
            let analytic = activation.backward(&x, &y, &upstream);
            for i in 0..3 {
                let mut plus = x.clone();
                plus[[0, i]] += eps;
                let mut minus = x.clone();
                minus[[0, i]] -= eps;
                let numeric = ((&activation.apply(&plus) - &activation.apply(&minus)) * &upstream).sum() / (2.0 * eps);
                assert!(
                    (numeric - analytic[[0, i]]).abs() < 1e-2,
                    "{:?} at {}: {} vs {}",
                    activation,
                    i,
                    numeric,
                    analytic[[0, i]]
                );
            }
        }
    }

    #[test]
    fn test_parses_lowercase_names() {
        let a: Activation = serde_json::from_str("\"softplus\"").unwrap();
        assert_eq!(a, Activation::Softplus);
    }
}
