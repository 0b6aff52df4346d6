//! 2D convolution over `(batch, height, width, channels)` input.

use ndarray::{s, Array1, Array4, Axis, Ix4};
use serde::{Deserialize, Serialize};

use super::initialization::Initializer;
use super::traits::{Layer, LayerOutput};
use crate::activations::Activation;
use crate::error::{PallasError, Result};
use crate::optimizer::Gradients;
use crate::types::Tensor;
use crate::variables::{Template, VariableId, VariableStore};

/// Convolution padding mode
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Padding {
    /// Output spatial size is `ceil(input / stride)`; input is zero padded.
    #[default]
    Same,
    /// No padding; windows must fit entirely inside the input.
    Valid,
}

impl Padding {
    /// Output size and leading pad along one spatial axis.
    fn resolve(&self, input: usize, window: usize, stride: usize) -> Result<(usize, usize)> {
        match self {
            Padding::Same => {
                let output = (input + stride - 1) / stride;
                let total = ((output.saturating_sub(1)) * stride + window).saturating_sub(input);
                Ok((output, total / 2))
            }
            Padding::Valid => {
                if input < window {
                    return Err(PallasError::shape_mismatch(
                        format!("spatial size of at least {}", window),
                        input.to_string(),
                    ));
                }
                Ok(((input - window) / stride + 1, 0))
            }
        }
    }
}

struct ConvCache {
    padded: Array4<f32>,
    pad: (usize, usize),
    input_hw: (usize, usize),
    pre_activation: Tensor,
    output: Tensor,
}

/// 2D Convolutional Layer
///
/// Filters have shape `(window, window, in_channels, size)`. The bias is off
/// unless requested. The activation is applied to the convolution output.
pub struct Conv2d {
    pub size: usize,
    pub window: usize,
    pub stride: usize,
    pub padding: Padding,
    pub activation: Activation,
    pub l2_regularization: f32,
    use_bias: bool,
    template: Template,
    filters: Option<VariableId>,
    bias: Option<VariableId>,
    cache: Option<ConvCache>,
}

impl Conv2d {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: &mut VariableStore,
        scope: &str,
        size: usize,
        window: usize,
        stride: usize,
        padding: Padding,
        bias: bool,
        activation: Activation,
        l2_regularization: f32,
    ) -> Result<Self> {
        if window == 0 || stride == 0 {
            return Err(PallasError::configuration("conv2d window and stride must be positive"));
        }
        Ok(Conv2d {
            size,
            window,
            stride,
            padding,
            activation,
            l2_regularization,
            use_bias: bias,
            template: Template::new(store, scope),
            filters: None,
            bias: None,
            cache: None,
        })
    }

    fn pad_input(input: &Array4<f32>, pad: (usize, usize), padded_hw: (usize, usize)) -> Array4<f32> {
        let (batch_size, height, width, channels) = input.dim();
        let mut padded = Array4::zeros((batch_size, padded_hw.0, padded_hw.1, channels));
        padded
            .slice_mut(s![.., pad.0..pad.0 + height, pad.1..pad.1 + width, ..])
            .assign(input);
        padded
    }
}

impl Layer for Conv2d {
    fn layer_type(&self) -> &'static str {
        "conv2d"
    }

    fn apply(
        &mut self,
        store: &mut VariableStore,
        x: &Tensor,
        _internals: &[Tensor],
        _update: bool,
    ) -> Result<LayerOutput> {
        if x.ndim() != 4 {
            return Err(PallasError::invalid_rank("conv2d", 4, x.ndim()));
        }
        let input = x.view().into_dimensionality::<Ix4>()?.to_owned();
        let (batch_size, in_height, in_width, in_channels) = input.dim();
        let (window, size, use_bias) = (self.window, self.size, self.use_bias);

        let stddev = (2.0 / size as f32).sqrt().min(0.1);
        let (filters, bias) = self.template.capture(store, |vars| {
            let filters = vars.get_variable(
                "W",
                &[window, window, in_channels, size],
                &Initializer::normal(stddev),
                true,
            )?;
            let bias = if use_bias {
                Some(vars.get_variable("b", &[size], &Initializer::Zeros, true)?)
            } else {
                None
            };
            Ok((filters, bias))
        })?;
        self.filters = Some(filters);
        self.bias = bias;

        let (out_height, pad_top) = self.padding.resolve(in_height, window, self.stride)?;
        let (out_width, pad_left) = self.padding.resolve(in_width, window, self.stride)?;
        let padded_hw = (
            (in_height + 2 * pad_top).max((out_height - 1) * self.stride + window),
            (in_width + 2 * pad_left).max((out_width - 1) * self.stride + window),
        );
        let padded = Self::pad_input(&input, (pad_top, pad_left), padded_hw);

        let kernels = store.value(filters)?.view().into_dimensionality::<Ix4>()?;
        let biases = match bias {
            Some(id) => Some(store.value(id)?.view().into_dimensionality::<ndarray::Ix1>()?),
            None => None,
        };

        let mut output = Array4::<f32>::zeros((batch_size, out_height, out_width, size));
        for b in 0..batch_size {
            for oh in 0..out_height {
                for ow in 0..out_width {
                    let h_start = oh * self.stride;
                    let w_start = ow * self.stride;
                    for oc in 0..size {
                        let mut sum = 0.0;
                        for kh in 0..window {
                            for kw in 0..window {
                                for ic in 0..in_channels {
                                    sum += padded[[b, h_start + kh, w_start + kw, ic]] * kernels[[kh, kw, ic, oc]];
                                }
                            }
                        }
                        if let Some(biases) = &biases {
                            sum += biases[oc];
                        }
                        output[[b, oh, ow, oc]] = sum;
                    }
                }
            }
        }

        let pre_activation = output.into_dyn();
        let activated = self.activation.apply(&pre_activation);
        self.cache = Some(ConvCache {
            padded,
            pad: (pad_top, pad_left),
            input_hw: (in_height, in_width),
            pre_activation,
            output: activated.clone(),
        });
        Ok(LayerOutput::stateless(activated))
    }

    fn backward(&mut self, store: &VariableStore, grad_output: &Tensor, gradients: &mut Gradients) -> Result<Tensor> {
        let (cache, filters) = match (&self.cache, self.filters) {
            (Some(cache), Some(filters)) => (cache, filters),
            _ => return Err(PallasError::PreconditionViolation("conv2d backward before apply".to_string())),
        };
        let grad = self
            .activation
            .backward(&cache.pre_activation, &cache.output, grad_output)
            .into_dimensionality::<Ix4>()?;
        let kernels = store.value(filters)?.view().into_dimensionality::<Ix4>()?;
        let (batch_size, out_height, out_width, out_channels) = grad.dim();
        let in_channels = cache.padded.dim().3;

        let mut kernel_grads = Array4::<f32>::zeros(kernels.dim());
        let mut grad_padded = Array4::<f32>::zeros(cache.padded.dim());
        for b in 0..batch_size {
            for oh in 0..out_height {
                for ow in 0..out_width {
                    let h_start = oh * self.stride;
                    let w_start = ow * self.stride;
                    for oc in 0..out_channels {
                        let g = grad[[b, oh, ow, oc]];
                        if g == 0.0 {
                            continue;
                        }
                        for kh in 0..self.window {
                            for kw in 0..self.window {
                                for ic in 0..in_channels {
                                    kernel_grads[[kh, kw, ic, oc]] += cache.padded[[b, h_start + kh, w_start + kw, ic]] * g;
                                    grad_padded[[b, h_start + kh, w_start + kw, ic]] += kernels[[kh, kw, ic, oc]] * g;
                                }
                            }
                        }
                    }
                }
            }
        }

        gradients.accumulate(filters, kernel_grads.into_dyn())?;
        if let Some(bias) = self.bias {
            let bias_grads: Array1<f32> = grad.sum_axis(Axis(0)).sum_axis(Axis(0)).sum_axis(Axis(0));
            gradients.accumulate(bias, bias_grads.into_dyn())?;
        }

        let (pad_top, pad_left) = cache.pad;
        let (in_height, in_width) = cache.input_hw;
        Ok(grad_padded
            .slice(s![.., pad_top..pad_top + in_height, pad_left..pad_left + in_width, ..])
            .to_owned()
            .into_dyn())
    }

    fn regularization_loss(&self, store: &VariableStore) -> Result<Option<f32>> {
        if self.l2_regularization <= 0.0 {
            return Ok(None);
        }
        let mut total = 0.0;
        for id in self.filters.iter().chain(self.bias.iter()) {
            total += store.value(*id)?.mapv(|v| v * v).sum() / 2.0;
        }
        Ok(Some(self.l2_regularization * total))
    }

    fn regularization_backward(&self, store: &VariableStore, gradients: &mut Gradients) -> Result<()> {
        if self.l2_regularization <= 0.0 {
            return Ok(());
        }
        for id in self.filters.iter().chain(self.bias.iter()) {
            gradients.accumulate(*id, store.value(*id)? * self.l2_regularization)?;
        }
        Ok(())
    }

    fn get_variables(&self) -> Vec<VariableId> {
        self.template.get_variables()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    fn conv(store: &mut VariableStore, padding: Padding, stride: usize) -> Conv2d {
        Conv2d::new(store, "conv2d", 3, 3, stride, padding, true, Activation::Relu, 0.0).unwrap()
    }

    #[test]
    fn test_same_padding_keeps_spatial_size() {
        let mut store = VariableStore::with_seed(1);
        let mut layer = conv(&mut store, Padding::Same, 1);
        let x = Tensor::ones(IxDyn(&[2, 5, 5, 2]));
        let out = layer.apply(&mut store, &x, &[], false).unwrap();
        assert_eq!(out.output.shape(), &[2, 5, 5, 3]);
    }

    #[test]
    fn test_valid_padding_with_stride() {
        let mut store = VariableStore::with_seed(1);
        let mut layer = conv(&mut store, Padding::Valid, 2);
        let x = Tensor::ones(IxDyn(&[1, 7, 7, 1]));
        let out = layer.apply(&mut store, &x, &[], false).unwrap();
        assert_eq!(out.output.shape(), &[1, 3, 3, 3]);

        let mut gradients = Gradients::new();
        let grad_x = layer
            .backward(&store, &Tensor::ones(IxDyn(&[1, 3, 3, 3])), &mut gradients)
            .unwrap();
        assert_eq!(grad_x.shape(), x.shape());
        assert_eq!(gradients.len(), 2);
    }

    #[test]
    fn test_rejects_rank_two_input() {
        let mut store = VariableStore::new();
        let mut layer = conv(&mut store, Padding::Same, 1);
        let x = Tensor::ones(IxDyn(&[4, 3]));
        assert!(matches!(
            layer.apply(&mut store, &x, &[], false),
            Err(PallasError::InvalidInputShape { expected_rank: 4, actual_rank: 2, .. })
        ));
    }
}
