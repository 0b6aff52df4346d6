use ndarray::{concatenate, s, stack, Array2, Axis, Ix2, Ix3};

use super::initialization::Initializer;
use super::traits::{Layer, LayerOutput};
use crate::error::{PallasError, Result};
use crate::optimizer::Gradients;
use crate::types::{describe_shape, zeros, Tensor};
use crate::variables::{Template, VariableId, VariableStore};

const FORGET_BIAS: f32 = 1.0;

#[derive(Clone)]
struct LstmCache {
    concat: Array2<f32>,
    cell_prev: Array2<f32>,
    input_gate: Array2<f32>,
    cell_gate: Array2<f32>,
    forget_gate: Array2<f32>,
    output_gate: Array2<f32>,
    cell_tanh: Array2<f32>,
}

fn sigmoid(v: f32) -> f32 {
    1.0 / (1.0 + (-v).exp())
}

/// LSTM (Long Short-Term Memory) cell advancing one timestep per `apply`.
///
/// Carries a single internal slot of shape `(2, size)` holding the cell and
/// hidden state. Gates are computed from `[x, h] W + b` with `W` of shape
/// `(input + size, 4 * size)`, in the order input, candidate, forget, output.
/// The reverse pass treats the incoming state as a constant.
pub struct Lstm {
    pub size: usize,
    template: Template,
    weights: Option<VariableId>,
    bias: Option<VariableId>,
    cache: Option<LstmCache>,
}

impl Lstm {
    pub fn new(store: &mut VariableStore, scope: &str, size: usize) -> Self {
        Lstm {
            size,
            template: Template::new(store, scope),
            weights: None,
            bias: None,
            cache: None,
        }
    }
}

impl Layer for Lstm {
    fn layer_type(&self) -> &'static str {
        "lstm"
    }

    fn apply(
        &mut self,
        store: &mut VariableStore,
        x: &Tensor,
        internals: &[Tensor],
        _update: bool,
    ) -> Result<LayerOutput> {
        if x.ndim() != 2 {
            return Err(PallasError::invalid_rank("lstm", 2, x.ndim()));
        }
        let state = match internals {
            [state] => state.view().into_dimensionality::<Ix3>()?,
            _ => {
                return Err(PallasError::shape_mismatch(
                    "1 internal state".to_string(),
                    format!("{} internal states", internals.len()),
                ))
            }
        };
        let x = x.view().into_dimensionality::<Ix2>()?;
        let (batch_size, input_size) = x.dim();
        let size = self.size;
        if state.dim() != (batch_size, 2, size) {
            return Err(PallasError::shape_mismatch(
                describe_shape(&[batch_size, 2, size]),
                describe_shape(state.shape()),
            ));
        }

        let (weights, bias) = self.template.capture(store, |vars| {
            let weights = vars.get_variable(
                "W",
                &[input_size + size, 4 * size],
                &Initializer::for_linear(input_size + size, 4 * size),
                true,
            )?;
            let bias = vars.get_variable("b", &[4 * size], &Initializer::Zeros, true)?;
            Ok((weights, bias))
        })?;
        self.weights = Some(weights);
        self.bias = Some(bias);

        let cell_prev = state.slice(s![.., 0, ..]).to_owned();
        let hidden_prev = state.slice(s![.., 1, ..]);
        let concat = concatenate(Axis(1), &[x.view(), hidden_prev])?;

        let w = store.value(weights)?.view().into_dimensionality::<Ix2>()?;
        let mut z = concat.dot(&w);
        z += store.value(bias)?;
        let input_gate = z.slice(s![.., 0..size]).mapv(sigmoid);
        let cell_gate = z.slice(s![.., size..2 * size]).mapv(f32::tanh);
        let forget_gate = z.slice(s![.., 2 * size..3 * size]).mapv(|v| sigmoid(v + FORGET_BIAS));
        let output_gate = z.slice(s![.., 3 * size..4 * size]).mapv(sigmoid);

        let cell = &forget_gate * &cell_prev + &input_gate * &cell_gate;
        let cell_tanh = cell.mapv(f32::tanh);
        let hidden = &output_gate * &cell_tanh;

        let internal = stack(Axis(1), &[cell.view(), hidden.view()])?;
        self.cache = Some(LstmCache {
            concat,
            cell_prev,
            input_gate,
            cell_gate,
            forget_gate,
            output_gate,
            cell_tanh,
        });
        Ok(LayerOutput {
            output: hidden.into_dyn(),
            internals: vec![internal.into_dyn()],
        })
    }

    fn backward(&mut self, store: &VariableStore, grad_output: &Tensor, gradients: &mut Gradients) -> Result<Tensor> {
        let (cache, weights, bias) = match (&self.cache, self.weights, self.bias) {
            (Some(cache), Some(weights), Some(bias)) => (cache, weights, bias),
            _ => return Err(PallasError::PreconditionViolation("lstm backward before apply".to_string())),
        };
        let grad_hidden = grad_output.view().into_dimensionality::<Ix2>()?;

        let grad_output_gate = &grad_hidden * &cache.cell_tanh;
        let grad_cell = &grad_hidden * &cache.output_gate * &cache.cell_tanh.mapv(|t| 1.0 - t * t);

        let dz_input = &grad_cell * &cache.cell_gate * &cache.input_gate.mapv(|s| s * (1.0 - s));
        let dz_cell = &grad_cell * &cache.input_gate * &cache.cell_gate.mapv(|g| 1.0 - g * g);
        let dz_forget = &grad_cell * &cache.cell_prev * &cache.forget_gate.mapv(|s| s * (1.0 - s));
        let dz_output = &grad_output_gate * &cache.output_gate.mapv(|s| s * (1.0 - s));
        let dz = concatenate(
            Axis(1),
            &[dz_input.view(), dz_cell.view(), dz_forget.view(), dz_output.view()],
        )?;

        let w = store.value(weights)?.view().into_dimensionality::<Ix2>()?;
        gradients.accumulate(weights, cache.concat.t().dot(&dz).into_dyn())?;
        gradients.accumulate(bias, dz.sum_axis(Axis(0)).into_dyn())?;

        let grad_concat = dz.dot(&w.t());
        let input_size = cache.concat.ncols() - self.size;
        Ok(grad_concat.slice(s![.., 0..input_size]).to_owned().into_dyn())
    }

    fn num_internals(&self) -> usize {
        1
    }

    fn internal_inputs(&self) -> Vec<Vec<usize>> {
        vec![vec![2, self.size]]
    }

    fn internal_inits(&self) -> Vec<Tensor> {
        vec![zeros(&[2, self.size])]
    }

    fn get_variables(&self) -> Vec<VariableId> {
        self.template.get_variables()
    }
}
