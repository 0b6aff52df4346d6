use crate::error::{PallasError, Result};
use crate::types::{describe_shape, Tensor};

/// Trait defining the interface for loss functions
pub trait Loss: Send + Sync {
    /// Compute the loss of predictions against targets
    fn compute(&self, prediction: &Tensor, target: &Tensor) -> Result<f32>;

    /// Compute the gradient of the loss with respect to predictions
    fn gradient(&self, prediction: &Tensor, target: &Tensor) -> Result<Tensor>;
}

fn check_shapes(prediction: &Tensor, target: &Tensor) -> Result<()> {
    if prediction.shape() != target.shape() {
        return Err(PallasError::shape_mismatch(
            describe_shape(target.shape()),
            describe_shape(prediction.shape()),
        ));
    }
    Ok(())
}

/// Half sum of squared differences, `0.5 * sum((prediction - target)^2)`.
///
/// Non-negative, and zero exactly when prediction equals target elementwise.
#[derive(Clone, Copy, Debug, Default)]
pub struct L2Loss;

impl Loss for L2Loss {
    fn compute(&self, prediction: &Tensor, target: &Tensor) -> Result<f32> {
        check_shapes(prediction, target)?;
        Ok(prediction
            .iter()
            .zip(target.iter())
            .map(|(&p, &t)| (p - t) * (p - t))
            .sum::<f32>()
            * 0.5)
    }

    fn gradient(&self, prediction: &Tensor, target: &Tensor) -> Result<Tensor> {
        check_shapes(prediction, target)?;
        Ok(prediction - target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_l2_zero_iff_equal() {
        let a = array![1.0, 2.0, 3.0].into_dyn();
        assert_eq!(L2Loss.compute(&a, &a).unwrap(), 0.0);

        let b = array![1.0, 2.0, 4.0].into_dyn();
        assert_eq!(L2Loss.compute(&a, &b).unwrap(), 0.5);
        assert_eq!(L2Loss.gradient(&a, &b).unwrap(), array![0.0, 0.0, -1.0].into_dyn());
    }

    #[test]
    fn test_shape_mismatch() {
        let a = array![1.0].into_dyn();
        let b = array![1.0, 2.0].into_dyn();
        assert!(L2Loss.compute(&a, &b).is_err());
    }
}
