//! # Activation Functions Module
//!
//! Elementwise nonlinearities used by the `nonlinearity`, `dense` and
//! `conv2d` layers, together with their reverse passes.
//!
//! ## Available Activations
//!
//! - **ReLU**: `max(0, x)`
//! - **ELU** / **SELU**: exponential linear units (SELU self-normalising)
//! - **Sigmoid**: `1 / (1 + e^(-x))`
//! - **Softmax**: normalised exponentials over the last axis
//! - **Softplus**: `log(1 + e^x)`
//! - **Tanh**: hyperbolic tangent, outputs between -1 and 1
//! - **Linear**: identity
//!
//! ## Usage Example
//!
//! ```rust
//! use pallas::activations::Activation;
//! use ndarray::array;
//!
//! let x = array![[1.0, -0.5, 0.0, 2.0]].into_dyn();
//! let y = Activation::Relu.apply(&x);
//! assert_eq!(y[[0, 1]], 0.0);
//! ```

pub mod functions;

pub use functions::Activation;
