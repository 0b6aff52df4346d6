//! Loss functions used by the critic and baseline updates.

pub mod functions;

pub use functions::{L2Loss, Loss};
