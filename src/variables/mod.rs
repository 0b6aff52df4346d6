//! # Variables and Templates
//!
//! Every stateful building block (layer, network, distribution, baseline,
//! optimizer) owns a [`Template`]: a scoped registry that records the
//! parameters a computation creates the first time it runs under the scope
//! and hands the same parameters back on every later run.
//!
//! The parameters themselves live in a [`VariableStore`] owned by the model
//! and passed by reference into construction and apply calls.
//!
//! ```rust
//! use pallas::layers::Initializer;
//! use pallas::variables::{Template, VariableStore};
//!
//! let mut store = VariableStore::new();
//! let mut template = Template::new(&mut store, "linear");
//!
//! let first = template.capture(&mut store, |vars| {
//!     vars.get_variable("W", &[4, 2], &Initializer::normal(0.1), true)
//! }).unwrap();
//! let second = template.capture(&mut store, |vars| {
//!     vars.get_variable("W", &[4, 2], &Initializer::normal(0.1), true)
//! }).unwrap();
//!
//! assert_eq!(first, second);
//! assert_eq!(store.len(), 1);
//! ```

mod store;
mod template;

pub use store::{Variable, VariableId, VariableStore};
pub use template::{Template, VariableGetter};
