//! Machine assembly and structural validation.
//!
//! A [`Machine`] is built once from its states, checked for every structural
//! defect at construction, and then shared immutably between interpreters.

pub mod error;
pub mod machine;
pub mod macros;

pub use error::{BuildError, Defect};
pub use machine::Machine;
