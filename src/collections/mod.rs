//! Immutable collection types used by the evaluator.

pub mod map;
pub mod set;
pub mod vector;

pub use map::Map;
pub use set::Set;
pub use vector::{Indexed, Vector, VectorError};
