//! Language-specific functionality: symbols, vars, namespaces and the
//! native functions of the core namespace.

pub mod namespace;
pub mod native_fns;
pub mod symbol;
pub mod var;

pub use namespace::{InternMode, Namespace, NamespaceRegistry};
pub use symbol::Symbol;
pub use var::Var;
