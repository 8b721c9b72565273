//! Ember: the evaluator core of a small Lisp.
//!
//! An external front end hands the [`Evaluator`](eval::Evaluator) an
//! already-resolved expression tree ([`ast::Expr`]). Evaluation uses the
//! lexical [`env::Env`] for locals and the process-wide namespace registry
//! ([`core::namespace`]) for globals, and builds persistent collections from
//! [`collections`].

pub mod ast;
pub mod collections;
pub mod config;
pub mod core;
pub mod env;
pub mod error;
pub mod eval;
pub mod interner;
pub mod runtime;
pub mod value;

pub use crate::ast::{Expr, Position};
pub use crate::config::Config;
pub use crate::env::Env;
pub use crate::error::{EvalError, EvalResult, Unwind};
pub use crate::eval::Evaluator;
pub use crate::value::Value;
