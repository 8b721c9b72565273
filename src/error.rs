use std::fmt;

use colored::Colorize;
use thiserror::Error;

use crate::ast::Position;
use crate::runtime::StackTrace;
use crate::value::{ExceptionType, Value};

//===----------------------------------------------------------------------===//
// EvalError
//===----------------------------------------------------------------------===//

/// A malformed or impossible operation detected during evaluation.
///
/// The trace is a snapshot taken when the error was built; later changes to
/// the live call stack do not affect it.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct EvalError {
    pub kind: ExceptionType,
    pub message: String,
    pub position: Option<Position>,
    pub trace: StackTrace,
}

//===----------------------------------------------------------------------===//
// ResolveError
//===----------------------------------------------------------------------===//

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("Can't intern namespace-qualified symbol {0}")]
    QualifiedIntern(String),
    #[error("{name} already refers to: {existing} in namespace {ns}")]
    Collision { name: String, existing: String, ns: String },
    #[error("Alias {alias} already exists in namespace {ns}, aliasing {existing} (requested {requested})")]
    AliasConflict { alias: String, ns: String, existing: String, requested: String },
    #[error("Cannot remove core namespace {0}")]
    ProtectedNamespace(String),
    #[error("No namespace found: {0}")]
    UnknownNamespace(String),
    #[error("Namespace name must not be qualified: {0}")]
    QualifiedNamespaceName(String),
}

//===----------------------------------------------------------------------===//
// InternalError
//===----------------------------------------------------------------------===//

/// Invariant violations. Well-formed expression trees never produce these;
/// they point at a bug in whatever built the tree.
#[derive(Debug, Clone, Error)]
pub enum InternalError {
    #[error("recur escaped its loop at {0}")]
    RecurEscaped(Position),
    #[error("no local binding at depth {depth}, index {index} ({position})")]
    BadBinding { depth: usize, index: usize, position: Position },
}

//===----------------------------------------------------------------------===//
// Unwind
//===----------------------------------------------------------------------===//

/// A value raised by `throw`.
#[derive(Debug, Clone)]
pub struct Thrown {
    pub value: Value,
    pub position: Option<Position>,
    pub trace: StackTrace,
}

/// The single unwind channel shared by evaluation errors, thrown values and
/// internal errors.
#[derive(Debug, Clone, Error)]
pub enum Unwind {
    #[error(transparent)]
    Error(#[from] EvalError),
    #[error("Uncaught exception: {}", .0.value)]
    Thrown(Thrown),
    #[error("Internal error: {0}")]
    Internal(#[from] InternalError),
}

pub type EvalResult<T> = Result<T, Unwind>;

impl Unwind {
    /// True for internal invariant violations, as opposed to errors a
    /// program can cause and handle.
    pub fn is_internal(&self) -> bool {
        matches!(self, Unwind::Internal(_))
    }

    pub fn position(&self) -> Option<&Position> {
        match self {
            Unwind::Error(err) => err.position.as_ref(),
            Unwind::Thrown(thrown) => thrown.position.as_ref(),
            Unwind::Internal(_) => None,
        }
    }

    pub fn trace(&self) -> Option<&StackTrace> {
        match self {
            Unwind::Error(err) => Some(&err.trace),
            Unwind::Thrown(thrown) => Some(&thrown.trace),
            Unwind::Internal(_) => None,
        }
    }

    /// Multi-line report: position, message and stack trace.
    pub fn report(&self) -> String {
        Report(self).to_string()
    }
}

struct Report<'a>(&'a Unwind);

impl fmt::Display for Report<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unwind = self.0;
        let label = match unwind {
            Unwind::Error(err) => format!("{}", err.kind).red().bold(),
            Unwind::Thrown(_) => "Exception".red().bold(),
            Unwind::Internal(_) => "Internal error".magenta().bold(),
        };
        match unwind.position() {
            Some(pos) => writeln!(f, "{} {}: {}", pos.to_string().cyan(), label, message(unwind))?,
            None => writeln!(f, "{}: {}", label, message(unwind))?,
        }
        if let Some(trace) = unwind.trace() {
            write!(f, "{}", trace)?;
        }
        Ok(())
    }
}

fn message(unwind: &Unwind) -> String {
    match unwind {
        Unwind::Error(err) => err.message.clone(),
        Unwind::Thrown(Thrown { value: Value::Error(err), .. }) => err.message.clone(),
        Unwind::Thrown(thrown) => thrown.value.to_string(),
        Unwind::Internal(err) => err.to_string(),
    }
}
