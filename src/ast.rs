//! Expression tree consumed by the evaluator.
//!
//! Trees are produced by a front end that has already resolved every free
//! symbol: global references carry their [`Var`], local references carry the
//! `(depth, index)` of their frame slot. The builder functions on [`Expr`]
//! exist for such front ends and for tests.

use std::fmt;
use std::sync::Arc;

use crate::core::{Symbol, Var};
use crate::value::{ExceptionType, Value};

//===----------------------------------------------------------------------===//
// Position
//===----------------------------------------------------------------------===//

#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Position {
    pub file: Option<Arc<str>>,
    pub start_line: u32,
    pub start_column: u32,
    pub end_line: u32,
    pub end_column: u32,
}

impl Position {
    pub fn new(line: u32, column: u32) -> Self {
        Self { file: None, start_line: line, start_column: column, end_line: line, end_column: column }
    }

    pub fn in_file(mut self, file: &str) -> Self {
        self.file = Some(Arc::from(file));
        self
    }

    pub fn to(mut self, end_line: u32, end_column: u32) -> Self {
        self.end_line = end_line;
        self.end_column = end_column;
        self
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let file = self.file.as_deref().unwrap_or("<repl>");
        write!(f, "{}:{}:{}", file, self.start_line, self.start_column)
    }
}

//===----------------------------------------------------------------------===//
// Expr
//===----------------------------------------------------------------------===//

#[derive(Debug, Clone)]
pub struct Expr {
    pub pos: Position,
    pub kind: ExprKind,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Literal(Value),
    Vector(Vec<Expr>),
    Map(Vec<(Expr, Expr)>),
    Set(Vec<Expr>),
    /// Global reference, resolved ahead of evaluation.
    Var(Arc<Var>),
    /// Lexical reference: `depth` frames up, slot `index`.
    Local { name: Symbol, depth: usize, index: usize },
    If { cond: Box<Expr>, then: Box<Expr>, otherwise: Option<Box<Expr>> },
    Do(Vec<Expr>),
    Let { bindings: Vec<(Symbol, Expr)>, body: Vec<Expr> },
    Loop { bindings: Vec<(Symbol, Expr)>, body: Vec<Expr> },
    Recur(Vec<Expr>),
    Fn(Arc<FnExpr>),
    Call { callee: Box<Expr>, args: Vec<Expr> },
    Def(Box<DefExpr>),
    Throw(Box<Expr>),
    Try(Box<TryExpr>),
    SetBang { target: Box<Expr>, value: Box<Expr> },
}

/// `(fn name? ([params*] body*)+)`
///
/// Each arity's parameters occupy one frame; a variadic arity binds its rest
/// arguments as a vector in the last slot. A named fn sees itself one frame
/// above its parameters, at slot 0.
#[derive(Debug, Clone)]
pub struct FnExpr {
    pub name: Option<Symbol>,
    pub arities: Vec<FnArity>,
}

#[derive(Debug, Clone)]
pub struct FnArity {
    pub params: Vec<Symbol>,
    pub variadic: bool,
    pub body: Vec<Expr>,
}

impl FnArity {
    /// Number of required arguments.
    pub fn required(&self) -> usize {
        if self.variadic { self.params.len().saturating_sub(1) } else { self.params.len() }
    }
}

impl FnExpr {
    /// Picks the arity for `argc` arguments: an exact fixed arity first, then a
    /// variadic one.
    pub fn arity_for(&self, argc: usize) -> Option<&FnArity> {
        self.arities
            .iter()
            .find(|arity| !arity.variadic && arity.params.len() == argc)
            .or_else(|| self.arities.iter().find(|arity| arity.variadic && arity.required() <= argc))
    }
}

#[derive(Debug, Clone)]
pub struct DefExpr {
    pub name: Symbol,
    pub value: Option<Expr>,
    /// Map expression merged into the var's metadata.
    pub meta: Option<Expr>,
}

#[derive(Debug, Clone)]
pub struct TryExpr {
    pub body: Vec<Expr>,
    pub catches: Vec<CatchClause>,
    pub finally: Option<Vec<Expr>>,
}

/// `(catch Type binding body*)`. The caught value is slot 0 of a new frame.
#[derive(Debug, Clone)]
pub struct CatchClause {
    pub ty: ExceptionType,
    pub binding: Symbol,
    pub body: Vec<Expr>,
    pub pos: Position,
}

//===----------------------------------------------------------------------===//
// Builders
//===----------------------------------------------------------------------===//

impl Expr {
    pub fn new(kind: ExprKind) -> Self {
        Self { pos: Position::new(1, 1), kind }
    }

    /// Replaces the node's position.
    pub fn at(mut self, pos: Position) -> Self {
        self.pos = pos;
        self
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Self::new(ExprKind::Literal(value.into()))
    }

    pub fn nil() -> Self {
        Self::new(ExprKind::Literal(Value::Nil))
    }

    pub fn keyword(name: &str) -> Self {
        Self::new(ExprKind::Literal(Value::keyword(name)))
    }

    pub fn vector(items: Vec<Expr>) -> Self {
        Self::new(ExprKind::Vector(items))
    }

    pub fn map(entries: Vec<(Expr, Expr)>) -> Self {
        Self::new(ExprKind::Map(entries))
    }

    pub fn set(items: Vec<Expr>) -> Self {
        Self::new(ExprKind::Set(items))
    }

    pub fn var(var: Arc<Var>) -> Self {
        Self::new(ExprKind::Var(var))
    }

    pub fn local(name: &str, depth: usize, index: usize) -> Self {
        Self::new(ExprKind::Local { name: Symbol::new(name), depth, index })
    }

    pub fn if_(cond: Expr, then: Expr, otherwise: Option<Expr>) -> Self {
        Self::new(ExprKind::If {
            cond: Box::new(cond),
            then: Box::new(then),
            otherwise: otherwise.map(Box::new),
        })
    }

    pub fn do_(body: Vec<Expr>) -> Self {
        Self::new(ExprKind::Do(body))
    }

    pub fn let_(bindings: Vec<(&str, Expr)>, body: Vec<Expr>) -> Self {
        Self::new(ExprKind::Let { bindings: named(bindings), body })
    }

    pub fn loop_(bindings: Vec<(&str, Expr)>, body: Vec<Expr>) -> Self {
        Self::new(ExprKind::Loop { bindings: named(bindings), body })
    }

    pub fn recur(args: Vec<Expr>) -> Self {
        Self::new(ExprKind::Recur(args))
    }

    pub fn fn_(name: Option<&str>, arities: Vec<FnArity>) -> Self {
        Self::new(ExprKind::Fn(Arc::new(FnExpr { name: name.map(Symbol::new), arities })))
    }

    pub fn call(callee: Expr, args: Vec<Expr>) -> Self {
        Self::new(ExprKind::Call { callee: Box::new(callee), args })
    }

    pub fn def(name: &str, value: Option<Expr>) -> Self {
        Self::new(ExprKind::Def(Box::new(DefExpr { name: Symbol::new(name), value, meta: None })))
    }

    pub fn def_with_meta(name: &str, value: Option<Expr>, meta: Expr) -> Self {
        Self::new(ExprKind::Def(Box::new(DefExpr {
            name: Symbol::new(name),
            value,
            meta: Some(meta),
        })))
    }

    pub fn throw(value: Expr) -> Self {
        Self::new(ExprKind::Throw(Box::new(value)))
    }

    pub fn try_(body: Vec<Expr>, catches: Vec<CatchClause>, finally: Option<Vec<Expr>>) -> Self {
        Self::new(ExprKind::Try(Box::new(TryExpr { body, catches, finally })))
    }

    pub fn set_bang(target: Expr, value: Expr) -> Self {
        Self::new(ExprKind::SetBang { target: Box::new(target), value: Box::new(value) })
    }
}

impl FnArity {
    pub fn fixed(params: &[&str], body: Vec<Expr>) -> Self {
        Self { params: params.iter().map(|p| Symbol::new(p)).collect(), variadic: false, body }
    }

    /// The last parameter collects the remaining arguments.
    pub fn variadic(params: &[&str], body: Vec<Expr>) -> Self {
        Self { params: params.iter().map(|p| Symbol::new(p)).collect(), variadic: true, body }
    }
}

impl CatchClause {
    pub fn new(ty: ExceptionType, binding: &str, body: Vec<Expr>) -> Self {
        Self { ty, binding: Symbol::new(binding), body, pos: Position::new(1, 1) }
    }
}

fn named(bindings: Vec<(&str, Expr)>) -> Vec<(Symbol, Expr)> {
    bindings.into_iter().map(|(name, expr)| (Symbol::new(name), expr)).collect()
}
