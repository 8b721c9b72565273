use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use itertools::Itertools;

use crate::ast::{FnExpr, Position};
use crate::collections::{Map, Set, Vector};
use crate::core::{Namespace, Symbol, Var};
use crate::env::Env;
use crate::error::{EvalError, EvalResult};
use crate::eval::Evaluator;
use crate::interner::{self, KeywId};
use crate::runtime::StackTrace;

//===----------------------------------------------------------------------===//
// Value
//===----------------------------------------------------------------------===//

#[derive(Clone)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(Arc<str>),
    Keyword(KeywId),
    Symbol(Symbol),

    // Collections
    Vector(Vector<Value>),
    Map(Map<Value, Value>),
    Set(Set<Value>),

    Fn(Arc<Closure>),
    Native(Arc<NativeFn>),
    Namespace(Arc<Namespace>),
    Var(Arc<Var>),
    Error(Arc<ErrorValue>),
}

impl Value {
    pub fn str(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }

    pub fn keyword(name: &str) -> Self {
        Value::Keyword(interner::intern_kw(name))
    }

    /// Only `nil` and `false` are falsy.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Nil => ValueType::Nil,
            Value::Bool(_) => ValueType::Boolean,
            Value::Int(_) => ValueType::Int,
            Value::Double(_) => ValueType::Double,
            Value::Str(_) => ValueType::String,
            Value::Keyword(_) => ValueType::Keyword,
            Value::Symbol(_) => ValueType::Symbol,
            Value::Vector(_) => ValueType::Vector,
            Value::Map(_) => ValueType::Map,
            Value::Set(_) => ValueType::Set,
            Value::Fn(_) | Value::Native(_) => ValueType::Fn,
            Value::Namespace(_) => ValueType::Namespace,
            Value::Var(_) => ValueType::Var,
            Value::Error(err) => ValueType::Error(err.ty),
        }
    }

    pub fn type_name(&self) -> String {
        self.value_type().to_string()
    }

    /// The exception type of an error-shaped value.
    pub fn exception_type(&self) -> Option<ExceptionType> {
        match self {
            Value::Error(err) => Some(err.ty),
            _ => None,
        }
    }

    /// Text used by `str`: strings without quotes, nil as the empty string.
    pub fn to_text(&self) -> String {
        match self {
            Value::Nil => String::new(),
            Value::Str(s) => s.to_string(),
            other => other.to_string(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Double(a), Value::Double(b)) => {
                if a.is_nan() && b.is_nan() { true } else { a == b }
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Keyword(a), Value::Keyword(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::Vector(a), Value::Vector(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Set(a), Value::Set(b)) => a == b,
            (Value::Fn(a), Value::Fn(b)) => Arc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Arc::ptr_eq(a, b),
            (Value::Namespace(a), Value::Namespace(b)) => a.id() == b.id(),
            (Value::Var(a), Value::Var(b)) => Arc::ptr_eq(a, b),
            (Value::Error(a), Value::Error(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Nil => {}
            Value::Bool(b) => b.hash(state),
            Value::Int(i) => i.hash(state),
            Value::Double(d) => {
                // 0.0 and -0.0 compare equal, so they must hash equal too.
                let bits = if *d == 0.0 { 0 } else { d.to_bits() };
                bits.hash(state)
            }
            Value::Str(s) => s.hash(state),
            Value::Keyword(k) => k.hash(state),
            Value::Symbol(s) => s.hash(state),
            Value::Vector(v) => v.hash(state),
            Value::Map(m) => m.hash(state),
            Value::Set(s) => s.hash(state),
            Value::Fn(f) => (Arc::as_ptr(f) as usize).hash(state),
            Value::Native(f) => (Arc::as_ptr(f) as usize).hash(state),
            Value::Namespace(ns) => ns.id().hash(state),
            Value::Var(var) => (Arc::as_ptr(var) as usize).hash(state),
            Value::Error(err) => (Arc::as_ptr(err) as usize).hash(state),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Double(d) => write!(f, "{:?}", d),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Keyword(k) => write!(f, ":{}", interner::kw_to_str(*k)),
            Value::Symbol(s) => write!(f, "{}", s),
            Value::Vector(v) => write!(f, "[{}]", v.iter().join(" ")),
            Value::Map(m) => {
                write!(f, "{{{}}}", m.iter().map(|(k, v)| format!("{} {}", k, v)).join(", "))
            }
            Value::Set(s) => write!(f, "#{{{}}}", s.iter().join(" ")),
            Value::Fn(closure) => write!(f, "#<fn {}>", closure.name()),
            Value::Native(native) => write!(f, "#<native {}>", native.name),
            Value::Namespace(ns) => write!(f, "#<namespace {}>", ns.name()),
            Value::Var(var) => write!(f, "{}", var),
            Value::Error(err) => write!(f, "#<{} {}>", err.ty, err.message),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::str(s)
    }
}

//===----------------------------------------------------------------------===//
// Types
//===----------------------------------------------------------------------===//

/// Exception types, ordered in a single-inheritance hierarchy rooted at
/// `Throwable`. Catch clauses match with [`ExceptionType::is_a`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExceptionType {
    Throwable,
    Error,
    EvalError,
    ExInfo,
    ArityError,
    TypeError,
    IndexError,
}

impl ExceptionType {
    pub fn parent(self) -> Option<ExceptionType> {
        match self {
            ExceptionType::Throwable => None,
            ExceptionType::Error => Some(ExceptionType::Throwable),
            ExceptionType::EvalError | ExceptionType::ExInfo => Some(ExceptionType::Error),
            ExceptionType::ArityError
            | ExceptionType::TypeError
            | ExceptionType::IndexError => Some(ExceptionType::EvalError),
        }
    }

    /// Instance-of test: true when `self` is `other` or descends from it.
    pub fn is_a(self, other: ExceptionType) -> bool {
        let mut current = Some(self);
        while let Some(ty) = current {
            if ty == other {
                return true;
            }
            current = ty.parent();
        }
        false
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let ty = match name {
            "Throwable" => ExceptionType::Throwable,
            "Error" => ExceptionType::Error,
            "EvalError" => ExceptionType::EvalError,
            "ExInfo" => ExceptionType::ExInfo,
            "ArityError" => ExceptionType::ArityError,
            "TypeError" => ExceptionType::TypeError,
            "IndexError" => ExceptionType::IndexError,
            _ => return None,
        };
        Some(ty)
    }
}

impl fmt::Display for ExceptionType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Runtime type of a value, also used as the `:tag` constraint of a var.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Nil,
    Boolean,
    Int,
    Double,
    String,
    Keyword,
    Symbol,
    Vector,
    Map,
    Set,
    Fn,
    Namespace,
    Var,
    Error(ExceptionType),
}

impl ValueType {
    pub fn from_name(name: &str) -> Option<Self> {
        let ty = match name {
            "Nil" => ValueType::Nil,
            "Boolean" => ValueType::Boolean,
            "Int" => ValueType::Int,
            "Double" => ValueType::Double,
            "String" => ValueType::String,
            "Keyword" => ValueType::Keyword,
            "Symbol" => ValueType::Symbol,
            "Vector" => ValueType::Vector,
            "Map" => ValueType::Map,
            "Set" => ValueType::Set,
            "Fn" => ValueType::Fn,
            "Namespace" => ValueType::Namespace,
            "Var" => ValueType::Var,
            other => return ExceptionType::from_name(other).map(ValueType::Error),
        };
        Some(ty)
    }

    /// Whether a value of this runtime type may be stored under this tag.
    pub fn accepts(self, value: &Value) -> bool {
        match (self, value.value_type()) {
            (ValueType::Error(expected), ValueType::Error(actual)) => actual.is_a(expected),
            (expected, actual) => expected == actual,
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ValueType::Error(ty) => write!(f, "{}", ty),
            other => fmt::Debug::fmt(other, f),
        }
    }
}

//===----------------------------------------------------------------------===//
// Error values
//===----------------------------------------------------------------------===//

/// An error-shaped value: what `throw` accepts and what `catch` binds.
#[derive(Debug, Clone)]
pub struct ErrorValue {
    pub ty: ExceptionType,
    pub message: String,
    pub data: Option<Map<Value, Value>>,
    pub position: Option<Position>,
    pub trace: StackTrace,
}

impl ErrorValue {
    pub fn new(ty: ExceptionType, message: impl Into<String>) -> Self {
        Self {
            ty,
            message: message.into(),
            data: None,
            position: None,
            trace: StackTrace::default(),
        }
    }

    pub fn with_data(mut self, data: Map<Value, Value>) -> Self {
        self.data = Some(data);
        self
    }
}

impl From<&EvalError> for ErrorValue {
    fn from(err: &EvalError) -> Self {
        Self {
            ty: err.kind,
            message: err.message.clone(),
            data: None,
            position: err.position.clone(),
            trace: err.trace.clone(),
        }
    }
}

//===----------------------------------------------------------------------===//
// Functions
//===----------------------------------------------------------------------===//

/// A function value: the `fn` node plus the lexical environment it was
/// created in, captured by reference.
pub struct Closure {
    pub expr: Arc<FnExpr>,
    pub env: Env,
    name: Arc<str>,
}

impl Closure {
    pub fn new(expr: Arc<FnExpr>, env: Env) -> Self {
        let name = match &expr.name {
            Some(sym) => Arc::from(sym.to_string().as_str()),
            None => Arc::from("fn"),
        };
        Self { expr, env, name }
    }

    pub fn name(&self) -> &Arc<str> {
        &self.name
    }
}

pub type NativeFnPtr = fn(&Evaluator, &[Value]) -> EvalResult<Value>;

pub struct NativeFn {
    pub name: Arc<str>,
    pub f: NativeFnPtr,
}

impl NativeFn {
    pub fn new(name: &str, f: NativeFnPtr) -> Self {
        Self { name: Arc::from(name), f }
    }
}
