use std::convert::TryFrom;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::collections::{Map, Vector, VectorError};
use crate::core::namespace::{self, Namespace};
use crate::core::Symbol;
use crate::error::{EvalResult, Unwind};
use crate::eval::Evaluator;
use crate::runtime;
use crate::value::{ErrorValue, ExceptionType, NativeFn, NativeFnPtr, Value};

//===----------------------------------------------------------------------===//
// Native Functions
//===----------------------------------------------------------------------===//

const NATIVES: &[(&str, NativeFnPtr)] = &[
    ("=", equals as NativeFnPtr),
    ("<", less_than as NativeFnPtr),
    ("+", add as NativeFnPtr),
    ("-", subtract as NativeFnPtr),
    ("inc", inc as NativeFnPtr),
    ("dec", dec as NativeFnPtr),
    ("not", not as NativeFnPtr),
    ("nil?", is_nil as NativeFnPtr),
    ("count", count as NativeFnPtr),
    ("conj", conj as NativeFnPtr),
    ("nth", nth as NativeFnPtr),
    ("assoc", assoc as NativeFnPtr),
    ("pop", pop as NativeFnPtr),
    ("vector", vector as NativeFnPtr),
    ("str", stringify as NativeFnPtr),
    ("ex-info", ex_info as NativeFnPtr),
    ("ex-message", ex_message as NativeFnPtr),
    ("ex-data", ex_data as NativeFnPtr),
    ("in-ns", in_ns as NativeFnPtr),
    ("ns", in_ns as NativeFnPtr),
    ("sleep", sleep as NativeFnPtr),
];

/// Interns and binds every native function in `ns`.
pub fn install(ns: &Namespace) {
    for (name, f) in NATIVES {
        match ns.intern(&Symbol::new(name)) {
            Ok(var) => var.bind(Value::Native(Arc::new(NativeFn::new(name, *f)))),
            Err(err) => log::error!("cannot install native {}: {}", name, err),
        }
    }
}

/// `(= x & more)`: true when all arguments are equal.
pub fn equals(eval: &Evaluator, args: &[Value]) -> EvalResult<Value> {
    check_arity(eval, "=", args, 1, None)?;
    Ok(Value::Bool(args.windows(2).all(|pair| pair[0] == pair[1])))
}

/// `(< x & more)`: true when the numbers are strictly increasing.
pub fn less_than(eval: &Evaluator, args: &[Value]) -> EvalResult<Value> {
    check_arity(eval, "<", args, 1, None)?;
    for pair in args.windows(2) {
        let ordered = match (&pair[0], &pair[1]) {
            (Value::Int(a), Value::Int(b)) => a < b,
            (a, b) => number(eval, a)? < number(eval, b)?,
        };
        if !ordered {
            return Ok(Value::Bool(false));
        }
    }
    // Single non-numeric arguments are still type errors.
    number(eval, &args[0])?;
    Ok(Value::Bool(true))
}

/// `(+ & xs)`: sum. Integer overflow is an error; any Double argument makes
/// the result a Double.
pub fn add(eval: &Evaluator, args: &[Value]) -> EvalResult<Value> {
    args.iter().try_fold(Value::Int(0), |acc, x| arith(eval, &acc, x, "+", i64::checked_add, |a, b| a + b))
}

/// `(- x & xs)`: negation with one argument, subtraction otherwise.
pub fn subtract(eval: &Evaluator, args: &[Value]) -> EvalResult<Value> {
    check_arity(eval, "-", args, 1, None)?;
    let (first, rest) = args.split_at(1);
    if rest.is_empty() {
        return arith(eval, &Value::Int(0), &first[0], "-", i64::checked_sub, |a, b| a - b);
    }
    rest.iter()
        .try_fold(first[0].clone(), |acc, x| arith(eval, &acc, x, "-", i64::checked_sub, |a, b| a - b))
}

pub fn inc(eval: &Evaluator, args: &[Value]) -> EvalResult<Value> {
    check_arity(eval, "inc", args, 1, Some(1))?;
    arith(eval, &args[0], &Value::Int(1), "+", i64::checked_add, |a, b| a + b)
}

pub fn dec(eval: &Evaluator, args: &[Value]) -> EvalResult<Value> {
    check_arity(eval, "dec", args, 1, Some(1))?;
    arith(eval, &args[0], &Value::Int(1), "-", i64::checked_sub, |a, b| a - b)
}

pub fn not(eval: &Evaluator, args: &[Value]) -> EvalResult<Value> {
    check_arity(eval, "not", args, 1, Some(1))?;
    Ok(Value::Bool(!args[0].is_truthy()))
}

pub fn is_nil(eval: &Evaluator, args: &[Value]) -> EvalResult<Value> {
    check_arity(eval, "nil?", args, 1, Some(1))?;
    Ok(Value::Bool(args[0].is_nil()))
}

/// `(count coll)`: number of elements. Nil counts as zero, strings count
/// code points.
pub fn count(eval: &Evaluator, args: &[Value]) -> EvalResult<Value> {
    check_arity(eval, "count", args, 1, Some(1))?;
    let len = match &args[0] {
        Value::Nil => 0,
        Value::Vector(vector) => vector.len(),
        Value::Map(map) => map.len(),
        Value::Set(set) => set.len(),
        Value::Str(s) => s.chars().count(),
        other => return Err(type_error(eval, "count", "Collection", other)),
    };
    i64::try_from(len)
        .map(Value::Int)
        .map_err(|_| eval.error("collection length exceeds supported range"))
}

/// `(conj coll & items)`: adds items to a collection.
///
/// * Vectors (and nil) append.
/// * Sets insert.
/// * Maps take `[k v]` vector entries.
pub fn conj(eval: &Evaluator, args: &[Value]) -> EvalResult<Value> {
    check_arity(eval, "conj", args, 1, None)?;
    let (first, items) = args.split_at(1);
    match &first[0] {
        Value::Nil => Ok(Value::Vector(items.iter().cloned().collect())),
        Value::Vector(vector) => {
            Ok(Value::Vector(items.iter().fold(vector.clone(), |v, item| v.append(item.clone()))))
        }
        Value::Set(set) => {
            Ok(Value::Set(items.iter().fold(set.clone(), |s, item| s.insert(item.clone()))))
        }
        Value::Map(map) => {
            let mut map = map.clone();
            for item in items {
                match item {
                    Value::Vector(entry) if entry.len() == 2 => {
                        map = map.insert(entry[0].clone(), entry[1].clone());
                    }
                    other => return Err(type_error(eval, "conj", "[key value] entry", other)),
                }
            }
            Ok(Value::Map(map))
        }
        other => Err(type_error(eval, "conj", "Collection", other)),
    }
}

/// `(nth vector index default?)`: element at `index`. Without a default an
/// out-of-range index is an `IndexError`.
pub fn nth(eval: &Evaluator, args: &[Value]) -> EvalResult<Value> {
    check_arity(eval, "nth", args, 2, Some(3))?;
    let Value::Vector(vector) = &args[0] else {
        return Err(type_error(eval, "nth", "Vector", &args[0]));
    };
    match (eval.vector_at(vector, &args[1]), args.get(2)) {
        (Ok(value), _) => Ok(value),
        (Err(_), Some(default)) if matches!(args[1], Value::Int(_)) => Ok(default.clone()),
        (Err(err), _) => Err(err),
    }
}

/// `(assoc coll key value & kvs)`: on vectors the key is an index, and an
/// index equal to the count appends.
pub fn assoc(eval: &Evaluator, args: &[Value]) -> EvalResult<Value> {
    if args.len() < 3 || args.len() % 2 == 0 {
        return Err(eval.arity_error("assoc", args.len()));
    }
    let (first, kvs) = args.split_at(1);
    match &first[0] {
        Value::Vector(vector) => {
            let mut vector = vector.clone();
            for kv in kvs.chunks(2) {
                let index = to_index(eval, "assoc", &kv[0])?;
                vector = vector.assoc_at(index, kv[1].clone()).map_err(|err| vector_error(eval, err))?;
            }
            Ok(Value::Vector(vector))
        }
        Value::Map(_) | Value::Nil => {
            let mut map = match &first[0] {
                Value::Map(map) => map.clone(),
                _ => Map::new(),
            };
            for kv in kvs.chunks(2) {
                map = map.insert(kv[0].clone(), kv[1].clone());
            }
            Ok(Value::Map(map))
        }
        other => Err(type_error(eval, "assoc", "Vector or Map", other)),
    }
}

/// `(pop vector)`: the vector without its last element.
pub fn pop(eval: &Evaluator, args: &[Value]) -> EvalResult<Value> {
    check_arity(eval, "pop", args, 1, Some(1))?;
    match &args[0] {
        Value::Vector(vector) => {
            vector.pop_last().map(Value::Vector).map_err(|err| vector_error(eval, err))
        }
        other => Err(type_error(eval, "pop", "Vector", other)),
    }
}

pub fn vector(_eval: &Evaluator, args: &[Value]) -> EvalResult<Value> {
    Ok(Value::Vector(args.iter().cloned().collect::<Vector<_>>()))
}

/// `(str & xs)`: concatenated text of the arguments; nil contributes nothing.
pub fn stringify(_eval: &Evaluator, args: &[Value]) -> EvalResult<Value> {
    let text: String = args.iter().map(Value::to_text).collect();
    Ok(Value::str(&text))
}

/// `(ex-info message data)`: an `ExInfo` error value carrying `data`, the
/// call position and the current stack trace.
pub fn ex_info(eval: &Evaluator, args: &[Value]) -> EvalResult<Value> {
    check_arity(eval, "ex-info", args, 2, Some(2))?;
    let message = match &args[0] {
        Value::Str(s) => s.to_string(),
        other => return Err(type_error(eval, "ex-info", "String", other)),
    };
    let data = match &args[1] {
        Value::Map(map) => map.clone(),
        Value::Nil => Map::new(),
        other => return Err(type_error(eval, "ex-info", "Map", other)),
    };
    let mut err = ErrorValue::new(ExceptionType::ExInfo, message).with_data(data);
    err.position = eval.current_position();
    err.trace = eval.stack_trace();
    Ok(Value::Error(Arc::new(err)))
}

pub fn ex_message(eval: &Evaluator, args: &[Value]) -> EvalResult<Value> {
    check_arity(eval, "ex-message", args, 1, Some(1))?;
    Ok(match &args[0] {
        Value::Error(err) => Value::str(&err.message),
        _ => Value::Nil,
    })
}

pub fn ex_data(eval: &Evaluator, args: &[Value]) -> EvalResult<Value> {
    check_arity(eval, "ex-data", args, 1, Some(1))?;
    Ok(match &args[0] {
        Value::Error(err) => err.data.clone().map(Value::Map).unwrap_or(Value::Nil),
        _ => Value::Nil,
    })
}

/// `(in-ns name)`: switches the evaluator to namespace `name`, creating it
/// if needed. Also bound as `ns`.
pub fn in_ns(eval: &Evaluator, args: &[Value]) -> EvalResult<Value> {
    check_arity(eval, "in-ns", args, 1, Some(1))?;
    let sym = match &args[0] {
        Value::Symbol(sym) => *sym,
        Value::Str(name) => Symbol::new(name),
        other => return Err(type_error(eval, "in-ns", "Symbol", other)),
    };
    let ns = namespace::ensure_namespace(&sym).map_err(|err| eval.error(err.to_string()))?;
    eval.set_current_namespace(ns.clone());
    Ok(Value::Namespace(ns))
}

/// `(sleep ms)`: blocks the calling thread with the interpreter lock
/// released.
pub fn sleep(eval: &Evaluator, args: &[Value]) -> EvalResult<Value> {
    check_arity(eval, "sleep", args, 1, Some(1))?;
    let Value::Int(ms) = args[0] else {
        return Err(type_error(eval, "sleep", "Int", &args[0]));
    };
    let ms = u64::try_from(ms).map_err(|_| eval.error("sleep duration must not be negative"))?;
    runtime::blocking(|| thread::sleep(Duration::from_millis(ms)));
    Ok(Value::Nil)
}

//===----------------------------------------------------------------------===//
// Utils
//===----------------------------------------------------------------------===//

fn check_arity(
    eval: &Evaluator,
    name: &str,
    args: &[Value],
    min: usize,
    max: Option<usize>,
) -> EvalResult<()> {
    if args.len() < min || max.map_or(false, |max| args.len() > max) {
        return Err(eval.arity_error(name, args.len()));
    }
    Ok(())
}

fn type_error(eval: &Evaluator, name: &str, expected: &str, actual: &Value) -> Unwind {
    eval.error_of(
        ExceptionType::TypeError,
        format!("{} expects {}, got {}", name, expected, actual.type_name()),
    )
}

fn vector_error(eval: &Evaluator, err: VectorError) -> Unwind {
    let kind = match err {
        VectorError::IndexOutOfBounds { .. } => ExceptionType::IndexError,
        VectorError::PopEmpty => ExceptionType::EvalError,
    };
    eval.error_of(kind, err.to_string())
}

fn to_index(eval: &Evaluator, name: &str, value: &Value) -> EvalResult<usize> {
    match value {
        Value::Int(i) => usize::try_from(*i).map_err(|_| {
            eval.error_of(ExceptionType::IndexError, format!("Index {} out of bounds", i))
        }),
        other => Err(type_error(eval, name, "Int", other)),
    }
}

fn number(eval: &Evaluator, value: &Value) -> EvalResult<f64> {
    match value {
        Value::Int(i) => Ok(*i as f64),
        Value::Double(d) => Ok(*d),
        other => Err(type_error(eval, "arithmetic", "Number", other)),
    }
}

fn arith(
    eval: &Evaluator,
    a: &Value,
    b: &Value,
    op: &str,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> EvalResult<Value> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => int_op(*x, *y)
            .map(Value::Int)
            .ok_or_else(|| eval.error(format!("Integer overflow: {} {} {}", x, op, y))),
        _ => Ok(Value::Double(float_op(number(eval, a)?, number(eval, b)?))),
    }
}
