use std::cell::RefCell;
use std::sync::Arc;

use crate::ast::{DefExpr, Expr, ExprKind, FnArity, Position, TryExpr};
use crate::collections::{Map, Set, Vector};
use crate::config::Config;
use crate::core::namespace::{self, USER_NS};
use crate::core::{Namespace, Symbol};
use crate::env::Env;
use crate::error::{EvalError, EvalResult, InternalError, ResolveError, Thrown, Unwind};
use crate::runtime::{self, CallStack, StackFrame, StackTrace};
use crate::value::{Closure, ErrorValue, ExceptionType, Value};

// Remaining host stack below which a nested evaluation moves onto a fresh
// segment, and the size of that segment.
const STACK_RED_ZONE: usize = 128 * 1024;
const STACK_GROW_SIZE: usize = 4 * 1024 * 1024;

/// Outcome of evaluating a node in tail position.
enum Step {
    Done(Value),
    /// Arguments of a `recur`, to be consumed by the nearest enclosing loop
    /// or fn arity.
    Recur(Vec<Value>, Position),
}

/// Tree-walking evaluator.
///
/// An evaluator owns its current namespace, the diagnostic call stack and
/// the "current expression" slot used to position errors. It is meant to be
/// driven from one thread; the namespace registry it resolves against is
/// shared by every evaluator in the process.
pub struct Evaluator {
    config: Config,
    current_ns: RefCell<Arc<Namespace>>,
    current: RefCell<Option<Position>>,
    callstack: RefCell<CallStack>,
}

impl Default for Evaluator {
    fn default() -> Self {
        Self::new()
    }
}

impl Evaluator {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let registry = namespace::registry();
        let user = registry.ensure_namespace(&Symbol::new(USER_NS)).unwrap_or_else(|_| registry.core());
        Self {
            config,
            current_ns: RefCell::new(user),
            current: RefCell::new(None),
            callstack: RefCell::new(CallStack::default()),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    //===------------------------------------------------------------------===//
    // Entry points
    //===------------------------------------------------------------------===//

    /// Evaluates `expr` in `env`.
    pub fn eval(&self, expr: &Expr, env: &Env) -> EvalResult<Value> {
        let step = self.eval_tail(expr, env)?;
        finish(step)
    }

    /// Top-level evaluation: holds the interpreter lock and starts from an
    /// empty lexical environment. Internal errors are logged before they are
    /// returned.
    pub fn try_eval(&self, expr: &Expr) -> Result<Value, Unwind> {
        let _lock = runtime::acquire();
        log::trace!("try_eval {}", expr.pos);
        let result = self.eval(expr, &Env::new());
        if let Err(err) = &result {
            if err.is_internal() {
                log::error!("{}", err);
            }
        }
        result
    }

    /// Invokes `callee` with already evaluated arguments.
    pub fn apply(&self, callee: &Value, args: Vec<Value>) -> EvalResult<Value> {
        self.invoke(callee, args)
    }

    //===------------------------------------------------------------------===//
    // Namespace and diagnostics state
    //===------------------------------------------------------------------===//

    pub fn current_namespace(&self) -> Arc<Namespace> {
        self.current_ns.borrow().clone()
    }

    pub fn set_current_namespace(&self, ns: Arc<Namespace>) {
        *self.current_ns.borrow_mut() = ns;
    }

    /// Position of the innermost expression being evaluated.
    pub fn current_position(&self) -> Option<Position> {
        let mut pos = self.current.borrow().clone()?;
        if pos.file.is_none() {
            pos.file = self.config.file.clone();
        }
        Some(pos)
    }

    /// Copy of the live call stack.
    pub fn stack_trace(&self) -> StackTrace {
        self.callstack.borrow().snapshot()
    }

    pub fn error(&self, message: impl Into<String>) -> Unwind {
        self.error_of(ExceptionType::EvalError, message)
    }

    /// Builds an evaluation error at the current position.
    pub fn error_of(&self, kind: ExceptionType, message: impl Into<String>) -> Unwind {
        self.build_error(kind, self.current_position(), message.into())
    }

    pub fn error_at(&self, pos: &Position, message: impl Into<String>) -> Unwind {
        let mut pos = pos.clone();
        if pos.file.is_none() {
            pos.file = self.config.file.clone();
        }
        self.build_error(ExceptionType::EvalError, Some(pos), message.into())
    }

    pub(crate) fn arity_error(&self, name: &str, argc: usize) -> Unwind {
        self.error_of(
            ExceptionType::ArityError,
            format!("Wrong number of args ({}) passed to: {}", argc, name),
        )
    }

    fn build_error(&self, kind: ExceptionType, position: Option<Position>, message: String) -> Unwind {
        Unwind::Error(EvalError { kind, message, position, trace: self.stack_trace() })
    }

    fn resolve_error(&self, err: ResolveError) -> Unwind {
        self.error(err.to_string())
    }

    //===------------------------------------------------------------------===//
    // Dispatch
    //===------------------------------------------------------------------===//

    /// Every nested evaluation passes through here, so deep non-tail
    /// recursion grows the host stack on demand and is bounded by
    /// `max_call_depth` alone.
    fn eval_tail(&self, expr: &Expr, env: &Env) -> EvalResult<Step> {
        stacker::maybe_grow(STACK_RED_ZONE, STACK_GROW_SIZE, || self.eval_node(expr, env))
    }

    fn eval_node(&self, expr: &Expr, env: &Env) -> EvalResult<Step> {
        let _here = self.enter(&expr.pos);
        let value = match &expr.kind {
            ExprKind::Literal(value) => value.clone(),
            ExprKind::Vector(items) => self.eval_vector(items, env)?,
            ExprKind::Map(entries) => self.eval_map(entries, env)?,
            ExprKind::Set(items) => self.eval_set(items, env)?,
            ExprKind::Var(var) => match var.deref() {
                Some(value) => value,
                None => return Err(self.error(format!("Unbound var: {}", var))),
            },
            ExprKind::Local { depth, index, .. } => match env.get(*depth, *index) {
                Some(value) => value,
                None => {
                    return Err(InternalError::BadBinding {
                        depth: *depth,
                        index: *index,
                        position: expr.pos.clone(),
                    }
                    .into())
                }
            },
            ExprKind::If { cond, then, otherwise } => {
                return if self.eval(cond, env)?.is_truthy() {
                    self.eval_tail(then, env)
                } else {
                    match otherwise {
                        Some(otherwise) => self.eval_tail(otherwise, env),
                        None => Ok(Step::Done(Value::Nil)),
                    }
                };
            }
            ExprKind::Do(body) => return self.eval_body(body, env),
            ExprKind::Let { bindings, body } => {
                let frame = self.bind_frame(bindings, env)?;
                return self.eval_body(body, &frame);
            }
            ExprKind::Loop { bindings, body } => {
                let frame = self.bind_frame(bindings, env)?;
                self.run_loop(bindings.len(), body, &frame)?
            }
            ExprKind::Recur(args) => {
                let values = args.iter().map(|arg| self.eval(arg, env)).collect::<EvalResult<_>>()?;
                return Ok(Step::Recur(values, expr.pos.clone()));
            }
            ExprKind::Fn(fn_expr) => Value::Fn(Arc::new(Closure::new(fn_expr.clone(), env.clone()))),
            ExprKind::Call { callee, args } => {
                let callee = self.eval(callee, env)?;
                let args = args.iter().map(|arg| self.eval(arg, env)).collect::<EvalResult<_>>()?;
                self.invoke(&callee, args)?
            }
            ExprKind::Def(def) => self.eval_def(def, &expr.pos, env)?,
            ExprKind::Throw(value) => return Err(self.eval_throw(value, &expr.pos, env)),
            ExprKind::Try(try_expr) => self.eval_try(try_expr, env)?,
            ExprKind::SetBang { target, value } => self.eval_set_bang(target, value, env)?,
        };
        Ok(Step::Done(value))
    }

    /// Evaluates a body, the last expression in tail position. Empty bodies
    /// yield nil.
    fn eval_body(&self, body: &[Expr], env: &Env) -> EvalResult<Step> {
        let Some((last, init)) = body.split_last() else {
            return Ok(Step::Done(Value::Nil));
        };
        for expr in init {
            self.eval(expr, env)?;
        }
        self.eval_tail(last, env)
    }

    fn eval_seq(&self, body: &[Expr], env: &Env) -> EvalResult<Value> {
        let step = self.eval_body(body, env)?;
        finish(step)
    }

    //===------------------------------------------------------------------===//
    // Literals
    //===------------------------------------------------------------------===//

    fn eval_vector(&self, items: &[Expr], env: &Env) -> EvalResult<Value> {
        let mut vector = Vector::new();
        for item in items {
            vector = vector.append(self.eval(item, env)?);
        }
        Ok(Value::Vector(vector))
    }

    fn eval_map(&self, entries: &[(Expr, Expr)], env: &Env) -> EvalResult<Value> {
        let mut map = Map::new();
        for (key, value) in entries {
            let key = self.eval(key, env)?;
            let value = self.eval(value, env)?;
            map = match map.insert_new(key.clone(), value) {
                Some(map) => map,
                None => return Err(self.error(format!("Duplicate key: {}", key))),
            };
        }
        Ok(Value::Map(map))
    }

    fn eval_set(&self, items: &[Expr], env: &Env) -> EvalResult<Value> {
        let mut set = Set::new();
        for item in items {
            let value = self.eval(item, env)?;
            set = match set.insert_new(value.clone()) {
                Some(set) => set,
                None => return Err(self.error(format!("Duplicate key: {}", value))),
            };
        }
        Ok(Value::Set(set))
    }

    //===------------------------------------------------------------------===//
    // Frames, loop and recur
    //===------------------------------------------------------------------===//

    /// Pushes a frame for `bindings`, evaluating each init expression in the
    /// frame as it fills up.
    fn bind_frame(&self, bindings: &[(Symbol, Expr)], env: &Env) -> EvalResult<Env> {
        let frame = env.push_empty(bindings.len());
        for (index, (_, init)) in bindings.iter().enumerate() {
            let value = self.eval(init, &frame)?;
            frame.set(index, value);
        }
        Ok(frame)
    }

    /// Runs `body` in `frame` until it completes without a `recur`. Each
    /// `recur` overwrites the frame in place.
    fn run_loop(&self, arity: usize, body: &[Expr], frame: &Env) -> EvalResult<Value> {
        loop {
            match self.eval_body(body, frame)? {
                Step::Done(value) => return Ok(value),
                Step::Recur(values, pos) => {
                    if values.len() != arity {
                        return Err(self.error_at(
                            &pos,
                            format!(
                                "Mismatched argument count to recur, expected: {} args, got: {}",
                                arity,
                                values.len()
                            ),
                        ));
                    }
                    frame.rebind(values);
                }
            }
        }
    }

    //===------------------------------------------------------------------===//
    // Invocation
    //===------------------------------------------------------------------===//

    fn invoke(&self, callee: &Value, mut args: Vec<Value>) -> EvalResult<Value> {
        match callee {
            Value::Fn(closure) => {
                let _frame = self.enter_call(closure.name().clone())?;
                self.call_closure(closure, args)
            }
            Value::Native(native) => {
                let _frame = self.enter_call(native.name.clone())?;
                (native.f)(self, &args)
            }
            Value::Var(var) => match var.deref() {
                Some(value) => self.invoke(&value, args),
                None => Err(self.error(format!("Unbound var: {}", var))),
            },
            Value::Keyword(_) => {
                if !(1..=2).contains(&args.len()) {
                    return Err(self.arity_error(&callee.to_string(), args.len()));
                }
                let default = if args.len() == 2 { args.pop() } else { None };
                let found = match &args[0] {
                    Value::Map(map) => map.get(callee).cloned(),
                    _ => None,
                };
                Ok(found.or(default).unwrap_or(Value::Nil))
            }
            Value::Map(map) => {
                if !(1..=2).contains(&args.len()) {
                    return Err(self.arity_error("Map", args.len()));
                }
                let default = if args.len() == 2 { args.pop() } else { None };
                Ok(map.get(&args[0]).cloned().or(default).unwrap_or(Value::Nil))
            }
            Value::Vector(vector) => {
                if args.len() != 1 {
                    return Err(self.arity_error("Vector", args.len()));
                }
                self.vector_at(vector, &args[0])
            }
            Value::Set(set) => {
                if args.len() != 1 {
                    return Err(self.arity_error("Set", args.len()));
                }
                Ok(if set.contains(&args[0]) { args.swap_remove(0) } else { Value::Nil })
            }
            other => Err(self.error_of(ExceptionType::TypeError, format!("{} is not a Fn", other))),
        }
    }

    pub(crate) fn vector_at(&self, vector: &Vector<Value>, index: &Value) -> EvalResult<Value> {
        let Value::Int(i) = index else {
            return Err(self.error_of(
                ExceptionType::TypeError,
                format!("Vector index must be an Int, got {}", index.type_name()),
            ));
        };
        usize::try_from(*i)
            .ok()
            .and_then(|i| vector.get(i))
            .cloned()
            .ok_or_else(|| {
                self.error_of(
                    ExceptionType::IndexError,
                    format!("Index {} out of bounds for vector of count {}", i, vector.len()),
                )
            })
    }

    fn call_closure(&self, closure: &Arc<Closure>, args: Vec<Value>) -> EvalResult<Value> {
        let fn_expr = &closure.expr;
        let argc = args.len();
        let Some(arity) = fn_expr.arity_for(argc) else {
            return Err(self.arity_error(closure.name(), argc));
        };

        let mut env = closure.env.clone();
        if fn_expr.name.is_some() {
            env = env.push(vec![Value::Fn(closure.clone())]);
        }
        let frame = env.push(bind_params(arity, args));

        loop {
            match self.eval_body(&arity.body, &frame)? {
                Step::Done(value) => return Ok(value),
                Step::Recur(values, pos) => {
                    if values.len() != arity.params.len() {
                        return Err(self.error_at(
                            &pos,
                            format!(
                                "Mismatched argument count to recur, expected: {} args, got: {}",
                                arity.params.len(),
                                values.len()
                            ),
                        ));
                    }
                    frame.rebind(values);
                }
            }
        }
    }

    //===------------------------------------------------------------------===//
    // def, throw, try, set!
    //===------------------------------------------------------------------===//

    fn eval_def(&self, def: &DefExpr, pos: &Position, env: &Env) -> EvalResult<Value> {
        let ns = self.current_namespace();
        let redefined = ns
            .lookup(def.name.name)
            .map_or(false, |var| var.ns_id() == ns.id() && var.is_bound());
        let var = ns
            .intern_with(&def.name, self.config.intern_mode())
            .map_err(|err| self.resolve_error(err))?;
        if redefined && self.config.lint_mode {
            log::warn!("{} duplicate def of {}", pos, var);
        }

        if let Some(init) = &def.value {
            let value = self.eval(init, env)?;
            var.bind(value);
        }

        let mut meta = match &def.meta {
            None => Map::new(),
            Some(meta) => match self.eval(meta, env)? {
                Value::Map(map) => map,
                Value::Nil => Map::new(),
                other => {
                    return Err(self.error_of(
                        ExceptionType::TypeError,
                        format!("Metadata must be a Map, got {}", other.type_name()),
                    ))
                }
            },
        };
        meta = meta
            .insert(Value::keyword("line"), Value::Int(i64::from(pos.start_line)))
            .insert(Value::keyword("column"), Value::Int(i64::from(pos.start_column)))
            .insert(Value::keyword("ns"), Value::Namespace(ns.clone()))
            .insert(Value::keyword("name"), Value::Symbol(def.name));
        if let Some(file) = pos.file.clone().or_else(|| self.config.file.clone()) {
            meta = meta.insert(Value::keyword("file"), Value::Str(file));
        }
        if var.is_macro() {
            meta = meta.insert(Value::keyword("macro"), Value::Bool(true));
        }
        var.set_meta(meta);

        Ok(Value::Var(var))
    }

    fn eval_throw(&self, value: &Expr, pos: &Position, env: &Env) -> Unwind {
        let value = match self.eval(value, env) {
            Ok(value) => value,
            Err(err) => return err,
        };
        if !matches!(value, Value::Error(_)) {
            return self.error_of(
                ExceptionType::TypeError,
                format!("Cannot throw {}: not an Error", value.type_name()),
            );
        }
        let mut position = pos.clone();
        if position.file.is_none() {
            position.file = self.config.file.clone();
        }
        Unwind::Thrown(Thrown { value, position: Some(position), trace: self.stack_trace() })
    }

    /// The finally body runs once on every exit path; an error it raises
    /// replaces whatever was propagating.
    fn eval_try(&self, try_expr: &TryExpr, env: &Env) -> EvalResult<Value> {
        let outcome = self
            .eval_seq(&try_expr.body, env)
            .or_else(|unwind| self.eval_catch(try_expr, unwind, env));
        if let Some(finally) = &try_expr.finally {
            self.eval_seq(finally, env)?;
        }
        outcome
    }

    /// Runs the first catch clause whose type the caught value is an
    /// instance of. Internal errors are never caught.
    fn eval_catch(&self, try_expr: &TryExpr, unwind: Unwind, env: &Env) -> EvalResult<Value> {
        let caught = match &unwind {
            Unwind::Internal(_) => return Err(unwind),
            Unwind::Thrown(thrown) => thrown.value.clone(),
            Unwind::Error(err) => Value::Error(Arc::new(ErrorValue::from(err))),
        };
        let Some(ty) = caught.exception_type() else {
            return Err(unwind);
        };
        match try_expr.catches.iter().find(|clause| ty.is_a(clause.ty)) {
            Some(clause) => {
                let _here = self.enter(&clause.pos);
                self.eval_seq(&clause.body, &env.push(vec![caught]))
            }
            None => Err(unwind),
        }
    }

    fn eval_set_bang(&self, target: &Expr, value: &Expr, env: &Env) -> EvalResult<Value> {
        let ExprKind::Var(var) = &target.kind else {
            return Err(self.error("Invalid assignment target"));
        };
        if !var.is_bound() {
            return Err(self.error(format!("Can't change root binding of unbound var: {}", var)));
        }
        let value = self.eval(value, env)?;
        if let Some(tag) = var.tag() {
            if !tag.accepts(&value) {
                return Err(self.error_of(
                    ExceptionType::TypeError,
                    format!("Cannot assign {} to {} of type {}", value.type_name(), var, tag),
                ));
            }
        }
        var.bind(value.clone());
        Ok(value)
    }

    //===------------------------------------------------------------------===//
    // Guards
    //===------------------------------------------------------------------===//

    fn enter(&self, pos: &Position) -> PositionGuard<'_> {
        let saved = self.current.replace(Some(pos.clone()));
        PositionGuard { eval: self, saved }
    }

    fn enter_call(&self, name: Arc<str>) -> EvalResult<CallGuard<'_>> {
        if self.callstack.borrow().depth() >= self.config.max_call_depth {
            return Err(self.error("Stack overflow"));
        }
        let position = self.current_position();
        self.callstack.borrow_mut().push(StackFrame { name, position });
        Ok(CallGuard { eval: self })
    }
}

fn finish(step: Step) -> EvalResult<Value> {
    match step {
        Step::Done(value) => Ok(value),
        Step::Recur(_, pos) => Err(InternalError::RecurEscaped(pos).into()),
    }
}

/// Lays out call arguments as a parameter frame. Rest arguments of a variadic
/// arity become a vector, or nil when there are none.
fn bind_params(arity: &FnArity, mut args: Vec<Value>) -> Vec<Value> {
    if arity.variadic {
        let rest = args.split_off(arity.required());
        args.push(if rest.is_empty() { Value::Nil } else { Value::Vector(rest.into_iter().collect()) });
    }
    args
}

// Restores the caller's current expression on every exit path.
struct PositionGuard<'a> {
    eval: &'a Evaluator,
    saved: Option<Position>,
}

impl Drop for PositionGuard<'_> {
    fn drop(&mut self) {
        *self.eval.current.borrow_mut() = self.saved.take();
    }
}

struct CallGuard<'a> {
    eval: &'a Evaluator,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.eval.callstack.borrow_mut().pop();
    }
}
