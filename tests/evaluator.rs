//! End-to-end tests for the evaluator's special forms.

use std::sync::Arc;
use std::thread;

use ember::ast::{CatchClause, Expr, FnArity, Position};
use ember::core::namespace;
use ember::core::{Symbol, Var};
use ember::error::Unwind;
use ember::interner;
use ember::value::{ExceptionType, Value};
use ember::{Env, Evaluator};

fn evaluator(ns: &str) -> Evaluator {
    let eval = Evaluator::new();
    eval.set_current_namespace(namespace::ensure_namespace(&Symbol::new(ns)).unwrap());
    eval
}

fn core(name: &str) -> Expr {
    let var = namespace::registry()
        .core()
        .lookup(interner::intern_sym(name))
        .unwrap_or_else(|| panic!("missing core var {}", name));
    Expr::var(var)
}

fn call(name: &str, args: Vec<Expr>) -> Expr {
    Expr::call(core(name), args)
}

fn int(i: i64) -> Expr {
    Expr::literal(i)
}

fn eval_ok(eval: &Evaluator, expr: &Expr) -> Value {
    eval.eval(expr, &Env::new()).unwrap_or_else(|err| panic!("eval failed: {}", err.report()))
}

fn eval_err(eval: &Evaluator, expr: &Expr) -> Unwind {
    match eval.eval(expr, &Env::new()) {
        Ok(value) => panic!("expected an error, got {}", value),
        Err(err) => err,
    }
}

fn ex_info(message: &str) -> Expr {
    call("ex-info", vec![Expr::literal(message), Expr::map(vec![])])
}

fn thrown_message(err: &Unwind) -> String {
    match err {
        Unwind::Thrown(thrown) => match &thrown.value {
            Value::Error(err) => err.message.clone(),
            other => panic!("thrown non-error {}", other),
        },
        other => panic!("expected a thrown value, got {:?}", other),
    }
}

/// `(loop [i 0 acc 0] (if (= i n) acc (recur (inc i) (+ acc i))))`
fn sum_loop(n: i64) -> Expr {
    Expr::loop_(
        vec![("i", int(0)), ("acc", int(0))],
        vec![Expr::if_(
            call("=", vec![Expr::local("i", 0, 0), int(n)]),
            Expr::local("acc", 0, 1),
            Some(Expr::recur(vec![
                call("inc", vec![Expr::local("i", 0, 0)]),
                call("+", vec![Expr::local("acc", 0, 1), Expr::local("i", 0, 0)]),
            ])),
        )],
    )
}

//===----------------------------------------------------------------------===//
// if and truthiness
//===----------------------------------------------------------------------===//

#[test]
fn test_only_nil_and_false_are_falsy() {
    let eval = evaluator("it.eval.falsy");
    let branch = |cond: Expr| eval_ok(&eval, &Expr::if_(cond, Expr::keyword("yes"), Some(Expr::keyword("no"))));

    assert_eq!(branch(Expr::nil()), Value::keyword("no"));
    assert_eq!(branch(Expr::literal(false)), Value::keyword("no"));
    assert_eq!(branch(int(0)), Value::keyword("yes"));
    assert_eq!(branch(Expr::vector(vec![])), Value::keyword("yes"));
    assert_eq!(branch(Expr::literal("")), Value::keyword("yes"));
    assert_eq!(branch(Expr::literal(true)), Value::keyword("yes"));
}

#[test]
fn test_if_evaluates_exactly_one_branch() {
    let eval = evaluator("it.eval.one-branch");
    // The untaken branch would fail if it were evaluated.
    let expr = Expr::if_(Expr::literal(true), int(1), Some(Expr::call(int(0), vec![])));
    assert_eq!(eval_ok(&eval, &expr), Value::Int(1));
}

//===----------------------------------------------------------------------===//
// loop / recur
//===----------------------------------------------------------------------===//

#[test]
fn test_loop_sums_to_ten() {
    let eval = evaluator("it.eval.loop-small");
    assert_eq!(eval_ok(&eval, &sum_loop(5)), Value::Int(10));
}

#[test]
fn test_loop_runs_a_million_iterations_in_constant_stack() {
    // A small thread stack: a recursive rendition of the loop would overflow it.
    let handle = thread::Builder::new()
        .stack_size(1024 * 1024)
        .spawn(|| {
            let eval = evaluator("it.eval.loop-large");
            eval_ok(&eval, &sum_loop(1_000_000))
        })
        .unwrap();
    assert_eq!(handle.join().unwrap(), Value::Int(499_999_500_000));
}

/// `(fn f [n] (if (= n 0) 0 (inc (f (dec n)))))`: recursion outside tail
/// position, one call per level.
fn count_down() -> Expr {
    let n = || Expr::local("n", 0, 0);
    Expr::fn_(
        Some("f"),
        vec![FnArity::fixed(
            &["n"],
            vec![Expr::if_(
                call("=", vec![n(), int(0)]),
                int(0),
                Some(call("inc", vec![Expr::call(Expr::local("f", 1, 0), vec![call("dec", vec![n()])])])),
            )],
        )],
    )
}

#[test]
fn test_deep_non_tail_recursion_within_the_call_limit() {
    let eval = evaluator("it.eval.deep-ok");
    let expr = Expr::call(count_down(), vec![int(9_000)]);
    assert_eq!(eval_ok(&eval, &expr), Value::Int(9_000));
}

#[test]
fn test_recursion_past_the_call_limit_is_an_error() {
    let eval = evaluator("it.eval.deep-overflow");
    let err = eval_err(&eval, &Expr::call(count_down(), vec![int(10_001)]));
    assert!(matches!(err, Unwind::Error(_)));
    assert!(err.to_string().contains("Stack overflow"), "{}", err);
    assert!(eval.stack_trace().is_empty());
}

// Loop and fn frames are rewritten in place by `recur`, so a closure made in
// an earlier iteration sees the latest values. Deliberate; pinned here.
#[test]
fn test_closures_share_the_rebound_loop_frame() {
    let eval = evaluator("it.eval.loop-capture");
    // ((nth (loop [i 0 fs []] (if (= i 3) fs (recur (inc i) (conj fs (fn [] i))))) 0))
    let i = || Expr::local("i", 0, 0);
    let fs = Expr::loop_(
        vec![("i", int(0)), ("fs", Expr::vector(vec![]))],
        vec![Expr::if_(
            call("=", vec![i(), int(3)]),
            Expr::local("fs", 0, 1),
            Some(Expr::recur(vec![
                call("inc", vec![i()]),
                call(
                    "conj",
                    vec![
                        Expr::local("fs", 0, 1),
                        Expr::fn_(None, vec![FnArity::fixed(&[], vec![Expr::local("i", 1, 0)])]),
                    ],
                ),
            ])),
        )],
    );
    let first = Expr::call(call("nth", vec![fs, int(0)]), vec![]);
    assert_eq!(eval_ok(&eval, &first), Value::Int(3));
}

#[test]
fn test_recur_may_cross_let_and_do() {
    let eval = evaluator("it.eval.recur-let");
    // (loop [i 3] (let [j (dec i)] (do (if (= j 0) :done (recur j)))))
    let expr = Expr::loop_(
        vec![("i", int(3))],
        vec![Expr::let_(
            vec![("j", call("dec", vec![Expr::local("i", 0, 0)]))],
            vec![Expr::do_(vec![Expr::if_(
                call("=", vec![Expr::local("j", 0, 0), int(0)]),
                Expr::keyword("done"),
                Some(Expr::recur(vec![Expr::local("j", 0, 0)])),
            )])],
        )],
    );
    assert_eq!(eval_ok(&eval, &expr), Value::keyword("done"));
}

#[test]
fn test_recur_in_non_tail_position_is_internal() {
    let eval = evaluator("it.eval.recur-non-tail");
    // (loop [i 0] (inc (recur 1)))
    let expr = Expr::loop_(vec![("i", int(0))], vec![call("inc", vec![Expr::recur(vec![int(1)])])]);
    assert!(eval_err(&eval, &expr).is_internal());
}

//===----------------------------------------------------------------------===//
// Literal collections
//===----------------------------------------------------------------------===//

#[test]
fn test_collection_literals_evaluate_in_order() {
    let eval = evaluator("it.eval.literals");
    let vector = Expr::vector(vec![int(1), call("inc", vec![int(1)]), Expr::nil()]);
    assert_eq!(eval_ok(&eval, &vector).to_string(), "[1 2 nil]");

    let map = Expr::map(vec![(Expr::keyword("a"), int(1)), (Expr::keyword("b"), int(2))]);
    let Value::Map(map) = eval_ok(&eval, &map) else { panic!("expected a map") };
    assert_eq!(map.get(&Value::keyword("b")), Some(&Value::Int(2)));
}

#[test]
fn test_duplicate_map_key_is_an_error() {
    let eval = evaluator("it.eval.dup-map");
    let expr = Expr::map(vec![
        (Expr::keyword("a"), int(1)),
        (Expr::keyword("a"), int(2)),
    ]);
    let err = eval_err(&eval, &expr);
    assert!(!err.is_internal());
    assert!(err.to_string().contains("Duplicate key: :a"), "{}", err);
}

#[test]
fn test_duplicate_set_element_is_an_error() {
    let eval = evaluator("it.eval.dup-set");
    let expr = Expr::set(vec![int(1), call("dec", vec![int(2)])]);
    assert!(eval_err(&eval, &expr).to_string().contains("Duplicate key: 1"));
}

//===----------------------------------------------------------------------===//
// fn and calls
//===----------------------------------------------------------------------===//

#[test]
fn test_closure_captures_environment() {
    let eval = evaluator("it.eval.closure");
    // (let [x 41] ((fn [] (inc x))))
    let f = Expr::fn_(None, vec![FnArity::fixed(&[], vec![call("inc", vec![Expr::local("x", 1, 0)])])]);
    let expr = Expr::let_(vec![("x", int(41))], vec![Expr::call(f, vec![])]);
    assert_eq!(eval_ok(&eval, &expr), Value::Int(42));
}

#[test]
fn test_multi_arity_dispatch() {
    let eval = evaluator("it.eval.multi-arity");
    let f = Expr::fn_(
        Some("pick"),
        vec![
            FnArity::fixed(&[], vec![Expr::keyword("zero")]),
            FnArity::fixed(&["a"], vec![Expr::keyword("one")]),
            FnArity::variadic(&["a", "b", "more"], vec![Expr::local("more", 0, 2)]),
        ],
    );
    assert_eq!(eval_ok(&eval, &Expr::call(f.clone(), vec![])), Value::keyword("zero"));
    assert_eq!(eval_ok(&eval, &Expr::call(f.clone(), vec![int(1)])), Value::keyword("one"));
    assert_eq!(eval_ok(&eval, &Expr::call(f.clone(), vec![int(1), int(2)])), Value::Nil);
    assert_eq!(
        eval_ok(&eval, &Expr::call(f, vec![int(1), int(2), int(3)])).to_string(),
        "[3]"
    );
}

#[test]
fn test_calling_a_non_fn_names_value_and_position() {
    let eval = evaluator("it.eval.not-callable");
    let pos = Position::new(7, 3).in_file("calls.em");
    let expr = Expr::call(int(1), vec![Expr::literal("x")]).at(pos.clone());
    match eval_err(&eval, &expr) {
        Unwind::Error(err) => {
            assert_eq!(err.message, "1 is not a Fn");
            assert_eq!(err.position, Some(pos));
            assert_eq!(err.kind, ExceptionType::TypeError);
        }
        other => panic!("expected an evaluation error, got {:?}", other),
    }
}

#[test]
fn test_unbound_var_is_an_error() {
    let eval = evaluator("it.eval.unbound");
    let var = eval.current_namespace().intern(&Symbol::new("nothing")).unwrap();
    let err = eval_err(&eval, &Expr::var(var));
    assert!(err.to_string().starts_with("Unbound var: #'it.eval.unbound/nothing"));
}

#[test]
fn test_vars_are_invocable() {
    let eval = evaluator("it.eval.invoke-var");
    let var = eval.current_namespace().intern(&Symbol::new("plus")).unwrap();
    let plus = namespace::registry().core().lookup(interner::intern_sym("+")).unwrap();
    var.bind(Value::Var(plus));
    let expr = Expr::call(Expr::literal(Value::Var(var)), vec![int(2), int(3)]);
    assert_eq!(eval_ok(&eval, &expr), Value::Int(5));
}

//===----------------------------------------------------------------------===//
// def and set!
//===----------------------------------------------------------------------===//

#[test]
fn test_def_interns_in_current_namespace() {
    let eval = evaluator("it.eval.def");
    let Value::Var(var) = eval_ok(&eval, &Expr::def("answer", Some(int(42)))) else {
        panic!("def returns its var")
    };
    let again = eval.current_namespace().intern(&Symbol::new("answer")).unwrap();
    assert!(Arc::ptr_eq(&var, &again));
    assert_eq!(again.deref(), Some(Value::Int(42)));

    // A def without a value keeps the current binding.
    eval_ok(&eval, &Expr::def("answer", None));
    assert_eq!(var.deref(), Some(Value::Int(42)));
}

#[test]
fn test_def_keeps_macro_flag() {
    let eval = evaluator("it.eval.def-macro");
    let var: Arc<Var> = eval.current_namespace().intern(&Symbol::new("when")).unwrap();
    var.set_macro();
    eval_ok(&eval, &Expr::def("when", Some(Expr::nil())));
    assert_eq!(var.meta().get(&Value::keyword("macro")), Some(&Value::Bool(true)));
}

#[test]
fn test_def_meta_sets_private() {
    let eval = evaluator("it.eval.def-private");
    let meta = Expr::map(vec![(Expr::keyword("private"), Expr::literal(true))]);
    let Value::Var(var) = eval_ok(&eval, &Expr::def_with_meta("hidden", Some(int(1)), meta)) else {
        panic!("def returns its var")
    };
    assert!(var.is_private());
}

fn tagged_var(eval: &Evaluator, name: &str, tag: &str, value: Value) -> Arc<Var> {
    let meta = Expr::map(vec![(Expr::keyword("tag"), Expr::literal(Value::Symbol(Symbol::new(tag))))]);
    match eval_ok(eval, &Expr::def_with_meta(name, Some(Expr::literal(value)), meta)) {
        Value::Var(var) => var,
        other => panic!("def returned {}", other),
    }
}

#[test]
fn test_set_bang_assigns_bound_var() {
    let eval = evaluator("it.eval.set-ok");
    let var = tagged_var(&eval, "counter", "Int", Value::Int(0));
    let result = eval_ok(&eval, &Expr::set_bang(Expr::var(var.clone()), int(5)));
    assert_eq!(result, Value::Int(5));
    assert_eq!(var.deref(), Some(Value::Int(5)));
}

#[test]
fn test_set_bang_checks_type_tag() {
    let eval = evaluator("it.eval.set-type");
    let var = tagged_var(&eval, "counter", "Int", Value::Int(0));
    match eval_err(&eval, &Expr::set_bang(Expr::var(var.clone()), Expr::literal("five"))) {
        Unwind::Error(err) => assert_eq!(err.kind, ExceptionType::TypeError),
        other => panic!("expected a type error, got {:?}", other),
    }
    assert_eq!(var.deref(), Some(Value::Int(0)));
}

#[test]
fn test_set_bang_rejects_non_var_target() {
    let eval = evaluator("it.eval.set-target");
    let expr = Expr::let_(vec![("x", int(1))], vec![Expr::set_bang(Expr::local("x", 0, 0), int(2))]);
    assert!(eval_err(&eval, &expr).to_string().contains("Invalid assignment target"));
}

//===----------------------------------------------------------------------===//
// throw / try / catch / finally
//===----------------------------------------------------------------------===//

#[test]
fn test_throw_requires_error_value() {
    let eval = evaluator("it.eval.throw-int");
    match eval_err(&eval, &Expr::throw(int(1))) {
        Unwind::Error(err) => assert!(err.message.contains("Cannot throw Int")),
        other => panic!("expected an evaluation error, got {:?}", other),
    }
}

#[test]
fn test_catch_clauses_match_in_order_by_instance_of() {
    let eval = evaluator("it.eval.catch-order");
    let clauses = || {
        vec![
            CatchClause::new(ExceptionType::EvalError, "e", vec![int(1)]),
            CatchClause::new(ExceptionType::Error, "e", vec![int(2)]),
            CatchClause::new(ExceptionType::Throwable, "e", vec![int(3)]),
        ]
    };

    let thrown = Expr::try_(vec![Expr::throw(ex_info("boom"))], clauses(), None);
    assert_eq!(eval_ok(&eval, &thrown), Value::Int(2));

    // An out-of-range nth raises an IndexError, an EvalError subtype.
    let index_error = Expr::try_(
        vec![call("nth", vec![Expr::vector(vec![]), int(0)])],
        clauses(),
        None,
    );
    assert_eq!(eval_ok(&eval, &index_error), Value::Int(1));
}

#[test]
fn test_unmatched_exception_propagates_unchanged() {
    let eval = evaluator("it.eval.catch-miss");
    let expr = Expr::try_(
        vec![Expr::throw(ex_info("boom"))],
        vec![CatchClause::new(ExceptionType::IndexError, "e", vec![int(1)])],
        None,
    );
    assert_eq!(thrown_message(&eval_err(&eval, &expr)), "boom");
}

#[test]
fn test_evaluation_errors_are_catchable_as_values() {
    let eval = evaluator("it.eval.catch-eval-error");
    let expr = Expr::try_(
        vec![Expr::call(int(1), vec![])],
        vec![CatchClause::new(
            ExceptionType::Throwable,
            "e",
            vec![call("ex-message", vec![Expr::local("e", 0, 0)])],
        )],
        None,
    );
    assert_eq!(eval_ok(&eval, &expr), Value::str("1 is not a Fn"));
}

struct FinallyCounter {
    var: Arc<Var>,
}

impl FinallyCounter {
    fn new(eval: &Evaluator) -> Self {
        let var = eval.current_namespace().intern(&Symbol::new("finally-runs")).unwrap();
        var.bind(Value::Int(0));
        Self { var }
    }

    /// `(set! finally-runs (inc finally-runs))`
    fn bump(&self) -> Vec<Expr> {
        vec![Expr::set_bang(
            Expr::var(self.var.clone()),
            call("inc", vec![Expr::var(self.var.clone())]),
        )]
    }

    fn runs(&self) -> Value {
        self.var.deref().unwrap_or(Value::Nil)
    }
}

#[test]
fn test_finally_runs_once_after_normal_completion() {
    let eval = evaluator("it.eval.finally-normal");
    let counter = FinallyCounter::new(&eval);
    let expr = Expr::try_(vec![int(1)], vec![], Some(counter.bump()));
    assert_eq!(eval_ok(&eval, &expr), Value::Int(1));
    assert_eq!(counter.runs(), Value::Int(1));
}

#[test]
fn test_finally_runs_once_after_caught_exception() {
    let eval = evaluator("it.eval.finally-caught");
    let counter = FinallyCounter::new(&eval);
    let expr = Expr::try_(
        vec![Expr::throw(ex_info("caught"))],
        vec![CatchClause::new(ExceptionType::ExInfo, "e", vec![int(2)])],
        Some(counter.bump()),
    );
    assert_eq!(eval_ok(&eval, &expr), Value::Int(2));
    assert_eq!(counter.runs(), Value::Int(1));
}

#[test]
fn test_finally_runs_once_for_uncaught_exception() {
    let eval = evaluator("it.eval.finally-uncaught");
    let counter = FinallyCounter::new(&eval);
    let expr = Expr::try_(
        vec![Expr::throw(ex_info("escapes"))],
        vec![CatchClause::new(ExceptionType::EvalError, "e", vec![int(2)])],
        Some(counter.bump()),
    );
    assert_eq!(thrown_message(&eval_err(&eval, &expr)), "escapes");
    assert_eq!(counter.runs(), Value::Int(1));
}

#[test]
fn test_finally_runs_once_when_catch_clause_throws() {
    let eval = evaluator("it.eval.finally-rethrow");
    let counter = FinallyCounter::new(&eval);
    let expr = Expr::try_(
        vec![Expr::throw(ex_info("first"))],
        vec![CatchClause::new(ExceptionType::Throwable, "e", vec![Expr::throw(ex_info("second"))])],
        Some(counter.bump()),
    );
    assert_eq!(thrown_message(&eval_err(&eval, &expr)), "second");
    assert_eq!(counter.runs(), Value::Int(1));
}

#[test]
fn test_exception_in_finally_supersedes() {
    let eval = evaluator("it.eval.finally-throws");
    let expr = Expr::try_(
        vec![Expr::throw(ex_info("body"))],
        vec![],
        Some(vec![Expr::throw(ex_info("finally"))]),
    );
    assert_eq!(thrown_message(&eval_err(&eval, &expr)), "finally");
}

#[test]
fn test_finally_runs_for_internal_errors() {
    let eval = evaluator("it.eval.finally-internal");
    let counter = FinallyCounter::new(&eval);
    let expr = Expr::try_(
        vec![Expr::local("nowhere", 2, 0)],
        vec![CatchClause::new(ExceptionType::Throwable, "e", vec![int(1)])],
        Some(counter.bump()),
    );
    assert!(eval_err(&eval, &expr).is_internal());
    assert_eq!(counter.runs(), Value::Int(1));
}
