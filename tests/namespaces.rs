//! Tests for namespace, var and resolution behaviour.

use std::sync::Arc;

use ember::ast::Expr;
use ember::core::namespace::{self, InternMode, CORE_NS};
use ember::core::{Namespace, Symbol};
use ember::error::{ResolveError, Unwind};
use ember::interner;
use ember::value::Value;
use ember::{Config, Env, Evaluator};

fn ns(name: &str) -> Arc<Namespace> {
    namespace::ensure_namespace(&Symbol::new(name)).unwrap()
}

fn core_var(name: &str) -> Arc<ember::core::Var> {
    namespace::registry().core().lookup(interner::intern_sym(name)).unwrap()
}

//===----------------------------------------------------------------------===//
// Interning
//===----------------------------------------------------------------------===//

#[test]
fn test_intern_is_idempotent() {
    let ns = ns("it.ns.idempotent");
    let first = namespace::intern(&ns, &Symbol::new("x")).unwrap();
    let second = namespace::intern(&ns, &Symbol::new("x")).unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(first.to_string(), "#'it.ns.idempotent/x");
}

#[test]
fn test_ensure_namespace_rejects_qualified_names() {
    let err = namespace::ensure_namespace(&Symbol::qualified("it.ns", "bad")).unwrap_err();
    assert!(matches!(err, ResolveError::QualifiedNamespaceName(_)));
}

#[test]
fn test_intern_rejects_qualified_symbols() {
    let ns = ns("it.ns.qualified-intern");
    let err = ns.intern(&Symbol::qualified("it.ns.qualified-intern", "x")).unwrap_err();
    assert!(matches!(err, ResolveError::QualifiedIntern(_)));
}

//===----------------------------------------------------------------------===//
// Collision policy
//
// Shadowing is allowed only over core vars, and the warning is skipped for
// namespaces under the system prefix. This heuristic is deliberate and kept
// as-is; these tests pin it down.
//===----------------------------------------------------------------------===//

#[test]
fn test_shadowing_a_core_var_creates_a_new_var() {
    let ns = ns("it.ns.shadow-core");
    let inc = core_var("inc");
    assert!(Arc::ptr_eq(&ns.lookup(interner::intern_sym("inc")).unwrap(), &inc));

    let shadow = ns.intern(&Symbol::new("inc")).unwrap();
    assert!(!Arc::ptr_eq(&shadow, &inc));
    assert_eq!(shadow.ns_id(), ns.id());
    // The core var itself is untouched.
    assert!(inc.is_bound());
}

#[test]
fn test_system_namespaces_shadow_core_vars_too() {
    let ns = ns("ember.it-system");
    let shadow = ns.intern(&Symbol::new("dec")).unwrap();
    assert!(!Arc::ptr_eq(&shadow, &core_var("dec")));
}

#[test]
fn test_collision_with_non_core_var_is_an_error() {
    let owner = ns("it.ns.collision-owner");
    let other = ns("it.ns.collision-other");
    let shared = owner.intern(&Symbol::new("shared")).unwrap();
    other.refer(interner::intern_sym("shared"), shared.clone());

    match other.intern(&Symbol::new("shared")) {
        Err(ResolveError::Collision { name, existing, ns }) => {
            assert_eq!(name, "shared");
            assert_eq!(existing, "#'it.ns.collision-owner/shared");
            assert_eq!(ns, "it.ns.collision-other");
        }
        other => panic!("expected a collision, got {:?}", other),
    }
}

#[test]
fn test_lint_mode_downgrades_collisions() {
    let owner = ns("it.ns.lint-owner");
    let other = ns("it.ns.lint-other");
    let shared = owner.intern(&Symbol::new("shared")).unwrap();
    other.refer(interner::intern_sym("shared"), shared.clone());

    let shadow = other.intern_with(&Symbol::new("shared"), InternMode::Lint).unwrap();
    assert!(!Arc::ptr_eq(&shadow, &shared));
    assert_eq!(shadow.ns_id(), other.id());
}

#[test]
fn test_def_collision_is_an_evaluation_error() {
    let owner = ns("it.ns.def-owner");
    let target = ns("it.ns.def-target");
    let shared = owner.intern(&Symbol::new("shared")).unwrap();
    target.refer(interner::intern_sym("shared"), shared);

    let eval = Evaluator::new();
    eval.set_current_namespace(target.clone());
    let err = eval.eval(&Expr::def("shared", Some(Expr::literal(1))), &Env::new()).unwrap_err();
    assert!(matches!(err, Unwind::Error(_)));
    assert!(err.to_string().contains("already refers to"));

    let lint = Evaluator::with_config(Config::default().with_lint_mode(true));
    lint.set_current_namespace(target);
    assert!(lint.eval(&Expr::def("shared", Some(Expr::literal(1))), &Env::new()).is_ok());
}

//===----------------------------------------------------------------------===//
// Resolution and aliases
//===----------------------------------------------------------------------===//

#[test]
fn test_qualified_resolution_through_alias() {
    let a = ns("it.ns.alias-a");
    let b = ns("it.ns.alias-b");
    let x = b.intern(&Symbol::new("x")).unwrap();
    namespace::add_alias(&a, "b", &b).unwrap();

    let via_alias = namespace::resolve(&a, &Symbol::qualified("b", "x")).unwrap();
    assert!(Arc::ptr_eq(&via_alias, &x));
    let via_name = namespace::resolve(&a, &Symbol::qualified("it.ns.alias-b", "x")).unwrap();
    assert!(Arc::ptr_eq(&via_name, &x));
    assert!(namespace::resolve(&a, &Symbol::new("x")).is_none());
}

#[test]
fn test_alias_conflict() {
    let a = ns("it.ns.conflict-a");
    let b = ns("it.ns.conflict-b");
    let c = ns("it.ns.conflict-c");
    namespace::add_alias(&a, "dep", &b).unwrap();
    namespace::add_alias(&a, "dep", &b).unwrap();
    let err = namespace::add_alias(&a, "dep", &c).unwrap_err();
    assert_eq!(
        err,
        ResolveError::AliasConflict {
            alias: "dep".to_string(),
            ns: "it.ns.conflict-a".to_string(),
            existing: "it.ns.conflict-b".to_string(),
            requested: "it.ns.conflict-c".to_string(),
        }
    );
}

#[test]
fn test_unknown_qualifier_does_not_resolve() {
    let a = ns("it.ns.unknown-qualifier");
    assert!(namespace::resolve(&a, &Symbol::qualified("it.ns.never-created", "x")).is_none());
}

#[test]
fn test_pseudo_vars_resolve_even_when_shadowed_locally() {
    let ns = ns("it.ns.pseudo");
    ns.intern(&Symbol::new("in-ns")).unwrap();
    let resolved = namespace::resolve(&ns, &Symbol::new("in-ns")).unwrap();
    assert!(Arc::ptr_eq(&resolved, &core_var("in-ns")));
}

#[test]
fn test_qualify_symbol_marks_usage() {
    let ctx = ns("it.ns.qualify-ctx");
    let lib = ns("it.ns.qualify-lib");
    let helper = lib.intern(&Symbol::new("helper")).unwrap();
    namespace::add_alias(&ctx, "lib", &lib).unwrap();
    let registry = namespace::registry();

    let qualified = registry.qualify_symbol(&ctx, &Symbol::qualified("lib", "helper"));
    assert_eq!(qualified, Symbol::qualified("it.ns.qualify-lib", "helper"));
    assert!(helper.is_used());
    assert!(lib.is_used());

    // Unresolved names become forward declarations in the context namespace.
    let forward = registry.qualify_symbol(&ctx, &Symbol::new("later"));
    assert_eq!(forward, Symbol::qualified("it.ns.qualify-ctx", "later"));

    let inc = registry.qualify_symbol(&ctx, &Symbol::new("inc"));
    assert_eq!(inc, Symbol::qualified(CORE_NS, "inc"));
}

#[test]
fn test_unused_private_vars_are_reported() {
    let ns = ns("it.ns.unused");
    let private = ns.intern(&Symbol::new("secret")).unwrap();
    private.set_meta(ember::collections::Map::new().insert(Value::keyword("private"), Value::Bool(true)));
    let used = ns.intern(&Symbol::new("shown")).unwrap();
    used.set_meta(ember::collections::Map::new().insert(Value::keyword("private"), Value::Bool(true)));
    namespace::registry().qualify_symbol(&ns, &Symbol::new("shown"));

    let unused: Vec<String> = ns.unused_vars().iter().map(|var| var.to_string()).collect();
    assert_eq!(unused, vec!["#'it.ns.unused/secret".to_string()]);
    ns.report_unused();
}

#[test]
fn test_private_vars_are_not_referred() {
    let source = ns("it.ns.refer-source");
    let public = source.intern(&Symbol::new("public")).unwrap();
    let private = source.intern(&Symbol::new("private")).unwrap();
    private.set_meta(ember::collections::Map::new().insert(Value::keyword("private"), Value::Bool(true)));

    let target = ns("it.ns.refer-target");
    target.refer_all(&source);
    assert!(Arc::ptr_eq(&target.lookup(interner::intern_sym("public")).unwrap(), &public));
    assert!(target.lookup(interner::intern_sym("private")).is_none());
}

//===----------------------------------------------------------------------===//
// Lazy namespaces and removal
//===----------------------------------------------------------------------===//

#[test]
fn test_lazy_namespace_initialises_on_first_resolution() {
    let registry = namespace::registry();
    let lazy = registry
        .add_lazy(
            &Symbol::new("it.ns.lazy"),
            Box::new(|ns| {
                ns.intern(&Symbol::new("loaded")).unwrap().bind(Value::Bool(true));
            }),
        )
        .unwrap();
    assert!(lazy.is_lazy());

    let user = ns("it.ns.lazy-user");
    let var = namespace::resolve(&user, &Symbol::qualified("it.ns.lazy", "loaded")).unwrap();
    assert_eq!(var.deref(), Some(Value::Bool(true)));
    assert!(!lazy.is_lazy());
}

#[test]
fn test_remove_namespace() {
    ns("it.ns.removable");
    let removed = namespace::remove_namespace(&Symbol::new("it.ns.removable")).unwrap();
    assert_eq!(removed.map(|ns| ns.name()), Some("it.ns.removable".to_string()));
    assert!(namespace::registry().find("it.ns.removable").is_none());
    assert!(namespace::remove_namespace(&Symbol::new("it.ns.removable")).unwrap().is_none());

    let err = namespace::remove_namespace(&Symbol::new(CORE_NS)).unwrap_err();
    assert!(matches!(err, ResolveError::ProtectedNamespace(_)));
}

//===----------------------------------------------------------------------===//
// in-ns
//===----------------------------------------------------------------------===//

#[test]
fn test_in_ns_switches_evaluator_namespace() {
    let eval = Evaluator::new();
    let in_ns = Expr::var(core_var("in-ns"));
    let target = Expr::literal(Value::Symbol(Symbol::new("it.ns.switched")));
    let result = eval.eval(&Expr::call(in_ns, vec![target]), &Env::new()).unwrap();
    assert!(matches!(result, Value::Namespace(_)));
    assert_eq!(eval.current_namespace().name(), "it.ns.switched");

    eval.eval(&Expr::def("here", Some(Expr::literal(1))), &Env::new()).unwrap();
    assert!(ns("it.ns.switched").lookup(interner::intern_sym("here")).is_some());
}
