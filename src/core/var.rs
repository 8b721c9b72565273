use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{PoisonError, RwLock};

use crate::collections::Map;
use crate::core::Symbol;
use crate::interner::{self, NsId, SymId};
use crate::value::{Value, ValueType};

/// A named, mutable storage cell owned by exactly one namespace.
///
/// Vars are only created through [`Namespace::intern`](crate::core::Namespace::intern),
/// which guarantees a single var per `(namespace, name)` pair.
#[derive(Debug)]
pub struct Var {
    ns: NsId,
    name: SymId,
    // `None` while unbound
    value: RwLock<Option<Value>>,
    meta: RwLock<Map<Value, Value>>,
    tag: RwLock<Option<ValueType>>,
    is_macro: AtomicBool,
    dynamic: AtomicBool,
    private: AtomicBool,
    used: AtomicBool,
}

impl Var {
    pub(crate) fn new(ns: NsId, name: SymId) -> Self {
        Self {
            ns,
            name,
            value: RwLock::new(None),
            meta: RwLock::new(Map::new()),
            tag: RwLock::new(None),
            is_macro: AtomicBool::new(false),
            dynamic: AtomicBool::new(false),
            private: AtomicBool::new(false),
            used: AtomicBool::new(false),
        }
    }

    pub fn ns_id(&self) -> NsId {
        self.ns
    }

    pub fn name_id(&self) -> SymId {
        self.name
    }

    /// The fully qualified symbol naming this var.
    pub fn symbol(&self) -> Symbol {
        Symbol { ns: Some(self.ns), name: self.name }
    }

    pub fn is_bound(&self) -> bool {
        self.value.read().unwrap_or_else(PoisonError::into_inner).is_some()
    }

    /// Current value, or `None` when unbound.
    pub fn deref(&self) -> Option<Value> {
        self.value.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn bind(&self, value: Value) {
        *self.value.write().unwrap_or_else(PoisonError::into_inner) = Some(value);
    }

    pub fn meta(&self) -> Map<Value, Value> {
        self.meta.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Replaces the metadata map and applies the flags it carries
    /// (`:private`, `:dynamic`, `:macro`, `:tag`).
    pub fn set_meta(&self, meta: Map<Value, Value>) {
        let flag = |name: &str| meta.get(&Value::keyword(name)).map(Value::is_truthy);
        if let Some(private) = flag("private") {
            self.private.store(private, Ordering::Relaxed);
        }
        if let Some(dynamic) = flag("dynamic") {
            self.dynamic.store(dynamic, Ordering::Relaxed);
        }
        if let Some(is_macro) = flag("macro") {
            self.is_macro.store(is_macro, Ordering::Relaxed);
        }
        if let Some(tag) = meta.get(&Value::keyword("tag")) {
            let tag = match tag {
                Value::Symbol(sym) => ValueType::from_name(&sym.name()),
                Value::Keyword(kw) => ValueType::from_name(&interner::kw_to_str(*kw)),
                Value::Str(s) => ValueType::from_name(s),
                _ => None,
            };
            *self.tag.write().unwrap_or_else(PoisonError::into_inner) = tag;
        }
        *self.meta.write().unwrap_or_else(PoisonError::into_inner) = meta;
    }

    /// Type constraint checked by `set!`.
    pub fn tag(&self) -> Option<ValueType> {
        *self.tag.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_macro(&self) -> bool {
        self.is_macro.load(Ordering::Relaxed)
    }

    pub fn set_macro(&self) {
        self.is_macro.store(true, Ordering::Relaxed);
    }

    pub fn is_dynamic(&self) -> bool {
        self.dynamic.load(Ordering::Relaxed)
    }

    pub fn is_private(&self) -> bool {
        self.private.load(Ordering::Relaxed)
    }

    pub fn is_used(&self) -> bool {
        self.used.load(Ordering::Relaxed)
    }

    pub fn mark_used(&self) {
        self.used.store(true, Ordering::Relaxed);
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#'{}", self.symbol())
    }
}
