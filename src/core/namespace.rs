//! Namespaces and the process-wide namespace registry.
//!
//! The registry is explicit global state: it is created on first use with the
//! protected `ember.core` namespace (holding the native functions) and a
//! `user` namespace, lives for the rest of the process, and can be cut back
//! to that initial state with [`reset`]. All registry and namespace tables
//! are guarded by locks, so resolution is safe from any thread.

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};
use std::thread::{self, ThreadId};

use crate::core::{native_fns, Symbol, Var};
use crate::error::ResolveError;
use crate::interner::{self, NsId, SymId};

/// The protected namespace holding the language core.
pub const CORE_NS: &str = "ember.core";
/// Namespaces under this prefix may shadow core vars silently.
pub const SYSTEM_PREFIX: &str = "ember.";
/// Namespace selected when an evaluator starts.
pub const USER_NS: &str = "user";

/// One-shot initializer of a lazily populated namespace.
pub type LazyInit = Box<dyn FnOnce(&Namespace) + Send>;

enum LazyState {
    Ready,
    Pending(LazyInit),
    // initializer running on this thread
    Running(ThreadId),
}

/// How [`Namespace::intern_with`] treats a name already mapped to another
/// namespace's var.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InternMode {
    /// Collisions with non-core vars are errors.
    Strict,
    /// Collisions are reported as warnings and the name is shadowed.
    Lint,
}

//===----------------------------------------------------------------------===//
// Namespace
//===----------------------------------------------------------------------===//

pub struct Namespace {
    id: NsId,
    // name -> var, including vars referred from other namespaces
    mappings: RwLock<FxHashMap<SymId, Arc<Var>>>,
    aliases: RwLock<FxHashMap<NsId, Arc<Namespace>>>,
    lazy: Mutex<LazyState>,
    lazy_done: Condvar,
    used: AtomicBool,
}

impl Namespace {
    fn new(id: NsId) -> Self {
        Self {
            id,
            mappings: RwLock::new(FxHashMap::default()),
            aliases: RwLock::new(FxHashMap::default()),
            lazy: Mutex::new(LazyState::Ready),
            lazy_done: Condvar::new(),
            used: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> NsId {
        self.id
    }

    pub fn name(&self) -> String {
        interner::ns_to_str(self.id).to_string()
    }

    pub fn is_core(&self) -> bool {
        self.id == core_id()
    }

    /// Interns `sym` in this namespace, rejecting collisions with vars
    /// referred from namespaces other than core.
    pub fn intern(&self, sym: &Symbol) -> Result<Arc<Var>, ResolveError> {
        self.intern_with(sym, InternMode::Strict)
    }

    /// Returns the var named `sym` owned by this namespace, creating it on
    /// first use.
    ///
    /// A name currently mapped to a core var is shadowed by a fresh var, with
    /// a warning unless this namespace lives under [`SYSTEM_PREFIX`]. A name
    /// mapped to any other namespace's var is a collision.
    pub fn intern_with(&self, sym: &Symbol, mode: InternMode) -> Result<Arc<Var>, ResolveError> {
        if sym.is_qualified() {
            return Err(ResolveError::QualifiedIntern(sym.to_string()));
        }

        let mut mappings = self.mappings.write().unwrap_or_else(PoisonError::into_inner);
        let existing = match mappings.get(&sym.name) {
            None => {
                let var = Arc::new(Var::new(self.id, sym.name));
                mappings.insert(sym.name, var.clone());
                return Ok(var);
            }
            Some(existing) if existing.ns_id() == self.id => return Ok(existing.clone()),
            Some(existing) => existing.clone(),
        };

        let shadow = Arc::new(Var::new(self.id, sym.name));
        if existing.ns_id() == core_id() {
            if !self.name().starts_with(SYSTEM_PREFIX) {
                log::warn!(
                    "{} already refers to: {} in namespace {}, being replaced by: {}",
                    sym,
                    existing,
                    self.name(),
                    shadow
                );
            }
        } else if mode == InternMode::Lint {
            log::warn!(
                "{} already refers to: {} in namespace {}",
                sym,
                existing,
                self.name()
            );
        } else {
            return Err(ResolveError::Collision {
                name: sym.to_string(),
                existing: existing.to_string(),
                ns: self.name(),
            });
        }
        mappings.insert(sym.name, shadow.clone());
        Ok(shadow)
    }

    /// Looks up `name` in this namespace's own mappings.
    pub fn lookup(&self, name: SymId) -> Option<Arc<Var>> {
        self.force();
        self.mappings.read().unwrap_or_else(PoisonError::into_inner).get(&name).cloned()
    }

    /// Maps `name` to a var owned by another namespace.
    pub fn refer(&self, name: SymId, var: Arc<Var>) {
        self.mappings.write().unwrap_or_else(PoisonError::into_inner).insert(name, var);
    }

    /// Refers every var owned by `other` that is not private and not already
    /// mapped here.
    pub fn refer_all(&self, other: &Namespace) {
        other.force();
        let vars: Vec<Arc<Var>> = other.own_vars().filter(|var| !var.is_private()).collect();
        let mut mappings = self.mappings.write().unwrap_or_else(PoisonError::into_inner);
        for var in vars {
            mappings.entry(var.name_id()).or_insert(var);
        }
    }

    /// Vars owned by this namespace, skipping referred ones.
    pub fn own_vars(&self) -> impl Iterator<Item = Arc<Var>> {
        let mappings = self.mappings.read().unwrap_or_else(PoisonError::into_inner);
        let owned: Vec<Arc<Var>> =
            mappings.values().filter(|var| var.ns_id() == self.id).cloned().collect();
        owned.into_iter()
    }

    /// Maps `alias` to `target`. Re-aliasing to the same namespace is a no-op.
    pub fn add_alias(&self, alias: &str, target: &Arc<Namespace>) -> Result<(), ResolveError> {
        let key = interner::intern_ns(alias);
        let mut aliases = self.aliases.write().unwrap_or_else(PoisonError::into_inner);
        match aliases.get(&key) {
            Some(existing) if existing.id != target.id => Err(ResolveError::AliasConflict {
                alias: alias.to_string(),
                ns: self.name(),
                existing: existing.name(),
                requested: target.name(),
            }),
            Some(_) => Ok(()),
            None => {
                log::debug!("{}: alias {} -> {}", self.name(), alias, target.name());
                aliases.insert(key, target.clone());
                Ok(())
            }
        }
    }

    pub fn alias(&self, alias: NsId) -> Option<Arc<Namespace>> {
        self.aliases.read().unwrap_or_else(PoisonError::into_inner).get(&alias).cloned()
    }

    /// Installs the one-shot initializer run by the first resolution that
    /// touches this namespace.
    pub fn set_lazy(&self, init: LazyInit) {
        *self.lazy.lock().unwrap_or_else(PoisonError::into_inner) = LazyState::Pending(init);
    }

    pub fn is_lazy(&self) -> bool {
        !matches!(*self.lazy.lock().unwrap_or_else(PoisonError::into_inner), LazyState::Ready)
    }

    /// Runs and clears the lazy initializer, if any.
    ///
    /// Other threads touching the namespace while the initializer runs wait
    /// until it has finished. Lookups made by the initializer itself return
    /// immediately and see the namespace as filled so far.
    pub fn force(&self) {
        let me = thread::current().id();
        let mut state = self.lazy.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            match std::mem::replace(&mut *state, LazyState::Ready) {
                LazyState::Ready => return,
                LazyState::Running(owner) if owner == me => {
                    *state = LazyState::Running(owner);
                    return;
                }
                LazyState::Running(owner) => {
                    *state = LazyState::Running(owner);
                    state = self.lazy_done.wait(state).unwrap_or_else(PoisonError::into_inner);
                }
                LazyState::Pending(init) => {
                    *state = LazyState::Running(me);
                    drop(state);
                    let _done = LazyDone(self);
                    log::debug!("initializing lazy namespace {}", self.name());
                    init(self);
                    return;
                }
            }
        }
    }

    pub fn is_used(&self) -> bool {
        self.used.load(Ordering::Relaxed)
    }

    pub fn mark_used(&self) {
        self.used.store(true, Ordering::Relaxed);
    }

    /// Private vars of this namespace that nothing resolved.
    pub fn unused_vars(&self) -> Vec<Arc<Var>> {
        let mut unused: Vec<Arc<Var>> =
            self.own_vars().filter(|var| var.is_private() && !var.is_used()).collect();
        unused.sort_by_key(|var| interner::sym_to_str(var.name_id()));
        unused
    }

    /// Logs a warning for every unused private var.
    pub fn report_unused(&self) {
        for var in self.unused_vars() {
            log::warn!("unused var {}", var);
        }
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace").field("name", &self.name()).finish()
    }
}

impl PartialEq for Namespace {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

fn core_id() -> NsId {
    interner::intern_ns(CORE_NS)
}

/// Marks a namespace initialised once its initializer returns or unwinds,
/// waking threads parked in [`Namespace::force`].
struct LazyDone<'a>(&'a Namespace);

impl Drop for LazyDone<'_> {
    fn drop(&mut self) {
        *self.0.lazy.lock().unwrap_or_else(PoisonError::into_inner) = LazyState::Ready;
        self.0.lazy_done.notify_all();
    }
}

//===----------------------------------------------------------------------===//
// NamespaceRegistry
//===----------------------------------------------------------------------===//

pub struct NamespaceRegistry {
    namespaces: RwLock<FxHashMap<NsId, Arc<Namespace>>>,
}

impl NamespaceRegistry {
    fn new() -> Self {
        let registry = Self { namespaces: RwLock::new(FxHashMap::default()) };
        registry.install_defaults();
        registry
    }

    fn install_defaults(&self) {
        let core = Arc::new(Namespace::new(core_id()));
        native_fns::install(&core);
        let user = Arc::new(Namespace::new(interner::intern_ns(USER_NS)));
        user.refer_all(&core);

        let mut namespaces = self.namespaces.write().unwrap_or_else(PoisonError::into_inner);
        namespaces.insert(core.id, core);
        namespaces.insert(user.id, user);
    }

    pub fn core(&self) -> Arc<Namespace> {
        self.find_id(core_id()).unwrap_or_else(|| {
            // Only reachable if the core namespace was removed behind our back.
            let core = Arc::new(Namespace::new(core_id()));
            native_fns::install(&core);
            self.namespaces
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(core.id, core.clone());
            core
        })
    }

    fn find_id(&self, id: NsId) -> Option<Arc<Namespace>> {
        self.namespaces.read().unwrap_or_else(PoisonError::into_inner).get(&id).cloned()
    }

    /// Looks up a namespace by name without creating it.
    pub fn find(&self, name: &str) -> Option<Arc<Namespace>> {
        self.find_id(interner::intern_ns(name))
    }

    /// Idempotent lookup-or-create. New namespaces refer all public core vars.
    pub fn ensure_namespace(&self, sym: &Symbol) -> Result<Arc<Namespace>, ResolveError> {
        if sym.is_qualified() {
            return Err(ResolveError::QualifiedNamespaceName(sym.to_string()));
        }
        let id = interner::intern_ns(&sym.name());
        if let Some(ns) = self.find_id(id) {
            return Ok(ns);
        }

        let core = self.core();
        let mut namespaces = self.namespaces.write().unwrap_or_else(PoisonError::into_inner);
        // Another thread may have won the race between the read and write locks.
        if let Some(ns) = namespaces.get(&id) {
            return Ok(ns.clone());
        }
        let ns = Arc::new(Namespace::new(id));
        ns.refer_all(&core);
        log::debug!("created namespace {}", ns.name());
        namespaces.insert(id, ns.clone());
        Ok(ns)
    }

    /// Creates (or fetches) a namespace whose contents are produced by `init`
    /// on first resolution.
    pub fn add_lazy(&self, sym: &Symbol, init: LazyInit) -> Result<Arc<Namespace>, ResolveError> {
        let ns = self.ensure_namespace(sym)?;
        ns.set_lazy(init);
        Ok(ns)
    }

    /// Removes a namespace. The core namespace is protected.
    pub fn remove_namespace(&self, sym: &Symbol) -> Result<Option<Arc<Namespace>>, ResolveError> {
        if sym.is_qualified() {
            return Err(ResolveError::QualifiedNamespaceName(sym.to_string()));
        }
        let id = interner::intern_ns(&sym.name());
        if id == core_id() {
            return Err(ResolveError::ProtectedNamespace(sym.to_string()));
        }
        let removed = self.namespaces.write().unwrap_or_else(PoisonError::into_inner).remove(&id);
        if removed.is_some() {
            log::debug!("removed namespace {}", sym);
        }
        Ok(removed)
    }

    /// The namespace a qualifier designates from within `ctx`: an alias of
    /// `ctx` first, then a registered namespace of that name. Lazy targets
    /// are initialised before they are returned.
    pub fn namespace_for(&self, ctx: &Namespace, qualifier: NsId) -> Option<Arc<Namespace>> {
        let ns = ctx.alias(qualifier).or_else(|| self.find_id(qualifier))?;
        ns.force();
        Some(ns)
    }

    /// Resolves `sym` to a var as seen from `ctx`.
    pub fn resolve(&self, ctx: &Namespace, sym: &Symbol) -> Option<Arc<Var>> {
        match sym.ns {
            Some(qualifier) => self.namespace_for(ctx, qualifier)?.lookup(sym.name),
            None if is_pseudo_var(sym) => self.core().lookup(sym.name),
            None => ctx.lookup(sym.name),
        }
    }

    /// Rewrites `sym` into its fully qualified form as seen from `ctx`,
    /// marking the var and its namespace used. Unresolved unqualified symbols
    /// are qualified with `ctx` itself, as an implicit forward declaration.
    pub fn qualify_symbol(&self, ctx: &Namespace, sym: &Symbol) -> Symbol {
        if let Some(qualifier) = sym.ns {
            return match self.namespace_for(ctx, qualifier) {
                Some(ns) => {
                    ns.mark_used();
                    if let Some(var) = ns.lookup(sym.name) {
                        var.mark_used();
                    }
                    sym.with_ns(ns.id)
                }
                None => *sym,
            };
        }

        match ctx.lookup(sym.name) {
            Some(var) => {
                var.mark_used();
                if let Some(owner) = self.find_id(var.ns_id()) {
                    owner.mark_used();
                }
                var.symbol()
            }
            None => sym.with_ns(ctx.id),
        }
    }

    /// Drops every namespace and reinstalls the initial `ember.core` and
    /// `user` namespaces.
    pub fn reset(&self) {
        self.namespaces.write().unwrap_or_else(PoisonError::into_inner).clear();
        self.install_defaults();
    }
}

fn is_pseudo_var(sym: &Symbol) -> bool {
    let name = sym.name();
    name == "ns" || name == "in-ns"
}

static NS_REGISTRY: Lazy<NamespaceRegistry> = Lazy::new(NamespaceRegistry::new);

/// The process-wide namespace registry.
pub fn registry() -> &'static NamespaceRegistry {
    &NS_REGISTRY
}

/// Finds or creates the namespace named by `sym`.
pub fn ensure_namespace(sym: &Symbol) -> Result<Arc<Namespace>, ResolveError> {
    registry().ensure_namespace(sym)
}

pub fn intern(ns: &Namespace, sym: &Symbol) -> Result<Arc<Var>, ResolveError> {
    ns.intern(sym)
}

pub fn resolve(ctx: &Namespace, sym: &Symbol) -> Option<Arc<Var>> {
    registry().resolve(ctx, sym)
}

pub fn add_alias(ns: &Namespace, alias: &str, target: &Arc<Namespace>) -> Result<(), ResolveError> {
    ns.add_alias(alias, target)
}

pub fn remove_namespace(sym: &Symbol) -> Result<Option<Arc<Namespace>>, ResolveError> {
    registry().remove_namespace(sym)
}

/// Resets the global registry to its initial state.
pub fn reset() {
    registry().reset()
}
