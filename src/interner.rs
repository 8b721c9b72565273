//! Process-wide string interning for symbol names, keywords and namespace
//! names.
//!
//! Each kind of name has its own table, so a symbol `foo` and a keyword `:foo`
//! get unrelated ids. Symbol ids always refer to the *bare* name; the optional
//! namespace qualifier of a symbol is kept separately as an [`NsId`].
//!
//! Tables only ever grow. Lookups of already-interned text take a shared
//! lock; only the first sighting of a name takes the write lock.

use std::marker::PhantomData;
use std::sync::{Arc, PoisonError, RwLock};

use once_cell::sync::Lazy;
use rustc_hash::FxHashMap;

macro_rules! interned_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Ord, PartialOrd)]
        pub struct $name(pub u32);

        impl From<u32> for $name {
            fn from(raw: u32) -> Self {
                $name(raw)
            }
        }

        impl From<$name> for u32 {
            fn from(id: $name) -> u32 {
                id.0
            }
        }
    };
}

interned_id!(
    /// Id of a bare symbol name.
    SymId
);
interned_id!(
    /// Id of a keyword name, without its leading colon.
    KeywId
);
interned_id!(
    /// Id of a namespace name.
    NsId
);

#[derive(Default)]
struct Entries {
    ids: FxHashMap<Arc<str>, u32>,
    names: Vec<Arc<str>>,
}

struct Table<Id> {
    kind: &'static str,
    entries: RwLock<Entries>,
    _id: PhantomData<fn() -> Id>,
}

impl<Id> Table<Id>
where
    Id: Copy + From<u32> + Into<u32>,
{
    fn new(kind: &'static str) -> Self {
        Table { kind, entries: RwLock::new(Entries::default()), _id: PhantomData }
    }

    /// # Panics
    ///
    /// When the table already holds `u32::MAX + 1` names. Ids are never
    /// reused, so there is nothing left to hand out.
    fn intern(&self, text: &str) -> Id {
        if let Some(&raw) = self.entries.read().unwrap_or_else(PoisonError::into_inner).ids.get(text) {
            return Id::from(raw);
        }
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        // Another writer may have won the race between the two locks.
        if let Some(&raw) = entries.ids.get(text) {
            return Id::from(raw);
        }
        let Some(raw) = next_raw(entries.names.len()) else {
            panic!("{} table exhausted: no ids left for {:?}", self.kind, text);
        };
        let name: Arc<str> = Arc::from(text);
        entries.names.push(name.clone());
        entries.ids.insert(name, raw);
        Id::from(raw)
    }

    /// Ids are only minted by `intern`, so the index is always in range.
    fn name(&self, id: Id) -> Arc<str> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.names[id.into() as usize].clone()
    }
}

/// Raw id of the name appended after `len` existing ones.
fn next_raw(len: usize) -> Option<u32> {
    u32::try_from(len).ok()
}

static SYMBOLS: Lazy<Table<SymId>> = Lazy::new(|| Table::new("symbol"));
static KEYWORDS: Lazy<Table<KeywId>> = Lazy::new(|| Table::new("keyword"));
static NAMESPACES: Lazy<Table<NsId>> = Lazy::new(|| Table::new("namespace"));

pub fn intern_sym(name: &str) -> SymId {
    SYMBOLS.intern(name)
}

pub fn sym_to_str(id: SymId) -> Arc<str> {
    SYMBOLS.name(id)
}

/// Interns a keyword. A leading `:` is tolerated and stripped.
pub fn intern_kw(name: &str) -> KeywId {
    KEYWORDS.intern(name.strip_prefix(':').unwrap_or(name))
}

pub fn kw_to_str(id: KeywId) -> Arc<str> {
    KEYWORDS.name(id)
}

pub fn intern_ns(name: &str) -> NsId {
    NAMESPACES.intern(name)
}

pub fn ns_to_str(id: NsId) -> Arc<str> {
    NAMESPACES.name(id)
}
