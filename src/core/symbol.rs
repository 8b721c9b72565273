use std::fmt;

use crate::interner::{self, NsId, SymId};

/// An interned `namespace?/name` identifier.
///
/// Both parts are interned, so equality and hashing are integer operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Symbol {
    /// Optional namespace qualifier.
    pub ns: Option<NsId>,
    /// The bare name.
    pub name: SymId,
}

impl Symbol {
    /// Creates an unqualified symbol.
    pub fn new(name: &str) -> Self {
        Self { ns: None, name: interner::intern_sym(name) }
    }

    pub fn qualified(ns: &str, name: &str) -> Self {
        Self { ns: Some(interner::intern_ns(ns)), name: interner::intern_sym(name) }
    }

    /// Parses `ns/name` or `name`. A lone `/` is the unqualified symbol `/`.
    pub fn parse(text: &str) -> Self {
        match text.split_once('/') {
            Some((ns, name)) if !ns.is_empty() && !name.is_empty() => {
                Self::qualified(ns, name)
            }
            _ => Self::new(text),
        }
    }

    pub fn with_ns(self, ns: NsId) -> Self {
        Self { ns: Some(ns), ..self }
    }

    pub fn is_qualified(&self) -> bool {
        self.ns.is_some()
    }

    pub fn name(&self) -> String {
        interner::sym_to_str(self.name).to_string()
    }

    pub fn namespace(&self) -> Option<String> {
        self.ns.map(|ns| interner::ns_to_str(ns).to_string())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ns {
            Some(ns) => write!(f, "{}/{}", interner::ns_to_str(ns), self.name()),
            None => write!(f, "{}", self.name()),
        }
    }
}
