//! Lexical environment.
//!
//! An `Env` is a singly linked chain of frames, innermost first. Each frame
//! is a fixed-size array of slots; references into it are `(depth, index)`
//! pairs computed when the expression tree is built, so a lookup is a walk of
//! `depth` links and an index, never a search by name.
//!
//! Cloning an `Env` shares its frames. Slots are written in place while a
//! `let`/`loop` frame is being filled and when `recur` rebinds a loop frame.

use std::sync::{Arc, PoisonError, RwLock};

use crate::value::Value;

struct Scope {
    slots: RwLock<Vec<Value>>,
    parent: Env,
}

#[derive(Clone, Default)]
pub struct Env {
    head: Option<Arc<Scope>>,
}

impl Env {
    /// The empty environment.
    pub fn new() -> Self {
        Self { head: None }
    }

    /// Pushes a frame holding `values`.
    pub fn push(&self, values: Vec<Value>) -> Env {
        Env { head: Some(Arc::new(Scope { slots: RwLock::new(values), parent: self.clone() })) }
    }

    /// Pushes a frame of `size` nil slots, to be filled with [`Env::set`].
    pub fn push_empty(&self, size: usize) -> Env {
        self.push(vec![Value::Nil; size])
    }

    pub fn get(&self, depth: usize, index: usize) -> Option<Value> {
        let mut scope = self.head.as_ref()?;
        for _ in 0..depth {
            scope = scope.parent.head.as_ref()?;
        }
        scope.slots.read().unwrap_or_else(PoisonError::into_inner).get(index).cloned()
    }

    /// Writes a slot of the innermost frame. Returns `false` when there is no
    /// such slot.
    pub fn set(&self, index: usize, value: Value) -> bool {
        let Some(scope) = &self.head else {
            return false;
        };
        let mut slots = scope.slots.write().unwrap_or_else(PoisonError::into_inner);
        match slots.get_mut(index) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Overwrites every slot of the innermost frame, as `recur` does.
    pub fn rebind(&self, values: Vec<Value>) {
        if let Some(scope) = &self.head {
            *scope.slots.write().unwrap_or_else(PoisonError::into_inner) = values;
        }
    }

    /// Number of frames in the chain.
    pub fn depth(&self) -> usize {
        let mut depth = 0;
        let mut env = self;
        while let Some(scope) = &env.head {
            depth += 1;
            env = &scope.parent;
        }
        depth
    }
}
