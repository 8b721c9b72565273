//! Runtime support shared by evaluations: the diagnostic call stack and the
//! global interpreter lock.

use std::cell::RefCell;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::ast::Position;

//===----------------------------------------------------------------------===//
// Call stack
//===----------------------------------------------------------------------===//

/// One entry of the diagnostic call stack: the callee and the call site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub name: Arc<str>,
    pub position: Option<Position>,
}

/// Live stack of user-visible calls. Used to build traces, never for control
/// flow.
#[derive(Debug, Default)]
pub struct CallStack {
    frames: Vec<StackFrame>,
}

impl CallStack {
    pub fn push(&mut self, frame: StackFrame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<StackFrame> {
        self.frames.pop()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Deep copy of the current frames.
    pub fn snapshot(&self) -> StackTrace {
        StackTrace { frames: self.frames.clone() }
    }
}

/// Frozen copy of a call stack, innermost call last.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StackTrace {
    pub frames: Vec<StackFrame>,
}

impl StackTrace {
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl fmt::Display for StackTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.frames.is_empty() {
            return Ok(());
        }
        writeln!(f, "Stacktrace:")?;
        for frame in self.frames.iter().rev() {
            match &frame.position {
                Some(pos) => writeln!(f, "  {} {}", pos, frame.name)?,
                None => writeln!(f, "  <unknown> {}", frame.name)?,
            }
        }
        Ok(())
    }
}

//===----------------------------------------------------------------------===//
// Interpreter lock
//===----------------------------------------------------------------------===//

// Serialises evaluation across threads. Held for the duration of an
// evaluation and released only around blocking work.
static INTERPRETER_LOCK: Mutex<()> = Mutex::new(());

thread_local! {
    static HELD: RefCell<Option<MutexGuard<'static, ()>>> = const { RefCell::new(None) };
}

fn lock() -> MutexGuard<'static, ()> {
    INTERPRETER_LOCK.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Proof that the current thread holds the interpreter lock. Only the guard
/// that actually acquired the lock releases it, so nested acquisitions on the
/// same thread are free.
#[must_use]
pub struct LockGuard {
    acquired: bool,
}

/// Acquires the interpreter lock for the current thread (re-entrant).
pub fn acquire() -> LockGuard {
    if is_held() {
        return LockGuard { acquired: false };
    }
    let guard = lock();
    HELD.with(|held| *held.borrow_mut() = Some(guard));
    LockGuard { acquired: true }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if self.acquired {
            HELD.with(|held| held.borrow_mut().take());
        }
    }
}

pub fn is_held() -> bool {
    HELD.with(|held| held.borrow().is_some())
}

/// Runs `f` with the interpreter lock released, reacquiring it before
/// returning. Without the lock held this is a plain call.
pub fn blocking<R>(f: impl FnOnce() -> R) -> R {
    let released = HELD.with(|held| held.borrow_mut().take());
    let was_held = released.is_some();
    drop(released);

    let result = f();

    if was_held {
        let guard = lock();
        HELD.with(|held| *held.borrow_mut() = Some(guard));
    }
    result
}
