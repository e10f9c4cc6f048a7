use crate::engine::value::ValueRef;
use crate::engine::ThreadId;
use std::sync::Mutex;
use strum_macros::{Display, IntoStaticStr};

/// Opaque id handed out to the client. Never `0`: DAP reserves it for "no children".
pub type Handle = i64;

/// Thread-safe table of handle entries.
///
/// Ids grow monotonically from 1 and are never reused. [`Handles::clear`] starts a new
/// epoch: every previously issued id stops resolving.
pub struct Handles<T> {
    table: Mutex<Table<T>>,
}

struct Table<T> {
    /// Number of handles issued in previous epochs.
    base: Handle,
    entries: Vec<T>,
}

impl<T> Default for Handles<T> {
    fn default() -> Self {
        Self {
            table: Mutex::new(Table {
                base: 0,
                entries: vec![],
            }),
        }
    }
}

impl<T: Clone> Handles<T> {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Table<T>> {
        self.table.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Store an entry and return its handle.
    pub fn insert(&self, entry: T) -> Handle {
        let mut table = self.lock();
        table.entries.push(entry);
        table.base + table.entries.len() as Handle
    }

    /// Look up an entry, returns `None` for unknown or expired handles.
    pub fn get(&self, handle: Handle) -> Option<T> {
        let table = self.lock();
        if handle <= table.base {
            return None;
        }
        table.entries.get((handle - table.base - 1) as usize).cloned()
    }

    /// Forget all entries.
    pub fn clear(&self) {
        let mut table = self.lock();
        table.base += table.entries.len() as Handle;
        table.entries.clear();
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Frame reconstruction recipe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameEntry {
    pub thread: ThreadId,
    pub frame: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum ScopeKind {
    Locals,
    Globals,
    Arguments,
    Variable,
    Evaluate,
}

/// Key of a child inside a structured value.
#[derive(Debug, Clone)]
pub enum ChildKey {
    /// Named member (instance or class variable, local name).
    Name(String),
    /// Position inside an array-like value.
    Index(usize),
    /// Key of a map-like value.
    Key(ValueRef),
}

#[derive(Debug, Clone)]
pub enum Payload {
    /// Sorted variable names of a frame scope.
    Names(Vec<String>),
    /// Captured value with its child keys.
    Value {
        value: ValueRef,
        named: Vec<String>,
        indexed: Vec<ChildKey>,
    },
}

/// Variables reference recipe.
#[derive(Debug, Clone)]
pub struct VariableEntry {
    pub thread: ThreadId,
    pub frame: usize,
    pub kind: ScopeKind,
    pub payload: Payload,
}
