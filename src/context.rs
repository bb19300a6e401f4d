//! Run Context
//!
//! An opaque key-value bag shared between the handlers and hooks of one run.
//! The engine never interprets its contents.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::{Map, Value};

/// Plain key-value data as supplied by callers.
pub type Context = Map<String, Value>;

/// Context shared by every handler of a run.
///
/// Cloning is cheap and all clones see the same data.
#[derive(Debug, Clone, Default)]
pub struct SharedContext {
    inner: Arc<Mutex<Context>>,
}

impl SharedContext {
    /// Wraps an existing context.
    pub fn new(context: Context) -> Self {
        Self {
            inner: Arc::new(Mutex::new(context)),
        }
    }

    // A panicking handler must not make the context unusable for the rest
    // of the process.
    fn lock(&self) -> MutexGuard<'_, Context> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Returns a copy of the value stored under `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.lock().get(key).cloned()
    }

    /// Stores a value, returning the previous one.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.lock().insert(key.into(), value.into())
    }

    /// Removes a key.
    pub fn remove(&self, key: &str) -> Option<Value> {
        self.lock().remove(key)
    }

    /// Runs `f` with exclusive access to the underlying map.
    pub fn update<R>(&self, f: impl FnOnce(&mut Context) -> R) -> R {
        f(&mut self.lock())
    }

    /// Returns a copy of the whole context.
    pub fn snapshot(&self) -> Context {
        self.lock().clone()
    }
}

impl From<Context> for SharedContext {
    fn from(context: Context) -> Self {
        Self::new(context)
    }
}

/// Merges `overrides` on top of `base`; keys in `overrides` win.
pub fn merge(base: &Context, overrides: Context) -> Context {
    let mut merged = base.clone();
    merged.extend(overrides);
    merged
}
