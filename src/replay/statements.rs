//! Replay-side prepared statement cache

use std::collections::HashMap;

/// A cached statement: its source text, and the live handle when one is prepared on the
/// current connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedStatement<S> {
    pub text: String,
    pub handle: Option<S>,
}

/// Statement id to cached statement, owned by one connection's apply worker.
#[derive(Debug)]
pub struct StatementCache<S> {
    entries: HashMap<u32, CachedStatement<S>>,
}

impl<S> Default for StatementCache<S> {
    fn default() -> Self {
        Self { entries: HashMap::new() }
    }
}

impl<S> StatementCache<S> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: u32) -> Option<&CachedStatement<S>> {
        self.entries.get(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn text(&self, id: u32) -> Option<&str> {
        self.entries.get(&id).map(|s| s.text.as_str())
    }

    pub fn handle(&self, id: u32) -> Option<&S> {
        self.entries.get(&id).and_then(|s| s.handle.as_ref())
    }

    /// Store a statement, replacing any previous entry under `id`.
    pub fn insert(&mut self, id: u32, text: impl Into<String>, handle: Option<S>) {
        self.entries.insert(id, CachedStatement { text: text.into(), handle });
    }

    /// Attach a freshly prepared handle to an existing entry. Returns false for unknown ids.
    pub fn set_handle(&mut self, id: u32, handle: S) -> bool {
        match self.entries.get_mut(&id) {
            Some(entry) => {
                entry.handle = Some(handle);
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: u32) -> Option<CachedStatement<S>> {
        self.entries.remove(&id)
    }

    /// Detach every live handle, keeping the statement text for lazy re-preparation.
    pub fn invalidate(&mut self) -> Vec<S> {
        self.entries.values_mut().filter_map(|s| s.handle.take()).collect()
    }

    /// Empty the cache, returning the live handles to close.
    pub fn drain_handles(&mut self) -> Vec<S> {
        self.entries.drain().filter_map(|(_, s)| s.handle).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
