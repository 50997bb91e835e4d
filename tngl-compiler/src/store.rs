//! Named TNGL fragments shared through `FETCH_TNGL` / `PUBLISH_TNGL`.
//!
//! The preprocessor only sees the [`FragmentStore`] trait; the hosted
//! fragment service lives outside this crate.  [`MemoryFragmentStore`] is the
//! in-process implementation used by the CLI and tests.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Backend for the fragment macros. Errors are plain messages; the
/// preprocessor wraps them into a compile error.
pub trait FragmentStore: Send + Sync {
    fn fetch(&self, key: &str) -> Result<String, String>;
    fn publish(&self, key: &str, body: &str) -> Result<(), String>;
}

/// Thread-safe fragment map.
#[derive(Clone, Default)]
pub struct MemoryFragmentStore {
    inner: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryFragmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate a fragment.
    pub fn with(self, key: &str, body: &str) -> Self {
        if let Ok(mut map) = self.inner.write() {
            map.insert(key.to_string(), body.to_string());
        }
        self
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FragmentStore for MemoryFragmentStore {
    fn fetch(&self, key: &str) -> Result<String, String> {
        let map = self.inner.read().map_err(|_| "fragment store poisoned".to_string())?;
        map.get(key)
            .cloned()
            .ok_or_else(|| format!("fragment \"{}\" not found", key))
    }

    fn publish(&self, key: &str, body: &str) -> Result<(), String> {
        let mut map = self
            .inner
            .write()
            .map_err(|_| "fragment store poisoned".to_string())?;
        map.insert(key.to_string(), body.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn published_fragments_can_be_fetched() {
        let store = MemoryFragmentStore::new();
        store.publish("intro", "animFill(#ff0000, 1s);").unwrap();
        assert_eq!(store.fetch("intro").unwrap(), "animFill(#ff0000, 1s);");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn missing_fragment_is_an_error() {
        let store = MemoryFragmentStore::new().with("a", "scope");
        assert!(store.fetch("b").is_err());
    }
}
