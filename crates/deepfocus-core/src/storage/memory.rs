use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use super::KeyValueStore;
use crate::error::StorageError;

/// In-process store, the equivalent of a browser profile's local storage.
#[derive(Debug)]
pub struct MemoryStore {
    entries: RefCell<BTreeMap<String, String>>,
    writable: Cell<bool>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            entries: RefCell::new(BTreeMap::new()),
            writable: Cell::new(true),
        }
    }

    /// Make writes fail with [`StorageError::Unavailable`], as when storage is disabled.
    pub fn set_writable(&self, writable: bool) {
        self.writable.set(writable);
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.writable.get() {
            Ok(())
        } else {
            Err(StorageError::Unavailable)
        }
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.borrow().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.check_writable()?;
        self.entries
            .borrow_mut()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.check_writable()?;
        self.entries.borrow_mut().remove(key);
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        Ok(self.entries.borrow().keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn basic_operations() {
        let store = MemoryStore::new();
        assert!(store.get("a").unwrap().is_none());
        store.set("a", "1").unwrap();
        store.set("b", "2").unwrap();
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
        assert_eq!(store.keys().unwrap(), vec!["a", "b"]);
        store.remove("a").unwrap();
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn read_only_rejects_writes_but_allows_reads() {
        let store = MemoryStore::new();
        store.set("a", "1").unwrap();
        store.set_writable(false);
        assert_eq!(store.set("a", "2"), Err(StorageError::Unavailable));
        assert_eq!(store.remove("a"), Err(StorageError::Unavailable));
        assert_eq!(store.get("a").unwrap().as_deref(), Some("1"));
    }
}
