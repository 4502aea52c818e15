//! Several tabs sharing one store.
//!
//! Each [`Tab`] gets its own [`LocalHost`] and a [`TabStorage`] view onto the
//! group's store. A write through one tab's view is announced to every other
//! tab as a [`HostEvent::Storage`] notification, never to the writer itself,
//! and only when the stored value actually changed.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::KeyValueStore;
use crate::error::StorageError;
use crate::host::{HostEvent, LocalHost, StorageChange};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TabId(Uuid);

impl TabId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TabId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

type TabList = RefCell<Vec<(TabId, LocalHost)>>;

/// One browser profile: a shared store plus the tabs open on it.
#[derive(Clone)]
pub struct TabGroup {
    store: Rc<dyn KeyValueStore>,
    tabs: Rc<TabList>,
}

impl TabGroup {
    pub fn new(store: Rc<dyn KeyValueStore>) -> Self {
        Self {
            store,
            tabs: Rc::new(RefCell::new(Vec::new())),
        }
    }

    pub fn open_tab(&self) -> Tab {
        let id = TabId::new();
        let host = LocalHost::new();
        self.tabs.borrow_mut().push((id, host.clone()));
        tracing::debug!(tab = %id, "tab opened");
        Tab {
            id,
            host,
            storage: Rc::new(TabStorage {
                tab: id,
                store: Rc::clone(&self.store),
                tabs: Rc::downgrade(&self.tabs),
            }),
        }
    }

    /// Stop delivering storage notifications to a tab.
    pub fn close_tab(&self, id: TabId) {
        self.tabs.borrow_mut().retain(|(tab, _)| *tab != id);
    }

    pub fn tab_count(&self) -> usize {
        self.tabs.borrow().len()
    }

    pub fn store(&self) -> &Rc<dyn KeyValueStore> {
        &self.store
    }
}

pub struct Tab {
    pub id: TabId,
    pub host: LocalHost,
    pub storage: Rc<TabStorage>,
}

/// A tab's view onto the shared store.
pub struct TabStorage {
    tab: TabId,
    store: Rc<dyn KeyValueStore>,
    tabs: Weak<TabList>,
}

impl TabStorage {
    fn announce(&self, key: &str, new_value: Option<&str>) {
        let Some(tabs) = self.tabs.upgrade() else { return };
        for (id, host) in tabs.borrow().iter() {
            if *id == self.tab {
                continue;
            }
            host.emit(HostEvent::Storage(StorageChange {
                key: key.to_string(),
                new_value: new_value.map(str::to_string),
            }));
        }
    }
}

impl KeyValueStore for TabStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.store.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let previous = self.store.get(key)?;
        self.store.set(key, value)?;
        if previous.as_deref() != Some(value) {
            self.announce(key, Some(value));
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        let previous = self.store.get(key)?;
        self.store.remove(key)?;
        if previous.is_some() {
            self.announce(key, None);
        }
        Ok(())
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        self.store.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::{EventKind, Host};
    use crate::storage::MemoryStore;

    fn collect(host: &LocalHost) -> Rc<RefCell<Vec<HostEvent>>> {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let s = Rc::clone(&seen);
        host.subscribe(
            EventKind::Storage,
            Box::new(move |e| s.borrow_mut().push(e.clone())),
        );
        seen
    }

    #[test]
    fn writes_are_announced_to_other_tabs_only() {
        let group = TabGroup::new(Rc::new(MemoryStore::new()));
        let a = group.open_tab();
        let b = group.open_tab();
        let seen_a = collect(&a.host);
        let seen_b = collect(&b.host);

        a.storage.set("k", "v").unwrap();
        a.host.dispatch_pending();
        b.host.dispatch_pending();

        assert!(seen_a.borrow().is_empty());
        assert_eq!(
            seen_b.borrow().as_slice(),
            &[HostEvent::Storage(StorageChange {
                key: "k".into(),
                new_value: Some("v".into()),
            })]
        );
        assert_eq!(b.storage.get("k").unwrap().as_deref(), Some("v"));
    }

    #[test]
    fn unchanged_values_and_missing_keys_are_silent() {
        let group = TabGroup::new(Rc::new(MemoryStore::new()));
        let a = group.open_tab();
        let b = group.open_tab();

        a.storage.remove("missing").unwrap();
        a.storage.set("k", "v").unwrap();
        a.storage.set("k", "v").unwrap();
        assert_eq!(b.host.pending(), 1);

        a.storage.remove("k").unwrap();
        assert_eq!(b.host.pending(), 2);
    }

    #[test]
    fn closed_tabs_stop_receiving() {
        let group = TabGroup::new(Rc::new(MemoryStore::new()));
        let a = group.open_tab();
        let b = group.open_tab();
        group.close_tab(b.id);
        a.storage.set("k", "v").unwrap();
        assert_eq!(b.host.pending(), 0);
        assert_eq!(group.tab_count(), 1);
    }
}
