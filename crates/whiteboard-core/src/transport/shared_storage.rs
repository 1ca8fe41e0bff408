//! Same-origin key/value storage with cross-context change notification.
//!
//! Every `StorageContext` opened on one `SharedStorage` sees the same entries.
//! A write through one context notifies the change listeners of every *other*
//! context, never the writer's own. Writes that leave a value unchanged do
//! not notify.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

use crate::storage::{KeyValueStore, StoreError};

/// A change observed by another context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageChange {
    pub key: String,
    /// `None` when the key was removed.
    pub new_value: Option<String>,
}

type ChangeCallback = Arc<dyn Fn(&StorageChange) + Send + Sync>;

struct Listener {
    id: usize,
    context: usize,
    callback: ChangeCallback,
}

#[derive(Default)]
struct StorageInner {
    entries: RwLock<HashMap<String, String>>,
    listeners: RwLock<Vec<Listener>>,
    next_id: AtomicUsize,
}

impl StorageInner {
    fn notify(&self, from_context: usize, change: StorageChange) {
        let callbacks: Vec<_> = self
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|l| l.context != from_context)
            .map(|l| Arc::clone(&l.callback))
            .collect();
        for callback in callbacks {
            callback(&change);
        }
    }
}

/// Storage shared by all contexts of one origin. Cheap to clone.
#[derive(Clone, Default)]
pub struct SharedStorage {
    inner: Arc<StorageInner>,
}

impl std::fmt::Debug for SharedStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedStorage").field("len", &self.len()).finish()
    }
}

impl SharedStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new context (one tab's view of the storage).
    pub fn context(&self) -> StorageContext {
        StorageContext {
            inner: Arc::clone(&self.inner),
            context: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.entries.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys starting with `prefix`, sorted.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let mut keys: Vec<_> = self
            .inner
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        keys
    }
}

/// One context's handle on shared storage.
///
/// Clones share the context identity, so a clone's writes do not notify the
/// original's listeners.
#[derive(Clone)]
pub struct StorageContext {
    inner: Arc<StorageInner>,
    context: usize,
}

impl StorageContext {
    pub fn get_item(&self, key: &str) -> Option<String> {
        self.inner
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }

    pub fn set_item(&self, key: &str, value: &str) {
        let previous = self
            .inner
            .entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
        if previous.as_deref() != Some(value) {
            self.inner.notify(
                self.context,
                StorageChange {
                    key: key.to_string(),
                    new_value: Some(value.to_string()),
                },
            );
        }
    }

    pub fn remove_item(&self, key: &str) {
        let removed = self
            .inner
            .entries
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .remove(key);
        if removed.is_some() {
            self.inner.notify(
                self.context,
                StorageChange {
                    key: key.to_string(),
                    new_value: None,
                },
            );
        }
    }

    /// Observe writes made by other contexts. Stops when the listener is dropped.
    pub fn on_change(
        &self,
        callback: impl Fn(&StorageChange) + Send + Sync + 'static,
    ) -> StorageListener {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(Listener {
                id,
                context: self.context,
                callback: Arc::new(callback),
            });
        StorageListener {
            storage: Arc::downgrade(&self.inner),
            id,
        }
    }
}

impl KeyValueStore for StorageContext {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.get_item(key))
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.set_item(key, value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.remove_item(key);
        Ok(())
    }
}

/// Change listener handle that unregisters on drop.
pub struct StorageListener {
    storage: Weak<StorageInner>,
    id: usize,
}

impl Drop for StorageListener {
    fn drop(&mut self) {
        // notify releases the lock before invoking callbacks, so this cannot deadlock.
        if let Some(storage) = self.storage.upgrade() {
            storage
                .listeners
                .write()
                .unwrap_or_else(|e| e.into_inner())
                .retain(|l| l.id != self.id);
        }
    }
}
