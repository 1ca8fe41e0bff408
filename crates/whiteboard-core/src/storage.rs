//! Room persistence.
//!
//! `KeyValueStore` abstracts the blob store (shared browser-style storage in
//! memory, one JSON file per key on disk). `RoomStore` keeps one document per
//! room under `whiteboard_<roomId>` and treats anything unreadable as absent.

use thiserror::Error;
use tracing::{debug, warn};

use crate::document::Document;

/// Key prefix for persisted room documents.
pub const ROOM_KEY_PREFIX: &str = "whiteboard_";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Minimal string key/value store.
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for &T {
    fn get(&self, key: &str) -> Result<Option<String>> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<()> {
        (**self).remove(key)
    }
}

/// Storage key for a room's persisted document.
pub fn room_key(room_id: &str) -> String {
    format!("{}{}", ROOM_KEY_PREFIX, room_id)
}

/// Write-through persistence for one room's document.
pub struct RoomStore<S> {
    store: S,
    key: String,
}

impl<S: KeyValueStore> RoomStore<S> {
    pub fn new(store: S, room_id: &str) -> Self {
        Self {
            store,
            key: room_key(room_id),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn inner(&self) -> &S {
        &self.store
    }

    /// Load the persisted document.
    ///
    /// Returns `None` when nothing is stored or the blob cannot be read; the
    /// caller starts from a fresh document in either case.
    pub fn load(&self) -> Option<Document> {
        let raw = match self.store.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!("No persisted document at {}", self.key);
                return None;
            }
            Err(e) => {
                warn!("Failed to read {}: {}", self.key, e);
                return None;
            }
        };

        match serde_json::from_str::<Document>(&raw) {
            Ok(doc) => Some(doc),
            Err(e) => {
                warn!("Ignoring malformed document at {}: {}", self.key, e);
                None
            }
        }
    }

    pub fn save(&self, doc: &Document) -> Result<()> {
        let json = serde_json::to_string(doc)?;
        self.store.set(&self.key, &json)
    }

    pub fn clear(&self) -> Result<()> {
        self.store.remove(&self.key)
    }
}
