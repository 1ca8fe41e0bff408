//! Room transport: cross-context broadcast of realtime messages.
//!
//! - `channel`: named in-process broadcast channels (`BroadcastHub`)
//! - `shared_storage`: origin-wide key/value storage with change events,
//!   used as the fallback path when no broadcast channel is available
//! - `bus`: `BroadcastBus`, the per-session pub/sub built on either path

pub mod bus;
pub mod channel;
pub mod shared_storage;

use thiserror::Error;

use crate::protocol::ProtocolError;

pub use bus::{BroadcastBus, TransportMode};
pub use channel::{BroadcastHub, ChannelEndpoint};
pub use shared_storage::{SharedStorage, StorageChange, StorageContext, StorageListener};

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Bus is not connected to a room")]
    NotConnected,

    #[error("Bus already bound to room {current}; cannot initialize for {requested}")]
    AlreadyBound { current: String, requested: String },

    #[error("Broadcast channel closed")]
    ChannelClosed,

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

pub type Result<T> = std::result::Result<T, TransportError>;

/// The environment a session runs in: an optional broadcast primitive plus
/// shared storage. Contexts of the same origin see each other's messages.
#[derive(Debug, Clone)]
pub struct Origin {
    channels: Option<BroadcastHub>,
    storage: SharedStorage,
}

impl Default for Origin {
    fn default() -> Self {
        Self::with_hub(BroadcastHub::new())
    }
}

impl Origin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hub(hub: BroadcastHub) -> Self {
        Self {
            channels: Some(hub),
            storage: SharedStorage::new(),
        }
    }

    /// An origin whose runtime has no broadcast channels. Buses fall back to storage.
    pub fn without_broadcast() -> Self {
        Self {
            channels: None,
            storage: SharedStorage::new(),
        }
    }

    pub fn broadcast(&self) -> Option<&BroadcastHub> {
        self.channels.as_ref()
    }

    pub fn storage(&self) -> &SharedStorage {
        &self.storage
    }
}
