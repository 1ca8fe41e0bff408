//! whiteboard-core: realtime sync engine for a shared classroom whiteboard.
//!
//! This crate provides:
//! - The drawing operation model and page-structured document
//! - Local undo/redo history over page snapshots
//! - A room broadcast bus with a shared-storage fallback
//! - The sync engine that applies local actions, broadcasts them, and
//!   reconciles state from peers (including snapshot bootstrap for late joiners)

pub mod config;
pub mod document;
pub mod events;
pub mod export;
pub mod history;
pub mod operations;
pub mod protocol;
pub mod sender_id;
pub mod storage;
pub mod sync_engine;
pub mod transport;

pub use config::SyncConfig;
pub use document::{can_edit, ClassStatus, Document, DocumentError, Role};
pub use events::{ChangeOrigin, EventBus, PreviewStage, RoomEvent, Subscription};
pub use export::{ExportError, ExportReport, Exporter};
pub use history::HistoryManager;
pub use operations::{DrawOperation, OperationId, Page, PageId, Point, StrokeStyle, Tool};
pub use protocol::{MessageKind, RealtimeMessage};
pub use sender_id::{SenderId, SenderIdError};
pub use storage::{KeyValueStore, RoomStore, StoreError};
pub use sync_engine::{BootstrapState, SyncEngine, SyncError};
pub use transport::{BroadcastBus, BroadcastHub, Origin, SharedStorage, TransportError, TransportMode};

/// Wall-clock milliseconds since the Unix epoch.
pub(crate) fn unix_millis() -> u64 {
    web_time::SystemTime::now()
        .duration_since(web_time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
