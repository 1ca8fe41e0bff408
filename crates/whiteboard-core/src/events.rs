//! Event infrastructure for whiteboard-core.
//!
//! `EventBus<E>` is the subscribe/emit primitive behind both the transport's
//! message handlers and the engine's `RoomEvent` notices. Subscribers hold a
//! `Subscription` and stop receiving events when it is dropped.

use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tracing::error;

use crate::document::{ClassStatus, Role};
use crate::operations::{Point, StrokeStyle};
use crate::sender_id::SenderId;

/// Whether a document change came from this peer or from a received message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeOrigin {
    Local,
    Remote,
}

/// Which half of a live stroke a preview belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PreviewStage {
    Start,
    Move,
}

/// Notices emitted by a room session for the UI layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RoomEvent {
    /// Session joined the room.
    Joined {
        #[serde(rename = "roomId")]
        room_id: String,
        role: Role,
        /// True when a persisted document was loaded.
        restored: bool,
    },
    /// A trainee asked the room for the current state.
    StateRequested,
    /// No snapshot has arrived since `request_state` was sent.
    WaitingForHost {
        #[serde(rename = "roomId")]
        room_id: String,
    },
    /// The trainer answered a `request_state`.
    SnapshotSent,
    /// A full document snapshot replaced local state.
    SnapshotReceived {
        #[serde(rename = "pageCount")]
        page_count: usize,
        #[serde(rename = "classStatus")]
        class_status: ClassStatus,
    },
    /// Pages changed. Renderers should redraw the current page.
    DocumentChanged { origin: ChangeOrigin },
    /// The active page moved.
    PageChanged {
        index: usize,
        #[serde(rename = "pageCount")]
        page_count: usize,
    },
    ClassStatusChanged {
        status: ClassStatus,
        origin: ChangeOrigin,
    },
    /// A peer is drawing a stroke that has not been committed yet.
    StrokePreview {
        #[serde(rename = "senderId")]
        sender_id: SenderId,
        stage: PreviewStage,
        points: Vec<Point>,
        style: Option<StrokeStyle>,
    },
    ExportFinished { ok: bool, detail: String },
}

trait Unsubscribe: Send + Sync {
    fn unsubscribe(&self, id: usize);
}

/// Subscription handle that unsubscribes automatically when dropped.
///
/// Follows the disposer pattern: hold this value to keep receiving events,
/// drop it (or call [`Subscription::unsubscribe`]) to stop.
pub struct Subscription {
    bus: Weak<dyn Unsubscribe>,
    id: usize,
}

impl Subscription {
    /// Stop receiving events now.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

type Callback<E> = Arc<dyn Fn(E) + Send + Sync>;

/// Event bus for publishing events to subscribers.
///
/// Wrap in `Arc` to enable subscriptions. A panicking subscriber is logged and
/// skipped; the remaining subscribers still receive the event.
pub struct EventBus<E> {
    callbacks: RwLock<Vec<(usize, Callback<E>)>>,
    next_id: AtomicUsize,
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl<E: Clone + Send + 'static> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(self: &Arc<Self>, callback: impl Fn(E) + Send + Sync + 'static) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        let bus: Arc<dyn Unsubscribe> = self.clone();
        Subscription {
            bus: Arc::downgrade(&bus),
            id,
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: E) {
        // Clone the callback list so callbacks may subscribe or emit re-entrantly.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(id, cb)| (*id, Arc::clone(cb)))
            .collect();

        for (id, callback) in callbacks {
            let event = event.clone();
            if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                error!("Event subscriber {} panicked; continuing with remaining subscribers", id);
            }
        }
    }

    /// Drop every subscriber. Outstanding `Subscription`s become no-ops.
    pub fn clear(&self) {
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub fn subscriber_count(&self) -> usize {
        self.callbacks.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl<E: Send + 'static> Unsubscribe for EventBus<E> {
    fn unsubscribe(&self, id: usize) {
        // emit releases the lock before invoking callbacks, so this cannot deadlock.
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|(i, _)| *i != id);
    }
}
