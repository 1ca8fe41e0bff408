//! BroadcastBus: per-session pub/sub for realtime messages.
//!
//! Delivery is best-effort fan-out to every other context in the room. There
//! is no ordering across senders, no acknowledgement, and no retry.
//!
//! - `send` posts remotely, then invokes local handlers directly (local echo)
//! - Messages arriving from other contexts with this bus's own sender id are
//!   dropped before any handler sees them
//! - Without a broadcast channel, messages travel as short-lived
//!   `wb_msg_<roomId>_<ts>_<rand>` storage entries, removed after the
//!   configured cleanup delay by [`BroadcastBus::poll`]

use rand::Rng;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, trace, warn};
use web_time::Instant;

use super::channel::{BroadcastHub, ChannelEndpoint};
use super::shared_storage::{StorageChange, StorageContext, StorageListener};
use super::{Origin, Result, TransportError};
use crate::config::SyncConfig;
use crate::events::{EventBus, Subscription};
use crate::protocol::{MessageKind, RealtimeMessage};
use crate::sender_id::SenderId;
use crate::unix_millis;

/// Channel name prefix; a room's channel is `whiteboard_<roomId>`.
pub const CHANNEL_PREFIX: &str = "whiteboard_";

/// Storage key prefix for fallback messages.
pub const FALLBACK_KEY_PREFIX: &str = "wb_msg_";

pub fn channel_name(room_id: &str) -> String {
    format!("{}{}", CHANNEL_PREFIX, room_id)
}

fn fallback_key(room_id: &str, timestamp: u64) -> String {
    let nonce: u32 = rand::rng().random();
    format!("{}{}_{}_{:08x}", FALLBACK_KEY_PREFIX, room_id, timestamp, nonce)
}

/// Room id encoded in a fallback key, if `key` is one.
fn fallback_room(key: &str) -> Option<&str> {
    let rest = key.strip_prefix(FALLBACK_KEY_PREFIX)?;
    // Room ids may contain underscores; the last two segments are ts and nonce.
    let mut parts = rest.rsplitn(3, '_');
    let _nonce = parts.next()?;
    let _ts = parts.next()?;
    parts.next()
}

/// Which delivery path the bus is currently using.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Disconnected,
    Channel,
    Fallback,
}

enum Link {
    Channel(ChannelEndpoint),
    Fallback { _listener: StorageListener },
}

struct Binding {
    room_id: String,
    link: Link,
}

/// Hand a received wire message to local handlers.
fn deliver_remote(data: &str, local: SenderId, handlers: &EventBus<RealtimeMessage>) {
    match RealtimeMessage::from_json(data) {
        Ok(Some(msg)) if msg.sender_id == local => {
            trace!("Dropping own {} echoed back by transport", msg.type_name());
        }
        Ok(Some(msg)) => {
            trace!("Received {} from {}", msg.type_name(), msg.sender_id);
            handlers.emit(msg);
        }
        Ok(None) => debug!("Ignoring message of unknown type"),
        Err(e) => warn!("Discarding malformed message: {}", e),
    }
}

/// Per-session message bus for one room.
pub struct BroadcastBus {
    sender_id: SenderId,
    hub: Option<BroadcastHub>,
    storage: StorageContext,
    cleanup_delay: Duration,
    handlers: Arc<EventBus<RealtimeMessage>>,
    binding: Option<Binding>,
    pending_removals: Mutex<VecDeque<(Instant, String)>>,
}

impl BroadcastBus {
    pub fn new(sender_id: SenderId, origin: &Origin, config: &SyncConfig) -> Self {
        Self {
            sender_id,
            hub: origin.broadcast().cloned(),
            storage: origin.storage().context(),
            cleanup_delay: config.fallback_cleanup_delay,
            handlers: Arc::new(EventBus::new()),
            binding: None,
            pending_removals: Mutex::new(VecDeque::new()),
        }
    }

    pub fn sender_id(&self) -> SenderId {
        self.sender_id
    }

    pub fn room_id(&self) -> Option<&str> {
        self.binding.as_ref().map(|b| b.room_id.as_str())
    }

    pub fn mode(&self) -> TransportMode {
        match &self.binding {
            None => TransportMode::Disconnected,
            Some(Binding {
                link: Link::Channel(_),
                ..
            }) => TransportMode::Channel,
            Some(Binding {
                link: Link::Fallback { .. },
                ..
            }) => TransportMode::Fallback,
        }
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.subscriber_count()
    }

    /// Bind the bus to `room_id`.
    ///
    /// Initializing again for the same room is a no-op. A bus already bound
    /// to a different room must be disconnected first.
    pub fn initialize(&mut self, room_id: &str) -> Result<()> {
        if let Some(binding) = &self.binding {
            if binding.room_id == room_id {
                debug!("Bus already initialized for room {}", room_id);
                return Ok(());
            }
            return Err(TransportError::AlreadyBound {
                current: binding.room_id.clone(),
                requested: room_id.to_string(),
            });
        }

        let local = self.sender_id;
        let handlers = Arc::clone(&self.handlers);

        let link = match &self.hub {
            Some(hub) => {
                let endpoint = hub.open(&channel_name(room_id), move |data| {
                    deliver_remote(data, local, &handlers);
                });
                info!("Joined channel {} as {}", endpoint.name(), local);
                Link::Channel(endpoint)
            }
            None => {
                warn!(
                    "Broadcast channel unavailable; room {} falls back to shared storage",
                    room_id
                );
                let room = room_id.to_string();
                let listener = self.storage.on_change(move |change: &StorageChange| {
                    if fallback_room(&change.key) != Some(room.as_str()) {
                        return;
                    }
                    // Removals carry no message
                    if let Some(data) = &change.new_value {
                        deliver_remote(data, local, &handlers);
                    }
                });
                Link::Fallback {
                    _listener: listener,
                }
            }
        };

        self.binding = Some(Binding {
            room_id: room_id.to_string(),
            link,
        });
        Ok(())
    }

    /// Register a handler for every message this bus delivers.
    pub fn subscribe(&self, handler: impl Fn(RealtimeMessage) + Send + Sync + 'static) -> Subscription {
        self.handlers.subscribe(handler)
    }

    /// Stamp and broadcast a message, then deliver it to local handlers.
    ///
    /// Returns the message as sent.
    pub fn send(&self, kind: MessageKind) -> Result<RealtimeMessage> {
        let binding = self.binding.as_ref().ok_or(TransportError::NotConnected)?;
        let message = RealtimeMessage::new(kind, self.sender_id, unix_millis());
        let data = message.to_json()?;

        match &binding.link {
            Link::Channel(endpoint) => {
                let reached = endpoint.post(&data)?;
                trace!("Sent {} to {} endpoint(s)", message.type_name(), reached);
            }
            Link::Fallback { .. } => {
                let key = fallback_key(&binding.room_id, message.timestamp);
                self.storage.set_item(&key, &data);
                self.lock_pending()
                    .push_back((Instant::now() + self.cleanup_delay, key));
                trace!("Sent {} through storage fallback", message.type_name());
            }
        }

        self.poll(Instant::now());
        self.handlers.emit(message.clone());
        Ok(message)
    }

    /// Remove fallback entries whose cleanup deadline has passed.
    ///
    /// Returns the number of entries removed.
    pub fn poll(&self, now: Instant) -> usize {
        let expired: Vec<String> = {
            let mut pending = self.lock_pending();
            let mut expired = Vec::new();
            while pending.front().is_some_and(|(due, _)| *due <= now) {
                if let Some((_, key)) = pending.pop_front() {
                    expired.push(key);
                }
            }
            expired
        };
        for key in &expired {
            self.storage.remove_item(key);
        }
        expired.len()
    }

    /// Fallback entries still waiting for removal.
    pub fn pending_cleanup(&self) -> usize {
        self.lock_pending().len()
    }

    /// Release the channel or storage listener and drop all handlers.
    ///
    /// Pending fallback entries are removed immediately. Safe to call more than once.
    pub fn disconnect(&mut self) {
        let pending: Vec<_> = self.lock_pending().drain(..).map(|(_, key)| key).collect();
        for key in &pending {
            self.storage.remove_item(key);
        }
        if let Some(binding) = self.binding.take() {
            info!("Left room {}", binding.room_id);
        }
        self.handlers.clear();
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, VecDeque<(Instant, String)>> {
        self.pending_removals.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for BroadcastBus {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{PageRef, SetPagePayload};

    fn collect(bus: &BroadcastBus) -> (Arc<Mutex<Vec<RealtimeMessage>>>, Subscription) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = Arc::clone(&log);
        let sub = bus.subscribe(move |msg| log_clone.lock().unwrap().push(msg));
        (log, sub)
    }

    fn bus(origin: &Origin, room: &str) -> BroadcastBus {
        let mut bus = BroadcastBus::new(SenderId::generate(), origin, &SyncConfig::default());
        bus.initialize(room).unwrap();
        bus
    }

    // ===== Keys =====

    #[test]
    fn test_fallback_key_round_trips_room() {
        let key = fallback_key("room_with_underscores", 1700000000000);
        assert!(key.starts_with("wb_msg_room_with_underscores_1700000000000_"));
        assert_eq!(fallback_room(&key), Some("room_with_underscores"));
        assert_eq!(fallback_room("whiteboard_room"), None);
        assert_eq!(fallback_room("wb_msg_x"), None);
    }

    // ===== Initialization =====

    #[test]
    fn test_initialize_is_idempotent_for_same_room() {
        let origin = Origin::new();
        let mut bus = bus(&origin, "r1");
        bus.initialize("r1").unwrap();

        assert_eq!(bus.mode(), TransportMode::Channel);
        assert_eq!(origin.broadcast().unwrap().endpoint_count("whiteboard_r1"), 1);
    }

    #[test]
    fn test_initialize_other_room_is_rejected() {
        let origin = Origin::new();
        let mut bus = bus(&origin, "r1");
        let err = bus.initialize("r2").unwrap_err();
        assert!(matches!(err, TransportError::AlreadyBound { .. }));
        assert_eq!(bus.room_id(), Some("r1"));
    }

    #[test]
    fn test_send_before_initialize() {
        let bus = BroadcastBus::new(SenderId::generate(), &Origin::new(), &SyncConfig::default());
        assert!(matches!(
            bus.send(MessageKind::RequestState),
            Err(TransportError::NotConnected)
        ));
    }

    // ===== Delivery =====

    #[test]
    fn test_send_reaches_peer_and_local_echo_once() {
        let origin = Origin::new();
        let a = bus(&origin, "r1");
        let b = bus(&origin, "r1");
        let (log_a, _sa) = collect(&a);
        let (log_b, _sb) = collect(&b);

        let sent = a.send(MessageKind::SetPage(SetPagePayload { index: 1 })).unwrap();

        assert_eq!(sent.sender_id, a.sender_id());
        assert_eq!(*log_a.lock().unwrap(), vec![sent.clone()]);
        assert_eq!(*log_b.lock().unwrap(), vec![sent]);
    }

    #[test]
    fn test_loopback_redelivery_is_suppressed() {
        let origin = Origin::with_hub(BroadcastHub::with_loopback());
        let a = bus(&origin, "r1");
        let (log, _sub) = collect(&a);

        a.send(MessageKind::RequestState).unwrap();

        // Only the direct local echo; the channel's copy is dropped by sender id
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_rooms_are_isolated() {
        let origin = Origin::new();
        let a = bus(&origin, "r1");
        let b = bus(&origin, "r2");
        let (log_b, _sb) = collect(&b);

        a.send(MessageKind::RequestState).unwrap();
        assert!(log_b.lock().unwrap().is_empty());
    }

    #[test]
    fn test_malformed_and_unknown_messages_are_dropped() {
        let origin = Origin::new();
        let a = bus(&origin, "r1");
        let (log, _sub) = collect(&a);

        let raw = origin.broadcast().unwrap().open("whiteboard_r1", |_| {});
        raw.post("not json").unwrap();
        raw.post(r#"{"type":"cursor","payload":null,"senderId":"0000000000000001","timestamp":1}"#)
            .unwrap();
        raw.post(r#"{"type":"clear_page","payload":null,"senderId":"0000000000000001","timestamp":1}"#)
            .unwrap();

        let received = log.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].kind, MessageKind::ClearPage(PageRef::default()));
    }

    #[test]
    fn test_panicking_handler_does_not_break_bus() {
        let origin = Origin::new();
        let a = bus(&origin, "r1");
        let b = bus(&origin, "r1");
        let _bad = b.subscribe(|_| panic!("handler failure"));
        let (log, _sub) = collect(&b);

        a.send(MessageKind::RequestState).unwrap();
        a.send(MessageKind::RequestState).unwrap();

        assert_eq!(log.lock().unwrap().len(), 2);
    }

    // ===== Fallback =====

    #[test]
    fn test_fallback_delivers_and_cleans_up() {
        let origin = Origin::without_broadcast();
        let a = bus(&origin, "r1");
        let b = bus(&origin, "r1");
        let (log_a, _sa) = collect(&a);
        let (log_b, _sb) = collect(&b);

        assert_eq!(a.mode(), TransportMode::Fallback);

        let sent = a.send(MessageKind::RequestState).unwrap();
        assert_eq!(*log_b.lock().unwrap(), vec![sent]);
        assert_eq!(log_a.lock().unwrap().len(), 1);

        let keys = origin.storage().keys_with_prefix("wb_msg_r1_");
        assert_eq!(keys.len(), 1);
        assert_eq!(a.pending_cleanup(), 1);

        // Not yet due
        assert_eq!(a.poll(Instant::now()), 0);
        assert_eq!(a.poll(Instant::now() + Duration::from_millis(1001)), 1);
        assert!(origin.storage().keys_with_prefix("wb_msg_").is_empty());
        // Removal is not redelivered as a message
        assert_eq!(log_b.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_fallback_ignores_other_rooms() {
        let origin = Origin::without_broadcast();
        let a = bus(&origin, "r1");
        let b = bus(&origin, "r1_b");
        let (log_b, _sb) = collect(&b);

        a.send(MessageKind::RequestState).unwrap();
        assert!(log_b.lock().unwrap().is_empty());
    }

    #[test]
    fn test_disconnect_flushes_and_is_idempotent() {
        let origin = Origin::without_broadcast();
        let mut a = bus(&origin, "r1");
        let (log, _sub) = collect(&a);
        a.send(MessageKind::RequestState).unwrap();

        a.disconnect();
        a.disconnect();

        assert!(origin.storage().is_empty());
        assert_eq!(a.mode(), TransportMode::Disconnected);
        assert_eq!(a.handler_count(), 0);
        assert!(matches!(
            a.send(MessageKind::RequestState),
            Err(TransportError::NotConnected)
        ));
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_channel_closed_on_disconnect() {
        let origin = Origin::new();
        let mut a = bus(&origin, "r1");
        a.disconnect();
        assert_eq!(origin.broadcast().unwrap().endpoint_count("whiteboard_r1"), 0);

        // Re-initializing after disconnect is allowed
        a.initialize("r2").unwrap();
        assert_eq!(a.room_id(), Some("r2"));
    }
}
