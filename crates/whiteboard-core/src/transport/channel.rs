//! In-process broadcast channels.
//!
//! A `BroadcastHub` is a namespace of named channels shared by every context
//! of one origin. Posting on an endpoint delivers the text to every other
//! endpoint open on the same name. Hubs created with
//! [`BroadcastHub::with_loopback`] also deliver back to the poster, which
//! models runtimes that re-deliver a broadcast to its sender.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tracing::{error, trace};

use super::{Result, TransportError};

type MessageCallback = Arc<dyn Fn(&str) + Send + Sync>;

struct HubInner {
    channels: RwLock<HashMap<String, Vec<(usize, MessageCallback)>>>,
    next_id: AtomicUsize,
    loopback: bool,
}

impl HubInner {
    fn close(&self, name: &str, id: usize) {
        let mut channels = self.channels.write().unwrap_or_else(|e| e.into_inner());
        if let Some(endpoints) = channels.get_mut(name) {
            endpoints.retain(|(i, _)| *i != id);
            if endpoints.is_empty() {
                channels.remove(name);
            }
        }
    }
}

/// Shared namespace of named broadcast channels. Cheap to clone.
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::build(false)
    }
}

impl std::fmt::Debug for BroadcastHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BroadcastHub")
            .field("loopback", &self.inner.loopback)
            .finish()
    }
}

impl BroadcastHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// A hub that also delivers each post back to the posting endpoint.
    pub fn with_loopback() -> Self {
        Self::build(true)
    }

    fn build(loopback: bool) -> Self {
        Self {
            inner: Arc::new(HubInner {
                channels: RwLock::new(HashMap::new()),
                next_id: AtomicUsize::new(0),
                loopback,
            }),
        }
    }

    /// Open an endpoint on channel `name`. `on_message` receives every text
    /// posted by other endpoints until the endpoint is closed or dropped.
    pub fn open(
        &self,
        name: &str,
        on_message: impl Fn(&str) + Send + Sync + 'static,
    ) -> ChannelEndpoint {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .channels
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(name.to_string())
            .or_default()
            .push((id, Arc::new(on_message)));
        ChannelEndpoint {
            hub: Arc::downgrade(&self.inner),
            name: name.to_string(),
            id,
        }
    }

    /// Number of endpoints currently open on `name`.
    pub fn endpoint_count(&self, name: &str) -> usize {
        self.inner
            .channels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .map_or(0, Vec::len)
    }
}

/// One context's handle on a named channel. Closes on drop.
pub struct ChannelEndpoint {
    hub: Weak<HubInner>,
    name: String,
    id: usize,
}

impl ChannelEndpoint {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deliver `data` to the other endpoints on this channel.
    ///
    /// Returns the number of endpoints the text was handed to.
    pub fn post(&self, data: &str) -> Result<usize> {
        let hub = self.hub.upgrade().ok_or(TransportError::ChannelClosed)?;

        // Snapshot the receivers so callbacks may open, close, or post re-entrantly.
        let receivers: Vec<_> = hub
            .channels
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&self.name)
            .map(|endpoints| {
                endpoints
                    .iter()
                    .filter(|(id, _)| hub.loopback || *id != self.id)
                    .map(|(id, cb)| (*id, Arc::clone(cb)))
                    .collect()
            })
            .unwrap_or_default();

        trace!("Posting {} bytes on {} to {} endpoint(s)", data.len(), self.name, receivers.len());

        for (id, callback) in &receivers {
            if catch_unwind(AssertUnwindSafe(|| callback(data))).is_err() {
                error!("Endpoint {} on {} panicked while receiving", id, self.name);
            }
        }
        Ok(receivers.len())
    }

    /// Close the endpoint now.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for ChannelEndpoint {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.close(&self.name, self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&str) + Send + Sync + 'static) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let log_clone = Arc::clone(&log);
        (log, move |data: &str| log_clone.lock().unwrap().push(data.to_string()))
    }

    #[test]
    fn test_post_reaches_other_endpoints_only() {
        let hub = BroadcastHub::new();
        let (log_a, on_a) = recorder();
        let (log_b, on_b) = recorder();

        let a = hub.open("whiteboard_r1", on_a);
        let _b = hub.open("whiteboard_r1", on_b);

        assert_eq!(a.post("hello").unwrap(), 1);
        assert!(log_a.lock().unwrap().is_empty());
        assert_eq!(*log_b.lock().unwrap(), vec!["hello".to_string()]);
    }

    #[test]
    fn test_channels_are_isolated_by_name() {
        let hub = BroadcastHub::new();
        let (log, on_other) = recorder();

        let a = hub.open("whiteboard_r1", |_| {});
        let _other = hub.open("whiteboard_r2", on_other);

        assert_eq!(a.post("hello").unwrap(), 0);
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn test_loopback_delivers_to_sender() {
        let hub = BroadcastHub::with_loopback();
        let (log, on_a) = recorder();
        let a = hub.open("c", on_a);

        a.post("echo").unwrap();
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_drop_closes_endpoint() {
        let hub = BroadcastHub::new();
        let a = hub.open("c", |_| {});
        {
            let _b = hub.open("c", |_| {});
            assert_eq!(hub.endpoint_count("c"), 2);
        }
        assert_eq!(hub.endpoint_count("c"), 1);
        a.close();
        assert_eq!(hub.endpoint_count("c"), 0);
    }

    #[test]
    fn test_post_after_hub_dropped() {
        let hub = BroadcastHub::new();
        let a = hub.open("c", |_| {});
        drop(hub);
        assert!(matches!(a.post("x"), Err(TransportError::ChannelClosed)));
    }

    #[test]
    fn test_panicking_receiver_does_not_stop_delivery() {
        let hub = BroadcastHub::new();
        let (log, on_c) = recorder();
        let a = hub.open("c", |_| {});
        let _b = hub.open("c", |_| panic!("receiver failure"));
        let _c = hub.open("c", on_c);

        assert_eq!(a.post("still here").unwrap(), 2);
        assert_eq!(log.lock().unwrap().len(), 1);
    }
}
