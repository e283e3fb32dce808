//! Client side of an in-process connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use nspwire_core::{
    ConnectionId, Connection, EventHandler, ListenerId, Responder, TransportError,
};
use parking_lot::Mutex;
use serde_json::Value;

use crate::hub::HubInner;

struct ListenerEntry {
    id: ListenerId,
    event: String,
    handler: EventHandler,
    once: bool,
}

pub struct LocalConnection {
    id: ConnectionId,
    url: String,
    namespace: String,
    connected: AtomicBool,
    listeners: Mutex<Vec<ListenerEntry>>,
    next_listener: AtomicU64,
    /// Client acks parked until the peer answers or the connection closes.
    pending: Mutex<HashMap<u64, Responder>>,
    next_ack: AtomicU64,
    hub: Weak<HubInner>,
}

impl LocalConnection {
    pub(crate) fn new(url: String, namespace: String, hub: Weak<HubInner>) -> Self {
        Self {
            id: ConnectionId::new(),
            url,
            namespace,
            connected: AtomicBool::new(true),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            next_ack: AtomicU64::new(1),
            hub,
        }
    }

    /// Number of emits still waiting for the peer's acknowledgment.
    pub fn pending_acks(&self) -> usize {
        self.pending.lock().len()
    }

    fn add_listener(&self, event: &str, handler: EventHandler, once: bool) -> ListenerId {
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        self.listeners.lock().push(ListenerEntry {
            id,
            event: event.to_owned(),
            handler,
            once,
        });
        id
    }

    /// Deliver a peer-originated event to the matching listeners.
    ///
    /// Handlers run inline, in registration order, after the listener lock
    /// is released, so events from one peer reach a listener in send order.
    /// The responder goes to the first listener only; once-listeners are
    /// removed before they run.
    pub(crate) fn deliver(&self, event: &str, payload: Value, ack: Option<Responder>) {
        if !self.is_connected() {
            return;
        }
        let handlers: Vec<EventHandler> = {
            let mut listeners = self.listeners.lock();
            let matched = listeners
                .iter()
                .filter(|l| l.event == event)
                .map(|l| Arc::clone(&l.handler))
                .collect();
            listeners.retain(|l| !(l.once && l.event == event));
            matched
        };
        if handlers.is_empty() {
            tracing::trace!(connection = %self.id, event, "no listener for event");
            return;
        }
        let mut ack = ack;
        for handler in handlers {
            handler(payload.clone(), ack.take());
        }
    }

    /// Park a client ack and return the key the forwarding task resolves.
    fn park(&self, ack: Responder) -> u64 {
        let key = self.next_ack.fetch_add(1, Ordering::Relaxed);
        self.pending.lock().insert(key, ack);
        key
    }

    pub(crate) fn resolve(&self, key: u64, value: Value) {
        if let Some(ack) = self.pending.lock().remove(&key) {
            let _ = ack.respond(value);
        }
    }
}

impl Connection for LocalConnection {
    fn id(&self) -> &ConnectionId {
        &self.id
    }

    fn url(&self) -> &str {
        &self.url
    }

    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    fn on(&self, event: &str, handler: EventHandler) -> ListenerId {
        self.add_listener(event, handler, false)
    }

    fn once(&self, event: &str, handler: EventHandler) -> ListenerId {
        self.add_listener(event, handler, true)
    }

    fn off(&self, event: &str) {
        self.listeners.lock().retain(|l| l.event != event);
    }

    fn off_listener(&self, id: ListenerId) {
        self.listeners.lock().retain(|l| l.id != id);
    }

    fn off_all(&self) {
        self.listeners.lock().clear();
    }

    fn has_listeners(&self, event: &str) -> bool {
        self.listeners.lock().iter().any(|l| l.event == event)
    }

    fn emit(&self, event: &str, payload: Value, ack: Option<Responder>) -> Result<(), TransportError> {
        if !self.is_connected() {
            return Err(TransportError::NotConnected {
                connection: self.id.to_string(),
                event: event.to_owned(),
            });
        }
        let Some(hub) = self.hub.upgrade() else {
            return Err(TransportError::NotConnected {
                connection: self.id.to_string(),
                event: event.to_owned(),
            });
        };
        let ack_key = ack.map(|a| self.park(a));
        hub.route(&self.id, &self.namespace, event, payload, ack_key);
        Ok(())
    }

    fn close(&self) {
        if self.connected.swap(false, Ordering::Relaxed) {
            let dropped = {
                let mut pending = self.pending.lock();
                let n = pending.len();
                pending.clear();
                n
            };
            if let Some(hub) = self.hub.upgrade() {
                hub.remove(&self.id);
            }
            tracing::debug!(connection = %self.id, dropped_acks = dropped, "connection closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nspwire_core::{event_handler, ConnectParams, Transport};
    use serde_json::json;
    use std::time::Duration;

    use crate::LocalHub;

    #[tokio::test]
    async fn listeners_are_tracked_per_event() {
        let hub = LocalHub::new();
        let conn = hub.transport().connect("http://localhost:3000", &ConnectParams::new("/")).unwrap();

        let id = conn.on("someEvt", event_handler(|_, _| {}));
        conn.on("other", event_handler(|_, _| {}));
        assert!(conn.has_listeners("someEvt"));

        conn.off_listener(id);
        assert!(!conn.has_listeners("someEvt"));
        assert!(conn.has_listeners("other"));

        conn.off_all();
        assert!(!conn.has_listeners("other"));
    }

    #[tokio::test]
    async fn once_listener_fires_once() {
        let hub = LocalHub::new();
        let conn = hub.transport().connect("http://localhost:3000", &ConnectParams::new("/")).unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        conn.once("chatMessage", event_handler(move |v, _| {
            let _ = tx.send(v);
        }));
        assert!(conn.has_listeners("chatMessage"));

        let peer = hub.sockets("/").pop().unwrap();
        peer.emit("chatMessage", json!("first"));
        peer.emit("chatMessage", json!("second"));

        assert_eq!(rx.recv().await, Some(json!("first")));
        assert!(!conn.has_listeners("chatMessage"));
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn events_reach_listeners_in_send_order() {
        let hub = LocalHub::new();
        let conn = hub.transport().connect("http://localhost:3000", &ConnectParams::new("/")).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        conn.on("chatMessage", event_handler(move |v, _| sink.lock().push(v)));

        let peer = hub.sockets("/").pop().unwrap();
        for i in 0..20 {
            peer.emit("chatMessage", json!(i));
        }
        let expected: Vec<Value> = (0..20).map(|i| json!(i)).collect();
        assert_eq!(*seen.lock(), expected);
    }

    #[tokio::test]
    async fn emit_after_close_fails() {
        let hub = LocalHub::new();
        let conn = hub.transport().connect("http://localhost:3000", &ConnectParams::new("/")).unwrap();
        conn.close();
        assert!(!conn.is_connected());
        let err = conn.emit("echo", json!({}), None).unwrap_err();
        assert!(matches!(err, TransportError::NotConnected { .. }));
    }

    #[tokio::test]
    async fn close_drops_pending_acks() {
        let hub = LocalHub::new();
        let conn = hub.transport().connect("http://localhost:3000", &ConnectParams::new("/")).unwrap();
        let (responder, rx) = Responder::channel();
        conn.emit("noHandler", json!({}), Some(responder)).unwrap();
        conn.close();
        assert!(rx.await.is_err());
    }
}
