//! Server side of the in-process transport.
//!
//! A [`LocalHub`] plays the remote peer: it owns namespace event handlers,
//! tracks the connections opened through its [`LocalTransport`] and lets
//! handlers push events back to a client through a [`PeerSocket`].

use std::sync::Arc;

use dashmap::DashMap;
use nspwire_core::{ConnectParams, Connection, ConnectionId, Responder, Transport, TransportError};
use serde_json::Value;
use tracing::{debug, trace};

use crate::connection::LocalConnection;

/// Server-side handler for one namespace event.
pub type PeerHandler = Arc<dyn Fn(PeerSocket, Value, Option<Responder>) + Send + Sync>;

pub(crate) struct HubInner {
    handlers: DashMap<(String, String), PeerHandler>,
    sockets: DashMap<ConnectionId, Arc<LocalConnection>>,
}

impl HubInner {
    /// Hand a client emit to the namespace handler.
    ///
    /// Without a handler, a parked ack stays pending until the client
    /// closes, which is how an unanswered emit looks on a real wire.
    pub(crate) fn route(
        &self,
        from: &ConnectionId,
        namespace: &str,
        event: &str,
        payload: Value,
        ack_key: Option<u64>,
    ) {
        let handler = self
            .handlers
            .get(&(namespace.to_owned(), event.to_owned()))
            .map(|h| Arc::clone(h.value()));
        let Some(handler) = handler else {
            trace!(connection = %from, namespace, event, "no server handler");
            return;
        };
        let Some(conn) = self.sockets.get(from).map(|c| Arc::clone(c.value())) else {
            return;
        };

        let responder = ack_key.map(|key| {
            let (responder, rx) = Responder::channel();
            let conn = Arc::clone(&conn);
            tokio::spawn(async move {
                if let Ok(value) = rx.await {
                    conn.resolve(key, value);
                }
            });
            responder
        });

        let peer = PeerSocket { conn };
        tokio::spawn(async move { handler(peer, payload, responder) });
    }

    pub(crate) fn remove(&self, id: &ConnectionId) {
        self.sockets.remove(id);
    }
}

/// In-process stand-in for a socket server.
#[derive(Clone)]
pub struct LocalHub {
    inner: Arc<HubInner>,
}

impl LocalHub {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HubInner {
                handlers: DashMap::new(),
                sockets: DashMap::new(),
            }),
        }
    }

    /// Register the server handler for `event` on `namespace`.
    pub fn handle<F>(&self, namespace: &str, event: &str, f: F)
    where
        F: Fn(PeerSocket, Value, Option<Responder>) + Send + Sync + 'static,
    {
        self.inner
            .handlers
            .insert((namespace.to_owned(), event.to_owned()), Arc::new(f));
    }

    pub fn transport(&self) -> LocalTransport {
        LocalTransport {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Server views of the open connections on `namespace`.
    pub fn sockets(&self, namespace: &str) -> Vec<PeerSocket> {
        self.inner
            .sockets
            .iter()
            .filter(|entry| entry.value().namespace() == namespace)
            .map(|entry| PeerSocket {
                conn: Arc::clone(entry.value()),
            })
            .collect()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.sockets.len()
    }
}

impl Default for LocalHub {
    fn default() -> Self {
        Self::new()
    }
}

/// Server view of one client connection.
#[derive(Clone)]
pub struct PeerSocket {
    conn: Arc<LocalConnection>,
}

impl PeerSocket {
    pub fn id(&self) -> &ConnectionId {
        self.conn.id()
    }

    pub fn namespace(&self) -> &str {
        self.conn.namespace()
    }

    /// Push an event to the client without asking for an ack.
    pub fn emit(&self, event: &str, payload: Value) {
        self.conn.deliver(event, payload, None);
    }

    /// Push an event and wait for the client's ack. `None` when nobody
    /// answered before the responder was dropped.
    pub async fn request(&self, event: &str, payload: Value) -> Option<Value> {
        let (responder, rx) = Responder::channel();
        self.conn.deliver(event, payload, Some(responder));
        rx.await.ok()
    }

    pub fn disconnect(&self) {
        self.conn.close();
    }
}

/// [`Transport`] that opens connections against a [`LocalHub`].
#[derive(Clone)]
pub struct LocalTransport {
    inner: Arc<HubInner>,
}

impl Transport for LocalTransport {
    fn connect(&self, url: &str, params: &ConnectParams) -> Result<Arc<dyn Connection>, TransportError> {
        if url.is_empty() {
            return Err(TransportError::ConnectFailed {
                url: url.to_owned(),
                reason: "empty url".into(),
            });
        }
        let namespace = if params.namespace.is_empty() {
            "/".to_owned()
        } else {
            params.namespace.clone()
        };
        let conn = Arc::new(LocalConnection::new(
            url.to_owned(),
            namespace,
            Arc::downgrade(&self.inner),
        ));
        self.inner.sockets.insert(conn.id().clone(), Arc::clone(&conn));
        debug!(connection = %conn.id(), url, namespace = conn.namespace(), "connected");
        Ok(conn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nspwire_core::event_handler;
    use serde_json::json;
    use std::time::Duration;

    fn echo_hub() -> LocalHub {
        let hub = LocalHub::new();
        hub.handle("/index", "getMessage", |_, msg, ack| {
            if let Some(ack) = ack {
                ack.respond(json!({"echoed": msg}));
            }
        });
        hub
    }

    #[tokio::test]
    async fn emit_with_ack_reaches_handler() {
        let hub = echo_hub();
        let conn = hub
            .transport()
            .connect("http://localhost:3000", &ConnectParams::new("/index"))
            .unwrap();

        let (responder, rx) = Responder::channel();
        conn.emit("getMessage", json!({"id": "abc123"}), Some(responder)).unwrap();
        assert_eq!(rx.await.unwrap(), json!({"echoed": {"id": "abc123"}}));
    }

    #[tokio::test]
    async fn handlers_are_namespace_scoped() {
        let hub = echo_hub();
        let conn = hub
            .transport()
            .connect("http://localhost:3000", &ConnectParams::new("/other"))
            .unwrap();

        let (responder, rx) = Responder::channel();
        conn.emit("getMessage", json!({}), Some(responder)).unwrap();
        let waited = tokio::time::timeout(Duration::from_millis(50), rx).await;
        assert!(waited.is_err(), "no handler on /other, ack must stay pending");
    }

    #[tokio::test]
    async fn peer_can_push_and_request() {
        let hub = LocalHub::new();
        hub.handle("/", "subscribe", |peer, _, _| {
            peer.emit("tick", json!(1));
        });
        let conn = hub.transport().connect("http://localhost:3000", &ConnectParams::default()).unwrap();
        assert_eq!(conn.namespace(), "/");

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        conn.on("tick", event_handler(move |v, _| {
            let _ = tx.send(v);
        }));
        conn.on("ping", event_handler(|_, ack| {
            if let Some(ack) = ack {
                ack.respond(json!("pong"));
            }
        }));

        conn.emit("subscribe", Value::Null, None).unwrap();
        assert_eq!(rx.recv().await, Some(json!(1)));

        let peer = hub.sockets("/").pop().unwrap();
        assert_eq!(peer.request("ping", Value::Null).await, Some(json!("pong")));
    }

    #[tokio::test]
    async fn closing_deregisters() {
        let hub = echo_hub();
        let conn = hub.transport().connect("http://a", &ConnectParams::new("/index")).unwrap();
        assert_eq!(hub.connection_count(), 1);
        hub.sockets("/index")[0].disconnect();
        assert!(!conn.is_connected());
        assert_eq!(hub.connection_count(), 0);
    }

    #[test]
    fn empty_url_is_rejected() {
        let hub = LocalHub::new();
        let err = hub.transport().connect("", &ConnectParams::default()).err().unwrap();
        assert!(matches!(err, TransportError::ConnectFailed { .. }));
    }
}
