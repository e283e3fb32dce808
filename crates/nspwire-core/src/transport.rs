//! Boundary of the bidirectional message transport.
//!
//! The engine never frames or serializes messages itself; it drives a
//! [`Transport`] that hands out [`Connection`]s with acknowledgment-style
//! emits and per-event listener queries.

use std::sync::Arc;

use serde_json::{Map, Value};
use tokio::sync::oneshot;

use crate::errors::TransportError;
use crate::ids::ConnectionId;

/// Handle of one registered listener, used to remove exactly that listener.
pub type ListenerId = u64;

/// Callback for an incoming event. The responder is present when the
/// sending peer asked for an acknowledgment.
pub type EventHandler = Arc<dyn Fn(Value, Option<Responder>) + Send + Sync>;

pub fn event_handler<F>(f: F) -> EventHandler
where
    F: Fn(Value, Option<Responder>) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// One-shot acknowledgment channel for a single emit.
#[derive(Debug)]
pub struct Responder {
    tx: oneshot::Sender<Value>,
}

impl Responder {
    /// Create a responder and the receiver that observes its answer.
    pub fn channel() -> (Self, oneshot::Receiver<Value>) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Send the acknowledgment. Returns `false` if nobody waits anymore.
    pub fn respond(self, value: Value) -> bool {
        self.tx.send(value).is_ok()
    }
}

/// Parameters for opening a connection.
#[derive(Clone, Debug, Default)]
pub struct ConnectParams {
    /// Namespace (channel) segment, `/` by default.
    pub namespace: String,
    /// Transport-specific options passed through untouched.
    pub extra: Map<String, Value>,
}

impl ConnectParams {
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            extra: Map::new(),
        }
    }
}

pub trait Connection: Send + Sync {
    fn id(&self) -> &ConnectionId;

    fn url(&self) -> &str;

    fn namespace(&self) -> &str;

    fn is_connected(&self) -> bool;

    fn on(&self, event: &str, handler: EventHandler) -> ListenerId;

    /// Listener removed after its first delivery.
    fn once(&self, event: &str, handler: EventHandler) -> ListenerId;

    /// Remove every listener of `event`.
    fn off(&self, event: &str);

    fn off_listener(&self, id: ListenerId);

    fn off_all(&self);

    fn has_listeners(&self, event: &str) -> bool;

    /// Send an event. With `ack`, the remote peer answers through it.
    fn emit(&self, event: &str, payload: Value, ack: Option<Responder>) -> Result<(), TransportError>;

    /// Disconnect. Pending acknowledgments are dropped.
    fn close(&self);
}

pub trait Transport: Send + Sync {
    fn connect(&self, url: &str, params: &ConnectParams) -> Result<Arc<dyn Connection>, TransportError>;
}
