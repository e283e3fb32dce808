//! Emit dispatcher.
//!
//! Turns a transport emit into a request with a settled outcome:
//! pre-hook gate, emit, ack/timeout race, error normalization,
//! error recording, post-hook.

use std::sync::Arc;
use std::time::Duration;

use nspwire_core::errors::EMIT_TIMEOUT;
use nspwire_core::{
    event_handler, is_veto, Connection, EmitError, ErrorRecord, Handler, Responder,
};
use nspwire_store::StoreBridge;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Ack key the remote side uses to signal an application error.
pub const EMIT_ERROR_KEY: &str = "emitError";

/// A connection as seen by emitters: where to send, where errors go,
/// and the timeout applied when a request names none.
#[derive(Clone)]
pub struct Channel {
    pub conn: Arc<dyn Connection>,
    /// `<label><namespace>` key of the error and timeout areas.
    pub scope: String,
    pub emit_timeout: Option<Duration>,
}

#[derive(Clone, Debug, Default)]
pub struct EmitRequest {
    pub evt: String,
    pub msg: Option<Value>,
    /// Overrides the channel timeout.
    pub timeout: Option<Duration>,
    /// Fire and forget.
    pub no_ack: bool,
}

impl EmitRequest {
    pub fn new(evt: impl Into<String>, msg: Option<Value>) -> Self {
        Self {
            evt: evt.into(),
            msg,
            ..Default::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn no_ack(mut self) -> Self {
        self.no_ack = true;
        self
    }
}

/// Hooks resolved at wiring time.
#[derive(Clone, Default)]
pub struct EmitHooks {
    pub pre: Option<Arc<dyn Handler>>,
    pub post: Option<Arc<dyn Handler>>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum EmitOutcome {
    Acked(Value),
    /// Sent without asking for an ack.
    Sent,
    /// The pre-hook returned `false`; nothing was sent.
    Vetoed,
}

impl EmitOutcome {
    pub fn into_ack(self) -> Option<Value> {
        match self {
            Self::Acked(v) => Some(v),
            _ => None,
        }
    }
}

pub struct EmitDispatcher {
    store: Arc<dyn StoreBridge>,
}

impl EmitDispatcher {
    pub fn new(store: Arc<dyn StoreBridge>) -> Self {
        Self { store }
    }

    pub async fn emit(
        &self,
        channel: &Channel,
        req: EmitRequest,
        hooks: &EmitHooks,
    ) -> Result<EmitOutcome, EmitError> {
        let payload = req.msg.clone().unwrap_or(Value::Null);

        if let Some(pre) = &hooks.pre {
            let gate = pre.call(payload.clone()).await;
            if is_veto(&gate) {
                debug!(evt = %req.evt, scope = %channel.scope, "emit vetoed by pre-hook");
                return Ok(EmitOutcome::Vetoed);
            }
            if let Err(e) = gate {
                warn!(evt = %req.evt, error = %e, "pre-hook failed, emitting anyway");
            }
        }

        if req.no_ack {
            channel.conn.emit(&req.evt, payload, None)?;
            run_post(hooks, Value::Null).await;
            return Ok(EmitOutcome::Sent);
        }

        let timeout = req.timeout.or(channel.emit_timeout);
        let settled = self.request(channel, &req.evt, payload, timeout).await;

        match settled {
            Ok(ack) => {
                run_post(hooks, ack.clone()).await;
                Ok(EmitOutcome::Acked(ack))
            }
            Err(err) => {
                let record = err.to_record(&req.evt, req.msg.as_ref());
                warn!(
                    evt = %req.evt,
                    scope = %channel.scope,
                    kind = err.error_kind(),
                    error = %err,
                    "emit failed"
                );
                self.store.socket_state().push_emit_error(&channel.scope, record.clone());
                run_post(hooks, error_value(&record)).await;
                Err(err)
            }
        }
    }

    async fn request(
        &self,
        channel: &Channel,
        evt: &str,
        payload: Value,
        timeout: Option<Duration>,
    ) -> Result<Value, EmitError> {
        let msg = payload.clone();
        let (responder, rx) = Responder::channel();
        channel.conn.emit(evt, payload, Some(responder))?;

        let ack = match timeout {
            Some(after) => match tokio::time::timeout(after, rx).await {
                Ok(received) => received,
                Err(_) => {
                    return Err(EmitError::Timeout {
                        evt: evt.to_owned(),
                        after,
                    })
                }
            },
            None => rx.await,
        };
        let ack = ack.map_err(|_| EmitError::Disconnected { evt: evt.to_owned() })?;
        normalize_ack(evt, &msg, ack)
    }
}

/// Split an application error out of an ack payload.
///
/// An object ack with an `emitError` key is an error: structured when it
/// carries other keys, plain otherwise.
pub fn normalize_ack(evt: &str, msg: &Value, ack: Value) -> Result<Value, EmitError> {
    let Value::Object(mut fields) = ack else {
        return Ok(ack);
    };
    let Some(raw) = fields.remove(EMIT_ERROR_KEY) else {
        return Ok(Value::Object(fields));
    };
    let message = match raw {
        Value::String(s) => s,
        other => other.to_string(),
    };
    let msg = (!msg.is_null()).then(|| msg.clone());
    let record = ErrorRecord::new(message, evt, msg);
    if fields.is_empty() {
        Err(EmitError::Remote { record })
    } else {
        Err(EmitError::Ack {
            record: record.with_details(fields),
        })
    }
}

fn error_value(record: &ErrorRecord) -> Value {
    let mut value = Map::new();
    value.insert(EMIT_ERROR_KEY.into(), Value::String(record.message.clone()));
    value.insert("evt".into(), Value::String(record.evt.clone()));
    for (k, v) in &record.details {
        value.insert(k.clone(), v.clone());
    }
    Value::Object(value)
}

async fn run_post(hooks: &EmitHooks, settled: Value) {
    if let Some(post) = &hooks.post {
        if let Err(e) = post.call(settled).await {
            debug!(error = %e, "post-hook failed");
        }
    }
}

/// Emit and wait for the raw ack. No timeout, no error recording.
pub async fn emit_p(conn: &dyn Connection, evt: &str, payload: Value) -> Result<Value, EmitError> {
    let (responder, rx) = Responder::channel();
    conn.emit(evt, payload, Some(responder))?;
    rx.await.map_err(|_| EmitError::Disconnected { evt: evt.to_owned() })
}

/// Resolve with the next payload of `evt`; the listener removes itself.
pub async fn once_p(conn: &dyn Connection, evt: &str) -> Result<Value, EmitError> {
    let (tx, rx) = oneshot::channel();
    let tx = Mutex::new(Some(tx));
    conn.once(
        evt,
        event_handler(move |payload, _| {
            if let Some(tx) = tx.lock().take() {
                let _ = tx.send(payload);
            }
        }),
    );
    rx.await.map_err(|_| EmitError::Disconnected { evt: evt.to_owned() })
}

/// True for the literal timeout message.
pub fn is_timeout_record(record: &ErrorRecord) -> bool {
    record.message == EMIT_TIMEOUT
}

#[cfg(test)]
mod tests {
    use super::*;
    use nspwire_core::{handler_fn, ConnectParams, Transport};
    use nspwire_store::MemoryStore;
    use nspwire_transport::LocalHub;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn setup() -> (LocalHub, Channel, Arc<MemoryStore>, EmitDispatcher) {
        let hub = LocalHub::new();
        hub.handle("/index", "getMessage", |_, msg, ack| {
            if let Some(ack) = ack {
                ack.respond(json!({"echoed": msg}));
            }
        });
        hub.handle("/index", "badRequest", |_, _, ack| {
            if let Some(ack) = ack {
                ack.respond(json!({"emitError": "badRequest...Input does not match schema", "code": 400}));
            }
        });
        hub.handle("/index", "plainError", |_, _, ack| {
            if let Some(ack) = ack {
                ack.respond(json!({"emitError": "SomeError"}));
            }
        });
        let conn = hub
            .transport()
            .connect("http://localhost:3000", &ConnectParams::new("/index"))
            .unwrap();
        let store = Arc::new(MemoryStore::default());
        let channel = Channel {
            conn,
            scope: "home/index".into(),
            emit_timeout: None,
        };
        let dispatcher = EmitDispatcher::new(store.clone());
        (hub, channel, store, dispatcher)
    }

    fn counter() -> (Arc<AtomicUsize>, Arc<dyn Handler>) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        let handler = handler_fn(move |_| {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok(Value::Null)
            }
        });
        (count, handler)
    }

    #[tokio::test]
    async fn ack_resolves_request() {
        let (_hub, channel, store, dispatcher) = setup();
        let out = dispatcher
            .emit(&channel, EmitRequest::new("getMessage", Some(json!({"id": 1}))), &EmitHooks::default())
            .await
            .unwrap();
        assert_eq!(out, EmitOutcome::Acked(json!({"echoed": {"id": 1}})));
        assert_eq!(store.socket_state().error_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_rejects_and_records() {
        let (_hub, channel, store, dispatcher) = setup();
        let req = EmitRequest::new("noHandler", None).with_timeout(Duration::from_millis(500));
        let err = dispatcher.emit(&channel, req, &EmitHooks::default()).await.unwrap_err();
        assert_eq!(err.to_string(), "emitTimeout");

        let errs = store.socket_state().emit_errors("home/index", "noHandler");
        assert_eq!(errs.len(), 1);
        assert!(is_timeout_record(&errs[0]));
    }

    #[tokio::test(start_paused = true)]
    async fn channel_timeout_applies_when_request_has_none() {
        let (_hub, mut channel, _store, dispatcher) = setup();
        channel.emit_timeout = Some(Duration::from_millis(100));
        let err = dispatcher
            .emit(&channel, EmitRequest::new("noHandler", None), &EmitHooks::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EmitError::Timeout { after, .. } if after == Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn no_ack_resolves_immediately_without_errors() {
        let (_hub, channel, store, dispatcher) = setup();
        let out = dispatcher
            .emit(&channel, EmitRequest::new("noHandler", None).no_ack(), &EmitHooks::default())
            .await
            .unwrap();
        assert_eq!(out, EmitOutcome::Sent);
        assert_eq!(store.socket_state().error_count(), 0);
    }

    #[tokio::test]
    async fn structured_ack_error_is_json() {
        let (_hub, channel, store, dispatcher) = setup();
        let err = dispatcher
            .emit(&channel, EmitRequest::new("badRequest", Some(json!({"x": 1}))), &EmitHooks::default())
            .await
            .unwrap_err();
        let EmitError::Ack { record } = &err else {
            panic!("expected ack error, got {err:?}");
        };
        assert_eq!(record.details.get("code"), Some(&json!(400)));
        let parsed: Value = serde_json::from_str(&err.to_string()).unwrap();
        assert_eq!(parsed["message"], "badRequest...Input does not match schema");

        let errs = store.socket_state().emit_errors("home/index", "badRequest");
        assert_eq!(errs[0].msg, Some(json!({"x": 1})));
    }

    #[tokio::test]
    async fn plain_ack_error_is_message() {
        let (_hub, channel, _store, dispatcher) = setup();
        let err = dispatcher
            .emit(&channel, EmitRequest::new("plainError", None), &EmitHooks::default())
            .await
            .unwrap_err();
        assert!(matches!(err, EmitError::Remote { .. }));
        assert_eq!(err.to_string(), "SomeError");
    }

    #[tokio::test]
    async fn veto_skips_emit_and_post() {
        let (_hub, channel, store, dispatcher) = setup();
        let (posts, post) = counter();
        let hooks = EmitHooks {
            pre: Some(handler_fn(|_| async { Ok(json!(false)) })),
            post: Some(post),
        };
        let req = EmitRequest::new("noHandler", None).with_timeout(Duration::from_millis(10));
        let out = dispatcher.emit(&channel, req, &hooks).await.unwrap();
        assert_eq!(out, EmitOutcome::Vetoed);
        assert_eq!(posts.load(Ordering::SeqCst), 0);
        assert_eq!(store.socket_state().error_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn post_runs_on_success_and_failure() {
        let (_hub, channel, _store, dispatcher) = setup();
        let (posts, post) = counter();
        let hooks = EmitHooks {
            pre: Some(handler_fn(|_| async { Ok(json!(true)) })),
            post: Some(post),
        };
        dispatcher
            .emit(&channel, EmitRequest::new("getMessage", None), &hooks)
            .await
            .unwrap();
        let req = EmitRequest::new("noHandler", None).with_timeout(Duration::from_millis(50));
        dispatcher.emit(&channel, req, &hooks).await.unwrap_err();
        assert_eq!(posts.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failing_post_hook_is_swallowed() {
        let (_hub, channel, _store, dispatcher) = setup();
        let hooks = EmitHooks {
            pre: None,
            post: Some(handler_fn(|_| async { Err("post exploded".into()) })),
        };
        let out = dispatcher
            .emit(&channel, EmitRequest::new("getMessage", None), &hooks)
            .await
            .unwrap();
        assert!(matches!(out, EmitOutcome::Acked(_)));
    }

    #[tokio::test]
    async fn close_fails_pending_request() {
        let (_hub, channel, _store, dispatcher) = setup();
        let conn = Arc::clone(&channel.conn);
        let pending = tokio::spawn(async move {
            dispatcher
                .emit(&channel, EmitRequest::new("noHandler", None), &EmitHooks::default())
                .await
        });
        tokio::task::yield_now().await;
        conn.close();
        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, EmitError::Disconnected { .. }));
    }

    #[tokio::test]
    async fn emit_p_and_once_p() {
        let (hub, channel, _store, _dispatcher) = setup();
        let ack = emit_p(channel.conn.as_ref(), "getMessage", json!("hi")).await.unwrap();
        assert_eq!(ack, json!({"echoed": "hi"}));

        let conn = Arc::clone(&channel.conn);
        let waiter = tokio::spawn(async move { once_p(conn.as_ref(), "chatMessage").await });
        tokio::task::yield_now().await;
        let peer = hub.sockets("/index").pop().unwrap();
        peer.emit("chatMessage", json!("Hi, this is a chat message"));
        assert_eq!(waiter.await.unwrap().unwrap(), json!("Hi, this is a chat message"));
        assert!(!channel.conn.has_listeners("chatMessage"));
    }

    #[test]
    fn normalize_passes_plain_acks() {
        assert_eq!(normalize_ack("e", &Value::Null, json!("ok")).unwrap(), json!("ok"));
        assert_eq!(normalize_ack("e", &Value::Null, json!({"a": 1})).unwrap(), json!({"a": 1}));
    }
}
