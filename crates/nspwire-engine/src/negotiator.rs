//! Dynamic API negotiation.
//!
//! Server side: ask the peer for its [`ApiDescriptor`] on the discovery
//! event, bind a listener per declared event and build a callable per
//! declared method. Client side: answer discovery with our own descriptor,
//! serve its methods from component handlers and generate `<evt>Emit`
//! helpers for events that carry data.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use nspwire_core::{
    event_handler, ApiDescriptor, Binding, MethodShape, Role, StateTree, Subscription,
};
use nspwire_settings::ServerApiOptions;
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::component::Callable;
use crate::dispatcher::{Channel, EmitDispatcher, EmitHooks, EmitRequest, EMIT_ERROR_KEY};
use crate::error::EngineError;
use crate::wiring::{WiringContext, Wired};

/// Default discovery event.
pub const DISCOVERY_EVT: &str = "getAPI";

/// Root path of negotiated server data in component state.
const IO_DATA: &str = "ioData";

/// Negotiated server API.
#[derive(Clone)]
pub struct ApiHandle {
    pub label: String,
    pub ready: bool,
    pub descriptor: ApiDescriptor,
    callables: BTreeMap<String, Arc<dyn Callable>>,
}

impl ApiHandle {
    pub fn methods(&self) -> Vec<String> {
        self.callables.keys().cloned().collect()
    }

    pub async fn call(&self, method: &str, arg: Option<Value>) -> Result<Value, EngineError> {
        let callable = self
            .callables
            .get(method)
            .ok_or_else(|| EngineError::UnknownCallable(method.to_owned()))?;
        callable.call(arg).await
    }

    /// Summary recorded in the store's `ioApis` area.
    pub fn to_json(&self) -> Value {
        json!({
            "ready": self.ready,
            "label": self.descriptor.label,
            "version": self.descriptor.version,
            "evts": self.descriptor.evts.keys().collect::<Vec<_>>(),
            "methods": self.methods(),
        })
    }
}

impl std::fmt::Debug for ApiHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiHandle")
            .field("label", &self.label)
            .field("ready", &self.ready)
            .field("methods", &self.methods())
            .finish()
    }
}

fn io_path(parts: &[&str]) -> String {
    let mut path = IO_DATA.to_owned();
    for part in parts {
        path.push('.');
        path.push_str(part);
    }
    path
}

// ── Server API ──────────────────────────────────────────────────────────────

struct ServerMethod {
    dispatcher: Arc<EmitDispatcher>,
    channel: Channel,
    method: String,
    data: StateTree,
}

#[async_trait]
impl Callable for ServerMethod {
    async fn call(&self, arg: Option<Value>) -> Result<Value, EngineError> {
        let msg = arg
            .or_else(|| self.data.get(&io_path(&[&self.method, "msg"])))
            .unwrap_or_else(|| Value::Object(Map::new()));
        let req = EmitRequest::new(&self.method, Some(msg));
        let ack = self
            .dispatcher
            .emit(&self.channel, req, &EmitHooks::default())
            .await?
            .into_ack()
            .unwrap_or(Value::Null);
        self.data.set(&io_path(&[&self.method, "resp"]), ack.clone());
        Ok(ack)
    }
}

/// Discover the peer's API and bind it.
///
/// Events in `ignore` get no listener. Repeating the negotiation on the
/// same connection attaches no second listener.
pub async fn negotiate_server(
    ctx: &WiringContext<'_>,
    opts: &ServerApiOptions,
    ignore: &[String],
    wired: &mut Wired,
) -> Result<ApiHandle, EngineError> {
    let evt = opts.evt.as_deref().unwrap_or(DISCOVERY_EVT);
    let data = opts.data.clone().unwrap_or_else(|| Value::Object(Map::new()));
    let req = EmitRequest::new(evt, Some(data));
    let ack = ctx
        .dispatcher
        .emit(ctx.channel, req, &EmitHooks::default())
        .await?
        .into_ack()
        .unwrap_or(Value::Null);
    let descriptor: ApiDescriptor =
        serde_json::from_value(ack).map_err(|e| EngineError::InvalidDescriptor(e.to_string()))?;

    let state = ctx.component.data();
    for (name, shape) in &descriptor.methods {
        init_method_slots(state, name, shape);
    }

    let scope = ctx.component_scope();
    for (name, shape) in &descriptor.evts {
        if ignore.iter().any(|i| i == name) {
            debug!(evt = %name, "server API event ignored");
            continue;
        }
        let binding = api_listener(name);
        if !ctx.claim(&scope, &binding) {
            continue;
        }
        let paths: Vec<String> = if shape.methods.is_empty() {
            vec![io_path(&[name])]
        } else {
            shape.methods.iter().map(|m| io_path(&[m, name])).collect()
        };
        let initial = shape.data.clone().unwrap_or_else(|| Value::Object(Map::new()));
        for path in &paths {
            if !state.contains(path) {
                state.set(path, initial.clone());
            }
        }
        wired.subscriptions.push(attach_api_listener(ctx, name, paths));
        wired.bindings.push(binding);
    }

    let callables = descriptor
        .methods
        .keys()
        .map(|method| {
            let callable: Arc<dyn Callable> = Arc::new(ServerMethod {
                dispatcher: Arc::clone(ctx.dispatcher),
                channel: ctx.channel.clone(),
                method: method.clone(),
                data: state.clone(),
            });
            (method.clone(), callable)
        })
        .collect();

    let handle = ApiHandle {
        label: ctx.channel.scope.clone(),
        ready: true,
        descriptor,
        callables,
    };
    ctx.store
        .socket_state()
        .set_io_api(&ctx.channel.scope, handle.to_json());
    info!(
        scope = %ctx.channel.scope,
        methods = handle.callables.len(),
        evts = handle.descriptor.evts.len(),
        "server API negotiated"
    );
    Ok(handle)
}

fn init_method_slots(state: &StateTree, method: &str, shape: &MethodShape) {
    let msg_path = io_path(&[method, "msg"]);
    if !state.contains(&msg_path) {
        let msg = shape.msg.clone().unwrap_or_else(|| Value::Object(Map::new()));
        state.set(&msg_path, msg);
    }
    let resp_path = io_path(&[method, "resp"]);
    if !state.contains(&resp_path) {
        state.set(&resp_path, shape.empty_response());
    }
}

fn api_listener(evt: &str) -> Binding {
    Binding {
        role: Role::Listener,
        action: evt.to_owned(),
        source: None,
        target: None,
        pre: None,
        post: None,
    }
}

fn attach_api_listener(ctx: &WiringContext<'_>, evt: &str, paths: Vec<String>) -> Subscription {
    let conn = Arc::clone(&ctx.channel.conn);
    if conn.has_listeners(evt) {
        config_warn!(ctx.warnings, evt, "server API event already has a listener attached");
    }
    let state = ctx.component.data().clone();
    let token = ctx.token.clone();
    let id = conn.on(
        evt,
        event_handler(move |payload, ack| {
            if token.is_cancelled() {
                return;
            }
            for path in &paths {
                state.set(path, payload.clone());
            }
            if let Some(ack) = ack {
                ack.respond(json!({ "ack": "ok" }));
            }
        }),
    );
    Subscription::new(move || conn.off_listener(id))
}

// ── Client API ──────────────────────────────────────────────────────────────

struct EventEmitter {
    dispatcher: Arc<EmitDispatcher>,
    channel: Channel,
    evt: String,
    data: StateTree,
}

#[async_trait]
impl Callable for EventEmitter {
    /// `{ack?, ...fields}`: sends the current `<evt>` state merged with
    /// `fields`; waits for the ack only when `ack` is `true`.
    async fn call(&self, arg: Option<Value>) -> Result<Value, EngineError> {
        let mut fields = match arg {
            Some(Value::Object(fields)) => fields,
            _ => Map::new(),
        };
        let wants_ack = matches!(fields.remove("ack"), Some(Value::Bool(true)));
        let mut msg = match self.data.get(&self.evt) {
            Some(Value::Object(current)) => current,
            _ => Map::new(),
        };
        msg.extend(fields);

        let mut req = EmitRequest::new(&self.evt, Some(Value::Object(msg)));
        req.no_ack = !wants_ack;
        let outcome = self
            .dispatcher
            .emit(&self.channel, req, &EmitHooks::default())
            .await?;
        Ok(outcome.into_ack().unwrap_or(Value::Null))
    }
}

/// Publish our descriptor and serve it.
pub fn negotiate_client(
    ctx: &WiringContext<'_>,
    descriptor: &ApiDescriptor,
    discovery_evt: &str,
    wired: &mut Wired,
) {
    if descriptor.is_empty() {
        debug!(scope = %ctx.channel.scope, "empty client API ignored");
        return;
    }
    let scope = ctx.component_scope();

    for method in descriptor.methods.keys() {
        let Some(handler) = ctx.component.handler(method) else {
            config_warn!(ctx.warnings, method = %method, "client API method has no handler");
            continue;
        };
        let binding = api_listener(method);
        if !ctx.claim(&scope, &binding) {
            continue;
        }
        let conn = Arc::clone(&ctx.channel.conn);
        let token = ctx.token.clone();
        let id = conn.on(
            method,
            event_handler(move |payload, ack| {
                if token.is_cancelled() {
                    return;
                }
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    let reply = match handler.call(payload).await {
                        Ok(value) => value,
                        Err(e) => json!({ EMIT_ERROR_KEY: e.to_string() }),
                    };
                    if let Some(ack) = ack {
                        ack.respond(reply);
                    }
                });
            }),
        );
        wired.subscriptions.push(Subscription::new(move || conn.off_listener(id)));
        wired.bindings.push(binding);
    }

    let state = ctx.component.data();
    for evt in descriptor.evts.keys() {
        let Some(defaults) = descriptor.event_defaults(evt) else {
            continue;
        };
        if state.contains(evt) {
            for (field, value) in defaults {
                let path = format!("{evt}.{field}");
                if !state.contains(&path) {
                    state.set(&path, value.clone());
                }
            }
        }
        let helper = format!("{evt}Emit");
        if ctx.component.has_member(&helper) {
            debug!(helper = %helper, "emit helper already defined, keeping it");
            continue;
        }
        ctx.component.insert_callable(
            &helper,
            Arc::new(EventEmitter {
                dispatcher: Arc::clone(ctx.dispatcher),
                channel: ctx.channel.clone(),
                evt: evt.clone(),
                data: state.clone(),
            }),
        );
    }

    let binding = api_listener(discovery_evt);
    if ctx.claim(&scope, &binding) {
        let conn = Arc::clone(&ctx.channel.conn);
        let published = serde_json::to_value(descriptor).unwrap_or(Value::Null);
        let id = conn.on(
            discovery_evt,
            event_handler(move |_, ack| {
                if let Some(ack) = ack {
                    ack.respond(published.clone());
                }
            }),
        );
        wired.subscriptions.push(Subscription::new(move || conn.off_listener(id)));
        wired.bindings.push(binding);
    }

    ctx.store
        .socket_state()
        .set_client_api(&ctx.channel.scope, descriptor.clone());
    info!(scope = %ctx.channel.scope, methods = descriptor.methods.len(), "client API published");
}
