//! Wiring pass: compiles directive lists and attaches the resulting
//! bindings to a connection, a component and the store.
//!
//! Hook names are resolved once here. Malformed directives are skipped,
//! while an emitBack whose source does not exist fails the whole pass
//! before anything is attached.

use std::sync::Arc;

use async_trait::async_trait;
use nspwire_core::{
    compile, event_handler, is_veto, rejects, Binding, BindingError, Handler, ParseSkip, Role, StateTree,
    StateWatch, Subscription,
};
use nspwire_settings::{NamespaceConfig, StoreWiring};
use nspwire_store::StoreBridge;
use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::component::{Callable, Component};
use crate::dispatcher::{Channel, EmitDispatcher, EmitHooks, EmitOutcome, EmitRequest};
use crate::error::EngineError;
use crate::registry::{BindingRegistry, BindingScope, StoreArea};

/// Everything one wiring pass binds against.
pub struct WiringContext<'a> {
    pub channel: &'a Channel,
    pub dispatcher: &'a Arc<EmitDispatcher>,
    pub registry: &'a BindingRegistry,
    pub store: &'a Arc<dyn StoreBridge>,
    pub component: &'a Component,
    /// Cancelled when the owning session is torn down.
    pub token: &'a CancellationToken,
    /// Report tolerated configuration problems as warnings.
    pub warnings: bool,
}

impl WiringContext<'_> {
    pub(crate) fn component_scope(&self) -> BindingScope {
        BindingScope::Component {
            connection: self.channel.conn.id().clone(),
            component: self.component.id().clone(),
        }
    }

    fn store_scope(&self, area: StoreArea) -> BindingScope {
        BindingScope::Store {
            scope: self.channel.scope.clone(),
            area,
        }
    }

    fn hook(&self, name: Option<&str>) -> Option<Arc<dyn Handler>> {
        let name = name?;
        let handler = self.component.handler(name);
        if handler.is_none() {
            config_warn!(self.warnings, hook = name, "hook not found, ignoring it");
        }
        handler
    }

    fn hooks(&self, binding: &Binding) -> EmitHooks {
        EmitHooks {
            pre: self.hook(binding.pre.as_deref()),
            post: self.hook(binding.post.as_deref()),
        }
    }

    /// Register a binding; an already registered one is skipped.
    pub(crate) fn claim(&self, scope: &BindingScope, binding: &Binding) -> bool {
        match self.registry.register(scope, binding, self.channel.conn.id()) {
            Ok(()) => true,
            Err(e) => {
                debug!(%scope, error = %e, "binding already registered, skipping");
                false
            }
        }
    }
}

/// A directive the parser ignored.
#[derive(Clone, Debug)]
pub struct Skipped {
    pub role: Role,
    pub raw: Value,
    pub reason: ParseSkip,
}

/// Result of a wiring pass. Dropping the subscriptions detaches the pass.
#[derive(Debug, Default)]
pub struct Wired {
    pub bindings: Vec<Binding>,
    pub skipped: Vec<Skipped>,
    pub subscriptions: Vec<Subscription>,
}

impl Wired {
    pub fn extend(&mut self, other: Wired) {
        self.bindings.extend(other.bindings);
        self.skipped.extend(other.skipped);
        self.subscriptions.extend(other.subscriptions);
    }
}

/// Compile a directive list in declaration order.
pub fn compile_all(raws: &[Value], role: Role) -> (Vec<Binding>, Vec<Skipped>) {
    let mut bindings = Vec::with_capacity(raws.len());
    let mut skipped = Vec::new();
    for raw in raws {
        match compile(raw, role) {
            Ok(binding) => bindings.push(binding),
            Err(reason) => {
                debug!(%role, %raw, %reason, "directive skipped");
                skipped.push(Skipped {
                    role,
                    raw: raw.clone(),
                    reason,
                });
            }
        }
    }
    (bindings, skipped)
}

/// Wire component-scoped namespace directives.
pub fn wire_namespace(ctx: &WiringContext<'_>, cfg: &NamespaceConfig) -> Result<Wired, BindingError> {
    let (emitters, mut skipped) = compile_all(&cfg.emitters, Role::Emitter);
    let (listeners, s) = compile_all(&cfg.listeners, Role::Listener);
    skipped.extend(s);
    let (emit_backs, s) = compile_all(&cfg.emit_backs, Role::EmitBack);
    skipped.extend(s);

    let data = ctx.component.data();
    for b in &emit_backs {
        let source = b.source_or_action();
        if !data.contains(source) {
            return Err(BindingError::MissingEmitBackSource {
                target: source.to_owned(),
                origin: "the component data".into(),
            });
        }
    }

    let scope = ctx.component_scope();
    let mut wired = Wired {
        skipped,
        ..Default::default()
    };

    for b in emitters {
        if ctx.claim(&scope, &b) {
            wire_emitter(ctx, &b);
            wired.bindings.push(b);
        }
    }
    for b in listeners {
        if ctx.claim(&scope, &b) {
            let sink = Sink::Data(data.clone());
            wired.subscriptions.push(attach_listener(ctx, &b, sink));
            wired.bindings.push(b);
        }
    }
    for b in emit_backs {
        if ctx.claim(&scope, &b) {
            let watch = data.watch(b.source_or_action());
            wired.subscriptions.push(attach_emit_back(ctx, &b, watch));
            wired.bindings.push(b);
        }
    }
    Ok(wired)
}

/// Wire store-scoped directives. Entries already live under the socket
/// scope are skipped, so repeated passes attach no second listener or watch.
pub fn wire_store(ctx: &WiringContext<'_>, vuex: &StoreWiring) -> Result<Wired, BindingError> {
    let (actions, mut skipped) = compile_all(&vuex.actions, Role::Listener);
    let (mutations, s) = compile_all(&vuex.mutations, Role::Listener);
    skipped.extend(s);
    let (emit_backs, s) = compile_all(&vuex.emit_backs, Role::EmitBack);
    skipped.extend(s);

    let state = ctx.store.state();
    let emit_back_scope = ctx.store_scope(StoreArea::EmitBacks);
    for b in &emit_backs {
        let source = b.source_or_action();
        let live = ctx.registry.contains(&emit_back_scope, Role::EmitBack, &b.action);
        if !live && !state.contains(source) {
            return Err(BindingError::MissingEmitBackSource {
                target: source.to_owned(),
                origin: "the store".into(),
            });
        }
    }

    let mut wired = Wired {
        skipped,
        ..Default::default()
    };

    let scope = ctx.store_scope(StoreArea::Actions);
    for b in actions {
        if ctx.claim(&scope, &b) {
            if !ctx.store.has_action(b.target_or_action()) {
                config_warn!(ctx.warnings, action = b.target_or_action(), "store action not found");
            }
            let sink = Sink::Dispatch(Arc::clone(ctx.store));
            wired.subscriptions.push(attach_listener(ctx, &b, sink));
            wired.bindings.push(b);
        }
    }

    let scope = ctx.store_scope(StoreArea::Mutations);
    for b in mutations {
        if ctx.claim(&scope, &b) {
            if !ctx.store.has_mutation(b.target_or_action()) {
                config_warn!(ctx.warnings, mutation = b.target_or_action(), "store mutation not found");
            }
            let sink = Sink::Commit(Arc::clone(ctx.store));
            wired.subscriptions.push(attach_listener(ctx, &b, sink));
            wired.bindings.push(b);
        }
    }

    for b in emit_backs {
        if ctx.claim(&emit_back_scope, &b) {
            let watch = ctx.store.watch(b.source_or_action());
            wired.subscriptions.push(attach_emit_back(ctx, &b, watch));
            wired.bindings.push(b);
        }
    }
    Ok(wired)
}

// ── Emitters ────────────────────────────────────────────────────────────────

struct EmitterCallable {
    dispatcher: Arc<EmitDispatcher>,
    channel: Channel,
    binding: Binding,
    hooks: EmitHooks,
    data: StateTree,
}

impl EmitterCallable {
    /// Call argument, else the source value; merged when both are objects.
    fn payload(&self, arg: Option<Value>) -> Value {
        let source = self.binding.source.as_deref().and_then(|p| self.data.get(p));
        match (arg, source) {
            (Some(Value::Object(arg)), Some(Value::Object(mut fields))) => {
                fields.extend(arg);
                Value::Object(fields)
            }
            (Some(arg), _) => arg,
            (None, Some(source)) => source,
            (None, None) => Value::Object(Map::new()),
        }
    }
}

#[async_trait]
impl Callable for EmitterCallable {
    async fn call(&self, arg: Option<Value>) -> Result<Value, EngineError> {
        let req = EmitRequest::new(&self.binding.action, Some(self.payload(arg)));
        let outcome = self.dispatcher.emit(&self.channel, req, &self.hooks).await?;
        match outcome {
            EmitOutcome::Acked(ack) => {
                if let Some(target) = &self.binding.target {
                    self.data.set(target, ack.clone());
                }
                Ok(ack)
            }
            EmitOutcome::Sent | EmitOutcome::Vetoed => Ok(Value::Null),
        }
    }
}

fn wire_emitter(ctx: &WiringContext<'_>, binding: &Binding) {
    let callable = EmitterCallable {
        dispatcher: Arc::clone(ctx.dispatcher),
        channel: ctx.channel.clone(),
        binding: binding.clone(),
        hooks: ctx.hooks(binding),
        data: ctx.component.data().clone(),
    };
    ctx.component.insert_callable(&binding.action, Arc::new(callable));
}

// ── Listeners ───────────────────────────────────────────────────────────────

/// Where an inbound payload goes.
#[derive(Clone)]
enum Sink {
    Data(StateTree),
    Dispatch(Arc<dyn StoreBridge>),
    Commit(Arc<dyn StoreBridge>),
}

impl Sink {
    async fn deliver(&self, target: &str, payload: Value) {
        match self {
            Self::Data(tree) => tree.set(target, payload),
            Self::Dispatch(store) => {
                if let Err(e) = store.dispatch(target, payload).await {
                    warn!(action = target, error = %e, "store dispatch failed");
                }
            }
            Self::Commit(store) => {
                if let Err(e) = store.commit(target, payload) {
                    warn!(mutation = target, error = %e, "store commit failed");
                }
            }
        }
    }
}

/// Attach a listener whose payloads are applied one at a time, in arrival
/// order, by a worker task. The worker stops with the session token or once
/// the listener is removed.
fn attach_listener(ctx: &WiringContext<'_>, binding: &Binding, sink: Sink) -> Subscription {
    let conn = Arc::clone(&ctx.channel.conn);
    if conn.has_listeners(&binding.action) {
        config_warn!(ctx.warnings, evt = %binding.action, "event already has a listener attached");
    }

    let hooks = ctx.hooks(binding);
    let target = binding.target_or_action().to_owned();
    let evt = binding.action.clone();
    let token = ctx.token.clone();
    let (tx, mut rx) = mpsc::unbounded_channel::<Value>();

    let stopped = token.clone();
    tokio::spawn(async move {
        loop {
            let payload = tokio::select! {
                _ = stopped.cancelled() => break,
                next = rx.recv() => match next {
                    Some(payload) => payload,
                    None => break,
                },
            };
            if let Some(pre) = &hooks.pre {
                if is_veto(&pre.call(payload.clone()).await) {
                    debug!(evt = %evt, "listener vetoed by pre-hook");
                    continue;
                }
            }
            sink.deliver(&target, payload.clone()).await;
            if let Some(post) = &hooks.post {
                if let Err(e) = post.call(payload).await {
                    debug!(evt = %evt, error = %e, "listener post-hook failed");
                }
            }
        }
        debug!(evt = %evt, "listener worker stopped");
    });

    let id = conn.on(
        &binding.action,
        event_handler(move |payload, _ack| {
            if token.is_cancelled() {
                return;
            }
            let _ = tx.send(payload);
        }),
    );
    Subscription::new(move || conn.off_listener(id))
}

// ── EmitBacks ───────────────────────────────────────────────────────────────

/// Emit `{data: value}` on every change of the watched value. The binding's
/// pre-hook acts as a validator: a falsy result drops that change.
fn attach_emit_back(ctx: &WiringContext<'_>, binding: &Binding, mut watch: StateWatch) -> Subscription {
    let cancel = ctx.token.child_token();
    let stopped = cancel.clone();
    let dispatcher = Arc::clone(ctx.dispatcher);
    let channel = ctx.channel.clone();
    let EmitHooks { pre: validator, post } = ctx.hooks(binding);
    let hooks = EmitHooks { pre: None, post };
    let evt = binding.action.clone();

    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stopped.cancelled() => break,
                changed = watch.changed() => {
                    let Some(value) = changed else { break };
                    let dispatcher = Arc::clone(&dispatcher);
                    let channel = channel.clone();
                    let validator = validator.clone();
                    let hooks = hooks.clone();
                    let evt = evt.clone();
                    tokio::spawn(async move {
                        let msg = json!({ "data": value });
                        if let Some(validator) = &validator {
                            let verdict = validator.call(msg.clone()).await;
                            if rejects(&verdict) {
                                debug!(evt = %evt, "emitBack rejected by validator");
                                return;
                            }
                            if let Err(e) = verdict {
                                warn!(evt = %evt, error = %e, "emitBack validator failed, emitting anyway");
                            }
                        }
                        let req = EmitRequest::new(&evt, Some(msg));
                        if let Err(e) = dispatcher.emit(&channel, req, &hooks).await {
                            debug!(evt = %evt, error = %e, "emitBack failed");
                        }
                    });
                }
            }
        }
        debug!(evt = %evt, "emitBack watch stopped");
    });

    Subscription::new(move || cancel.cancel())
}
