//! Namespace wiring engine.
//!
//! [`Engine::connect`] resolves a connect request, acquires a connection
//! from the [`SessionRegistry`], runs the wiring pass for the namespace and
//! store directives, negotiates APIs when asked, and returns a
//! [`SocketHandle`]. Components that declare a status key also get the
//! connection status mirrored into their data. [`Engine::teardown`]
//! releases what a component wired.

/// `warn!` when configuration warnings are enabled, `debug!` otherwise.
macro_rules! config_warn {
    ($enabled:expr, $($arg:tt)+) => {
        if $enabled {
            ::tracing::warn!($($arg)+)
        } else {
            ::tracing::debug!($($arg)+)
        }
    };
}

pub mod component;
pub mod dispatcher;
pub mod error;
pub mod negotiator;
pub mod registry;
pub mod session;
pub mod status;
pub mod wiring;

pub use component::{Callable, Component};
pub use dispatcher::{emit_p, once_p, Channel, EmitDispatcher, EmitHooks, EmitOutcome, EmitRequest};
pub use error::EngineError;
pub use negotiator::{ApiHandle, DISCOVERY_EVT};
pub use registry::{BindingRegistry, BindingScope, StoreArea};
pub use session::{Session, SessionRegistry};
pub use wiring::{compile_all, Skipped, Wired, WiringContext};

use std::sync::Arc;
use std::time::Duration;

use nspwire_core::{Binding, ComponentId, Connection, EmitError, Transport};
use nspwire_settings::{resolve_connect, ConnectOptions, SocketEntry, WireSettings};
use nspwire_store::StoreBridge;
use parking_lot::RwLock;
use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Payload of the store-level `emit` action.
#[derive(Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EmitAction {
    pub evt: String,
    pub msg: Option<Value>,
    /// Label of a persisted connection to emit on.
    pub label: Option<String>,
    #[serde(skip)]
    pub socket: Option<Arc<dyn Connection>>,
    pub emit_timeout: Option<u64>,
    pub no_ack: bool,
}

/// A wired connection as returned to the component.
#[derive(Clone)]
pub struct SocketHandle {
    session: Arc<Session>,
    dispatcher: Arc<EmitDispatcher>,
    api: Option<ApiHandle>,
    bindings: Arc<Vec<Binding>>,
    skipped: Arc<Vec<Skipped>>,
}

impl SocketHandle {
    pub fn connection(&self) -> &Arc<dyn Connection> {
        self.session.conn()
    }

    pub fn scope(&self) -> &str {
        self.session.scope()
    }

    pub fn label(&self) -> &str {
        &self.session.label
    }

    pub fn emit_timeout(&self) -> Option<Duration> {
        self.session.emit_timeout()
    }

    pub fn has_listeners(&self, evt: &str) -> bool {
        self.connection().has_listeners(evt)
    }

    /// Negotiated server API, when one was requested.
    pub fn api(&self) -> Option<&ApiHandle> {
        self.api.as_ref()
    }

    /// Bindings this connect attached, in declaration order.
    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn skipped(&self) -> &[Skipped] {
        &self.skipped
    }

    /// Emit through the dispatcher with this connection's defaults.
    pub async fn emit(&self, req: EmitRequest) -> Result<Option<Value>, EmitError> {
        let outcome = self
            .dispatcher
            .emit(&self.session.channel, req, &EmitHooks::default())
            .await?;
        Ok(outcome.into_ack())
    }

    pub async fn emit_p(&self, evt: &str, payload: Value) -> Result<Value, EmitError> {
        emit_p(self.connection().as_ref(), evt, payload).await
    }

    pub async fn once_p(&self, evt: &str) -> Result<Value, EmitError> {
        once_p(self.connection().as_ref(), evt).await
    }

    pub fn close(&self) {
        self.connection().close();
    }
}

impl std::fmt::Debug for SocketHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketHandle")
            .field("scope", &self.scope())
            .field("connection", self.connection().id())
            .field("bindings", &self.bindings.len())
            .finish()
    }
}

/// Entry point owning the registries of one host application context.
pub struct Engine {
    settings: WireSettings,
    runtime_sockets: RwLock<Vec<SocketEntry>>,
    store: Arc<dyn StoreBridge>,
    registry: Arc<BindingRegistry>,
    sessions: SessionRegistry,
    dispatcher: Arc<EmitDispatcher>,
}

impl Engine {
    pub fn new(settings: WireSettings, transport: Arc<dyn Transport>, store: Arc<dyn StoreBridge>) -> Self {
        let registry = Arc::new(BindingRegistry::new());
        Self {
            settings,
            runtime_sockets: RwLock::new(Vec::new()),
            sessions: SessionRegistry::new(transport, Arc::clone(&registry)),
            dispatcher: Arc::new(EmitDispatcher::new(Arc::clone(&store))),
            registry,
            store,
        }
    }

    /// Socket entries supplied at runtime; merged after build-time ones.
    pub fn set_runtime_sockets(&self, sockets: Vec<SocketEntry>) {
        *self.runtime_sockets.write() = sockets;
    }

    pub fn settings(&self) -> &WireSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn StoreBridge> {
        &self.store
    }

    pub fn registry(&self) -> &BindingRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &SessionRegistry {
        &self.sessions
    }

    /// Connect `component` and wire everything the request configures.
    pub async fn connect(&self, component: &Component, opts: ConnectOptions) -> Result<SocketHandle, EngineError> {
        let resolved = {
            let runtime = self.runtime_sockets.read();
            resolve_connect(&self.settings, &runtime, &opts)?
        };
        let acquired = self.sessions.acquire(&resolved)?;
        self.store
            .socket_state()
            .set_emit_timeout(&resolved.scope, resolved.emit_timeout);

        let channel = Channel {
            conn: Arc::clone(&acquired.conn),
            scope: resolved.scope.clone(),
            emit_timeout: resolved.emit_timeout,
        };
        let token = CancellationToken::new();
        let ctx = WiringContext {
            channel: &channel,
            dispatcher: &self.dispatcher,
            registry: &self.registry,
            store: &self.store,
            component,
            token: &token,
            warnings: resolved.warnings,
        };

        let wired = match self.wire(&ctx, &resolved).await {
            Ok(wired) => wired,
            Err(e) => {
                token.cancel();
                if !acquired.reused {
                    self.sessions.discard(&acquired.conn);
                }
                return Err(e);
            }
        };

        let Wired {
            bindings,
            skipped,
            subscriptions,
        } = wired.0;
        debug!(
            scope = %resolved.scope,
            bindings = bindings.len(),
            skipped = skipped.len(),
            reused = acquired.reused,
            "connection wired"
        );
        let session = self
            .sessions
            .track(&resolved, component.id(), channel, token, subscriptions);
        Ok(SocketHandle {
            session,
            dispatcher: Arc::clone(&self.dispatcher),
            api: wired.1,
            bindings: Arc::new(bindings),
            skipped: Arc::new(skipped),
        })
    }

    async fn wire(
        &self,
        ctx: &WiringContext<'_>,
        resolved: &nspwire_settings::ResolvedConnect,
    ) -> Result<(Wired, Option<ApiHandle>), EngineError> {
        let mut wired = status::wire_status(ctx, &resolved.status_prop, &resolved.url);
        wired.extend(wiring::wire_namespace(ctx, &resolved.namespace_cfg)?);
        wired.extend(wiring::wire_store(ctx, &resolved.vuex)?);

        let api = match &resolved.server_api {
            Some(opts) => Some(
                negotiator::negotiate_server(ctx, opts, &resolved.api_ignore_evts, &mut wired).await?,
            ),
            None => None,
        };
        if let Some(client) = &resolved.client_api {
            let discovery = resolved
                .server_api
                .as_ref()
                .and_then(|s| s.evt.as_deref())
                .unwrap_or(DISCOVERY_EVT);
            negotiator::negotiate_client(ctx, client, discovery, &mut wired);
        }
        Ok((wired, api))
    }

    /// The store-level `emit` action.
    ///
    /// Uses the explicit socket, else the persisted connection registered
    /// under `label`. The timeout falls back to the one recorded for the
    /// connection's scope.
    pub async fn emit_action(&self, action: EmitAction) -> Result<Option<Value>, EmitError> {
        let conn = match (&action.socket, &action.label) {
            (Some(socket), _) => Arc::clone(socket),
            (None, Some(label)) => self
                .sessions
                .persisted_for_label(label)
                .ok_or(EmitError::MissingConnection)?,
            (None, None) => return Err(EmitError::MissingConnection),
        };
        let scope = self.sessions.scope_of(conn.id()).unwrap_or_else(|| {
            let label = action.label.as_deref().unwrap_or_default();
            format!("{label}{}", conn.namespace())
        });
        let timeout = action
            .emit_timeout
            .map(Duration::from_millis)
            .or_else(|| self.store.socket_state().emit_timeout(&scope));

        let channel = Channel {
            conn,
            scope,
            emit_timeout: timeout,
        };
        let req = EmitRequest {
            evt: action.evt,
            msg: action.msg,
            timeout: None,
            no_ack: action.no_ack,
        };
        let outcome = self.dispatcher.emit(&channel, req, &EmitHooks::default()).await?;
        Ok(outcome.into_ack())
    }

    /// Release everything `component` wired with `teardown` enabled.
    pub fn teardown(&self, component: &ComponentId) -> usize {
        self.sessions.teardown(component)
    }

    /// Close every connection the engine opened.
    pub fn shutdown(&self) {
        self.sessions.shutdown();
    }
}
