//! Session registry: connection lifetime, persistence and teardown.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use nspwire_core::{ComponentId, ConnectParams, Connection, ConnectionId, Subscription, Transport, TransportError};
use nspwire_settings::ResolvedConnect;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::dispatcher::Channel;
use crate::registry::BindingRegistry;

/// One component's use of one connection.
pub struct Session {
    pub label: String,
    pub channel: Channel,
    pub owner: ComponentId,
    pub persist_key: Option<String>,
    pub teardown: bool,
    token: CancellationToken,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl Session {
    pub fn conn(&self) -> &Arc<dyn Connection> {
        &self.channel.conn
    }

    pub fn scope(&self) -> &str {
        &self.channel.scope
    }

    pub fn emit_timeout(&self) -> Option<Duration> {
        self.channel.emit_timeout
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.lock().len()
    }

    /// Stop watch tasks and detach every listener this session attached.
    fn detach(&self) {
        self.token.cancel();
        let subs = std::mem::take(&mut *self.subscriptions.lock());
        drop(subs);
    }
}

/// Live connection handed out by [`SessionRegistry::acquire`].
pub struct Acquired {
    pub conn: Arc<dyn Connection>,
    /// An existing persisted connection was returned.
    pub reused: bool,
}

/// Creates, persists and tears down connections.
///
/// Persisted connections are keyed by `(scope, persistence key)`, where the
/// scope is `<label><namespace>`, and are handed out again only while they
/// report themselves connected.
pub struct SessionRegistry {
    transport: Arc<dyn Transport>,
    bindings: Arc<BindingRegistry>,
    persisted: DashMap<(String, String), Arc<dyn Connection>>,
    owned: DashMap<ComponentId, Vec<Arc<Session>>>,
    /// `teardown: false` sessions whose component is gone.
    detached: Mutex<Vec<Arc<Session>>>,
}

impl SessionRegistry {
    pub fn new(transport: Arc<dyn Transport>, bindings: Arc<BindingRegistry>) -> Self {
        Self {
            transport,
            bindings,
            persisted: DashMap::new(),
            owned: DashMap::new(),
            detached: Mutex::new(Vec::new()),
        }
    }

    /// Return the live persisted connection for the request, or open one.
    pub fn acquire(&self, resolved: &ResolvedConnect) -> Result<Acquired, TransportError> {
        if let Some(key) = &resolved.persist_key {
            let slot = (resolved.scope.clone(), key.clone());
            if let Some(conn) = self.persisted.get(&slot).map(|c| Arc::clone(c.value())) {
                if conn.is_connected() {
                    debug!(scope = %resolved.scope, key = %key, connection = %conn.id(), "reusing persisted connection");
                    return Ok(Acquired { conn, reused: true });
                }
                debug!(scope = %resolved.scope, key = %key, "evicting disconnected persisted connection");
                self.persisted.remove(&slot);
                self.bindings.release_connection(conn.id());
            }
        }

        let params = ConnectParams {
            namespace: resolved.namespace.clone(),
            extra: resolved.extra.clone(),
        };
        let conn = self.transport.connect(&resolved.url, &params)?;
        info!(
            label = %resolved.label,
            url = %resolved.url,
            namespace = %resolved.namespace,
            connection = %conn.id(),
            persisted = resolved.persist_key.is_some(),
            "connection opened"
        );
        if let Some(key) = &resolved.persist_key {
            self.persisted
                .insert((resolved.scope.clone(), key.clone()), Arc::clone(&conn));
        }
        Ok(Acquired { conn, reused: false })
    }

    /// Record a wired session under its owning component.
    pub fn track(
        &self,
        resolved: &ResolvedConnect,
        owner: &ComponentId,
        channel: Channel,
        token: CancellationToken,
        subscriptions: Vec<Subscription>,
    ) -> Arc<Session> {
        let session = Arc::new(Session {
            label: resolved.label.clone(),
            channel,
            owner: owner.clone(),
            persist_key: resolved.persist_key.clone(),
            teardown: resolved.teardown,
            token,
            subscriptions: Mutex::new(subscriptions),
        });
        self.owned
            .entry(owner.clone())
            .or_default()
            .push(Arc::clone(&session));
        session
    }

    /// Live persisted connection for `(scope, key)`.
    pub fn persisted(&self, scope: &str, key: &str) -> Option<Arc<dyn Connection>> {
        self.persisted
            .get(&(scope.to_owned(), key.to_owned()))
            .map(|c| Arc::clone(c.value()))
            .filter(|c| c.is_connected())
    }

    /// Live persisted connection registered under `label`: either its
    /// scope label (`home/dynamic`) or a caller-supplied persistence key.
    pub fn persisted_for_label(&self, label: &str) -> Option<Arc<dyn Connection>> {
        self.persisted
            .iter()
            .filter(|e| e.key().0 == label || e.key().1 == label)
            .map(|e| Arc::clone(e.value()))
            .find(|c| c.is_connected())
    }

    /// Scope label a connection was wired under.
    pub fn scope_of(&self, connection: &ConnectionId) -> Option<String> {
        let owned = self.owned.iter().find_map(|e| {
            e.value()
                .iter()
                .find(|s| s.conn().id() == connection)
                .map(|s| s.scope().to_owned())
        });
        owned.or_else(|| {
            self.detached
                .lock()
                .iter()
                .find(|s| s.conn().id() == connection)
                .map(|s| s.scope().to_owned())
        })
    }

    pub fn sessions_of(&self, owner: &ComponentId) -> usize {
        self.owned.get(owner).map_or(0, |s| s.len())
    }

    /// The owning component was destroyed.
    ///
    /// Sessions created with `teardown` are closed; the others stay
    /// attached and are kept alive by the registry. Returns how many
    /// sessions were closed.
    pub fn teardown(&self, owner: &ComponentId) -> usize {
        let Some((_, sessions)) = self.owned.remove(owner) else {
            return 0;
        };
        let mut closed = 0;
        for session in sessions {
            if session.teardown {
                self.close_session(&session);
                closed += 1;
            } else {
                debug!(connection = %session.conn().id(), "session survives component teardown");
                self.detached.lock().push(session);
            }
        }
        info!(component = %owner, closed, "component torn down");
        closed
    }

    /// Close every session, persisted or not.
    pub fn shutdown(&self) {
        let owners: Vec<ComponentId> = self.owned.iter().map(|e| e.key().clone()).collect();
        for owner in owners {
            if let Some((_, sessions)) = self.owned.remove(&owner) {
                sessions.iter().for_each(|s| self.close_session(s));
            }
        }
        let detached = std::mem::take(&mut *self.detached.lock());
        detached.iter().for_each(|s| self.close_session(s));
    }

    /// Drop a connection whose wiring pass failed before it was tracked.
    pub fn discard(&self, conn: &Arc<dyn Connection>) {
        conn.off_all();
        conn.close();
        self.bindings.release_connection(conn.id());
        self.persisted.retain(|_, c| c.id() != conn.id());
    }

    fn close_session(&self, session: &Session) {
        session.detach();
        let conn = session.conn();
        conn.off_all();
        conn.close();
        let released = self.bindings.release_connection(conn.id());
        self.persisted.retain(|_, c| c.id() != conn.id());
        debug!(connection = %conn.id(), released, "session closed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nspwire_settings::{resolve_connect, ConnectOptions, Persist, SocketEntry, WireSettings};
    use nspwire_transport::LocalHub;

    fn settings() -> WireSettings {
        WireSettings {
            sockets: vec![SocketEntry {
                name: "home".into(),
                url: Some("http://localhost:3000".into()),
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    fn resolved(persist: Persist, teardown: Option<bool>) -> ResolvedConnect {
        on_channel(None, persist, teardown)
    }

    fn on_channel(channel: Option<&str>, persist: Persist, teardown: Option<bool>) -> ResolvedConnect {
        let opts = ConnectOptions {
            channel: channel.map(str::to_owned),
            persist,
            teardown,
            ..Default::default()
        };
        resolve_connect(&settings(), &[], &opts).unwrap()
    }

    fn registry(hub: &LocalHub) -> SessionRegistry {
        SessionRegistry::new(Arc::new(hub.transport()), Arc::new(BindingRegistry::new()))
    }

    fn track(reg: &SessionRegistry, r: &ResolvedConnect, owner: &ComponentId, conn: Arc<dyn Connection>) -> Arc<Session> {
        let channel = Channel {
            conn,
            scope: r.scope.clone(),
            emit_timeout: None,
        };
        reg.track(r, owner, channel, CancellationToken::new(), Vec::new())
    }

    #[tokio::test]
    async fn persisted_connection_is_reused() {
        let hub = LocalHub::new();
        let reg = registry(&hub);
        let r = resolved(Persist::Flag(true), None);

        let first = reg.acquire(&r).unwrap();
        let second = reg.acquire(&r).unwrap();
        assert!(!first.reused);
        assert!(second.reused);
        assert_eq!(first.conn.id(), second.conn.id());
        assert!(reg.persisted("home/", "home/").is_some());
        assert!(reg.persisted_for_label("home/").is_some());
        assert!(reg.persisted_for_label("home/dynamic").is_none());
    }

    #[tokio::test]
    async fn persisted_connections_are_scoped_by_namespace() {
        let hub = LocalHub::new();
        let reg = registry(&hub);

        let index = reg.acquire(&on_channel(Some("/index"), Persist::Flag(true), None)).unwrap();
        let dynamic = reg.acquire(&on_channel(Some("/dynamic"), Persist::Flag(true), None)).unwrap();
        assert!(!dynamic.reused);
        assert_ne!(index.conn.id(), dynamic.conn.id());
        assert_eq!(dynamic.conn.namespace(), "/dynamic");

        let chat_index = reg.acquire(&on_channel(Some("/index"), Persist::Key("chat".into()), None)).unwrap();
        let chat_dynamic = reg.acquire(&on_channel(Some("/dynamic"), Persist::Key("chat".into()), None)).unwrap();
        assert_ne!(chat_index.conn.id(), chat_dynamic.conn.id());

        let found = reg.persisted_for_label("home/dynamic").unwrap();
        assert_eq!(found.namespace(), "/dynamic");
        assert!(reg.persisted_for_label("chat").is_some());
    }

    #[tokio::test]
    async fn unpersisted_requests_open_fresh_connections() {
        let hub = LocalHub::new();
        let reg = registry(&hub);
        let r = resolved(Persist::Flag(false), None);

        let a = reg.acquire(&r).unwrap();
        let b = reg.acquire(&r).unwrap();
        assert_ne!(a.conn.id(), b.conn.id());
        assert_eq!(hub.connection_count(), 2);
        assert!(reg.persisted_for_label("home/").is_none());
    }

    #[tokio::test]
    async fn closed_persisted_connection_is_replaced() {
        let hub = LocalHub::new();
        let reg = registry(&hub);
        let r = resolved(Persist::Key("chat".into()), None);

        let first = reg.acquire(&r).unwrap();
        first.conn.close();
        assert!(reg.persisted("home/", "chat").is_none());

        let second = reg.acquire(&r).unwrap();
        assert!(!second.reused);
        assert_ne!(first.conn.id(), second.conn.id());
    }

    #[tokio::test]
    async fn teardown_honours_session_flag() {
        let hub = LocalHub::new();
        let reg = registry(&hub);
        let owner = ComponentId::new();

        let closing = resolved(Persist::Flag(false), None);
        let keeping = resolved(Persist::Flag(false), Some(false));
        let a = reg.acquire(&closing).unwrap().conn;
        let b = reg.acquire(&keeping).unwrap().conn;
        track(&reg, &closing, &owner, Arc::clone(&a));
        let kept = track(&reg, &keeping, &owner, Arc::clone(&b));
        assert_eq!(reg.sessions_of(&owner), 2);

        assert_eq!(reg.teardown(&owner), 1);
        assert!(!a.is_connected());
        assert!(b.is_connected());
        assert!(!kept.token().is_cancelled());
        assert_eq!(reg.sessions_of(&owner), 0);
        assert_eq!(reg.scope_of(b.id()).as_deref(), Some("home/"));

        reg.shutdown();
        assert!(!b.is_connected());
        assert!(kept.token().is_cancelled());
    }

    #[tokio::test]
    async fn teardown_of_unknown_component_is_a_no_op() {
        let hub = LocalHub::new();
        let reg = registry(&hub);
        assert_eq!(reg.teardown(&ComponentId::new()), 0);
    }
}
