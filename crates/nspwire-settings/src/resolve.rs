//! Connect-time resolution of the effective socket configuration.
//!
//! Precedence for every field: per-call [`ConnectOptions`] > selected
//! [`SocketEntry`] > global [`WireSettings`].

use std::collections::HashSet;
use std::time::Duration;

use nspwire_core::ApiDescriptor;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::errors::ConfigError;
use crate::types::{ConnectOptions, NamespaceConfig, ServerApiOptions, SocketEntry, StoreWiring, WireSettings};

/// Component data key that receives connection status by default.
pub const DEFAULT_STATUS_PROP: &str = "socketStatus";

/// Fully resolved connect request.
#[derive(Clone, Debug)]
pub struct ResolvedConnect {
    pub label: String,
    pub url: String,
    pub namespace: String,
    /// `<label><namespace>`, the key of the store's per-socket areas.
    pub scope: String,
    pub persist_key: Option<String>,
    pub teardown: bool,
    pub emit_timeout: Option<Duration>,
    pub namespace_cfg: NamespaceConfig,
    pub vuex: StoreWiring,
    pub server_api: Option<ServerApiOptions>,
    pub client_api: Option<ApiDescriptor>,
    pub api_ignore_evts: Vec<String>,
    pub warnings: bool,
    /// Component data key for connection status.
    pub status_prop: String,
    pub extra: Map<String, Value>,
}

/// Merge build-time and runtime socket lists.
///
/// Build-time entries come first; a later entry whose name is already
/// taken is dropped.
pub fn merge_sockets(build: &[SocketEntry], runtime: &[SocketEntry], warnings: bool) -> Vec<SocketEntry> {
    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(build.len() + runtime.len());
    for entry in build.iter().chain(runtime) {
        if !entry.name.is_empty() && !seen.insert(entry.name.clone()) {
            if warnings {
                warn!(name = %entry.name, "duplicate socket entry ignored, keeping the first");
            } else {
                debug!(name = %entry.name, "duplicate socket entry ignored, keeping the first");
            }
            continue;
        }
        merged.push(entry.clone());
    }
    merged
}

fn select<'a>(sockets: &'a [SocketEntry], name: Option<&str>) -> Result<&'a SocketEntry, ConfigError> {
    if sockets.is_empty() {
        return Err(ConfigError::NoSockets);
    }
    match name {
        Some(name) => sockets
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| ConfigError::SocketNotFound(name.to_owned())),
        None => Ok(sockets.iter().find(|s| s.default).unwrap_or(&sockets[0])),
    }
}

/// Resolve a connect request against the configured sockets.
pub fn resolve_connect(
    settings: &WireSettings,
    runtime: &[SocketEntry],
    opts: &ConnectOptions,
) -> Result<ResolvedConnect, ConfigError> {
    let warnings = opts.warnings.unwrap_or(settings.warnings);
    let sockets = merge_sockets(&settings.sockets, runtime, warnings);
    let entry = select(&sockets, opts.name.as_deref())?;

    let url = match entry.url.as_deref() {
        Some(url) if !url.is_empty() => url.to_owned(),
        _ => settings.origin.clone(),
    };
    let label = match entry.label() {
        "" => url.clone(),
        label => label.to_owned(),
    };
    let namespace = match opts.channel.as_deref() {
        Some(ch) if !ch.is_empty() => ch.to_owned(),
        _ => "/".to_owned(),
    };
    let scope = format!("{label}{namespace}");

    let persist_key = opts.persist.key(&scope);
    let teardown = opts.teardown.unwrap_or(persist_key.is_none());
    let emit_timeout = opts
        .emit_timeout
        .or(entry.emit_timeout)
        .or(settings.emit_timeout_ms)
        .map(Duration::from_millis);
    let namespace_cfg = opts
        .namespace_cfg
        .clone()
        .or_else(|| entry.namespaces.get(&namespace).cloned())
        .unwrap_or_default();
    let vuex = opts.vuex.clone().unwrap_or_else(|| entry.vuex.clone());

    Ok(ResolvedConnect {
        label,
        url,
        namespace,
        scope,
        persist_key,
        teardown,
        emit_timeout,
        namespace_cfg,
        vuex,
        server_api: opts.server_api.clone(),
        client_api: opts.client_api.clone(),
        api_ignore_evts: opts
            .api_ignore_evts
            .clone()
            .unwrap_or_else(|| settings.api_ignore_evts.clone()),
        warnings,
        status_prop: opts
            .status_prop
            .clone()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_STATUS_PROP.to_owned()),
        extra: opts.extra.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Persist;
    use serde_json::json;

    fn socket(name: &str, url: Option<&str>) -> SocketEntry {
        SocketEntry {
            name: name.into(),
            url: url.map(Into::into),
            ..Default::default()
        }
    }

    fn settings(sockets: Vec<SocketEntry>) -> WireSettings {
        WireSettings {
            sockets,
            ..Default::default()
        }
    }

    #[test]
    fn no_sockets_is_fatal() {
        let err = resolve_connect(&WireSettings::default(), &[], &ConnectOptions::default()).unwrap_err();
        assert_eq!(err, ConfigError::NoSockets);
    }

    #[test]
    fn unknown_name_is_fatal() {
        let s = settings(vec![socket("home", Some("http://localhost:3000"))]);
        let opts = ConnectOptions {
            name: Some("nope".into()),
            ..Default::default()
        };
        assert_eq!(
            resolve_connect(&s, &[], &opts).unwrap_err(),
            ConfigError::SocketNotFound("nope".into())
        );
    }

    #[test]
    fn selects_default_then_first() {
        let mut chat = socket("chat", Some("http://chat"));
        chat.default = true;
        let s = settings(vec![socket("home", Some("http://home")), chat]);
        let r = resolve_connect(&s, &[], &ConnectOptions::default()).unwrap();
        assert_eq!(r.label, "chat");

        let s = settings(vec![socket("home", Some("http://home")), socket("chat", Some("http://chat"))]);
        let r = resolve_connect(&s, &[], &ConnectOptions::default()).unwrap();
        assert_eq!(r.label, "home");
    }

    #[test]
    fn duplicate_runtime_socket_keeps_build_entry() {
        let s = settings(vec![socket("home", Some("http://build"))]);
        let runtime = vec![socket("home", Some("http://runtime")), socket("extra", Some("http://x"))];
        let merged = merge_sockets(&s.sockets, &runtime, true);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].url.as_deref(), Some("http://build"));

        let opts = ConnectOptions {
            name: Some("home".into()),
            ..Default::default()
        };
        let r = resolve_connect(&s, &runtime, &opts).unwrap();
        assert_eq!(r.url, "http://build");
    }

    #[test]
    fn missing_url_falls_back_to_origin() {
        let s = WireSettings {
            sockets: vec![socket("home", None)],
            origin: "http://page-origin".into(),
            ..Default::default()
        };
        let r = resolve_connect(&s, &[], &ConnectOptions::default()).unwrap();
        assert_eq!(r.url, "http://page-origin");
    }

    #[test]
    fn scope_label_joins_label_and_namespace() {
        let s = settings(vec![socket("home", Some("http://localhost:3000"))]);
        let opts = ConnectOptions {
            channel: Some("/dynamic".into()),
            ..Default::default()
        };
        let r = resolve_connect(&s, &[], &opts).unwrap();
        assert_eq!(r.namespace, "/dynamic");
        assert_eq!(r.scope, "home/dynamic");

        let r = resolve_connect(&s, &[], &ConnectOptions::default()).unwrap();
        assert_eq!(r.scope, "home/");
    }

    #[test]
    fn status_prop_defaults_to_socket_status() {
        let s = settings(vec![socket("home", Some("http://h"))]);
        let r = resolve_connect(&s, &[], &ConnectOptions::default()).unwrap();
        assert_eq!(r.status_prop, DEFAULT_STATUS_PROP);

        let opts = ConnectOptions {
            status_prop: Some("connStatus".into()),
            ..Default::default()
        };
        let r = resolve_connect(&s, &[], &opts).unwrap();
        assert_eq!(r.status_prop, "connStatus");
    }

    #[test]
    fn emit_timeout_precedence() {
        let mut entry = socket("home", Some("http://h"));
        entry.emit_timeout = Some(800);
        let s = WireSettings {
            sockets: vec![entry],
            emit_timeout_ms: Some(5000),
            ..Default::default()
        };

        let r = resolve_connect(&s, &[], &ConnectOptions::default()).unwrap();
        assert_eq!(r.emit_timeout, Some(Duration::from_millis(800)));

        let opts = ConnectOptions {
            emit_timeout: Some(500),
            ..Default::default()
        };
        let r = resolve_connect(&s, &[], &opts).unwrap();
        assert_eq!(r.emit_timeout, Some(Duration::from_millis(500)));

        let s = WireSettings {
            sockets: vec![socket("home", Some("http://h"))],
            emit_timeout_ms: Some(5000),
            ..Default::default()
        };
        let r = resolve_connect(&s, &[], &ConnectOptions::default()).unwrap();
        assert_eq!(r.emit_timeout, Some(Duration::from_millis(5000)));
    }

    #[test]
    fn teardown_defaults_follow_persistence() {
        let s = settings(vec![socket("home", Some("http://h"))]);
        let r = resolve_connect(&s, &[], &ConnectOptions::default()).unwrap();
        assert!(r.teardown);
        assert_eq!(r.persist_key, None);

        let opts = ConnectOptions {
            persist: Persist::Flag(true),
            ..Default::default()
        };
        let r = resolve_connect(&s, &[], &opts).unwrap();
        assert!(!r.teardown);
        assert_eq!(r.persist_key.as_deref(), Some("home/"));

        let opts = ConnectOptions {
            channel: Some("/dynamic".into()),
            persist: Persist::Flag(true),
            ..Default::default()
        };
        let r = resolve_connect(&s, &[], &opts).unwrap();
        assert_eq!(r.persist_key.as_deref(), Some("home/dynamic"));

        let opts = ConnectOptions {
            persist: Persist::Key("mySocket".into()),
            teardown: Some(true),
            ..Default::default()
        };
        let r = resolve_connect(&s, &[], &opts).unwrap();
        assert!(r.teardown);
        assert_eq!(r.persist_key.as_deref(), Some("mySocket"));
    }

    #[test]
    fn namespace_config_from_entry_unless_overridden() {
        let mut entry = socket("home", Some("http://h"));
        entry.namespaces.insert(
            "/index".into(),
            NamespaceConfig {
                emitters: vec![json!("getMessage2 --> message2Rxd")],
                ..Default::default()
            },
        );
        let s = settings(vec![entry]);
        let opts = ConnectOptions {
            channel: Some("/index".into()),
            ..Default::default()
        };
        let r = resolve_connect(&s, &[], &opts).unwrap();
        assert_eq!(r.namespace_cfg.emitters.len(), 1);

        let opts = ConnectOptions {
            channel: Some("/index".into()),
            namespace_cfg: Some(NamespaceConfig::default()),
            ..Default::default()
        };
        let r = resolve_connect(&s, &[], &opts).unwrap();
        assert!(r.namespace_cfg.is_empty());
    }
}
