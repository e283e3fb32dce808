//! Settings type definitions.
//!
//! Field names are camelCase to match the consumed configuration schema.
//! Directive lists are kept as raw JSON values: non-string entries are
//! tolerated here and skipped later by the directive parser.

use std::collections::BTreeMap;

use nspwire_core::ApiDescriptor;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Root settings.
///
/// ```json
/// {
///   "sockets": [{ "name": "home", "url": "http://localhost:3000" }],
///   "emitTimeoutMs": 1500
/// }
/// ```
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WireSettings {
    /// Build-time socket entries.
    pub sockets: Vec<SocketEntry>,
    /// Report tolerated configuration problems as warnings.
    pub warnings: bool,
    /// Server API events never bound as listeners.
    pub api_ignore_evts: Vec<String>,
    /// Global emit timeout. `None` waits for the ack indefinitely.
    pub emit_timeout_ms: Option<u64>,
    /// Origin used for sockets declared without a URL.
    pub origin: String,
}

impl Default for WireSettings {
    fn default() -> Self {
        Self {
            sockets: Vec::new(),
            warnings: true,
            api_ignore_evts: Vec::new(),
            emit_timeout_ms: None,
            origin: "http://localhost:3000".to_string(),
        }
    }
}

/// One configured socket.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SocketEntry {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Picked when a connect request names no socket.
    pub default: bool,
    /// Namespace path (`/index`) to its directive lists.
    pub namespaces: BTreeMap<String, NamespaceConfig>,
    pub vuex: StoreWiring,
    /// Per-socket emit timeout in milliseconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub emit_timeout: Option<u64>,
}

impl SocketEntry {
    /// Connection label: the configured name, or the URL when unnamed.
    pub fn label(&self) -> &str {
        if self.name.is_empty() {
            self.url.as_deref().unwrap_or_default()
        } else {
            &self.name
        }
    }
}

/// Component-scoped directives for one namespace.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NamespaceConfig {
    pub emitters: Vec<Value>,
    pub listeners: Vec<Value>,
    pub emit_backs: Vec<Value>,
}

impl NamespaceConfig {
    pub fn is_empty(&self) -> bool {
        self.emitters.is_empty() && self.listeners.is_empty() && self.emit_backs.is_empty()
    }
}

/// Store-scoped directives.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreWiring {
    /// Listeners that dispatch a store action.
    pub actions: Vec<Value>,
    /// Listeners that commit a store mutation.
    pub mutations: Vec<Value>,
    /// Store paths whose changes are emitted.
    pub emit_backs: Vec<Value>,
}

impl StoreWiring {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty() && self.mutations.is_empty() && self.emit_backs.is_empty()
    }
}

/// `persist` option: off, keyed by the scope label, or keyed by a caller string.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Persist {
    Flag(bool),
    Key(String),
}

impl Default for Persist {
    fn default() -> Self {
        Self::Flag(false)
    }
}

impl Persist {
    /// Persistence key for a connection wired under `scope`
    /// (`<label><namespace>`), `None` when not persisted.
    pub fn key(&self, scope: &str) -> Option<String> {
        match self {
            Self::Flag(false) => None,
            Self::Flag(true) => Some(scope.to_owned()),
            Self::Key(key) if key.is_empty() => None,
            Self::Key(key) => Some(key.clone()),
        }
    }
}

/// Discovery request for a server-published API.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerApiOptions {
    /// Discovery event, `getAPI` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub evt: Option<String>,
    /// Discovery request payload, `{}` when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// Per-call connect options. Every field overrides the socket entry.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectOptions {
    pub name: Option<String>,
    /// Namespace to join, `/` when unset.
    pub channel: Option<String>,
    pub persist: Persist,
    pub teardown: Option<bool>,
    pub emit_timeout: Option<u64>,
    pub namespace_cfg: Option<NamespaceConfig>,
    pub vuex: Option<StoreWiring>,
    #[serde(rename = "serverAPI")]
    pub server_api: Option<ServerApiOptions>,
    #[serde(rename = "clientAPI")]
    pub client_api: Option<ApiDescriptor>,
    pub api_ignore_evts: Option<Vec<String>>,
    pub warnings: Option<bool>,
    /// Component data key that receives connection status, `socketStatus`
    /// when unset.
    pub status_prop: Option<String>,
    /// Transport options passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}
