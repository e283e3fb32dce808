//! Store area the engine writes to.
//!
//! Layout mirrors what UI code reads:
//! `emitErrors[scope][evt]`, `emitTimeouts[scope]`, `ioApis[label]`,
//! `clientApis[label]`. Scopes are `<socket label><namespace>`.

use std::collections::BTreeMap;
use std::time::Duration;

use nspwire_core::{ApiDescriptor, ErrorRecord};
use parking_lot::RwLock;
use serde_json::{json, Map, Value};
use tokio::sync::broadcast;

#[derive(Debug)]
pub struct SocketState {
    emit_errors: RwLock<BTreeMap<String, BTreeMap<String, Vec<ErrorRecord>>>>,
    emit_timeouts: RwLock<BTreeMap<String, Option<Duration>>>,
    io_apis: RwLock<BTreeMap<String, Value>>,
    client_apis: RwLock<BTreeMap<String, ApiDescriptor>>,
    errors_tx: broadcast::Sender<(String, ErrorRecord)>,
}

impl Default for SocketState {
    fn default() -> Self {
        let (errors_tx, _) = broadcast::channel(64);
        Self {
            emit_errors: RwLock::new(BTreeMap::new()),
            emit_timeouts: RwLock::new(BTreeMap::new()),
            io_apis: RwLock::new(BTreeMap::new()),
            client_apis: RwLock::new(BTreeMap::new()),
            errors_tx,
        }
    }
}

impl SocketState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an error to `emitErrors[scope][record.evt]`. Append-only.
    pub fn push_emit_error(&self, scope: &str, record: ErrorRecord) {
        self.emit_errors
            .write()
            .entry(scope.to_owned())
            .or_default()
            .entry(record.evt.clone())
            .or_default()
            .push(record.clone());
        let _ = self.errors_tx.send((scope.to_owned(), record));
    }

    pub fn emit_errors(&self, scope: &str, evt: &str) -> Vec<ErrorRecord> {
        self.emit_errors
            .read()
            .get(scope)
            .and_then(|by_evt| by_evt.get(evt))
            .cloned()
            .unwrap_or_default()
    }

    pub fn error_count(&self) -> usize {
        self.emit_errors
            .read()
            .values()
            .flat_map(BTreeMap::values)
            .map(Vec::len)
            .sum()
    }

    /// Live feed of appended error records with their scope.
    pub fn subscribe_errors(&self) -> broadcast::Receiver<(String, ErrorRecord)> {
        self.errors_tx.subscribe()
    }

    pub fn set_emit_timeout(&self, scope: &str, timeout: Option<Duration>) {
        self.emit_timeouts.write().insert(scope.to_owned(), timeout);
    }

    /// `None` when no timeout was recorded for the scope or it waits forever.
    pub fn emit_timeout(&self, scope: &str) -> Option<Duration> {
        self.emit_timeouts.read().get(scope).copied().flatten()
    }

    pub fn set_io_api(&self, label: &str, api: Value) {
        self.io_apis.write().insert(label.to_owned(), api);
    }

    pub fn io_api(&self, label: &str) -> Option<Value> {
        self.io_apis.read().get(label).cloned()
    }

    pub fn set_client_api(&self, label: &str, api: ApiDescriptor) {
        self.client_apis.write().insert(label.to_owned(), api);
    }

    pub fn client_api(&self, label: &str) -> Option<ApiDescriptor> {
        self.client_apis.read().get(label).cloned()
    }

    /// JSON view with the camelCase keys UI code binds to.
    pub fn snapshot(&self) -> Value {
        let emit_errors: Map<String, Value> = self
            .emit_errors
            .read()
            .iter()
            .map(|(scope, by_evt)| (scope.clone(), json!(by_evt)))
            .collect();
        let emit_timeouts: Map<String, Value> = self
            .emit_timeouts
            .read()
            .iter()
            .map(|(scope, t)| {
                let ms = t.map_or(Value::Null, |t| json!(t.as_millis() as u64));
                (scope.clone(), ms)
            })
            .collect();
        json!({
            "emitErrors": emit_errors,
            "emitTimeouts": emit_timeouts,
            "ioApis": *self.io_apis.read(),
            "clientApis": *self.client_apis.read(),
        })
    }
}
