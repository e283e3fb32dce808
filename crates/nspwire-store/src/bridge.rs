use async_trait::async_trait;
use nspwire_core::{StateTree, StateWatch};
use serde_json::Value;

use crate::error::StoreError;
use crate::socket_state::SocketState;

/// Reactive application store the engine surfaces results through.
///
/// Mutations are synchronous state writes, actions are async and may
/// commit mutations themselves. Watches are counted so callers can check
/// that re-wiring did not attach a second watcher to the same path.
#[async_trait]
pub trait StoreBridge: Send + Sync {
    fn state(&self) -> StateTree;

    fn has_mutation(&self, name: &str) -> bool;

    fn has_action(&self, name: &str) -> bool;

    fn commit(&self, name: &str, payload: Value) -> Result<(), StoreError>;

    async fn dispatch(&self, name: &str, payload: Value) -> Result<Value, StoreError>;

    /// Watch a state path.
    fn watch(&self, path: &str) -> StateWatch {
        self.state().watch(path)
    }

    /// Watches created on the store over its lifetime.
    fn watch_count(&self) -> usize {
        self.state().watch_count()
    }

    /// Engine-owned area: emit errors, timeouts and negotiated APIs.
    fn socket_state(&self) -> &SocketState;
}
