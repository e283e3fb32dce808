use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use nspwire_core::StateTree;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::bridge::StoreBridge;
use crate::error::StoreError;
use crate::socket_state::SocketState;

/// Synchronous state write.
pub type StoreMutation = Arc<dyn Fn(&StateTree, Value) + Send + Sync>;

/// Async action; receives a handle to the store it runs in.
pub type StoreAction =
    Arc<dyn Fn(MemoryStore, Value) -> BoxFuture<'static, Result<Value, StoreError>> + Send + Sync>;

struct Inner {
    state: StateTree,
    mutations: RwLock<HashMap<String, StoreMutation>>,
    actions: RwLock<HashMap<String, StoreAction>>,
    socket: SocketState,
}

/// In-memory [`StoreBridge`] with named mutations and actions.
///
/// Names are plain strings, so module-scoped names such as
/// `examples/SET_SAMPLE` are registered as-is.
#[derive(Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new(state: Value) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: StateTree::from_value(state),
                mutations: RwLock::new(HashMap::new()),
                actions: RwLock::new(HashMap::new()),
                socket: SocketState::new(),
            }),
        }
    }

    pub fn mutation<F>(self, name: &str, f: F) -> Self
    where
        F: Fn(&StateTree, Value) + Send + Sync + 'static,
    {
        self.inner.mutations.write().insert(name.to_owned(), Arc::new(f));
        self
    }

    pub fn action<F, Fut>(self, name: &str, f: F) -> Self
    where
        F: Fn(MemoryStore, Value) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Value, StoreError>> + Send + 'static,
    {
        let action: StoreAction = Arc::new(move |store, payload| Box::pin(f(store, payload)));
        self.inner.actions.write().insert(name.to_owned(), action);
        self
    }

    /// Mutation writing the payload straight to `path`.
    pub fn setter(self, name: &str, path: &str) -> Self {
        let path = path.to_owned();
        self.mutation(name, move |state, payload| state.set(&path, payload))
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(Value::Object(serde_json::Map::new()))
    }
}

#[async_trait]
impl StoreBridge for MemoryStore {
    fn state(&self) -> StateTree {
        self.inner.state.clone()
    }

    fn has_mutation(&self, name: &str) -> bool {
        self.inner.mutations.read().contains_key(name)
    }

    fn has_action(&self, name: &str) -> bool {
        self.inner.actions.read().contains_key(name)
    }

    fn commit(&self, name: &str, payload: Value) -> Result<(), StoreError> {
        let mutation = self
            .inner
            .mutations
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::UnknownMutation(name.to_owned()))?;
        debug!(mutation = name, "commit");
        mutation(&self.inner.state, payload);
        Ok(())
    }

    async fn dispatch(&self, name: &str, payload: Value) -> Result<Value, StoreError> {
        let action = self
            .inner
            .actions
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::UnknownAction(name.to_owned()))?;
        debug!(action = name, "dispatch");
        action(self.clone(), payload).await
    }

    fn socket_state(&self) -> &SocketState {
        &self.inner.socket
    }
}
