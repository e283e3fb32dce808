use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use nspwire_core::{ComponentId, Handler, HandlerTable, StateTree};
use serde_json::Value;

use crate::error::EngineError;

/// An operation the engine generated on a component: emitters,
/// server API methods and `<evt>Emit` helpers.
#[async_trait]
pub trait Callable: Send + Sync {
    async fn call(&self, arg: Option<Value>) -> Result<Value, EngineError>;
}

/// The application side of a wiring pass.
///
/// `data` is what listeners write into and emitBacks watch. `handlers` are
/// the named hooks directives refer to. `callables` is the capability table
/// the engine fills in.
#[derive(Clone)]
pub struct Component {
    id: ComponentId,
    data: StateTree,
    handlers: HandlerTable,
    callables: Arc<DashMap<String, Arc<dyn Callable>>>,
}

impl Component {
    pub fn new(data: Value) -> Self {
        Self {
            id: ComponentId::new(),
            data: StateTree::from_value(data),
            handlers: HandlerTable::new(),
            callables: Arc::new(DashMap::new()),
        }
    }

    pub fn with_handler(self, name: &str, handler: Arc<dyn Handler>) -> Self {
        self.handlers.insert(name, handler);
        self
    }

    pub fn id(&self) -> &ComponentId {
        &self.id
    }

    pub fn data(&self) -> &StateTree {
        &self.data
    }

    pub fn handlers(&self) -> &HandlerTable {
        &self.handlers
    }

    pub fn handler(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(name)
    }

    pub fn insert_callable(&self, name: &str, callable: Arc<dyn Callable>) {
        self.callables.insert(name.to_owned(), callable);
    }

    pub fn callable(&self, name: &str) -> Option<Arc<dyn Callable>> {
        self.callables.get(name).map(|c| Arc::clone(c.value()))
    }

    pub fn callable_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.callables.iter().map(|c| c.key().clone()).collect();
        names.sort();
        names
    }

    /// Whether `name` is taken by data, a handler or a callable.
    pub fn has_member(&self, name: &str) -> bool {
        self.data.contains(name) || self.handlers.contains(name) || self.callables.contains_key(name)
    }

    /// Invoke a generated callable.
    pub async fn call(&self, name: &str, arg: Option<Value>) -> Result<Value, EngineError> {
        let callable = self
            .callable(name)
            .ok_or_else(|| EngineError::UnknownCallable(name.to_owned()))?;
        callable.call(arg).await
    }
}

impl std::fmt::Debug for Component {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Component")
            .field("id", &self.id)
            .field("data", &self.data)
            .field("handlers", &self.handlers.names())
            .field("callables", &self.callable_names())
            .finish()
    }
}
