use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::errors::HandlerError;

/// A named application function: pre/post hooks, validators, done hooks
/// and locally served API methods all share this shape.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn call(&self, arg: Value) -> Result<Value, HandlerError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, HandlerError>> + Send,
{
    async fn call(&self, arg: Value) -> Result<Value, HandlerError> {
        (self.0)(arg).await
    }
}

/// Wrap an async closure as a [`Handler`].
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// A pre-hook vetoes only with an explicit `false`.
pub fn is_veto(result: &Result<Value, HandlerError>) -> bool {
    matches!(result, Ok(Value::Bool(false)))
}

/// An emitBack validator rejects with `false`, `0` or `""`. A validator
/// that returns nothing (`null`) or fails lets the change through.
pub fn rejects(result: &Result<Value, HandlerError>) -> bool {
    match result {
        Ok(Value::Bool(b)) => !b,
        Ok(Value::Number(n)) => n.as_f64() == Some(0.0),
        Ok(Value::String(s)) => s.is_empty(),
        _ => false,
    }
}

/// Handlers a component exposes by name.
#[derive(Clone, Default)]
pub struct HandlerTable {
    handlers: Arc<RwLock<HashMap<String, Arc<dyn Handler>>>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, name: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers.write().insert(name.into(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.read().get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }
}
