//! Observable JSON state shared between the engine and the application.
//!
//! Both component data and the store state are `StateTree`s. Paths use
//! `.` or `/` as separators (`myObj.sample4`, `examples/sample`).

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::subscription::Subscription;

struct Watcher {
    id: u64,
    path: Vec<String>,
    last: Option<Value>,
    tx: mpsc::UnboundedSender<Value>,
}

struct Inner {
    root: RwLock<Value>,
    watchers: Mutex<Vec<Watcher>>,
    next_watch: AtomicU64,
    watches_created: AtomicUsize,
}

/// Cheap-clone handle over a JSON object with path watches.
#[derive(Clone)]
pub struct StateTree {
    inner: Arc<Inner>,
}

/// Stream of new values for one watched path.
pub struct StateWatch {
    rx: mpsc::UnboundedReceiver<Value>,
    _subscription: Subscription,
}

impl StateWatch {
    /// Wait for the next change. `None` once the tree is gone.
    pub async fn changed(&mut self) -> Option<Value> {
        self.rx.recv().await
    }

    /// Non-blocking poll for a pending change.
    pub fn try_changed(&mut self) -> Option<Value> {
        self.rx.try_recv().ok()
    }
}

pub fn split_path(path: &str) -> Vec<String> {
    path.split(['.', '/'])
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
        .collect()
}

fn lookup<'a>(root: &'a Value, segments: &[String]) -> Option<&'a Value> {
    segments
        .iter()
        .try_fold(root, |node, key| node.as_object()?.get(key))
}

fn related(a: &[String], b: &[String]) -> bool {
    a.iter().zip(b).all(|(x, y)| x == y)
}

impl StateTree {
    pub fn new() -> Self {
        Self::from_value(Value::Object(Map::new()))
    }

    pub fn from_value(value: Value) -> Self {
        Self {
            inner: Arc::new(Inner {
                root: RwLock::new(value),
                watchers: Mutex::new(Vec::new()),
                next_watch: AtomicU64::new(1),
                watches_created: AtomicUsize::new(0),
            }),
        }
    }

    pub fn snapshot(&self) -> Value {
        self.inner.root.read().clone()
    }

    pub fn get(&self, path: &str) -> Option<Value> {
        let segments = split_path(path);
        lookup(&self.inner.root.read(), &segments).cloned()
    }

    pub fn contains(&self, path: &str) -> bool {
        let segments = split_path(path);
        lookup(&self.inner.root.read(), &segments).is_some()
    }

    /// Write `value` at `path`, creating intermediate objects.
    pub fn set(&self, path: &str, value: Value) {
        let segments = split_path(path);
        {
            let mut root = self.inner.root.write();
            let mut node = &mut *root;
            for key in &segments {
                if !node.is_object() {
                    *node = Value::Object(Map::new());
                }
                let Value::Object(map) = node else { unreachable!() };
                node = map.entry(key.clone()).or_insert(Value::Null);
            }
            *node = value;
        }
        self.notify(&segments);
    }

    /// Shallow-merge `fields` into the object at `path`.
    pub fn merge(&self, path: &str, fields: Map<String, Value>) {
        let mut current = match self.get(path) {
            Some(Value::Object(map)) => map,
            _ => Map::new(),
        };
        current.extend(fields);
        self.set(path, Value::Object(current));
    }

    /// Watch a path. The watch reports each effective change once.
    pub fn watch(&self, path: &str) -> StateWatch {
        let segments = split_path(path);
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.inner.next_watch.fetch_add(1, Ordering::Relaxed);
        let last = lookup(&self.inner.root.read(), &segments).cloned();
        self.inner.watchers.lock().push(Watcher {
            id,
            path: segments,
            last,
            tx,
        });
        self.inner.watches_created.fetch_add(1, Ordering::Relaxed);

        let inner = Arc::clone(&self.inner);
        StateWatch {
            rx,
            _subscription: Subscription::new(move || {
                inner.watchers.lock().retain(|w| w.id != id);
            }),
        }
    }

    /// Number of watches created over the lifetime of the tree.
    pub fn watch_count(&self) -> usize {
        self.inner.watches_created.load(Ordering::Relaxed)
    }

    /// Number of watches currently live.
    pub fn live_watches(&self) -> usize {
        self.inner.watchers.lock().len()
    }

    fn notify(&self, changed: &[String]) {
        let mut watchers = self.inner.watchers.lock();
        let root = self.inner.root.read();
        watchers.retain_mut(|w| {
            if !related(&w.path, changed) {
                return true;
            }
            let current = lookup(&root, &w.path).cloned();
            if current == w.last {
                return true;
            }
            w.last.clone_from(&current);
            match current {
                Some(value) => w.tx.send(value).is_ok(),
                None => !w.tx.is_closed(),
            }
        });
    }
}

impl Default for StateTree {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for StateTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("StateTree").field(&*self.inner.root.read()).finish()
    }
}
