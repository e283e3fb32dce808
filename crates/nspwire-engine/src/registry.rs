use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use nspwire_core::{Binding, BindingError, ComponentId, ConnectionId, Role};

/// Store area a store-scoped binding drives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StoreArea {
    Actions,
    Mutations,
    EmitBacks,
}

/// Where a binding lives.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum BindingScope {
    /// Bound against one component's data on one connection.
    Component {
        connection: ConnectionId,
        component: ComponentId,
    },
    /// Bound against the shared store under a socket scope label.
    Store { scope: String, area: StoreArea },
}

impl fmt::Display for BindingScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Component { connection, component } => write!(f, "{connection}:{component}"),
            Self::Store { scope, area } => write!(f, "store:{scope}:{area:?}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct BindingKey {
    scope: BindingScope,
    role: Role,
    action: String,
}

struct Registered {
    binding: Binding,
    connection: ConnectionId,
    seq: u64,
}

/// One binding per (scope, role, action).
///
/// Every entry remembers the connection that attached it, so tearing the
/// connection down releases both its component and store bindings.
pub struct BindingRegistry {
    bindings: DashMap<BindingKey, Registered>,
    next_seq: AtomicU64,
}

impl BindingRegistry {
    pub fn new() -> Self {
        Self {
            bindings: DashMap::new(),
            next_seq: AtomicU64::new(0),
        }
    }

    /// Register a binding. An occupied (scope, role, action) is rejected.
    pub fn register(
        &self,
        scope: &BindingScope,
        binding: &Binding,
        connection: &ConnectionId,
    ) -> Result<(), BindingError> {
        let key = BindingKey {
            scope: scope.clone(),
            role: binding.role,
            action: binding.action.clone(),
        };
        match self.bindings.entry(key) {
            Entry::Occupied(_) => Err(BindingError::Duplicate {
                scope: scope.to_string(),
                role: binding.role,
                action: binding.action.clone(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(Registered {
                    binding: binding.clone(),
                    connection: connection.clone(),
                    seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
                });
                Ok(())
            }
        }
    }

    pub fn contains(&self, scope: &BindingScope, role: Role, action: &str) -> bool {
        self.bindings.contains_key(&BindingKey {
            scope: scope.clone(),
            role,
            action: action.to_owned(),
        })
    }

    /// Bindings of a scope in registration order.
    pub fn bindings_for(&self, scope: &BindingScope) -> Vec<Binding> {
        let mut found: Vec<(u64, Binding)> = self
            .bindings
            .iter()
            .filter(|e| &e.key().scope == scope)
            .map(|e| (e.value().seq, e.value().binding.clone()))
            .collect();
        found.sort_by_key(|(seq, _)| *seq);
        found.into_iter().map(|(_, b)| b).collect()
    }

    /// Drop every binding attached through `connection`. Returns how many.
    pub fn release_connection(&self, connection: &ConnectionId) -> usize {
        let before = self.bindings.len();
        self.bindings.retain(|_, entry| &entry.connection != connection);
        before - self.bindings.len()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

impl Default for BindingRegistry {
    fn default() -> Self {
        Self::new()
    }
}
