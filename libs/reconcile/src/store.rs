//! Capability traits over the cluster store.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::StoreError;

/// Kind of change observed on an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Updated,
    Deleted,
}

/// A change notification carrying the affected object's key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub kind: ChangeKind,
    pub key: String,
}

impl Notification {
    pub fn new(kind: ChangeKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
        }
    }
}

/// Read view over objects of one kind.
///
/// Returned objects are shared with the cache. Clone before mutating.
pub trait Cache<K>: Send + Sync {
    /// Object by key; `Ok(None)` when it does not exist.
    fn get(&self, key: &str) -> Result<Option<Arc<K>>, StoreError>;

    /// All objects matching `predicate`.
    fn list(&self, predicate: &dyn Fn(&K) -> bool) -> Result<Vec<Arc<K>>, StoreError>;

    /// All objects.
    fn list_all(&self) -> Result<Vec<Arc<K>>, StoreError> {
        self.list(&|_| true)
    }
}

/// Source of change notifications.
///
/// Delivery is non-blocking for the producer. A receiver that falls behind
/// observes `RecvError::Lagged` and must resynchronise from the cache.
pub trait Watch: Send + Sync {
    fn subscribe(&self) -> broadcast::Receiver<Notification>;
}

/// Writes against the authoritative store.
#[async_trait]
pub trait ObjectWriter<K: Send + Sync>: Send + Sync {
    /// Create a new object. Fails with `AlreadyExists` on a name collision.
    async fn create(&self, obj: &K) -> Result<K, StoreError>;

    /// Replace an existing object.
    async fn update(&self, obj: &K) -> Result<K, StoreError>;

    /// Replace an existing object's status.
    async fn update_status(&self, obj: &K) -> Result<K, StoreError>;
}
