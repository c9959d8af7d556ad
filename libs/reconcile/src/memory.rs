//! In-memory store implementing every capability trait.
//!
//! Used by tests and by offline tooling. Writes behave like the API server:
//! names collide on create, updates check the resource version, and every
//! successful write bumps it and emits a notification. Status writes change
//! only `status`, as the status subresource does.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use kube::Resource;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use crate::{object_key, Cache, ChangeKind, Notification, ObjectWriter, StoreError, Watch};

const NOTIFICATION_CAPACITY: usize = 1024;

pub struct MemoryStore<K> {
    objects: RwLock<BTreeMap<String, Arc<K>>>,
    events: broadcast::Sender<Notification>,
    writes: AtomicUsize,
    version: AtomicU64,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl<K> MemoryStore<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(NOTIFICATION_CAPACITY);
        Self {
            objects: RwLock::new(BTreeMap::new()),
            events,
            writes: AtomicUsize::new(0),
            version: AtomicU64::new(0),
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
        }
    }

    /// Store pre-populated with `objects`. Seeding is not counted as writes.
    pub fn with_objects(objects: impl IntoIterator<Item = K>) -> Self {
        let store = Self::new();
        for obj in objects {
            store.insert(obj);
        }
        store
    }

    /// Put `obj` into the store directly, bypassing write accounting.
    ///
    /// Emits a notification, as an external writer would.
    pub fn insert(&self, mut obj: K) {
        let key = object_key(&obj);
        obj.meta_mut().resource_version = Some(self.next_version());
        let kind = match self.write_lock().insert(key.clone(), Arc::new(obj)) {
            Some(_) => ChangeKind::Updated,
            None => ChangeKind::Added,
        };
        self.notify(kind, &key);
    }

    /// Remove the object at `key`, emitting a `Deleted` notification.
    pub fn remove(&self, key: &str) -> Option<Arc<K>> {
        let removed = self.write_lock().remove(key);
        if removed.is_some() {
            self.notify(ChangeKind::Deleted, key);
        }
        removed
    }

    /// Successful writes issued through [`ObjectWriter`].
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Make every subsequent read fail with `Unavailable`.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Make every subsequent write fail with `Unavailable`.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn next_version(&self) -> String {
        (self.version.fetch_add(1, Ordering::SeqCst) + 1).to_string()
    }

    fn notify(&self, kind: ChangeKind, key: &str) {
        trace!(?kind, key, "Store notification");
        // No subscribers is fine.
        let _ = self.events.send(Notification::new(kind, key));
    }

    fn check_reads(&self) -> Result<(), StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("reads disabled".to_string()));
        }
        Ok(())
    }

    fn check_writes(&self) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(())
    }

    /// Replace the stored object at `obj`'s key, checking its resource version.
    ///
    /// `build` produces the new object from the currently stored one.
    fn replace_with(
        &self,
        obj: &K,
        build: impl FnOnce(&K) -> Result<K, StoreError>,
    ) -> Result<K, StoreError> {
        self.check_writes()?;
        let key = object_key(obj);
        let mut objects = self.write_lock();

        let current = objects
            .get(&key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        let expected = current.meta().resource_version.as_deref();
        if let Some(given) = obj.meta().resource_version.as_deref() {
            if Some(given) != expected {
                return Err(StoreError::Conflict(format!(
                    "{key}: resource version {given} is stale"
                )));
            }
        }

        let mut stored = build(current)?;
        stored.meta_mut().resource_version = Some(self.next_version());
        objects.insert(key.clone(), Arc::new(stored.clone()));
        drop(objects);

        self.writes.fetch_add(1, Ordering::SeqCst);
        self.notify(ChangeKind::Updated, &key);
        Ok(stored)
    }

    fn read_lock(&self) -> RwLockReadGuard<'_, BTreeMap<String, Arc<K>>> {
        self.objects
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_lock(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Arc<K>>> {
        self.objects
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<K> Default for MemoryStore<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Cache<K> for MemoryStore<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    fn get(&self, key: &str) -> Result<Option<Arc<K>>, StoreError> {
        self.check_reads()?;
        Ok(self.read_lock().get(key).cloned())
    }

    fn list(&self, predicate: &dyn Fn(&K) -> bool) -> Result<Vec<Arc<K>>, StoreError> {
        self.check_reads()?;
        Ok(self
            .read_lock()
            .values()
            .filter(|obj| predicate(obj))
            .cloned()
            .collect())
    }
}

impl<K> Watch for MemoryStore<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.events.subscribe()
    }
}

#[async_trait]
impl<K> ObjectWriter<K> for MemoryStore<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        self.check_writes()?;
        let key = object_key(obj);
        let mut objects = self.write_lock();
        if objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key));
        }

        let mut stored = obj.clone();
        stored.meta_mut().resource_version = Some(self.next_version());
        objects.insert(key.clone(), Arc::new(stored.clone()));
        drop(objects);

        self.writes.fetch_add(1, Ordering::SeqCst);
        self.notify(ChangeKind::Added, &key);
        Ok(stored)
    }

    async fn update(&self, obj: &K) -> Result<K, StoreError> {
        self.replace_with(obj, |_| Ok(obj.clone()))
    }

    /// Only `status` is taken from `obj`; everything else stays as stored.
    async fn update_status(&self, obj: &K) -> Result<K, StoreError> {
        self.replace_with(obj, |current| with_status_of(current, obj))
    }
}

/// `current` with its `status` replaced by the one in `source`.
fn with_status_of<K>(current: &K, source: &K) -> Result<K, StoreError>
where
    K: Serialize + DeserializeOwned,
{
    let backend = |e: serde_json::Error| StoreError::Backend(e.to_string());
    let mut merged = serde_json::to_value(current).map_err(backend)?;
    let status = serde_json::to_value(source)
        .map_err(backend)?
        .get_mut("status")
        .map(serde_json::Value::take);

    if let Some(fields) = merged.as_object_mut() {
        match status {
            Some(status) => fields.insert("status".to_string(), status),
            None => fields.remove("status"),
        };
    }
    serde_json::from_value(merged).map_err(backend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmkit_api::{ArpEntry, ArpTable, VirtualMachine, VirtualMachineSpec, VirtualMachineStatus};

    fn entry(ip: &str, mac: &str) -> ArpEntry {
        ArpEntry {
            ip: ip.to_string(),
            hardware_type: "0x1".to_string(),
            flags: "0x2".to_string(),
            hardware_address: mac.to_string(),
            netmask: "*".to_string(),
            device: "br0".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_then_get() {
        let store = MemoryStore::new();
        let created = store.create(&ArpTable::for_node("node-a")).await.unwrap();

        assert!(created.metadata.resource_version.is_some());
        assert_eq!(store.write_count(), 1);

        let cached = store.get("node-a").unwrap().unwrap();
        assert_eq!(cached.spec.node_name, "node-a");
        assert!(store.get("node-b").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_create_rejects_existing_name() {
        let store = MemoryStore::with_objects([ArpTable::for_node("node-a")]);
        let err = store
            .create(&ArpTable::for_node("node-a"))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::AlreadyExists(key) if key == "node-a"));
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_update_checks_resource_version() {
        let store = MemoryStore::with_objects([ArpTable::for_node("node-a")]);
        let cached = store.get("node-a").unwrap().unwrap();

        let mut first = (*cached).clone();
        first
            .spec
            .table
            .insert("06:fe:00:00:00:01".into(), entry("10.0.0.2", "06:fe:00:00:00:01"));
        store.update(&first).await.unwrap();

        // Same stale version again
        let err = store.update(&first).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_update_missing_object() {
        let store: MemoryStore<ArpTable> = MemoryStore::new();
        let err = store
            .update(&ArpTable::for_node("node-a"))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_cached_objects_are_not_affected_by_writes() {
        let store = MemoryStore::with_objects([ArpTable::for_node("node-a")]);
        let before = store.get("node-a").unwrap().unwrap();

        let mut changed = (*before).clone();
        changed
            .spec
            .table
            .insert("06:fe:00:00:00:01".into(), entry("10.0.0.2", "06:fe:00:00:00:01"));
        store.update(&changed).await.unwrap();

        assert!(before.spec.table.is_empty());
        assert_eq!(store.get("node-a").unwrap().unwrap().spec.table.len(), 1);
    }

    #[tokio::test]
    async fn test_writes_emit_notifications() {
        let store = MemoryStore::new();
        let mut rx = store.subscribe();

        let created = store.create(&ArpTable::for_node("node-a")).await.unwrap();
        store.update(&created).await.unwrap();
        store.remove("node-a");

        assert_eq!(
            rx.recv().await.unwrap(),
            Notification::new(ChangeKind::Added, "node-a")
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            Notification::new(ChangeKind::Updated, "node-a")
        );
        assert_eq!(
            rx.recv().await.unwrap(),
            Notification::new(ChangeKind::Deleted, "node-a")
        );
    }

    #[tokio::test]
    async fn test_failure_injection() {
        let store = MemoryStore::with_objects([ArpTable::for_node("node-a")]);

        store.set_fail_reads(true);
        assert!(matches!(
            store.get("node-a"),
            Err(StoreError::Unavailable(_))
        ));
        assert!(store.list_all().is_err());
        store.set_fail_reads(false);

        store.set_fail_writes(true);
        let cached = store.get("node-a").unwrap().unwrap();
        assert!(store.update_status(&cached).await.is_err());
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_update_status_keeps_stored_spec() {
        let store = MemoryStore::with_objects([VirtualMachine::new(
            "web",
            VirtualMachineSpec {
                cpus: 2,
                memory_mb: 2048,
                machine_image: "debian:12".to_string(),
                ..Default::default()
            },
        )]);

        let mut changed = (*store.get("web").unwrap().unwrap()).clone();
        changed.spec.cpus = 16;
        changed.status = Some(VirtualMachineStatus {
            ip: Some("10.0.0.11".to_string()),
            ..Default::default()
        });
        let written = store.update_status(&changed).await.unwrap();

        assert_eq!(written.spec.cpus, 2);
        let stored = store.get("web").unwrap().unwrap();
        assert_eq!(stored.spec.cpus, 2);
        assert_eq!(stored.ip(), Some("10.0.0.11"));
        assert_eq!(store.write_count(), 1);
    }

    #[tokio::test]
    async fn test_update_replaces_spec() {
        let store = MemoryStore::with_objects([ArpTable::for_node("node-a")]);
        let mut changed = (*store.get("node-a").unwrap().unwrap()).clone();
        changed
            .spec
            .table
            .insert("06:fe:00:00:00:01".into(), entry("10.0.0.2", "06:fe:00:00:00:01"));

        let written = store.update(&changed).await.unwrap();
        assert_eq!(written.spec.table.len(), 1);
    }

    #[test]
    fn test_list_filters() {
        let store = MemoryStore::with_objects([
            ArpTable::for_node("node-a"),
            ArpTable::for_node("node-b"),
        ]);

        let found = store.list(&|t: &ArpTable| t.spec.node_name == "node-b").unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(store.list_all().unwrap().len(), 2);
    }
}
