//! Kubernetes-backed store.
//!
//! Reads come from a reflector cache fed by a watch stream, writes go to the
//! API server. Every event seen on the stream is forwarded as a
//! [`Notification`]; a relist replays all objects as `Added`.

use std::fmt::Debug;
use std::hash::Hash;
use std::pin::pin;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use kube::api::{Api, PostParams};
use kube::runtime::reflector::{self, ObjectRef, Store};
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use vmkit_reconcile::{
    object_key, split_key, Cache, ChangeKind, Notification, ObjectWriter, StoreError, Watch,
};

const NOTIFICATION_CAPACITY: usize = 1024;

/// Cache, watch and writer over one Kubernetes resource type.
pub struct KubeStore<K>
where
    K: Resource + Clone + 'static,
    K::DynamicType: Eq + Hash + Clone,
{
    api: Api<K>,
    reader: Store<K>,
    events: broadcast::Sender<Notification>,
}

impl<K> KubeStore<K>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone + Send + Sync,
{
    /// Start watching `api`. The returned task drives the cache and must be
    /// kept running for reads to stay current.
    pub fn start(api: Api<K>) -> (Self, JoinHandle<()>) {
        let (reader, writer) = reflector::store();
        let (events, _) = broadcast::channel(NOTIFICATION_CAPACITY);

        let stream = watcher(api.clone(), watcher::Config::default())
            .default_backoff()
            .reflect(writer);
        let task = tokio::spawn({
            let events = events.clone();
            async move {
                let mut stream = pin!(stream);
                while let Some(event) = stream.next().await {
                    match event {
                        Ok(event) => forward(&events, event),
                        Err(e) => warn!(kind = %K::kind(&Default::default()), error = %e, "Watch error"),
                    }
                }
                debug!(kind = %K::kind(&Default::default()), "Watch stream ended");
            }
        });

        (
            Self {
                api,
                reader,
                events,
            },
            task,
        )
    }

    /// Wait for the initial list to be loaded into the cache.
    pub async fn wait_until_ready(&self) -> Result<(), StoreError> {
        self.reader
            .wait_until_ready()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))
    }
}

fn forward<K: Resource>(events: &broadcast::Sender<Notification>, event: watcher::Event<K>) {
    let (kind, obj) = match event {
        watcher::Event::Apply(obj) => (ChangeKind::Updated, obj),
        watcher::Event::InitApply(obj) => (ChangeKind::Added, obj),
        watcher::Event::Delete(obj) => (ChangeKind::Deleted, obj),
        watcher::Event::Init | watcher::Event::InitDone => return,
    };
    // No subscribers is fine.
    let _ = events.send(Notification::new(kind, object_key(&obj)));
}

/// Map an API error onto the store taxonomy.
fn store_error(key: &str, err: kube::Error) -> StoreError {
    match err {
        kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound(key.to_string()),
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
            StoreError::AlreadyExists(key.to_string())
        }
        kube::Error::Api(ae) if ae.code == 409 => {
            StoreError::Conflict(format!("{key}: {}", ae.message))
        }
        kube::Error::Api(ae) if ae.code >= 500 => {
            StoreError::Unavailable(format!("{key}: {}", ae.message))
        }
        other => StoreError::Backend(format!("{key}: {other}")),
    }
}

impl<K> Cache<K> for KubeStore<K>
where
    K: Resource + Clone + Send + Sync + 'static,
    K::DynamicType: Default + Eq + Hash + Clone + Send + Sync,
{
    fn get(&self, key: &str) -> Result<Option<Arc<K>>, StoreError> {
        let (namespace, name) =
            split_key(key).map_err(|e| StoreError::Backend(e.to_string()))?;
        let mut obj_ref = ObjectRef::new(name);
        if let Some(ns) = namespace {
            obj_ref = obj_ref.within(ns);
        }
        Ok(self.reader.get(&obj_ref))
    }

    fn list(&self, predicate: &dyn Fn(&K) -> bool) -> Result<Vec<Arc<K>>, StoreError> {
        Ok(self
            .reader
            .state()
            .into_iter()
            .filter(|obj| predicate(obj))
            .collect())
    }
}

impl<K> Watch for KubeStore<K>
where
    K: Resource + Clone + Send + Sync + 'static,
    K::DynamicType: Eq + Hash + Clone + Send + Sync,
{
    fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.events.subscribe()
    }
}

#[async_trait]
impl<K> ObjectWriter<K> for KubeStore<K>
where
    K: Resource + Clone + DeserializeOwned + Serialize + Debug + Send + Sync + 'static,
    K::DynamicType: Eq + Hash + Clone + Send + Sync,
{
    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        let key = object_key(obj);
        self.api
            .create(&PostParams::default(), obj)
            .await
            .map_err(|e| store_error(&key, e))
    }

    async fn update(&self, obj: &K) -> Result<K, StoreError> {
        let key = object_key(obj);
        self.api
            .replace(&obj.name_any(), &PostParams::default(), obj)
            .await
            .map_err(|e| store_error(&key, e))
    }

    async fn update_status(&self, obj: &K) -> Result<K, StoreError> {
        let key = object_key(obj);
        let body = serde_json::to_vec(obj).map_err(|e| StoreError::Backend(e.to_string()))?;
        self.api
            .replace_status(&obj.name_any(), &PostParams::default(), body)
            .await
            .map_err(|e| store_error(&key, e))
    }
}
