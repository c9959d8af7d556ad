//! VM status synchronization.
//!
//! Driven by ARP table notifications rather than a timer. Each notification
//! is reduced to the table's key and queued; a single worker then copies
//! MAC-to-IP bindings from the table into the status of every VM that has
//! a MAC. Statuses are written only when the IP actually changes.
//!
//! This loop is the only writer of VM status in the agent.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use vmkit_api::{ArpTable, ArpTableSpec, VirtualMachine};
use vmkit_reconcile::{
    object_key, Cache, Notification, ObjectWriter, StoreError, Watch, WorkQueue,
};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("failed to read {what}: {source}")]
    Read {
        what: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("failed to update {failed} of {attempted} VM statuses: {last}")]
    Write {
        failed: usize,
        attempted: usize,
        last: StoreError,
    },
}

/// The VM with its status IP set from `table`, if that changes anything.
///
/// Returns `None` when the VM has no MAC, the MAC is not in the table, or
/// the IP is already current. The input is never modified.
pub fn ip_update(vm: &VirtualMachine, table: &ArpTableSpec) -> Option<VirtualMachine> {
    let mac = vm.mac()?;
    let entry = table.lookup(mac)?;
    if vm.ip() == Some(entry.ip.as_str()) {
        return None;
    }

    let mut updated = vm.clone();
    updated.status.get_or_insert_with(Default::default).ip = Some(entry.ip.clone());
    Some(updated)
}

/// Propagates discovered IPs into VM status.
pub struct StatusSynchronizer {
    arp_cache: Arc<dyn Cache<ArpTable>>,
    arp_watch: Arc<dyn Watch>,
    vm_cache: Arc<dyn Cache<VirtualMachine>>,
    vm_writer: Arc<dyn ObjectWriter<VirtualMachine>>,
    queue: WorkQueue,
    max_retries: u32,
}

impl StatusSynchronizer {
    pub fn new(
        arp_cache: Arc<dyn Cache<ArpTable>>,
        arp_watch: Arc<dyn Watch>,
        vm_cache: Arc<dyn Cache<VirtualMachine>>,
        vm_writer: Arc<dyn ObjectWriter<VirtualMachine>>,
    ) -> Self {
        Self {
            arp_cache,
            arp_watch,
            vm_cache,
            vm_writer,
            queue: WorkQueue::new("arp-tables"),
            max_retries: 0,
        }
    }

    /// Requeue a failed key up to `max_retries` times before dropping it.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn queue(&self) -> &WorkQueue {
        &self.queue
    }

    /// Run until shutdown, then drain the queue and return.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) {
        info!(
            queue = %self.queue.name(),
            max_retries = self.max_retries,
            "Starting VM status synchronizer"
        );

        let events = self.arp_watch.subscribe();
        self.enqueue_all();

        tokio::join!(self.pump(events, shutdown), self.process_queue());
        info!(queue = %self.queue.name(), "VM status synchronizer stopped");
    }

    /// Forward notifications into the queue. Shuts the queue down on exit.
    async fn pump(
        &self,
        mut events: broadcast::Receiver<Notification>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(notification) => self.queue.add(&notification.key),
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "ARP table notifications lagged, resyncing");
                        self.enqueue_all();
                    }
                    Err(RecvError::Closed) => {
                        warn!("ARP table notification channel closed");
                        break;
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        self.queue.shut_down();
    }

    async fn process_queue(&self) {
        while let Some(key) = self.queue.get().await {
            self.process_key(&key).await;
            self.queue.done(&key);
        }
    }

    async fn process_key(&self, key: &str) {
        match self.sync_key(key).await {
            Ok(updated) => {
                if updated > 0 {
                    info!(key, updated, "Updated VM IPs");
                }
                self.queue.forget(key);
            }
            Err(e) if self.queue.num_requeues(key) < self.max_retries => {
                warn!(key, error = %e, "VM status sync failed, requeueing");
                self.queue.add_rate_limited(key);
            }
            Err(e) => {
                warn!(key, error = %e, "VM status sync failed, dropping");
                self.queue.forget(key);
            }
        }
    }

    /// Enqueue every ARP table currently in the cache.
    fn enqueue_all(&self) {
        match self.arp_cache.list_all() {
            Ok(tables) => {
                for table in tables {
                    self.queue.add(&object_key(table.as_ref()));
                }
            }
            Err(e) => warn!(error = %e, "Failed to list ARP tables for resync"),
        }
    }

    /// Sync every VM against the ARP table at `key`. Returns the number of
    /// statuses written.
    ///
    /// A missing table is not an error. A failed write does not stop the
    /// remaining VMs from being processed.
    pub async fn sync_key(&self, key: &str) -> Result<usize, SyncError> {
        let table = match self.arp_cache.get(key) {
            Ok(Some(table)) => table,
            Ok(None) => {
                debug!(key, "ARP table not found, nothing to sync");
                return Ok(0);
            }
            Err(e) if e.is_not_found() => return Ok(0),
            Err(source) => {
                return Err(SyncError::Read {
                    what: "ARP table",
                    source,
                })
            }
        };

        let node = table.spec.node_name.as_str();

        let vms = self
            .vm_cache
            .list(&|vm: &VirtualMachine| vm.mac().is_some())
            .map_err(|source| SyncError::Read {
                what: "virtual machines",
                source,
            })?;

        let mut written = 0;
        let mut attempted = 0;
        let mut failures = Vec::new();
        for vm in vms {
            let Some(updated) = ip_update(&vm, &table.spec) else {
                continue;
            };
            attempted += 1;

            let name = object_key(&updated);
            match self.vm_writer.update_status(&updated).await {
                Ok(_) => {
                    debug!(node, vm = %name, ip = ?updated.ip(), "Set VM IP");
                    written += 1;
                }
                Err(e) => {
                    warn!(node, vm = %name, error = %e, "Failed to update VM status");
                    failures.push(e);
                }
            }
        }

        match failures.pop() {
            None => Ok(written),
            Some(last) => Err(SyncError::Write {
                failed: failures.len() + 1,
                attempted,
                last,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vmkit_reconcile::MemoryStore;
    use vmkit_testing::{arp_table, VmBuilder};

    struct Fixture {
        arps: Arc<MemoryStore<ArpTable>>,
        vms: Arc<MemoryStore<VirtualMachine>>,
        sync: StatusSynchronizer,
    }

    fn fixture(tables: Vec<ArpTable>, vms: Vec<VirtualMachine>) -> Fixture {
        let arps = Arc::new(MemoryStore::with_objects(tables));
        let vms = Arc::new(MemoryStore::with_objects(vms));
        let sync = StatusSynchronizer::new(arps.clone(), arps.clone(), vms.clone(), vms.clone());
        Fixture { arps, vms, sync }
    }

    #[test]
    fn test_ip_update() {
        let table = arp_table("node-a", &[("10.0.0.11", "06:fe:00:00:00:01")]).spec;

        let fresh = VmBuilder::new("web").mac("06:fe:00:00:00:01").build();
        let updated = ip_update(&fresh, &table).unwrap();
        assert_eq!(updated.ip(), Some("10.0.0.11"));
        assert_eq!(fresh.ip(), None);

        let stale = VmBuilder::new("web")
            .mac("06:fe:00:00:00:01")
            .ip("10.0.0.99")
            .build();
        assert_eq!(ip_update(&stale, &table).unwrap().ip(), Some("10.0.0.11"));

        let current = VmBuilder::new("web")
            .mac("06:fe:00:00:00:01")
            .ip("10.0.0.11")
            .build();
        assert!(ip_update(&current, &table).is_none());

        assert!(ip_update(&VmBuilder::new("web").build(), &table).is_none());
        let unknown = VmBuilder::new("web").mac("06:fe:00:00:00:02").build();
        assert!(ip_update(&unknown, &table).is_none());
    }

    #[test]
    fn test_ip_update_matches_mac_case_insensitively() {
        let table = arp_table("node-a", &[("10.0.0.11", "06:fe:0a:00:00:01")]).spec;
        let vm = VmBuilder::new("web").mac("06:FE:0A:00:00:01").build();
        assert_eq!(ip_update(&vm, &table).unwrap().ip(), Some("10.0.0.11"));
    }

    #[test]
    fn test_scanned_entries_resolve_through_ip_update() {
        let table = ArpTableSpec {
            node_name: "node-a".to_string(),
            table: crate::parse_table(
                "10.0.0.7 0x1 0x2 06:FE:AA:BB:CC:DD * br0\n\
                 10.0.0.8 0x1 0x2 06:fe:aa:bb:cc:ee * br0\n",
            ),
        };
        // Only the literal lowercase prefix is managed
        assert_eq!(table.table.len(), 1);

        let upper = VmBuilder::new("web").mac("06:fe:aa:bb:cc:dd").build();
        assert!(ip_update(&upper, &table).is_none());

        let lower = VmBuilder::new("db").mac("06:fe:aa:bb:cc:ee").build();
        assert_eq!(ip_update(&lower, &table).unwrap().ip(), Some("10.0.0.8"));
    }

    #[tokio::test]
    async fn test_sync_key_writes_once() {
        let f = fixture(
            vec![arp_table("node-a", &[("10.0.0.11", "06:fe:00:00:00:01")])],
            vec![
                VmBuilder::new("web").mac("06:fe:00:00:00:01").build(),
                VmBuilder::new("db").build(),
            ],
        );

        assert_eq!(f.sync.sync_key("node-a").await.unwrap(), 1);
        assert_eq!(f.vms.get("web").unwrap().unwrap().ip(), Some("10.0.0.11"));
        assert_eq!(f.sync.sync_key("node-a").await.unwrap(), 0);
        assert_eq!(f.vms.write_count(), 1);
        assert_eq!(f.arps.write_count(), 0);
    }

    #[tokio::test]
    async fn test_sync_key_missing_table() {
        let f = fixture(vec![], vec![VmBuilder::new("web").mac("06:fe:00:00:00:01").build()]);
        assert_eq!(f.sync.sync_key("node-z").await.unwrap(), 0);
        assert_eq!(f.vms.write_count(), 0);
    }

    #[tokio::test]
    async fn test_sync_key_reads_table_by_key() {
        let f = fixture(
            vec![arp_table("node-a", &[("10.0.0.11", "06:fe:00:00:00:01")])],
            vec![VmBuilder::new("web").mac("06:fe:00:00:00:01").build()],
        );

        // Keys that name no cached table are a no-op, whatever their shape
        assert_eq!(f.sync.sync_key("other/node-a").await.unwrap(), 0);
        assert_eq!(f.sync.sync_key("a/b/c").await.unwrap(), 0);
        assert_eq!(f.vms.write_count(), 0);

        assert_eq!(f.sync.sync_key("node-a").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_sync_key_reports_write_failures() {
        let f = fixture(
            vec![arp_table("node-a", &[("10.0.0.11", "06:fe:00:00:00:01")])],
            vec![VmBuilder::new("web").mac("06:fe:00:00:00:01").build()],
        );
        f.vms.set_fail_writes(true);

        let err = f.sync.sync_key("node-a").await.unwrap_err();
        assert!(matches!(err, SyncError::Write { failed: 1, attempted: 1, .. }));
    }

    #[tokio::test]
    async fn test_failed_key_is_dropped_without_retries() {
        let f = fixture(
            vec![arp_table("node-a", &[("10.0.0.11", "06:fe:00:00:00:01")])],
            vec![VmBuilder::new("web").mac("06:fe:00:00:00:01").build()],
        );
        f.vms.set_fail_writes(true);

        f.sync.process_key("node-a").await;
        assert_eq!(f.sync.queue().num_requeues("node-a"), 0);
        assert!(f.sync.queue().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_key_is_requeued_with_retries() {
        let f = fixture(
            vec![arp_table("node-a", &[("10.0.0.11", "06:fe:00:00:00:01")])],
            vec![VmBuilder::new("web").mac("06:fe:00:00:00:01").build()],
        );
        let sync = f.sync.with_max_retries(1);
        f.vms.set_fail_writes(true);

        sync.process_key("node-a").await;
        assert_eq!(sync.queue().num_requeues("node-a"), 1);

        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        assert_eq!(sync.queue().len(), 1);

        // Retries exhausted
        sync.process_key("node-a").await;
        assert_eq!(sync.queue().num_requeues("node-a"), 0);
    }
}
