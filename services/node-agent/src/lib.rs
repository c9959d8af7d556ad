//! vmkit Node Agent Library
//!
//! The node agent runs on every node that hosts VMs and discovers the IP
//! addresses of the VMs running there.
//!
//! ## Architecture
//!
//! Two independent loops, each the sole writer of one kind of record:
//!
//! ```text
//! /proc/net/arp ──scan──> ArpReconciler ──create/update──> ARPTable(node)
//!                         (timer, 5s)                            │
//!                                                          notification
//!                                                                │
//!            VirtualMachine.status.ip <──update_status── StatusSynchronizer
//!                                                        (work queue, 1 worker)
//! ```
//!
//! ## Modules
//!
//! - `neighbor`: neighbor cache parsing and scanning
//! - `reconciler`: ARP table reconciliation loop
//! - `status_sync`: VM status synchronizer
//! - `kube_store`: Kubernetes-backed cache, watch and writer

pub mod config;
pub mod kube_store;
pub mod neighbor;
pub mod reconciler;
pub mod status_sync;

pub use config::Config;
pub use kube_store::KubeStore;
pub use neighbor::{parse_line, parse_table, NeighborScanner, ScanError};
pub use reconciler::{ArpReconciler, ReconcileError, ReconcileOutcome};
pub use status_sync::{ip_update, StatusSynchronizer, SyncError};
