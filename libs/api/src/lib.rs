//! # vmkit-api
//!
//! Custom resources for running virtual machines as cluster workloads.
//!
//! ## Resources
//!
//! - `VirtualMachine`: declarative VM description; status carries the
//!   assigned MAC, the discovered IP and the instance identifier
//! - `ARPTable`: per-node snapshot of managed neighbor-cache entries,
//!   written only by the node agent running on that node
//! - `Credential`: named public key injected into guests
//!
//! All resources are cluster-scoped.

pub mod arp_table;
pub mod credential;
pub mod labels;
pub mod virtual_machine;

pub use arp_table::{is_managed_mac, ArpEntry, ArpTable, ArpTableSpec, MANAGED_MAC_PREFIX};
pub use credential::{Credential, CredentialSpec};
pub use virtual_machine::{BlockVolume, VirtualMachine, VirtualMachineSpec, VirtualMachineStatus};

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::CustomResourceExt;

/// API group shared by all vmkit resources.
pub const GROUP: &str = "vmkit.io";

/// Definitions for every vmkit custom resource.
pub fn crds() -> Vec<CustomResourceDefinition> {
    vec![VirtualMachine::crd(), ArpTable::crd(), Credential::crd()]
}
