//! ARPTable CRD
//!
//! One record per node, named after the node. The node agent on that node is
//! the only writer; everything else reads it.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Hardware address prefix reserved for managed VM interfaces.
///
/// The second-lowest bit of the first octet marks the address as locally
/// administered.
pub const MANAGED_MAC_PREFIX: &str = "06:fe";

/// Whether a hardware address belongs to a managed VM interface.
///
/// The kernel prints hardware addresses in lowercase, so the prefix is
/// matched literally.
pub fn is_managed_mac(hardware_address: &str) -> bool {
    hardware_address.starts_with(MANAGED_MAC_PREFIX)
}

/// Neighbor-cache snapshot for a single node.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "vmkit.io",
    version = "v1alpha1",
    kind = "ARPTable",
    root = "ArpTable",
    plural = "arptables",
    shortname = "arp",
    printcolumn = r#"{"name":"Node", "type":"string", "jsonPath":".spec.nodeName"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ArpTableSpec {
    /// Node the table was scanned on.
    pub node_name: String,

    /// Entries keyed by hardware address.
    #[serde(default)]
    pub table: BTreeMap<String, ArpEntry>,
}

/// A single neighbor-cache entry.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ArpEntry {
    pub ip: String,
    pub hardware_type: String,
    pub flags: String,
    pub hardware_address: String,
    pub netmask: String,
    pub device: String,
}

impl ArpTable {
    /// An empty table for `node_name`, ready to be created.
    pub fn for_node(node_name: &str) -> Self {
        Self::new(
            node_name,
            ArpTableSpec {
                node_name: node_name.to_string(),
                table: BTreeMap::new(),
            },
        )
    }
}

impl ArpTableSpec {
    /// Entry for a hardware address. Case-insensitive.
    pub fn lookup(&self, hardware_address: &str) -> Option<&ArpEntry> {
        self.table
            .get(hardware_address)
            .or_else(|| self.table.get(&hardware_address.to_ascii_lowercase()))
    }
}
