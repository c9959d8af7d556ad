//! VirtualMachine CRD
//!
//! `spec` is immutable once created. Status is owned by controllers: the
//! MAC and instance id are assigned when the VM is first scheduled, the IP
//! is filled in by the node agent's IP discovery.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// A virtual machine run as a cluster workload.
#[derive(CustomResource, Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "vmkit.io",
    version = "v1alpha1",
    kind = "VirtualMachine",
    shortname = "vm",
    status = "VirtualMachineStatus",
    printcolumn = r#"{"name":"CPUs", "type":"integer", "jsonPath":".spec.cpus"}"#,
    printcolumn = r#"{"name":"Memory", "type":"integer", "jsonPath":".spec.memoryMB"}"#,
    printcolumn = r#"{"name":"MAC", "type":"string", "jsonPath":".status.mac"}"#,
    printcolumn = r#"{"name":"IP", "type":"string", "jsonPath":".status.ip"}"#,
    printcolumn = r#"{"name":"Age", "type":"date", "jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineSpec {
    /// Number of virtual CPUs.
    pub cpus: i32,

    /// Guest memory in MiB.
    #[serde(rename = "memoryMB")]
    pub memory_mb: i32,

    /// Container image carrying the machine disk image.
    pub machine_image: String,

    /// Extra arguments appended to the hypervisor command line.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hypervisor_args: String,

    /// Names of `Credential` resources injected into the guest.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub public_key_names: Vec<String>,

    /// Pin the VM to this node. The node does not need to exist yet.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_name: Option<String>,

    /// Back guest memory with huge pages.
    #[serde(default)]
    pub use_huge_pages: bool,

    /// Claim holding the boot image; host-local state when unset.
    #[serde(default, rename = "imagePVCName", skip_serializing_if = "Option::is_none")]
    pub image_pvc_name: Option<String>,

    /// Claim holding data volumes; host-local state when unset.
    #[serde(default, rename = "volumesPVCName", skip_serializing_if = "Option::is_none")]
    pub volumes_pvc_name: Option<String>,

    /// Overrides the default tools image used to seed the machine filesystem.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools_image: Option<String>,

    /// Boot the whole machine from a pre-provisioned block volume.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_volume: Option<BlockVolume>,
}

/// Pre-provisioned block volume backing an entire machine.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BlockVolume {
    /// Claim name; defaults to the VM name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claim_name: Option<String>,
}

/// Observed state of a virtual machine.
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VirtualMachineStatus {
    /// MAC address assigned to the guest interface.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,

    /// IP address discovered from the host neighbor cache.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,

    /// Opaque instance identifier handed to the guest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl VirtualMachine {
    /// Assigned MAC address, if any. Empty strings count as unassigned.
    pub fn mac(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.mac.as_deref())
            .filter(|mac| !mac.is_empty())
    }

    /// Discovered IP address, if any.
    pub fn ip(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.ip.as_deref())
            .filter(|ip| !ip.is_empty())
    }

    /// Instance identifier, or an empty string before one is assigned.
    pub fn instance_id(&self) -> &str {
        self.status
            .as_ref()
            .and_then(|s| s.id.as_deref())
            .unwrap_or_default()
    }
}
