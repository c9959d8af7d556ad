//! Test fixtures shared across the workspace.

use vmkit_api::{
    ArpEntry, ArpTable, BlockVolume, Credential, CredentialSpec, VirtualMachine,
    VirtualMachineSpec, VirtualMachineStatus,
};

/// Neighbor table as read from `/proc/net/arp` on a node running three
/// managed VMs next to ordinary hosts.
pub const SAMPLE_NEIGHBOR_TABLE: &str = "\
IP address       HW type     Flags       HW address            Mask     Device
10.0.0.1         0x1         0x2         52:54:00:12:34:56     *        br0
10.0.0.11        0x1         0x2         06:fe:00:00:00:01     *        br0
10.0.0.12        0x1         0x2         06:fe:00:00:00:02     *        br0
192.168.1.20     0x1         0x2         a4:83:e7:11:22:33     *        eth0
10.0.0.13        0x1         0x2         06:fe:00:00:00:03     *        br0
10.0.0.99        0x1         0x0         00:00:00:00:00:00     *        br0
";

/// Managed entries in [`SAMPLE_NEIGHBOR_TABLE`], as `(ip, mac)`.
pub const SAMPLE_MANAGED: [(&str, &str); 3] = [
    ("10.0.0.11", "06:fe:00:00:00:01"),
    ("10.0.0.12", "06:fe:00:00:00:02"),
    ("10.0.0.13", "06:fe:00:00:00:03"),
];

/// Neighbor entry with the values the kernel reports for a resolved peer.
pub fn arp_entry(ip: &str, mac: &str) -> ArpEntry {
    ArpEntry {
        ip: ip.to_string(),
        hardware_type: "0x1".to_string(),
        flags: "0x2".to_string(),
        hardware_address: mac.to_string(),
        netmask: "*".to_string(),
        device: "br0".to_string(),
    }
}

/// ARP table for `node` holding `(ip, mac)` pairs.
pub fn arp_table(node: &str, entries: &[(&str, &str)]) -> ArpTable {
    let mut table = ArpTable::for_node(node);
    for (ip, mac) in entries {
        table
            .spec
            .table
            .insert(mac.to_string(), arp_entry(ip, mac));
    }
    table
}

pub fn credential(name: &str, public_key: &str) -> Credential {
    Credential::new(
        name,
        CredentialSpec {
            public_key: public_key.to_string(),
        },
    )
}

/// Builder for `VirtualMachine` fixtures.
pub struct VmBuilder {
    name: String,
    spec: VirtualMachineSpec,
    status: Option<VirtualMachineStatus>,
}

impl VmBuilder {
    /// A 2 CPU, 2 GiB VM with no status.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            spec: VirtualMachineSpec {
                cpus: 2,
                memory_mb: 2048,
                machine_image: "registry.example.com/images/debian:12".to_string(),
                ..Default::default()
            },
            status: None,
        }
    }

    pub fn cpus(mut self, cpus: i32) -> Self {
        self.spec.cpus = cpus;
        self
    }

    pub fn memory_mb(mut self, memory_mb: i32) -> Self {
        self.spec.memory_mb = memory_mb;
        self
    }

    pub fn hypervisor_args(mut self, args: &str) -> Self {
        self.spec.hypervisor_args = args.to_string();
        self
    }

    pub fn node(mut self, node: &str) -> Self {
        self.spec.node_name = Some(node.to_string());
        self
    }

    pub fn huge_pages(mut self) -> Self {
        self.spec.use_huge_pages = true;
        self
    }

    pub fn public_keys(mut self, names: &[&str]) -> Self {
        self.spec.public_key_names = names.iter().map(|n| n.to_string()).collect();
        self
    }

    pub fn image_pvc(mut self, claim: &str) -> Self {
        self.spec.image_pvc_name = Some(claim.to_string());
        self
    }

    pub fn volumes_pvc(mut self, claim: &str) -> Self {
        self.spec.volumes_pvc_name = Some(claim.to_string());
        self
    }

    pub fn tools_image(mut self, image: &str) -> Self {
        self.spec.tools_image = Some(image.to_string());
        self
    }

    pub fn block_volume(mut self, claim: Option<&str>) -> Self {
        self.spec.block_volume = Some(BlockVolume {
            claim_name: claim.map(str::to_string),
        });
        self
    }

    pub fn mac(mut self, mac: &str) -> Self {
        self.status.get_or_insert_with(Default::default).mac = Some(mac.to_string());
        self
    }

    pub fn ip(mut self, ip: &str) -> Self {
        self.status.get_or_insert_with(Default::default).ip = Some(ip.to_string());
        self
    }

    pub fn instance_id(mut self, id: &str) -> Self {
        self.status.get_or_insert_with(Default::default).id = Some(id.to_string());
        self
    }

    pub fn build(self) -> VirtualMachine {
        let mut vm = VirtualMachine::new(&self.name, self.spec);
        vm.status = self.status;
        vm
    }
}
