//! Workload synthesis for virtual machines.
//!
//! Turns a `VirtualMachine` into the pods and services that run it:
//!
//! - [`WorkloadBuilder::vm_pod`]: the machine pod, either seeded from the
//!   machine image by an init container or booted from a block volume
//! - [`WorkloadBuilder::console_pod`] / [`WorkloadBuilder::console_service`]:
//!   the noVNC proxy bound to one specific machine pod
//!
//! Building is pure apart from credential lookups and the random draws for
//! instance names and migration ports. Placement and resource policy live in
//! [`placement`] and can be applied to any pod.

mod console;
mod credentials;
mod machine;
mod naming;
mod objects;
pub mod placement;
mod policy;
mod pods;

pub use console::CONSOLE_PORT;
pub use credentials::add_public_keys;
pub use machine::{console_probe, WorkloadBuilder, VM_CONTAINER};
pub use naming::{
    instance_name, instance_name_from, migrate_port, migrate_port_from, MIGRATE_PORT_MIN,
};
pub use objects::binary_si;
pub use placement::{add_anti_affinity, add_migrate_port, add_node_affinity, add_resource_limits};
pub use policy::WorkloadPolicy;
pub use pods::{alive_pods, is_unschedulable};
