//! Placement and resource policy applied to machine pods.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Affinity, Container, NodeAffinity, NodeSelector, NodeSelectorRequirement, NodeSelectorTerm,
    Pod, PodAffinityTerm, PodAntiAffinity, ResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use vmkit_api::labels::{annotations, keys, APP, NODE_HOSTNAME, ROLE_VM};
use vmkit_api::VirtualMachine;

use crate::objects::{binary_si, env, string_map};
use crate::WorkloadPolicy;

/// Huge page size class reserved for guest memory.
pub const HUGE_PAGES_RESOURCE: &str = "hugepages-2Mi";

/// Forbid two pods of the same VM on one node.
///
/// Applies to every instance, so a migration target always lands on a
/// different node than its source.
pub fn add_anti_affinity(pod: &mut Pod, vm_name: &str) {
    let term = PodAffinityTerm {
        label_selector: Some(LabelSelector {
            match_labels: Some(string_map([
                (keys::APP, APP),
                (keys::ROLE, ROLE_VM),
                (keys::NAME, vm_name),
            ])),
            ..Default::default()
        }),
        topology_key: NODE_HOSTNAME.to_string(),
        ..Default::default()
    };

    affinity_mut(pod).pod_anti_affinity = Some(PodAntiAffinity {
        required_during_scheduling_ignored_during_execution: Some(vec![term]),
        ..Default::default()
    });
}

/// Require the node named in the VM spec, if any.
///
/// The node does not have to exist. The pod then stays pending until a node
/// with that name joins.
pub fn add_node_affinity(pod: &mut Pod, vm: &VirtualMachine) {
    let Some(node_name) = vm.spec.node_name.as_deref().filter(|n| !n.is_empty()) else {
        return;
    };

    affinity_mut(pod).node_affinity = Some(NodeAffinity {
        required_during_scheduling_ignored_during_execution: Some(NodeSelector {
            node_selector_terms: vec![NodeSelectorTerm {
                match_expressions: Some(vec![NodeSelectorRequirement {
                    key: NODE_HOSTNAME.to_string(),
                    operator: "In".to_string(),
                    values: Some(vec![node_name.to_string()]),
                }]),
                ..Default::default()
            }],
        }),
        ..Default::default()
    });
}

/// Limit the machine container to the VM's CPUs and memory.
///
/// With huge pages the same amount is also reserved as huge pages; the two
/// limits describe the same guest memory and are not added up.
pub fn add_resource_limits(pod: &mut Pod, vm: &VirtualMachine, policy: &WorkloadPolicy) {
    if policy.no_resource_limits {
        return;
    }
    let Some(container) = main_container_mut(pod) else {
        return;
    };

    let memory = binary_si(i64::from(vm.spec.memory_mb) * 1024 * 1024);
    let mut limits = BTreeMap::new();
    limits.insert("cpu".to_string(), binary_si(i64::from(vm.spec.cpus)));
    if vm.spec.use_huge_pages {
        limits.insert(HUGE_PAGES_RESOURCE.to_string(), memory.clone());
    }
    limits.insert("memory".to_string(), memory);

    container.resources = Some(ResourceRequirements {
        limits: Some(limits),
        ..Default::default()
    });
}

/// Publish the live-migration port as `MIGRATE_PORT` and as an annotation.
pub fn add_migrate_port(pod: &mut Pod, port: u16) {
    let port = port.to_string();
    if let Some(container) = main_container_mut(pod) {
        container
            .env
            .get_or_insert_with(Vec::new)
            .push(env("MIGRATE_PORT", port.clone()));
    }
    pod.metadata
        .annotations
        .get_or_insert_with(BTreeMap::new)
        .insert(annotations::MIGRATE_PORT.to_string(), port);
}

pub(crate) fn main_container_mut(pod: &mut Pod) -> Option<&mut Container> {
    pod.spec.as_mut().and_then(|spec| spec.containers.first_mut())
}

pub(crate) fn affinity_mut(pod: &mut Pod) -> &mut Affinity {
    pod.spec
        .get_or_insert_with(Default::default)
        .affinity
        .get_or_insert_with(Default::default)
}
