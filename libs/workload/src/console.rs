//! noVNC console proxy.
//!
//! One proxy pod and one NodePort service per VM. The pod is pinned by hard
//! pod affinity to a single machine pod (by `unique_name`), so it always
//! reaches the socket of that exact instance.

use k8s_openapi::api::core::v1::{
    Affinity, Container, Pod, PodAffinity, PodAffinityTerm, PodSpec, Service, ServicePort,
    ServiceSpec,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::ResourceExt;
use vmkit_api::labels::{keys, APP, NAME_DELIMITER, NODE_HOSTNAME, ROLE_CONSOLE, ROLE_VM};
use vmkit_api::VirtualMachine;

use crate::machine::{socket_volume, SOCKET_VOLUME};
use crate::objects::{env, field_volume, mount, string_map, PULL_ALWAYS};
use crate::WorkloadBuilder;

/// Port the proxy listens on.
pub const CONSOLE_PORT: i32 = 6080;

const PODINFO_VOLUME: &str = "podinfo";

fn console_name(vm_name: &str) -> String {
    format!("{vm_name}{NAME_DELIMITER}{ROLE_CONSOLE}")
}

impl WorkloadBuilder<'_> {
    /// Console proxy pod for the machine pod named `instance_name`.
    pub fn console_pod(&self, vm: &VirtualMachine, instance_name: &str) -> Pod {
        let vm_name = vm.name_any();
        let container = Container {
            name: ROLE_CONSOLE.to_string(),
            image: Some(self.policy.console_image.clone()),
            image_pull_policy: Some(PULL_ALWAYS.to_string()),
            command: Some(vec!["novnc".to_string()]),
            env: Some(vec![env("VM_POD_NAME", instance_name)]),
            volume_mounts: Some(vec![
                mount(SOCKET_VOLUME, "/vm", true),
                mount(PODINFO_VOLUME, "/podinfo", true),
            ]),
            ..Default::default()
        };

        let instance = PodAffinityTerm {
            label_selector: Some(LabelSelector {
                match_labels: Some(string_map([
                    (keys::APP, APP),
                    (keys::NAME, &vm_name),
                    (keys::UNIQUE_NAME, instance_name),
                    (keys::ROLE, ROLE_VM),
                ])),
                ..Default::default()
            }),
            topology_key: NODE_HOSTNAME.to_string(),
            ..Default::default()
        };

        Pod {
            metadata: ObjectMeta {
                name: Some(console_name(&vm_name)),
                labels: Some(console_labels(&vm_name)),
                ..Default::default()
            },
            spec: Some(PodSpec {
                volumes: Some(vec![
                    socket_volume(self.policy, &vm_name),
                    field_volume(PODINFO_VOLUME, "labels", "metadata.labels"),
                ]),
                containers: vec![container],
                termination_grace_period_seconds: Some(0),
                affinity: Some(Affinity {
                    pod_affinity: Some(PodAffinity {
                        required_during_scheduling_ignored_during_execution: Some(vec![instance]),
                        ..Default::default()
                    }),
                    ..Default::default()
                }),
                image_pull_secrets: self.image_pull_secrets(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    /// NodePort service exposing the console proxy.
    pub fn console_service(&self, vm: &VirtualMachine) -> Service {
        let vm_name = vm.name_any();
        Service {
            metadata: ObjectMeta {
                name: Some(console_name(&vm_name)),
                ..Default::default()
            },
            spec: Some(ServiceSpec {
                ports: Some(vec![ServicePort {
                    name: Some(ROLE_CONSOLE.to_string()),
                    port: CONSOLE_PORT,
                    ..Default::default()
                }]),
                selector: Some(console_labels(&vm_name)),
                type_: Some("NodePort".to_string()),
                ..Default::default()
            }),
            ..Default::default()
        }
    }
}

fn console_labels(vm_name: &str) -> std::collections::BTreeMap<String, String> {
    string_map([
        (keys::APP, APP),
        (keys::NAME, vm_name),
        (keys::ROLE, ROLE_CONSOLE),
    ])
}
