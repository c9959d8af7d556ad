//! Machine pods.
//!
//! Two shapes:
//! - **seeded**: an init container copies the tools filesystem into host
//!   state, the machine image runs `startvm` on top of it. Boot image and
//!   data volumes each come from host state or from a claim.
//! - **block volume**: the tools image boots the VM straight from a claim.
//!   No init container.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::{
    Container, ExecAction, LocalObjectReference, Pod, PodSpec, Probe, SecurityContext, Volume,
    VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::ResourceExt;
use rand::Rng;
use tracing::debug;
use vmkit_api::labels::{annotations, keys, APP, ROLE_VM};
use vmkit_api::{Credential, VirtualMachine};
use vmkit_reconcile::Cache;

use crate::objects::{
    claim_volume, empty_dir_volume, env, env_field, host_path_volume, mount, sub_path_mount,
    PULL_ALWAYS,
};
use crate::placement::{add_anti_affinity, add_migrate_port, add_node_affinity, add_resource_limits};
use crate::{add_public_keys, instance_name_from, migrate_port_from, WorkloadPolicy};

/// Name of the container running the hypervisor.
pub const VM_CONTAINER: &str = "vm";

const SEED_CONTAINER: &str = "debootstrap";
const SEEDED_START_COMMAND: &str = "/usr/bin/startvm";
const BLOCK_START_COMMAND: &str = "/opt/vmkit/vm-tools/startvm";

/// Tools filesystem subdirectories mounted over the machine image. `/etc`
/// stays writable so the kubelet can mount hosts and resolv.conf into it.
const SEEDED_SYSTEM_DIRS: [(&str, bool); 7] = [
    ("bin", true),
    ("etc", false),
    ("lib", true),
    ("lib64", true),
    ("sbin", true),
    ("usr", true),
    ("var", true),
];

mod volumes {
    pub const FS: &str = "vm-fs";
    pub const IMAGE: &str = "vm-image";
    pub const VOLUMES: &str = "vm-volumes";
    pub const SOCKET: &str = "vm-socket";
    pub const KVM: &str = "dev-kvm";
    pub const HUGE_PAGES: &str = "hugepages";
    pub const BLOCK: &str = "block-volume";
}

/// Probe passing once the VM's VNC socket exists.
///
/// Exec based, since the console is a unix socket under the shared `/vm`
/// mount rather than a network port.
pub fn console_probe() -> Probe {
    Probe {
        exec: Some(ExecAction {
            command: Some(vec![
                "/bin/sh".to_string(),
                "-c".to_string(),
                "[ -S /vm/${MY_POD_NAME}_vnc.sock ]".to_string(),
            ]),
        }),
        initial_delay_seconds: Some(2),
        timeout_seconds: Some(2),
        period_seconds: Some(3),
        success_threshold: Some(1),
        failure_threshold: Some(10),
        ..Default::default()
    }
}

/// Builds pods and services for virtual machines.
pub struct WorkloadBuilder<'a> {
    pub(crate) policy: &'a WorkloadPolicy,
    credentials: &'a dyn Cache<Credential>,
}

impl<'a> WorkloadBuilder<'a> {
    pub fn new(policy: &'a WorkloadPolicy, credentials: &'a dyn Cache<Credential>) -> Self {
        Self {
            policy,
            credentials,
        }
    }

    /// Machine pod for `vm`. With `migrate`, the pod is a migration target
    /// and carries a freshly drawn migration port.
    pub fn vm_pod(&self, vm: &VirtualMachine, migrate: bool) -> Pod {
        self.vm_pod_with(&mut rand::rng(), vm, migrate)
    }

    /// [`WorkloadBuilder::vm_pod`] drawing names and ports from `rng`.
    pub fn vm_pod_with<R: Rng + ?Sized>(
        &self,
        rng: &mut R,
        vm: &VirtualMachine,
        migrate: bool,
    ) -> Pod {
        let vm_name = vm.name_any();
        let pod_name = instance_name_from(rng, &vm_name);

        let mut pod = match vm.spec.block_volume.as_ref() {
            Some(block) => {
                let claim = block.claim_name.as_deref().unwrap_or(&vm_name);
                self.block_volume_pod(vm, &pod_name, claim, migrate)
            }
            None => self.seeded_pod(vm, &pod_name, migrate),
        };

        add_anti_affinity(&mut pod, &vm_name);
        add_resource_limits(&mut pod, vm, self.policy);
        add_public_keys(&mut pod, &vm.spec.public_key_names, self.credentials);
        if migrate {
            add_migrate_port(&mut pod, migrate_port_from(rng));
        }
        add_node_affinity(&mut pod, vm);

        debug!(vm = %vm_name, pod = %pod_name, migrate, "Built machine pod");
        pod
    }

    fn seeded_pod(&self, vm: &VirtualMachine, pod_name: &str, migrate: bool) -> Pod {
        let vm_name = vm.name_any();
        let state_dir = self.policy.vm_state_dir(&vm_name);
        let host_state = |volume: &str| host_path_volume(volume, format!("{state_dir}/{volume}"));

        let image_volume = match vm.spec.image_pvc_name.as_deref() {
            Some(claim) => claim_volume(volumes::IMAGE, claim),
            None => host_state(volumes::IMAGE),
        };
        let data_volume = match vm.spec.volumes_pvc_name.as_deref() {
            Some(claim) => claim_volume(volumes::VOLUMES, claim),
            None => host_state(volumes::VOLUMES),
        };
        let huge_pages_medium = vm.spec.use_huge_pages.then_some("HugePages");

        let mut mounts = vec![
            mount(volumes::IMAGE, "/image", false),
            mount(volumes::VOLUMES, "/volumes", false),
            mount(volumes::KVM, "/dev/kvm", false),
            mount(volumes::HUGE_PAGES, "/hugepages", false),
            mount(volumes::SOCKET, "/vm", false),
        ];
        mounts.extend(SEEDED_SYSTEM_DIRS.iter().map(|(dir, read_only)| {
            sub_path_mount(volumes::FS, &format!("/{dir}"), dir, *read_only)
        }));

        let container = self.machine_container(
            vm,
            &vm.spec.machine_image,
            SEEDED_START_COMMAND,
            mounts,
            migrate,
        );
        let seed = Container {
            name: SEED_CONTAINER.to_string(),
            image: Some(self.tools_image(vm).to_string()),
            image_pull_policy: Some(PULL_ALWAYS.to_string()),
            volume_mounts: Some(vec![mount(volumes::FS, "/vm-tools", false)]),
            ..Default::default()
        };

        let mut meta_annotations = self.annotations(vm);
        meta_annotations.insert(
            annotations::IMAGE.to_string(),
            vm.spec.machine_image.clone(),
        );

        Pod {
            metadata: self.metadata(&vm_name, pod_name, meta_annotations),
            spec: Some(PodSpec {
                volumes: Some(vec![
                    host_state(volumes::FS),
                    image_volume,
                    data_volume,
                    host_path_volume(volumes::SOCKET, state_dir.clone()),
                    host_path_volume(volumes::KVM, "/dev/kvm"),
                    empty_dir_volume(volumes::HUGE_PAGES, huge_pages_medium),
                ]),
                init_containers: Some(vec![seed]),
                containers: vec![container],
                host_network: Some(true),
                image_pull_secrets: self.image_pull_secrets(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn block_volume_pod(
        &self,
        vm: &VirtualMachine,
        pod_name: &str,
        claim: &str,
        migrate: bool,
    ) -> Pod {
        let vm_name = vm.name_any();
        let mounts = vec![
            mount(volumes::KVM, "/dev/kvm", false),
            mount(volumes::SOCKET, "/vm", false),
            mount(volumes::BLOCK, "/block", false),
        ];
        let container =
            self.machine_container(vm, self.tools_image(vm), BLOCK_START_COMMAND, mounts, migrate);

        Pod {
            metadata: self.metadata(&vm_name, pod_name, self.annotations(vm)),
            spec: Some(PodSpec {
                volumes: Some(vec![
                    host_path_volume(volumes::SOCKET, self.policy.vm_state_dir(&vm_name)),
                    host_path_volume(volumes::KVM, "/dev/kvm"),
                    claim_volume(volumes::BLOCK, claim),
                ]),
                containers: vec![container],
                host_network: Some(true),
                image_pull_secrets: self.image_pull_secrets(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn machine_container(
        &self,
        vm: &VirtualMachine,
        image: &str,
        command: &str,
        volume_mounts: Vec<VolumeMount>,
        migrate: bool,
    ) -> Container {
        let probe = console_probe();
        Container {
            name: VM_CONTAINER.to_string(),
            image: Some(image.to_string()),
            image_pull_policy: Some(PULL_ALWAYS.to_string()),
            command: Some(vec![command.to_string()]),
            env: Some(vec![
                env_field("MY_POD_NAME", "metadata.name"),
                env_field("MY_POD_NAMESPACE", "metadata.namespace"),
                env("IFACE", self.policy.bridge_interface.as_str()),
                env("KVM_EXTRA_ARGS", vm.spec.hypervisor_args.as_str()),
                env("MEMORY_MB", vm.spec.memory_mb.to_string()),
                env("CPUS", vm.spec.cpus.to_string()),
                env("MAC", vm.mac().unwrap_or_default()),
                env("INSTANCE_ID", vm.instance_id()),
                env("MIGRATE", migrate.to_string()),
                env("MY_VM_NAME", vm.name_any()),
            ]),
            volume_mounts: Some(volume_mounts),
            liveness_probe: Some(probe.clone()),
            readiness_probe: Some(probe),
            security_context: Some(SecurityContext {
                privileged: Some(self.policy.privileged),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    fn metadata(
        &self,
        vm_name: &str,
        pod_name: &str,
        annotations: BTreeMap<String, String>,
    ) -> ObjectMeta {
        let labels = [
            (keys::APP, APP),
            (keys::ROLE, ROLE_VM),
            (keys::NAME, vm_name),
            (keys::UNIQUE_NAME, pod_name),
        ];
        ObjectMeta {
            name: Some(pod_name.to_string()),
            labels: Some(
                labels
                    .into_iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
            ),
            annotations: Some(annotations),
            ..Default::default()
        }
    }

    fn annotations(&self, vm: &VirtualMachine) -> BTreeMap<String, String> {
        [
            (annotations::CPUS, vm.spec.cpus.to_string()),
            (annotations::MEMORY_MB, vm.spec.memory_mb.to_string()),
            (annotations::ID, vm.instance_id().to_string()),
            (annotations::MAC, vm.mac().unwrap_or_default().to_string()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
    }

    fn tools_image<'v>(&'v self, vm: &'v VirtualMachine) -> &'v str {
        vm.spec
            .tools_image
            .as_deref()
            .filter(|image| !image.is_empty())
            .unwrap_or(&self.policy.tools_image)
    }

    pub(crate) fn image_pull_secrets(&self) -> Option<Vec<LocalObjectReference>> {
        self.policy.registry_secret.as_ref().map(|name| {
            vec![LocalObjectReference {
                name: name.clone(),
            }]
        })
    }
}

/// Volume for the VM's console socket directory, shared with the console pod.
pub(crate) fn socket_volume(policy: &WorkloadPolicy, vm_name: &str) -> Volume {
    host_path_volume(volumes::SOCKET, policy.vm_state_dir(vm_name))
}

pub(crate) const SOCKET_VOLUME: &str = volumes::SOCKET;

#[cfg(test)]
mod tests {
    use super::*;
    use vmkit_reconcile::MemoryStore;
    use vmkit_testing::VmBuilder;

    fn build(policy: &WorkloadPolicy, vm: &VirtualMachine, migrate: bool) -> Pod {
        let creds: MemoryStore<Credential> = MemoryStore::new();
        WorkloadBuilder::new(policy, &creds).vm_pod(vm, migrate)
    }

    fn volume<'p>(pod: &'p Pod, name: &str) -> &'p Volume {
        pod.spec
            .as_ref()
            .unwrap()
            .volumes
            .as_ref()
            .unwrap()
            .iter()
            .find(|v| v.name == name)
            .unwrap()
    }

    fn env_value(pod: &Pod, name: &str) -> Option<String> {
        pod.spec.as_ref().unwrap().containers[0]
            .env
            .iter()
            .flatten()
            .find(|v| v.name == name)
            .and_then(|v| v.value.clone())
    }

    #[test]
    fn test_seeded_pod_shape() {
        let vm = VmBuilder::new("web")
            .mac("06:fe:00:00:00:01")
            .instance_id("i-0001")
            .build();
        let pod = build(&WorkloadPolicy::default(), &vm, false);
        let spec = pod.spec.as_ref().unwrap();

        assert_eq!(spec.host_network, Some(true));
        assert!(spec.image_pull_secrets.is_none());

        let init = spec.init_containers.as_ref().unwrap();
        assert_eq!(init.len(), 1);
        assert_eq!(init[0].name, "debootstrap");
        assert_eq!(init[0].image.as_deref(), Some("ghcr.io/vmkit/vm-tools:latest"));

        let vm_container = &spec.containers[0];
        assert_eq!(vm_container.name, VM_CONTAINER);
        assert_eq!(vm_container.image.as_deref(), Some(vm.spec.machine_image.as_str()));
        assert_eq!(
            vm_container.command.as_deref(),
            Some(&["/usr/bin/startvm".to_string()][..])
        );
        assert_eq!(
            vm_container.security_context.as_ref().unwrap().privileged,
            Some(true)
        );

        let mounts = vm_container.volume_mounts.as_ref().unwrap();
        let etc = mounts.iter().find(|m| m.mount_path == "/etc").unwrap();
        assert_eq!(etc.read_only, None);
        let usr = mounts.iter().find(|m| m.mount_path == "/usr").unwrap();
        assert_eq!(usr.read_only, Some(true));

        assert_eq!(env_value(&pod, "MAC").as_deref(), Some("06:fe:00:00:00:01"));
        assert_eq!(env_value(&pod, "INSTANCE_ID").as_deref(), Some("i-0001"));
        assert_eq!(env_value(&pod, "MIGRATE").as_deref(), Some("false"));
        assert_eq!(env_value(&pod, "IFACE").as_deref(), Some("br0"));
        assert_eq!(env_value(&pod, "PUBLIC_KEY_COUNT").as_deref(), Some("0"));
        assert_eq!(env_value(&pod, "MIGRATE_PORT"), None);

        let annotations = pod.metadata.annotations.as_ref().unwrap();
        assert_eq!(annotations["image"], vm.spec.machine_image);
        assert_eq!(annotations["mac"], "06:fe:00:00:00:01");
        assert!(!annotations.contains_key("migrate_port"));
    }

    #[test]
    fn test_storage_follows_claims() {
        let vm = VmBuilder::new("web").image_pvc("web-image").build();
        let pod = build(&WorkloadPolicy::default(), &vm, false);

        let image = volume(&pod, "vm-image");
        assert_eq!(
            image.persistent_volume_claim.as_ref().unwrap().claim_name,
            "web-image"
        );
        assert!(image.host_path.is_none());

        let data = volume(&pod, "vm-volumes");
        assert_eq!(
            data.host_path.as_ref().unwrap().path,
            "/var/lib/vmkit/web/vm-volumes"
        );
        assert_eq!(
            volume(&pod, "vm-socket").host_path.as_ref().unwrap().path,
            "/var/lib/vmkit/web"
        );
    }

    #[test]
    fn test_huge_pages_medium() {
        let plain = build(&WorkloadPolicy::default(), &VmBuilder::new("a").build(), false);
        assert_eq!(
            volume(&plain, "hugepages").empty_dir.as_ref().unwrap().medium,
            None
        );

        let huge = build(
            &WorkloadPolicy::default(),
            &VmBuilder::new("a").huge_pages().build(),
            false,
        );
        assert_eq!(
            volume(&huge, "hugepages")
                .empty_dir
                .as_ref()
                .unwrap()
                .medium
                .as_deref(),
            Some("HugePages")
        );
    }

    #[test]
    fn test_block_volume_pod_shape() {
        let vm = VmBuilder::new("db")
            .block_volume(None)
            .tools_image("registry.local/vm-tools:v2")
            .build();
        let policy = WorkloadPolicy {
            registry_secret: Some("regcred".to_string()),
            ..Default::default()
        };
        let pod = build(&policy, &vm, false);
        let spec = pod.spec.as_ref().unwrap();

        assert!(spec.init_containers.is_none());
        assert_eq!(
            spec.containers[0].image.as_deref(),
            Some("registry.local/vm-tools:v2")
        );
        assert_eq!(
            volume(&pod, "block-volume")
                .persistent_volume_claim
                .as_ref()
                .unwrap()
                .claim_name,
            "db"
        );
        assert_eq!(spec.image_pull_secrets.as_ref().unwrap()[0].name, "regcred");
        // Placement policy applies to both shapes
        assert!(spec.affinity.as_ref().unwrap().pod_anti_affinity.is_some());
    }

    #[test]
    fn test_unprivileged_policy() {
        let policy = WorkloadPolicy {
            privileged: false,
            ..Default::default()
        };
        let pod = build(&policy, &VmBuilder::new("web").build(), false);
        let container = &pod.spec.unwrap().containers[0];
        assert_eq!(
            container.security_context.as_ref().unwrap().privileged,
            Some(false)
        );
    }

    #[test]
    fn test_console_probe() {
        let probe = console_probe();
        let command = probe.exec.unwrap().command.unwrap();
        assert_eq!(command[2], "[ -S /vm/${MY_POD_NAME}_vnc.sock ]");
        assert_eq!(probe.failure_threshold, Some(10));
        assert_eq!(probe.period_seconds, Some(3));
    }
}
