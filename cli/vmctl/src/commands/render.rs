//! Offline workload rendering.
//!
//! Builds the pods and services the controller would create for a VM from
//! local manifests. Nothing is sent to a cluster.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use clap::Args;
use kube::ResourceExt;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use vmkit_api::{Credential, VirtualMachine};
use vmkit_reconcile::MemoryStore;
use vmkit_workload::{WorkloadBuilder, WorkloadPolicy};

use crate::error::CliError;
use crate::output::{print_documents, print_info};

use super::CommandContext;

/// Render the machine pod (and optionally its console) for a VM.
#[derive(Debug, Args)]
pub struct RenderCommand {
    /// VirtualMachine manifest (YAML).
    #[arg(value_name = "PATH")]
    vm: PathBuf,

    /// Credential manifests, one YAML document each.
    #[arg(long, value_name = "PATH")]
    credentials: Option<PathBuf>,

    /// Render the migration target variant.
    #[arg(long)]
    migrate: bool,

    /// Also render the console proxy pod and service.
    #[arg(long)]
    console: bool,

    #[command(flatten)]
    policy: PolicyArgs,
}

/// Cluster-wide workload policy.
#[derive(Debug, Args)]
struct PolicyArgs {
    /// Host bridge for guest interfaces.
    #[arg(long, env = "VMKIT_BRIDGE_IFACE", default_value = "br0")]
    bridge_iface: String,

    /// Do not set CPU, memory or huge page limits.
    #[arg(long)]
    no_resource_limits: bool,

    /// Run machine containers unprivileged.
    #[arg(long)]
    unprivileged: bool,

    /// Default tools image.
    #[arg(long, env = "VMKIT_TOOLS_IMAGE")]
    tools_image: Option<String>,

    /// Console proxy image.
    #[arg(long, env = "VMKIT_CONSOLE_IMAGE")]
    console_image: Option<String>,

    /// Image pull secret attached to every pod.
    #[arg(long, env = "VMKIT_REGISTRY_SECRET")]
    registry_secret: Option<String>,

    /// Host directory for per-VM state.
    #[arg(long, env = "VMKIT_HOST_STATE_DIR")]
    host_state_dir: Option<String>,
}

impl PolicyArgs {
    fn to_policy(&self) -> WorkloadPolicy {
        let defaults = WorkloadPolicy::default();
        WorkloadPolicy {
            bridge_interface: self.bridge_iface.clone(),
            no_resource_limits: self.no_resource_limits,
            privileged: !self.unprivileged,
            tools_image: self.tools_image.clone().unwrap_or(defaults.tools_image),
            console_image: self.console_image.clone().unwrap_or(defaults.console_image),
            registry_secret: self.registry_secret.clone(),
            host_state_dir: self
                .host_state_dir
                .clone()
                .unwrap_or(defaults.host_state_dir),
        }
    }
}

impl RenderCommand {
    pub fn run(self, ctx: CommandContext) -> Result<()> {
        let docs = self.render()?;
        print_documents(&docs, ctx.format)
    }

    fn render(&self) -> Result<Vec<Value>> {
        let vm = load_vm(&self.vm)?;
        let credentials = match &self.credentials {
            Some(path) => load_credentials(path)?,
            None => Vec::new(),
        };
        let credentials = MemoryStore::with_objects(credentials);
        let policy = self.policy.to_policy();
        let builder = WorkloadBuilder::new(&policy, &credentials);

        let pod = builder.vm_pod(&vm, self.migrate);
        let instance = pod.name_any();
        print_info(&format!("Rendered machine pod {instance}"));

        let mut docs = vec![serde_json::to_value(&pod)?];
        if self.console {
            docs.push(serde_json::to_value(builder.console_pod(&vm, &instance))?);
            docs.push(serde_json::to_value(builder.console_service(&vm))?);
        }
        Ok(docs)
    }
}

fn read(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn load_vm(path: &Path) -> Result<VirtualMachine> {
    let vm: VirtualMachine =
        serde_yaml::from_str(&read(path)?).map_err(|source| CliError::Manifest {
            path: path.to_path_buf(),
            source,
        })?;
    if vm.metadata.name.as_deref().unwrap_or_default().is_empty() {
        bail!("{}: VirtualMachine has no metadata.name", path.display());
    }
    Ok(vm)
}

fn load_credentials(path: &Path) -> Result<Vec<Credential>> {
    let contents = read(path)?;
    let credentials = serde_yaml::Deserializer::from_str(&contents)
        .map(|doc| {
            Credential::deserialize(doc).map_err(|source| CliError::Manifest {
                path: path.to_path_buf(),
                source,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    debug!(path = %path.display(), count = credentials.len(), "Loaded credentials");
    Ok(credentials)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const VM: &str = r#"
apiVersion: vmkit.io/v1alpha1
kind: VirtualMachine
metadata:
  name: web
spec:
  cpus: 2
  memoryMB: 2048
  machineImage: registry.local/images/debian:12
  publicKeyNames: [alice, bob]
  useHugePages: true
status:
  mac: "06:fe:00:00:00:01"
"#;

    const CREDENTIALS: &str = r#"
apiVersion: vmkit.io/v1alpha1
kind: Credential
metadata:
  name: alice
spec:
  publicKey: ssh-ed25519 AAAA alice
---
apiVersion: vmkit.io/v1alpha1
kind: Credential
metadata:
  name: carol
spec:
  publicKey: ssh-ed25519 CCCC carol
"#;

    struct Files {
        _dir: TempDir,
        vm: PathBuf,
        credentials: PathBuf,
    }

    fn files() -> Files {
        let dir = TempDir::new().unwrap();
        let vm = dir.path().join("vm.yaml");
        let credentials = dir.path().join("credentials.yaml");
        std::fs::write(&vm, VM).unwrap();
        std::fs::write(&credentials, CREDENTIALS).unwrap();
        Files {
            _dir: dir,
            vm,
            credentials,
        }
    }

    fn command(files: &Files, migrate: bool, console: bool) -> RenderCommand {
        RenderCommand {
            vm: files.vm.clone(),
            credentials: Some(files.credentials.clone()),
            migrate,
            console,
            policy: PolicyArgs {
                bridge_iface: "br1".to_string(),
                no_resource_limits: false,
                unprivileged: false,
                tools_image: None,
                console_image: None,
                registry_secret: Some("regcred".to_string()),
                host_state_dir: None,
            },
        }
    }

    fn env_value<'a>(pod: &'a Value, name: &str) -> Option<&'a str> {
        pod["spec"]["containers"][0]["env"]
            .as_array()?
            .iter()
            .find(|v| v["name"] == name)?["value"]
            .as_str()
    }

    #[test]
    fn test_render_machine_pod() {
        let files = files();
        let docs = command(&files, false, false).render().unwrap();
        assert_eq!(docs.len(), 1);

        let pod = &docs[0];
        assert_eq!(pod["kind"], "Pod");
        assert_eq!(env_value(pod, "IFACE"), Some("br1"));
        assert_eq!(env_value(pod, "MAC"), Some("06:fe:00:00:00:01"));
        assert_eq!(env_value(pod, "PUBLIC_KEY_COUNT"), Some("1"));
        assert_eq!(env_value(pod, "PUBLIC_KEY_1"), Some("ssh-ed25519 AAAA alice"));
        assert_eq!(pod["spec"]["imagePullSecrets"][0]["name"], "regcred");

        let limits = &pod["spec"]["containers"][0]["resources"]["limits"];
        assert_eq!(limits["memory"], "2Gi");
        assert_eq!(limits["hugepages-2Mi"], "2Gi");
    }

    #[test]
    fn test_render_migration_with_console() {
        let files = files();
        let docs = command(&files, true, true).render().unwrap();
        assert_eq!(docs.len(), 3);

        let pod = &docs[0];
        let port = pod["metadata"]["annotations"]["migrate_port"].as_str().unwrap();
        assert_eq!(env_value(pod, "MIGRATE_PORT"), Some(port));

        let console = &docs[1];
        assert_eq!(console["metadata"]["name"], "web-novnc");
        assert_eq!(
            console["spec"]["affinity"]["podAffinity"]["requiredDuringSchedulingIgnoredDuringExecution"][0]
                ["labelSelector"]["matchLabels"]["unique_name"],
            pod["metadata"]["name"]
        );
        assert_eq!(docs[2]["kind"], "Service");
    }

    #[test]
    fn test_vm_without_name_is_rejected() {
        let files = files();
        std::fs::write(
            &files.vm,
            "apiVersion: vmkit.io/v1alpha1\nkind: VirtualMachine\nmetadata: {}\nspec: {cpus: 1, memoryMB: 512, machineImage: img}\n",
        )
        .unwrap();
        let err = command(&files, false, false).render().unwrap_err();
        assert!(err.to_string().contains("metadata.name"));
    }

    #[test]
    fn test_invalid_credentials_file() {
        let files = files();
        std::fs::write(&files.credentials, "spec: [not, a, credential]\n").unwrap();
        let err = command(&files, false, false).render().unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CliError>(),
            Some(CliError::Manifest { .. })
        ));
    }
}
