use vmkit_api::labels::HOST_STATE_BASE_DIR;

/// Cluster-wide settings applied to every workload.
///
/// Passed explicitly to the builder; nothing here is process-global.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkloadPolicy {
    /// Host bridge the guest interface is attached to.
    pub bridge_interface: String,

    /// Skip CPU, memory and huge-page limits entirely.
    pub no_resource_limits: bool,

    /// Run machine containers privileged.
    pub privileged: bool,

    /// Tools image used when the VM does not name one.
    pub tools_image: String,

    /// Image running the noVNC console proxy.
    pub console_image: String,

    /// Pull secret attached to every pod.
    pub registry_secret: Option<String>,

    /// Host directory holding per-VM state.
    pub host_state_dir: String,
}

impl Default for WorkloadPolicy {
    fn default() -> Self {
        Self {
            bridge_interface: "br0".to_string(),
            no_resource_limits: false,
            privileged: true,
            tools_image: "ghcr.io/vmkit/vm-tools:latest".to_string(),
            console_image: "ghcr.io/vmkit/novnc:latest".to_string(),
            registry_secret: None,
            host_state_dir: HOST_STATE_BASE_DIR.to_string(),
        }
    }
}

impl WorkloadPolicy {
    /// Host directory for a VM's state and console sockets.
    pub fn vm_state_dir(&self, vm_name: &str) -> String {
        format!("{}/{}", self.host_state_dir.trim_end_matches('/'), vm_name)
    }
}
