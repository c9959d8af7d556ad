//! Label, annotation and naming conventions shared by controllers.

/// Value of the `app` label on every vmkit workload.
pub const APP: &str = "vmkit";

/// `role` label value for VM pods.
pub const ROLE_VM: &str = "vm";

/// `role` label value for console proxy pods.
pub const ROLE_CONSOLE: &str = "novnc";

/// Node label used as topology key and for node pinning.
pub const NODE_HOSTNAME: &str = "kubernetes.io/hostname";

/// Separates the VM name from the random instance suffix.
pub const NAME_DELIMITER: &str = "-";

/// Host directory holding per-VM state and console sockets.
pub const HOST_STATE_BASE_DIR: &str = "/var/lib/vmkit";

pub mod keys {
    pub const APP: &str = "app";
    pub const ROLE: &str = "role";
    pub const NAME: &str = "name";
    pub const UNIQUE_NAME: &str = "unique_name";
}

pub mod annotations {
    pub const CPUS: &str = "cpus";
    pub const MEMORY_MB: &str = "memory_mb";
    pub const IMAGE: &str = "image";
    pub const ID: &str = "id";
    pub const MAC: &str = "mac";
    pub const MIGRATE_PORT: &str = "migrate_port";
}
