//! Configuration for the node agent.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};

/// Node agent configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Name of the node this agent runs on. Also the name of its ARP table.
    pub node_name: String,

    /// Neighbor cache to scan.
    pub neighbor_table: PathBuf,

    /// Interval between neighbor cache scans.
    pub scan_interval: Duration,

    /// Times a failed status sync is requeued before it is dropped.
    pub sync_max_retries: u32,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let node_name = match var("VMKIT_NODE_NAME") {
            Some(name) if !name.trim().is_empty() => name.trim().to_string(),
            _ => bail!("VMKIT_NODE_NAME must be set"),
        };

        let neighbor_table = var("VMKIT_NEIGHBOR_TABLE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("/proc/net/arp"));

        let scan_interval_secs = var("VMKIT_SCAN_INTERVAL")
            .map(|s| s.parse::<u64>().context("VMKIT_SCAN_INTERVAL must be a number of seconds"))
            .transpose()?
            .unwrap_or(5);
        if scan_interval_secs == 0 {
            bail!("VMKIT_SCAN_INTERVAL must be positive");
        }

        let sync_max_retries = var("VMKIT_SYNC_MAX_RETRIES")
            .map(|s| s.parse::<u32>().context("VMKIT_SYNC_MAX_RETRIES must be a number"))
            .transpose()?
            .unwrap_or(0);

        let log_level = var("VMKIT_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            node_name,
            neighbor_table,
            scan_interval: Duration::from_secs(scan_interval_secs),
            sync_max_retries,
            log_level,
        })
    }
}
