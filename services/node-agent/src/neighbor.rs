//! Host neighbor cache scanning.
//!
//! Reads the `/proc/net/arp` text format: a header line starting with `IP`,
//! then one line per neighbor with exactly six whitespace-separated fields:
//!
//! ```text
//! IP address       HW type     Flags       HW address            Mask     Device
//! 10.0.0.11        0x1         0x2         06:fe:00:00:00:01     *        br0
//! ```
//!
//! Only entries with a managed VM hardware address are kept. Lines of any
//! other shape are dropped without logging.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;
use vmkit_api::{is_managed_mac, ArpEntry};

const HEADER_PREFIX: &str = "IP";

/// Errors from scanning the neighbor cache.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("failed to read neighbor table {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Parse one data line. Returns `None` for the header and malformed lines.
pub fn parse_line(line: &str) -> Option<ArpEntry> {
    if line.starts_with(HEADER_PREFIX) {
        return None;
    }
    let fields: Vec<&str> = line.split_whitespace().collect();
    let &[ip, hardware_type, flags, hardware_address, netmask, device] = fields.as_slice() else {
        return None;
    };
    Some(ArpEntry {
        ip: ip.to_string(),
        hardware_type: hardware_type.to_string(),
        flags: flags.to_string(),
        hardware_address: hardware_address.to_string(),
        netmask: netmask.to_string(),
        device: device.to_string(),
    })
}

/// Managed entries in `contents`, keyed by hardware address.
pub fn parse_table(contents: &str) -> BTreeMap<String, ArpEntry> {
    contents
        .lines()
        .filter_map(parse_line)
        .filter(|entry| is_managed_mac(&entry.hardware_address))
        .map(|entry| (entry.hardware_address.clone(), entry))
        .collect()
}

/// Reads the neighbor cache from a file.
#[derive(Debug, Clone)]
pub struct NeighborScanner {
    path: PathBuf,
}

impl NeighborScanner {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Take a fresh snapshot of the managed entries.
    pub async fn scan(&self) -> Result<BTreeMap<String, ArpEntry>, ScanError> {
        let contents =
            tokio::fs::read_to_string(&self.path)
                .await
                .map_err(|source| ScanError::Read {
                    path: self.path.clone(),
                    source,
                })?;
        let table = parse_table(&contents);
        debug!(path = %self.path.display(), entries = table.len(), "Scanned neighbor table");
        Ok(table)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use vmkit_testing::{SAMPLE_MANAGED, SAMPLE_NEIGHBOR_TABLE};

    #[test]
    fn test_parse_line() {
        let entry = parse_line("10.0.0.11  0x1  0x2  06:fe:00:00:00:01  *  br0").unwrap();
        assert_eq!(entry.ip, "10.0.0.11");
        assert_eq!(entry.hardware_type, "0x1");
        assert_eq!(entry.flags, "0x2");
        assert_eq!(entry.hardware_address, "06:fe:00:00:00:01");
        assert_eq!(entry.netmask, "*");
        assert_eq!(entry.device, "br0");
    }

    #[rstest]
    #[case::header("IP address       HW type     Flags       HW address            Mask     Device")]
    #[case::empty("")]
    #[case::five_fields("10.0.0.11 0x1 0x2 06:fe:00:00:00:01 *")]
    #[case::seven_fields("10.0.0.11 0x1 0x2 06:fe:00:00:00:01 * br0 extra")]
    fn test_parse_line_rejects(#[case] line: &str) {
        assert_eq!(parse_line(line), None);
    }

    #[test]
    fn test_parse_table_keeps_managed_entries() {
        let table = parse_table(SAMPLE_NEIGHBOR_TABLE);
        assert_eq!(table.len(), SAMPLE_MANAGED.len());
        for (ip, mac) in SAMPLE_MANAGED {
            assert_eq!(table[mac].ip, ip);
        }
        assert!(!table.contains_key("52:54:00:12:34:56"));
    }

    #[test]
    fn test_device_is_not_filtered() {
        let table = parse_table("10.1.0.5 0x1 0x2 06:fe:aa:bb:cc:dd * eth7\n");
        assert_eq!(table["06:fe:aa:bb:cc:dd"].device, "eth7");
    }

    #[test]
    fn test_uppercase_prefix_is_not_managed() {
        let table = parse_table("10.0.0.7 0x1 0x2 06:FE:AA:BB:CC:DD * br0\n");
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_scan_missing_file() {
        let scanner = NeighborScanner::new("/nonexistent/vmkit/arp");
        let err = scanner.scan().await.unwrap_err();
        assert!(matches!(err, ScanError::Read { .. }));
    }
}
