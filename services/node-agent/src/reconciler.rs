//! ARP table reconciliation loop.
//!
//! The reconciler:
//! - Periodically scans the host neighbor cache
//! - Merges the scan into this node's ARP table
//! - Writes the table only when it changed
//!
//! It is the only writer of this node's ARP table.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use vmkit_api::ArpTable;
use vmkit_reconcile::{Cache, ObjectWriter, StoreError};

use crate::neighbor::{NeighborScanner, ScanError};

/// Result of a single reconciliation pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// First table for this node.
    Created,
    /// Existing table changed.
    Updated,
    /// Nothing to write.
    Unchanged,
}

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("failed to read ARP table {node}: {source}")]
    Read {
        node: String,
        #[source]
        source: StoreError,
    },

    #[error("failed to write ARP table {node}: {source}")]
    Write {
        node: String,
        #[source]
        source: StoreError,
    },
}

/// Keeps this node's ARP table in line with the host neighbor cache.
pub struct ArpReconciler {
    node_name: String,
    scanner: NeighborScanner,
    cache: Arc<dyn Cache<ArpTable>>,
    writer: Arc<dyn ObjectWriter<ArpTable>>,
    interval: Duration,
}

impl ArpReconciler {
    pub fn new(
        node_name: impl Into<String>,
        scanner: NeighborScanner,
        cache: Arc<dyn Cache<ArpTable>>,
        writer: Arc<dyn ObjectWriter<ArpTable>>,
        interval: Duration,
    ) -> Self {
        Self {
            node_name: node_name.into(),
            scanner,
            cache,
            writer,
            interval,
        }
    }

    /// Run the reconciliation loop until shutdown.
    ///
    /// A pass always runs to completion before the next tick is taken, so
    /// passes never overlap.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            node = %self.node_name,
            path = %self.scanner.path().display(),
            interval_secs = self.interval.as_secs(),
            "Starting ARP reconciliation loop"
        );

        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.reconcile_once().await {
                        Ok(outcome) => debug!(node = %self.node_name, ?outcome, "ARP reconciliation done"),
                        Err(e) => warn!(node = %self.node_name, error = %e, "ARP reconciliation failed, will retry"),
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!(node = %self.node_name, "ARP reconciler shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Perform a single scan-merge-write pass.
    pub async fn reconcile_once(&self) -> Result<ReconcileOutcome, ReconcileError> {
        let scanned = self.scanner.scan().await?;

        let current = match self.cache.get(&self.node_name) {
            Ok(current) => current,
            Err(e) if e.is_not_found() => None,
            Err(source) => {
                return Err(ReconcileError::Read {
                    node: self.node_name.clone(),
                    source,
                })
            }
        };

        let Some(current) = current else {
            let mut table = ArpTable::for_node(&self.node_name);
            table.spec.table = scanned;
            self.writer
                .create(&table)
                .await
                .map_err(|source| self.write_error(source))?;
            info!(
                node = %self.node_name,
                entries = table.spec.table.len(),
                "Created ARP table"
            );
            return Ok(ReconcileOutcome::Created);
        };

        let mut merged = current.spec.table.clone();
        merged.extend(scanned);
        if merged == current.spec.table {
            return Ok(ReconcileOutcome::Unchanged);
        }

        let mut updated = (*current).clone();
        updated.spec.table = merged;
        self.writer
            .update(&updated)
            .await
            .map_err(|source| self.write_error(source))?;
        debug!(
            node = %self.node_name,
            entries = updated.spec.table.len(),
            "Updated ARP table"
        );
        Ok(ReconcileOutcome::Updated)
    }

    fn write_error(&self, source: StoreError) -> ReconcileError {
        ReconcileError::Write {
            node: self.node_name.clone(),
            source,
        }
    }
}
