//! vmkit Node Agent
//!
//! Runs on every VM host and keeps VM IP addresses up to date.
//!
//! ## Architecture
//!
//! - **ARP Reconciler**: Scans the host neighbor cache and maintains this
//!   node's ARPTable record
//! - **Status Synchronizer**: Copies MAC-to-IP bindings from ARPTable records
//!   into VirtualMachine status

use std::sync::Arc;

use anyhow::{Context, Result};
use kube::{Api, Client};
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use vmkit_api::{ArpTable, VirtualMachine};
use vmkit_node_agent::{ArpReconciler, Config, KubeStore, NeighborScanner, StatusSynchronizer};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!(
        node = %config.node_name,
        neighbor_table = %config.neighbor_table.display(),
        scan_interval_secs = config.scan_interval.as_secs(),
        sync_max_retries = config.sync_max_retries,
        "Starting vmkit node agent"
    );

    let client = Client::try_default()
        .await
        .context("failed to create Kubernetes client")?;

    // Start the caches
    let (arp_tables, arp_task) = KubeStore::<ArpTable>::start(Api::all(client.clone()));
    let (vms, vm_task) = KubeStore::<VirtualMachine>::start(Api::all(client));
    let arp_tables = Arc::new(arp_tables);
    let vms = Arc::new(vms);

    arp_tables
        .wait_until_ready()
        .await
        .context("ARP table cache failed to sync")?;
    vms.wait_until_ready()
        .await
        .context("VM cache failed to sync")?;
    info!("Caches synced");

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Start the ARP reconciliation loop
    let reconciler = ArpReconciler::new(
        config.node_name.clone(),
        NeighborScanner::new(config.neighbor_table.clone()),
        arp_tables.clone(),
        arp_tables.clone(),
        config.scan_interval,
    );
    let mut reconciler_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { reconciler.run(shutdown_rx).await }
    });

    // Start the status synchronizer
    let synchronizer =
        StatusSynchronizer::new(arp_tables.clone(), arp_tables, vms.clone(), vms)
            .with_max_retries(config.sync_max_retries);
    let mut synchronizer_handle = tokio::spawn({
        let shutdown_rx = shutdown_rx.clone();
        async move { synchronizer.run(shutdown_rx).await }
    });

    // Wait for shutdown signal
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Received shutdown signal");
        }
        result = &mut reconciler_handle => {
            if let Err(e) = result {
                error!(error = %e, "ARP reconciler task panicked");
            }
        }
        result = &mut synchronizer_handle => {
            if let Err(e) = result {
                error!(error = %e, "Status synchronizer task panicked");
            }
        }
    }

    // Signal shutdown to all workers
    let _ = shutdown_tx.send(true);

    // The synchronizer drains its queue before exiting
    info!("Waiting for workers to shut down...");
    for handle in [reconciler_handle, synchronizer_handle] {
        if !handle.is_finished() {
            let _ = handle.await;
        }
    }

    arp_task.abort();
    vm_task.abort();

    info!("Node agent shutdown complete");
    Ok(())
}
