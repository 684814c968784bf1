//! Application orchestrator: wires the connection manager to the host.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use devlink_connection::{ConnectionEvent, ConnectionManager, Credential};
use devlink_protocol::ConnectionSnapshot;

use crate::config::Config;
use crate::sim::{SimAuth, SimBackend, SimHost};

/// Runs the daemon until Ctrl-C.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let cancel = CancellationToken::new();

    let host = SimHost::new(crate::sim::device(config.vendor_id, config.interface_class));
    let key = config.host_name.as_bytes().to_vec();
    let manager = ConnectionManager::new(
        Arc::new(SimBackend),
        Arc::new(SimAuth {
            warmup_probes: config.simulator.warmup_probes,
            paired_key: key.clone(),
        }),
        Credential::new(config.host_name.clone(), key),
        config.connection(),
    );

    let events = manager
        .take_events()
        .ok_or_else(|| anyhow::anyhow!("event receiver already taken"))?;
    tokio::spawn(log_events(events));
    tokio::spawn(print_snapshots(manager.subscribe(), cancel.clone()));

    let (_leader_tx, leader_rx) = watch::channel(config.leader);
    manager.start_watching(host.clone(), leader_rx)?;

    let outcome = manager.initial_check(&*host, config.leader).await?;
    tracing::info!(?outcome, "startup check finished");

    if config.simulator.replug_secs > 0 {
        host.spawn_replug(Duration::from_secs(config.simulator.replug_secs), cancel.clone());
    }

    tracing::info!("daemon ready");
    tokio::signal::ctrl_c().await?;
    tracing::info!("SIGINT received, shutting down");

    cancel.cancel();
    manager.shutdown().await;
    Ok(())
}

async fn log_events(mut events: mpsc::Receiver<ConnectionEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            ConnectionEvent::ConnectionFailed { reason } => {
                tracing::warn!(%reason, "connection failed");
            }
            ConnectionEvent::ProductInfo(info) => {
                tracing::info!(
                    manufacturer = %info.manufacturer,
                    model = %info.model,
                    serial = %info.serial,
                    "product info"
                );
            }
            ConnectionEvent::SessionReady(handle) => {
                tracing::info!(device = %handle.identity(), session = handle.session_id(), "session ready");
            }
            ConnectionEvent::NeedsPreparation => {
                tracing::warn!("device needs preparation before it can connect");
            }
            other => tracing::debug!(event = ?other, "connection event"),
        }
    }
}

/// Prints each published snapshot as one JSON line on stdout.
async fn print_snapshots(mut rx: watch::Receiver<ConnectionSnapshot>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }

        let snapshot = rx.borrow_and_update().clone();
        match serde_json::to_string(&snapshot) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, "failed to encode snapshot"),
        }
    }
}
