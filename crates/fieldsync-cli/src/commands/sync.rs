use std::sync::Arc;
use std::time::Duration;

use fieldsync_core::transport::{TcpTransport, TransportEvents};
use fieldsync_core::{EngineEvent, SqliteStore, SyncConfig, SyncEngine};
use tokio::sync::{broadcast, oneshot};

use crate::commands::common::{open_store, print_report};
use crate::error::CliError;

type Engine = Arc<SyncEngine<SqliteStore>>;

fn build_engine(config: SyncConfig, peers: Vec<String>) -> Result<(Engine, TransportEvents), CliError> {
    let store = open_store(&config)?;
    let (transport, transport_events) =
        TcpTransport::new(config.device_name.clone(), config.listen_addr.clone(), peers);
    let engine = SyncEngine::new(config, Arc::new(store), Arc::new(transport))?;
    Ok((Arc::new(engine), transport_events))
}

pub fn print_event(event: &EngineEvent) {
    match event {
        EngineEvent::SessionStatus(status) => {
            tracing::debug!(
                advertising = status.is_advertising,
                discovering = status.is_discovering,
                connected = ?status.connected_devices,
                "Session status"
            );
            if let Some(error) = &status.error {
                tracing::warn!("Session error: {error}");
            }
        }
        EngineEvent::TransferProgress(progress) if progress.is_complete => {
            println!(
                "Received {} of {} files",
                progress.current_file, progress.total_files
            );
        }
        EngineEvent::TransferProgress(progress) => {
            tracing::info!(
                file = %progress.file_name,
                progress = progress.progress,
                current = progress.current_file,
                "Transfer progress"
            );
        }
        EngineEvent::MergeCompleted(report) => {
            if let Err(error) = print_report(report, false) {
                tracing::warn!("Failed to print merge report: {error}");
            }
        }
        EngineEvent::SyncFailed(reason) => println!("Sync failed: {reason}"),
        EngineEvent::ExchangeComplete { peer_id } => println!("Exchange with {peer_id} complete"),
    }
}

/// Advertise and discover until Ctrl-C, syncing with every peer that connects.
pub async fn run_serve(config: SyncConfig) -> Result<(), CliError> {
    let peers = config.peers.clone();
    println!(
        "Serving as {} on {} (Ctrl-C to stop)",
        config.device_name, config.listen_addr
    );
    let (engine, transport_events) = build_engine(config, peers)?;

    let mut events = engine.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => print_event(&event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Dropped engine events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    engine.start();
    Arc::clone(&engine)
        .run(transport_events, async {
            if let Err(error) = tokio::signal::ctrl_c().await {
                tracing::error!("Failed to listen for Ctrl-C: {error}");
            }
        })
        .await;
    printer.abort();
    Ok(())
}

async fn wait_for_exchange(
    events: &mut broadcast::Receiver<EngineEvent>,
    peer: &str,
) -> Result<(), CliError> {
    loop {
        match events.recv().await {
            Ok(event) => {
                print_event(&event);
                match event {
                    EngineEvent::ExchangeComplete { .. } => return Ok(()),
                    EngineEvent::SyncFailed(reason) => {
                        return Err(CliError::SyncFailed {
                            peer: peer.to_string(),
                            reason,
                        });
                    }
                    _ => {}
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Dropped engine events");
            }
            Err(broadcast::error::RecvError::Closed) => {
                return Err(CliError::SyncFailed {
                    peer: peer.to_string(),
                    reason: "engine stopped".to_string(),
                });
            }
        }
    }
}

/// Connect to one peer, run a single exchange and stop.
pub async fn run_sync(config: SyncConfig, peer: &str, timeout_secs: u64) -> Result<(), CliError> {
    let (engine, transport_events) = build_engine(config, vec![peer.to_string()])?;
    let mut events = engine.subscribe();

    let (stop, stopped) = oneshot::channel::<()>();
    let runner = tokio::spawn(Arc::clone(&engine).run(transport_events, async move {
        let _ = stopped.await;
    }));
    engine.start_discovery();

    let outcome = tokio::time::timeout(
        Duration::from_secs(timeout_secs),
        wait_for_exchange(&mut events, peer),
    )
    .await;

    let _ = stop.send(());
    if let Err(error) = runner.await {
        tracing::warn!("Engine task ended abnormally: {error}");
    }
    outcome.unwrap_or_else(|_| Err(CliError::SyncTimedOut(peer.to_string())))
}
