//! SpellQueue daemon - latency-adaptive spell queue window control.
//!
//! The daemon polls network latency from the game client and reconciles the
//! client's `SpellQueueWindow` cvar against it: clamped, hysteresis-gated,
//! and deferred while the client forbids cvar writes in combat.

mod client;
mod config;
mod engine;
mod error;
mod feedback;
mod ipc;
mod latency;
mod logging;
mod metrics;

use client::{ConsoleClient, GameClient};
use config::ConfigManager;
use engine::{Engine, EngineEvent, EngineSnapshot};
use error::DaemonError;
use ipc::DaemonState;
use metrics::MetricsCollector;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, RwLock};
use tracing::{debug, error, info};

/// Combat flag polling interval in seconds.
const COMBAT_POLL_INTERVAL_SECS: u64 = 1;

/// Engine event queue depth.
const ENGINE_EVENT_QUEUE: usize = 16;

/// Graceful shutdown timeout in seconds.
const SHUTDOWN_TIMEOUT_SECS: u64 = 2;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let _log_guard = logging::init_logging().map_err(|e| {
        eprintln!("Failed to initialize logging: {}", e);
        e
    })?;

    info!("SpellQueue daemon starting...");

    let result = run_daemon().await;

    match &result {
        Ok(()) => info!("SpellQueue daemon shut down gracefully"),
        Err(e) => error!("SpellQueue daemon error: {}", e),
    }

    result.map_err(Into::into)
}

/// Main daemon entry point.
async fn run_daemon() -> Result<(), DaemonError> {
    let config_path = ConfigManager::default_path();
    let config_manager = Arc::new(ConfigManager::load_or_default(&config_path)?);
    info!("Policy loaded from {:?}", config_path);

    let policy = config_manager.get();
    let client = Arc::new(ConsoleClient::new(policy.console_cmd.clone()));
    let metrics = Arc::new(MetricsCollector::new());
    let snapshot = Arc::new(RwLock::new(EngineSnapshot::default()));

    let (events_tx, events_rx) = mpsc::channel(ENGINE_EVENT_QUEUE);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let daemon_state = Arc::new(DaemonState::new(
        Arc::clone(&config_manager),
        Arc::clone(&snapshot),
        Arc::clone(&metrics),
        events_tx.clone(),
    ));

    // Signal handlers for graceful shutdown
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if let Err(e) = setup_signal_handlers(shutdown_tx_clone).await {
            error!("Signal handler error: {}", e);
        }
    });

    // IPC server task
    let ipc_state = Arc::clone(&daemon_state);
    let ipc_shutdown_rx = shutdown_rx.clone();
    let ipc_handle =
        tokio::spawn(async move { run_ipc_server_with_restart(ipc_state, ipc_shutdown_rx).await });

    // Combat transition watcher task
    let watch_client = Arc::clone(&client);
    let watch_events_tx = events_tx.clone();
    let watch_shutdown_rx = shutdown_rx.clone();
    let watch_handle = tokio::spawn(async move {
        run_combat_watch(watch_client, watch_events_tx, watch_shutdown_rx).await
    });

    // Control engine task
    let engine = Engine::new(
        Arc::clone(&client),
        Arc::clone(&config_manager),
        Arc::clone(&metrics),
        Arc::clone(&snapshot),
    );
    let engine_shutdown_rx = shutdown_rx.clone();
    let engine_handle =
        tokio::spawn(async move { run_engine(engine, events_rx, engine_shutdown_rx).await });

    info!("SpellQueue daemon initialized and running");

    // Wait for shutdown signal
    let mut shutdown_rx_main = shutdown_rx.clone();
    shutdown_rx_main.changed().await.ok();

    info!("Shutdown signal received, stopping tasks...");

    let shutdown_timeout = Duration::from_secs(SHUTDOWN_TIMEOUT_SECS);
    let _ = tokio::time::timeout(shutdown_timeout, async {
        let _ = tokio::join!(ipc_handle, watch_handle, engine_handle);
    })
    .await;

    info!("All tasks stopped");
    Ok(())
}

/// Run the control engine's event loop.
///
/// One sleep is re-armed from the engine's current cadence each iteration,
/// so there is never more than one pending timer; mode transitions take
/// effect by re-deriving the delay. Polling stands down entirely while the
/// engine reports paused (combat lock or disabled policy).
async fn run_engine<C: GameClient + 'static>(
    mut engine: Engine<C>,
    mut events_rx: mpsc::Receiver<EngineEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let delay = engine.next_delay();
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("Engine shutting down");
                    break;
                }
            }
            maybe_event = events_rx.recv() => {
                match maybe_event {
                    Some(event) => {
                        engine.handle_event(event).await;
                    }
                    None => break,
                }
            }
            _ = tokio::time::sleep(delay), if !engine.is_polling_paused() => {
                engine.handle_event(EngineEvent::TimerFired).await;
            }
        }
    }
}

/// Poll the client's combat flag and turn edges into engine events.
async fn run_combat_watch<C: GameClient + 'static>(
    client: Arc<C>,
    events_tx: mpsc::Sender<EngineEvent>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let poll_interval = Duration::from_secs(COMBAT_POLL_INTERVAL_SECS);
    let mut locked = false;

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("Combat watch shutting down");
                    break;
                }
            }
            _ = tokio::time::sleep(poll_interval) => {
                match client.in_combat().await {
                    Ok(now) if now != locked => {
                        locked = now;
                        let event = if now {
                            EngineEvent::MutationForbidden
                        } else {
                            EngineEvent::MutationAllowed
                        };
                        if events_tx.send(event).await.is_err() {
                            break;
                        }
                    }
                    Ok(_) => {}
                    // Expected while the client is not running; keep the
                    // last known state.
                    Err(e) => debug!("combat poll failed: {}", e),
                }
            }
        }
    }
}

/// Run the IPC server, restarting it after errors.
async fn run_ipc_server_with_restart(
    state: Arc<DaemonState>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    info!("IPC server shutting down");
                    break;
                }
            }
            result = run_ipc_server_inner(Arc::clone(&state)) => {
                match result {
                    Ok(()) => break,
                    Err(e) => {
                        error!("IPC server error: {}, restarting in 5 seconds", e);
                        tokio::time::sleep(Duration::from_secs(5)).await;
                    }
                }
            }
        }
    }
}

/// Inner IPC server loop
#[cfg(unix)]
async fn run_ipc_server_inner(state: Arc<DaemonState>) -> Result<(), error::IpcError> {
    let server = ipc::IpcServer::new_default().await?;
    info!("IPC server listening on {:?}", server.socket_path());
    server.run(state).await
}

/// Stub IPC server for non-Unix platforms
#[cfg(not(unix))]
async fn run_ipc_server_inner(_state: Arc<DaemonState>) -> Result<(), error::IpcError> {
    tracing::warn!("IPC server not available on this platform");
    loop {
        tokio::time::sleep(Duration::from_secs(3600)).await;
    }
}

/// Set up signal handlers for graceful shutdown (SIGTERM and SIGINT).
#[cfg(unix)]
async fn setup_signal_handlers(
    shutdown_tx: watch::Sender<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            info!("Received SIGINT");
        }
    }

    let _ = shutdown_tx.send(true);
    Ok(())
}

/// Stub signal handler for non-Unix platforms
#[cfg(not(unix))]
async fn setup_signal_handlers(
    shutdown_tx: watch::Sender<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl+C");
    let _ = shutdown_tx.send(true);
    Ok(())
}
