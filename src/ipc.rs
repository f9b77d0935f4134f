//! IPC server for status queries and control commands.
//!
//! A Unix domain socket accepts newline-delimited JSON commands and replies
//! with JSON responses. This is the daemon's whole exposed surface: status
//! and metrics queries, enable/disable, config updates, debug/verbose
//! toggles, and a forced reconcile.

use crate::config::{clamp_latency_cap_ms, clamp_threshold_ms, ConfigManager};
use crate::engine::{EngineEvent, EngineSnapshot};
use crate::error::IpcError;
use crate::metrics::MetricsCollector;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

#[cfg(unix)]
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
#[cfg(unix)]
use tokio::net::{UnixListener, UnixStream};

/// Default socket path for IPC communication.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/spellqueue.sock";

/// Commands that can be received via IPC.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "command")]
pub enum IpcCommand {
    Enable,
    Disable,
    SetConfig {
        threshold_ms: i64,
        latency_cap_ms: i64,
    },
    SetDebug {
        on: bool,
    },
    SetVerbose {
        on: bool,
    },
    /// Force a reconcile, e.g. after changing the cvar by hand.
    Refresh,
    GetStatus,
    GetMetrics,
}

/// Status response sent to clients.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct StatusResponse {
    pub enabled: bool,
    pub current_latency_ms: Option<u32>,
    pub avg_latency_ms: f64,
    pub current_setting: Option<u32>,
    pub threshold_ms: u32,
    pub latency_cap_ms: u32,
    pub update_queued: bool,
    pub debug: bool,
    pub verbose: bool,
    pub last_written: Option<u32>,
    pub mode: String,
    pub combat_locked: bool,
}

/// Shared daemon state accessible by the IPC server.
pub struct DaemonState {
    pub config_manager: Arc<ConfigManager>,
    pub snapshot: Arc<RwLock<EngineSnapshot>>,
    pub metrics: Arc<MetricsCollector>,
    events: mpsc::Sender<EngineEvent>,
}

impl DaemonState {
    pub fn new(
        config_manager: Arc<ConfigManager>,
        snapshot: Arc<RwLock<EngineSnapshot>>,
        metrics: Arc<MetricsCollector>,
        events: mpsc::Sender<EngineEvent>,
    ) -> Self {
        Self {
            config_manager,
            snapshot,
            metrics,
            events,
        }
    }

    /// Build the current status from policy plus engine snapshot.
    pub async fn get_status(&self) -> StatusResponse {
        let policy = self.config_manager.get();
        let snap = self.snapshot.read().await.clone();

        StatusResponse {
            enabled: policy.enabled,
            current_latency_ms: snap.current_latency_ms,
            avg_latency_ms: snap.avg_latency_ms,
            current_setting: snap.current_setting,
            threshold_ms: policy.threshold_ms,
            latency_cap_ms: policy.latency_cap_ms,
            update_queued: snap.update_queued,
            debug: policy.debug,
            verbose: policy.verbose,
            last_written: snap.last_written,
            mode: snap.mode.as_str().to_string(),
            combat_locked: snap.combat_locked,
        }
    }

    /// Hand an event to the engine. Errors only during shutdown, when the
    /// engine no longer listens; those are ignored.
    pub async fn notify_engine(&self, event: EngineEvent) {
        let _ = self.events.send(event).await;
    }

    /// Handle a single IPC command and return the response.
    pub async fn handle_command(&self, command: IpcCommand) -> serde_json::Value {
        match command {
            IpcCommand::Enable => {
                match self.config_manager.modify(|p| p.enabled = true) {
                    Ok(_) => {
                        // Kick one poll so the user sees an effect now, not
                        // at the next interval.
                        self.notify_engine(EngineEvent::TimerFired).await;
                        tracing::info!("Daemon enabled via IPC");
                        serde_json::json!({ "success": true, "message": "enabled" })
                    }
                    Err(e) => serde_json::json!({ "success": false, "error": e.to_string() }),
                }
            }

            IpcCommand::Disable => match self.config_manager.modify(|p| p.enabled = false) {
                Ok(_) => {
                    tracing::info!("Daemon disabled via IPC");
                    serde_json::json!({ "success": true, "message": "disabled" })
                }
                Err(e) => serde_json::json!({ "success": false, "error": e.to_string() }),
            },

            IpcCommand::SetConfig {
                threshold_ms,
                latency_cap_ms,
            } => {
                let threshold_ms = clamp_threshold_ms(threshold_ms);
                let latency_cap_ms = clamp_latency_cap_ms(latency_cap_ms);
                match self.config_manager.modify(|p| {
                    p.threshold_ms = threshold_ms;
                    p.latency_cap_ms = latency_cap_ms;
                }) {
                    Ok(policy) => {
                        tracing::info!(
                            "Config updated via IPC: threshold_ms={}, latency_cap_ms={}",
                            policy.threshold_ms,
                            policy.latency_cap_ms
                        );
                        serde_json::json!({
                            "success": true,
                            "threshold_ms": policy.threshold_ms,
                            "latency_cap_ms": policy.latency_cap_ms,
                        })
                    }
                    Err(e) => serde_json::json!({ "success": false, "error": e.to_string() }),
                }
            }

            IpcCommand::SetDebug { on } => match self.config_manager.modify(|p| p.debug = on) {
                Ok(_) => serde_json::json!({ "success": true, "debug": on }),
                Err(e) => serde_json::json!({ "success": false, "error": e.to_string() }),
            },

            IpcCommand::SetVerbose { on } => {
                match self.config_manager.modify(|p| p.verbose = on) {
                    Ok(_) => serde_json::json!({ "success": true, "verbose": on }),
                    Err(e) => serde_json::json!({ "success": false, "error": e.to_string() }),
                }
            }

            IpcCommand::Refresh => {
                self.notify_engine(EngineEvent::SettingChangedExternally).await;
                serde_json::json!({ "success": true, "message": "reconcile scheduled" })
            }

            IpcCommand::GetStatus => {
                let status = self.get_status().await;
                serde_json::to_value(status).unwrap_or_else(|e| {
                    serde_json::json!({
                        "error": format!("Failed to serialize status: {}", e)
                    })
                })
            }

            IpcCommand::GetMetrics => {
                serde_json::to_value(self.metrics.snapshot()).unwrap_or_else(|e| {
                    serde_json::json!({
                        "error": format!("Failed to serialize metrics: {}", e)
                    })
                })
            }
        }
    }
}

/// Unix domain socket server for IPC.
#[cfg(unix)]
pub struct IpcServer {
    socket_path: PathBuf,
    listener: UnixListener,
}

#[cfg(unix)]
impl IpcServer {
    /// Create a new IPC server at the specified path, replacing any stale
    /// socket file left behind by a previous run.
    pub async fn new(path: &str) -> Result<Self, IpcError> {
        let socket_path = PathBuf::from(path);

        Self::cleanup_socket(&socket_path)?;

        let listener = UnixListener::bind(&socket_path).map_err(|e| IpcError::SocketBindFailed {
            path: path.to_string(),
            source: e,
        })?;

        Ok(Self {
            socket_path,
            listener,
        })
    }

    /// Create a new IPC server at the default path.
    pub async fn new_default() -> Result<Self, IpcError> {
        Self::new(DEFAULT_SOCKET_PATH).await
    }

    fn cleanup_socket(path: &Path) -> Result<(), IpcError> {
        if path.exists() {
            std::fs::remove_file(path).map_err(|e| IpcError::SocketBindFailed {
                path: path.display().to_string(),
                source: e,
            })?;
        }
        Ok(())
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept and handle incoming connections.
    pub async fn run(&self, state: Arc<DaemonState>) -> Result<(), IpcError> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        if let Err(e) = Self::handle_connection(stream, state).await {
                            tracing::warn!("Error handling IPC connection: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Error accepting IPC connection: {}", e);
                    // Continue accepting connections even after errors
                }
            }
        }
    }

    /// Handle a single client connection (newline-delimited JSON).
    async fn handle_connection(
        stream: UnixStream,
        state: Arc<DaemonState>,
    ) -> Result<(), IpcError> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        while reader.read_line(&mut line).await? > 0 {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                line.clear();
                continue;
            }

            let response = match serde_json::from_str::<IpcCommand>(trimmed) {
                Ok(command) => state.handle_command(command).await,
                Err(e) => serde_json::json!({
                    "error": format!("Invalid command: {}", e)
                }),
            };

            let response_str = serde_json::to_string(&response)?;
            writer.write_all(response_str.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;

            line.clear();
        }

        Ok(())
    }
}

#[cfg(unix)]
impl Drop for IpcServer {
    fn drop(&mut self) {
        if self.socket_path.exists() {
            let _ = std::fs::remove_file(&self.socket_path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Policy, LATENCY_CAP_MS_MIN, THRESHOLD_MS_MAX};
    use tempfile::tempdir;

    fn state_with_channel() -> (Arc<DaemonState>, mpsc::Receiver<EngineEvent>, tempfile::TempDir)
    {
        let dir = tempdir().unwrap();
        let config = Arc::new(
            ConfigManager::load_or_default(&dir.path().join("policy.json")).unwrap(),
        );
        let (tx, rx) = mpsc::channel(8);
        let state = Arc::new(DaemonState::new(
            config,
            Arc::new(RwLock::new(EngineSnapshot::default())),
            Arc::new(MetricsCollector::new()),
            tx,
        ));
        (state, rx, dir)
    }

    #[test]
    fn command_serialization_round_trips() {
        let cmd = IpcCommand::SetConfig {
            threshold_ms: 25,
            latency_cap_ms: 250,
        };
        let json = serde_json::to_string(&cmd).unwrap();
        assert!(json.contains("\"command\":\"SetConfig\""));
        assert!(json.contains("\"threshold_ms\":25"));

        let parsed: IpcCommand = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, cmd);

        let parsed: IpcCommand = serde_json::from_str(r#"{"command":"GetStatus"}"#).unwrap();
        assert_eq!(parsed, IpcCommand::GetStatus);
    }

    #[tokio::test]
    async fn status_reflects_policy_and_snapshot() {
        let (state, _rx, _dir) = state_with_channel();

        {
            let mut snap = state.snapshot.write().await;
            snap.current_latency_ms = Some(75);
            snap.current_setting = Some(80);
            snap.last_written = Some(80);
            snap.update_queued = true;
        }

        let status = state.get_status().await;
        assert!(status.enabled);
        assert_eq!(status.current_latency_ms, Some(75));
        assert_eq!(status.current_setting, Some(80));
        assert_eq!(status.last_written, Some(80));
        assert!(status.update_queued);
        assert_eq!(status.threshold_ms, Policy::default().threshold_ms);
        assert_eq!(status.mode, "steady");
    }

    #[tokio::test]
    async fn enable_disable_toggle_policy_and_kick_engine() {
        let (state, mut rx, _dir) = state_with_channel();

        let response = state.handle_command(IpcCommand::Disable).await;
        assert!(response["success"].as_bool().unwrap());
        assert!(!state.config_manager.get().enabled);

        let response = state.handle_command(IpcCommand::Enable).await;
        assert!(response["success"].as_bool().unwrap());
        assert!(state.config_manager.get().enabled);
        assert_eq!(rx.recv().await, Some(EngineEvent::TimerFired));
    }

    #[tokio::test]
    async fn set_config_clamps_out_of_range_input() {
        let (state, _rx, _dir) = state_with_channel();

        let response = state
            .handle_command(IpcCommand::SetConfig {
                threshold_ms: 9999,
                latency_cap_ms: -5,
            })
            .await;
        assert!(response["success"].as_bool().unwrap());

        let policy = state.config_manager.get();
        assert_eq!(policy.threshold_ms, THRESHOLD_MS_MAX);
        assert_eq!(policy.latency_cap_ms, LATENCY_CAP_MS_MIN);
    }

    #[tokio::test]
    async fn refresh_injects_external_change_event() {
        let (state, mut rx, _dir) = state_with_channel();

        let response = state.handle_command(IpcCommand::Refresh).await;
        assert!(response["success"].as_bool().unwrap());
        assert_eq!(
            rx.recv().await,
            Some(EngineEvent::SettingChangedExternally)
        );
    }

    #[tokio::test]
    async fn debug_and_verbose_toggles_persist() {
        let (state, _rx, _dir) = state_with_channel();

        state
            .handle_command(IpcCommand::SetDebug { on: true })
            .await;
        state
            .handle_command(IpcCommand::SetVerbose { on: false })
            .await;

        let policy = state.config_manager.get();
        assert!(policy.debug);
        assert!(!policy.verbose);
    }

    #[tokio::test]
    async fn get_metrics_serializes_counters() {
        let (state, _rx, _dir) = state_with_channel();
        state.metrics.record_write();

        let response = state.handle_command(IpcCommand::GetMetrics).await;
        assert_eq!(response["writes"].as_u64(), Some(1));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn server_creates_and_cleans_up_socket() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");
        let path_str = socket_path.to_str().unwrap();

        let server = IpcServer::new(path_str).await.unwrap();
        assert!(socket_path.exists());

        drop(server);
        assert!(!socket_path.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn server_replaces_stale_socket_file() {
        let dir = tempdir().unwrap();
        let socket_path = dir.path().join("test.sock");
        let path_str = socket_path.to_str().unwrap();

        std::fs::write(&socket_path, "stale").unwrap();
        let server = IpcServer::new(path_str).await.unwrap();
        assert!(socket_path.exists());

        drop(server);
    }
}
