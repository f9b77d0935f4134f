//! Game client integration.
//!
//! The engine talks to the client through the [`GameClient`] trait so the
//! control loop can be exercised against a fake in tests. The production
//! implementation shells out to a console helper binary (`gamectl` by
//! default) for every primitive: latency readout, cvar get/set, and the
//! combat flag.

use crate::error::ClientError;
use crate::latency::{LatencySample, SETTING_MAX_MS};
use async_trait::async_trait;
use tokio::process::Command;

/// Name of the tuning cvar under control.
pub const TUNING_CVAR: &str = "SpellQueueWindow";

/// Host primitives the control loop consumes.
#[async_trait]
pub trait GameClient: Send + Sync {
    /// Read current home/world latency. Any failure means "unavailable".
    async fn read_latency(&self) -> Result<LatencySample, ClientError>;

    /// Read a cvar's current numeric value.
    async fn read_setting(&self, name: &str) -> Result<u32, ClientError>;

    /// Write a cvar. Fails while the client forbids mutation.
    async fn write_setting(&self, name: &str, value: u32) -> Result<(), ClientError>;

    /// Whether the client currently forbids cvar mutation.
    async fn in_combat(&self) -> Result<bool, ClientError>;
}

/// Client implementation driving the console helper binary.
pub struct ConsoleClient {
    helper: String,
}

impl ConsoleClient {
    pub fn new(helper: impl Into<String>) -> Self {
        Self {
            helper: helper.into(),
        }
    }

    /// Run the helper with the given arguments and return trimmed stdout.
    async fn run_helper(&self, args: &[&str]) -> Result<String, ClientError> {
        let output = Command::new(&self.helper)
            .args(args)
            .output()
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    ClientError::HelperNotFound(self.helper.clone())
                } else {
                    ClientError::ExecutionFailed(e)
                }
            })?;

        if !output.status.success() {
            return Err(ClientError::HelperFailed {
                exit_code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

#[async_trait]
impl GameClient for ConsoleClient {
    async fn read_latency(&self) -> Result<LatencySample, ClientError> {
        let reply = self.run_helper(&["netstats"]).await?;
        parse_netstats(&reply)
    }

    async fn read_setting(&self, name: &str) -> Result<u32, ClientError> {
        let reply = self.run_helper(&["cvar", "get", name]).await?;
        parse_numeric(&reply)
    }

    async fn write_setting(&self, name: &str, value: u32) -> Result<(), ClientError> {
        self.run_helper(&["cvar", "set", name, &value.to_string()])
            .await?;
        Ok(())
    }

    async fn in_combat(&self) -> Result<bool, ClientError> {
        let reply = self.run_helper(&["combat"]).await?;
        parse_flag(&reply)
    }
}

/// Parse a `netstats` reply of the form `home=32 world=45`.
fn parse_netstats(reply: &str) -> Result<LatencySample, ClientError> {
    let mut home_ms = None;
    let mut world_ms = None;

    for field in reply.split_whitespace() {
        let (key, value) = field
            .split_once('=')
            .ok_or_else(|| ClientError::BadReply(reply.to_string()))?;
        let parsed: u32 = value
            .parse()
            .map_err(|_| ClientError::BadReply(reply.to_string()))?;
        match key {
            "home" => home_ms = Some(parsed),
            "world" => world_ms = Some(parsed),
            _ => {}
        }
    }

    match (home_ms, world_ms) {
        (Some(home_ms), Some(world_ms)) => Ok(LatencySample::new(home_ms, world_ms)),
        _ => Err(ClientError::BadReply(reply.to_string())),
    }
}

/// Parse a cvar value reply. The client reports numeric strings, sometimes
/// with a fractional part; the result is rounded into the setting domain.
fn parse_numeric(reply: &str) -> Result<u32, ClientError> {
    let value: f64 = reply
        .trim()
        .parse()
        .map_err(|_| ClientError::BadReply(reply.to_string()))?;
    if !value.is_finite() {
        return Err(ClientError::BadReply(reply.to_string()));
    }
    Ok(value.round().clamp(0.0, f64::from(SETTING_MAX_MS)) as u32)
}

/// Parse a boolean reply (`1`/`0`, `true`/`false`).
fn parse_flag(reply: &str) -> Result<bool, ClientError> {
    match reply.trim().to_ascii_lowercase().as_str() {
        "1" | "true" => Ok(true),
        "0" | "false" => Ok(false),
        _ => Err(ClientError::BadReply(reply.to_string())),
    }
}
