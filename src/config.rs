//! Policy persistence.
//!
//! The policy is the only state that survives across sessions. Out-of-range
//! values are never rejected: every numeric field is clamped to its declared
//! bounds on load and on update, so the engine only ever sees validated
//! integers.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::warn;

/// Hysteresis threshold bounds in milliseconds.
pub const THRESHOLD_MS_MIN: u32 = 1;
pub const THRESHOLD_MS_MAX: u32 = 50;

/// Latency cap bounds in milliseconds.
pub const LATENCY_CAP_MS_MIN: u32 = 100;
pub const LATENCY_CAP_MS_MAX: u32 = 400;

/// Steady polling cadence bounds in seconds.
pub const STEADY_INTERVAL_SECS_MIN: u64 = 10;
pub const STEADY_INTERVAL_SECS_MAX: u64 = 30;

/// Discovery polling cadence bounds in seconds.
pub const DISCOVERY_INTERVAL_SECS_MIN: u64 = 2;
pub const DISCOVERY_INTERVAL_SECS_MAX: u64 = 5;

/// Write attempt cap bounds per polling interval.
pub const MAX_UPDATE_ATTEMPTS_MIN: u32 = 1;
pub const MAX_UPDATE_ATTEMPTS_MAX: u32 = 10;

/// Clamp a raw threshold input to its declared bounds.
pub fn clamp_threshold_ms(raw: i64) -> u32 {
    raw.clamp(i64::from(THRESHOLD_MS_MIN), i64::from(THRESHOLD_MS_MAX)) as u32
}

/// Clamp a raw latency cap input to its declared bounds.
pub fn clamp_latency_cap_ms(raw: i64) -> u32 {
    raw.clamp(i64::from(LATENCY_CAP_MS_MIN), i64::from(LATENCY_CAP_MS_MAX)) as u32
}

/// User policy, persisted as JSON.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct Policy {
    pub enabled: bool,
    pub threshold_ms: u32,
    pub latency_cap_ms: u32,
    pub verbose: bool,
    pub debug: bool,
    pub steady_interval_secs: u64,
    pub discovery_interval_secs: u64,
    pub max_update_attempts: u32,
    /// Console helper binary used to talk to the game client.
    pub console_cmd: String,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold_ms: 10,
            latency_cap_ms: 400,
            verbose: true,
            debug: false,
            steady_interval_secs: 15,
            discovery_interval_secs: 2,
            max_update_attempts: 3,
            console_cmd: "gamectl".to_string(),
        }
    }
}

impl Policy {
    /// Force every numeric field into its declared bounds.
    pub fn normalize(&mut self) {
        self.threshold_ms = clamp_threshold_ms(i64::from(self.threshold_ms));
        self.latency_cap_ms = clamp_latency_cap_ms(i64::from(self.latency_cap_ms));
        self.steady_interval_secs = self
            .steady_interval_secs
            .clamp(STEADY_INTERVAL_SECS_MIN, STEADY_INTERVAL_SECS_MAX);
        self.discovery_interval_secs = self
            .discovery_interval_secs
            .clamp(DISCOVERY_INTERVAL_SECS_MIN, DISCOVERY_INTERVAL_SECS_MAX);
        self.max_update_attempts = self
            .max_update_attempts
            .clamp(MAX_UPDATE_ATTEMPTS_MIN, MAX_UPDATE_ATTEMPTS_MAX);
        if self.console_cmd.trim().is_empty() {
            self.console_cmd = Policy::default().console_cmd;
        }
    }

    /// A normalized copy.
    pub fn normalized(mut self) -> Self {
        self.normalize();
        self
    }
}

/// Policy manager with file I/O.
pub struct ConfigManager {
    policy: RwLock<Policy>,
    path: PathBuf,
}

impl ConfigManager {
    /// Load the policy from file or use defaults.
    ///
    /// A missing file yields defaults; a malformed file is reported and
    /// replaced by defaults rather than aborting startup.
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        let policy = if path.exists() {
            let contents = fs::read_to_string(path)?;
            match serde_json::from_str::<Policy>(&contents) {
                Ok(policy) => policy.normalized(),
                Err(e) => {
                    warn!("Ignoring malformed policy file {:?}: {}", path, e);
                    Policy::default()
                }
            }
        } else {
            Policy::default()
        };

        Ok(Self {
            policy: RwLock::new(policy),
            path: path.to_path_buf(),
        })
    }

    /// Save the policy to file using atomic write.
    pub fn save(&self) -> Result<(), ConfigError> {
        let policy = self
            .policy
            .read()
            .map_err(|_| ConfigError::ParseError("policy lock poisoned".to_string()))?
            .clone();

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        // Atomic write: write to temp file, then rename
        let temp_path = self.path.with_extension("json.tmp");
        let json = serde_json::to_string_pretty(&policy)
            .map_err(|e| ConfigError::ParseError(format!("Failed to serialize policy: {}", e)))?;

        {
            let mut file = fs::File::create(&temp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }

        fs::rename(&temp_path, &self.path)?;

        Ok(())
    }

    /// Get the current policy.
    pub fn get(&self) -> Policy {
        self.policy
            .read()
            .map(|p| p.clone())
            .unwrap_or_default()
    }

    /// Replace the policy, clamping out-of-range fields, and persist it.
    pub fn update(&self, policy: Policy) -> Result<(), ConfigError> {
        let policy = policy.normalized();

        {
            let mut current = self
                .policy
                .write()
                .map_err(|_| ConfigError::ParseError("policy lock poisoned".to_string()))?;
            *current = policy;
        }

        self.save()
    }

    /// Apply a mutation to the current policy, clamp, and persist.
    pub fn modify<F>(&self, f: F) -> Result<Policy, ConfigError>
    where
        F: FnOnce(&mut Policy),
    {
        let mut policy = self.get();
        f(&mut policy);
        policy.normalize();
        self.update(policy.clone())?;
        Ok(policy)
    }

    /// Get the policy file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Default policy path (`<config dir>/spellqueue/policy.json`).
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("spellqueue")
            .join("policy.json")
    }
}
