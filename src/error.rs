//! Error types for the SpellQueue daemon.
//!
//! This module defines custom error enums for each component of the daemon,
//! providing descriptive error messages with context information.

use thiserror::Error;

/// Errors related to driving the game client's console helper.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("console helper '{0}' not found in PATH")]
    HelperNotFound(String),

    #[error("console helper failed with exit code {exit_code:?}: {stderr}")]
    HelperFailed {
        exit_code: Option<i32>,
        stderr: String,
    },

    #[error("unparseable reply from client: {0}")]
    BadReply(String),

    #[error("failed to execute console helper: {0}")]
    ExecutionFailed(#[from] std::io::Error),
}

/// Errors related to IPC server operations.
#[derive(Error, Debug)]
pub enum IpcError {
    #[error("Failed to bind socket at '{path}': {source}")]
    SocketBindFailed {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid command received: {0}")]
    InvalidCommand(String),

    #[error("Failed to serialize response: {0}")]
    SerializationFailed(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Errors related to policy persistence.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse policy file: {0}")]
    ParseError(String),

    #[error("Failed to write policy file: {0}")]
    WriteError(#[from] std::io::Error),
}

/// Top-level daemon errors.
#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("IPC error: {0}")]
    Ipc(#[from] IpcError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Runtime error: {0}")]
    Runtime(String),
}
