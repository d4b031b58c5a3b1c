//! Error types for pairlink.

use std::path::PathBuf;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Credential persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Failed to create credentials directory {}: {reason}", path.display())]
    DirectoryCreationFailed { path: PathBuf, reason: String },

    #[error("Failed to read credentials from {}: {reason}", path.display())]
    ReadFailed { path: PathBuf, reason: String },

    #[error("Failed to write credentials to {}: {reason}", path.display())]
    WriteFailed { path: PathBuf, reason: String },

    #[error("Corrupted credentials file {}: {reason}", path.display())]
    Corrupted { path: PathBuf, reason: String },
}

/// Errors raised by a protocol connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("Failed to connect to protocol bridge at {url}: {reason}")]
    ConnectFailed { url: String, reason: String },

    #[error("Protocol request {op} failed: {reason}")]
    RequestFailed { op: String, reason: String },

    #[error("Protocol request {op} got no response")]
    NoResponse { op: String },

    #[error("Connection is closed")]
    Closed,

    #[error("Invalid protocol frame: {0}")]
    InvalidFrame(String),
}

/// Blob storage upload errors.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("Failed to read {}: {reason}", path.display())]
    ReadFailed { path: PathBuf, reason: String },

    #[error("Upload request failed: {0}")]
    RequestFailed(String),

    #[error("Storage returned {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("Invalid storage response: {0}")]
    InvalidResponse(String),
}

/// Errors that fail a pairing attempt before a code reaches the caller.
#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    #[error("Session setup failed: {0}")]
    Setup(#[from] CredentialError),

    #[error("Connection could not be established: {0}")]
    Connection(#[from] ConnectionError),

    #[error("Pairing code was empty")]
    EmptyCode,
}

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind to {addr}: {reason}")]
    BindFailed { addr: String, reason: String },

    #[error("Server terminated: {0}")]
    Serve(String),
}
