//! Error types for qrattend.
//!
//! This module defines the crate-wide error type. Component-local failures
//! that are absorbed inside the scan loop (scanner and transport errors) have
//! their own enums in [`crate::scanner`] and [`crate::delivery`] and are
//! converted into this type only when they must cross a public boundary.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for qrattend operations.
#[derive(Error, Debug)]
pub enum Error {
    // === Storage Errors ===
    /// Failed to open or create the queue database.
    #[error("failed to open database at {path}: {source}")]
    DatabaseOpen {
        /// Path to the database file.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: rusqlite::Error,
    },

    /// A database query failed.
    #[error("database query failed: {0}")]
    DatabaseQuery(#[from] rusqlite::Error),

    /// Failed to run database migrations.
    #[error("database migration failed: {message}")]
    DatabaseMigration {
        /// Description of what went wrong.
        message: String,
    },

    /// The persisted queue under `key` could not be decoded.
    #[error("corrupt offline queue under key '{key}': {source}")]
    QueueCorrupt {
        /// Store key holding the queue.
        key: String,
        /// The underlying decode error.
        #[source]
        source: serde_json::Error,
    },

    // === Configuration Errors ===
    /// Failed to load configuration.
    #[error("failed to load configuration: {0}")]
    ConfigLoad(Box<figment::Error>),

    /// Configuration validation failed.
    #[error("invalid configuration: {message}")]
    ConfigValidation {
        /// Description of the validation failure.
        message: String,
    },

    // === Session Errors ===
    /// No camera could be enumerated or started.
    #[error("camera unavailable: {message}")]
    CameraUnavailable {
        /// Description of what went wrong.
        message: String,
    },

    /// No remote endpoint is configured.
    #[error("no remote endpoint configured; set GAS_ENDPOINT or endpoint.url")]
    EndpointNotConfigured,

    /// The transport rejected a send.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The active camera has no controllable torch.
    #[error("torch not supported by the active camera")]
    TorchUnsupported,

    // === I/O Errors ===
    /// File system operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to create a required directory.
    #[error("failed to create directory {path}: {source}")]
    DirectoryCreate {
        /// Path that couldn't be created.
        path: PathBuf,
        /// The underlying error.
        #[source]
        source: std::io::Error,
    },

    // === Serialization Errors ===
    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Generic Errors ===
    /// An internal error occurred (bug).
    #[error("internal error: {0}")]
    Internal(String),
}

/// A specialized Result type for qrattend operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<figment::Error> for Error {
    fn from(err: figment::Error) -> Self {
        Self::ConfigLoad(Box::new(err))
    }
}

impl Error {
    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Create a camera unavailable error.
    #[must_use]
    pub fn camera_unavailable(message: impl Into<String>) -> Self {
        Self::CameraUnavailable {
            message: message.into(),
        }
    }

    /// Create a transport failure error.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    /// Create a configuration validation error.
    #[must_use]
    pub fn config_validation(message: impl Into<String>) -> Self {
        Self::ConfigValidation {
            message: message.into(),
        }
    }

    /// Check if this error is a setup problem the operator must fix.
    ///
    /// Camera and endpoint failures block the session; everything else is
    /// either transient or internal.
    #[must_use]
    pub fn is_operator_visible(&self) -> bool {
        matches!(
            self,
            Self::CameraUnavailable { .. } | Self::EndpointNotConfigured
        )
    }

    /// Check if this error is transient and should be absorbed by queuing.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
