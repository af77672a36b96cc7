use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::capabilities::{CacheError, ClientError, NetworkError, NotificationError};
use crate::config::ConfigError;
use crate::offline_store::StoreError;
use crate::worker::WorkerError;

/// How a failure is treated by this layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    UnsupportedCapability,
    PermissionDenied,
    InstallFailure,
    Network,
    Storage,
    MalformedPayload,
    InvalidState,
    Configuration,
}

impl ErrorKind {
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::UnsupportedCapability => "UNSUPPORTED_CAPABILITY",
            Self::PermissionDenied => "PERMISSION_DENIED",
            Self::InstallFailure => "INSTALL_FAILURE",
            Self::Network => "NETWORK_ERROR",
            Self::Storage => "STORAGE_ERROR",
            Self::MalformedPayload => "MALFORMED_PAYLOAD",
            Self::InvalidState => "INVALID_STATE",
            Self::Configuration => "CONFIGURATION_ERROR",
        }
    }

    /// Only a failed install retires a worker version.
    #[must_use]
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::InstallFailure)
    }
}

impl NetworkError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidUrl { .. } | Self::InvalidHeader { .. } | Self::TooManyHeaders { .. } => {
                ErrorKind::MalformedPayload
            }
            Self::Connection { .. } | Self::HttpStatus { .. } | Self::Offline => ErrorKind::Network,
        }
    }
}

impl CacheError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidKey { .. } | Self::InvalidName { .. } => ErrorKind::Configuration,
            Self::StoreFull { .. } | Self::Storage(_) => ErrorKind::Storage,
        }
    }
}

impl NotificationError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::RegistrationFailed { .. } | Self::Display { .. } => ErrorKind::UnsupportedCapability,
            Self::NotFound(_) => ErrorKind::InvalidState,
        }
    }
}

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Notification error: {0}")]
    Notification(#[from] NotificationError),

    #[error("Client error: {0}")]
    Client(#[from] ClientError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl ShellError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Network(e) => e.kind(),
            Self::Cache(e) => e.kind(),
            Self::Notification(e) => e.kind(),
            Self::Client(_) => ErrorKind::InvalidState,
            Self::Worker(e) => e.kind(),
            Self::Config(_) => ErrorKind::Configuration,
            Self::Store(_) => ErrorKind::Storage,
        }
    }
}
