//! Error type shared by every operation in this crate.
//!
//! Variants fall into three groups:
//!
//! - setup: `ClientSetup`, `ConfigError`, `Io` (bad config or unreadable PEM
//!   files, caught at startup);
//! - data: `Serialization`, `Deserialization` (shadow documents);
//! - runtime: `ClientTransfer`, `ClientConnection`, `ConnectTimeout`,
//!   `ConnectionKernel`, `RetriesPolicy`.
//!
//! Shadow rejections and operation timeouts are not errors; they are
//! reported as [`crate::shadow::ShadowResponse`] values.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    /// The client could not be built, usually because TLS material is
    /// missing or unreadable.
    #[error("Client setup error: {0}")]
    ClientSetup(String),

    #[error("Configuration error: {0}")]
    ConfigError(#[from] validator::ValidationErrors),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// The request could not be queued on the rumqttc client (event loop
    /// gone or request channel closed).
    #[error("Client transfer error: {0}")]
    ClientTransfer(#[from] rumqttc::ClientError),

    /// Boxed to keep the enum small.
    #[error("Client connection error: {0}")]
    ClientConnection(#[from] Box<rumqttc::ConnectionError>),

    /// No CONNACK within the configured connection timeout.
    #[error("Timed out after {0:?} waiting for the broker to accept the connection")]
    ConnectTimeout(Duration),

    #[error("Connection kernel error: {0}")]
    ConnectionKernel(String),

    /// Reconnect attempts exhausted.
    #[error("Retry policy error: {0}")]
    RetriesPolicy(#[from] super::backoff::BackoffError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<rumqttc::ConnectionError> for TransferError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        TransferError::ClientConnection(Box::new(err))
    }
}

impl From<serde_json::Error> for TransferError {
    fn from(err: serde_json::Error) -> Self {
        if err.is_data() || err.is_syntax() || err.is_eof() {
            TransferError::Deserialization(err.to_string())
        } else {
            TransferError::Serialization(err.to_string())
        }
    }
}
