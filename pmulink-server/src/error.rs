//! Server error types.

use crate::config::ConfigError;
use pmulink_protocol::ErrorKind;
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] pmulink_protocol::ProtocolError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("metrics error: {0}")]
    Metrics(#[from] prometheus::Error),

    #[error("write timed out")]
    WriteTimeout,

    #[error("subscriber closed")]
    Closed,

    #[error("server shutting down")]
    ShuttingDown,
}

impl ServerError {
    /// Category label used for logs and metrics.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServerError::Protocol(e) => e.kind(),
            ServerError::Config(_) | ServerError::Metrics(_) => ErrorKind::Parameter,
            ServerError::Io(_)
            | ServerError::WriteTimeout
            | ServerError::Closed
            | ServerError::ShuttingDown => ErrorKind::Io,
        }
    }

    /// Returns whether the error ends the connection it occurred on.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ServerError::Io(_) | ServerError::WriteTimeout | ServerError::Closed
        )
    }
}
