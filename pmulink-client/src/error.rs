//! Client error types.

use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] pmulink_protocol::ProtocolError),

    #[error("connection closed")]
    ConnectionClosed,

    #[error("request timeout")]
    Timeout,

    #[error("not implemented: {0}")]
    NotImplemented(&'static str),
}

impl ClientError {
    /// Returns whether retrying on a fresh connection may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ClientError::Io(_) | ClientError::Timeout | ClientError::ConnectionClosed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmulink_protocol::ProtocolError;

    #[test]
    fn test_retryable() {
        assert!(ClientError::Timeout.is_retryable());
        assert!(ClientError::ConnectionClosed.is_retryable());
        assert!(ClientError::Io(std::io::Error::from(std::io::ErrorKind::BrokenPipe)).is_retryable());

        assert!(!ClientError::NotImplemented("configuration frame 3").is_retryable());
        assert!(!ClientError::Protocol(ProtocolError::MissingConfig).is_retryable());
    }

    #[test]
    fn test_display() {
        let err = ClientError::Protocol(ProtocolError::MissingConfig);
        assert!(err.to_string().starts_with("protocol error"));
        assert_eq!(
            ClientError::NotImplemented("configuration frame 3").to_string(),
            "not implemented: configuration frame 3"
        );
    }
}
