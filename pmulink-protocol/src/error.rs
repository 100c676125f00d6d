//! Protocol error types and error categories.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised while encoding or decoding C37.118 frames.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("buffer too short: need {needed} bytes, got {got}")]
    BufferTooShort { needed: usize, got: usize },

    #[error("{kind} frame too small: {size} bytes (min {min})")]
    FrameTooSmall {
        kind: &'static str,
        size: usize,
        min: usize,
    },

    #[error("frame size mismatch: declared {declared} bytes, got {actual}")]
    SizeMismatch { declared: usize, actual: usize },

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("{0} unexpected trailing bytes in frame body")]
    TrailingBytes(usize),

    #[error("{what} count {count} exceeds limit {max}")]
    LimitExceeded {
        what: &'static str,
        count: usize,
        max: usize,
    },

    #[error("invalid sync byte: expected 0xaa, got {0:#04x}")]
    InvalidSync(u8),

    #[error("unknown frame type: {0}")]
    UnknownFrameType(u8),

    #[error("unexpected frame: expected {expected}, got {actual}")]
    UnexpectedFrame {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("data frame cannot be decoded without a configuration")]
    MissingConfig,

    #[error("data does not match configuration: {0}")]
    ShapeMismatch(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("CRC mismatch: expected {expected:#06x}, got {actual:#06x}")]
    CrcMismatch { expected: u16, actual: u16 },

    #[error("not implemented: {0}")]
    NotImplemented(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    /// Returns the category this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::BufferTooShort { .. }
            | ProtocolError::FrameTooSmall { .. }
            | ProtocolError::SizeMismatch { .. }
            | ProtocolError::FrameTooLarge { .. }
            | ProtocolError::TrailingBytes(_)
            | ProtocolError::LimitExceeded { .. } => ErrorKind::Size,
            ProtocolError::InvalidSync(_)
            | ProtocolError::UnknownFrameType(_)
            | ProtocolError::UnexpectedFrame { .. } => ErrorKind::FrameType,
            ProtocolError::MissingConfig
            | ProtocolError::ShapeMismatch(_)
            | ProtocolError::InvalidParameter(_) => ErrorKind::Parameter,
            ProtocolError::CrcMismatch { .. } => ErrorKind::Checksum,
            ProtocolError::NotImplemented(_) => ErrorKind::NotImplemented,
            ProtocolError::Io(_) => ErrorKind::Io,
        }
    }
}

/// Stable error categories, used as metric labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Size,
    FrameType,
    Checksum,
    Parameter,
    NotImplemented,
    Io,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Size => "size",
            ErrorKind::FrameType => "frame_type",
            ErrorKind::Checksum => "checksum",
            ErrorKind::Parameter => "parameter",
            ErrorKind::NotImplemented => "not_implemented",
            ErrorKind::Io => "io",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
