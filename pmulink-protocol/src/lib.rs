//! # pmulink-protocol
//!
//! IEEE C37.118-2011 synchrophasor frame codec.
//!
//! This crate provides:
//! - Encoding and decoding of data, header, configuration (CFG-1/CFG-2) and command frames
//! - CRC-16/CCITT-FALSE validation
//! - Station definitions with per-quantity integer/float encodings
//! - A streaming decoder that recovers frame boundaries from a byte stream

pub mod codec;
pub mod command;
pub mod config;
pub mod crc;
pub mod data;
pub mod error;
pub mod frame;
pub mod header;
pub mod station;
pub mod time;
mod wire;

pub use codec::FrameDecoder;
pub use command::{Command, CommandFrame};
pub use config::{ConfigFrame, ConfigVersion, MAX_STATIONS};
pub use data::{DataFrame, Measurements, StationMeasurement};
pub use error::{ErrorKind, ProtocolError};
pub use frame::{Frame, FramePrefix, FrameType, MIN_FRAME_SIZE, PREFIX_SIZE, SYNC_BYTE};
pub use header::HeaderFrame;
pub use station::{
    AnalogChannel, AnalogKind, AnalogUnit, DigitalUnit, DigitalWord, Format, NominalFrequency,
    Phasor, PhasorChannel, PhasorKind, PhasorUnit, Station, StationValues,
};
pub use time::{TimeQuality, Timestamp};
pub use wire::NAME_SIZE;

/// Default TCP port for measurement units.
pub const DEFAULT_PORT: u16 = 4712;

/// Largest frame representable by the 16-bit FRAMESIZE field.
pub const MAX_FRAME_SIZE: usize = u16::MAX as usize;

/// Receive buffer size, large enough for any frame.
pub const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Microsecond resolution for FRACSEC.
pub const DEFAULT_TIME_BASE: u32 = 1_000_000;
