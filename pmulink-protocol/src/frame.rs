//! Common frame prefix, frame-kind discrimination and the decoded frame union.
//!
//! Every frame shares the same 14-byte prefix and a trailing CRC:
//!
//! ```text
//! +------+-----------+--------+--------+---------+----------+-------+
//! | SYNC | FRAMESIZE | IDCODE |  SOC   | FRACSEC |   body   |  CHK  |
//! |  2   |     2     |   2    |   4    |    4    | variable |   2   |
//! +------+-----------+--------+--------+---------+----------+-------+
//! ```
//!
//! SYNC is `0xAA` followed by `(frame_type << 4) | version`.

use crate::command::CommandFrame;
use crate::config::ConfigFrame;
use crate::crc::{self, CRC_SIZE};
use crate::data::DataFrame;
use crate::error::ProtocolError;
use crate::header::HeaderFrame;
use crate::time::Timestamp;
use crate::wire::WireReader;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Leading byte of every SYNC word.
pub const SYNC_BYTE: u8 = 0xAA;

/// Version nibble written into SYNC (IEEE C37.118-2005 and later).
pub const SYNC_VERSION: u8 = 1;

/// Size of the common prefix (SYNC through FRACSEC).
pub const PREFIX_SIZE: usize = 14;

/// Smallest possible frame: the prefix plus the CRC.
pub const MIN_FRAME_SIZE: usize = PREFIX_SIZE + CRC_SIZE;

/// Frame kind, carried in bits 6-4 of the second SYNC byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameType {
    Data,
    Header,
    Config1,
    Config2,
    Command,
    Config3,
}

impl FrameType {
    pub fn from_bits(bits: u8) -> Result<Self, ProtocolError> {
        match bits {
            0 => Ok(FrameType::Data),
            1 => Ok(FrameType::Header),
            2 => Ok(FrameType::Config1),
            3 => Ok(FrameType::Config2),
            4 => Ok(FrameType::Command),
            5 => Ok(FrameType::Config3),
            other => Err(ProtocolError::UnknownFrameType(other)),
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            FrameType::Data => 0,
            FrameType::Header => 1,
            FrameType::Config1 => 2,
            FrameType::Config2 => 3,
            FrameType::Command => 4,
            FrameType::Config3 => 5,
        }
    }

    /// Identifies the frame kind from the two SYNC bytes.
    ///
    /// Any version nibble is accepted.
    pub fn from_sync(sync: [u8; 2]) -> Result<Self, ProtocolError> {
        if sync[0] != SYNC_BYTE {
            return Err(ProtocolError::InvalidSync(sync[0]));
        }
        Self::from_bits((sync[1] >> 4) & 0x07)
    }

    pub fn sync(self) -> u16 {
        u16::from_be_bytes([SYNC_BYTE, (self.bits() << 4) | SYNC_VERSION])
    }

    /// Smallest valid encoded size of this kind.
    pub fn min_size(self) -> usize {
        match self {
            FrameType::Data | FrameType::Header => MIN_FRAME_SIZE,
            FrameType::Command => MIN_FRAME_SIZE + 2,
            FrameType::Config1 | FrameType::Config2 | FrameType::Config3 => MIN_FRAME_SIZE + 8,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            FrameType::Data => "data",
            FrameType::Header => "header",
            FrameType::Config1 => "config1",
            FrameType::Config2 => "config2",
            FrameType::Command => "command",
            FrameType::Config3 => "config3",
        }
    }
}

/// Identifier and timestamp shared by all frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FramePrefix {
    pub id_code: u16,
    pub time: Timestamp,
}

impl FramePrefix {
    pub fn new(id_code: u16, time: Timestamp) -> Self {
        Self { id_code, time }
    }

    /// Prefix stamped with the current wall-clock time.
    pub fn now(id_code: u16, time_base: u32) -> Self {
        Self::new(id_code, Timestamp::now(time_base))
    }
}

/// Reads the declared FRAMESIZE from a buffer holding at least four bytes.
///
/// Returns `Ok(None)` when fewer than four bytes are available.
pub fn peek_frame_size(buf: &[u8]) -> Result<Option<usize>, ProtocolError> {
    if buf.is_empty() {
        return Ok(None);
    }
    if buf[0] != SYNC_BYTE {
        return Err(ProtocolError::InvalidSync(buf[0]));
    }
    if buf.len() < 4 {
        return Ok(None);
    }
    Ok(Some(u16::from_be_bytes([buf[2], buf[3]]) as usize))
}

/// A validated frame: checksum verified, size checked, prefix parsed.
pub(crate) struct RawFrame<'a> {
    pub frame_type: FrameType,
    pub prefix: FramePrefix,
    pub body: WireReader<'a>,
}

impl<'a> RawFrame<'a> {
    /// Validates one complete frame held exactly in `buf`.
    ///
    /// The checksum is verified before any other field is interpreted.
    pub fn open(buf: &'a [u8]) -> Result<Self, ProtocolError> {
        if buf.len() < MIN_FRAME_SIZE {
            return Err(ProtocolError::BufferTooShort {
                needed: MIN_FRAME_SIZE,
                got: buf.len(),
            });
        }

        crc::verify(buf)?;

        let frame_type = FrameType::from_sync([buf[0], buf[1]])?;

        let declared = u16::from_be_bytes([buf[2], buf[3]]) as usize;
        if declared != buf.len() {
            return Err(ProtocolError::SizeMismatch {
                declared,
                actual: buf.len(),
            });
        }
        if declared < frame_type.min_size() {
            return Err(ProtocolError::FrameTooSmall {
                kind: frame_type.name(),
                size: declared,
                min: frame_type.min_size(),
            });
        }

        let mut reader = WireReader::new(&buf[4..PREFIX_SIZE]);
        let id_code = reader.u16()?;
        let soc = reader.u32()?;
        let frac_sec = reader.u32()?;

        Ok(Self {
            frame_type,
            prefix: FramePrefix::new(id_code, Timestamp::new(soc, frac_sec)),
            body: WireReader::new(&buf[PREFIX_SIZE..buf.len() - CRC_SIZE]),
        })
    }

    /// Fails unless the frame is one of `expected`.
    pub fn expect(
        self,
        expected: &[FrameType],
        name: &'static str,
    ) -> Result<Self, ProtocolError> {
        if !expected.contains(&self.frame_type) {
            return Err(ProtocolError::UnexpectedFrame {
                expected: name,
                actual: self.frame_type.name(),
            });
        }
        Ok(self)
    }
}

/// Any decoded C37.118 frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    Data(DataFrame),
    Header(HeaderFrame),
    Config(ConfigFrame),
    Command(CommandFrame),
}

impl Frame {
    /// Decodes one complete frame held exactly in `buf`.
    ///
    /// Data frames can only be interpreted against the configuration that
    /// describes them; passing `None` for a data frame is a parameter error.
    pub fn decode(buf: &[u8], config: Option<&ConfigFrame>) -> Result<Self, ProtocolError> {
        let raw = RawFrame::open(buf)?;
        match raw.frame_type {
            FrameType::Data => {
                let config = config.ok_or(ProtocolError::MissingConfig)?;
                DataFrame::from_raw(raw, config).map(Frame::Data)
            }
            FrameType::Header => HeaderFrame::from_raw(raw).map(Frame::Header),
            FrameType::Config1 | FrameType::Config2 => {
                ConfigFrame::from_raw(raw).map(Frame::Config)
            }
            FrameType::Command => CommandFrame::from_raw(raw).map(Frame::Command),
            FrameType::Config3 => Err(ProtocolError::NotImplemented("configuration frame 3")),
        }
    }

    /// Encodes the frame. Data frames require their configuration.
    pub fn encode(&self, config: Option<&ConfigFrame>) -> Result<Bytes, ProtocolError> {
        match self {
            Frame::Data(frame) => frame.encode(config.ok_or(ProtocolError::MissingConfig)?),
            Frame::Header(frame) => frame.encode(),
            Frame::Config(frame) => frame.encode(),
            Frame::Command(frame) => frame.encode(),
        }
    }

    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Data(_) => FrameType::Data,
            Frame::Header(_) => FrameType::Header,
            Frame::Config(frame) => frame.version.frame_type(),
            Frame::Command(_) => FrameType::Command,
        }
    }

    pub fn prefix(&self) -> &FramePrefix {
        match self {
            Frame::Data(frame) => &frame.prefix,
            Frame::Header(frame) => &frame.prefix,
            Frame::Config(frame) => &frame.prefix,
            Frame::Command(frame) => &frame.prefix,
        }
    }

    /// Short kind label for logs and metrics.
    pub fn kind(&self) -> &'static str {
        self.frame_type().name()
    }
}
