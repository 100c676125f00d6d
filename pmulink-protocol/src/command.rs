//! Command frames sent by a concentrator to a measurement unit.

use crate::error::ProtocolError;
use crate::frame::{FramePrefix, FrameType, RawFrame, MIN_FRAME_SIZE};
use crate::time::Timestamp;
use crate::wire::FrameWriter;
use bytes::{BufMut, Bytes};
use std::fmt;

/// CMD word values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Turn off transmission of data frames.
    Stop,
    /// Turn on transmission of data frames.
    Start,
    SendHeader,
    SendConfig1,
    SendConfig2,
    SendConfig3,
    /// Extended frame; the payload travels in the command frame extension.
    Extended,
    Unknown(u16),
}

impl Command {
    pub fn from_code(code: u16) -> Self {
        match code {
            0x01 => Command::Stop,
            0x02 => Command::Start,
            0x03 => Command::SendHeader,
            0x04 => Command::SendConfig1,
            0x05 => Command::SendConfig2,
            0x06 => Command::SendConfig3,
            0x08 => Command::Extended,
            other => Command::Unknown(other),
        }
    }

    pub fn code(&self) -> u16 {
        match self {
            Command::Stop => 0x01,
            Command::Start => 0x02,
            Command::SendHeader => 0x03,
            Command::SendConfig1 => 0x04,
            Command::SendConfig2 => 0x05,
            Command::SendConfig3 => 0x06,
            Command::Extended => 0x08,
            Command::Unknown(code) => *code,
        }
    }

    /// Stable label for logs and metrics.
    pub fn name(&self) -> &'static str {
        match self {
            Command::Stop => "stop",
            Command::Start => "start",
            Command::SendHeader => "header",
            Command::SendConfig1 => "config1",
            Command::SendConfig2 => "config2",
            Command::SendConfig3 => "config3",
            Command::Extended => "extended",
            Command::Unknown(_) => "unknown",
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Unknown(code) => write!(f, "unknown({:#06x})", code),
            other => f.write_str(other.name()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandFrame {
    pub prefix: FramePrefix,
    pub command: Command,
    /// Opaque extension payload following the CMD word.
    pub extended: Bytes,
}

impl CommandFrame {
    pub fn new(id_code: u16, command: Command) -> Self {
        Self {
            prefix: FramePrefix::new(id_code, Timestamp::default()),
            command,
            extended: Bytes::new(),
        }
    }

    pub fn with_time(mut self, time: Timestamp) -> Self {
        self.prefix.time = time;
        self
    }

    pub fn with_extended(mut self, extended: Bytes) -> Self {
        self.extended = extended;
        self
    }

    pub fn encoded_len(&self) -> usize {
        MIN_FRAME_SIZE + 2 + self.extended.len()
    }

    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let mut w = FrameWriter::begin(FrameType::Command, self.encoded_len(), &self.prefix)?;
        w.put_u16(self.command.code());
        w.put_slice(&self.extended);
        Ok(w.finish())
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        Self::from_raw(RawFrame::open(buf)?.expect(&[FrameType::Command], "command")?)
    }

    pub(crate) fn from_raw(raw: RawFrame<'_>) -> Result<Self, ProtocolError> {
        let mut r = raw.body;
        let command = Command::from_code(r.u16()?);
        let extended = Bytes::copy_from_slice(r.rest());
        Ok(Self {
            prefix: raw.prefix,
            command,
            extended,
        })
    }
}
