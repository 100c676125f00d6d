//! Header frames: free-form text describing the data source.

use crate::error::ProtocolError;
use crate::frame::{FramePrefix, FrameType, RawFrame, MIN_FRAME_SIZE};
use crate::time::Timestamp;
use crate::wire::FrameWriter;
use bytes::{BufMut, Bytes};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderFrame {
    pub prefix: FramePrefix,
    pub info: String,
}

impl HeaderFrame {
    pub fn new(id_code: u16, info: impl Into<String>) -> Self {
        Self {
            prefix: FramePrefix::new(id_code, Timestamp::default()),
            info: info.into(),
        }
    }

    pub fn with_time(mut self, time: Timestamp) -> Self {
        self.prefix.time = time;
        self
    }

    pub fn encoded_len(&self) -> usize {
        MIN_FRAME_SIZE + self.info.len()
    }

    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let mut w = FrameWriter::begin(FrameType::Header, self.encoded_len(), &self.prefix)?;
        w.put_slice(self.info.as_bytes());
        Ok(w.finish())
    }

    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        Self::from_raw(RawFrame::open(buf)?.expect(&[FrameType::Header], "header")?)
    }

    pub(crate) fn from_raw(mut raw: RawFrame<'_>) -> Result<Self, ProtocolError> {
        let info = String::from_utf8_lossy(raw.body.rest()).into_owned();
        Ok(Self {
            prefix: raw.prefix,
            info,
        })
    }
}
