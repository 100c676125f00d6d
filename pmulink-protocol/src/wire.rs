//! Checked big-endian readers and the frame writer shared by all frame kinds.

use crate::crc::checksum;
use crate::error::ProtocolError;
use crate::frame::{FramePrefix, FrameType};
use crate::MAX_FRAME_SIZE;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::ops::{Deref, DerefMut};

/// Width of every fixed-size name field.
pub const NAME_SIZE: usize = 16;

/// Bounds-checked cursor over a frame body.
pub(crate) struct WireReader<'a> {
    buf: &'a [u8],
}

impl<'a> WireReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    /// Fails unless at least `n` bytes remain.
    pub fn need(&self, n: usize) -> Result<(), ProtocolError> {
        if self.buf.remaining() < n {
            return Err(ProtocolError::BufferTooShort {
                needed: n,
                got: self.buf.remaining(),
            });
        }
        Ok(())
    }

    pub fn u16(&mut self) -> Result<u16, ProtocolError> {
        self.need(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn i16(&mut self) -> Result<i16, ProtocolError> {
        self.need(2)?;
        Ok(self.buf.get_i16())
    }

    pub fn u32(&mut self) -> Result<u32, ProtocolError> {
        self.need(4)?;
        Ok(self.buf.get_u32())
    }

    pub fn f32(&mut self) -> Result<f32, ProtocolError> {
        self.need(4)?;
        Ok(self.buf.get_f32())
    }

    pub fn bytes(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        self.need(n)?;
        let (head, tail) = self.buf.split_at(n);
        self.buf = tail;
        Ok(head)
    }

    pub fn rest(&mut self) -> &'a [u8] {
        std::mem::take(&mut self.buf)
    }

    /// Reads a 16-byte name field, trimming space and NUL padding.
    pub fn name(&mut self) -> Result<String, ProtocolError> {
        let raw = self.bytes(NAME_SIZE)?;
        Ok(String::from_utf8_lossy(raw)
            .trim_matches(|c: char| c == ' ' || c == '\0')
            .to_string())
    }

    /// Fails if any body bytes were left unread.
    pub fn finish(self) -> Result<(), ProtocolError> {
        if !self.buf.is_empty() {
            return Err(ProtocolError::TrailingBytes(self.buf.len()));
        }
        Ok(())
    }
}

/// Builds one frame: writes the common prefix up front and appends the CRC on finish.
pub(crate) struct FrameWriter {
    buf: BytesMut,
    size: usize,
}

impl FrameWriter {
    /// Starts a frame whose total encoded size, CRC included, is `size`.
    pub fn begin(
        frame_type: FrameType,
        size: usize,
        prefix: &FramePrefix,
    ) -> Result<Self, ProtocolError> {
        if size > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size,
                max: MAX_FRAME_SIZE,
            });
        }

        let mut buf = BytesMut::with_capacity(size);
        buf.put_u16(frame_type.sync());
        buf.put_u16(size as u16);
        buf.put_u16(prefix.id_code);
        buf.put_u32(prefix.time.soc);
        buf.put_u32(prefix.time.frac_sec);
        Ok(Self { buf, size })
    }

    /// Writes a name truncated to 16 bytes on a char boundary and space padded.
    pub fn put_name(&mut self, name: &str) {
        let mut end = name.len().min(NAME_SIZE);
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        self.buf.put_slice(&name.as_bytes()[..end]);
        self.buf.put_bytes(b' ', NAME_SIZE - end);
    }

    pub fn finish(mut self) -> Bytes {
        let crc = checksum(&self.buf);
        self.buf.put_u16(crc);
        debug_assert_eq!(self.buf.len(), self.size, "size computed before encoding");
        self.buf.freeze()
    }
}

impl Deref for FrameWriter {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        &self.buf
    }
}

impl DerefMut for FrameWriter {
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }
}
