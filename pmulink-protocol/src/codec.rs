//! Streaming frame decoder for byte-oriented transports.
//!
//! Reads may split frames arbitrarily or carry several at once. The decoder
//! buffers bytes until the declared FRAMESIZE is available, then hands out
//! exactly one frame.

use crate::config::ConfigFrame;
use crate::error::ProtocolError;
use crate::frame::{peek_frame_size, Frame, MIN_FRAME_SIZE, SYNC_BYTE};
use crate::READ_BUFFER_SIZE;
use bytes::{Buf, Bytes, BytesMut};

/// Splits a byte stream into C37.118 frames.
pub struct FrameDecoder {
    buffer: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(READ_BUFFER_SIZE),
        }
    }

    /// Appends data to the internal buffer.
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    /// Gives direct access to the buffer for reads that fill it in place.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Extracts the raw bytes of the next complete frame.
    ///
    /// Returns `Ok(None)` if more data is needed. On a bad sync byte or an
    /// impossible size the offending bytes are skipped up to the next sync
    /// candidate and the error is reported once, so later frames still decode.
    pub fn next_frame(&mut self) -> Result<Option<Bytes>, ProtocolError> {
        let size = match peek_frame_size(&self.buffer) {
            Ok(Some(size)) => size,
            Ok(None) => return Ok(None),
            Err(err) => {
                self.resync();
                return Err(err);
            }
        };

        if size < MIN_FRAME_SIZE {
            self.resync();
            return Err(ProtocolError::FrameTooSmall {
                kind: "declared",
                size,
                min: MIN_FRAME_SIZE,
            });
        }

        if self.buffer.len() < size {
            return Ok(None);
        }

        Ok(Some(self.buffer.split_to(size).freeze()))
    }

    /// Decodes the next complete frame.
    ///
    /// A frame that fails to decode is still consumed.
    pub fn decode_frame(
        &mut self,
        config: Option<&ConfigFrame>,
    ) -> Result<Option<Frame>, ProtocolError> {
        match self.next_frame()? {
            Some(bytes) => Frame::decode(&bytes, config).map(Some),
            None => Ok(None),
        }
    }

    /// Returns the number of bytes currently buffered.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Clears the internal buffer.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Drops the leading byte and everything up to the next sync candidate.
    fn resync(&mut self) {
        let skip = self.buffer[1..]
            .iter()
            .position(|&b| b == SYNC_BYTE)
            .map(|pos| pos + 1)
            .unwrap_or(self.buffer.len());
        self.buffer.advance(skip);
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, CommandFrame};
    use crate::header::HeaderFrame;
    use crate::time::Timestamp;

    fn start_frame() -> Bytes {
        CommandFrame::new(7, Command::Start)
            .with_time(Timestamp::new(1_700_000_000, 0x8000_0001))
            .encode()
            .unwrap()
    }

    #[test]
    fn test_single_frame() {
        let encoded = start_frame();
        let mut decoder = FrameDecoder::new();
        decoder.extend(&encoded);

        match decoder.decode_frame(None).unwrap().unwrap() {
            Frame::Command(cmd) => assert_eq!(cmd.command, Command::Start),
            other => panic!("unexpected frame: {:?}", other),
        }
        assert_eq!(decoder.buffered(), 0);
        assert!(decoder.decode_frame(None).unwrap().is_none());
    }

    #[test]
    fn test_fragmented_delivery() {
        let encoded = start_frame();
        let whole = Frame::decode(&encoded, None).unwrap();

        for chunk_size in [1, 2, 3, 5, 7, 17, 18] {
            let mut decoder = FrameDecoder::new();
            let mut decoded = None;
            for chunk in encoded.chunks(chunk_size) {
                assert!(decoded.is_none());
                decoder.extend(chunk);
                decoded = decoder.decode_frame(None).unwrap();
            }
            assert_eq!(decoded.as_ref(), Some(&whole), "chunk size {}", chunk_size);
        }
    }

    #[test]
    fn test_split_at_every_offset() {
        let encoded = start_frame();
        for split in 1..encoded.len() {
            let mut decoder = FrameDecoder::new();
            decoder.extend(&encoded[..split]);
            assert!(decoder.decode_frame(None).unwrap().is_none());
            decoder.extend(&encoded[split..]);
            assert!(decoder.decode_frame(None).unwrap().is_some());
        }
    }

    #[test]
    fn test_multiple_frames_in_one_read() {
        let mut data = start_frame().to_vec();
        data.extend_from_slice(&HeaderFrame::new(7, "pmu").encode().unwrap());
        data.extend_from_slice(&start_frame()[..5]);

        let mut decoder = FrameDecoder::new();
        decoder.extend(&data);

        assert!(matches!(
            decoder.decode_frame(None).unwrap(),
            Some(Frame::Command(_))
        ));
        assert!(matches!(
            decoder.decode_frame(None).unwrap(),
            Some(Frame::Header(_))
        ));
        assert!(decoder.decode_frame(None).unwrap().is_none());
        assert_eq!(decoder.buffered(), 5);
    }

    #[test]
    fn test_resync_after_noise() {
        let mut data = vec![0x00, 0x13, 0x37];
        data.extend_from_slice(&start_frame());

        let mut decoder = FrameDecoder::new();
        decoder.extend(&data);

        assert!(matches!(
            decoder.decode_frame(None),
            Err(ProtocolError::InvalidSync(0x00))
        ));
        assert!(matches!(
            decoder.decode_frame(None).unwrap(),
            Some(Frame::Command(_))
        ));
    }

    #[test]
    fn test_declared_size_too_small() {
        let mut data = vec![0xAA, 0x41, 0x00, 0x02];
        data.extend_from_slice(&start_frame());

        let mut decoder = FrameDecoder::new();
        decoder.extend(&data);

        assert!(matches!(
            decoder.decode_frame(None),
            Err(ProtocolError::FrameTooSmall { size: 2, .. })
        ));
        assert!(matches!(
            decoder.decode_frame(None).unwrap(),
            Some(Frame::Command(_))
        ));
    }

    #[test]
    fn test_corrupt_frame_is_consumed() {
        let mut corrupt = start_frame().to_vec();
        corrupt[15] ^= 0xFF;
        let mut data = corrupt;
        data.extend_from_slice(&start_frame());

        let mut decoder = FrameDecoder::new();
        decoder.extend(&data);

        assert!(matches!(
            decoder.decode_frame(None),
            Err(ProtocolError::CrcMismatch { .. })
        ));
        assert!(decoder.decode_frame(None).unwrap().is_some());
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decoder_buffered() {
        let mut decoder = FrameDecoder::new();
        assert_eq!(decoder.buffered(), 0);

        decoder.extend(&[0xAA, 0x41]);
        assert_eq!(decoder.buffered(), 2);

        decoder.clear();
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_decoder_default() {
        let decoder = FrameDecoder::default();
        assert_eq!(decoder.buffered(), 0);
    }
}
