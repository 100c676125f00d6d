//! CRC-16/CCITT-FALSE checksum used by every frame kind.
//!
//! Polynomial 0x1021, initial value 0xFFFF, no reflection, no final XOR.

use crate::error::ProtocolError;
use crc::{Crc, CRC_16_IBM_3740};

const CCITT: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// Size of the trailing checksum field.
pub const CRC_SIZE: usize = 2;

/// Computes the frame checksum over `data`.
pub fn checksum(data: &[u8]) -> u16 {
    CCITT.checksum(data)
}

/// Verifies the trailing checksum of a complete frame.
pub fn verify(frame: &[u8]) -> Result<(), ProtocolError> {
    if frame.len() < CRC_SIZE {
        return Err(ProtocolError::BufferTooShort {
            needed: CRC_SIZE,
            got: frame.len(),
        });
    }

    let (body, tail) = frame.split_at(frame.len() - CRC_SIZE);
    let expected = u16::from_be_bytes([tail[0], tail[1]]);
    let actual = checksum(body);
    if actual != expected {
        return Err(ProtocolError::CrcMismatch { expected, actual });
    }
    Ok(())
}
