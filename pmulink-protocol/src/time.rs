//! SOC / FRACSEC timestamps and the time-quality byte.
//!
//! ```text
//! FRACSEC: +---------+----------------------------+
//!          | quality |   fraction-of-second count |
//!          |  8 bits |           24 bits          |
//!          +---------+----------------------------+
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Mask of the fraction-of-second count inside FRACSEC.
pub const FRACTION_MASK: u32 = 0x00FF_FFFF;

/// Decoded time-quality byte (top byte of FRACSEC).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeQuality {
    /// Bit 7, set when the timestamp carries quality information.
    pub flag: bool,
    /// Bit 6, leap second direction (true = deleted second).
    pub leap_negative: bool,
    /// Bit 5, a leap second occurred.
    pub leap_occurred: bool,
    /// Bit 4, a leap second is pending.
    pub leap_pending: bool,
    /// Bits 3-0, clock quality code (0 = locked to UTC, 0xF = fault).
    pub quality: u8,
}

impl TimeQuality {
    const FLAG: u8 = 1 << 7;
    const LEAP_NEGATIVE: u8 = 1 << 6;
    const LEAP_OCCURRED: u8 = 1 << 5;
    const LEAP_PENDING: u8 = 1 << 4;

    pub fn from_byte(byte: u8) -> Self {
        Self {
            flag: byte & Self::FLAG != 0,
            leap_negative: byte & Self::LEAP_NEGATIVE != 0,
            leap_occurred: byte & Self::LEAP_OCCURRED != 0,
            leap_pending: byte & Self::LEAP_PENDING != 0,
            quality: byte & 0x0F,
        }
    }

    pub fn to_byte(&self) -> u8 {
        let mut byte = self.quality & 0x0F;
        if self.flag {
            byte |= Self::FLAG;
        }
        if self.leap_negative {
            byte |= Self::LEAP_NEGATIVE;
        }
        if self.leap_occurred {
            byte |= Self::LEAP_OCCURRED;
        }
        if self.leap_pending {
            byte |= Self::LEAP_PENDING;
        }
        byte
    }
}

/// Frame timestamp: seconds of century plus the FRACSEC word.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    pub soc: u32,
    pub frac_sec: u32,
}

impl Timestamp {
    /// Quality flag bit set on locally stamped timestamps.
    pub const QUALITY_FLAG: u32 = 0x8000_0000;

    pub fn new(soc: u32, frac_sec: u32) -> Self {
        Self { soc, frac_sec }
    }

    /// Stamps the current wall-clock time with the given time base.
    pub fn now(time_base: u32) -> Self {
        Self::from_system_time(SystemTime::now(), time_base)
    }

    /// Converts a wall-clock time. Times before the epoch map to zero.
    pub fn from_system_time(time: SystemTime, time_base: u32) -> Self {
        let since_epoch = time.duration_since(UNIX_EPOCH).unwrap_or_default();
        let fraction = (since_epoch.subsec_nanos() as u64 * (time_base & FRACTION_MASK) as u64
            / 1_000_000_000) as u32;
        Self {
            soc: since_epoch.as_secs() as u32,
            frac_sec: Self::QUALITY_FLAG | (fraction & FRACTION_MASK),
        }
    }

    /// Returns the fraction-of-second count.
    pub fn fraction(&self) -> u32 {
        self.frac_sec & FRACTION_MASK
    }

    pub fn quality(&self) -> TimeQuality {
        TimeQuality::from_byte((self.frac_sec >> 24) as u8)
    }

    /// Replaces the quality byte, keeping the fraction count.
    pub fn with_quality(self, quality: TimeQuality) -> Self {
        Self {
            soc: self.soc,
            frac_sec: ((quality.to_byte() as u32) << 24) | self.fraction(),
        }
    }

    /// Seconds since the epoch, with the fraction resolved against `time_base`.
    pub fn seconds(&self, time_base: u32) -> f64 {
        let time_base = time_base & FRACTION_MASK;
        if time_base == 0 {
            return self.soc as f64;
        }
        self.soc as f64 + self.fraction() as f64 / time_base as f64
    }

    pub fn to_datetime(&self, time_base: u32) -> Option<DateTime<Utc>> {
        let time_base = (time_base & FRACTION_MASK) as u64;
        let nanos = if time_base == 0 {
            0
        } else {
            (self.fraction() as u64 * 1_000_000_000 / time_base).min(999_999_999) as u32
        };
        DateTime::from_timestamp(self.soc as i64, nanos)
    }
}
