//! Configuration frames (CFG-1 and CFG-2).
//!
//! Both versions share one layout and differ only in the SYNC frame type:
//!
//! ```text
//! prefix(14) | TIME_BASE(4) | NUM_PMU(2) | station blocks... | DATA_RATE(2) | CHK(2)
//! ```

use crate::error::ProtocolError;
use crate::frame::{FramePrefix, FrameType, RawFrame, MIN_FRAME_SIZE};
use crate::station::{Station, StationValues};
use crate::time::Timestamp;
use crate::wire::FrameWriter;
use crate::DEFAULT_TIME_BASE;
use bytes::{BufMut, Bytes};
use std::time::Duration;

/// Upper bound on stations accepted when decoding a configuration.
pub const MAX_STATIONS: usize = 1000;

/// Smallest possible station block, used to bound NUM_PMU before allocating.
const MIN_STATION_SIZE: usize = 30;

/// Which configuration frame is carried.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConfigVersion {
    /// Configuration capabilities (CFG-1).
    V1,
    /// Current configuration (CFG-2).
    #[default]
    V2,
    /// Extended configuration (CFG-3). Not supported by this codec.
    V3,
}

impl ConfigVersion {
    pub fn frame_type(&self) -> FrameType {
        match self {
            ConfigVersion::V1 => FrameType::Config1,
            ConfigVersion::V2 => FrameType::Config2,
            ConfigVersion::V3 => FrameType::Config3,
        }
    }

    pub fn from_frame_type(frame_type: FrameType) -> Option<Self> {
        match frame_type {
            FrameType::Config1 => Some(ConfigVersion::V1),
            FrameType::Config2 => Some(ConfigVersion::V2),
            FrameType::Config3 => Some(ConfigVersion::V3),
            _ => None,
        }
    }
}

/// A decoded configuration: the station directory needed to interpret data frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigFrame {
    pub version: ConfigVersion,
    pub prefix: FramePrefix,
    /// TIME_BASE; the low 24 bits are the FRACSEC denominator.
    pub time_base: u32,
    pub stations: Vec<Station>,
    /// Positive: frames per second. Negative: one frame every `-data_rate` seconds.
    pub data_rate: i16,
}

impl ConfigFrame {
    pub fn new(id_code: u16, time_base: u32, data_rate: i16) -> Self {
        Self {
            version: ConfigVersion::V2,
            prefix: FramePrefix::new(id_code, Timestamp::default()),
            time_base,
            stations: Vec::new(),
            data_rate,
        }
    }

    pub fn with_station(mut self, station: Station) -> Self {
        self.stations.push(station);
        self
    }

    pub fn add_station(&mut self, station: Station) {
        self.stations.push(station);
    }

    pub fn station_by_id(&self, id_code: u16) -> Option<&Station> {
        self.stations.iter().find(|s| s.id_code == id_code)
    }

    pub fn id_code(&self) -> u16 {
        self.prefix.id_code
    }

    /// Returns a copy carried as `version` and stamped with `time`.
    pub fn stamped(&self, version: ConfigVersion, time: Timestamp) -> Self {
        Self {
            version,
            prefix: FramePrefix::new(self.prefix.id_code, time),
            ..self.clone()
        }
    }

    /// Normalizes the frame to another version. The layout is shared, so only
    /// the tag changes.
    pub fn into_version(mut self, version: ConfigVersion) -> Self {
        self.version = version;
        self
    }

    /// Interval between data frames implied by DATA_RATE.
    pub fn period(&self) -> Result<Duration, ProtocolError> {
        match self.data_rate {
            0 => Err(ProtocolError::InvalidParameter(
                "data rate must not be zero".to_string(),
            )),
            rate if rate > 0 => Ok(Duration::from_secs(1) / rate as u32),
            rate => Ok(Duration::from_secs(rate.unsigned_abs() as u64)),
        }
    }

    /// Resolves a frame timestamp to seconds using this configuration's time base.
    pub fn timestamp(&self, time: &Timestamp) -> f64 {
        time.seconds(self.time_base)
    }

    /// Zeroed values for every station, in directory order.
    pub fn empty_values(&self) -> Vec<StationValues> {
        self.stations.iter().map(Station::empty_values).collect()
    }

    /// Size of this configuration frame once encoded.
    pub fn encoded_len(&self) -> usize {
        // prefix + TIME_BASE + NUM_PMU + DATA_RATE + CHK
        MIN_FRAME_SIZE + 8 + self.stations.iter().map(Station::config_len).sum::<usize>()
    }

    /// Size of a data frame described by this configuration.
    pub fn data_frame_len(&self) -> usize {
        MIN_FRAME_SIZE + self.stations.iter().map(Station::data_len).sum::<usize>()
    }

    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        if self.version == ConfigVersion::V3 {
            return Err(ProtocolError::NotImplemented("configuration frame 3"));
        }

        let mut w = FrameWriter::begin(self.version.frame_type(), self.encoded_len(), &self.prefix)?;
        w.put_u32(self.time_base);
        w.put_u16(self.stations.len() as u16);
        for station in &self.stations {
            station.encode_config(&mut w);
        }
        w.put_i16(self.data_rate);
        Ok(w.finish())
    }

    /// Decodes a CFG-1 or CFG-2 frame.
    pub fn decode(buf: &[u8]) -> Result<Self, ProtocolError> {
        let raw = RawFrame::open(buf)?;
        if raw.frame_type == FrameType::Config3 {
            return Err(ProtocolError::NotImplemented("configuration frame 3"));
        }
        Self::from_raw(raw.expect(&[FrameType::Config1, FrameType::Config2], "configuration")?)
    }

    pub(crate) fn from_raw(raw: RawFrame<'_>) -> Result<Self, ProtocolError> {
        let version = match raw.frame_type {
            FrameType::Config1 => ConfigVersion::V1,
            _ => ConfigVersion::V2,
        };
        let mut r = raw.body;

        let time_base = r.u32()?;
        let num_pmu = r.u16()? as usize;
        if num_pmu > MAX_STATIONS {
            return Err(ProtocolError::LimitExceeded {
                what: "station",
                count: num_pmu,
                max: MAX_STATIONS,
            });
        }
        r.need(num_pmu * MIN_STATION_SIZE + 2)?;

        let mut stations = Vec::with_capacity(num_pmu);
        for _ in 0..num_pmu {
            stations.push(Station::decode_config(&mut r)?);
        }
        let data_rate = r.i16()?;
        r.finish()?;

        Ok(Self {
            version,
            prefix: raw.prefix,
            time_base,
            stations,
            data_rate,
        })
    }
}

impl Default for ConfigFrame {
    fn default() -> Self {
        Self::new(1, DEFAULT_TIME_BASE, 30)
    }
}
