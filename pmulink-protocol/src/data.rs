//! Data frames and their typed measurement view.

use crate::config::ConfigFrame;
use crate::error::ProtocolError;
use crate::frame::{FramePrefix, FrameType, RawFrame};
use crate::station::StationValues;
use crate::wire::FrameWriter;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One sample of every station in a configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFrame {
    pub prefix: FramePrefix,
    /// Values in directory order, one entry per configured station.
    pub stations: Vec<StationValues>,
}

impl DataFrame {
    pub fn new(prefix: FramePrefix, stations: Vec<StationValues>) -> Self {
        Self { prefix, stations }
    }

    /// Encodes the frame using each station's own format from `config`.
    pub fn encode(&self, config: &ConfigFrame) -> Result<Bytes, ProtocolError> {
        if self.stations.len() != config.stations.len() {
            return Err(ProtocolError::ShapeMismatch(format!(
                "expected {} stations, got {}",
                config.stations.len(),
                self.stations.len()
            )));
        }
        for (station, values) in config.stations.iter().zip(&self.stations) {
            station.check_shape(values)?;
        }

        let mut w = FrameWriter::begin(FrameType::Data, config.data_frame_len(), &self.prefix)?;
        for (station, values) in config.stations.iter().zip(&self.stations) {
            station.encode_values(values, &mut w);
        }
        Ok(w.finish())
    }

    /// Decodes a data frame described by `config`.
    pub fn decode(buf: &[u8], config: &ConfigFrame) -> Result<Self, ProtocolError> {
        let raw = RawFrame::open(buf)?.expect(&[FrameType::Data], "data")?;
        Self::from_raw(raw, config)
    }

    pub(crate) fn from_raw(raw: RawFrame<'_>, config: &ConfigFrame) -> Result<Self, ProtocolError> {
        let mut r = raw.body;
        let mut stations = Vec::with_capacity(config.stations.len());
        for station in &config.stations {
            stations.push(station.decode_values(&mut r)?);
        }
        r.finish()?;

        Ok(Self {
            prefix: raw.prefix,
            stations,
        })
    }

    /// Pairs each station's values with its identity from `config`.
    pub fn measurements(&self, config: &ConfigFrame) -> Measurements {
        Measurements {
            pmu_id: self.prefix.id_code,
            time: config.timestamp(&self.prefix.time),
            timestamp: self.prefix.time.to_datetime(config.time_base),
            stations: config
                .stations
                .iter()
                .zip(&self.stations)
                .map(|(station, values)| StationMeasurement {
                    name: station.name.clone(),
                    id_code: station.id_code,
                    values: values.clone(),
                })
                .collect(),
        }
    }
}

/// Typed snapshot of a decoded data frame.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Measurements {
    pub pmu_id: u16,
    /// Seconds since the epoch.
    pub time: f64,
    pub timestamp: Option<DateTime<Utc>>,
    pub stations: Vec<StationMeasurement>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StationMeasurement {
    pub name: String,
    pub id_code: u16,
    #[serde(flatten)]
    pub values: StationValues,
}
