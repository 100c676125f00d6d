//! Station directory and live measurement values.

use bytes::Bytes;
use parking_lot::RwLock;
use pmulink_protocol::{
    ConfigFrame, ConfigVersion, DataFrame, FramePrefix, HeaderFrame, ProtocolError,
    StationValues, Timestamp,
};
use std::time::Duration;

/// The unit's fixed configuration plus the values the next data frame will carry.
///
/// Readers take a cloned snapshot and writers mutate under the write lock, so
/// a broadcast never sees a half-applied update. The lock is never held across
/// an await point.
pub struct SharedDirectory {
    config: ConfigFrame,
    header: String,
    values: RwLock<Vec<StationValues>>,
}

impl SharedDirectory {
    /// Creates a directory with every station at nominal frequency and zero phasors.
    pub fn new(config: ConfigFrame, header: impl Into<String>) -> Self {
        let values = config.empty_values();
        Self {
            config,
            header: header.into(),
            values: RwLock::new(values),
        }
    }

    pub fn config(&self) -> &ConfigFrame {
        &self.config
    }

    pub fn header(&self) -> &str {
        &self.header
    }

    pub fn id_code(&self) -> u16 {
        self.config.id_code()
    }

    pub fn time_base(&self) -> u32 {
        self.config.time_base
    }

    /// Interval between broadcast ticks.
    pub fn period(&self) -> Result<Duration, ProtocolError> {
        self.config.period()
    }

    /// Copies the current values.
    pub fn snapshot(&self) -> Vec<StationValues> {
        self.values.read().clone()
    }

    /// Applies `f` to the live values under the write lock.
    ///
    /// The update is rejected, and the previous values kept, if `f` changes
    /// the number of stations or any station's channel counts.
    pub fn update<F>(&self, f: F) -> Result<(), ProtocolError>
    where
        F: FnOnce(&mut [StationValues]),
    {
        let mut values = self.values.write();
        let mut next = values.clone();
        f(&mut next);
        for (station, v) in self.config.stations.iter().zip(&next) {
            station.check_shape(v)?;
        }
        *values = next;
        Ok(())
    }

    /// Replaces the values of the station at `index`.
    pub fn set_station(&self, index: usize, values: StationValues) -> Result<(), ProtocolError> {
        let station = self.config.stations.get(index).ok_or_else(|| {
            ProtocolError::InvalidParameter(format!(
                "station index {} out of range ({} stations)",
                index,
                self.config.stations.len()
            ))
        })?;
        station.check_shape(&values)?;
        self.values.write()[index] = values;
        Ok(())
    }

    /// Builds a data frame from the current values.
    pub fn data_frame(&self, time: Timestamp) -> DataFrame {
        DataFrame::new(FramePrefix::new(self.id_code(), time), self.snapshot())
    }

    /// Encodes a data frame from the current values.
    pub fn encode_data(&self, time: Timestamp) -> Result<Bytes, ProtocolError> {
        self.data_frame(time).encode(&self.config)
    }

    pub fn header_frame(&self, time: Timestamp) -> HeaderFrame {
        HeaderFrame::new(self.id_code(), self.header.clone()).with_time(time)
    }

    /// The configuration served as `version`, stamped with `time`.
    pub fn config_frame(&self, version: ConfigVersion, time: Timestamp) -> ConfigFrame {
        self.config.stamped(version, time)
    }
}
