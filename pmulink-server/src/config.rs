//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via PMULINK_CONFIG)
//! 3. Environment variables

use pmulink_protocol::station::{DIGITAL_CHANNELS, MAX_SCALE};
use pmulink_protocol::{
    AnalogKind, ConfigFrame, Format, NominalFrequency, PhasorKind, Station, DEFAULT_PORT,
    DEFAULT_TIME_BASE, MAX_STATIONS,
};
use serde::{Deserialize, Serialize};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// Measurement unit identity and station layout.
    pub pmu: PmuConfig,
    /// Metrics configuration.
    pub metrics: MetricsConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("PMULINK_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();

        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.pmu.apply_env_overrides();
        self.metrics.apply_env_overrides();
    }

    /// Saves configuration to a YAML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let content = serde_yaml::to_string(self)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        std::fs::write(path, content).map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        Ok(())
    }

    /// Checks the values a frame cannot carry or a broadcaster cannot schedule.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.pmu.validate()
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// Socket read deadline in milliseconds.
    pub read_timeout_ms: u64,
    /// Per-frame write deadline in milliseconds.
    pub write_timeout_ms: u64,
    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            read_timeout_ms: 1000,
            write_timeout_ms: 100,
            max_connections: 1000,
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("PMULINK_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }

        if let Ok(timeout) = std::env::var("PMULINK_READ_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.read_timeout_ms = ms;
            }
        }

        if let Ok(timeout) = std::env::var("PMULINK_WRITE_TIMEOUT_MS") {
            if let Ok(ms) = timeout.parse() {
                self.write_timeout_ms = ms;
            }
        }

        if let Ok(max) = std::env::var("PMULINK_MAX_CONNECTIONS") {
            if let Ok(n) = max.parse() {
                self.max_connections = n;
            }
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// Identity, timing and station layout of the measurement unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PmuConfig {
    /// IDCODE of the data stream.
    pub id_code: u16,
    /// FRACSEC denominator.
    pub time_base: u32,
    /// Frames per second, or seconds per frame when negative.
    pub data_rate: i16,
    /// Text returned in the header frame.
    pub header: String,
    pub stations: Vec<StationConfig>,
}

impl Default for PmuConfig {
    fn default() -> Self {
        Self {
            id_code: 7,
            time_base: DEFAULT_TIME_BASE,
            data_rate: 30,
            header: "pmulink".to_string(),
            stations: vec![StationConfig {
                name: "STATION-01".to_string(),
                id_code: 7,
                phasors: ["VA", "VB", "VC"]
                    .into_iter()
                    .map(|name| PhasorConfig {
                        name: name.to_string(),
                        kind: PhasorKind::Voltage,
                        scale: 1000,
                    })
                    .collect(),
                ..Default::default()
            }],
        }
    }
}

impl PmuConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("PMULINK_ID_CODE") {
            if let Ok(n) = id.parse() {
                self.id_code = n;
            }
        }

        if let Ok(rate) = std::env::var("PMULINK_DATA_RATE") {
            if let Ok(n) = rate.parse() {
                self.data_rate = n;
            }
        }

        if let Ok(base) = std::env::var("PMULINK_TIME_BASE") {
            if let Ok(n) = base.parse() {
                self.time_base = n;
            }
        }

        if let Ok(header) = std::env::var("PMULINK_HEADER") {
            self.header = header;
        }
    }

    /// Validates the unit configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.data_rate == 0 {
            return Err(ConfigError::ValidationError(
                "data_rate must not be zero".to_string(),
            ));
        }
        if self.time_base == 0 || self.time_base > MAX_SCALE {
            return Err(ConfigError::ValidationError(format!(
                "time_base must be between 1 and {}, got {}",
                MAX_SCALE, self.time_base
            )));
        }
        if self.stations.is_empty() {
            return Err(ConfigError::ValidationError(
                "at least one station is required".to_string(),
            ));
        }
        if self.stations.len() > MAX_STATIONS {
            return Err(ConfigError::ValidationError(format!(
                "at most {} stations are supported, got {}",
                MAX_STATIONS,
                self.stations.len()
            )));
        }
        for station in &self.stations {
            station.validate()?;
        }
        Ok(())
    }

    /// Builds the configuration frame served to concentrators.
    pub fn build_directory(&self) -> ConfigFrame {
        let mut directory = ConfigFrame::new(self.id_code, self.time_base, self.data_rate);
        for station in &self.stations {
            directory.add_station(station.build());
        }
        directory
    }
}

/// Channel layout of one station.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StationConfig {
    pub name: String,
    pub id_code: u16,
    pub format: FormatConfig,
    /// 50 or 60.
    pub nominal_frequency: u16,
    pub cfg_count: u16,
    pub phasors: Vec<PhasorConfig>,
    pub analogs: Vec<AnalogConfig>,
    pub digitals: Vec<DigitalConfig>,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            id_code: 1,
            format: FormatConfig::default(),
            nominal_frequency: 50,
            cfg_count: 0,
            phasors: Vec::new(),
            analogs: Vec::new(),
            digitals: Vec::new(),
        }
    }
}

impl StationConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        let invalid =
            |msg: String| ConfigError::ValidationError(format!("station '{}': {}", self.name, msg));

        if self.nominal_frequency != 50 && self.nominal_frequency != 60 {
            return Err(invalid(format!(
                "nominal_frequency must be 50 or 60, got {}",
                self.nominal_frequency
            )));
        }
        for phasor in &self.phasors {
            if phasor.scale > MAX_SCALE {
                return Err(invalid(format!(
                    "phasor '{}' scale {} exceeds 24 bits",
                    phasor.name, phasor.scale
                )));
            }
        }
        for analog in &self.analogs {
            if analog.scale > MAX_SCALE {
                return Err(invalid(format!(
                    "analog '{}' scale {} exceeds 24 bits",
                    analog.name, analog.scale
                )));
            }
        }
        for digital in &self.digitals {
            if digital.names.len() > DIGITAL_CHANNELS {
                return Err(invalid(format!(
                    "digital word has {} names, at most {} allowed",
                    digital.names.len(),
                    DIGITAL_CHANNELS
                )));
            }
        }
        Ok(())
    }

    fn build(&self) -> Station {
        let nominal = if self.nominal_frequency == 50 {
            NominalFrequency::Hz50
        } else {
            NominalFrequency::Hz60
        };
        let mut station = Station::new(&self.name, self.id_code, self.format.into())
            .with_nominal(nominal);
        station.cfg_count = self.cfg_count;
        for phasor in &self.phasors {
            station = station.with_phasor(&phasor.name, phasor.kind, phasor.scale);
        }
        for analog in &self.analogs {
            station = station.with_analog(&analog.name, analog.kind, analog.scale);
        }
        for digital in &self.digitals {
            station =
                station.with_digital(&digital.names, digital.normal_mask, digital.valid_mask);
        }
        station
    }
}

/// FORMAT flags. Unset flags select the 16-bit integer encodings.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatConfig {
    pub polar: bool,
    pub phasor_float: bool,
    pub analog_float: bool,
    pub freq_float: bool,
}

impl From<FormatConfig> for Format {
    fn from(config: FormatConfig) -> Self {
        Format {
            polar: config.polar,
            phasor_float: config.phasor_float,
            analog_float: config.analog_float,
            freq_float: config.freq_float,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhasorConfig {
    pub name: String,
    #[serde(default)]
    pub kind: PhasorKind,
    /// Integer scale in 1e-5 V or A per bit.
    #[serde(default = "default_scale")]
    pub scale: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalogConfig {
    pub name: String,
    #[serde(default)]
    pub kind: AnalogKind,
    #[serde(default = "default_scale")]
    pub scale: u32,
}

/// One 16-channel digital status word.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DigitalConfig {
    pub names: Vec<String>,
    pub normal_mask: u16,
    pub valid_mask: u16,
}

fn default_scale() -> u32 {
    1
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable metrics HTTP server.
    #[serde(default)]
    pub enabled: bool,
    /// Address to bind the metrics server to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, 9090)),
        }
    }
}

impl MetricsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(enabled) = std::env::var("PMULINK_METRICS_ENABLED") {
            self.enabled = enabled == "1" || enabled.to_lowercase() == "true";
        }
        if let Ok(addr) = std::env::var("PMULINK_METRICS_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Serializes socket addresses as strings in YAML.
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
