//! # pmulink-server
//!
//! TCP measurement unit server for pmulink.
//!
//! This crate provides:
//! - TCP connection handling with async I/O
//! - Command dispatch (START/STOP, header and configuration requests)
//! - Periodic data frame fan-out to every streaming subscriber
//! - A shared station directory holding the live measurement values
//! - YAML/environment configuration
//! - Prometheus metrics

pub mod broadcast;
pub mod config;
pub mod directory;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod registry;
pub mod server;
pub mod session;

pub use broadcast::{Broadcaster, SendRateTracker};
pub use config::{Config, MetricsConfig, NetworkConfig, PmuConfig, StationConfig};
pub use directory::SharedDirectory;
pub use error::ServerError;
pub use handler::{CommandHandler, Reply};
pub use metrics::{Metrics, MetricsRecorder, NoopRecorder};
pub use registry::Registry;
pub use server::{Server, ServerConfig, ServerStats};
pub use session::{Subscriber, SubscriberState};
