//! # pmulink-client
//!
//! Phasor data concentrator (PDC) client for pmulink.
//!
//! This crate provides:
//! - Async TCP connection to a measurement unit
//! - Frame reader that tolerates arbitrary read fragmentation
//! - Command issuance with single-reply header and configuration requests
//!
//! Reconnection is left to the caller.

pub mod client;
pub mod connection;
pub mod error;

pub use client::PdcClient;
pub use connection::{ConnectionConfig, FrameStream};
pub use error::ClientError;
