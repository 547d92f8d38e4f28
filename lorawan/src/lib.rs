//! LoRaWAN end-device emulator
//!
//! This crate emulates a LoRaWAN 1.0.x Class A end-device sitting behind a
//! Semtech UDP packet forwarder. There is no radio: frames are built and
//! secured in software and reported to a network server as if a gateway had
//! received them over the air.
//!
//! # Features
//! - OTAA join handshake with bounded retries and ABP activation
//! - Unconfirmed data uplinks with counter-mode payload encryption and MIC
//! - Packet-forwarder v2 codec (PUSH_DATA, PULL_DATA, PULL_RESP, TX_ACK)
//! - Cayenne LPP telemetry from a simulated sensor
//! - Transport abstraction so the stack can be tested without a network
//!
//! # Example
//! ```no_run
//! use std::time::Duration;
//!
//! use lorawan_sim::{
//!     config::{AESKey, DeviceConfig, EUI64},
//!     device::LoRaWANDevice,
//!     gateway::{Gateway, UdpLink},
//!     lorawan::{PhyConfig, RetryPolicy},
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = DeviceConfig::new_otaa(
//!     "0123456789ABCDEF".parse()?, // DevEUI
//!     "123400000000000F".parse()?, // JoinEUI
//!     "0123456789ABCDEF0123456789ABCDEF".parse::<AESKey>()?, // AppKey
//! );
//!
//! let timeout = Duration::from_secs(5);
//! let link = UdpLink::connect("au1.cloud.thethings.network:1700", timeout)?;
//! let gateway = Gateway::new(link, EUI64::new([0xF0, 0, 0, 0, 0, 0, 0, 1]), PhyConfig::default(), timeout);
//! let mut device = LoRaWANDevice::new(gateway, config, RetryPolicy::default());
//!
//! // Join network
//! device.activate()?;
//!
//! // Send data
//! device.send_uplink(1, b"Hello, LoRaWAN!")?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

/// Device and network configuration
pub mod config;

/// Cryptographic functions
pub mod crypto;

/// High-level device interface
pub mod device;

/// Packet-forwarder gateway emulation
pub mod gateway;

/// LoRaWAN protocol implementation
pub mod lorawan;

/// Application payload encoding
pub mod telemetry;
