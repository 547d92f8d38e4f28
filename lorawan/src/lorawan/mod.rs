//! LoRaWAN protocol implementation
//!
//! This module contains the core LoRaWAN protocol implementation, including:
//! - MAC frame construction and parsing
//! - The OTAA join handshake
//! - Simulated PHY parameters

/// Join handshake state machine
pub mod join;

/// MAC frame construction
pub mod mac;

/// Simulated PHY parameters
pub mod phy;

pub use join::{JoinAccept, JoinError, JoinHandshake, JoinState, RetryPolicy};
pub use mac::{MacError, PhyPayload};
pub use phy::{ModulationParams, PhyConfig};
