//! Device and network configuration
//!
//! This module contains types and functions for configuring the emulated
//! end-device. It includes:
//! - Identifier and key types (DevEUI, JoinEUI, DevAddr, AES keys)
//! - Device credentials and session state
//! - The TOML configuration file loader

/// Device credentials and session state
pub mod device;

/// TOML configuration file
pub mod file;

use core::fmt;
use core::str::FromStr;

pub use device::{AbpCredentials, Activation, ActivationState, DeviceConfig, OtaaCredentials, SessionState};
pub use file::{ConfigError, SimConfig};

/// Error returned when an identifier or key cannot be parsed from hex
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ParseIdError {
    /// Not a hex string
    #[error("invalid hex: {0}")]
    Hex(#[from] hex::FromHexError),
    /// Wrong number of bytes
    #[error("expected {expected} bytes, got {actual}")]
    Length {
        /// Expected byte count
        expected: usize,
        /// Decoded byte count
        actual: usize,
    },
}

fn parse_fixed<const N: usize>(s: &str) -> Result<[u8; N], ParseIdError> {
    let cleaned: String = s.chars().filter(|c| !matches!(c, ':' | '-' | ' ')).collect();
    let bytes = hex::decode(cleaned)?;
    <[u8; N]>::try_from(bytes.as_slice()).map_err(|_| ParseIdError::Length {
        expected: N,
        actual: bytes.len(),
    })
}

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident, $len:expr) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
        pub struct $name([u8; $len]);

        impl $name {
            /// Create from bytes in MSB-first (display) order
            pub const fn new(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }

            /// Create from bytes in over-the-air (little-endian) order
            pub fn from_le_bytes(mut bytes: [u8; $len]) -> Self {
                bytes.reverse();
                Self(bytes)
            }

            /// Bytes in MSB-first (display) order
            pub fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// Bytes in over-the-air (little-endian) order
            pub fn to_le_bytes(&self) -> [u8; $len] {
                let mut bytes = self.0;
                bytes.reverse();
                bytes
            }
        }

        impl FromStr for $name {
            type Err = ParseIdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                parse_fixed::<$len>(s).map(Self)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                for b in &self.0 {
                    write!(f, "{:02X}", b)?;
                }
                Ok(())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }
    };
}

identifier!(
    /// EUI-64 (DevEUI or JoinEUI)
    EUI64,
    8
);

identifier!(
    /// Device Address (4 bytes)
    DevAddr,
    4
);

/// AES-128 key (16 bytes)
///
/// Keys are not byte-swapped on the air, so there is no little-endian view.
/// `Debug` never prints key material.
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct AESKey([u8; 16]);

impl AESKey {
    /// Create a key from raw bytes
    pub const fn new(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes
    pub fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }
}

impl FromStr for AESKey {
    type Err = ParseIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_fixed::<16>(s).map(Self)
    }
}

impl fmt::Display for AESKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in &self.0 {
            write!(f, "{:02X}", b)?;
        }
        Ok(())
    }
}

impl fmt::Debug for AESKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AESKey(..)")
    }
}
