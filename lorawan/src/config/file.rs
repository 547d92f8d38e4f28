//! TOML configuration file for the emulator binary.
//!
//! Every field has a default, so a file only needs the `[device]`
//! credentials:
//!
//! ```toml
//! [gateway]
//! server = "au1.cloud.thethings.network:1700"
//! eui = "F000000000000001"
//!
//! [device]
//! activation = "otaa"
//! dev_eui = "0123456789ABCDEF"
//! join_eui = "123400000000000F"
//! app_key = "0123456789ABCDEF0123456789ABCDEF"
//! ```
//!
//! Identifiers and keys are written MSB-first, the way network-server
//! consoles print them. [`SimConfig::validate`] checks the whole file before
//! anything touches the network.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{AESKey, DevAddr, DeviceConfig, ParseIdError, EUI64};
use crate::lorawan::{ModulationParams, PhyConfig, RetryPolicy};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        /// Path that was read
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// A credential required by the activation mode is absent.
    #[error("activation mode {activation} requires `device.{field}`")]
    MissingCredential {
        /// Selected activation mode
        activation: ActivationMode,
        /// Missing field
        field: &'static str,
    },

    /// An identifier or key is not valid hex of the right length.
    #[error("invalid `{field}`: {source}")]
    InvalidHex {
        /// Offending field
        field: &'static str,
        /// Parse failure
        #[source]
        source: ParseIdError,
    },

    /// A value is out of range.
    #[error("invalid `{field}`: {reason}")]
    InvalidValue {
        /// Offending field
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level emulator configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct SimConfig {
    /// Packet-forwarder settings
    #[serde(default)]
    pub gateway: GatewaySection,
    /// Simulated reception metadata
    #[serde(default)]
    pub radio: RadioSection,
    /// Periodic uplink settings
    #[serde(default)]
    pub uplink: UplinkSection,
    /// Join retry schedule
    #[serde(default)]
    pub join: JoinSection,
    /// Device identity and credentials
    #[serde(default)]
    pub device: DeviceSection,
}

/// `[gateway]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GatewaySection {
    /// Network server `host:port`
    #[serde(default = "default_server")]
    pub server: String,
    /// Gateway EUI, MSB-first hex
    #[serde(default = "default_gateway_eui")]
    pub eui: String,
    /// How long to wait for a downlink, in milliseconds
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,
}

/// `[radio]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RadioSection {
    /// Centre frequency in Hz
    #[serde(default = "default_frequency")]
    pub frequency: u32,
    /// Data rate, e.g. `SF7BW125`
    #[serde(default = "default_datr")]
    pub datr: String,
    /// Coding rate, e.g. `4/5`
    #[serde(default = "default_codr")]
    pub codr: String,
    /// Reported RSSI in dBm
    #[serde(default = "default_rssi")]
    pub rssi: i16,
    /// Reported SNR in dB
    #[serde(default = "default_snr")]
    pub snr: f32,
    /// IF channel
    #[serde(default)]
    pub channel: u8,
    /// RF chain
    #[serde(default)]
    pub rf_chain: u8,
}

/// `[uplink]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UplinkSection {
    /// Seconds between uplinks
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    /// Application port
    #[serde(default = "default_f_port")]
    pub f_port: u8,
}

/// `[join]`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JoinSection {
    /// Join requests to send before giving up
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay after the first failed attempt, in milliseconds
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    /// Upper bound for the delay, in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Random spread as a fraction of the delay
    #[serde(default = "default_jitter")]
    pub jitter: f64,
}

/// Activation mode selected in `[device]`
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ActivationMode {
    /// Over-the-air activation
    #[default]
    Otaa,
    /// Activation by personalization
    Abp,
}

impl std::fmt::Display for ActivationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivationMode::Otaa => f.write_str("otaa"),
            ActivationMode::Abp => f.write_str("abp"),
        }
    }
}

/// `[device]`
///
/// Only the credentials of the selected activation mode are required.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DeviceSection {
    /// `otaa` or `abp`
    #[serde(default)]
    pub activation: ActivationMode,
    /// Device EUI
    pub dev_eui: Option<String>,
    /// Join EUI (OTAA)
    pub join_eui: Option<String>,
    /// Application key (OTAA)
    pub app_key: Option<String>,
    /// Device address (ABP)
    pub dev_addr: Option<String>,
    /// Network session key (ABP)
    pub nwk_skey: Option<String>,
    /// Application session key (ABP)
    pub app_skey: Option<String>,
    /// First uplink frame counter (ABP)
    #[serde(default)]
    pub frame_counter: u32,
}

// ── Default value functions ───────────────────────────────────────────────────

fn default_server() -> String {
    "au1.cloud.thethings.network:1700".to_string()
}
fn default_gateway_eui() -> String {
    "F000000000000001".to_string()
}
fn default_receive_timeout_ms() -> u64 {
    5_000
}
fn default_frequency() -> u32 {
    923_200_000
}
fn default_datr() -> String {
    "SF7BW125".to_string()
}
fn default_codr() -> String {
    "4/5".to_string()
}
fn default_rssi() -> i16 {
    -30
}
fn default_snr() -> f32 {
    5.5
}
fn default_interval_secs() -> u64 {
    30
}
fn default_f_port() -> u8 {
    1
}
fn default_max_attempts() -> u32 {
    10
}
fn default_initial_backoff_ms() -> u64 {
    1_000
}
fn default_max_backoff_ms() -> u64 {
    60_000
}
fn default_jitter() -> f64 {
    0.2
}

impl Default for GatewaySection {
    fn default() -> Self {
        Self {
            server: default_server(),
            eui: default_gateway_eui(),
            receive_timeout_ms: default_receive_timeout_ms(),
        }
    }
}

impl Default for RadioSection {
    fn default() -> Self {
        Self {
            frequency: default_frequency(),
            datr: default_datr(),
            codr: default_codr(),
            rssi: default_rssi(),
            snr: default_snr(),
            channel: 0,
            rf_chain: 0,
        }
    }
}

impl Default for UplinkSection {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            f_port: default_f_port(),
        }
    }
}

impl Default for JoinSection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            jitter: default_jitter(),
        }
    }
}

// ── Loading and conversion ────────────────────────────────────────────────────

fn parse_field<T>(field: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr<Err = ParseIdError>,
{
    value
        .parse()
        .map_err(|source| ConfigError::InvalidHex { field, source })
}

fn required<'a>(
    activation: ActivationMode,
    field: &'static str,
    value: &'a Option<String>,
) -> Result<&'a str, ConfigError> {
    value
        .as_deref()
        .ok_or(ConfigError::MissingCredential { activation, field })
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
}

impl SimConfig {
    /// Read and validate a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate configuration text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: SimConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every value that later conversions rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.gateway.server.trim().is_empty() {
            return Err(invalid("gateway.server", "must not be empty"));
        }
        self.gateway_eui()?;
        if self.gateway.receive_timeout_ms == 0 {
            return Err(invalid("gateway.receive_timeout_ms", "must be greater than zero"));
        }
        self.phy_config()?;
        if self.uplink.interval_secs == 0 {
            return Err(invalid("uplink.interval_secs", "must be greater than zero"));
        }
        if !(1..=223).contains(&self.uplink.f_port) {
            return Err(invalid(
                "uplink.f_port",
                format!("{} is reserved; use 1..=223", self.uplink.f_port),
            ));
        }
        if self.join.max_attempts == 0 {
            return Err(invalid("join.max_attempts", "must be at least 1"));
        }
        if self.join.initial_backoff_ms > self.join.max_backoff_ms {
            return Err(invalid(
                "join.initial_backoff_ms",
                "must not exceed join.max_backoff_ms",
            ));
        }
        if !(0.0..=1.0).contains(&self.join.jitter) {
            return Err(invalid("join.jitter", "must be within 0.0..=1.0"));
        }
        self.device_config()?;
        Ok(())
    }

    /// Gateway EUI
    pub fn gateway_eui(&self) -> Result<EUI64, ConfigError> {
        parse_field("gateway.eui", &self.gateway.eui)
    }

    /// Downlink receive window
    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.gateway.receive_timeout_ms)
    }

    /// Time between uplinks
    pub fn uplink_interval(&self) -> Duration {
        Duration::from_secs(self.uplink.interval_secs)
    }

    /// Application port for uplinks
    pub fn f_port(&self) -> u8 {
        self.uplink.f_port
    }

    /// Simulated reception metadata
    pub fn phy_config(&self) -> Result<PhyConfig, ConfigError> {
        let modulation = ModulationParams::parse(&self.radio.datr, &self.radio.codr)
            .map_err(|e| invalid("radio.datr/codr", e.to_string()))?;
        Ok(PhyConfig {
            frequency: self.radio.frequency,
            channel: self.radio.channel,
            rf_chain: self.radio.rf_chain,
            modulation,
            rssi: self.radio.rssi,
            snr: self.radio.snr,
        })
    }

    /// Join retry schedule
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.join.max_attempts,
            initial_backoff: Duration::from_millis(self.join.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.join.max_backoff_ms),
            jitter: self.join.jitter,
        }
    }

    /// Device identity and credentials for the selected activation mode
    pub fn device_config(&self) -> Result<DeviceConfig, ConfigError> {
        let device = &self.device;
        let mode = device.activation;
        let dev_eui: EUI64 =
            parse_field("device.dev_eui", required(mode, "dev_eui", &device.dev_eui)?)?;

        match mode {
            ActivationMode::Otaa => {
                let join_eui: EUI64 =
                    parse_field("device.join_eui", required(mode, "join_eui", &device.join_eui)?)?;
                let app_key: AESKey =
                    parse_field("device.app_key", required(mode, "app_key", &device.app_key)?)?;
                Ok(DeviceConfig::new_otaa(dev_eui, join_eui, app_key))
            }
            ActivationMode::Abp => {
                let dev_addr: DevAddr =
                    parse_field("device.dev_addr", required(mode, "dev_addr", &device.dev_addr)?)?;
                let nwk_skey: AESKey =
                    parse_field("device.nwk_skey", required(mode, "nwk_skey", &device.nwk_skey)?)?;
                let app_skey: AESKey =
                    parse_field("device.app_skey", required(mode, "app_skey", &device.app_skey)?)?;
                if device.frame_counter == u32::MAX {
                    return Err(invalid("device.frame_counter", "counter space exhausted"));
                }
                Ok(DeviceConfig::new_abp(dev_eui, dev_addr, nwk_skey, app_skey)
                    .with_abp_frame_counter(device.frame_counter))
            }
        }
    }
}
