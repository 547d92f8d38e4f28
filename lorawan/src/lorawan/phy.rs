//! Simulated radio parameters
//!
//! There is no radio: frames go straight to the packet forwarder. These
//! values are reported in each `rxpk` as if a gateway had received the
//! frame over the air.

use core::fmt;
use core::str::FromStr;

/// LoRa modulation parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModulationParams {
    /// Spreading factor (SF7-SF12)
    pub spreading_factor: u8,
    /// Bandwidth in Hz
    pub bandwidth: u32,
    /// Coding rate denominator (5 for 4/5, ... 8 for 4/8)
    pub coding_rate: u8,
}

/// Error parsing a data rate or coding rate string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PhyError {
    /// Not of the form `SF<n>BW<khz>`
    #[error("invalid data rate {0:?}")]
    InvalidDataRate(String),
    /// Not of the form `4/<n>`
    #[error("invalid coding rate {0:?}")]
    InvalidCodingRate(String),
}

impl ModulationParams {
    /// Data rate identifier as used in `datr`, e.g. `SF7BW125`
    pub fn datr(&self) -> String {
        format!("SF{}BW{}", self.spreading_factor, self.bandwidth / 1000)
    }

    /// Coding rate as used in `codr`, e.g. `4/5`
    pub fn codr(&self) -> String {
        format!("4/{}", self.coding_rate)
    }

    /// Parse a `datr` string and a `codr` string
    pub fn parse(datr: &str, codr: &str) -> Result<Self, PhyError> {
        let (spreading_factor, bandwidth) = parse_datr(datr)?;
        let coding_rate = codr
            .strip_prefix("4/")
            .and_then(|d| d.parse::<u8>().ok())
            .filter(|d| (5..=8).contains(d))
            .ok_or_else(|| PhyError::InvalidCodingRate(codr.to_string()))?;
        Ok(Self {
            spreading_factor,
            bandwidth,
            coding_rate,
        })
    }
}

fn parse_datr(datr: &str) -> Result<(u8, u32), PhyError> {
    let invalid = || PhyError::InvalidDataRate(datr.to_string());
    let rest = datr.strip_prefix("SF").ok_or_else(invalid)?;
    let (sf, bw) = rest.split_once("BW").ok_or_else(invalid)?;
    let sf: u8 = sf.parse().map_err(|_| invalid())?;
    let bw: u32 = bw.parse().map_err(|_| invalid())?;
    if !(7..=12).contains(&sf) || !matches!(bw, 125 | 250 | 500) {
        return Err(invalid());
    }
    Ok((sf, bw * 1000))
}

impl Default for ModulationParams {
    fn default() -> Self {
        Self {
            spreading_factor: 7,
            bandwidth: 125_000,
            coding_rate: 5,
        }
    }
}

impl fmt::Display for ModulationParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} CR{}", self.datr(), self.codr())
    }
}

impl FromStr for ModulationParams {
    type Err = PhyError;

    /// Parses a bare `datr` with coding rate 4/5
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, "4/5")
    }
}

/// Simulated reception metadata
#[derive(Debug, Clone, PartialEq)]
pub struct PhyConfig {
    /// Centre frequency in Hz
    pub frequency: u32,
    /// IF channel
    pub channel: u8,
    /// RF chain
    pub rf_chain: u8,
    /// Modulation
    pub modulation: ModulationParams,
    /// Reported RSSI in dBm
    pub rssi: i16,
    /// Reported SNR in dB
    pub snr: f32,
}

impl Default for PhyConfig {
    fn default() -> Self {
        Self {
            frequency: 923_200_000,
            channel: 0,
            rf_chain: 0,
            modulation: ModulationParams::default(),
            rssi: -30,
            snr: 5.5,
        }
    }
}

impl PhyConfig {
    /// Frequency in MHz, as reported in `freq`
    pub fn frequency_mhz(&self) -> f64 {
        f64::from(self.frequency) / 1_000_000.0
    }
}
