//! Application payloads
//!
//! Uplinks carry a Cayenne LPP frame: a sequence of
//! `[channel][type][value]` records with big-endian fixed-point values.
//! [`SensorSimulator`] produces the readings the emulated device reports.

use heapless::Vec;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::lorawan::mac::MAX_MAC_PAYLOAD_SIZE;

/// LPP data types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LppType {
    /// 1 byte, unsigned
    DigitalInput = 0x00,
    /// 2 bytes, 0.1 °C signed
    Temperature = 0x67,
    /// 1 byte, 0.5 % unsigned
    Humidity = 0x68,
    /// 9 bytes: latitude and longitude in 0.0001°, altitude in 0.01 m
    Gps = 0x88,
}

/// LPP encoding error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LppError {
    /// The record does not fit in one uplink
    #[error("LPP frame full: {needed} bytes needed, {remaining} remaining")]
    Full {
        /// Record size
        needed: usize,
        /// Free space in the frame
        remaining: usize,
    },
    /// The value cannot be represented by the data type
    #[error("{kind:?} value {value} out of range")]
    OutOfRange {
        /// Data type
        kind: LppType,
        /// Rejected value
        value: f64,
    },
}

/// Cayenne LPP frame builder
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LppFrame {
    buffer: Vec<u8, MAX_MAC_PAYLOAD_SIZE>,
}

fn scaled(kind: LppType, value: f64, scale: f64, min: i64, max: i64) -> Result<i64, LppError> {
    let raw = (value * scale).round();
    if !raw.is_finite() || raw < min as f64 || raw > max as f64 {
        return Err(LppError::OutOfRange { kind, value });
    }
    Ok(raw as i64)
}

fn i24_be(value: i64) -> [u8; 3] {
    let bytes = (value as i32).to_be_bytes();
    [bytes[1], bytes[2], bytes[3]]
}

impl LppFrame {
    /// Create an empty frame
    pub fn new() -> Self {
        Self::default()
    }

    /// Encoded bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    /// Encoded length
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Whether no record has been added
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn push(&mut self, channel: u8, kind: LppType, value: &[u8]) -> Result<(), LppError> {
        let needed = 2 + value.len();
        let remaining = self.buffer.capacity() - self.buffer.len();
        if needed > remaining {
            return Err(LppError::Full { needed, remaining });
        }
        self.buffer
            .extend_from_slice(&[channel, kind as u8])
            .and_then(|_| self.buffer.extend_from_slice(value))
            .map_err(|_| LppError::Full { needed, remaining })
    }

    /// Add a digital input reading
    pub fn add_digital_input(&mut self, channel: u8, value: u8) -> Result<(), LppError> {
        self.push(channel, LppType::DigitalInput, &[value])
    }

    /// Add a temperature in °C, resolution 0.1
    pub fn add_temperature(&mut self, channel: u8, celsius: f64) -> Result<(), LppError> {
        let raw = scaled(
            LppType::Temperature,
            celsius,
            10.0,
            i16::MIN.into(),
            i16::MAX.into(),
        )?;
        self.push(channel, LppType::Temperature, &(raw as i16).to_be_bytes())
    }

    /// Add a relative humidity in %, resolution 0.5
    pub fn add_humidity(&mut self, channel: u8, percent: f64) -> Result<(), LppError> {
        let raw = scaled(LppType::Humidity, percent, 2.0, 0, u8::MAX.into())?;
        self.push(channel, LppType::Humidity, &[raw as u8])
    }

    /// Add a GPS fix: degrees and metres
    pub fn add_gps(
        &mut self,
        channel: u8,
        latitude: f64,
        longitude: f64,
        altitude: f64,
    ) -> Result<(), LppError> {
        const I24_MIN: i64 = -(1 << 23);
        const I24_MAX: i64 = (1 << 23) - 1;

        let lat = scaled(LppType::Gps, latitude, 10_000.0, -900_000, 900_000)?;
        let lon = scaled(LppType::Gps, longitude, 10_000.0, -1_800_000, 1_800_000)?;
        let alt = scaled(LppType::Gps, altitude, 100.0, I24_MIN, I24_MAX)?;

        let mut value = [0u8; 9];
        value[0..3].copy_from_slice(&i24_be(lat));
        value[3..6].copy_from_slice(&i24_be(lon));
        value[6..9].copy_from_slice(&i24_be(alt));
        self.push(channel, LppType::Gps, &value)
    }
}

/// One set of simulated readings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    /// °C
    pub temperature: f64,
    /// %
    pub humidity: f64,
    /// Degrees
    pub latitude: f64,
    /// Degrees
    pub longitude: f64,
    /// Metres
    pub altitude: f64,
    /// Digital input state
    pub digital_input: u8,
}

impl Reading {
    /// Encode as an LPP frame on channels 1 to 4
    pub fn to_lpp(&self) -> Result<LppFrame, LppError> {
        let mut frame = LppFrame::new();
        frame.add_temperature(1, self.temperature)?;
        frame.add_humidity(2, self.humidity)?;
        frame.add_gps(3, self.latitude, self.longitude, self.altitude)?;
        frame.add_digital_input(4, self.digital_input)?;
        Ok(frame)
    }
}

/// Simulated sensor near Tokyo Station
pub struct SensorSimulator {
    rng: StdRng,
}

impl SensorSimulator {
    /// Fixed position reported in every reading
    pub const POSITION: (f64, f64, f64) = (35.6812, 139.7671, 10.0);

    /// Create a simulator seeded from the OS
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Create a simulator drawing values from `rng`
    pub fn with_rng(rng: StdRng) -> Self {
        Self { rng }
    }

    /// Take a reading; the digital input mirrors the frame counter
    pub fn sample(&mut self, fcnt: u32) -> Reading {
        let (latitude, longitude, altitude) = Self::POSITION;
        Reading {
            temperature: 20.0 + self.rng.gen_range(-2.0..=2.0),
            humidity: 50.0 + self.rng.gen_range(-5.0..=5.0),
            latitude,
            longitude,
            altitude,
            digital_input: (fcnt % 256) as u8,
        }
    }
}

impl Default for SensorSimulator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_encoding() {
        let mut frame = LppFrame::new();
        frame.add_temperature(1, 27.2).unwrap();
        frame.add_humidity(2, 53.5).unwrap();
        frame.add_digital_input(4, 0x2A).unwrap();
        assert_eq!(
            frame.as_bytes(),
            &[0x01, 0x67, 0x01, 0x10, 0x02, 0x68, 0x6B, 0x04, 0x00, 0x2A]
        );
    }

    #[test]
    fn test_negative_temperature() {
        let mut frame = LppFrame::new();
        frame.add_temperature(3, -4.1).unwrap();
        assert_eq!(frame.as_bytes(), &[0x03, 0x67, 0xFF, 0xD7]);
    }

    #[test]
    fn test_gps_encoding() {
        let mut frame = LppFrame::new();
        frame.add_gps(3, 35.6812, 139.7671, 10.0).unwrap();
        // 356812 = 0x0571CC, 1397671 = 0x1553A7, 1000 = 0x0003E8
        assert_eq!(
            frame.as_bytes(),
            &[0x03, 0x88, 0x05, 0x71, 0xCC, 0x15, 0x53, 0xA7, 0x00, 0x03, 0xE8]
        );

        let mut frame = LppFrame::new();
        frame.add_gps(1, -33.8688, 151.2093, -5.0).unwrap();
        // -338688 = 0xFAD500 in 24-bit two's complement
        assert_eq!(&frame.as_bytes()[2..5], &[0xFA, 0xD5, 0x00]);
        assert_eq!(&frame.as_bytes()[8..11], &[0xFF, 0xFE, 0x0C]);
    }

    #[test]
    fn test_out_of_range() {
        let mut frame = LppFrame::new();
        assert!(matches!(
            frame.add_humidity(1, 130.0),
            Err(LppError::OutOfRange { kind: LppType::Humidity, .. })
        ));
        assert!(matches!(
            frame.add_gps(1, 91.0, 0.0, 0.0),
            Err(LppError::OutOfRange { kind: LppType::Gps, .. })
        ));
        assert!(frame.add_temperature(1, f64::NAN).is_err());
        assert!(frame.is_empty());
    }

    #[test]
    fn test_frame_capacity() {
        let mut frame = LppFrame::new();
        // 22 GPS records of 11 bytes fill the 242-byte frame exactly
        for channel in 0..22 {
            frame.add_gps(channel, 1.0, 1.0, 1.0).unwrap();
        }
        assert_eq!(frame.len(), MAX_MAC_PAYLOAD_SIZE);
        assert_eq!(
            frame.add_digital_input(99, 1),
            Err(LppError::Full {
                needed: 3,
                remaining: 0
            })
        );
    }

    #[test]
    fn test_simulated_reading() {
        let mut sensor = SensorSimulator::with_rng(StdRng::seed_from_u64(7));
        for fcnt in [0u32, 255, 256, 1000] {
            let reading = sensor.sample(fcnt);
            assert!((18.0..=22.0).contains(&reading.temperature));
            assert!((45.0..=55.0).contains(&reading.humidity));
            assert_eq!(reading.digital_input, (fcnt % 256) as u8);

            let frame = reading.to_lpp().unwrap();
            // temperature 4 + humidity 3 + GPS 11 + digital input 3
            assert_eq!(frame.len(), 21);
            assert_eq!(frame.as_bytes()[20], (fcnt % 256) as u8);
        }
    }
}
