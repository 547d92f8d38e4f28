//! Semtech packet-forwarder (UDP, protocol version 2) datagram codec.
//!
//! Header layout:
//! ```text
//! [version:1][token:2][identifier:1][gateway EUI:8, PUSH_DATA/PULL_DATA/TX_ACK only][JSON body]
//! ```
//! The EUI is written MSB-first. JSON field names are fixed by the protocol.

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, STANDARD};
use base64::engine::DecodePaddingMode;
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use crate::config::EUI64;
use crate::lorawan::PhyConfig;

/// Packet-forwarder protocol version
pub const PROTOCOL_VERSION: u8 = 2;

/// Header length without the gateway EUI
pub const HEADER_SIZE: usize = 4;

/// Header length with the gateway EUI
pub const HEADER_EUI_SIZE: usize = 12;

/// Downlink payloads may or may not carry base64 padding.
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Errors from decoding a datagram
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The datagram is shorter than its header
    #[error("datagram truncated: need {needed} bytes, got {available}")]
    Truncated {
        /// Bytes the header requires
        needed: usize,
        /// Bytes received
        available: usize,
    },

    /// Version byte is not 2
    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(u8),

    /// Identifier byte is not a known message
    #[error("unknown identifier: 0x{0:02X}")]
    UnknownIdentifier(u8),

    /// JSON body could not be parsed or serialized
    #[error("malformed JSON body: {0}")]
    Json(#[from] serde_json::Error),

    /// `data` is not valid base64
    #[error("malformed base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    /// A PULL_RESP carried no payload
    #[error("PULL_RESP without data")]
    MissingPayload,
}

/// Message identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Identifier {
    /// Uplink report from the gateway
    PushData = 0,
    /// Server acknowledgement of PUSH_DATA
    PushAck = 1,
    /// Gateway keepalive opening the downlink path
    PullData = 2,
    /// Server acknowledgement of PULL_DATA
    PullAck = 3,
    /// Downlink from the server
    PullResp = 4,
    /// Gateway acknowledgement of PULL_RESP
    TxAck = 5,
}

impl TryFrom<u8> for Identifier {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Identifier::PushData),
            1 => Ok(Identifier::PushAck),
            2 => Ok(Identifier::PullData),
            3 => Ok(Identifier::PullAck),
            4 => Ok(Identifier::PullResp),
            5 => Ok(Identifier::TxAck),
            other => Err(CodecError::UnknownIdentifier(other)),
        }
    }
}

impl Identifier {
    /// Whether the header carries the gateway EUI
    pub fn has_gateway_eui(self) -> bool {
        matches!(
            self,
            Identifier::PushData | Identifier::PullData | Identifier::TxAck
        )
    }
}

/// One received packet reported upstream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RxPk {
    /// UTC time of reception, RFC 3339
    pub time: String,
    /// Concentrator timestamp in microseconds
    pub tmst: u32,
    /// Concentrator IF channel
    pub chan: u8,
    /// Concentrator RF chain
    pub rfch: u8,
    /// Frequency in MHz
    pub freq: f64,
    /// CRC status (1 = OK)
    pub stat: i8,
    /// Modulation, always `LORA`
    pub modu: String,
    /// Data rate, e.g. `SF7BW125`
    pub datr: String,
    /// Coding rate, e.g. `4/5`
    pub codr: String,
    /// RSSI in dBm
    pub rssi: i16,
    /// SNR in dB
    pub lsnr: f32,
    /// Payload size in bytes
    pub size: u16,
    /// Base64 PHY payload
    pub data: String,
}

impl RxPk {
    /// Describe `phy_payload` as received with the simulated `phy` parameters
    pub fn new(phy_payload: &[u8], phy: &PhyConfig, now: DateTime<Utc>) -> Self {
        Self {
            time: now.to_rfc3339_opts(SecondsFormat::Secs, true),
            tmst: now.timestamp_micros() as u32,
            chan: phy.channel,
            rfch: phy.rf_chain,
            freq: phy.frequency_mhz(),
            stat: 1,
            modu: "LORA".to_string(),
            datr: phy.modulation.datr(),
            codr: phy.modulation.codr(),
            rssi: phy.rssi,
            lsnr: phy.snr,
            size: phy_payload.len() as u16,
            data: STANDARD.encode(phy_payload),
        }
    }

    /// Decoded PHY payload
    pub fn payload(&self) -> Result<Vec<u8>, CodecError> {
        Ok(LENIENT.decode(&self.data)?)
    }
}

/// PUSH_DATA body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushBody {
    /// Received packets
    #[serde(default)]
    pub rxpk: Vec<RxPk>,
}

/// Downlink transmit request carried by PULL_RESP
///
/// Only `data` is needed; the radio parameters are kept for logging.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TxPk {
    /// Send immediately
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imme: Option<bool>,
    /// Concentrator timestamp to send at
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tmst: Option<u32>,
    /// Frequency in MHz
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub freq: Option<f64>,
    /// RF chain
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rfch: Option<u8>,
    /// TX power in dBm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub powe: Option<i8>,
    /// Modulation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modu: Option<String>,
    /// Data rate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub datr: Option<String>,
    /// Coding rate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codr: Option<String>,
    /// Inverted polarity
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ipol: Option<bool>,
    /// Payload size in bytes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u16>,
    /// Base64 PHY payload
    #[serde(default)]
    pub data: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct PullRespBody {
    txpk: TxPk,
}

/// A decoded datagram
#[derive(Debug, Clone, PartialEq)]
#[allow(missing_docs)]
pub enum Datagram {
    /// Uplink report
    PushData {
        token: u16,
        gateway_eui: EUI64,
        body: PushBody,
    },
    /// PUSH_DATA acknowledgement
    PushAck { token: u16 },
    /// Downlink path keepalive
    PullData { token: u16, gateway_eui: EUI64 },
    /// PULL_DATA acknowledgement
    PullAck { token: u16 },
    /// Downlink with its decoded PHY payload
    PullResp {
        token: u16,
        txpk: TxPk,
        payload: Vec<u8>,
    },
    /// PULL_RESP acknowledgement
    TxAck { token: u16, gateway_eui: EUI64 },
}

impl Datagram {
    /// Identifier of this datagram
    pub fn identifier(&self) -> Identifier {
        match self {
            Datagram::PushData { .. } => Identifier::PushData,
            Datagram::PushAck { .. } => Identifier::PushAck,
            Datagram::PullData { .. } => Identifier::PullData,
            Datagram::PullAck { .. } => Identifier::PullAck,
            Datagram::PullResp { .. } => Identifier::PullResp,
            Datagram::TxAck { .. } => Identifier::TxAck,
        }
    }

    /// Token echoed between request and acknowledgement
    pub fn token(&self) -> u16 {
        match self {
            Datagram::PushData { token, .. }
            | Datagram::PushAck { token }
            | Datagram::PullData { token, .. }
            | Datagram::PullAck { token }
            | Datagram::PullResp { token, .. }
            | Datagram::TxAck { token, .. } => *token,
        }
    }
}

fn header(token: u16, identifier: Identifier, gateway_eui: Option<&EUI64>) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_EUI_SIZE);
    buf.push(PROTOCOL_VERSION);
    buf.extend_from_slice(&token.to_be_bytes());
    buf.push(identifier as u8);
    if let Some(eui) = gateway_eui {
        buf.extend_from_slice(eui.as_bytes());
    }
    buf
}

/// Encode a PUSH_DATA datagram carrying one received packet
pub fn encode_push(token: u16, gateway_eui: &EUI64, rxpk: RxPk) -> Result<Vec<u8>, CodecError> {
    let mut buf = header(token, Identifier::PushData, Some(gateway_eui));
    let body = PushBody { rxpk: vec![rxpk] };
    serde_json::to_writer(&mut buf, &body)?;
    Ok(buf)
}

/// Encode a PULL_DATA keepalive requesting pending downlinks
pub fn encode_pull(token: u16, gateway_eui: &EUI64) -> Vec<u8> {
    header(token, Identifier::PullData, Some(gateway_eui))
}

/// Encode a TX_ACK answering the PULL_RESP with the same token
pub fn encode_tx_ack(token: u16, gateway_eui: &EUI64) -> Vec<u8> {
    header(token, Identifier::TxAck, Some(gateway_eui))
}

/// Encode a PULL_RESP as a network server would send it
pub fn encode_pull_resp(token: u16, phy_payload: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut buf = header(token, Identifier::PullResp, None);
    let txpk = TxPk {
        imme: Some(true),
        size: Some(phy_payload.len() as u16),
        data: STANDARD.encode(phy_payload),
        ..TxPk::default()
    };
    serde_json::to_writer(&mut buf, &PullRespBody { txpk })?;
    Ok(buf)
}

/// Encode a bare acknowledgement (PUSH_ACK or PULL_ACK)
pub fn encode_ack(token: u16, identifier: Identifier) -> Vec<u8> {
    header(token, identifier, None)
}

/// Decode a datagram
///
/// Structural problems are reported as [`CodecError`]s; this never panics on
/// untrusted input.
pub fn decode_datagram(raw: &[u8]) -> Result<Datagram, CodecError> {
    if raw.len() < HEADER_SIZE {
        return Err(CodecError::Truncated {
            needed: HEADER_SIZE,
            available: raw.len(),
        });
    }
    if raw[0] != PROTOCOL_VERSION {
        return Err(CodecError::UnsupportedVersion(raw[0]));
    }

    let token = u16::from_be_bytes([raw[1], raw[2]]);
    let identifier = Identifier::try_from(raw[3])?;

    let (gateway_eui, body) = if identifier.has_gateway_eui() {
        if raw.len() < HEADER_EUI_SIZE {
            return Err(CodecError::Truncated {
                needed: HEADER_EUI_SIZE,
                available: raw.len(),
            });
        }
        let mut eui = [0u8; 8];
        eui.copy_from_slice(&raw[HEADER_SIZE..HEADER_EUI_SIZE]);
        (EUI64::new(eui), &raw[HEADER_EUI_SIZE..])
    } else {
        (EUI64::default(), &raw[HEADER_SIZE..])
    };

    let datagram = match identifier {
        Identifier::PushData => Datagram::PushData {
            token,
            gateway_eui,
            body: serde_json::from_slice(body)?,
        },
        Identifier::PushAck => Datagram::PushAck { token },
        Identifier::PullData => Datagram::PullData { token, gateway_eui },
        Identifier::PullAck => Datagram::PullAck { token },
        Identifier::PullResp => {
            let PullRespBody { txpk } = serde_json::from_slice(body)?;
            if txpk.data.is_empty() {
                return Err(CodecError::MissingPayload);
            }
            let payload = LENIENT.decode(&txpk.data)?;
            Datagram::PullResp {
                token,
                txpk,
                payload,
            }
        }
        Identifier::TxAck => Datagram::TxAck { token, gateway_eui },
    };

    Ok(datagram)
}
