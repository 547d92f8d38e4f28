use heapless::Vec;

use crate::config::{AESKey, DevAddr, OtaaCredentials, SessionState};
use crate::crypto::{self, CryptoError, Direction, MIC_SIZE};

/// Maximum FRMPayload size
pub const MAX_MAC_PAYLOAD_SIZE: usize = 242;

/// Maximum PHY payload size
pub const MAX_PHY_PAYLOAD_SIZE: usize = 256;

/// Length of a join request, MIC included
pub const JOIN_REQUEST_SIZE: usize = 23;

/// Physical-layer payload buffer (`MHDR || MACPayload || MIC`)
pub type PhyPayload = Vec<u8, MAX_PHY_PAYLOAD_SIZE>;

/// MAC header types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MType {
    /// Join request
    JoinRequest = 0x00,
    /// Join accept
    JoinAccept = 0x20,
    /// Unconfirmed data uplink
    UnconfirmedDataUp = 0x40,
    /// Unconfirmed data downlink
    UnconfirmedDataDown = 0x60,
    /// Confirmed data uplink
    ConfirmedDataUp = 0x80,
    /// Confirmed data downlink
    ConfirmedDataDown = 0xA0,
    /// Rejoin request
    RejoinRequest = 0xC0,
    /// Proprietary
    Proprietary = 0xE0,
}

impl MType {
    /// Message type of an MHDR byte (major version bits ignored)
    pub fn from_mhdr(mhdr: u8) -> Self {
        match mhdr & 0xE0 {
            0x00 => MType::JoinRequest,
            0x20 => MType::JoinAccept,
            0x40 => MType::UnconfirmedDataUp,
            0x60 => MType::UnconfirmedDataDown,
            0x80 => MType::ConfirmedDataUp,
            0xA0 => MType::ConfirmedDataDown,
            0xC0 => MType::RejoinRequest,
            _ => MType::Proprietary,
        }
    }
}

/// Frame header flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FCtrl {
    /// Adaptive data rate
    pub adr: bool,
    /// ADR acknowledgement request
    pub adr_ack_req: bool,
    /// Acknowledges the last confirmed frame
    pub ack: bool,
    /// More downlink data pending
    pub f_pending: bool,
    /// Length of FOpts (0..=15)
    pub f_opts_len: u8,
}

impl FCtrl {
    /// Encode as the FCtrl byte
    pub fn to_byte(&self) -> u8 {
        let mut byte = self.f_opts_len & 0x0F;
        if self.adr {
            byte |= 0x80;
        }
        if self.adr_ack_req {
            byte |= 0x40;
        }
        if self.ack {
            byte |= 0x20;
        }
        if self.f_pending {
            byte |= 0x10;
        }
        byte
    }

    /// Decode an FCtrl byte
    pub fn from_byte(byte: u8) -> Self {
        Self {
            adr: (byte & 0x80) != 0,
            adr_ack_req: (byte & 0x40) != 0,
            ack: (byte & 0x20) != 0,
            f_pending: (byte & 0x10) != 0,
            f_opts_len: byte & 0x0F,
        }
    }
}

/// Frame header
#[derive(Debug)]
pub struct FHDR {
    /// Device address
    pub dev_addr: DevAddr,
    /// Frame control flags
    pub f_ctrl: FCtrl,
    /// Low 16 bits of the frame counter
    pub f_cnt: u16,
}

impl FHDR {
    /// Serialized length without FOpts
    pub const SIZE: usize = 7;

    fn serialize(&self) -> [u8; Self::SIZE] {
        let mut buffer = [0u8; Self::SIZE];
        buffer[..4].copy_from_slice(&self.dev_addr.to_le_bytes());
        buffer[4] = self.f_ctrl.to_byte();
        buffer[5..7].copy_from_slice(&self.f_cnt.to_le_bytes());
        buffer
    }
}

/// MAC layer error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MacError {
    /// Application payload does not fit one frame
    #[error("payload of {0} bytes exceeds the 242-byte limit")]
    PayloadTooLarge(usize),
    /// FPort 0 carries MAC commands and 224.. are reserved
    #[error("FPort {0} is reserved")]
    InvalidPort(u8),
    /// The session has used every frame counter value
    #[error("uplink frame counter exhausted")]
    FrameCounterExhausted,
    /// Buffer too small
    #[error("frame buffer too small")]
    BufferTooSmall,
    /// Crypto error
    #[error(transparent)]
    Crypto(#[from] CryptoError),
}

/// Build a join request: `MHDR || JoinEUI || DevEUI || DevNonce || MIC`
///
/// The EUIs and the nonce are written little-endian and the MIC is the CMAC
/// of the preceding 19 bytes under the application key.
pub fn build_join_request(
    credentials: &OtaaCredentials,
    dev_nonce: u16,
) -> Result<PhyPayload, MacError> {
    let mut buffer = PhyPayload::new();

    buffer.push(MType::JoinRequest as u8).map_err(|_| MacError::BufferTooSmall)?;
    buffer
        .extend_from_slice(&credentials.join_eui.to_le_bytes())
        .map_err(|_| MacError::BufferTooSmall)?;
    buffer
        .extend_from_slice(&credentials.dev_eui.to_le_bytes())
        .map_err(|_| MacError::BufferTooSmall)?;
    buffer
        .extend_from_slice(&dev_nonce.to_le_bytes())
        .map_err(|_| MacError::BufferTooSmall)?;

    let mic = crypto::compute_join_mic(&credentials.app_key, &buffer)?;
    buffer.extend_from_slice(&mic).map_err(|_| MacError::BufferTooSmall)?;

    Ok(buffer)
}

/// Build an unconfirmed data uplink for the current session counter
///
/// The frame is `0x40 || DevAddr || FCtrl || FCnt(16) || FPort ||
/// encrypted FRMPayload || MIC`. The session is not modified: the caller
/// advances the counter once the frame has been handed to the transport.
pub fn build_uplink(
    session: &SessionState,
    f_port: u8,
    payload: &[u8],
) -> Result<PhyPayload, MacError> {
    if f_port == 0 || f_port > 223 {
        return Err(MacError::InvalidPort(f_port));
    }
    if payload.len() > MAX_MAC_PAYLOAD_SIZE {
        return Err(MacError::PayloadTooLarge(payload.len()));
    }
    if !session.fcnt_up_available() {
        return Err(MacError::FrameCounterExhausted);
    }

    let fcnt = session.fcnt_up;
    let fhdr = FHDR {
        dev_addr: session.dev_addr,
        f_ctrl: FCtrl::default(),
        f_cnt: fcnt as u16,
    };

    let mut buffer = PhyPayload::new();
    buffer
        .push(MType::UnconfirmedDataUp as u8)
        .map_err(|_| MacError::BufferTooSmall)?;
    buffer
        .extend_from_slice(&fhdr.serialize())
        .map_err(|_| MacError::BufferTooSmall)?;
    buffer.push(f_port).map_err(|_| MacError::BufferTooSmall)?;

    let encrypted = crypto::encrypt_payload(
        &session.app_skey,
        session.dev_addr,
        fcnt,
        Direction::Up,
        payload,
    );
    buffer
        .extend_from_slice(&encrypted)
        .map_err(|_| MacError::BufferTooSmall)?;

    let mic = crypto::compute_data_mic(
        &session.nwk_skey,
        &buffer,
        session.dev_addr,
        fcnt,
        Direction::Up,
    )?;
    buffer.extend_from_slice(&mic).map_err(|_| MacError::BufferTooSmall)?;

    Ok(buffer)
}

/// Fields of a data frame, as seen by a receiver
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataFrame {
    /// Message type
    pub mtype: MType,
    /// Device address
    pub dev_addr: DevAddr,
    /// Frame control flags
    pub f_ctrl: FCtrl,
    /// Low 16 bits of the frame counter
    pub f_cnt: u16,
    /// FPort, absent when the frame has no payload
    pub f_port: Option<u8>,
    /// FRMPayload as carried on the air (still encrypted)
    pub frm_payload: std::vec::Vec<u8>,
    /// Message integrity code
    pub mic: [u8; MIC_SIZE],
}

/// Split a data frame into its fields and verify its MIC
///
/// `fcnt` is the full 32-bit counter the receiver expects; its low 16 bits
/// must match the header. A frame that fails verification is rejected and
/// its contents are never returned.
pub fn parse_data_frame(
    phy: &[u8],
    nwk_skey: &AESKey,
    fcnt: u32,
    dir: Direction,
) -> Result<DataFrame, MacError> {
    if phy.len() < 1 + FHDR::SIZE + MIC_SIZE {
        return Err(MacError::BufferTooSmall);
    }

    let (message, mic_bytes) = phy.split_at(phy.len() - MIC_SIZE);
    let mut dev_addr = [0u8; 4];
    dev_addr.copy_from_slice(&message[1..5]);
    let dev_addr = DevAddr::from_le_bytes(dev_addr);

    let f_ctrl = FCtrl::from_byte(message[5]);
    let f_cnt = u16::from_le_bytes([message[6], message[7]]);
    let mut mic = [0u8; MIC_SIZE];
    mic.copy_from_slice(mic_bytes);

    let expected = crypto::compute_data_mic(nwk_skey, message, dev_addr, fcnt, dir)?;
    if f_cnt != fcnt as u16 || expected != mic {
        return Err(MacError::Crypto(CryptoError::MicMismatch));
    }

    let body_start = 1 + FHDR::SIZE + f_ctrl.f_opts_len as usize;
    if body_start > message.len() {
        return Err(MacError::BufferTooSmall);
    }
    let body = &message[body_start..];
    let (f_port, frm_payload) = match body.split_first() {
        Some((port, rest)) => (Some(*port), rest.to_vec()),
        None => (None, std::vec::Vec::new()),
    };

    Ok(DataFrame {
        mtype: MType::from_mhdr(message[0]),
        dev_addr,
        f_ctrl,
        f_cnt,
        f_port,
        frm_payload,
        mic,
    })
}
