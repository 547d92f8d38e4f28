//! Over-The-Air Activation handshake
//!
//! The handshake is a small state machine:
//!
//! ```text
//! Unjoined ──send──▶ RequestSent ──pull──▶ AwaitingAccept ──accept──▶ Joined
//!                        ▲                       │
//!                        └────── timeout ────────┘   (fresh DevNonce)
//! ```
//!
//! It owns the ephemeral join transaction (the DevNonce that was sent) and
//! the set of nonces already used in this process. Transport and timing are
//! driven from outside, see [`crate::device::LoRaWANDevice::join_otaa`].

use std::collections::HashSet;
use std::time::Duration;

use rand::{Rng, RngCore};

use super::mac::{self, MType, MacError, PhyPayload};
use crate::config::{DevAddr, OtaaCredentials, SessionState};
use crate::crypto::{self, CryptoError, MIC_SIZE};

/// Join accept length without CFList (MHDR + 12 bytes + MIC)
pub const JOIN_ACCEPT_SIZE: usize = 17;

/// Join accept length with a 16-byte CFList
pub const JOIN_ACCEPT_CFLIST_SIZE: usize = 33;

/// Handshake states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinState {
    /// No request in flight
    Unjoined,
    /// A join request has been pushed to the gateway
    RequestSent,
    /// Downlink pull issued, waiting for the accept
    AwaitingAccept,
    /// Session keys derived
    Joined,
}

/// Join error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    /// Operation not allowed in the current state
    #[error("invalid join transition from {0:?}")]
    InvalidState(JoinState),
    /// Downlink is not a join accept
    #[error("downlink is not a join accept (MHDR 0x{0:02X})")]
    NotJoinAccept(u8),
    /// Join accept has the wrong length
    #[error("join accept of {0} bytes; expected 17 or 33")]
    InvalidLength(usize),
    /// Join accept MIC did not verify; the message was discarded
    #[error("join accept MIC mismatch")]
    InvalidMic,
    /// Every 16-bit DevNonce has been used in this process
    #[error("DevNonce space exhausted")]
    NoncesExhausted,
    /// Frame building failed
    #[error(transparent)]
    Mac(#[from] MacError),
}

impl From<CryptoError> for JoinError {
    fn from(error: CryptoError) -> Self {
        JoinError::Mac(MacError::Crypto(error))
    }
}

/// Parameters carried by a join accept
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinAccept {
    /// Network-chosen nonce
    pub app_nonce: [u8; 3],
    /// Network identifier
    pub net_id: [u8; 3],
    /// Assigned device address
    pub dev_addr: DevAddr,
    /// RX1 data rate offset and RX2 data rate
    pub dl_settings: u8,
    /// RX1 delay in seconds (0 means 1)
    pub rx_delay: u8,
}

impl JoinAccept {
    /// Decrypt, authenticate and parse a join accept PHY payload
    ///
    /// The MIC is checked before any field is read, so a forged or corrupted
    /// accept never yields parameters. A trailing CFList is authenticated but
    /// otherwise ignored.
    pub fn parse(phy: &[u8], credentials: &OtaaCredentials) -> Result<Self, JoinError> {
        let mhdr = *phy.first().ok_or(JoinError::InvalidLength(0))?;
        if MType::from_mhdr(mhdr) != MType::JoinAccept {
            return Err(JoinError::NotJoinAccept(mhdr));
        }
        if phy.len() != JOIN_ACCEPT_SIZE && phy.len() != JOIN_ACCEPT_CFLIST_SIZE {
            return Err(JoinError::InvalidLength(phy.len()));
        }

        let plain = crypto::decrypt_join_accept(&credentials.app_key, &phy[1..])?;
        let (body, mic) = plain.split_at(plain.len() - MIC_SIZE);

        let mut signed = Vec::with_capacity(1 + body.len());
        signed.push(mhdr);
        signed.extend_from_slice(body);
        if crypto::compute_join_mic(&credentials.app_key, &signed)?[..] != mic[..] {
            return Err(JoinError::InvalidMic);
        }

        let mut app_nonce = [0u8; 3];
        app_nonce.copy_from_slice(&body[0..3]);
        let mut net_id = [0u8; 3];
        net_id.copy_from_slice(&body[3..6]);
        let mut dev_addr = [0u8; 4];
        dev_addr.copy_from_slice(&body[6..10]);

        Ok(Self {
            app_nonce,
            net_id,
            dev_addr: DevAddr::from_le_bytes(dev_addr),
            dl_settings: body[10],
            rx_delay: body[11],
        })
    }
}

/// State of one join exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinTransaction {
    /// Nonce sent in the join request
    pub dev_nonce: u16,
    /// Nonce chosen by the network
    pub app_nonce: [u8; 3],
    /// Network identifier
    pub net_id: [u8; 3],
}

/// Derive the session established by a join exchange
pub fn derive_keys(
    credentials: &OtaaCredentials,
    transaction: &JoinTransaction,
    dev_addr: DevAddr,
) -> SessionState {
    let (nwk_skey, app_skey) = crypto::derive_session_keys(
        &credentials.app_key,
        &transaction.app_nonce,
        &transaction.net_id,
        transaction.dev_nonce,
    );
    SessionState::new_otaa(
        dev_addr,
        nwk_skey,
        app_skey,
        transaction.dev_nonce,
        transaction.net_id,
    )
}

/// OTAA handshake state machine
#[derive(Debug)]
pub struct JoinHandshake {
    state: JoinState,
    /// Nonce of the request currently in flight
    dev_nonce: Option<u16>,
    used_nonces: HashSet<u16>,
    attempts: u32,
}

impl Default for JoinHandshake {
    fn default() -> Self {
        Self::new()
    }
}

impl JoinHandshake {
    /// Create a handshake in the `Unjoined` state
    pub fn new() -> Self {
        Self {
            state: JoinState::Unjoined,
            dev_nonce: None,
            used_nonces: HashSet::new(),
            attempts: 0,
        }
    }

    /// Current state
    pub fn state(&self) -> JoinState {
        self.state
    }

    /// Number of join requests built so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Nonce of the request currently in flight
    pub fn dev_nonce(&self) -> Option<u16> {
        self.dev_nonce
    }

    fn draw_nonce<R: RngCore>(&mut self, rng: &mut R) -> Result<u16, JoinError> {
        if self.used_nonces.len() > u16::MAX as usize {
            return Err(JoinError::NoncesExhausted);
        }
        loop {
            let nonce: u16 = rng.gen();
            if self.used_nonces.insert(nonce) {
                return Ok(nonce);
            }
        }
    }

    /// Build a join request with a freshly drawn DevNonce
    ///
    /// Allowed from `Unjoined` and, after a timeout, from `AwaitingAccept`.
    /// The nonce is never one that was used before in this process.
    pub fn build_request<R: RngCore>(
        &mut self,
        credentials: &OtaaCredentials,
        rng: &mut R,
    ) -> Result<PhyPayload, JoinError> {
        match self.state {
            JoinState::Unjoined | JoinState::AwaitingAccept => {}
            other => return Err(JoinError::InvalidState(other)),
        }

        let dev_nonce = self.draw_nonce(rng)?;
        let frame = mac::build_join_request(credentials, dev_nonce)?;
        self.dev_nonce = Some(dev_nonce);
        self.attempts += 1;
        Ok(frame)
    }

    /// The built request was handed to the gateway
    pub fn request_sent(&mut self) -> Result<(), JoinError> {
        match (self.state, self.dev_nonce) {
            (JoinState::Unjoined | JoinState::AwaitingAccept, Some(_)) => {
                self.state = JoinState::RequestSent;
                Ok(())
            }
            (other, _) => Err(JoinError::InvalidState(other)),
        }
    }

    /// A downlink pull was issued and the receive wait started
    pub fn awaiting_accept(&mut self) -> Result<(), JoinError> {
        if self.state != JoinState::RequestSent {
            return Err(JoinError::InvalidState(self.state));
        }
        self.state = JoinState::AwaitingAccept;
        Ok(())
    }

    /// Drop an attempt interrupted by a transport failure
    ///
    /// The nonce stays in the used set, so the next request still gets a
    /// fresh one.
    pub fn abort_attempt(&mut self) {
        if self.state != JoinState::Joined {
            self.state = JoinState::Unjoined;
            self.dev_nonce = None;
        }
    }

    /// Process a downlink received while awaiting the accept
    ///
    /// On success the join transaction is consumed and the new session is
    /// returned. On failure the handshake stays in `AwaitingAccept` so the
    /// caller can keep waiting or retry.
    pub fn accept(
        &mut self,
        phy: &[u8],
        credentials: &OtaaCredentials,
    ) -> Result<SessionState, JoinError> {
        let dev_nonce = match (self.state, self.dev_nonce) {
            (JoinState::AwaitingAccept, Some(nonce)) => nonce,
            (other, _) => return Err(JoinError::InvalidState(other)),
        };

        let accept = JoinAccept::parse(phy, credentials)?;
        let transaction = JoinTransaction {
            dev_nonce,
            app_nonce: accept.app_nonce,
            net_id: accept.net_id,
        };
        let session = derive_keys(credentials, &transaction, accept.dev_addr);

        self.dev_nonce = None;
        self.state = JoinState::Joined;
        Ok(session)
    }
}

/// Bounded retry schedule for join attempts
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total number of join requests to send before giving up
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub initial_backoff: Duration,
    /// Upper bound for the delay
    pub max_backoff: Duration,
    /// Random spread as a fraction of the delay, in `0.0..=1.0`
    ///
    /// Values outside the range are clamped; a non-finite value disables
    /// jitter.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based)
    pub fn backoff<R: RngCore>(&self, attempt: u32, rng: &mut R) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        let base = self
            .initial_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff);

        let jitter = if self.jitter.is_finite() {
            self.jitter.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if jitter == 0.0 || base.is_zero() {
            return base;
        }
        let factor = 1.0 + rng.gen_range(-jitter..=jitter);
        base.mul_f64(factor)
    }
}
