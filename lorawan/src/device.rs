//! High-level LoRaWAN device interface
//!
//! This module provides the emulated end-device. It owns the gateway link,
//! activates a session (ABP or OTAA) and sends uplinks. Each device owns its
//! session and join transaction; nothing is shared between devices.

use std::thread;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{info, warn};

use crate::{
    config::{Activation, DeviceConfig, OtaaCredentials, SessionState},
    gateway::{Gateway, GatewayError, Link},
    lorawan::{
        join::{JoinError, JoinHandshake, RetryPolicy},
        mac::{self, MacError},
    },
};

/// LoRaWAN device error type
#[derive(Debug, thiserror::Error)]
pub enum DeviceError<E> {
    /// Gateway link or codec error
    #[error("gateway: {0}")]
    Gateway(GatewayError<E>),
    /// MAC layer error
    #[error("mac: {0}")]
    Mac(MacError),
    /// Join handshake error
    #[error("join: {0}")]
    Join(JoinError),
    /// Uplink requested before activation
    #[error("device is not activated")]
    NotActivated,
    /// OTAA requested for a device provisioned for ABP
    #[error("device has no OTAA credentials")]
    NotOtaa,
    /// No join accept after the configured number of attempts
    #[error("join failed after {attempts} attempts")]
    JoinFailed {
        /// Join requests sent
        attempts: u32,
    },
}

impl<E> From<GatewayError<E>> for DeviceError<E> {
    fn from(error: GatewayError<E>) -> Self {
        DeviceError::Gateway(error)
    }
}

impl<E> From<MacError> for DeviceError<E> {
    fn from(error: MacError) -> Self {
        DeviceError::Mac(error)
    }
}

impl<E> From<JoinError> for DeviceError<E> {
    fn from(error: JoinError) -> Self {
        DeviceError::Join(error)
    }
}

/// Record of a dispatched uplink
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UplinkReport {
    /// Frame counter carried by the frame
    pub fcnt: u32,
    /// PUSH_DATA token
    pub token: u16,
    /// Size of the PHY payload
    pub size: usize,
}

/// LoRaWAN device implementation
pub struct LoRaWANDevice<L: Link> {
    config: DeviceConfig,
    gateway: Gateway<L>,
    retry: RetryPolicy,
    handshake: JoinHandshake,
    session: Option<SessionState>,
    rng: StdRng,
}

impl<L: Link> LoRaWANDevice<L> {
    /// Create new LoRaWAN device
    pub fn new(gateway: Gateway<L>, config: DeviceConfig, retry: RetryPolicy) -> Self {
        Self::with_rng(gateway, config, retry, StdRng::from_entropy())
    }

    /// Create a device drawing nonces and jitter from `rng`
    pub fn with_rng(
        gateway: Gateway<L>,
        config: DeviceConfig,
        retry: RetryPolicy,
        rng: StdRng,
    ) -> Self {
        Self {
            config,
            gateway,
            retry,
            handshake: JoinHandshake::new(),
            session: None,
            rng,
        }
    }

    /// Device configuration
    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    /// Current session, once activated
    pub fn session(&self) -> Option<&SessionState> {
        self.session.as_ref()
    }

    /// Join handshake state
    pub fn handshake(&self) -> &JoinHandshake {
        &self.handshake
    }

    /// Gateway
    pub fn gateway(&self) -> &Gateway<L> {
        &self.gateway
    }

    /// Gateway, mutably
    pub fn gateway_mut(&mut self) -> &mut Gateway<L> {
        &mut self.gateway
    }

    /// Establish a session using the configured activation method
    pub fn activate(&mut self) -> Result<&SessionState, DeviceError<L::Error>> {
        match self.config.activation() {
            Activation::Abp(abp) => {
                let session = SessionState::from_abp(abp);
                info!(
                    dev_eui = %self.config.dev_eui(),
                    dev_addr = %session.dev_addr,
                    fcnt_up = session.fcnt_up,
                    "ABP activated"
                );
                Ok(self.session.insert(session))
            }
            Activation::Otaa(_) => self.join_otaa(),
        }
    }

    /// Join network using OTAA
    ///
    /// Each attempt sends a join request with a fresh DevNonce, issues a
    /// downlink pull and waits one receive window for the accept. Failed
    /// attempts back off according to the retry policy.
    pub fn join_otaa(&mut self) -> Result<&SessionState, DeviceError<L::Error>> {
        let credentials: OtaaCredentials = match self.config.activation() {
            Activation::Otaa(otaa) => otaa.clone(),
            Activation::Abp(_) => return Err(DeviceError::NotOtaa),
        };

        let max_attempts = self.retry.max_attempts.max(1);
        for attempt in 1..=max_attempts {
            match self.join_attempt(&credentials) {
                Ok(Some(session)) => {
                    info!(
                        dev_addr = %session.dev_addr,
                        dev_nonce = ?session.dev_nonce,
                        attempt,
                        "OTAA joined"
                    );
                    return Ok(self.session.insert(session));
                }
                Ok(None) => {
                    warn!(attempt, max_attempts, "timeout waiting for join accept");
                }
                Err(DeviceError::Join(JoinError::NoncesExhausted)) => {
                    return Err(DeviceError::Join(JoinError::NoncesExhausted));
                }
                Err(e) => {
                    warn!(attempt, max_attempts, "join attempt failed: {}", e);
                    self.handshake.abort_attempt();
                }
            }

            if attempt < max_attempts {
                let delay = self.retry.backoff(attempt, &mut self.rng);
                if !delay.is_zero() {
                    info!("retrying join in {:?}", delay);
                    thread::sleep(delay);
                }
            }
        }

        Err(DeviceError::JoinFailed {
            attempts: max_attempts,
        })
    }

    fn join_attempt(
        &mut self,
        credentials: &OtaaCredentials,
    ) -> Result<Option<SessionState>, DeviceError<L::Error>> {
        let request = self.handshake.build_request(credentials, &mut self.rng)?;
        self.gateway.push(&request)?;
        self.handshake.request_sent()?;
        info!(dev_nonce = ?self.handshake.dev_nonce(), "join request sent");

        self.gateway.pull()?;
        self.handshake.awaiting_accept()?;

        loop {
            let Some(downlink) = self.gateway.wait_for_downlink()? else {
                return Ok(None);
            };
            match self.handshake.accept(&downlink, credentials) {
                Ok(session) => return Ok(Some(session)),
                Err(JoinError::NotJoinAccept(mhdr)) => {
                    warn!("ignoring downlink with MHDR 0x{:02X} while joining", mhdr);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Build an uplink for the current frame counter and push it to the gateway
    ///
    /// The frame counter advances only after the gateway accepted the
    /// datagram; a failed send leaves it unchanged so the next frame reuses
    /// the value that never went out.
    pub fn send_uplink(
        &mut self,
        f_port: u8,
        payload: &[u8],
    ) -> Result<UplinkReport, DeviceError<L::Error>> {
        let session = self.session.as_mut().ok_or(DeviceError::NotActivated)?;

        let fcnt = session.fcnt_up;
        let frame = mac::build_uplink(session, f_port, payload)?;
        let token = self.gateway.push(&frame)?;
        if !session.increment_fcnt_up() {
            return Err(MacError::FrameCounterExhausted.into());
        }

        info!(fcnt, f_port, size = frame.len(), "uplink sent");
        Ok(UplinkReport {
            fcnt,
            token,
            size: frame.len(),
        })
    }
}
