//! Emulated packet-forwarder gateway
//!
//! The gateway wraps a [`Link`] to the network server. It frames PHY
//! payloads as PUSH_DATA, issues PULL_DATA to open the downlink path and
//! waits for PULL_RESP datagrams carrying downlinks.

/// Packet-forwarder datagram codec
pub mod codec;

/// Transport trait
pub mod traits;

/// UDP transport
pub mod udp;

use std::time::{Duration, Instant};

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, warn};

use crate::config::EUI64;
use crate::lorawan::PhyConfig;
use codec::{CodecError, Datagram, RxPk};

pub use traits::Link;
pub use udp::UdpLink;

/// Largest datagram accepted from the network server
pub const MAX_DATAGRAM_SIZE: usize = 2048;

/// Gateway error
#[derive(Debug, thiserror::Error)]
pub enum GatewayError<E> {
    /// The link failed to send or receive
    #[error("link failure: {0}")]
    Link(E),
    /// A datagram could not be encoded or decoded
    #[error("codec failure: {0}")]
    Codec(CodecError),
}

impl<E> From<CodecError> for GatewayError<E> {
    fn from(error: CodecError) -> Self {
        GatewayError::Codec(error)
    }
}

/// Emulated gateway
pub struct Gateway<L: Link> {
    link: L,
    eui: EUI64,
    phy: PhyConfig,
    receive_timeout: Duration,
    rng: StdRng,
    buffer: Vec<u8>,
}

impl<L: Link> Gateway<L> {
    /// Create a gateway with an entropy-seeded token generator
    pub fn new(link: L, eui: EUI64, phy: PhyConfig, receive_timeout: Duration) -> Self {
        Self::with_rng(link, eui, phy, receive_timeout, StdRng::from_entropy())
    }

    /// Create a gateway drawing tokens from `rng`
    pub fn with_rng(
        link: L,
        eui: EUI64,
        phy: PhyConfig,
        receive_timeout: Duration,
        rng: StdRng,
    ) -> Self {
        Self {
            link,
            eui,
            phy,
            receive_timeout,
            rng,
            buffer: vec![0u8; MAX_DATAGRAM_SIZE],
        }
    }

    /// Gateway EUI
    pub fn eui(&self) -> &EUI64 {
        &self.eui
    }

    /// Simulated radio parameters
    pub fn phy(&self) -> &PhyConfig {
        &self.phy
    }

    /// Underlying link
    pub fn link(&self) -> &L {
        &self.link
    }

    /// Underlying link, mutably
    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    fn send(&mut self, datagram: &[u8]) -> Result<(), GatewayError<L::Error>> {
        self.link.send(datagram).map_err(GatewayError::Link)
    }

    /// Report `phy_payload` upstream in a PUSH_DATA datagram
    ///
    /// Returns the datagram token.
    pub fn push(&mut self, phy_payload: &[u8]) -> Result<u16, GatewayError<L::Error>> {
        let token: u16 = self.rng.gen();
        let rxpk = RxPk::new(phy_payload, &self.phy, Utc::now());
        let datagram = codec::encode_push(token, &self.eui, rxpk)?;
        self.send(&datagram)?;
        debug!(token, size = phy_payload.len(), "PUSH_DATA sent");
        Ok(token)
    }

    /// Send a PULL_DATA keepalive so the server can route downlinks to us
    pub fn pull(&mut self) -> Result<u16, GatewayError<L::Error>> {
        let token: u16 = self.rng.gen();
        let datagram = codec::encode_pull(token, &self.eui);
        self.send(&datagram)?;
        debug!(token, "PULL_DATA sent");
        Ok(token)
    }

    /// Receive and decode one datagram
    pub fn receive(&mut self) -> nb::Result<Datagram, GatewayError<L::Error>> {
        let len = self
            .link
            .receive(&mut self.buffer)
            .map_err(|e| e.map(GatewayError::Link))?;
        codec::decode_datagram(&self.buffer[..len])
            .map_err(|e| nb::Error::Other(GatewayError::Codec(e)))
    }

    /// Wait up to the receive timeout for a downlink
    ///
    /// Acknowledgements are skipped and malformed datagrams are logged and
    /// dropped. A received PULL_RESP is answered with TX_ACK and its PHY
    /// payload returned; `None` means the window closed without one.
    ///
    /// Each receive is bounded by the time left in the window, so the wait
    /// never outlasts the receive timeout however many datagrams arrive.
    pub fn wait_for_downlink(&mut self) -> Result<Option<Vec<u8>>, GatewayError<L::Error>> {
        let deadline = Instant::now() + self.receive_timeout;
        let result = self.receive_until(deadline);

        if let Err(e) = self.link.set_receive_timeout(self.receive_timeout) {
            warn!("failed to restore receive timeout: {}", e);
        }
        result
    }

    fn receive_until(
        &mut self,
        deadline: Instant,
    ) -> Result<Option<Vec<u8>>, GatewayError<L::Error>> {
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }
            self.link
                .set_receive_timeout(remaining)
                .map_err(GatewayError::Link)?;

            match self.receive() {
                Ok(Datagram::PullResp { token, payload, .. }) => {
                    debug!(token, size = payload.len(), "PULL_RESP received");
                    let ack = codec::encode_tx_ack(token, &self.eui);
                    if let Err(e) = self.send(&ack) {
                        warn!("failed to send TX_ACK: {}", e);
                    }
                    return Ok(Some(payload));
                }
                Ok(other) => {
                    debug!(identifier = ?other.identifier(), token = other.token(), "datagram skipped");
                }
                Err(nb::Error::WouldBlock) => return Ok(None),
                Err(nb::Error::Other(GatewayError::Codec(e))) => {
                    warn!("dropping malformed datagram: {}", e);
                }
                Err(nb::Error::Other(e)) => return Err(e),
            }
        }
    }
}
