use super::{AESKey, DevAddr, EUI64};

/// Device activation state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivationState {
    /// Device is activated through OTAA
    OTAAActivated,
    /// Device is activated through ABP
    ABPActivated,
}

/// Root credentials for Over-The-Air Activation
#[derive(Debug, Clone, PartialEq)]
pub struct OtaaCredentials {
    /// Device EUI
    pub dev_eui: EUI64,
    /// Join server EUI (AppEUI in LoRaWAN 1.0)
    pub join_eui: EUI64,
    /// Application key, used only to derive session keys
    pub app_key: AESKey,
}

/// Pre-provisioned session for Activation By Personalization
#[derive(Debug, Clone, PartialEq)]
pub struct AbpCredentials {
    /// Static device address
    pub dev_addr: DevAddr,
    /// Network session key
    pub nwk_skey: AESKey,
    /// Application session key
    pub app_skey: AESKey,
    /// First uplink frame counter to use
    pub fcnt_up: u32,
}

/// How the device obtains its session
#[derive(Debug, Clone, PartialEq)]
pub enum Activation {
    /// Join handshake with the network
    Otaa(OtaaCredentials),
    /// Static session parameters
    Abp(AbpCredentials),
}

/// Device configuration for both OTAA and ABP activation
///
/// Built through [`DeviceConfig::new_otaa`] or [`DeviceConfig::new_abp`] so
/// the device EUI always matches the one in the OTAA credentials.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceConfig {
    dev_eui: EUI64,
    activation: Activation,
}

/// Session state for an activated device
///
/// A session can only be built with all three keyed fields present, so any
/// `SessionState` value is usable for uplinks.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    /// How the session was established
    pub activation_state: ActivationState,
    /// Device address (assigned during activation)
    pub dev_addr: DevAddr,
    /// Network session key
    pub nwk_skey: AESKey,
    /// Application session key
    pub app_skey: AESKey,
    /// Uplink frame counter
    pub fcnt_up: u32,
    /// Device nonce the session was joined with (OTAA only)
    pub dev_nonce: Option<u16>,
    /// Network identifier from the join accept (OTAA only)
    pub net_id: Option<[u8; 3]>,
}

impl DeviceConfig {
    /// Create a new OTAA device configuration
    pub fn new_otaa(dev_eui: EUI64, join_eui: EUI64, app_key: AESKey) -> Self {
        Self {
            dev_eui,
            activation: Activation::Otaa(OtaaCredentials {
                dev_eui,
                join_eui,
                app_key,
            }),
        }
    }

    /// Create a new ABP device configuration
    pub fn new_abp(dev_eui: EUI64, dev_addr: DevAddr, nwk_skey: AESKey, app_skey: AESKey) -> Self {
        Self {
            dev_eui,
            activation: Activation::Abp(AbpCredentials {
                dev_addr,
                nwk_skey,
                app_skey,
                fcnt_up: 0,
            }),
        }
    }

    /// Start ABP uplinks from a specific frame counter
    pub fn with_abp_frame_counter(mut self, fcnt_up: u32) -> Self {
        if let Activation::Abp(abp) = &mut self.activation {
            abp.fcnt_up = fcnt_up;
        }
        self
    }

    /// Device EUI (unique device identifier)
    pub fn dev_eui(&self) -> &EUI64 {
        &self.dev_eui
    }

    /// Activation credentials
    pub fn activation(&self) -> &Activation {
        &self.activation
    }

    /// Whether this device joins over the air
    pub fn is_otaa(&self) -> bool {
        matches!(self.activation, Activation::Otaa(_))
    }
}

impl SessionState {
    /// Create a new session state for ABP activation
    pub fn new_abp(dev_addr: DevAddr, nwk_skey: AESKey, app_skey: AESKey) -> Self {
        Self {
            activation_state: ActivationState::ABPActivated,
            dev_addr,
            nwk_skey,
            app_skey,
            fcnt_up: 0,
            dev_nonce: None,
            net_id: None,
        }
    }

    /// Create a new session state for OTAA activation
    pub fn new_otaa(
        dev_addr: DevAddr,
        nwk_skey: AESKey,
        app_skey: AESKey,
        dev_nonce: u16,
        net_id: [u8; 3],
    ) -> Self {
        Self {
            activation_state: ActivationState::OTAAActivated,
            dev_addr,
            nwk_skey,
            app_skey,
            fcnt_up: 0,
            dev_nonce: Some(dev_nonce),
            net_id: Some(net_id),
        }
    }

    /// Build the session described by ABP credentials
    pub fn from_abp(abp: &AbpCredentials) -> Self {
        let mut session = Self::new_abp(abp.dev_addr, abp.nwk_skey, abp.app_skey);
        session.fcnt_up = abp.fcnt_up;
        session
    }

    /// Whether the uplink counter can still produce a fresh value
    ///
    /// `u32::MAX` is never put on the air, so the counter never wraps.
    pub fn fcnt_up_available(&self) -> bool {
        self.fcnt_up < u32::MAX
    }

    /// Advance the uplink frame counter after a frame has been handed to
    /// the transport. Returns `false` if the counter space is exhausted.
    pub fn increment_fcnt_up(&mut self) -> bool {
        match self.fcnt_up.checked_add(1) {
            Some(next) => {
                self.fcnt_up = next;
                true
            }
            None => false,
        }
    }
}
