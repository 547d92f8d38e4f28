//! LoRaWAN cryptographic operations
//!
//! This module provides cryptographic functions for LoRaWAN security:
//! - AES-128 single-block transforms
//! - Message Integrity Code (MIC) computation
//! - Payload encryption/decryption
//! - Join accept encryption
//! - Session key derivation
//!
//! Every function is a pure function of its inputs.

use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::Aes128;
use cmac::{Cmac, Mac};

use crate::config::{AESKey, DevAddr};

/// MIC size in bytes
pub const MIC_SIZE: usize = 4;

/// Block size for AES-128
pub const BLOCK_SIZE: usize = 16;

/// Crypto error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CryptoError {
    /// Message is empty; the B0 length byte would describe nothing
    #[error("cannot authenticate an empty message")]
    EmptyMessage,
    /// Message length does not fit the one-byte length field of B0
    #[error("message of {0} bytes is too long for a MIC block")]
    MessageTooLong(usize),
    /// Join accept body is not a whole number of AES blocks
    #[error("join accept body of {0} bytes is not a multiple of 16")]
    InvalidJoinAcceptLength(usize),
    /// Received MIC does not match the computed one
    #[error("MIC mismatch")]
    MicMismatch,
}

/// Direction identifiers for cryptographic operations
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Uplink (device to network)
    Up = 0,
    /// Downlink (network to device)
    Down = 1,
}

/// Session key selector for [`derive_session_key`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionKeyType {
    /// Network session key
    Network = 0x01,
    /// Application session key
    Application = 0x02,
}

/// Encrypt one block with AES-128 (ECB over a single block)
pub fn encrypt_block(key: &AESKey, block: &[u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
    let cipher = Aes128::new(key.as_bytes().into());
    let mut out = *block;
    cipher.encrypt_block((&mut out).into());
    out
}

/// Decrypt one block with AES-128; the inverse of [`encrypt_block`]
pub fn decrypt_block(key: &AESKey, block: &[u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE] {
    let cipher = Aes128::new(key.as_bytes().into());
    let mut out = *block;
    cipher.decrypt_block((&mut out).into());
    out
}

/// Build the B0 block prepended to data frames for MIC computation
///
/// The frame counter is the full 32-bit value, even though the frame header
/// only carries its low 16 bits.
pub fn mic_block(dev_addr: DevAddr, fcnt: u32, dir: Direction, len: u8) -> [u8; BLOCK_SIZE] {
    let mut b0 = [0u8; BLOCK_SIZE];
    b0[0] = 0x49;
    b0[5] = dir as u8;
    b0[6..10].copy_from_slice(&dev_addr.to_le_bytes());
    b0[10..14].copy_from_slice(&fcnt.to_le_bytes());
    b0[15] = len;
    b0
}

fn cmac_truncated(key: &AESKey, parts: &[&[u8]]) -> [u8; MIC_SIZE] {
    let mut mac = <Cmac<Aes128> as KeyInit>::new(key.as_bytes().into());
    for part in parts {
        mac.update(part);
    }
    let tag = mac.finalize().into_bytes();
    let mut mic = [0u8; MIC_SIZE];
    mic.copy_from_slice(&tag[..MIC_SIZE]);
    mic
}

/// Compute a MIC as the first four bytes of CMAC-AES128 over `b0 || message`
pub fn compute_mic(
    key: &AESKey,
    b0: &[u8; BLOCK_SIZE],
    message: &[u8],
) -> Result<[u8; MIC_SIZE], CryptoError> {
    if message.is_empty() {
        return Err(CryptoError::EmptyMessage);
    }
    Ok(cmac_truncated(key, &[&b0[..], message]))
}

/// Compute the MIC of a data frame
///
/// # Arguments
/// * `key` - Network session key
/// * `message` - `MHDR || MACPayload`
/// * `dev_addr` - Device address
/// * `fcnt` - Full 32-bit frame counter
/// * `dir` - Message direction
pub fn compute_data_mic(
    key: &AESKey,
    message: &[u8],
    dev_addr: DevAddr,
    fcnt: u32,
    dir: Direction,
) -> Result<[u8; MIC_SIZE], CryptoError> {
    let len = u8::try_from(message.len()).map_err(|_| CryptoError::MessageTooLong(message.len()))?;
    compute_mic(key, &mic_block(dev_addr, fcnt, dir, len), message)
}

/// Compute the MIC of a join request or join accept
///
/// Join messages are authenticated with the application key over the
/// message bytes directly, without a B0 block.
pub fn compute_join_mic(key: &AESKey, message: &[u8]) -> Result<[u8; MIC_SIZE], CryptoError> {
    if message.is_empty() {
        return Err(CryptoError::EmptyMessage);
    }
    Ok(cmac_truncated(key, &[message]))
}

/// Encrypt or decrypt FRMPayload with the LoRaWAN counter-mode keystream
///
/// Block `k` (starting at 1) of the keystream is
/// `AES(key, 0x01 || 0^4 || dir || DevAddr || FCnt || 0x00 || k)`. The last
/// block is truncated to the remaining payload, so the output has the same
/// length as the input. Applying the function twice returns the input.
///
/// # Arguments
/// * `key` - AES key for encryption/decryption
/// * `dev_addr` - Device address
/// * `fcnt` - Frame counter
/// * `dir` - Message direction
/// * `payload` - Data to encrypt/decrypt
pub fn encrypt_payload(
    key: &AESKey,
    dev_addr: DevAddr,
    fcnt: u32,
    dir: Direction,
    payload: &[u8],
) -> Vec<u8> {
    let cipher = Aes128::new(key.as_bytes().into());
    let mut result = Vec::with_capacity(payload.len());

    for (i, chunk) in payload.chunks(BLOCK_SIZE).enumerate() {
        let mut s = [0u8; BLOCK_SIZE];
        s[0] = 0x01;
        s[5] = dir as u8;
        s[6..10].copy_from_slice(&dev_addr.to_le_bytes());
        s[10..14].copy_from_slice(&fcnt.to_le_bytes());
        // block counter wraps after 255 blocks; LoRaWAN payloads never get there
        s[15] = (i + 1) as u8;
        cipher.encrypt_block((&mut s).into());

        result.extend(chunk.iter().zip(s.iter()).map(|(p, k)| p ^ k));
    }

    result
}

/// Encrypt a join accept body the way the network server does
///
/// The network uses the AES *decrypt* operation so that end-devices only
/// need AES encrypt to recover the message.
pub fn encrypt_join_accept(key: &AESKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    join_accept_blocks(key, data, decrypt_block)
}

/// Recover a join accept body (everything after MHDR, MIC included)
///
/// This is the exact inverse of [`encrypt_join_accept`].
pub fn decrypt_join_accept(key: &AESKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    join_accept_blocks(key, data, encrypt_block)
}

fn join_accept_blocks(
    key: &AESKey,
    data: &[u8],
    transform: fn(&AESKey, &[u8; BLOCK_SIZE]) -> [u8; BLOCK_SIZE],
) -> Result<Vec<u8>, CryptoError> {
    if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
        return Err(CryptoError::InvalidJoinAcceptLength(data.len()));
    }

    let mut result = Vec::with_capacity(data.len());
    for chunk in data.chunks_exact(BLOCK_SIZE) {
        let mut block = [0u8; BLOCK_SIZE];
        block.copy_from_slice(chunk);
        result.extend_from_slice(&transform(key, &block));
    }
    Ok(result)
}

/// Derive one session key from the join exchange
///
/// `AES(AppKey, type || AppNonce || NetID || DevNonce || pad16)`, with the
/// device nonce in the little-endian order it was sent in.
pub fn derive_session_key(
    app_key: &AESKey,
    key_type: SessionKeyType,
    app_nonce: &[u8; 3],
    net_id: &[u8; 3],
    dev_nonce: u16,
) -> AESKey {
    let mut block = [0u8; BLOCK_SIZE];
    block[0] = key_type as u8;
    block[1..4].copy_from_slice(app_nonce);
    block[4..7].copy_from_slice(net_id);
    block[7..9].copy_from_slice(&dev_nonce.to_le_bytes());
    AESKey::new(encrypt_block(app_key, &block))
}

/// Derive network and application session keys from join accept
///
/// # Arguments
/// * `app_key` - Application key
/// * `app_nonce` - Application nonce from join accept
/// * `net_id` - Network ID from join accept
/// * `dev_nonce` - Device nonce from join request
pub fn derive_session_keys(
    app_key: &AESKey,
    app_nonce: &[u8; 3],
    net_id: &[u8; 3],
    dev_nonce: u16,
) -> (AESKey, AESKey) {
    (
        derive_session_key(app_key, SessionKeyType::Network, app_nonce, net_id, dev_nonce),
        derive_session_key(app_key, SessionKeyType::Application, app_nonce, net_id, dev_nonce),
    )
}
