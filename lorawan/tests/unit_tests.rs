use hex_literal::hex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Duration;

use lorawan_sim::{
    config::{AESKey, Activation, DevAddr, DeviceConfig, OtaaCredentials, SessionState, EUI64},
    crypto::{self, CryptoError, Direction},
    lorawan::{
        join::{JoinAccept, JoinError, JoinHandshake, JoinState, RetryPolicy},
        mac::{self, MacError, MAX_MAC_PAYLOAD_SIZE},
        phy::ModulationParams,
    },
};

const KEY: AESKey = AESKey::new(hex!("0123456789ABCDEF0123456789ABCDEF"));
const DEV_ADDR: DevAddr = DevAddr::new(hex!("12345678"));

/// Join accept for AppNonce 010203, NetID 000013, DevAddr 26011234,
/// DLSettings 00, RxDelay 01
const JOIN_ACCEPT: [u8; 17] = hex!("201c933daf55b9c0025920d1d984dea8ba");

/// Same accept with a CFList
const JOIN_ACCEPT_CFLIST: [u8; 33] = hex!(
    "204dcd397a3b983ef967a9d6cce901c576c62d320a541a0cc33d1a058057f22d76"
);

fn otaa_credentials() -> OtaaCredentials {
    OtaaCredentials {
        dev_eui: EUI64::new(hex!("0123456789ABCDEF")),
        join_eui: EUI64::new(hex!("123400000000000F")),
        app_key: KEY,
    }
}

fn abp_session(fcnt_up: u32) -> SessionState {
    let mut session = SessionState::new_abp(DEV_ADDR, KEY, KEY);
    session.fcnt_up = fcnt_up;
    session
}

#[test]
fn test_identifier_byte_order() {
    let eui: EUI64 = "12:34:00:00:00:00:00:0F".parse().unwrap();
    assert_eq!(eui.as_bytes(), &hex!("123400000000000F"));
    assert_eq!(eui.to_le_bytes(), hex!("0F00000000003412"));
    assert_eq!(eui.to_string(), "123400000000000F");

    let addr = DevAddr::from_le_bytes(hex!("78563412"));
    assert_eq!(addr, DEV_ADDR);
    assert_eq!(format!("{:?}", KEY), "AESKey(..)");

    assert!("1234".parse::<EUI64>().is_err());
    assert!("zz345678".parse::<DevAddr>().is_err());
}

#[test]
fn test_device_config() {
    let config = DeviceConfig::new_abp(EUI64::default(), DEV_ADDR, KEY, KEY).with_abp_frame_counter(7);
    assert!(!config.is_otaa());

    let config = DeviceConfig::new_otaa(EUI64::new([0x01; 8]), EUI64::new([0x02; 8]), KEY);
    assert!(config.is_otaa());
    assert_eq!(config.dev_eui(), &EUI64::new([0x01; 8]));
    match config.activation() {
        Activation::Otaa(otaa) => assert_eq!(&otaa.dev_eui, config.dev_eui()),
        other => panic!("expected OTAA credentials, got {:?}", other),
    }
}

#[test]
fn test_session_counter_never_wraps() {
    let mut session = abp_session(u32::MAX - 1);
    assert!(session.fcnt_up_available());
    assert!(session.increment_fcnt_up());
    assert_eq!(session.fcnt_up, u32::MAX);
    assert!(!session.fcnt_up_available());
    assert!(!session.increment_fcnt_up());
    assert_eq!(session.fcnt_up, u32::MAX);
}

#[test]
fn test_session_key_derivation() {
    let (nwk, app) = crypto::derive_session_keys(&KEY, &[0; 3], &[0; 3], 0);
    assert_eq!(nwk.as_bytes(), &hex!("0694267ba398480c6b2b9f649be476cb"));
    assert_eq!(app.as_bytes(), &hex!("282f7b11019800f8a978c6f750827ab5"));
    assert_ne!(nwk, app);
}

#[test]
fn test_payload_keystream() {
    let payload: Vec<u8> = (0u8..20).collect();
    let encrypted = crypto::encrypt_payload(&KEY, DEV_ADDR, 5, Direction::Up, &payload);
    assert_eq!(encrypted, hex!("5aaa05a71745dd9e99b32e9ae03b4dd4ea1f80e8"));

    // Keystream blocks start at counter 1 and the tail block is truncated
    let ks1 = hex!("5aab07a41340db9991ba2491ec3643db");
    let ks2 = hex!("fa0e92fb8a9b9729f8ce613118e8ac73");
    for (i, byte) in encrypted.iter().enumerate() {
        let ks = if i < 16 { ks1[i] } else { ks2[i - 16] };
        assert_eq!(*byte, payload[i] ^ ks);
    }

    let decrypted = crypto::encrypt_payload(&KEY, DEV_ADDR, 5, Direction::Up, &encrypted);
    assert_eq!(decrypted, payload);
}

#[test]
fn test_payload_encryption_depends_on_direction_and_counter() {
    let payload = [0u8; 16];
    let up = crypto::encrypt_payload(&KEY, DEV_ADDR, 1, Direction::Up, &payload);
    let down = crypto::encrypt_payload(&KEY, DEV_ADDR, 1, Direction::Down, &payload);
    let next = crypto::encrypt_payload(&KEY, DEV_ADDR, 2, Direction::Up, &payload);
    assert_ne!(up, down);
    assert_ne!(up, next);
    assert!(crypto::encrypt_payload(&KEY, DEV_ADDR, 1, Direction::Up, &[]).is_empty());
}

#[test]
fn test_mic_inputs() {
    let msg = hex!("4078563412000000010902");
    let mic = crypto::compute_data_mic(&KEY, &msg, DEV_ADDR, 0, Direction::Up).unwrap();
    assert_eq!(
        mic,
        crypto::compute_data_mic(&KEY, &msg, DEV_ADDR, 0, Direction::Up).unwrap()
    );
    assert_ne!(
        mic,
        crypto::compute_data_mic(&KEY, &msg, DEV_ADDR, 0x10000, Direction::Up).unwrap()
    );

    assert_eq!(
        crypto::compute_data_mic(&KEY, &[], DEV_ADDR, 0, Direction::Up),
        Err(CryptoError::EmptyMessage)
    );
    assert_eq!(
        crypto::compute_data_mic(&KEY, &[0u8; 256], DEV_ADDR, 0, Direction::Up),
        Err(CryptoError::MessageTooLong(256))
    );

    let b0 = crypto::mic_block(DEV_ADDR, 0x0102_0304, Direction::Down, 13);
    assert_eq!(b0, hex!("4900000000017856341204030201000d"));
}

#[test]
fn test_join_request_frame() {
    let frame = mac::build_join_request(&otaa_credentials(), 0x2A1F).unwrap();
    assert_eq!(frame.len(), mac::JOIN_REQUEST_SIZE);
    assert_eq!(&frame[..], &hex!("000f00000000003412efcdab89674523011f2a4586f066"));
}

#[test]
fn test_uplink_frames() {
    let frame = mac::build_uplink(&abp_session(0), 1, &[0x00]).unwrap();
    assert_eq!(&frame[..], &hex!("40785634120000000109e01bc35a"));

    let frame = mac::build_uplink(&abp_session(1), 1, &[0x00]).unwrap();
    assert_eq!(&frame[..], &hex!("4078563412000100010c8024110e"));

    // Only the low 16 bits travel in FCnt; the MIC covers all 32
    let frame = mac::build_uplink(&abp_session(0x10002), 1, &[0x00]).unwrap();
    assert_eq!(&frame[..], &hex!("40785634120002000128689c887f"));
}

#[test]
fn test_uplink_does_not_touch_session() {
    let session = abp_session(9);
    mac::build_uplink(&session, 1, b"hello").unwrap();
    assert_eq!(session.fcnt_up, 9);
}

#[test]
fn test_uplink_limits() {
    let session = abp_session(0);

    let frame = mac::build_uplink(&session, 1, &[0xAB; MAX_MAC_PAYLOAD_SIZE]).unwrap();
    assert_eq!(frame.len(), 1 + 7 + 1 + MAX_MAC_PAYLOAD_SIZE + 4);

    assert_eq!(
        mac::build_uplink(&session, 1, &[0; MAX_MAC_PAYLOAD_SIZE + 1]),
        Err(MacError::PayloadTooLarge(243))
    );
    assert_eq!(mac::build_uplink(&session, 0, b"x"), Err(MacError::InvalidPort(0)));
    assert_eq!(mac::build_uplink(&session, 224, b"x"), Err(MacError::InvalidPort(224)));
    assert!(mac::build_uplink(&session, 223, b"x").is_ok());

    assert_eq!(
        mac::build_uplink(&abp_session(u32::MAX), 1, b"x"),
        Err(MacError::FrameCounterExhausted)
    );
}

#[test]
fn test_parse_own_uplink() {
    let session = abp_session(0x0001_0005);
    let frame = mac::build_uplink(&session, 42, b"temperature").unwrap();

    let parsed = mac::parse_data_frame(&frame, &KEY, 0x0001_0005, Direction::Up).unwrap();
    assert_eq!(parsed.dev_addr, DEV_ADDR);
    assert_eq!(parsed.f_cnt, 5);
    assert_eq!(parsed.f_port, Some(42));
    let plain = crypto::encrypt_payload(&KEY, DEV_ADDR, 0x0001_0005, Direction::Up, &parsed.frm_payload);
    assert_eq!(plain, b"temperature");

    // Wrong upper counter bits or a flipped bit both fail the MIC
    assert_eq!(
        mac::parse_data_frame(&frame, &KEY, 5, Direction::Up),
        Err(MacError::Crypto(CryptoError::MicMismatch))
    );
    let mut corrupted = frame.clone();
    corrupted[10] ^= 0x01;
    assert_eq!(
        mac::parse_data_frame(&corrupted, &KEY, 0x0001_0005, Direction::Up),
        Err(MacError::Crypto(CryptoError::MicMismatch))
    );
    assert_eq!(
        mac::parse_data_frame(&frame[..8], &KEY, 0, Direction::Up),
        Err(MacError::BufferTooSmall)
    );
}

#[test]
fn test_join_accept_transform_round_trip() {
    let plain = hex!("010203000013341201260001c7d7d44e");
    let wire = crypto::encrypt_join_accept(&KEY, &plain).unwrap();
    assert_eq!(&wire[..], &JOIN_ACCEPT[1..]);
    assert_eq!(crypto::decrypt_join_accept(&KEY, &wire).unwrap(), plain);

    assert_eq!(
        crypto::decrypt_join_accept(&KEY, &[0u8; 15]),
        Err(CryptoError::InvalidJoinAcceptLength(15))
    );
    assert_eq!(
        crypto::decrypt_join_accept(&KEY, &[]),
        Err(CryptoError::InvalidJoinAcceptLength(0))
    );
}

#[test]
fn test_parse_join_accept() {
    let expected = JoinAccept {
        app_nonce: hex!("010203"),
        net_id: hex!("000013"),
        dev_addr: DevAddr::new(hex!("26011234")),
        dl_settings: 0x00,
        rx_delay: 0x01,
    };
    let credentials = otaa_credentials();

    assert_eq!(JoinAccept::parse(&JOIN_ACCEPT, &credentials).unwrap(), expected);
    assert_eq!(JoinAccept::parse(&JOIN_ACCEPT_CFLIST, &credentials).unwrap(), expected);
}

#[test]
fn test_parse_join_accept_rejects() {
    let credentials = otaa_credentials();

    let mut tampered = JOIN_ACCEPT;
    tampered[16] ^= 0x80;
    assert_eq!(JoinAccept::parse(&tampered, &credentials), Err(JoinError::InvalidMic));

    let wrong_key = OtaaCredentials {
        app_key: AESKey::new([0x55; 16]),
        ..credentials.clone()
    };
    assert_eq!(JoinAccept::parse(&JOIN_ACCEPT, &wrong_key), Err(JoinError::InvalidMic));

    assert_eq!(
        JoinAccept::parse(&JOIN_ACCEPT[..16], &credentials),
        Err(JoinError::InvalidLength(16))
    );
    assert_eq!(JoinAccept::parse(&[], &credentials), Err(JoinError::InvalidLength(0)));

    let uplink = hex!("40785634120000000109e01bc35a");
    assert_eq!(
        JoinAccept::parse(&uplink, &credentials),
        Err(JoinError::NotJoinAccept(0x40))
    );
}

#[test]
fn test_handshake_transitions() {
    let credentials = otaa_credentials();
    let mut rng = StdRng::seed_from_u64(1);
    let mut handshake = JoinHandshake::new();
    assert_eq!(handshake.state(), JoinState::Unjoined);

    // Out-of-order steps are rejected
    assert_eq!(
        handshake.request_sent(),
        Err(JoinError::InvalidState(JoinState::Unjoined))
    );
    assert_eq!(
        handshake.accept(&JOIN_ACCEPT, &credentials),
        Err(JoinError::InvalidState(JoinState::Unjoined))
    );

    let request = handshake.build_request(&credentials, &mut rng).unwrap();
    let dev_nonce = handshake.dev_nonce().unwrap();
    assert_eq!(&request[17..19], &dev_nonce.to_le_bytes());

    handshake.request_sent().unwrap();
    assert_eq!(handshake.state(), JoinState::RequestSent);
    assert!(handshake.build_request(&credentials, &mut rng).is_err());

    handshake.awaiting_accept().unwrap();
    assert_eq!(handshake.state(), JoinState::AwaitingAccept);

    // A forged accept leaves the handshake waiting
    let mut tampered = JOIN_ACCEPT;
    tampered[5] ^= 0x01;
    assert_eq!(handshake.accept(&tampered, &credentials), Err(JoinError::InvalidMic));
    assert_eq!(handshake.state(), JoinState::AwaitingAccept);

    let session = handshake.accept(&JOIN_ACCEPT, &credentials).unwrap();
    assert_eq!(handshake.state(), JoinState::Joined);
    assert_eq!(session.dev_addr, DevAddr::new(hex!("26011234")));
    assert_eq!(session.dev_nonce, Some(dev_nonce));
    assert_eq!(session.net_id, Some(hex!("000013")));
    assert_eq!(session.fcnt_up, 0);

    let (nwk, app) = crypto::derive_session_keys(&KEY, &hex!("010203"), &hex!("000013"), dev_nonce);
    assert_eq!(session.nwk_skey, nwk);
    assert_eq!(session.app_skey, app);

    assert!(handshake.build_request(&credentials, &mut rng).is_err());
}

#[test]
fn test_join_session_keys() {
    let (nwk, app) = crypto::derive_session_keys(&KEY, &hex!("010203"), &hex!("000013"), 0x2A1F);
    assert_eq!(nwk.as_bytes(), &hex!("31e23b7b7b0cfe21aace3352dd6572fd"));
    assert_eq!(app.as_bytes(), &hex!("7b9207f1c2cd6ae1a6ef13eae2de2c83"));
}

#[test]
fn test_dev_nonces_are_unique() {
    let credentials = otaa_credentials();
    let mut rng = StdRng::seed_from_u64(42);
    let mut handshake = JoinHandshake::new();
    let mut seen = std::collections::HashSet::new();

    for _ in 0..2000 {
        handshake.build_request(&credentials, &mut rng).unwrap();
        handshake.request_sent().unwrap();
        handshake.awaiting_accept().unwrap();
        assert!(seen.insert(handshake.dev_nonce().unwrap()));
    }
    assert_eq!(handshake.attempts(), 2000);
}

#[test]
fn test_abort_attempt_allows_retry() {
    let credentials = otaa_credentials();
    let mut rng = StdRng::seed_from_u64(3);
    let mut handshake = JoinHandshake::new();

    handshake.build_request(&credentials, &mut rng).unwrap();
    handshake.request_sent().unwrap();
    let first = handshake.dev_nonce();
    handshake.abort_attempt();
    assert_eq!(handshake.state(), JoinState::Unjoined);
    assert_eq!(handshake.dev_nonce(), None);

    handshake.build_request(&credentials, &mut rng).unwrap();
    assert_ne!(handshake.dev_nonce(), first);
}

#[test]
fn test_retry_backoff() {
    let mut rng = StdRng::seed_from_u64(0);
    let policy = RetryPolicy {
        max_attempts: 10,
        initial_backoff: Duration::from_secs(1),
        max_backoff: Duration::from_secs(10),
        jitter: 0.0,
    };
    let delays: Vec<u64> = (1..=6).map(|n| policy.backoff(n, &mut rng).as_secs()).collect();
    assert_eq!(delays, vec![1, 2, 4, 8, 10, 10]);
    assert_eq!(policy.backoff(100, &mut rng), Duration::from_secs(10));

    let jittered = RetryPolicy {
        jitter: 0.2,
        ..policy
    };
    for n in 1..=8 {
        let base = policy.backoff(n, &mut rng).as_secs_f64();
        let delay = jittered.backoff(n, &mut rng).as_secs_f64();
        assert!(delay >= base * 0.8 - 1e-6 && delay <= base * 1.2 + 1e-6);
    }

    let zero = RetryPolicy {
        initial_backoff: Duration::ZERO,
        ..RetryPolicy::default()
    };
    assert_eq!(zero.backoff(5, &mut rng), Duration::ZERO);
}

#[test]
fn test_non_finite_jitter_is_ignored() {
    let mut rng = StdRng::seed_from_u64(0);
    for jitter in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            jitter,
        };
        assert_eq!(policy.backoff(3, &mut rng), Duration::from_secs(4));
    }
}

#[test]
fn test_modulation_params() {
    let params = ModulationParams::parse("SF12BW500", "4/8").unwrap();
    assert_eq!(params.spreading_factor, 12);
    assert_eq!(params.bandwidth, 500_000);
    assert_eq!(params.datr(), "SF12BW500");
    assert_eq!(params.codr(), "4/8");

    let default = ModulationParams::default();
    assert_eq!(default.datr(), "SF7BW125");
    assert_eq!(default.codr(), "4/5");
    assert_eq!("SF7BW125".parse::<ModulationParams>().unwrap(), default);

    assert!(ModulationParams::parse("SF13BW125", "4/5").is_err());
    assert!(ModulationParams::parse("SF7BW100", "4/5").is_err());
    assert!(ModulationParams::parse("SF7BW125", "4/9").is_err());
    assert!(ModulationParams::parse("LORA", "4/5").is_err());
}
