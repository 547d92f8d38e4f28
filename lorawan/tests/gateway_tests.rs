use std::net::UdpSocket;
use std::thread;
use std::time::{Duration, Instant};

use hex_literal::hex;

use lorawan_sim::{
    config::EUI64,
    gateway::{
        codec::{self, Datagram, Identifier},
        Gateway, Link, UdpLink,
    },
    lorawan::PhyConfig,
};

use mock::MockLink;

const GATEWAY_EUI: EUI64 = EUI64::new(hex!("F000000000000001"));
const JOIN_ACCEPT: [u8; 17] = hex!("201c933daf55b9c0025920d1d984dea8ba");

/// Loopback stand-in for the network server
fn server() -> UdpSocket {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    socket
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    socket
}

#[test]
fn test_udp_receive_timeout_would_block() {
    let server = server();
    let mut link = UdpLink::connect(server.local_addr().unwrap(), Duration::from_millis(100)).unwrap();

    let mut buffer = [0u8; 64];
    let start = Instant::now();
    assert!(matches!(
        link.receive(&mut buffer),
        Err(nb::Error::WouldBlock)
    ));
    assert!(start.elapsed() >= Duration::from_millis(50));
}

#[test]
fn test_udp_round_trip() {
    let server = server();
    let mut link = UdpLink::connect(server.local_addr().unwrap(), Duration::from_secs(1)).unwrap();
    assert_eq!(link.server(), server.local_addr().unwrap());

    link.send(b"uplink").unwrap();
    let mut buffer = [0u8; 64];
    let (len, peer) = server.recv_from(&mut buffer).unwrap();
    assert_eq!(&buffer[..len], b"uplink");

    server.send_to(b"downlink", peer).unwrap();
    let len = link.receive(&mut buffer).unwrap();
    assert_eq!(&buffer[..len], b"downlink");
}

#[test]
fn test_downlink_wait_shrinks_receive_timeout() {
    let mut link = MockLink::new();
    link.push_rx(codec::encode_ack(1, Identifier::PushAck));
    link.push_rx(codec::encode_ack(2, Identifier::PullAck));
    link.push_timeout();

    let window = Duration::from_millis(50);
    let mut gateway = Gateway::new(link, GATEWAY_EUI, PhyConfig::default(), window);
    assert_eq!(gateway.wait_for_downlink().unwrap(), None);

    let timeouts = gateway.link().timeouts();
    assert_eq!(timeouts.len(), 4);
    assert!(timeouts[..3].iter().all(|t| *t <= window));
    assert!(timeouts[..3].windows(2).all(|w| w[1] <= w[0]));
    // The full window is restored for later receives
    assert_eq!(timeouts[3], window);
}

#[test]
fn test_late_ack_does_not_extend_downlink_wait() {
    let server = server();
    let link = UdpLink::connect(server.local_addr().unwrap(), Duration::from_millis(400)).unwrap();
    let mut gateway = Gateway::new(
        link,
        GATEWAY_EUI,
        PhyConfig::default(),
        Duration::from_millis(400),
    );

    let token = gateway.pull().unwrap();
    let mut buffer = [0u8; 64];
    let (_, peer) = server.recv_from(&mut buffer).unwrap();

    let ack = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        server
            .send_to(&codec::encode_ack(token, Identifier::PullAck), peer)
            .unwrap();
    });

    let start = Instant::now();
    assert_eq!(gateway.wait_for_downlink().unwrap(), None);
    let elapsed = start.elapsed();
    ack.join().unwrap();

    assert!(elapsed >= Duration::from_millis(300), "{:?}", elapsed);
    assert!(elapsed < Duration::from_millis(650), "{:?}", elapsed);
}

#[test]
fn test_udp_downlink_is_acknowledged() {
    let server = server();
    let link = UdpLink::connect(server.local_addr().unwrap(), Duration::from_secs(1)).unwrap();
    let mut gateway = Gateway::new(link, GATEWAY_EUI, PhyConfig::default(), Duration::from_secs(1));

    gateway.pull().unwrap();
    let mut buffer = [0u8; 512];
    let (_, peer) = server.recv_from(&mut buffer).unwrap();
    server
        .send_to(&codec::encode_pull_resp(0x0BAD, &JOIN_ACCEPT).unwrap(), peer)
        .unwrap();

    assert_eq!(gateway.wait_for_downlink().unwrap(), Some(JOIN_ACCEPT.to_vec()));

    let (len, _) = server.recv_from(&mut buffer).unwrap();
    assert_eq!(
        codec::decode_datagram(&buffer[..len]).unwrap(),
        Datagram::TxAck {
            token: 0x0BAD,
            gateway_eui: GATEWAY_EUI
        }
    );
}
