use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::time::Duration;

use tracing::debug;

use super::traits::Link;

/// Sockets reject a zero read timeout
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// [`Link`] over a UDP socket connected to the network server
#[derive(Debug)]
pub struct UdpLink {
    socket: UdpSocket,
    server: SocketAddr,
}

impl UdpLink {
    /// Bind an ephemeral local port and connect it to `server`
    ///
    /// `receive_timeout` bounds each [`Link::receive`] call until changed
    /// with [`Link::set_receive_timeout`].
    pub fn connect<A: ToSocketAddrs>(server: A, receive_timeout: Duration) -> io::Result<Self> {
        let server = server.to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, "server address did not resolve")
        })?;
        let bind: SocketAddr = if server.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0u16; 8], 0).into()
        };

        let socket = UdpSocket::bind(bind)?;
        socket.connect(server)?;
        socket.set_read_timeout(Some(receive_timeout.max(MIN_READ_TIMEOUT)))?;
        debug!(%server, local = ?socket.local_addr().ok(), "udp link connected");

        Ok(Self { socket, server })
    }

    /// Resolved network server address
    pub fn server(&self) -> SocketAddr {
        self.server
    }
}

impl Link for UdpLink {
    type Error = io::Error;

    fn send(&mut self, datagram: &[u8]) -> Result<(), Self::Error> {
        self.socket.send(datagram).map(|_| ())
    }

    fn set_receive_timeout(&mut self, timeout: Duration) -> Result<(), Self::Error> {
        self.socket.set_read_timeout(Some(timeout.max(MIN_READ_TIMEOUT)))
    }

    fn receive(&mut self, buffer: &mut [u8]) -> nb::Result<usize, Self::Error> {
        match self.socket.recv(buffer) {
            Ok(len) => Ok(len),
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                Err(nb::Error::WouldBlock)
            }
            Err(e) => Err(nb::Error::Other(e)),
        }
    }
}
