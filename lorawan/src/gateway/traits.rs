use std::time::Duration;

/// Datagram transport between the emulated gateway and the network server
///
/// Implementations are connected to a single destination, so sends carry no
/// address.
pub trait Link {
    /// Error type for link operations
    type Error: core::fmt::Debug + core::fmt::Display;

    /// Send one datagram
    fn send(&mut self, datagram: &[u8]) -> Result<(), Self::Error>;

    /// Bound how long a single [`Link::receive`] call may block
    fn set_receive_timeout(&mut self, timeout: Duration) -> Result<(), Self::Error>;

    /// Receive one datagram into the provided buffer
    ///
    /// Blocks for at most the link's receive timeout and returns the number
    /// of bytes received. `nb::Error::WouldBlock` means the timeout elapsed
    /// without a datagram.
    fn receive(&mut self, buffer: &mut [u8]) -> nb::Result<usize, Self::Error>;
}
