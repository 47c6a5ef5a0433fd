//! Datagram transport.
//!
//! [`Transport`] is the seam between the protocol and the network: bytes in,
//! bytes out, plus the remote address.  It is deliberately non-blocking so
//! that a single loop can poll it between user commands; nothing here ever
//! waits on the socket.
//!
//! [`Socket`] implements it over `tokio::net::UdpSocket`;
//! [`crate::simulator::SimSocket`] implements it over an in-memory lossy
//! network for tests.

use std::io;
use std::net::SocketAddr;

use tokio::net::UdpSocket;

use crate::error::TransportError;
use crate::packet::{HEADER_LEN, MAX_PAYLOAD, TRAILER_LEN};

/// One byte more than the largest valid packet.  Anything longer arrives
/// truncated to this and fails to decode.
const RECV_BUF: usize = HEADER_LEN + MAX_PAYLOAD + TRAILER_LEN + 1;

/// Non-blocking, datagram-oriented byte transport.
pub trait Transport {
    /// Send one datagram.  A full socket buffer counts as a loss, not an error.
    fn send_to(&self, bytes: &[u8], dest: SocketAddr) -> Result<(), TransportError>;

    /// Next queued datagram, or `Ok(None)` when nothing is waiting.
    fn try_recv_from(&self) -> Result<Option<(Vec<u8>, SocketAddr)>, TransportError>;

    fn local_addr(&self) -> SocketAddr;
}

// ---------------------------------------------------------------------------
// Socket
// ---------------------------------------------------------------------------

/// UDP socket bound to one local port.
#[derive(Debug)]
pub struct Socket {
    /// Address after the OS assigned any ephemeral port.
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind to `local_addr`.  Port 0 lets the OS choose.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self, TransportError> {
        let inner = UdpSocket::bind(local_addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: local_addr,
                source,
            })?;
        let local_addr = inner.local_addr()?;
        log::debug!("[socket] bound {local_addr}");
        Ok(Self { local_addr, inner })
    }
}

fn is_unreachable(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionRefused | io::ErrorKind::ConnectionReset
    )
}

impl Transport for Socket {
    fn send_to(&self, bytes: &[u8], dest: SocketAddr) -> Result<(), TransportError> {
        match self.inner.try_send_to(bytes, dest) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                log::debug!("[socket] send buffer full; dropping {} bytes", bytes.len());
                Ok(())
            }
            Err(e) if is_unreachable(&e) => Err(TransportError::PeerUnreachable),
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    fn try_recv_from(&self) -> Result<Option<(Vec<u8>, SocketAddr)>, TransportError> {
        let mut buf = [0u8; RECV_BUF];
        match self.inner.try_recv_from(&mut buf) {
            Ok((n, addr)) => Ok(Some((buf[..n].to_vec(), addr))),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => Ok(None),
            Err(e) if is_unreachable(&e) => Err(TransportError::PeerUnreachable),
            Err(e) => Err(TransportError::Io(e)),
        }
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
