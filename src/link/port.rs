//! Trait abstraction for datagram I/O to enable testing

use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tracing::{debug, info};

use crate::error::TransportError;

/// Trait for the firmware-facing datagram endpoint
#[async_trait]
pub trait DatagramPort: Send + Sync {
    /// Send one datagram to the firmware
    async fn send(&self, data: &[u8]) -> io::Result<()>;

    /// Wait for the next datagram from the firmware; returns its length
    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize>;
}

/// UDP endpoint bound locally and aimed at one firmware address
///
/// One socket serves both directions. Datagrams from any other source are
/// ignored.
#[derive(Debug)]
pub struct UdpPort {
    socket: UdpSocket,
    firmware: SocketAddr,
}

impl UdpPort {
    /// Bind the local endpoint
    ///
    /// # Arguments
    ///
    /// * `bind_addr` - Local address, e.g. `0.0.0.0:5001`
    /// * `firmware` - Firmware address all traffic goes to
    ///
    /// # Errors
    ///
    /// Returns `TransportError::Bind` if the socket cannot be bound
    pub async fn bind(bind_addr: &str, firmware: SocketAddr) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: bind_addr.to_string(),
                source,
            })?;

        let local = socket.local_addr().map_err(|source| TransportError::Bind {
            addr: bind_addr.to_string(),
            source,
        })?;
        info!("Firmware link bound on {} -> {}", local, firmware);

        Ok(Self { socket, firmware })
    }

    /// Local address actually bound (useful with port 0)
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

#[async_trait]
impl DatagramPort for UdpPort {
    async fn send(&self, data: &[u8]) -> io::Result<()> {
        self.socket.send_to(data, self.firmware).await?;
        Ok(())
    }

    async fn recv(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let (len, from) = self.socket.recv_from(buf).await?;
            if from == self.firmware {
                return Ok(len);
            }
            debug!("Ignoring {} byte datagram from {}", len, from);
        }
    }
}
