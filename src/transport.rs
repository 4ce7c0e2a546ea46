use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::UdpSocket;
use tokio::time;
use tracing::trace;

use crate::{Error, Result};

const MAX_DATAGRAM: usize = 65_507;

/// One request datagram, one reply datagram. No retransmission.
///
/// `&mut self` keeps at most one request outstanding per transport.
#[async_trait]
pub trait Transport: Send {
    async fn send_and_receive(
        &mut self,
        target: SocketAddr,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>>;
}

/// Sends from a fresh ephemeral socket per exchange, so an abandoned exchange
/// leaves nothing behind to receive a late reply.
#[derive(Debug, Default)]
pub struct UdpTransport;

impl UdpTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for UdpTransport {
    async fn send_and_receive(
        &mut self,
        target: SocketAddr,
        payload: &[u8],
        timeout: Duration,
    ) -> Result<Vec<u8>> {
        let local: SocketAddr = match target {
            SocketAddr::V4(_) => (Ipv4Addr::UNSPECIFIED, 0).into(),
            SocketAddr::V6(_) => (Ipv6Addr::UNSPECIFIED, 0).into(),
        };
        let socket = UdpSocket::bind(local).await.map_err(Error::Network)?;
        socket.connect(target).await.map_err(Error::Network)?;
        socket.send(payload).await.map_err(Error::Network)?;
        trace!(%target, len = payload.len(), "datagram sent");

        let mut buf = vec![0u8; MAX_DATAGRAM];
        let len = match time::timeout(timeout, socket.recv(&mut buf)).await {
            Ok(received) => received.map_err(Error::Network)?,
            Err(_) => return Err(Error::Timeout),
        };
        buf.truncate(len);
        trace!(%target, len, "datagram received");
        Ok(buf)
    }
}
