//! Transport for encoded datagrams.
//!
//! Delivery is best effort. A datagram is handed to the sink exactly once and
//! a failed send is never retried.

use std::{io, net::SocketAddr};

use async_trait::async_trait;
use tokio::net::{UdpSocket, lookup_host};
use tracing::debug;

/// Errors produced by [`Sink`] implementations.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The collector address did not resolve
    #[error("Collector address {0:?} did not resolve")]
    Resolve(String),
    /// Binding or connecting the local socket failed
    #[error("Failed to open socket to {addr}: {source}")]
    Connect {
        /// The collector
        addr: SocketAddr,
        /// Underlying IO error
        #[source]
        source: io::Error,
    },
    /// A send failed
    #[error("Failed to send datagram: {0}")]
    Send(#[source] io::Error),
}

#[async_trait]
/// Destination of encoded datagrams.
pub trait Sink {
    /// Send one datagram, returning the number of bytes written.
    async fn send(&mut self, datagram: &[u8]) -> Result<usize, Error>;
}

/// Sends every datagram to one collector over UDP.
#[derive(Debug)]
pub struct Udp {
    socket: UdpSocket,
    peer: SocketAddr,
}

impl Udp {
    /// Resolve `collector`, bind an ephemeral local port and connect it to the
    /// collector.
    ///
    /// # Errors
    ///
    /// Function will error if the collector does not resolve or the socket
    /// cannot be bound or connected.
    pub async fn connect(collector: &str) -> Result<Self, Error> {
        let peer = lookup_host(collector)
            .await
            .map_err(|_| Error::Resolve(collector.to_string()))?
            .next()
            .ok_or_else(|| Error::Resolve(collector.to_string()))?;
        let local: SocketAddr = if peer.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            ([0_u16; 8], 0).into()
        };
        let socket = UdpSocket::bind(local)
            .await
            .map_err(|source| Error::Connect { addr: peer, source })?;
        socket
            .connect(peer)
            .await
            .map_err(|source| Error::Connect { addr: peer, source })?;
        debug!(%peer, "UDP socket connected");
        Ok(Self { socket, peer })
    }

    /// The collector this sink sends to.
    #[must_use]
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }
}

#[async_trait]
impl Sink for Udp {
    async fn send(&mut self, datagram: &[u8]) -> Result<usize, Error> {
        self.socket.send(datagram).await.map_err(Error::Send)
    }
}

/// Accepts every datagram and writes nothing. Used when simulating.
#[derive(Debug, Default, Clone, Copy)]
pub struct Null;

#[async_trait]
impl Sink for Null {
    async fn send(&mut self, datagram: &[u8]) -> Result<usize, Error> {
        Ok(datagram.len())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[tokio::test]
    async fn udp_sink_delivers_one_datagram_per_send() {
        let collector = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = collector.local_addr().unwrap();

        let mut sink = Udp::connect(&addr.to_string()).await.unwrap();
        assert_eq!(sink.peer(), addr);
        assert_eq!(sink.send(b"first").await.unwrap(), 5);
        assert_eq!(sink.send(b"second").await.unwrap(), 6);

        let mut buf = [0_u8; 64];
        let (n, _) = collector.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"first");
        let (n, _) = collector.recv_from(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"second");
    }

    #[tokio::test]
    async fn unresolvable_collector_is_an_error() {
        assert!(matches!(
            Udp::connect("not an address").await,
            Err(Error::Resolve(_))
        ));
    }

    #[tokio::test]
    async fn null_sink_reports_full_length() {
        assert_eq!(Null.send(&[0; 72]).await.unwrap(), 72);
    }
}
