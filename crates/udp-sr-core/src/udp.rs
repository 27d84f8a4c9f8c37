//! [`Transport`] over a real UDP socket.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::{ToSocketAddrs, UdpSocket};
use udp_sr_abstract::{Transport, TransportError};

/// Large enough for any frame; anything longer is truncated and then
/// rejected by the frame decoder.
const RECV_BUFFER: usize = 2048;

#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
}

impl UdpTransport {
    pub async fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        Ok(Self::from_socket(UdpSocket::bind(addr).await?))
    }

    pub fn from_socket(socket: UdpSocket) -> Self {
        Self { socket }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }
}

impl Transport for UdpTransport {
    async fn send_to(&self, frame: &[u8], dest: SocketAddr) -> Result<(), TransportError> {
        let sent = self.socket.send_to(frame, dest).await?;
        if sent != frame.len() {
            return Err(TransportError::ShortSend {
                sent,
                len: frame.len(),
            });
        }
        Ok(())
    }

    async fn recv_from(&self, timeout: Duration) -> Result<(Bytes, SocketAddr), TransportError> {
        let mut buf = vec![0u8; RECV_BUFFER];
        let (n, from) = tokio::time::timeout(timeout, self.socket.recv_from(&mut buf))
            .await
            .map_err(|_| TransportError::Timeout(timeout))??;
        buf.truncate(n);
        Ok((Bytes::from(buf), from))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loopback_round_trip() {
        let a = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let b = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let b_addr = b.local_addr().unwrap();

        a.send_to(b"ping", b_addr).await.unwrap();
        let (bytes, from) = b.recv_from(Duration::from_secs(2)).await.unwrap();
        assert_eq!(&bytes[..], b"ping");
        assert_eq!(from, a.local_addr().unwrap());
    }

    #[tokio::test]
    async fn receive_times_out() {
        let socket = UdpTransport::bind("127.0.0.1:0").await.unwrap();
        let err = socket.recv_from(Duration::from_millis(20)).await.unwrap_err();
        assert!(err.is_timeout());
    }
}
