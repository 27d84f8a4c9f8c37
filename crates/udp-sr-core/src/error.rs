use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;
use tokio::task::JoinError;
use udp_sr_abstract::{CodecError, ConfigError, TransportError};

/// Failures that end a transfer.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("send failed after {attempts} attempts")]
    SendFailed {
        attempts: u32,
        #[source]
        source: TransportError,
    },
    #[error("receive failed")]
    Receive(#[source] TransportError),
    #[error("peer did not respond after {retries} retransmissions")]
    PeerUnresponsive { retries: u32 },
    #[error("no datagram from peer for {0:?}")]
    PeerIdle(Duration),
    #[error("no sender announced a stream within {0:?}")]
    AcceptTimeout(Duration),
    #[error("stream length mismatch: announced {expected} bytes, received {received}")]
    LengthMismatch { expected: u64, received: u64 },
    #[error("failed to read from source")]
    Source(#[source] io::Error),
    #[error("failed to write to sink")]
    Sink(#[source] io::Error),
    #[error("listener stopped before the round completed")]
    ListenerClosed,
    #[error("listener task failed")]
    ListenerPanicked(#[from] JoinError),
}

impl TransferError {
    /// Errors caused by the network rather than by local I/O or configuration.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            TransferError::SendFailed { .. }
                | TransferError::Receive(_)
                | TransferError::PeerUnresponsive { .. }
                | TransferError::PeerIdle(_)
                | TransferError::AcceptTimeout(_)
        )
    }
}

/// Datagrams the engines drop and log without aborting.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("malformed frame from {from}: {source}")]
    Malformed {
        from: SocketAddr,
        #[source]
        source: CodecError,
    },
    #[error("sequence number {seq} outside the round of {window} slots")]
    OutOfRange { seq: i32, window: usize },
    #[error("unexpected {kind} frame from {from}")]
    UnexpectedFrame { kind: &'static str, from: SocketAddr },
    #[error("datagram from unknown peer {from}")]
    ForeignPeer { from: SocketAddr },
}
