use bytes::Bytes;
use std::future::Future;
use std::io::{self, Read, Write};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("no datagram within {0:?}")]
    Timeout(Duration),
    #[error("short send: {sent} of {len} bytes")]
    ShortSend { sent: usize, len: usize },
    #[error("transport closed")]
    Closed,
}

impl TransportError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, TransportError::Timeout(_))
    }
}

/// The unreliable datagram channel both engines run on.
///
/// Implementations may lose, duplicate and reorder datagrams. Every receive
/// is bounded by `timeout`; an expired wait is reported as
/// [`TransportError::Timeout`] so callers can check for cancellation.
pub trait Transport: Send + Sync + 'static {
    /// Send one frame as a single datagram to `dest`.
    fn send_to(
        &self,
        frame: &[u8],
        dest: SocketAddr,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Wait up to `timeout` for the next datagram.
    fn recv_from(
        &self,
        timeout: Duration,
    ) -> impl Future<Output = Result<(Bytes, SocketAddr), TransportError>> + Send;
}

/// Where the sender pulls stream bytes from.
pub trait FileSource {
    /// Read up to `max` bytes. A short chunk is allowed; an empty chunk means
    /// the source is exhausted.
    fn read_chunk(&mut self, max: usize) -> io::Result<Bytes>;
}

impl<R: Read> FileSource for R {
    fn read_chunk(&mut self, max: usize) -> io::Result<Bytes> {
        let mut buf = Vec::with_capacity(max);
        Read::by_ref(self).take(max as u64).read_to_end(&mut buf)?;
        Ok(Bytes::from(buf))
    }
}

/// Where the receiver writes resolved rounds.
pub trait FileSink {
    fn write_chunk(&mut self, data: &[u8]) -> io::Result<()>;

    /// Called once after the last round has been written.
    fn finish(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<W: Write> FileSink for W {
    fn write_chunk(&mut self, data: &[u8]) -> io::Result<()> {
        self.write_all(data)
    }

    fn finish(&mut self) -> io::Result<()> {
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn reader_chunks_until_exhausted() {
        let mut source = Cursor::new(vec![7u8; 1100]);
        assert_eq!(source.read_chunk(500).unwrap().len(), 500);
        assert_eq!(source.read_chunk(500).unwrap().len(), 500);
        assert_eq!(source.read_chunk(500).unwrap().len(), 100);
        assert!(source.read_chunk(500).unwrap().is_empty());
    }

    #[test]
    fn writer_appends() {
        let mut sink = Vec::new();
        sink.write_chunk(b"ab").unwrap();
        sink.write_chunk(b"cd").unwrap();
        sink.finish().unwrap();
        assert_eq!(sink, b"abcd");
    }
}
