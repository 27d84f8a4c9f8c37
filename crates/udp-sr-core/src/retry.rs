use std::net::SocketAddr;
use std::time::Duration;

use tracing::warn;
use udp_sr_abstract::{Transport, TransferConfig};

use crate::error::TransferError;

/// Bounded exponential backoff.
///
/// Starts at `base`, doubles on every failed attempt up to `max`, and
/// refuses further attempts after `limit` failures in a row.
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
    failures: u32,
    limit: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration, limit: u32) -> Self {
        Self {
            base,
            max,
            current: base,
            failures: 0,
            limit,
        }
    }

    /// Retransmission timer: first interval is the ack timeout.
    pub fn retransmission(config: &TransferConfig) -> Self {
        Self::new(config.ack_timeout(), config.max_backoff(), config.max_retries)
    }

    /// Pause between failed sends or receives on the transport itself.
    pub fn transport(config: &TransferConfig) -> Self {
        Self::new(config.poll_interval(), config.max_backoff(), config.max_retries)
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Count a failure. Returns `false` once the limit is exceeded.
    pub fn advance(&mut self) -> bool {
        self.failures += 1;
        if self.failures > self.limit {
            return false;
        }
        self.current = (self.current * 2).min(self.max);
        true
    }

    pub fn reset(&mut self) {
        self.failures = 0;
        self.current = self.base;
    }
}

/// Send one frame, retrying transport failures with backoff.
pub async fn send_with_retry<T: Transport>(
    transport: &T,
    frame: &[u8],
    dest: SocketAddr,
    config: &TransferConfig,
) -> Result<(), TransferError> {
    let mut backoff = Backoff::transport(config);
    loop {
        match transport.send_to(frame, dest).await {
            Ok(()) => return Ok(()),
            Err(err) => {
                let delay = backoff.current();
                if !backoff.advance() {
                    return Err(TransferError::SendFailed {
                        attempts: backoff.failures(),
                        source: err,
                    });
                }
                warn!("send to {} failed ({}), retrying in {:?}", dest, err, delay);
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::sync::atomic::{AtomicU32, Ordering};
    use udp_sr_abstract::TransportError;

    #[test]
    fn doubles_up_to_cap() {
        let mut backoff = Backoff::new(Duration::from_millis(100), Duration::from_millis(350), 10);
        assert_eq!(backoff.current(), Duration::from_millis(100));
        assert!(backoff.advance());
        assert_eq!(backoff.current(), Duration::from_millis(200));
        assert!(backoff.advance());
        assert_eq!(backoff.current(), Duration::from_millis(350));
        assert!(backoff.advance());
        assert_eq!(backoff.current(), Duration::from_millis(350));
    }

    #[test]
    fn limit_and_reset() {
        let mut backoff = Backoff::new(Duration::from_millis(10), Duration::from_secs(1), 2);
        assert!(backoff.advance());
        assert!(backoff.advance());
        assert!(!backoff.advance());

        backoff.reset();
        assert_eq!(backoff.failures(), 0);
        assert_eq!(backoff.current(), Duration::from_millis(10));
        assert!(backoff.advance());
    }

    /// Fails the first `failures` sends.
    struct Flaky {
        failures: u32,
        attempts: AtomicU32,
    }

    impl Transport for Flaky {
        async fn send_to(&self, _frame: &[u8], _dest: SocketAddr) -> Result<(), TransportError> {
            let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < self.failures {
                Err(TransportError::Io(std::io::Error::other("buffer full")))
            } else {
                Ok(())
            }
        }

        async fn recv_from(&self, timeout: Duration) -> Result<(Bytes, SocketAddr), TransportError> {
            Err(TransportError::Timeout(timeout))
        }
    }

    fn dest() -> SocketAddr {
        "127.0.0.1:4950".parse().unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn transient_send_failures_are_retried() {
        let transport = Flaky {
            failures: 3,
            attempts: AtomicU32::new(0),
        };
        let config = TransferConfig::default();
        send_with_retry(&transport, b"frame", dest(), &config)
            .await
            .unwrap();
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_send_failure_is_fatal() {
        let transport = Flaky {
            failures: u32::MAX,
            attempts: AtomicU32::new(0),
        };
        let config = TransferConfig {
            max_retries: 2,
            ..Default::default()
        };
        let err = send_with_retry(&transport, b"frame", dest(), &config)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::SendFailed { attempts: 3, .. }));
        assert_eq!(transport.attempts.load(Ordering::SeqCst), 3);
    }
}
