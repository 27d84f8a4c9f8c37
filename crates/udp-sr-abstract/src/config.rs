use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Largest window the engines accept.
pub const MAX_WINDOW: usize = 1 << 16;

/// Upper bound for intervals the engines add to the current time.
pub const MAX_INTERVAL_MS: u64 = 3_600_000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("window size {size} must be between 1 and {max}")]
    WindowSize { size: usize, max: usize },
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("{name} ({value}) exceeds {max}")]
    TooLong {
        name: &'static str,
        value: u64,
        max: u64,
    },
    #[error("max_backoff_ms ({max_backoff_ms}) is below ack_timeout_ms ({ack_timeout_ms})")]
    BackoffBelowTimeout {
        max_backoff_ms: u64,
        ack_timeout_ms: u64,
    },
}

/// Protocol tuning shared by both endpoints. All times are in milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Slots per round (W).
    pub window_size: usize,
    /// First retransmission interval; doubles on every timeout without progress.
    pub ack_timeout_ms: u64,
    /// Consecutive timeouts or send failures tolerated before giving up.
    pub max_retries: u32,
    pub max_backoff_ms: u64,
    /// Upper bound of a single blocking receive in the listener.
    pub poll_interval_ms: u64,
    /// Listener gives up after this long without any datagram.
    pub idle_timeout_ms: u64,
    /// How long the receiver keeps re-acknowledging after the last round.
    pub linger_ms: u64,
    /// How long the receiver waits for a preamble; `None` waits forever.
    pub accept_timeout_ms: Option<u64>,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            window_size: 5,
            ack_timeout_ms: 300,
            max_retries: 8,
            max_backoff_ms: 5_000,
            poll_interval_ms: 50,
            idle_timeout_ms: 30_000,
            linger_ms: 1_000,
            accept_timeout_ms: None,
        }
    }
}

impl TransferConfig {
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn linger(&self) -> Duration {
        Duration::from_millis(self.linger_ms)
    }

    pub fn accept_timeout(&self) -> Option<Duration> {
        self.accept_timeout_ms.map(Duration::from_millis)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size == 0 || self.window_size > MAX_WINDOW {
            return Err(ConfigError::WindowSize {
                size: self.window_size,
                max: MAX_WINDOW,
            });
        }
        for (name, value) in [
            ("ack_timeout_ms", self.ack_timeout_ms),
            ("poll_interval_ms", self.poll_interval_ms),
            ("idle_timeout_ms", self.idle_timeout_ms),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroDuration(name));
            }
        }
        for (name, value) in [("max_backoff_ms", self.max_backoff_ms), ("linger_ms", self.linger_ms)] {
            if value > MAX_INTERVAL_MS {
                return Err(ConfigError::TooLong {
                    name,
                    value,
                    max: MAX_INTERVAL_MS,
                });
            }
        }
        if self.max_backoff_ms < self.ack_timeout_ms {
            return Err(ConfigError::BackoffBelowTimeout {
                max_backoff_ms: self.max_backoff_ms,
                ack_timeout_ms: self.ack_timeout_ms,
            });
        }
        Ok(())
    }
}

/// Fault model of the simulated link. Latencies are in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub loss_rate: f64,
    pub duplicate_rate: f64,
    pub min_latency: u64,
    pub max_latency: u64,
    pub seed: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            duplicate_rate: 0.0,
            min_latency: 10,
            max_latency: 100,
            seed: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = TransferConfig::default();
        assert_eq!(config.window_size, 5);
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn zero_window_rejected() {
        let config = TransferConfig {
            window_size: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::WindowSize {
                size: 0,
                max: MAX_WINDOW
            })
        );
    }

    #[test]
    fn zero_timeouts_rejected() {
        let config = TransferConfig {
            poll_interval_ms: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroDuration("poll_interval_ms"))
        );
    }

    #[test]
    fn backoff_cap_must_cover_timeout() {
        let config = TransferConfig {
            ack_timeout_ms: 1_000,
            max_backoff_ms: 500,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::BackoffBelowTimeout { .. })
        ));
    }

    #[test]
    fn absurd_backoff_cap_rejected() {
        let config = TransferConfig {
            max_backoff_ms: u64::MAX,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ConfigError::TooLong {
                name: "max_backoff_ms",
                value: u64::MAX,
                max: MAX_INTERVAL_MS
            })
        );

        let config = TransferConfig {
            linger_ms: MAX_INTERVAL_MS + 1,
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::TooLong { name: "linger_ms", .. })
        ));
    }
}
