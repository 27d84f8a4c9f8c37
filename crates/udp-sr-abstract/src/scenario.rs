use crate::config::{LinkConfig, TransferConfig};
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
pub struct TransferScenario {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub link: LinkConfigOverride,
    #[serde(default)]
    pub transfer: TransferConfigOverride,
    pub payload: PayloadSpec,
    #[serde(default)]
    pub actions: Vec<ScenarioAction>,
    #[serde(default)]
    pub assertions: Vec<ScenarioAssertion>,
}

/// Stream the sender pushes through the link: `size` pseudo-random bytes
/// derived from `seed`.
#[derive(Deserialize, Debug, Clone)]
pub struct PayloadSpec {
    pub size: u64,
    #[serde(default)]
    pub seed: u64,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct LinkConfigOverride {
    pub loss_rate: Option<f64>,
    pub duplicate_rate: Option<f64>,
    pub min_latency: Option<u64>,
    pub max_latency: Option<u64>,
    pub seed: Option<u64>,
}

impl LinkConfigOverride {
    pub fn apply_to(&self, config: &mut LinkConfig) {
        if let Some(v) = self.loss_rate {
            config.loss_rate = v;
        }
        if let Some(v) = self.duplicate_rate {
            config.duplicate_rate = v;
        }
        if let Some(v) = self.min_latency {
            config.min_latency = v;
        }
        if let Some(v) = self.max_latency {
            config.max_latency = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct TransferConfigOverride {
    pub window_size: Option<usize>,
    pub ack_timeout_ms: Option<u64>,
    pub max_retries: Option<u32>,
    pub max_backoff_ms: Option<u64>,
    pub poll_interval_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
    pub linger_ms: Option<u64>,
    pub accept_timeout_ms: Option<u64>,
}

impl TransferConfigOverride {
    pub fn apply_to(&self, config: &mut TransferConfig) {
        if let Some(v) = self.window_size {
            config.window_size = v;
        }
        if let Some(v) = self.ack_timeout_ms {
            config.ack_timeout_ms = v;
        }
        if let Some(v) = self.max_retries {
            config.max_retries = v;
        }
        if let Some(v) = self.max_backoff_ms {
            config.max_backoff_ms = v;
        }
        if let Some(v) = self.poll_interval_ms {
            config.poll_interval_ms = v;
        }
        if let Some(v) = self.idle_timeout_ms {
            config.idle_timeout_ms = v;
        }
        if let Some(v) = self.linger_ms {
            config.linger_ms = v;
        }
        if let Some(v) = self.accept_timeout_ms {
            config.accept_timeout_ms = Some(v);
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScenarioAction {
    /// Deterministically drop the first data frame the sender emits for this slot
    DropNextData { seq: i32 },
    /// Deterministically drop the first ack the receiver emits for this slot
    DropNextAck { seq: i32 },
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScenarioAssertion {
    /// The receiver's output equals the generated payload byte for byte
    DataIntact,
    /// Data frames emitted by the sender, retransmissions included
    SenderPacketCount { min: u32, max: Option<u32> },
    /// Upper bound on sender retransmissions
    MaxRetransmissions { max: u64 },
    /// Both endpoints finish within this much (simulated) time
    MaxDuration { ms: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_only_touch_set_fields() {
        let mut config = TransferConfig::default();
        let over = TransferConfigOverride {
            window_size: Some(8),
            accept_timeout_ms: Some(2_000),
            ..Default::default()
        };
        over.apply_to(&mut config);
        assert_eq!(config.window_size, 8);
        assert_eq!(config.accept_timeout_ms, Some(2_000));
        assert_eq!(config.ack_timeout_ms, TransferConfig::default().ack_timeout_ms);

        let mut link = LinkConfig::default();
        LinkConfigOverride {
            loss_rate: Some(0.25),
            ..Default::default()
        }
        .apply_to(&mut link);
        assert_eq!(link.loss_rate, 0.25);
        assert_eq!(link.max_latency, LinkConfig::default().max_latency);
    }
}
