use anyhow::Context;
use clap::Args;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use udp_sr_abstract::{TransferConfig, TransferConfigOverride};

/// Options shared by the client and the server.
#[derive(Args, Debug, Clone, Default)]
pub struct TransferArgs {
    /// TOML file with transfer settings; flags below take precedence
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Slots per round
    #[arg(long)]
    pub window: Option<usize>,

    /// Initial retransmission interval in milliseconds
    #[arg(long)]
    pub ack_timeout_ms: Option<u64>,

    /// Timeouts without progress before giving up
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Write the transfer report to this file as JSON
    #[arg(long)]
    pub report_out: Option<PathBuf>,
}

impl TransferArgs {
    pub fn overrides(&self) -> TransferConfigOverride {
        TransferConfigOverride {
            window_size: self.window,
            ack_timeout_ms: self.ack_timeout_ms,
            max_retries: self.max_retries,
            ..Default::default()
        }
    }

    /// Defaults, then the config file, then command-line flags.
    pub fn load_config(&self) -> anyhow::Result<TransferConfig> {
        let mut config = match &self.config {
            Some(path) => read_config(path)?,
            None => TransferConfig::default(),
        };
        self.overrides().apply_to(&mut config);
        config.validate().context("Invalid transfer settings")?;
        Ok(config)
    }
}

pub fn read_config(path: &Path) -> anyhow::Result<TransferConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("Failed to parse config file {}", path.display()))
}

pub fn write_report<T: Serialize>(path: &Path, report: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(report).context("Failed to serialize report")?;
    fs::write(path, json).with_context(|| format!("Failed to write report to {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_toml_keeps_defaults() {
        let config: TransferConfig = toml::from_str("window_size = 8\nlinger_ms = 0\n").unwrap();
        assert_eq!(config.window_size, 8);
        assert_eq!(config.linger_ms, 0);
        assert_eq!(config.ack_timeout_ms, TransferConfig::default().ack_timeout_ms);
    }

    #[test]
    fn flags_override_file() {
        let dir = std::env::temp_dir().join(format!("udp-sr-settings-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("transfer.toml");
        fs::write(&path, "window_size = 8\nmax_retries = 3\n").unwrap();

        let args = TransferArgs {
            config: Some(path),
            window: Some(12),
            ..Default::default()
        };
        let config = args.load_config().unwrap();
        assert_eq!(config.window_size, 12);
        assert_eq!(config.max_retries, 3);

        fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn zero_window_flag_is_rejected() {
        let args = TransferArgs {
            window: Some(0),
            ..Default::default()
        };
        assert!(args.load_config().is_err());
    }
}
