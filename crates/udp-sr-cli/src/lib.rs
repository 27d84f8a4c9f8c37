//! Shared plumbing for the `udp-sr-client`, `udp-sr-server` and `udp-sr-sim`
//! binaries.
//!
//! The scenario runner and `udp-sr-sim` need the `scenarios` feature, which
//! turns on tokio's test clock.

#[cfg(feature = "scenarios")]
pub mod runner;
pub mod settings;

use std::io;
use std::net::SocketAddr;
use std::process::ExitCode;
use thiserror::Error;

#[cfg(feature = "scenarios")]
pub use runner::{ScenarioOutcome, run, run_scenario};
pub use settings::{TransferArgs, write_report};

/// Default UDP port the server listens on.
pub const DEFAULT_PORT: u16 = 4950;

/// Socket setup failures, reported with exit code 2.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("failed to bind UDP socket on {addr}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("failed to resolve host {host}")]
    Resolve {
        host: String,
        #[source]
        source: io::Error,
    },
    #[error("host {host} did not resolve to any address")]
    NoAddress { host: String },
}

pub fn init_logging() {
    tracing_subscriber::fmt::init();
}

/// Map a failed run to the process exit code.
pub fn exit_code(err: &anyhow::Error) -> ExitCode {
    if err.downcast_ref::<SetupError>().is_some() {
        ExitCode::from(2)
    } else {
        ExitCode::FAILURE
    }
}

/// Print a clap error and pick the exit code: help and version output are
/// not failures, everything else is a usage error.
pub fn usage_exit(err: clap::Error) -> ExitCode {
    let _ = err.print();
    if err.use_stderr() {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn setup_errors_exit_with_two() {
        let err: anyhow::Error = SetupError::NoAddress {
            host: "nowhere".into(),
        }
        .into();
        assert_eq!(exit_code(&err), ExitCode::from(2));
    }

    #[test]
    fn setup_errors_survive_context() {
        let result: Result<(), SetupError> = Err(SetupError::NoAddress {
            host: "nowhere".into(),
        });
        let err = result.context("connecting").unwrap_err();
        assert_eq!(exit_code(&err), ExitCode::from(2));
    }

    #[test]
    fn other_errors_exit_with_one() {
        let err = anyhow::anyhow!("peer went away");
        assert_eq!(exit_code(&err), ExitCode::FAILURE);
    }
}
