use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};
use udp_sr_cli::{init_logging, run_scenario, usage_exit, write_report};

/// Run a transfer scenario over the simulated link and check its assertions.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Scenario TOML file
    scenario: PathBuf,

    /// Write the scenario outcome, link events included, to this file as JSON
    #[arg(long)]
    report_out: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => return usage_exit(err),
    };
    init_logging();

    let outcome = match run_scenario(&args.scenario) {
        Ok(outcome) => outcome,
        Err(err) => {
            error!("{:#}", err);
            return ExitCode::FAILURE;
        }
    };
    info!(
        "{}: {} bytes, {} data frames on the link, {} retransmissions",
        outcome.name,
        outcome.receiver.bytes,
        outcome.link.sender_packet_count,
        outcome.sender.retransmissions
    );

    if let Some(path) = &args.report_out
        && let Err(err) = write_report(path, &outcome)
    {
        error!("{:#}", err);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
