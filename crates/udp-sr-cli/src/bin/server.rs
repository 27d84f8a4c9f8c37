use anyhow::Context;
use clap::Parser;
use std::fs::File;
use std::io::BufWriter;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use udp_sr_cli::{DEFAULT_PORT, SetupError, TransferArgs, exit_code, init_logging, usage_exit, write_report};
use udp_sr_core::{ReceiverEngine, UdpTransport};

/// Receive one file from a udp-sr client.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Where to write the received stream
    #[arg(long, default_value = "output_video.mp4")]
    output: PathBuf,

    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    #[command(flatten)]
    transfer: TransferArgs,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => return usage_exit(err),
    };
    init_logging();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{:#}", err);
            exit_code(&err)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = args.transfer.load_config()?;

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, args.port));
    let transport = UdpTransport::bind(addr)
        .await
        .map_err(|source| SetupError::Bind { addr, source })?;
    info!("listening on {}", addr);

    let file = File::create(&args.output)
        .with_context(|| format!("Failed to create {}", args.output.display()))?;
    let engine = ReceiverEngine::new(Arc::new(transport), config)?;
    let report = engine
        .run(&mut BufWriter::new(file))
        .await
        .context("Transfer failed")?;
    info!("wrote {} bytes to {}", report.bytes, args.output.display());

    if let Some(path) = &args.transfer.report_out {
        write_report(path, &report)?;
    }
    Ok(())
}
