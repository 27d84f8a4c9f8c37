use anyhow::Context;
use clap::Parser;
use std::fs::File;
use std::io::BufReader;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use udp_sr_cli::{DEFAULT_PORT, SetupError, TransferArgs, exit_code, init_logging, usage_exit, write_report};
use udp_sr_core::{SenderEngine, UdpTransport};

/// Send a file to a udp-sr server.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Host name or address of the receiving server
    host: String,

    /// File to send
    #[arg(long, default_value = "input_video.MOV")]
    input: PathBuf,

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
    let peer = resolve(&args.host, args.port).await?;

    let file = File::open(&args.input)
        .with_context(|| format!("Failed to open {}", args.input.display()))?;
    let total_len = file
        .metadata()
        .with_context(|| format!("Failed to stat {}", args.input.display()))?
        .len();

    let local = if peer.is_ipv4() {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0))
    } else {
        SocketAddr::from((Ipv6Addr::UNSPECIFIED, 0))
    };
    let transport = UdpTransport::bind(local)
        .await
        .map_err(|source| SetupError::Bind { addr: local, source })?;

    info!(
        "sending {} ({} bytes) to {}, window {}",
        args.input.display(),
        total_len,
        peer,
        config.window_size
    );
    let engine = SenderEngine::new(Arc::new(transport), peer, config)?;
    let report = engine
        .run(&mut BufReader::new(file), total_len)
        .await
        .context("Transfer failed")?;

    if let Some(path) = &args.transfer.report_out {
        write_report(path, &report)?;
    }
    Ok(())
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr, SetupError> {
    let mut addrs = tokio::net::lookup_host((host, port))
        .await
        .map_err(|source| SetupError::Resolve {
            host: host.to_string(),
            source,
        })?;
    addrs.next().ok_or_else(|| SetupError::NoAddress {
        host: host.to_string(),
    })
}
