//! srtla-rec - SRT transport proxy with link aggregation
//!
//! Receives one SRT stream spread over multiple SRTLA uplinks and
//! re-unifies it into a single connection toward a downstream SRT server.

use clap::Parser;
use srtla_core::{resolve_srt_addr, Dispatcher};

#[derive(Parser, Debug)]
#[command(name = "srtla-rec")]
#[command(about = "SRT transport proxy with link aggregation", long_about = None)]
struct Args {
    /// Port to bind the SRTLA socket to
    #[arg(long = "srtla_port", default_value_t = 5000)]
    srtla_port: u16,

    /// Hostname of the downstream SRT server
    #[arg(long = "srt_hostname", default_value = "127.0.0.1")]
    srt_hostname: String,

    /// Port of the downstream SRT server
    #[arg(long = "srt_port", default_value_t = 4001)]
    srt_port: u16,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt().with_env_filter(log_level).init();

    // Check whether the SRT server is reachable before accepting uplinks
    let srt_addr = resolve_srt_addr(&args.srt_hostname, args.srt_port)?;

    let mut dispatcher = Dispatcher::new(args.srtla_port, srt_addr)?;
    tracing::info!(
        srtla_port = args.srtla_port,
        srt_addr = %srt_addr,
        "srtla-rec is now running"
    );

    dispatcher.run()?;
    Ok(())
}
