//! Passive GOOSE sniffer.
//!
//! Keeps one line per unique `(appid, stNum, datSet)` and optionally writes
//! each new one to a log, CSV or JSON file.
//!
//! Usage:
//!   sudo goose_sniff -i eth0 -o csv -s 10
//!   goose_sniff -r capture.pcapng -v

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use goose_tools::capture::{DumpingSource, FrameSource, PcapFileSource, PnetSource, TcpdumpSource};
use goose_tools::event_sink::{open_sink, OutputFormat, DEFAULT_LOG_FILE};
use goose_tools::filter::{build_goose_filter, DEFAULT_MAX_VLAN_DEPTH};
use goose_tools::sniffer::{Sniffer, SnifferOptions, TracingReporter};
use pnet::datalink;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "goose_sniff", version)]
#[command(about = "Capture IEC 61850 GOOSE traffic and report unique events")]
struct Args {
    /// List capture interfaces and exit
    #[arg(short = 'l', long)]
    list_interfaces: bool,

    /// Live capture interface
    #[arg(short, long, conflicts_with = "read")]
    interface: Option<String>,

    /// Read frames from a .pcap or .pcapng file
    #[arg(short, long)]
    read: Option<PathBuf>,

    /// Also write every received frame to this pcap file
    #[arg(short, long)]
    write: Option<PathBuf>,

    /// Unique-event output: none, log, csv or json
    #[arg(short, long, default_value = "none")]
    output: OutputFormat,

    /// Base path of the event file (extension replaced for csv/json)
    #[arg(long, default_value = DEFAULT_LOG_FILE)]
    log_file: PathBuf,

    /// Stats summary interval in seconds (0 = off)
    #[arg(short, long, default_value_t = 0)]
    stats: u64,

    /// Maximum number of stacked VLAN tags matched by the capture filter
    #[arg(short = 'm', long, default_value_t = DEFAULT_MAX_VLAN_DEPTH)]
    max_tags: usize,

    /// Capture without a kernel filter (user-space EtherType check)
    #[arg(short = 'n', long)]
    no_bpf: bool,

    /// More columns per event (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn list_interfaces() {
    for iface in datalink::interfaces() {
        let mac = iface
            .mac
            .map(|mac| mac.to_string())
            .unwrap_or_else(|| "-".to_string());
        println!("{:<16} {:<17} {}", iface.name, mac, iface.description);
    }
}

fn open_source(args: &Args) -> Result<Box<dyn FrameSource>> {
    let source: Box<dyn FrameSource> = match (&args.read, &args.interface) {
        (Some(path), _) => Box::new(
            PcapFileSource::open(path)
                .with_context(|| format!("failed to open capture file {}", path.display()))?,
        ),
        (None, Some(iface)) if args.no_bpf => Box::new(
            PnetSource::open(iface).with_context(|| format!("failed to capture on {}", iface))?,
        ),
        (None, Some(iface)) => {
            let filter = build_goose_filter(args.max_tags);
            info!(%filter, "capture filter");
            Box::new(
                TcpdumpSource::spawn(iface, &filter)
                    .with_context(|| format!("failed to capture on {}", iface))?,
            )
        }
        (None, None) => bail!("either --interface or --read is required"),
    };

    match &args.write {
        Some(path) => Ok(Box::new(
            DumpingSource::create(source, path)
                .with_context(|| format!("failed to create dump file {}", path.display()))?,
        )),
        None => Ok(source),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    if args.list_interfaces {
        list_interfaces();
        return Ok(());
    }

    let mut source = open_source(&args)?;
    let mut sink = open_sink(args.output, &args.log_file, args.verbose)
        .context("failed to open event output")?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let options = SnifferOptions {
        stats_interval: Duration::from_secs(args.stats),
    };
    let mut sniffer = Sniffer::new();
    let summary = sniffer
        .run(
            source.as_mut(),
            sink.as_mut(),
            &mut TracingReporter,
            &options,
            &cancel,
        )
        .await
        .context("capture failed")?;

    println!(
        "{} packets, {} unique events",
        summary.total_packets, summary.unique_count
    );
    Ok(())
}
