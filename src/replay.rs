//! Line-rate flooding through an external replay tool.
//!
//! A finite set of distinct frames is written to a temporary pcap file and
//! looped by `tcpreplay --topspeed --loop=0`. The file is removed on every
//! exit path.

use std::io::BufWriter;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::generator::{CounterPolicy, GooseCounters};
use crate::pcap_writer::PcapWriter;
use crate::target::FrameBuilder;
use crate::tools::find_tool;
use crate::Result;

pub const DEFAULT_REPLAY_TOOL: &str = "tcpreplay";

/// Number of distinct frames needed to cover the counter policy.
///
/// stNum alone cycles through `st_wrap_to..=255`, sqNum alone through 65536
/// values; when both increment together the stNum period bounds the set.
pub fn replay_frame_count(policy: &CounterPolicy) -> usize {
    let st_cycle = 256 - policy.st_wrap_to as usize;
    match (policy.inc_st, policy.inc_sq) {
        (true, _) => st_cycle,
        (false, true) => 65_536,
        (false, false) => 1,
    }
}

/// Builds the frame set starting at `start`, advancing counters between frames.
pub fn materialize_frames(
    builder: &FrameBuilder,
    start: GooseCounters,
    policy: &CounterPolicy,
    trip: bool,
) -> Vec<Vec<u8>> {
    let mut counters = start;
    (0..replay_frame_count(policy))
        .map(|_| {
            let frame = counters.build(builder, trip);
            counters.advance(policy);
            frame
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReplayOptions {
    pub interface: String,
    /// Zero runs until cancelled or until the tool exits
    pub duration: Duration,
    pub trip: bool,
    pub start: GooseCounters,
    pub policy: CounterPolicy,
    /// Replay program, resolved against PATH
    pub tool: String,
}

impl ReplayOptions {
    pub fn new(interface: impl Into<String>) -> Self {
        ReplayOptions {
            interface: interface.into(),
            duration: Duration::ZERO,
            trip: false,
            start: GooseCounters::default(),
            policy: CounterPolicy::default(),
            tool: DEFAULT_REPLAY_TOOL.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplayOutcome {
    /// The tool exited on its own
    Exited(ExitStatus),
    /// The duration elapsed and the tool was terminated
    TimedOut,
    Cancelled,
}

/// Hands the materialized frame set to the replay tool and waits for it.
///
/// # Errors
/// [`crate::Error::MissingExternalTool`] before any frame is built if the tool
/// is not installed.
pub async fn run_replay(
    builder: &FrameBuilder,
    options: &ReplayOptions,
    cancel: &CancellationToken,
) -> Result<ReplayOutcome> {
    let tool = find_tool(&options.tool)?;

    let frames = materialize_frames(builder, options.start, &options.policy, options.trip);
    let pcap = tempfile::Builder::new()
        .prefix("goose_swarm_")
        .suffix(".pcap")
        .tempfile()?;
    {
        let mut writer = PcapWriter::new(BufWriter::new(pcap.as_file()))?;
        for frame in &frames {
            writer.write_frame(frame)?;
        }
        writer.flush()?;
    }
    info!(
        frames = frames.len(),
        path = %pcap.path().display(),
        "replay file written"
    );

    let mut child = Command::new(&tool)
        .arg("--intf1")
        .arg(&options.interface)
        .arg("--topspeed")
        .arg("--loop=0")
        .arg(pcap.path())
        .kill_on_drop(true)
        .spawn()?;
    info!(tool = %tool.display(), interface = %options.interface, "replay started");

    let duration = options.duration;
    let timeout = async move {
        if duration.is_zero() {
            std::future::pending::<()>().await
        } else {
            sleep(duration).await
        }
    };

    let outcome = tokio::select! {
        status = child.wait() => ReplayOutcome::Exited(status?),
        _ = timeout => {
            child.kill().await?;
            ReplayOutcome::TimedOut
        }
        _ = cancel.cancelled() => {
            child.kill().await?;
            ReplayOutcome::Cancelled
        }
    };

    match outcome {
        ReplayOutcome::Exited(status) if !status.success() => {
            warn!(%status, "replay tool exited with failure")
        }
        _ => debug!(?outcome, "replay finished"),
    }
    pcap.close()?;
    Ok(outcome)
}
