//! Scripted trip sequence.
//!
//! ```text
//! IDLE (stNum 1, no trip, idle_rate)  for `idle`
//!   -> BURST (stNum 2, trip, back-to-back frames)
//!   -> HOLD (stNum 2, trip, hold_rate) for `hold`
//!   -> RESET
//! ```
//!
//! sqNum counts from 0 during IDLE, restarts at 0 on the stNum change and keeps
//! counting through HOLD.

use std::fmt;
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::generator::{deadline_after, frame_period};
use crate::target::FrameBuilder;
use crate::transmit::FrameSink;
use crate::Result;

/// Fewest trip frames a burst may contain
pub const MIN_BURST_FRAMES: usize = 3;

const IDLE_ST_NUM: u8 = 1;
const TRIP_ST_NUM: u8 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackPhase {
    Idle,
    Burst,
    Hold,
    Reset,
}

impl fmt::Display for AttackPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AttackPhase::Idle => "IDLE",
            AttackPhase::Burst => "BURST",
            AttackPhase::Hold => "HOLD",
            AttackPhase::Reset => "RESET",
        };
        f.write_str(name)
    }
}

/// Mutable state of a running sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttackPhaseState {
    pub phase: AttackPhase,
    pub st_num: u8,
    pub sq_num: u16,
    /// End of the current timed phase
    pub phase_deadline: Option<Instant>,
}

impl AttackPhaseState {
    fn new() -> Self {
        AttackPhaseState {
            phase: AttackPhase::Idle,
            st_num: IDLE_ST_NUM,
            sq_num: 0,
            phase_deadline: None,
        }
    }

    fn enter(&mut self, phase: AttackPhase, duration: Option<Duration>) -> Result<()> {
        let previous = self.phase;
        self.phase = phase;
        self.phase_deadline = duration.map(deadline_after).transpose()?;
        info!(
            from = %previous,
            to = %phase,
            st_num = self.st_num,
            sq_num = self.sq_num,
            "phase transition"
        );
        Ok(())
    }

    fn trip(&self) -> bool {
        matches!(self.phase, AttackPhase::Burst | AttackPhase::Hold)
    }

    fn next_frame(&mut self, builder: &FrameBuilder) -> Vec<u8> {
        let frame = builder.build(self.st_num as u32, self.sq_num as u32, self.trip());
        self.sq_num = self.sq_num.wrapping_add(1);
        frame
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SequenceTimings {
    pub idle: Duration,
    /// Raised to [`MIN_BURST_FRAMES`] when lower
    pub burst_frames: usize,
    pub hold: Duration,
    /// Frames per second during IDLE
    pub idle_rate: f64,
    /// Frames per second during HOLD
    pub hold_rate: f64,
}

impl Default for SequenceTimings {
    fn default() -> Self {
        SequenceTimings {
            idle: Duration::from_secs(5),
            burst_frames: 8,
            hold: Duration::from_secs(10),
            idle_rate: 10.0,
            hold_rate: 1.0,
        }
    }
}

impl SequenceTimings {
    pub fn effective_burst_frames(&self) -> usize {
        self.burst_frames.max(MIN_BURST_FRAMES)
    }

    /// Rejects rates and phase lengths the clock cannot represent.
    pub fn validate(&self) -> Result<()> {
        frame_period(self.idle_rate)?;
        frame_period(self.hold_rate)?;
        deadline_after(self.idle)?;
        deadline_after(self.hold)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SequenceReport {
    pub idle_frames: u64,
    pub burst_frames: u64,
    pub hold_frames: u64,
    /// False if cancelled before RESET
    pub completed: bool,
    pub final_state: AttackPhaseState,
}

/// Runs IDLE, BURST and HOLD, then stops in RESET.
///
/// Cancellation ends the current phase early and skips the remaining ones.
/// A failed send aborts the sequence. Invalid timings are rejected before the
/// first frame.
pub async fn run_attack_sequence(
    builder: &FrameBuilder,
    sink: &mut dyn FrameSink,
    timings: &SequenceTimings,
    cancel: &CancellationToken,
) -> Result<SequenceReport> {
    timings.validate()?;
    let mut state = AttackPhaseState::new();
    let mut report = SequenceReport {
        idle_frames: 0,
        burst_frames: 0,
        hold_frames: 0,
        completed: false,
        final_state: state,
    };

    state.enter(AttackPhase::Idle, Some(timings.idle))?;
    let (sent, cancelled) =
        run_timed_phase(&mut state, builder, sink, timings.idle_rate, cancel).await?;
    report.idle_frames = sent;
    if cancelled {
        report.final_state = state;
        return Ok(report);
    }

    state.st_num = TRIP_ST_NUM;
    state.sq_num = 0;
    state.enter(AttackPhase::Burst, None)?;
    let burst: Vec<Vec<u8>> = (0..timings.effective_burst_frames())
        .map(|_| state.next_frame(builder))
        .collect();
    sink.send_batch(&burst).await?;
    report.burst_frames = burst.len() as u64;
    debug!(frames = burst.len(), "burst sent");

    state.enter(AttackPhase::Hold, Some(timings.hold))?;
    let (sent, cancelled) =
        run_timed_phase(&mut state, builder, sink, timings.hold_rate, cancel).await?;
    report.hold_frames = sent;
    if cancelled {
        report.final_state = state;
        return Ok(report);
    }

    state.enter(AttackPhase::Reset, None)?;
    info!(
        idle = report.idle_frames,
        burst = report.burst_frames,
        hold = report.hold_frames,
        "trip sequence complete"
    );
    report.completed = true;
    report.final_state = state;
    Ok(report)
}

/// Sends at `rate` until the phase deadline. Returns frames sent and whether
/// `cancel` fired.
async fn run_timed_phase(
    state: &mut AttackPhaseState,
    builder: &FrameBuilder,
    sink: &mut dyn FrameSink,
    rate: f64,
    cancel: &CancellationToken,
) -> Result<(u64, bool)> {
    let Some(deadline) = state.phase_deadline else {
        return Ok((0, cancel.is_cancelled()));
    };
    // A non-positive rate sends once and then waits out the phase
    let period = frame_period(rate)?;
    let mut sent = 0u64;

    loop {
        if cancel.is_cancelled() {
            return Ok((sent, true));
        }
        if Instant::now() >= deadline {
            return Ok((sent, false));
        }

        sink.send_frame(&state.next_frame(builder)).await?;
        sent += 1;

        let wake = period
            .and_then(|period| Instant::now().checked_add(period))
            .map_or(deadline, |next| next.min(deadline));
        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok((sent, true)),
            _ = sleep_until(wake) => {}
        }
    }
}
