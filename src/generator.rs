//! Rate-controlled GOOSE transmission with per-frame counter policies.

use std::time::Duration;

use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::error::Error;
use crate::target::FrameBuilder;
use crate::transmit::FrameSink;
use crate::Result;

pub const DEFAULT_START_ST: u8 = 1;
pub const DEFAULT_START_SQ: u16 = 0;

/// Which counters change after every sent frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CounterPolicy {
    pub inc_st: bool,
    pub inc_sq: bool,
    /// Value stNum takes after 255
    pub st_wrap_to: u8,
}

/// stNum (0-255) and sqNum (0-65535) of the next frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GooseCounters {
    pub st_num: u8,
    pub sq_num: u16,
}

impl Default for GooseCounters {
    fn default() -> Self {
        GooseCounters::new(DEFAULT_START_ST, DEFAULT_START_SQ)
    }
}

impl GooseCounters {
    pub const fn new(st_num: u8, sq_num: u16) -> Self {
        GooseCounters { st_num, sq_num }
    }

    /// Applies the policy: sqNum wraps 65535 -> 0, stNum wraps 255 -> `st_wrap_to`.
    pub fn advance(&mut self, policy: &CounterPolicy) {
        if policy.inc_sq {
            self.sq_num = self.sq_num.wrapping_add(1);
        }
        if policy.inc_st {
            self.st_num = match self.st_num {
                u8::MAX => policy.st_wrap_to,
                st => st + 1,
            };
        }
    }

    pub fn build(&self, builder: &FrameBuilder, trip: bool) -> Vec<u8> {
        builder.build(self.st_num as u32, self.sq_num as u32, trip)
    }
}

/// Interval between frames at `rate` fps, `None` when the rate is zero or negative.
///
/// # Errors
/// [`Error::Config`] if the rate is NaN, infinite, or so small that the
/// period does not fit a [`Duration`].
pub fn frame_period(rate: f64) -> Result<Option<Duration>> {
    if !rate.is_finite() {
        return Err(Error::config(format!("invalid rate {}", rate)));
    }
    if rate <= 0.0 {
        return Ok(None);
    }
    Duration::try_from_secs_f64(1.0 / rate)
        .map(Some)
        .map_err(|_| Error::config(format!("rate {} fps is too low", rate)))
}

/// Converts a number of seconds given on the command line.
///
/// # Errors
/// [`Error::Config`] for negative, NaN, infinite or overflowing values.
pub fn seconds(value: f64) -> Result<Duration> {
    Duration::try_from_secs_f64(value)
        .map_err(|_| Error::config(format!("invalid duration {} s", value)))
}

/// `now + duration`, rejecting durations past the clock's range.
pub(crate) fn deadline_after(duration: Duration) -> Result<Instant> {
    Instant::now()
        .checked_add(duration)
        .ok_or_else(|| Error::config(format!("duration {:?} is too long", duration)))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLoopOptions {
    /// Frames per second; zero or less sends exactly one frame
    pub rate: f64,
    /// Zero runs until cancelled
    pub duration: Duration,
    pub trip: bool,
    pub start: GooseCounters,
    pub policy: CounterPolicy,
}

impl Default for RateLoopOptions {
    fn default() -> Self {
        RateLoopOptions {
            rate: 0.0,
            duration: Duration::ZERO,
            trip: false,
            start: GooseCounters::default(),
            policy: CounterPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub frames_sent: u64,
    /// Counters of the frame that would have been sent next
    pub next: GooseCounters,
    pub cancelled: bool,
}

/// Sends frames at `options.rate` until the duration elapses or `cancel` fires.
///
/// A failed send stops the loop and is returned. An unusable rate or duration
/// is rejected before the first frame.
pub async fn run_rate_loop(
    builder: &FrameBuilder,
    sink: &mut dyn FrameSink,
    options: &RateLoopOptions,
    cancel: &CancellationToken,
) -> Result<RunSummary> {
    let mut counters = options.start;
    let period = frame_period(options.rate)?;
    let deadline = if options.duration.is_zero() {
        None
    } else {
        Some(deadline_after(options.duration)?)
    };

    let Some(period) = period else {
        sink.send_frame(&counters.build(builder, options.trip)).await?;
        info!(
            st_num = counters.st_num,
            sq_num = counters.sq_num,
            trip = options.trip,
            "sent single frame"
        );
        return Ok(RunSummary {
            frames_sent: 1,
            next: counters,
            cancelled: false,
        });
    };

    info!(rate = options.rate, duration = ?options.duration, trip = options.trip, "rate loop started");

    let mut frames_sent = 0u64;
    let mut window_start = Instant::now();
    let mut window_count = 0u64;
    let mut cancelled = false;

    loop {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }
        if deadline.is_some_and(|end| Instant::now() >= end) {
            break;
        }

        sink.send_frame(&counters.build(builder, options.trip)).await?;
        frames_sent += 1;
        window_count += 1;
        counters.advance(&options.policy);

        if window_start.elapsed() >= Duration::from_secs(1) {
            info!(
                "{} pkts/s  st={}  sq={}",
                window_count, counters.st_num, counters.sq_num
            );
            window_start = Instant::now();
            window_count = 0;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                cancelled = true;
                break;
            }
            _ = sleep(period) => {}
        }
    }

    debug!(frames_sent, cancelled, "rate loop finished");
    Ok(RunSummary {
        frames_sent,
        next: counters,
        cancelled,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_independent_increments() {
        let mut counters = GooseCounters::new(5, 7);
        counters.advance(&CounterPolicy {
            inc_sq: true,
            ..Default::default()
        });
        assert_eq!(counters, GooseCounters::new(5, 8));

        counters.advance(&CounterPolicy {
            inc_st: true,
            ..Default::default()
        });
        assert_eq!(counters, GooseCounters::new(6, 8));

        counters.advance(&CounterPolicy::default());
        assert_eq!(counters, GooseCounters::new(6, 8));
    }

    #[test]
    fn test_st_wrap_to_configured_value() {
        let mut counters = GooseCounters::new(255, 0);
        counters.advance(&CounterPolicy {
            inc_st: true,
            inc_sq: false,
            st_wrap_to: 1,
        });
        assert_eq!(counters.st_num, 1);
    }

    #[test]
    fn test_frame_period() {
        assert_eq!(frame_period(0.0).unwrap(), None);
        assert_eq!(frame_period(-3.0).unwrap(), None);
        assert_eq!(frame_period(4.0).unwrap(), Some(Duration::from_millis(250)));
        assert!(matches!(frame_period(f64::NAN), Err(Error::Config(_))));
        assert!(matches!(frame_period(f64::INFINITY), Err(Error::Config(_))));
        assert!(matches!(frame_period(1e-30), Err(Error::Config(_))));
    }

    #[test]
    fn test_seconds() {
        assert_eq!(seconds(1.5).unwrap(), Duration::from_millis(1500));
        assert_eq!(seconds(0.0).unwrap(), Duration::ZERO);
        assert!(seconds(-1.0).is_err());
        assert!(seconds(f64::INFINITY).is_err());
        assert!(seconds(1e30).is_err());
    }
}
