//! Sniffer engine: decode, deduplicate, report.
//!
//! A single loop owns the [`UniqueEventTable`]. It waits on three things:
//! the cancellation token, the stats timer and the next captured frame.

use std::time::Duration;

use chrono::{DateTime, Local};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::capture::{CapturedFrame, FrameSource};
use crate::decode_goose::decode_goose_frame;
use crate::event_sink::EventSink;
use crate::event_table::{GooseEvent, UniqueEventTable};
use crate::types::DecodeError;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SnifferOptions {
    /// Period of the aggregate summary, zero disables it
    pub stats_interval: Duration,
}

/// Aggregate summary emitted on every stats tick
#[derive(Debug, Clone, PartialEq)]
pub struct SnifferStats {
    pub timestamp: DateTime<Local>,
    pub total_packets: u64,
    pub unique_count: usize,
    pub new_since_last: u64,
}

/// Totals at the end of a capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionSummary {
    pub total_packets: u64,
    pub unique_count: usize,
    pub decode_failures: u64,
}

/// Receives every new unique event and every stats tick
pub trait Reporter: Send {
    fn on_new_event(&mut self, event: &GooseEvent);
    fn on_stats(&mut self, stats: &SnifferStats);
}

/// Reporter writing to the `tracing` subscriber
#[derive(Debug, Default)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn on_new_event(&mut self, event: &GooseEvent) {
        info!(
            appid = %format_args!("0x{:04X}", event.appid),
            st_num = event.st_num,
            sq_num = event.sq_num,
            dat_set = %event.dat_set,
            conf_rev = event.conf_rev,
            test = event.test,
            src = %event.src_mac,
            vlan = ?event.vlan,
            "new GOOSE event"
        );
    }

    fn on_stats(&mut self, stats: &SnifferStats) {
        info!(
            "{}  pkts={}  unique={}  new_since_last={}",
            stats.timestamp.format("%H:%M:%S"),
            stats.total_packets,
            stats.unique_count,
            stats.new_since_last
        );
    }
}

#[derive(Debug, Default)]
pub struct Sniffer {
    table: UniqueEventTable,
    total_packets: u64,
    new_since_last: u64,
    decode_failures: u64,
}

impl Sniffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table(&self) -> &UniqueEventTable {
        &self.table
    }

    pub fn total_packets(&self) -> u64 {
        self.total_packets
    }

    pub fn unique_count(&self) -> usize {
        self.table.len()
    }

    /// Processes one captured frame.
    ///
    /// Every frame counts towards `total_packets`. Frames that fail to decode are
    /// skipped. Returns the event if its `(appid, stNum, datSet)` key is new.
    pub fn ingest(&mut self, frame: &CapturedFrame) -> Option<GooseEvent> {
        self.total_packets += 1;
        let goose = match decode_goose_frame(&frame.data) {
            Ok(goose) => goose,
            Err(err) => {
                self.decode_failures += 1;
                match err {
                    DecodeError::NotGoose { .. } => debug!(error = %err, "skipping frame"),
                    _ => warn!(error = %err, len = frame.data.len(), "skipping undecodable frame"),
                }
                return None;
            }
        };

        let seen = DateTime::<Local>::from(frame.timestamp);
        let event = GooseEvent::from_frame(&goose, seen);
        if self.table.record(event.clone()) {
            self.new_since_last += 1;
            Some(event)
        } else {
            None
        }
    }

    /// Current summary; resets the "new since last" counter.
    pub fn take_stats(&mut self) -> SnifferStats {
        let stats = SnifferStats {
            timestamp: Local::now(),
            total_packets: self.total_packets,
            unique_count: self.table.len(),
            new_since_last: self.new_since_last,
        };
        self.new_since_last = 0;
        stats
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            total_packets: self.total_packets,
            unique_count: self.table.len(),
            decode_failures: self.decode_failures,
        }
    }

    /// Runs the capture loop until the source is exhausted, an error occurs or
    /// `cancel` fires. Source and sink are closed on every exit path.
    pub async fn run(
        &mut self,
        source: &mut dyn FrameSource,
        sink: &mut dyn EventSink,
        reporter: &mut dyn Reporter,
        options: &SnifferOptions,
        cancel: &CancellationToken,
    ) -> Result<SessionSummary> {
        let mut ticker = stats_ticker(options.stats_interval);

        let result = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!("capture cancelled");
                    break Ok(());
                }
                _ = next_tick(&mut ticker) => {
                    let stats = self.take_stats();
                    reporter.on_stats(&stats);
                }
                frame = source.next_frame() => match frame {
                    Ok(Some(frame)) => {
                        if let Some(event) = self.ingest(&frame) {
                            reporter.on_new_event(&event);
                            if let Err(err) = sink.write_event(&event) {
                                break Err(err);
                            }
                        }
                    }
                    Ok(None) => {
                        debug!("capture source exhausted");
                        break Ok(());
                    }
                    Err(err) => break Err(err),
                },
            }
        };

        let source_closed = source.close().await;
        let sink_closed = sink.close();
        result?;
        source_closed?;
        sink_closed?;

        let summary = self.summary();
        info!(
            total_packets = summary.total_packets,
            unique = summary.unique_count,
            decode_failures = summary.decode_failures,
            "capture finished"
        );
        Ok(summary)
    }
}

fn stats_ticker(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(ticker)
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_goose_frame_counts_but_is_skipped() {
        let mut sniffer = Sniffer::new();
        let mut frame = vec![0u8; 12];
        frame.extend_from_slice(&[0x08, 0x06, 0x00, 0x01]);

        assert!(sniffer.ingest(&CapturedFrame::now(frame)).is_none());
        assert_eq!(sniffer.total_packets(), 1);
        assert_eq!(sniffer.unique_count(), 0);
        assert_eq!(sniffer.summary().decode_failures, 1);
    }

    #[test]
    fn test_take_stats_resets_new_counter() {
        let mut sniffer = Sniffer::new();
        let stats = sniffer.take_stats();
        assert_eq!(stats.new_since_last, 0);
        assert_eq!(stats.total_packets, 0);
    }
}
