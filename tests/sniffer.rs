use std::collections::VecDeque;
use std::fs;
use std::time::Duration;

use async_trait::async_trait;
use goose_tools::capture::{
    CapturedFrame, FrameSource, MemorySource, PcapFileSource, TcpdumpSource,
};
use goose_tools::event_sink::{
    open_sink, CsvSink, EventSink, JsonSink, LogSink, NullSink, OutputFormat,
};
use goose_tools::event_table::{GooseEvent, UniqueEventTable};
use goose_tools::filter::{build_goose_filter, goose_filter_clauses};
use goose_tools::pcap_writer::write_pcap_file;
use goose_tools::sniffer::{Reporter, Sniffer, SnifferOptions, SnifferStats};
use goose_tools::target::{FrameBuilder, TargetProfile};
use goose_tools::types::{MacAddr, Timestamp};
use tokio_util::sync::CancellationToken;

fn builder(dat_set: &str) -> FrameBuilder {
    let profile = TargetProfile {
        dat_set: dat_set.to_string(),
        ..Default::default()
    };
    FrameBuilder::new(profile, MacAddr::default(), false)
}

fn frame(st_num: u32, sq_num: u32) -> Vec<u8> {
    builder("IEDA/LLN0$AnalogValues").build_at(st_num, sq_num, false, Timestamp::default())
}

/// Five frames, the key (0x03E8, stNum 1, AnalogValues) appears twice
fn five_frames() -> Vec<Vec<u8>> {
    vec![
        frame(1, 0),
        frame(2, 0),
        frame(1, 1),
        frame(3, 0),
        builder("IEDA/LLN0$Status").build_at(1, 0, false, Timestamp::default()),
    ]
}

#[derive(Default)]
struct RecordingReporter {
    events: Vec<GooseEvent>,
    stats: Vec<SnifferStats>,
}

impl Reporter for RecordingReporter {
    fn on_new_event(&mut self, event: &GooseEvent) {
        self.events.push(event.clone());
    }

    fn on_stats(&mut self, stats: &SnifferStats) {
        self.stats.push(stats.clone());
    }
}

#[derive(Default)]
struct RecordingSink {
    events: Vec<GooseEvent>,
    closed: bool,
}

impl EventSink for RecordingSink {
    fn write_event(&mut self, event: &GooseEvent) -> goose_tools::Result<()> {
        self.events.push(event.clone());
        Ok(())
    }

    fn close(&mut self) -> goose_tools::Result<()> {
        self.closed = true;
        Ok(())
    }
}

/// Yields its frames, then waits forever like an idle interface
struct IdleAfterSource {
    frames: VecDeque<Vec<u8>>,
}

#[async_trait]
impl FrameSource for IdleAfterSource {
    async fn next_frame(&mut self) -> goose_tools::Result<Option<CapturedFrame>> {
        match self.frames.pop_front() {
            Some(data) => Ok(Some(CapturedFrame::now(data))),
            None => std::future::pending().await,
        }
    }
}

#[tokio::test]
async fn test_end_to_end_unique_count() {
    let mut source = MemorySource::new(five_frames());
    let mut sink = RecordingSink::default();
    let mut reporter = RecordingReporter::default();
    let mut sniffer = Sniffer::new();

    let summary = sniffer
        .run(
            &mut source,
            &mut sink,
            &mut reporter,
            &SnifferOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(summary.total_packets, 5);
    assert_eq!(summary.unique_count, 4);
    assert_eq!(summary.decode_failures, 0);
    assert_eq!(sink.events.len(), 4);
    assert_eq!(reporter.events.len(), 4);
    assert!(sink.closed);

    let st_nums: Vec<u32> = sink.events.iter().map(|e| e.st_num).collect();
    assert_eq!(st_nums, [1, 2, 3, 1]);
    assert_eq!(sink.events[3].dat_set, "IEDA/LLN0$Status");
}

#[tokio::test]
async fn test_repeated_key_moves_to_most_recent() {
    let mut sniffer = Sniffer::new();
    for data in five_frames() {
        sniffer.ingest(&CapturedFrame::now(data));
    }

    let order: Vec<(u32, u32)> = sniffer
        .table()
        .iter()
        .map(|e| (e.st_num, e.sq_num))
        .collect();
    // stNum 1 was refreshed by its second frame (sqNum 1) before stNum 3 arrived
    assert_eq!(order, [(2, 0), (1, 1), (3, 0), (1, 0)]);
}

#[tokio::test]
async fn test_undecodable_frames_are_counted_and_skipped() {
    let mut truncated = frame(5, 0);
    truncated.truncate(40);
    let mut arp = vec![0xff; 12];
    arp.extend_from_slice(&[0x08, 0x06, 0x00, 0x01]);

    let mut source = MemorySource::new(vec![truncated, frame(1, 0), arp]);
    let mut sniffer = Sniffer::new();
    let summary = sniffer
        .run(
            &mut source,
            &mut NullSink,
            &mut RecordingReporter::default(),
            &SnifferOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(summary.total_packets, 3);
    assert_eq!(summary.unique_count, 1);
    assert_eq!(summary.decode_failures, 2);
}

#[tokio::test]
async fn test_cancelled_before_start() {
    let cancel = CancellationToken::new();
    cancel.cancel();

    let mut source = MemorySource::new(five_frames());
    let mut sink = RecordingSink::default();
    let summary = Sniffer::new()
        .run(
            &mut source,
            &mut sink,
            &mut RecordingReporter::default(),
            &SnifferOptions::default(),
            &cancel,
        )
        .await
        .unwrap();

    assert_eq!(summary.total_packets, 0);
    assert!(sink.closed);
}

#[tokio::test(start_paused = true)]
async fn test_stats_interval_reports_and_resets() {
    let mut source = IdleAfterSource {
        frames: five_frames().into(),
    };
    let mut sink = RecordingSink::default();
    let mut reporter = RecordingReporter::default();
    let mut sniffer = Sniffer::new();
    let cancel = CancellationToken::new();
    let options = SnifferOptions {
        stats_interval: Duration::from_secs(10),
    };

    let stop = async {
        tokio::time::sleep(Duration::from_secs(35)).await;
        cancel.cancel();
    };
    let run = sniffer.run(&mut source, &mut sink, &mut reporter, &options, &cancel);
    let (summary, ()) = tokio::join!(run, stop);
    let summary = summary.unwrap();

    assert_eq!(summary.total_packets, 5);
    assert_eq!(reporter.stats.len(), 3);
    assert_eq!(reporter.stats[0].total_packets, 5);
    assert_eq!(reporter.stats[0].unique_count, 4);
    assert_eq!(reporter.stats[0].new_since_last, 4);
    assert_eq!(reporter.stats[1].new_since_last, 0);
    assert_eq!(reporter.stats[2].new_since_last, 0);
}

#[tokio::test]
async fn test_pcap_file_replay() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("goose.pcap");
    let frames = five_frames();
    let written = write_pcap_file(&path, frames.iter().map(|f| f.as_slice())).unwrap();
    assert_eq!(written, 5);

    let mut source = PcapFileSource::open(&path).unwrap();
    let summary = Sniffer::new()
        .run(
            &mut source,
            &mut NullSink,
            &mut RecordingReporter::default(),
            &SnifferOptions::default(),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(summary.total_packets, 5);
    assert_eq!(summary.unique_count, 4);
}

#[test]
fn test_unique_event_table_single_emission() {
    let mut table = UniqueEventTable::new();
    let mut sniffer = Sniffer::new();
    let first = sniffer.ingest(&CapturedFrame::now(frame(1, 0))).unwrap();
    assert!(sniffer.ingest(&CapturedFrame::now(frame(1, 1))).is_none());

    assert!(table.record(first.clone()));
    let mut repeat = first.clone();
    repeat.sq_num = 9;
    repeat.time = repeat.time + chrono::Duration::seconds(5);
    assert!(!table.record(repeat));

    assert_eq!(table.len(), 1);
    let stored = table.get(&first.key()).unwrap();
    assert_eq!(stored.sq_num, 9);
    assert_eq!(stored.time, first.time);
}

#[test]
fn test_filter_clause_per_depth() {
    assert_eq!(goose_filter_clauses(2).len(), 3);
    assert_eq!(goose_filter_clauses(0), ["ether proto 0x88B8"]);
    assert_eq!(build_goose_filter(0), "ether proto 0x88B8");
    assert_eq!(build_goose_filter(3).matches(" or ").count(), 3);
}

fn sample_event() -> GooseEvent {
    let mut sniffer = Sniffer::new();
    sniffer.ingest(&CapturedFrame::now(frame(2, 17))).unwrap()
}

#[test]
fn test_log_sink_writes_header_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("goose_unique.log");
    let event = sample_event();

    let mut sink = LogSink::open(&path, 0).unwrap();
    sink.write_event(&event).unwrap();
    sink.close().unwrap();
    let mut sink = LogSink::open(&path, 0).unwrap();
    sink.write_event(&event).unwrap();
    sink.close().unwrap();

    let text = fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 4);
    assert!(lines[0].starts_with("APPID   stNum   sqNum"));
    assert!(lines[1].chars().all(|c| c == '-'));
    assert!(lines[2].starts_with("0x03E8  2       17        IEDA/LLN0$AnalogValues"));
    assert_eq!(lines[2], lines[3]);
}

#[test]
fn test_csv_sink_columns_by_verbosity() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.csv");

    let mut sink = CsvSink::open(&path, 3).unwrap();
    sink.write_event(&sample_event()).unwrap();
    sink.close().unwrap();

    let text = fs::read_to_string(&path).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(
        lines[0],
        "APPID,stNum,sqNum,datSet,ConfRev,Test,lastSeen,srcMAC,dstMAC,VLAN"
    );
    let cells: Vec<&str> = lines[1].split(',').collect();
    assert_eq!(cells[0], "0x03E8");
    assert_eq!(cells[1], "2");
    assert_eq!(cells[2], "17");
    assert_eq!(cells[5], "false");
    assert_eq!(cells[7], "00:e0:4c:94:2b:b3");
    assert_eq!(cells[9], "1");
}

#[test]
fn test_json_sink_one_object_per_line() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("events.json");

    let mut sink = JsonSink::open(&path, 1).unwrap();
    sink.write_event(&sample_event()).unwrap();
    sink.write_event(&sample_event()).unwrap();
    sink.close().unwrap();

    let text = fs::read_to_string(&path).unwrap();
    assert_eq!(text.lines().count(), 2);
    let value: serde_json::Value = serde_json::from_str(text.lines().next().unwrap()).unwrap();
    assert_eq!(value["APPID"], "0x03E8");
    assert_eq!(value["stNum"], 2);
    assert_eq!(value["ConfRev"], 1);
    assert_eq!(value["Test"], false);
    assert!(value.get("lastSeen").is_none());
}

#[test]
fn test_open_sink_derives_file_name() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("goose_unique.log");

    let mut sink = open_sink(OutputFormat::Csv, &base, 0).unwrap();
    sink.write_event(&sample_event()).unwrap();
    sink.close().unwrap();
    assert!(dir.path().join("goose_unique.csv").exists());
    assert!(!base.exists());

    let mut sink = open_sink(OutputFormat::None, &base, 0).unwrap();
    sink.write_event(&sample_event()).unwrap();
    assert!(!base.exists());

    assert_eq!("JSON".parse::<OutputFormat>(), Ok(OutputFormat::Json));
    assert!("xml".parse::<OutputFormat>().is_err());
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread")]
async fn test_tcpdump_source_streams_and_closes() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let capture = dir.path().join("live.pcap");
    write_pcap_file(&capture, [frame(4, 2)].iter().map(|f| f.as_slice())).unwrap();
    // Emits a capture, then stays alive like tcpdump on a quiet link
    let program = dir.path().join("fake-tcpdump");
    fs::write(
        &program,
        format!("#!/bin/sh\ncat \"{}\"\nexec sleep 30\n", capture.display()),
    )
    .unwrap();
    fs::set_permissions(&program, fs::Permissions::from_mode(0o755)).unwrap();

    let mut source = TcpdumpSource::spawn_with(
        program.to_str().unwrap(),
        "lo",
        &build_goose_filter(1),
    )
    .unwrap();
    let first = source.next_frame().await.unwrap().unwrap();
    assert_eq!(first.data, frame(4, 2));

    tokio::time::timeout(Duration::from_secs(5), source.close())
        .await
        .expect("close did not stop the capture process")
        .unwrap();
    assert!(source.next_frame().await.unwrap().is_none());
}
