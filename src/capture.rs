//! Sources of raw Ethernet frames for the sniffer.
//!
//! Live sources read on a blocking thread and hand frames to the async
//! engine through a bounded `mpsc` channel.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{BufWriter, Cursor, Read};
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use pcap_parser::traits::PcapReaderIterator;
use pcap_parser::{Block, LegacyPcapReader, PcapBlockOwned, PcapError, PcapNGReader};
use pnet::datalink::{self, Channel, NetworkInterface};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_util::io::SyncIoBridge;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::ethernet::is_goose_frame;
use crate::pcap_writer::PcapWriter;
use crate::tools::find_tool;
use crate::Result;

const PCAP_READER_BUFFER_SIZE: usize = 65_536;
const CHANNEL_CAPACITY: usize = 1024;
/// Read timeout of the pnet receiver, bounds how long a stop request waits
const PNET_READ_TIMEOUT: Duration = Duration::from_millis(200);

/// One frame as delivered by a capture source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedFrame {
    pub data: Vec<u8>,
    pub timestamp: SystemTime,
}

impl CapturedFrame {
    pub fn now(data: Vec<u8>) -> Self {
        CapturedFrame {
            data,
            timestamp: SystemTime::now(),
        }
    }
}

/// Lazy, potentially infinite sequence of captured frames
#[async_trait]
pub trait FrameSource: Send {
    /// Waits for the next frame. `Ok(None)` means the source is exhausted.
    async fn next_frame(&mut self) -> Result<Option<CapturedFrame>>;

    /// Releases capture resources (child processes, sockets, files)
    async fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Frames held in memory, mainly for tests and replays of prepared traffic
#[derive(Debug, Default)]
pub struct MemorySource {
    frames: VecDeque<CapturedFrame>,
}

impl MemorySource {
    pub fn new<I>(frames: I) -> Self
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        MemorySource {
            frames: frames.into_iter().map(CapturedFrame::now).collect(),
        }
    }
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn next_frame(&mut self) -> Result<Option<CapturedFrame>> {
        Ok(self.frames.pop_front())
    }
}

fn pcap_error<E: std::fmt::Display>(context: &str, err: E) -> Error {
    Error::capture(format!("{}: {}", context, err))
}

const MICROS_PER_SEC: u64 = 1_000_000;
const NANOS_PER_SEC: u64 = 1_000_000_000;

/// Converts a timestamp counted in `1 / units_per_sec` second ticks.
fn from_ticks(ticks: u64, units_per_sec: u64) -> SystemTime {
    let units = units_per_sec.max(1);
    let nanos = (ticks % units) as u128 * NANOS_PER_SEC as u128 / units as u128;
    UNIX_EPOCH + Duration::from_secs(ticks / units) + Duration::from_nanos(nanos as u64)
}

/// Ticks per second for a pcapng `if_tsresol` value: a power of ten, or of two
/// when the top bit is set
fn tsresol_units(tsresol: u8) -> u64 {
    let exponent = (tsresol & 0x7f) as u32;
    let units = if tsresol & 0x80 == 0 {
        10u64.checked_pow(exponent)
    } else {
        2u64.checked_pow(exponent)
    };
    units.unwrap_or(MICROS_PER_SEC)
}

enum PcapReader {
    Legacy {
        reader: LegacyPcapReader<Box<dyn Read + Send>>,
        /// Sub-second field unit, from the file magic
        units_per_sec: u64,
    },
    Ng {
        reader: PcapNGReader<Box<dyn Read + Send>>,
        /// Timestamp resolution per interface, in interface id order
        units_per_sec: Vec<u64>,
    },
}

/// Blocking reader of a legacy pcap or pcapng byte stream.
///
/// Works on non-seekable input (pipes): the magic number is read once and put
/// back in front of the stream.
pub struct PcapStream {
    inner: PcapReader,
}

impl PcapStream {
    pub fn new<R: Read + Send + 'static>(mut reader: R) -> Result<Self> {
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        let chained: Box<dyn Read + Send> = Box::new(Cursor::new(magic).chain(reader));

        let inner = if magic == [0x0a, 0x0d, 0x0d, 0x0a] {
            PcapReader::Ng {
                reader: PcapNGReader::new(PCAP_READER_BUFFER_SIZE, chained)
                    .map_err(|e| pcap_error("pcapng reader init", e))?,
                units_per_sec: Vec::new(),
            }
        } else {
            PcapReader::Legacy {
                reader: LegacyPcapReader::new(PCAP_READER_BUFFER_SIZE, chained)
                    .map_err(|e| pcap_error("pcap reader init", e))?,
                units_per_sec: MICROS_PER_SEC,
            }
        };
        Ok(PcapStream { inner })
    }

    /// Next packet record, skipping headers and other block types.
    pub fn next_packet(&mut self) -> Result<Option<CapturedFrame>> {
        loop {
            match &mut self.inner {
                PcapReader::Legacy {
                    reader,
                    units_per_sec,
                } => match reader.next() {
                    Ok((offset, block)) => {
                        let frame = match block {
                            PcapBlockOwned::LegacyHeader(header) => {
                                if header.is_nanosecond_precision() {
                                    *units_per_sec = NANOS_PER_SEC;
                                }
                                None
                            }
                            PcapBlockOwned::Legacy(packet) => {
                                let ticks = packet.ts_sec as u64 * *units_per_sec
                                    + packet.ts_usec as u64;
                                Some(CapturedFrame {
                                    data: packet.data.to_vec(),
                                    timestamp: from_ticks(ticks, *units_per_sec),
                                })
                            }
                            _ => None,
                        };
                        reader.consume(offset);
                        if frame.is_some() {
                            return Ok(frame);
                        }
                    }
                    Err(PcapError::Eof) => return Ok(None),
                    Err(PcapError::Incomplete(_)) => {
                        reader
                            .refill()
                            .map_err(|e| pcap_error("pcap reader refill", e))?;
                    }
                    Err(e) => return Err(pcap_error("pcap reader next", e)),
                },
                PcapReader::Ng {
                    reader,
                    units_per_sec,
                } => match reader.next() {
                    Ok((offset, block)) => {
                        let frame = match block {
                            PcapBlockOwned::NG(Block::SectionHeader(_)) => {
                                units_per_sec.clear();
                                None
                            }
                            PcapBlockOwned::NG(Block::InterfaceDescription(idb)) => {
                                units_per_sec.push(tsresol_units(idb.if_tsresol));
                                None
                            }
                            PcapBlockOwned::NG(Block::EnhancedPacket(packet)) => {
                                let ticks =
                                    ((packet.ts_high as u64) << 32) | packet.ts_low as u64;
                                let units = units_per_sec
                                    .get(packet.if_id as usize)
                                    .copied()
                                    .unwrap_or(MICROS_PER_SEC);
                                Some(CapturedFrame {
                                    data: packet.data.to_vec(),
                                    timestamp: from_ticks(ticks, units),
                                })
                            }
                            _ => None,
                        };
                        reader.consume(offset);
                        if frame.is_some() {
                            return Ok(frame);
                        }
                    }
                    Err(PcapError::Eof) => return Ok(None),
                    Err(PcapError::Incomplete(_)) => {
                        reader
                            .refill()
                            .map_err(|e| pcap_error("pcapng reader refill", e))?;
                    }
                    Err(e) => return Err(pcap_error("pcapng reader next", e)),
                },
            }
        }
    }
}

/// Offline replay of a `.pcap` / `.pcapng` file
pub struct PcapFileSource {
    stream: PcapStream,
}

impl PcapFileSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        info!(path = %path.display(), "reading capture file");
        Ok(PcapFileSource {
            stream: PcapStream::new(file)?,
        })
    }
}

#[async_trait]
impl FrameSource for PcapFileSource {
    async fn next_frame(&mut self) -> Result<Option<CapturedFrame>> {
        self.stream.next_packet()
    }
}

/// Receiving end shared by the thread-backed live sources
struct ChannelSource {
    rx: mpsc::Receiver<Result<CapturedFrame>>,
}

impl ChannelSource {
    async fn recv(&mut self) -> Result<Option<CapturedFrame>> {
        match self.rx.recv().await {
            Some(Ok(frame)) => Ok(Some(frame)),
            Some(Err(err)) => Err(err),
            None => Ok(None),
        }
    }
}

/// Live capture with a kernel BPF filter, read from `tcpdump -w -`
pub struct TcpdumpSource {
    child: Option<Child>,
    frames: ChannelSource,
}

impl TcpdumpSource {
    /// Spawns `tcpdump` on `interface` with the given filter expression.
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    /// [`Error::MissingExternalTool`] if `tcpdump` is not installed.
    pub fn spawn(interface: &str, filter: &str) -> Result<Self> {
        Self::spawn_with("tcpdump", interface, filter)
    }

    /// Like [`TcpdumpSource::spawn`] with another tcpdump-compatible program,
    /// which must write a pcap stream to stdout.
    pub fn spawn_with(program: &str, interface: &str, filter: &str) -> Result<Self> {
        let program = find_tool(program)?;
        let mut child = Command::new(program)
            .args(["-i", interface, "-U", "-s", "0", "-w", "-"])
            .arg(filter)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::capture("tcpdump stdout not captured"))?;
        info!(interface, filter, "live capture started (BPF)");

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::task::spawn_blocking(move || {
            let mut stream = match PcapStream::new(SyncIoBridge::new(stdout)) {
                Ok(stream) => stream,
                Err(err) => {
                    let _ = tx.blocking_send(Err(err));
                    return;
                }
            };
            loop {
                match stream.next_packet() {
                    Ok(Some(frame)) => {
                        if tx.blocking_send(Ok(frame)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        let _ = tx.blocking_send(Err(err));
                        break;
                    }
                }
            }
            debug!("tcpdump reader finished");
        });

        Ok(TcpdumpSource {
            child: Some(child),
            frames: ChannelSource { rx },
        })
    }
}

#[async_trait]
impl FrameSource for TcpdumpSource {
    async fn next_frame(&mut self) -> Result<Option<CapturedFrame>> {
        self.frames.recv().await
    }

    /// Stops tcpdump and reaps it. Dropping the source without closing it
    /// still kills the process.
    async fn close(&mut self) -> Result<()> {
        self.frames.rx.close();
        if let Some(mut child) = self.child.take() {
            if child.try_wait()?.is_none() {
                child.kill().await?;
            }
        }
        Ok(())
    }
}

/// Finds a network interface by name.
pub fn find_interface(name: &str) -> Result<NetworkInterface> {
    datalink::interfaces()
        .into_iter()
        .find(|iface| iface.name == name)
        .ok_or_else(|| Error::config(format!("unknown interface '{}'", name)))
}

/// Live capture through a pnet datalink socket, without a kernel filter.
///
/// Frames are filtered in user space: only GOOSE behind at most one VLAN tag is delivered.
pub struct PnetSource {
    stop: Arc<AtomicBool>,
    frames: ChannelSource,
}

impl PnetSource {
    pub fn open(interface: &str) -> Result<Self> {
        let iface = find_interface(interface)?;
        let config = datalink::Config {
            read_timeout: Some(PNET_READ_TIMEOUT),
            ..Default::default()
        };
        let mut datalink_rx = match datalink::channel(&iface, config) {
            Ok(Channel::Ethernet(_, rx)) => rx,
            Ok(_) => return Err(Error::capture("unsupported datalink channel type")),
            Err(e) => return Err(Error::capture(format!("failed to open {}: {}", interface, e))),
        };
        info!(interface, "live capture started (no BPF)");

        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        thread::spawn(move || {
            while !stop_flag.load(Ordering::Relaxed) && !tx.is_closed() {
                match datalink_rx.next() {
                    Ok(packet) => {
                        if !is_goose_frame(packet) {
                            continue;
                        }
                        if tx.blocking_send(Ok(CapturedFrame::now(packet.to_vec()))).is_err() {
                            break;
                        }
                    }
                    Err(e)
                        if matches!(
                            e.kind(),
                            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock
                        ) => {}
                    Err(e) => {
                        warn!(error = %e, "datalink receive failed");
                        let _ = tx.blocking_send(Err(Error::Io(e)));
                        break;
                    }
                }
            }
            debug!("datalink reader finished");
        });

        Ok(PnetSource {
            stop,
            frames: ChannelSource { rx },
        })
    }
}

#[async_trait]
impl FrameSource for PnetSource {
    async fn next_frame(&mut self) -> Result<Option<CapturedFrame>> {
        self.frames.recv().await
    }

    async fn close(&mut self) -> Result<()> {
        self.stop.store(true, Ordering::Relaxed);
        self.frames.rx.close();
        Ok(())
    }
}

impl Drop for PnetSource {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}

/// Tees every frame of an inner source into a pcap file (`-w`)
pub struct DumpingSource {
    inner: Box<dyn FrameSource>,
    writer: Option<PcapWriter<BufWriter<File>>>,
}

impl DumpingSource {
    pub fn create(inner: Box<dyn FrameSource>, path: &Path) -> Result<Self> {
        let writer = PcapWriter::new(BufWriter::new(File::create(path)?))?;
        info!(path = %path.display(), "dumping raw frames");
        Ok(DumpingSource {
            inner,
            writer: Some(writer),
        })
    }
}

#[async_trait]
impl FrameSource for DumpingSource {
    async fn next_frame(&mut self) -> Result<Option<CapturedFrame>> {
        let frame = self.inner.next_frame().await?;
        if let (Some(frame), Some(writer)) = (frame.as_ref(), self.writer.as_mut()) {
            writer.write_frame_at(&frame.data, frame.timestamp)?;
            writer.flush()?;
        }
        Ok(frame)
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        self.inner.close().await
    }
}
