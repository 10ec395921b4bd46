//! Legacy (libpcap) capture file writer, microsecond timestamps, Ethernet link type.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::Result;

const PCAP_MAGIC: u32 = 0xa1b2_c3d4;
const VERSION_MAJOR: u16 = 2;
const VERSION_MINOR: u16 = 4;
const SNAPLEN: u32 = 65_535;
/// LINKTYPE_ETHERNET
const LINKTYPE_ETHERNET: u32 = 1;

/// Writes the 24-byte global header once, then one record per frame.
#[derive(Debug)]
pub struct PcapWriter<W: Write> {
    inner: W,
}

impl<W: Write> PcapWriter<W> {
    pub fn new(mut inner: W) -> Result<Self> {
        inner.write_all(&PCAP_MAGIC.to_le_bytes())?;
        inner.write_all(&VERSION_MAJOR.to_le_bytes())?;
        inner.write_all(&VERSION_MINOR.to_le_bytes())?;
        inner.write_all(&0i32.to_le_bytes())?; // thiszone
        inner.write_all(&0u32.to_le_bytes())?; // sigfigs
        inner.write_all(&SNAPLEN.to_le_bytes())?;
        inner.write_all(&LINKTYPE_ETHERNET.to_le_bytes())?;
        Ok(PcapWriter { inner })
    }

    /// Appends one frame stamped with `timestamp`.
    pub fn write_frame_at(&mut self, frame: &[u8], timestamp: SystemTime) -> Result<()> {
        let since_epoch = timestamp.duration_since(UNIX_EPOCH).unwrap_or_default();
        let len = frame.len() as u32;
        self.inner
            .write_all(&(since_epoch.as_secs() as u32).to_le_bytes())?;
        self.inner
            .write_all(&since_epoch.subsec_micros().to_le_bytes())?;
        self.inner.write_all(&len.to_le_bytes())?;
        self.inner.write_all(&len.to_le_bytes())?;
        self.inner.write_all(frame)?;
        Ok(())
    }

    /// Appends one frame stamped with the current time.
    pub fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.write_frame_at(frame, SystemTime::now())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.inner.flush()?;
        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

/// Creates (or truncates) `path` and writes all `frames` into it.
pub fn write_pcap_file<'a, I>(path: &Path, frames: I) -> Result<usize>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut writer = PcapWriter::new(BufWriter::new(File::create(path)?))?;
    let mut count = 0;
    for frame in frames {
        writer.write_frame(frame)?;
        count += 1;
    }
    writer.flush()?;
    Ok(count)
}
