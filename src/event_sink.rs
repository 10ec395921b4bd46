//! Writers for newly discovered unique events.
//!
//! Every sink appends one complete, newline-terminated record per event and
//! flushes it before returning.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::{Map, Value};
use tracing::debug;

use crate::event_table::GooseEvent;
use crate::Result;

/// Default base path of the unique-event log
pub const DEFAULT_LOG_FILE: &str = "goose_unique.log";

/// Output column with its fixed width in the text log
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub width: usize,
}

const fn col(name: &'static str, width: usize) -> Column {
    Column { name, width }
}

const BASE_COLUMNS: [Column; 4] = [
    col("APPID", 6),
    col("stNum", 6),
    col("sqNum", 8),
    col("datSet", 20),
];
const VERBOSE_COLUMNS: [Column; 2] = [col("ConfRev", 7), col("Test", 4)];
const TIMING_COLUMNS: [Column; 1] = [col("lastSeen", 8)];
const ADDRESS_COLUMNS: [Column; 3] = [col("srcMAC", 17), col("dstMAC", 17), col("VLAN", 4)];

/// Columns written at the given verbosity (0 to 3; higher values behave like 3).
pub fn columns(verbosity: u8) -> Vec<Column> {
    let mut cols = BASE_COLUMNS.to_vec();
    if verbosity >= 1 {
        cols.extend_from_slice(&VERBOSE_COLUMNS);
    }
    if verbosity >= 2 {
        cols.extend_from_slice(&TIMING_COLUMNS);
    }
    if verbosity >= 3 {
        cols.extend_from_slice(&ADDRESS_COLUMNS);
    }
    cols
}

/// Value of one column for an event. Counters stay numeric for JSON.
pub fn column_value(event: &GooseEvent, column: &str) -> Value {
    match column {
        "APPID" => Value::from(format!("0x{:04X}", event.appid)),
        "stNum" => Value::from(event.st_num),
        "sqNum" => Value::from(event.sq_num),
        "datSet" => Value::from(event.dat_set.clone()),
        "ConfRev" => Value::from(event.conf_rev),
        "Test" => Value::from(event.test),
        "lastSeen" => Value::from(event.last_seen.format("%H:%M:%S").to_string()),
        "srcMAC" => Value::from(event.src_mac.to_string()),
        "dstMAC" => Value::from(event.dst_mac.to_string()),
        "VLAN" => match event.vlan {
            Some(id) => Value::from(id),
            None => Value::from(""),
        },
        _ => Value::Null,
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Text cells of one event in column order
pub fn row(event: &GooseEvent, cols: &[Column]) -> Vec<String> {
    cols.iter()
        .map(|c| render(&column_value(event, c.name)))
        .collect()
}

/// Header line of the text log, columns padded to their widths
pub fn header_line(cols: &[Column]) -> String {
    cols.iter()
        .map(|c| format!("{:<width$}", c.name, width = c.width))
        .collect::<Vec<_>>()
        .join("  ")
}

/// One text log line for an event, columns padded to their widths
pub fn format_line(event: &GooseEvent, cols: &[Column]) -> String {
    row(event, cols)
        .iter()
        .zip(cols)
        .map(|(cell, c)| format!("{:<width$}", cell, width = c.width))
        .collect::<Vec<_>>()
        .join("  ")
}

/// Consumer of newly discovered unique events
pub trait EventSink: Send {
    fn write_event(&mut self, event: &GooseEvent) -> Result<()>;

    /// Flushes and releases the underlying file
    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Discards all events (`-o none`)
#[derive(Debug, Default)]
pub struct NullSink;

impl EventSink for NullSink {
    fn write_event(&mut self, _event: &GooseEvent) -> Result<()> {
        Ok(())
    }
}

fn open_append(path: &Path) -> Result<(File, bool)> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let empty = file.metadata()?.len() == 0;
    Ok((file, empty))
}

/// Fixed-width text log
#[derive(Debug)]
pub struct LogSink {
    file: Option<File>,
    cols: Vec<Column>,
}

impl LogSink {
    /// Opens `path` for appending. Header and dash line are written only to an empty file.
    pub fn open(path: &Path, verbosity: u8) -> Result<Self> {
        let (mut file, empty) = open_append(path)?;
        let cols = columns(verbosity);
        if empty {
            let header = header_line(&cols);
            let dashes = "-".repeat(header.len());
            file.write_all(format!("{}\n{}\n", header, dashes).as_bytes())?;
            file.flush()?;
        }
        Ok(LogSink {
            file: Some(file),
            cols,
        })
    }
}

impl EventSink for LogSink {
    fn write_event(&mut self, event: &GooseEvent) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            let mut line = format_line(event, &self.cols);
            line.push('\n');
            file.write_all(line.as_bytes())?;
            file.flush()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }
}

/// CSV log through the `csv` crate
pub struct CsvSink {
    writer: Option<csv::Writer<File>>,
    cols: Vec<Column>,
}

impl CsvSink {
    /// Opens `path` for appending. The header row is written only to an empty file.
    pub fn open(path: &Path, verbosity: u8) -> Result<Self> {
        let (file, empty) = open_append(path)?;
        let cols = columns(verbosity);
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if empty {
            writer.write_record(cols.iter().map(|c| c.name))?;
            writer.flush()?;
        }
        Ok(CsvSink {
            writer: Some(writer),
            cols,
        })
    }
}

impl EventSink for CsvSink {
    fn write_event(&mut self, event: &GooseEvent) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.write_record(row(event, &self.cols))?;
            writer.flush()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }
        Ok(())
    }
}

/// One JSON object per line, keys in column order
#[derive(Debug)]
pub struct JsonSink {
    file: Option<File>,
    cols: Vec<Column>,
}

impl JsonSink {
    pub fn open(path: &Path, verbosity: u8) -> Result<Self> {
        let (file, _) = open_append(path)?;
        Ok(JsonSink {
            file: Some(file),
            cols: columns(verbosity),
        })
    }
}

impl EventSink for JsonSink {
    fn write_event(&mut self, event: &GooseEvent) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            let mut object = Map::new();
            for c in &self.cols {
                object.insert(c.name.to_string(), column_value(event, c.name));
            }
            let mut line = serde_json::to_string(&Value::Object(object))?;
            line.push('\n');
            file.write_all(line.as_bytes())?;
            file.flush()?;
        }
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        Ok(())
    }
}

/// Unique-event output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    None,
    Log,
    Csv,
    Json,
}

impl OutputFormat {
    /// File actually written for the base log path: `.log` as is, otherwise
    /// the extension is replaced by `csv` / `json`.
    pub fn path_for(&self, base: &Path) -> Option<PathBuf> {
        match self {
            OutputFormat::None => None,
            OutputFormat::Log => Some(base.to_path_buf()),
            OutputFormat::Csv => Some(base.with_extension("csv")),
            OutputFormat::Json => Some(base.with_extension("json")),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(OutputFormat::None),
            "log" => Ok(OutputFormat::Log),
            "csv" => Ok(OutputFormat::Csv),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!(
                "unknown output format '{}' (expected none, log, csv or json)",
                other
            )),
        }
    }
}

/// Opens the sink for `format`, deriving the file name from `base`.
pub fn open_sink(format: OutputFormat, base: &Path, verbosity: u8) -> Result<Box<dyn EventSink>> {
    let sink: Box<dyn EventSink> = match format.path_for(base) {
        None => Box::new(NullSink),
        Some(path) => {
            debug!(path = %path.display(), ?format, "opening event sink");
            match format {
                OutputFormat::Csv => Box::new(CsvSink::open(&path, verbosity)?),
                OutputFormat::Json => Box::new(JsonSink::open(&path, verbosity)?),
                _ => Box::new(LogSink::open(&path, verbosity)?),
            }
        }
    };
    Ok(sink)
}
