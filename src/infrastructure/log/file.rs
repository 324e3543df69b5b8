//! Daily execution log files.
//!
//! The extension selects the parser: `*.log` files hold raw rows only,
//! `*.clog` files hold one raw row followed by delta rows.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, TimeZone, Utc};
use tracing::{debug, info};

use super::codec::{decode_raw, encode_raw, DeltaDecoder, DeltaEncoder, LogRecord};
use crate::error::{CodecError, Result};

/// On-disk row layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Every row raw (`*.log`).
    Full,
    /// Delta rows after the first (`*.clog`).
    Compact,
}

impl LogFormat {
    /// Format implied by a file's extension.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::UnknownFormat`] for any other extension.
    pub fn from_path(path: &Path) -> std::result::Result<Self, CodecError> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("log") => Ok(Self::Full),
            Some("clog") => Ok(Self::Compact),
            _ => Err(CodecError::UnknownFormat(path.display().to_string())),
        }
    }

    #[must_use]
    pub const fn extension(self) -> &'static str {
        match self {
            Self::Full => "log",
            Self::Compact => "clog",
        }
    }

    /// Encode `records` as rows of this format.
    pub fn encode(self, records: &[LogRecord]) -> std::result::Result<Vec<String>, CodecError> {
        match self {
            Self::Full => records.iter().map(encode_raw).collect(),
            Self::Compact => {
                let mut encoder = DeltaEncoder::new();
                records.iter().map(|record| encoder.encode(record)).collect()
            }
        }
    }

    /// Decode rows of this format, failing on the first bad row.
    ///
    /// Empty rows are skipped; errors report the 1-based position in `rows`.
    pub fn decode<'a, I>(self, rows: I) -> std::result::Result<Vec<LogRecord>, CodecError>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let rows = rows
            .into_iter()
            .enumerate()
            .filter(|(_, row)| !row.is_empty())
            .map(|(index, row)| (index + 1, row));
        match self {
            Self::Full => rows.map(|(line, row)| decode_raw(row, line)).collect(),
            Self::Compact => {
                let mut decoder = DeltaDecoder::new();
                rows.map(|(line, row)| decoder.decode_line(row, line)).collect()
            }
        }
    }
}

/// Read every record of a log file, choosing the parser by extension.
pub fn read_log(path: &Path) -> Result<Vec<LogRecord>> {
    let format = LogFormat::from_path(path)?;
    let reader = BufReader::new(File::open(path)?);
    let lines = reader.lines().collect::<std::io::Result<Vec<String>>>()?;
    Ok(format.decode(lines.iter().map(String::as_str))?)
}

/// Write `records` to `path`, replacing it, in the format its extension implies.
pub fn write_log(path: &Path, records: &[LogRecord]) -> Result<()> {
    let format = LogFormat::from_path(path)?;
    let rows = format.encode(records)?;

    let mut writer = BufWriter::new(File::create(path)?);
    for row in rows {
        writeln!(writer, "{row}")?;
    }
    writer.flush()?;
    Ok(())
}

/// Convert a full log into a compacted one. Returns the record count.
pub fn compact(source: &Path, destination: &Path) -> Result<usize> {
    convert(source, destination, LogFormat::Compact)
}

/// Convert a compacted log into a full one. Returns the record count.
pub fn expand(source: &Path, destination: &Path) -> Result<usize> {
    convert(source, destination, LogFormat::Full)
}

fn convert(source: &Path, destination: &Path, target: LogFormat) -> Result<usize> {
    let found = LogFormat::from_path(destination)?;
    if found != target {
        return Err(CodecError::UnknownFormat(format!(
            "{} (expected .{})",
            destination.display(),
            target.extension()
        ))
        .into());
    }

    let records = read_log(source)?;
    write_log(destination, &records)?;
    info!(
        source = %source.display(),
        destination = %destination.display(),
        records = records.len(),
        "Converted execution log"
    );
    Ok(records.len())
}

/// Daily file name for `date`.
#[must_use]
pub fn daily_file_name(date: NaiveDate, format: LogFormat) -> String {
    format!("execution{}.{}", date.format("%Y%m%d"), format.extension())
}

struct OpenFile {
    date: NaiveDate,
    writer: BufWriter<File>,
    encoder: Option<DeltaEncoder>,
}

/// Appends records to `execution{yyyyMMdd}.log|.clog` files in one directory.
///
/// Records are routed to the file of their UTC day. Reopening an existing
/// compacted file resumes delta encoding from its last record.
pub struct ExecutionLogWriter {
    dir: PathBuf,
    format: LogFormat,
    current: Option<OpenFile>,
}

impl ExecutionLogWriter {
    /// Create the directory if needed.
    pub fn new(dir: impl Into<PathBuf>, format: LogFormat) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            format,
            current: None,
        })
    }

    #[must_use]
    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(daily_file_name(date, self.format))
    }

    /// Append one record to its day's file.
    pub fn append(&mut self, record: &LogRecord) -> Result<()> {
        let date = Utc
            .timestamp_millis_opt(record.time_ms)
            .single()
            .unwrap_or_default()
            .date_naive();

        if self.current.as_ref().map(|open| open.date) != Some(date) {
            self.flush()?;
            self.current = Some(self.open(date)?);
        }

        if let Some(open) = self.current.as_mut() {
            let row = match open.encoder.as_mut() {
                Some(encoder) => encoder.encode(record)?,
                None => encode_raw(record)?,
            };
            writeln!(open.writer, "{row}")?;
        }
        Ok(())
    }

    fn open(&self, date: NaiveDate) -> Result<OpenFile> {
        let path = self.path_for(date);
        let encoder = match self.format {
            LogFormat::Full => None,
            LogFormat::Compact if path.exists() => Some(match read_log(&path)?.pop() {
                Some(last) => DeltaEncoder::resume(last),
                None => DeltaEncoder::new(),
            }),
            LogFormat::Compact => Some(DeltaEncoder::new()),
        };

        debug!(path = %path.display(), "Opening execution log");
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(OpenFile {
            date,
            writer: BufWriter::new(file),
            encoder,
        })
    }

    /// Flush buffered rows of the current file.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(open) = self.current.as_mut() {
            open.writer.flush()?;
        }
        Ok(())
    }
}

impl Drop for ExecutionLogWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
