//! Tabular output: the sink port, a CSV file sink, and CSV text helpers.

use crate::error::{EtlError, Result};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const LINE_TERMINATOR: &str = "\r\n";

/// Destination for output rows, written in order.
pub trait RowSink {
    /// Start output with the column header.
    fn begin(&mut self, header: &[String]) -> Result<()>;

    fn write_row(&mut self, values: &[String]) -> Result<()>;

    /// Make the output final.
    fn finish(&mut self) -> Result<()>;

    /// Drop anything written so far; called when writing output fails.
    fn abandon(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Writes CSV to a temporary sibling file and moves it into place on `finish`.
pub struct CsvFileSink {
    path: PathBuf,
    tmp_path: PathBuf,
    writer: Option<BufWriter<File>>,
    rows_written: usize,
}

impl CsvFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut tmp_name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        tmp_name.push(".partial");
        let tmp_path = path.with_file_name(tmp_name);
        Self {
            path,
            tmp_path,
            writer: None,
            rows_written: 0,
        }
    }

    pub fn rows_written(&self) -> usize {
        self.rows_written
    }

    fn writer(&mut self) -> Result<&mut BufWriter<File>> {
        self.writer
            .as_mut()
            .ok_or_else(|| EtlError::Csv("sink used before begin()".into()))
    }
}

impl RowSink for CsvFileSink {
    fn begin(&mut self, header: &[String]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut writer = BufWriter::new(File::create(&self.tmp_path)?);
        writer.write_all(encode_record(header).as_bytes())?;
        self.writer = Some(writer);
        debug!(path = %self.tmp_path.display(), "Opened CSV output");
        Ok(())
    }

    fn write_row(&mut self, values: &[String]) -> Result<()> {
        let line = encode_record(values);
        self.writer()?.write_all(line.as_bytes())?;
        self.rows_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let mut writer = self
            .writer
            .take()
            .ok_or_else(|| EtlError::Csv("sink finished before begin()".into()))?;
        writer.flush()?;
        drop(writer);
        fs::rename(&self.tmp_path, &self.path)?;
        Ok(())
    }

    fn abandon(&mut self) -> Result<()> {
        self.writer = None;
        if self.tmp_path.exists() {
            fs::remove_file(&self.tmp_path)?;
        }
        Ok(())
    }
}

impl Drop for CsvFileSink {
    fn drop(&mut self) {
        if self.writer.is_some() {
            if let Err(e) = self.abandon() {
                warn!(path = %self.tmp_path.display(), error = %e, "Failed to remove partial output");
            }
        }
    }
}

/// Collects rows in memory.
#[derive(Debug, Default, Clone)]
pub struct MemorySink {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
    pub finished: bool,
    pub abandoned: bool,
}

impl RowSink for MemorySink {
    fn begin(&mut self, header: &[String]) -> Result<()> {
        self.header = header.to_vec();
        Ok(())
    }

    fn write_row(&mut self, values: &[String]) -> Result<()> {
        self.rows.push(values.to_vec());
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.finished = true;
        Ok(())
    }

    fn abandon(&mut self) -> Result<()> {
        self.abandoned = true;
        Ok(())
    }
}

fn escape_csv_cell(value: &str) -> String {
    if value.contains(',') || value.contains('"') || value.contains('\n') || value.contains('\r') {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// One CSV record including its line terminator.
pub fn encode_record<S: AsRef<str>>(values: &[S]) -> String {
    let mut line = values
        .iter()
        .map(|cell| escape_csv_cell(cell.as_ref()))
        .collect::<Vec<String>>()
        .join(",");
    line.push_str(LINE_TERMINATOR);
    line
}

/// Parse CSV text into records. Quoted cells may contain separators, quotes and newlines.
pub fn parse_csv(text: &str) -> Result<Vec<Vec<String>>> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut cell = String::new();
    let mut in_quotes = false;
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    cell.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => cell.push(c),
            }
            continue;
        }
        match c {
            '"' if cell.is_empty() => in_quotes = true,
            ',' => record.push(std::mem::take(&mut cell)),
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' | '\r' => {
                record.push(std::mem::take(&mut cell));
                records.push(std::mem::take(&mut record));
            }
            _ => cell.push(c),
        }
    }

    if in_quotes {
        return Err(EtlError::Csv("unterminated quoted field".into()));
    }
    if !cell.is_empty() || !record.is_empty() {
        record.push(cell);
        records.push(record);
    }
    Ok(records)
}

/// Read a CSV file into its header and data rows.
pub fn read_csv_file(path: &Path) -> Result<(Vec<String>, Vec<Vec<String>>)> {
    let text = fs::read_to_string(path)?;
    let mut records = parse_csv(&text)?.into_iter();
    let header = records
        .next()
        .ok_or_else(|| EtlError::Csv(format!("{} has no header row", path.display())))?;
    Ok((header, records.collect()))
}
