//! Format-specific readers that turn raw file bytes into a header row plus
//! data rows of untyped cells.

use std::io::Cursor;

use calamine::{open_workbook_auto_from_rs, Data, Reader};
use tracing::debug;

use crate::{Cell, FeedError, FeedFormat, RawTable};

/// Reads one feed encoding into a [`RawTable`].
pub trait FeedReader: Send + Sync {
    fn format(&self) -> FeedFormat;
    fn read_table(&self, bytes: &[u8]) -> Result<RawTable, FeedError>;
}

/// Picks a reader from the file extension. `None` for unsupported formats.
pub fn reader_for_filename(filename: &str) -> Option<Box<dyn FeedReader>> {
    let ext = std::path::Path::new(filename)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.trim().to_ascii_lowercase())?;
    let reader: Box<dyn FeedReader> = match ext.as_str() {
        "csv" | "txt" | "tsv" => Box::new(DelimitedReader),
        "xlsx" | "xlsm" => Box::new(WorkbookReader::new(FeedFormat::Xlsx)),
        "xlsb" => Box::new(WorkbookReader::new(FeedFormat::Xlsb)),
        "xls" => Box::new(WorkbookReader::new(FeedFormat::Xls)),
        "ods" => Box::new(WorkbookReader::new(FeedFormat::Ods)),
        _ => return None,
    };
    Some(reader)
}

/// Delimited text. Every field stays text so identifier columns keep their
/// leading zeros.
#[derive(Debug, Clone, Copy, Default)]
pub struct DelimitedReader;

impl FeedReader for DelimitedReader {
    fn format(&self) -> FeedFormat {
        FeedFormat::Delimited
    }

    fn read_table(&self, bytes: &[u8]) -> Result<RawTable, FeedError> {
        let content = decode_text(bytes);
        let delimiter = sniff_delimiter(&content);
        debug!(delimiter = %(delimiter as char).escape_default(), "sniffed feed delimiter");

        let mut reader = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .has_headers(false)
            .flexible(true)
            .from_reader(content.as_bytes());

        let mut rows = Vec::new();
        for record in reader.records() {
            let record = record.map_err(|err| FeedError::Unreadable(err.to_string()))?;
            rows.push(record.iter().map(|field| Cell::Text(field.to_string())).collect());
        }
        RawTable::from_rows(rows)
    }
}

/// Strips a UTF-8 BOM; falls back to Windows-1252 for legacy exports.
pub fn decode_text(bytes: &[u8]) -> String {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => {
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(bytes);
            decoded.into_owned()
        }
    }
}

/// Most consistent delimiter over the first lines among tab, semicolon,
/// comma and pipe. Falls back to comma.
pub fn sniff_delimiter(content: &str) -> u8 {
    let candidates: &[u8] = &[b'\t', b';', b',', b'|'];
    let sample: Vec<&str> = content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .take(10)
        .collect();

    let mut best = b',';
    let mut best_score = 0usize;
    for &delim in candidates {
        let counts: Vec<usize> = sample
            .iter()
            .map(|line| {
                csv::ReaderBuilder::new()
                    .delimiter(delim)
                    .has_headers(false)
                    .flexible(true)
                    .from_reader(line.as_bytes())
                    .records()
                    .next()
                    .and_then(Result::ok)
                    .map(|r| r.len())
                    .unwrap_or(1)
            })
            .collect();

        let Some(&target) = counts.first() else {
            continue;
        };
        if target <= 1 {
            continue;
        }
        let score = counts.iter().filter(|&&c| c == target).count() * target;
        if score > best_score {
            best_score = score;
            best = delim;
        }
    }
    best
}

/// Spreadsheet workbooks via calamine. Only the first worksheet is read.
#[derive(Debug, Clone, Copy)]
pub struct WorkbookReader {
    format: FeedFormat,
}

impl WorkbookReader {
    pub fn new(format: FeedFormat) -> Self {
        Self { format }
    }
}

impl FeedReader for WorkbookReader {
    fn format(&self) -> FeedFormat {
        self.format
    }

    fn read_table(&self, bytes: &[u8]) -> Result<RawTable, FeedError> {
        let mut workbook = open_workbook_auto_from_rs(Cursor::new(bytes.to_vec()))
            .map_err(|err| FeedError::Unreadable(format!("{} workbook: {err}", self.format)))?;
        let sheet = workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or(FeedError::EmptyFile)?;
        let range = workbook
            .worksheet_range(&sheet)
            .map_err(|err| FeedError::Unreadable(format!("sheet '{sheet}': {err}")))?;
        debug!(sheet = %sheet, rows = range.height(), cols = range.width(), "read feed worksheet");

        let rows = range
            .rows()
            .map(|row| row.iter().map(cell_from_data).collect())
            .collect();
        RawTable::from_rows(rows)
    }
}

fn cell_from_data(data: &Data) -> Cell {
    match data {
        Data::Empty => Cell::Empty,
        Data::String(s) => Cell::Text(s.clone()),
        Data::Float(n) => Cell::Number(*n),
        Data::Int(n) => Cell::Number(*n as f64),
        Data::Bool(b) => Cell::Bool(*b),
        Data::DateTime(dt) => Cell::Serial(dt.as_f64()),
        Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
        Data::Error(_) => Cell::Empty,
    }
}
