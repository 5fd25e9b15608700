//! Raw input readers and delimited-text export.
//!
//! Readers only split input into [`RawRecord`]s of `column -> optional text`;
//! all typing and validation happens in the normalizer.

pub mod export;

pub use export::{export_csv, export_csv_string, import_csv, write_csv_file};

use crate::error::{EngineError, EngineResult};
use csv::{ReaderBuilder, Trim};
use serde_json::Value as JsonValue;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, info};

/// Supported raw input shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum InputFormat {
    /// JSON array of objects (streaming-history export)
    Json,
    /// Comma-separated table with a header row
    Csv,
    /// Tab-separated table with a header row
    Tsv,
}

impl InputFormat {
    /// Guess the format from a file extension, defaulting to JSON.
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase())
            .as_deref()
        {
            Some("csv") => InputFormat::Csv,
            Some("tsv") | Some("tab") => InputFormat::Tsv,
            _ => InputFormat::Json,
        }
    }
}

/// One raw input row: ordered `(column, value)` pairs, `None` for null/empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    fields: Vec<(String, Option<String>)>,
}

impl RawRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: Option<String>) {
        self.fields.push((name.into(), value));
    }

    /// Builder-style [`push`](Self::push) for a present value.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.push(name, Some(value.into()));
        self
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, Option<&str>)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v.as_deref()))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Read a JSON array of objects.
///
/// Non-object elements become empty records, which the normalizer drops
/// and counts.
pub fn read_json<R: Read>(reader: R) -> EngineResult<Vec<RawRecord>> {
    let value: JsonValue = serde_json::from_reader(reader)?;

    let items = match value {
        JsonValue::Array(items) => items,
        other => {
            return Err(EngineError::Ingest(format!(
                "expected a JSON array of records, found {}",
                json_type_name(&other)
            )))
        }
    };

    let records: Vec<RawRecord> = items
        .into_iter()
        .map(|item| match item {
            JsonValue::Object(map) => {
                let mut record = RawRecord::new();
                for (name, value) in map {
                    record.push(name, json_cell(value));
                }
                record
            }
            other => {
                debug!("Skipping non-object JSON element: {}", json_type_name(&other));
                RawRecord::new()
            }
        })
        .collect();

    debug!("Read {} JSON records", records.len());
    Ok(records)
}

fn json_cell(value: JsonValue) -> Option<String> {
    match value {
        JsonValue::Null => None,
        JsonValue::String(s) => Some(s),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

fn json_type_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a boolean",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "an array",
        JsonValue::Object(_) => "an object",
    }
}

/// Read a delimited table with a header row.
///
/// Short rows are padded with absent values; cells beyond the header are
/// ignored.
pub fn read_delimited<R: Read>(reader: R, delimiter: u8) -> EngineResult<Vec<RawRecord>> {
    let mut csv_reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);

    let headers: Vec<String> = csv_reader
        .headers()?
        .iter()
        .map(|h| h.to_string())
        .collect();

    let mut records = Vec::new();
    for row in csv_reader.records() {
        let row = row?;
        let mut record = RawRecord::new();
        for (i, header) in headers.iter().enumerate() {
            let cell = row
                .get(i)
                .filter(|c| !c.is_empty())
                .map(|c| c.to_string());
            record.push(header.clone(), cell);
        }
        records.push(record);
    }

    debug!(
        "Read {} delimited records with {} columns",
        records.len(),
        headers.len()
    );
    Ok(records)
}

/// Read raw records from a file, detecting the format from its extension
/// unless one is given.
pub fn read_path(path: &Path, format: Option<InputFormat>) -> EngineResult<Vec<RawRecord>> {
    let format = format.unwrap_or_else(|| InputFormat::from_path(path));
    info!("Reading {} as {:?}", path.display(), format);

    let reader = BufReader::new(File::open(path)?);
    match format {
        InputFormat::Json => read_json(reader),
        InputFormat::Csv => read_delimited(reader, b','),
        InputFormat::Tsv => read_delimited(reader, b'\t'),
    }
}
