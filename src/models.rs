//! Data models for the analytics engine.
//!
//! This module contains the canonical record and dataset types, the
//! typed schema descriptor, and the result objects handed to the
//! presentation layer.

use crate::cache::fingerprint;
use crate::error::{EngineError, EngineResult};
use chrono::{NaiveDate, NaiveDateTime};
use once_cell::sync::OnceCell;
use serde::Serialize;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Names of the built-in canonical columns.
pub mod columns {
    pub const TIMESTAMP: &str = "timestamp";
    pub const ENTITY_NAME: &str = "entityName";
    pub const ITEM_NAME: &str = "itemName";
    pub const DURATION_MS: &str = "durationMs";
    pub const MINUTES_PLAYED: &str = "minutesPlayed";
    pub const HOUR: &str = "hour";
    pub const DAY_OF_WEEK: &str = "dayOfWeek";
    pub const MONTH: &str = "month";
    pub const YEAR: &str = "year";
    pub const DATE: &str = "date";
    pub const YEAR_MONTH: &str = "yearMonth";
    pub const COMPLETION: &str = "completion";
}

pub const DAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

pub const MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// Kind of a column in the schema descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnKind {
    Numeric,
    Categorical,
    Datetime,
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ColumnKind::Numeric => write!(f, "numeric"),
            ColumnKind::Categorical => write!(f, "categorical"),
            ColumnKind::Datetime => write!(f, "datetime"),
        }
    }
}

/// A column reference resolved against a [`Schema`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Column {
    Timestamp,
    EntityName,
    ItemName,
    DurationMs,
    MinutesPlayed,
    Hour,
    DayOfWeek,
    Month,
    Year,
    Date,
    YearMonth,
    Completion,
    /// Extra numeric column (platform metric).
    Metric(String),
    /// Extra categorical column (opaque metadata).
    Meta(String),
}

const BUILTIN_COLUMNS: [Column; 12] = [
    Column::Timestamp,
    Column::EntityName,
    Column::ItemName,
    Column::DurationMs,
    Column::MinutesPlayed,
    Column::Hour,
    Column::DayOfWeek,
    Column::Month,
    Column::Year,
    Column::Date,
    Column::YearMonth,
    Column::Completion,
];

impl Column {
    /// Look up a built-in column by name.
    pub fn builtin(name: &str) -> Option<Column> {
        BUILTIN_COLUMNS.iter().find(|c| c.name() == name).cloned()
    }

    /// Returns true if `name` is reserved for a built-in column.
    pub fn is_reserved(name: &str) -> bool {
        Self::builtin(name).is_some()
    }

    pub fn name(&self) -> &str {
        match self {
            Column::Timestamp => columns::TIMESTAMP,
            Column::EntityName => columns::ENTITY_NAME,
            Column::ItemName => columns::ITEM_NAME,
            Column::DurationMs => columns::DURATION_MS,
            Column::MinutesPlayed => columns::MINUTES_PLAYED,
            Column::Hour => columns::HOUR,
            Column::DayOfWeek => columns::DAY_OF_WEEK,
            Column::Month => columns::MONTH,
            Column::Year => columns::YEAR,
            Column::Date => columns::DATE,
            Column::YearMonth => columns::YEAR_MONTH,
            Column::Completion => columns::COMPLETION,
            Column::Metric(name) | Column::Meta(name) => name,
        }
    }

    pub fn kind(&self) -> ColumnKind {
        match self {
            Column::Timestamp => ColumnKind::Datetime,
            Column::DurationMs
            | Column::MinutesPlayed
            | Column::Hour
            | Column::Year
            | Column::Metric(_) => ColumnKind::Numeric,
            _ => ColumnKind::Categorical,
        }
    }
}

/// A single cell value. `Absent` is the explicit missing-value marker.
#[derive(Debug, Clone, PartialEq)]
pub enum Value<'a> {
    Absent,
    Number(f64),
    Text(Cow<'a, str>),
    Time(NaiveDateTime),
}

impl Value<'_> {
    pub fn is_absent(&self) -> bool {
        matches!(self, Value::Absent)
    }

    /// Numeric view of the value. Text that reads as a number counts.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Text(s) => parse_number(s),
            _ => None,
        }
    }

    /// Canonical text rendering used for grouping and membership tests.
    pub fn key(&self) -> Option<String> {
        match self {
            Value::Absent => None,
            Value::Number(n) => Some(n.to_string()),
            Value::Text(s) => Some(s.to_string()),
            Value::Time(t) => Some(t.format("%Y-%m-%d %H:%M:%S").to_string()),
        }
    }
}

/// Parse a numeric literal, accepting `,` thousands separators.
pub(crate) fn parse_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let cleaned: Cow<'_, str> = if trimmed.contains(',') {
        Cow::Owned(trimmed.replace(',', ""))
    } else {
        Cow::Borrowed(trimmed)
    };
    cleaned.parse::<f64>().ok().filter(|n| n.is_finite())
}

/// One canonical row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    pub timestamp: NaiveDateTime,
    pub entity_name: String,
    pub item_name: Option<String>,
    pub duration_ms: Option<u64>,
    pub minutes_played: Option<f64>,
    pub hour: u32,
    pub day_of_week: &'static str,
    pub month: &'static str,
    pub month_number: u32,
    pub year: i32,
    pub date: NaiveDate,
    pub completion: Option<&'static str>,
    /// Extra numeric columns; every schema metric has an entry.
    pub metrics: BTreeMap<String, Option<f64>>,
    /// Extra categorical columns; every schema metadata column has an entry.
    pub metadata: BTreeMap<String, Option<String>>,
}

impl Record {
    /// Read a column value.
    pub fn value(&self, column: &Column) -> Value<'_> {
        match column {
            Column::Timestamp => Value::Time(self.timestamp),
            Column::EntityName => Value::Text(Cow::Borrowed(&self.entity_name)),
            Column::ItemName => text_or_absent(self.item_name.as_deref()),
            Column::DurationMs => number_or_absent(self.duration_ms.map(|d| d as f64)),
            Column::MinutesPlayed => number_or_absent(self.minutes_played),
            Column::Hour => Value::Number(f64::from(self.hour)),
            Column::DayOfWeek => Value::Text(Cow::Borrowed(self.day_of_week)),
            Column::Month => Value::Text(Cow::Borrowed(self.month)),
            Column::Year => Value::Number(f64::from(self.year)),
            Column::Date => Value::Text(Cow::Owned(self.date.format("%Y-%m-%d").to_string())),
            Column::YearMonth => Value::Text(Cow::Owned(format!(
                "{:04}-{:02}",
                self.year, self.month_number
            ))),
            Column::Completion => text_or_absent(self.completion),
            Column::Metric(name) => number_or_absent(self.metrics.get(name).copied().flatten()),
            Column::Meta(name) => {
                text_or_absent(self.metadata.get(name).and_then(|v| v.as_deref()))
            }
        }
    }
}

fn text_or_absent(value: Option<&str>) -> Value<'_> {
    match value {
        Some(s) => Value::Text(Cow::Borrowed(s)),
        None => Value::Absent,
    }
}

fn number_or_absent(value: Option<f64>) -> Value<'static> {
    match value {
        Some(n) => Value::Number(n),
        None => Value::Absent,
    }
}

/// Typed schema descriptor: built-in columns followed by extra columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Schema {
    extras: Vec<(String, ColumnKind)>,
}

impl Schema {
    /// Build a schema from extra (non built-in) columns. Extras are kept
    /// sorted by name so independently built datasets agree.
    pub fn new(mut extras: Vec<(String, ColumnKind)>) -> Self {
        extras.sort_by(|a, b| a.0.cmp(&b.0));
        extras.dedup_by(|a, b| a.0 == b.0);
        Self { extras }
    }

    /// All columns with their kinds, built-ins first.
    pub fn columns(&self) -> Vec<(&str, ColumnKind)> {
        BUILTIN_COLUMNS
            .iter()
            .map(|c| (c.name(), c.kind()))
            .chain(self.extras.iter().map(|(n, k)| (n.as_str(), *k)))
            .collect()
    }

    /// Extra columns only, in schema order.
    pub fn extras(&self) -> &[(String, ColumnKind)] {
        &self.extras
    }

    pub fn metric_names(&self) -> impl Iterator<Item = &str> {
        self.extras
            .iter()
            .filter(|(_, k)| *k == ColumnKind::Numeric)
            .map(|(n, _)| n.as_str())
    }

    pub fn metadata_names(&self) -> impl Iterator<Item = &str> {
        self.extras
            .iter()
            .filter(|(_, k)| *k == ColumnKind::Categorical)
            .map(|(n, _)| n.as_str())
    }

    /// Resolve a column name, failing with [`EngineError::UnknownColumn`].
    pub fn resolve(&self, name: &str) -> EngineResult<Column> {
        if let Some(column) = Column::builtin(name) {
            return Ok(column);
        }
        self.extras
            .iter()
            .find(|(n, _)| n == name)
            .map(|(n, kind)| match kind {
                ColumnKind::Numeric => Column::Metric(n.clone()),
                _ => Column::Meta(n.clone()),
            })
            .ok_or_else(|| EngineError::unknown_column(name))
    }

    pub fn kind_of(&self, name: &str) -> Option<ColumnKind> {
        self.resolve(name).ok().map(|c| c.kind())
    }
}

/// Ordered, immutable collection of records sharing one schema.
#[derive(Debug, Clone)]
pub struct Dataset {
    schema: Arc<Schema>,
    records: Vec<Arc<Record>>,
    fingerprint: OnceCell<String>,
}

impl Dataset {
    pub(crate) fn from_parts(schema: Arc<Schema>, records: Vec<Arc<Record>>) -> Self {
        debug_assert!(records.iter().all(|r| {
            r.metrics.len() == schema.metric_names().count()
                && r.metadata.len() == schema.metadata_names().count()
        }));
        Self {
            schema,
            records,
            fingerprint: OnceCell::new(),
        }
    }

    pub fn empty() -> Self {
        Self::from_parts(Arc::new(Schema::new(Vec::new())), Vec::new())
    }

    /// A new dataset over a subset of this one's records, same schema.
    pub(crate) fn derive(&self, records: Vec<Arc<Record>>) -> Self {
        Self::from_parts(Arc::clone(&self.schema), records)
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn records(&self) -> &[Arc<Record>] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &Record> {
        self.records.iter().map(|r| r.as_ref())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn resolve(&self, name: &str) -> EngineResult<Column> {
        self.schema.resolve(name)
    }

    /// Content fingerprint, computed once per dataset.
    pub fn fingerprint(&self) -> &str {
        self.fingerprint
            .get_or_init(|| fingerprint::digest_dataset(self))
    }
}

impl PartialEq for Dataset {
    fn eq(&self, other: &Self) -> bool {
        self.schema == other.schema && self.records == other.records
    }
}

/// Per-batch normalization diagnostics.
#[derive(Debug, Default)]
pub struct Diagnostics {
    /// Number of raw records received.
    pub input_count: usize,
    /// Records dropped because they could not be coerced.
    pub dropped_count: usize,
    /// Records removed by the minimum-duration rule.
    pub below_floor_count: usize,
    /// The per-record failures behind `dropped_count`.
    pub errors: Vec<EngineError>,
}

/// Group key of an aggregation result.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum GroupKey {
    Value(String),
    /// Records whose group column is absent.
    Unknown,
    /// The single group produced when no group column is requested.
    All,
}

impl GroupKey {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            GroupKey::Value(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for GroupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupKey::Value(s) => write!(f, "{}", s),
            GroupKey::Unknown => write!(f, "(unknown)"),
            GroupKey::All => write!(f, "(all)"),
        }
    }
}

impl From<&str> for GroupKey {
    fn from(s: &str) -> Self {
        GroupKey::Value(s.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedEntry {
    pub key: GroupKey,
    pub value: f64,
}

/// Ordered, tie-stable output of an aggregation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RankedResult {
    pub entries: Vec<RankedEntry>,
}

impl RankedResult {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first(&self) -> Option<&RankedEntry> {
        self.entries.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RankedEntry> {
        self.entries.iter()
    }

    /// Value for a key, if that group is part of the result.
    pub fn get(&self, key: &GroupKey) -> Option<f64> {
        self.entries.iter().find(|e| &e.key == key).map(|e| e.value)
    }

    pub fn total(&self) -> f64 {
        self.entries.iter().map(|e| e.value).sum()
    }
}

/// Why a column was left out of a correlation matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExclusionReason {
    AllAbsent,
    ZeroVariance,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExcludedColumn {
    pub column: String,
    pub reason: ExclusionReason,
}

/// Labeled square matrix of Pearson coefficients.
///
/// A cell is `None` when the pair has too few overlapping observations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationMatrix {
    pub labels: Vec<String>,
    pub values: Vec<Vec<Option<f64>>>,
    pub excluded_columns: Vec<ExcludedColumn>,
}

impl CorrelationMatrix {
    pub fn get(&self, row: &str, col: &str) -> Option<f64> {
        let i = self.labels.iter().position(|l| l == row)?;
        let j = self.labels.iter().position(|l| l == col)?;
        self.values[i][j]
    }

    pub fn is_excluded(&self, column: &str) -> bool {
        self.excluded_columns.iter().any(|e| e.column == column)
    }
}
