//! Schema normalization.
//!
//! Maps raw columns onto the canonical schema, coerces values, derives
//! calendar and duration fields, and applies the minimum-duration rule.
//! Failures are per record: a bad row is dropped and counted, never
//! failing the batch.

use crate::config::{ColumnsConfig, Config, NormalizeConfig};
use crate::error::EngineError;
use crate::ingest::RawRecord;
use crate::models::{
    columns, parse_number, Column, ColumnKind, Dataset, Diagnostics, Record, Schema, DAY_NAMES,
    MONTH_NAMES,
};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, Timelike};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Output of a normalization pass.
#[derive(Debug)]
pub struct Normalized {
    pub dataset: Dataset,
    pub diagnostics: Diagnostics,
}

/// Raw row after the required fields were extracted and validated.
struct ParsedRow {
    timestamp: NaiveDateTime,
    entity_name: String,
    item_name: Option<String>,
    duration_ms: Option<u64>,
    extras: Vec<(String, Option<String>)>,
}

/// Converts raw records into a canonical [`Dataset`].
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    rules: NormalizeConfig,
    aliases: ColumnsConfig,
}

impl Normalizer {
    pub fn new(rules: NormalizeConfig, aliases: ColumnsConfig) -> Self {
        Self { rules, aliases }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.normalize.clone(), config.columns.clone())
    }

    /// Pin additional extra columns as categorical.
    pub fn with_categorical<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for name in names {
            let name = name.into();
            if !self.rules.categorical_columns.contains(&name) {
                self.rules.categorical_columns.push(name);
            }
        }
        self
    }

    /// Normalize a batch of raw records. Pure: performs no I/O.
    pub fn normalize(&self, raw: &[RawRecord]) -> Normalized {
        let mut diagnostics = Diagnostics {
            input_count: raw.len(),
            ..Diagnostics::default()
        };

        let mut retained = Vec::with_capacity(raw.len());
        for (index, record) in raw.iter().enumerate() {
            match self.parse_row(index, record) {
                Ok(row) => {
                    if row
                        .duration_ms
                        .is_some_and(|d| d < self.rules.min_duration_ms)
                    {
                        diagnostics.below_floor_count += 1;
                        continue;
                    }
                    retained.push(row);
                }
                Err(err) => {
                    debug!("Dropping record: {}", err);
                    diagnostics.dropped_count += 1;
                    diagnostics.errors.push(err);
                }
            }
        }

        let schema = Arc::new(self.infer_schema(&retained));
        let records: Vec<Arc<Record>> = retained
            .into_iter()
            .map(|row| Arc::new(self.build_record(row, &schema)))
            .collect();

        if diagnostics.dropped_count > 0 {
            warn!(
                "Dropped {} of {} records that could not be normalized",
                diagnostics.dropped_count, diagnostics.input_count
            );
        }
        info!(
            "Normalized {} records ({} dropped, {} below {} ms floor, {} extra columns)",
            records.len(),
            diagnostics.dropped_count,
            diagnostics.below_floor_count,
            self.rules.min_duration_ms,
            schema.extras().len()
        );

        Normalized {
            dataset: Dataset::from_parts(schema, records),
            diagnostics,
        }
    }

    fn parse_row(&self, index: usize, raw: &RawRecord) -> Result<ParsedRow, EngineError> {
        let malformed = |reason: String| EngineError::MalformedRecord { index, reason };

        let fields: Vec<(&str, Option<&str>)> = raw
            .fields()
            .map(|(name, value)| {
                (
                    name.trim(),
                    value.map(str::trim).filter(|v| !v.is_empty()),
                )
            })
            .collect();

        let timestamp_raw = pick(&fields, columns::TIMESTAMP, &self.aliases.timestamp)
            .ok_or_else(|| malformed("missing timestamp".to_string()))?;
        let timestamp = self
            .parse_timestamp(timestamp_raw)
            .ok_or_else(|| malformed(format!("unparsable timestamp '{}'", timestamp_raw)))?;

        let entity_name = pick(&fields, columns::ENTITY_NAME, &self.aliases.entity)
            .ok_or_else(|| malformed("missing entity name".to_string()))?
            .to_string();

        let item_name =
            pick(&fields, columns::ITEM_NAME, &self.aliases.item).map(str::to_string);

        let duration_ms = match pick(&fields, columns::DURATION_MS, &self.aliases.duration) {
            Some(raw_duration) => Some(
                parse_duration(raw_duration)
                    .ok_or_else(|| malformed(format!("invalid duration '{}'", raw_duration)))?,
            ),
            None => None,
        };

        let extras = fields
            .iter()
            .filter(|(name, _)| !self.is_mapped(name))
            .map(|(name, value)| (extra_column_name(name), value.map(str::to_string)))
            .collect();

        Ok(ParsedRow {
            timestamp,
            entity_name,
            item_name,
            duration_ms,
            extras,
        })
    }

    /// Parse a timestamp literal. RFC 3339 offsets are ignored: the written
    /// wall-clock value is kept.
    fn parse_timestamp(&self, raw: &str) -> Option<NaiveDateTime> {
        for format in &self.rules.datetime_formats {
            if let Ok(ts) = NaiveDateTime::parse_from_str(raw, format) {
                return Some(ts);
            }
        }

        if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
            return Some(ts.naive_local());
        }

        for format in &self.rules.date_formats {
            if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
                return date.and_hms_opt(0, 0, 0);
            }
        }

        None
    }

    /// Whether a raw column is consumed by one of the canonical fields.
    fn is_mapped(&self, name: &str) -> bool {
        let canonical = [
            columns::TIMESTAMP,
            columns::ENTITY_NAME,
            columns::ITEM_NAME,
            columns::DURATION_MS,
        ];
        canonical.contains(&name)
            || [
                &self.aliases.timestamp,
                &self.aliases.entity,
                &self.aliases.item,
                &self.aliases.duration,
            ]
            .iter()
            .any(|list| list.iter().any(|alias| alias == name))
    }

    fn infer_schema(&self, rows: &[ParsedRow]) -> Schema {
        let names: BTreeSet<&str> = rows
            .iter()
            .flat_map(|row| row.extras.iter().map(|(name, _)| name.as_str()))
            .collect();

        let extras = names
            .into_iter()
            .map(|name| {
                let kind = if self.rules.categorical_columns.iter().any(|c| c == name) {
                    ColumnKind::Categorical
                } else if rows
                    .iter()
                    .flat_map(|row| row.extras.iter())
                    .filter(|(n, _)| n == name)
                    .filter_map(|(_, v)| v.as_deref())
                    .all(|v| parse_number(v).is_some())
                {
                    ColumnKind::Numeric
                } else {
                    ColumnKind::Categorical
                };
                (name.to_string(), kind)
            })
            .collect();

        Schema::new(extras)
    }

    fn build_record(&self, row: ParsedRow, schema: &Schema) -> Record {
        let ParsedRow {
            timestamp,
            entity_name,
            item_name,
            duration_ms,
            extras,
        } = row;

        let mut values: BTreeMap<String, Option<String>> = BTreeMap::new();
        for (name, value) in extras {
            // First occurrence wins for duplicated raw headers
            values.entry(name).or_insert(value);
        }

        let metrics = schema
            .metric_names()
            .map(|name| {
                let value = values
                    .get(name)
                    .and_then(|v| v.as_deref())
                    .and_then(parse_number);
                (name.to_string(), value)
            })
            .collect();

        let metadata = schema
            .metadata_names()
            .map(|name| (name.to_string(), values.get(name).cloned().flatten()))
            .collect();

        let completion = duration_ms.map(|d| {
            if d >= self.rules.completion_threshold_ms {
                "Completed"
            } else {
                "Skipped"
            }
        });

        Record {
            timestamp,
            entity_name,
            item_name,
            duration_ms,
            minutes_played: duration_ms.map(|d| d as f64 / 60_000.0),
            hour: timestamp.hour(),
            day_of_week: DAY_NAMES[timestamp.weekday().num_days_from_monday() as usize],
            month: MONTH_NAMES[timestamp.month0() as usize],
            month_number: timestamp.month(),
            year: timestamp.year(),
            date: timestamp.date(),
            completion,
            metrics,
            metadata,
        }
    }
}

/// Normalize with the default rules and aliases.
pub fn normalize(raw: &[RawRecord]) -> Normalized {
    Normalizer::default().normalize(raw)
}

/// First present value among the canonical name and its aliases.
fn pick<'a>(
    fields: &[(&'a str, Option<&'a str>)],
    canonical: &str,
    aliases: &[String],
) -> Option<&'a str> {
    std::iter::once(canonical)
        .chain(aliases.iter().map(String::as_str))
        .find_map(|alias| {
            fields
                .iter()
                .find(|(name, value)| *name == alias && value.is_some())
                .and_then(|(_, value)| *value)
        })
}

fn parse_duration(raw: &str) -> Option<u64> {
    parse_number(raw)
        .filter(|n| *n >= 0.0 && n.fract() == 0.0 && *n <= u64::MAX as f64)
        .map(|n| n as u64)
}

/// Raw columns that collide with built-in names are kept under `<name>_raw`.
fn extra_column_name(name: &str) -> String {
    if Column::is_reserved(name) {
        format!("{}_raw", name)
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Value;
    use chrono::NaiveDate;

    fn play(end_time: &str, artist: &str, track: &str, ms: &str) -> RawRecord {
        RawRecord::new()
            .with("endTime", end_time)
            .with("artistName", artist)
            .with("trackName", track)
            .with("msPlayed", ms)
    }

    #[test]
    fn test_normalize_streaming_history() {
        let raw = vec![
            play("2023-03-06 14:05:00", "Drake", "Song A", "240000"),
            play("2023-03-07 09:00", " Bad Bunny ", "Song B", "90000"),
        ];

        let result = normalize(&raw);
        assert_eq!(result.dataset.len(), 2);
        assert_eq!(result.diagnostics.dropped_count, 0);

        let first = &result.dataset.records()[0];
        assert_eq!(first.entity_name, "Drake");
        assert_eq!(first.item_name.as_deref(), Some("Song A"));
        assert_eq!(first.duration_ms, Some(240_000));
        assert_eq!(first.minutes_played, Some(4.0));
        assert_eq!(first.hour, 14);
        assert_eq!(first.day_of_week, "Monday");
        assert_eq!(first.month, "March");
        assert_eq!(first.year, 2023);
        assert_eq!(first.date, NaiveDate::from_ymd_opt(2023, 3, 6).unwrap());
        assert_eq!(first.completion, Some("Completed"));

        let second = &result.dataset.records()[1];
        assert_eq!(second.entity_name, "Bad Bunny");
        assert_eq!(second.minutes_played, Some(1.5));
        assert_eq!(second.completion, Some("Skipped"));
    }

    #[test]
    fn test_malformed_records_are_dropped_and_counted() {
        let raw = vec![
            play("2023-03-06 14:05:00", "Drake", "Song A", "240000"),
            play("yesterday", "Drake", "Song A", "240000"),
            RawRecord::new()
                .with("endTime", "2023-03-06 14:05:00")
                .with("msPlayed", "240000"),
            play("2023-03-06 14:05:00", "Drake", "Song A", "-5"),
            play("2023-03-06 14:05:00", "Drake", "Song A", "12.5"),
            RawRecord::new(),
        ];

        let result = normalize(&raw);
        assert_eq!(result.dataset.len(), 1);
        assert_eq!(result.diagnostics.input_count, 6);
        assert_eq!(result.diagnostics.dropped_count, 5);
        assert_eq!(result.diagnostics.errors.len(), 5);
        assert!(matches!(
            &result.diagnostics.errors[0],
            EngineError::MalformedRecord { index: 1, reason } if reason.contains("yesterday")
        ));
        assert!(matches!(
            &result.diagnostics.errors[1],
            EngineError::MalformedRecord { index: 2, reason } if reason == "missing entity name"
        ));
    }

    #[test]
    fn test_minimum_duration_floor() {
        let raw = vec![
            play("2023-03-06 14:05:00", "Drake", "Song A", "29999"),
            play("2023-03-06 14:06:00", "Drake", "Song A", "30000"),
            RawRecord::new()
                .with("endTime", "2023-03-06 14:07:00")
                .with("artistName", "Drake"),
        ];

        let result = normalize(&raw);
        assert_eq!(result.diagnostics.below_floor_count, 1);
        assert_eq!(result.diagnostics.dropped_count, 0);
        // Records without a duration are kept
        assert_eq!(result.dataset.len(), 2);
        assert_eq!(result.dataset.records()[1].minutes_played, None);
        assert_eq!(result.dataset.records()[1].completion, None);

        let relaxed = Normalizer::new(
            NormalizeConfig {
                min_duration_ms: 0,
                ..NormalizeConfig::default()
            },
            ColumnsConfig::default(),
        );
        assert_eq!(relaxed.normalize(&raw).dataset.len(), 3);
    }

    #[test]
    fn test_timestamp_formats_keep_wall_clock() {
        let normalizer = Normalizer::default();
        let expected = NaiveDate::from_ymd_opt(2024, 1, 15)
            .unwrap()
            .and_hms_opt(23, 30, 0)
            .unwrap();

        assert_eq!(
            normalizer.parse_timestamp("2024-01-15 23:30:00"),
            Some(expected)
        );
        assert_eq!(
            normalizer.parse_timestamp("2024-01-15T23:30:00Z"),
            Some(expected)
        );
        assert_eq!(
            normalizer.parse_timestamp("2024-01-15T23:30:00+05:00"),
            Some(expected)
        );
        assert_eq!(normalizer.parse_timestamp("01/15/2024 23:30"), Some(expected));
        assert_eq!(
            normalizer.parse_timestamp("4/26/2024"),
            NaiveDate::from_ymd_opt(2024, 4, 26).and_then(|d| d.and_hms_opt(0, 0, 0))
        );
        assert_eq!(normalizer.parse_timestamp("15.01.2024"), None);
    }

    #[test]
    fn test_multi_platform_table_columns() {
        let raw = vec![
            RawRecord::new()
                .with("Track", "Flowers")
                .with("Artist", "Miley Cyrus")
                .with("Release Date", "1/12/2023")
                .with("Released Year", "2023")
                .with("Spotify Streams", "1,316,855,716")
                .with("YouTube Views", "600,000")
                .with("Explicit Track", "0"),
            RawRecord::new()
                .with("Track", "Houdini")
                .with("Artist", "Eminem")
                .with("Release Date", "5/31/2024")
                .with("Released Year", "2024")
                .with("Spotify Streams", "218,265")
                .with("YouTube Views", "n/a")
                .with("Explicit Track", "1"),
        ];

        let result = normalize(&raw);
        let dataset = &result.dataset;
        assert_eq!(dataset.len(), 2);

        let schema = dataset.schema();
        assert_eq!(schema.kind_of("Spotify Streams"), Some(ColumnKind::Numeric));
        assert_eq!(schema.kind_of("YouTube Views"), Some(ColumnKind::Categorical));
        assert_eq!(schema.kind_of("Released Year"), Some(ColumnKind::Categorical));
        assert_eq!(schema.kind_of("Explicit Track"), Some(ColumnKind::Categorical));

        let flowers = &dataset.records()[0];
        assert_eq!(flowers.entity_name, "Miley Cyrus");
        assert_eq!(flowers.item_name.as_deref(), Some("Flowers"));
        assert_eq!(flowers.duration_ms, None);
        assert_eq!(
            flowers.metrics.get("Spotify Streams"),
            Some(&Some(1_316_855_716.0))
        );
        assert_eq!(
            flowers.value(&Column::Meta("Released Year".to_string())),
            Value::Text("2023".into())
        );
    }

    #[test]
    fn test_sparse_metrics_are_homogeneous() {
        let raw = vec![
            play("2023-03-06 14:05:00", "Drake", "Song A", "240000")
                .with("skips", "2")
                .with(" reason_end ", " trackdone "),
            play("2023-03-06 15:05:00", "Drake", "Song B", "240000"),
        ];

        let dataset = normalize(&raw).dataset;
        for record in dataset.iter() {
            assert!(record.metrics.contains_key("skips"));
            assert!(record.metadata.contains_key("reason_end"));
        }
        assert_eq!(
            dataset.records()[0].metadata.get("reason_end"),
            Some(&Some("trackdone".to_string()))
        );
        assert_eq!(dataset.records()[1].metrics.get("skips"), Some(&None));
    }

    #[test]
    fn test_reserved_and_alias_columns() {
        let raw = vec![play("2023-03-06 14:05:00", "Drake", "Song A", "240000")
            .with("hour", "late")
            .with("end_time", "2020-01-01 00:00:00")];

        let dataset = normalize(&raw).dataset;
        let record = &dataset.records()[0];

        // Colliding raw column is retained under a suffixed name
        assert_eq!(
            record.metadata.get("hour_raw"),
            Some(&Some("late".to_string()))
        );
        assert_eq!(record.hour, 14);
        // Secondary alias columns are consumed, not retained
        assert!(dataset.schema().kind_of("end_time").is_none());
    }

    #[test]
    fn test_alias_priority_skips_absent_values() {
        let raw = vec![RawRecord::new()
            .with("ts", "2023-05-01T12:00:00Z")
            .with("master_metadata_album_artist_name", "Taylor Swift")
            .with("master_metadata_track_name", "Anti-Hero")
            .with("ms_played", "201000")];

        let mut with_null = raw[0].clone();
        with_null.push("artistName", None);

        let dataset = normalize(&[with_null]).dataset;
        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.records()[0].entity_name, "Taylor Swift");
        assert_eq!(dataset.records()[0].duration_ms, Some(201_000));
    }

    #[test]
    fn test_independent_normalization_is_structurally_equal() {
        let raw = vec![
            play("2023-03-06 14:05:00", "Drake", "Song A", "240000"),
            play("2023-03-07 09:00", "Bad Bunny", "Song B", "90000"),
        ];

        let a = normalize(&raw).dataset;
        let b = normalize(&raw.clone()).dataset;
        assert_eq!(a, b);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }
}
