//! Delimited-text export of datasets.
//!
//! The export carries the source columns only; derived columns are
//! recomputed when the file is imported and normalized again. Column kinds
//! are not written, so [`import_csv`] takes the source schema to keep
//! categorical columns categorical.

use crate::error::{EngineError, EngineResult};
use crate::ingest::read_delimited;
use crate::models::{columns, ColumnKind, Dataset, Record, Schema};
use crate::normalize::{Normalized, Normalizer};
use csv::Writer;
use std::io::{Read, Write};
use std::path::Path;
use tracing::info;

/// Timestamp layout written by the exporter. Accepted by the default
/// normalizer formats.
pub const EXPORT_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Write a dataset as CSV: canonical source columns first, then extra
/// columns in schema order, rows in dataset order.
pub fn export_csv<W: Write>(dataset: &Dataset, writer: W) -> EngineResult<()> {
    let mut csv_writer = Writer::from_writer(writer);
    let extras = dataset.schema().extras();

    let mut header: Vec<&str> = vec![
        columns::TIMESTAMP,
        columns::ENTITY_NAME,
        columns::ITEM_NAME,
        columns::DURATION_MS,
    ];
    header.extend(extras.iter().map(|(name, _)| name.as_str()));
    csv_writer.write_record(&header)?;

    for record in dataset.iter() {
        csv_writer.write_record(export_row(record, extras))?;
    }

    csv_writer.flush()?;
    Ok(())
}

fn export_row(record: &Record, extras: &[(String, ColumnKind)]) -> Vec<String> {
    let mut row = Vec::with_capacity(4 + extras.len());
    row.push(record.timestamp.format(EXPORT_TIMESTAMP_FORMAT).to_string());
    row.push(record.entity_name.clone());
    row.push(record.item_name.clone().unwrap_or_default());
    row.push(
        record
            .duration_ms
            .map(|d| d.to_string())
            .unwrap_or_default(),
    );

    for (name, kind) in extras {
        let cell = match kind {
            ColumnKind::Numeric => record
                .metrics
                .get(name)
                .copied()
                .flatten()
                .map(|n| n.to_string()),
            _ => record.metadata.get(name).cloned().flatten(),
        };
        row.push(cell.unwrap_or_default());
    }

    row
}

/// Export to an in-memory string.
pub fn export_csv_string(dataset: &Dataset) -> EngineResult<String> {
    let mut buffer = Vec::new();
    export_csv(dataset, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| EngineError::Ingest(e.to_string()))
}

/// Export to a file on disk.
pub fn write_csv_file(dataset: &Dataset, path: &Path) -> EngineResult<()> {
    let file = std::fs::File::create(path)?;
    export_csv(dataset, file)?;
    info!("Exported {} records to {}", dataset.len(), path.display());
    Ok(())
}

/// Read an export back into a dataset. Categorical columns of `schema`
/// stay categorical even when every remaining value looks numeric.
pub fn import_csv<R: Read>(
    reader: R,
    schema: &Schema,
    normalizer: &Normalizer,
) -> EngineResult<Normalized> {
    let raw = read_delimited(reader, b',')?;
    let normalizer = normalizer.clone().with_categorical(schema.metadata_names());
    Ok(normalizer.normalize(&raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{apply_filters, FilterSpec};
    use crate::ingest::{read_path, RawRecord};
    use crate::normalize::normalize;
    use std::sync::Arc;

    fn sample_raw() -> Vec<RawRecord> {
        vec![
            RawRecord::new()
                .with("endTime", "2023-01-02 08:00:00")
                .with("artistName", "Drake")
                .with("trackName", "Passionfruit")
                .with("msPlayed", "200000")
                .with("reason_end", "trackdone")
                .with("popularity", "0.75"),
            RawRecord::new()
                .with("endTime", "2023-01-02T09:30:15.250")
                .with("artistName", "Dua Lipa")
                .with("trackName", "Levitating, Remix")
                .with("msPlayed", "95000")
                .with("popularity", "12"),
            RawRecord::new()
                .with("endTime", "2024-05-10 22:10")
                .with("artistName", "Drake")
                .with("msPlayed", "61000")
                .with("reason_end", "fwdbtn"),
        ]
    }

    fn sorted_records(dataset: &Dataset) -> Vec<Arc<Record>> {
        let mut records = dataset.records().to_vec();
        records.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.entity_name.cmp(&b.entity_name))
        });
        records
    }

    #[test]
    fn test_export_header_and_rows() {
        let dataset = normalize(&sample_raw()).dataset;
        let text = export_csv_string(&dataset).unwrap();
        let mut lines = text.lines();

        assert_eq!(
            lines.next(),
            Some("timestamp,entityName,itemName,durationMs,popularity,reason_end")
        );
        assert_eq!(
            lines.next(),
            Some("2023-01-02 08:00:00,Drake,Passionfruit,200000,0.75,trackdone")
        );
        assert_eq!(
            lines.next(),
            Some("2023-01-02 09:30:15.250,Dua Lipa,\"Levitating, Remix\",95000,12,")
        );
        assert_eq!(lines.next(), Some("2024-05-10 22:10:00,Drake,,61000,,fwdbtn"));
    }

    #[test]
    fn test_filtered_export_round_trips_through_normalizer() {
        let dataset = normalize(&sample_raw()).dataset;
        let filtered = apply_filters(
            &dataset,
            &FilterSpec::new().member("entityName", ["Drake", "Dua Lipa"]),
        )
        .unwrap();

        let text = export_csv_string(&filtered).unwrap();
        let reimported =
            import_csv(text.as_bytes(), filtered.schema(), &Normalizer::default()).unwrap();

        assert_eq!(reimported.diagnostics.dropped_count, 0);
        assert_eq!(reimported.dataset.schema(), filtered.schema());
        assert_eq!(
            sorted_records(&reimported.dataset),
            sorted_records(&filtered)
        );
    }

    #[test]
    fn test_write_csv_file_and_read_back() {
        let dataset = normalize(&sample_raw()).dataset;
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.csv");

        write_csv_file(&dataset, &path).unwrap();
        let raw = read_path(&path, None).unwrap();

        assert_eq!(raw.len(), dataset.len());
        assert_eq!(normalize(&raw).dataset, dataset);
    }

    #[test]
    fn test_round_trip_keeps_categorical_kind_after_filter() {
        let raw = vec![
            RawRecord::new()
                .with("endTime", "2023-03-01 12:00:00")
                .with("artistName", "Miley Cyrus")
                .with("trackName", "Flowers")
                .with("msPlayed", "200000")
                .with("YouTube Views", "600,000"),
            RawRecord::new()
                .with("endTime", "2023-03-02 12:00:00")
                .with("artistName", "Unknown Band")
                .with("trackName", "Demo")
                .with("msPlayed", "120000")
                .with("YouTube Views", "n/a"),
        ];
        let dataset = normalize(&raw).dataset;
        assert_eq!(
            dataset.schema().kind_of("YouTube Views"),
            Some(ColumnKind::Categorical)
        );

        // Drops the only non-numeric value
        let filtered = apply_filters(
            &dataset,
            &FilterSpec::new().member("entityName", ["Miley Cyrus"]),
        )
        .unwrap();
        let text = export_csv_string(&filtered).unwrap();
        let back = import_csv(text.as_bytes(), filtered.schema(), &Normalizer::default())
            .unwrap()
            .dataset;

        assert_eq!(
            back.schema().kind_of("YouTube Views"),
            Some(ColumnKind::Categorical)
        );
        let column = back.schema().resolve("YouTube Views").unwrap();
        assert_eq!(
            back.records()[0].value(&column),
            filtered.records()[0].value(&column)
        );
        assert_eq!(back, filtered);
    }
}
