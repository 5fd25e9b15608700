//! Pairwise-complete Pearson correlation.

use crate::error::{EngineError, EngineResult};
use crate::models::{
    columns, Column, ColumnKind, CorrelationMatrix, Dataset, ExcludedColumn, ExclusionReason,
};
use tracing::debug;

/// Resolve the requested columns. An empty list selects `minutesPlayed`
/// followed by every numeric extra column.
pub(crate) fn correlation_columns(dataset: &Dataset, requested: &[String]) -> EngineResult<Vec<Column>> {
    let names: Vec<&str> = if requested.is_empty() {
        std::iter::once(columns::MINUTES_PLAYED)
            .chain(dataset.schema().metric_names())
            .collect()
    } else {
        requested.iter().map(String::as_str).collect()
    };

    let mut resolved: Vec<Column> = Vec::with_capacity(names.len());
    for name in names {
        let column = dataset.resolve(name)?;
        if column.kind() != ColumnKind::Numeric {
            return Err(EngineError::TypeMismatch {
                column: name.to_string(),
                expected: "numeric",
            });
        }
        if !resolved.contains(&column) {
            resolved.push(column);
        }
    }

    Ok(resolved)
}

/// Build the correlation matrix directly, without the cache.
pub(crate) fn compute_correlation(
    dataset: &Dataset,
    requested: &[String],
) -> EngineResult<CorrelationMatrix> {
    let candidates = correlation_columns(dataset, requested)?;

    let mut labels = Vec::new();
    let mut series: Vec<Vec<Option<f64>>> = Vec::new();
    let mut excluded_columns = Vec::new();

    for column in candidates {
        let values: Vec<Option<f64>> = dataset
            .iter()
            .map(|record| record.value(&column).as_number())
            .collect();

        let mut present = values.iter().flatten();
        let reason = match present.next() {
            None => Some(ExclusionReason::AllAbsent),
            Some(first) if present.all(|v| v == first) => Some(ExclusionReason::ZeroVariance),
            Some(_) => None,
        };

        match reason {
            Some(reason) => {
                debug!("Excluding '{}' from correlation: {:?}", column.name(), reason);
                excluded_columns.push(ExcludedColumn {
                    column: column.name().to_string(),
                    reason,
                });
            }
            None => {
                labels.push(column.name().to_string());
                series.push(values);
            }
        }
    }

    let n = labels.len();
    let mut values = vec![vec![None; n]; n];
    for i in 0..n {
        values[i][i] = Some(1.0);
        for j in (i + 1)..n {
            let r = pearson(&series[i], &series[j]);
            values[i][j] = r;
            values[j][i] = r;
        }
    }

    Ok(CorrelationMatrix {
        labels,
        values,
        excluded_columns,
    })
}

/// Pearson coefficient over rows where both values are present. `None`
/// when fewer than two rows overlap or either side is constant on the
/// overlap.
fn pearson(xs: &[Option<f64>], ys: &[Option<f64>]) -> Option<f64> {
    let pairs: Vec<(f64, f64)> = xs
        .iter()
        .zip(ys)
        .filter_map(|(x, y)| Some(((*x)?, (*y)?)))
        .collect();

    if pairs.len() < 2 {
        return None;
    }

    let count = pairs.len() as f64;
    let mean_x = pairs.iter().map(|(x, _)| x).sum::<f64>() / count;
    let mean_y = pairs.iter().map(|(_, y)| y).sum::<f64>() / count;

    let (mut cov, mut var_x, mut var_y) = (0.0, 0.0, 0.0);
    for (x, y) in &pairs {
        let dx = x - mean_x;
        let dy = y - mean_y;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }

    if var_x == 0.0 || var_y == 0.0 {
        return None;
    }

    Some((cov / (var_x * var_y).sqrt()).clamp(-1.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::RawRecord;
    use crate::normalize::normalize;

    fn metrics_dataset() -> Dataset {
        let rows = [
            ("60000", "1000", "10", "5"),
            ("120000", "2000", "20", "5"),
            ("180000", "3000", "", "5"),
            ("240000", "4000", "5", "5"),
        ];
        let raw: Vec<RawRecord> = rows
            .iter()
            .enumerate()
            .map(|(i, (ms, streams, reach, constant))| {
                let mut record = RawRecord::new()
                    .with("endTime", format!("2023-01-0{} 10:00:00", i + 1))
                    .with("artistName", "ArtistA")
                    .with("msPlayed", *ms)
                    .with("Spotify Streams", *streams)
                    .with("Playlist Reach", *reach)
                    .with("Flat", *constant);
                record.push("Deezer Plays", None);
                record
            })
            .collect();
        normalize(&raw).dataset
    }

    #[test]
    fn test_all_absent_column_is_excluded_and_listed() {
        let dataset = metrics_dataset();
        let matrix = compute_correlation(&dataset, &[]).unwrap();

        assert!(matrix.is_excluded("Deezer Plays"));
        assert!(!matrix.labels.contains(&"Deezer Plays".to_string()));
        assert!(matrix
            .excluded_columns
            .iter()
            .any(|e| e.column == "Deezer Plays" && e.reason == ExclusionReason::AllAbsent));
    }

    #[test]
    fn test_zero_variance_column_is_excluded() {
        let dataset = metrics_dataset();
        let matrix = compute_correlation(&dataset, &[]).unwrap();

        assert!(matrix
            .excluded_columns
            .iter()
            .any(|e| e.column == "Flat" && e.reason == ExclusionReason::ZeroVariance));
        assert!(matrix.values.iter().flatten().flatten().all(|v| !v.is_nan()));
    }

    #[test]
    fn test_default_columns_and_coefficients() {
        let dataset = metrics_dataset();
        let matrix = compute_correlation(&dataset, &[]).unwrap();

        assert_eq!(
            matrix.labels,
            vec!["minutesPlayed", "Playlist Reach", "Spotify Streams"]
        );
        let r = matrix.get("minutesPlayed", "Spotify Streams").unwrap();
        assert!((r - 1.0).abs() < 1e-12);
        assert_eq!(
            matrix.get("Spotify Streams", "minutesPlayed"),
            matrix.get("minutesPlayed", "Spotify Streams")
        );
        assert_eq!(matrix.get("Playlist Reach", "Playlist Reach"), Some(1.0));

        // Pairwise-complete: the row with an absent reach is skipped
        let reach = matrix.get("minutesPlayed", "Playlist Reach").unwrap();
        assert!(reach < 0.0 && reach > -1.0);
    }

    #[test]
    fn test_sparse_overlap_yields_absent_cell() {
        let xs = [Some(1.0), None, Some(3.0)];
        let ys = [None, Some(2.0), Some(4.0)];
        assert_eq!(pearson(&xs, &ys), None);
    }

    #[test]
    fn test_column_validation() {
        let dataset = metrics_dataset();

        assert!(matches!(
            compute_correlation(&dataset, &["nope".to_string()]),
            Err(EngineError::UnknownColumn { .. })
        ));
        assert!(matches!(
            compute_correlation(&dataset, &["entityName".to_string()]),
            Err(EngineError::TypeMismatch { .. })
        ));

        let chosen = vec!["Spotify Streams".to_string(), "minutesPlayed".to_string()];
        let matrix = compute_correlation(&dataset, &chosen).unwrap();
        assert_eq!(matrix.labels, chosen);
    }
}
