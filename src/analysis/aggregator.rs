//! Grouped reductions and top-N ranking.
//!
//! Groups are kept in first-seen order and ranked with a stable sort, so
//! equal values keep the order in which their groups first appeared.

use crate::error::{EngineError, EngineResult};
use crate::models::{Column, ColumnKind, Dataset, GroupKey, RankedEntry, RankedResult};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// Reduction applied to the metric column of each group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Reducer {
    /// Number of rows in the group.
    Count,
    /// Sum of present values.
    Sum,
    /// Mean of present values; fails on a group with none.
    Mean,
    /// Number of distinct present values.
    Distinct,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RankDirection {
    #[default]
    Descending,
    Ascending,
}

/// A grouped aggregation with optional top-N truncation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AggregationRequest {
    pub group_by: Option<String>,
    pub metric: String,
    pub reducer: Reducer,
    pub top_n: Option<usize>,
    pub direction: RankDirection,
}

impl AggregationRequest {
    pub fn new(metric: &str, reducer: Reducer) -> Self {
        Self {
            group_by: None,
            metric: metric.to_string(),
            reducer,
            top_n: None,
            direction: RankDirection::Descending,
        }
    }

    pub fn group_by(mut self, column: &str) -> Self {
        self.group_by = Some(column.to_string());
        self
    }

    pub fn top(mut self, n: usize) -> Self {
        self.top_n = Some(n);
        self
    }

    pub fn ascending(mut self) -> Self {
        self.direction = RankDirection::Ascending;
        self
    }

    /// Check the request against a dataset schema without touching any row.
    pub fn validate(&self, dataset: &Dataset) -> EngineResult<(Option<Column>, Column)> {
        if self.top_n == Some(0) {
            return Err(EngineError::InvalidRequest(
                "topN must be a positive integer".to_string(),
            ));
        }

        let group = self
            .group_by
            .as_deref()
            .map(|name| dataset.resolve(name))
            .transpose()?;
        let metric = dataset.resolve(&self.metric)?;

        if matches!(self.reducer, Reducer::Sum | Reducer::Mean)
            && metric.kind() != ColumnKind::Numeric
        {
            return Err(EngineError::TypeMismatch {
                column: metric.name().to_string(),
                expected: "numeric",
            });
        }

        Ok((group, metric))
    }
}

#[derive(Default)]
struct Accumulator {
    rows: usize,
    present: usize,
    sum: f64,
    distinct: HashSet<String>,
}

/// Run an aggregation directly, without the cache.
pub(crate) fn compute_aggregate(
    dataset: &Dataset,
    request: &AggregationRequest,
) -> EngineResult<RankedResult> {
    let (group_column, metric) = request.validate(dataset)?;

    let mut groups: Vec<(GroupKey, Accumulator)> = Vec::new();
    let mut index: HashMap<GroupKey, usize> = HashMap::new();

    if group_column.is_none() {
        groups.push((GroupKey::All, Accumulator::default()));
        index.insert(GroupKey::All, 0);
    }

    for record in dataset.iter() {
        let key = match &group_column {
            Some(column) => record
                .value(column)
                .key()
                .map(GroupKey::Value)
                .unwrap_or(GroupKey::Unknown),
            None => GroupKey::All,
        };

        let slot = match index.get(&key) {
            Some(&i) => i,
            None => {
                index.insert(key.clone(), groups.len());
                groups.push((key, Accumulator::default()));
                groups.len() - 1
            }
        };
        let acc = &mut groups[slot].1;

        acc.rows += 1;
        let value = record.value(&metric);
        match request.reducer {
            Reducer::Count => {}
            Reducer::Sum | Reducer::Mean => {
                if let Some(n) = value.as_number() {
                    acc.sum += n;
                    acc.present += 1;
                }
            }
            Reducer::Distinct => {
                if let Some(k) = value.key() {
                    acc.distinct.insert(k);
                }
            }
        }
    }

    let mut entries = Vec::with_capacity(groups.len());
    for (key, acc) in groups {
        let value = match request.reducer {
            Reducer::Count => acc.rows as f64,
            Reducer::Sum => acc.sum,
            Reducer::Mean => {
                if acc.present == 0 {
                    return Err(EngineError::EmptyGroup {
                        group: key.to_string(),
                        column: metric.name().to_string(),
                    });
                }
                acc.sum / acc.present as f64
            }
            Reducer::Distinct => acc.distinct.len() as f64,
        };
        entries.push(RankedEntry { key, value });
    }

    // sort_by is stable: ties keep first-seen group order
    match request.direction {
        RankDirection::Descending => entries.sort_by(|a, b| b.value.total_cmp(&a.value)),
        RankDirection::Ascending => entries.sort_by(|a, b| a.value.total_cmp(&b.value)),
    }

    if let Some(n) = request.top_n {
        entries.truncate(n);
    }

    Ok(RankedResult { entries })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::RawRecord;
    use crate::normalize::normalize;

    fn plays_dataset() -> Dataset {
        let rows = [
            ("2023-03-01 10:00:00", "ArtistA", "100"),
            ("2023-04-01 11:00:00", "ArtistB", "50"),
            ("2024-05-01 12:00:00", "ArtistA", "30"),
        ];
        let raw: Vec<RawRecord> = rows
            .iter()
            .map(|(ts, artist, plays)| {
                RawRecord::new()
                    .with("endTime", *ts)
                    .with("artistName", *artist)
                    .with("msPlayed", "60000")
                    .with("plays", *plays)
            })
            .collect();
        normalize(&raw).dataset
    }

    #[test]
    fn test_sum_by_entity_top_one() {
        let dataset = plays_dataset();
        let request = AggregationRequest::new("plays", Reducer::Sum)
            .group_by("entityName")
            .top(1);

        let result = compute_aggregate(&dataset, &request).unwrap();
        assert_eq!(
            result.entries,
            vec![RankedEntry {
                key: GroupKey::from("ArtistA"),
                value: 130.0
            }]
        );
    }

    #[test]
    fn test_group_counts_cover_every_row() {
        let dataset = plays_dataset();
        for column in ["entityName", "year", "month", "plays"] {
            let request = AggregationRequest::new("entityName", Reducer::Count).group_by(column);
            let result = compute_aggregate(&dataset, &request).unwrap();
            assert_eq!(result.total() as usize, dataset.len(), "grouped by {}", column);
        }
    }

    #[test]
    fn test_ties_keep_first_seen_order() {
        let dataset = plays_dataset();
        // Each year-month occurs once: all counts tie at 1
        let request = AggregationRequest::new("entityName", Reducer::Count).group_by("yearMonth");

        let result = compute_aggregate(&dataset, &request).unwrap();
        let keys: Vec<String> = result.iter().map(|e| e.key.to_string()).collect();
        assert_eq!(keys, vec!["2023-03", "2023-04", "2024-05"]);

        let ascending = compute_aggregate(&dataset, &request.clone().ascending()).unwrap();
        assert_eq!(ascending, result);
    }

    #[test]
    fn test_mean_and_distinct() {
        let dataset = plays_dataset();

        let mean = compute_aggregate(
            &dataset,
            &AggregationRequest::new("plays", Reducer::Mean).group_by("entityName"),
        )
        .unwrap();
        assert_eq!(mean.get(&GroupKey::from("ArtistA")), Some(65.0));
        assert_eq!(mean.get(&GroupKey::from("ArtistB")), Some(50.0));

        let distinct = compute_aggregate(
            &dataset,
            &AggregationRequest::new("entityName", Reducer::Distinct).group_by("year"),
        )
        .unwrap();
        assert_eq!(distinct.get(&GroupKey::from("2023")), Some(2.0));
        assert_eq!(distinct.get(&GroupKey::from("2024")), Some(1.0));
    }

    #[test]
    fn test_ungrouped_request_yields_single_all_group() {
        let dataset = plays_dataset();
        let result =
            compute_aggregate(&dataset, &AggregationRequest::new("plays", Reducer::Sum)).unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result.get(&GroupKey::All), Some(180.0));

        let empty = Dataset::empty();
        let count = compute_aggregate(
            &empty,
            &AggregationRequest::new("entityName", Reducer::Count),
        )
        .unwrap();
        assert_eq!(count.entries.len(), 1);
        assert_eq!(count.get(&GroupKey::All), Some(0.0));
    }

    #[test]
    fn test_mean_over_empty_group_fails() {
        let empty = Dataset::empty();
        let result = compute_aggregate(
            &empty,
            &AggregationRequest::new("minutesPlayed", Reducer::Mean),
        );
        assert!(matches!(result, Err(EngineError::EmptyGroup { .. })));
    }

    #[test]
    fn test_absent_group_values_form_unknown_group() {
        let raw = vec![
            RawRecord::new()
                .with("endTime", "2023-01-01 10:00:00")
                .with("artistName", "ArtistA")
                .with("trackName", "One"),
            RawRecord::new()
                .with("endTime", "2023-01-01 11:00:00")
                .with("artistName", "ArtistA"),
        ];
        let dataset = normalize(&raw).dataset;
        let request = AggregationRequest::new("entityName", Reducer::Count).group_by("itemName");

        let result = compute_aggregate(&dataset, &request).unwrap();
        assert_eq!(result.get(&GroupKey::from("One")), Some(1.0));
        assert_eq!(result.get(&GroupKey::Unknown), Some(1.0));
    }

    #[test]
    fn test_request_validation() {
        let dataset = plays_dataset();

        let zero = AggregationRequest::new("plays", Reducer::Sum).top(0);
        assert!(matches!(
            compute_aggregate(&dataset, &zero),
            Err(EngineError::InvalidRequest(_))
        ));

        let unknown = AggregationRequest::new("streams", Reducer::Sum);
        assert!(matches!(
            compute_aggregate(&dataset, &unknown),
            Err(EngineError::UnknownColumn { .. })
        ));

        let categorical = AggregationRequest::new("entityName", Reducer::Sum);
        assert!(matches!(
            compute_aggregate(&dataset, &categorical),
            Err(EngineError::TypeMismatch { .. })
        ));

        // Larger than the group count returns every group
        let wide = AggregationRequest::new("plays", Reducer::Sum)
            .group_by("entityName")
            .top(50);
        assert_eq!(compute_aggregate(&dataset, &wide).unwrap().len(), 2);
    }
}
