//! Filter pipeline.
//!
//! A [`FilterSpec`] is an ordered, conjunctive list of predicates. Applying
//! it never mutates the source dataset: the result is a new dataset whose
//! rows are a stable subsequence of the input.

use crate::error::{EngineError, EngineResult};
use crate::models::{Column, ColumnKind, Dataset, Record, Value};
use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::HashSet;
use tracing::debug;

/// A single predicate over one column.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Predicate {
    /// Categorical membership. An empty `values` set matches everything.
    In { column: String, values: Vec<String> },
    /// Inclusive numeric range; either bound may be open.
    Range {
        column: String,
        min: Option<f64>,
        max: Option<f64>,
    },
    /// Inclusive time range on a datetime column.
    Between {
        column: String,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    },
    /// Case-insensitive substring match. An empty needle matches everything.
    Contains { column: String, needle: String },
}

impl Predicate {
    pub fn column(&self) -> &str {
        match self {
            Predicate::In { column, .. }
            | Predicate::Range { column, .. }
            | Predicate::Between { column, .. }
            | Predicate::Contains { column, .. } => column,
        }
    }
}

/// Ordered sequence of predicates, combined with AND.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FilterSpec {
    predicates: Vec<Predicate>,
}

impl FilterSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, predicate: Predicate) -> Self {
        self.predicates.push(predicate);
        self
    }

    pub fn member<I, S>(self, column: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with(Predicate::In {
            column: column.to_string(),
            values: values.into_iter().map(Into::into).collect(),
        })
    }

    pub fn range(self, column: &str, min: Option<f64>, max: Option<f64>) -> Self {
        self.with(Predicate::Range {
            column: column.to_string(),
            min,
            max,
        })
    }

    pub fn between(
        self,
        column: &str,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Self {
        self.with(Predicate::Between {
            column: column.to_string(),
            start,
            end,
        })
    }

    pub fn contains(self, column: &str, needle: &str) -> Self {
        self.with(Predicate::Contains {
            column: column.to_string(),
            needle: needle.to_string(),
        })
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }
}

/// Predicate with its column resolved against a schema.
enum Compiled {
    In(Column, HashSet<String>),
    Range(Column, Option<f64>, Option<f64>),
    Between(Column, Option<NaiveDateTime>, Option<NaiveDateTime>),
    Contains(Column, String),
}

impl Compiled {
    fn matches(&self, record: &Record) -> bool {
        match self {
            Compiled::In(column, values) => record
                .value(column)
                .key()
                .is_some_and(|key| values.contains(&key)),
            Compiled::Range(column, min, max) => {
                record.value(column).as_number().is_some_and(|n| {
                    min.map_or(true, |lo| n >= lo) && max.map_or(true, |hi| n <= hi)
                })
            }
            Compiled::Between(column, start, end) => match record.value(column) {
                Value::Time(t) => {
                    start.map_or(true, |s| t >= s) && end.map_or(true, |e| t <= e)
                }
                _ => false,
            },
            Compiled::Contains(column, needle) => match record.value(column) {
                Value::Text(text) => text.to_lowercase().contains(needle.as_str()),
                _ => false,
            },
        }
    }
}

/// Resolve every predicate up front so unknown columns fail before any row
/// is scanned. Identity predicates are dropped.
fn compile(dataset: &Dataset, spec: &FilterSpec) -> EngineResult<Vec<Compiled>> {
    let mut compiled = Vec::with_capacity(spec.predicates.len());

    for predicate in &spec.predicates {
        let column = dataset.resolve(predicate.column())?;

        match predicate {
            Predicate::In { values, .. } => {
                if !values.is_empty() {
                    compiled.push(Compiled::In(column, values.iter().cloned().collect()));
                }
            }
            Predicate::Range { min, max, .. } => {
                if column.kind() == ColumnKind::Datetime {
                    return Err(EngineError::TypeMismatch {
                        column: column.name().to_string(),
                        expected: "numeric or categorical",
                    });
                }
                if let (Some(lo), Some(hi)) = (min, max) {
                    if lo > hi {
                        return Err(EngineError::InvalidRequest(format!(
                            "range on '{}' has min {} above max {}",
                            column.name(),
                            lo,
                            hi
                        )));
                    }
                }
                if min.is_some() || max.is_some() {
                    compiled.push(Compiled::Range(column, *min, *max));
                }
            }
            Predicate::Between { start, end, .. } => {
                if column.kind() != ColumnKind::Datetime {
                    return Err(EngineError::TypeMismatch {
                        column: column.name().to_string(),
                        expected: "a datetime column",
                    });
                }
                if start.is_some() || end.is_some() {
                    compiled.push(Compiled::Between(column, *start, *end));
                }
            }
            Predicate::Contains { needle, .. } => {
                if !needle.is_empty() {
                    compiled.push(Compiled::Contains(column, needle.to_lowercase()));
                }
            }
        }
    }

    Ok(compiled)
}

/// Apply a filter spec, returning a new dataset.
pub fn apply_filters(dataset: &Dataset, spec: &FilterSpec) -> EngineResult<Dataset> {
    let compiled = compile(dataset, spec)?;

    if compiled.is_empty() {
        return Ok(dataset.clone());
    }

    let records = dataset
        .records()
        .iter()
        .filter(|record| compiled.iter().all(|p| p.matches(record)))
        .cloned()
        .collect::<Vec<_>>();

    debug!(
        "Filter kept {} of {} records ({} active predicates)",
        records.len(),
        dataset.len(),
        compiled.len()
    );

    Ok(dataset.derive(records))
}
