//! Dashboard report: the engine outputs bundled for rendering.

pub mod generator;

pub use generator::{generate_json_report, generate_markdown_report, write_report};

use crate::cache::CacheStats;
use crate::models::{CorrelationMatrix, RankedResult};
use crate::query::{MonthlyPoint, Overview, RankBy};
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Run metadata shown at the top of a report.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardMetadata {
    pub source: String,
    pub generated_at: DateTime<Utc>,
    pub input_records: usize,
    pub dropped_records: usize,
    pub below_floor_records: usize,
    pub min_duration_ms: u64,
    /// Records left after the CLI filters.
    pub analyzed_records: usize,
    pub filters: Vec<String>,
    pub rank_by: RankBy,
    pub top_n: usize,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub metadata: DashboardMetadata,
    pub overview: Overview,
    pub top_artists: RankedResult,
    pub top_tracks: RankedResult,
    pub hourly_activity: RankedResult,
    pub weekday_activity: RankedResult,
    pub monthly_trend: Vec<MonthlyPoint>,
    pub artist_diversity: RankedResult,
    pub completion: RankedResult,
    pub end_reasons: Option<RankedResult>,
    pub correlation: CorrelationMatrix,
    pub cache: CacheStats,
}
