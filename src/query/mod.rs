//! Query facade.
//!
//! Named operations for the presentation layer. Column references are
//! validated here, before any cache lookup, and every analytical result is
//! memoized in the injected [`FingerprintCache`].

use crate::analysis::{compute_aggregate, AggregationEngine, AggregationRequest, Reducer};
use crate::cache::FingerprintCache;
use crate::error::EngineResult;
use crate::filter::{apply_filters, FilterSpec};
use crate::models::{
    columns, CorrelationMatrix, Dataset, GroupKey, RankedEntry, RankedResult, DAY_NAMES,
};
use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info};

/// Metadata column holding the playback end reason in streaming-history exports.
pub const END_REASON_COLUMN: &str = "reason_end";

/// Ranking metric for the top lists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum RankBy {
    #[default]
    StreamCount,
    TotalMinutes,
}

impl RankBy {
    fn request(self, group_by: &str) -> AggregationRequest {
        match self {
            RankBy::StreamCount => {
                AggregationRequest::new(group_by, Reducer::Count).group_by(group_by)
            }
            RankBy::TotalMinutes => {
                AggregationRequest::new(columns::MINUTES_PLAYED, Reducer::Sum).group_by(group_by)
            }
        }
    }
}

impl std::str::FromStr for RankBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "streams" | "streamcount" | "count" => Ok(RankBy::StreamCount),
            "minutes" | "totalminutes" => Ok(RankBy::TotalMinutes),
            other => Err(format!("unknown ranking '{}'", other)),
        }
    }
}

/// One month of the listening trend.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlyPoint {
    pub year_month: String,
    pub streams: usize,
    pub minutes: f64,
}

/// Headline statistics. Values that are undefined for the dataset (for
/// example averages over no rows) are `None`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub total_streams: usize,
    pub unique_tracks: usize,
    pub unique_artists: usize,
    pub total_hours: f64,
    pub active_days: usize,
    pub average_daily_streams: Option<f64>,
    pub top_artist: Option<RankedEntry>,
    pub average_minutes_per_stream: Option<f64>,
    pub most_active_hour: Option<u32>,
    pub first_play: Option<NaiveDateTime>,
    pub last_play: Option<NaiveDateTime>,
}

/// Stable interface consumed by the CLI and report generator.
#[derive(Debug, Clone)]
pub struct QueryFacade {
    engine: AggregationEngine,
}

impl QueryFacade {
    pub fn new(cache: Arc<FingerprintCache>) -> Self {
        Self {
            engine: AggregationEngine::new(cache),
        }
    }

    pub fn engine(&self) -> &AggregationEngine {
        &self.engine
    }

    pub fn cache(&self) -> &Arc<FingerprintCache> {
        self.engine.cache()
    }

    /// Top `n` artists by stream count or listening minutes.
    pub fn top_artists(
        &self,
        dataset: &Dataset,
        n: usize,
        rank_by: RankBy,
    ) -> EngineResult<Arc<RankedResult>> {
        self.ranked(dataset, rank_by.request(columns::ENTITY_NAME).top(n))
    }

    /// Top `n` tracks. Rows without a track name are not ranked.
    pub fn top_tracks(
        &self,
        dataset: &Dataset,
        n: usize,
        rank_by: RankBy,
    ) -> EngineResult<Arc<RankedResult>> {
        self.ranked(dataset, rank_by.request(columns::ITEM_NAME).top(n))
    }

    /// Streams per hour of day, for the hours that occur, ascending.
    pub fn activity_by_hour(&self, dataset: &Dataset) -> EngineResult<Arc<RankedResult>> {
        self.cache()
            .get_or_compute(dataset, &json!({ "op": "activity_by_hour" }), || {
                let mut hours: BTreeMap<u32, usize> = BTreeMap::new();
                for record in dataset.iter() {
                    *hours.entry(record.hour).or_default() += 1;
                }
                Ok(RankedResult {
                    entries: hours
                        .into_iter()
                        .map(|(hour, count)| RankedEntry {
                            key: GroupKey::Value(hour.to_string()),
                            value: count as f64,
                        })
                        .collect(),
                })
            })
    }

    /// Streams per weekday, Monday through Sunday, zero-filled.
    pub fn activity_by_day_of_week(&self, dataset: &Dataset) -> EngineResult<Arc<RankedResult>> {
        self.cache()
            .get_or_compute(dataset, &json!({ "op": "activity_by_day_of_week" }), || {
                let mut counts = [0usize; 7];
                for record in dataset.iter() {
                    if let Some(i) = DAY_NAMES.iter().position(|d| *d == record.day_of_week) {
                        counts[i] += 1;
                    }
                }
                Ok(RankedResult {
                    entries: DAY_NAMES
                        .iter()
                        .zip(counts)
                        .map(|(day, count)| RankedEntry {
                            key: GroupKey::from(*day),
                            value: count as f64,
                        })
                        .collect(),
                })
            })
    }

    /// Streams and minutes per calendar month, chronological.
    pub fn monthly_trend(&self, dataset: &Dataset) -> EngineResult<Arc<Vec<MonthlyPoint>>> {
        self.cache()
            .get_or_compute(dataset, &json!({ "op": "monthly_trend" }), || {
                let mut months: BTreeMap<(i32, u32), (usize, f64)> = BTreeMap::new();
                for record in dataset.iter() {
                    let slot = months
                        .entry((record.year, record.month_number))
                        .or_default();
                    slot.0 += 1;
                    slot.1 += record.minutes_played.unwrap_or(0.0);
                }
                Ok(months
                    .into_iter()
                    .map(|((year, month), (streams, minutes))| MonthlyPoint {
                        year_month: format!("{:04}-{:02}", year, month),
                        streams,
                        minutes,
                    })
                    .collect())
            })
    }

    /// Distinct artists per calendar month, chronological.
    pub fn artist_diversity(&self, dataset: &Dataset) -> EngineResult<Arc<RankedResult>> {
        self.cache()
            .get_or_compute(dataset, &json!({ "op": "artist_diversity" }), || {
                let mut months: BTreeMap<(i32, u32), HashSet<&str>> = BTreeMap::new();
                for record in dataset.iter() {
                    months
                        .entry((record.year, record.month_number))
                        .or_default()
                        .insert(record.entity_name.as_str());
                }
                Ok(RankedResult {
                    entries: months
                        .into_iter()
                        .map(|((year, month), artists)| RankedEntry {
                            key: GroupKey::Value(format!("{:04}-{:02}", year, month)),
                            value: artists.len() as f64,
                        })
                        .collect(),
                })
            })
    }

    /// Completed versus skipped plays, most frequent first. Plays without a
    /// duration are not counted.
    pub fn completion_breakdown(&self, dataset: &Dataset) -> EngineResult<Arc<RankedResult>> {
        self.ranked(
            dataset,
            AggregationRequest::new(columns::COMPLETION, Reducer::Count)
                .group_by(columns::COMPLETION),
        )
    }

    /// Counts of each playback end reason, or `None` when the dataset
    /// carries no end-reason column.
    pub fn end_reason_breakdown(
        &self,
        dataset: &Dataset,
    ) -> EngineResult<Option<Arc<RankedResult>>> {
        if dataset.schema().kind_of(END_REASON_COLUMN).is_none() {
            debug!("No '{}' column, skipping end reasons", END_REASON_COLUMN);
            return Ok(None);
        }
        self.ranked(
            dataset,
            AggregationRequest::new(END_REASON_COLUMN, Reducer::Count).group_by(END_REASON_COLUMN),
        )
        .map(Some)
    }

    pub fn correlation_matrix(
        &self,
        dataset: &Dataset,
        columns: &[String],
    ) -> EngineResult<Arc<CorrelationMatrix>> {
        self.engine.correlation_matrix(dataset, columns)
    }

    /// Case-insensitive substring search on track names. A blank query
    /// returns the dataset unchanged.
    pub fn search_by_title(&self, dataset: &Dataset, query: &str) -> EngineResult<Dataset> {
        if query.trim().is_empty() {
            return Ok(dataset.clone());
        }
        let result = apply_filters(dataset, &FilterSpec::new().contains(columns::ITEM_NAME, query))?;
        info!("Search '{}' matched {} of {} records", query, result.len(), dataset.len());
        Ok(result)
    }

    pub fn filter(&self, dataset: &Dataset, spec: &FilterSpec) -> EngineResult<Dataset> {
        apply_filters(dataset, spec)
    }

    pub fn overview(&self, dataset: &Dataset) -> EngineResult<Arc<Overview>> {
        let top_artist = self.top_artists(dataset, 1, RankBy::StreamCount)?;
        let hours = self.activity_by_hour(dataset)?;

        self.cache()
            .get_or_compute(dataset, &json!({ "op": "overview" }), || {
                let total_streams = dataset.len();
                let unique_tracks = dataset
                    .iter()
                    .filter_map(|r| r.item_name.as_deref())
                    .collect::<HashSet<_>>()
                    .len();
                let unique_artists = dataset
                    .iter()
                    .map(|r| r.entity_name.as_str())
                    .collect::<HashSet<_>>()
                    .len();
                let active_days = dataset.iter().map(|r| r.date).collect::<HashSet<_>>().len();

                let minutes: Vec<f64> = dataset.iter().filter_map(|r| r.minutes_played).collect();
                let total_minutes: f64 = minutes.iter().sum();

                // First hour wins on ties, matching ranking order
                let most_active_hour = hours
                    .iter()
                    .fold(None::<&RankedEntry>, |best, e| match best {
                        Some(b) if b.value >= e.value => Some(b),
                        _ => Some(e),
                    })
                    .and_then(|e| e.key.as_str())
                    .and_then(|h| h.parse::<u32>().ok());

                Ok(Overview {
                    total_streams,
                    unique_tracks,
                    unique_artists,
                    total_hours: total_minutes / 60.0,
                    active_days,
                    average_daily_streams: (active_days > 0)
                        .then(|| total_streams as f64 / active_days as f64),
                    top_artist: top_artist.first().cloned(),
                    average_minutes_per_stream: (!minutes.is_empty())
                        .then(|| total_minutes / minutes.len() as f64),
                    most_active_hour,
                    first_play: dataset.iter().map(|r| r.timestamp).min(),
                    last_play: dataset.iter().map(|r| r.timestamp).max(),
                })
            })
    }

    /// Ranked counts/sums with the `Unknown` group removed before top-N
    /// truncation.
    fn ranked(
        &self,
        dataset: &Dataset,
        request: AggregationRequest,
    ) -> EngineResult<Arc<RankedResult>> {
        request.validate(dataset)?;
        self.cache().get_or_compute(
            dataset,
            &json!({ "op": "ranked_known", "request": &request }),
            || {
                let unbounded = AggregationRequest {
                    top_n: None,
                    ..request.clone()
                };
                let mut result = compute_aggregate(dataset, &unbounded)?;
                result.entries.retain(|e| e.key != GroupKey::Unknown);
                if let Some(n) = request.top_n {
                    result.entries.truncate(n);
                }
                Ok(result)
            },
        )
    }
}

/// Current input source and its dataset. Loading a different source
/// clears the shared cache.
#[derive(Debug)]
pub struct Session {
    cache: Arc<FingerprintCache>,
    source: Option<String>,
    dataset: Arc<Dataset>,
}

impl Session {
    pub fn new(cache: Arc<FingerprintCache>) -> Self {
        Self {
            cache,
            source: None,
            dataset: Arc::new(Dataset::empty()),
        }
    }

    /// Replace the current dataset. Returns true when the cache was cleared.
    pub fn load(&mut self, source: &str, dataset: Dataset) -> bool {
        let changed = self.source.as_deref() != Some(source)
            || self.dataset.fingerprint() != dataset.fingerprint();

        if changed {
            info!("Loading source '{}' ({} records)", source, dataset.len());
            self.cache.clear();
        }

        self.source = Some(source.to_string());
        self.dataset = Arc::new(dataset);
        changed
    }

    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    pub fn dataset(&self) -> &Arc<Dataset> {
        &self.dataset
    }

    pub fn cache(&self) -> &Arc<FingerprintCache> {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::ingest::RawRecord;
    use crate::normalize::normalize;

    fn play(ts: &str, artist: &str, track: Option<&str>, ms: &str) -> RawRecord {
        let mut record = RawRecord::new()
            .with("endTime", ts)
            .with("artistName", artist)
            .with("msPlayed", ms);
        if let Some(track) = track {
            record = record.with("trackName", track);
        }
        record
    }

    fn history() -> Dataset {
        // 2023-01-02 is a Monday
        let raw = vec![
            play("2023-01-02 08:15:00", "Drake", Some("Passionfruit"), "240000")
                .with("reason_end", "trackdone"),
            play("2023-01-02 21:00:00", "Dua Lipa", Some("Levitating"), "60000")
                .with("reason_end", "fwdbtn"),
            play("2023-01-04 08:40:00", "Drake", Some("Passionfruit"), "120000")
                .with("reason_end", "trackdone"),
            play("2023-02-10 14:05:00", "Adele", Some("Hello"), "300000")
                .with("reason_end", "trackdone"),
            play("2023-02-11 08:00:00", "Dua Lipa", None, "45000"),
        ];
        normalize(&raw).dataset
    }

    fn facade() -> QueryFacade {
        QueryFacade::new(Arc::new(FingerprintCache::default()))
    }

    fn keys(result: &RankedResult) -> Vec<String> {
        result.iter().map(|e| e.key.to_string()).collect()
    }

    #[test]
    fn test_top_artists_by_streams_and_minutes() {
        let facade = facade();
        let data = history();

        let by_streams = facade.top_artists(&data, 2, RankBy::StreamCount).unwrap();
        assert_eq!(keys(&by_streams), vec!["Drake", "Dua Lipa"]);
        assert_eq!(by_streams.entries[0].value, 2.0);

        let by_minutes = facade.top_artists(&data, 1, RankBy::TotalMinutes).unwrap();
        assert_eq!(keys(&by_minutes), vec!["Drake"]);
        assert!((by_minutes.entries[0].value - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_top_tracks_skip_unnamed_rows() {
        let facade = facade();
        let result = facade
            .top_tracks(&history(), 10, RankBy::StreamCount)
            .unwrap();

        assert_eq!(keys(&result), vec!["Passionfruit", "Levitating", "Hello"]);
        assert!(result.get(&GroupKey::Unknown).is_none());
    }

    #[test]
    fn test_activity_views() {
        let facade = facade();
        let data = history();

        let hours = facade.activity_by_hour(&data).unwrap();
        assert_eq!(keys(&hours), vec!["8", "14", "21"]);
        assert_eq!(hours.get(&GroupKey::from("8")), Some(3.0));

        let days = facade.activity_by_day_of_week(&data).unwrap();
        assert_eq!(keys(&days), DAY_NAMES.to_vec());
        assert_eq!(days.get(&GroupKey::from("Monday")), Some(2.0));
        assert_eq!(days.get(&GroupKey::from("Sunday")), Some(0.0));
        assert_eq!(days.total() as usize, data.len());
    }

    #[test]
    fn test_monthly_trend_and_diversity() {
        let facade = facade();
        let data = history();

        let trend = facade.monthly_trend(&data).unwrap();
        assert_eq!(trend.len(), 2);
        assert_eq!(trend[0].year_month, "2023-01");
        assert_eq!(trend[0].streams, 3);
        assert!((trend[0].minutes - 7.0).abs() < 1e-9);
        assert_eq!(trend[1].year_month, "2023-02");

        let diversity = facade.artist_diversity(&data).unwrap();
        assert_eq!(diversity.get(&GroupKey::from("2023-01")), Some(2.0));
        assert_eq!(diversity.get(&GroupKey::from("2023-02")), Some(2.0));
    }

    #[test]
    fn test_breakdowns() {
        let facade = facade();
        let data = history();

        let completion = facade.completion_breakdown(&data).unwrap();
        assert_eq!(completion.get(&GroupKey::from("Completed")), Some(2.0));
        assert_eq!(completion.get(&GroupKey::from("Skipped")), Some(3.0));
        assert_eq!(keys(&completion)[0], "Skipped");

        let reasons = facade.end_reason_breakdown(&data).unwrap().unwrap();
        assert_eq!(keys(&reasons), vec!["trackdone", "fwdbtn"]);

        let bare = normalize(&[play("2023-01-02 08:15:00", "Drake", None, "60000")]).dataset;
        assert!(facade.end_reason_breakdown(&bare).unwrap().is_none());
    }

    #[test]
    fn test_search_by_title() {
        let facade = facade();
        let data = history();

        assert_eq!(facade.search_by_title(&data, "").unwrap(), data);
        assert_eq!(facade.search_by_title(&data, "   ").unwrap(), data);

        let found = facade.search_by_title(&data, "PASSION").unwrap();
        assert_eq!(found.len(), 2);
        assert!(found
            .iter()
            .all(|r| r.item_name.as_deref() == Some("Passionfruit")));

        // Surrounding whitespace is part of the needle
        assert!(facade.search_by_title(&data, "fruit ").unwrap().is_empty());
        assert_eq!(facade.search_by_title(&data, "passion").unwrap().len(), 2);
    }

    #[test]
    fn test_overview() {
        let facade = facade();
        let data = history();
        let overview = facade.overview(&data).unwrap();

        assert_eq!(overview.total_streams, 5);
        assert_eq!(overview.unique_tracks, 3);
        assert_eq!(overview.unique_artists, 3);
        assert_eq!(overview.active_days, 4);
        assert_eq!(overview.average_daily_streams, Some(1.25));
        assert_eq!(
            overview.top_artist.as_ref().map(|e| e.key.to_string()),
            Some("Drake".to_string())
        );
        assert_eq!(overview.most_active_hour, Some(8));
        assert!((overview.total_hours - 12.75 / 60.0).abs() < 1e-9);
        assert_eq!(
            overview.first_play.map(|t| t.to_string()),
            Some("2023-01-02 08:15:00".to_string())
        );
    }

    #[test]
    fn test_overview_of_empty_dataset() {
        let overview = facade().overview(&Dataset::empty()).unwrap();

        assert_eq!(overview.total_streams, 0);
        assert_eq!(overview.average_daily_streams, None);
        assert_eq!(overview.average_minutes_per_stream, None);
        assert_eq!(overview.top_artist, None);
        assert_eq!(overview.most_active_hour, None);
        assert_eq!(overview.first_play, None);
    }

    #[test]
    fn test_unknown_columns_rejected_at_boundary() {
        let facade = facade();
        let data = history();

        let spec = FilterSpec::new().member("genre", ["pop"]);
        assert!(matches!(
            facade.filter(&data, &spec),
            Err(EngineError::UnknownColumn { .. })
        ));
        assert!(matches!(
            facade.correlation_matrix(&data, &["bpm".to_string()]),
            Err(EngineError::UnknownColumn { .. })
        ));
        assert!(facade.cache().is_empty());
    }

    #[test]
    fn test_results_are_cached_per_dataset() {
        let facade = facade();
        let data = history();

        facade.top_artists(&data, 3, RankBy::StreamCount).unwrap();
        facade.top_artists(&history(), 3, RankBy::StreamCount).unwrap();
        assert_eq!(facade.cache().stats().misses, 1);

        let filtered = facade
            .filter(&data, &FilterSpec::new().member("entityName", ["Drake"]))
            .unwrap();
        let drake = facade.top_artists(&filtered, 3, RankBy::StreamCount).unwrap();
        assert_eq!(keys(&drake), vec!["Drake"]);
        assert_eq!(facade.cache().stats().misses, 2);
    }

    #[test]
    fn test_session_clears_cache_on_new_source() {
        let cache = Arc::new(FingerprintCache::default());
        let facade = QueryFacade::new(Arc::clone(&cache));
        let mut session = Session::new(Arc::clone(&cache));

        assert!(session.load("history.json", history()));
        facade.overview(session.dataset()).unwrap();
        assert!(!cache.is_empty());

        // Same source, same content: cache kept
        assert!(!session.load("history.json", history()));
        assert!(!cache.is_empty());

        assert!(session.load("other.csv", Dataset::empty()));
        assert!(cache.is_empty());
        assert_eq!(session.source(), Some("other.csv"));
    }
}
