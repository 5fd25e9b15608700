//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.playstats.toml` files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default configuration file name, looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = ".playstats.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Normalization rules.
    #[serde(default)]
    pub normalize: NormalizeConfig,

    /// Column alias lists used when mapping raw input.
    #[serde(default)]
    pub columns: ColumnsConfig,

    /// Query cache settings.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
        }
    }
}

fn default_output() -> String {
    "playstats_report.md".to_string()
}

/// Business rules and literal formats applied by the normalizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizeConfig {
    /// Plays shorter than this are excluded from the dataset.
    #[serde(default = "default_min_duration_ms")]
    pub min_duration_ms: u64,

    /// Plays at least this long are counted as completed.
    #[serde(default = "default_completion_threshold_ms")]
    pub completion_threshold_ms: u64,

    /// Accepted date-time literal formats (chrono syntax), tried in order.
    #[serde(default = "default_datetime_formats")]
    pub datetime_formats: Vec<String>,

    /// Accepted date-only formats; parsed values land on midnight.
    #[serde(default = "default_date_formats")]
    pub date_formats: Vec<String>,

    /// Extra columns always treated as categorical, even if numeric-looking.
    #[serde(default = "default_categorical_columns")]
    pub categorical_columns: Vec<String>,
}

impl Default for NormalizeConfig {
    fn default() -> Self {
        Self {
            min_duration_ms: default_min_duration_ms(),
            completion_threshold_ms: default_completion_threshold_ms(),
            datetime_formats: default_datetime_formats(),
            date_formats: default_date_formats(),
            categorical_columns: default_categorical_columns(),
        }
    }
}

fn default_min_duration_ms() -> u64 {
    30_000
}

fn default_completion_threshold_ms() -> u64 {
    180_000
}

fn default_datetime_formats() -> Vec<String> {
    vec![
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S%.f",
        "%Y-%m-%d %H:%M",
        "%m/%d/%Y %H:%M",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_date_formats() -> Vec<String> {
    vec!["%Y-%m-%d", "%m/%d/%Y"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_categorical_columns() -> Vec<String> {
    vec!["Released Year", "release_year", "Explicit Track", "ISRC"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Raw column aliases for each canonical field, in priority order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnsConfig {
    #[serde(default = "default_timestamp_aliases")]
    pub timestamp: Vec<String>,

    #[serde(default = "default_entity_aliases")]
    pub entity: Vec<String>,

    #[serde(default = "default_item_aliases")]
    pub item: Vec<String>,

    #[serde(default = "default_duration_aliases")]
    pub duration: Vec<String>,
}

impl Default for ColumnsConfig {
    fn default() -> Self {
        Self {
            timestamp: default_timestamp_aliases(),
            entity: default_entity_aliases(),
            item: default_item_aliases(),
            duration: default_duration_aliases(),
        }
    }
}

fn default_timestamp_aliases() -> Vec<String> {
    vec!["timestamp", "ts", "endTime", "end_time", "Release Date"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_entity_aliases() -> Vec<String> {
    vec![
        "entityName",
        "artistName",
        "master_metadata_album_artist_name",
        "Artist",
        "Artist(s)",
        "artist",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_item_aliases() -> Vec<String> {
    vec![
        "itemName",
        "trackName",
        "master_metadata_track_name",
        "Track",
        "track_name",
        "track",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_duration_aliases() -> Vec<String> {
    vec!["durationMs", "msPlayed", "ms_played", "duration_ms"]
        .into_iter()
        .map(String::from)
        .collect()
}

/// Query cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Entries kept before least-recently-used eviction kicks in.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
        }
    }
}

fn default_max_entries() -> usize {
    256
}

/// Report generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Number of artists/tracks in the top lists.
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Ranking metric for the top lists: "streams" or "minutes".
    #[serde(default = "default_rank_by")]
    pub rank_by: String,

    /// Columns for the correlation matrix; empty means all numeric metrics.
    #[serde(default)]
    pub correlation_columns: Vec<String>,

    /// Track names longer than this are shortened in Markdown tables.
    #[serde(default = "default_track_name_width")]
    pub track_name_width: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            top_n: default_top_n(),
            rank_by: default_rank_by(),
            correlation_columns: Vec::new(),
            track_name_width: default_track_name_width(),
        }
    }
}

fn default_top_n() -> usize {
    10
}

fn default_rank_by() -> String {
    "streams".to_string()
}

fn default_track_name_width() -> usize {
    30
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE_NAME);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were explicitly provided.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref output) = args.output {
            self.general.output = output.display().to_string();
        }

        if let Some(min_duration) = args.min_duration_ms {
            self.normalize.min_duration_ms = min_duration;
        }

        if let Some(top_n) = args.top_n {
            self.report.top_n = top_n;
        }
        if let Some(rank_by) = args.rank_by {
            self.report.rank_by = rank_by.as_str().to_string();
        }
        if let Some(ref columns) = args.correlate {
            self.report.correlation_columns = columns.clone();
        }

        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
