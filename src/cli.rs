//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and the filters derived from flags.

use crate::filter::FilterSpec;
use crate::ingest::InputFormat;
use crate::models::columns;
use chrono::{NaiveDate, NaiveDateTime};
use clap::Parser;
use std::path::PathBuf;

/// Playstats - streaming-history analytics
///
/// Normalize Spotify streaming history or multi-platform track metrics,
/// then rank, filter and correlate them into a Markdown or JSON dashboard.
///
/// Examples:
///   playstats --input StreamingHistory0.json
///   playstats --input tracks.csv --rank-by minutes --top-n 20
///   playstats --input history.json --artist "Drake,Adele" --year-from 2022
///   playstats --input history.json --search love --export love.csv
///   playstats --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Input file with streaming records (JSON, CSV or TSV)
    #[arg(short, long, value_name = "FILE", required_unless_present = "init_config")]
    pub input: Option<PathBuf>,

    /// Input format; detected from the file extension when omitted
    #[arg(long, value_name = "FORMAT")]
    pub input_format: Option<InputFormat>,

    /// Output file path for the report
    ///
    /// Defaults to the config file value (playstats_report.md).
    #[arg(short, long, value_name = "FILE", env = "PLAYSTATS_OUTPUT")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Path to configuration file
    ///
    /// If not specified, looks for .playstats.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Number of entries in the top artist/track lists
    #[arg(short = 'n', long, value_name = "COUNT")]
    pub top_n: Option<usize>,

    /// Ranking metric for the top lists
    #[arg(long, value_name = "METRIC")]
    pub rank_by: Option<RankByArg>,

    /// Only include these artists (comma-separated)
    #[arg(long, value_name = "NAMES", value_delimiter = ',')]
    pub artist: Option<Vec<String>>,

    /// Only include plays from this year onwards
    #[arg(long, value_name = "YEAR")]
    pub year_from: Option<i32>,

    /// Only include plays up to and including this year
    #[arg(long, value_name = "YEAR")]
    pub year_to: Option<i32>,

    /// Only include plays on or after this date (YYYY-MM-DD)
    #[arg(long, value_name = "DATE", value_parser = parse_date)]
    pub from: Option<NaiveDate>,

    /// Only include plays on or before this date (YYYY-MM-DD)
    #[arg(long, value_name = "DATE", value_parser = parse_date)]
    pub to: Option<NaiveDate>,

    /// Case-insensitive search on track titles
    #[arg(short, long, value_name = "TEXT")]
    pub search: Option<String>,

    /// Columns for the correlation matrix (comma-separated)
    ///
    /// Defaults to minutesPlayed plus every numeric metric column.
    #[arg(long, value_name = "COLUMNS", value_delimiter = ',')]
    pub correlate: Option<Vec<String>>,

    /// Write the filtered records to this CSV file
    #[arg(long, value_name = "FILE")]
    pub export: Option<PathBuf>,

    /// Drop plays shorter than this many milliseconds
    #[arg(long, value_name = "MS")]
    pub min_duration_ms: Option<u64>,

    /// Generate a default .playstats.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

/// Ranking metric accepted by --rank-by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum RankByArg {
    /// Number of streams
    Streams,
    /// Total minutes played
    Minutes,
}

impl RankByArg {
    pub fn as_str(&self) -> &'static str {
        match self {
            RankByArg::Streams => "streams",
            RankByArg::Minutes => "minutes",
        }
    }
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        if let Some(ref input) = self.input {
            if !input.exists() {
                return Err(format!("Input file does not exist: {}", input.display()));
            }
            if !input.is_file() {
                return Err(format!("Input path is not a file: {}", input.display()));
            }
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if self.top_n == Some(0) {
            return Err("Top N must be at least 1".to_string());
        }

        if let (Some(from), Some(to)) = (self.year_from, self.year_to) {
            if from > to {
                return Err(format!("--year-from {} is after --year-to {}", from, to));
            }
        }

        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to {
                return Err(format!("--from {} is after --to {}", from, to));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }

    /// Build the filter described by the flags. The title search is applied
    /// separately through the query facade.
    pub fn filter_spec(&self) -> FilterSpec {
        let mut spec = FilterSpec::new();

        if let Some(ref artists) = self.artist {
            let names = artists
                .iter()
                .map(|a| a.trim())
                .filter(|a| !a.is_empty())
                .map(str::to_string)
                .collect::<Vec<_>>();
            spec = spec.member(columns::ENTITY_NAME, names);
        }

        if self.year_from.is_some() || self.year_to.is_some() {
            spec = spec.range(
                columns::YEAR,
                self.year_from.map(f64::from),
                self.year_to.map(f64::from),
            );
        }

        if self.from.is_some() || self.to.is_some() {
            spec = spec.between(
                columns::TIMESTAMP,
                self.from.and_then(|d| d.and_hms_opt(0, 0, 0)),
                self.to.and_then(end_of_day),
            );
        }

        spec
    }

    /// Human-readable description of the active filters.
    pub fn describe_filters(&self) -> Vec<String> {
        let mut filters = Vec::new();

        if let Some(ref artists) = self.artist {
            filters.push(format!("artist in [{}]", artists.join(", ")));
        }
        match (self.year_from, self.year_to) {
            (Some(a), Some(b)) => filters.push(format!("year {}..={}", a, b)),
            (Some(a), None) => filters.push(format!("year >= {}", a)),
            (None, Some(b)) => filters.push(format!("year <= {}", b)),
            (None, None) => {}
        }
        match (self.from, self.to) {
            (Some(a), Some(b)) => filters.push(format!("date {} to {}", a, b)),
            (Some(a), None) => filters.push(format!("date from {}", a)),
            (None, Some(b)) => filters.push(format!("date until {}", b)),
            (None, None) => {}
        }
        if let Some(ref query) = self.search {
            if !query.trim().is_empty() {
                filters.push(format!("title contains '{}'", query.trim()));
            }
        }

        filters
    }
}

fn end_of_day(date: NaiveDate) -> Option<NaiveDateTime> {
    date.and_hms_nano_opt(23, 59, 59, 999_999_999)
}

/// Parse a `--from`/`--to` date.
pub fn parse_date(raw: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map_err(|e| format!("invalid date '{}' (expected YYYY-MM-DD): {}", raw, e))
}
