//! Markdown and JSON report generation.
//!
//! This module renders a [`Dashboard`] as a Markdown document or as
//! pretty-printed JSON.

use super::{Dashboard, DashboardMetadata};
use crate::models::{CorrelationMatrix, RankedResult};
use crate::query::{MonthlyPoint, Overview, RankBy};
use anyhow::{Context, Result};
use std::path::Path;

/// Generate a complete Markdown report.
pub fn generate_markdown_report(dashboard: &Dashboard, track_name_width: usize) -> String {
    let mut output = String::new();

    output.push_str("# Playstats Report\n\n");

    output.push_str(&generate_metadata_section(&dashboard.metadata));
    output.push_str(&generate_table_of_contents(dashboard));
    output.push_str(&generate_overview_section(&dashboard.overview));

    output.push_str(&generate_top_section(dashboard, track_name_width));
    output.push_str(&generate_patterns_section(dashboard));
    output.push_str(&generate_discovery_section(dashboard));
    output.push_str(&generate_correlation_section(&dashboard.correlation));

    output.push_str(&generate_footer(dashboard));

    output
}

/// Generate the metadata section.
fn generate_metadata_section(metadata: &DashboardMetadata) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Source:** `{}`\n", metadata.source));
    section.push_str(&format!(
        "- **Generated:** {}\n",
        metadata.generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    section.push_str(&format!("- **Input Records:** {}\n", metadata.input_records));
    if metadata.dropped_records > 0 {
        section.push_str(&format!(
            "- **Malformed Records Dropped:** {}\n",
            metadata.dropped_records
        ));
    }
    section.push_str(&format!(
        "- **Below {} ms Floor:** {}\n",
        metadata.min_duration_ms, metadata.below_floor_records
    ));
    if !metadata.filters.is_empty() {
        section.push_str(&format!("- **Filters:** {}\n", metadata.filters.join("; ")));
    }
    section.push_str(&format!(
        "- **Records Analyzed:** {}\n",
        metadata.analyzed_records
    ));
    section.push_str(&format!(
        "- **Generation Time:** {:.2}s\n",
        metadata.duration_seconds
    ));
    section.push('\n');

    section
}

/// Generate the table of contents.
fn generate_table_of_contents(dashboard: &Dashboard) -> String {
    let mut toc = String::new();

    toc.push_str("## Table of Contents\n\n");
    toc.push_str("- [Metadata](#metadata)\n");
    toc.push_str("- [Overview](#overview)\n");
    toc.push_str("- [Top Artists & Tracks](#top-artists--tracks)\n");
    toc.push_str("- [Listening Patterns](#listening-patterns)\n");
    toc.push_str("- [Music Discovery](#music-discovery)\n");
    if !dashboard.correlation.labels.is_empty() || !dashboard.correlation.excluded_columns.is_empty()
    {
        toc.push_str("- [Correlations](#correlations)\n");
    }
    toc.push('\n');

    toc
}

/// Generate the overview section.
fn generate_overview_section(overview: &Overview) -> String {
    let mut section = String::new();

    section.push_str("## Overview\n\n");

    if overview.total_streams == 0 {
        section.push_str("No streams match the current selection.\n\n");
        return section;
    }

    section.push_str("| Total Streams | Unique Tracks | Unique Artists | Total Listening |\n");
    section.push_str("|:---:|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {} | {:.0}h |\n\n",
        overview.total_streams,
        overview.unique_tracks,
        overview.unique_artists,
        overview.total_hours
    ));

    section.push_str("### Key Insights\n\n");
    if let Some(avg) = overview.average_daily_streams {
        section.push_str(&format!(
            "- **Daily Average:** ~{:.0} streams per active day ({} days)\n",
            avg, overview.active_days
        ));
    }
    if let Some(ref top) = overview.top_artist {
        section.push_str(&format!(
            "- **Top Artist:** {} with {} streams\n",
            top.key,
            format_value(top.value)
        ));
    }
    if let Some(avg) = overview.average_minutes_per_stream {
        section.push_str(&format!("- **Average Stream Length:** {:.1} minutes\n", avg));
    }
    if let Some(hour) = overview.most_active_hour {
        section.push_str(&format!("- **Most Active Hour:** {}:00\n", hour));
    }
    if let (Some(first), Some(last)) = (overview.first_play, overview.last_play) {
        section.push_str(&format!(
            "- **Time Range:** {} to {}\n",
            first.format("%Y-%m-%d"),
            last.format("%Y-%m-%d")
        ));
    }
    section.push('\n');

    section
}

/// Generate the top artists and tracks section.
fn generate_top_section(dashboard: &Dashboard, track_name_width: usize) -> String {
    let mut section = String::new();
    let metric = match dashboard.metadata.rank_by {
        RankBy::StreamCount => "Streams",
        RankBy::TotalMinutes => "Minutes",
    };

    section.push_str("## Top Artists & Tracks\n\n");

    section.push_str(&format!(
        "### Top {} Artists by {}\n\n",
        dashboard.metadata.top_n, metric
    ));
    section.push_str(&ranked_table("Artist", metric, &dashboard.top_artists, None));

    section.push_str(&format!(
        "### Top {} Tracks by {}\n\n",
        dashboard.metadata.top_n, metric
    ));
    section.push_str(&ranked_table(
        "Track",
        metric,
        &dashboard.top_tracks,
        Some(track_name_width),
    ));

    section
}

/// Generate the listening patterns section.
fn generate_patterns_section(dashboard: &Dashboard) -> String {
    let mut section = String::new();

    section.push_str("## Listening Patterns\n\n");

    section.push_str("### Activity by Hour\n\n");
    section.push_str(&ranked_table("Hour", "Streams", &dashboard.hourly_activity, None));

    section.push_str("### Activity by Day of Week\n\n");
    section.push_str(&ranked_table("Day", "Streams", &dashboard.weekday_activity, None));

    section.push_str("### Monthly Trend\n\n");
    section.push_str(&monthly_table(&dashboard.monthly_trend));

    section
}

/// Generate the music discovery section.
fn generate_discovery_section(dashboard: &Dashboard) -> String {
    let mut section = String::new();

    section.push_str("## Music Discovery\n\n");

    section.push_str("### Unique Artists per Month\n\n");
    section.push_str(&ranked_table("Month", "Artists", &dashboard.artist_diversity, None));

    section.push_str("### Listening Completion\n\n");
    section.push_str(&ranked_table("Outcome", "Streams", &dashboard.completion, None));

    if let Some(ref reasons) = dashboard.end_reasons {
        section.push_str("### How Streams End\n\n");
        section.push_str(&ranked_table("Reason", "Streams", reasons, None));
    }

    section
}

/// Generate the correlation section.
fn generate_correlation_section(matrix: &CorrelationMatrix) -> String {
    if matrix.labels.is_empty() && matrix.excluded_columns.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Correlations\n\n");

    if matrix.labels.is_empty() {
        section.push_str("No numeric columns with variation to correlate.\n\n");
    } else {
        section.push_str("| |");
        for label in &matrix.labels {
            section.push_str(&format!(" {} |", label));
        }
        section.push('\n');
        section.push_str("|:---|");
        section.push_str(&":---:|".repeat(matrix.labels.len()));
        section.push('\n');

        for (label, row) in matrix.labels.iter().zip(&matrix.values) {
            section.push_str(&format!("| **{}** |", label));
            for cell in row {
                match cell {
                    Some(r) => section.push_str(&format!(" {:.2} |", r)),
                    None => section.push_str(" n/a |"),
                }
            }
            section.push('\n');
        }
        section.push('\n');
    }

    if !matrix.excluded_columns.is_empty() {
        section.push_str("Excluded columns:\n\n");
        for excluded in &matrix.excluded_columns {
            let reason = serde_json::to_value(excluded.reason)
                .ok()
                .and_then(|v| v.as_str().map(|s| s.replace('_', " ")))
                .unwrap_or_default();
            section.push_str(&format!("- `{}` ({})\n", excluded.column, reason));
        }
        section.push('\n');
    }

    section
}

/// Generate the report footer.
fn generate_footer(dashboard: &Dashboard) -> String {
    let mut footer = String::new();

    footer.push_str("---\n\n");
    footer.push_str(&format!(
        "*Report generated by playstats v{} ({} cached results, {} cache hits)*\n",
        env!("CARGO_PKG_VERSION"),
        dashboard.cache.entries,
        dashboard.cache.hits
    ));

    footer
}

fn ranked_table(
    label: &str,
    metric: &str,
    result: &RankedResult,
    width: Option<usize>,
) -> String {
    if result.is_empty() {
        return "*No data.*\n\n".to_string();
    }

    let mut table = String::new();
    table.push_str(&format!("| # | {} | {} |\n", label, metric));
    table.push_str("|:---:|:---|---:|\n");

    for (i, entry) in result.iter().enumerate() {
        let key = entry.key.to_string();
        let key = match width {
            Some(w) => truncate_name(&key, w),
            None => key,
        };
        table.push_str(&format!(
            "| {} | {} | {} |\n",
            i + 1,
            key.replace('|', "\\|"),
            format_value(entry.value)
        ));
    }
    table.push('\n');

    table
}

fn monthly_table(points: &[MonthlyPoint]) -> String {
    if points.is_empty() {
        return "*No data.*\n\n".to_string();
    }

    let mut table = String::new();
    table.push_str("| Month | Streams | Minutes |\n");
    table.push_str("|:---|---:|---:|\n");
    for point in points {
        table.push_str(&format!(
            "| {} | {} | {:.1} |\n",
            point.year_month, point.streams, point.minutes
        ));
    }
    table.push('\n');

    table
}

/// Shorten a name to `width` characters, marking the cut with `...`.
pub fn truncate_name(name: &str, width: usize) -> String {
    if name.chars().count() > width {
        let kept: String = name.chars().take(width).collect();
        format!("{}...", kept)
    } else {
        name.to_string()
    }
}

/// Whole numbers print without decimals.
fn format_value(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{:.0}", value)
    } else {
        format!("{:.1}", value)
    }
}

/// Generate a JSON report.
pub fn generate_json_report(dashboard: &Dashboard) -> Result<String> {
    serde_json::to_string_pretty(dashboard).map_err(Into::into)
}

/// Write report content to a file.
pub fn write_report(content: &str, path: &Path) -> Result<()> {
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write report to {}", path.display()))
}
