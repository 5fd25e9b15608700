//! Playstats - streaming-history analytics
//!
//! A CLI tool that normalizes streaming records, applies filters and
//! renders the dashboard views of the query facade as a Markdown or JSON
//! report.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (unreadable input, bad config, invalid request, etc.)

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use futures::future::try_join_all;
use indicatif::{ProgressBar, ProgressStyle};
use playstats::cache::FingerprintCache;
use playstats::cli::{Args, OutputFormat};
use playstats::config::{Config, CONFIG_FILE_NAME};
use playstats::error::EngineResult;
use playstats::ingest::{read_path, write_csv_file};
use playstats::models::{CorrelationMatrix, Dataset, RankedResult};
use playstats::normalize::Normalizer;
use playstats::query::{MonthlyPoint, Overview, QueryFacade, RankBy, Session};
use playstats::report::{self, Dashboard, DashboardMetadata};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("Playstats v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    if let Err(e) = run(args).await {
        error!("Run failed: {:#}", e);
        eprintln!("\n❌ Error: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

/// Handle --init-config: generate a default .playstats.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(CONFIG_FILE_NAME);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            CONFIG_FILE_NAME
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", CONFIG_FILE_NAME))?;

    println!("✅ Created {} with default settings.", CONFIG_FILE_NAME);
    println!("   Edit it to customize column aliases, thresholds and report options.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level();

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Load, filter and report.
async fn run(args: Args) -> Result<()> {
    let start_time = Instant::now();

    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let input = args
        .input
        .clone()
        .ok_or_else(|| anyhow!("--input is required"))?;
    let source = input.display().to_string();

    // Step 1: Read and normalize
    let spinner = start_spinner(&args, &format!("Loading {}", source));
    let normalizer = Normalizer::from_config(&config);
    let input_format = args.input_format;
    let read_from = input.clone();
    let normalized = tokio::task::spawn_blocking(move || -> EngineResult<_> {
        let raw = read_path(&read_from, input_format)?;
        Ok(normalizer.normalize(&raw))
    })
    .await
    .context("Loading task panicked")?
    .with_context(|| format!("Failed to read {}", source))?;
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }

    let diagnostics = normalized.diagnostics;
    for err in diagnostics.errors.iter().take(5) {
        warn!("{}", err);
    }

    let cache = Arc::new(FingerprintCache::from_config(&config.cache));
    let facade = QueryFacade::new(Arc::clone(&cache));
    let mut session = Session::new(Arc::clone(&cache));
    session.load(&source, normalized.dataset);

    println!(
        "📥 Loaded {} records from {} ({} dropped, {} below {} ms)",
        session.dataset().len(),
        source,
        diagnostics.dropped_count,
        diagnostics.below_floor_count,
        config.normalize.min_duration_ms
    );

    // Step 2: Filter
    let mut dataset = facade
        .filter(session.dataset(), &args.filter_spec())
        .context("Invalid filter")?;
    if let Some(ref query) = args.search {
        dataset = facade.search_by_title(&dataset, query)?;
    }
    let filters = args.describe_filters();
    if !filters.is_empty() {
        println!(
            "🔎 {} of {} records match: {}",
            dataset.len(),
            session.dataset().len(),
            filters.join("; ")
        );
    }

    if let Some(ref export_path) = args.export {
        write_csv_file(&dataset, export_path)
            .with_context(|| format!("Failed to export to {}", export_path.display()))?;
        println!("💾 Exported {} records to {}", dataset.len(), export_path.display());
    }

    // Step 3: Build the dashboard
    let rank_by: RankBy = config
        .report
        .rank_by
        .parse()
        .map_err(|e: String| anyhow!(e))
        .context("Invalid report.rank_by")?;

    println!("\n📊 Building dashboard...");
    let dataset = Arc::new(dataset);
    let sections = build_sections(
        &facade,
        &dataset,
        config.report.top_n,
        rank_by,
        config.report.correlation_columns.clone(),
    )
    .await?;

    let metadata = DashboardMetadata {
        source: source.clone(),
        generated_at: Utc::now(),
        input_records: diagnostics.input_count,
        dropped_records: diagnostics.dropped_count,
        below_floor_records: diagnostics.below_floor_count,
        min_duration_ms: config.normalize.min_duration_ms,
        analyzed_records: dataset.len(),
        filters,
        rank_by,
        top_n: config.report.top_n,
        duration_seconds: start_time.elapsed().as_secs_f64(),
    };
    let dashboard = sections.into_dashboard(metadata, cache.stats())?;

    // Step 4: Render and save
    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&dashboard)?,
        OutputFormat::Markdown => {
            report::generate_markdown_report(&dashboard, config.report.track_name_width)
        }
    };
    let output_path = PathBuf::from(&config.general.output);
    report::write_report(&output, &output_path)?;

    let stats = cache.stats();
    debug!(
        "Cache: {} entries, {} hits, {} misses, {} evictions",
        stats.entries, stats.hits, stats.misses, stats.evictions
    );

    println!("\n📊 Summary:");
    println!("   Streams analyzed: {}", dashboard.overview.total_streams);
    println!(
        "   Artists: {} | Tracks: {}",
        dashboard.overview.unique_artists, dashboard.overview.unique_tracks
    );
    println!("   Listening time: {:.1}h", dashboard.overview.total_hours);
    println!("   Duration: {:.1}s", start_time.elapsed().as_secs_f64());
    println!("\n✅ Report saved to: {}", output_path.display());

    Ok(())
}

/// Spinner shown while loading, unless running quietly.
fn start_spinner(args: &Args, message: &str) -> Option<ProgressBar> {
    if args.quiet {
        return None;
    }

    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg} [{elapsed}]") {
        pb.set_style(style);
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Some(pb)
}

/// One dashboard view, as produced by a blocking worker.
enum Section {
    Overview(Arc<Overview>),
    TopArtists(Arc<RankedResult>),
    TopTracks(Arc<RankedResult>),
    Hourly(Arc<RankedResult>),
    Weekday(Arc<RankedResult>),
    Monthly(Arc<Vec<MonthlyPoint>>),
    Diversity(Arc<RankedResult>),
    Completion(Arc<RankedResult>),
    EndReasons(Option<Arc<RankedResult>>),
    Correlation(Arc<CorrelationMatrix>),
}

#[derive(Default)]
struct Sections {
    overview: Option<Arc<Overview>>,
    top_artists: Option<Arc<RankedResult>>,
    top_tracks: Option<Arc<RankedResult>>,
    hourly: Option<Arc<RankedResult>>,
    weekday: Option<Arc<RankedResult>>,
    monthly: Option<Arc<Vec<MonthlyPoint>>>,
    diversity: Option<Arc<RankedResult>>,
    completion: Option<Arc<RankedResult>>,
    end_reasons: Option<Arc<RankedResult>>,
    correlation: Option<Arc<CorrelationMatrix>>,
}

impl Sections {
    fn insert(&mut self, section: Section) {
        match section {
            Section::Overview(v) => self.overview = Some(v),
            Section::TopArtists(v) => self.top_artists = Some(v),
            Section::TopTracks(v) => self.top_tracks = Some(v),
            Section::Hourly(v) => self.hourly = Some(v),
            Section::Weekday(v) => self.weekday = Some(v),
            Section::Monthly(v) => self.monthly = Some(v),
            Section::Diversity(v) => self.diversity = Some(v),
            Section::Completion(v) => self.completion = Some(v),
            Section::EndReasons(v) => self.end_reasons = v,
            Section::Correlation(v) => self.correlation = Some(v),
        }
    }

    fn into_dashboard(
        self,
        metadata: DashboardMetadata,
        cache: playstats::cache::CacheStats,
    ) -> Result<Dashboard> {
        fn take<T: Clone>(value: Option<Arc<T>>, name: &str) -> Result<T> {
            value
                .map(|v| v.as_ref().clone())
                .ok_or_else(|| anyhow!("dashboard section '{}' was not built", name))
        }

        Ok(Dashboard {
            metadata,
            overview: take(self.overview, "overview")?,
            top_artists: take(self.top_artists, "top artists")?,
            top_tracks: take(self.top_tracks, "top tracks")?,
            hourly_activity: take(self.hourly, "hourly activity")?,
            weekday_activity: take(self.weekday, "weekday activity")?,
            monthly_trend: take(self.monthly, "monthly trend")?,
            artist_diversity: take(self.diversity, "artist diversity")?,
            completion: take(self.completion, "completion")?,
            end_reasons: self.end_reasons.map(|r| r.as_ref().clone()),
            correlation: take(self.correlation, "correlation")?,
            cache,
        })
    }
}

fn spawn_section<F>(
    facade: &QueryFacade,
    dataset: &Arc<Dataset>,
    build: F,
) -> JoinHandle<EngineResult<Section>>
where
    F: FnOnce(&QueryFacade, &Dataset) -> EngineResult<Section> + Send + 'static,
{
    let facade = facade.clone();
    let dataset = Arc::clone(dataset);
    tokio::task::spawn_blocking(move || build(&facade, &dataset))
}

/// Issue every dashboard query concurrently on the blocking pool.
async fn build_sections(
    facade: &QueryFacade,
    dataset: &Arc<Dataset>,
    top_n: usize,
    rank_by: RankBy,
    correlation_columns: Vec<String>,
) -> Result<Sections> {
    let handles = vec![
        spawn_section(facade, dataset, |f, d| f.overview(d).map(Section::Overview)),
        spawn_section(facade, dataset, move |f, d| {
            f.top_artists(d, top_n, rank_by).map(Section::TopArtists)
        }),
        spawn_section(facade, dataset, move |f, d| {
            f.top_tracks(d, top_n, rank_by).map(Section::TopTracks)
        }),
        spawn_section(facade, dataset, |f, d| {
            f.activity_by_hour(d).map(Section::Hourly)
        }),
        spawn_section(facade, dataset, |f, d| {
            f.activity_by_day_of_week(d).map(Section::Weekday)
        }),
        spawn_section(facade, dataset, |f, d| {
            f.monthly_trend(d).map(Section::Monthly)
        }),
        spawn_section(facade, dataset, |f, d| {
            f.artist_diversity(d).map(Section::Diversity)
        }),
        spawn_section(facade, dataset, |f, d| {
            f.completion_breakdown(d).map(Section::Completion)
        }),
        spawn_section(facade, dataset, |f, d| {
            f.end_reason_breakdown(d).map(Section::EndReasons)
        }),
        spawn_section(facade, dataset, move |f, d| {
            f.correlation_matrix(d, &correlation_columns)
                .map(Section::Correlation)
        }),
    ];

    let results = try_join_all(handles)
        .await
        .context("Dashboard worker panicked")?;

    let mut sections = Sections::default();
    for result in results {
        sections.insert(result.context("Failed to build dashboard section")?);
    }

    Ok(sections)
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", CONFIG_FILE_NAME);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
