use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use midcoast_client::{
    ClassifiedsScraper, ClassifiedsSite, HtmdCleaner, MarketplaceScraper, MarketplaceSite,
    PublicRecordsScraper, PublicRecordsSite, ReqwestFetcher, ScraperConfig,
};
use midcoast_core::models::{LeadSource, LeadStatus};
use midcoast_core::pipeline::{
    Collaborators, PipelineConfig, PipelineOrchestrator, PipelineRunResult, RunOptions,
    TracingPipelineReporter,
};
use midcoast_core::politeness::PolitenessConfig;
use midcoast_core::timeline::{DateTimelineExtractor, TimelineConfig};
use midcoast_core::traits::{ExportFormat, ExportOptions, FilterOptions, ReportFormat};
use midcoast_store::{
    FileExporter, FileLeadManager, FileReportGenerator, HeuristicEnricher, HeuristicScorer,
    KeywordLeadFilter, LogAlerter,
};

#[derive(Parser)]
#[command(name = "midcoast", version, about = "FSBO and pre-foreclosure lead generation")]
struct Cli {
    /// Root directory for caches, leads, exports and reports
    #[arg(long, global = true, env = "MIDCOAST_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape all enabled sources and run the lead pipeline
    Run(RunArgs),

    /// Extract auction and redemption dates from a notice file or a directory of .txt notices
    Timeline {
        /// Notice file (.txt) or directory
        path: PathBuf,

        /// Timeline config (created from a template if missing)
        #[arg(long, env = "MIDCOAST_TIMELINE_CONFIG")]
        config: Option<PathBuf>,
    },

    /// Move a stored lead to a new status
    Status {
        /// classifieds, marketplace or public_records
        source: LeadSource,
        source_id: String,
        /// new, reviewed, contacted, negotiating, under_contract, closed or archived
        status: LeadStatus,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Run only this source
    #[arg(long, conflicts_with_all = ["no_classifieds", "no_marketplace", "no_public_records"])]
    only: Option<LeadSource>,

    #[arg(long)]
    no_classifieds: bool,

    #[arg(long)]
    no_marketplace: bool,

    #[arg(long)]
    no_public_records: bool,

    #[arg(long, default_value_t = 5)]
    max_pages: usize,

    #[arg(long, default_value_t = 50)]
    max_listings: usize,

    #[arg(long, env = "MIDCOAST_CLASSIFIEDS_URL", default_value = "https://maine.craigslist.org")]
    classifieds_url: String,

    /// Classifieds sub-area, e.g. brunswick or portland
    #[arg(long, env = "MIDCOAST_SEARCH_AREA", default_value = "brunswick")]
    search_area: String,

    /// Marketplace API base URL; the source is skipped when unset
    #[arg(long, env = "MIDCOAST_MARKETPLACE_URL")]
    marketplace_url: Option<String>,

    /// County registry base URL; the source is skipped when unset
    #[arg(long, env = "MIDCOAST_RECORDS_URL")]
    records_url: Option<String>,

    #[arg(long, env = "MIDCOAST_COUNTY", default_value = "Cumberland")]
    county: String,

    #[arg(long, env = "MIDCOAST_STATE", default_value = "ME")]
    state: String,

    /// Minimum seconds between fetches
    #[arg(long, env = "MIDCOAST_MIN_DELAY", default_value_t = 2.0)]
    min_delay: f64,

    /// Maximum seconds between fetches
    #[arg(long, env = "MIDCOAST_MAX_DELAY", default_value_t = 5.0)]
    max_delay: f64,

    #[arg(long)]
    no_reports: bool,

    #[arg(long, default_value = "json")]
    report_format: ReportFormat,

    /// Leads sent to report generation
    #[arg(long, default_value_t = 10)]
    batch_size: usize,

    /// Concurrent report workers
    #[arg(long, env = "MIDCOAST_MAX_WORKERS", default_value_t = 4)]
    max_workers: usize,

    /// Score (0-100) at which a lead counts as high quality
    #[arg(long, default_value_t = 60.0)]
    high_quality_threshold: f64,

    #[arg(long)]
    no_filter: bool,

    #[arg(long)]
    no_rental_filter: bool,

    #[arg(long)]
    no_spam_filter: bool,

    #[arg(long)]
    export_csv: bool,

    #[arg(long)]
    export_excel: bool,

    /// Minimum lead score for export (0-100)
    #[arg(long, default_value_t = 0.0)]
    min_score: f64,

    #[arg(long)]
    exclude_owner_occupied: bool,

    /// Minimum equity percentage for export (0-100)
    #[arg(long)]
    min_equity: Option<f64>,

    #[arg(long)]
    no_alerts: bool,

    /// Score threshold for lead alerts (0-100)
    #[arg(long, default_value_t = 85.0)]
    alert_threshold: f64,

    #[arg(long)]
    no_extract_dates: bool,

    /// Timeline config (created from a template if missing)
    #[arg(long, env = "MIDCOAST_TIMELINE_CONFIG")]
    timeline_config: Option<PathBuf>,

    /// Print the run result as JSON instead of a summary
    #[arg(long)]
    json: bool,
}

impl RunArgs {
    fn sources(&self) -> Vec<LeadSource> {
        if let Some(only) = self.only {
            return vec![only];
        }
        LeadSource::ALL
            .into_iter()
            .filter(|source| match source {
                LeadSource::Classifieds => !self.no_classifieds,
                LeadSource::Marketplace => !self.no_marketplace,
                LeadSource::PublicRecords => !self.no_public_records,
            })
            .collect()
    }

    fn run_options(&self) -> RunOptions {
        let mut exports = Vec::new();
        if self.export_csv {
            exports.push(ExportFormat::Csv);
        }
        if self.export_excel {
            exports.push(ExportFormat::Excel);
        }

        RunOptions {
            sources: self.sources(),
            max_pages: self.max_pages,
            max_listings: self.max_listings,
            filter: (!self.no_filter).then_some(FilterOptions {
                enable_rental_filter: !self.no_rental_filter,
                enable_spam_filter: !self.no_spam_filter,
            }),
            extract_dates: !self.no_extract_dates,
            alert_threshold: (!self.no_alerts).then_some(self.alert_threshold),
            report_format: (!self.no_reports).then_some(self.report_format),
            exports,
            export_options: ExportOptions {
                min_score: self.min_score,
                include_owner_occupied: !self.exclude_owner_occupied,
                min_equity_percentage: self.min_equity,
            },
        }
    }

    fn politeness(&self) -> Result<PolitenessConfig> {
        let delay = |flag: &str, secs: f64| {
            Duration::try_from_secs_f64(secs)
                .with_context(|| format!("--{flag} must be a finite, non-negative number of seconds"))
        };
        Ok(PolitenessConfig::new(
            delay("min-delay", self.min_delay)?,
            delay("max-delay", self.max_delay)?,
        ))
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("midcoast=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => cmd_run(&cli.data_dir, &args).await,
        Commands::Timeline { path, config } => {
            let config = config.unwrap_or_else(|| default_timeline_config(&cli.data_dir));
            cmd_timeline(&path, &config)
        }
        Commands::Status {
            source,
            source_id,
            status,
        } => cmd_status(&cli.data_dir, source, &source_id, status),
    }
}

fn default_timeline_config(data_dir: &Path) -> PathBuf {
    data_dir.join("config").join("timeline_config.json")
}

async fn cmd_run(data_dir: &Path, args: &RunArgs) -> Result<ExitCode> {
    let options = args.run_options();
    let fetcher = ReqwestFetcher::new().context("Failed to initialize HTTP client")?;
    let politeness = args.politeness()?;

    let timeline_config = args
        .timeline_config
        .clone()
        .unwrap_or_else(|| default_timeline_config(data_dir));
    let extractor = DateTimelineExtractor::from_config(&TimelineConfig::load_or_init(&timeline_config));

    let collaborators = Collaborators {
        filter: Box::new(KeywordLeadFilter::new()),
        enricher: Box::new(HeuristicEnricher::new()),
        scorer: Box::new(HeuristicScorer::default()),
        alerter: Box::new(LogAlerter::new(data_dir.join("alerts").join("alerts.jsonl"))),
        exporter: Box::new(FileExporter::new(data_dir.join("exports"))),
        manager: Box::new(FileLeadManager::new(data_dir.join("leads"))),
        reports: Arc::new(FileReportGenerator::new(data_dir.join("reports"))),
    };
    let config = PipelineConfig {
        output_dir: data_dir.to_path_buf(),
        batch_size: args.batch_size,
        max_workers: args.max_workers,
        high_quality_threshold: args.high_quality_threshold,
    };

    let mut orchestrator =
        PipelineOrchestrator::new(config, collaborators).with_timeline_extractor(extractor);

    let scraper_config =
        |source| ScraperConfig::for_source(source, data_dir).with_politeness(politeness.clone());

    if options.sources.contains(&LeadSource::Classifieds) {
        let site = ClassifiedsSite::new(&args.classifieds_url, Some(args.search_area.as_str()))
            .context("Invalid --classifieds-url")?;
        orchestrator = orchestrator.with_scraper(Box::new(ClassifiedsScraper::new(
            site,
            fetcher.clone(),
            &scraper_config(LeadSource::Classifieds),
        )));
    }
    if let (true, Some(url)) = (
        options.sources.contains(&LeadSource::Marketplace),
        &args.marketplace_url,
    ) {
        let site = MarketplaceSite::new(url).context("Invalid --marketplace-url")?;
        orchestrator = orchestrator.with_scraper(Box::new(MarketplaceScraper::new(
            site,
            fetcher.clone(),
            &scraper_config(LeadSource::Marketplace),
        )));
    }
    if let (true, Some(url)) = (
        options.sources.contains(&LeadSource::PublicRecords),
        &args.records_url,
    ) {
        let site = PublicRecordsSite::new(url, &args.county, &args.state, HtmdCleaner::new())
            .context("Invalid --records-url")?;
        orchestrator = orchestrator.with_scraper(Box::new(PublicRecordsScraper::new(
            site,
            fetcher.clone(),
            &scraper_config(LeadSource::PublicRecords),
        )));
    }

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, stopping before the next fetch (Ctrl-C again to exit now)");
            ctrl_c.cancel();
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::error!("Second interrupt, exiting");
                std::process::exit(1);
            }
        }
    });

    let result = orchestrator
        .run(&options, &cancel, &TracingPipelineReporter)
        .await
        .context("Pipeline run failed")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_summary(&result);
    }

    Ok(if result.interrupted {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn print_summary(result: &PipelineRunResult) {
    println!("Run {}", result.run_id);
    if result.interrupted {
        println!(
            "Interrupted after {} completed items; partial results below.",
            result.completed_items
        );
    }

    println!("\nLeads: {} (of {} scraped)", result.total_leads, result.pre_filter_total);
    for (source, count) in &result.leads_by_source {
        let filtered = result.filtered_by_source.get(source).copied().unwrap_or(0);
        println!("  {source}: {count} kept, {filtered} filtered");
    }
    for failure in &result.source_failures {
        println!("  {}: FAILED ({}: {})", failure.source, failure.kind, failure.error);
    }
    if result.item_failures > 0 {
        println!("  {} listings skipped after errors", result.item_failures);
    }

    println!("High-quality leads: {}", result.high_quality_count);
    println!("Non-owner-occupied: {}", result.non_owner_occupied);

    if let Some(dates) = &result.date_extraction {
        println!(
            "Notices examined: {}, with deadlines: {}",
            dates.pdfs_processed, dates.dates_extracted
        );
    }
    if let Some(alerts) = &result.alerts {
        println!(
            "Sent {} alerts for leads with scores >= {}",
            alerts.sent, alerts.threshold
        );
        for error in &alerts.errors {
            println!("  alert error: {error}");
        }
    }
    if let Some(reports) = &result.reports {
        println!(
            "Reports: {} generated, {} failed, {} skipped",
            reports.generated,
            reports.failures.len(),
            reports.skipped
        );
    }
    if let Some(path) = &result.combined_file {
        println!("Combined leads: {}", path.display());
    }
    for (format, path) in &result.exports {
        println!("{format} export: {}", path.display());
    }
}

fn cmd_timeline(path: &Path, config_path: &Path) -> Result<ExitCode> {
    let extractor = DateTimelineExtractor::from_config(&TimelineConfig::load_or_init(config_path));

    let result = if path.is_dir() {
        let (best, files) = extractor.extract_dir(path);
        tracing::info!(files = files.len(), dir = %path.display(), "Examined notice files");
        match best {
            Some(best) => best,
            None => bail!("No .txt notices found in {}", path.display()),
        }
    } else {
        extractor.extract_file(path)
    };

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(ExitCode::SUCCESS)
}

fn cmd_status(data_dir: &Path, source: LeadSource, source_id: &str, status: LeadStatus) -> Result<ExitCode> {
    let manager = FileLeadManager::new(data_dir.join("leads"));
    let updated = manager
        .set_status(source, source_id, status)
        .with_context(|| format!("Failed to update {source}:{source_id}"))?;
    if !updated {
        bail!("No stored lead {source}:{source_id}");
    }
    println!("{source}:{source_id} -> {status}");
    Ok(ExitCode::SUCCESS)
}
