//! Top-level run loop: scrape, filter, date extraction, enrichment, scoring,
//! alerts, persistence, reports and exports.
//!
//! Sources run one after another in the order given by [`RunOptions`]. A
//! failing source contributes no leads and the run continues. Collaborator
//! failures are logged and counted; the only error returned to the caller is
//! failure to write the combined leads file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AppError;
use crate::models::{LeadRecord, LeadSource};
use crate::report::{ReportBatchSummary, generate_reports};
use crate::scrape::Scraper;
use crate::timeline::DateTimelineExtractor;
use crate::traits::{
    AlertOutcome, ExportFormat, ExportOptions, FilterOptions, LeadAlerter, LeadEnricher,
    LeadExporter, LeadFilter, LeadManager, LeadScorer, ReportFormat, ReportGenerator,
};
use crate::util::{timestamped_file_name, write_json_atomic};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Events emitted by the orchestrator for monitoring/logging.
#[derive(Debug, Clone)]
pub enum PipelineEvent<'a> {
    RunStarted {
        run_id: Uuid,
        sources: &'a [LeadSource],
    },
    SourceStarted {
        source: LeadSource,
    },
    SourceCompleted {
        source: LeadSource,
        leads: usize,
        item_failures: usize,
        skipped_cached: usize,
    },
    SourceFailed {
        source: LeadSource,
        error: &'a str,
    },
    SourceSkipped {
        source: LeadSource,
        reason: &'a str,
    },
    Filtered {
        source: LeadSource,
        before: usize,
        after: usize,
    },
    DatesExtracted {
        documents: usize,
        with_deadlines: usize,
    },
    AlertsProcessed {
        sent: usize,
        threshold: f64,
        errors: usize,
    },
    CombinedSaved {
        path: &'a Path,
        leads: usize,
    },
    ReportsGenerated {
        generated: usize,
        failed: usize,
    },
    Exported {
        format: ExportFormat,
        path: &'a Path,
    },
    ExportFailed {
        format: ExportFormat,
        error: &'a str,
    },
    Interrupted {
        completed_items: usize,
    },
    RunFinished {
        run_id: Uuid,
        total_leads: usize,
    },
}

/// Trait for receiving pipeline events (decoupled logging).
pub trait PipelineReporter: Send + Sync {
    fn report(&self, event: PipelineEvent<'_>) {
        let _ = event;
    }
}

/// Reporter that uses the `tracing` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingPipelineReporter;

impl PipelineReporter for TracingPipelineReporter {
    fn report(&self, event: PipelineEvent<'_>) {
        match event {
            PipelineEvent::RunStarted { run_id, sources } => {
                tracing::info!(%run_id, ?sources, "Pipeline run started");
            }
            PipelineEvent::SourceStarted { source } => {
                tracing::info!(%source, "Scraping source");
            }
            PipelineEvent::SourceCompleted {
                source,
                leads,
                item_failures,
                skipped_cached,
            } => {
                tracing::info!(%source, leads, item_failures, skipped_cached, "Source completed");
            }
            PipelineEvent::SourceFailed { source, error } => {
                tracing::error!(%source, %error, "Source failed");
            }
            PipelineEvent::SourceSkipped { source, reason } => {
                tracing::warn!(%source, %reason, "Source skipped");
            }
            PipelineEvent::Filtered {
                source,
                before,
                after,
            } => {
                tracing::info!(%source, before, after, removed = before.saturating_sub(after), "Filtered leads");
            }
            PipelineEvent::DatesExtracted {
                documents,
                with_deadlines,
            } => {
                tracing::info!(documents, with_deadlines, "Extracted notice dates");
            }
            PipelineEvent::AlertsProcessed {
                sent,
                threshold,
                errors,
            } => {
                tracing::info!(sent, threshold, errors, "Alerts processed");
            }
            PipelineEvent::CombinedSaved { path, leads } => {
                tracing::info!(path = %path.display(), leads, "Saved combined leads");
            }
            PipelineEvent::ReportsGenerated { generated, failed } => {
                tracing::info!(generated, failed, "Reports generated");
            }
            PipelineEvent::Exported { format, path } => {
                tracing::info!(%format, path = %path.display(), "Exported leads");
            }
            PipelineEvent::ExportFailed { format, error } => {
                tracing::error!(%format, %error, "Export failed");
            }
            PipelineEvent::Interrupted { completed_items } => {
                tracing::warn!(completed_items, "Run interrupted");
            }
            PipelineEvent::RunFinished {
                run_id,
                total_leads,
            } => {
                tracing::info!(%run_id, total_leads, "Pipeline run finished");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory for the combined leads file.
    pub output_dir: PathBuf,
    /// Maximum number of leads sent to report generation.
    pub batch_size: usize,
    pub max_workers: usize,
    /// Leads scoring at or above this are high quality.
    pub high_quality_threshold: f64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("data"),
            batch_size: 10,
            max_workers: 4,
            high_quality_threshold: 60.0,
        }
    }
}

/// Per-run switches.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Sources to run, in order.
    pub sources: Vec<LeadSource>,
    pub max_pages: usize,
    pub max_listings: usize,
    /// `None` disables filtering.
    pub filter: Option<FilterOptions>,
    pub extract_dates: bool,
    /// `None` disables alerting.
    pub alert_threshold: Option<f64>,
    /// `None` disables report generation.
    pub report_format: Option<ReportFormat>,
    pub exports: Vec<ExportFormat>,
    pub export_options: ExportOptions,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            sources: LeadSource::ALL.to_vec(),
            max_pages: 5,
            max_listings: 50,
            filter: Some(FilterOptions::default()),
            extract_dates: true,
            alert_threshold: Some(85.0),
            report_format: Some(ReportFormat::Json),
            exports: Vec::new(),
            export_options: ExportOptions::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceFailure {
    pub source: LeadSource,
    pub kind: String,
    pub error: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertSummary {
    pub sent: usize,
    pub threshold: f64,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DateExtractionSummary {
    /// Notice documents examined.
    pub pdfs_processed: usize,
    /// Documents that yielded an auction date or redemption deadline.
    pub dates_extracted: usize,
}

/// Aggregate counters for one orchestrator run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRunResult {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Sources attempted, in run order.
    pub sources: Vec<LeadSource>,
    pub source_failures: Vec<SourceFailure>,
    pub pre_filter_total: usize,
    pub total_leads: usize,
    /// Leads kept per successful source, after filtering.
    pub leads_by_source: BTreeMap<LeadSource, usize>,
    pub filtered_by_source: BTreeMap<LeadSource, usize>,
    pub total_filtered: usize,
    /// Listings skipped inside otherwise successful sources.
    pub item_failures: usize,
    pub enrichment_failures: usize,
    pub high_quality_count: usize,
    pub non_owner_occupied: usize,
    pub saved_leads: usize,
    pub combined_file: Option<PathBuf>,
    pub date_extraction: Option<DateExtractionSummary>,
    pub alerts: Option<AlertSummary>,
    pub reports: Option<ReportBatchSummary>,
    pub exports: BTreeMap<ExportFormat, PathBuf>,
    pub interrupted: bool,
    pub completed_items: usize,
}

impl PipelineRunResult {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            sources: Vec::new(),
            source_failures: Vec::new(),
            pre_filter_total: 0,
            total_leads: 0,
            leads_by_source: BTreeMap::new(),
            filtered_by_source: BTreeMap::new(),
            total_filtered: 0,
            item_failures: 0,
            enrichment_failures: 0,
            high_quality_count: 0,
            non_owner_occupied: 0,
            saved_leads: 0,
            combined_file: None,
            date_extraction: None,
            alerts: None,
            reports: None,
            exports: BTreeMap::new(),
            interrupted: false,
            completed_items: 0,
        }
    }

    pub fn reports_generated(&self) -> usize {
        self.reports.as_ref().map_or(0, |r| r.generated)
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// The external collaborators consumed by the orchestrator.
pub struct Collaborators {
    pub filter: Box<dyn LeadFilter>,
    pub enricher: Box<dyn LeadEnricher>,
    pub scorer: Box<dyn LeadScorer>,
    pub alerter: Box<dyn LeadAlerter>,
    pub exporter: Box<dyn LeadExporter>,
    pub manager: Box<dyn LeadManager>,
    pub reports: Arc<dyn ReportGenerator>,
}

pub struct PipelineOrchestrator {
    scrapers: Vec<Box<dyn Scraper>>,
    collaborators: Collaborators,
    extractor: DateTimelineExtractor,
    config: PipelineConfig,
}

impl PipelineOrchestrator {
    pub fn new(config: PipelineConfig, collaborators: Collaborators) -> Self {
        Self {
            scrapers: Vec::new(),
            collaborators,
            extractor: DateTimelineExtractor::default(),
            config,
        }
    }

    /// Register the scraper for its source, replacing any earlier one.
    pub fn with_scraper(mut self, scraper: Box<dyn Scraper>) -> Self {
        self.scrapers.retain(|s| s.source() != scraper.source());
        self.scrapers.push(scraper);
        self
    }

    pub fn with_timeline_extractor(mut self, extractor: DateTimelineExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    /// Execute one run. Returns a partial result with `interrupted` set when
    /// `cancel` fires; no new stage starts after that.
    pub async fn run<R: PipelineReporter>(
        &mut self,
        options: &RunOptions,
        cancel: &CancellationToken,
        reporter: &R,
    ) -> Result<PipelineRunResult, AppError> {
        let mut result = PipelineRunResult::new();
        let mut sources: Vec<LeadSource> = Vec::new();
        for source in &options.sources {
            if !sources.contains(source) {
                sources.push(*source);
            }
        }
        reporter.report(PipelineEvent::RunStarted {
            run_id: result.run_id,
            sources: &sources,
        });

        // 1-2. Scrape and filter, one source at a time.
        let mut leads: Vec<LeadRecord> = Vec::new();
        for source in &sources {
            if cancel.is_cancelled() {
                result.interrupted = true;
                break;
            }
            result.sources.push(*source);
            let scraped = self.scrape_source(*source, options, cancel, &mut result, reporter).await;
            leads.extend(self.filter_source(*source, scraped, options, &mut result, reporter));
        }
        result.total_leads = leads.len();
        result.completed_items = result.pre_filter_total;

        if result.interrupted || cancel.is_cancelled() {
            return self.finish_interrupted(result, &leads, reporter);
        }

        // 3. Notice dates for public-records leads.
        if options.extract_dates {
            result.date_extraction = Some(self.extract_dates(&mut leads, reporter));
        }

        // 4. Enrichment, lead management, scoring.
        result.enrichment_failures += self.collaborators.enricher.add_owner_occupancy_flag(&mut leads);
        result.enrichment_failures += self.collaborators.enricher.add_equity_estimate(&mut leads);
        let mut leads = self.collaborators.manager.initialize(leads);
        self.score(&mut leads, &mut result);

        // 5. Alerts.
        if let Some(threshold) = options.alert_threshold {
            let AlertOutcome { sent, errors } = self.collaborators.alerter.process(&leads, threshold);
            reporter.report(PipelineEvent::AlertsProcessed {
                sent,
                threshold,
                errors: errors.len(),
            });
            result.alerts = Some(AlertSummary {
                sent,
                threshold,
                errors,
            });
        }

        // 6. Persistence.
        self.persist(&leads, &mut result, reporter)?;

        if cancel.is_cancelled() {
            return self.finish_interrupted(result, &[], reporter);
        }

        // 7. Reports.
        if let Some(format) = options.report_format {
            let batch = self.report_batch(&leads);
            if !batch.is_empty() {
                let summary = generate_reports(
                    Arc::clone(&self.collaborators.reports),
                    batch,
                    format,
                    self.config.max_workers,
                    cancel,
                )
                .await;
                reporter.report(PipelineEvent::ReportsGenerated {
                    generated: summary.generated,
                    failed: summary.failures.len(),
                });
                let skipped = summary.skipped;
                result.reports = Some(summary);
                if skipped > 0 {
                    return self.finish_interrupted(result, &[], reporter);
                }
            }
        }

        // 8. Exports.
        let mut formats = options.exports.clone();
        formats.sort();
        formats.dedup();
        for format in formats {
            if cancel.is_cancelled() {
                return self.finish_interrupted(result, &[], reporter);
            }
            match self
                .collaborators
                .exporter
                .export(&leads, format, &options.export_options)
            {
                Ok(path) => {
                    reporter.report(PipelineEvent::Exported {
                        format,
                        path: &path,
                    });
                    result.exports.insert(format, path);
                }
                Err(e) => {
                    let error = e.to_string();
                    reporter.report(PipelineEvent::ExportFailed {
                        format,
                        error: &error,
                    });
                }
            }
        }

        result.finished_at = Some(Utc::now());
        reporter.report(PipelineEvent::RunFinished {
            run_id: result.run_id,
            total_leads: result.total_leads,
        });
        Ok(result)
    }

    async fn scrape_source<R: PipelineReporter>(
        &mut self,
        source: LeadSource,
        options: &RunOptions,
        cancel: &CancellationToken,
        result: &mut PipelineRunResult,
        reporter: &R,
    ) -> Option<Vec<LeadRecord>> {
        let Some(scraper) = self.scrapers.iter_mut().find(|s| s.source() == source) else {
            reporter.report(PipelineEvent::SourceSkipped {
                source,
                reason: "no scraper configured",
            });
            return None;
        };

        reporter.report(PipelineEvent::SourceStarted { source });
        match scraper.run(options.max_pages, options.max_listings, cancel).await {
            Ok(report) => {
                reporter.report(PipelineEvent::SourceCompleted {
                    source,
                    leads: report.leads.len(),
                    item_failures: report.failures.len(),
                    skipped_cached: report.skipped_cached,
                });
                result.item_failures += report.failures.len();
                result.pre_filter_total += report.leads.len();
                result.interrupted |= report.interrupted;
                Some(report.leads)
            }
            Err(e) => {
                let error = e.to_string();
                reporter.report(PipelineEvent::SourceFailed {
                    source,
                    error: &error,
                });
                result.source_failures.push(SourceFailure {
                    source,
                    kind: e.kind().to_string(),
                    error,
                });
                None
            }
        }
    }

    fn filter_source<R: PipelineReporter>(
        &self,
        source: LeadSource,
        scraped: Option<Vec<LeadRecord>>,
        options: &RunOptions,
        result: &mut PipelineRunResult,
        reporter: &R,
    ) -> Vec<LeadRecord> {
        let Some(leads) = scraped else {
            return Vec::new();
        };
        let leads = match options.filter {
            Some(filter_options) => {
                let before = leads.len();
                let kept = self.collaborators.filter.filter(leads, filter_options);
                let after = kept.len().min(before);
                reporter.report(PipelineEvent::Filtered {
                    source,
                    before,
                    after,
                });
                result.filtered_by_source.insert(source, before - after);
                result.total_filtered += before - after;
                kept
            }
            None => leads,
        };
        result.leads_by_source.insert(source, leads.len());
        leads
    }

    fn extract_dates<R: PipelineReporter>(
        &self,
        leads: &mut [LeadRecord],
        reporter: &R,
    ) -> DateExtractionSummary {
        let mut summary = DateExtractionSummary::default();
        for lead in leads.iter_mut() {
            let Some(text) = lead.notice_text.as_deref() else {
                continue;
            };
            summary.pdfs_processed += 1;
            let timeline = self.extractor.extract(text);
            if timeline.has_deadline() {
                summary.dates_extracted += 1;
            }
            tracing::debug!(
                lead = %lead.key(),
                auction = ?timeline.auction_date,
                redemption = ?timeline.redemption_deadline,
                urgency = %timeline.urgency_level,
                "Notice dates"
            );
            lead.timeline = Some(timeline);
        }
        reporter.report(PipelineEvent::DatesExtracted {
            documents: summary.pdfs_processed,
            with_deadlines: summary.dates_extracted,
        });
        summary
    }

    fn score(&self, leads: &mut [LeadRecord], result: &mut PipelineRunResult) {
        for lead in leads.iter_mut() {
            match self.collaborators.scorer.score(lead) {
                Ok(score) => lead.score = Some(score.clamp(0.0, 100.0)),
                Err(e) => tracing::warn!(lead = %lead.key(), error = %e, "Scoring failed"),
            }
        }
        let threshold = self.config.high_quality_threshold;
        result.high_quality_count = leads
            .iter()
            .filter(|l| l.score.is_some_and(|s| s >= threshold))
            .count();
        result.non_owner_occupied = leads
            .iter()
            .filter(|l| l.owner_occupied == Some(false))
            .count();
    }

    fn persist<R: PipelineReporter>(
        &self,
        leads: &[LeadRecord],
        result: &mut PipelineRunResult,
        reporter: &R,
    ) -> Result<(), AppError> {
        match self.collaborators.manager.save_all(leads) {
            Ok(saved) => result.saved_leads = saved,
            Err(e) => tracing::error!(error = %e, "Failed to save individual leads"),
        }
        result.combined_file = self.write_combined(leads, reporter)?;
        Ok(())
    }

    fn write_combined<R: PipelineReporter>(
        &self,
        leads: &[LeadRecord],
        reporter: &R,
    ) -> Result<Option<PathBuf>, AppError> {
        if leads.is_empty() {
            return Ok(None);
        }
        let path = self
            .config
            .output_dir
            .join(timestamped_file_name("combined_leads", "json", Utc::now()));
        write_json_atomic(&path, leads)?;
        reporter.report(PipelineEvent::CombinedSaved {
            path: &path,
            leads: leads.len(),
        });
        Ok(Some(path))
    }

    /// High-quality leads by descending score, capped at the batch size.
    /// Falls back to the first batch of all leads when none qualify.
    fn report_batch(&self, leads: &[LeadRecord]) -> Vec<LeadRecord> {
        let threshold = self.config.high_quality_threshold;
        let mut ranked: Vec<&LeadRecord> = leads
            .iter()
            .filter(|l| l.score.is_some_and(|s| s >= threshold))
            .collect();
        ranked.sort_by(|a, b| b.score.unwrap_or(0.0).total_cmp(&a.score.unwrap_or(0.0)));
        if ranked.is_empty() {
            ranked = leads.iter().collect();
        }
        ranked
            .into_iter()
            .take(self.config.batch_size)
            .cloned()
            .collect()
    }

    /// Leads scraped before an interrupt are still written out: the dedup
    /// ledger already marks them processed.
    fn finish_interrupted<R: PipelineReporter>(
        &self,
        mut result: PipelineRunResult,
        unsaved: &[LeadRecord],
        reporter: &R,
    ) -> Result<PipelineRunResult, AppError> {
        result.interrupted = true;
        if !unsaved.is_empty() {
            result.combined_file = self.write_combined(unsaved, reporter)?;
        }
        reporter.report(PipelineEvent::Interrupted {
            completed_items: result.completed_items,
        });
        result.finished_at = Some(Utc::now());
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;

    fn leads(source: LeadSource, n: usize) -> Vec<LeadRecord> {
        (0..n)
            .map(|i| {
                let mut lead = LeadRecord::new(source, format!("{}-{i}", source.as_str()), Utc::now());
                lead.description = format!("listing {i}");
                lead
            })
            .collect()
    }

    struct Harness {
        filter: MockFilter,
        enricher: MockEnricher,
        scorer: MockScorer,
        alerter: MockAlerter,
        exporter: MockExporter,
        manager: MockLeadManager,
        reports: MockReportGenerator,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                filter: MockFilter::new(),
                enricher: MockEnricher::new(),
                scorer: MockScorer::new(50.0),
                alerter: MockAlerter::new(),
                exporter: MockExporter::new(),
                manager: MockLeadManager::new(),
                reports: MockReportGenerator::new(),
            }
        }

        fn orchestrator(&self, output_dir: &Path) -> PipelineOrchestrator {
            PipelineOrchestrator::new(
                PipelineConfig {
                    output_dir: output_dir.to_path_buf(),
                    batch_size: 3,
                    max_workers: 2,
                    high_quality_threshold: 60.0,
                },
                Collaborators {
                    filter: Box::new(self.filter.clone()),
                    enricher: Box::new(self.enricher.clone()),
                    scorer: Box::new(self.scorer.clone()),
                    alerter: Box::new(self.alerter.clone()),
                    exporter: Box::new(self.exporter.clone()),
                    manager: Box::new(self.manager.clone()),
                    reports: Arc::new(self.reports.clone()),
                },
            )
        }
    }

    fn options(sources: &[LeadSource]) -> RunOptions {
        RunOptions {
            sources: sources.to_vec(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn failing_source_is_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let harness = Harness::new();
        harness.filter.drop_ids(["classifieds-1", "classifieds-3"]);

        let mut orchestrator = harness
            .orchestrator(dir.path())
            .with_scraper(Box::new(MockScraper::new(
                LeadSource::Classifieds,
                leads(LeadSource::Classifieds, 5),
            )))
            .with_scraper(Box::new(MockScraper::failing(
                LeadSource::Marketplace,
                "connection refused",
            )));

        let result = orchestrator
            .run(
                &options(&[LeadSource::Classifieds, LeadSource::Marketplace]),
                &CancellationToken::new(),
                &TracingPipelineReporter,
            )
            .await
            .unwrap();

        assert_eq!(result.leads_by_source, BTreeMap::from([(LeadSource::Classifieds, 3)]));
        assert_eq!(result.filtered_by_source, BTreeMap::from([(LeadSource::Classifieds, 2)]));
        assert_eq!(result.total_leads, 3);
        assert_eq!(result.pre_filter_total, 5);
        assert_eq!(result.total_filtered, 2);
        assert_eq!(result.source_failures.len(), 1);
        assert_eq!(result.source_failures[0].source, LeadSource::Marketplace);
        assert_eq!(result.source_failures[0].kind, "network");
        assert!(!result.interrupted);
    }

    #[tokio::test]
    async fn counters_sum_across_sources() {
        let dir = tempfile::tempdir().unwrap();
        let harness = Harness::new();
        harness.filter.drop_ids(["marketplace-0"]);

        let mut orchestrator = harness
            .orchestrator(dir.path())
            .with_scraper(Box::new(MockScraper::new(LeadSource::Classifieds, leads(LeadSource::Classifieds, 4))))
            .with_scraper(Box::new(MockScraper::new(LeadSource::Marketplace, leads(LeadSource::Marketplace, 2))))
            .with_scraper(Box::new(MockScraper::new(LeadSource::PublicRecords, Vec::new())));

        let result = orchestrator
            .run(&RunOptions::default(), &CancellationToken::new(), &TracingPipelineReporter)
            .await
            .unwrap();

        assert_eq!(result.total_leads, result.leads_by_source.values().sum::<usize>());
        assert_eq!(result.total_filtered, result.filtered_by_source.values().sum::<usize>());
        assert_eq!(result.total_leads, result.pre_filter_total - result.total_filtered);
        assert_eq!(result.total_leads, 5);
        assert_eq!(result.leads_by_source[&LeadSource::PublicRecords], 0);
        assert_eq!(
            result.sources,
            vec![LeadSource::Classifieds, LeadSource::Marketplace, LeadSource::PublicRecords]
        );
    }

    #[tokio::test]
    async fn disabled_filter_records_no_filter_counts() {
        let dir = tempfile::tempdir().unwrap();
        let harness = Harness::new();
        harness.filter.drop_ids(["classifieds-0"]);
        let mut orchestrator = harness
            .orchestrator(dir.path())
            .with_scraper(Box::new(MockScraper::new(LeadSource::Classifieds, leads(LeadSource::Classifieds, 2))));

        let result = orchestrator
            .run(
                &RunOptions {
                    filter: None,
                    ..options(&[LeadSource::Classifieds])
                },
                &CancellationToken::new(),
                &TracingPipelineReporter,
            )
            .await
            .unwrap();
        assert_eq!(result.total_leads, 2);
        assert!(result.filtered_by_source.is_empty());
        assert_eq!(harness.filter.calls(), 0);
    }

    #[tokio::test]
    async fn persists_combined_file_and_individual_leads() {
        let dir = tempfile::tempdir().unwrap();
        let harness = Harness::new();
        let mut orchestrator = harness
            .orchestrator(dir.path())
            .with_scraper(Box::new(MockScraper::new(LeadSource::Classifieds, leads(LeadSource::Classifieds, 3))));

        let result = orchestrator
            .run(&options(&[LeadSource::Classifieds]), &CancellationToken::new(), &TracingPipelineReporter)
            .await
            .unwrap();

        let path = result.combined_file.unwrap();
        assert!(path.file_name().unwrap().to_string_lossy().starts_with("combined_leads_"));
        let saved: Vec<LeadRecord> = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved.len(), 3);
        assert_eq!(harness.manager.saved().len(), 3);
        assert_eq!(result.saved_leads, 3);
        assert!(saved.iter().all(|l| l.score == Some(50.0)));
    }

    #[tokio::test]
    async fn no_leads_means_no_combined_file() {
        let dir = tempfile::tempdir().unwrap();
        let harness = Harness::new();
        let mut orchestrator = harness
            .orchestrator(dir.path())
            .with_scraper(Box::new(MockScraper::new(LeadSource::Classifieds, Vec::new())));
        let result = orchestrator
            .run(&options(&[LeadSource::Classifieds]), &CancellationToken::new(), &TracingPipelineReporter)
            .await
            .unwrap();
        assert!(result.combined_file.is_none());
        assert!(result.reports.is_none());
    }

    #[tokio::test]
    async fn unwritable_output_is_a_hard_error() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "x").unwrap();

        let harness = Harness::new();
        let mut orchestrator = harness
            .orchestrator(&blocker)
            .with_scraper(Box::new(MockScraper::new(LeadSource::Classifieds, leads(LeadSource::Classifieds, 1))));
        let err = orchestrator
            .run(&options(&[LeadSource::Classifieds]), &CancellationToken::new(), &TracingPipelineReporter)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::IoError(_)));
    }

    #[tokio::test]
    async fn enrichment_failures_keep_the_lead() {
        let dir = tempfile::tempdir().unwrap();
        let harness = Harness::new();
        harness.enricher.fail_for("classifieds-1");
        let mut orchestrator = harness
            .orchestrator(dir.path())
            .with_scraper(Box::new(MockScraper::new(LeadSource::Classifieds, leads(LeadSource::Classifieds, 3))));

        let result = orchestrator
            .run(&options(&[LeadSource::Classifieds]), &CancellationToken::new(), &TracingPipelineReporter)
            .await
            .unwrap();
        assert_eq!(result.total_leads, 3);
        assert_eq!(result.enrichment_failures, 2);
        assert_eq!(result.non_owner_occupied, 2);

        let saved = harness.manager.saved();
        let failed = saved.iter().find(|l| l.source_id() == "classifieds-1").unwrap();
        assert_eq!(failed.owner_occupied, None);
        assert_eq!(failed.equity_percentage, None);
    }

    #[tokio::test]
    async fn alerts_use_threshold_and_errors_do_not_abort() {
        let dir = tempfile::tempdir().unwrap();
        let harness = Harness::new();
        harness.scorer.set("classifieds-0", 92.0);
        harness.alerter.fail_for("classifieds-0");
        harness.scorer.set("classifieds-1", 88.0);
        let mut orchestrator = harness
            .orchestrator(dir.path())
            .with_scraper(Box::new(MockScraper::new(LeadSource::Classifieds, leads(LeadSource::Classifieds, 3))));

        let result = orchestrator
            .run(&options(&[LeadSource::Classifieds]), &CancellationToken::new(), &TracingPipelineReporter)
            .await
            .unwrap();
        let alerts = result.alerts.unwrap();
        assert_eq!(alerts.threshold, 85.0);
        assert_eq!(alerts.sent, 1);
        assert_eq!(alerts.errors.len(), 1);
        assert_eq!(harness.alerter.thresholds(), vec![85.0]);
        assert!(result.combined_file.is_some());
    }

    #[tokio::test]
    async fn reports_cover_ranked_high_quality_leads() {
        let dir = tempfile::tempdir().unwrap();
        let harness = Harness::new();
        for (id, score) in [("classifieds-0", 61.0), ("classifieds-2", 95.0), ("classifieds-3", 70.0), ("classifieds-4", 80.0)] {
            harness.scorer.set(id, score);
        }
        harness.reports.fail_for("classifieds-3");
        let mut orchestrator = harness
            .orchestrator(dir.path())
            .with_scraper(Box::new(MockScraper::new(LeadSource::Classifieds, leads(LeadSource::Classifieds, 5))));

        let result = orchestrator
            .run(&options(&[LeadSource::Classifieds]), &CancellationToken::new(), &TracingPipelineReporter)
            .await
            .unwrap();

        assert_eq!(result.high_quality_count, 4);
        let mut requested = harness.reports.generated();
        requested.sort();
        // batch_size 3: 95, 80, 70
        assert_eq!(requested, vec!["classifieds-2", "classifieds-3", "classifieds-4"]);

        let reports = result.reports.unwrap();
        assert_eq!(reports.generated, 2);
        assert_eq!(reports.failures[0].lead_key, "classifieds:classifieds-3");
        for entry in &reports.entries {
            assert!(entry.path.to_string_lossy().contains(&entry.source_id));
        }
    }

    #[tokio::test]
    async fn reports_fall_back_to_first_batch() {
        let dir = tempfile::tempdir().unwrap();
        let harness = Harness::new();
        let mut orchestrator = harness
            .orchestrator(dir.path())
            .with_scraper(Box::new(MockScraper::new(LeadSource::Classifieds, leads(LeadSource::Classifieds, 5))));
        let result = orchestrator
            .run(&options(&[LeadSource::Classifieds]), &CancellationToken::new(), &TracingPipelineReporter)
            .await
            .unwrap();
        assert_eq!(result.high_quality_count, 0);
        let mut requested = harness.reports.generated();
        requested.sort();
        assert_eq!(requested, vec!["classifieds-0", "classifieds-1", "classifieds-2"]);
    }

    #[tokio::test]
    async fn export_failure_does_not_block_other_format() {
        let dir = tempfile::tempdir().unwrap();
        let harness = Harness::new();
        harness.exporter.fail_format(ExportFormat::Csv);
        let mut orchestrator = harness
            .orchestrator(dir.path())
            .with_scraper(Box::new(MockScraper::new(LeadSource::Classifieds, leads(LeadSource::Classifieds, 2))));

        let export_options = ExportOptions {
            min_score: 40.0,
            include_owner_occupied: false,
            min_equity_percentage: Some(20.0),
        };
        let result = orchestrator
            .run(
                &RunOptions {
                    exports: vec![ExportFormat::Csv, ExportFormat::Excel],
                    export_options,
                    ..options(&[LeadSource::Classifieds])
                },
                &CancellationToken::new(),
                &TracingPipelineReporter,
            )
            .await
            .unwrap();

        assert!(!result.exports.contains_key(&ExportFormat::Csv));
        assert!(result.exports.contains_key(&ExportFormat::Excel));
        let calls = harness.exporter.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls.iter().all(|(_, _, opts)| *opts == export_options));
    }

    #[tokio::test]
    async fn notice_dates_are_extracted_for_leads_with_text() {
        let dir = tempfile::tempdir().unwrap();
        let harness = Harness::new();
        let mut notices = leads(LeadSource::PublicRecords, 3);
        notices[0].notice_text = Some("will be sold at public auction on January 5, 2099".into());
        notices[1].notice_text = Some("no dates at all".into());
        let mut orchestrator = harness
            .orchestrator(dir.path())
            .with_scraper(Box::new(MockScraper::new(LeadSource::PublicRecords, notices)));

        let result = orchestrator
            .run(&options(&[LeadSource::PublicRecords]), &CancellationToken::new(), &TracingPipelineReporter)
            .await
            .unwrap();
        assert_eq!(
            result.date_extraction,
            Some(DateExtractionSummary {
                pdfs_processed: 2,
                dates_extracted: 1,
            })
        );
        let saved = harness.manager.saved();
        let with_dates = saved.iter().find(|l| l.source_id() == "public_records-0").unwrap();
        assert!(with_dates.timeline.as_ref().unwrap().auction_date.is_some());
    }

    #[tokio::test]
    async fn cancelled_run_returns_partial_result() {
        let dir = tempfile::tempdir().unwrap();
        let harness = Harness::new();
        let scraper = MockScraper::new(LeadSource::Classifieds, leads(LeadSource::Classifieds, 2));
        let mut orchestrator = harness.orchestrator(dir.path()).with_scraper(Box::new(scraper.clone()));

        let token = CancellationToken::new();
        token.cancel();
        let result = orchestrator
            .run(&options(&[LeadSource::Classifieds]), &token, &TracingPipelineReporter)
            .await
            .unwrap();

        assert!(result.interrupted);
        assert_eq!(result.completed_items, 0);
        assert_eq!(scraper.runs(), 0);
        assert!(result.finished_at.is_some());
    }

    #[tokio::test]
    async fn cancellation_after_first_source_keeps_scraped_leads() {
        let dir = tempfile::tempdir().unwrap();
        let harness = Harness::new();
        let token = CancellationToken::new();
        let first = MockScraper::new(LeadSource::Classifieds, leads(LeadSource::Classifieds, 2))
            .cancel_after_run(token.clone());
        let second = MockScraper::new(LeadSource::Marketplace, leads(LeadSource::Marketplace, 2));
        let mut orchestrator = harness
            .orchestrator(dir.path())
            .with_scraper(Box::new(first))
            .with_scraper(Box::new(second.clone()));

        let result = orchestrator
            .run(
                &options(&[LeadSource::Classifieds, LeadSource::Marketplace]),
                &token,
                &TracingPipelineReporter,
            )
            .await
            .unwrap();

        assert!(result.interrupted);
        assert_eq!(result.completed_items, 2);
        assert_eq!(second.runs(), 0);
        assert!(result.combined_file.is_some());
        assert!(harness.manager.saved().is_empty());
    }

    #[tokio::test]
    async fn unknown_source_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let harness = Harness::new();
        let mut orchestrator = harness.orchestrator(dir.path());
        let result = orchestrator
            .run(&options(&[LeadSource::Marketplace]), &CancellationToken::new(), &TracingPipelineReporter)
            .await
            .unwrap();
        assert_eq!(result.total_leads, 0);
        assert!(result.leads_by_source.is_empty());
        assert!(result.source_failures.is_empty());
    }
}
