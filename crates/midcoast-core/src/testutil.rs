//! Test utilities: mock implementations of all core traits.
//!
//! Handwritten mocks for dependency injection in unit tests.
//! All mocks use `Arc<Mutex<_>>` for interior mutability, allowing
//! test assertions on recorded calls. Clones share state.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::AppError;
use crate::models::{LeadRecord, LeadSource};
use crate::normalize::{NormalizeContext, RawListing, normalize_listing};
use crate::scrape::{ScrapeReport, Scraper};
use crate::traits::{
    AlertOutcome, Cleaner, EquityEstimate, ExportFormat, ExportOptions, Fetcher, FilterOptions,
    LeadAlerter, LeadEnricher, LeadExporter, LeadFilter, LeadManager, LeadScorer, ReportFormat,
    ReportGenerator,
};

// ---------------------------------------------------------------------------
// MockFetcher
// ---------------------------------------------------------------------------

#[derive(Clone)]
enum Canned {
    Body(String),
    Http(String),
    Network(String),
}

/// Mock fetcher serving canned bodies keyed by URL.
///
/// Unknown URLs return an HTTP 404 error.
#[derive(Clone, Default)]
pub struct MockFetcher {
    pages: Arc<Mutex<HashMap<String, Canned>>>,
    calls: Arc<Mutex<Vec<(String, String)>>>,
    cancel_on: Arc<Mutex<Option<(String, CancellationToken)>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, url: &str, body: &str) -> Self {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), Canned::Body(body.to_string()));
        self
    }

    pub fn with_http_error(self, url: &str, message: &str) -> Self {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), Canned::Http(message.to_string()));
        self
    }

    pub fn with_network_error(self, url: &str, message: &str) -> Self {
        self.pages
            .lock()
            .unwrap()
            .insert(url.to_string(), Canned::Network(message.to_string()));
        self
    }

    /// Cancel `token` when `url` is fetched. The fetch itself still succeeds.
    pub fn cancel_on(self, url: &str, token: CancellationToken) -> Self {
        *self.cancel_on.lock().unwrap() = Some((url.to_string(), token));
        self
    }

    /// Every `(url, user_agent)` fetched, in order.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn requested(&self, url: &str) -> bool {
        self.calls.lock().unwrap().iter().any(|(u, _)| u == url)
    }
}

impl Fetcher for MockFetcher {
    async fn fetch(&self, url: &str, user_agent: &str) -> Result<String, AppError> {
        self.calls
            .lock()
            .unwrap()
            .push((url.to_string(), user_agent.to_string()));
        if let Some((trigger, token)) = self.cancel_on.lock().unwrap().as_ref() {
            if trigger == url {
                token.cancel();
            }
        }
        match self.pages.lock().unwrap().get(url).cloned() {
            Some(Canned::Body(body)) => Ok(body),
            Some(Canned::Http(msg)) => Err(AppError::HttpError(msg)),
            Some(Canned::Network(msg)) => Err(AppError::NetworkError(msg)),
            None => Err(AppError::HttpError(format!("HTTP 404 for {url}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// MockCleaner
// ---------------------------------------------------------------------------

/// Mock cleaner that strips tags naively.
#[derive(Clone, Default)]
pub struct MockCleaner;

impl Cleaner for MockCleaner {
    fn clean(&self, html: &str) -> Result<String, AppError> {
        let mut out = String::with_capacity(html.len());
        let mut in_tag = false;
        for c in html.chars() {
            match c {
                '<' => in_tag = true,
                '>' => in_tag = false,
                _ if !in_tag => out.push(c),
                _ => {}
            }
        }
        Ok(out.trim().to_string())
    }
}

// ---------------------------------------------------------------------------
// MockScraper
// ---------------------------------------------------------------------------

/// Mock scraper returning a fixed lead list or a fixed error.
#[derive(Clone)]
pub struct MockScraper {
    source: LeadSource,
    outcome: Result<Vec<LeadRecord>, String>,
    runs: Arc<Mutex<usize>>,
    cancel_after_run: Option<CancellationToken>,
}

impl MockScraper {
    pub fn new(source: LeadSource, leads: Vec<LeadRecord>) -> Self {
        Self {
            source,
            outcome: Ok(leads),
            runs: Arc::new(Mutex::new(0)),
            cancel_after_run: None,
        }
    }

    /// Every run fails with a network error.
    pub fn failing(source: LeadSource, message: &str) -> Self {
        Self {
            source,
            outcome: Err(message.to_string()),
            runs: Arc::new(Mutex::new(0)),
            cancel_after_run: None,
        }
    }

    /// Cancel `token` once a run completes, simulating an interrupt mid-pipeline.
    pub fn cancel_after_run(mut self, token: CancellationToken) -> Self {
        self.cancel_after_run = Some(token);
        self
    }

    pub fn runs(&self) -> usize {
        *self.runs.lock().unwrap()
    }
}

#[async_trait]
impl Scraper for MockScraper {
    fn source(&self) -> LeadSource {
        self.source
    }

    async fn run(
        &mut self,
        _max_pages: usize,
        max_listings: usize,
        _cancel: &CancellationToken,
    ) -> Result<ScrapeReport, AppError> {
        *self.runs.lock().unwrap() += 1;
        if let Some(token) = &self.cancel_after_run {
            token.cancel();
        }
        match &self.outcome {
            Ok(leads) => Ok(ScrapeReport {
                leads: leads.iter().take(max_listings).cloned().collect(),
                ..Default::default()
            }),
            Err(msg) => Err(AppError::NetworkError(msg.clone())),
        }
    }

    fn normalize(&self, raw: &RawListing) -> Result<LeadRecord, AppError> {
        normalize_listing(self.source, raw, &NormalizeContext::default())
    }
}

// ---------------------------------------------------------------------------
// MockFilter
// ---------------------------------------------------------------------------

/// Mock filter dropping a configured set of source ids.
#[derive(Clone, Default)]
pub struct MockFilter {
    drop: Arc<Mutex<HashSet<String>>>,
    calls: Arc<Mutex<usize>>,
}

impl MockFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drop_ids<'a>(&self, ids: impl IntoIterator<Item = &'a str>) {
        self.drop
            .lock()
            .unwrap()
            .extend(ids.into_iter().map(String::from));
    }

    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl LeadFilter for MockFilter {
    fn filter(&self, leads: Vec<LeadRecord>, _options: FilterOptions) -> Vec<LeadRecord> {
        *self.calls.lock().unwrap() += 1;
        let drop = self.drop.lock().unwrap();
        leads
            .into_iter()
            .filter(|l| !drop.contains(l.source_id()))
            .collect()
    }
}

// ---------------------------------------------------------------------------
// MockEnricher
// ---------------------------------------------------------------------------

/// Mock enricher: every lead is non-owner-occupied with 40% equity, except
/// configured ids which fail.
#[derive(Clone, Default)]
pub struct MockEnricher {
    failing: Arc<Mutex<HashSet<String>>>,
}

impl MockEnricher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, source_id: &str) {
        self.failing.lock().unwrap().insert(source_id.to_string());
    }

    fn check(&self, lead: &LeadRecord) -> Result<(), AppError> {
        if self.failing.lock().unwrap().contains(lead.source_id()) {
            return Err(AppError::CollaboratorError(format!("no records for {}", lead.key())));
        }
        Ok(())
    }
}

impl LeadEnricher for MockEnricher {
    fn owner_occupancy(&self, lead: &LeadRecord) -> Result<Option<bool>, AppError> {
        self.check(lead)?;
        Ok(Some(false))
    }

    fn equity_estimate(&self, lead: &LeadRecord) -> Result<EquityEstimate, AppError> {
        self.check(lead)?;
        Ok(EquityEstimate {
            estimated_value: lead.price.map(|p| p * 1.1),
            equity_percentage: Some(40.0),
        })
    }
}

// ---------------------------------------------------------------------------
// MockScorer
// ---------------------------------------------------------------------------

/// Mock scorer with a default score and per-id overrides.
#[derive(Clone)]
pub struct MockScorer {
    default: f64,
    overrides: Arc<Mutex<HashMap<String, f64>>>,
}

impl MockScorer {
    pub fn new(default: f64) -> Self {
        Self {
            default,
            overrides: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn set(&self, source_id: &str, score: f64) {
        self.overrides
            .lock()
            .unwrap()
            .insert(source_id.to_string(), score);
    }
}

impl LeadScorer for MockScorer {
    fn score(&self, lead: &LeadRecord) -> Result<f64, AppError> {
        Ok(self
            .overrides
            .lock()
            .unwrap()
            .get(lead.source_id())
            .copied()
            .unwrap_or(self.default))
    }
}

// ---------------------------------------------------------------------------
// MockAlerter
// ---------------------------------------------------------------------------

/// Mock alerter counting leads at or above the threshold.
#[derive(Clone, Default)]
pub struct MockAlerter {
    failing: Arc<Mutex<HashSet<String>>>,
    thresholds: Arc<Mutex<Vec<f64>>>,
}

impl MockAlerter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_for(&self, source_id: &str) {
        self.failing.lock().unwrap().insert(source_id.to_string());
    }

    pub fn thresholds(&self) -> Vec<f64> {
        self.thresholds.lock().unwrap().clone()
    }
}

impl LeadAlerter for MockAlerter {
    fn process(&self, leads: &[LeadRecord], threshold: f64) -> AlertOutcome {
        self.thresholds.lock().unwrap().push(threshold);
        let failing = self.failing.lock().unwrap();
        let mut outcome = AlertOutcome::default();
        for lead in leads.iter().filter(|l| l.score.is_some_and(|s| s >= threshold)) {
            if failing.contains(lead.source_id()) {
                outcome.errors.push(format!("{}: delivery failed", lead.key()));
            } else {
                outcome.sent += 1;
            }
        }
        outcome
    }
}

// ---------------------------------------------------------------------------
// MockExporter
// ---------------------------------------------------------------------------

/// Mock exporter recording `(format, rows admitted, options)` per call.
#[derive(Clone, Default)]
pub struct MockExporter {
    failing: Arc<Mutex<HashSet<ExportFormat>>>,
    calls: Arc<Mutex<Vec<(ExportFormat, usize, ExportOptions)>>>,
}

impl MockExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_format(&self, format: ExportFormat) {
        self.failing.lock().unwrap().insert(format);
    }

    pub fn calls(&self) -> Vec<(ExportFormat, usize, ExportOptions)> {
        self.calls.lock().unwrap().clone()
    }
}

impl LeadExporter for MockExporter {
    fn export(
        &self,
        leads: &[LeadRecord],
        format: ExportFormat,
        options: &ExportOptions,
    ) -> Result<PathBuf, AppError> {
        let rows = leads.iter().filter(|l| options.admits(l)).count();
        self.calls.lock().unwrap().push((format, rows, *options));
        if self.failing.lock().unwrap().contains(&format) {
            return Err(AppError::ExportError(format!("{format} writer unavailable")));
        }
        Ok(PathBuf::from(format!("exports/leads.{format}")))
    }
}

// ---------------------------------------------------------------------------
// MockLeadManager
// ---------------------------------------------------------------------------

/// Mock lead manager keeping saved leads in memory.
#[derive(Clone, Default)]
pub struct MockLeadManager {
    saved: Arc<Mutex<Vec<LeadRecord>>>,
}

impl MockLeadManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved(&self) -> Vec<LeadRecord> {
        self.saved.lock().unwrap().clone()
    }
}

impl LeadManager for MockLeadManager {
    fn initialize(&self, leads: Vec<LeadRecord>) -> Vec<LeadRecord> {
        leads
    }

    fn save_all(&self, leads: &[LeadRecord]) -> Result<usize, AppError> {
        self.saved.lock().unwrap().extend(leads.iter().cloned());
        Ok(leads.len())
    }
}

// ---------------------------------------------------------------------------
// MockReportGenerator
// ---------------------------------------------------------------------------

/// Mock report generator returning `reports/<source_id>.<ext>`.
#[derive(Clone, Default)]
pub struct MockReportGenerator {
    failing: Arc<Mutex<HashSet<String>>>,
    generated: Arc<Mutex<Vec<String>>>,
}

impl MockReportGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_for(self, source_id: &str) -> Self {
        self.fail_for(source_id);
        self
    }

    pub fn fail_for(&self, source_id: &str) {
        self.failing.lock().unwrap().insert(source_id.to_string());
    }

    /// Source ids a report was requested for, in request order.
    pub fn generated(&self) -> Vec<String> {
        self.generated.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReportGenerator for MockReportGenerator {
    async fn generate(&self, lead: &LeadRecord, format: ReportFormat) -> Result<PathBuf, AppError> {
        self.generated
            .lock()
            .unwrap()
            .push(lead.source_id().to_string());
        if self.failing.lock().unwrap().contains(lead.source_id()) {
            return Err(AppError::ReportError(format!("template missing for {}", lead.key())));
        }
        Ok(PathBuf::from(format!(
            "reports/{}.{}",
            lead.source_id(),
            format.extension()
        )))
    }
}
