use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::LeadRecord;

/// Fetches a page body from a URL, presenting the given user agent.
pub trait Fetcher: Send + Sync + Clone {
    fn fetch(
        &self,
        url: &str,
        user_agent: &str,
    ) -> impl Future<Output = Result<String, AppError>> + Send;
}

/// Converts raw HTML into readable text.
pub trait Cleaner: Send + Sync + Clone {
    fn clean(&self, html: &str) -> Result<String, AppError>;
}

// ---------------------------------------------------------------------------
// Filtering
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FilterOptions {
    pub enable_rental_filter: bool,
    pub enable_spam_filter: bool,
}

impl Default for FilterOptions {
    fn default() -> Self {
        Self {
            enable_rental_filter: true,
            enable_spam_filter: true,
        }
    }
}

/// Drops rentals, spam and other non-leads. Classification logic is opaque
/// to the pipeline.
pub trait LeadFilter: Send + Sync {
    fn filter(&self, leads: Vec<LeadRecord>, options: FilterOptions) -> Vec<LeadRecord>;
}

// ---------------------------------------------------------------------------
// Enrichment and scoring
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EquityEstimate {
    pub estimated_value: Option<f64>,
    pub equity_percentage: Option<f64>,
}

/// Adds owner-occupancy and equity fields to leads.
///
/// The per-lead methods may fail; the batch methods log each failure and
/// leave that lead's fields unset.
pub trait LeadEnricher: Send + Sync {
    fn owner_occupancy(&self, lead: &LeadRecord) -> Result<Option<bool>, AppError>;

    fn equity_estimate(&self, lead: &LeadRecord) -> Result<EquityEstimate, AppError>;

    /// Returns the number of leads that could not be enriched.
    fn add_owner_occupancy_flag(&self, leads: &mut [LeadRecord]) -> usize {
        let mut failures = 0;
        for lead in leads.iter_mut() {
            match self.owner_occupancy(lead) {
                Ok(flag) => lead.owner_occupied = flag,
                Err(e) => {
                    failures += 1;
                    tracing::warn!(lead = %lead.key(), error = %e, "Owner occupancy lookup failed");
                }
            }
        }
        failures
    }

    /// Returns the number of leads that could not be enriched.
    fn add_equity_estimate(&self, leads: &mut [LeadRecord]) -> usize {
        let mut failures = 0;
        for lead in leads.iter_mut() {
            match self.equity_estimate(lead) {
                Ok(estimate) => {
                    lead.estimated_value = estimate.estimated_value;
                    lead.equity_percentage = estimate.equity_percentage;
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(lead = %lead.key(), error = %e, "Equity estimate failed");
                }
            }
        }
        failures
    }
}

/// Assigns a 0-100 quality score to a lead.
pub trait LeadScorer: Send + Sync {
    fn score(&self, lead: &LeadRecord) -> Result<f64, AppError>;
}

// ---------------------------------------------------------------------------
// Alerting
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertOutcome {
    pub sent: usize,
    /// One message per lead whose alert failed.
    pub errors: Vec<String>,
}

/// Raises alerts for leads scoring at or above `threshold`.
pub trait LeadAlerter: Send + Sync {
    fn process(&self, leads: &[LeadRecord], threshold: f64) -> AlertOutcome;
}

// ---------------------------------------------------------------------------
// Export
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Csv,
    Excel,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Excel => "excel",
        }
    }
}

impl fmt::Display for ExportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Row filters applied by every exporter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExportOptions {
    pub min_score: f64,
    pub include_owner_occupied: bool,
    pub min_equity_percentage: Option<f64>,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            min_score: 0.0,
            include_owner_occupied: true,
            min_equity_percentage: None,
        }
    }
}

impl ExportOptions {
    /// Whether `lead` may appear in an export. Unscored leads count as 0 and
    /// leads without an equity estimate fail any equity minimum.
    pub fn admits(&self, lead: &LeadRecord) -> bool {
        if lead.score.unwrap_or(0.0) < self.min_score {
            return false;
        }
        if !self.include_owner_occupied && lead.owner_occupied == Some(true) {
            return false;
        }
        match self.min_equity_percentage {
            Some(min) => lead.equity_percentage.is_some_and(|e| e >= min),
            None => true,
        }
    }
}

pub trait LeadExporter: Send + Sync {
    fn export(
        &self,
        leads: &[LeadRecord],
        format: ExportFormat,
        options: &ExportOptions,
    ) -> Result<PathBuf, AppError>;

    fn export_csv(&self, leads: &[LeadRecord], options: &ExportOptions) -> Result<PathBuf, AppError> {
        self.export(leads, ExportFormat::Csv, options)
    }

    fn export_excel(&self, leads: &[LeadRecord], options: &ExportOptions) -> Result<PathBuf, AppError> {
        self.export(leads, ExportFormat::Excel, options)
    }
}

// ---------------------------------------------------------------------------
// Lead management
// ---------------------------------------------------------------------------

/// Owns lead status and per-lead persistence.
pub trait LeadManager: Send + Sync {
    /// Prepare freshly scraped leads for management (status, timestamps).
    fn initialize(&self, leads: Vec<LeadRecord>) -> Vec<LeadRecord>;

    /// Persist every lead individually. Returns the number saved.
    fn save_all(&self, leads: &[LeadRecord]) -> Result<usize, AppError>;
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    Pdf,
    Csv,
    #[default]
    Json,
}

impl ReportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ReportFormat::Pdf => "pdf",
            ReportFormat::Csv => "csv",
            ReportFormat::Json => "json",
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for ReportFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pdf" => Ok(ReportFormat::Pdf),
            "csv" => Ok(ReportFormat::Csv),
            "json" => Ok(ReportFormat::Json),
            _ => Err(format!("Unknown report format: {}", s)),
        }
    }
}

/// Renders one report file per lead.
#[async_trait]
pub trait ReportGenerator: Send + Sync {
    async fn generate(&self, lead: &LeadRecord, format: ReportFormat) -> Result<PathBuf, AppError>;
}
