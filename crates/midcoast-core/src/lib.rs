pub mod dedup;
pub mod error;
pub mod extract;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod politeness;
pub mod report;
pub mod scrape;
#[cfg(any(test, feature = "testutil"))]
pub mod testutil;
pub mod timeline;
pub mod traits;
pub mod urgency;
pub mod util;

pub use dedup::{CacheEntry, DedupCache, DedupStore};
pub use error::AppError;
pub use models::{LeadRecord, LeadSource, LeadStatus, compute_hash};
pub use normalize::{NormalizeContext, RawListing, normalize_listing};
pub use pipeline::{
    Collaborators, PipelineConfig, PipelineEvent, PipelineOrchestrator, PipelineReporter,
    PipelineRunResult, RunOptions, TracingPipelineReporter,
};
pub use politeness::PolitenessConfig;
pub use scrape::{IndexEntry, ListingSource, ScrapeReport, ScrapeSession, Scraper};
pub use timeline::{DateTimelineExtractor, DateTimelineResult, TimelineConfig, UrgencyLevel};
pub use traits::{
    Cleaner, ExportFormat, ExportOptions, Fetcher, FilterOptions, LeadAlerter, LeadEnricher,
    LeadExporter, LeadFilter, LeadManager, LeadScorer, ReportFormat, ReportGenerator,
};
pub use urgency::UrgencyPolicy;
