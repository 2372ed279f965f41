//! Concrete scrapers, one [`ListingSource`] per site paired with a
//! [`ScrapeSession`] in [`SiteScraper`].

pub mod classifieds;
pub mod marketplace;
pub mod public_records;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use midcoast_core::dedup::DedupCache;
use midcoast_core::error::AppError;
use midcoast_core::models::{LeadRecord, LeadSource};
use midcoast_core::normalize::RawListing;
use midcoast_core::politeness::PolitenessConfig;
use midcoast_core::scrape::{ListingSource, ScrapeReport, ScrapeSession, Scraper};
use midcoast_core::traits::Fetcher;
use scraper::ElementRef;
use tokio_util::sync::CancellationToken;

pub use classifieds::ClassifiedsSite;
pub use marketplace::MarketplaceSite;
pub use public_records::PublicRecordsSite;

pub type ClassifiedsScraper<F> = SiteScraper<F, ClassifiedsSite>;
pub type MarketplaceScraper<F> = SiteScraper<F, MarketplaceSite>;
pub type PublicRecordsScraper<F, C> = SiteScraper<F, PublicRecordsSite<C>>;

/// Per-source scraper settings.
#[derive(Debug, Clone)]
pub struct ScraperConfig {
    pub politeness: PolitenessConfig,
    /// Dedup ledger file. One per source; never share it between scrapers.
    pub cache_path: PathBuf,
    /// Where per-run `<source>_leads_<timestamp>.json` files go.
    pub output_dir: Option<PathBuf>,
}

impl ScraperConfig {
    /// Defaults rooted at `data_dir`: `cache/<source>_cache.json` and `raw/`.
    pub fn for_source(source: LeadSource, data_dir: &Path) -> Self {
        Self {
            politeness: PolitenessConfig::default(),
            cache_path: data_dir.join("cache").join(format!("{source}_cache.json")),
            output_dir: Some(data_dir.join("raw")),
        }
    }

    pub fn with_politeness(mut self, politeness: PolitenessConfig) -> Self {
        self.politeness = politeness;
        self
    }
}

/// A site definition bound to its own fetch/dedup session.
pub struct SiteScraper<F, L>
where
    F: Fetcher,
    L: ListingSource,
{
    site: L,
    session: ScrapeSession<F, DedupCache>,
}

impl<F, L> SiteScraper<F, L>
where
    F: Fetcher,
    L: ListingSource,
{
    pub fn new(site: L, fetcher: F, config: &ScraperConfig) -> Self {
        let mut session = ScrapeSession::new(
            fetcher,
            DedupCache::open(&config.cache_path),
            config.politeness.clone(),
        );
        if let Some(dir) = &config.output_dir {
            session = session.with_output_dir(dir);
        }
        Self { site, session }
    }

    pub fn site(&self) -> &L {
        &self.site
    }
}

#[async_trait]
impl<F, L> Scraper for SiteScraper<F, L>
where
    F: Fetcher,
    L: ListingSource,
{
    fn source(&self) -> LeadSource {
        self.site.source()
    }

    async fn run(
        &mut self,
        max_pages: usize,
        max_listings: usize,
        cancel: &CancellationToken,
    ) -> Result<ScrapeReport, AppError> {
        self.session.run(&self.site, max_pages, max_listings, cancel).await
    }

    fn normalize(&self, raw: &RawListing) -> Result<LeadRecord, AppError> {
        self.site.normalize(raw)
    }
}

/// Whitespace-collapsed text content of an element.
pub(crate) fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Resolve `href` against `base`, leaving it untouched if it cannot be joined.
pub(crate) fn absolute_url(base: &url::Url, href: &str) -> String {
    base.join(href)
        .map(String::from)
        .unwrap_or_else(|_| href.to_string())
}
