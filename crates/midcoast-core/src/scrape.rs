//! Source scraping: the [`Scraper`] trait and the shared [`ScrapeSession`].
//!
//! A session owns the network client, the dedup ledger and the politeness
//! settings for one source. Site-specific parsing lives behind
//! [`ListingSource`], so each concrete scraper is a thin pairing of the two.
//!
//! One run walks index pages in order:
//!
//! 1. Fetch index page `n` (politeness delay before every fetch but the first)
//! 2. Stop if the page lists no items or `max_pages` is reached
//! 3. For each entry not already in the ledger, fetch and parse its detail page
//! 4. Normalize; on success record the lead and mark the item processed
//! 5. Stop once `max_listings` leads were collected
//!
//! The cancellation token is checked before every fetch and during the
//! politeness pause. A cancelled run returns the leads collected so far
//! with `interrupted` set.
//!
//! Item failures are collected into the [`ScrapeReport`]. A failure to fetch
//! or parse an index page ends the run with an error. The ledger is flushed
//! in every case.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::dedup::DedupStore;
use crate::error::AppError;
use crate::models::{LeadRecord, LeadSource};
use crate::normalize::RawListing;
use crate::politeness::PolitenessConfig;
use crate::traits::Fetcher;
use crate::util::{timestamped_file_name, write_json_atomic};

/// A scraper for one lead source.
#[async_trait]
pub trait Scraper: Send {
    fn source(&self) -> LeadSource;

    /// Scrape up to `max_pages` index pages, collecting at most `max_listings`
    /// new leads. Always flushes the dedup ledger before returning.
    async fn run(
        &mut self,
        max_pages: usize,
        max_listings: usize,
        cancel: &CancellationToken,
    ) -> Result<ScrapeReport, AppError>;

    /// Convert a raw listing into a lead. No side effects.
    fn normalize(&self, raw: &RawListing) -> Result<LeadRecord, AppError>;
}

/// One row of an index page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub item_id: String,
    pub url: String,
    pub title: String,
    pub price_text: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub location_hint: Option<String>,
}

/// Site-specific URLs and parsing.
pub trait ListingSource: Send + Sync {
    fn source(&self) -> LeadSource;

    /// URL of the zero-based index page `page`.
    fn page_url(&self, page: usize) -> String;

    fn parse_index(&self, body: &str) -> Result<Vec<IndexEntry>, AppError>;

    fn detail_url(&self, entry: &IndexEntry) -> String {
        entry.url.clone()
    }

    fn parse_detail(
        &self,
        entry: &IndexEntry,
        body: &str,
        observed_at: DateTime<Utc>,
    ) -> Result<RawListing, AppError>;

    fn normalize(&self, raw: &RawListing) -> Result<LeadRecord, AppError>;
}

/// An item that was skipped because processing it failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub item_id: String,
    pub url: String,
    pub kind: String,
    pub error: String,
}

/// Outcome of one scraper run.
#[derive(Debug, Clone, Default)]
pub struct ScrapeReport {
    pub leads: Vec<LeadRecord>,
    pub failures: Vec<ItemFailure>,
    /// Entries skipped because the ledger already had them.
    pub skipped_cached: usize,
    pub pages_fetched: usize,
    /// Per-source lead file, when an output directory is configured.
    pub lead_file: Option<PathBuf>,
    /// The run stopped early on cancellation.
    pub interrupted: bool,
}

/// Shared fetch, dedup and politeness machinery for one source.
pub struct ScrapeSession<F, S>
where
    F: Fetcher,
    S: DedupStore,
{
    fetcher: F,
    cache: S,
    politeness: PolitenessConfig,
    output_dir: Option<PathBuf>,
    fetches: usize,
}

impl<F, S> ScrapeSession<F, S>
where
    F: Fetcher,
    S: DedupStore,
{
    pub fn new(fetcher: F, cache: S, politeness: PolitenessConfig) -> Self {
        Self {
            fetcher,
            cache,
            politeness,
            output_dir: None,
            fetches: 0,
        }
    }

    /// Write `<source>_leads_<timestamp>.json` into `dir` after each run with leads.
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    pub fn cache(&self) -> &S {
        &self.cache
    }

    pub async fn run<L: ListingSource>(
        &mut self,
        site: &L,
        max_pages: usize,
        max_listings: usize,
        cancel: &CancellationToken,
    ) -> Result<ScrapeReport, AppError> {
        let source = site.source();
        let mut report = ScrapeReport::default();
        tracing::info!(%source, max_pages, max_listings, "Starting scrape");

        let crawled = self.crawl(site, max_pages, max_listings, cancel, &mut report).await;

        if let Err(e) = self.cache.flush() {
            tracing::error!(%source, error = %e, "Failed to flush dedup cache");
        }
        crawled?;

        if let Some(dir) = &self.output_dir {
            if !report.leads.is_empty() {
                report.lead_file = write_source_file(dir, source, &report.leads);
            }
        }

        tracing::info!(
            %source,
            leads = report.leads.len(),
            failures = report.failures.len(),
            skipped_cached = report.skipped_cached,
            pages = report.pages_fetched,
            interrupted = report.interrupted,
            "Scrape finished"
        );
        Ok(report)
    }

    async fn crawl<L: ListingSource>(
        &mut self,
        site: &L,
        max_pages: usize,
        max_listings: usize,
        cancel: &CancellationToken,
        report: &mut ScrapeReport,
    ) -> Result<(), AppError> {
        let source = site.source();

        for page in 0..max_pages {
            if report.leads.len() >= max_listings {
                break;
            }

            let page_url = site.page_url(page);
            let Some(body) = self.get(&page_url, cancel).await? else {
                report.interrupted = true;
                tracing::warn!(%source, page, leads = report.leads.len(), "Scrape interrupted");
                return Ok(());
            };
            report.pages_fetched += 1;

            let entries = site.parse_index(&body)?;
            if entries.is_empty() {
                tracing::info!(%source, page, "Index page empty, stopping");
                break;
            }
            tracing::debug!(%source, page, entries = entries.len(), "Parsed index page");

            for entry in entries {
                if report.leads.len() >= max_listings {
                    tracing::info!(%source, max_listings, "Reached listing limit");
                    return Ok(());
                }
                if self.cache.is_processed(&entry.item_id) {
                    report.skipped_cached += 1;
                    continue;
                }

                match self.process(site, &entry, cancel).await {
                    Ok(None) => {
                        report.interrupted = true;
                        tracing::warn!(%source, item_id = %entry.item_id, leads = report.leads.len(), "Scrape interrupted");
                        return Ok(());
                    }
                    Ok(Some(lead)) => {
                        self.cache.mark_processed(&entry.item_id, ledger_metadata(&entry));
                        report.leads.push(lead);
                    }
                    Err(e) => {
                        if e.is_item_level() {
                            tracing::warn!(%source, item_id = %entry.item_id, error = %e, "Skipping malformed listing");
                        } else {
                            tracing::error!(%source, item_id = %entry.item_id, error = %e, "Failed to process listing");
                        }
                        report.failures.push(ItemFailure {
                            item_id: entry.item_id.clone(),
                            url: entry.url.clone(),
                            kind: e.kind().to_string(),
                            error: e.to_string(),
                        });
                    }
                }
            }
        }
        Ok(())
    }

    /// `Ok(None)` when cancelled before the detail fetch started.
    async fn process<L: ListingSource>(
        &mut self,
        site: &L,
        entry: &IndexEntry,
        cancel: &CancellationToken,
    ) -> Result<Option<LeadRecord>, AppError> {
        let Some(body) = self.get(&site.detail_url(entry), cancel).await? else {
            return Ok(None);
        };
        let raw = site.parse_detail(entry, &body, Utc::now())?;
        site.normalize(&raw).map(Some)
    }

    /// Fetch after the politeness pause. `Ok(None)` if `cancel` fires first.
    async fn get(&mut self, url: &str, cancel: &CancellationToken) -> Result<Option<String>, AppError> {
        if cancel.is_cancelled() {
            return Ok(None);
        }
        if self.fetches > 0 {
            tokio::select! {
                biased;
                () = cancel.cancelled() => return Ok(None),
                () = self.politeness.pause() => {}
            }
        }
        self.fetches += 1;
        let user_agent = self.politeness.user_agent().to_string();
        tracing::debug!(%url, "Fetching");
        self.fetcher.fetch(url, &user_agent).await.map(Some)
    }
}

fn ledger_metadata(entry: &IndexEntry) -> serde_json::Map<String, serde_json::Value> {
    let mut map = serde_json::Map::new();
    map.insert("url".into(), entry.url.clone().into());
    map.insert("title".into(), entry.title.clone().into());
    map
}

fn write_source_file(dir: &Path, source: LeadSource, leads: &[LeadRecord]) -> Option<PathBuf> {
    let path = dir.join(timestamped_file_name(&format!("{source}_leads"), "json", Utc::now()));
    match write_json_atomic(&path, leads) {
        Ok(()) => {
            tracing::info!(%source, path = %path.display(), count = leads.len(), "Saved source leads");
            Some(path)
        }
        Err(e) => {
            tracing::error!(%source, path = %path.display(), error = %e, "Failed to save source leads");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::DedupCache;
    use crate::normalize::{NormalizeContext, normalize_listing};
    use crate::testutil::MockFetcher;

    /// Index lines are `id|title`; detail bodies are the description.
    struct LineSite {
        ctx: NormalizeContext,
    }

    impl LineSite {
        fn new() -> Self {
            Self {
                ctx: NormalizeContext::default(),
            }
        }
    }

    impl ListingSource for LineSite {
        fn source(&self) -> LeadSource {
            LeadSource::Classifieds
        }

        fn page_url(&self, page: usize) -> String {
            format!("mock://index/{page}")
        }

        fn parse_index(&self, body: &str) -> Result<Vec<IndexEntry>, AppError> {
            body.lines()
                .filter(|l| !l.trim().is_empty())
                .map(|line| {
                    let (id, title) = line
                        .split_once('|')
                        .ok_or_else(|| AppError::ParseError(format!("bad index line: {line}")))?;
                    Ok(IndexEntry {
                        item_id: id.to_string(),
                        url: format!("mock://item/{id}"),
                        title: title.to_string(),
                        ..Default::default()
                    })
                })
                .collect()
        }

        fn parse_detail(
            &self,
            entry: &IndexEntry,
            body: &str,
            observed_at: DateTime<Utc>,
        ) -> Result<RawListing, AppError> {
            if body == "BROKEN" {
                return Err(AppError::ParseError("unreadable detail".into()));
            }
            Ok(RawListing {
                item_id: entry.item_id.clone(),
                url: entry.url.clone(),
                title: entry.title.clone(),
                observed_at,
                description: body.to_string(),
                ..Default::default()
            })
        }

        fn normalize(&self, raw: &RawListing) -> Result<LeadRecord, AppError> {
            normalize_listing(LeadSource::Classifieds, raw, &self.ctx)
        }
    }

    fn session(fetcher: MockFetcher, cache_path: &Path) -> ScrapeSession<MockFetcher, DedupCache> {
        ScrapeSession::new(fetcher, DedupCache::open(cache_path), PolitenessConfig::immediate())
    }

    fn two_page_fetcher() -> MockFetcher {
        MockFetcher::new()
            .with_page("mock://index/0", "1|Cape\n2|Ranch\n")
            .with_page("mock://index/1", "3|Colonial\n")
            .with_page("mock://index/2", "")
            .with_page("mock://item/1", "Cape house in Bath")
            .with_page("mock://item/2", "Ranch in Saco")
            .with_page("mock://item/3", "Colonial in Camden")
    }

    #[tokio::test]
    async fn stops_on_first_empty_page() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = two_page_fetcher();
        let mut s = session(fetcher.clone(), &dir.path().join("cache.json"));

        let report = s.run(&LineSite::new(), 10, 50, &CancellationToken::new()).await.unwrap();
        assert_eq!(report.leads.len(), 3);
        assert_eq!(report.pages_fetched, 3);
        assert!(!fetcher.requested("mock://index/3"));
        let ids: Vec<&str> = report.leads.iter().map(|l| l.source_id()).collect();
        assert_eq!(ids, vec!["1", "2", "3"]);
    }

    #[tokio::test]
    async fn rerun_produces_no_duplicates_and_skips_detail_fetches() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("cache.json");

        let first = session(two_page_fetcher(), &cache_path)
            .run(&LineSite::new(), 10, 50, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(first.leads.len(), 3);

        let fetcher = two_page_fetcher();
        let second = session(fetcher.clone(), &cache_path)
            .run(&LineSite::new(), 10, 50, &CancellationToken::new())
            .await
            .unwrap();
        assert!(second.leads.is_empty());
        assert_eq!(second.skipped_cached, 3);
        assert!(!fetcher.requested("mock://item/1"));
        assert!(fetcher.requested("mock://index/1"));
    }

    #[tokio::test]
    async fn item_failures_are_reported_and_not_cached() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = MockFetcher::new()
            .with_page("mock://index/0", "1|Cape\n2|Ranch\n3|Colonial\n")
            .with_page("mock://index/1", "")
            .with_page("mock://item/1", "BROKEN")
            .with_network_error("mock://item/2", "connection reset")
            .with_page("mock://item/3", "Colonial");
        let mut s = session(fetcher, &dir.path().join("cache.json"));

        let report = s.run(&LineSite::new(), 5, 50, &CancellationToken::new()).await.unwrap();
        assert_eq!(report.leads.len(), 1);
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].kind, "parse");
        assert_eq!(report.failures[1].kind, "network");
        assert!(!s.cache().is_processed("1"));
        assert!(!s.cache().is_processed("2"));
        assert!(s.cache().is_processed("3"));
    }

    #[tokio::test]
    async fn page_failure_aborts_but_flushes_cache() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("cache.json");
        let fetcher = MockFetcher::new()
            .with_page("mock://index/0", "1|Cape\n")
            .with_page("mock://item/1", "Cape")
            .with_network_error("mock://index/1", "dns failure");
        let mut s = session(fetcher, &cache_path);

        let err = s.run(&LineSite::new(), 5, 50, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, AppError::NetworkError(_)));
        assert!(DedupCache::open(&cache_path).is_processed("1"));
    }

    #[tokio::test]
    async fn stops_at_max_listings_and_max_pages() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = two_page_fetcher();
        let mut s = session(fetcher.clone(), &dir.path().join("a.json"));
        let report = s.run(&LineSite::new(), 10, 2, &CancellationToken::new()).await.unwrap();
        assert_eq!(report.leads.len(), 2);
        assert!(!fetcher.requested("mock://index/1"));

        let fetcher = two_page_fetcher();
        let mut s = session(fetcher.clone(), &dir.path().join("b.json"));
        let report = s.run(&LineSite::new(), 1, 50, &CancellationToken::new()).await.unwrap();
        assert_eq!(report.leads.len(), 2);
        assert_eq!(report.pages_fetched, 1);
    }

    #[tokio::test]
    async fn writes_per_source_lead_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("out");
        let mut s = session(two_page_fetcher(), &dir.path().join("cache.json")).with_output_dir(&out);

        let report = s.run(&LineSite::new(), 10, 50, &CancellationToken::new()).await.unwrap();
        let path = report.lead_file.unwrap();
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("classifieds_leads_"));
        let saved: Vec<LeadRecord> = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved.len(), 3);
    }

    fn twenty_row_fetcher() -> MockFetcher {
        let index: String = (1..=20).map(|i| format!("{i}|Listing {i}\n")).collect();
        let mut fetcher = MockFetcher::new()
            .with_page("mock://index/0", &index)
            .with_page("mock://index/1", "");
        for i in 1..=20 {
            fetcher = fetcher.with_page(&format!("mock://item/{i}"), &format!("House number {i}"));
        }
        fetcher
    }

    #[tokio::test]
    async fn cancellation_stops_before_the_next_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let token = CancellationToken::new();
        let fetcher = twenty_row_fetcher().cancel_on("mock://index/0", token.clone());
        let mut s = session(fetcher.clone(), &dir.path().join("cache.json"));

        let report = s.run(&LineSite::new(), 5, 50, &token).await.unwrap();
        assert!(report.interrupted);
        assert!(report.leads.is_empty());
        assert_eq!(report.pages_fetched, 1);
        assert_eq!(fetcher.calls().len(), 1);
    }

    #[tokio::test]
    async fn cancelled_run_keeps_collected_leads_and_flushes() {
        let dir = tempfile::tempdir().unwrap();
        let cache_path = dir.path().join("cache.json");
        let token = CancellationToken::new();
        let fetcher = twenty_row_fetcher().cancel_on("mock://item/2", token.clone());
        let mut s = session(fetcher.clone(), &cache_path);

        let report = s.run(&LineSite::new(), 5, 50, &token).await.unwrap();
        assert!(report.interrupted);
        let ids: Vec<&str> = report.leads.iter().map(|l| l.source_id()).collect();
        assert_eq!(ids, vec!["1", "2"]);
        assert!(!fetcher.requested("mock://item/3"));
        assert!(!fetcher.requested("mock://index/1"));

        let ledger = DedupCache::open(&cache_path);
        assert!(ledger.is_processed("2"));
        assert!(!ledger.is_processed("3"));
    }

    #[tokio::test]
    async fn cancellation_cuts_the_politeness_pause_short() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = twenty_row_fetcher();
        let mut s = ScrapeSession::new(
            fetcher.clone(),
            DedupCache::open(dir.path().join("cache.json")),
            PolitenessConfig::new(std::time::Duration::from_secs(60), std::time::Duration::from_secs(60)),
        );
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let report = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            s.run(&LineSite::new(), 5, 50, &token),
        )
        .await
        .expect("run should stop during the pause")
        .unwrap();
        assert!(report.interrupted);
        assert_eq!(fetcher.calls().len(), 1);
    }

    #[tokio::test]
    async fn every_fetch_presents_a_configured_user_agent() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = two_page_fetcher();
        let mut s = ScrapeSession::new(
            fetcher.clone(),
            DedupCache::open(dir.path().join("cache.json")),
            PolitenessConfig::immediate().with_user_agents(vec!["ua-1".into(), "ua-2".into()]),
        );
        s.run(&LineSite::new(), 10, 50, &CancellationToken::new()).await.unwrap();

        let calls = fetcher.calls();
        assert_eq!(calls.len(), 6);
        assert!(calls.iter().all(|(_, ua)| ua == "ua-1" || ua == "ua-2"));
    }
}
