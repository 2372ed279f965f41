//! Craigslist-style by-owner real estate listings.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use midcoast_core::error::AppError;
use midcoast_core::extract::{self, Attributes};
use midcoast_core::models::{LeadRecord, LeadSource};
use midcoast_core::normalize::{NormalizeContext, RawListing, normalize_listing};
use midcoast_core::scrape::{IndexEntry, ListingSource};
use scraper::{Html, Selector};
use url::Url;

use super::{absolute_url, element_text};

/// Results per index page; the `s` offset advances by this much.
const PAGE_SIZE: usize = 120;

static RESULT_ROW: LazyLock<Selector> = LazyLock::new(|| Selector::parse("li.result-row").unwrap());
static RESULT_TITLE: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a.result-title").unwrap());
static RESULT_PRICE: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".result-price").unwrap());
static RESULT_DATE: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".result-date").unwrap());
static RESULT_HOOD: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".result-hood").unwrap());
static POSTING_BODY: LazyLock<Selector> = LazyLock::new(|| Selector::parse("#postingbody").unwrap());
static ATTR_SPAN: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".attrgroup span").unwrap());
static THUMB: LazyLock<Selector> = LazyLock::new(|| Selector::parse("#thumbs a[href]").unwrap());
static MAP: LazyLock<Selector> = LazyLock::new(|| Selector::parse("#map").unwrap());
static REPLY: LazyLock<Selector> = LazyLock::new(|| Selector::parse(".reply_options").unwrap());
static DATA_EMAIL: LazyLock<Selector> = LazyLock::new(|| Selector::parse("[data-email]").unwrap());

pub struct ClassifiedsSite {
    base: Url,
    search_area: Option<String>,
    params: Vec<(String, String)>,
    ctx: NormalizeContext,
}

impl ClassifiedsSite {
    /// `search_area` narrows the search to a sub-area, e.g. `brunswick`.
    pub fn new(base_url: &str, search_area: Option<&str>) -> Result<Self, AppError> {
        let base = Url::parse(base_url)
            .map_err(|e| AppError::ConfigError(format!("Invalid classifieds base URL '{base_url}': {e}")))?;
        Ok(Self {
            base,
            search_area: search_area
                .map(|a| a.trim().to_lowercase())
                .filter(|a| !a.is_empty()),
            params: vec![
                (
                    "query".into(),
                    "fsbo OR \"for sale by owner\" OR \"off market\" OR \"off-market\"".into(),
                ),
                ("min_price".into(), "100000".into()),
                ("max_price".into(), "1000000".into()),
            ],
            ctx: NormalizeContext::default(),
        })
    }

    /// Replace the default search parameters.
    pub fn with_params(mut self, params: Vec<(String, String)>) -> Self {
        self.params = params;
        self
    }

    pub fn with_context(mut self, ctx: NormalizeContext) -> Self {
        self.ctx = ctx;
        self
    }

    fn search_url(&self) -> Url {
        let path = match &self.search_area {
            Some(area) => format!("search/{area}/rea"),
            None => "search/rea".to_string(),
        };
        let mut url = self.base.join(&path).unwrap_or_else(|_| self.base.clone());
        if !self.params.is_empty() {
            url.query_pairs_mut().extend_pairs(&self.params);
        }
        url
    }
}

impl ListingSource for ClassifiedsSite {
    fn source(&self) -> LeadSource {
        LeadSource::Classifieds
    }

    fn page_url(&self, page: usize) -> String {
        let mut url = self.search_url();
        if page > 0 {
            url.query_pairs_mut()
                .append_pair("s", &(page * PAGE_SIZE).to_string());
        }
        url.into()
    }

    fn parse_index(&self, body: &str) -> Result<Vec<IndexEntry>, AppError> {
        let document = Html::parse_document(body);
        let mut entries = Vec::new();

        for row in document.select(&RESULT_ROW) {
            let Some(item_id) = row.value().attr("data-pid").map(str::trim).filter(|id| !id.is_empty()) else {
                continue;
            };
            let Some(link) = row.select(&RESULT_TITLE).next() else {
                continue;
            };
            let Some(href) = link.value().attr("href") else {
                continue;
            };

            entries.push(IndexEntry {
                item_id: item_id.to_string(),
                url: absolute_url(&self.base, href),
                title: element_text(link),
                price_text: row.select(&RESULT_PRICE).next().map(element_text),
                posted_at: row
                    .select(&RESULT_DATE)
                    .next()
                    .and_then(|d| d.value().attr("datetime"))
                    .and_then(parse_posted_at),
                location_hint: row
                    .select(&RESULT_HOOD)
                    .next()
                    .map(|h| element_text(h).trim_matches(|c| c == '(' || c == ')').trim().to_string()),
            });
        }
        Ok(entries)
    }

    fn parse_detail(
        &self,
        entry: &IndexEntry,
        body: &str,
        observed_at: DateTime<Utc>,
    ) -> Result<RawListing, AppError> {
        let document = Html::parse_document(body);

        let description = document
            .select(&POSTING_BODY)
            .next()
            .map(element_text)
            .ok_or_else(|| AppError::ParseError(format!("listing {} has no posting body", entry.item_id)))?;
        let description = description
            .strip_prefix("QR Code Link to This Post")
            .unwrap_or(&description)
            .trim()
            .to_string();

        let mut attributes = Attributes::new();
        for span in document.select(&ATTR_SPAN) {
            extract::parse_attribute_token(&element_text(span), &mut attributes);
        }

        let images = document
            .select(&THUMB)
            .filter_map(|a| a.value().attr("href"))
            .map(|href| absolute_url(&self.base, href))
            .collect();

        let coordinates = document.select(&MAP).next().and_then(|map| {
            let lat = map.value().attr("data-latitude")?.parse().ok()?;
            let lon = map.value().attr("data-longitude")?.parse().ok()?;
            Some((lat, lon))
        });

        let mut contact_info = std::collections::BTreeMap::new();
        if let Some(reply) = document.select(&REPLY).next() {
            if let Some(phone) = extract::find_phone(&element_text(reply)) {
                contact_info.insert("phone".to_string(), phone);
            }
            if let Some(email) = reply
                .select(&DATA_EMAIL)
                .next()
                .and_then(|e| e.value().attr("data-email"))
            {
                contact_info.insert("email".to_string(), email.to_string());
            }
        }

        Ok(RawListing {
            item_id: entry.item_id.clone(),
            url: entry.url.clone(),
            title: entry.title.clone(),
            price_text: entry.price_text.clone(),
            posted_at: entry.posted_at,
            observed_at,
            location_hint: entry.location_hint.clone(),
            description,
            attributes,
            images,
            contact_info,
            coordinates,
            document_text: None,
        })
    }

    fn normalize(&self, raw: &RawListing) -> Result<LeadRecord, AppError> {
        normalize_listing(LeadSource::Classifieds, raw, &self.ctx)
    }
}

/// Index timestamps look like `2026-03-01 09:15`; RFC 3339 is also accepted.
fn parse_posted_at(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M")
                .ok()
                .map(|naive| naive.and_utc())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sources::{ClassifiedsScraper, ScraperConfig};
    use chrono::TimeZone;
    use midcoast_core::pipeline::{
        Collaborators, PipelineConfig, PipelineOrchestrator, RunOptions, TracingPipelineReporter,
    };
    use midcoast_core::politeness::PolitenessConfig;
    use midcoast_core::scrape::Scraper;
    use midcoast_core::testutil::{
        MockAlerter, MockEnricher, MockExporter, MockFilter, MockLeadManager, MockReportGenerator,
        MockScorer,
    };
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;
    use midcoast_core::testutil::MockFetcher;

    const INDEX: &str = r#"
        <ul class="rows">
          <li class="result-row" data-pid="7712345678">
            <time class="result-date" datetime="2026-03-01 09:15">Mar 1</time>
            <a href="/reo/d/brunswick-cape/7712345678.html" class="result-title">Motivated seller! 3BR cape</a>
            <span class="result-price">$249,900</span>
            <span class="result-hood"> (Brunswick)</span>
          </li>
          <li class="result-row" data-pid="7712340000">
            <a href="https://maine.craigslist.org/reo/d/bath-ranch/7712340000.html" class="result-title">Ranch by owner</a>
          </li>
          <li class="result-row">
            <a href="/reo/d/no-id.html" class="result-title">Missing id</a>
          </li>
        </ul>"#;

    const DETAIL: &str = r#"
        <section id="postingbody">QR Code Link to This Post
          Charming cape at 14 Pleasant Street. Must sell, relocating.
        </section>
        <div class="attrgroup"><span><b>3BR</b> / <b>2Ba</b></span><span>1650ft2</span></div>
        <div class="attrgroup"><span>housing type: house</span></div>
        <div id="thumbs"><a href="https://images.example.org/a.jpg"></a><a href="https://images.example.org/b.jpg"></a></div>
        <div id="map" data-latitude="43.9141" data-longitude="-69.9654"></div>
        <div class="reply_options">call 207-555-0142 <span data-email="seller@example.org"></span></div>
    "#;

    fn site() -> ClassifiedsSite {
        ClassifiedsSite::new("https://maine.craigslist.org", Some("Brunswick")).unwrap()
    }

    #[test]
    fn page_urls_carry_area_params_and_offset() {
        let site = site().with_params(vec![("postal".into(), "04011".into())]);
        assert_eq!(
            site.page_url(0),
            "https://maine.craigslist.org/search/brunswick/rea?postal=04011"
        );
        assert_eq!(
            site.page_url(2),
            "https://maine.craigslist.org/search/brunswick/rea?postal=04011&s=240"
        );
    }

    #[test]
    fn parses_index_rows_and_skips_rows_without_id() {
        let entries = site().parse_index(INDEX).unwrap();
        assert_eq!(entries.len(), 2);

        let first = &entries[0];
        assert_eq!(first.item_id, "7712345678");
        assert_eq!(
            first.url,
            "https://maine.craigslist.org/reo/d/brunswick-cape/7712345678.html"
        );
        assert_eq!(first.title, "Motivated seller! 3BR cape");
        assert_eq!(first.price_text.as_deref(), Some("$249,900"));
        assert_eq!(first.location_hint.as_deref(), Some("Brunswick"));
        assert_eq!(
            first.posted_at,
            Some(Utc.with_ymd_and_hms(2026, 3, 1, 9, 15, 0).unwrap())
        );
        assert_eq!(entries[1].posted_at, None);
    }

    #[test]
    fn empty_page_has_no_entries() {
        assert!(site().parse_index("<html><body>No results</body></html>").unwrap().is_empty());
    }

    #[test]
    fn parses_detail_page() {
        let site = site();
        let entry = site.parse_index(INDEX).unwrap().remove(0);
        let observed = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let raw = site.parse_detail(&entry, DETAIL, observed).unwrap();

        assert!(raw.description.starts_with("Charming cape"));
        assert_eq!(raw.attributes.get("bedrooms").map(String::as_str), Some("3"));
        assert_eq!(raw.attributes.get("housing type").map(String::as_str), Some("house"));
        assert_eq!(raw.images.len(), 2);
        assert_eq!(raw.coordinates, Some((43.9141, -69.9654)));
        assert_eq!(raw.contact_info.get("phone").map(String::as_str), Some("207-555-0142"));
        assert_eq!(
            raw.contact_info.get("email").map(String::as_str),
            Some("seller@example.org")
        );

        let lead = site.normalize(&raw).unwrap();
        assert_eq!(lead.bedrooms, Some(3));
        assert_eq!(lead.bathrooms, Some(2.0));
        assert_eq!(lead.square_feet, Some(1650));
        assert_eq!(lead.city.as_deref(), Some("Brunswick"));
        assert_eq!(lead.property_type.as_deref(), Some("house"));
    }

    #[test]
    fn detail_without_body_is_an_item_error() {
        let site = site();
        let entry = site.parse_index(INDEX).unwrap().remove(0);
        let err = site.parse_detail(&entry, "<html></html>", Utc::now()).unwrap_err();
        assert!(err.is_item_level());
    }

    #[tokio::test]
    async fn scraper_runs_end_to_end_against_fixtures() {
        let dir = tempfile::tempdir().unwrap();
        let site = site().with_params(Vec::new());
        let fetcher = MockFetcher::new()
            .with_page(&site.page_url(0), INDEX)
            .with_page(&site.page_url(1), "<ul class=\"rows\"></ul>")
            .with_page(
                "https://maine.craigslist.org/reo/d/brunswick-cape/7712345678.html",
                DETAIL,
            );
        let mut config = ScraperConfig::for_source(LeadSource::Classifieds, dir.path())
            .with_politeness(PolitenessConfig::immediate());
        config.output_dir = None;

        let mut scraper = ClassifiedsScraper::new(site, fetcher, &config);
        let report = scraper.run(5, 50, &CancellationToken::new()).await.unwrap();

        assert_eq!(scraper.source(), LeadSource::Classifieds);
        assert_eq!(report.leads.len(), 1);
        assert_eq!(report.leads[0].key(), "classifieds:7712345678");
        // The ranch detail page is not in the fixture set.
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].item_id, "7712340000");
        assert!(config.cache_path.exists());
    }

    #[tokio::test]
    async fn interrupt_during_scrape_fetches_no_more_pages() {
        let dir = tempfile::tempdir().unwrap();
        let site = site().with_params(Vec::new());
        let rows: String = (1..=20)
            .map(|i| {
                format!(
                    r#"<li class="result-row" data-pid="77000000{i:02}"><a href="/reo/d/listing/77000000{i:02}.html" class="result-title">Listing {i}</a></li>"#
                )
            })
            .collect();
        let token = CancellationToken::new();
        let index_url = site.page_url(0);
        let fetcher = MockFetcher::new()
            .with_page(&index_url, &format!("<ul class=\"rows\">{rows}</ul>"))
            .cancel_on(&index_url, token.clone());
        let mut config = ScraperConfig::for_source(LeadSource::Classifieds, dir.path())
            .with_politeness(PolitenessConfig::immediate());
        config.output_dir = None;

        let mut orchestrator = PipelineOrchestrator::new(
            PipelineConfig {
                output_dir: dir.path().join("out"),
                batch_size: 10,
                max_workers: 2,
                high_quality_threshold: 60.0,
            },
            Collaborators {
                filter: Box::new(MockFilter::new()),
                enricher: Box::new(MockEnricher::new()),
                scorer: Box::new(MockScorer::new(50.0)),
                alerter: Box::new(MockAlerter::new()),
                exporter: Box::new(MockExporter::new()),
                manager: Box::new(MockLeadManager::new()),
                reports: Arc::new(MockReportGenerator::new()),
            },
        )
        .with_scraper(Box::new(ClassifiedsScraper::new(site, fetcher.clone(), &config)));

        let result = orchestrator
            .run(
                &RunOptions {
                    sources: vec![LeadSource::Classifieds],
                    ..Default::default()
                },
                &token,
                &TracingPipelineReporter,
            )
            .await
            .unwrap();

        assert!(result.interrupted);
        assert_eq!(result.completed_items, 0);
        assert_eq!(fetcher.calls().len(), 1);
    }
}
