//! County registry foreclosure notices.
//!
//! The index is a table of notices; each detail page carries a case
//! details list and the full notice wording, which is kept as
//! `document_text` for the date timeline stage.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDate, Utc};
use midcoast_core::error::AppError;
use midcoast_core::extract::Attributes;
use midcoast_core::models::{LeadRecord, LeadSource};
use midcoast_core::normalize::{NormalizeContext, RawListing, normalize_listing};
use midcoast_core::scrape::{IndexEntry, ListingSource};
use midcoast_core::traits::Cleaner;
use scraper::{Html, Selector};
use url::Url;

use super::{absolute_url, element_text};

static NOTICE_ROW: LazyLock<Selector> = LazyLock::new(|| Selector::parse("tr.notice").unwrap());
static NOTICE_LINK: LazyLock<Selector> = LazyLock::new(|| Selector::parse("a.notice-link").unwrap());
static FILED: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td.filed").unwrap());
static LOCATION: LazyLock<Selector> = LazyLock::new(|| Selector::parse("td.location").unwrap());
static NOTICE_BODY: LazyLock<Selector> = LazyLock::new(|| Selector::parse("div.notice-body").unwrap());
static CASE_TERMS: LazyLock<Selector> =
    LazyLock::new(|| Selector::parse("dl.case-details dt, dl.case-details dd").unwrap());

pub struct PublicRecordsSite<C: Cleaner> {
    base: Url,
    county: String,
    state: String,
    cleaner: C,
    ctx: NormalizeContext,
}

impl<C: Cleaner> PublicRecordsSite<C> {
    pub fn new(base_url: &str, county: &str, state: &str, cleaner: C) -> Result<Self, AppError> {
        let base = Url::parse(base_url)
            .map_err(|e| AppError::ConfigError(format!("Invalid public records base URL '{base_url}': {e}")))?;
        let state = state.trim().to_uppercase();
        let ctx = NormalizeContext {
            region_state: Some(state.clone()),
            ..NormalizeContext::default()
        };
        Ok(Self {
            base,
            county: county.trim().to_string(),
            state,
            cleaner,
            ctx,
        })
    }

    pub fn with_context(mut self, ctx: NormalizeContext) -> Self {
        self.ctx = ctx;
        self
    }
}

impl<C: Cleaner> ListingSource for PublicRecordsSite<C> {
    fn source(&self) -> LeadSource {
        LeadSource::PublicRecords
    }

    fn page_url(&self, page: usize) -> String {
        let mut url = self.base.join("notices").unwrap_or_else(|_| self.base.clone());
        url.query_pairs_mut()
            .append_pair("type", "foreclosure")
            .append_pair("county", &self.county)
            .append_pair("state", &self.state)
            .append_pair("page", &(page + 1).to_string());
        url.into()
    }

    fn parse_index(&self, body: &str) -> Result<Vec<IndexEntry>, AppError> {
        let document = Html::parse_document(body);
        let mut entries = Vec::new();

        for row in document.select(&NOTICE_ROW) {
            let Some(case) = row.value().attr("data-case").map(str::trim).filter(|c| !c.is_empty()) else {
                continue;
            };
            let Some(link) = row.select(&NOTICE_LINK).next() else {
                continue;
            };
            let Some(href) = link.value().attr("href") else {
                continue;
            };

            entries.push(IndexEntry {
                item_id: case.to_string(),
                url: absolute_url(&self.base, href),
                title: element_text(link),
                price_text: None,
                posted_at: row
                    .select(&FILED)
                    .next()
                    .and_then(|td| parse_filed_date(&element_text(td))),
                location_hint: row.select(&LOCATION).next().map(element_text),
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

        let notice_html = document
            .select(&NOTICE_BODY)
            .next()
            .map(|el| el.inner_html())
            .ok_or_else(|| AppError::ParseError(format!("notice {} has no body", entry.item_id)))?;
        let notice = self.cleaner.clean(&notice_html)?;

        let mut attributes = Attributes::new();
        let mut pending_term: Option<String> = None;
        for el in document.select(&CASE_TERMS) {
            let text = element_text(el);
            match el.value().name() {
                "dt" => pending_term = Some(text.trim_end_matches(':').to_lowercase()),
                _ => {
                    if let Some(term) = pending_term.take() {
                        attributes.insert(term, text);
                    }
                }
            }
        }

        let description = attributes
            .iter()
            .filter(|(k, _)| !k.contains("address"))
            .map(|(k, v)| format!("{k}: {v}"))
            .collect::<Vec<_>>()
            .join("\n");

        Ok(RawListing {
            item_id: entry.item_id.clone(),
            url: entry.url.clone(),
            title: entry.title.clone(),
            price_text: None,
            posted_at: entry.posted_at,
            observed_at,
            location_hint: entry.location_hint.clone(),
            description,
            attributes,
            images: Vec::new(),
            contact_info: Default::default(),
            coordinates: None,
            document_text: Some(notice).filter(|n| !n.is_empty()),
        })
    }

    fn normalize(&self, raw: &RawListing) -> Result<LeadRecord, AppError> {
        normalize_listing(LeadSource::PublicRecords, raw, &self.ctx)
    }
}

/// Registry filing dates are `MM/DD/YYYY`.
fn parse_filed_date(text: &str) -> Option<DateTime<Utc>> {
    NaiveDate::parse_from_str(text.trim(), "%m/%d/%Y")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cleaner::HtmdCleaner;
    use crate::sources::{PublicRecordsScraper, ScraperConfig};
    use chrono::TimeZone;
    use midcoast_core::politeness::PolitenessConfig;
    use midcoast_core::scrape::Scraper;
    use tokio_util::sync::CancellationToken;
    use midcoast_core::testutil::{MockCleaner, MockFetcher};
    use midcoast_core::timeline::DateTimelineExtractor;

    const INDEX: &str = r#"
        <table class="notices">
          <tr class="notice" data-case="CV-2026-0114">
            <td class="filed">02/20/2026</td>
            <td><a class="notice-link" href="/notices/CV-2026-0114">Notice of Foreclosure Sale</a></td>
            <td class="location">Rockland</td>
          </tr>
          <tr class="notice" data-case="">
            <td><a class="notice-link" href="/notices/blank">Blank</a></td>
          </tr>
        </table>"#;

    const DETAIL: &str = r#"
        <dl class="case-details">
          <dt>Property Address:</dt><dd>22 Harbor Road, Rockland ME 04841</dd>
          <dt>Plaintiff</dt><dd>Coastal Savings Bank</dd>
          <dt>Defendant</dt><dd>J. Doe</dd>
        </dl>
        <div class="notice-body">
          <p>By virtue of a judgment of foreclosure, the property
          will be sold at public auction on April 2, 2026 at 10:00 AM.</p>
          <script>track()</script>
        </div>"#;

    fn site() -> PublicRecordsSite<HtmdCleaner> {
        PublicRecordsSite::new("https://registry.example.gov/", "Knox", "me", HtmdCleaner::new()).unwrap()
    }

    #[test]
    fn page_url_names_county_and_state() {
        assert_eq!(
            site().page_url(1),
            "https://registry.example.gov/notices?type=foreclosure&county=Knox&state=ME&page=2"
        );
    }

    #[test]
    fn parses_notice_rows() {
        let entries = site().parse_index(INDEX).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].item_id, "CV-2026-0114");
        assert_eq!(entries[0].url, "https://registry.example.gov/notices/CV-2026-0114");
        assert_eq!(
            entries[0].posted_at,
            Some(Utc.with_ymd_and_hms(2026, 2, 20, 0, 0, 0).unwrap())
        );
        assert_eq!(entries[0].location_hint.as_deref(), Some("Rockland"));
    }

    #[test]
    fn detail_keeps_cleaned_notice_text_and_case_details() {
        let site = site();
        let entry = site.parse_index(INDEX).unwrap().remove(0);
        let observed = Utc.with_ymd_and_hms(2026, 3, 1, 0, 0, 0).unwrap();
        let raw = site.parse_detail(&entry, DETAIL, observed).unwrap();

        let notice = raw.document_text.as_deref().unwrap();
        assert!(notice.contains("public auction on April 2, 2026"));
        assert!(!notice.contains("track()"));
        assert_eq!(
            raw.attributes.get("property address").map(String::as_str),
            Some("22 Harbor Road, Rockland ME 04841")
        );
        assert!(raw.description.contains("plaintiff: Coastal Savings Bank"));

        let lead = site.normalize(&raw).unwrap();
        assert_eq!(lead.address.as_deref(), Some("22 Harbor Road, Rockland, ME, 04841"));
        assert_eq!(lead.zip_code.as_deref(), Some("04841"));

        let timeline = DateTimelineExtractor::default()
            .extract_at(lead.notice_text.as_deref().unwrap(), observed.date_naive());
        assert_eq!(timeline.auction_date, NaiveDate::from_ymd_opt(2026, 4, 2));
    }

    #[test]
    fn notice_without_body_is_an_item_error() {
        let site = site();
        let entry = site.parse_index(INDEX).unwrap().remove(0);
        assert!(site.parse_detail(&entry, "<dl></dl>", Utc::now()).unwrap_err().is_item_level());
    }

    #[tokio::test]
    async fn scraper_collects_notices() {
        let dir = tempfile::tempdir().unwrap();
        let site = PublicRecordsSite::new("https://registry.example.gov/", "Knox", "ME", MockCleaner).unwrap();
        let fetcher = MockFetcher::new()
            .with_page(&site.page_url(0), INDEX)
            .with_page(&site.page_url(1), "<table class=\"notices\"></table>")
            .with_page("https://registry.example.gov/notices/CV-2026-0114", DETAIL);
        let mut config = ScraperConfig::for_source(LeadSource::PublicRecords, dir.path())
            .with_politeness(PolitenessConfig::immediate());
        config.output_dir = None;

        let mut scraper = PublicRecordsScraper::new(site, fetcher, &config);
        let report = scraper.run(3, 10, &CancellationToken::new()).await.unwrap();
        assert_eq!(report.leads.len(), 1);
        let lead = &report.leads[0];
        assert_eq!(lead.key(), "public_records:CV-2026-0114");
        assert!(lead.notice_text.as_deref().unwrap().contains("April 2, 2026"));
    }
}
