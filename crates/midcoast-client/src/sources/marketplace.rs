//! Marketplace listings served by a paginated JSON API.
//!
//! Index: `GET {base}/api/listings?category=real-estate&page=N` returning
//! `{"listings": [...]}`. Detail: `GET {base}/api/listings/{id}`.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use midcoast_core::error::AppError;
use midcoast_core::extract::Attributes;
use midcoast_core::models::{LeadRecord, LeadSource};
use midcoast_core::normalize::{NormalizeContext, RawListing, normalize_listing};
use midcoast_core::scrape::{IndexEntry, ListingSource};
use serde::Deserialize;
use url::Url;

use super::absolute_url;

#[derive(Debug, Deserialize)]
struct IndexPage {
    #[serde(default)]
    listings: Vec<IndexItem>,
}

/// Prices arrive either as numbers or as display strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Price {
    Amount(f64),
    Display(String),
}

impl Price {
    fn into_text(self) -> String {
        match self {
            Price::Amount(amount) => format!("${amount:.0}"),
            Price::Display(text) => text,
        }
    }
}

#[derive(Debug, Deserialize)]
struct IndexItem {
    #[serde(default)]
    id: serde_json::Value,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    title: String,
    #[serde(default)]
    price: Option<Price>,
    #[serde(default)]
    created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Seller {
    phone: Option<String>,
    email: Option<String>,
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeoPoint {
    latitude: f64,
    longitude: f64,
}

#[derive(Debug, Deserialize)]
struct Detail {
    #[serde(default)]
    description: String,
    #[serde(default)]
    attributes: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    photos: Vec<String>,
    #[serde(default)]
    seller: Option<Seller>,
    #[serde(default)]
    geo: Option<GeoPoint>,
}

pub struct MarketplaceSite {
    base: Url,
    category: String,
    ctx: NormalizeContext,
}

impl MarketplaceSite {
    pub fn new(base_url: &str) -> Result<Self, AppError> {
        let base = Url::parse(base_url)
            .map_err(|e| AppError::ConfigError(format!("Invalid marketplace base URL '{base_url}': {e}")))?;
        Ok(Self {
            base,
            category: "real-estate".to_string(),
            ctx: NormalizeContext::default(),
        })
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_context(mut self, ctx: NormalizeContext) -> Self {
        self.ctx = ctx;
        self
    }

    fn api_url(&self, path: &str) -> Url {
        self.base.join(path).unwrap_or_else(|_| self.base.clone())
    }
}

impl ListingSource for MarketplaceSite {
    fn source(&self) -> LeadSource {
        LeadSource::Marketplace
    }

    fn page_url(&self, page: usize) -> String {
        let mut url = self.api_url("api/listings");
        url.query_pairs_mut()
            .append_pair("category", &self.category)
            .append_pair("page", &(page + 1).to_string());
        url.into()
    }

    fn parse_index(&self, body: &str) -> Result<Vec<IndexEntry>, AppError> {
        let page: IndexPage = serde_json::from_str(body)
            .map_err(|e| AppError::ParseError(format!("Invalid marketplace index: {e}")))?;

        Ok(page
            .listings
            .into_iter()
            .filter_map(|item| {
                let item_id = match item.id {
                    serde_json::Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
                    serde_json::Value::Number(n) => n.to_string(),
                    _ => return None,
                };
                let url = item
                    .url
                    .map(|href| absolute_url(&self.base, &href))
                    .unwrap_or_else(|| self.api_url(&format!("item/{item_id}")).into());
                Some(IndexEntry {
                    item_id,
                    url,
                    title: item.title.trim().to_string(),
                    price_text: item.price.map(Price::into_text),
                    posted_at: item.created_at,
                    location_hint: item.location,
                })
            })
            .collect())
    }

    fn detail_url(&self, entry: &IndexEntry) -> String {
        self.api_url(&format!("api/listings/{}", entry.item_id)).into()
    }

    fn parse_detail(
        &self,
        entry: &IndexEntry,
        body: &str,
        observed_at: DateTime<Utc>,
    ) -> Result<RawListing, AppError> {
        let detail: Detail = serde_json::from_str(body).map_err(|e| {
            AppError::ParseError(format!("Invalid marketplace listing {}: {e}", entry.item_id))
        })?;

        let attributes: Attributes = detail
            .attributes
            .into_iter()
            .filter_map(|(key, value)| {
                let value = match value {
                    serde_json::Value::String(s) => s,
                    serde_json::Value::Number(n) => n.to_string(),
                    serde_json::Value::Bool(b) => b.to_string(),
                    _ => return None,
                };
                Some((key.trim().to_lowercase(), value))
            })
            .collect();

        let mut contact_info = BTreeMap::new();
        let seller = detail.seller.unwrap_or_default();
        for (key, value) in [("phone", seller.phone), ("email", seller.email), ("name", seller.name)] {
            if let Some(value) = value.filter(|v| !v.trim().is_empty()) {
                contact_info.insert(key.to_string(), value);
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
            description: detail.description,
            attributes,
            images: detail.photos,
            contact_info,
            coordinates: detail.geo.map(|g| (g.latitude, g.longitude)),
            document_text: None,
        })
    }

    fn normalize(&self, raw: &RawListing) -> Result<LeadRecord, AppError> {
        normalize_listing(LeadSource::Marketplace, raw, &self.ctx)
    }
}
