//! Raw scraped listings and their conversion into [`LeadRecord`]s.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::extract::{self, Attributes, Gazetteer};
use crate::models::{LeadRecord, LeadSource};
use crate::urgency::{UrgencyPolicy, UrgencySignals};

/// Everything a source parser pulled off an index row and its detail page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawListing {
    pub item_id: String,
    pub url: String,
    pub title: String,
    pub price_text: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    /// When the detail page was fetched. Stands in for "now" during
    /// normalization.
    pub observed_at: DateTime<Utc>,
    pub location_hint: Option<String>,
    pub description: String,
    pub attributes: Attributes,
    pub images: Vec<String>,
    pub contact_info: BTreeMap<String, String>,
    /// `(latitude, longitude)` from the detail page map, if any.
    pub coordinates: Option<(f64, f64)>,
    /// Legal notice text, for public-records items.
    pub document_text: Option<String>,
}

/// Settings shared by every normalization of one source.
#[derive(Debug, Clone)]
pub struct NormalizeContext {
    pub gazetteer: Gazetteer,
    /// State searched by the scraper; used when the text names none.
    pub region_state: Option<String>,
    pub urgency: UrgencyPolicy,
}

impl Default for NormalizeContext {
    fn default() -> Self {
        Self {
            gazetteer: Gazetteer::default(),
            region_state: Some("ME".to_string()),
            urgency: UrgencyPolicy::default(),
        }
    }
}

/// Build a [`LeadRecord`] from a raw listing. Pure: the clock is `raw.observed_at`.
pub fn normalize_listing(
    source: LeadSource,
    raw: &RawListing,
    ctx: &NormalizeContext,
) -> Result<LeadRecord, AppError> {
    let item_id = raw.item_id.trim();
    if item_id.is_empty() {
        return Err(AppError::ParseError(format!("listing at {} has no id", raw.url)));
    }
    if raw.title.trim().is_empty() && raw.description.trim().is_empty() && raw.document_text.is_none() {
        return Err(AppError::ParseError(format!("listing {} has no content", item_id)));
    }

    let listing_date = raw.posted_at.unwrap_or(raw.observed_at);
    let mut lead = LeadRecord::new(source, item_id, listing_date);
    lead.created_at = raw.observed_at;
    lead.updated_at = raw.observed_at;

    let text = match &raw.document_text {
        Some(doc) => format!("{}\n{}\n{}", raw.title, raw.description, doc),
        None => format!("{}\n{}", raw.title, raw.description),
    };
    let attrs = &raw.attributes;

    let address_text = match extract::attribute(attrs, &["address", "property address"]) {
        Some(addr) => format!("{addr}\n{text}"),
        None => text.clone(),
    };
    let parts = extract::extract_address(
        &address_text,
        raw.location_hint.as_deref(),
        &ctx.gazetteer,
        ctx.region_state.as_deref(),
    );
    lead.address = parts.full_address();
    lead.city = parts.city;
    lead.state = parts.state;
    lead.zip_code = parts.zip_code;

    lead.price = raw
        .price_text
        .as_deref()
        .and_then(extract::parse_price)
        .or_else(|| extract::attribute(attrs, &["price"]).and_then(extract::parse_price));

    lead.bedrooms = extract::bedrooms(attrs, &text);
    lead.bathrooms = extract::bathrooms(attrs, &text);
    lead.square_feet = extract::square_feet(attrs, &text);
    lead.lot_size_acres = extract::lot_size_acres(attrs, &text);
    lead.year_built = extract::year_built(attrs, &text);
    lead.property_type = extract::property_type(attrs, &text);

    lead.description = raw.description.trim().to_string();
    lead.images = raw.images.clone();
    lead.contact_info = raw.contact_info.clone();
    if !lead.contact_info.contains_key("phone") {
        if let Some(phone) = extract::find_phone(&raw.description) {
            lead.contact_info.insert("phone".into(), phone);
        }
    }
    if !lead.contact_info.contains_key("email") {
        if let Some(email) = extract::find_email(&raw.description) {
            lead.contact_info.insert("email".into(), email);
        }
    }

    lead.urgency = ctx.urgency.score(&UrgencySignals {
        age: raw.observed_at - listing_date,
        text: &text,
        title: &raw.title,
        has_contact: !lead.contact_info.is_empty(),
        image_count: lead.images.len(),
    });

    lead.notice_text = raw.document_text.clone();
    lead.raw_source_payload = payload(raw);
    Ok(lead)
}

fn payload(raw: &RawListing) -> serde_json::Map<String, serde_json::Value> {
    let mut map = serde_json::Map::new();
    map.insert("url".into(), raw.url.clone().into());
    map.insert("title".into(), raw.title.clone().into());
    if let Some(price) = &raw.price_text {
        map.insert("price_text".into(), price.clone().into());
    }
    if let Some(hint) = &raw.location_hint {
        map.insert("location".into(), hint.clone().into());
    }
    if !raw.attributes.is_empty() {
        map.insert(
            "attributes".into(),
            serde_json::Value::Object(
                raw.attributes
                    .iter()
                    .map(|(k, v)| (k.clone(), v.clone().into()))
                    .collect(),
            ),
        );
    }
    if let Some((lat, lon)) = raw.coordinates {
        map.insert("latitude".into(), lat.into());
        map.insert("longitude".into(), lon.into());
    }
    map.insert("observed_at".into(), raw.observed_at.to_rfc3339().into());
    map
}
