use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::timeline::DateTimelineResult;

/// Site a lead was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadSource {
    /// Classified-ads site (FSBO listings).
    Classifieds,
    /// Marketplace site (FSBO listings).
    Marketplace,
    /// Public-records site (pre-foreclosure notices).
    PublicRecords,
}

impl LeadSource {
    pub const ALL: [LeadSource; 3] = [
        LeadSource::Classifieds,
        LeadSource::Marketplace,
        LeadSource::PublicRecords,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LeadSource::Classifieds => "classifieds",
            LeadSource::Marketplace => "marketplace",
            LeadSource::PublicRecords => "public_records",
        }
    }
}

impl fmt::Display for LeadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LeadSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "classifieds" => Ok(LeadSource::Classifieds),
            "marketplace" => Ok(LeadSource::Marketplace),
            "public_records" => Ok(LeadSource::PublicRecords),
            _ => Err(format!("Unknown lead source: {}", s)),
        }
    }
}

/// Lead-management status. Only the lead manager moves a lead between states.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadStatus {
    #[default]
    New,
    Reviewed,
    Contacted,
    Negotiating,
    UnderContract,
    Closed,
    Archived,
}

impl LeadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LeadStatus::New => "new",
            LeadStatus::Reviewed => "reviewed",
            LeadStatus::Contacted => "contacted",
            LeadStatus::Negotiating => "negotiating",
            LeadStatus::UnderContract => "under_contract",
            LeadStatus::Closed => "closed",
            LeadStatus::Archived => "archived",
        }
    }
}

impl fmt::Display for LeadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for LeadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "new" => Ok(LeadStatus::New),
            "reviewed" => Ok(LeadStatus::Reviewed),
            "contacted" => Ok(LeadStatus::Contacted),
            "negotiating" => Ok(LeadStatus::Negotiating),
            "under_contract" => Ok(LeadStatus::UnderContract),
            "closed" => Ok(LeadStatus::Closed),
            "archived" => Ok(LeadStatus::Archived),
            _ => Err(format!("Unknown lead status: {}", s)),
        }
    }
}

/// One observed listing or notice, normalized across sources.
///
/// `(source, source_id)` identifies the lead globally and cannot change after
/// construction; both are private and exposed through accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadRecord {
    source: LeadSource,
    source_id: String,

    pub address: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,

    pub price: Option<f64>,
    pub listing_date: DateTime<Utc>,

    pub bedrooms: Option<u32>,
    pub bathrooms: Option<f64>,
    pub square_feet: Option<u32>,
    pub lot_size_acres: Option<f64>,
    pub year_built: Option<i32>,
    pub property_type: Option<String>,

    pub description: String,
    pub images: Vec<String>,
    pub contact_info: BTreeMap<String, String>,

    /// 0-10 heuristic, see [`crate::urgency::UrgencyPolicy`].
    pub urgency: u8,
    pub status: LeadStatus,

    /// Opaque payload kept for traceability back to the source page.
    pub raw_source_payload: serde_json::Map<String, serde_json::Value>,

    /// Full text of the legal notice, for public-records leads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice_text: Option<String>,

    // Fields added by downstream collaborators.
    #[serde(default)]
    pub owner_occupied: Option<bool>,
    #[serde(default)]
    pub estimated_value: Option<f64>,
    #[serde(default)]
    pub equity_percentage: Option<f64>,
    /// 0-100 score assigned by the scoring collaborator.
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub timeline: Option<DateTimelineResult>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LeadRecord {
    pub fn new(
        source: LeadSource,
        source_id: impl Into<String>,
        listing_date: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            source,
            source_id: source_id.into(),
            address: None,
            city: None,
            state: None,
            zip_code: None,
            price: None,
            listing_date,
            bedrooms: None,
            bathrooms: None,
            square_feet: None,
            lot_size_acres: None,
            year_built: None,
            property_type: None,
            description: String::new(),
            images: Vec::new(),
            contact_info: BTreeMap::new(),
            urgency: 0,
            status: LeadStatus::New,
            raw_source_payload: serde_json::Map::new(),
            notice_text: None,
            owner_occupied: None,
            estimated_value: None,
            equity_percentage: None,
            score: None,
            timeline: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn source(&self) -> LeadSource {
        self.source
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Globally unique key, e.g. `classifieds:7712345678`.
    pub fn key(&self) -> String {
        format!("{}:{}", self.source, self.source_id)
    }
}

/// Compute a SHA-256 hash of a string, returned as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
