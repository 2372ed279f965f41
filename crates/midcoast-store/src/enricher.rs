use std::collections::BTreeMap;

use midcoast_core::error::AppError;
use midcoast_core::models::{LeadRecord, LeadSource};
use midcoast_core::traits::{EquityEstimate, LeadEnricher};

const NON_OCCUPANT_PHRASES: &[&str] = &[
    "vacant",
    "estate sale",
    "tenant occupied",
    "tenants in place",
    "investment property",
    "currently rented",
    "unoccupied",
];

const OCCUPANT_PHRASES: &[&str] = &[
    "owner occupied",
    "owner-occupied",
    "our home",
    "we have loved",
    "we are relocating",
    "moving out of state",
];

/// Text heuristics for occupancy and a square-footage valuation for equity.
///
/// Value is `square_feet × price_per_sqft` for the lead's city (falling back
/// to `default_price_per_sqft`), or the asking price when the size is
/// unknown. Equity assumes an outstanding balance of `loan_to_value` of
/// that value; court notices use `distressed_loan_to_value`.
#[derive(Debug, Clone)]
pub struct HeuristicEnricher {
    price_per_sqft: BTreeMap<String, f64>,
    default_price_per_sqft: f64,
    loan_to_value: f64,
    distressed_loan_to_value: f64,
}

impl Default for HeuristicEnricher {
    fn default() -> Self {
        let price_per_sqft = [
            ("portland", 310.0),
            ("south portland", 280.0),
            ("falmouth", 330.0),
            ("yarmouth", 320.0),
            ("brunswick", 240.0),
            ("bath", 210.0),
            ("topsham", 225.0),
            ("camden", 300.0),
            ("rockland", 220.0),
        ]
        .into_iter()
        .map(|(city, ppsf)| (city.to_string(), ppsf))
        .collect();

        Self {
            price_per_sqft,
            default_price_per_sqft: 200.0,
            loan_to_value: 0.5,
            distressed_loan_to_value: 0.9,
        }
    }
}

impl HeuristicEnricher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_price_per_sqft(mut self, city: &str, price: f64) -> Self {
        self.price_per_sqft.insert(city.to_lowercase(), price);
        self
    }

    fn estimated_value(&self, lead: &LeadRecord) -> Option<f64> {
        let from_size = lead.square_feet.map(|sqft| {
            let ppsf = lead
                .city
                .as_deref()
                .and_then(|c| self.price_per_sqft.get(&c.to_lowercase()))
                .copied()
                .unwrap_or(self.default_price_per_sqft);
            f64::from(sqft) * ppsf
        });
        from_size.or(lead.price).filter(|v| *v > 0.0)
    }
}

impl LeadEnricher for HeuristicEnricher {
    fn owner_occupancy(&self, lead: &LeadRecord) -> Result<Option<bool>, AppError> {
        let text = match &lead.notice_text {
            Some(notice) => format!("{}\n{notice}", lead.description),
            None => lead.description.clone(),
        }
        .to_lowercase();

        if NON_OCCUPANT_PHRASES.iter().any(|p| text.contains(p)) {
            return Ok(Some(false));
        }
        if OCCUPANT_PHRASES.iter().any(|p| text.contains(p)) {
            return Ok(Some(true));
        }
        Ok(None)
    }

    fn equity_estimate(&self, lead: &LeadRecord) -> Result<EquityEstimate, AppError> {
        let value = self.estimated_value(lead).ok_or_else(|| {
            AppError::CollaboratorError(format!("no size or price to value {}", lead.key()))
        })?;
        let ltv = match lead.source() {
            LeadSource::PublicRecords => self.distressed_loan_to_value,
            _ => self.loan_to_value,
        };
        Ok(EquityEstimate {
            estimated_value: Some(value.round()),
            equity_percentage: Some(((1.0 - ltv) * 100.0).clamp(0.0, 100.0)),
        })
    }
}
