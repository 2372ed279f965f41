use std::collections::HashSet;

use midcoast_core::models::{LeadRecord, LeadSource, compute_hash};
use midcoast_core::traits::{FilterOptions, LeadFilter};

const RENTAL_PHRASES: &[&str] = &[
    "for rent",
    "for lease",
    "rental",
    "per month",
    "/mo",
    "month-to-month",
    "security deposit",
    "tenant wanted",
    "sublet",
];

const SPAM_PHRASES: &[&str] = &[
    "we buy houses",
    "cash for houses",
    "sell your house fast",
    "any condition, any price",
    "rent to own",
    "work from home",
    "click here",
];

/// Keyword-based rental and spam filter.
///
/// A listing priced below `max_monthly_rent` is treated as a rental even
/// without rental wording. With the spam filter on, a listing whose title and
/// description repeat an earlier one in the same batch is dropped as a repost.
#[derive(Debug, Clone)]
pub struct KeywordLeadFilter {
    rental_phrases: Vec<String>,
    spam_phrases: Vec<String>,
    max_monthly_rent: f64,
}

impl Default for KeywordLeadFilter {
    fn default() -> Self {
        Self {
            rental_phrases: RENTAL_PHRASES.iter().map(|s| s.to_string()).collect(),
            spam_phrases: SPAM_PHRASES.iter().map(|s| s.to_string()).collect(),
            max_monthly_rent: 10_000.0,
        }
    }
}

impl KeywordLeadFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_rental_phrases(mut self, phrases: Vec<String>) -> Self {
        self.rental_phrases = phrases.into_iter().map(|p| p.to_lowercase()).collect();
        self
    }

    pub fn with_spam_phrases(mut self, phrases: Vec<String>) -> Self {
        self.spam_phrases = phrases.into_iter().map(|p| p.to_lowercase()).collect();
        self
    }

    fn is_rental(&self, lead: &LeadRecord, text: &str) -> bool {
        // Court notices carry no price and never describe rentals.
        if lead.source() == LeadSource::PublicRecords {
            return false;
        }
        self.rental_phrases.iter().any(|p| text.contains(p.as_str()))
            || lead.price.is_some_and(|p| p < self.max_monthly_rent)
    }

    fn is_spam(&self, text: &str) -> bool {
        self.spam_phrases.iter().any(|p| text.contains(p.as_str()))
    }
}

impl LeadFilter for KeywordLeadFilter {
    fn filter(&self, leads: Vec<LeadRecord>, options: FilterOptions) -> Vec<LeadRecord> {
        let mut seen = HashSet::new();
        let before = leads.len();

        let kept: Vec<LeadRecord> = leads
            .into_iter()
            .filter(|lead| {
                let title = lead
                    .raw_source_payload
                    .get("title")
                    .and_then(|t| t.as_str())
                    .unwrap_or_default();
                let text = format!("{title}\n{}", lead.description).to_lowercase();

                if options.enable_rental_filter && self.is_rental(lead, &text) {
                    tracing::debug!(lead = %lead.key(), "Dropping rental listing");
                    return false;
                }
                if options.enable_spam_filter {
                    if self.is_spam(&text) {
                        tracing::debug!(lead = %lead.key(), "Dropping spam listing");
                        return false;
                    }
                    if !lead.description.trim().is_empty() && !seen.insert(compute_hash(&text)) {
                        tracing::debug!(lead = %lead.key(), "Dropping reposted listing");
                        return false;
                    }
                }
                true
            })
            .collect();

        tracing::debug!(before, after = kept.len(), "Filtered leads");
        kept
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn lead(id: &str, title: &str, description: &str, price: Option<f64>) -> LeadRecord {
        let mut lead = LeadRecord::new(LeadSource::Classifieds, id, Utc::now());
        lead.raw_source_payload.insert("title".into(), title.into());
        lead.description = description.into();
        lead.price = price;
        lead
    }

    fn batch() -> Vec<LeadRecord> {
        vec![
            lead("1", "3BR cape by owner", "Sunny cape, must sell", Some(249_000.0)),
            lead("2", "Apartment for rent", "Heat included", Some(1_450.0)),
            lead("3", "WE BUY HOUSES", "Cash in 7 days", None),
            lead("4", "3BR cape by owner", "Sunny cape, must sell", Some(249_000.0)),
            lead("5", "Camp on the lake", "Seasonal camp", Some(5_000.0)),
        ]
    }

    fn ids(leads: &[LeadRecord]) -> Vec<&str> {
        leads.iter().map(|l| l.source_id()).collect()
    }

    #[test]
    fn drops_rentals_spam_and_reposts() {
        let kept = KeywordLeadFilter::new().filter(batch(), FilterOptions::default());
        assert_eq!(ids(&kept), vec!["1"]);
    }

    #[test]
    fn rental_filter_can_be_disabled() {
        let options = FilterOptions {
            enable_rental_filter: false,
            enable_spam_filter: true,
        };
        let kept = KeywordLeadFilter::new().filter(batch(), options);
        assert_eq!(ids(&kept), vec!["1", "2", "5"]);
    }

    #[test]
    fn spam_filter_can_be_disabled() {
        let options = FilterOptions {
            enable_rental_filter: true,
            enable_spam_filter: false,
        };
        let kept = KeywordLeadFilter::new().filter(batch(), options);
        assert_eq!(ids(&kept), vec!["1", "3", "4"]);
    }

    #[test]
    fn public_records_are_never_rentals() {
        let mut notice = LeadRecord::new(LeadSource::PublicRecords, "CV-1", Utc::now());
        notice.description = "plaintiff: Coastal Savings Bank, rental property".into();
        let kept = KeywordLeadFilter::new().filter(vec![notice], FilterOptions::default());
        assert_eq!(kept.len(), 1);
    }
}
