use midcoast_core::error::AppError;
use midcoast_core::models::LeadRecord;
use midcoast_core::timeline::DateTimelineExtractor;
use midcoast_core::traits::LeadScorer;

/// Weights for [`HeuristicScorer`]. The final score is
/// `100 × (model_weight × model + urgency_weight × urgency)` where both
/// components are in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoringWeights {
    pub model_weight: f64,
    pub urgency_weight: f64,
    /// Share of the model score taken by field completeness; the rest is equity.
    pub completeness_share: f64,
    /// Equity factor used when no estimate exists.
    pub unknown_equity: f64,
    /// Bonus for leads known not to be owner occupied.
    pub non_occupant_bonus: f64,
    /// Horizon for turning days-until-deadline into urgency.
    pub deadline_horizon_days: i64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            model_weight: 0.7,
            urgency_weight: 0.3,
            completeness_share: 0.6,
            unknown_equity: 0.5,
            non_occupant_bonus: 0.1,
            deadline_horizon_days: 180,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HeuristicScorer {
    weights: ScoringWeights,
}

impl HeuristicScorer {
    pub fn new(weights: ScoringWeights) -> Self {
        Self { weights }
    }

    /// Fraction of the key listing fields that are present.
    fn completeness(lead: &LeadRecord) -> f64 {
        let present = [
            lead.address.is_some(),
            lead.city.is_some(),
            lead.zip_code.is_some(),
            lead.price.is_some(),
            lead.bedrooms.is_some(),
            lead.bathrooms.is_some(),
            lead.square_feet.is_some(),
            lead.year_built.is_some(),
            !lead.contact_info.is_empty(),
            !lead.images.is_empty(),
        ];
        present.iter().filter(|p| **p).count() as f64 / present.len() as f64
    }

    fn model(&self, lead: &LeadRecord) -> f64 {
        let w = &self.weights;
        let equity = lead
            .equity_percentage
            .map(|e| (e / 100.0).clamp(0.0, 1.0))
            .unwrap_or(w.unknown_equity);
        let mut model = w.completeness_share * Self::completeness(lead) + (1.0 - w.completeness_share) * equity;
        if lead.owner_occupied == Some(false) {
            model += w.non_occupant_bonus;
        }
        model.clamp(0.0, 1.0)
    }

    /// Listing urgency, raised by a close auction or redemption deadline.
    fn urgency(&self, lead: &LeadRecord) -> f64 {
        let listing = f64::from(lead.urgency.min(10)) / 10.0;
        let deadline = lead.timeline.as_ref().map_or(0.0, |t| {
            let soonest = match (t.days_until_auction, t.days_until_redemption) {
                (Some(a), Some(r)) => Some(a.min(r)),
                (a, r) => a.or(r),
            };
            DateTimelineExtractor::urgency_score(soonest, self.weights.deadline_horizon_days)
        });
        listing.max(deadline)
    }
}

impl LeadScorer for HeuristicScorer {
    fn score(&self, lead: &LeadRecord) -> Result<f64, AppError> {
        let w = &self.weights;
        let score = 100.0 * (w.model_weight * self.model(lead) + w.urgency_weight * self.urgency(lead));
        if !score.is_finite() {
            return Err(AppError::CollaboratorError(format!("non-finite score for {}", lead.key())));
        }
        Ok(score.clamp(0.0, 100.0))
    }
}
