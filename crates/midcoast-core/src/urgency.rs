//! Additive 0-10 urgency heuristic for listings.

use std::sync::LazyLock;

use chrono::TimeDelta;
use regex::Regex;

static PRICE_IN_TITLE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\$\s?\d").unwrap());

/// Phrases that suggest a motivated seller.
pub const DEFAULT_MOTIVATION_KEYWORDS: [&str; 20] = [
    "urgent",
    "must sell",
    "need to sell",
    "quick sale",
    "motivated",
    "relocating",
    "below market",
    "reduced",
    "price drop",
    "bargain",
    "divorce",
    "estate sale",
    "inherited",
    "foreclosure",
    "cash only",
    "fixer",
    "needs work",
    "as is",
    "under market",
    "priced to sell",
];

/// Weights and caps for the urgency score.
///
/// The values reproduce the historical scoring; they have never been tuned
/// against outcomes.
#[derive(Debug, Clone)]
pub struct UrgencyPolicy {
    /// `(max_age, points)` checked in order; only the first matching bucket counts.
    pub recency_buckets: Vec<(TimeDelta, u8)>,
    pub motivation_keywords: Vec<String>,
    /// Points per matched keyword are capped at this value.
    pub keyword_cap: u8,
    pub price_in_title_points: u8,
    pub contact_points: u8,
    pub image_points: u8,
    /// Image bonus applies when the image count is strictly greater than this.
    pub image_threshold: usize,
    pub max_score: u8,
}

impl Default for UrgencyPolicy {
    fn default() -> Self {
        Self {
            recency_buckets: vec![
                (TimeDelta::days(1), 3),
                (TimeDelta::days(3), 2),
                (TimeDelta::days(7), 1),
            ],
            motivation_keywords: DEFAULT_MOTIVATION_KEYWORDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            keyword_cap: 4,
            price_in_title_points: 1,
            contact_points: 1,
            image_points: 1,
            image_threshold: 10,
            max_score: 10,
        }
    }
}

/// Observable facts about a listing that feed the urgency score.
#[derive(Debug, Clone, Copy)]
pub struct UrgencySignals<'a> {
    /// Time since the listing was posted. Negative ages count as brand new.
    pub age: TimeDelta,
    /// Title and description combined.
    pub text: &'a str,
    pub title: &'a str,
    pub has_contact: bool,
    pub image_count: usize,
}

impl UrgencyPolicy {
    pub fn score(&self, signals: &UrgencySignals<'_>) -> u8 {
        let mut score: u32 = 0;

        if let Some((_, points)) = self
            .recency_buckets
            .iter()
            .find(|(max_age, _)| signals.age < *max_age)
        {
            score += u32::from(*points);
        }

        score += u32::from(self.keyword_points(signals.text));

        if PRICE_IN_TITLE.is_match(signals.title) {
            score += u32::from(self.price_in_title_points);
        }
        if signals.has_contact {
            score += u32::from(self.contact_points);
        }
        if signals.image_count > self.image_threshold {
            score += u32::from(self.image_points);
        }

        score.min(u32::from(self.max_score)) as u8
    }

    /// Number of distinct motivation keywords present, capped.
    pub fn keyword_points(&self, text: &str) -> u8 {
        let lower = text.to_lowercase();
        let matched = self
            .motivation_keywords
            .iter()
            .filter(|kw| lower.contains(&kw.to_lowercase()))
            .count();
        matched.min(usize::from(self.keyword_cap)) as u8
    }
}
