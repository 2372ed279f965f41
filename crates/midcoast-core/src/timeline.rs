//! Auction, redemption and notice dates from legal-notice text.
//!
//! Every date-like substring is collected with a ±50 character context
//! window. Each target field is then resolved by the candidate whose context
//! holds a trigger phrase closest to the date, with per-field fallbacks when
//! no trigger is nearby. Extraction never fails: an unparseable document
//! yields a result with unset fields and [`UrgencyLevel::Unknown`].

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use chrono::{NaiveDate, TimeDelta, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::util::write_json_atomic;

const MONTH_NAMES: &str =
    "January|February|March|April|May|June|July|August|September|October|November|December";

/// Date patterns always searched; configured patterns are added to these.
pub fn builtin_date_patterns() -> Vec<String> {
    vec![
        format!(r"(?:(?:{MONTH_NAMES})\s+\d{{1,2}}(?:st|nd|rd|th)?,\s+\d{{4}})"),
        r"(?:\d{1,2}/\d{1,2}/\d{2,4})".to_string(),
        r"(?:\d{1,2}-\d{1,2}-\d{2,4})".to_string(),
        r"(?:\d{1,2}\.\d{1,2}\.\d{2,4})".to_string(),
    ]
}

pub const AUCTION_TRIGGERS: [&str; 8] = [
    "public auction",
    "foreclosure auction",
    "foreclosure sale",
    "auction date",
    "sale date",
    "to be sold at",
    "will be sold at public auction",
    "will sell at public auction",
];

pub const REDEMPTION_TRIGGERS: [&str; 6] = [
    "right to redeem",
    "redemption period",
    "right of redemption",
    "may redeem until",
    "redeem the property until",
    "redeem on or before",
];

pub const NOTICE_TRIGGERS: [&str; 5] = [
    "notice of sale",
    "notice of foreclosure",
    "notice of default",
    "notice of public sale",
    "notice of trustee",
];

static MONTH_FORM: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^([a-z]+)\.?\s+(\d{1,2})(?:st|nd|rd|th)?,?\s+(\d{4})$").unwrap()
});
static NUMERIC_FORM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{1,2})([/.-])(\d{1,2})([/.-])(\d{2,4})$").unwrap());
static ISO_FORM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})$").unwrap());

// ---------------------------------------------------------------------------
// Result types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum UrgencyLevel {
    Critical,
    High,
    Medium,
    Low,
    #[default]
    Unknown,
}

impl UrgencyLevel {
    pub fn from_days(days: i64) -> Self {
        match days {
            d if d <= 7 => UrgencyLevel::Critical,
            d if d <= 14 => UrgencyLevel::High,
            d if d <= 30 => UrgencyLevel::Medium,
            _ => UrgencyLevel::Low,
        }
    }

    /// Urgency of whichever deadline is sooner; `Unknown` when neither exists.
    pub fn from_deadlines(days_until_auction: Option<i64>, days_until_redemption: Option<i64>) -> Self {
        match (days_until_auction, days_until_redemption) {
            (Some(a), Some(r)) => Self::from_days(a.min(r)),
            (Some(d), None) | (None, Some(d)) => Self::from_days(d),
            (None, None) => UrgencyLevel::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            UrgencyLevel::Critical => "Critical",
            UrgencyLevel::High => "High",
            UrgencyLevel::Medium => "Medium",
            UrgencyLevel::Low => "Low",
            UrgencyLevel::Unknown => "Unknown",
        }
    }
}

impl std::fmt::Display for UrgencyLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A date found in the document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DateMention {
    pub text: String,
    /// Character offset of the match in the document.
    pub position: usize,
    pub parsed_date: NaiveDate,
    pub context: String,
}

/// Confidence of each resolved field.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldConfidence {
    pub auction: Option<f64>,
    pub redemption: Option<f64>,
    pub notice: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DateTimelineResult {
    pub auction_date: Option<NaiveDate>,
    pub redemption_deadline: Option<NaiveDate>,
    pub notice_date: Option<NaiveDate>,
    pub all_dates: Vec<DateMention>,
    pub field_confidence: FieldConfidence,
    /// Mean confidence over the resolved fields. `None` when nothing resolved.
    pub confidence_score: Option<f64>,
    pub urgency_level: UrgencyLevel,
    pub days_until_auction: Option<i64>,
    pub days_until_redemption: Option<i64>,
}

impl DateTimelineResult {
    /// True when an auction date or redemption deadline was found.
    pub fn has_deadline(&self) -> bool {
        self.auction_date.is_some() || self.redemption_deadline.is_some()
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JurisdictionRule {
    pub redemption_period_days: i64,
    pub typical_auction_delay_days: i64,
}

impl Default for JurisdictionRule {
    /// Maine: 90-day redemption period.
    fn default() -> Self {
        Self {
            redemption_period_days: 90,
            typical_auction_delay_days: 30,
        }
    }
}

/// On-disk extractor configuration. Lists extend the built-in patterns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimelineConfig {
    pub date_patterns: Vec<String>,
    pub auction_triggers: Vec<String>,
    pub redemption_triggers: Vec<String>,
    pub notice_triggers: Vec<String>,
    pub state_specific_rules: BTreeMap<String, JurisdictionRule>,
    pub default_jurisdiction: String,
}

impl Default for TimelineConfig {
    fn default() -> Self {
        Self {
            date_patterns: Vec::new(),
            auction_triggers: Vec::new(),
            redemption_triggers: Vec::new(),
            notice_triggers: Vec::new(),
            state_specific_rules: BTreeMap::from([("ME".to_string(), JurisdictionRule::default())]),
            default_jurisdiction: "ME".to_string(),
        }
    }
}

impl TimelineConfig {
    /// Load the config at `path`.
    ///
    /// A missing file is replaced by the template and defaults are used. A
    /// malformed file is logged and defaults are used.
    pub fn load_or_init(path: &Path) -> Self {
        if !path.exists() {
            let template = Self::default();
            match write_json_atomic(path, &template) {
                Ok(()) => tracing::info!(path = %path.display(), "Created timeline config template"),
                Err(e) => tracing::error!(path = %path.display(), error = %e, "Failed to write timeline config template"),
            }
            return template;
        }

        let loaded = std::fs::read_to_string(path)
            .map_err(crate::AppError::from)
            .and_then(|text| serde_json::from_str::<Self>(&text).map_err(crate::AppError::from));
        match loaded {
            Ok(config) => config,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to load timeline config, using defaults");
                Self::default()
            }
        }
    }

    /// Rule for the default jurisdiction, falling back to the built-in rule.
    pub fn jurisdiction_rule(&self) -> JurisdictionRule {
        self.state_specific_rules
            .get(&self.default_jurisdiction)
            .copied()
            .unwrap_or_default()
    }
}

/// Weights for date confidence.
///
/// The values reproduce the historical scoring; they have never been tuned
/// against outcomes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConfidencePolicy {
    pub proximity_weight: f64,
    pub future_weight: f64,
    pub future_factor: f64,
    pub past_factor: f64,
    /// Characters on each side of a date kept as its context; also the
    /// assumed position of the date inside that context.
    pub context_radius: usize,
    /// Distance at which proximity drops to zero.
    pub distance_scale: f64,
    pub auction_fallback: f64,
    pub redemption_fallback: f64,
    pub notice_fallback: f64,
}

impl Default for ConfidencePolicy {
    fn default() -> Self {
        Self {
            proximity_weight: 0.7,
            future_weight: 0.3,
            future_factor: 1.0,
            past_factor: 0.5,
            context_radius: 50,
            distance_scale: 100.0,
            auction_fallback: 0.3,
            redemption_fallback: 0.4,
            notice_fallback: 0.3,
        }
    }
}

impl ConfidencePolicy {
    fn candidate(&self, trigger_position: usize, is_future: bool) -> f64 {
        let distance = trigger_position.abs_diff(self.context_radius) as f64;
        let proximity = (1.0 - distance / self.distance_scale).max(0.0);
        let future = if is_future { self.future_factor } else { self.past_factor };
        (self.proximity_weight * proximity + self.future_weight * future).clamp(0.0, 1.0)
    }
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct DateTimelineExtractor {
    date_regex: Regex,
    auction_triggers: Vec<Regex>,
    redemption_triggers: Vec<Regex>,
    notice_triggers: Vec<Regex>,
    rule: JurisdictionRule,
    policy: ConfidencePolicy,
}

impl Default for DateTimelineExtractor {
    fn default() -> Self {
        Self::from_config(&TimelineConfig::default())
    }
}

impl DateTimelineExtractor {
    /// Build from config. Patterns that fail to compile are logged and skipped.
    pub fn from_config(config: &TimelineConfig) -> Self {
        let mut date_patterns = builtin_date_patterns();
        date_patterns.extend(config.date_patterns.iter().filter(|p| {
            let ok = Regex::new(p).is_ok();
            if !ok {
                tracing::warn!(pattern = %p, "Skipping invalid date pattern");
            }
            ok
        }).cloned());
        let combined = format!("(?i){}", date_patterns.join("|"));
        let date_regex = Regex::new(&combined).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Combined date pattern rejected, using built-in patterns");
            Regex::new(&format!("(?i){}", builtin_date_patterns().join("|"))).unwrap()
        });

        Self {
            date_regex,
            auction_triggers: compile_triggers(&AUCTION_TRIGGERS, &config.auction_triggers),
            redemption_triggers: compile_triggers(&REDEMPTION_TRIGGERS, &config.redemption_triggers),
            notice_triggers: compile_triggers(&NOTICE_TRIGGERS, &config.notice_triggers),
            rule: config.jurisdiction_rule(),
            policy: ConfidencePolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: ConfidencePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn extract(&self, text: &str) -> DateTimelineResult {
        self.extract_at(text, Utc::now().date_naive())
    }

    /// Extract relative to `today`. Dates strictly after `today` are future.
    pub fn extract_at(&self, text: &str, today: NaiveDate) -> DateTimelineResult {
        let mut result = DateTimelineResult {
            all_dates: self.find_dates(text),
            ..Default::default()
        };
        if result.all_dates.is_empty() {
            return result;
        }
        let dates = &result.all_dates;

        let auction = self
            .best_near(dates, &self.auction_triggers, today)
            .or_else(|| {
                dates
                    .iter()
                    .filter(|d| d.parsed_date > today)
                    .min_by_key(|d| d.parsed_date)
                    .map(|d| (d.parsed_date, self.policy.auction_fallback))
            });

        let redemption = self
            .best_near(dates, &self.redemption_triggers, today)
            .or_else(|| {
                auction.map(|(date, _)| {
                    (
                        date - TimeDelta::days(self.rule.redemption_period_days),
                        self.policy.redemption_fallback,
                    )
                })
            });

        let notice = self
            .best_near(dates, &self.notice_triggers, today)
            .or_else(|| {
                dates
                    .iter()
                    .map(|d| d.parsed_date)
                    .min()
                    .map(|date| (date, self.policy.notice_fallback))
            });

        result.auction_date = auction.map(|(d, _)| d);
        result.redemption_deadline = redemption.map(|(d, _)| d);
        result.notice_date = notice.map(|(d, _)| d);
        result.field_confidence = FieldConfidence {
            auction: auction.map(|(_, c)| c),
            redemption: redemption.map(|(_, c)| c),
            notice: notice.map(|(_, c)| c),
        };

        let resolved: Vec<f64> = [auction, redemption, notice]
            .iter()
            .flatten()
            .map(|(_, c)| *c)
            .collect();
        if !resolved.is_empty() {
            result.confidence_score = Some(resolved.iter().sum::<f64>() / resolved.len() as f64);
        }

        result.days_until_auction = result.auction_date.map(|d| days_until(d, today));
        result.days_until_redemption = result.redemption_deadline.map(|d| days_until(d, today));
        result.urgency_level =
            UrgencyLevel::from_deadlines(result.days_until_auction, result.days_until_redemption);
        result
    }

    /// Extract from a text or HTML document on disk.
    ///
    /// PDF text extraction happens upstream; `.pdf` paths and unreadable
    /// files yield an empty result.
    pub fn extract_file(&self, path: &Path) -> DateTimelineResult {
        if path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"))
        {
            tracing::warn!(path = %path.display(), "PDF documents must be converted to text before extraction");
            return DateTimelineResult::default();
        }
        match std::fs::read_to_string(path) {
            Ok(text) if text.trim().is_empty() => {
                tracing::warn!(path = %path.display(), "No text content in document");
                DateTimelineResult::default()
            }
            Ok(text) => self.extract(&text),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to read document");
                DateTimelineResult::default()
            }
        }
    }

    /// Extract from every `.txt` document in `dir` and keep the most confident result.
    pub fn extract_dir(&self, dir: &Path) -> (Option<DateTimelineResult>, Vec<PathBuf>) {
        let mut files: Vec<PathBuf> = match std::fs::read_dir(dir) {
            Ok(entries) => entries
                .filter_map(|e| e.ok().map(|e| e.path()))
                .filter(|p| p.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("txt")))
                .collect(),
            Err(e) => {
                tracing::error!(dir = %dir.display(), error = %e, "Document folder not readable");
                return (None, Vec::new());
            }
        };
        files.sort();
        if files.is_empty() {
            tracing::warn!(dir = %dir.display(), "No documents found");
        }
        let best = Self::best_of(files.iter().map(|p| self.extract_file(p)));
        (best, files)
    }

    /// Result with the highest overall confidence. Ties keep the earlier one.
    pub fn best_of(results: impl IntoIterator<Item = DateTimelineResult>) -> Option<DateTimelineResult> {
        results.into_iter().fold(None, |best, candidate| match best {
            None => Some(candidate),
            Some(current) => {
                let cur = current.confidence_score.unwrap_or(-1.0);
                let new = candidate.confidence_score.unwrap_or(-1.0);
                Some(if new > cur { candidate } else { current })
            }
        })
    }

    /// 1.0 at the deadline, falling linearly to 0.0 at `max_days` out.
    pub fn urgency_score(days_until: Option<i64>, max_days: i64) -> f64 {
        match days_until {
            Some(days) if max_days > 0 => (1.0 - days as f64 / max_days as f64).clamp(0.0, 1.0),
            _ => 0.0,
        }
    }

    fn find_dates(&self, text: &str) -> Vec<DateMention> {
        let radius = self.policy.context_radius;
        self.date_regex
            .find_iter(text)
            .filter_map(|m| {
                let parsed_date = parse_date(m.as_str())?;
                Some(DateMention {
                    text: m.as_str().to_string(),
                    position: text[..m.start()].chars().count(),
                    parsed_date,
                    context: context_window(text, m.start(), m.end(), radius),
                })
            })
            .collect()
    }

    /// Highest-confidence date whose context contains one of `triggers`.
    fn best_near(
        &self,
        dates: &[DateMention],
        triggers: &[Regex],
        today: NaiveDate,
    ) -> Option<(NaiveDate, f64)> {
        let mut best: Option<(NaiveDate, f64)> = None;
        for mention in dates {
            for trigger in triggers {
                let Some(m) = trigger.find(&mention.context) else {
                    continue;
                };
                let trigger_position = mention.context[..m.start()].chars().count();
                let confidence = self
                    .policy
                    .candidate(trigger_position, mention.parsed_date > today);
                if best.is_none_or(|(_, c)| confidence > c) {
                    best = Some((mention.parsed_date, confidence));
                }
            }
        }
        best
    }
}

fn compile_triggers(builtin: &[&str], extra: &[String]) -> Vec<Regex> {
    builtin
        .iter()
        .map(|s| s.to_string())
        .chain(extra.iter().cloned())
        .filter_map(|pattern| match Regex::new(&format!("(?i){pattern}")) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!(pattern = %pattern, error = %e, "Skipping invalid trigger pattern");
                None
            }
        })
        .collect()
}

fn context_window(text: &str, start: usize, end: usize, radius: usize) -> String {
    let from = if radius == 0 {
        start
    } else {
        text[..start]
            .char_indices()
            .rev()
            .nth(radius - 1)
            .map(|(i, _)| i)
            .unwrap_or(0)
    };
    let to = text[end..]
        .char_indices()
        .nth(radius)
        .map(|(i, _)| end + i)
        .unwrap_or(text.len());
    text[from..to].to_string()
}

fn days_until(date: NaiveDate, today: NaiveDate) -> i64 {
    (date - today).num_days().max(0)
}

/// Parse a matched date string. Two-digit years 69-99 map to the 1900s,
/// 00-68 to the 2000s.
pub fn parse_date(text: &str) -> Option<NaiveDate> {
    let text = text.trim();

    if let Some(c) = MONTH_FORM.captures(text) {
        let month = month_number(&c[1])?;
        return NaiveDate::from_ymd_opt(c[3].parse().ok()?, month, c[2].parse().ok()?);
    }
    if let Some(c) = NUMERIC_FORM.captures(text) {
        if c[2] != c[4] {
            return None;
        }
        let year = expand_year(&c[5])?;
        return NaiveDate::from_ymd_opt(year, c[1].parse().ok()?, c[3].parse().ok()?);
    }
    if let Some(c) = ISO_FORM.captures(text) {
        return NaiveDate::from_ymd_opt(c[1].parse().ok()?, c[2].parse().ok()?, c[3].parse().ok()?);
    }
    None
}

fn expand_year(digits: &str) -> Option<i32> {
    let value: i32 = digits.parse().ok()?;
    match digits.len() {
        2 if value >= 69 => Some(1900 + value),
        2 => Some(2000 + value),
        4 => Some(value),
        _ => None,
    }
}

fn month_number(name: &str) -> Option<u32> {
    let lower = name.to_lowercase();
    let month = match lower.get(..3)? {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}
