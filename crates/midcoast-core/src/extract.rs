//! Field extraction with ordered fallback chains.
//!
//! Every structural field is resolved from the most reliable place first:
//! the structured attribute table, then a `label: value` pair in free text,
//! then a loose token match over the description. The first hit wins.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;

/// Structured attributes scraped from a listing, keyed by lowercase label.
pub type Attributes = BTreeMap<String, String>;

static BEDROOM_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d+)\s*(?:br|bd|beds?|bedrooms?)\b").unwrap());
static BATHROOM_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d+(?:\.\d+)?)\s*(?:ba|baths?|bathrooms?)\b").unwrap()
});
static SQFT_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(\d[\d,]*)\s*(?:sq\.?\s*ft\.?|sqft|ft2|square\s+feet)").unwrap()
});
static BUILT_IN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\bbuilt\s+in\s+(\d{4})\b").unwrap());
static YEAR: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(1[6-9]\d{2}|20\d{2})\b").unwrap());
static ACRES_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(\d+(?:\.\d+)?)\s*acres?\b").unwrap());
static STREET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b\d+\s+(?:[A-Za-z0-9]+\s+){0,4}?(?:Street|St|Avenue|Ave|Road|Rd|Drive|Dr|Lane|Ln|Way|Place|Pl|Court|Ct|Circle|Cir|Trail|Trl|Highway|Hwy|Route|Rt)\b\.?",
    )
    .unwrap()
});
static STATE_BEFORE_ZIP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z]{2})\s+\d{5}\b").unwrap());
static PHONE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(\(\d{3}\)\s*\d{3}[-.\s]?\d{4}|\b\d{3}[-.\s]?\d{3}[-.\s]?\d{4}\b)").unwrap()
});
static EMAIL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").unwrap()
});

/// Parse a price like `"$249,900"` or `"249900.00"`. Non-positive values are rejected.
pub fn parse_price(text: &str) -> Option<f64> {
    numeric_value(text).filter(|p| *p > 0.0)
}

/// Strip everything except digits and the first decimal point, then parse.
pub fn numeric_value(text: &str) -> Option<f64> {
    let cleaned: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    let mut parts = cleaned.split('.');
    let whole = parts.next().unwrap_or_default();
    let candidate = match parts.next() {
        Some(frac) => format!("{whole}.{frac}"),
        None => whole.to_string(),
    };
    candidate.trim_matches('.').parse().ok()
}

/// Find `label: value` in free text, trying each label in order.
///
/// The value runs until the end of the line or the next `,`, `;` or `|`.
/// Labels match case-insensitively and must start at a word boundary.
pub fn label_value(text: &str, labels: &[&str]) -> Option<String> {
    // ASCII lowercasing keeps byte offsets aligned with `text`.
    let lower = text.to_ascii_lowercase();
    labels.iter().find_map(|label| {
        let label = label.to_ascii_lowercase();
        lower.match_indices(label.as_str()).find_map(|(start, _)| {
            let at_boundary = lower[..start]
                .chars()
                .next_back()
                .is_none_or(|c| !c.is_alphanumeric() && c != '_');
            if !at_boundary {
                return None;
            }
            let inline_space = |c: char| c.is_whitespace() && c != '\n';
            let rest = text[start + label.len()..].trim_start_matches(inline_space);
            let value = rest.strip_prefix(':')?;
            let end = value.find(['\n', ',', ';', '|']).unwrap_or(value.len());
            Some(value[..end].trim().to_string()).filter(|v| !v.is_empty())
        })
    })
}

/// Look up the first present attribute among `keys`.
pub fn attribute<'a>(attrs: &'a Attributes, keys: &[&str]) -> Option<&'a str> {
    keys.iter()
        .find_map(|k| attrs.get(*k))
        .map(String::as_str)
        .filter(|v| !v.trim().is_empty())
}

/// Split an unlabeled attribute token such as `"3BR / 2Ba"` into attributes.
pub fn parse_attribute_token(token: &str, attrs: &mut Attributes) {
    if let Some((key, value)) = token.split_once(':') {
        let key = key.trim().to_lowercase();
        if !key.is_empty() {
            attrs.insert(key, value.trim().to_string());
        }
        return;
    }
    if let Some(c) = BEDROOM_TOKEN.captures(token) {
        attrs.insert("bedrooms".into(), c[1].to_string());
    }
    if let Some(c) = BATHROOM_TOKEN.captures(token) {
        attrs.insert("bathrooms".into(), c[1].to_string());
    }
    if let Some(c) = SQFT_TOKEN.captures(token) {
        attrs.insert("sqft".into(), c[1].to_string());
    }
}

pub fn bedrooms(attrs: &Attributes, text: &str) -> Option<u32> {
    attribute(attrs, &["bedrooms", "beds", "bedroom"])
        .and_then(leading_u32)
        .or_else(|| label_value(text, &["bedrooms", "beds", "bedroom"]).and_then(|v| leading_u32(&v)))
        .or_else(|| BEDROOM_TOKEN.captures(text).and_then(|c| c[1].parse().ok()))
}

pub fn bathrooms(attrs: &Attributes, text: &str) -> Option<f64> {
    attribute(attrs, &["bathrooms", "baths", "bathroom"])
        .and_then(numeric_value)
        .or_else(|| {
            label_value(text, &["bathrooms", "baths", "bathroom"]).and_then(|v| numeric_value(&v))
        })
        .or_else(|| BATHROOM_TOKEN.captures(text).and_then(|c| c[1].parse().ok()))
        .filter(|b| *b >= 0.0)
}

pub fn square_feet(attrs: &Attributes, text: &str) -> Option<u32> {
    attribute(attrs, &["sqft", "square feet", "area", "living area"])
        .and_then(numeric_value)
        .or_else(|| {
            label_value(text, &["square feet", "sqft", "living area"]).and_then(|v| numeric_value(&v))
        })
        .or_else(|| SQFT_TOKEN.captures(text).and_then(|c| numeric_value(&c[1])))
        .filter(|v| *v > 0.0)
        .map(|v| v as u32)
}

pub fn year_built(attrs: &Attributes, text: &str) -> Option<i32> {
    attribute(attrs, &["year built", "year", "built"])
        .and_then(|v| YEAR.captures(v).and_then(|c| c[1].parse().ok()))
        .or_else(|| {
            label_value(text, &["year built"])
                .and_then(|v| YEAR.captures(&v).and_then(|c| c[1].parse().ok()))
        })
        .or_else(|| BUILT_IN.captures(text).and_then(|c| c[1].parse().ok()))
}

pub fn lot_size_acres(attrs: &Attributes, text: &str) -> Option<f64> {
    attribute(attrs, &["lot size", "acres", "lot"])
        .and_then(numeric_value)
        .or_else(|| label_value(text, &["lot size", "lot"]).and_then(|v| numeric_value(&v)))
        .or_else(|| ACRES_TOKEN.captures(text).and_then(|c| c[1].parse().ok()))
        .filter(|v| *v > 0.0)
}

/// Property type from attributes, else the first indicator table row whose
/// words appear in the text.
pub fn property_type(attrs: &Attributes, text: &str) -> Option<String> {
    const INDICATORS: [(&str, &[&str]); 5] = [
        ("house", &["house", "home", "single family", "single-family"]),
        ("condo", &["condo", "condominium"]),
        ("apartment", &["apartment", "apt", "unit"]),
        ("land", &["land", "lot", "acre", "acres"]),
        ("multi-family", &["multi family", "multi-family", "duplex", "triplex"]),
    ];

    if let Some(t) = attribute(attrs, &["housing type", "property type", "type"]) {
        return Some(t.trim().to_lowercase());
    }

    let lower = text.to_lowercase();
    INDICATORS.iter().find_map(|(kind, words)| {
        words
            .iter()
            .any(|w| contains_word(&lower, w))
            .then(|| kind.to_string())
    })
}

pub fn find_phone(text: &str) -> Option<String> {
    PHONE.captures(text).map(|c| c[1].trim().to_string())
}

pub fn find_email(text: &str) -> Option<String> {
    EMAIL.find(text).map(|m| m.as_str().to_string())
}

fn leading_u32(text: &str) -> Option<u32> {
    let digits: String = text
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

fn contains_word(haystack: &str, word: &str) -> bool {
    haystack.match_indices(word).any(|(i, _)| {
        let before = haystack[..i].chars().next_back();
        let after = haystack[i + word.len()..].chars().next();
        !before.is_some_and(char::is_alphanumeric) && !after.is_some_and(char::is_alphanumeric)
    })
}

// ---------------------------------------------------------------------------
// Address assembly
// ---------------------------------------------------------------------------

/// Known municipality names matched against free text.
#[derive(Debug, Clone)]
pub struct Gazetteer {
    /// Lowercase names, longest first so "south portland" beats "portland".
    names: Vec<String>,
    zip: Regex,
}

/// Midcoast and southern Maine towns.
pub const DEFAULT_MUNICIPALITIES: [&str; 21] = [
    "portland",
    "lewiston",
    "bangor",
    "auburn",
    "biddeford",
    "sanford",
    "brunswick",
    "augusta",
    "south portland",
    "waterville",
    "westbrook",
    "bath",
    "saco",
    "falmouth",
    "topsham",
    "freeport",
    "yarmouth",
    "scarborough",
    "gorham",
    "rockland",
    "camden",
];

/// Maine ZIP codes run 03900-04992.
pub const DEFAULT_ZIP_PATTERN: &str = r"\b0[0-8]\d{3}\b";

impl Gazetteer {
    pub fn new<I, S>(names: I, zip_pattern: &str) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut names: Vec<String> = names
            .into_iter()
            .map(|n| n.as_ref().trim().to_lowercase())
            .filter(|n| !n.is_empty())
            .collect();
        names.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        names.dedup();
        Ok(Self {
            names,
            zip: Regex::new(zip_pattern)?,
        })
    }

    /// Title-cased name of the first (longest) municipality mentioned in `text`.
    pub fn find_city(&self, text: &str) -> Option<String> {
        let lower = text.to_lowercase();
        self.names
            .iter()
            .find(|name| contains_word(&lower, name))
            .map(|name| title_case(name))
    }

    pub fn find_zip(&self, text: &str) -> Option<String> {
        self.zip.find(text).map(|m| m.as_str().to_string())
    }
}

impl Default for Gazetteer {
    fn default() -> Self {
        Self {
            names: {
                let mut names: Vec<String> =
                    DEFAULT_MUNICIPALITIES.iter().map(|s| s.to_string()).collect();
                names.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
                names
            },
            zip: Regex::new(DEFAULT_ZIP_PATTERN).unwrap(),
        }
    }
}

/// Address components actually found in a listing. Nothing is invented.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AddressParts {
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip_code: Option<String>,
}

impl AddressParts {
    /// `street, city, state, zip` built only from the present components.
    pub fn full_address(&self) -> Option<String> {
        let locality: Vec<&str> = [&self.city, &self.state, &self.zip_code]
            .into_iter()
            .filter_map(|p| p.as_deref())
            .collect();

        let mut parts: Vec<String> = Vec::new();
        if let Some(street) = &self.street {
            parts.push(street.clone());
        }
        if !locality.is_empty() {
            parts.push(locality.join(", "));
        }
        (!parts.is_empty()).then(|| parts.join(", "))
    }

    pub fn is_empty(&self) -> bool {
        self.street.is_none() && self.city.is_none() && self.state.is_none() && self.zip_code.is_none()
    }
}

/// Extract address components from listing text.
///
/// The city comes from the gazetteer (text first, then the site's location
/// hint). The state is taken from a `XX 12345` token in the text, else from
/// `region_state`, the state the scraper was configured to search.
pub fn extract_address(
    text: &str,
    location_hint: Option<&str>,
    gazetteer: &Gazetteer,
    region_state: Option<&str>,
) -> AddressParts {
    let street = STREET
        .find(text)
        .map(|m| m.as_str().trim().trim_end_matches('.').to_string());
    let city = gazetteer
        .find_city(text)
        .or_else(|| location_hint.and_then(|hint| gazetteer.find_city(hint)));
    let state = STATE_BEFORE_ZIP
        .captures(text)
        .map(|c| c[1].to_string())
        .or_else(|| region_state.map(str::to_uppercase));
    let zip_code = gazetteer.find_zip(text);

    AddressParts {
        street,
        city,
        state,
        zip_code,
    }
}

fn title_case(s: &str) -> String {
    s.split(' ')
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}
