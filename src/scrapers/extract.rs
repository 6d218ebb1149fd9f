use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};

use crate::models::CancellationPolicy;

/// Result of running an ordered pattern list over some text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction<T> {
    Matched { pattern: &'static str, value: T },
    Unmatched,
}

impl<T> Extraction<T> {
    pub fn value(self) -> Option<T> {
        match self {
            Extraction::Matched { value, .. } => Some(value),
            Extraction::Unmatched => None,
        }
    }

    pub fn is_matched(&self) -> bool {
        matches!(self, Extraction::Matched { .. })
    }
}

/// A regex plus the parser applied to its first capture group
pub struct NamedPattern<T> {
    pub name: &'static str,
    pub regex: Regex,
    pub parse: fn(&str) -> Option<T>,
}

/// Ordered patterns, evaluated until one both matches and parses
pub struct PatternSet<T> {
    patterns: Vec<NamedPattern<T>>,
}

impl<T> PatternSet<T> {
    pub fn new(patterns: Vec<NamedPattern<T>>) -> Self {
        Self { patterns }
    }

    pub fn extract(&self, text: &str) -> Extraction<T> {
        for pattern in &self.patterns {
            let parsed = pattern
                .regex
                .captures(text)
                .and_then(|caps| caps.get(1))
                .and_then(|m| (pattern.parse)(m.as_str()));
            if let Some(value) = parsed {
                return Extraction::Matched {
                    pattern: pattern.name,
                    value,
                };
            }
        }
        Extraction::Unmatched
    }

    /// Try each text in turn, keeping the first hit.
    pub fn extract_first<'a>(&self, texts: impl IntoIterator<Item = &'a str>) -> Extraction<T> {
        texts
            .into_iter()
            .map(|text| self.extract(text))
            .find(Extraction::is_matched)
            .unwrap_or(Extraction::Unmatched)
    }
}

fn parse_count(raw: &str) -> Option<u32> {
    let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
    digits.parse().ok()
}

/// Count phrasings seen on results pages, English and French
pub static PROPERTY_COUNT: Lazy<PatternSet<u32>> = Lazy::new(|| {
    // Grouping separators must be followed by exactly three digits, and a
    // plain space never groups: "Paris 5 42 properties" is 42.
    const NUMBER: &str = r"\b(\d{1,3}(?:[,.\u{a0}\u{202f}]\d{3})+|\d+)";
    let pattern = |name: &'static str, tail: &str| NamedPattern {
        name,
        regex: Regex::new(&format!(r"(?i){}\s+{}", NUMBER, tail)).expect("count pattern is valid"),
        parse: parse_count,
    };
    PatternSet::new(vec![
        pattern(
            "any-phrasing",
            r"(?:properties|établissements?|exact matches?)\s+(?:found|trouvés)",
        ),
        pattern("exact-matches", r"exact matches"),
        pattern("properties-found", r"properties found"),
        pattern("etablissements-trouves", r"établissements trouvés"),
        pattern("properties", r"properties\b"),
    ])
});

static H1: Lazy<Selector> = Lazy::new(|| Selector::parse("h1").expect("valid selector"));
static BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("body").expect("valid selector"));

/// Non-breaking spaces are kept: they group digits in French counts.
fn collapse_whitespace(text: &str) -> String {
    text.split_ascii_whitespace().collect::<Vec<_>>().join(" ")
}

/// Text nodes are joined with a space so adjacent blocks never fuse.
fn element_text(element: ElementRef<'_>) -> String {
    collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "))
}

/// Text of every `h1`, in document order.
pub fn heading_texts(html: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    document
        .select(&H1)
        .map(element_text)
        .filter(|t| !t.is_empty())
        .collect()
}

/// Visible text of the page body, whitespace collapsed.
pub fn visible_text(html: &str) -> String {
    let document = Html::parse_document(html);
    match document.select(&BODY).next() {
        Some(body) => element_text(body),
        None => element_text(document.root_element()),
    }
}

/// Read the number of listed properties from a results page: headings
/// first, then the whole body.
pub fn property_count(html: &str) -> Extraction<u32> {
    let headings = heading_texts(html);
    match PROPERTY_COUNT.extract_first(headings.iter().map(String::as_str)) {
        Extraction::Unmatched => PROPERTY_COUNT.extract(&visible_text(html)),
        matched => matched,
    }
}

/// Keywords that only show up on anti-bot interstitials
pub const BOT_KEYWORDS: &[&str] = &["robot", "captcha", "access denied"];

/// Return the anti-bot keyword found in `text`, if any.
pub fn detect_block(text: &str) -> Option<&'static str> {
    let lower = text.to_lowercase();
    BOT_KEYWORDS.iter().copied().find(|k| lower.contains(k))
}

/// Email addresses that must never be persisted
#[derive(Debug, Clone, Default)]
pub struct EmailBlacklist {
    entries: HashSet<String>,
}

impl EmailBlacklist {
    pub fn new<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            entries: entries
                .into_iter()
                .map(|e| e.as_ref().trim().to_lowercase())
                .filter(|e| !e.is_empty())
                .collect(),
        }
    }

    pub fn contains(&self, email: &str) -> bool {
        self.entries.contains(&email.trim().to_lowercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Trader details read from the legal-information modal
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegalDetails {
    pub business_name: Option<String>,
    pub address: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub registration_number: Option<String>,
}

pub const TRADER_MODAL: &str = r#"[data-testid="trader-information-modal"]"#;

static MODAL: Lazy<Selector> = Lazy::new(|| Selector::parse(TRADER_MODAL).expect("valid selector"));
static MODAL_EMAIL: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"[data-testid="host-details-email"]"#).expect("valid selector")
});
static MODAL_PHONE: Lazy<Selector> = Lazy::new(|| {
    Selector::parse(r#"[data-testid="host-details-phone"]"#).expect("valid selector")
});
static DIV: Lazy<Selector> = Lazy::new(|| Selector::parse("div").expect("valid selector"));

static EMAIL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}").expect("valid regex")
});
static REGISTRATION: Lazy<PatternSet<String>> = Lazy::new(|| {
    let pattern = |name: &'static str, re: &str| NamedPattern {
        name,
        regex: Regex::new(re).expect("registration pattern is valid"),
        parse: |s: &str| Some(s.trim().to_string()).filter(|s| !s.is_empty()),
    };
    PatternSet::new(vec![
        pattern("registre-du-commerce", r"(?i:registre du commerce)[:\s]*([A-Z0-9][A-Z0-9 ]*\d)"),
        pattern("trade-register", r"(?i:trade register(?: number)?)[:\s]*([A-Z0-9][A-Z0-9 ]*\d)"),
        pattern("registration-number", r"(?i:registration number)[:\s]*([A-Z0-9][A-Z0-9 ]*\d)"),
    ])
});
static BUSINESS_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"([A-Z][A-Za-z0-9&'\-\. ]*?\b(?:Ltd|Limited|LIMITED|Inc|LLC|SAS|SARL|SA|Corp|Corporation|Accor|Group|Company|Co)\b\.?)",
    )
    .expect("valid regex")
});
static ADDRESS: Lazy<PatternSet<String>> = Lazy::new(|| {
    let pattern = |name: &'static str, re: &str| NamedPattern {
        name,
        regex: Regex::new(re).expect("address pattern is valid"),
        parse: |s: &str| Some(s.trim().trim_end_matches(',').to_string()),
    };
    PatternSet::new(vec![
        // French postcode followed by a city
        pattern(
            "fr-postcode",
            r"(\d{1,4}[A-Za-zÀ-ÿ0-9'\-\., ]+?,?\s*\d{5}\s+[A-Za-zÀ-ÿ\-' ]+(?:,\s*France)?)",
        ),
        // UK-style postcode
        pattern(
            "uk-postcode",
            r"([A-Za-z0-9\s,]+,\s*[A-Z]{1,2}\d{1,2}[A-Z]?\s*\d[A-Z]{2}(?:\s*[A-Za-z ]+)?)",
        ),
    ])
});

/// Text of the innermost `div`s under `scope`, in document order.
fn leaf_blocks(scope: ElementRef<'_>) -> Vec<String> {
    scope
        .select(&DIV)
        .filter(|div| {
            !div.descendants()
                .skip(1)
                .filter_map(ElementRef::wrap)
                .any(|d| d.value().name() == "div")
        })
        .map(element_text)
        .filter(|t| !t.is_empty() && t.len() < 200)
        .collect()
}

/// Extract trader details from a page containing the legal-information modal.
/// Returns `None` when the modal is absent.
pub fn legal_details(html: &str) -> Option<LegalDetails> {
    let document = Html::parse_document(html);
    let modal = document.select(&MODAL).next()?;
    let modal_text = element_text(modal);

    let email = modal
        .select(&MODAL_EMAIL)
        .next()
        .map(element_text)
        .and_then(|t| EMAIL.find(&t).map(|m| m.as_str().to_string()))
        .or_else(|| EMAIL.find(&modal_text).map(|m| m.as_str().to_string()));

    let phone = modal
        .select(&MODAL_PHONE)
        .next()
        .map(element_text)
        .filter(|t| !t.is_empty());

    let blocks = leaf_blocks(modal);
    let address = ADDRESS
        .extract_first(blocks.iter().map(String::as_str))
        .value();
    let business_name = blocks.iter().find_map(|block| {
        BUSINESS_NAME
            .captures(block)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim().to_string())
    });

    Some(LegalDetails {
        business_name,
        address,
        email,
        phone,
        registration_number: REGISTRATION.extract(&modal_text).value(),
    })
}

/// Map cancellation wording to a policy class.
pub fn classify_cancellation(text: &str) -> CancellationPolicy {
    let lower = text.to_lowercase();
    if lower.contains("non-refundable")
        || lower.contains("non refundable")
        || lower.contains("non remboursable")
    {
        return CancellationPolicy::NonFlexible;
    }
    if [
        "free cancellation",
        "no prepayment needed",
        "annulation gratuite",
        "aucun prépaiement requis",
        "remboursable",
    ]
    .iter()
    .any(|k| lower.contains(k))
    {
        return CancellationPolicy::Flexible;
    }
    CancellationPolicy::NotAvailable
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_from_english_heading() {
        assert_eq!(
            PROPERTY_COUNT.extract("Paris: 42 properties found"),
            Extraction::Matched {
                pattern: "any-phrasing",
                value: 42
            }
        );
    }

    #[test]
    fn count_from_french_heading() {
        let html = "<html><body><h1>Paris : 318 établissements trouvés</h1></body></html>";
        assert_eq!(property_count(html).value(), Some(318));
    }

    #[test]
    fn count_with_thousands_separator() {
        assert_eq!(
            PROPERTY_COUNT.extract("1,204 exact matches").value(),
            Some(1204)
        );
        assert_eq!(
            PROPERTY_COUNT.extract("1.204 properties found").value(),
            Some(1204)
        );
    }

    #[test]
    fn count_with_non_breaking_space_groups() {
        let html = "<h1>Paris : 1\u{a0}204 établissements trouvés</h1>";
        assert_eq!(property_count(html).value(), Some(1204));
        assert_eq!(
            PROPERTY_COUNT.extract("2\u{202f}318 properties found").value(),
            Some(2318)
        );
    }

    #[test]
    fn neighbouring_numbers_are_not_merged_into_the_count() {
        assert_eq!(PROPERTY_COUNT.extract("Paris 5 42 properties found").value(), Some(42));
        assert_eq!(
            property_count("<h1>Paris</h1><div>Hotels 204</div><div>318 properties</div>").value(),
            Some(318)
        );
        assert_eq!(PROPERTY_COUNT.extract("1,2345 properties").value(), Some(2345));
        assert_eq!(PROPERTY_COUNT.extract("12345 properties found").value(), Some(12345));
    }

    #[test]
    fn no_phrase_is_unmatched() {
        assert_eq!(
            PROPERTY_COUNT.extract("Search results for Paris"),
            Extraction::Unmatched
        );
        assert_eq!(property_count("<html><body></body></html>"), Extraction::Unmatched);
    }

    #[test]
    fn later_headings_are_tried() {
        let html = "<h1>Paris hotels</h1><h1>Le Marais: 87 properties found</h1>";
        assert_eq!(property_count(html).value(), Some(87));
    }

    #[test]
    fn falls_back_to_body_text() {
        let html = "<html><body><h1>Paris</h1><div>Showing 15 properties</div></body></html>";
        assert_eq!(
            property_count(html),
            Extraction::Matched {
                pattern: "properties",
                value: 15
            }
        );
    }

    #[test]
    fn block_keywords_are_case_insensitive() {
        assert_eq!(detect_block("Please complete the CAPTCHA"), Some("captcha"));
        assert_eq!(detect_block("Access Denied"), Some("access denied"));
        assert_eq!(detect_block("42 properties found"), None);
    }

    #[test]
    fn blacklist_matches_case_insensitively() {
        let blacklist = EmailBlacklist::new(["Info@Mantalli.com", " sales@condokeeper.co.uk "]);
        assert!(blacklist.contains("info@mantalli.com"));
        assert!(blacklist.contains("SALES@condokeeper.co.uk"));
        assert!(!blacklist.contains("contact@hotel.example"));
        assert_eq!(blacklist.len(), 2);
    }

    #[test]
    fn legal_details_from_modal() {
        let html = r#"
            <html><body>
            <div data-testid="trader-information-modal">
              <div>Trader information</div>
              <div>Hotel Majestic Group</div>
              <div>29 Rue Dumont d'Urville, 75116 Paris, France</div>
              <div data-testid="host-details-email">reservations@majestic.example</div>
              <div data-testid="host-details-phone">+33 1 45 00 83 70</div>
              <div>Numéro de registre du commerce: 552081317</div>
            </div>
            </body></html>"#;
        let details = legal_details(html).unwrap();
        assert_eq!(details.email.as_deref(), Some("reservations@majestic.example"));
        assert_eq!(details.phone.as_deref(), Some("+33 1 45 00 83 70"));
        assert_eq!(details.registration_number.as_deref(), Some("552081317"));
        assert_eq!(details.business_name.as_deref(), Some("Hotel Majestic Group"));
        assert_eq!(
            details.address.as_deref(),
            Some("29 Rue Dumont d'Urville, 75116 Paris, France")
        );
    }

    #[test]
    fn missing_modal_yields_none() {
        assert!(legal_details("<html><body><h1>Hotel</h1></body></html>").is_none());
    }

    #[test]
    fn cancellation_wording() {
        assert_eq!(
            classify_cancellation("Non-refundable"),
            CancellationPolicy::NonFlexible
        );
        assert_eq!(
            classify_cancellation("Annulation gratuite avant le 3 mai"),
            CancellationPolicy::Flexible
        );
        assert_eq!(
            classify_cancellation("No prepayment needed – pay at the property"),
            CancellationPolicy::Flexible
        );
        assert_eq!(classify_cancellation(""), CancellationPolicy::NotAvailable);
    }
}
