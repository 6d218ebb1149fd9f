use std::collections::HashSet;

use deunicode::deunicode;
use once_cell::sync::Lazy;
use scraper::{ElementRef, Html, Selector};

use crate::models::CancellationPolicy;
use crate::scrapers::extract::classify_cancellation;

/// Containers that show the room table has rendered, in priority order
pub const ROOM_TABLE_MARKERS: &[&str] = &[
    ".hprt-block",
    ".js-hprt-table",
    "#hprt-form",
    r#"[data-component="hotel/new-rooms-table"]"#,
    r#"[data-testid="rooms-table"]"#,
    r#"[data-section="roomlist"]"#,
    r#"[data-testid="property-availability-table"]"#,
    "#maxotelRoomArea",
    "section.roomstable",
    r#"[data-testid="rt-name-link"]"#,
];

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("valid selector")
}

static CLASSIC_BLOCKS: Lazy<Selector> = Lazy::new(|| selector(".hprt-block"));
static MODERN_BLOCKS: Lazy<Selector> = Lazy::new(|| selector(r#"[data-testid="room-info"]"#));
static ROOM_NAME: Lazy<Selector> = Lazy::new(|| {
    selector(r#".hprt-roomtype-name, [data-testid="room-name"], a[data-testid="rt-name-link"], h3, h4"#)
});
static CONDITIONS: Lazy<Selector> = Lazy::new(|| {
    selector(r#".hprt-table-cell-conditions, [data-testid*="cancellation"], [data-testid*="policy"]"#)
});
static PRICE: Lazy<Selector> = Lazy::new(|| {
    selector(r#".bui-price-display__value, [data-testid="price-and-discounted-price"], [data-testid^="price-amount"]"#)
});
static BODY: Lazy<Selector> = Lazy::new(|| selector("body"));

const UNAVAILABLE_PHRASES: &[&str] = &[
    "not available",
    "no availability",
    "indisponible",
    "aucune disponibilité",
];

/// The room that matched one of the searched room types
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomOffer {
    pub name: String,
    pub cancellation: CancellationPolicy,
    /// Digits only
    pub price: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomLookup {
    Found(RoomOffer),
    Unavailable { room_name: Option<String> },
    NoTargetRoomFound,
}

fn text_of(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Lowercase, strip diacritics, keep only ASCII letters, digits and single spaces.
pub fn normalize(text: &str) -> String {
    deunicode(text)
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn synonyms(word: &str) -> &'static [&'static str] {
    match word {
        "double" => &["double", "double standard", "standard double", "double or twin", "double twin"],
        "standard" => &["standard", "classique", "classic"],
        "classic" => &["classic", "classique", "standard"],
        _ => &[],
    }
}

/// The normalized phrase plus every variant with one word swapped for a synonym.
pub fn expand_with_synonyms(phrase: &str) -> Vec<String> {
    let base = normalize(phrase);
    let words: Vec<&str> = base.split(' ').filter(|w| !w.is_empty()).collect();
    let mut expanded = vec![base.clone()];
    for (i, word) in words.iter().enumerate() {
        for synonym in synonyms(word) {
            let variant = words
                .iter()
                .enumerate()
                .map(|(j, w)| if i == j { *synonym } else { *w })
                .collect::<Vec<_>>()
                .join(" ");
            if !expanded.contains(&variant) {
                expanded.push(variant);
            }
        }
    }
    expanded
}

fn tokens(text: &str) -> HashSet<&str> {
    text.split(' ').filter(|w| w.len() >= 3).collect()
}

fn jaccard(a: &HashSet<&str>, b: &HashSet<&str>) -> f64 {
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let shared = a.intersection(b).count();
    shared as f64 / (a.len() + b.len() - shared) as f64
}

/// Loose match between a normalized room name and a normalized target.
pub fn names_match(room: &str, target: &str) -> bool {
    if room.is_empty() || target.is_empty() {
        return false;
    }
    if room.contains(target) || target.contains(room) {
        return true;
    }
    let room_tokens = tokens(room);
    let target_tokens = tokens(target);
    jaccard(&room_tokens, &target_tokens) >= 0.5
        || room_tokens.intersection(&target_tokens).count() >= 2
}

fn room_blocks(document: &Html) -> Vec<ElementRef<'_>> {
    let classic: Vec<_> = document.select(&CLASSIC_BLOCKS).collect();
    if !classic.is_empty() {
        return classic;
    }
    document.select(&MODERN_BLOCKS).collect()
}

fn block_price(block: ElementRef<'_>) -> Option<String> {
    let row = block
        .ancestors()
        .filter_map(ElementRef::wrap)
        .find(|a| a.value().name() == "tr");
    let price_el = row
        .and_then(|r| r.select(&PRICE).next())
        .or_else(|| block.select(&PRICE).next())?;
    let digits: String = text_of(price_el).chars().filter(char::is_ascii_digit).collect();
    Some(digits).filter(|d| !d.is_empty())
}

fn block_cancellation(block: ElementRef<'_>) -> CancellationPolicy {
    block
        .select(&CONDITIONS)
        .map(|cell| classify_cancellation(&text_of(cell)))
        .find(|policy| *policy != CancellationPolicy::NotAvailable)
        .unwrap_or(CancellationPolicy::NotAvailable)
}

/// Find the first room block (page order) whose name matches one of `room_types`.
pub fn find_room(html: &str, room_types: &[String]) -> RoomLookup {
    let document = Html::parse_document(html);
    let targets: Vec<String> = room_types
        .iter()
        .flat_map(|t| expand_with_synonyms(t))
        .filter(|t| !t.is_empty())
        .collect();

    let blocks = room_blocks(&document);
    if blocks.is_empty() {
        let page_text = document
            .select(&BODY)
            .next()
            .map(text_of)
            .unwrap_or_default()
            .to_lowercase();
        if UNAVAILABLE_PHRASES.iter().any(|p| page_text.contains(p)) {
            let room_name = document.select(&ROOM_NAME).next().map(text_of);
            return RoomLookup::Unavailable { room_name };
        }
        return RoomLookup::NoTargetRoomFound;
    }

    for block in blocks {
        let Some(name) = block.select(&ROOM_NAME).next().map(text_of) else {
            continue;
        };
        let normalized = normalize(&name);
        if targets.iter().any(|t| names_match(&normalized, t)) {
            return RoomLookup::Found(RoomOffer {
                cancellation: block_cancellation(block),
                price: block_price(block),
                name,
            });
        }
    }
    RoomLookup::NoTargetRoomFound
}
