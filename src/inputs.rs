use std::path::Path;

use anyhow::{Context, Result};
use tracing::warn;

use crate::models::HotelTarget;

/// Read one URL per line, skipping blanks and `#` comments.
/// A `limit` of 0 keeps every URL.
pub fn read_url_list(path: &Path, limit: usize) -> Result<Vec<String>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read URL list {}", path.display()))?;
    Ok(parse_url_list(&raw, limit))
}

pub fn parse_url_list(raw: &str, limit: usize) -> Vec<String> {
    let urls = raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string);
    if limit > 0 {
        urls.take(limit).collect()
    } else {
        urls.collect()
    }
}

/// Read the semicolon CSV of hotels: first column is the hotel URL, the
/// remaining non-empty columns are room-type names.
pub fn read_hotel_targets(path: &Path, limit: usize) -> Result<Vec<HotelTarget>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open hotel list {}", path.display()))?;
    parse_hotel_targets(file, limit)
        .with_context(|| format!("Failed to parse hotel list {}", path.display()))
}

pub fn parse_hotel_targets<R: std::io::Read>(reader: R, limit: usize) -> Result<Vec<HotelTarget>> {
    let mut csv = csv::ReaderBuilder::new()
        .delimiter(b';')
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut targets = Vec::new();
    for (line, row) in csv.records().enumerate() {
        let row = row?;
        let Some(url) = row.get(0).filter(|u| !u.is_empty()) else {
            continue;
        };
        let room_types: Vec<String> = row
            .iter()
            .skip(1)
            .filter(|c| !c.is_empty())
            .map(str::to_string)
            .collect();
        if room_types.is_empty() {
            // header is line 1
            warn!("⚠️ Row {} ({}) lists no room types, skipping", line + 2, url);
            continue;
        }
        targets.push(HotelTarget {
            url: url.to_string(),
            room_types,
        });
        if limit > 0 && targets.len() >= limit {
            break;
        }
    }
    Ok(targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_list_skips_blanks_and_comments() {
        let raw = "# hotels to check\nhttps://a.example/h1\n\n   https://a.example/h2  \n#https://skip\nhttps://a.example/h3\n";
        assert_eq!(
            parse_url_list(raw, 0),
            vec!["https://a.example/h1", "https://a.example/h2", "https://a.example/h3"]
        );
        assert_eq!(parse_url_list(raw, 2).len(), 2);
    }

    #[test]
    fn hotel_csv_rows_become_targets() {
        let raw = "url;room1;room2;room3\n\
                   https://www.booking.com/hotel/fr/a.html;Double Room; Classic Double ;\n\
                   ;Suite\n\
                   https://www.booking.com/hotel/fr/b.html;Twin\n\
                   https://www.booking.com/hotel/fr/c.html\n";
        let targets = parse_hotel_targets(raw.as_bytes(), 0).unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[0].url, "https://www.booking.com/hotel/fr/a.html");
        assert_eq!(targets[0].room_types, vec!["Double Room", "Classic Double"]);
        assert_eq!(targets[1].room_types, vec!["Twin"]);
    }

    #[test]
    fn hotel_csv_respects_limit() {
        let raw = "url;room\nhttps://x/1;A\nhttps://x/2;B\nhttps://x/3;C\n";
        let targets = parse_hotel_targets(raw.as_bytes(), 2).unwrap();
        assert_eq!(targets.len(), 2);
        assert_eq!(targets[1].url, "https://x/2");
    }
}
