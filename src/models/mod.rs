use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::sinks::Record;

/// Timestamp layout shared by every sink (BigQuery DATETIME compatible).
pub const DATETIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
/// Calendar date layout shared by every sink.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

pub fn format_datetime(at: &DateTime<Utc>) -> String {
    at.format(DATETIME_FORMAT).to_string()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Stay dates rendered as a midnight DATETIME for warehouse columns.
fn date_as_datetime(date: NaiveDate) -> String {
    format!("{} 00:00:00", format_date(date))
}

mod canonical_datetime {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(at: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_datetime(at))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        NaiveDateTime::parse_from_str(&raw, super::DATETIME_FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}

/// Check-in / check-out pair of a search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StayDates {
    pub checkin: NaiveDate,
    pub checkout: NaiveDate,
}

impl StayDates {
    pub fn new(checkin: NaiveDate, checkout: NaiveDate) -> Self {
        Self { checkin, checkout }
    }
}

/// One search-results scrape: a region, optionally for a given stay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    pub region_id: u32,
    pub stay: Option<StayDates>,
}

impl WorkItem {
    pub fn new(region_id: u32, stay: Option<StayDates>) -> Self {
        Self { region_id, stay }
    }

    /// Cross product of regions and stays, stays outermost like the
    /// original daily runs (all regions for day 1, then day 2, ...).
    pub fn grid(regions: impl IntoIterator<Item = u32> + Clone, stays: &[StayDates]) -> Vec<Self> {
        if stays.is_empty() {
            return regions.into_iter().map(|r| Self::new(r, None)).collect();
        }
        stays
            .iter()
            .flat_map(|stay| {
                regions
                    .clone()
                    .into_iter()
                    .map(move |r| Self::new(r, Some(*stay)))
            })
            .collect()
    }
}

/// How the final state of a record should be counted in a run summary
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Succeeded,
    Unmatched,
    Failed,
}

/// Which extraction pattern produced a value, if any
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExtractionStatus {
    Matched { pattern: String },
    Unmatched,
}

/// Number of hotels listed for a region (and optionally a stay)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountObservation {
    pub region_id: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkin: Option<NaiveDate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkout: Option<NaiveDate>,
    #[serde(with = "canonical_datetime")]
    pub observed_at: DateTime<Utc>,
    pub properties_count: Option<u32>,
    pub extraction: ExtractionStatus,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CountObservation {
    pub fn stay(&self) -> Option<StayDates> {
        match (self.checkin, self.checkout) {
            (Some(checkin), Some(checkout)) => Some(StayDates::new(checkin, checkout)),
            _ => None,
        }
    }

    fn status_label(&self) -> &'static str {
        if self.error.is_some() {
            "error"
        } else {
            match self.extraction {
                ExtractionStatus::Matched { .. } => "matched",
                ExtractionStatus::Unmatched => "unmatched",
            }
        }
    }
}

impl Record for CountObservation {
    fn csv_header() -> &'static [&'static str] {
        &[
            "ObservationDate",
            "Arrondissement",
            "CheckinDate",
            "CheckoutDate",
            "PropertiesCount",
            "Status",
            "Error",
        ]
    }

    fn csv_row(&self) -> Vec<String> {
        vec![
            format_datetime(&self.observed_at),
            self.region_id.to_string(),
            self.checkin.map(format_date).unwrap_or_default(),
            self.checkout.map(format_date).unwrap_or_default(),
            self.properties_count.map(|c| c.to_string()).unwrap_or_default(),
            self.status_label().to_string(),
            self.error.clone().unwrap_or_default(),
        ]
    }

    fn webhook_body(&self) -> Value {
        // The spreadsheet script picks its target sheet by field presence.
        match self.stay() {
            Some(stay) => json!({
                "arrondissement": self.region_id.to_string(),
                "propertiesCount": self.properties_count,
                "checkinDate": date_as_datetime(stay.checkin),
                "checkoutDate": date_as_datetime(stay.checkout),
                "scrapingDate": format_datetime(&self.observed_at),
            }),
            None => json!({
                "arrondissement": self.region_id.to_string(),
                "properties_count": self.properties_count,
                "date": format_datetime(&self.observed_at),
            }),
        }
    }

    fn warehouse_row(&self) -> Value {
        match self.stay() {
            Some(stay) => json!({
                "ObservationDate": format_datetime(&self.observed_at),
                "Arrondissement": self.region_id.to_string(),
                "CheckinDate": date_as_datetime(stay.checkin),
                "PropertiesCount": self.properties_count,
                "CheckoutDate": date_as_datetime(stay.checkout),
            }),
            None => json!({
                "ObservationDate": format_datetime(&self.observed_at),
                "Arrondissement": self.region_id.to_string(),
                "PropertiesCount": self.properties_count,
            }),
        }
    }

    fn describe(&self) -> String {
        match self.stay() {
            Some(stay) => format!(
                "region {} ({} → {})",
                self.region_id, stay.checkin, stay.checkout
            ),
            None => format!("region {}", self.region_id),
        }
    }

    fn outcome(&self) -> RecordOutcome {
        if self.error.is_some() {
            RecordOutcome::Failed
        } else if self.properties_count.is_some() {
            RecordOutcome::Succeeded
        } else {
            RecordOutcome::Unmatched
        }
    }

    fn count(&self) -> Option<u64> {
        self.properties_count.map(u64::from)
    }
}

/// Business / legal details published for a hotel
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LegalInfo {
    pub url: String,
    pub business_name: Option<String>,
    pub address: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub registration_number: Option<String>,
    #[serde(with = "canonical_datetime")]
    pub scraped_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LegalInfo {
    pub fn failed(url: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            scraped_at: Utc::now(),
            error: Some(error.into()),
            ..Default::default()
        }
    }

    pub fn has_details(&self) -> bool {
        self.business_name.is_some()
            || self.email.is_some()
            || self.phone.is_some()
            || self.address.is_some()
    }
}

impl Record for LegalInfo {
    fn csv_header() -> &'static [&'static str] {
        &[
            "url",
            "businessName",
            "address",
            "email",
            "phone",
            "registerNumber",
            "scrapedAt",
            "error",
        ]
    }

    fn csv_row(&self) -> Vec<String> {
        vec![
            self.url.clone(),
            self.business_name.clone().unwrap_or_default(),
            self.address.clone().unwrap_or_default(),
            self.email.clone().unwrap_or_default(),
            self.phone.clone().unwrap_or_default(),
            self.registration_number.clone().unwrap_or_default(),
            format_datetime(&self.scraped_at),
            self.error.clone().unwrap_or_default(),
        ]
    }

    fn webhook_body(&self) -> Value {
        json!({
            "url": self.url,
            "businessName": self.business_name,
            "address": self.address,
            "email": self.email,
            "phone": self.phone,
            "registerNumber": self.registration_number,
            "scrapedAt": format_datetime(&self.scraped_at),
            "error": self.error,
        })
    }

    fn warehouse_row(&self) -> Value {
        json!({
            "Url": self.url,
            "BusinessName": self.business_name,
            "Address": self.address,
            "Email": self.email,
            "Phone": self.phone,
            "RegistrationNumber": self.registration_number,
            "ScrapedAt": format_datetime(&self.scraped_at),
            "Error": self.error,
        })
    }

    fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }

    fn describe(&self) -> String {
        self.url.clone()
    }

    fn outcome(&self) -> RecordOutcome {
        if self.error.is_some() {
            RecordOutcome::Failed
        } else if self.has_details() {
            RecordOutcome::Succeeded
        } else {
            RecordOutcome::Unmatched
        }
    }
}

/// One row of the room-policy input: a hotel page and the room names to look for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotelTarget {
    pub url: String,
    pub room_types: Vec<String>,
}

/// A hotel target checked for one stay
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomWorkItem {
    pub target: HotelTarget,
    pub stay: StayDates,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancellationPolicy {
    Flexible,
    #[serde(rename = "Non-Flexible")]
    NonFlexible,
    #[serde(rename = "Not available")]
    NotAvailable,
}

impl CancellationPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            CancellationPolicy::Flexible => "Flexible",
            CancellationPolicy::NonFlexible => "Non-Flexible",
            CancellationPolicy::NotAvailable => "Not available",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomStatus {
    Available,
    Unavailable,
    NoTargetRoomFound,
    StructureMismatch,
    RuntimeError,
}

impl RoomStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoomStatus::Available => "available",
            RoomStatus::Unavailable => "unavailable",
            RoomStatus::NoTargetRoomFound => "no_target_room_found",
            RoomStatus::StructureMismatch => "structure_mismatch",
            RoomStatus::RuntimeError => "runtime_error",
        }
    }
}

/// Cancellation terms and price of the first matching room for a stay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoomPolicy {
    pub hotel_url: String,
    pub full_url: String,
    pub room_types: Vec<String>,
    pub checkin: NaiveDate,
    pub checkout: NaiveDate,
    pub room_name: Option<String>,
    pub price: Option<String>,
    pub cancellation: CancellationPolicy,
    pub status: RoomStatus,
    #[serde(with = "canonical_datetime")]
    pub scraped_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Record for RoomPolicy {
    fn csv_header() -> &'static [&'static str] {
        &[
            "Timestamp",
            "Hotel URL",
            "Full URL Used",
            "Room Name",
            "Price",
            "Cancellation Policy",
            "Status",
            "Check-in",
            "Check-out",
            "Room Types Searched",
            "Error",
        ]
    }

    fn csv_row(&self) -> Vec<String> {
        vec![
            format_datetime(&self.scraped_at),
            self.hotel_url.clone(),
            self.full_url.clone(),
            self.room_name.clone().unwrap_or_default(),
            self.price.clone().unwrap_or_default(),
            self.cancellation.as_str().to_string(),
            self.status.as_str().to_string(),
            format_date(self.checkin),
            format_date(self.checkout),
            self.room_types.join(", "),
            self.error.clone().unwrap_or_default(),
        ]
    }

    fn webhook_body(&self) -> Value {
        json!({
            "timestamp": format_datetime(&self.scraped_at),
            "hotelUrl": self.hotel_url,
            "fullUrl": self.full_url,
            "roomName": self.room_name,
            "price": self.price,
            "cancellationPolicy": self.cancellation.as_str(),
            "status": self.status.as_str(),
            "checkin": format_date(self.checkin),
            "checkout": format_date(self.checkout),
            "roomTypes": self.room_types.join(", "),
            "error": self.error,
        })
    }

    fn warehouse_row(&self) -> Value {
        json!({
            "HotelUrl": self.hotel_url,
            "RoomName": self.room_name,
            "Price": self.price,
            "Cancellation": self.cancellation.as_str(),
            "Status": self.status.as_str(),
            "CheckinDate": date_as_datetime(self.checkin),
            "CheckoutDate": date_as_datetime(self.checkout),
            "ScrapedAt": format_datetime(&self.scraped_at),
            "Error": self.error,
        })
    }

    fn describe(&self) -> String {
        format!("{} ({} → {})", self.hotel_url, self.checkin, self.checkout)
    }

    fn outcome(&self) -> RecordOutcome {
        match self.status {
            RoomStatus::Available | RoomStatus::Unavailable => RecordOutcome::Succeeded,
            RoomStatus::NoTargetRoomFound | RoomStatus::StructureMismatch => {
                RecordOutcome::Unmatched
            }
            RoomStatus::RuntimeError => RecordOutcome::Failed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, DATE_FORMAT).unwrap()
    }

    fn observation(stay: Option<StayDates>, count: Option<u32>) -> CountObservation {
        CountObservation {
            region_id: 5,
            checkin: stay.map(|s| s.checkin),
            checkout: stay.map(|s| s.checkout),
            observed_at: Utc.with_ymd_and_hms(2025, 3, 4, 8, 15, 0).unwrap(),
            properties_count: count,
            extraction: ExtractionStatus::Matched {
                pattern: "properties-found".into(),
            },
            url: "https://example.test".into(),
            error: None,
        }
    }

    #[test]
    fn grid_puts_stays_outermost() {
        let stays = vec![
            StayDates::new(date("2025-01-01"), date("2025-01-02")),
            StayDates::new(date("2025-01-02"), date("2025-01-03")),
        ];
        let items = WorkItem::grid(1..=3, &stays);
        assert_eq!(items.len(), 6);
        assert_eq!(items[0], WorkItem::new(1, Some(stays[0])));
        assert_eq!(items[3], WorkItem::new(1, Some(stays[1])));
        assert_eq!(WorkItem::grid(1..=20, &[]).len(), 20);
    }

    #[test]
    fn daily_webhook_shape_has_no_dates() {
        let body = observation(None, Some(42)).webhook_body();
        assert_eq!(body["arrondissement"], "5");
        assert_eq!(body["properties_count"], 42);
        assert_eq!(body["date"], "2025-03-04 08:15:00");
        assert!(body.get("checkinDate").is_none());
    }

    #[test]
    fn ranged_webhook_shape_carries_stay() {
        let stay = StayDates::new(date("2025-01-01"), date("2025-01-02"));
        let body = observation(Some(stay), Some(7)).webhook_body();
        assert_eq!(body["propertiesCount"], 7);
        assert_eq!(body["checkinDate"], "2025-01-01 00:00:00");
        assert_eq!(body["checkoutDate"], "2025-01-02 00:00:00");
        assert_eq!(body["scrapingDate"], "2025-03-04 08:15:00");
    }

    #[test]
    fn unmatched_count_is_left_empty() {
        let mut obs = observation(None, None);
        obs.extraction = ExtractionStatus::Unmatched;
        assert_eq!(obs.outcome(), RecordOutcome::Unmatched);
        let row = obs.csv_row();
        assert_eq!(row[4], "");
        assert_eq!(row[5], "unmatched");
        assert!(obs.warehouse_row()["PropertiesCount"].is_null());
    }

    #[test]
    fn json_round_trips_canonical_timestamp() {
        let obs = observation(None, Some(3));
        let raw = serde_json::to_string(&obs).unwrap();
        assert!(raw.contains("\"observedAt\":\"2025-03-04 08:15:00\""));
        let back: CountObservation = serde_json::from_str(&raw).unwrap();
        assert_eq!(back, obs);
    }
}
