use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use url::form_urlencoded;

use crate::config::SearchSettings;
use crate::models::{format_date, StayDates, WorkItem};

/// Query defaults applied to every search
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchDefaults {
    pub base_url: String,
    /// `{region}` is replaced with the region id
    pub region_label: String,
    pub dest_type: String,
    pub group_adults: u32,
    pub group_children: u32,
    pub no_rooms: u32,
    pub lang: String,
    pub currency: String,
    pub hotels_only: bool,
}

impl Default for SearchDefaults {
    fn default() -> Self {
        Self {
            base_url: "https://www.booking.com/searchresults.en-gb.html".to_string(),
            region_label: "{region}e arr., Paris, Ile de France, France".to_string(),
            dest_type: "district".to_string(),
            group_adults: 2,
            group_children: 0,
            no_rooms: 1,
            lang: "en-gb".to_string(),
            currency: "EUR".to_string(),
            hotels_only: true,
        }
    }
}

impl From<&SearchSettings> for SearchDefaults {
    fn from(s: &SearchSettings) -> Self {
        Self {
            base_url: s.base_url.clone(),
            region_label: s.region_label.clone(),
            dest_type: s.dest_type.clone(),
            group_adults: s.group_adults,
            group_children: s.group_children,
            no_rooms: s.no_rooms,
            lang: s.lang.clone(),
            currency: s.currency.clone(),
            hotels_only: s.hotels_only,
        }
    }
}

/// Search parameters for one results page
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchParams {
    pub region_id: u32,
    /// Passed through literally, malformed values included
    pub checkin: Option<String>,
    pub checkout: Option<String>,
}

impl SearchParams {
    pub fn new(region_id: u32) -> Self {
        Self {
            region_id,
            checkin: None,
            checkout: None,
        }
    }

    pub fn with_dates(mut self, checkin: impl Into<String>, checkout: impl Into<String>) -> Self {
        self.checkin = Some(checkin.into());
        self.checkout = Some(checkout.into());
        self
    }

    /// Build the results URL. Dates directly follow `dest_id` so the region
    /// and stay read as one contiguous run of the query string.
    pub fn to_url(&self, defaults: &SearchDefaults) -> String {
        let label = defaults
            .region_label
            .replace("{region}", &self.region_id.to_string());
        let region = self.region_id.to_string();
        let adults = defaults.group_adults.to_string();
        let rooms = defaults.no_rooms.to_string();
        let children = defaults.group_children.to_string();

        let mut query = form_urlencoded::Serializer::new(String::new());
        query.append_pair("ss", &label);
        query.append_pair("dest_id", &region);
        if let Some(checkin) = &self.checkin {
            query.append_pair("checkin", checkin);
        }
        if let Some(checkout) = &self.checkout {
            query.append_pair("checkout", checkout);
        }
        query.append_pair("dest_type", &defaults.dest_type);
        query.append_pair("group_adults", &adults);
        query.append_pair("no_rooms", &rooms);
        query.append_pair("group_children", &children);
        query.append_pair("lang", &defaults.lang);
        if defaults.hotels_only {
            query.append_pair("nflt", "ht_id=204");
        }

        format!("{}?{}", defaults.base_url, query.finish())
    }
}

impl From<&WorkItem> for SearchParams {
    fn from(item: &WorkItem) -> Self {
        let params = SearchParams::new(item.region_id);
        match item.stay {
            Some(stay) => params.with_dates(format_date(stay.checkin), format_date(stay.checkout)),
            None => params,
        }
    }
}

/// Rewrite a hotel page URL to show availability for one stay.
pub fn stay_url(hotel_url: &str, stay: &StayDates, defaults: &SearchDefaults) -> String {
    let base = hotel_url.split(['?', '#']).next().unwrap_or(hotel_url);
    let adults = defaults.group_adults.to_string();
    let children = defaults.group_children.to_string();
    let rooms = defaults.no_rooms.to_string();

    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("checkin", &format_date(stay.checkin))
        .append_pair("checkout", &format_date(stay.checkout))
        .append_pair("group_adults", &adults)
        .append_pair("group_children", &children)
        .append_pair("no_rooms", &rooms)
        .append_pair("lang", &defaults.lang)
        .append_pair("selected_currency", &defaults.currency)
        .finish();

    format!("{}?{}", base, query)
}

/// Consecutive stays starting `start_offset` days after `today`.
/// A `limit` of 0 keeps every generated stay.
pub fn date_ranges(
    today: NaiveDate,
    days: u32,
    start_offset: u32,
    nights: u32,
    limit: usize,
) -> Vec<StayDates> {
    let nights = nights.max(1);
    let ranges = (0..days).filter_map(|i| {
        let offset = start_offset.checked_add(i)?;
        let checkin = today.checked_add_days(Days::new(u64::from(offset)))?;
        let checkout = checkin.checked_add_days(Days::new(u64::from(nights)))?;
        Some(StayDates::new(checkin, checkout))
    });

    if limit > 0 {
        ranges.take(limit).collect()
    } else {
        ranges.collect()
    }
}
