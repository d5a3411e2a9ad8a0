use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::HarvestError;

/// One occurrence exactly as the remote API returned it.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord(pub Value);

impl RawRecord {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field).filter(|value| !value.is_null())
    }

    pub fn str_field(&self, field: &str) -> Option<&str> {
        self.get(field)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    pub fn f64_field(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(Value::as_f64)
    }

    pub fn u64_field(&self, field: &str) -> Option<u64> {
        let value = self.get(field)?;
        value
            .as_u64()
            .or_else(|| value.as_str().and_then(|text| text.trim().parse().ok()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub identity: String,
    pub species_name: String,
    pub taxon_group: String,
    pub latitude: f64,
    pub longitude: f64,
    pub observed_year: i32,
    pub observed_month: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_day: Option<u32>,
    pub source_tag: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservedDate {
    pub year: i32,
    pub month: u32,
    pub day: Option<u32>,
}

impl ObservedDate {
    pub fn new(year: i32, month: u32, day: Option<u32>) -> Result<Self, HarvestError> {
        let valid = match day {
            Some(day) => NaiveDate::from_ymd_opt(year, month, day).is_some(),
            None => NaiveDate::from_ymd_opt(year, month, 1).is_some(),
        };
        if !valid {
            return Err(HarvestError::RecordMalformed(format!(
                "invalid observation date {year}-{month}-{day:?}"
            )));
        }
        Ok(Self { year, month, day })
    }

    /// Accepts `YYYY-MM-DD`, `YYYY-MM` and ISO timestamps with a date prefix.
    pub fn parse(text: &str) -> Result<Self, HarvestError> {
        let malformed = || HarvestError::RecordMalformed(format!("unparseable date {text:?}"));
        let date_part = text.trim().get(..10).unwrap_or(text.trim());
        let mut parts = date_part.split('-');
        let year = parts
            .next()
            .and_then(|part| part.parse::<i32>().ok())
            .ok_or_else(malformed)?;
        let month = parts
            .next()
            .and_then(|part| part.parse::<u32>().ok())
            .ok_or_else(malformed)?;
        let day = match parts.next() {
            Some(part) => Some(part.parse::<u32>().map_err(|_| malformed())?),
            None => None,
        };
        Self::new(year, month, day)
    }
}

/// Rejects non-finite, out-of-range and null-island coordinates.
pub fn validate_coordinates(latitude: f64, longitude: f64) -> Result<(f64, f64), HarvestError> {
    if !latitude.is_finite() || !longitude.is_finite() {
        return Err(HarvestError::RecordMalformed(
            "non-finite coordinates".to_string(),
        ));
    }
    if !(-90.0..=90.0).contains(&latitude) || !(-180.0..=180.0).contains(&longitude) {
        return Err(HarvestError::RecordMalformed(format!(
            "coordinates out of range: {latitude},{longitude}"
        )));
    }
    if latitude == 0.0 && longitude == 0.0 {
        return Err(HarvestError::RecordMalformed(
            "null island coordinates".to_string(),
        ));
    }
    Ok((latitude, longitude))
}

/// Parses a `"lat,lng"` pair.
pub fn parse_location_pair(text: &str) -> Result<(f64, f64), HarvestError> {
    let (lat, lng) = text
        .split_once(',')
        .ok_or_else(|| HarvestError::RecordMalformed(format!("bad location {text:?}")))?;
    let lat = lat
        .trim()
        .parse::<f64>()
        .map_err(|_| HarvestError::RecordMalformed(format!("bad latitude {lat:?}")))?;
    let lng = lng
        .trim()
        .parse::<f64>()
        .map_err(|_| HarvestError::RecordMalformed(format!("bad longitude {lng:?}")))?;
    validate_coordinates(lat, lng)
}
