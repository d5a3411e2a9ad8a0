use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;

use crate::domain::{BoundingBox, Cursor, PartitionKey};
use crate::error::HarvestError;
use crate::record::{NormalizedRecord, ObservedDate, RawRecord, validate_coordinates};
use crate::source::http::HttpJson;
use crate::source::retry::{Attempt, RetryPolicy};
use crate::source::{Page, PagedSource, cursor_mismatch, unsupported};

pub const DEFAULT_BASE_URL: &str = "https://api.gbif.org/v1/occurrence/search";
pub const DEFAULT_PAGE_SIZE: u32 = 300;

#[derive(Debug, Clone)]
pub struct GbifSettings {
    pub base_url: String,
    pub page_size: u32,
    pub region: BoundingBox,
    /// Lower-case substrings of dataset names whose records are dropped.
    pub exclude_datasets: Vec<String>,
    pub source_tag: String,
}

pub struct GbifSource {
    http: HttpJson,
    policy: RetryPolicy,
    settings: GbifSettings,
}

impl GbifSource {
    pub fn new(
        settings: GbifSettings,
        policy: RetryPolicy,
        timeout: Duration,
    ) -> Result<Self, HarvestError> {
        Ok(Self {
            http: HttpJson::new(timeout)?,
            policy,
            settings,
        })
    }
}

impl PagedSource for GbifSource {
    fn name(&self) -> &str {
        "gbif"
    }

    fn initial_cursor(&self, partition: &PartitionKey) -> Result<Cursor, HarvestError> {
        match partition {
            PartitionKey::Basis(_) => Ok(Cursor::Offset(0)),
            _ => Err(unsupported(self.name(), partition)),
        }
    }

    fn fetch_page(&self, partition: &PartitionKey, cursor: &Cursor) -> Result<Page, HarvestError> {
        let query = build_query(&self.settings, partition, cursor)?;
        let label = format!("gbif {partition} {cursor}");
        let page_size = self.settings.page_size;
        self.policy.execute(&label, |_| {
            self.http
                .get_json(&self.settings.base_url, &query)
                .and_then(|value| match parse_page(&value, page_size, cursor) {
                    Ok(page) => Attempt::Done(page),
                    Err(err) => Attempt::Retry(err),
                })
        })
    }

    fn normalize(
        &self,
        partition: &PartitionKey,
        raw: &RawRecord,
    ) -> Result<NormalizedRecord, HarvestError> {
        normalize_occurrence(&self.settings, partition, raw)
    }
}

pub fn build_query(
    settings: &GbifSettings,
    partition: &PartitionKey,
    cursor: &Cursor,
) -> Result<Vec<(&'static str, String)>, HarvestError> {
    let PartitionKey::Basis(basis) = partition else {
        return Err(unsupported("gbif", partition));
    };
    let Cursor::Offset(offset) = cursor else {
        return Err(cursor_mismatch("gbif", partition, cursor));
    };
    Ok(vec![
        ("geometry", settings.region.to_wkt_polygon()),
        ("basisOfRecord", basis.as_str().to_string()),
        ("hasCoordinate", "true".to_string()),
        ("hasGeospatialIssue", "false".to_string()),
        ("limit", settings.page_size.to_string()),
        ("offset", offset.to_string()),
    ])
}

pub fn parse_page(value: &Value, page_size: u32, cursor: &Cursor) -> Result<Page, HarvestError> {
    let results = value
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            HarvestError::TransientSource("malformed payload: missing results".to_string())
        })?;
    let end_of_records = value
        .get("endOfRecords")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    let total_hint = value.get("count").and_then(Value::as_u64);
    let records = results.iter().cloned().map(RawRecord).collect::<Vec<_>>();

    let offset = match cursor {
        Cursor::Offset(offset) => *offset,
        _ => 0,
    };
    let exhausted = end_of_records || records.is_empty() || records.len() < page_size as usize;
    let next_cursor = (!exhausted).then(|| Cursor::Offset(offset + records.len() as u64));

    Ok(Page {
        records,
        next_cursor,
        total_hint,
    })
}

pub fn normalize_occurrence(
    settings: &GbifSettings,
    partition: &PartitionKey,
    raw: &RawRecord,
) -> Result<NormalizedRecord, HarvestError> {
    let id = raw
        .u64_field("gbifID")
        .or_else(|| raw.u64_field("key"))
        .ok_or_else(|| HarvestError::RecordMalformed("occurrence without gbifID".to_string()))?;

    if let Some(dataset) = raw.str_field("datasetName") {
        let dataset = dataset.to_lowercase();
        if settings
            .exclude_datasets
            .iter()
            .any(|excluded| dataset.contains(excluded.as_str()))
        {
            return Err(HarvestError::RecordExcluded(format!(
                "gbif_{id} from dataset {dataset}"
            )));
        }
    }

    let latitude = raw.f64_field("decimalLatitude");
    let longitude = raw.f64_field("decimalLongitude");
    let (latitude, longitude) = match (latitude, longitude) {
        (Some(lat), Some(lng)) => validate_coordinates(lat, lng)?,
        _ => {
            return Err(HarvestError::RecordMalformed(format!(
                "gbif_{id} has no coordinates"
            )));
        }
    };

    let year = raw
        .get("year")
        .and_then(Value::as_i64)
        .and_then(|year| i32::try_from(year).ok());
    let month = raw
        .u64_field("month")
        .and_then(|month| u32::try_from(month).ok());
    let day = raw.u64_field("day").and_then(|day| u32::try_from(day).ok());
    let date = match (year, month) {
        (Some(year), Some(month)) => ObservedDate::new(year, month, day)?,
        _ => match raw.str_field("eventDate") {
            Some(text) => ObservedDate::parse(text)?,
            None => {
                return Err(HarvestError::RecordMalformed(format!(
                    "gbif_{id} has no event date"
                )));
            }
        },
    };

    let species_name = ["vernacularName", "species", "genus"]
        .iter()
        .find_map(|field| raw.str_field(field))
        .unwrap_or("Unknown")
        .to_string();
    let taxon_group = ["class", "kingdom"]
        .iter()
        .find_map(|field| raw.str_field(field))
        .unwrap_or("Unknown")
        .to_string();

    let mut attributes = BTreeMap::new();
    for (field, name) in [
        ("scientificName", "scientific_name"),
        ("family", "family"),
        ("order", "order"),
        ("kingdom", "kingdom"),
        ("institutionCode", "institution"),
        ("collectionCode", "collection"),
        ("catalogNumber", "catalog_number"),
        ("recordedBy", "recorded_by"),
    ] {
        if let Some(value) = raw.str_field(field) {
            attributes.insert(name.to_string(), value.to_string());
        }
    }
    let basis = match partition {
        PartitionKey::Basis(basis) => Some(basis.as_str().to_string()),
        _ => raw.str_field("basisOfRecord").map(str::to_string),
    };
    if let Some(basis) = basis {
        attributes.insert("basis_of_record".to_string(), basis);
    }

    Ok(NormalizedRecord {
        identity: format!("gbif_{id}"),
        species_name,
        taxon_group,
        latitude,
        longitude,
        observed_year: date.year,
        observed_month: date.month,
        observed_day: date.day,
        source_tag: settings.source_tag.clone(),
        attributes,
    })
}
