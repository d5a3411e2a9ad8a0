use std::collections::BTreeMap;
use std::time::Duration;

use serde_json::Value;

use crate::domain::{BoundingBox, Cursor, PartitionKey, TaxonRef};
use crate::error::HarvestError;
use crate::partition::monthly_window_end;
use crate::record::{NormalizedRecord, ObservedDate, RawRecord, parse_location_pair, validate_coordinates};
use crate::source::http::HttpJson;
use crate::source::retry::{Attempt, RetryPolicy};
use crate::source::{Page, PagedSource, cursor_mismatch, unsupported};

pub const DEFAULT_BASE_URL: &str = "https://api.inaturalist.org/v1/observations";
pub const DEFAULT_PAGE_SIZE: u32 = 200;

#[derive(Debug, Clone)]
pub struct InatSettings {
    pub base_url: String,
    pub page_size: u32,
    pub region: BoundingBox,
    pub taxa: Vec<TaxonRef>,
    pub quality_grade: Option<String>,
    pub source_tag: String,
}

pub struct InatSource {
    http: HttpJson,
    policy: RetryPolicy,
    settings: InatSettings,
}

impl InatSource {
    pub fn new(
        settings: InatSettings,
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

impl PagedSource for InatSource {
    fn name(&self) -> &str {
        "inaturalist"
    }

    fn initial_cursor(&self, partition: &PartitionKey) -> Result<Cursor, HarvestError> {
        match partition {
            PartitionKey::TaxonMonth { .. }
            | PartitionKey::TaxonDay { .. }
            | PartitionKey::Taxon { .. } => Ok(Cursor::Page(1)),
            PartitionKey::Place { .. } => Ok(Cursor::IdAbove(0)),
            PartitionKey::Basis(_) => Err(unsupported(self.name(), partition)),
        }
    }

    fn fetch_page(&self, partition: &PartitionKey, cursor: &Cursor) -> Result<Page, HarvestError> {
        let query = build_query(&self.settings, partition, cursor)?;
        let label = format!("inat {partition} {cursor}");
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
        normalize_observation(&self.settings, partition, raw)
    }
}

pub fn build_query(
    settings: &InatSettings,
    partition: &PartitionKey,
    cursor: &Cursor,
) -> Result<Vec<(&'static str, String)>, HarvestError> {
    let mut query = vec![("per_page", settings.page_size.to_string())];
    let bounds = |query: &mut Vec<(&'static str, String)>| {
        query.push(("swlat", settings.region.min_lat.to_string()));
        query.push(("swlng", settings.region.min_lng.to_string()));
        query.push(("nelat", settings.region.max_lat.to_string()));
        query.push(("nelng", settings.region.max_lng.to_string()));
    };

    match (partition, cursor) {
        (
            PartitionKey::TaxonMonth {
                taxon_id,
                year,
                month,
            },
            Cursor::Page(page),
        ) => {
            query.push(("taxon_id", taxon_id.to_string()));
            bounds(&mut query);
            query.push(("d1", format!("{year:04}-{month:02}-01")));
            query.push((
                "d2",
                format!("{year:04}-{month:02}-{:02}", monthly_window_end(*month)),
            ));
            query.push(("order_by", "observed_on".to_string()));
            query.push(("page", page.to_string()));
        }
        (
            PartitionKey::TaxonDay {
                taxon_id,
                year,
                month,
                day,
            },
            Cursor::Page(page),
        ) => {
            let date = format!("{year:04}-{month:02}-{day:02}");
            query.push(("taxon_id", taxon_id.to_string()));
            bounds(&mut query);
            query.push(("d1", date.clone()));
            query.push(("d2", date));
            query.push(("order_by", "observed_on".to_string()));
            query.push(("page", page.to_string()));
        }
        (PartitionKey::Taxon { taxon_id }, Cursor::Page(page)) => {
            query.push(("taxon_id", taxon_id.to_string()));
            bounds(&mut query);
            query.push(("order_by", "observed_on".to_string()));
            query.push(("page", page.to_string()));
        }
        (PartitionKey::Place { place_id }, Cursor::IdAbove(id)) => {
            query.push(("place_id", place_id.to_string()));
            query.push(("order", "asc".to_string()));
            query.push(("order_by", "id".to_string()));
            query.push(("id_above", id.to_string()));
        }
        (PartitionKey::Basis(_), _) => return Err(unsupported("inaturalist", partition)),
        _ => return Err(cursor_mismatch("inaturalist", partition, cursor)),
    }

    if let Some(grade) = &settings.quality_grade {
        query.push(("quality_grade", grade.clone()));
    }
    Ok(query)
}

pub fn parse_page(value: &Value, page_size: u32, cursor: &Cursor) -> Result<Page, HarvestError> {
    let results = value
        .get("results")
        .and_then(Value::as_array)
        .ok_or_else(|| {
            HarvestError::TransientSource("malformed payload: missing results".to_string())
        })?;
    let total_hint = value.get("total_results").and_then(Value::as_u64);
    let records = results
        .iter()
        .cloned()
        .map(RawRecord)
        .collect::<Vec<_>>();

    let exhausted = records.is_empty() || records.len() < page_size as usize;
    let next_cursor = if exhausted {
        None
    } else {
        match cursor {
            Cursor::Page(page) => Some(Cursor::Page(page + 1)),
            Cursor::IdAbove(_) => {
                let last_id = records.last().and_then(|last| last.u64_field("id")).ok_or_else(
                    || HarvestError::TransientSource("malformed payload: last id missing".to_string()),
                )?;
                Some(Cursor::IdAbove(last_id))
            }
            Cursor::Offset(offset) => Some(Cursor::Offset(offset + records.len() as u64)),
        }
    };

    Ok(Page {
        records,
        next_cursor,
        total_hint,
    })
}

pub fn normalize_observation(
    settings: &InatSettings,
    partition: &PartitionKey,
    raw: &RawRecord,
) -> Result<NormalizedRecord, HarvestError> {
    let id = raw
        .u64_field("id")
        .ok_or_else(|| HarvestError::RecordMalformed("observation without id".to_string()))?;
    let (latitude, longitude) = observation_coordinates(raw)?;

    let taxon = RawRecord(raw.get("taxon").cloned().unwrap_or(Value::Null));
    let species_name = taxon.str_field("name").unwrap_or("Unknown").to_string();
    let taxon_group = partition
        .taxon_id()
        .and_then(|taxon_id| settings.taxa.iter().find(|taxon| taxon.id == taxon_id))
        .map(|taxon| taxon.name.clone())
        .or_else(|| taxon.str_field("iconic_taxon_name").map(str::to_string))
        .unwrap_or_else(|| "Unknown".to_string());

    let date = match raw.str_field("observed_on") {
        Some(text) => ObservedDate::parse(text)?,
        None => match partition {
            PartitionKey::TaxonDay {
                year, month, day, ..
            } => ObservedDate::new(*year, *month, Some(*day))?,
            PartitionKey::TaxonMonth { year, month, .. } => ObservedDate::new(*year, *month, None)?,
            _ => {
                return Err(HarvestError::RecordMalformed(format!(
                    "observation {id} has no date"
                )));
            }
        },
    };

    let mut attributes = BTreeMap::new();
    if let Some(common) = taxon.str_field("preferred_common_name") {
        attributes.insert("common_name".to_string(), common.to_string());
    }
    if let Some(grade) = raw.str_field("quality_grade") {
        attributes.insert("quality_grade".to_string(), grade.to_string());
    }

    Ok(NormalizedRecord {
        identity: format!("inat_{id}"),
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

fn observation_coordinates(raw: &RawRecord) -> Result<(f64, f64), HarvestError> {
    if let Some(location) = raw.str_field("location") {
        return parse_location_pair(location);
    }
    let coordinates = raw
        .get("geojson")
        .and_then(|geojson| geojson.get("coordinates"))
        .and_then(Value::as_array)
        .ok_or_else(|| HarvestError::RecordMalformed("observation without location".to_string()))?;
    match coordinates.as_slice() {
        [lng, lat] => {
            let lng = lng.as_f64();
            let lat = lat.as_f64();
            match (lat, lng) {
                (Some(lat), Some(lng)) => validate_coordinates(lat, lng),
                _ => Err(HarvestError::RecordMalformed(
                    "null geojson coordinates".to_string(),
                )),
            }
        }
        _ => Err(HarvestError::RecordMalformed(
            "geojson coordinates are not a point".to_string(),
        )),
    }
}
