use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::HarvestError;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl BoundingBox {
    pub fn validate(&self) -> Result<(), HarvestError> {
        let lat_ok = (-90.0..=90.0).contains(&self.min_lat) && (-90.0..=90.0).contains(&self.max_lat);
        let lng_ok =
            (-180.0..=180.0).contains(&self.min_lng) && (-180.0..=180.0).contains(&self.max_lng);
        if !lat_ok || !lng_ok {
            return Err(HarvestError::InvalidConfig(format!(
                "bounding box out of WGS84 range: {self}"
            )));
        }
        if self.min_lat >= self.max_lat || self.min_lng >= self.max_lng {
            return Err(HarvestError::InvalidConfig(format!(
                "bounding box corners are not ordered: {self}"
            )));
        }
        Ok(())
    }

    /// Counter-clockwise WKT ring, as GBIF expects for `geometry`.
    pub fn to_wkt_polygon(&self) -> String {
        format!(
            "POLYGON(({w} {s},{e} {s},{e} {n},{w} {n},{w} {s}))",
            w = self.min_lng,
            e = self.max_lng,
            s = self.min_lat,
            n = self.max_lat
        )
    }
}

impl fmt::Display for BoundingBox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lat {}..{}, lng {}..{}",
            self.min_lat, self.max_lat, self.min_lng, self.max_lng
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub name: String,
    #[serde(flatten)]
    pub bounds: BoundingBox,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaxonRef {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BasisOfRecord {
    PreservedSpecimen,
    FossilSpecimen,
    LivingSpecimen,
    MaterialSample,
    MaterialCitation,
    HumanObservation,
    MachineObservation,
    Observation,
    Occurrence,
}

impl BasisOfRecord {
    pub fn as_str(&self) -> &'static str {
        match self {
            BasisOfRecord::PreservedSpecimen => "PRESERVED_SPECIMEN",
            BasisOfRecord::FossilSpecimen => "FOSSIL_SPECIMEN",
            BasisOfRecord::LivingSpecimen => "LIVING_SPECIMEN",
            BasisOfRecord::MaterialSample => "MATERIAL_SAMPLE",
            BasisOfRecord::MaterialCitation => "MATERIAL_CITATION",
            BasisOfRecord::HumanObservation => "HUMAN_OBSERVATION",
            BasisOfRecord::MachineObservation => "MACHINE_OBSERVATION",
            BasisOfRecord::Observation => "OBSERVATION",
            BasisOfRecord::Occurrence => "OCCURRENCE",
        }
    }

    pub fn specimens() -> Vec<BasisOfRecord> {
        vec![
            BasisOfRecord::PreservedSpecimen,
            BasisOfRecord::FossilSpecimen,
            BasisOfRecord::LivingSpecimen,
            BasisOfRecord::MaterialSample,
        ]
    }
}

impl fmt::Display for BasisOfRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BasisOfRecord {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let basis = match value.trim().to_uppercase().as_str() {
            "PRESERVED_SPECIMEN" => BasisOfRecord::PreservedSpecimen,
            "FOSSIL_SPECIMEN" => BasisOfRecord::FossilSpecimen,
            "LIVING_SPECIMEN" => BasisOfRecord::LivingSpecimen,
            "MATERIAL_SAMPLE" => BasisOfRecord::MaterialSample,
            "MATERIAL_CITATION" => BasisOfRecord::MaterialCitation,
            "HUMAN_OBSERVATION" => BasisOfRecord::HumanObservation,
            "MACHINE_OBSERVATION" => BasisOfRecord::MachineObservation,
            "OBSERVATION" => BasisOfRecord::Observation,
            "OCCURRENCE" => BasisOfRecord::Occurrence,
            _ => return Err(HarvestError::InvalidPartitionKey(value.to_string())),
        };
        Ok(basis)
    }
}

/// One disjoint unit of harvesting work.
///
/// The string form (see `Display`) is the key persisted in the progress
/// file; `FromStr` accepts exactly that form and nothing else.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum PartitionKey {
    TaxonMonth {
        taxon_id: u64,
        year: i32,
        month: u32,
    },
    TaxonDay {
        taxon_id: u64,
        year: i32,
        month: u32,
        day: u32,
    },
    Basis(BasisOfRecord),
    Taxon {
        taxon_id: u64,
    },
    Place {
        place_id: u64,
    },
}

impl PartitionKey {
    pub fn taxon_id(&self) -> Option<u64> {
        match self {
            PartitionKey::TaxonMonth { taxon_id, .. }
            | PartitionKey::TaxonDay { taxon_id, .. }
            | PartitionKey::Taxon { taxon_id } => Some(*taxon_id),
            PartitionKey::Basis(_) | PartitionKey::Place { .. } => None,
        }
    }

    pub fn year_month(&self) -> Option<(i32, u32)> {
        match self {
            PartitionKey::TaxonMonth { year, month, .. }
            | PartitionKey::TaxonDay { year, month, .. } => Some((*year, *month)),
            _ => None,
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionKey::TaxonMonth {
                taxon_id,
                year,
                month,
            } => write!(f, "taxon-month/{taxon_id}/{year:04}-{month:02}"),
            PartitionKey::TaxonDay {
                taxon_id,
                year,
                month,
                day,
            } => write!(f, "taxon-day/{taxon_id}/{year:04}-{month:02}-{day:02}"),
            PartitionKey::Basis(basis) => write!(f, "basis/{basis}"),
            PartitionKey::Taxon { taxon_id } => write!(f, "taxon/{taxon_id}"),
            PartitionKey::Place { place_id } => write!(f, "place/{place_id}"),
        }
    }
}

impl FromStr for PartitionKey {
    type Err = HarvestError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || HarvestError::InvalidPartitionKey(value.to_string());
        let parts = value.split('/').collect::<Vec<_>>();
        let key = match parts.as_slice() {
            ["taxon-month", taxon, ym] => {
                let (year, month) = ym.split_once('-').ok_or_else(invalid)?;
                let year = year.parse::<i32>().map_err(|_| invalid())?;
                let month = month.parse::<u32>().map_err(|_| invalid())?;
                NaiveDate::from_ymd_opt(year, month, 1).ok_or_else(invalid)?;
                PartitionKey::TaxonMonth {
                    taxon_id: taxon.parse().map_err(|_| invalid())?,
                    year,
                    month,
                }
            }
            ["taxon-day", taxon, ymd] => {
                let date = NaiveDate::parse_from_str(ymd, "%Y-%m-%d").map_err(|_| invalid())?;
                PartitionKey::TaxonDay {
                    taxon_id: taxon.parse().map_err(|_| invalid())?,
                    year: chrono::Datelike::year(&date),
                    month: chrono::Datelike::month(&date),
                    day: chrono::Datelike::day(&date),
                }
            }
            ["basis", basis] => PartitionKey::Basis(basis.parse()?),
            ["taxon", taxon] => PartitionKey::Taxon {
                taxon_id: taxon.parse().map_err(|_| invalid())?,
            },
            ["place", place] => PartitionKey::Place {
                place_id: place.parse().map_err(|_| invalid())?,
            },
            _ => return Err(invalid()),
        };
        if key.to_string() != value {
            return Err(invalid());
        }
        Ok(key)
    }
}

impl From<PartitionKey> for String {
    fn from(key: PartitionKey) -> Self {
        key.to_string()
    }
}

impl TryFrom<String> for PartitionKey {
    type Error = HarvestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// Adapter-specific resume position within a partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Cursor {
    Page(u32),
    Offset(u64),
    IdAbove(u64),
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cursor::Page(page) => write!(f, "page={page}"),
            Cursor::Offset(offset) => write!(f, "offset={offset}"),
            Cursor::IdAbove(id) => write!(f, "id_above={id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStatus {
    #[default]
    Pending,
    InProgress,
    Complete,
    Truncated,
}

impl PartitionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, PartitionStatus::Complete | PartitionStatus::Truncated)
    }
}

impl fmt::Display for PartitionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionStatus::Pending => write!(f, "pending"),
            PartitionStatus::InProgress => write!(f, "in_progress"),
            PartitionStatus::Complete => write!(f, "complete"),
            PartitionStatus::Truncated => write!(f, "truncated"),
        }
    }
}

/// Which safety cap ended a `Truncated` partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Truncation {
    PageCap,
    RecordCap,
    TotalHint,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionState {
    #[serde(default)]
    pub status: PartitionStatus,
    #[serde(default)]
    pub records_fetched: u64,
    #[serde(default)]
    pub records_added: u64,
    #[serde(default)]
    pub pages_fetched: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<Cursor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub truncation: Option<Truncation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
}

impl PartitionState {
    pub fn pending() -> Self {
        Self::default()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
