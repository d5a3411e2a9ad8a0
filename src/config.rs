use std::collections::BTreeSet;
use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::domain::{BasisOfRecord, Region, TaxonRef};
use crate::engine::HarvestLimits;
use crate::error::HarvestError;
use crate::partition::{
    BasisOfRecordEnumerator, BoundaryDayEnumerator, MonthlyTaxonEnumerator, PartitionEnumerator,
    PlaceEnumerator, TaxonEnumerator,
};
use crate::source::retry::RetryPolicy;
use crate::source::{gbif, inat};

pub const DEFAULT_CONFIG_FILE: &str = "occ-harvest.json";
pub const DEFAULT_DATA_DIR: &str = "occ-harvest-data";
pub const DEFAULT_RATE_LIMIT_MS: u64 = 1_000;
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BACKOFF_MS: u64 = 5_000;
pub const DEFAULT_MAX_RECORDS: u64 = 10_000;

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    pub region: Region,
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub jobs: Vec<JobEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct JobEntry {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub source: SourceEntry,
    pub partitions: PartitionPlan,
    #[serde(default)]
    pub page_size: Option<u32>,
    #[serde(default)]
    pub rate_limit_ms: Option<u64>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub retry: Option<RetryEntry>,
    /// When present, replaces the default caps entirely; omitted fields
    /// mean "no cap".
    #[serde(default)]
    pub caps: Option<HarvestLimits>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceEntry {
    Inat {
        #[serde(default)]
        base_url: Option<String>,
        #[serde(default)]
        quality_grade: Option<String>,
        #[serde(default)]
        source_tag: Option<String>,
    },
    Gbif {
        #[serde(default)]
        base_url: Option<String>,
        #[serde(default)]
        exclude_datasets: Option<Vec<String>>,
        #[serde(default)]
        source_tag: Option<String>,
    },
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PartitionPlan {
    TaxonMonth {
        taxa: Vec<TaxonEntry>,
        start_year: i32,
        end_year: i32,
    },
    BoundaryDays {
        taxa: Vec<TaxonEntry>,
        start_year: i32,
        end_year: i32,
    },
    BasisOfRecord {
        #[serde(default)]
        bases: Option<Vec<BasisOfRecord>>,
    },
    Taxa {
        taxa: Vec<TaxonEntry>,
    },
    Place {
        place_id: u64,
    },
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum TaxonEntry {
    Shorthand(u64),
    Detailed(TaxonEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct TaxonEntryObject {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct RetryEntry {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub backoff_ms: Option<u64>,
}

#[derive(Debug, Clone)]
pub enum SourceSpec {
    Inat(inat::InatSettings),
    Gbif(gbif::GbifSettings),
}

impl SourceSpec {
    pub fn name(&self) -> &'static str {
        match self {
            SourceSpec::Inat(_) => "inaturalist",
            SourceSpec::Gbif(_) => "gbif",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PartitionSpec {
    TaxonMonth {
        taxa: Vec<TaxonRef>,
        start_year: i32,
        end_year: i32,
    },
    BoundaryDays {
        taxa: Vec<TaxonRef>,
        start_year: i32,
        end_year: i32,
    },
    BasisOfRecord(Vec<BasisOfRecord>),
    Taxa(Vec<TaxonRef>),
    Place(u64),
}

impl PartitionSpec {
    pub fn taxa(&self) -> &[TaxonRef] {
        match self {
            PartitionSpec::TaxonMonth { taxa, .. }
            | PartitionSpec::BoundaryDays { taxa, .. }
            | PartitionSpec::Taxa(taxa) => taxa,
            PartitionSpec::BasisOfRecord(_) | PartitionSpec::Place(_) => &[],
        }
    }

    pub fn enumerator(&self) -> Box<dyn PartitionEnumerator> {
        match self {
            PartitionSpec::TaxonMonth {
                taxa,
                start_year,
                end_year,
            } => Box::new(MonthlyTaxonEnumerator {
                taxa: taxa.clone(),
                years: *start_year..=*end_year,
            }),
            PartitionSpec::BoundaryDays {
                taxa,
                start_year,
                end_year,
            } => Box::new(BoundaryDayEnumerator {
                taxa: taxa.clone(),
                years: *start_year..=*end_year,
            }),
            PartitionSpec::BasisOfRecord(bases) => Box::new(BasisOfRecordEnumerator {
                bases: bases.clone(),
            }),
            PartitionSpec::Taxa(taxa) => Box::new(TaxonEnumerator { taxa: taxa.clone() }),
            PartitionSpec::Place(place_id) => Box::new(PlaceEnumerator {
                place_id: *place_id,
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub struct JobConfig {
    pub name: String,
    pub description: String,
    pub source: SourceSpec,
    pub partitions: PartitionSpec,
    pub policy: RetryPolicy,
    pub timeout: Duration,
    pub limits: HarvestLimits,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub region: Region,
    pub data_dir: Utf8PathBuf,
    pub jobs: Vec<JobConfig>,
}

impl ResolvedConfig {
    pub fn job(&self, name: &str) -> Result<&JobConfig, HarvestError> {
        self.jobs
            .iter()
            .find(|job| job.name == name)
            .ok_or_else(|| HarvestError::UnknownJob(name.to_string()))
    }

    /// Jobs in config order; all of them when `names` is empty.
    pub fn select(&self, names: &[String]) -> Result<Vec<&JobConfig>, HarvestError> {
        if names.is_empty() {
            return Ok(self.jobs.iter().collect());
        }
        for name in names {
            self.job(name)?;
        }
        Ok(self
            .jobs
            .iter()
            .filter(|job| names.contains(&job.name))
            .collect())
    }

    pub fn job_dir(&self, job: &JobConfig) -> Utf8PathBuf {
        self.data_dir.join(&job.name)
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&str>) -> Result<ResolvedConfig, HarvestError> {
        let config_path = match path {
            Some(path) => Utf8PathBuf::from(path),
            None => Utf8PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(HarvestError::MissingConfig);
        }

        let content = fs::read_to_string(&config_path)
            .map_err(|_| HarvestError::ConfigRead(config_path.clone()))?;
        let config: Config = serde_json::from_str(&content)
            .map_err(|err| HarvestError::ConfigParse(err.to_string()))?;

        let base = config_path
            .parent()
            .filter(|parent| !parent.as_str().is_empty())
            .unwrap_or(Utf8Path::new("."));
        let mut resolved = Self::resolve_config(config)?;
        if resolved.data_dir.is_relative() {
            resolved.data_dir = base.join(&resolved.data_dir);
        }
        Ok(resolved)
    }

    pub fn resolve_config(config: Config) -> Result<ResolvedConfig, HarvestError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(HarvestError::InvalidConfig(format!(
                "unsupported schema_version {schema_version}"
            )));
        }
        config.region.bounds.validate()?;

        let mut seen = BTreeSet::new();
        let jobs = config
            .jobs
            .into_iter()
            .map(|entry| {
                let job = resolve_job(entry, &config.region)?;
                if !seen.insert(job.name.clone()) {
                    return Err(HarvestError::InvalidConfig(format!(
                        "duplicate job name {}",
                        job.name
                    )));
                }
                Ok(job)
            })
            .collect::<Result<Vec<_>, HarvestError>>()?;
        if jobs.is_empty() {
            return Err(HarvestError::InvalidConfig("no jobs configured".to_string()));
        }

        Ok(ResolvedConfig {
            schema_version,
            region: config.region,
            data_dir: Utf8PathBuf::from(config.data_dir.unwrap_or_else(|| DEFAULT_DATA_DIR.to_string())),
            jobs,
        })
    }
}

fn resolve_job(entry: JobEntry, region: &Region) -> Result<JobConfig, HarvestError> {
    let name = entry.name.trim().to_string();
    if name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
    {
        return Err(HarvestError::InvalidConfig(format!(
            "job name {:?} is not a valid directory name",
            entry.name
        )));
    }

    let partitions = resolve_partitions(entry.partitions)?;
    if partitions.enumerator().enumerate().is_empty() {
        return Err(HarvestError::InvalidConfig(format!(
            "job {name} has an empty partition universe"
        )));
    }

    let source = match entry.source {
        SourceEntry::Inat {
            base_url,
            quality_grade,
            source_tag,
        } => {
            if matches!(partitions, PartitionSpec::BasisOfRecord(_)) {
                return Err(HarvestError::InvalidConfig(format!(
                    "job {name}: inaturalist cannot page basis-of-record partitions"
                )));
            }
            SourceSpec::Inat(inat::InatSettings {
                base_url: base_url.unwrap_or_else(|| inat::DEFAULT_BASE_URL.to_string()),
                page_size: page_size(entry.page_size, inat::DEFAULT_PAGE_SIZE, &name)?,
                region: region.bounds,
                taxa: partitions.taxa().to_vec(),
                quality_grade,
                source_tag: source_tag.unwrap_or_else(|| "inaturalist".to_string()),
            })
        }
        SourceEntry::Gbif {
            base_url,
            exclude_datasets,
            source_tag,
        } => {
            if !matches!(partitions, PartitionSpec::BasisOfRecord(_)) {
                return Err(HarvestError::InvalidConfig(format!(
                    "job {name}: gbif pages basis-of-record partitions only"
                )));
            }
            SourceSpec::Gbif(gbif::GbifSettings {
                base_url: base_url.unwrap_or_else(|| gbif::DEFAULT_BASE_URL.to_string()),
                page_size: page_size(entry.page_size, gbif::DEFAULT_PAGE_SIZE, &name)?,
                region: region.bounds,
                exclude_datasets: exclude_datasets
                    .unwrap_or_else(|| vec!["inaturalist".to_string()])
                    .into_iter()
                    .map(|dataset| dataset.to_lowercase())
                    .collect(),
                source_tag: source_tag.unwrap_or_else(|| "gbif_specimen".to_string()),
            })
        }
    };

    let retry = entry.retry.unwrap_or_default();
    let max_attempts = retry.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS);
    if max_attempts == 0 {
        return Err(HarvestError::InvalidConfig(format!(
            "job {name}: retry.max_attempts must be at least 1"
        )));
    }
    let policy = RetryPolicy::new(
        max_attempts,
        Duration::from_millis(retry.backoff_ms.unwrap_or(DEFAULT_BACKOFF_MS)),
        Duration::from_millis(entry.rate_limit_ms.unwrap_or(DEFAULT_RATE_LIMIT_MS)),
    );

    let description = entry
        .description
        .unwrap_or_else(|| format!("{} occurrences in {}", source.name(), region.name));

    Ok(JobConfig {
        name,
        description,
        source,
        partitions,
        policy,
        timeout: Duration::from_secs(entry.timeout_secs.unwrap_or(DEFAULT_TIMEOUT_SECS)),
        limits: entry.caps.unwrap_or(HarvestLimits {
            max_pages: None,
            max_records: Some(DEFAULT_MAX_RECORDS),
        }),
    })
}

fn page_size(value: Option<u32>, default: u32, job: &str) -> Result<u32, HarvestError> {
    match value.unwrap_or(default) {
        0 => Err(HarvestError::InvalidConfig(format!(
            "job {job}: page_size must be positive"
        ))),
        size => Ok(size),
    }
}

fn resolve_partitions(plan: PartitionPlan) -> Result<PartitionSpec, HarvestError> {
    Ok(match plan {
        PartitionPlan::TaxonMonth {
            taxa,
            start_year,
            end_year,
        } => {
            check_years(start_year, end_year)?;
            PartitionSpec::TaxonMonth {
                taxa: resolve_taxa(taxa)?,
                start_year,
                end_year,
            }
        }
        PartitionPlan::BoundaryDays {
            taxa,
            start_year,
            end_year,
        } => {
            check_years(start_year, end_year)?;
            PartitionSpec::BoundaryDays {
                taxa: resolve_taxa(taxa)?,
                start_year,
                end_year,
            }
        }
        PartitionPlan::BasisOfRecord { bases } => {
            PartitionSpec::BasisOfRecord(bases.unwrap_or_else(BasisOfRecord::specimens))
        }
        PartitionPlan::Taxa { taxa } => PartitionSpec::Taxa(resolve_taxa(taxa)?),
        PartitionPlan::Place { place_id } => PartitionSpec::Place(place_id),
    })
}

fn check_years(start_year: i32, end_year: i32) -> Result<(), HarvestError> {
    if start_year > end_year {
        return Err(HarvestError::InvalidConfig(format!(
            "year range {start_year}..={end_year} is empty"
        )));
    }
    Ok(())
}

fn resolve_taxa(entries: Vec<TaxonEntry>) -> Result<Vec<TaxonRef>, HarvestError> {
    let mut seen = BTreeSet::new();
    entries
        .into_iter()
        .map(|entry| {
            let taxon = match entry {
                TaxonEntry::Shorthand(id) => TaxonRef {
                    id,
                    name: format!("taxon {id}"),
                },
                TaxonEntry::Detailed(obj) => TaxonRef {
                    id: obj.id,
                    name: obj.name.unwrap_or_else(|| format!("taxon {}", obj.id)),
                },
            };
            if !seen.insert(taxon.id) {
                return Err(HarvestError::InvalidConfig(format!(
                    "taxon {} listed twice",
                    taxon.id
                )));
            }
            Ok(taxon)
        })
        .collect()
}
