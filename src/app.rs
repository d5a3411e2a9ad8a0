use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::info;

use crate::config::{JobConfig, PartitionSpec, ResolvedConfig, SourceSpec};
use crate::engine::{HarvestEngine, RunSummary};
use crate::error::HarvestError;
use crate::output::OperationalLog;
use crate::partition::{PartitionEnumerator, TruncatedMonthSplitter};
use crate::progress::{ProgressStore, Tally};
use crate::sink::{CollectionMetadata, DedupSink};
use crate::source::PagedSource;
use crate::source::gbif::GbifSource;
use crate::source::inat::InatSource;

pub use crate::engine::{ProgressEvent, ProgressSink};

pub const COLLECTION_FILE: &str = "collection.geojson";
pub const LOG_FILE: &str = "harvest.log";

#[derive(Debug, Clone, Serialize)]
pub struct HarvestResult {
    pub jobs: Vec<JobReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job: String,
    pub source: String,
    pub universe: String,
    pub summary: RunSummary,
    pub collection_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResult {
    pub jobs: Vec<JobStatus>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobStatus {
    pub job: String,
    pub source: String,
    pub universe: String,
    pub tally: Tally,
    /// Truncated monthly partitions that `refine` would split by day.
    pub refinable_months: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinalizeResult {
    pub jobs: Vec<FinalizeEntry>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FinalizeEntry {
    pub job: String,
    pub records: usize,
    pub collection_path: String,
}

/// Builds the adapter for a job; swapped out in tests.
pub trait SourceFactory {
    fn build(&self, job: &JobConfig) -> Result<Box<dyn PagedSource>, HarvestError>;
}

pub struct HttpSources;

impl SourceFactory for HttpSources {
    fn build(&self, job: &JobConfig) -> Result<Box<dyn PagedSource>, HarvestError> {
        let source: Box<dyn PagedSource> = match &job.source {
            SourceSpec::Inat(settings) => {
                Box::new(InatSource::new(settings.clone(), job.policy, job.timeout)?)
            }
            SourceSpec::Gbif(settings) => {
                Box::new(GbifSource::new(settings.clone(), job.policy, job.timeout)?)
            }
        };
        Ok(source)
    }
}

pub struct App<F: SourceFactory> {
    config: ResolvedConfig,
    sources: F,
}

impl<F: SourceFactory> App<F> {
    pub fn new(config: ResolvedConfig, sources: F) -> Self {
        Self { config, sources }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    pub fn store_for(&self, job: &JobConfig) -> ProgressStore {
        ProgressStore::new(self.config.job_dir(job))
    }

    /// Runs the selected jobs one after another, each to the end of its
    /// universe, and rewrites their collections.
    pub fn harvest(
        &self,
        jobs: &[String],
        events: &dyn ProgressSink,
    ) -> Result<HarvestResult, HarvestError> {
        let mut reports = Vec::new();
        for job in self.config.select(jobs)? {
            let enumerator = job.partitions.enumerator();
            reports.push(self.run_job(job, enumerator.as_ref(), events)?);
        }
        Ok(HarvestResult { jobs: reports })
    }

    /// Re-harvests truncated months day by day into the same store.
    pub fn refine(
        &self,
        jobs: &[String],
        events: &dyn ProgressSink,
    ) -> Result<HarvestResult, HarvestError> {
        let mut reports = Vec::new();
        for job in self.config.select(jobs)? {
            if !matches!(job.partitions, PartitionSpec::TaxonMonth { .. }) {
                if !jobs.is_empty() {
                    return Err(HarvestError::InvalidConfig(format!(
                        "job {} is not partitioned by taxon and month",
                        job.name
                    )));
                }
                continue;
            }
            let store = self.store_for(job);
            let splitter = TruncatedMonthSplitter::from_progress(&store.load()?);
            if splitter.months().is_empty() {
                info!(job = %job.name, "no truncated months to refine");
                continue;
            }
            reports.push(self.run_job(job, &splitter, events)?);
        }
        Ok(HarvestResult { jobs: reports })
    }

    /// Offline view of every selected job's progress.
    pub fn status(&self, jobs: &[String]) -> Result<StatusResult, HarvestError> {
        let mut statuses = Vec::new();
        for job in self.config.select(jobs)? {
            let enumerator = job.partitions.enumerator();
            let progress = self.store_for(job).load()?;
            let refinable_months = match job.partitions {
                PartitionSpec::TaxonMonth { .. } => {
                    TruncatedMonthSplitter::from_progress(&progress).months().len()
                }
                _ => 0,
            };
            statuses.push(JobStatus {
                job: job.name.clone(),
                source: job.source.name().to_string(),
                universe: enumerator.describe(),
                tally: progress.tally(&enumerator.enumerate()),
                refinable_months,
            });
        }
        Ok(StatusResult { jobs: statuses })
    }

    /// Rebuilds collections from the journal without touching the network.
    pub fn finalize(&self, jobs: &[String]) -> Result<FinalizeResult, HarvestError> {
        let mut entries = Vec::new();
        for job in self.config.select(jobs)? {
            let store = self.store_for(job);
            let _lock = store.lock()?;
            let sink = DedupSink::from_records(store.load_records()?);
            let path = self.write_collection(job, &store, &sink)?;
            entries.push(FinalizeEntry {
                job: job.name.clone(),
                records: sink.len(),
                collection_path: path.to_string(),
            });
        }
        Ok(FinalizeResult { jobs: entries })
    }

    fn run_job(
        &self,
        job: &JobConfig,
        enumerator: &dyn PartitionEnumerator,
        events: &dyn ProgressSink,
    ) -> Result<JobReport, HarvestError> {
        let store = self.store_for(job);
        let _lock = store.lock()?;
        let source = self.sources.build(job)?;
        let mut sink = DedupSink::from_records(store.load_records()?);
        let log = OperationalLog::new(store.dir().join(LOG_FILE), events);

        info!(job = %job.name, dir = %store.dir(), "running job");
        let engine = HarvestEngine::new(source.as_ref(), &store, job.limits);
        let summary = engine.run(enumerator, &mut sink, &log)?;
        let path = self.write_collection(job, &store, &sink)?;

        Ok(JobReport {
            job: job.name.clone(),
            source: source.name().to_string(),
            universe: enumerator.describe(),
            summary,
            collection_path: path.to_string(),
        })
    }

    fn write_collection(
        &self,
        job: &JobConfig,
        store: &ProgressStore,
        sink: &DedupSink,
    ) -> Result<Utf8PathBuf, HarvestError> {
        let collection = sink.finalize(CollectionMetadata::now(
            job.description.clone(),
            self.config.region.name.clone(),
        ));
        let path = store.dir().join(COLLECTION_FILE);
        collection.write_to(&path)?;
        info!(job = %job.name, records = collection.len(), path = %path, "collection written");
        Ok(path)
    }
}
