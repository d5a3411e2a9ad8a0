use camino::Utf8PathBuf;
use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HarvestError {
    #[error("transient source failure: {0}")]
    TransientSource(String),

    #[error("source unavailable after {attempts} attempt(s): {message}")]
    SourceUnavailable { attempts: u32, message: String },

    #[error("source returned status {status}: {message}")]
    SourceStatus { status: u16, message: String },

    #[error("source request failed: {0}")]
    SourceHttp(String),

    #[error("malformed record: {0}")]
    RecordMalformed(String),

    #[error("record excluded: {0}")]
    RecordExcluded(String),

    #[error("progress store at {path} is corrupt: {message}")]
    #[diagnostic(help(
        "inspect or move the file aside; refusing to restart from scratch over existing progress"
    ))]
    ProgressStoreCorrupt { path: Utf8PathBuf, message: String },

    #[error("progress store at {0} is locked by another harvester")]
    #[diagnostic(help("remove the lock file if no other harvester is running"))]
    ProgressLocked(Utf8PathBuf),

    #[error("missing config file occ-harvest.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(Utf8PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid partition key: {0}")]
    InvalidPartitionKey(String),

    #[error("partition {partition} is not supported by source {source_name}")]
    UnsupportedPartition {
        partition: String,
        source_name: String,
    },

    #[error("unknown job: {0}")]
    UnknownJob(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl HarvestError {
    /// Failures scoped to one partition's fetch; the engine absorbs these
    /// and moves on to the next partition.
    pub fn is_source_failure(&self) -> bool {
        matches!(
            self,
            HarvestError::TransientSource(_)
                | HarvestError::SourceUnavailable { .. }
                | HarvestError::SourceStatus { .. }
                | HarvestError::SourceHttp(_)
                | HarvestError::UnsupportedPartition { .. }
        )
    }
}
