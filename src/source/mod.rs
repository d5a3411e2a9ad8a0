//! Paged source adapters.
//!
//! Each remote API implements [`PagedSource`]; the harvest engine only
//! ever sees pages, cursors and normalized records.

pub mod gbif;
pub mod http;
pub mod inat;
pub mod retry;

use crate::domain::{Cursor, PartitionKey};
use crate::error::HarvestError;
use crate::record::{NormalizedRecord, RawRecord};

#[derive(Debug, Clone, PartialEq)]
pub struct Page {
    pub records: Vec<RawRecord>,
    /// `None` once the source has no further pages for the partition.
    pub next_cursor: Option<Cursor>,
    pub total_hint: Option<u64>,
}

pub trait PagedSource: Send + Sync {
    fn name(&self) -> &str;

    fn initial_cursor(&self, partition: &PartitionKey) -> Result<Cursor, HarvestError>;

    fn fetch_page(&self, partition: &PartitionKey, cursor: &Cursor) -> Result<Page, HarvestError>;

    /// Turns one raw record into the common shape. `RecordMalformed` and
    /// `RecordExcluded` drop just that record.
    fn normalize(
        &self,
        partition: &PartitionKey,
        raw: &RawRecord,
    ) -> Result<NormalizedRecord, HarvestError>;
}

pub(crate) fn unsupported(source: &str, partition: &PartitionKey) -> HarvestError {
    HarvestError::UnsupportedPartition {
        partition: partition.to_string(),
        source_name: source.to_string(),
    }
}

pub(crate) fn cursor_mismatch(source: &str, partition: &PartitionKey, cursor: &Cursor) -> HarvestError {
    HarvestError::UnsupportedPartition {
        partition: format!("{partition} at {cursor}"),
        source_name: source.to_string(),
    }
}
