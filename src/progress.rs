//! Durable harvest progress.
//!
//! A job directory holds two files: `progress.json`, the partition state
//! map replaced atomically on every save, and `records.jsonl`, an
//! append-only journal of normalized records. The journal is always
//! appended before the cursor that produced it is saved, so after a crash
//! the worst case is one page fetched twice, which the dedup sink absorbs.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::domain::{PartitionKey, PartitionState, PartitionStatus};
use crate::error::HarvestError;
use crate::fs_util;
use crate::record::NormalizedRecord;

pub const PROGRESS_FILE: &str = "progress.json";
pub const RECORDS_FILE: &str = "records.jsonl";
pub const LOCK_FILE: &str = "progress.lock";
pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub schema_version: u32,
    /// Journal file, relative to the job directory.
    pub records_file: String,
    #[serde(default)]
    pub partitions: BTreeMap<PartitionKey, PartitionState>,
}

impl Default for ProgressRecord {
    fn default() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            records_file: RECORDS_FILE.to_string(),
            partitions: BTreeMap::new(),
        }
    }
}

impl ProgressRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// State for `key`; partitions never seen before are `Pending`.
    pub fn state(&self, key: &PartitionKey) -> PartitionState {
        self.partitions.get(key).cloned().unwrap_or_default()
    }

    pub fn set(&mut self, key: PartitionKey, state: PartitionState) {
        self.partitions.insert(key, state);
    }

    pub fn is_terminal(&self, key: &PartitionKey) -> bool {
        self.partitions
            .get(key)
            .is_some_and(PartitionState::is_terminal)
    }

    pub fn keys_with_status(&self, status: PartitionStatus) -> Vec<PartitionKey> {
        self.partitions
            .iter()
            .filter(|(_, state)| state.status == status)
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Counts statuses over an enumerator's universe, ignoring entries that
    /// belong to other universes sharing this store.
    pub fn tally(&self, universe: &[PartitionKey]) -> Tally {
        let mut tally = Tally {
            total: universe.len(),
            ..Tally::default()
        };
        for key in universe {
            let state = self.state(key);
            tally.records_fetched += state.records_fetched;
            match state.status {
                PartitionStatus::Pending => tally.pending += 1,
                PartitionStatus::InProgress => tally.in_progress += 1,
                PartitionStatus::Complete => tally.complete += 1,
                PartitionStatus::Truncated => {
                    tally.truncated += 1;
                    tally.truncated_partitions.push(key.to_string());
                }
            }
        }
        tally
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Tally {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub complete: usize,
    pub truncated: usize,
    pub records_fetched: u64,
    pub truncated_partitions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ProgressStore {
    dir: Utf8PathBuf,
}

impl ProgressStore {
    pub fn new(dir: Utf8PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Utf8Path {
        &self.dir
    }

    pub fn progress_path(&self) -> Utf8PathBuf {
        self.dir.join(PROGRESS_FILE)
    }

    pub fn records_path(&self) -> Utf8PathBuf {
        self.dir.join(RECORDS_FILE)
    }

    pub fn lock_path(&self) -> Utf8PathBuf {
        self.dir.join(LOCK_FILE)
    }

    pub fn ensure_dir(&self) -> Result<(), HarvestError> {
        fs_util::ensure_dir(&self.dir)
    }

    /// Takes the job's exclusive lock; released when the guard drops.
    pub fn lock(&self) -> Result<ProgressLock, HarvestError> {
        self.ensure_dir()?;
        let path = self.lock_path();
        let mut file = match OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path.as_std_path())
        {
            Ok(file) => file,
            Err(err) if err.kind() == io::ErrorKind::AlreadyExists => {
                return Err(HarvestError::ProgressLocked(path));
            }
            Err(err) => {
                return Err(HarvestError::Filesystem(format!("create {path}: {err}")));
            }
        };
        writeln!(file, "{}", std::process::id())
            .map_err(|err| HarvestError::Filesystem(format!("write {path}: {err}")))?;
        Ok(ProgressLock { path })
    }

    /// Missing file means no progress yet; anything unreadable is fatal.
    pub fn load(&self) -> Result<ProgressRecord, HarvestError> {
        let path = self.progress_path();
        let content = match fs::read_to_string(path.as_std_path()) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Ok(ProgressRecord::new());
            }
            Err(err) => {
                return Err(HarvestError::ProgressStoreCorrupt {
                    path,
                    message: err.to_string(),
                });
            }
        };
        let record: ProgressRecord =
            serde_json::from_str(&content).map_err(|err| HarvestError::ProgressStoreCorrupt {
                path: path.clone(),
                message: err.to_string(),
            })?;
        if record.schema_version != SCHEMA_VERSION {
            return Err(HarvestError::ProgressStoreCorrupt {
                path,
                message: format!("unsupported schema_version {}", record.schema_version),
            });
        }
        Ok(record)
    }

    pub fn save(&self, record: &ProgressRecord) -> Result<(), HarvestError> {
        let mut content = serde_json::to_vec_pretty(record)
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        content.push(b'\n');
        fs_util::write_atomic(&self.progress_path(), &content)
    }

    /// Sets the partition's state and persists the whole record.
    pub fn update(
        &self,
        record: &mut ProgressRecord,
        key: &PartitionKey,
        state: PartitionState,
    ) -> Result<(), HarvestError> {
        record.set(key.clone(), state);
        self.save(record)
    }

    pub fn mark_complete(
        &self,
        record: &mut ProgressRecord,
        key: &PartitionKey,
        state: PartitionState,
    ) -> Result<(), HarvestError> {
        if !state.is_terminal() {
            return Err(HarvestError::Filesystem(format!(
                "refusing to mark {key} complete with status {}",
                state.status
            )));
        }
        self.update(record, key, state)
    }

    pub fn append_records(&self, records: &[NormalizedRecord]) -> Result<(), HarvestError> {
        let lines = records
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        fs_util::append_lines(&self.records_path(), lines)
    }

    /// Reads the journal. A torn final line (crash mid-append) is cut off
    /// the file so later appends start on a clean line; an unparseable line
    /// anywhere else is corruption.
    pub fn load_records(&self) -> Result<Vec<NormalizedRecord>, HarvestError> {
        let path = self.records_path();
        let content = match fs::read(path.as_std_path()) {
            Ok(content) => content,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(HarvestError::ProgressStoreCorrupt {
                    path,
                    message: err.to_string(),
                });
            }
        };

        let mut records = Vec::new();
        let mut offset = 0usize;
        for (index, line) in content.split_inclusive(|byte| *byte == b'\n').enumerate() {
            let terminated = line.ends_with(b"\n");
            match parse_journal_line(line) {
                Ok(Some(record)) => {
                    records.push(record);
                    if !terminated {
                        fs_util::append_lines(&path, [""])?;
                    }
                }
                Ok(None) => {}
                Err(_) if !terminated => {
                    warn!(path = %path, line = index + 1, "dropping torn journal tail");
                    self.truncate_journal(offset)?;
                    break;
                }
                Err(message) => {
                    return Err(HarvestError::ProgressStoreCorrupt {
                        path,
                        message: format!("line {}: {message}", index + 1),
                    });
                }
            }
            offset += line.len();
        }
        Ok(records)
    }

    fn truncate_journal(&self, len: usize) -> Result<(), HarvestError> {
        let path = self.records_path();
        let file = OpenOptions::new()
            .write(true)
            .open(path.as_std_path())
            .map_err(|err| HarvestError::Filesystem(format!("open {path}: {err}")))?;
        file.set_len(len as u64)
            .map_err(|err| HarvestError::Filesystem(format!("truncate {path}: {err}")))?;
        file.sync_all()
            .map_err(|err| HarvestError::Filesystem(format!("sync {path}: {err}")))
    }
}

/// Blank lines yield `None`. A crash can cut a line inside a multi-byte
/// character, so invalid UTF-8 is reported like invalid JSON.
fn parse_journal_line(line: &[u8]) -> Result<Option<NormalizedRecord>, String> {
    let text = std::str::from_utf8(line).map_err(|err| err.to_string())?;
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed)
        .map(Some)
        .map_err(|err| err.to_string())
}

#[derive(Debug)]
pub struct ProgressLock {
    path: Utf8PathBuf,
}

impl ProgressLock {
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }
}

impl Drop for ProgressLock {
    fn drop(&mut self) {
        if let Err(err) = fs::remove_file(self.path.as_std_path()) {
            warn!(path = %self.path, error = %err, "failed to release progress lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::Cursor;

    use super::*;

    #[test]
    fn unknown_partitions_are_pending() {
        let record = ProgressRecord::new();
        let key = PartitionKey::Place { place_id: 39 };
        assert_eq!(record.state(&key).status, PartitionStatus::Pending);
        assert!(!record.is_terminal(&key));
    }

    #[test]
    fn tally_counts_only_the_universe() {
        let mut record = ProgressRecord::new();
        let a = PartitionKey::Taxon { taxon_id: 1 };
        let b = PartitionKey::Taxon { taxon_id: 2 };
        let outside = PartitionKey::Place { place_id: 39 };
        record.set(
            a.clone(),
            PartitionState {
                status: PartitionStatus::Truncated,
                records_fetched: 10,
                ..PartitionState::default()
            },
        );
        record.set(
            outside,
            PartitionState {
                status: PartitionStatus::Complete,
                ..PartitionState::default()
            },
        );
        record.set(
            b.clone(),
            PartitionState {
                status: PartitionStatus::InProgress,
                cursor: Some(Cursor::Page(3)),
                records_fetched: 5,
                ..PartitionState::default()
            },
        );

        let tally = record.tally(&[a, b, PartitionKey::Taxon { taxon_id: 3 }]);
        assert_eq!(tally.total, 3);
        assert_eq!(tally.truncated, 1);
        assert_eq!(tally.in_progress, 1);
        assert_eq!(tally.pending, 1);
        assert_eq!(tally.complete, 0);
        assert_eq!(tally.records_fetched, 15);
        assert_eq!(tally.truncated_partitions, vec!["taxon/1".to_string()]);
    }
}
