#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use camino::Utf8PathBuf;
use serde_json::{Value, json};

use occurrence_harvester::domain::{Cursor, PartitionKey};
use occurrence_harvester::engine::{ProgressEvent, ProgressSink};
use occurrence_harvester::error::HarvestError;
use occurrence_harvester::partition::PartitionEnumerator;
use occurrence_harvester::progress::ProgressStore;
use occurrence_harvester::record::{NormalizedRecord, RawRecord, validate_coordinates};
use occurrence_harvester::source::{Page, PagedSource};

/// Replays fixed pages per partition. Page `n` of a script answers
/// `Cursor::Page(n)`; the last scripted page ends the partition.
#[derive(Default)]
pub struct ScriptedSource {
    scripts: HashMap<PartitionKey, Vec<Vec<Value>>>,
    failures: Mutex<HashSet<(PartitionKey, u32)>>,
    calls: Mutex<Vec<(PartitionKey, Cursor)>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pages(mut self, key: &PartitionKey, pages: Vec<Vec<Value>>) -> Self {
        self.scripts.insert(key.clone(), pages);
        self
    }

    /// The next request for that page fails once with `SourceUnavailable`.
    pub fn fail_once(self, key: &PartitionKey, page: u32) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert((key.clone(), page));
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    pub fn calls_for(&self, key: &PartitionKey) -> Vec<Cursor> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(called, _)| called == key)
            .map(|(_, cursor)| *cursor)
            .collect()
    }
}

impl PagedSource for ScriptedSource {
    fn name(&self) -> &str {
        "scripted"
    }

    fn initial_cursor(&self, _partition: &PartitionKey) -> Result<Cursor, HarvestError> {
        Ok(Cursor::Page(1))
    }

    fn fetch_page(&self, partition: &PartitionKey, cursor: &Cursor) -> Result<Page, HarvestError> {
        self.calls
            .lock()
            .unwrap()
            .push((partition.clone(), *cursor));
        let Cursor::Page(number) = *cursor else {
            panic!("scripted source only pages by number, got {cursor}");
        };
        if self
            .failures
            .lock()
            .unwrap()
            .remove(&(partition.clone(), number))
        {
            return Err(HarvestError::SourceUnavailable {
                attempts: 3,
                message: format!("scripted outage at {partition} page {number}"),
            });
        }

        let script = self.scripts.get(partition).cloned().unwrap_or_default();
        let total = script.iter().map(Vec::len).sum::<usize>() as u64;
        let index = number as usize - 1;
        let records = script.get(index).cloned().unwrap_or_default();
        let next_cursor = (index + 1 < script.len()).then(|| Cursor::Page(number + 1));
        Ok(Page {
            records: records.into_iter().map(RawRecord).collect(),
            next_cursor,
            total_hint: Some(total),
        })
    }

    fn normalize(
        &self,
        _partition: &PartitionKey,
        raw: &RawRecord,
    ) -> Result<NormalizedRecord, HarvestError> {
        let id = raw
            .u64_field("id")
            .ok_or_else(|| HarvestError::RecordMalformed("no id".to_string()))?;
        let (latitude, longitude) = match (raw.f64_field("lat"), raw.f64_field("lng")) {
            (Some(lat), Some(lng)) => validate_coordinates(lat, lng)?,
            _ => return Err(HarvestError::RecordMalformed(format!("{id} has no coordinates"))),
        };
        Ok(NormalizedRecord {
            identity: format!("test_{id}"),
            species_name: raw.str_field("species").unwrap_or("Unknown").to_string(),
            taxon_group: "Insecta".to_string(),
            latitude,
            longitude,
            observed_year: 2020,
            observed_month: 3,
            observed_day: None,
            source_tag: "scripted".to_string(),
            attributes: Default::default(),
        })
    }
}

pub struct FixedEnumerator(pub Vec<PartitionKey>);

impl PartitionEnumerator for FixedEnumerator {
    fn describe(&self) -> String {
        format!("{} fixed partitions", self.0.len())
    }

    fn enumerate(&self) -> Vec<PartitionKey> {
        self.0.clone()
    }
}

#[derive(Default)]
pub struct RecordingSink {
    pub events: Mutex<Vec<ProgressEvent>>,
}

impl ProgressSink for RecordingSink {
    fn event(&self, event: ProgressEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub fn record(id: u64) -> Value {
    json!({"id": id, "lat": 40.0 + id as f64 / 1000.0, "lng": -111.5, "species": "Apis mellifera"})
}

pub fn records(ids: std::ops::RangeInclusive<u64>) -> Vec<Value> {
    ids.map(record).collect()
}

pub fn malformed(id: u64) -> Value {
    json!({"id": id, "lat": null, "lng": null})
}

pub fn month(taxon_id: u64, month: u32) -> PartitionKey {
    PartitionKey::TaxonMonth {
        taxon_id,
        year: 2020,
        month,
    }
}

pub fn temp_store() -> (tempfile::TempDir, ProgressStore) {
    let dir = tempfile::tempdir().unwrap();
    let path = Utf8PathBuf::from_path_buf(dir.path().join("job")).unwrap();
    (dir, ProgressStore::new(path))
}

/// Shares one scripted source across the boxes an app factory hands out.
pub struct SharedSource(pub std::sync::Arc<ScriptedSource>);

impl PagedSource for SharedSource {
    fn name(&self) -> &str {
        self.0.name()
    }

    fn initial_cursor(&self, partition: &PartitionKey) -> Result<Cursor, HarvestError> {
        self.0.initial_cursor(partition)
    }

    fn fetch_page(&self, partition: &PartitionKey, cursor: &Cursor) -> Result<Page, HarvestError> {
        self.0.fetch_page(partition, cursor)
    }

    fn normalize(
        &self,
        partition: &PartitionKey,
        raw: &RawRecord,
    ) -> Result<NormalizedRecord, HarvestError> {
        self.0.normalize(partition, raw)
    }
}
