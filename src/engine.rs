//! The harvest loop.
//!
//! Per partition: `Pending -> InProgress -> {Complete | Truncated}`. Terminal
//! partitions are skipped on every later run. Each page's new records are
//! journaled and its cursor saved before the next page is requested, so an
//! interrupted run resumes from the last completed page.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::{Cursor, PartitionKey, PartitionState, PartitionStatus, Truncation};
use crate::error::HarvestError;
use crate::partition::PartitionEnumerator;
use crate::progress::{ProgressRecord, ProgressStore};
use crate::record::NormalizedRecord;
use crate::sink::DedupSink;
use crate::source::{Page, PagedSource};

/// Safety caps per partition. `None` disables a cap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestLimits {
    #[serde(default)]
    pub max_pages: Option<u32>,
    #[serde(default)]
    pub max_records: Option<u64>,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub partition: String,
    pub status: PartitionStatus,
    pub records_added: u64,
    pub total_records: usize,
    pub message: Option<String>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageDecision {
    Continue(Cursor),
    Finish(PartitionStatus, Option<Truncation>),
}

/// Decides what follows a page, given the partition state that already
/// includes it. Caps are checked before exhaustion: a partition that lands
/// exactly on the record cap is reported `Truncated`.
pub fn classify(limits: &HarvestLimits, state: &PartitionState, page: &Page) -> PageDecision {
    if limits
        .max_records
        .is_some_and(|max| state.records_fetched >= max)
    {
        return PageDecision::Finish(PartitionStatus::Truncated, Some(Truncation::RecordCap));
    }
    let Some(next) = page.next_cursor else {
        let beyond_cap = match (limits.max_records, page.total_hint) {
            (Some(max), Some(total)) => total > max,
            _ => false,
        };
        return if beyond_cap {
            PageDecision::Finish(PartitionStatus::Truncated, Some(Truncation::TotalHint))
        } else {
            PageDecision::Finish(PartitionStatus::Complete, None)
        };
    };
    if limits
        .max_pages
        .is_some_and(|max| state.pages_fetched >= max)
    {
        return PageDecision::Finish(PartitionStatus::Truncated, Some(Truncation::PageCap));
    }
    PageDecision::Continue(next)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub partitions: usize,
    pub skipped: usize,
    pub completed: usize,
    pub truncated: usize,
    pub unavailable: usize,
    pub pages: u64,
    pub records_added: u64,
    pub records_dropped: u64,
    pub records_total: usize,
    pub pending: Vec<String>,
    pub in_progress: Vec<String>,
    /// Every truncated partition in the universe, including earlier runs.
    pub truncated_partitions: Vec<String>,
}

impl RunSummary {
    pub fn is_fully_terminal(&self) -> bool {
        self.pending.is_empty() && self.in_progress.is_empty()
    }
}

pub struct HarvestEngine<'a, S: PagedSource + ?Sized> {
    source: &'a S,
    store: &'a ProgressStore,
    limits: HarvestLimits,
}

impl<'a, S: PagedSource + ?Sized> HarvestEngine<'a, S> {
    pub fn new(source: &'a S, store: &'a ProgressStore, limits: HarvestLimits) -> Self {
        Self {
            source,
            store,
            limits,
        }
    }

    /// Walks the enumerator's universe once. `sink` must already hold the
    /// journaled records so re-fetched pages do not duplicate them.
    pub fn run(
        &self,
        enumerator: &dyn PartitionEnumerator,
        sink: &mut DedupSink,
        events: &dyn ProgressSink,
    ) -> Result<RunSummary, HarvestError> {
        let mut progress = self.store.load()?;
        let universe = enumerator.enumerate();
        let mut summary = RunSummary {
            partitions: universe.len(),
            ..RunSummary::default()
        };
        info!(
            source = self.source.name(),
            universe = %enumerator.describe(),
            partitions = universe.len(),
            records = sink.len(),
            "starting harvest"
        );

        for key in &universe {
            let state = progress.state(key);
            if state.is_terminal() {
                debug!(partition = %key, status = %state.status, "skipping finished partition");
                summary.skipped += 1;
                continue;
            }
            self.harvest_partition(key, state, &mut progress, sink, events, &mut summary)?;
        }

        for key in &universe {
            match progress.state(key).status {
                PartitionStatus::Pending => summary.pending.push(key.to_string()),
                PartitionStatus::InProgress => summary.in_progress.push(key.to_string()),
                PartitionStatus::Truncated => summary.truncated_partitions.push(key.to_string()),
                PartitionStatus::Complete => {}
            }
        }
        summary.records_total = sink.len();

        info!(
            source = self.source.name(),
            completed = summary.completed,
            truncated = summary.truncated,
            unavailable = summary.unavailable,
            pending = summary.pending.len(),
            records_added = summary.records_added,
            records_total = summary.records_total,
            "harvest finished"
        );
        if !summary.truncated_partitions.is_empty() {
            warn!(
                count = summary.truncated_partitions.len(),
                "coverage is incomplete for truncated partitions"
            );
        }
        Ok(summary)
    }

    fn harvest_partition(
        &self,
        key: &PartitionKey,
        mut state: PartitionState,
        progress: &mut ProgressRecord,
        sink: &mut DedupSink,
        events: &dyn ProgressSink,
        summary: &mut RunSummary,
    ) -> Result<(), HarvestError> {
        let mut cursor = match state.cursor {
            Some(cursor) => cursor,
            None => match self.source.initial_cursor(key) {
                Ok(cursor) => cursor,
                Err(err) => {
                    return self.give_up(key, None, state, err, progress, sink, events, summary);
                }
            },
        };
        if state.cursor.is_some() {
            info!(partition = %key, cursor = %cursor, "resuming partition");
        }

        loop {
            let page = match self.source.fetch_page(key, &cursor) {
                Ok(page) => page,
                Err(err) if err.is_source_failure() => {
                    return self.give_up(
                        key,
                        Some(cursor),
                        state,
                        err,
                        progress,
                        sink,
                        events,
                        summary,
                    );
                }
                Err(err) => return Err(err),
            };
            summary.pages += 1;

            let added = self.absorb(key, &page, sink, summary);
            self.store.append_records(&added)?;

            state.records_fetched += page.records.len() as u64;
            state.records_added += added.len() as u64;
            state.pages_fetched += 1;
            state.updated_at = Some(chrono::Utc::now().to_rfc3339());
            summary.records_added += added.len() as u64;

            match classify(&self.limits, &state, &page) {
                PageDecision::Continue(next) => {
                    state.status = PartitionStatus::InProgress;
                    state.cursor = Some(next);
                    self.store.update(progress, key, state.clone())?;
                    debug!(partition = %key, cursor = %next, added = added.len(), "page stored");
                    events.event(ProgressEvent {
                        partition: key.to_string(),
                        status: state.status,
                        records_added: added.len() as u64,
                        total_records: sink.len(),
                        message: Some(format!("next {next}")),
                    });
                    cursor = next;
                }
                PageDecision::Finish(status, truncation) => {
                    state.status = status;
                    state.truncation = truncation;
                    state.cursor = None;
                    self.store.mark_complete(progress, key, state.clone())?;
                    match status {
                        PartitionStatus::Truncated => {
                            summary.truncated += 1;
                            warn!(
                                partition = %key,
                                fetched = state.records_fetched,
                                total_hint = ?page.total_hint,
                                cap = ?truncation,
                                "partition truncated by safety cap"
                            );
                        }
                        _ => {
                            summary.completed += 1;
                            info!(partition = %key, fetched = state.records_fetched, added = state.records_added, "partition complete");
                        }
                    }
                    events.event(ProgressEvent {
                        partition: key.to_string(),
                        status,
                        records_added: added.len() as u64,
                        total_records: sink.len(),
                        message: truncation.map(|cap| format!("{cap:?}")),
                    });
                    return Ok(());
                }
            }
        }
    }

    /// Normalizes a page into the sink, returning only the records that
    /// were new.
    fn absorb(
        &self,
        key: &PartitionKey,
        page: &Page,
        sink: &mut DedupSink,
        summary: &mut RunSummary,
    ) -> Vec<NormalizedRecord> {
        let mut added = Vec::new();
        for raw in &page.records {
            match self.source.normalize(key, raw) {
                Ok(record) => {
                    if !sink.contains(&record.identity) {
                        added.push(record.clone());
                        sink.add(record);
                    }
                }
                Err(err) => {
                    summary.records_dropped += 1;
                    debug!(partition = %key, reason = %err, "record dropped");
                }
            }
        }
        added
    }

    /// Source failure: keep whatever pages succeeded. A partition with no
    /// page at all goes back to `Pending` for a full retry next run.
    #[allow(clippy::too_many_arguments)]
    fn give_up(
        &self,
        key: &PartitionKey,
        cursor: Option<Cursor>,
        mut state: PartitionState,
        err: HarvestError,
        progress: &mut ProgressRecord,
        sink: &DedupSink,
        events: &dyn ProgressSink,
        summary: &mut RunSummary,
    ) -> Result<(), HarvestError> {
        summary.unavailable += 1;
        state.status = if state.pages_fetched == 0 {
            PartitionStatus::Pending
        } else {
            PartitionStatus::InProgress
        };
        state.updated_at = Some(chrono::Utc::now().to_rfc3339());
        self.store.update(progress, key, state.clone())?;
        warn!(
            partition = %key,
            cursor = ?cursor,
            status = %state.status,
            error = %err,
            "source unavailable, moving on"
        );
        events.event(ProgressEvent {
            partition: key.to_string(),
            status: state.status,
            records_added: 0,
            total_records: sink.len(),
            message: Some(err.to_string()),
        });
        Ok(())
    }
}

/// Discards events; for callers that only want the summary.
pub struct SilentProgress;

impl ProgressSink for SilentProgress {
    fn event(&self, _event: ProgressEvent) {}
}
