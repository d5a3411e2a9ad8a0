mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use camino::Utf8PathBuf;

use common::{ScriptedSource, SharedSource, month, records};

use occurrence_harvester::app::{App, COLLECTION_FILE, LOG_FILE, SourceFactory};
use occurrence_harvester::config::{Config, ConfigLoader, JobConfig, ResolvedConfig};
use occurrence_harvester::domain::{PartitionKey, PartitionStatus};
use occurrence_harvester::error::HarvestError;
use occurrence_harvester::output::JsonOutput;
use occurrence_harvester::source::PagedSource;

struct ScriptedFactory {
    source: Arc<ScriptedSource>,
}

impl SourceFactory for ScriptedFactory {
    fn build(&self, _job: &JobConfig) -> Result<Box<dyn PagedSource>, HarvestError> {
        Ok(Box::new(SharedSource(self.source.clone())))
    }
}

fn config(data_dir: &std::path::Path) -> ResolvedConfig {
    let config: Config = serde_json::from_str(
        r#"{
            "region": {"name": "Utah", "min_lat": 36.9, "max_lat": 42.0, "min_lng": -114.1, "max_lng": -109.0},
            "jobs": [{
                "name": "insects",
                "source": {"kind": "inat"},
                "partitions": {"kind": "taxon_month", "taxa": [1], "start_year": 2020, "end_year": 2020},
                "caps": {"max_records": 2}
            }]
        }"#,
    )
    .unwrap();
    let mut resolved = ConfigLoader::resolve_config(config).unwrap();
    resolved.data_dir = Utf8PathBuf::from_path_buf(data_dir.to_path_buf()).unwrap();
    resolved
}

fn day(day: u32) -> PartitionKey {
    PartitionKey::TaxonDay {
        taxon_id: 1,
        year: 2020,
        month: 3,
        day,
    }
}

#[test]
fn harvest_status_refine_finalize() {
    let dir = tempfile::tempdir().unwrap();
    let source = Arc::new(
        ScriptedSource::new()
            .pages(&month(1, 1), vec![records(1..=1)])
            .pages(&month(1, 3), vec![records(2..=3), records(4..=4)])
            .pages(&day(5), vec![records(4..=4)])
            .pages(&day(6), vec![records(3..=3)])
            .pages(&day(30), vec![records(5..=5)]),
    );
    let app = App::new(
        config(dir.path()),
        ScriptedFactory {
            source: source.clone(),
        },
    );

    let harvest = app.harvest(&[], &JsonOutput).unwrap();
    let report = &harvest.jobs[0];
    assert_eq!(report.summary.partitions, 12);
    assert_eq!(report.summary.completed, 11);
    assert_eq!(report.summary.truncated_partitions, vec![month(1, 3).to_string()]);
    assert_eq!(report.summary.records_total, 3);
    assert!(report.collection_path.ends_with(COLLECTION_FILE));

    let job_dir = dir.path().join("insects");
    let log = std::fs::read_to_string(job_dir.join(LOG_FILE)).unwrap();
    assert_eq!(log.lines().count(), 12);
    assert!(log.contains("taxon-month/1/2020-03 +2 (total: 3) truncated"));

    let status = app.status(&[]).unwrap();
    assert_eq!(status.jobs[0].tally.complete, 11);
    assert_eq!(status.jobs[0].tally.truncated, 1);
    assert_eq!(status.jobs[0].refinable_months, 1);

    let requests = source.calls();
    let refine = app.refine(&["insects".to_string()], &JsonOutput).unwrap();
    let summary = &refine.jobs[0].summary;
    assert_eq!(summary.partitions, 30);
    assert_eq!(summary.completed, 30);
    assert_eq!(summary.records_added, 2);
    assert_eq!(source.calls(), requests + 30);

    let progress = app.store_for(&app.config().jobs[0]).load().unwrap();
    assert_eq!(progress.state(&day(5)).status, PartitionStatus::Complete);
    assert_eq!(progress.state(&month(1, 3)).status, PartitionStatus::Truncated);

    // Nothing left to do: a second harvest is offline.
    let again = app.harvest(&[], &JsonOutput).unwrap();
    assert_eq!(again.jobs[0].summary.skipped, 12);
    assert_eq!(source.calls(), requests + 30);

    std::fs::remove_file(job_dir.join(COLLECTION_FILE)).unwrap();
    let finalized = app.finalize(&[]).unwrap();
    assert_eq!(finalized.jobs[0].records, 5);
    let collection: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(job_dir.join(COLLECTION_FILE)).unwrap(),
    )
    .unwrap();
    assert_eq!(collection["features"].as_array().unwrap().len(), 5);
    assert_eq!(collection["metadata"]["region"], "Utah");
}

#[test]
fn locked_job_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let app = App::new(
        config(dir.path()),
        ScriptedFactory {
            source: Arc::new(ScriptedSource::new()),
        },
    );
    let store = app.store_for(&app.config().jobs[0]);
    let _held = store.lock().unwrap();
    assert_matches!(
        app.harvest(&[], &JsonOutput),
        Err(HarvestError::ProgressLocked(_))
    );
    assert_matches!(app.finalize(&[]), Err(HarvestError::ProgressLocked(_)));
}

#[test]
fn unknown_job_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    let app = App::new(
        config(dir.path()),
        ScriptedFactory {
            source: Arc::new(ScriptedSource::new()),
        },
    );
    assert_matches!(
        app.status(&["birds".to_string()]),
        Err(HarvestError::UnknownJob(_))
    );
}
