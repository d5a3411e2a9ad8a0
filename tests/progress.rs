mod common;

use assert_matches::assert_matches;

use common::{month, temp_store};

use occurrence_harvester::domain::{Cursor, PartitionKey, PartitionState, PartitionStatus};
use occurrence_harvester::error::HarvestError;
use occurrence_harvester::progress::{ProgressRecord, SCHEMA_VERSION};
use occurrence_harvester::record::NormalizedRecord;

fn in_progress(page: u32) -> PartitionState {
    PartitionState {
        status: PartitionStatus::InProgress,
        records_fetched: 200 * u64::from(page - 1),
        records_added: 190 * u64::from(page - 1),
        pages_fetched: page - 1,
        cursor: Some(Cursor::Page(page)),
        truncation: None,
        updated_at: Some("2024-05-01T12:00:00+00:00".to_string()),
    }
}

fn normalized(identity: &str) -> NormalizedRecord {
    NormalizedRecord {
        identity: identity.to_string(),
        species_name: "Danaus plexippus".to_string(),
        taxon_group: "Nymphalidae".to_string(),
        latitude: 38.5,
        longitude: -109.6,
        observed_year: 2019,
        observed_month: 7,
        observed_day: Some(14),
        source_tag: "inaturalist".to_string(),
        attributes: Default::default(),
    }
}

#[test]
fn missing_store_loads_empty() {
    let (_dir, store) = temp_store();
    let record = store.load().unwrap();
    assert_eq!(record, ProgressRecord::new());
    assert_eq!(record.schema_version, SCHEMA_VERSION);
    assert!(store.load_records().unwrap().is_empty());
}

#[test]
fn save_of_load_is_a_no_op() {
    let (_dir, store) = temp_store();
    let mut record = ProgressRecord::new();
    store.update(&mut record, &month(47158, 3), in_progress(4)).unwrap();
    store
        .update(
            &mut record,
            &PartitionKey::Place { place_id: 39 },
            PartitionState {
                status: PartitionStatus::Complete,
                records_fetched: 12,
                records_added: 12,
                pages_fetched: 1,
                ..PartitionState::default()
            },
        )
        .unwrap();

    let bytes = std::fs::read(store.progress_path().as_std_path()).unwrap();
    let loaded = store.load().unwrap();
    assert_eq!(loaded, record);
    store.save(&loaded).unwrap();
    assert_eq!(std::fs::read(store.progress_path().as_std_path()).unwrap(), bytes);
}

#[test]
fn progress_file_is_readable_json() {
    let (_dir, store) = temp_store();
    let mut record = ProgressRecord::new();
    store.update(&mut record, &month(47158, 3), in_progress(2)).unwrap();
    let text = std::fs::read_to_string(store.progress_path().as_std_path()).unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
    let state = &value["partitions"]["taxon-month/47158/2020-03"];
    assert_eq!(state["status"], "in_progress");
    assert_eq!(state["cursor"]["kind"], "page");
    assert_eq!(state["cursor"]["value"], 2);
    assert_eq!(value["records_file"], "records.jsonl");
}

#[test]
fn interrupted_save_leaves_previous_state() {
    let (_dir, store) = temp_store();
    let mut record = ProgressRecord::new();
    store.update(&mut record, &month(1, 1), in_progress(2)).unwrap();
    let before = store.load().unwrap();

    // A save that died before its rename leaves only a stray temp file.
    std::fs::write(
        store.dir().join(".occ-harvest-crash.tmp").as_std_path(),
        b"{\"schema_version\": 1, \"records_file\": \"rec",
    )
    .unwrap();

    assert_eq!(store.load().unwrap(), before);
    store.update(&mut record, &month(1, 1), in_progress(3)).unwrap();
    assert_eq!(store.load().unwrap().state(&month(1, 1)).cursor, Some(Cursor::Page(3)));
}

#[test]
fn corrupt_progress_is_fatal() {
    let (_dir, store) = temp_store();
    store.ensure_dir().unwrap();
    std::fs::write(store.progress_path().as_std_path(), b"{ not json").unwrap();
    assert_matches!(store.load(), Err(HarvestError::ProgressStoreCorrupt { .. }));

    std::fs::write(
        store.progress_path().as_std_path(),
        b"{\"schema_version\": 9, \"records_file\": \"records.jsonl\", \"partitions\": {}}",
    )
    .unwrap();
    assert_matches!(store.load(), Err(HarvestError::ProgressStoreCorrupt { .. }));

    std::fs::write(
        store.progress_path().as_std_path(),
        b"{\"schema_version\": 1, \"records_file\": \"r\", \"partitions\": {\"month/3\": {}}}",
    )
    .unwrap();
    assert_matches!(store.load(), Err(HarvestError::ProgressStoreCorrupt { .. }));
}

#[test]
fn non_terminal_state_cannot_be_marked_complete() {
    let (_dir, store) = temp_store();
    let mut record = ProgressRecord::new();
    assert!(
        store
            .mark_complete(&mut record, &month(1, 1), in_progress(2))
            .is_err()
    );
    assert!(store.load().unwrap().partitions.is_empty());
}

#[test]
fn journal_round_trip_and_torn_tail() {
    let (_dir, store) = temp_store();
    store
        .append_records(&[normalized("inat_1"), normalized("inat_2")])
        .unwrap();
    assert_eq!(store.load_records().unwrap().len(), 2);

    // Crash mid-append.
    let path = store.records_path();
    let mut content = std::fs::read_to_string(path.as_std_path()).unwrap();
    content.push_str("{\"identity\": \"inat_3\", \"spec");
    std::fs::write(path.as_std_path(), &content).unwrap();

    let records = store.load_records().unwrap();
    assert_eq!(records.len(), 2);
    store.append_records(&[normalized("inat_3")]).unwrap();
    let records = store.load_records().unwrap();
    assert_eq!(
        records.iter().map(|r| r.identity.as_str()).collect::<Vec<_>>(),
        vec!["inat_1", "inat_2", "inat_3"]
    );
}

#[test]
fn journal_torn_inside_a_multibyte_character() {
    let (_dir, store) = temp_store();
    store.append_records(&[normalized("inat_1")]).unwrap();

    let mut accented = normalized("inat_2");
    accented.species_name = "Nymphalis l-álbum".to_string();
    let line = serde_json::to_string(&accented).unwrap();
    let cut = line.find('á').unwrap() + 1;
    let path = store.records_path();
    let mut bytes = std::fs::read(path.as_std_path()).unwrap();
    let clean_len = bytes.len();
    bytes.extend_from_slice(&line.as_bytes()[..cut]);
    std::fs::write(path.as_std_path(), &bytes).unwrap();

    let records = store.load_records().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(
        std::fs::read(path.as_std_path()).unwrap().len(),
        clean_len
    );

    store.append_records(&[accented]).unwrap();
    let records = store.load_records().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].species_name, "Nymphalis l-álbum");
}

#[test]
fn journal_with_invalid_utf8_before_the_tail_is_corrupt() {
    let (_dir, store) = temp_store();
    store.append_records(&[normalized("inat_1")]).unwrap();
    let path = store.records_path();
    let mut bytes = std::fs::read(path.as_std_path()).unwrap();
    bytes.extend_from_slice(b"{\"identity\": \"inat_2\", \"species_name\": \"l-\xc3\n");
    std::fs::write(path.as_std_path(), &bytes).unwrap();
    store.append_records(&[normalized("inat_3")]).unwrap();
    assert_matches!(
        store.load_records(),
        Err(HarvestError::ProgressStoreCorrupt { .. })
    );
}

#[test]
fn journal_with_bad_middle_line_is_corrupt() {
    let (_dir, store) = temp_store();
    store.append_records(&[normalized("inat_1")]).unwrap();
    let path = store.records_path();
    let mut content = std::fs::read_to_string(path.as_std_path()).unwrap();
    content.push_str("garbage\n");
    std::fs::write(path.as_std_path(), &content).unwrap();
    store.append_records(&[normalized("inat_2")]).unwrap();
    assert_matches!(
        store.load_records(),
        Err(HarvestError::ProgressStoreCorrupt { .. })
    );
}

#[test]
fn lock_is_exclusive_and_released_on_drop() {
    let (_dir, store) = temp_store();
    let guard = store.lock().unwrap();
    assert!(guard.path().exists());
    assert_matches!(store.lock(), Err(HarvestError::ProgressLocked(_)));
    drop(guard);
    assert!(!store.lock_path().exists());
    let _again = store.lock().unwrap();
}
