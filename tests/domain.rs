use assert_matches::assert_matches;

use occurrence_harvester::domain::{BasisOfRecord, BoundingBox, Cursor, PartitionKey};
use occurrence_harvester::error::HarvestError;

#[test]
fn partition_keys_parse_their_own_display() {
    let keys = [
        PartitionKey::TaxonMonth {
            taxon_id: 47158,
            year: 2009,
            month: 1,
        },
        PartitionKey::TaxonDay {
            taxon_id: 3,
            year: 2012,
            month: 2,
            day: 29,
        },
        PartitionKey::Basis(BasisOfRecord::MaterialSample),
        PartitionKey::Taxon { taxon_id: 47224 },
        PartitionKey::Place { place_id: 52 },
    ];
    for key in keys {
        assert_eq!(key.to_string().parse::<PartitionKey>().unwrap(), key);
    }
}

#[test]
fn partition_key_parsing_is_strict() {
    for bad in [
        "taxon-month/47158/2009-1",
        "taxon-month/47158/2009-13",
        "taxon-day/3/2013-02-29",
        "basis/SPECIMEN",
        "taxon/",
        "place/52/extra",
        "47158_2009_01",
        "",
    ] {
        assert_matches!(
            bad.parse::<PartitionKey>(),
            Err(HarvestError::InvalidPartitionKey(_)),
            "{bad} should not parse"
        );
    }
}

#[test]
fn cursor_serializes_as_tagged_object() {
    let json = serde_json::to_value(Cursor::IdAbove(88123)).unwrap();
    assert_eq!(json, serde_json::json!({"kind": "id_above", "value": 88123}));
    let back: Cursor = serde_json::from_value(json).unwrap();
    assert_eq!(back, Cursor::IdAbove(88123));
}

#[test]
fn bounding_box_checks() {
    let utah = BoundingBox {
        min_lat: 36.9,
        max_lat: 42.0,
        min_lng: -114.1,
        max_lng: -109.0,
    };
    assert!(utah.validate().is_ok());

    let flipped = BoundingBox {
        min_lng: -109.0,
        max_lng: -114.1,
        ..utah
    };
    assert_matches!(flipped.validate(), Err(HarvestError::InvalidConfig(_)));
}
