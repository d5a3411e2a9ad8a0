use std::collections::HashSet;

use camino::Utf8Path;
use serde::Serialize;
use serde_json::{Map, Value, json};

use crate::error::HarvestError;
use crate::fs_util;
use crate::record::NormalizedRecord;

/// Accumulates normalized records, keeping the first value seen for each
/// identity in insertion order.
#[derive(Debug, Clone, Default)]
pub struct DedupSink {
    records: Vec<NormalizedRecord>,
    seen: HashSet<String>,
}

impl DedupSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records<I: IntoIterator<Item = NormalizedRecord>>(records: I) -> Self {
        let mut sink = Self::new();
        for record in records {
            sink.add(record);
        }
        sink
    }

    /// Returns `false` when the identity was already present.
    pub fn add(&mut self, record: NormalizedRecord) -> bool {
        if self.seen.contains(&record.identity) {
            return false;
        }
        self.seen.insert(record.identity.clone());
        self.records.push(record);
        true
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.seen.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[NormalizedRecord] {
        &self.records
    }

    /// Snapshot of the current contents; the sink keeps accepting records.
    pub fn finalize(&self, metadata: CollectionMetadata) -> Collection {
        Collection {
            metadata,
            features: self.records.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CollectionMetadata {
    pub collected_at: String,
    pub source_description: String,
    pub region: String,
}

impl CollectionMetadata {
    pub fn now(source_description: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            collected_at: chrono::Utc::now().to_rfc3339(),
            source_description: source_description.into(),
            region: region.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Collection {
    pub metadata: CollectionMetadata,
    pub features: Vec<NormalizedRecord>,
}

impl Collection {
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn to_geojson(&self) -> Value {
        let features = self.features.iter().map(feature_json).collect::<Vec<_>>();
        json!({
            "type": "FeatureCollection",
            "features": features,
            "metadata": {
                "collected_at": self.metadata.collected_at,
                "source_description": self.metadata.source_description,
                "region": self.metadata.region,
                "count": self.features.len(),
            }
        })
    }

    pub fn write_to(&self, path: &Utf8Path) -> Result<(), HarvestError> {
        let content = serde_json::to_vec(&self.to_geojson())
            .map_err(|err| HarvestError::Filesystem(err.to_string()))?;
        fs_util::write_atomic(path, &content)
    }
}

fn feature_json(record: &NormalizedRecord) -> Value {
    let mut properties = Map::new();
    properties.insert("id".to_string(), json!(record.identity));
    properties.insert("species".to_string(), json!(record.species_name));
    properties.insert("taxon".to_string(), json!(record.taxon_group));
    properties.insert("year".to_string(), json!(record.observed_year));
    properties.insert("month".to_string(), json!(record.observed_month));
    if let Some(day) = record.observed_day {
        properties.insert("day".to_string(), json!(day));
    }
    properties.insert("source".to_string(), json!(record.source_tag));
    for (name, value) in &record.attributes {
        properties
            .entry(name.clone())
            .or_insert_with(|| json!(value));
    }

    json!({
        "type": "Feature",
        "geometry": {
            "type": "Point",
            "coordinates": [record.longitude, record.latitude],
        },
        "properties": properties,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn record(identity: &str, species: &str) -> NormalizedRecord {
        NormalizedRecord {
            identity: identity.to_string(),
            species_name: species.to_string(),
            taxon_group: "Aves".to_string(),
            latitude: 40.0,
            longitude: -111.0,
            observed_year: 2020,
            observed_month: 5,
            observed_day: None,
            source_tag: "inat".to_string(),
            attributes: BTreeMap::new(),
        }
    }

    #[test]
    fn geojson_feature_shape() {
        let mut with_attrs = record("gbif_7", "Pica hudsonia");
        with_attrs.observed_day = Some(9);
        with_attrs
            .attributes
            .insert("catalog_number".to_string(), "UMNH 1".to_string());
        with_attrs
            .attributes
            .insert("id".to_string(), "shadowed".to_string());
        let sink = DedupSink::from_records([with_attrs]);
        let collection = sink.finalize(CollectionMetadata::now("GBIF specimens", "Utah"));
        let value = collection.to_geojson();

        assert_eq!(value["type"], "FeatureCollection");
        assert_eq!(value["metadata"]["region"], "Utah");
        let feature = &value["features"][0];
        assert_eq!(feature["geometry"]["coordinates"], json!([-111.0, 40.0]));
        assert_eq!(feature["properties"]["id"], "gbif_7");
        assert_eq!(feature["properties"]["day"], 9);
        assert_eq!(feature["properties"]["catalog_number"], "UMNH 1");
    }

    #[test]
    fn finalize_does_not_drain() {
        let mut sink = DedupSink::new();
        assert!(sink.add(record("inat_1", "a")));
        let first = sink.finalize(CollectionMetadata::now("x", "Utah"));
        assert!(sink.add(record("inat_2", "b")));
        let second = sink.finalize(CollectionMetadata::now("x", "Utah"));
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 2);
    }
}
