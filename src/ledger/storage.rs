use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::common::{decimal, error::ConsensusError, harn::PartialSignature};

/// One committed record as a replica persists it.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct PersistedRecord {
    pub record: String,
    #[serde(default, with = "decimal")]
    pub signature: BigUint,
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub sequence: u64,
    #[serde(default)]
    pub view: u64,
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_primary: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partial_signatures: Option<Vec<PartialSignature>>,
}

#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct RecordSet {
    pub records: Vec<PersistedRecord>,
}

/// ISO-8601 timestamps. Values written without an offset are read as UTC.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, SecondsFormat, TimeZone, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_rfc3339_opts(SecondsFormat::AutoSi, true))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| de::Error::custom(format!("'{raw}' is not an ISO-8601 timestamp")))
    }

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        if let Ok(value) = DateTime::parse_from_rfc3339(raw) {
            return Some(value.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
            .ok()
            .map(|naive| Utc.from_utc_datetime(&naive))
    }
}

/// Where replicas keep their committed records. A replica with nothing
/// stored yet reads as an empty set.
pub trait RecordStore: Send + Sync {
    /// Fails with `Storage` when the stored set exists but cannot be read.
    fn read(&self, replica: &str) -> Result<RecordSet, ConsensusError>;
    fn save(&self, replica: &str, records: &RecordSet) -> Result<(), ConsensusError>;

    /// Lenient read for queries: an unreadable set is reported and treated
    /// as empty.
    fn load(&self, replica: &str) -> Result<RecordSet, ConsensusError> {
        match self.read(replica) {
            Err(ConsensusError::Storage(reason)) => {
                warn!(replica, %reason, "Unreadable record set, treating it as empty");
                Ok(RecordSet::default())
            }
            other => other,
        }
    }

    /// Adds `record` to the stored set. A set that cannot be read is left
    /// untouched and the append fails.
    fn append(&self, replica: &str, record: PersistedRecord) -> Result<(), ConsensusError> {
        let mut records = self.read(replica)?;
        records.records.push(record);
        self.save(replica, &records)
    }
}

impl<T: RecordStore + ?Sized> RecordStore for Arc<T> {
    fn read(&self, replica: &str) -> Result<RecordSet, ConsensusError> {
        (**self).read(replica)
    }

    fn save(&self, replica: &str, records: &RecordSet) -> Result<(), ConsensusError> {
        (**self).save(replica, records)
    }
}

/// One pretty-printed JSON file per replica: `<dir>/node_<name>.json`.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        JsonFileStore { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, replica: &str) -> PathBuf {
        self.dir.join(format!("node_{}.json", replica.to_lowercase()))
    }
}

impl RecordStore for JsonFileStore {
    fn read(&self, replica: &str) -> Result<RecordSet, ConsensusError> {
        let path = self.path_for(replica);
        if !path.exists() {
            return Ok(RecordSet::default());
        }
        let json = fs::read_to_string(&path)
            .map_err(|e| ConsensusError::Storage(format!("{}: {e}", path.display())))?;
        serde_json::from_str(&json)
            .map_err(|e| ConsensusError::Storage(format!("{} contains invalid records: {e}", path.display())))
    }

    fn save(&self, replica: &str, records: &RecordSet) -> Result<(), ConsensusError> {
        fs::create_dir_all(&self.dir)
            .map_err(|e| ConsensusError::Storage(format!("{}: {e}", self.dir.display())))?;
        let path = self.path_for(replica);
        let json = serde_json::to_string_pretty(records)
            .map_err(|e| ConsensusError::Storage(e.to_string()))?;
        fs::write(&path, json)
            .map_err(|e| ConsensusError::Storage(format!("{}: {e}", path.display())))
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    sets: Mutex<HashMap<String, RecordSet>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

impl RecordStore for MemoryStore {
    fn read(&self, replica: &str) -> Result<RecordSet, ConsensusError> {
        let sets = self
            .sets
            .lock()
            .map_err(|_| ConsensusError::Storage("record store lock poisoned".to_string()))?;
        Ok(sets.get(replica).cloned().unwrap_or_default())
    }

    fn save(&self, replica: &str, records: &RecordSet) -> Result<(), ConsensusError> {
        let mut sets = self
            .sets
            .lock()
            .map_err(|_| ConsensusError::Storage("record store lock poisoned".to_string()))?;
        sets.insert(replica.to_string(), records.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(sequence: u64) -> PersistedRecord {
        PersistedRecord {
            record: "A:widget:10:5".to_string(),
            signature: BigUint::from(42u32),
            status: "committed".to_string(),
            sequence,
            view: 0,
            timestamp: Utc::now(),
            is_primary: true,
            partial_signatures: None,
        }
    }

    #[test]
    fn test_json_store_append_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("database"));

        assert_eq!(store.load("A").unwrap(), RecordSet::default());
        store.append("A", record(1)).unwrap();
        store.append("A", record(2)).unwrap();

        let loaded = store.load("A").unwrap();
        assert_eq!(loaded.records.len(), 2);
        assert_eq!(loaded.records[1].sequence, 2);
        assert!(store.path_for("A").ends_with("node_a.json"));
        assert!(store.load("B").unwrap().records.is_empty());
    }

    #[test]
    fn test_json_store_persisted_shape() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        store.append("A", record(1)).unwrap();

        let raw = fs::read_to_string(store.path_for("A")).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let entry = &value["records"][0];
        assert_eq!(entry["signature"], "42");
        assert_eq!(entry["status"], "committed");
        assert_eq!(entry["is_primary"], true);
        assert!(entry.get("partial_signatures").is_none());
        assert!(entry["timestamp"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn test_invalid_json_loads_empty_but_is_never_overwritten() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        fs::write(store.path_for("C"), "{ not json").unwrap();

        assert!(store.load("C").unwrap().records.is_empty());
        assert!(matches!(store.read("C"), Err(ConsensusError::Storage(_))));
        assert!(matches!(store.append("C", record(1)), Err(ConsensusError::Storage(_))));
        assert_eq!(fs::read_to_string(store.path_for("C")).unwrap(), "{ not json");
    }

    #[test]
    fn test_legacy_records_are_kept_on_append() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let legacy = r#"{
  "records": [
    {
      "record": "A:bolt:3:2",
      "signature": "12345",
      "verified_by": "PBFT",
      "timestamp": "2025-05-01T12:00:00.123456",
      "is_primary": true
    }
  ]
}"#;
        fs::write(store.path_for("A"), legacy).unwrap();

        let loaded = store.read("A").unwrap();
        assert_eq!(loaded.records.len(), 1);
        assert_eq!(loaded.records[0].status, "");
        assert_eq!(loaded.records[0].timestamp.to_rfc3339(), "2025-05-01T12:00:00.123456+00:00");

        store.append("A", record(1)).unwrap();
        let records: Vec<String> = store.read("A").unwrap().records.into_iter().map(|r| r.record).collect();
        assert_eq!(records, vec!["A:bolt:3:2", "A:widget:10:5"]);
    }

    #[test]
    fn test_timestamp_formats() {
        assert!(timestamp::parse("2025-05-01T12:00:00Z").is_some());
        assert!(timestamp::parse("2025-05-01T12:00:00+02:00").is_some());
        assert!(timestamp::parse("2025-05-01T12:00:00").is_some());
        assert!(timestamp::parse("yesterday").is_none());
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        store.append("B", record(7)).unwrap();
        assert_eq!(store.load("B").unwrap().records[0].sequence, 7);
        assert!(store.load("A").unwrap().records.is_empty());
    }
}
