use std::collections::{HashMap, VecDeque};
use std::path::Path;

use tracing::{event, Level};

use crate::error::{CoreError, Result};
use crate::index_descriptor::IndexDescriptor;

/// On-disk JSON form of an `IndexDescriptor` plus version; the two are the
/// same shape, so no separate wrapper type is needed.
pub type IndexSettingRecord = IndexDescriptor;

const HISTORY_CAP: usize = 3;
const CURRENT_FILE: &str = "marqo_index_settings.json";
const HISTORY_FILE: &str = "marqo_index_settings_history.json";

/// Append-only versioned registry for index settings, serialized to two JSON
/// files. The single authority for index versions: concurrent writers race
/// on the monotonic version check, giving optimistic compare-and-set.
#[derive(Clone, Debug, Default)]
pub struct SettingsStore {
    current: HashMap<String, IndexSettingRecord>,
    history: HashMap<String, VecDeque<IndexSettingRecord>>,
}

impl SettingsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&IndexSettingRecord> {
        self.current.get(name)
    }

    pub fn history_for(&self, name: &str) -> Vec<IndexSettingRecord> {
        self.history.get(name).map(|d| d.iter().cloned().collect()).unwrap_or_default()
    }

    /// Saves `record` at target version `T = record.version + 1`. Accepted
    /// only when `T` is exactly one past the currently stored version (or
    /// `T = 1` for a brand-new name); otherwise `OperationConflict`.
    pub fn save(&mut self, record: IndexSettingRecord) -> Result<IndexSettingRecord> {
        let name = record.name.clone();
        let target = record.version + 1;

        match self.current.get(&name) {
            Some(existing) => {
                if existing.version + 1 != target {
                    return Err(CoreError::OperationConflict(format!(
                        "index '{name}' is at version {}, save targeted version {target}",
                        existing.version
                    )));
                }
                let hist = self.history.entry(name.clone()).or_default();
                hist.push_front(existing.clone());
                hist.truncate(HISTORY_CAP);
            }
            None => {
                if target != 1 {
                    return Err(CoreError::OperationConflict(format!(
                        "index '{name}' does not exist, save targeted version {target}"
                    )));
                }
                // A previously deleted index's history is stale once recreated from scratch.
                self.history.remove(&name);
            }
        }

        let stored = record.with_next_version();
        self.current.insert(name.clone(), stored.clone());
        event!(Level::INFO, index = %name, version = stored.version, "index settings saved");
        Ok(stored)
    }

    /// Moves the current record (if any) to the head of its history,
    /// bounded to [`HISTORY_CAP`], and removes it from the current map. A
    /// name with no current record is a no-op, logged as a warning.
    pub fn delete(&mut self, name: &str) {
        match self.current.remove(name) {
            Some(existing) => {
                let hist = self.history.entry(name.to_string()).or_default();
                hist.push_front(existing);
                hist.truncate(HISTORY_CAP);
                event!(Level::INFO, index = %name, "index settings deleted");
            }
            None => {
                event!(Level::WARN, index = %name, "delete requested for unknown index");
            }
        }
    }

    pub fn save_to_disk(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        let current_json = serde_json::to_string_pretty(&self.current)?;
        std::fs::write(dir.join(CURRENT_FILE), current_json)?;
        let history_json = serde_json::to_string_pretty(&self.history)?;
        std::fs::write(dir.join(HISTORY_FILE), history_json)?;
        Ok(())
    }

    pub fn load_from_disk(dir: &Path) -> Result<Self> {
        let current_path = dir.join(CURRENT_FILE);
        let mut current: HashMap<String, IndexSettingRecord> = if current_path.exists() {
            serde_json::from_str(&std::fs::read_to_string(current_path)?)?
        } else {
            HashMap::new()
        };
        let history_path = dir.join(HISTORY_FILE);
        let mut history: HashMap<String, VecDeque<IndexSettingRecord>> = if history_path.exists() {
            serde_json::from_str(&std::fs::read_to_string(history_path)?)?
        } else {
            HashMap::new()
        };
        // field_maps is #[serde(skip)]; every record coming off disk needs it rebuilt.
        for record in current.values_mut() {
            record.rebuild_field_maps();
        }
        for records in history.values_mut() {
            for record in records.iter_mut() {
                record.rebuild_field_maps();
            }
        }
        Ok(Self { current, history })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{DistanceMetric, FieldDescriptor, FieldFeature, FieldType, HnswConfig};
    use crate::index_descriptor::{IndexType, ModelSpec};

    fn record(name: &str, version: u32) -> IndexSettingRecord {
        IndexDescriptor::new(
            name,
            IndexType::Structured,
            ModelSpec { name: "m".into(), dimension: 3 },
            DistanceMetric::Angular,
            HnswConfig::default(),
            vec![FieldDescriptor::new("t", FieldType::Text, [FieldFeature::LexicalSearch]).unwrap()],
            vec![],
            version,
        )
        .unwrap()
    }

    #[test]
    fn save_v1_then_v2() {
        let mut store = SettingsStore::new();
        let saved = store.save(record("A", 0)).unwrap();
        assert_eq!(saved.version, 1);
        assert!(store.history_for("A").is_empty());

        let saved = store.save(record("A", 1)).unwrap();
        assert_eq!(saved.version, 2);
        assert_eq!(store.history_for("A").len(), 1);
        assert_eq!(store.history_for("A")[0].version, 1);
    }

    #[test]
    fn conflicting_save_is_rejected() {
        let mut store = SettingsStore::new();
        store.save(record("A", 0)).unwrap();
        store.save(record("A", 1)).unwrap();

        let err = store.save(record("A", 1)).unwrap_err();
        assert!(matches!(err, CoreError::OperationConflict(_)));
        assert_eq!(store.get("A").unwrap().version, 2);
        assert_eq!(store.history_for("A").len(), 1);
    }

    #[test]
    fn delete_then_recreate() {
        let mut store = SettingsStore::new();
        store.save(record("A", 0)).unwrap();
        store.save(record("A", 1)).unwrap();

        store.delete("A");
        assert!(store.get("A").is_none());
        let hist = store.history_for("A");
        assert_eq!(hist.len(), 2);
        assert_eq!(hist[0].version, 2);
        assert_eq!(hist[1].version, 1);

        let saved = store.save(record("A", 0)).unwrap();
        assert_eq!(saved.version, 1);
        assert!(store.history_for("A").is_empty());
    }

    #[test]
    fn history_cap_at_three() {
        let mut store = SettingsStore::new();
        let mut version = 0;
        for _ in 0..5 {
            let saved = store.save(record("B", version)).unwrap();
            version = saved.version;
        }
        let hist = store.history_for("B");
        assert_eq!(hist.len(), 3);
        assert_eq!(hist[0].version, 4);
        assert_eq!(hist[1].version, 3);
        assert_eq!(hist[2].version, 2);
    }

    #[test]
    fn delete_of_unknown_name_is_a_no_op() {
        let mut store = SettingsStore::new();
        store.delete("ghost");
        assert!(store.get("ghost").is_none());
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SettingsStore::new();
        store.save(record("A", 0)).unwrap();
        store.save_to_disk(dir.path()).unwrap();

        let loaded = SettingsStore::load_from_disk(dir.path()).unwrap();
        assert_eq!(loaded.get("A").unwrap().version, 1);
    }

    #[test]
    fn field_maps_rebuilt_after_disk_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = SettingsStore::new();
        store.save(record("A", 0)).unwrap();
        store.save_to_disk(dir.path()).unwrap();

        let loaded = SettingsStore::load_from_disk(dir.path()).unwrap();
        let reloaded = loaded.get("A").unwrap();
        assert!(reloaded.field("t").is_some());
    }
}
