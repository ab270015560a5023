use std::collections::HashMap;

use parking_lot::RwLock;
use ragex_core::FileTrackingRecord;

/// The file-tracking table (§3): a bijection from file path to record,
/// used by the Incremental Indexer to detect new/changed/deleted files.
#[derive(Default)]
pub struct FileTrackingTable {
    records: RwLock<HashMap<String, FileTrackingRecord>>,
}

impl FileTrackingTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: &str) -> Option<FileTrackingRecord> {
        self.records.read().get(path).cloned()
    }

    pub fn upsert(&self, record: FileTrackingRecord) {
        self.records.write().insert(record.path.clone(), record);
    }

    pub fn remove(&self, path: &str) -> Option<FileTrackingRecord> {
        self.records.write().remove(path)
    }

    pub fn all_paths(&self) -> Vec<String> {
        self.records.read().keys().cloned().collect()
    }

    pub fn all_records(&self) -> Vec<FileTrackingRecord> {
        self.records.read().values().cloned().collect()
    }

    pub fn clear(&self) {
        self.records.write().clear();
    }

    /// Replaces the whole table with a previously exported record set.
    /// Used by `ragex-cache::load()`.
    pub fn import(&self, records: Vec<FileTrackingRecord>) {
        let mut t = self.records.write();
        t.clear();
        for r in records {
            t.insert(r.path.clone(), r);
        }
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
