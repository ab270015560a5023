use std::collections::HashMap;
use std::path::{Path, PathBuf};

use ragex_core::{now_ts, RagexError, Result};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::info;

/// `<home>/.ragex/undo/<project_hash>/`, mirroring `ragex_cache::paths`'s
/// project-hash scoping but rooted at the user's home directory rather than
/// the cache directory (§4.10 storage location).
pub fn undo_dir(project_root: &Path) -> PathBuf {
    let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    home.join(".ragex")
        .join("undo")
        .join(ragex_cache::project_hash(project_root))
}

/// A single snapshotted file's pre-operation content: inline bytes, or — once
/// an entry's total snapshot size exceeds the configured cap — a reference to
/// a sibling blob file. §4.10 leaves the oversized-entry strategy open; this
/// resolves it as an all-or-nothing switch for the whole entry rather than a
/// per-file threshold, so one entry never mixes storage kinds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SnapshotData {
    Inline(Vec<u8>),
    Referenced(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoEntry {
    pub id: String,
    pub operation: String,
    pub params: serde_json::Value,
    pub affected_files: Vec<String>,
    pub before_snapshots: HashMap<String, SnapshotData>,
    pub after_status: String,
    pub timestamp: i64,
    pub undone: bool,
    pub description: String,
}

/// The Undo History (C10): per-project ordered history of completed
/// refactors, each entry carrying before-snapshots of every file it touched,
/// persisted as one bincode-encoded file per entry (§4.10).
pub struct UndoHistory {
    dir: PathBuf,
    snapshot_cap_bytes: u64,
}

static UNDO_SEQ: std::sync::atomic::AtomicU32 = std::sync::atomic::AtomicU32::new(0);

impl UndoHistory {
    pub fn new(dir: impl Into<PathBuf>, snapshot_cap_bytes: u64) -> Self {
        Self {
            dir: dir.into(),
            snapshot_cap_bytes,
        }
    }

    /// Convenience constructor resolving the standard per-project location.
    pub fn for_project(project_root: &Path, snapshot_cap_bytes: u64) -> Self {
        Self::new(undo_dir(project_root), snapshot_cap_bytes)
    }

    fn entry_path(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.bin"))
    }

    fn blob_path(&self, id: &str, file_index: usize) -> PathBuf {
        self.dir.join("blobs").join(format!("{id}_{file_index}.blob"))
    }

    /// Snapshots every `affected_files`'s current contents — the caller must
    /// invoke this *before* applying its edits — and persists a new entry
    /// (§4.10 `push`).
    pub async fn push(
        &self,
        operation: &str,
        params: serde_json::Value,
        affected_files: &[String],
        after_status: &str,
        description: &str,
    ) -> Result<String> {
        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| RagexError::io(self.dir.display().to_string(), e))?;

        let mut raw: Vec<(String, Vec<u8>)> = Vec::with_capacity(affected_files.len());
        for path in affected_files {
            let bytes = tokio::fs::read(path).await.unwrap_or_default();
            raw.push((path.clone(), bytes));
        }
        let total: u64 = raw.iter().map(|(_, b)| b.len() as u64).sum();

        let id = fresh_entry_id();
        let mut before_snapshots = HashMap::new();
        if total > self.snapshot_cap_bytes {
            tokio::fs::create_dir_all(self.dir.join("blobs"))
                .await
                .map_err(|e| RagexError::io(self.dir.display().to_string(), e))?;
            for (i, (path, bytes)) in raw.iter().enumerate() {
                let blob_path = self.blob_path(&id, i);
                write_atomic(&blob_path, bytes).await?;
                before_snapshots.insert(
                    path.clone(),
                    SnapshotData::Referenced(blob_path.display().to_string()),
                );
            }
        } else {
            for (path, bytes) in raw {
                before_snapshots.insert(path, SnapshotData::Inline(bytes));
            }
        }

        let entry = UndoEntry {
            id: id.clone(),
            operation: operation.to_string(),
            params,
            affected_files: affected_files.to_vec(),
            before_snapshots,
            after_status: after_status.to_string(),
            timestamp: now_ts(),
            undone: false,
            description: description.to_string(),
        };
        self.save_entry(&entry).await?;
        info!(id = %entry.id, operation, files = affected_files.len(), "undo entry recorded");
        Ok(id)
    }

    async fn save_entry(&self, entry: &UndoEntry) -> Result<()> {
        let bytes = bincode::serde::encode_to_vec(entry, bincode::config::standard())?;
        write_atomic(&self.entry_path(&entry.id), &bytes).await
    }

    async fn load_entry(&self, id: &str) -> Result<UndoEntry> {
        let path = self.entry_path(id);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|e| RagexError::io(path.display().to_string(), e))?;
        let (entry, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())?;
        Ok(entry)
    }

    /// Restores the newest not-yet-undone entry's snapshotted files and marks
    /// it `undone`. Returns `None` if there is nothing left to undo; `undo()`
    /// is itself never recorded as a new entry (§4.10 semantics).
    pub async fn undo(&self) -> Result<Option<UndoEntry>> {
        let mut entries = self.list(usize::MAX, false).await?;
        entries.sort_by(|a, b| b.id.cmp(&a.id));
        let Some(mut entry) = entries.into_iter().next() else {
            return Ok(None);
        };

        for (path, snapshot) in &entry.before_snapshots {
            let bytes = match snapshot {
                SnapshotData::Inline(b) => b.clone(),
                SnapshotData::Referenced(blob_path) => tokio::fs::read(blob_path)
                    .await
                    .map_err(|e| RagexError::io(blob_path.clone(), e))?,
            };
            if let Some(parent) = Path::new(path).parent() {
                let _ = tokio::fs::create_dir_all(parent).await;
            }
            write_atomic(Path::new(path), &bytes).await?;
        }

        entry.undone = true;
        self.save_entry(&entry).await?;
        Ok(Some(entry))
    }

    /// Most-recent-first (§4.10 `list`).
    pub async fn list(&self, limit: usize, include_undone: bool) -> Result<Vec<UndoEntry>> {
        let mut ids = self.entry_ids().await?;
        ids.sort();
        ids.reverse();
        let mut out = Vec::new();
        for id in ids {
            if out.len() >= limit {
                break;
            }
            let entry = self.load_entry(&id).await?;
            if entry.undone && !include_undone {
                continue;
            }
            out.push(entry);
        }
        Ok(out)
    }

    /// Deletes every entry older than the `keep_last` most recent, returning
    /// the number removed (§4.10 `clear`).
    pub async fn clear(&self, keep_last: usize) -> Result<usize> {
        let mut ids = self.entry_ids().await?;
        ids.sort();
        ids.reverse();
        let stale = ids.split_off(keep_last.min(ids.len()));
        for id in &stale {
            let _ = tokio::fs::remove_file(self.entry_path(id)).await;
        }
        Ok(stale.len())
    }

    async fn entry_ids(&self) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(RagexError::io(self.dir.display().to_string(), e)),
        };
        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| RagexError::io(self.dir.display().to_string(), e))?
        {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(id) = name.strip_suffix(".bin") {
                    ids.push(id.to_string());
                }
            }
        }
        Ok(ids)
    }
}

/// Mirrors `ragex-editor`'s backup id scheme: timestamp plus a monotonic
/// sequence, so entries created within the same second still sort correctly.
fn fresh_entry_id() -> String {
    let now = chrono::Utc::now();
    let seq = UNDO_SEQ.fetch_add(1, std::sync::atomic::Ordering::SeqCst) % 1_000_000;
    format!("{}_{:06}", now.format("%Y%m%d_%H%M%S"), seq)
}

/// `ragex-editor::backup::write_atomic` is crate-private, so this history
/// keeps its own copy of the same write-temp-then-rename discipline.
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| RagexError::io(dir.display().to_string(), e))?;
    let rand_suffix: u64 = rand::random();
    let tmp_path = dir.join(format!(
        "{}.ragex_tmp.{:x}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("file"),
        rand_suffix
    ));

    let mut file = tokio::fs::File::create(&tmp_path)
        .await
        .map_err(|e| RagexError::io(tmp_path.display().to_string(), e))?;
    file.write_all(bytes)
        .await
        .map_err(|e| RagexError::io(tmp_path.display().to_string(), e))?;
    file.sync_all()
        .await
        .map_err(|e| RagexError::io(tmp_path.display().to_string(), e))?;
    drop(file);

    tokio::fs::rename(&tmp_path, path)
        .await
        .map_err(|e| RagexError::io(path.display().to_string(), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn push_then_undo_restores_original_content() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.ex");
        tokio::fs::write(&file, "original\n").await.unwrap();

        let history = UndoHistory::new(dir.path().join("undo"), 10 * 1024 * 1024);
        let path = file.to_str().unwrap().to_string();
        history
            .push("rename-function", serde_json::json!({"old": "foo"}), &[path.clone()], "success", "test")
            .await
            .unwrap();

        tokio::fs::write(&file, "changed\n").await.unwrap();
        let restored = history.undo().await.unwrap().expect("entry to undo");
        assert!(restored.undone);
        assert_eq!(tokio::fs::read_to_string(&file).await.unwrap(), "original\n");
    }

    #[tokio::test]
    async fn undo_with_no_entries_returns_none() {
        let dir = tempdir().unwrap();
        let history = UndoHistory::new(dir.path().join("undo"), 10 * 1024 * 1024);
        assert!(history.undo().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_excludes_undone_unless_requested() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.ex");
        tokio::fs::write(&file, "v1\n").await.unwrap();
        let history = UndoHistory::new(dir.path().join("undo"), 10 * 1024 * 1024);
        let path = file.to_str().unwrap().to_string();

        history.push("op1", serde_json::json!({}), &[path.clone()], "success", "first").await.unwrap();
        history.undo().await.unwrap();
        history.push("op2", serde_json::json!({}), &[path], "success", "second").await.unwrap();

        let active = history.list(10, false).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].operation, "op2");

        let all = history.list(10, true).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].operation, "op2");
    }

    #[tokio::test]
    async fn oversized_entry_stores_references_not_inline_bytes() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("big.ex");
        tokio::fs::write(&file, vec![b'x'; 64]).await.unwrap();

        let history = UndoHistory::new(dir.path().join("undo"), 8);
        let path = file.to_str().unwrap().to_string();
        let id = history
            .push("move-function", serde_json::json!({}), &[path.clone()], "success", "big move")
            .await
            .unwrap();

        let entry = history.load_entry(&id).await.unwrap();
        assert!(matches!(entry.before_snapshots.get(&path), Some(SnapshotData::Referenced(_))));
    }

    #[tokio::test]
    async fn clear_keeps_only_most_recent_entries() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.ex");
        tokio::fs::write(&file, "v\n").await.unwrap();
        let history = UndoHistory::new(dir.path().join("undo"), 10 * 1024 * 1024);
        let path = file.to_str().unwrap().to_string();

        for i in 0..3 {
            history
                .push(&format!("op{i}"), serde_json::json!({}), &[path.clone()], "success", "d")
                .await
                .unwrap();
        }
        let removed = history.clear(1).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(history.list(10, true).await.unwrap().len(), 1);
    }
}
