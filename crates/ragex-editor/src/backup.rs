use std::path::{Path, PathBuf};

use ragex_core::{RagexError, Result};
use tokio::io::AsyncWriteExt;

/// Metadata about one stored backup (§4.7 `rollback`/`history`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupInfo {
    pub id: String,
    pub path: String,
}

/// On-disk backup store, one subdirectory per edited path, one file per
/// backup id inside it. Ids are `YYYYMMDD_HHMMSS_<rand>` (§4.7 step 7), which
/// sorts lexicographically in creation order — `history` relies on that.
pub struct BackupStore {
    root: PathBuf,
}

impl BackupStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn dir_for(&self, path: &str) -> PathBuf {
        let encoded: String = path
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
            .collect();
        self.root.join(encoded)
    }

    pub async fn save(&self, path: &str, content: &[u8]) -> Result<String> {
        let dir = self.dir_for(path);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| RagexError::io(dir.display().to_string(), e))?;
        let id = fresh_backup_id();
        let file_path = dir.join(&id);
        write_atomic(&file_path, content).await?;
        Ok(id)
    }

    /// Loads the specified backup, or the most recent one for `path` if
    /// `backup_id` is `None`. Returns `NotFound` if there is none.
    pub async fn load(&self, path: &str, backup_id: Option<&str>) -> Result<(String, Vec<u8>)> {
        let dir = self.dir_for(path);
        let id = match backup_id {
            Some(id) => id.to_string(),
            None => self
                .most_recent_id(&dir)
                .await?
                .ok_or_else(|| RagexError::NotFound(format!("no backups for {path}")))?,
        };
        let bytes = tokio::fs::read(dir.join(&id))
            .await
            .map_err(|_| RagexError::NotFound(format!("backup {id} not found for {path}")))?;
        Ok((id, bytes))
    }

    pub async fn history(&self, path: &str, limit: usize) -> Result<Vec<BackupInfo>> {
        let dir = self.dir_for(path);
        let mut ids = self.list_ids(&dir).await?;
        ids.sort();
        ids.reverse();
        ids.truncate(limit);
        Ok(ids
            .into_iter()
            .map(|id| BackupInfo { id, path: path.to_string() })
            .collect())
    }

    async fn most_recent_id(&self, dir: &Path) -> Result<Option<String>> {
        let mut ids = self.list_ids(dir).await?;
        ids.sort();
        Ok(ids.pop())
    }

    async fn list_ids(&self, dir: &Path) -> Result<Vec<String>> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(e) => e,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(RagexError::io(dir.display().to_string(), e)),
        };
        let mut ids = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| RagexError::io(dir.display().to_string(), e))?
        {
            if let Some(name) = entry.file_name().to_str() {
                ids.push(name.to_string());
            }
        }
        Ok(ids)
    }
}

/// Monotonic counter folded into the id suffix so two backups taken in the
/// same wall-clock second still sort in creation order; pure randomness
/// can't promise that.
static BACKUP_SEQ: std::sync::atomic::AtomicU32 = std::sync::atomic::AtomicU32::new(0);

fn fresh_backup_id() -> String {
    let now = chrono::Utc::now();
    let seq = BACKUP_SEQ.fetch_add(1, std::sync::atomic::Ordering::SeqCst) % 1_000_000;
    format!("{}_{:06}", now.format("%Y%m%d_%H%M%S"), seq)
}

pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
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
    async fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let store = BackupStore::new(dir.path());
        let id = store.save("a.ex", b"hello").await.unwrap();
        let (loaded_id, bytes) = store.load("a.ex", None).await.unwrap();
        assert_eq!(loaded_id, id);
        assert_eq!(bytes, b"hello");
    }

    #[tokio::test]
    async fn load_with_no_backups_is_not_found() {
        let dir = tempdir().unwrap();
        let store = BackupStore::new(dir.path());
        let err = store.load("missing.ex", None).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn history_is_most_recent_first() {
        let dir = tempdir().unwrap();
        let store = BackupStore::new(dir.path());
        let id1 = store.save("a.ex", b"v1").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let id2 = store.save("a.ex", b"v2").await.unwrap();
        let history = store.history("a.ex", 10).await.unwrap();
        assert_eq!(history[0].id, id2);
        assert_eq!(history[1].id, id1);
    }
}
