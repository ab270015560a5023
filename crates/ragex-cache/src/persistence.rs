use std::path::{Path, PathBuf};

use ragex_core::{now_ts, CacheMetadata, RagexError, Result};
use ragex_graph::{Edge, FileTrackingTable, GraphStore, NodeData};
use ragex_vector::EmbeddingStore;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::framing::{blank_metadata, decode_frame, encode_frame, header_only_valid};
use crate::paths::{cache_dir, embeddings_path, graph_path};

#[derive(Serialize, Deserialize)]
struct GraphSnapshot {
    nodes: Vec<NodeData>,
    edges: Vec<Edge>,
    file_tracking: Vec<ragex_core::FileTrackingRecord>,
}

#[derive(Debug, Clone, Default)]
pub struct CacheStatsReport {
    pub metadata: Option<CacheMetadata>,
    pub graph_bytes: u64,
    pub embeddings_bytes: u64,
}

#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    pub graph_loaded: bool,
    pub embeddings_loaded: bool,
}

/// Persistence (C1): compressed binary snapshots of the graph and
/// embedding tables, scoped to a project-hash cache directory.
pub struct Persistence {
    project_root: PathBuf,
    cache_root_override: Option<String>,
}

impl Persistence {
    pub fn new(project_root: impl Into<PathBuf>, cache_root_override: Option<String>) -> Self {
        Self {
            project_root: project_root.into(),
            cache_root_override,
        }
    }

    fn dir(&self) -> PathBuf {
        cache_dir(&self.project_root, self.cache_root_override.as_deref())
    }

    /// Writes both `graph.bin` and `embeddings.bin` atomically (write to a
    /// temp file in the same directory, fsync, rename). Returns the cache
    /// directory path.
    pub async fn save(
        &self,
        graph: &GraphStore,
        files: &FileTrackingTable,
        embeddings: &EmbeddingStore,
    ) -> Result<PathBuf> {
        let dir = self.dir();
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| RagexError::io(dir.display().to_string(), e))?;

        let snapshot = GraphSnapshot {
            nodes: graph.export_nodes(),
            edges: graph.export_edges(),
            file_tracking: files.all_records(),
        };
        let graph_payload = bincode::serde::encode_to_vec(&snapshot, bincode::config::standard())?;
        let graph_meta = blank_metadata(0, snapshot.nodes.len() as u32);
        atomic_write(&graph_path(&dir), &encode_frame(&graph_meta, &graph_payload)?).await?;

        let records = embeddings.export();
        let embed_payload = bincode::serde::encode_to_vec(&records, bincode::config::standard())?;
        let embed_meta = CacheMetadata {
            version: graph_meta.version,
            model_id: embeddings.model_id().unwrap_or_default(),
            model_repo: String::new(),
            dimensions: embeddings.stats().dimension,
            timestamp: now_ts(),
            entity_count: records.len() as u32,
        };
        atomic_write(
            &embeddings_path(&dir),
            &encode_frame(&embed_meta, &embed_payload)?,
        )
        .await?;

        info!(dir = %dir.display(), "persistence: save completed");
        Ok(dir)
    }

    /// Loads `graph.bin` unconditionally (it carries no model dependency)
    /// and `embeddings.bin` only if its recorded dimensions match
    /// `expected_dimensions`. A dimension mismatch or corrupt embeddings
    /// file discards the embedding cache and returns `Err(Integrity)`
    /// *after* the graph has already been populated into `graph`/`files` —
    /// matching the spec's scenario 6 (graph loads even when the embedder
    /// changed). Corrupt/missing files of either kind are logged and
    /// treated as absent, never panicking (§4.1, §7).
    pub async fn load(
        &self,
        graph: &GraphStore,
        files: &FileTrackingTable,
        embeddings: &EmbeddingStore,
        expected_dimensions: u16,
    ) -> Result<LoadReport> {
        let dir = self.dir();
        let mut report = LoadReport::default();

        match tokio::fs::read(graph_path(&dir)).await {
            Ok(bytes) => match decode_frame(&bytes) {
                Ok(frame) => match bincode::serde::decode_from_slice::<GraphSnapshot, _>(
                    &frame.payload,
                    bincode::config::standard(),
                ) {
                    Ok((snapshot, _)) => {
                        graph.import(snapshot.nodes, snapshot.edges);
                        files.import(snapshot.file_tracking);
                        report.graph_loaded = true;
                    }
                    Err(e) => warn!(error = %e, "persistence: graph cache payload corrupt, starting empty"),
                },
                Err(e) => warn!(error = %e, "persistence: graph cache header invalid, starting empty"),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(error = %e, "persistence: graph cache unreadable, starting empty"),
        }

        let embed_bytes = match tokio::fs::read(embeddings_path(&dir)).await {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(report),
            Err(e) => {
                warn!(error = %e, "persistence: embeddings cache unreadable, starting empty");
                return Ok(report);
            }
        };

        let frame = match decode_frame(&embed_bytes) {
            Ok(f) => f,
            Err(e) => {
                warn!(error = %e, "persistence: embeddings cache corrupt, discarding");
                return Err(RagexError::Integrity(e.to_string()));
            }
        };

        if frame.metadata.dimensions != expected_dimensions {
            warn!(
                stored = frame.metadata.dimensions,
                expected = expected_dimensions,
                "persistence: embedding model incompatible, cache discarded"
            );
            return Err(RagexError::Integrity(format!(
                "model incompatible: cache has {} dims, current embedder has {} dims",
                frame.metadata.dimensions, expected_dimensions
            )));
        }

        let (records, _): (Vec<ragex_core::EmbeddingRecord>, usize) =
            bincode::serde::decode_from_slice(&frame.payload, bincode::config::standard())?;
        embeddings.import(&frame.metadata.model_id, frame.metadata.dimensions, records);
        report.embeddings_loaded = true;
        Ok(report)
    }

    /// Header-only validity check for the graph cache file (§4.1).
    pub fn cache_valid(&self) -> bool {
        let path = graph_path(&self.dir());
        match std::fs::read(path) {
            Ok(bytes) => header_only_valid(&bytes),
            Err(_) => false,
        }
    }

    pub fn stats(&self) -> Result<CacheStatsReport> {
        let dir = self.dir();
        let graph_bytes = std::fs::metadata(graph_path(&dir)).map(|m| m.len()).unwrap_or(0);
        let embeddings_bytes = std::fs::metadata(embeddings_path(&dir))
            .map(|m| m.len())
            .unwrap_or(0);
        let metadata = std::fs::read(embeddings_path(&dir))
            .ok()
            .and_then(|bytes| decode_frame(&bytes).ok())
            .map(|f| f.metadata);
        Ok(CacheStatsReport {
            metadata,
            graph_bytes,
            embeddings_bytes,
        })
    }

    pub fn clear(&self) -> Result<()> {
        let dir = self.dir();
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(RagexError::io(dir.display().to_string(), e)),
        }
    }
}

async fn atomic_write(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let rand_suffix: u64 = rand::random();
    let tmp_path = dir.join(format!(
        "{}.ragex_tmp.{:x}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("cache"),
        rand_suffix
    ));

    let mut file = tokio::fs::File::create(&tmp_path)
        .await
        .map_err(|e| RagexError::io(tmp_path.display().to_string(), e))?;
    use tokio::io::AsyncWriteExt;
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
    use ragex_core::{Function, FunctionId, Language, ModuleId, Visibility};
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn func(name: &str) -> NodeData {
        NodeData::Function(Function {
            id: FunctionId::new(ModuleId::new(Language::Elixir, "M"), name, 0),
            file: "m.ex".into(),
            line: 1,
            doc: None,
            visibility: Visibility::Public,
            metadata: HashMap::new(),
        })
    }

    #[tokio::test]
    async fn save_then_load_round_trips_graph_and_embeddings() {
        let project = tempdir().unwrap();
        let cache = tempdir().unwrap();
        let persistence = Persistence::new(
            project.path(),
            Some(cache.path().to_string_lossy().to_string()),
        );

        let graph = GraphStore::new();
        let files = FileTrackingTable::new();
        let embeddings = EmbeddingStore::new();

        let f = func("foo");
        let id = f.id();
        graph.add_node(f);
        embeddings.put("model-a", id.clone(), vec![1.0, 0.0], [1u8; 32]).unwrap();

        persistence.save(&graph, &files, &embeddings).await.unwrap();

        let graph2 = GraphStore::new();
        let files2 = FileTrackingTable::new();
        let embeddings2 = EmbeddingStore::new();
        let report = persistence
            .load(&graph2, &files2, &embeddings2, 2)
            .await
            .unwrap();

        assert!(report.graph_loaded);
        assert!(report.embeddings_loaded);
        assert!(graph2.find_node(&id).is_some());
        assert_eq!(embeddings2.get(&id), embeddings.get(&id));
    }

    #[tokio::test]
    async fn load_with_dimension_mismatch_still_loads_graph() {
        let project = tempdir().unwrap();
        let cache = tempdir().unwrap();
        let persistence = Persistence::new(
            project.path(),
            Some(cache.path().to_string_lossy().to_string()),
        );

        let graph = GraphStore::new();
        let files = FileTrackingTable::new();
        let embeddings = EmbeddingStore::new();
        let f = func("foo");
        let id = f.id();
        graph.add_node(f);
        embeddings.put("model-a", id.clone(), vec![1.0, 0.0], [1u8; 32]).unwrap();
        persistence.save(&graph, &files, &embeddings).await.unwrap();

        let graph2 = GraphStore::new();
        let files2 = FileTrackingTable::new();
        let embeddings2 = EmbeddingStore::new();
        let result = persistence.load(&graph2, &files2, &embeddings2, 768).await;

        assert!(result.is_err());
        assert!(graph2.find_node(&id).is_some());
        assert!(embeddings2.get(&id).is_none());
    }

    #[tokio::test]
    async fn load_on_missing_cache_is_empty_not_error() {
        let project = tempdir().unwrap();
        let cache = tempdir().unwrap();
        let persistence = Persistence::new(
            project.path(),
            Some(cache.path().to_string_lossy().to_string()),
        );
        let graph = GraphStore::new();
        let files = FileTrackingTable::new();
        let embeddings = EmbeddingStore::new();
        let report = persistence.load(&graph, &files, &embeddings, 384).await.unwrap();
        assert!(!report.graph_loaded);
        assert!(!report.embeddings_loaded);
    }

    #[test]
    fn clear_on_nonexistent_dir_is_ok() {
        let project = tempdir().unwrap();
        let cache = tempdir().unwrap();
        let persistence = Persistence::new(
            project.path(),
            Some(cache.path().join("nope").to_string_lossy().to_string()),
        );
        assert!(persistence.clear().is_ok());
    }
}
