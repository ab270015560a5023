use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use ragex_core::{
    now_ts, Analyzer, Embedder, EntityId, EntityRef, FileTrackingRecord, RagexError, Result,
    RetryConfig,
};
use ragex_graph::{EdgeType, FileTrackingTable, GraphStore, NodeData};
use ragex_vector::EmbeddingStore;
use sha2::{Digest, Sha256};
use tracing::{debug, info, info_span, warn};

use crate::cancellation::CancellationToken;
use crate::fingerprint::{function_fingerprint, hash, module_fingerprint};
use crate::walk::discover_files;

#[derive(Debug, Clone, Default)]
pub struct IndexReport {
    pub files_analyzed: usize,
    pub files_skipped: usize,
    pub files_failed: usize,
    pub files_removed: usize,
    pub embeddings_regenerated: usize,
    pub truncated: bool,
}

/// The Incremental Indexer (C4). Orchestrates `Analyzer`/`Embedder`
/// collaborators against a shared `GraphStore`/`EmbeddingStore`/
/// `FileTrackingTable`, borrowed mutably for the duration of a run.
pub struct Indexer {
    graph: Arc<GraphStore>,
    files: Arc<FileTrackingTable>,
    embeddings: Arc<EmbeddingStore>,
    analyzer: Arc<dyn Analyzer>,
    embedder: Arc<dyn Embedder>,
    retry: RetryConfig,
}

impl Indexer {
    pub fn new(
        graph: Arc<GraphStore>,
        files: Arc<FileTrackingTable>,
        embeddings: Arc<EmbeddingStore>,
        analyzer: Arc<dyn Analyzer>,
        embedder: Arc<dyn Embedder>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            graph,
            files,
            embeddings,
            analyzer,
            embedder,
            retry,
        }
    }

    /// Indexes a directory (§4.4). `explicit_files`, if given, restricts
    /// the walk to exactly those paths (still subject to extension
    /// filtering) instead of walking `root`.
    pub async fn index_directory(
        &self,
        root: &Path,
        recursive: bool,
        excludes: &[String],
        explicit_files: Option<Vec<std::path::PathBuf>>,
        cancel: &CancellationToken,
    ) -> Result<IndexReport> {
        let span = info_span!("index_directory", root = %root.display());
        let _enter = span.enter();

        let extensions = self.analyzer.supported_extensions();
        let candidates = match explicit_files {
            Some(files) => {
                let mut files = files;
                files.sort();
                files
            }
            None => discover_files(root, recursive, &extensions, excludes),
        };

        let mut report = IndexReport::default();

        for path in &candidates {
            if cancel.is_cancelled() {
                report.truncated = true;
                warn!("index run cancelled before completion");
                break;
            }
            match self.index_one_file(path).await {
                Ok(Outcome::Analyzed { embeddings_regenerated }) => {
                    report.files_analyzed += 1;
                    report.embeddings_regenerated += embeddings_regenerated;
                }
                Ok(Outcome::Unchanged) => report.files_skipped += 1,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "per-file analysis failed, recovering");
                    self.mark_failed(path).await;
                    report.files_failed += 1;
                }
            }
        }

        // Any tracked path that no longer exists loses its entities (§4.4 step 3).
        let tracked = self.files.all_paths();
        for path in tracked {
            if !Path::new(&path).exists() {
                self.remove_file(&path);
                report.files_removed += 1;
            }
        }

        info!(
            analyzed = report.files_analyzed,
            skipped = report.files_skipped,
            failed = report.files_failed,
            removed = report.files_removed,
            "index run finished"
        );
        Ok(report)
    }

    pub async fn index_file(&self, path: &Path) -> Result<IndexReport> {
        let mut report = IndexReport::default();
        match self.index_one_file(path).await {
            Ok(Outcome::Analyzed { embeddings_regenerated }) => {
                report.files_analyzed = 1;
                report.embeddings_regenerated = embeddings_regenerated;
            }
            Ok(Outcome::Unchanged) => report.files_skipped = 1,
            Err(e) => {
                self.mark_failed(path).await;
                report.files_failed = 1;
                return Err(e);
            }
        }
        Ok(report)
    }

    async fn index_one_file(&self, path: &Path) -> Result<Outcome> {
        let path_str = path.to_string_lossy().to_string();
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| RagexError::io(path_str.clone(), e))?;
        let content_hash = sha256(&bytes);
        let size = bytes.len() as u64;

        if let Some(existing) = self.files.get(&path_str) {
            if !existing.failed && existing.content_hash == content_hash && existing.size == size {
                debug!(path = %path_str, "unchanged, skipping");
                return Ok(Outcome::Unchanged);
            }
            // Changed (or previously failed): drop the old entity set first.
            self.remove_entities(&existing.entities);
        }

        let analysis = self.analyzer.analyze(&bytes, &path_str).await?;

        let mut entity_refs = Vec::new();
        for m in &analysis.modules {
            self.graph.add_node(NodeData::Module(m.clone()));
            entity_refs.push(EntityRef::Module(m.id.clone()));
        }
        for f in &analysis.functions {
            self.graph.add_node(NodeData::Function(f.clone()));
            entity_refs.push(EntityRef::Function(f.id.clone()));
            self.graph.add_edge(
                EntityId::Module(f.id.module.clone()),
                EntityId::Function(f.id.clone()),
                EdgeType::Defines,
            );
        }
        for call in &analysis.calls {
            if let ragex_core::CallTarget::Resolved(to) = &call.to {
                self.graph.add_edge(
                    EntityId::Function(call.from.clone()),
                    EntityId::Function(to.clone()),
                    EdgeType::Calls,
                );
            }
            // Unresolved targets are kept on the Call edge payload only;
            // the graph does not materialize a phantom node for them.
        }
        for import in &analysis.imports {
            self.graph.add_edge(
                EntityId::Module(import.from_module.clone()),
                EntityId::Module(import.to_module.clone()),
                EdgeType::Imports,
            );
        }

        self.files.upsert(FileTrackingRecord {
            path: path_str.clone(),
            content_hash,
            mtime: file_mtime(path),
            size,
            entities: entity_refs,
            analyzed_at: now_ts(),
            failed: false,
        });

        let regenerated = self.refresh_embeddings(&analysis).await;

        Ok(Outcome::Analyzed {
            embeddings_regenerated: regenerated,
        })
    }

    /// Embeds every new/changed entity whose fingerprint hash differs from
    /// what's already stored; reuses the existing embedding otherwise
    /// (§4.4 "Embedding generation").
    async fn refresh_embeddings(&self, analysis: &ragex_core::Analysis) -> usize {
        let mut regenerated = 0;
        let mut pending: Vec<(EntityId, String, [u8; 32])> = Vec::new();

        for m in &analysis.modules {
            let id = EntityId::Module(m.id.clone());
            let text = module_fingerprint(m);
            let text_hash = hash(&text);
            if self.embeddings.text_hash(&id) != Some(text_hash) {
                pending.push((id, text, text_hash));
            }
        }
        for f in &analysis.functions {
            let id = EntityId::Function(f.id.clone());
            let text = function_fingerprint(f);
            let text_hash = hash(&text);
            if self.embeddings.text_hash(&id) != Some(text_hash) {
                pending.push((id, text, text_hash));
            }
        }

        if pending.is_empty() {
            return 0;
        }

        let texts: Vec<String> = pending.iter().map(|(_, t, _)| t.clone()).collect();
        match self.embed_with_retry(&texts).await {
            Ok(vectors) => {
                for ((id, _, text_hash), vector) in pending.into_iter().zip(vectors) {
                    if self
                        .embeddings
                        .put(self.embedder.model_id(), id, vector, text_hash)
                        .is_ok()
                    {
                        regenerated += 1;
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "embedder failed after retries; entities left searchable by graph only");
            }
        }

        regenerated
    }

    async fn embed_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut attempt = 0;
        loop {
            match self.embedder.embed(texts).await {
                Ok(v) => return Ok(v),
                Err(e) => {
                    attempt += 1;
                    if attempt >= self.retry.max_attempts {
                        return Err(RagexError::Upstream(e.to_string()));
                    }
                    let backoff = self.retry.backoff_base_ms * 2u64.pow(attempt - 1);
                    tokio::time::sleep(Duration::from_millis(backoff)).await;
                }
            }
        }
    }

    fn remove_entities(&self, entities: &[EntityRef]) {
        for e in entities {
            let id: EntityId = e.clone().into();
            self.graph.remove_node(&id);
            self.embeddings.delete(&id);
        }
    }

    fn remove_file(&self, path: &str) {
        if let Some(record) = self.files.remove(path) {
            self.remove_entities(&record.entities);
        }
    }

    async fn mark_failed(&self, path: &Path) {
        let path_str = path.to_string_lossy().to_string();
        let content_hash = tokio::fs::read(path)
            .await
            .map(|b| sha256(&b))
            .unwrap_or([0u8; 32]);
        let size = tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);
        self.files.upsert(FileTrackingRecord {
            path: path_str,
            content_hash,
            mtime: file_mtime(path),
            size,
            entities: vec![],
            analyzed_at: now_ts(),
            failed: true,
        });
    }
}

enum Outcome {
    Analyzed { embeddings_regenerated: usize },
    Unchanged,
}

fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

fn file_mtime(path: &Path) -> i64 {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
