//! The facade tying every collaborator into one engine (§6): one async
//! method per tool row, backed by the Persistence / Graph Store /
//! Embedding Store / Indexer / Editor Core / Transaction Engine / AST
//! Refactor Operators / Undo History crates.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use ragex_cache::Persistence;
use ragex_core::{
    Analyzer, Change, Embedder, EngineConfig, EntityId, Formatter, ModuleId, Result, Validator,
    Visibility,
};
use ragex_editor::{BackupInfo, EditOptions, EditResult, Editor, Transaction, TxnOptions, TxnResult};
use ragex_graph::{find_paths, graph_stats, GraphStatsReport, GraphStore, NodeData};
use ragex_indexer::{CancellationToken, IndexReport, Indexer};
use ragex_refactor::{
    AttributeChanges, ExtractModuleOptions, ExtractOptions, MoveOptions, RefactorEngine,
    RefactorResult, Scope, SignatureChanges, UndoEntry, UndoHistory, VisibilityOptions,
};
use ragex_retrieval::{hybrid_search as hybrid_search_fn, semantic_search as semantic_search_fn};
use ragex_vector::EmbeddingStore;

/// One variant per AST Refactor Operator (§4.9), carrying exactly the
/// parameters its `RefactorEngine` method needs. Keeps `refactor_code` a
/// single dispatch point instead of ten near-identical public methods.
pub enum RefactorOperation {
    RenameFunction {
        module: ModuleId,
        old: String,
        new: String,
        arity: Option<u16>,
        scope: Scope,
    },
    RenameModule {
        old: String,
        new: String,
    },
    ExtractFunction {
        module: ModuleId,
        source_fn: String,
        arity: u16,
        new_name: String,
        line_range: (u32, u32),
        opts: ExtractOptions,
    },
    InlineFunction {
        module: ModuleId,
        fn_name: String,
        arity: u16,
    },
    MoveFunction {
        src_module: ModuleId,
        tgt_module: ModuleId,
        fn_name: String,
        arity: u16,
        opts: MoveOptions,
    },
    ConvertVisibility {
        module: ModuleId,
        fn_name: String,
        arity: u16,
        target: Visibility,
        opts: VisibilityOptions,
    },
    RenameParameter {
        module: ModuleId,
        fn_name: String,
        arity: u16,
        old: String,
        new: String,
    },
    ChangeSignature {
        module: ModuleId,
        fn_name: String,
        old_arity: u16,
        changes: SignatureChanges,
    },
    ExtractModule {
        src_module: ModuleId,
        new_module: ModuleId,
        functions: Vec<(String, u16)>,
        opts: ExtractModuleOptions,
    },
    ModifyAttributes {
        path: String,
        changes: AttributeChanges,
    },
}

/// `RagexEngine` (§6): the single entry point a host process (an MCP
/// server, a CLI) constructs once per project and calls for every tool
/// invocation. Owns the in-memory stores, the indexing/editing/refactor
/// collaborators, and the project's cache/undo locations.
pub struct RagexEngine {
    graph: Arc<GraphStore>,
    embeddings: Arc<EmbeddingStore>,
    files: Arc<ragex_graph::FileTrackingTable>,
    indexer: Indexer,
    editor: Arc<Editor>,
    persistence: Persistence,
    refactor: RefactorEngine,
    undo: Arc<UndoHistory>,
    embedder: Arc<dyn Embedder>,
    config: EngineConfig,
}

impl RagexEngine {
    /// Opens (or creates) a project: loads any existing cache snapshot,
    /// then wires the rest of the collaborators around the now-populated
    /// stores (§4.1 "load on startup").
    pub async fn open(
        project_root: impl Into<PathBuf>,
        analyzer: Arc<dyn Analyzer>,
        embedder: Arc<dyn Embedder>,
        validator: Option<Arc<dyn Validator>>,
        formatter: Option<Arc<dyn Formatter>>,
        config: EngineConfig,
    ) -> Result<Self> {
        let project_root = project_root.into();
        let graph = Arc::new(GraphStore::new());
        let embeddings = Arc::new(EmbeddingStore::new());
        let files = Arc::new(ragex_graph::FileTrackingTable::new());

        let persistence = Persistence::new(project_root.clone(), config.cache_root_override.clone());
        persistence
            .load(&graph, &files, &embeddings, embedder.dimension())
            .await?;

        let indexer = Indexer::new(
            graph.clone(),
            files.clone(),
            embeddings.clone(),
            analyzer,
            embedder.clone(),
            config.embedder_retry,
        );

        let backup_root = project_root.join(".ragex").join("backups");
        let editor = Arc::new(Editor::new(backup_root, validator, formatter));
        let undo = Arc::new(UndoHistory::for_project(&project_root, config.undo_snapshot_cap_bytes));
        let refactor = RefactorEngine::new(graph.clone(), editor.clone(), undo.clone());

        Ok(Self {
            graph,
            embeddings,
            files,
            indexer,
            editor,
            persistence,
            refactor,
            undo,
            embedder,
            config,
        })
    }

    /// Flushes the current graph/embedding state to the cache directory
    /// (§4.1), e.g. on clean shutdown.
    pub async fn save(&self) -> Result<PathBuf> {
        self.persistence.save(&self.graph, &self.files, &self.embeddings).await
    }

    pub async fn analyze_file(&self, path: &Path) -> Result<IndexReport> {
        self.indexer.index_file(path).await
    }

    pub async fn analyze_directory(
        &self,
        root: &Path,
        recursive: bool,
        excludes: &[String],
    ) -> Result<IndexReport> {
        let cancel = CancellationToken::new();
        self.indexer.index_directory(root, recursive, excludes, None, &cancel).await
    }

    pub fn graph_stats(&self) -> GraphStatsReport {
        graph_stats(&self.graph, &self.config.pagerank)
    }

    /// `kind` restricts to `"module"` or `"function"`; `None` returns both.
    pub fn list_nodes(&self, kind: Option<&str>, limit: Option<usize>) -> Vec<NodeData> {
        self.graph
            .list_nodes(|n| kind.map(|k| n.node_type() == k).unwrap_or(true), limit)
    }

    pub async fn semantic_search(
        &self,
        query: &str,
        k: usize,
        threshold: Option<f32>,
    ) -> Result<Vec<(EntityId, f32)>> {
        semantic_search_fn(&self.embeddings, self.embedder.as_ref(), query, k, threshold).await
    }

    pub async fn hybrid_search(&self, query: &str, limit: usize) -> Result<Vec<(EntityId, f64)>> {
        hybrid_search_fn(
            &self.graph,
            &self.embeddings,
            self.embedder.as_ref(),
            query,
            limit,
            self.config.rrf_k,
        )
        .await
    }

    pub fn find_paths(&self, from: &EntityId, to: &EntityId) -> Vec<Vec<EntityId>> {
        find_paths(&self.graph, from, to, &self.config.path_finding)
    }

    pub async fn edit_file(&self, path: &str, changes: &[Change], opts: &EditOptions) -> Result<EditResult> {
        self.editor.edit_file(path, changes, opts).await
    }

    /// Applies every `(path, changes)` pair as one transaction (§4.8).
    pub async fn edit_files(
        &self,
        edits: Vec<(String, Vec<Change>, Option<EditOptions>)>,
        opts: TxnOptions,
    ) -> Result<TxnResult> {
        let mut txn = Transaction::new(self.editor.clone(), opts);
        for (path, changes, per_file_opts) in edits {
            txn.add(path, changes, per_file_opts);
        }
        txn.commit().await
    }

    pub async fn validate_edit(&self, path: &str, changes: &[Change], opts: &EditOptions) -> Result<()> {
        self.editor.validate_only(path, changes, opts).await
    }

    pub async fn rollback_edit(&self, path: &str, backup_id: Option<&str>) -> Result<BackupInfo> {
        self.editor.rollback(path, backup_id).await
    }

    pub async fn edit_history(&self, path: &str, limit: usize) -> Result<Vec<BackupInfo>> {
        self.editor.history(path, limit).await
    }

    pub async fn undo_last(&self) -> Result<Option<UndoEntry>> {
        self.undo.undo().await
    }

    pub async fn undo_history(&self, limit: usize, include_undone: bool) -> Result<Vec<UndoEntry>> {
        self.undo.list(limit, include_undone).await
    }

    /// Single dispatch point for every AST Refactor Operator (§4.9).
    pub async fn refactor_code(&self, op: RefactorOperation) -> Result<RefactorResult> {
        match op {
            RefactorOperation::RenameFunction { module, old, new, arity, scope } => {
                self.refactor.rename_function(module, &old, &new, arity, scope).await
            }
            RefactorOperation::RenameModule { old, new } => self.refactor.rename_module(&old, &new).await,
            RefactorOperation::ExtractFunction { module, source_fn, arity, new_name, line_range, opts } => {
                self.refactor
                    .extract_function(module, &source_fn, arity, &new_name, line_range, opts)
                    .await
            }
            RefactorOperation::InlineFunction { module, fn_name, arity } => {
                self.refactor.inline_function(module, &fn_name, arity).await
            }
            RefactorOperation::MoveFunction { src_module, tgt_module, fn_name, arity, opts } => {
                self.refactor
                    .move_function(src_module, tgt_module, &fn_name, arity, opts)
                    .await
            }
            RefactorOperation::ConvertVisibility { module, fn_name, arity, target, opts } => {
                self.refactor
                    .convert_visibility(module, &fn_name, arity, target, opts)
                    .await
            }
            RefactorOperation::RenameParameter { module, fn_name, arity, old, new } => {
                self.refactor.rename_parameter(module, &fn_name, arity, &old, &new).await
            }
            RefactorOperation::ChangeSignature { module, fn_name, old_arity, changes } => {
                self.refactor.change_signature(module, &fn_name, old_arity, changes).await
            }
            RefactorOperation::ExtractModule { src_module, new_module, functions, opts } => {
                self.refactor
                    .extract_module(src_module, new_module, &functions, opts)
                    .await
            }
            RefactorOperation::ModifyAttributes { path, changes } => {
                self.refactor.modify_attributes(&path, changes).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use ragex_core::{Analysis, Function, FunctionId, Language, Module, ModuleKind};
    use std::collections::HashMap;
    use tempfile::tempdir;

    struct StubAnalyzer;

    #[async_trait]
    impl Analyzer for StubAnalyzer {
        async fn analyze(&self, source: &[u8], path: &str) -> Result<Analysis> {
            let text = String::from_utf8_lossy(source).to_string();
            let module = Module {
                id: ModuleId::new(Language::Elixir, "M"),
                name: "M".into(),
                file: path.into(),
                line: 1,
                doc: None,
                kind: ModuleKind::Module,
            };
            let mut metadata = HashMap::new();
            metadata.insert(ragex_indexer::SOURCE_SLICE_KEY.to_string(), text);
            let function = Function {
                id: FunctionId::new(module.id.clone(), "foo", 0),
                file: path.into(),
                line: 2,
                doc: None,
                visibility: ragex_core::Visibility::Public,
                metadata,
            };
            Ok(Analysis { modules: vec![module], functions: vec![function], calls: vec![], imports: vec![] })
        }

        fn supported_extensions(&self) -> Vec<&'static str> {
            vec!["ex"]
        }
    }

    struct StubEmbedder;

    #[async_trait]
    impl Embedder for StubEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
        fn dimension(&self) -> u16 {
            2
        }
        fn model_id(&self) -> &str {
            "stub"
        }
    }

    #[tokio::test]
    async fn analyze_directory_then_search_finds_entity() {
        let dir = tempdir().unwrap();
        tokio::fs::write(dir.path().join("m.ex"), "defmodule M do\n  def foo do\n  end\nend\n")
            .await
            .unwrap();

        let engine = RagexEngine::open(
            dir.path(),
            Arc::new(StubAnalyzer),
            Arc::new(StubEmbedder),
            None,
            None,
            EngineConfig::default(),
        )
        .await
        .unwrap();

        let report = engine.analyze_directory(dir.path(), true, &[]).await.unwrap();
        assert_eq!(report.files_analyzed, 1);

        let stats = engine.graph_stats();
        assert_eq!(stats.node_count, 2);

        let results = engine.semantic_search("foo", 5, None).await.unwrap();
        assert!(!results.is_empty());
    }

    #[tokio::test]
    async fn refactor_code_dispatches_to_rename_function() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("m.ex");
        tokio::fs::write(&a, "defmodule M do\n  def foo do\n    :ok\n  end\nend\n").await.unwrap();

        let engine = RagexEngine::open(
            dir.path(),
            Arc::new(StubAnalyzer),
            Arc::new(StubEmbedder),
            None,
            None,
            EngineConfig::default(),
        )
        .await
        .unwrap();
        engine.analyze_directory(dir.path(), true, &[]).await.unwrap();

        let result = engine
            .refactor_code(RefactorOperation::RenameFunction {
                module: ModuleId::new(Language::Elixir, "M"),
                old: "foo".to_string(),
                new: "bar".to_string(),
                arity: Some(0),
                scope: Scope::Project,
            })
            .await
            .unwrap();
        assert_eq!(result.files_changed.len(), 1);

        let content = tokio::fs::read_to_string(&a).await.unwrap();
        assert!(content.contains("def bar do"));
    }
}
