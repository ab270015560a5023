use serde::{Deserialize, Serialize};

/// Values a host process would reasonably want to tune, grouped so that
/// nothing in this crate reads environment or config files directly (§10.3).
/// A host constructs one, mutates what it cares about, and passes it into
/// the facade's constructor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub pagerank: PageRankConfig,
    pub path_finding: PathFindingConfig,
    pub embedder_retry: RetryConfig,
    /// Per-undo-entry inline snapshot size cap, in bytes (§4.10).
    pub undo_snapshot_cap_bytes: u64,
    /// Overrides `$XDG_CACHE_HOME`/`~/.cache` resolution (§4.1) when set.
    pub cache_root_override: Option<String>,
    pub rrf_k: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pagerank: PageRankConfig::default(),
            path_finding: PathFindingConfig::default(),
            embedder_retry: RetryConfig::default(),
            undo_snapshot_cap_bytes: 10 * 1024 * 1024,
            cache_root_override: None,
            rrf_k: 60,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PageRankConfig {
    pub damping: f64,
    pub tolerance: f64,
    pub max_iterations: u32,
}

impl Default for PageRankConfig {
    fn default() -> Self {
        Self {
            damping: 0.85,
            tolerance: 1e-4,
            max_iterations: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PathFindingConfig {
    pub max_depth: u32,
    pub max_paths: u32,
    pub warn_dense: bool,
    pub dense_warn_threshold: u32,
    pub dense_info_threshold: u32,
}

impl Default for PathFindingConfig {
    fn default() -> Self {
        Self {
            max_depth: 10,
            max_paths: 100,
            warn_dense: true,
            dense_warn_threshold: 20,
            dense_info_threshold: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 200,
        }
    }
}
