use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// First 16 hex chars of SHA256 of the project's absolute path (§4.1).
pub fn project_hash(project_root: &Path) -> String {
    let absolute = project_root
        .canonicalize()
        .unwrap_or_else(|_| project_root.to_path_buf());
    let mut hasher = Sha256::new();
    hasher.update(absolute.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    digest.iter().take(8).map(|b| format!("{:02x}", b)).collect()
}

/// `<cache_root>/<project_hash>/`. `cache_root` defaults to
/// `$XDG_CACHE_HOME/ragex` or `~/.cache/ragex` unless overridden.
pub fn cache_dir(project_root: &Path, cache_root_override: Option<&str>) -> PathBuf {
    let root = cache_root_override
        .map(PathBuf::from)
        .or_else(|| dirs::cache_dir().map(|d| d.join("ragex")))
        .unwrap_or_else(|| PathBuf::from(".cache/ragex"));
    root.join(project_hash(project_root))
}

pub fn graph_path(dir: &Path) -> PathBuf {
    dir.join("graph.bin")
}

pub fn embeddings_path(dir: &Path) -> PathBuf {
    dir.join("embeddings.bin")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_hash_is_16_hex_chars() {
        let h = project_hash(Path::new("/tmp/some-project"));
        assert_eq!(h.len(), 16);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn project_hash_is_stable_for_same_path() {
        let a = project_hash(Path::new("/tmp/x"));
        let b = project_hash(Path::new("/tmp/x"));
        assert_eq!(a, b);
    }
}
