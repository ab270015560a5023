use std::path::{Path, PathBuf};

use globset::{Glob, GlobSetBuilder};
use ignore::WalkBuilder;

/// Walks `root`, filtering by `extensions` (no leading dot) and
/// `excludes` (glob patterns), returning candidate paths in lexicographic
/// order for reproducible logs (§4.4).
pub fn discover_files(
    root: &Path,
    recursive: bool,
    extensions: &[&str],
    excludes: &[String],
) -> Vec<PathBuf> {
    let mut builder = GlobSetBuilder::new();
    for pattern in excludes {
        if let Ok(glob) = Glob::new(pattern) {
            builder.add(glob);
        }
    }
    let exclude_set = builder.build().unwrap_or_else(|_| GlobSetBuilder::new().build().unwrap());

    let mut walker = WalkBuilder::new(root);
    walker.max_depth(if recursive { None } else { Some(1) });
    walker.hidden(false);

    let mut paths: Vec<PathBuf> = walker
        .build()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .map(|ext| extensions.contains(&ext))
                .unwrap_or(false)
        })
        .filter(|path| !exclude_set.is_match(path))
        .collect();

    paths.sort();
    paths
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn discover_files_filters_by_extension_and_sorts() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("b.ex"), "").unwrap();
        fs::write(dir.path().join("a.ex"), "").unwrap();
        fs::write(dir.path().join("c.txt"), "").unwrap();

        let files = discover_files(dir.path(), true, &["ex"], &[]);
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(names, vec!["a.ex", "b.ex"]);
    }

    #[test]
    fn discover_files_respects_excludes() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("_build")).unwrap();
        fs::write(dir.path().join("_build/skip.ex"), "").unwrap();
        fs::write(dir.path().join("keep.ex"), "").unwrap();

        let files = discover_files(dir.path(), true, &["ex"], &["**/_build/**".to_string()]);
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with("keep.ex"));
    }
}
