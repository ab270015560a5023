use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use ragex_core::{Change, Formatter, Language, RagexError, Result, Validator};
use tracing::warn;

use crate::backup::{write_atomic, BackupInfo, BackupStore};

/// Options for `Editor::edit_file` (§4.7 `edit_file` opts).
#[derive(Debug, Clone)]
pub struct EditOptions {
    pub validate: bool,
    pub create_backup: bool,
    pub format: bool,
    pub language: Language,
    pub expected_mtime: Option<i64>,
}

impl EditOptions {
    pub fn new(language: Language) -> Self {
        Self {
            validate: true,
            create_backup: true,
            format: false,
            language,
            expected_mtime: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EditResult {
    pub path: String,
    pub changes_applied: usize,
    pub lines_changed: usize,
    pub backup_id: Option<String>,
    pub validation_performed: bool,
}

/// The Editor Core (C7): validated, backed-up, atomic line-range edits to a
/// single file, plus rollback and backup history.
pub struct Editor {
    backups: BackupStore,
    validator: Option<Arc<dyn Validator>>,
    formatter: Option<Arc<dyn Formatter>>,
}

impl Editor {
    pub fn new(
        backup_root: impl Into<PathBuf>,
        validator: Option<Arc<dyn Validator>>,
        formatter: Option<Arc<dyn Formatter>>,
    ) -> Self {
        Self {
            backups: BackupStore::new(backup_root),
            validator,
            formatter,
        }
    }

    /// Dry-runs the change set against the current file content and the
    /// external Validator, without writing anything (§4.8 transaction
    /// "validate() -> Ok | Err" phase).
    pub async fn validate_only(&self, path: &str, changes: &[Change], opts: &EditOptions) -> Result<()> {
        let canonical = canonicalize(path)?;
        let content = tokio::fs::read_to_string(&canonical)
            .await
            .map_err(|e| RagexError::io(path.to_string(), e))?;

        if let Some(expected) = opts.expected_mtime {
            let actual = mtime(&canonical)?;
            if actual != expected {
                return Err(RagexError::Conflict { path: path.to_string() });
            }
        }

        let lines: Vec<&str> = content.lines().collect();
        let line_count = lines.len() as u32;
        validate_changes(changes, line_count, path)?;

        if !opts.validate {
            return Ok(());
        }
        let Some(validator) = &self.validator else {
            return Ok(());
        };

        let mut ordered: Vec<&Change> = changes.iter().collect();
        ordered.sort_by(|a, b| b.line_start().cmp(&a.line_start()));
        let mut new_lines: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
        for change in &ordered {
            apply_change(&mut new_lines, change)?;
        }
        let new_content = new_lines.join("\n") + if content.ends_with('\n') { "\n" } else { "" };

        validator
            .validate(&new_content, opts.language.clone())
            .await
            .map_err(|issues| RagexError::ValidationFailed {
                path: path.to_string(),
                issues,
            })
    }

    pub async fn edit_file(
        &self,
        path: &str,
        changes: &[Change],
        opts: &EditOptions,
    ) -> Result<EditResult> {
        let canonical = canonicalize(path)?;
        let content = tokio::fs::read_to_string(&canonical)
            .await
            .map_err(|e| RagexError::io(path.to_string(), e))?;

        if let Some(expected) = opts.expected_mtime {
            let actual = mtime(&canonical)?;
            if actual != expected {
                return Err(RagexError::Conflict { path: path.to_string() });
            }
        }

        let lines: Vec<&str> = content.lines().collect();
        let line_count = lines.len() as u32;
        validate_changes(changes, line_count, path)?;

        let mut ordered: Vec<&Change> = changes.iter().collect();
        ordered.sort_by(|a, b| b.line_start().cmp(&a.line_start()));

        let mut new_lines: Vec<String> = lines.iter().map(|l| l.to_string()).collect();
        let mut lines_changed = 0usize;
        for change in &ordered {
            lines_changed += apply_change(&mut new_lines, change)?;
        }
        let new_content = new_lines.join("\n") + if content.ends_with('\n') { "\n" } else { "" };

        let mut validation_performed = false;
        if opts.validate {
            if let Some(validator) = &self.validator {
                validator
                    .validate(&new_content, opts.language.clone())
                    .await
                    .map_err(|issues| RagexError::ValidationFailed {
                        path: path.to_string(),
                        issues,
                    })?;
                validation_performed = true;
            }
        }

        let mut backup_id = None;
        if opts.create_backup {
            backup_id = Some(self.backups.save(path, content.as_bytes()).await?);
        }

        write_atomic(&canonical, new_content.as_bytes()).await?;

        if opts.format {
            if let Some(formatter) = &self.formatter {
                if let Err(e) = formatter.format(path, opts.language.clone()).await {
                    warn!(path, error = %e, "post-edit formatting failed, edited content stands");
                }
            }
        }

        Ok(EditResult {
            path: path.to_string(),
            changes_applied: changes.len(),
            lines_changed,
            backup_id,
            validation_performed,
        })
    }

    pub async fn rollback(&self, path: &str, backup_id: Option<&str>) -> Result<BackupInfo> {
        let (id, bytes) = self.backups.load(path, backup_id).await?;
        let canonical = canonicalize(path)?;
        write_atomic(&canonical, &bytes).await?;
        Ok(BackupInfo { id, path: path.to_string() })
    }

    pub async fn history(&self, path: &str, limit: usize) -> Result<Vec<BackupInfo>> {
        self.backups.history(path, limit).await
    }
}

fn canonicalize(path: &str) -> Result<PathBuf> {
    std::fs::canonicalize(path).map_err(|e| RagexError::io(path.to_string(), e))
}

fn mtime(path: &Path) -> Result<i64> {
    let meta = std::fs::metadata(path).map_err(|e| RagexError::io(path.display().to_string(), e))?;
    let modified = meta
        .modified()
        .map_err(|e| RagexError::io(path.display().to_string(), e))?;
    Ok(modified
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0))
}

/// Pre-validation of a change set against a file's current line count
/// (§4.7 step 4): ranges in bounds, `line_start <= line_end`, no overlap.
fn validate_changes(changes: &[Change], line_count: u32, path: &str) -> Result<()> {
    let max_line = line_count + 1;
    let mut sorted: Vec<&Change> = changes.iter().collect();
    sorted.sort_by_key(|c| c.line_start());

    let mut prev_end: Option<u32> = None;
    for change in &sorted {
        let start = change.line_start();
        let end = change.line_end();
        if start < 1 || start > max_line || end > max_line {
            return Err(RagexError::Invalid(format!(
                "change out of range for {path}: line {start}..{end} (file has {line_count} lines)"
            )));
        }
        if start > end {
            return Err(RagexError::Invalid(format!(
                "change has line_start > line_end for {path}: {start} > {end}"
            )));
        }
        if let Some(prev) = prev_end {
            if start <= prev {
                return Err(RagexError::Invalid(format!(
                    "overlapping changes for {path} at line {start}"
                )));
            }
        }
        prev_end = Some(end);
    }
    Ok(())
}

/// Applies one change to `lines` (already sorted descending by `line_start`
/// by the caller) and returns the count of lines touched.
fn apply_change(lines: &mut Vec<String>, change: &Change) -> Result<usize> {
    match change {
        Change::Replace { line_start, line_end, content } => {
            let start = (*line_start - 1) as usize;
            let end = (*line_end) as usize;
            let end = end.min(lines.len());
            let replacement: Vec<String> = content.split('\n').map(|s| s.to_string()).collect();
            let removed = end.saturating_sub(start);
            lines.splice(start..end, replacement);
            Ok(removed.max(1))
        }
        Change::Insert { line_start, content } => {
            let at = (*line_start - 1) as usize;
            let at = at.min(lines.len());
            let inserted: Vec<String> = content.split('\n').map(|s| s.to_string()).collect();
            let n = inserted.len();
            lines.splice(at..at, inserted);
            Ok(n)
        }
        Change::Delete { line_start, line_end } => {
            let start = (*line_start - 1) as usize;
            let end = (*line_end) as usize;
            let end = end.min(lines.len());
            let removed = end.saturating_sub(start);
            lines.splice(start..end, std::iter::empty());
            Ok(removed)
        }
    }
}

/// A validator that always succeeds, for callers that don't wire a real one.
pub struct NoopValidator;

#[async_trait]
impl Validator for NoopValidator {
    async fn validate(
        &self,
        _content: &str,
        _language: Language,
    ) -> std::result::Result<(), Vec<ragex_core::ValidationIssue>> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ragex_core::Severity;
    use std::sync::Arc;
    use tempfile::tempdir;

    struct RejectingValidator;

    #[async_trait]
    impl Validator for RejectingValidator {
        async fn validate(
            &self,
            _content: &str,
            _language: Language,
        ) -> std::result::Result<(), Vec<ragex_core::ValidationIssue>> {
            Err(vec![ragex_core::ValidationIssue {
                line: 1,
                column: 1,
                message: "nope".into(),
                severity: Severity::Error,
            }])
        }
    }

    fn opts() -> EditOptions {
        EditOptions::new(Language::Elixir)
    }

    #[tokio::test]
    async fn replace_insert_delete_apply_correctly() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.ex");
        tokio::fs::write(&file, "line1\nline2\nline3\n").await.unwrap();
        let editor = Editor::new(dir.path().join("backups"), None, None);

        let changes = vec![Change::Replace {
            line_start: 2,
            line_end: 2,
            content: "LINE2".into(),
        }];
        editor
            .edit_file(file.to_str().unwrap(), &changes, &opts())
            .await
            .unwrap();
        let content = tokio::fs::read_to_string(&file).await.unwrap();
        assert_eq!(content, "line1\nLINE2\nline3\n");
    }

    #[tokio::test]
    async fn insert_append_at_line_count_plus_one() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.ex");
        tokio::fs::write(&file, "line1\nline2\n").await.unwrap();
        let editor = Editor::new(dir.path().join("backups"), None, None);

        let changes = vec![Change::Insert {
            line_start: 3,
            content: "line3".into(),
        }];
        editor
            .edit_file(file.to_str().unwrap(), &changes, &opts())
            .await
            .unwrap();
        let content = tokio::fs::read_to_string(&file).await.unwrap();
        assert_eq!(content, "line1\nline2\nline3\n");
    }

    #[tokio::test]
    async fn validation_failure_aborts_before_write() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.ex");
        tokio::fs::write(&file, "line1\nline2\n").await.unwrap();
        let editor = Editor::new(
            dir.path().join("backups"),
            Some(Arc::new(RejectingValidator)),
            None,
        );

        let changes = vec![Change::Replace {
            line_start: 1,
            line_end: 1,
            content: "X".into(),
        }];
        let err = editor
            .edit_file(file.to_str().unwrap(), &changes, &opts())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation_failed");
        let content = tokio::fs::read_to_string(&file).await.unwrap();
        assert_eq!(content, "line1\nline2\n");
    }

    #[tokio::test]
    async fn rollback_restores_original_content() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.ex");
        tokio::fs::write(&file, "line1\nline2\n").await.unwrap();
        let editor = Editor::new(dir.path().join("backups"), None, None);

        let changes = vec![Change::Replace {
            line_start: 1,
            line_end: 1,
            content: "X".into(),
        }];
        let result = editor
            .edit_file(file.to_str().unwrap(), &changes, &opts())
            .await
            .unwrap();

        editor
            .rollback(file.to_str().unwrap(), result.backup_id.as_deref())
            .await
            .unwrap();
        let content = tokio::fs::read_to_string(&file).await.unwrap();
        assert_eq!(content, "line1\nline2\n");
    }

    #[tokio::test]
    async fn concurrent_modification_detected_via_mtime() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.ex");
        tokio::fs::write(&file, "line1\n").await.unwrap();
        let editor = Editor::new(dir.path().join("backups"), None, None);

        let mut o = opts();
        o.expected_mtime = Some(0);
        let changes = vec![Change::Replace {
            line_start: 1,
            line_end: 1,
            content: "X".into(),
        }];
        let err = editor
            .edit_file(file.to_str().unwrap(), &changes, &o)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");
    }

    #[tokio::test]
    async fn overlapping_changes_rejected() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("a.ex");
        tokio::fs::write(&file, "line1\nline2\nline3\n").await.unwrap();
        let editor = Editor::new(dir.path().join("backups"), None, None);

        let changes = vec![
            Change::Replace { line_start: 1, line_end: 2, content: "A".into() },
            Change::Replace { line_start: 2, line_end: 3, content: "B".into() },
        ];
        let err = editor
            .edit_file(file.to_str().unwrap(), &changes, &opts())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "invalid");
    }
}
