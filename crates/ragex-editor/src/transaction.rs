use std::sync::Arc;

use ragex_core::{Change, RagexError, Result};
use tracing::{error, warn};

use crate::editor::{EditOptions, EditResult, Editor};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    Empty,
    Built,
    Applying,
    Applied,
    RolledBack,
}

#[derive(Debug, Clone)]
pub struct TxnOptions {
    pub validate: bool,
}

impl Default for TxnOptions {
    fn default() -> Self {
        Self { validate: true }
    }
}

struct PendingEdit {
    path: String,
    changes: Vec<Change>,
    opts: EditOptions,
}

#[derive(Debug, Clone)]
pub struct TxnFileError {
    pub path: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub enum TxnStatus {
    Success,
    Failure,
}

#[derive(Debug, Clone)]
pub struct TxnResult {
    pub status: TxnStatus,
    pub files_edited: usize,
    pub rolled_back: bool,
    pub errors: Vec<TxnFileError>,
    pub results: Vec<EditResult>,
}

/// The Transaction Engine (C8): coordinates edits across multiple files
/// with write-serial apply and best-effort reverse-order rollback on the
/// first failure (§4.8 — explicitly not a true cross-file transaction).
pub struct Transaction {
    editor: Arc<Editor>,
    opts: TxnOptions,
    edits: Vec<PendingEdit>,
    state: TxnState,
}

impl Transaction {
    pub fn new(editor: Arc<Editor>, opts: TxnOptions) -> Self {
        Self {
            editor,
            opts,
            edits: Vec::new(),
            state: TxnState::Empty,
        }
    }

    pub fn add(&mut self, path: impl Into<String>, changes: Vec<Change>, per_file_opts: Option<EditOptions>) {
        let default_opts = per_file_opts.unwrap_or_else(|| {
            let mut o = EditOptions::new(ragex_core::Language::Other("text".into()));
            o.validate = self.opts.validate;
            o
        });
        self.edits.push(PendingEdit {
            path: path.into(),
            changes,
            opts: default_opts,
        });
        self.state = TxnState::Built;
    }

    /// Dry-run validates every pending edit with no writes (§4.8 `validate`).
    pub async fn validate(&self) -> std::result::Result<(), Vec<TxnFileError>> {
        let mut errors = Vec::new();
        for edit in &self.edits {
            if let Err(e) = self.editor.validate_only(&edit.path, &edit.changes, &edit.opts).await {
                errors.push(TxnFileError {
                    path: edit.path.clone(),
                    message: e.to_string(),
                });
            }
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Applies every pending edit in add-order; on the first failure, rolls
    /// back every already-applied file in reverse order (§4.8 `commit`).
    pub async fn commit(mut self) -> Result<TxnResult> {
        if self.opts.validate {
            if let Err(errors) = self.validate().await {
                return Ok(TxnResult {
                    status: TxnStatus::Failure,
                    files_edited: 0,
                    rolled_back: false,
                    errors,
                    results: vec![],
                });
            }
        }

        self.state = TxnState::Applying;
        let mut applied: Vec<EditResult> = Vec::new();

        for edit in &self.edits {
            let mut opts = edit.opts.clone();
            opts.validate = false; // already validated above, or caller opted out
            match self.editor.edit_file(&edit.path, &edit.changes, &opts).await {
                Ok(result) => applied.push(result),
                Err(e) => {
                    error!(path = %edit.path, error = %e, "transaction apply failed, rolling back");
                    let rolled_back = self.rollback_applied(&applied).await;
                    self.state = if rolled_back { TxnState::RolledBack } else { TxnState::Applying };
                    return Ok(TxnResult {
                        status: TxnStatus::Failure,
                        files_edited: applied.len(),
                        rolled_back,
                        errors: vec![TxnFileError {
                            path: edit.path.clone(),
                            message: e.to_string(),
                        }],
                        results: applied,
                    });
                }
            }
        }

        self.state = TxnState::Applied;
        Ok(TxnResult {
            status: TxnStatus::Success,
            files_edited: applied.len(),
            rolled_back: false,
            errors: vec![],
            results: applied,
        })
    }

    /// Restores every successfully-applied file, most-recent first. Returns
    /// `true` only if every restore succeeded.
    async fn rollback_applied(&self, applied: &[EditResult]) -> bool {
        let mut all_ok = true;
        for result in applied.iter().rev() {
            let outcome = self
                .editor
                .rollback(&result.path, result.backup_id.as_deref())
                .await;
            if let Err(e) = outcome {
                warn!(path = %result.path, error = %e, "rollback failed, state may be inconsistent");
                all_ok = false;
            }
        }
        all_ok
    }

    pub fn state(&self) -> TxnState {
        self.state
    }
}

impl From<TxnFileError> for RagexError {
    fn from(e: TxnFileError) -> Self {
        RagexError::Invalid(format!("{}: {}", e.path, e.message))
    }
}
