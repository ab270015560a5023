//! AST Refactor Operators (C9) and Undo History (C10): text-rewrite
//! primitives in [`rewrite`], their typed option structs in [`types`], the
//! `RefactorEngine` facade in [`operators`], and snapshot-based undo in
//! [`undo`].

pub mod operators;
pub mod rewrite;
pub mod types;
pub mod undo;

pub use operators::RefactorEngine;
pub use types::*;
pub use undo::{undo_dir, SnapshotData, UndoEntry, UndoHistory};
