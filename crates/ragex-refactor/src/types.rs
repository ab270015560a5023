use ragex_core::Visibility;
use serde::{Deserialize, Serialize};

/// Blast radius for a rename (§4.9 rename-function).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Project,
    Module,
}

/// Where an extracted function is placed relative to its source (§4.9
/// extract-function).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Placement {
    AfterSource,
    BeforeSource,
    EndOfModule,
}

impl Default for Placement {
    fn default() -> Self {
        Placement::AfterSource
    }
}

#[derive(Debug, Clone)]
pub struct ExtractOptions {
    pub placement: Placement,
    pub visibility: Visibility,
    pub add_doc: bool,
}

impl Default for ExtractOptions {
    fn default() -> Self {
        Self {
            placement: Placement::AfterSource,
            visibility: Visibility::Private,
            add_doc: false,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MoveOptions {
    /// Seed content for the target file if it doesn't exist yet.
    pub target_content: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct VisibilityOptions {
    pub add_doc: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ExtractModuleOptions {
    pub add_alias: bool,
}

/// One parameter-list edit step for `change-signature` (§4.9), applied in
/// the fixed order rename, remove, reorder, add.
#[derive(Debug, Clone, Default)]
pub struct SignatureChanges {
    pub rename_params: Vec<(String, String)>,
    pub remove_params: Vec<usize>,
    pub reorder_params: Vec<usize>,
    pub add_params: Vec<AddedParam>,
}

#[derive(Debug, Clone)]
pub struct AddedParam {
    pub name: String,
    pub position: usize,
    pub default: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AttributeChanges {
    pub add: Vec<(String, String)>,
    pub remove: Vec<String>,
    pub update: Vec<(String, String)>,
}

/// The outcome shared by every operator (§4.9 step 3-5: transaction commit
/// + undo entry).
#[derive(Debug, Clone)]
pub struct RefactorResult {
    pub files_changed: Vec<String>,
    pub undo_id: String,
}
