use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A supported source language. `Other` carries the raw extension-derived
/// name so an unrecognized file still round-trips through the graph.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Language {
    Elixir,
    Erlang,
    Python,
    JavaScript,
    TypeScript,
    Ruby,
    Other(String),
}

impl Language {
    /// Maps a file extension (no leading dot) to a language, the same
    /// extension-based selection the `Analyzer` boundary uses (§6). Unknown
    /// extensions fall back to `Other` so callers never need an `Option`.
    pub fn from_extension(ext: &str) -> Self {
        match ext {
            "ex" | "exs" => Language::Elixir,
            "erl" | "hrl" => Language::Erlang,
            "py" | "pyi" => Language::Python,
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "ts" | "tsx" => Language::TypeScript,
            "rb" => Language::Ruby,
            other => Language::Other(other.to_string()),
        }
    }

    /// Best-effort language inference from a path's extension.
    pub fn from_path(path: &str) -> Self {
        std::path::Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(Language::from_extension)
            .unwrap_or_else(|| Language::Other(String::new()))
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Language::Elixir => "elixir",
            Language::Erlang => "erlang",
            Language::Python => "python",
            Language::JavaScript => "javascript",
            Language::TypeScript => "typescript",
            Language::Ruby => "ruby",
            Language::Other(s) => s.as_str(),
        };
        write!(f, "{}", s)
    }
}

/// Visibility of a function definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Visibility {
    Public,
    Private,
}

/// The kind of a module-like entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModuleKind {
    File,
    Module,
    Class,
    Namespace,
}

/// Stable identifier for a Module entity: unique per `(language, qualified_name)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModuleId {
    pub language: Language,
    pub qualified_name: String,
}

impl ModuleId {
    pub fn new(language: Language, qualified_name: impl Into<String>) -> Self {
        Self {
            language,
            qualified_name: qualified_name.into(),
        }
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.language, self.qualified_name)
    }
}

/// Stable identifier for a Function entity: `(module, name, arity)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FunctionId {
    pub module: ModuleId,
    pub name: String,
    pub arity: u16,
}

impl FunctionId {
    pub fn new(module: ModuleId, name: impl Into<String>, arity: u16) -> Self {
        Self {
            module,
            name: name.into(),
            arity,
        }
    }
}

impl fmt::Display for FunctionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}/{}", self.module, self.name, self.arity)
    }
}

/// Union identifier over every entity kind the graph stores.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityId {
    Module(ModuleId),
    Function(FunctionId),
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::Module(m) => write!(f, "{}", m),
            EntityId::Function(fun) => write!(f, "{}", fun),
        }
    }
}

impl From<ModuleId> for EntityId {
    fn from(m: ModuleId) -> Self {
        EntityId::Module(m)
    }
}

impl From<FunctionId> for EntityId {
    fn from(fun: FunctionId) -> Self {
        EntityId::Function(fun)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub id: ModuleId,
    pub name: String,
    pub file: String,
    pub line: u32,
    pub doc: Option<String>,
    pub kind: ModuleKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub id: FunctionId,
    pub file: String,
    pub line: u32,
    pub doc: Option<String>,
    pub visibility: Visibility,
    pub metadata: HashMap<String, String>,
}

/// A call's target may be unresolved at analysis time; the sentinel variant
/// is kept on the edge itself rather than dropped (spec §3 Call).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CallTarget {
    Resolved(FunctionId),
    Unresolved {
        module: Option<String>,
        name: String,
        arity: Option<u16>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub from: FunctionId,
    pub to: CallTarget,
    pub line: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ImportKind {
    Import,
    Require,
    Use,
    Alias,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Import {
    pub from_module: ModuleId,
    pub to_module: ModuleId,
    pub kind: ImportKind,
}

/// A reference to one entity recorded by a file-tracking record (§3).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityRef {
    Module(ModuleId),
    Function(FunctionId),
}

impl From<EntityId> for EntityRef {
    fn from(id: EntityId) -> Self {
        match id {
            EntityId::Module(m) => EntityRef::Module(m),
            EntityId::Function(f) => EntityRef::Function(f),
        }
    }
}

impl From<EntityRef> for EntityId {
    fn from(r: EntityRef) -> Self {
        match r {
            EntityRef::Module(m) => EntityId::Module(m),
            EntityRef::Function(f) => EntityId::Function(f),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileTrackingRecord {
    pub path: String,
    pub content_hash: [u8; 32],
    pub mtime: i64,
    pub size: u64,
    pub entities: Vec<EntityRef>,
    pub analyzed_at: i64,
    /// Set when the last analysis of this file failed; prevents retrying
    /// on every invocation (spec §4.4 failure semantics).
    pub failed: bool,
}

/// A single embedding record, keyed by the entity it fingerprints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub entity_id: EntityId,
    pub vector: Vec<f32>,
    pub text_hash: [u8; 32],
}

/// Metadata persisted alongside a cache snapshot (§3, §4.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub version: u16,
    pub model_id: String,
    pub model_repo: String,
    pub dimensions: u16,
    pub timestamp: i64,
    pub entity_count: u32,
}

/// The normalized result an `Analyzer` produces for one source file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Analysis {
    pub modules: Vec<Module>,
    pub functions: Vec<Function>,
    pub calls: Vec<Call>,
    pub imports: Vec<Import>,
}

/// A single line-range edit (§4.7). Line numbers are 1-based and inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Change {
    Replace {
        line_start: u32,
        line_end: u32,
        content: String,
    },
    Insert {
        line_start: u32,
        content: String,
    },
    Delete {
        line_start: u32,
        line_end: u32,
    },
}

impl Change {
    pub fn line_start(&self) -> u32 {
        match self {
            Change::Replace { line_start, .. } => *line_start,
            Change::Insert { line_start, .. } => *line_start,
            Change::Delete { line_start, .. } => *line_start,
        }
    }

    pub fn line_end(&self) -> u32 {
        match self {
            Change::Replace { line_end, .. } => *line_end,
            Change::Insert { line_start, .. } => *line_start,
            Change::Delete { line_end, .. } => *line_end,
        }
    }
}

/// Severity of a single validation issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub line: u32,
    pub column: u32,
    pub message: String,
    pub severity: Severity,
}
