use async_trait::async_trait;

use crate::error::Result;
use crate::types::{Analysis, Language, ValidationIssue};

/// Produces a normalized [`Analysis`] for one source file. Implementations
/// are selected by file extension and must be pure: no side effects on the
/// graph or embedding stores (§6).
#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, source: &[u8], path: &str) -> Result<Analysis>;

    /// File extensions this analyzer claims, without the leading dot.
    fn supported_extensions(&self) -> Vec<&'static str>;
}

/// Produces fixed-dimension embedding vectors for a batch of texts (§6).
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn dimension(&self) -> u16;

    fn model_id(&self) -> &str;
}

/// Validates file content for a language. Optional: if no validator is
/// configured, validation is skipped and the result notes as much.
#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(
        &self,
        content: &str,
        language: Language,
    ) -> std::result::Result<(), Vec<ValidationIssue>>;
}

/// Formats a file on disk in place. Optional; a format failure is logged
/// but never fails the edit that triggered it (§4.7 step 9).
#[async_trait]
pub trait Formatter: Send + Sync {
    async fn format(&self, path: &str, language: Language) -> Result<()>;
}

/// Enrichment-only collaborator, irrelevant to the core's correctness (§6).
#[async_trait]
pub trait AIProvider: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

impl std::fmt::Debug for dyn Analyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<analyzer>")
    }
}

impl std::fmt::Debug for dyn Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "<embedder model={}>", self.model_id())
    }
}
