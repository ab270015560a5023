pub mod cancellation;
pub mod fingerprint;
pub mod indexer;
pub mod walk;

pub use cancellation::CancellationToken;
pub use fingerprint::{function_fingerprint, hash, module_fingerprint, SOURCE_SLICE_KEY};
pub use indexer::{IndexReport, Indexer};
pub use walk::discover_files;
