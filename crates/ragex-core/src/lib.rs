pub mod config;
pub mod error;
pub mod logging;
pub mod traits;
pub mod types;

pub use config::*;
pub use error::*;
pub use logging::init_tracing;
pub use traits::*;
pub use types::*;

/// Current Unix timestamp in seconds, used wherever the spec calls for an
/// `i64` timestamp (file-tracking records, cache metadata, undo entries).
pub fn now_ts() -> i64 {
    chrono::Utc::now().timestamp()
}
