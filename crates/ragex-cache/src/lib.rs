pub mod framing;
pub mod paths;
pub mod persistence;

pub use paths::project_hash;
pub use persistence::{CacheStatsReport, LoadReport, Persistence};
