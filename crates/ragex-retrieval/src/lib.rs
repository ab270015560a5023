pub mod queries;
pub mod search;

pub use queries::{find_callees, find_callers, functions_in_module};
pub use search::{graph_search, hybrid_search, rrf_fuse, semantic_search};
