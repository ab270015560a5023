pub mod algorithms;
pub mod file_tracking;
pub mod store;

pub use algorithms::{degree_centrality, find_paths, graph_stats, pagerank, Degree, GraphStatsReport};
pub use file_tracking::FileTrackingTable;
pub use store::{Edge, EdgeType, GraphStats, GraphStore, NodeData};
