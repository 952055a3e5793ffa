pub mod types;
pub mod units;
pub mod cluster_status;

pub use types::*;
pub use units::parse_byte_size;
pub use cluster_status::{parse_cluster_status, ClusterMemoryCollector, ClusterNodeInfo, SwarmStatusClient};
