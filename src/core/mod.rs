pub mod error;
pub mod types;

pub use error::{GridError, Result};
pub use types::{NodeId, Partition, TopologyVersion, node_ids};
