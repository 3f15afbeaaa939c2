// Account graph for one bucket: edge construction, assembly, community
// detection and cluster qualification.

pub mod assemble;
pub mod clusters;
pub mod edges;
pub mod louvain;

pub use assemble::BucketGraph;
pub use clusters::{cluster_id, ClusterDetector};
pub use edges::{Edge, EdgeBuilder, EdgeSet, Signal, SignalType};
pub use louvain::louvain;
