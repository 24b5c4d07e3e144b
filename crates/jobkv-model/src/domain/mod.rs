mod role;
pub use role::ProcessRole;

mod scope;
pub use scope::Scope;

mod job;
pub use job::{JobId, JobIdentity};

mod rank_map;
pub use rank_map::RankMap;

mod store_node;
pub use store_node::StoreNode;

/// Global task rank assigned by the scheduler.
pub type TaskRank = usize;

/// Position of a host inside the job's ordered node set.
pub type NodeRank = usize;
