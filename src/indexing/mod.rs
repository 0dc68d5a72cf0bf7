//! Indexing: the per-repo advisory lock and the indexer facade that drives
//! a full or incremental pass from a Merkle diff through the embedding
//! pipeline.

pub mod lock;
pub mod manager;

pub use lock::IndexLockGuard;
pub use manager::ChangeType;
pub use manager::IndexStats;
pub use manager::Indexer;
