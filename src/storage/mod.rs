//! Database Abstraction: uniform query/exec/transaction semantics over an
//! embedded file-backed store and a server-backed store, with all
//! dialect-specific DDL, placeholders, and upserts routed through
//! [`Dialect`] rather than spelled out in component code.

pub mod dialect;
pub mod postgres;
pub mod sqlite;

pub use dialect::ColumnType;
pub use dialect::Dialect;
pub use dialect::PostgresDialect;
pub use dialect::SqliteDialect;
pub use postgres::PoolConfig;
pub use postgres::PostgresStore;
pub use sqlite::SqliteStore;

use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

use crate::error::Result;

/// Which concrete backend a [`Store`] wraps. Selected once at indexer
/// construction time from [`crate::config::RepolensConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    Embedded,
    Server,
}

/// The Database Abstraction's handle: one of the two concrete backends.
/// All higher-level stores (embedding cache, location store, repo config,
/// vector index) take a `Store` and branch on its variant only to pick
/// backend-native SQL; schema and upsert text both flow through the
/// backend's [`Dialect`].
#[derive(Clone)]
pub enum Store {
    Embedded(Arc<SqliteStore>),
    Server(Arc<PostgresStore>),
}

impl Store {
    pub fn dialect(&self) -> &dyn Dialect {
        match self {
            Self::Embedded(_) => &SqliteDialect,
            Self::Server(_) => &PostgresDialect,
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Embedded(_) => BackendKind::Embedded,
            Self::Server(_) => BackendKind::Server,
        }
    }

    /// Whether this backend carries a native fixed-length vector column
    /// capable of an ANN index (component F reads this to pick exact-scan
    /// vs. HNSW).
    pub fn supports_native_vector(&self) -> bool {
        self.dialect().supports_native_vector()
    }

    pub async fn close(self) -> Result<()> {
        match self {
            Self::Embedded(s) => s.close().await,
            Self::Server(s) => s.close().await,
        }
    }
}
