//! Embedded file-backed store: one SQLite database per repository under
//! `.<tool>/index.db`, journaling enabled for concurrent readers.

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use rusqlite::Connection;
use tokio::task::spawn_blocking;

use crate::error::RepolensError;
use crate::error::Result;

/// Async-safe SQLite handle. `rusqlite::Connection` is not `Send`, so
/// blocking access is funneled through `spawn_blocking` under a mutex.
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    path: PathBuf,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        let path_buf = path.to_path_buf();
        let conn = Connection::open(path).map_err(|e| RepolensError::sqlite_error(&path_buf, e))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| RepolensError::sqlite_error(&path_buf, e))?;
        Self::init_schema(&conn, &path_buf)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            path: path_buf,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn init_schema(conn: &Connection, path: &Path) -> Result<()> {
        conn.execute_batch(SCHEMA)
            .map_err(|e| RepolensError::SqliteError {
                path: path.to_path_buf(),
                cause: format!("schema init failed: {e}"),
            })
    }

    pub async fn close(self) -> Result<()> {
        Ok(())
    }

    /// Runs `f` against the connection on a blocking thread, recovering
    /// from mutex poisoning by checking whether a transaction was left
    /// open and rolling it back.
    pub async fn query<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        let path = self.path.clone();
        spawn_blocking(move || {
            let guard = conn.lock().unwrap_or_else(|poisoned| {
                tracing::warn!(path = %path.display(), "sqlite mutex poisoned, recovering");
                recover_poisoned(poisoned.into_inner(), &path)
            });
            f(&guard)
        })
        .await
        .map_err(|e| RepolensError::SqliteError {
            path: self.path.clone(),
            cause: format!("spawn_blocking failed: {e}"),
        })?
    }

    pub async fn transaction<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&rusqlite::Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = self.conn.clone();
        let path = self.path.clone();
        spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(|poisoned| {
                tracing::warn!(path = %path.display(), "sqlite mutex poisoned in transaction, recovering");
                recover_poisoned(poisoned.into_inner(), &path)
            });
            let tx = guard.transaction().map_err(|e| RepolensError::SqliteError {
                path: path.clone(),
                cause: format!("transaction start failed: {e}"),
            })?;
            let result = f(&tx)?;
            tx.commit().map_err(|e| RepolensError::SqliteError {
                path: path.clone(),
                cause: format!("transaction commit failed: {e}"),
            })?;
            Ok(result)
        })
        .await
        .map_err(|e| RepolensError::SqliteError {
            path: self.path.clone(),
            cause: format!("spawn_blocking failed: {e}"),
        })?
    }
}

fn recover_poisoned(inner: Connection, path: &Path) -> Connection {
    if !inner.is_autocommit() {
        tracing::warn!(path = %path.display(), "connection not in autocommit, rolling back");
        if let Err(e) = inner.execute("ROLLBACK", []) {
            tracing::error!(path = %path.display(), error = %e, "rollback after poisoning failed");
        }
    }
    inner
}

/// Single `embeddings` table (no native vector column, so no per-dimension
/// partitioning); locations, symbols, repo config, file state, and the
/// advisory index lock round out the schema.
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at INTEGER NOT NULL
);
INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, strftime('%s', 'now'));

CREATE TABLE IF NOT EXISTS embeddings (
    chunk_hash TEXT NOT NULL,
    model_id TEXT NOT NULL,
    dimensions INTEGER NOT NULL,
    vector TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (chunk_hash, model_id)
);

CREATE TABLE IF NOT EXISTS locations (
    repo_root TEXT NOT NULL,
    path TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    chunk_hash TEXT NOT NULL,
    node_type TEXT NOT NULL,
    node_name TEXT,
    language TEXT NOT NULL,
    indexed_at INTEGER NOT NULL,
    PRIMARY KEY (repo_root, path, start_line, end_line)
);
CREATE INDEX IF NOT EXISTS idx_locations_repo_path ON locations(repo_root, path);
CREATE INDEX IF NOT EXISTS idx_locations_hash ON locations(chunk_hash);

CREATE TABLE IF NOT EXISTS symbols (
    repo_root TEXT NOT NULL,
    path TEXT NOT NULL,
    line INTEGER NOT NULL,
    name TEXT NOT NULL,
    kind TEXT NOT NULL,
    language TEXT NOT NULL,
    scope TEXT,
    signature TEXT,
    PRIMARY KEY (repo_root, name, path, line)
);
CREATE INDEX IF NOT EXISTS idx_symbols_repo_path ON symbols(repo_root, path);
CREATE INDEX IF NOT EXISTS idx_symbols_name ON symbols(name);

CREATE TABLE IF NOT EXISTS repo_config (
    repo_root TEXT PRIMARY KEY,
    model_id TEXT NOT NULL,
    dimensions INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS file_state (
    repo_root TEXT NOT NULL,
    path TEXT NOT NULL,
    mtime INTEGER NOT NULL,
    size INTEGER NOT NULL,
    indexed_at INTEGER NOT NULL,
    PRIMARY KEY (repo_root, path)
);

CREATE TABLE IF NOT EXISTS index_lock (
    repo_root TEXT PRIMARY KEY,
    holder_id TEXT NOT NULL,
    locked_at INTEGER NOT NULL,
    expires_at INTEGER NOT NULL
);
"#;

/// Converts `rusqlite`'s `QueryReturnedNoRows` into `None` rather than a
/// storage error; used by point lookups that are allowed to miss.
pub trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
    fn optional_with_path(self, path: &Path) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn optional_with_path(self, path: &Path) -> Result<Option<T>> {
        match self {
            Ok(v) => Ok(Some(v)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(RepolensError::sqlite_error(path, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn open_creates_schema() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("index.db")).unwrap();
        let count: i64 = store
            .query(|conn| {
                Ok(conn
                    .query_row("SELECT count(*) FROM embeddings", [], |r| r.get(0))
                    .unwrap())
            })
            .await
            .unwrap();
        assert_eq!(count, 0);
    }

    #[tokio::test]
    async fn transaction_commits_on_success() {
        let dir = tempdir().unwrap();
        let store = SqliteStore::open(&dir.path().join("index.db")).unwrap();
        store
            .transaction(|tx| {
                tx.execute(
                    "INSERT INTO embeddings (chunk_hash, model_id, dimensions, vector, created_at) VALUES ('h','m',2,'[1,2]',0)",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();
        let count: i64 = store
            .query(|conn| Ok(conn.query_row("SELECT count(*) FROM embeddings", [], |r| r.get(0)).unwrap()))
            .await
            .unwrap();
        assert_eq!(count, 1);
    }
}
