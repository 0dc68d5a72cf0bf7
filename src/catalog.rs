//! Repo Config and File State: which embedding model is "current" for a
//! repo, and a fast mtime/size pre-filter before hashing file contents.

use chrono::Utc;

use crate::error::Result;
use crate::storage::Store;
use crate::storage::sqlite::OptionalExt;
use crate::types::FileState;
use crate::types::RepoConfig;

#[derive(Clone)]
pub struct Catalog {
    store: Store,
}

impl Catalog {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn get_repo_config(&self, repo_root: &str) -> Result<Option<RepoConfig>> {
        let dialect = self.store.dialect();
        let sql = format!(
            "SELECT repo_root, model_id, dimensions, updated_at FROM repo_config WHERE repo_root = {}",
            dialect.placeholder(1),
        );
        match &self.store {
            Store::Embedded(s) => {
                let repo_root = repo_root.to_string();
                s.query(move |conn| {
                    conn.query_row(&sql, [&repo_root], |r| {
                        Ok(RepoConfig {
                            repo_root: r.get(0)?,
                            model_id: r.get(1)?,
                            dimensions: r.get::<_, i64>(2)? as usize,
                            updated_at: r.get(3)?,
                        })
                    })
                    .optional()
                    .map_err(Into::into)
                })
                .await
            }
            Store::Server(s) => {
                let row: Option<(String, String, i64, chrono::DateTime<Utc>)> = sqlx::query_as(&sql)
                    .bind(repo_root)
                    .fetch_optional(s.pool())
                    .await?;
                Ok(row.map(|(repo_root, model_id, dimensions, updated_at)| RepoConfig {
                    repo_root,
                    model_id,
                    dimensions: dimensions as usize,
                    updated_at: updated_at.timestamp(),
                }))
            }
        }
    }

    /// Created on first indexing, updated only when the model or
    /// dimensions change.
    pub async fn set_repo_config(&self, repo_root: &str, model_id: &str, dimensions: usize) -> Result<()> {
        let dialect = self.store.dialect();
        let sql = dialect.upsert_template(
            "repo_config",
            &["repo_root", "model_id", "dimensions", "updated_at"],
            &["repo_root"],
            &["model_id", "dimensions", "updated_at"],
        );
        match &self.store {
            Store::Embedded(s) => {
                let repo_root = repo_root.to_string();
                let model_id = model_id.to_string();
                let now = Utc::now().timestamp();
                s.transaction(move |tx| {
                    tx.execute(&sql, rusqlite::params![repo_root, model_id, dimensions as i64, now])?;
                    Ok(())
                })
                .await
            }
            Store::Server(s) => {
                let now = Utc::now();
                sqlx::query(&sql)
                    .bind(repo_root)
                    .bind(model_id)
                    .bind(dimensions as i64)
                    .bind(now)
                    .execute(s.pool())
                    .await?;
                Ok(())
            }
        }
    }

    pub async fn get_file_state(&self, repo_root: &str, path: &str) -> Result<Option<FileState>> {
        let dialect = self.store.dialect();
        let sql = format!(
            "SELECT repo_root, path, mtime, size, indexed_at FROM file_state WHERE repo_root = {} AND path = {}",
            dialect.placeholder(1),
            dialect.placeholder(2),
        );
        match &self.store {
            Store::Embedded(s) => {
                let repo_root = repo_root.to_string();
                let path = path.to_string();
                s.query(move |conn| {
                    conn.query_row(&sql, rusqlite::params![repo_root, path], |r| {
                        Ok(FileState {
                            repo_root: r.get(0)?,
                            path: r.get(1)?,
                            mtime: r.get(2)?,
                            size: r.get::<_, i64>(3)? as u64,
                            indexed_at: r.get(4)?,
                        })
                    })
                    .optional()
                    .map_err(Into::into)
                })
                .await
            }
            Store::Server(s) => {
                let row: Option<(String, String, i64, i64, chrono::DateTime<Utc>)> = sqlx::query_as(&sql)
                    .bind(repo_root)
                    .bind(path)
                    .fetch_optional(s.pool())
                    .await?;
                Ok(row.map(|(repo_root, path, mtime, size, indexed_at)| FileState {
                    repo_root,
                    path,
                    mtime,
                    size: size as u64,
                    indexed_at: indexed_at.timestamp(),
                }))
            }
        }
    }

    pub async fn upsert_file_state(&self, state: FileState) -> Result<()> {
        let dialect = self.store.dialect();
        let sql = dialect.upsert_template(
            "file_state",
            &["repo_root", "path", "mtime", "size", "indexed_at"],
            &["repo_root", "path"],
            &["mtime", "size", "indexed_at"],
        );
        match &self.store {
            Store::Embedded(s) => {
                let now = Utc::now().timestamp();
                s.transaction(move |tx| {
                    tx.execute(&sql, rusqlite::params![state.repo_root, state.path, state.mtime, state.size as i64, now])?;
                    Ok(())
                })
                .await
            }
            Store::Server(s) => {
                let now = Utc::now();
                sqlx::query(&sql)
                    .bind(&state.repo_root)
                    .bind(&state.path)
                    .bind(state.mtime)
                    .bind(state.size as i64)
                    .bind(now)
                    .execute(s.pool())
                    .await?;
                Ok(())
            }
        }
    }

    pub async fn delete_file_state(&self, repo_root: &str, path: &str) -> Result<()> {
        let dialect = self.store.dialect();
        let sql = format!(
            "DELETE FROM file_state WHERE repo_root = {} AND path = {}",
            dialect.placeholder(1),
            dialect.placeholder(2),
        );
        match &self.store {
            Store::Embedded(s) => {
                let repo_root = repo_root.to_string();
                let path = path.to_string();
                s.transaction(move |tx| {
                    tx.execute(&sql, rusqlite::params![repo_root, path])?;
                    Ok(())
                })
                .await
            }
            Store::Server(s) => {
                sqlx::query(&sql).bind(repo_root).bind(path).execute(s.pool()).await?;
                Ok(())
            }
        }
    }
}
