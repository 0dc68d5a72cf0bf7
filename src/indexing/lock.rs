//! Advisory per-repo index lock. The `.{tool}/index.lock` file named by the
//! tool protocol is the fast-path existence check; the `index_lock` row is
//! authoritative and lets a stale lock (holder crashed) be reclaimed once
//! `expires_at` has passed.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use crate::error::RepolensError;
use crate::error::Result;
use crate::storage::Store;
use crate::storage::sqlite::OptionalExt;

pub struct IndexLockGuard {
    store: Store,
    repo_root: String,
    lock_path: PathBuf,
    holder_id: String,
    timeout: Duration,
}

impl IndexLockGuard {
    /// Fails with `IndexInProgress` if another holder's row is present and
    /// not yet expired; otherwise inserts (or reclaims) the row and touches
    /// the lock file.
    pub async fn try_acquire(store: Store, repo_root: &str, lock_path: PathBuf, timeout: Duration) -> Result<Self> {
        let now = Utc::now().timestamp();
        let holder_id = Uuid::new_v4().to_string();
        let expires_at = now + timeout.as_secs() as i64;

        match &store {
            Store::Embedded(s) => {
                let repo_root_owned = repo_root.to_string();
                let holder = holder_id.clone();
                s.transaction(move |tx| {
                    let existing: Option<i64> = tx
                        .query_row(
                            "SELECT expires_at FROM index_lock WHERE repo_root = ?1",
                            [&repo_root_owned],
                            |r| r.get(0),
                        )
                        .optional()?;
                    if let Some(expires) = existing {
                        if expires > now {
                            return Err(RepolensError::IndexInProgress {
                                repo_root: PathBuf::from(&repo_root_owned),
                                lock_path: PathBuf::new(),
                            });
                        }
                    }
                    tx.execute(
                        "INSERT INTO index_lock (repo_root, holder_id, locked_at, expires_at) VALUES (?1, ?2, ?3, ?4) \
                         ON CONFLICT (repo_root) DO UPDATE SET holder_id = excluded.holder_id, \
                         locked_at = excluded.locked_at, expires_at = excluded.expires_at",
                        rusqlite::params![repo_root_owned, holder, now, expires_at],
                    )?;
                    Ok(())
                })
                .await
                .map_err(|e| annotate_lock_path(e, &lock_path))?;
            }
            Store::Server(s) => {
                let row: Option<(i64,)> = sqlx::query_as("SELECT extract(epoch from expires_at)::bigint FROM index_lock WHERE repo_root = $1")
                    .bind(repo_root)
                    .fetch_optional(s.pool())
                    .await?;
                if let Some((expires,)) = row {
                    if expires > now {
                        return Err(RepolensError::IndexInProgress {
                            repo_root: PathBuf::from(repo_root),
                            lock_path,
                        });
                    }
                }
                sqlx::query(
                    "INSERT INTO index_lock (repo_root, holder_id, locked_at, expires_at) VALUES ($1, $2, now(), to_timestamp($3)) \
                     ON CONFLICT (repo_root) DO UPDATE SET holder_id = excluded.holder_id, \
                     locked_at = excluded.locked_at, expires_at = excluded.expires_at",
                )
                .bind(repo_root)
                .bind(&holder_id)
                .bind(expires_at)
                .execute(s.pool())
                .await?;
            }
        }

        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&lock_path, &holder_id)?;

        Ok(Self {
            store,
            repo_root: repo_root.to_string(),
            lock_path,
            holder_id,
            timeout,
        })
    }

    /// Pushes `expires_at` forward; called periodically during a long index
    /// run so a live holder's lock does not appear stale mid-run.
    pub async fn refresh(&self) -> Result<()> {
        let now = Utc::now().timestamp();
        let expires_at = now + self.timeout.as_secs() as i64;
        match &self.store {
            Store::Embedded(s) => {
                let repo_root = self.repo_root.clone();
                let holder = self.holder_id.clone();
                s.transaction(move |tx| {
                    tx.execute(
                        "UPDATE index_lock SET expires_at = ?1 WHERE repo_root = ?2 AND holder_id = ?3",
                        rusqlite::params![expires_at, repo_root, holder],
                    )?;
                    Ok(())
                })
                .await
            }
            Store::Server(s) => {
                sqlx::query("UPDATE index_lock SET expires_at = to_timestamp($1) WHERE repo_root = $2 AND holder_id = $3")
                    .bind(expires_at)
                    .bind(&self.repo_root)
                    .bind(&self.holder_id)
                    .execute(s.pool())
                    .await?;
                Ok(())
            }
        }
    }

    pub async fn release(self) -> Result<()> {
        match &self.store {
            Store::Embedded(s) => {
                let repo_root = self.repo_root.clone();
                let holder = self.holder_id.clone();
                s.transaction(move |tx| {
                    tx.execute(
                        "DELETE FROM index_lock WHERE repo_root = ?1 AND holder_id = ?2",
                        rusqlite::params![repo_root, holder],
                    )?;
                    Ok(())
                })
                .await?;
            }
            Store::Server(s) => {
                sqlx::query("DELETE FROM index_lock WHERE repo_root = $1 AND holder_id = $2")
                    .bind(&self.repo_root)
                    .bind(&self.holder_id)
                    .execute(s.pool())
                    .await?;
            }
        }
        let _ = std::fs::remove_file(&self.lock_path);
        Ok(())
    }
}

impl Drop for IndexLockGuard {
    fn drop(&mut self) {
        // Best-effort: the DB row is the authoritative state and times out
        // on its own; this only cleans up the fast-path file.
        let _ = std::fs::remove_file(&self.lock_path);
    }
}

fn annotate_lock_path(e: RepolensError, lock_path: &Path) -> RepolensError {
    match e {
        RepolensError::IndexInProgress { repo_root, .. } => RepolensError::IndexInProgress {
            repo_root,
            lock_path: lock_path.to_path_buf(),
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::storage::SqliteStore;

    #[tokio::test]
    async fn second_acquire_fails_while_first_is_held() {
        let dir = tempfile::tempdir().unwrap();
        let sqlite = SqliteStore::open(&dir.path().join("index.db")).unwrap();
        let store = Store::Embedded(Arc::new(sqlite));
        let lock_path = dir.path().join("index.lock");

        let first = IndexLockGuard::try_acquire(store.clone(), "/repo", lock_path.clone(), Duration::from_secs(60))
            .await
            .unwrap();
        let second = IndexLockGuard::try_acquire(store.clone(), "/repo", lock_path.clone(), Duration::from_secs(60)).await;
        assert!(matches!(second, Err(RepolensError::IndexInProgress { .. })));

        first.release().await.unwrap();
        IndexLockGuard::try_acquire(store, "/repo", lock_path, Duration::from_secs(60))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn expired_lock_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let sqlite = SqliteStore::open(&dir.path().join("index.db")).unwrap();
        let store = Store::Embedded(Arc::new(sqlite));
        let lock_path = dir.path().join("index.lock");

        let first = IndexLockGuard::try_acquire(store.clone(), "/repo", lock_path.clone(), Duration::from_secs(0))
            .await
            .unwrap();
        std::mem::forget(first);

        IndexLockGuard::try_acquire(store, "/repo", lock_path, Duration::from_secs(60))
            .await
            .unwrap();
    }
}
