//! Location store: `(repo_root, path, start_line, end_line) → chunk_hash`,
//! kept separate from the embedding cache so "where code is" can change
//! (file edited, file deleted) without touching "what embedding it has".

use std::collections::HashMap;

use chrono::Utc;

use crate::error::Result;
use crate::storage::Store;
use crate::types::Location;
use crate::types::NodeType;

#[derive(Clone)]
pub struct LocationStore {
    store: Store,
}

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct LocationStats {
    pub total_locations: u64,
    pub unique_hashes: u64,
    pub file_count: u64,
    pub by_node_type: HashMap<String, u64>,
    pub by_language: HashMap<String, u64>,
}

impl LocationStore {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn upsert_many(&self, repo_root: &str, locations: Vec<Location>) -> Result<()> {
        if locations.is_empty() {
            return Ok(());
        }
        let dialect = self.store.dialect();
        let columns = [
            "repo_root",
            "path",
            "start_line",
            "end_line",
            "chunk_hash",
            "node_type",
            "node_name",
            "language",
            "indexed_at",
        ];
        let conflict_columns = ["repo_root", "path", "start_line", "end_line"];
        let update_columns = ["chunk_hash", "node_type", "node_name", "language", "indexed_at"];
        let sql = dialect.upsert_template("locations", &columns, &conflict_columns, &update_columns);

        match &self.store {
            Store::Embedded(s) => {
                let repo_root = repo_root.to_string();
                let now = Utc::now().timestamp();
                s.transaction(move |tx| {
                    for loc in &locations {
                        tx.execute(
                            &sql,
                            rusqlite::params![
                                repo_root,
                                loc.path,
                                loc.start_line,
                                loc.end_line,
                                loc.chunk_hash,
                                loc.node_type.as_str(),
                                loc.node_name,
                                loc.language,
                                now,
                            ],
                        )?;
                    }
                    Ok(())
                })
                .await
            }
            Store::Server(s) => {
                let now = Utc::now();
                let mut tx = s.pool().begin().await?;
                for loc in &locations {
                    sqlx::query(&sql)
                        .bind(repo_root)
                        .bind(&loc.path)
                        .bind(loc.start_line as i64)
                        .bind(loc.end_line as i64)
                        .bind(&loc.chunk_hash)
                        .bind(loc.node_type.as_str())
                        .bind(&loc.node_name)
                        .bind(&loc.language)
                        .bind(now)
                        .execute(&mut *tx)
                        .await?;
                }
                tx.commit().await?;
                Ok(())
            }
        }
    }

    /// Removes every location in `path`. Atomic: a partially failed delete
    /// must leave the prior state, so this runs inside one transaction.
    pub async fn delete_by_path(&self, repo_root: &str, path: &str) -> Result<()> {
        let dialect = self.store.dialect();
        let sql = format!(
            "DELETE FROM locations WHERE repo_root = {} AND path = {}",
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

    pub async fn list_file(&self, repo_root: &str, path: &str) -> Result<Vec<Location>> {
        let dialect = self.store.dialect();
        let sql = format!(
            "SELECT repo_root, path, start_line, end_line, chunk_hash, node_type, node_name, language, indexed_at \
             FROM locations WHERE repo_root = {} AND path = {} ORDER BY start_line",
            dialect.placeholder(1),
            dialect.placeholder(2),
        );
        match &self.store {
            Store::Embedded(s) => {
                let repo_root = repo_root.to_string();
                let path = path.to_string();
                s.query(move |conn| {
                    let mut stmt = conn.prepare(&sql)?;
                    let rows = stmt.query_map(rusqlite::params![repo_root, path], row_to_location)?;
                    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(Into::into)
                })
                .await
            }
            Store::Server(s) => {
                let rows: Vec<PgLocationRow> = sqlx::query_as(&sql)
                    .bind(repo_root)
                    .bind(path)
                    .fetch_all(s.pool())
                    .await?;
                Ok(rows.into_iter().map(pg_row_to_location).collect())
            }
        }
    }

    /// One hash can have multiple locations (same code copy-pasted).
    pub async fn lookup_hashes(
        &self,
        repo_root: &str,
        hashes: &[String],
    ) -> Result<HashMap<String, Vec<Location>>> {
        if hashes.is_empty() {
            return Ok(HashMap::new());
        }
        let dialect = self.store.dialect();
        match &self.store {
            Store::Embedded(s) => {
                let repo_root = repo_root.to_string();
                let hashes = hashes.to_vec();
                let sql = format!(
                    "SELECT repo_root, path, start_line, end_line, chunk_hash, node_type, node_name, language, indexed_at \
                     FROM locations WHERE repo_root = {} AND chunk_hash = {}",
                    dialect.placeholder(1),
                    dialect.placeholder(2),
                );
                s.query(move |conn| {
                    let mut out: HashMap<String, Vec<Location>> = HashMap::new();
                    let mut stmt = conn.prepare(&sql)?;
                    for hash in &hashes {
                        let rows = stmt.query_map(rusqlite::params![repo_root, hash], row_to_location)?;
                        for row in rows {
                            let loc = row?;
                            out.entry(hash.clone()).or_default().push(loc);
                        }
                    }
                    Ok(out)
                })
                .await
            }
            Store::Server(s) => {
                let sql = format!(
                    "SELECT repo_root, path, start_line, end_line, chunk_hash, node_type, node_name, language, indexed_at \
                     FROM locations WHERE repo_root = {} AND chunk_hash = ANY({})",
                    dialect.placeholder(1),
                    dialect.placeholder(2),
                );
                let rows: Vec<PgLocationRow> = sqlx::query_as(&sql)
                    .bind(repo_root)
                    .bind(hashes)
                    .fetch_all(s.pool())
                    .await?;
                let mut out: HashMap<String, Vec<Location>> = HashMap::new();
                for row in rows {
                    let hash = row.4.clone();
                    out.entry(hash).or_default().push(pg_row_to_location(row));
                }
                Ok(out)
            }
        }
    }

    pub async fn stats(&self, repo_root: &str) -> Result<LocationStats> {
        let dialect = self.store.dialect();
        let p1 = dialect.placeholder(1);
        match &self.store {
            Store::Embedded(s) => {
                let repo_root = repo_root.to_string();
                let total_sql = format!("SELECT count(*) FROM locations WHERE repo_root = {p1}");
                let unique_sql = format!("SELECT count(DISTINCT chunk_hash) FROM locations WHERE repo_root = {p1}");
                let files_sql = format!("SELECT count(DISTINCT path) FROM locations WHERE repo_root = {p1}");
                let node_type_sql = format!("SELECT node_type, count(*) FROM locations WHERE repo_root = {p1} GROUP BY node_type");
                let language_sql = format!("SELECT language, count(*) FROM locations WHERE repo_root = {p1} GROUP BY language");
                s.query(move |conn| {
                    let total: i64 = conn.query_row(&total_sql, [&repo_root], |r| r.get(0))?;
                    let unique_hashes: i64 = conn.query_row(&unique_sql, [&repo_root], |r| r.get(0))?;
                    let file_count: i64 = conn.query_row(&files_sql, [&repo_root], |r| r.get(0))?;
                    let mut by_node_type = HashMap::new();
                    let mut stmt = conn.prepare(&node_type_sql)?;
                    for row in stmt.query_map([&repo_root], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? as u64)))? {
                        let (k, v) = row?;
                        by_node_type.insert(k, v);
                    }
                    let mut by_language = HashMap::new();
                    let mut stmt = conn.prepare(&language_sql)?;
                    for row in stmt.query_map([&repo_root], |r| Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? as u64)))? {
                        let (k, v) = row?;
                        by_language.insert(k, v);
                    }
                    Ok(LocationStats {
                        total_locations: total as u64,
                        unique_hashes: unique_hashes as u64,
                        file_count: file_count as u64,
                        by_node_type,
                        by_language,
                    })
                })
                .await
            }
            Store::Server(s) => {
                let (total,): (i64,) = sqlx::query_as(&format!("SELECT count(*) FROM locations WHERE repo_root = {p1}"))
                    .bind(repo_root)
                    .fetch_one(s.pool())
                    .await?;
                let (unique_hashes,): (i64,) =
                    sqlx::query_as(&format!("SELECT count(DISTINCT chunk_hash) FROM locations WHERE repo_root = {p1}"))
                        .bind(repo_root)
                        .fetch_one(s.pool())
                        .await?;
                let (file_count,): (i64,) =
                    sqlx::query_as(&format!("SELECT count(DISTINCT path) FROM locations WHERE repo_root = {p1}"))
                        .bind(repo_root)
                        .fetch_one(s.pool())
                        .await?;
                let node_type_rows: Vec<(String, i64)> = sqlx::query_as(&format!(
                    "SELECT node_type, count(*) FROM locations WHERE repo_root = {p1} GROUP BY node_type"
                ))
                .bind(repo_root)
                .fetch_all(s.pool())
                .await?;
                let language_rows: Vec<(String, i64)> = sqlx::query_as(&format!(
                    "SELECT language, count(*) FROM locations WHERE repo_root = {p1} GROUP BY language"
                ))
                .bind(repo_root)
                .fetch_all(s.pool())
                .await?;
                Ok(LocationStats {
                    total_locations: total as u64,
                    unique_hashes: unique_hashes as u64,
                    file_count: file_count as u64,
                    by_node_type: node_type_rows.into_iter().map(|(k, v)| (k, v as u64)).collect(),
                    by_language: language_rows.into_iter().map(|(k, v)| (k, v as u64)).collect(),
                })
            }
        }
    }

    /// Cross-repo variant used by the cross-repo semantic search path. A
    /// repo's locations are never visible through the single-repo methods
    /// above; this is the only entry point that spans repos.
    pub async fn list_across_repos(
        &self,
        repo_roots: &[String],
        hashes: &[String],
    ) -> Result<HashMap<String, Vec<Location>>> {
        let mut out: HashMap<String, Vec<Location>> = HashMap::new();
        for repo_root in repo_roots {
            let found = self.lookup_hashes(repo_root, hashes).await?;
            for (hash, locs) in found {
                out.entry(hash).or_default().extend(locs);
            }
        }
        Ok(out)
    }

    /// Deletes locations for `repo_root` whose `chunk_hash` carries the old
    /// `dimensions` value — used when the active embedding model's
    /// dimensionality changes. The embeddings themselves are untouched.
    pub async fn delete_for_repo_dimension(&self, repo_root: &str, dimensions: usize) -> Result<()> {
        let dialect = self.store.dialect();
        match &self.store {
            Store::Embedded(s) => {
                let repo_root = repo_root.to_string();
                let sql = format!(
                    "DELETE FROM locations WHERE repo_root = {} AND chunk_hash IN \
                     (SELECT chunk_hash FROM embeddings WHERE dimensions = {})",
                    dialect.placeholder(1),
                    dialect.placeholder(2),
                );
                s.transaction(move |tx| {
                    tx.execute(&sql, rusqlite::params![repo_root, dimensions as i64])?;
                    Ok(())
                })
                .await
            }
            Store::Server(s) => {
                let table = crate::storage::postgres::embeddings_table_name(dimensions);
                let sql = format!(
                    "DELETE FROM locations WHERE repo_root = {} AND chunk_hash IN (SELECT chunk_hash FROM {table})",
                    dialect.placeholder(1),
                );
                sqlx::query(&sql).bind(repo_root).execute(s.pool()).await?;
                Ok(())
            }
        }
    }
}

type PgLocationRow = (String, String, i64, i64, String, String, Option<String>, String, chrono::DateTime<Utc>);

fn pg_row_to_location(row: PgLocationRow) -> Location {
    let (repo_root, path, start_line, end_line, chunk_hash, node_type, node_name, language, indexed_at) = row;
    Location {
        repo_root,
        path,
        start_line: start_line as u32,
        end_line: end_line as u32,
        chunk_hash,
        node_type: parse_node_type(&node_type),
        node_name,
        language,
        indexed_at: indexed_at.timestamp(),
    }
}

fn row_to_location(row: &rusqlite::Row) -> rusqlite::Result<Location> {
    let node_type_str: String = row.get(5)?;
    Ok(Location {
        repo_root: row.get(0)?,
        path: row.get(1)?,
        start_line: row.get(2)?,
        end_line: row.get(3)?,
        chunk_hash: row.get(4)?,
        node_type: parse_node_type(&node_type_str),
        node_name: row.get(6)?,
        language: row.get(7)?,
        indexed_at: row.get(8)?,
    })
}

fn parse_node_type(s: &str) -> NodeType {
    match s {
        "function" => NodeType::Function,
        "method" => NodeType::Method,
        "class" => NodeType::Class,
        "struct" => NodeType::Struct,
        "interface" => NodeType::Interface,
        "trait" => NodeType::Trait,
        "enum" => NodeType::Enum,
        "module" => NodeType::Module,
        "block" => NodeType::Block,
        _ => NodeType::File,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tempfile::tempdir;

    async fn open_store() -> (LocationStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let sqlite = crate::storage::SqliteStore::open(&dir.path().join("index.db")).unwrap();
        (LocationStore::new(Store::Embedded(Arc::new(sqlite))), dir)
    }

    fn sample(path: &str, start: u32) -> Location {
        Location {
            repo_root: "/repo".into(),
            path: path.into(),
            start_line: start,
            end_line: start + 2,
            chunk_hash: format!("hash-{path}-{start}"),
            node_type: NodeType::Function,
            node_name: Some("f".into()),
            language: "rust".into(),
            indexed_at: 0,
        }
    }

    #[tokio::test]
    async fn upsert_then_list_file() {
        let (store, _dir) = open_store().await;
        store
            .upsert_many("/repo", vec![sample("a.rs", 1), sample("a.rs", 10)])
            .await
            .unwrap();
        let locs = store.list_file("/repo", "a.rs").await.unwrap();
        assert_eq!(locs.len(), 2);
        assert_eq!(locs[0].start_line, 1);
    }

    #[tokio::test]
    async fn delete_by_path_removes_all_its_locations() {
        let (store, _dir) = open_store().await;
        store
            .upsert_many("/repo", vec![sample("a.rs", 1), sample("b.rs", 1)])
            .await
            .unwrap();
        store.delete_by_path("/repo", "a.rs").await.unwrap();
        assert!(store.list_file("/repo", "a.rs").await.unwrap().is_empty());
        assert_eq!(store.list_file("/repo", "b.rs").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn locations_are_repo_isolated() {
        let (store, _dir) = open_store().await;
        store.upsert_many("/repo-a", vec![sample("a.rs", 1)]).await.unwrap();
        assert!(store.list_file("/repo-b", "a.rs").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn stats_aggregate_counts() {
        let (store, _dir) = open_store().await;
        store
            .upsert_many("/repo", vec![sample("a.rs", 1), sample("a.rs", 10), sample("b.rs", 1)])
            .await
            .unwrap();
        let stats = store.stats("/repo").await.unwrap();
        assert_eq!(stats.total_locations, 3);
        assert_eq!(stats.file_count, 2);
    }
}
