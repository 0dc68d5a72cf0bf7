//! Recently edited files as a temporal relevance signal, fused alongside
//! the lexical/semantic/symbolic streams via [`crate::types::ResultSource::Recent`].

use std::num::NonZeroUsize;
use std::path::Path;
use std::path::PathBuf;
use std::time::Instant;

use lru::LruCache;

use crate::types::Location;
use crate::types::ResultSource;
use crate::types::StreamResult;

#[derive(Debug, Clone)]
struct RecentFileEntry {
    last_accessed: Instant,
    locations: Vec<Location>,
}

/// LRU cache of recently touched files. Notified by the indexer on every
/// file added or modified during a run; queried by rank fusion as an
/// additional stream alongside lexical/semantic/symbolic.
pub struct RecentFilesCache {
    cache: LruCache<PathBuf, RecentFileEntry>,
}

impl RecentFilesCache {
    pub fn new(max_entries: usize) -> Self {
        let capacity = NonZeroUsize::new(max_entries).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: LruCache::new(capacity),
        }
    }

    pub fn notify_file_accessed(&mut self, path: &Path, locations: Vec<Location>) {
        self.cache.put(
            path.to_path_buf(),
            RecentFileEntry {
                last_accessed: Instant::now(),
                locations,
            },
        );
    }

    pub fn remove(&mut self, path: &Path) {
        self.cache.pop(&path.to_path_buf());
    }

    /// Most-recently-accessed-first stream of locations, each scored by
    /// recency rank rather than wall-clock age (rank fusion only needs a
    /// consistent ordering within the stream).
    pub fn stream(&self, limit: usize) -> Vec<StreamResult> {
        self.cache
            .iter()
            .flat_map(|(_, entry)| entry.locations.iter())
            .take(limit)
            .enumerate()
            .map(|(rank, loc)| StreamResult {
                id: format!("{}:{}:{}", loc.path, loc.start_line, loc.end_line),
                path: loc.path.clone(),
                line: loc.start_line,
                end_line: loc.end_line,
                score: 1.0 / (1.0 + rank as f32),
                source: ResultSource::Recent,
                snippet: None,
                metadata: serde_json::json!({}),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.cache.contains(&path.to_path_buf())
    }

    pub fn clear(&mut self) {
        self.cache.clear();
    }
}

impl Default for RecentFilesCache {
    fn default() -> Self {
        Self::new(50)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeType;

    fn loc(path: &str, start: u32) -> Location {
        Location {
            repo_root: "/repo".into(),
            path: path.into(),
            start_line: start,
            end_line: start + 2,
            chunk_hash: "h".into(),
            node_type: NodeType::Function,
            node_name: None,
            language: "rust".into(),
            indexed_at: 0,
        }
    }

    #[test]
    fn new_cache_is_empty() {
        let cache = RecentFilesCache::new(10);
        assert!(cache.is_empty());
    }

    #[test]
    fn notify_then_stream_returns_locations() {
        let mut cache = RecentFilesCache::new(10);
        cache.notify_file_accessed(Path::new("a.rs"), vec![loc("a.rs", 1)]);
        let stream = cache.stream(10);
        assert_eq!(stream.len(), 1);
        assert_eq!(stream[0].source, ResultSource::Recent);
    }

    #[test]
    fn lru_eviction_drops_oldest() {
        let mut cache = RecentFilesCache::new(2);
        cache.notify_file_accessed(Path::new("a.rs"), vec![loc("a.rs", 1)]);
        cache.notify_file_accessed(Path::new("b.rs"), vec![loc("b.rs", 1)]);
        cache.notify_file_accessed(Path::new("c.rs"), vec![loc("c.rs", 1)]);
        assert!(!cache.contains(Path::new("a.rs")));
        assert!(cache.contains(Path::new("c.rs")));
    }

    #[test]
    fn stream_respects_limit() {
        let mut cache = RecentFilesCache::new(10);
        cache.notify_file_accessed(Path::new("a.rs"), vec![loc("a.rs", 1), loc("a.rs", 10)]);
        assert_eq!(cache.stream(1).len(), 1);
    }
}
