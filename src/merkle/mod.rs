//! Merkle snapshot: a hash tree over a working directory supporting
//! `O(log n + changes)` diffs between two runs without re-reading
//! unchanged files.

mod ignore_list;

use std::collections::BTreeMap;
use std::path::Path;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

use crate::error::RepolensError;
use crate::error::Result;

pub use ignore_list::IgnoreSet;

const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// One node of the snapshot tree. `path` is relative to the repo root
/// (`""` for the root node). Directories carry their children sorted by
/// name; files do not.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SnapshotNode {
    pub path: String,
    pub is_dir: bool,
    pub entry_hash: String,
    pub size: u64,
    pub mtime: i64,
    #[serde(default)]
    pub children: Vec<SnapshotNode>,
}

/// A tree of [`SnapshotNode`]s plus a format version, serialized to
/// `merkle.bin` between runs.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub version: u32,
    pub root: SnapshotNode,
}

impl Snapshot {
    pub fn root_hash(&self) -> &str {
        &self.root.entry_hash
    }
}

/// Files skipped during a build: unreadable files are not included in
/// either snapshot so they never appear as spuriously "deleted".
#[derive(Debug, Default)]
pub struct BuildReport {
    pub snapshot: Option<Snapshot>,
    pub skipped: Vec<String>,
}

/// Recursively walks `repo_root`, skipping the tool's own data directory,
/// version-control and dependency directories, build outputs, and any path
/// matched by the repo's ignore patterns. Hashes file contents and, for
/// directories, the sorted concatenation of `(child_name, child_hash,
/// child_is_dir)`.
pub fn build(repo_root: &Path, tool_dir_name: &str) -> Result<BuildReport> {
    let ignores = IgnoreSet::load(repo_root, tool_dir_name)?;
    let mut report = BuildReport::default();
    let root = build_node(repo_root, repo_root, "", &ignores, &mut report.skipped)?;
    report.snapshot = Some(Snapshot {
        version: SNAPSHOT_FORMAT_VERSION,
        root,
    });
    Ok(report)
}

fn build_node(
    repo_root: &Path,
    abs_path: &Path,
    rel_path: &str,
    ignores: &IgnoreSet,
    skipped: &mut Vec<String>,
) -> Result<SnapshotNode> {
    let metadata = std::fs::symlink_metadata(abs_path)?;

    if metadata.is_dir() {
        let mut entries: Vec<(String, PathBuf)> = Vec::new();
        for entry in std::fs::read_dir(abs_path)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let child_rel = if rel_path.is_empty() {
                name.clone()
            } else {
                format!("{rel_path}/{name}")
            };
            if ignores.is_ignored(&child_rel, entry.path().is_dir()) {
                continue;
            }
            entries.push((name, entry.path()));
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));

        let mut children = Vec::with_capacity(entries.len());
        for (name, path) in entries {
            let child_rel = if rel_path.is_empty() {
                name
            } else {
                format!("{rel_path}/{name}")
            };
            match build_node(repo_root, &path, &child_rel, ignores, skipped) {
                Ok(node) => children.push(node),
                Err(_) => skipped.push(child_rel),
            }
        }

        let entry_hash = hash_directory(&children);
        let size = children.iter().map(|c| c.size).sum();
        Ok(SnapshotNode {
            path: rel_path.to_string(),
            is_dir: true,
            entry_hash,
            size,
            mtime: mtime_secs(&metadata),
            children,
        })
    } else {
        let bytes = std::fs::read(abs_path)?;
        let entry_hash = hash_file(&bytes);
        Ok(SnapshotNode {
            path: rel_path.to_string(),
            is_dir: false,
            entry_hash,
            size: metadata.len(),
            mtime: mtime_secs(&metadata),
            children: Vec::new(),
        })
    }
}

fn mtime_secs(metadata: &std::fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn hash_file(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn hash_directory(children: &[SnapshotNode]) -> String {
    let mut hasher = Sha256::new();
    for child in children {
        let name = child.path.rsplit('/').next().unwrap_or(&child.path);
        hasher.update(name.as_bytes());
        hasher.update([0u8]);
        hasher.update(child.entry_hash.as_bytes());
        hasher.update([child.is_dir as u8]);
    }
    hex::encode(hasher.finalize())
}

/// Added, modified, and deleted file paths (relative to the repo root)
/// between two snapshots.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub added: Vec<String>,
    pub modified: Vec<String>,
    pub deleted: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }
}

/// Walks both trees in lockstep by name order, recursing only into
/// subtrees whose hashes differ. `diff(x, x)` is always empty.
pub fn diff(old: &Snapshot, new: &Snapshot) -> ChangeSet {
    let mut changes = ChangeSet::default();
    if old.root.entry_hash == new.root.entry_hash {
        return changes;
    }
    diff_node(Some(&old.root), Some(&new.root), &mut changes);
    changes
}

fn diff_node(old: Option<&SnapshotNode>, new: Option<&SnapshotNode>, changes: &mut ChangeSet) {
    match (old, new) {
        (None, None) => {}
        (None, Some(n)) => collect_all(n, &mut changes.added),
        (Some(o), None) => collect_all(o, &mut changes.deleted),
        (Some(o), Some(n)) => {
            if o.entry_hash == n.entry_hash {
                return;
            }
            if !o.is_dir || !n.is_dir {
                // A file became a dir or vice versa, or two differing files:
                // treat as delete-then-add to keep file/dir semantics simple.
                if o.is_dir != n.is_dir {
                    collect_all(o, &mut changes.deleted);
                    collect_all(n, &mut changes.added);
                } else {
                    changes.modified.push(n.path.clone());
                }
                return;
            }
            let old_children: BTreeMap<&str, &SnapshotNode> = o
                .children
                .iter()
                .map(|c| (child_name(c), c))
                .collect();
            let new_children: BTreeMap<&str, &SnapshotNode> = n
                .children
                .iter()
                .map(|c| (child_name(c), c))
                .collect();

            let mut names: Vec<&str> = old_children
                .keys()
                .chain(new_children.keys())
                .copied()
                .collect();
            names.sort_unstable();
            names.dedup();

            for name in names {
                diff_node(old_children.get(name).copied(), new_children.get(name).copied(), changes);
            }
        }
    }
}

fn child_name(node: &SnapshotNode) -> &str {
    node.path.rsplit('/').next().unwrap_or(&node.path)
}

fn collect_all(node: &SnapshotNode, out: &mut Vec<String>) {
    if node.is_dir {
        for child in &node.children {
            collect_all(child, out);
        }
    } else {
        out.push(node.path.clone());
    }
}

/// Serializes a snapshot to the repo's `merkle.bin`.
pub fn save(snapshot: &Snapshot, path: &Path) -> Result<()> {
    let bytes = serde_json::to_vec(snapshot)
        .map_err(|e| RepolensError::internal(format!("snapshot serialize: {e}")))?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)?;
    Ok(())
}

/// Loads a previously saved snapshot. A corrupt file is discarded and
/// treated as "no previous snapshot" so the next run performs a full build.
pub fn load(path: &Path) -> Result<Option<Snapshot>> {
    let bytes = match std::fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    match serde_json::from_slice::<Snapshot>(&bytes) {
        Ok(snapshot) if snapshot.version == SNAPSHOT_FORMAT_VERSION => Ok(Some(snapshot)),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn write_file(dir: &Path, rel: &str, content: &str) {
        let path = dir.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, content).unwrap();
    }

    #[test]
    fn build_twice_is_identical() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "a.rs", "fn a() {}");
        write_file(dir.path(), "sub/b.rs", "fn b() {}");

        let one = build(dir.path(), ".repolens").unwrap().snapshot.unwrap();
        let two = build(dir.path(), ".repolens").unwrap().snapshot.unwrap();
        assert_eq!(one.root_hash(), two.root_hash());
        assert_eq!(one, two);
    }

    #[test]
    fn diff_of_identical_trees_is_empty() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "a.rs", "fn a() {}");
        let snap = build(dir.path(), ".repolens").unwrap().snapshot.unwrap();
        let changes = diff(&snap, &snap);
        assert!(changes.is_empty());
    }

    #[test]
    fn single_file_modification_is_isolated() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "a.rs", "fn a() {}");
        write_file(dir.path(), "b.rs", "fn b() {}");
        let before = build(dir.path(), ".repolens").unwrap().snapshot.unwrap();

        write_file(dir.path(), "a.rs", "fn a() { changed() }");
        let after = build(dir.path(), ".repolens").unwrap().snapshot.unwrap();

        let changes = diff(&before, &after);
        assert_eq!(changes.modified, vec!["a.rs".to_string()]);
        assert!(changes.added.is_empty());
        assert!(changes.deleted.is_empty());
    }

    #[test]
    fn added_and_deleted_files_are_classified() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "a.rs", "fn a() {}");
        let before = build(dir.path(), ".repolens").unwrap().snapshot.unwrap();

        fs::remove_file(dir.path().join("a.rs")).unwrap();
        write_file(dir.path(), "c.rs", "fn c() {}");
        let after = build(dir.path(), ".repolens").unwrap().snapshot.unwrap();

        let changes = diff(&before, &after);
        assert_eq!(changes.added, vec!["c.rs".to_string()]);
        assert_eq!(changes.deleted, vec!["a.rs".to_string()]);
    }

    #[test]
    fn added_directory_contributes_every_file_underneath() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "a.rs", "fn a() {}");
        let before = build(dir.path(), ".repolens").unwrap().snapshot.unwrap();

        write_file(dir.path(), "pkg/x.rs", "fn x() {}");
        write_file(dir.path(), "pkg/y.rs", "fn y() {}");
        let after = build(dir.path(), ".repolens").unwrap().snapshot.unwrap();

        let mut changes = diff(&before, &after);
        changes.added.sort();
        assert_eq!(changes.added, vec!["pkg/x.rs".to_string(), "pkg/y.rs".to_string()]);
    }

    #[test]
    fn tool_data_directory_is_skipped() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "a.rs", "fn a() {}");
        write_file(dir.path(), ".repolens/index.db", "binary");
        let snap = build(dir.path(), ".repolens").unwrap().snapshot.unwrap();
        let mut files = Vec::new();
        collect_all(&snap.root, &mut files);
        assert_eq!(files, vec!["a.rs".to_string()]);
    }

    #[test]
    fn load_discards_corrupt_snapshot() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("merkle.bin");
        fs::write(&path, b"not json").unwrap();
        assert!(load(&path).unwrap().is_none());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        write_file(dir.path(), "a.rs", "fn a() {}");
        let snap = build(dir.path(), ".repolens").unwrap().snapshot.unwrap();
        let path = dir.path().join("merkle.bin");
        save(&snap, &path).unwrap();
        let loaded = load(&path).unwrap().unwrap();
        assert_eq!(loaded, snap);
    }
}
