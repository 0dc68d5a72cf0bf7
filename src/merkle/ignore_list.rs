//! Ignore-pattern handling for the Merkle snapshot: a fixed skip-list of
//! version-control/dependency/build directories plus `.gitignore`-style
//! patterns loaded from the repo root and an optional global ignore file.

use std::path::Path;

use ignore::gitignore::Gitignore;
use ignore::gitignore::GitignoreBuilder;

use crate::error::Result;

const FIXED_SKIP_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "target",
    "dist",
    "build",
    ".venv",
    "__pycache__",
    ".cargo",
];

/// Binary/media extensions that are skipped by extension whitelist rather
/// than hashed: they carry no structural content worth indexing and hashing
/// them is wasted I/O.
const SKIP_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "svg", "pdf", "zip", "tar", "gz", "bz2", "xz",
    "so", "dylib", "dll", "exe", "bin", "woff", "woff2", "ttf", "eot", "mp3", "mp4", "mov", "avi",
];

pub struct IgnoreSet {
    tool_dir_name: String,
    patterns: Gitignore,
}

impl IgnoreSet {
    pub fn load(repo_root: &Path, tool_dir_name: &str) -> Result<Self> {
        let mut builder = GitignoreBuilder::new(repo_root);
        let gitignore_path = repo_root.join(".gitignore");
        if gitignore_path.exists() {
            if let Some(err) = builder.add(&gitignore_path) {
                tracing::warn!(path = ?gitignore_path, error = %err, "failed to parse .gitignore");
            }
        }
        if let Some(global) = dirs::home_dir().map(|h| h.join(".config/repolens/ignore")) {
            if global.exists() {
                if let Some(err) = builder.add(&global) {
                    tracing::warn!(path = ?global, error = %err, "failed to parse global ignore file");
                }
            }
        }
        let patterns = builder
            .build()
            .map_err(|e| crate::error::RepolensError::internal(format!("ignore build: {e}")))?;
        Ok(Self {
            tool_dir_name: tool_dir_name.to_string(),
            patterns,
        })
    }

    pub fn is_ignored(&self, rel_path: &str, is_dir: bool) -> bool {
        let top_level = rel_path.split('/').next().unwrap_or(rel_path);
        if top_level == self.tool_dir_name || FIXED_SKIP_DIRS.contains(&top_level) {
            return true;
        }
        if !is_dir {
            if let Some(ext) = Path::new(rel_path).extension().and_then(|e| e.to_str()) {
                if SKIP_EXTENSIONS.contains(&ext) {
                    return true;
                }
            }
        }
        self.patterns
            .matched(rel_path, is_dir)
            .is_ignore()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn fixed_skip_dirs_are_ignored() {
        let dir = tempdir().unwrap();
        let set = IgnoreSet::load(dir.path(), ".repolens").unwrap();
        assert!(set.is_ignored("target", true));
        assert!(set.is_ignored("node_modules", true));
        assert!(set.is_ignored(".repolens", true));
    }

    #[test]
    fn skip_extensions_are_ignored() {
        let dir = tempdir().unwrap();
        let set = IgnoreSet::load(dir.path(), ".repolens").unwrap();
        assert!(set.is_ignored("assets/logo.png", false));
        assert!(!set.is_ignored("src/main.rs", false));
    }

    #[test]
    fn gitignore_patterns_are_respected() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(".gitignore"), "*.generated.rs\n").unwrap();
        let set = IgnoreSet::load(dir.path(), ".repolens").unwrap();
        assert!(set.is_ignored("foo.generated.rs", false));
        assert!(!set.is_ignored("foo.rs", false));
    }
}
