//! Core data model: snapshots, chunks, embeddings, locations, symbols and
//! the shapes that flow through rank fusion.

use std::path::Path;

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

/// Detect a language identifier from a file extension. Returns `None` for
/// extensions the chunker has no AST strategy for; callers fall back to the
/// sliding-window chunker in that case.
pub fn detect_language(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?;
    Some(match ext {
        "rs" => "rust",
        "go" => "go",
        "py" => "python",
        "java" => "java",
        "ts" | "tsx" => "typescript",
        "js" | "jsx" => "javascript",
        _ => return None,
    })
}

/// One of the node kinds a structural chunk can carry. `File` marks a
/// preamble chunk (module-level statements outside any definition).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Function,
    Method,
    Class,
    Struct,
    Interface,
    Trait,
    Enum,
    Module,
    Block,
    File,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Class => "class",
            Self::Struct => "struct",
            Self::Interface => "interface",
            Self::Trait => "trait",
            Self::Enum => "enum",
            Self::Module => "module",
            Self::Block => "block",
            Self::File => "file",
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `{path, start_line, end_line, content, node_type, node_name, language}`.
/// `start_line`/`end_line` are 1-indexed inclusive; `content` is exactly the
/// concatenation of those lines of the source file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub content: String,
    pub node_type: NodeType,
    pub node_name: Option<String>,
    pub language: String,
}

impl Chunk {
    /// 32-byte digest of `content`, hex-encoded. Identical content hashes
    /// identically irrespective of path, repo, or time.
    pub fn hash(&self) -> String {
        chunk_hash(&self.content)
    }
}

/// SHA-256 digest of chunk content, hex-encoded (64 chars / 32 bytes). The
/// primary key for cached embeddings.
pub fn chunk_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    hex::encode(digest)
}

/// `{chunk_hash, model_id, dimensions, vector}`. Uniqueness key is
/// `(chunk_hash, model_id)`; two rows with the same key must be
/// byte-identical.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub chunk_hash: String,
    pub model_id: String,
    pub dimensions: usize,
    pub vector: Vec<f32>,
}

/// `{repo_root, path, start_line, end_line, chunk_hash, node_type,
/// node_name, language, indexed_at}`. Uniqueness key is `(repo_root, path,
/// start_line, end_line)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub repo_root: String,
    pub path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub chunk_hash: String,
    pub node_type: NodeType,
    pub node_name: Option<String>,
    pub language: String,
    pub indexed_at: i64,
}

/// `{repo_root, path, line, name, kind, language, scope, signature}`.
/// Uniqueness key is `(repo_root, name, path, line)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Symbol {
    pub repo_root: String,
    pub path: String,
    pub line: u32,
    pub name: String,
    pub kind: String,
    pub language: String,
    pub scope: Option<String>,
    pub signature: Option<String>,
}

/// `{repo_root, model_id, dimensions, updated_at}` — the embedding model
/// currently active for a repo. A repo has at most one at a time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoConfig {
    pub repo_root: String,
    pub model_id: String,
    pub dimensions: usize,
    pub updated_at: i64,
}

/// `{repo_root, path, mtime, size, indexed_at}` — a fast pre-filter before
/// hashing file contents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileState {
    pub repo_root: String,
    pub path: String,
    pub mtime: i64,
    pub size: u64,
    pub indexed_at: i64,
}

/// Distance metric a vector index was built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    L2,
    Dot,
}

/// The stream a fused result originated from. Used both as the `source`
/// tag on a [`StreamResult`] and as the key into the fusion layer's
/// per-source weight map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSource {
    Lexical,
    Semantic,
    Symbolic,
    Recent,
}

impl std::fmt::Display for ResultSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Lexical => "lexical",
            Self::Semantic => "semantic",
            Self::Symbolic => "symbolic",
            Self::Recent => "recent",
        };
        f.write_str(s)
    }
}

/// One element of an ordered result stream handed to rank fusion.
/// `id` is stable across streams for the same chunk/location so that
/// fusion can recognize the same candidate appearing in more than one
/// stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamResult {
    pub id: String,
    pub path: String,
    pub line: u32,
    pub end_line: u32,
    pub score: f32,
    pub source: ResultSource,
    pub snippet: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// A result after fusion, carrying the combined RRF score and the set of
/// sources that contributed to it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusedResult {
    pub id: String,
    pub path: String,
    pub line: u32,
    pub end_line: u32,
    pub score: f32,
    pub sources: Vec<ResultSource>,
    pub snippet: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn detect_language_known_extensions() {
        assert_eq!(detect_language(&PathBuf::from("a.rs")), Some("rust"));
        assert_eq!(detect_language(&PathBuf::from("a.go")), Some("go"));
        assert_eq!(detect_language(&PathBuf::from("a.py")), Some("python"));
        assert_eq!(detect_language(&PathBuf::from("a.tsx")), Some("typescript"));
    }

    #[test]
    fn detect_language_unknown_extension_falls_back() {
        assert_eq!(detect_language(&PathBuf::from("a.zig")), None);
        assert_eq!(detect_language(&PathBuf::from("no_ext")), None);
    }

    #[test]
    fn chunk_hash_is_content_addressed() {
        let a = chunk_hash("fn main() {}");
        let b = chunk_hash("fn main() {}");
        let c = chunk_hash("fn main() { }");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn chunk_hash_ignores_path_and_repo() {
        let chunk_one = Chunk {
            path: "a.rs".into(),
            start_line: 1,
            end_line: 1,
            content: "fn f() {}".into(),
            node_type: NodeType::Function,
            node_name: Some("f".into()),
            language: "rust".into(),
        };
        let chunk_two = Chunk {
            path: "b.rs".into(),
            ..chunk_one.clone()
        };
        assert_eq!(chunk_one.hash(), chunk_two.hash());
    }
}
