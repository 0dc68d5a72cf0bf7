//! Structural chunker: AST strategy where the language is supported,
//! sliding-window fallback otherwise. Configuration is enumerated by
//! [`ChunkingConfig`].

pub mod ast;
pub mod fallback;
pub mod languages;

use std::collections::BTreeSet;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;

use crate::error::Result;
use crate::types::Chunk;
use crate::types::detect_language;
use languages::SupportedLanguage;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub max_chunk_lines: usize,
    pub overlap_lines: usize,
    pub min_chunk_lines: usize,
    pub prefer_ast: bool,
    pub languages_enabled: BTreeSet<String>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_lines: 120,
            overlap_lines: 8,
            min_chunk_lines: 1,
            prefer_ast: true,
            languages_enabled: ["rust", "go", "python", "java", "typescript"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_chunk_lines == 0 {
            return Err(crate::error::RepolensError::ConfigError {
                field: "max_chunk_lines".into(),
                cause: "must be positive".into(),
            });
        }
        if self.overlap_lines >= self.max_chunk_lines {
            return Err(crate::error::RepolensError::ConfigError {
                field: "overlap_lines".into(),
                cause: "must be smaller than max_chunk_lines".into(),
            });
        }
        Ok(())
    }

    fn window_config(&self) -> fallback::WindowConfig {
        fallback::WindowConfig {
            target_lines: 40,
            overlap_lines: self.overlap_lines,
            max_lines: self.max_chunk_lines,
        }
    }
}

/// Detects the language from `path`'s extension and emits chunks for
/// `source`. Falls back to the sliding-window strategy when the language
/// is unsupported, not enabled in config, or the AST parse fails.
pub fn chunk(path: &Path, source: &str, config: &ChunkingConfig) -> Result<Vec<Chunk>> {
    let path_str = path.to_string_lossy();
    let language = detect_language(path).unwrap_or("text");

    if config.prefer_ast && config.languages_enabled.contains(language) {
        if let Some(supported) = SupportedLanguage::from_name(language) {
            match ast::chunk_ast(&path_str, source, supported) {
                Ok(chunks) if !chunks.is_empty() || source.trim().is_empty() => return Ok(chunks),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(path = %path_str, error = %e, "AST chunking failed, using sliding window");
                }
            }
        }
    }

    Ok(fallback::chunk_sliding_window(
        &path_str,
        source,
        language,
        config.window_config(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_language_uses_fallback() {
        let config = ChunkingConfig::default();
        let chunks = chunk(Path::new("a.zig"), "const x = 1;\n", &config).unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn disabled_language_uses_fallback() {
        let mut config = ChunkingConfig::default();
        config.languages_enabled.remove("rust");
        let chunks = chunk(Path::new("a.rs"), "fn a() {}\n", &config).unwrap();
        assert_eq!(chunks[0].language, "rust");
    }

    #[test]
    fn validate_rejects_zero_max_lines() {
        let mut config = ChunkingConfig::default();
        config.max_chunk_lines = 0;
        assert!(config.validate().is_err());
    }
}
