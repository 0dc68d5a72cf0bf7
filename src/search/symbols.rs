//! Default [`SymbolExtractor`] adapter: `tree-sitter-tags` over the
//! languages the chunker also knows, producing `{name, kind, path, line}`
//! records for structural lookup.

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use tree_sitter_tags::TagsConfiguration;
use tree_sitter_tags::TagsContext;

use crate::error::Result;
use crate::traits::SymbolExtractor;
use crate::traits::SymbolRecord;
use crate::types::detect_language;

const RUST_TAGS_QUERY: &str = r#"
(function_item name: (identifier) @name) @definition.function
(struct_item name: (type_identifier) @name) @definition.struct
(enum_item name: (type_identifier) @name) @definition.enum
(trait_item name: (type_identifier) @name) @definition.interface
(mod_item name: (identifier) @name) @definition.module
(impl_item type: (type_identifier) @name) @definition.class
"#;

const GO_TAGS_QUERY: &str = r#"
(function_declaration name: (identifier) @name) @definition.function
(method_declaration name: (field_identifier) @name) @definition.method
(type_spec name: (type_identifier) @name) @definition.struct
"#;

const PYTHON_TAGS_QUERY: &str = r#"
(function_definition name: (identifier) @name) @definition.function
(class_definition name: (identifier) @name) @definition.class
"#;

const JAVA_TAGS_QUERY: &str = r#"
(class_declaration name: (identifier) @name) @definition.class
(interface_declaration name: (identifier) @name) @definition.interface
(enum_declaration name: (identifier) @name) @definition.enum
(method_declaration name: (identifier) @name) @definition.method
"#;

const TYPESCRIPT_TAGS_QUERY: &str = r#"
(function_declaration name: (identifier) @name) @definition.function
(class_declaration name: (type_identifier) @name) @definition.class
(interface_declaration name: (type_identifier) @name) @definition.interface
(method_definition name: (property_identifier) @name) @definition.method
"#;

fn tags_configuration(language: &str) -> Option<TagsConfiguration> {
    let (grammar, query) = match language {
        "rust" => (tree_sitter_rust::LANGUAGE.into(), RUST_TAGS_QUERY),
        "go" => (tree_sitter_go::LANGUAGE.into(), GO_TAGS_QUERY),
        "python" => (tree_sitter_python::LANGUAGE.into(), PYTHON_TAGS_QUERY),
        "java" => (tree_sitter_java::LANGUAGE.into(), JAVA_TAGS_QUERY),
        "typescript" => (
            tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
            TYPESCRIPT_TAGS_QUERY,
        ),
        _ => return None,
    };
    TagsConfiguration::new(grammar, query, "").ok()
}

/// Extracts symbols file-by-file with a fresh [`TagsContext`] per call;
/// `tree-sitter-tags` contexts are not `Send`, so this never holds one
/// across an `.await`.
pub struct TagSymbolExtractor;

impl TagSymbolExtractor {
    pub fn new() -> Self {
        Self
    }

    fn extract_file(&self, path: &str, source: &str) -> Vec<SymbolRecord> {
        let Some(language) = detect_language(Path::new(path)) else {
            return Vec::new();
        };
        let Some(config) = tags_configuration(language) else {
            return Vec::new();
        };
        let mut context = TagsContext::new();
        let Ok((tags, _)) = context.generate_tags(&config, source.as_bytes(), None) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        for tag in tags.flatten() {
            let kind = config.syntax_type_name(tag.syntax_type_id).to_string();
            let name = String::from_utf8_lossy(&source.as_bytes()[tag.name_range.clone()]).into_owned();
            out.push(SymbolRecord {
                name,
                kind,
                path: path.to_string(),
                line: tag.span.start.row as u32 + 1,
                scope: None,
                signature: tag.docs.clone(),
            });
        }
        out
    }
}

impl Default for TagSymbolExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SymbolExtractor for TagSymbolExtractor {
    async fn extract(&self, repo_root: &str, files: &[String]) -> Result<Vec<SymbolRecord>> {
        let repo_root = Path::new(repo_root);
        let mut out = Vec::new();
        for rel_path in files {
            let full = repo_root.join(rel_path);
            let Ok(source) = std::fs::read_to_string(&full) else {
                continue;
            };
            out.extend(self.extract_file(rel_path, &source));
        }
        Ok(out)
    }

    fn available(&self) -> bool {
        true
    }
}

/// Groups extracted symbols by `path`, mirroring the shape `list_defs_in_file`
/// needs without a second extraction pass.
pub fn group_by_path(symbols: Vec<SymbolRecord>) -> HashMap<String, Vec<SymbolRecord>> {
    let mut out: HashMap<String, Vec<SymbolRecord>> = HashMap::new();
    for symbol in symbols {
        out.entry(symbol.path.clone()).or_default().push(symbol);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn extracts_rust_function_definitions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.rs"), "fn greet(name: &str) -> String {\n    format!(\"hi {name}\")\n}\n").unwrap();
        let extractor = TagSymbolExtractor::new();
        let symbols = extractor
            .extract(dir.path().to_str().unwrap(), &["a.rs".to_string()])
            .await
            .unwrap();
        assert!(symbols.iter().any(|s| s.name == "greet"));
    }

    #[tokio::test]
    async fn unreadable_file_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let extractor = TagSymbolExtractor::new();
        let symbols = extractor
            .extract(dir.path().to_str().unwrap(), &["missing.rs".to_string()])
            .await
            .unwrap();
        assert!(symbols.is_empty());
    }
}
