//! AST chunking strategy: one chunk per top-level definition, plus a single
//! "preamble" chunk for module-level code outside any definition.

use tree_sitter::Node;
use tree_sitter::Parser;

use crate::chunking::languages::SupportedLanguage;
use crate::error::RepolensError;
use crate::error::Result;
use crate::types::Chunk;
use crate::types::NodeType;

/// Parses `source` with `lang`'s grammar and emits one chunk per top-level
/// definition plus a preamble chunk for the rest. Chunks are returned in
/// ascending `start_line`.
pub fn chunk_ast(path: &str, source: &str, lang: SupportedLanguage) -> Result<Vec<Chunk>> {
    let mut parser = Parser::new();
    parser
        .set_language(&lang.grammar())
        .map_err(|e| RepolensError::internal(format!("tree-sitter grammar load: {e}")))?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| RepolensError::ChunkingFailed {
            path: path.into(),
            cause: "parser produced no tree".into(),
        })?;

    let lines: Vec<&str> = source.lines().collect();
    let definition_kinds = lang.definition_kinds();
    let root = tree.root_node();

    let mut chunks = Vec::new();
    let mut preamble_lines: Vec<bool> = vec![true; lines.len()];

    let mut cursor = root.walk();
    for child in root.children(&mut cursor) {
        if let Some((_, node_type)) = definition_kinds.iter().find(|(kind, _)| *kind == child.kind()) {
            let start_line = child.start_position().row as u32 + 1;
            let end_line = child.end_position().row as u32 + 1;
            for l in start_line..=end_line {
                if let Some(flag) = preamble_lines.get_mut((l - 1) as usize) {
                    *flag = false;
                }
            }
            let content = slice_lines(&lines, start_line, end_line);
            let node_name = find_name(&child, lang, source);
            chunks.push(Chunk {
                path: path.to_string(),
                start_line,
                end_line,
                content,
                node_type: *node_type,
                node_name,
                language: language_name(lang).to_string(),
            });
        }
    }

    chunks.sort_by_key(|c| c.start_line);

    if let Some(preamble) = build_preamble(path, &lines, &preamble_lines, lang) {
        chunks.push(preamble);
        chunks.sort_by_key(|c| c.start_line);
    }

    Ok(chunks)
}

fn slice_lines(lines: &[&str], start_line: u32, end_line: u32) -> String {
    lines[(start_line - 1) as usize..end_line as usize].join("\n")
}

fn find_name(node: &Node, lang: SupportedLanguage, source: &str) -> Option<String> {
    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if lang.identifier_kinds().contains(&child.kind()) {
            return child.utf8_text(source.as_bytes()).ok().map(str::to_string);
        }
    }
    None
}

/// Builds the single `node_type = file` chunk covering every line not
/// claimed by a definition, if there are any such lines.
fn build_preamble(
    path: &str,
    lines: &[&str],
    preamble_lines: &[bool],
    lang: SupportedLanguage,
) -> Option<Chunk> {
    let mut ranges = Vec::new();
    let mut start: Option<usize> = None;
    for (i, is_preamble) in preamble_lines.iter().enumerate() {
        match (is_preamble, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                ranges.push((s, i - 1));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        ranges.push((s, lines.len().saturating_sub(1)));
    }

    let content_lines: Vec<&str> = ranges
        .iter()
        .flat_map(|(s, e)| lines[*s..=*e].iter().copied())
        .collect();
    if content_lines.iter().all(|l| l.trim().is_empty()) || content_lines.is_empty() {
        return None;
    }

    let start_line = ranges.first()?.0 as u32 + 1;
    let end_line = ranges.last()?.1 as u32 + 1;
    Some(Chunk {
        path: path.to_string(),
        start_line,
        end_line,
        content: content_lines.join("\n"),
        node_type: NodeType::File,
        node_name: None,
        language: language_name(lang).to_string(),
    })
}

fn language_name(lang: SupportedLanguage) -> &'static str {
    match lang {
        SupportedLanguage::Rust => "rust",
        SupportedLanguage::Go => "go",
        SupportedLanguage::Python => "python",
        SupportedLanguage::Java => "java",
        SupportedLanguage::TypeScript => "typescript",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_function_go() {
        let src = "package main\n\nfunc Greet(name string) string {\n\treturn \"hi \" + name\n}\n";
        let chunks = chunk_ast("a.go", src, SupportedLanguage::Go).unwrap();
        let def = chunks
            .iter()
            .find(|c| c.node_type == NodeType::Function)
            .expect("function chunk");
        assert_eq!(def.node_name.as_deref(), Some("Greet"));
        assert_eq!(def.start_line, 3);
        assert_eq!(def.end_line, 5);
    }

    #[test]
    fn preamble_covers_imports() {
        let src = "package main\n\nimport \"fmt\"\n\nfunc F() {}\n";
        let chunks = chunk_ast("a.go", src, SupportedLanguage::Go).unwrap();
        assert!(chunks.iter().any(|c| c.node_type == NodeType::File));
    }

    #[test]
    fn chunks_sorted_ascending() {
        let src = "fn a() {}\n\nfn b() {}\n";
        let chunks = chunk_ast("a.rs", src, SupportedLanguage::Rust).unwrap();
        let starts: Vec<u32> = chunks.iter().map(|c| c.start_line).collect();
        let mut sorted = starts.clone();
        sorted.sort();
        assert_eq!(starts, sorted);
    }

    #[test]
    fn determinism_same_bytes_same_hashes() {
        let src = "fn a() { 1 + 1; }\n";
        let one = chunk_ast("a.rs", src, SupportedLanguage::Rust).unwrap();
        let two = chunk_ast("a.rs", src, SupportedLanguage::Rust).unwrap();
        let hashes_one: Vec<String> = one.iter().map(|c| c.hash()).collect();
        let hashes_two: Vec<String> = two.iter().map(|c| c.hash()).collect();
        assert_eq!(hashes_one, hashes_two);
    }
}
