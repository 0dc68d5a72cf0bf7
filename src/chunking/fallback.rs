//! Sliding-window fallback chunker for unsupported languages or parse
//! failures: overlapping windows of non-blank lines, never splitting a
//! line in two.

use crate::types::Chunk;
use crate::types::NodeType;

#[derive(Debug, Clone, Copy)]
pub struct WindowConfig {
    pub target_lines: usize,
    pub overlap_lines: usize,
    pub max_lines: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            target_lines: 40,
            overlap_lines: 8,
            max_lines: 120,
        }
    }
}

/// Splits `source` into overlapping windows of `target_lines` non-blank
/// lines (capped at `max_lines` total lines per window, including blanks),
/// advancing by `target_lines - overlap_lines` non-blank lines between
/// windows. Every byte of the file is covered by at least one chunk.
pub fn chunk_sliding_window(
    path: &str,
    source: &str,
    language: &str,
    config: WindowConfig,
) -> Vec<Chunk> {
    let lines: Vec<&str> = source.lines().collect();
    if lines.is_empty() {
        return Vec::new();
    }

    let non_blank_idx: Vec<usize> = (0..lines.len())
        .filter(|&i| !lines[i].trim().is_empty())
        .collect();

    if non_blank_idx.is_empty() {
        // A file with only blank lines still must be covered.
        return vec![whole_file_chunk(path, &lines, language)];
    }

    let advance = config.target_lines.saturating_sub(config.overlap_lines).max(1);
    let mut chunks = Vec::new();
    let mut cursor = 0usize;

    while cursor < non_blank_idx.len() {
        let window_non_blank_end = (cursor + config.target_lines).min(non_blank_idx.len());
        let start_line_idx = non_blank_idx[cursor];
        let end_line_idx = non_blank_idx[window_non_blank_end - 1];
        let capped_end_idx = end_line_idx.min(start_line_idx + config.max_lines - 1);

        chunks.push(Chunk {
            path: path.to_string(),
            start_line: start_line_idx as u32 + 1,
            end_line: capped_end_idx as u32 + 1,
            content: lines[start_line_idx..=capped_end_idx].join("\n"),
            node_type: NodeType::Block,
            node_name: None,
            language: language.to_string(),
        });

        if window_non_blank_end >= non_blank_idx.len() {
            break;
        }
        cursor += advance;
    }

    chunks
}

fn whole_file_chunk(path: &str, lines: &[&str], language: &str) -> Chunk {
    Chunk {
        path: path.to_string(),
        start_line: 1,
        end_line: lines.len() as u32,
        content: lines.join("\n"),
        node_type: NodeType::File,
        node_name: None,
        language: language.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines_of(n: usize, prefix: &str) -> String {
        (0..n).map(|i| format!("{prefix}{i}")).collect::<Vec<_>>().join("\n")
    }

    #[test]
    fn covers_every_line() {
        let source = lines_of(100, "line");
        let chunks = chunk_sliding_window("a.txt", &source, "text", WindowConfig::default());
        let max_end = chunks.iter().map(|c| c.end_line).max().unwrap();
        assert_eq!(max_end, 100);
        assert_eq!(chunks.first().unwrap().start_line, 1);
    }

    #[test]
    fn windows_overlap() {
        let source = lines_of(100, "line");
        let chunks = chunk_sliding_window("a.txt", &source, "text", WindowConfig::default());
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            assert!(pair[1].start_line <= pair[0].end_line);
        }
    }

    #[test]
    fn never_exceeds_max_lines() {
        let source = lines_of(500, "line");
        let chunks = chunk_sliding_window("a.txt", &source, "text", WindowConfig::default());
        for chunk in &chunks {
            assert!(chunk.end_line - chunk.start_line + 1 <= 120);
        }
    }

    #[test]
    fn determinism() {
        let source = lines_of(50, "line");
        let one = chunk_sliding_window("a.txt", &source, "text", WindowConfig::default());
        let two = chunk_sliding_window("a.txt", &source, "text", WindowConfig::default());
        let hashes_one: Vec<String> = one.iter().map(|c| c.hash()).collect();
        let hashes_two: Vec<String> = two.iter().map(|c| c.hash()).collect();
        assert_eq!(hashes_one, hashes_two);
    }

    #[test]
    fn small_file_single_chunk() {
        let source = "a\nb\nc\n";
        let chunks = chunk_sliding_window("a.txt", source, "text", WindowConfig::default());
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].start_line, 1);
        assert_eq!(chunks[0].end_line, 3);
    }
}
