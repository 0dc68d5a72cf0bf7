//! Per-language grammar registry and definition-node tables for the AST
//! chunking strategy.

use tree_sitter::Language;

use crate::types::NodeType;

/// A language the AST strategy can parse. Anything else falls back to the
/// sliding-window chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupportedLanguage {
    Rust,
    Go,
    Python,
    Java,
    TypeScript,
}

impl SupportedLanguage {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "rust" => Self::Rust,
            "go" => Self::Go,
            "python" => Self::Python,
            "java" => Self::Java,
            "typescript" => Self::TypeScript,
            _ => return None,
        })
    }

    pub fn grammar(&self) -> Language {
        match self {
            Self::Rust => tree_sitter_rust::LANGUAGE.into(),
            Self::Go => tree_sitter_go::LANGUAGE.into(),
            Self::Python => tree_sitter_python::LANGUAGE.into(),
            Self::Java => tree_sitter_java::LANGUAGE.into(),
            Self::TypeScript => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
        }
    }

    /// Maps a grammar's top-level definition node kinds to the spec's
    /// [`NodeType`] taxonomy. Node kinds not present here are treated as
    /// preamble content.
    pub fn definition_kinds(&self) -> &'static [(&'static str, NodeType)] {
        match self {
            Self::Rust => &[
                ("function_item", NodeType::Function),
                ("struct_item", NodeType::Struct),
                ("enum_item", NodeType::Enum),
                ("trait_item", NodeType::Trait),
                ("impl_item", NodeType::Class),
                ("mod_item", NodeType::Module),
            ],
            Self::Go => &[
                ("function_declaration", NodeType::Function),
                ("method_declaration", NodeType::Method),
                ("type_declaration", NodeType::Struct),
            ],
            Self::Python => &[
                ("function_definition", NodeType::Function),
                ("class_definition", NodeType::Class),
            ],
            Self::Java => &[
                ("class_declaration", NodeType::Class),
                ("interface_declaration", NodeType::Interface),
                ("enum_declaration", NodeType::Enum),
                ("method_declaration", NodeType::Method),
            ],
            Self::TypeScript => &[
                ("function_declaration", NodeType::Function),
                ("class_declaration", NodeType::Class),
                ("interface_declaration", NodeType::Interface),
                ("method_definition", NodeType::Method),
            ],
        }
    }

    /// Node kinds searched (non-recursively into nested definitions) for a
    /// definition's name.
    pub fn identifier_kinds(&self) -> &'static [&'static str] {
        &["identifier", "type_identifier", "field_identifier", "name"]
    }
}
