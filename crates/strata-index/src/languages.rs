//! Language detection and tree-sitter structure extraction.
//!
//! The semantic chunker needs to know where functions and types start and end;
//! this module parses source files with the matching grammar and reports those
//! spans as [`CodeStructure`].

use std::path::Path;

use serde::{Deserialize, Serialize};
use tree_sitter::{Node, Parser};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Lang {
    Rust,
    Python,
    JavaScript,
    TypeScript,
    Go,
}

impl Lang {
    #[must_use]
    pub fn id(self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Go => "go",
        }
    }

    /// Get the tree-sitter grammar. Returns `None` if the
    /// corresponding feature is not enabled.
    #[must_use]
    pub fn grammar(self) -> Option<tree_sitter::Language> {
        match self {
            #[cfg(feature = "lang-rust")]
            Self::Rust => Some(tree_sitter_rust::LANGUAGE.into()),
            #[cfg(feature = "lang-python")]
            Self::Python => Some(tree_sitter_python::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::JavaScript => Some(tree_sitter_javascript::LANGUAGE.into()),
            #[cfg(feature = "lang-js")]
            Self::TypeScript => Some(tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into()),
            #[cfg(feature = "lang-go")]
            Self::Go => Some(tree_sitter_go::LANGUAGE.into()),
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    fn function_kinds(self) -> &'static [&'static str] {
        match self {
            Self::Rust => &["function_item", "function_signature_item"],
            Self::Python => &["function_definition"],
            Self::JavaScript | Self::TypeScript => &[
                "function_declaration",
                "generator_function_declaration",
                "method_definition",
            ],
            Self::Go => &["function_declaration", "method_declaration"],
        }
    }

    fn type_kinds(self) -> &'static [&'static str] {
        match self {
            Self::Rust => &[
                "struct_item",
                "enum_item",
                "union_item",
                "trait_item",
                "impl_item",
                "type_item",
            ],
            Self::Python => &["class_definition"],
            Self::JavaScript => &["class_declaration"],
            Self::TypeScript => &[
                "class_declaration",
                "interface_declaration",
                "type_alias_declaration",
                "enum_declaration",
            ],
            Self::Go => &["type_spec"],
        }
    }
}

impl std::fmt::Display for Lang {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Detect language from file extension.
#[must_use]
pub fn detect_language(path: &Path) -> Option<Lang> {
    let ext = path.extension()?.to_str()?;
    match ext {
        "rs" => Some(Lang::Rust),
        "py" | "pyi" => Some(Lang::Python),
        "js" | "jsx" | "mjs" | "cjs" => Some(Lang::JavaScript),
        "ts" | "tsx" | "mts" | "cts" => Some(Lang::TypeScript),
        "go" => Some(Lang::Go),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitKind {
    Function,
    Type,
}

/// A named declaration spanning `start_line..=end_line` (1-based).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeUnit {
    pub name: String,
    pub kind: UnitKind,
    pub start_line: usize,
    pub end_line: usize,
}

impl CodeUnit {
    #[must_use]
    pub fn new(name: impl Into<String>, kind: UnitKind, start_line: usize, end_line: usize) -> Self {
        Self {
            name: name.into(),
            kind,
            start_line,
            end_line,
        }
    }

    #[must_use]
    pub fn covers(&self, line: usize) -> bool {
        (self.start_line..=self.end_line).contains(&line)
    }
}

/// Functions and types found in one source file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeStructure {
    pub units: Vec<CodeUnit>,
}

impl CodeStructure {
    #[must_use]
    pub fn new(units: Vec<CodeUnit>) -> Self {
        Self { units }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    /// Innermost unit covering `line`.
    #[must_use]
    pub fn unit_at(&self, line: usize) -> Option<&CodeUnit> {
        self.units
            .iter()
            .filter(|u| u.covers(line))
            .min_by_key(|u| u.end_line - u.start_line)
    }

    #[must_use]
    pub fn starts_unit(&self, line: usize) -> bool {
        self.units.iter().any(|u| u.start_line == line)
    }

    /// Parse `content` with the grammar matching `path`'s extension.
    ///
    /// Returns `None` for unsupported languages, disabled grammars, parse
    /// failures, and files without any declarations.
    #[must_use]
    pub fn parse(path: &Path, content: &str) -> Option<Self> {
        let lang = detect_language(path)?;
        let grammar = lang.grammar()?;
        let mut parser = Parser::new();
        if let Err(e) = parser.set_language(&grammar) {
            tracing::debug!(lang = %lang, "set_language failed: {e}");
            return None;
        }
        let tree = parser.parse(content, None)?;

        let mut units = Vec::new();
        collect_units(lang, &tree.root_node(), content, &mut units);
        if units.is_empty() {
            return None;
        }
        units.sort_by_key(|u| (u.start_line, std::cmp::Reverse(u.end_line)));
        Some(Self { units })
    }
}

fn collect_units(lang: Lang, node: &Node, source: &str, out: &mut Vec<CodeUnit>) {
    let kind = node.kind();
    let unit_kind = if lang.function_kinds().contains(&kind) {
        Some(UnitKind::Function)
    } else if lang.type_kinds().contains(&kind) {
        Some(UnitKind::Type)
    } else {
        None
    };

    if let Some(unit_kind) = unit_kind
        && let Some(name) = entity_name(node, source)
    {
        out.push(CodeUnit {
            name,
            kind: unit_kind,
            start_line: node.start_position().row + 1,
            end_line: node.end_position().row + 1,
        });
    }

    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        collect_units(lang, &child, source, out);
    }
}

fn entity_name(node: &Node, source: &str) -> Option<String> {
    // tree-sitter-rust: impl_item uses "type" field, most others use "name"
    node.child_by_field_name("name")
        .or_else(|| node.child_by_field_name("type"))
        .and_then(|n| source.get(n.byte_range()))
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detect_known_extensions() {
        assert_eq!(detect_language(Path::new("main.rs")), Some(Lang::Rust));
        assert_eq!(detect_language(Path::new("app.py")), Some(Lang::Python));
        assert_eq!(detect_language(Path::new("index.mjs")), Some(Lang::JavaScript));
        assert_eq!(detect_language(Path::new("types.ts")), Some(Lang::TypeScript));
        assert_eq!(detect_language(Path::new("main.go")), Some(Lang::Go));
        assert_eq!(detect_language(Path::new("README.md")), None);
        assert_eq!(detect_language(Path::new("Makefile")), None);
    }

    #[test]
    fn unit_at_prefers_innermost() {
        let s = CodeStructure::new(vec![
            CodeUnit::new("Outer", UnitKind::Type, 1, 20),
            CodeUnit::new("inner", UnitKind::Function, 5, 8),
        ]);
        assert_eq!(s.unit_at(6).map(|u| u.name.as_str()), Some("inner"));
        assert_eq!(s.unit_at(2).map(|u| u.name.as_str()), Some("Outer"));
        assert!(s.unit_at(21).is_none());
        assert!(s.starts_unit(5));
        assert!(!s.starts_unit(6));
    }

    #[test]
    fn unsupported_language_yields_none() {
        assert!(CodeStructure::parse(Path::new("notes.txt"), "fn main() {}").is_none());
    }

    #[cfg(feature = "lang-rust")]
    #[test]
    fn parse_rust_functions_and_types() {
        let src = "struct Point {\n    x: i32,\n}\n\nimpl Point {\n    fn norm(&self) -> i32 {\n        self.x\n    }\n}\n\nfn main() {}\n";
        let s = CodeStructure::parse(Path::new("lib.rs"), src).unwrap();
        let names: Vec<&str> = s.units.iter().map(|u| u.name.as_str()).collect();
        assert!(names.contains(&"Point"));
        assert!(names.contains(&"norm"));
        assert!(names.contains(&"main"));
        let norm = s.units.iter().find(|u| u.name == "norm").unwrap();
        assert_eq!(norm.kind, UnitKind::Function);
        assert_eq!((norm.start_line, norm.end_line), (6, 8));
    }

    #[cfg(feature = "lang-python")]
    #[test]
    fn parse_python_class_and_method() {
        let src = "class Greeter:\n    def hello(self):\n        return 1\n";
        let s = CodeStructure::parse(Path::new("g.py"), src).unwrap();
        assert_eq!(s.unit_at(2).map(|u| u.name.as_str()), Some("hello"));
        assert_eq!(s.unit_at(1).map(|u| u.kind), Some(UnitKind::Type));
    }

    #[cfg(feature = "lang-go")]
    #[test]
    fn parse_go_type_spec() {
        let src = "package main\n\ntype Server struct {\n\tport int\n}\n\nfunc (s *Server) Start() {}\n";
        let s = CodeStructure::parse(Path::new("s.go"), src).unwrap();
        let names: Vec<&str> = s.units.iter().map(|u| u.name.as_str()).collect();
        assert!(names.contains(&"Server"));
        assert!(names.contains(&"Start"));
    }
}
