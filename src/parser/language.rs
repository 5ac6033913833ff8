//! Source detection and tree-sitter grammar loading.

use std::path::Path;
use tree_sitter::{Language, Parser, Tree};

use crate::error::{CheckError, Result};

/// The only language the checker understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    /// Regular Go source.
    Go,
    /// A `_test.go` file.
    GoTest,
}

impl SourceKind {
    /// Detect the kind of source from a file path.
    pub fn from_path(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?;
        if path.extension()?.to_str()? != "go" {
            return None;
        }
        if name.ends_with("_test.go") {
            Some(SourceKind::GoTest)
        } else {
            Some(SourceKind::Go)
        }
    }

    /// Whether files of this kind take part in an analysis run.
    pub fn is_analyzed(&self, include_tests: bool) -> bool {
        match self {
            SourceKind::Go => true,
            SourceKind::GoTest => include_tests,
        }
    }
}

/// Get the tree-sitter Language for Go.
pub fn go_language() -> Language {
    tree_sitter_go::LANGUAGE.into()
}

/// Parse Go source into a syntax tree.
pub fn parse_go(path: &Path, source: &str) -> Result<Tree> {
    let mut parser = Parser::new();
    parser.set_language(&go_language())?;
    parser
        .parse(source, None)
        .ok_or_else(|| CheckError::Parse(path.to_path_buf()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_from_path() {
        assert_eq!(
            SourceKind::from_path(&PathBuf::from("api/server.go")),
            Some(SourceKind::Go)
        );
        assert_eq!(
            SourceKind::from_path(&PathBuf::from("api/server_test.go")),
            Some(SourceKind::GoTest)
        );
        assert_eq!(SourceKind::from_path(&PathBuf::from("main.rs")), None);
        assert_eq!(SourceKind::from_path(&PathBuf::from("Makefile")), None);
    }

    #[test]
    fn test_is_analyzed() {
        assert!(SourceKind::Go.is_analyzed(false));
        assert!(!SourceKind::GoTest.is_analyzed(false));
        assert!(SourceKind::GoTest.is_analyzed(true));
    }

    #[test]
    fn test_parse_go() {
        let tree = parse_go(Path::new("a.go"), "package a\n\nfunc f() {}\n").unwrap();
        assert_eq!(tree.root_node().kind(), "source_file");
        assert!(!tree.root_node().has_error());
    }
}
