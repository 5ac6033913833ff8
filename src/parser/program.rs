//! Program loader — scans a directory and parses every Go file.
//!
//! Walks source files respecting .gitignore, parses each with tree-sitter,
//! and groups the results into packages (one directory + package clause).

use ignore::WalkBuilder;
use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tree_sitter::{Node, Tree};

use super::language::{parse_go, SourceKind};
use super::{named_children, unquote, Position};
use crate::error::{CheckError, Result};

/// Index of a file inside a [`Program`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(pub usize);

/// One parsed Go file.
pub struct SourceFile {
    pub path: PathBuf,
    pub source: String,
    pub tree: Tree,
    /// Name from the `package` clause.
    pub package: String,
    /// Local import name -> package name of the imported path.
    pub imports: HashMap<String, String>,
}

impl SourceFile {
    /// Parse a file from its source text.
    pub fn parse(path: PathBuf, source: String) -> Result<Self> {
        if SourceKind::from_path(&path).is_none() {
            return Err(CheckError::UnsupportedLanguage(path));
        }
        let tree = parse_go(&path, &source)?;
        let (package, imports) = read_header(tree.root_node(), source.as_bytes());
        Ok(Self {
            path,
            source,
            tree,
            package,
            imports,
        })
    }

    /// Source text of a node.
    pub fn text(&self, node: Node<'_>) -> &str {
        node.utf8_text(self.source.as_bytes()).unwrap_or("")
    }

    /// Position of the start of a node.
    pub fn position(&self, node: Node<'_>) -> Position {
        let point = node.start_position();
        Position {
            file: self.path.clone(),
            line: point.row + 1,
            column: point.column + 1,
        }
    }

    /// Package name behind a local import name, if `name` is an import.
    pub fn import(&self, name: &str) -> Option<&str> {
        self.imports.get(name).map(String::as_str)
    }
}

/// Files sharing a directory and package clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    pub dir: PathBuf,
    pub name: String,
    pub files: Vec<FileId>,
}

/// Every parsed file of an analysis run, sorted by path.
pub struct Program {
    files: Vec<SourceFile>,
}

impl Program {
    /// Load all Go files under `root`.
    pub fn load(root: &Path, include_tests: bool) -> Result<Self> {
        let paths: Vec<PathBuf> = WalkBuilder::new(root)
            .hidden(true)
            .git_ignore(true)
            .git_global(true)
            .git_exclude(true)
            .build()
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().is_some_and(|ft| ft.is_file()))
            .filter(|entry| {
                SourceKind::from_path(entry.path())
                    .is_some_and(|kind| kind.is_analyzed(include_tests))
            })
            .map(|entry| entry.into_path())
            .collect();
        debug!(root = %root.display(), file_count = paths.len(), "parsing Go sources");

        let files = paths
            .par_iter()
            .map(|path| {
                let source = fs::read_to_string(path).map_err(|source| CheckError::Io {
                    path: path.clone(),
                    source,
                })?;
                SourceFile::parse(path.clone(), source)
            })
            .collect::<Result<Vec<_>>>()?;

        let program = Self::from_files(files);
        info!(
            files = program.files.len(),
            packages = program.packages().len(),
            "program loaded"
        );
        Ok(program)
    }

    /// Build a program from in-memory sources.
    pub fn from_sources<P: Into<PathBuf>>(sources: Vec<(P, String)>) -> Result<Self> {
        let files = sources
            .into_iter()
            .map(|(path, source)| SourceFile::parse(path.into(), source))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::from_files(files))
    }

    fn from_files(mut files: Vec<SourceFile>) -> Self {
        files.sort_by(|a, b| a.path.cmp(&b.path));
        Self { files }
    }

    pub fn files(&self) -> &[SourceFile] {
        &self.files
    }

    pub fn file(&self, id: FileId) -> &SourceFile {
        &self.files[id.0]
    }

    pub fn file_ids(&self) -> impl Iterator<Item = FileId> + '_ {
        (0..self.files.len()).map(FileId)
    }

    /// Group files into packages, ordered by directory then name.
    pub fn packages(&self) -> Vec<Package> {
        let mut grouped: BTreeMap<(PathBuf, String), Vec<FileId>> = BTreeMap::new();
        for (i, file) in self.files.iter().enumerate() {
            let dir = file.path.parent().map(Path::to_path_buf).unwrap_or_default();
            grouped
                .entry((dir, file.package.clone()))
                .or_default()
                .push(FileId(i));
        }
        grouped
            .into_iter()
            .map(|((dir, name), files)| Package { dir, name, files })
            .collect()
    }
}

/// Read the package clause and import table of a file.
fn read_header(root: Node<'_>, source: &[u8]) -> (String, HashMap<String, String>) {
    let mut package = String::new();
    let mut imports = HashMap::new();
    for child in named_children(root) {
        match child.kind() {
            "package_clause" => {
                if let Some(ident) = named_children(child).into_iter().next() {
                    package = ident.utf8_text(source).unwrap_or("").to_string();
                }
            }
            "import_declaration" => {
                for spec in import_specs(child) {
                    let Some(path) = spec
                        .child_by_field_name("path")
                        .and_then(|p| p.utf8_text(source).ok())
                        .and_then(unquote)
                    else {
                        continue;
                    };
                    let package_name = package_name_of(&path);
                    let local = match spec.child_by_field_name("name") {
                        Some(name) => match name.kind() {
                            "dot" | "blank_identifier" => continue,
                            _ => name.utf8_text(source).unwrap_or("").to_string(),
                        },
                        None => package_name.clone(),
                    };
                    imports.insert(local, package_name);
                }
            }
            _ => {}
        }
    }
    (package, imports)
}

fn import_specs(decl: Node<'_>) -> Vec<Node<'_>> {
    let mut specs = Vec::new();
    for child in named_children(decl) {
        match child.kind() {
            "import_spec" => specs.push(child),
            "import_spec_list" => specs.extend(
                named_children(child)
                    .into_iter()
                    .filter(|n| n.kind() == "import_spec"),
            ),
            _ => {}
        }
    }
    specs
}

/// Conventional package name of an import path: its last element, skipping
/// a trailing major-version element (`foo/v2` -> `foo`).
pub fn package_name_of(path: &str) -> String {
    let mut parts = path.rsplit('/');
    let last = parts.next().unwrap_or(path);
    let is_version = last.len() > 1
        && last.starts_with('v')
        && last[1..].chars().all(|c| c.is_ascii_digit());
    if is_version {
        if let Some(prev) = parts.next() {
            return prev.to_string();
        }
    }
    last.to_string()
}
