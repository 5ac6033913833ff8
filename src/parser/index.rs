//! Declaration index — name → declaration lookup built once per program.
//!
//! Functions, methods, types and package-level values are keyed by the
//! package name they are declared under, so handler references and type
//! lookups are hash lookups instead of repeated tree scans.

use std::collections::HashMap;
use tracing::debug;
use tree_sitter::Node;

use super::program::{FileId, Program, SourceFile};
use super::types::GoType;
use super::{field_children, named_children};

/// A declaration node and the file it lives in.
#[derive(Debug, Clone, Copy)]
pub struct Decl<'a> {
    pub file: FileId,
    pub node: Node<'a>,
}

/// A package-level `var` or `const` name.
#[derive(Debug, Clone, Copy)]
pub struct ValueDecl<'a> {
    pub file: FileId,
    /// The `var_spec` / `const_spec` node.
    pub spec: Node<'a>,
    /// Position of the name within the spec's name list.
    pub index: usize,
    pub is_const: bool,
}

impl<'a> ValueDecl<'a> {
    /// The value expression bound to this name, if written.
    pub fn value(&self) -> Option<Node<'a>> {
        let values = self.spec.child_by_field_name("value")?;
        super::expression_list(values).get(self.index).copied()
    }
}

type Key = (String, String);

/// Precomputed declaration lookup for a whole [`Program`].
///
/// Package names are not unique across a tree (several `main` packages,
/// `v1/api` next to `v2/api`), so every key holds all declarations sharing
/// it in path order. A lookup made from a file prefers the declaration in
/// that file's own directory and otherwise takes the first.
pub struct DeclIndex<'a> {
    program: &'a Program,
    funcs: HashMap<Key, Vec<Decl<'a>>>,
    /// (package, receiver type, method) -> declarations.
    methods: HashMap<(String, String, String), Vec<Decl<'a>>>,
    types: HashMap<Key, Vec<Decl<'a>>>,
    values: HashMap<Key, Vec<ValueDecl<'a>>>,
}

impl<'a> DeclIndex<'a> {
    /// Index every top-level declaration in the program.
    pub fn build(program: &'a Program) -> Self {
        let mut index = Self {
            program,
            funcs: HashMap::new(),
            methods: HashMap::new(),
            types: HashMap::new(),
            values: HashMap::new(),
        };
        for id in program.file_ids() {
            let file = program.file(id);
            for decl in named_children(file.tree.root_node()) {
                index.add_decl(id, file, decl);
            }
        }
        debug!(
            funcs = index.funcs.len(),
            methods = index.methods.len(),
            types = index.types.len(),
            values = index.values.len(),
            "declaration index built"
        );
        index
    }

    fn add_decl(&mut self, id: FileId, file: &'a SourceFile, decl: Node<'a>) {
        let package = file.package.clone();
        match decl.kind() {
            "function_declaration" => {
                if let Some(name) = decl.child_by_field_name("name") {
                    self.funcs
                        .entry((package, file.text(name).to_string()))
                        .or_default()
                        .push(Decl { file: id, node: decl });
                }
            }
            "method_declaration" => {
                let (Some(name), Some(recv)) = (
                    decl.child_by_field_name("name"),
                    receiver_type_name(decl, file),
                ) else {
                    return;
                };
                self.methods
                    .entry((package, recv, file.text(name).to_string()))
                    .or_default()
                    .push(Decl { file: id, node: decl });
            }
            "type_declaration" => {
                for spec in named_children(decl) {
                    if !matches!(spec.kind(), "type_spec" | "type_alias") {
                        continue;
                    }
                    if let Some(name) = spec.child_by_field_name("name") {
                        self.types
                            .entry((package.clone(), file.text(name).to_string()))
                            .or_default()
                            .push(Decl { file: id, node: spec });
                    }
                }
            }
            "var_declaration" | "const_declaration" => {
                let is_const = decl.kind() == "const_declaration";
                for spec in value_specs(decl) {
                    for (i, name) in field_children(spec, "name").into_iter().enumerate() {
                        self.values
                            .entry((package.clone(), file.text(name).to_string()))
                            .or_default()
                            .push(ValueDecl {
                                file: id,
                                spec,
                                index: i,
                                is_const,
                            });
                    }
                }
            }
            _ => {}
        }
    }

    pub fn program(&self) -> &'a Program {
        self.program
    }

    fn same_dir(&self, a: FileId, b: FileId) -> bool {
        self.program.file(a).path.parent() == self.program.file(b).path.parent()
    }

    /// The candidate declared next to `from`, else the first one.
    fn pick<T: Copy>(
        &self,
        from: FileId,
        candidates: &[T],
        file_of: impl Fn(&T) -> FileId,
    ) -> Option<T> {
        candidates
            .iter()
            .find(|c| self.same_dir(from, file_of(*c)))
            .or_else(|| candidates.first())
            .copied()
    }

    pub fn func(&self, from: FileId, package: &str, name: &str) -> Option<Decl<'a>> {
        let found = self.funcs.get(&(package.to_string(), name.to_string()))?;
        self.pick(from, found, |d| d.file)
    }

    pub fn method(&self, from: FileId, package: &str, recv: &str, name: &str) -> Option<Decl<'a>> {
        let found = self
            .methods
            .get(&(package.to_string(), recv.to_string(), name.to_string()))?;
        self.pick(from, found, |d| d.file)
    }

    /// A method with this name on any receiver in `package`, if exactly one
    /// exists. Methods declared next to `from` are considered first.
    pub fn unique_method(&self, from: FileId, package: &str, name: &str) -> Option<Decl<'a>> {
        let found: Vec<Decl<'a>> = self
            .methods
            .iter()
            .filter(|((p, _, n), _)| p == package && n == name)
            .flat_map(|(_, decls)| decls.iter().copied())
            .collect();
        let local: Vec<Decl<'a>> = found
            .iter()
            .copied()
            .filter(|d| self.same_dir(from, d.file))
            .collect();
        match (local.as_slice(), found.as_slice()) {
            ([only], _) => Some(*only),
            ([], [only]) => Some(*only),
            _ => None,
        }
    }

    pub fn type_decl(&self, from: FileId, package: &str, name: &str) -> Option<Decl<'a>> {
        let found = self.types.get(&(package.to_string(), name.to_string()))?;
        self.pick(from, found, |d| d.file)
    }

    pub fn value(&self, from: FileId, package: &str, name: &str) -> Option<ValueDecl<'a>> {
        let found = self.values.get(&(package.to_string(), name.to_string()))?;
        self.pick(from, found, |v| v.file)
    }

    /// Whether `package.name` is a declared type.
    pub fn is_type(&self, from: FileId, package: &str, name: &str) -> bool {
        self.type_decl(from, package, name).is_some()
    }

    /// Result types of a function or method declaration (or literal).
    pub fn result_types(&self, file: FileId, func: Node<'a>) -> Vec<GoType> {
        let source = self.program.file(file);
        let Some(result) = func.child_by_field_name("result") else {
            return Vec::new();
        };
        if result.kind() != "parameter_list" {
            return vec![GoType::from_node(result, source)];
        }
        let mut out = Vec::new();
        for param in named_children(result) {
            let Some(ty) = param.child_by_field_name("type") else {
                continue;
            };
            let ty = GoType::from_node(ty, source);
            let names = field_children(param, "name").len().max(1);
            out.extend(std::iter::repeat(ty).take(names));
        }
        out
    }

    /// Type of field `field` on the struct named by `owner`, searching
    /// embedded structs. `owner` is resolved as seen from file `from`.
    pub fn field_type(&self, from: FileId, owner: &GoType, field: &str) -> Option<GoType> {
        self.field_type_depth(from, owner, field, 0)
    }

    fn field_type_depth(
        &self,
        from: FileId,
        owner: &GoType,
        field: &str,
        depth: usize,
    ) -> Option<GoType> {
        if depth > 8 {
            return None;
        }
        let GoType::Named {
            package: Some(package),
            name,
        } = owner.elem()
        else {
            return None;
        };
        let decl = self.type_decl(from, &package, &name)?;
        let source = self.program.file(decl.file);
        let ty = decl.node.child_by_field_name("type")?;
        if ty.kind() != "struct_type" {
            // defined in terms of another named type
            let underlying = GoType::from_node(ty, source);
            return match underlying {
                GoType::Named { .. } => {
                    self.field_type_depth(decl.file, &underlying, field, depth + 1)
                }
                _ => None,
            };
        }
        let list = named_children(ty)
            .into_iter()
            .find(|n| n.kind() == "field_declaration_list")?;
        let mut embedded = Vec::new();
        for decl in named_children(list) {
            if decl.kind() != "field_declaration" {
                continue;
            }
            let Some(ty_node) = decl.child_by_field_name("type") else {
                continue;
            };
            let names = field_children(decl, "name");
            if names.is_empty() {
                embedded.push(GoType::from_node(ty_node, source));
                continue;
            }
            if names.iter().any(|n| source.text(*n) == field) {
                return Some(GoType::from_node(ty_node, source));
            }
        }
        embedded
            .iter()
            .find_map(|inner| self.field_type_depth(decl.file, inner, field, depth + 1))
    }
}

/// Receiver type name of a method declaration, without pointer or type
/// parameters (`func (s *server[T]) ...` -> `server`).
pub fn receiver_type_name(decl: Node<'_>, file: &SourceFile) -> Option<String> {
    let recv = decl.child_by_field_name("receiver")?;
    let param = named_children(recv).into_iter().next()?;
    let mut ty = param.child_by_field_name("type")?;
    loop {
        match ty.kind() {
            "pointer_type" | "parenthesized_type" => ty = named_children(ty).into_iter().next()?,
            "generic_type" => ty = ty.child_by_field_name("type")?,
            _ => break,
        }
    }
    Some(file.text(ty).to_string())
}

fn value_specs(decl: Node<'_>) -> Vec<Node<'_>> {
    let mut specs = Vec::new();
    for child in named_children(decl) {
        match child.kind() {
            "var_spec" | "const_spec" => specs.push(child),
            "var_spec_list" | "const_spec_list" => specs.extend(
                named_children(child)
                    .into_iter()
                    .filter(|n| matches!(n.kind(), "var_spec" | "const_spec")),
            ),
            _ => {}
        }
    }
    specs
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC: &str = r#"package api

const prefix = "/api"

var (
	a, b = 1, "two"
)

type Base struct {
	ID string
}

type Foo struct {
	Base
	Name, Alias string
	Next *Foo
}

type server struct{}

func (s *server) handleFoo() {}

func helper() (Foo, error) { return Foo{}, nil }
"#;

    fn program() -> Program {
        Program::from_sources(vec![("api/server.go", SRC.to_string())]).unwrap()
    }

    #[test]
    fn test_lookup_functions_and_methods() {
        let program = program();
        let index = DeclIndex::build(&program);
        assert!(index.func(FileId(0), "api", "helper").is_some());
        assert!(index.func(FileId(0), "api", "missing").is_none());
        assert!(index.method(FileId(0), "api", "server", "handleFoo").is_some());
        assert!(index.unique_method(FileId(0), "api", "handleFoo").is_some());
        assert!(index.is_type(FileId(0), "api", "Foo"));
        assert!(!index.is_type(FileId(0), "other", "Foo"));
    }

    #[test]
    fn test_values() {
        let program = program();
        let index = DeclIndex::build(&program);
        let file = program.file(FileId(0));

        let prefix = index.value(FileId(0), "api", "prefix").unwrap();
        assert!(prefix.is_const);
        assert_eq!(file.text(prefix.value().unwrap()), "\"/api\"");

        let b = index.value(FileId(0), "api", "b").unwrap();
        assert!(!b.is_const);
        assert_eq!(file.text(b.value().unwrap()), "\"two\"");
    }

    #[test]
    fn test_result_types() {
        let program = program();
        let index = DeclIndex::build(&program);
        let helper = index.func(FileId(0), "api", "helper").unwrap();
        let results: Vec<String> = index
            .result_types(helper.file, helper.node)
            .iter()
            .map(|t| t.to_string())
            .collect();
        assert_eq!(results, vec!["api.Foo", "error"]);
    }

    #[test]
    fn test_field_types() {
        let program = program();
        let index = DeclIndex::build(&program);
        let foo = GoType::named("api", "Foo");
        assert_eq!(index.field_type(FileId(0), &foo, "Alias"), Some(GoType::string()));
        assert_eq!(
            index.field_type(FileId(0), &GoType::pointer_to(foo.clone()), "Next"),
            Some(GoType::pointer_to(foo.clone()))
        );
        assert_eq!(index.field_type(FileId(0), &foo, "ID"), Some(GoType::string()));
        assert_eq!(index.field_type(FileId(0), &foo, "Missing"), None);
    }

    #[test]
    fn test_same_package_name_in_two_directories() {
        let program = Program::from_sources(vec![
            (
                "a/api/other.go",
                "package api\n\nfunc handle() int { return 1 }\n".to_string(),
            ),
            (
                "b/api/server.go",
                "package api\n\nfunc handle() string { return \"s\" }\n".to_string(),
            ),
            (
                "b/api/client.go",
                "package api\n\nfunc other() {}\n".to_string(),
            ),
        ])
        .unwrap();
        let index = DeclIndex::build(&program);
        let ids: Vec<FileId> = program.file_ids().collect();
        let results = |from: FileId| -> Vec<String> {
            let decl = index.func(from, "api", "handle").unwrap();
            index
                .result_types(decl.file, decl.node)
                .iter()
                .map(|t| t.to_string())
                .collect()
        };
        // sorted by path: a/api/other.go, b/api/client.go, b/api/server.go
        assert_eq!(results(ids[0]), vec!["int"]);
        assert_eq!(results(ids[1]), vec!["string"]);
        assert_eq!(results(ids[2]), vec!["string"]);
    }
}
