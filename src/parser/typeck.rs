//! Best-effort type-of-expression for Go syntax trees.
//!
//! A [`Typer`] holds the local declarations of one top-level function,
//! including every closure nested in it. Each binding remembers the block it
//! is declared in and where it becomes visible, so `type_of(expr)` resolves a
//! name the way Go's lexical scoping does: sibling closures and blocks never
//! see each other's locals. Whatever the typer cannot work out is
//! [`GoType::Unknown`].

use std::collections::HashMap;
use std::ops::Range;
use tree_sitter::Node;

use super::index::{DeclIndex, ValueDecl};
use super::program::{FileId, SourceFile};
use super::types::GoType;
use super::{call_args, expression_list, field_children, named_children, unparen};

const MAX_DEPTH: usize = 16;

/// Node kinds that open a lexical scope.
const SCOPE_KINDS: &[&str] = &[
    "block",
    "if_statement",
    "for_statement",
    "expression_switch_statement",
    "type_switch_statement",
    "select_statement",
    "expression_case",
    "type_case",
    "default_case",
    "communication_case",
    "func_literal",
    "function_declaration",
    "method_declaration",
];

/// One local declaration of a name.
#[derive(Debug, Clone)]
struct Binding {
    ty: GoType,
    /// Byte range of the scope the name is declared in.
    scope: Range<usize>,
    /// Start of the declaring identifier.
    name_at: usize,
    /// First byte where other uses see the name.
    visible_from: usize,
}

impl Binding {
    fn covers(&self, at: usize) -> bool {
        self.scope.contains(&at) && (at == self.name_at || at >= self.visible_from)
    }
}

/// Expression typer scoped to one function of one file.
pub struct Typer<'i, 'a> {
    index: &'i DeclIndex<'a>,
    file: FileId,
    source: &'a SourceFile,
    scope: HashMap<String, Vec<Binding>>,
    depth: usize,
}

impl<'i, 'a> Typer<'i, 'a> {
    /// A typer with an empty local scope (package-level expressions).
    pub fn new(index: &'i DeclIndex<'a>, file: FileId) -> Self {
        Self {
            index,
            file,
            source: index.program().file(file),
            scope: HashMap::new(),
            depth: 0,
        }
    }

    /// A typer for expressions inside `node`, holding the declarations of
    /// its outermost enclosing function.
    pub fn enclosing(index: &'i DeclIndex<'a>, file: FileId, node: Node<'a>) -> Self {
        let mut typer = Self::new(index, file);
        let mut outermost = None;
        let mut current = Some(node);
        while let Some(n) = current {
            if matches!(
                n.kind(),
                "function_declaration" | "method_declaration" | "func_literal"
            ) {
                outermost = Some(n);
            }
            current = n.parent();
        }
        if let Some(func) = outermost {
            typer.collect(func);
        }
        typer
    }

    pub fn index(&self) -> &'i DeclIndex<'a> {
        self.index
    }

    pub fn file(&self) -> FileId {
        self.file
    }

    pub fn source(&self) -> &'a SourceFile {
        self.source
    }

    pub fn text(&self, node: Node<'_>) -> &'a str {
        self.source.text(node)
    }

    /// The local binding an identifier refers to: the innermost visible
    /// declaration of its name at its position.
    fn local(&self, node: Node<'_>) -> Option<&Binding> {
        let at = node.start_byte();
        self.scope
            .get(self.text(node))?
            .iter()
            .filter(|b| b.covers(at))
            .min_by_key(|b| (b.scope.end - b.scope.start, std::cmp::Reverse(b.visible_from)))
    }

    /// Whether identifier `node` refers to a local declaration.
    pub fn is_local(&self, node: Node<'_>) -> bool {
        self.local(node).is_some()
    }

    /// Package name if `node` is an identifier naming an import.
    pub fn import_of(&self, node: Node<'_>) -> Option<&'a str> {
        if node.kind() != "identifier" || self.is_local(node) {
            return None;
        }
        self.source.import(self.text(node))
    }

    /// Whether `call` is `pkg.name(...)` for the import of package `pkg`.
    pub fn is_package_call(&self, call: Node<'_>, pkg: &str, name: &str) -> bool {
        let Some(func) = call.child_by_field_name("function") else {
            return false;
        };
        if func.kind() != "selector_expression" {
            return false;
        }
        let (Some(operand), Some(field)) = (
            func.child_by_field_name("operand"),
            func.child_by_field_name("field"),
        ) else {
            return false;
        };
        self.import_of(operand) == Some(pkg) && self.text(field) == name
    }

    // ─── Scope Collection ───────────────────────────────────────

    /// Record `name` as declared by `decl`, visible from `visible_from`.
    fn bind(&mut self, name: Node<'_>, ty: GoType, decl: Node<'_>, visible_from: usize) {
        let text = self.text(name);
        if text == "_" {
            return;
        }
        let scope = scope_of(decl);
        self.scope.entry(text.to_string()).or_default().push(Binding {
            ty,
            scope,
            name_at: name.start_byte(),
            visible_from,
        });
    }

    fn bind_params(&mut self, func: Node<'_>, list: Node<'_>) {
        for param in named_children(list) {
            let Some(ty_node) = param.child_by_field_name("type") else {
                continue;
            };
            let mut ty = GoType::from_node(ty_node, self.source);
            if param.kind() == "variadic_parameter_declaration" {
                ty = GoType::Slice(Box::new(ty));
            }
            for name in field_children(param, "name") {
                self.bind(name, ty.clone(), func, func.start_byte());
            }
        }
    }

    /// Walk `node` in source order, recording every declaration it makes.
    fn collect(&mut self, node: Node<'_>) {
        match node.kind() {
            "function_declaration" | "method_declaration" | "func_literal" => {
                for field in ["receiver", "parameters", "result"] {
                    if let Some(list) = node.child_by_field_name(field) {
                        if list.kind() == "parameter_list" {
                            self.bind_params(node, list);
                        }
                    }
                }
                if let Some(body) = node.child_by_field_name("body") {
                    self.collect(body);
                }
            }
            "short_var_declaration" => {
                let (Some(left), Some(right)) = (
                    node.child_by_field_name("left"),
                    node.child_by_field_name("right"),
                ) else {
                    return;
                };
                self.collect(right);
                let names = expression_list(left);
                let types = self.assigned_types(&expression_list(right), names.len());
                for (name, ty) in names.into_iter().zip(types) {
                    self.bind(name, ty, node, node.end_byte());
                }
            }
            "var_spec" | "const_spec" => {
                let names = field_children(node, "name");
                let declared = node
                    .child_by_field_name("type")
                    .map(|t| GoType::from_node(t, self.source));
                let values = node
                    .child_by_field_name("value")
                    .map(|v| {
                        self.collect(v);
                        expression_list(v)
                    })
                    .unwrap_or_default();
                let types = match declared {
                    Some(ty) => vec![ty; names.len()],
                    None => self.assigned_types(&values, names.len()),
                };
                for (name, ty) in names.into_iter().zip(types) {
                    self.bind(name, ty, node, node.end_byte());
                }
            }
            "range_clause" => {
                let Some(right) = node.child_by_field_name("right") else {
                    return;
                };
                self.collect(right);
                let declares = (0..node.child_count())
                    .filter_map(|i| node.child(i))
                    .any(|c| c.kind() == ":=");
                if !declares {
                    return;
                }
                let Some(left) = node.child_by_field_name("left") else {
                    return;
                };
                let (key, value) = match self.type_of(right).elem() {
                    GoType::Slice(e) | GoType::Array(_, e) => (GoType::builtin("int"), *e),
                    GoType::Map(k, v) => (*k, *v),
                    GoType::Chan(e) => (*e, GoType::Unknown),
                    t if t.is_string() => (GoType::builtin("int"), GoType::builtin("rune")),
                    _ => (GoType::Unknown, GoType::Unknown),
                };
                let names = expression_list(left);
                for (name, ty) in names.into_iter().zip([key, value]) {
                    self.bind(name, ty, node, node.end_byte());
                }
            }
            _ => {
                for child in named_children(node) {
                    self.collect(child);
                }
            }
        }
    }

    /// Types produced by assigning `values` to `count` names.
    fn assigned_types(&self, values: &[Node<'_>], count: usize) -> Vec<GoType> {
        if values.len() == count {
            return values.iter().map(|v| self.type_of(*v)).collect();
        }
        let mut types = match values.first().map(|v| unparen(*v)) {
            Some(v) if v.kind() == "call_expression" => self.call_result_types(v),
            Some(v) if v.kind() == "type_assertion_expression" => {
                vec![self.type_of(v), GoType::builtin("bool")]
            }
            Some(v) if v.kind() == "index_expression" => {
                vec![self.type_of(v), GoType::builtin("bool")]
            }
            _ => Vec::new(),
        };
        types.resize(count, GoType::Unknown);
        types
    }

    // ─── Expression Types ───────────────────────────────────────

    /// Static type of an expression node.
    pub fn type_of(&self, node: Node<'_>) -> GoType {
        match node.kind() {
            "parenthesized_expression" => named_children(node)
                .into_iter()
                .next()
                .map(|inner| self.type_of(inner))
                .unwrap_or(GoType::Unknown),
            "interpreted_string_literal" | "raw_string_literal" => GoType::string(),
            "int_literal" | "iota" => GoType::builtin("int"),
            "float_literal" => GoType::builtin("float64"),
            "imaginary_literal" => GoType::builtin("complex128"),
            "rune_literal" => GoType::builtin("rune"),
            "true" | "false" => GoType::builtin("bool"),
            "nil" => GoType::UntypedNil,
            "identifier" => self.ident_type(node),
            "unary_expression" => self.unary_type(node),
            "binary_expression" => self.binary_type(node),
            "composite_literal" => node
                .child_by_field_name("type")
                .map(|t| GoType::from_node(t, self.source))
                .unwrap_or(GoType::Unknown),
            "func_literal" => GoType::Func,
            "call_expression" => self
                .call_result_types(node)
                .into_iter()
                .next()
                .unwrap_or(GoType::Unknown),
            "type_conversion_expression" => node
                .child_by_field_name("type")
                .map(|t| GoType::from_node(t, self.source))
                .unwrap_or(GoType::Unknown),
            "type_assertion_expression" => node
                .child_by_field_name("type")
                .map(|t| GoType::from_node(t, self.source))
                .unwrap_or(GoType::Unknown),
            "selector_expression" => self.selector_type(node),
            "index_expression" => {
                let Some(operand) = node.child_by_field_name("operand") else {
                    return GoType::Unknown;
                };
                match self.type_of(operand) {
                    GoType::Slice(e) | GoType::Array(_, e) => *e,
                    GoType::Map(_, v) => *v,
                    GoType::Pointer(inner) => match *inner {
                        GoType::Array(_, e) => *e,
                        _ => GoType::Unknown,
                    },
                    t if t.is_string() => GoType::builtin("byte"),
                    _ => GoType::Unknown,
                }
            }
            "slice_expression" => match node.child_by_field_name("operand") {
                Some(operand) => match self.type_of(operand) {
                    GoType::Array(_, e) => GoType::Slice(e),
                    other => other,
                },
                None => GoType::Unknown,
            },
            _ => GoType::Unknown,
        }
    }

    fn ident_type(&self, node: Node<'_>) -> GoType {
        if let Some(binding) = self.local(node) {
            return binding.ty.clone();
        }
        match self.index.value(self.file, &self.source.package, self.text(node)) {
            Some(decl) => self.value_type(decl),
            None => GoType::Unknown,
        }
    }

    /// Type of a package-level var or const.
    fn value_type(&self, decl: ValueDecl<'a>) -> GoType {
        if self.depth >= MAX_DEPTH {
            return GoType::Unknown;
        }
        let source = self.index.program().file(decl.file);
        if let Some(ty) = decl.spec.child_by_field_name("type") {
            return GoType::from_node(ty, source);
        }
        let Some(value) = decl.value() else {
            return GoType::Unknown;
        };
        let mut typer = Typer::new(self.index, decl.file);
        typer.depth = self.depth + 1;
        typer.type_of(value)
    }

    fn unary_type(&self, node: Node<'_>) -> GoType {
        let Some(operand) = node.child_by_field_name("operand") else {
            return GoType::Unknown;
        };
        let op = node
            .child_by_field_name("operator")
            .map(|o| self.text(o))
            .unwrap_or("");
        let inner = self.type_of(operand);
        match op {
            "&" => GoType::pointer_to(inner),
            "*" => match inner {
                GoType::Pointer(elem) => *elem,
                _ => GoType::Unknown,
            },
            "<-" => match inner {
                GoType::Chan(elem) => *elem,
                _ => GoType::Unknown,
            },
            "!" => GoType::builtin("bool"),
            _ => inner,
        }
    }

    fn binary_type(&self, node: Node<'_>) -> GoType {
        let op = node
            .child_by_field_name("operator")
            .map(|o| self.text(o))
            .unwrap_or("");
        if matches!(op, "==" | "!=" | "<" | "<=" | ">" | ">=" | "&&" | "||") {
            return GoType::builtin("bool");
        }
        let left = node
            .child_by_field_name("left")
            .map(|l| self.type_of(l))
            .unwrap_or(GoType::Unknown);
        if !left.is_unknown() || matches!(op, "<<" | ">>") {
            return left;
        }
        node.child_by_field_name("right")
            .map(|r| self.type_of(r))
            .unwrap_or(GoType::Unknown)
    }

    fn selector_type(&self, node: Node<'_>) -> GoType {
        let (Some(operand), Some(field)) = (
            node.child_by_field_name("operand"),
            node.child_by_field_name("field"),
        ) else {
            return GoType::Unknown;
        };
        let field = self.text(field);
        if let Some(pkg) = self.import_of(operand) {
            return match self.index.value(self.file, pkg, field) {
                Some(decl) => self.value_type(decl),
                None => GoType::Unknown,
            };
        }
        self.index
            .field_type(self.file, &self.type_of(operand), field)
            .unwrap_or(GoType::Unknown)
    }

    /// Result types of a call, treating conversions as one-result calls.
    pub fn call_result_types(&self, call: Node<'_>) -> Vec<GoType> {
        let Some(func) = call.child_by_field_name("function") else {
            return Vec::new();
        };
        let args = call_args(call);
        match func.kind() {
            "identifier" => self.ident_call_types(func, &args),
            "selector_expression" => self.selector_call_types(func),
            _ => self
                .type_from_expr(func)
                .map(|t| vec![t])
                .unwrap_or_default(),
        }
    }

    fn ident_call_types(&self, func: Node<'_>, args: &[Node<'_>]) -> Vec<GoType> {
        let name = self.text(func);
        if !self.is_local(func) {
            match name {
                "new" => {
                    return args
                        .first()
                        .map(|t| vec![GoType::pointer_to(GoType::from_node(*t, self.source))])
                        .unwrap_or_default()
                }
                "make" => {
                    return args
                        .first()
                        .map(|t| vec![GoType::from_node(*t, self.source)])
                        .unwrap_or_default()
                }
                "len" | "cap" | "copy" => return vec![GoType::builtin("int")],
                "append" | "min" | "max" => {
                    return args.first().map(|a| vec![self.type_of(*a)]).unwrap_or_default()
                }
                _ => {}
            }
            if GoType::is_builtin_name(name) {
                return vec![GoType::builtin(name)];
            }
        }
        let package = &self.source.package;
        if self.index.is_type(self.file, package, name) {
            return vec![GoType::named(package, name)];
        }
        match self.index.func(self.file, package, name) {
            Some(decl) => self.index.result_types(decl.file, decl.node),
            None => Vec::new(),
        }
    }

    fn selector_call_types(&self, func: Node<'_>) -> Vec<GoType> {
        let (Some(operand), Some(field)) = (
            func.child_by_field_name("operand"),
            func.child_by_field_name("field"),
        ) else {
            return Vec::new();
        };
        let name = self.text(field);
        if let Some(pkg) = self.import_of(operand) {
            if self.index.is_type(self.file, pkg, name) {
                return vec![GoType::named(pkg, name)];
            }
            if let Some(decl) = self.index.func(self.file, pkg, name) {
                return self.index.result_types(decl.file, decl.node);
            }
            return stdlib_result(pkg, name).into_iter().collect();
        }
        let recv = self.type_of(operand);
        if let GoType::Named {
            package: Some(package),
            name: recv_name,
        } = recv.elem()
        {
            if let Some(decl) = self.index.method(self.file, &package, &recv_name, name) {
                return self.index.result_types(decl.file, decl.node);
            }
        }
        match name {
            "String" | "Error" => vec![GoType::string()],
            _ => Vec::new(),
        }
    }

    /// Interpret an expression used in type position, e.g. the function
    /// of the conversion `(*Foo)(nil)`.
    pub fn type_from_expr(&self, node: Node<'_>) -> Option<GoType> {
        let node = unparen(node);
        match node.kind() {
            "pointer_type" | "parenthesized_type" | "slice_type" | "array_type" | "map_type"
            | "qualified_type" | "type_identifier" | "generic_type" | "interface_type"
            | "channel_type" | "function_type" => Some(GoType::from_node(node, self.source)),
            "unary_expression" => {
                let op = node.child_by_field_name("operator")?;
                if self.text(op) != "*" {
                    return None;
                }
                let operand = node.child_by_field_name("operand")?;
                Some(GoType::pointer_to(self.type_from_expr_loose(operand)?))
            }
            "identifier" => {
                let name = self.text(node);
                if self.is_local(node) {
                    None
                } else if GoType::is_builtin_name(name) {
                    Some(GoType::builtin(name))
                } else if self.index.is_type(self.file, &self.source.package, name) {
                    Some(GoType::named(&self.source.package, name))
                } else {
                    None
                }
            }
            "selector_expression" => {
                let operand = node.child_by_field_name("operand")?;
                let field = node.child_by_field_name("field")?;
                let pkg = self.import_of(operand)?;
                let name = self.text(field);
                self.index
                    .is_type(self.file, pkg, name)
                    .then(|| GoType::named(pkg, name))
            }
            _ => None,
        }
    }

    /// Like [`Self::type_from_expr`], but accepts any `pkg.Name` and any
    /// unscoped identifier: used where only a type can appear.
    fn type_from_expr_loose(&self, node: Node<'_>) -> Option<GoType> {
        if let Some(ty) = self.type_from_expr(node) {
            return Some(ty);
        }
        let node = unparen(node);
        match node.kind() {
            "identifier" => Some(GoType::from_node(node, self.source)),
            "selector_expression" => {
                let operand = node.child_by_field_name("operand")?;
                let field = node.child_by_field_name("field")?;
                let pkg = self.import_of(operand)?;
                Some(GoType::named(pkg, self.text(field)))
            }
            _ => None,
        }
    }
}

/// Byte range of the scope a declaration made by `decl` belongs to.
fn scope_of(decl: Node<'_>) -> Range<usize> {
    if matches!(
        decl.kind(),
        "function_declaration" | "method_declaration" | "func_literal"
    ) {
        return decl.byte_range();
    }
    let mut current = decl.parent();
    while let Some(n) = current {
        if SCOPE_KINDS.contains(&n.kind()) {
            return n.byte_range();
        }
        current = n.parent();
    }
    decl.byte_range()
}

/// Result types of the few standard library calls that commonly build
/// route strings.
fn stdlib_result(pkg: &str, name: &str) -> Option<GoType> {
    let ty = match (pkg, name) {
        ("fmt", "Sprintf" | "Sprint" | "Sprintln") => GoType::string(),
        ("fmt", "Errorf") | ("errors", "New") => GoType::builtin("error"),
        ("strconv", "Itoa" | "FormatInt" | "FormatUint" | "FormatBool" | "FormatFloat" | "Quote") => {
            GoType::string()
        }
        (
            "strings",
            "Join" | "ToLower" | "ToUpper" | "TrimPrefix" | "TrimSuffix" | "TrimSpace" | "Repeat"
            | "ReplaceAll" | "Replace",
        ) => GoType::string(),
        ("url", "PathEscape" | "QueryEscape") | ("hex", "EncodeToString") => GoType::string(),
        _ => return None,
    };
    Some(ty)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::program::Program;

    const SRC: &str = r#"package api

import (
	"fmt"
	"go.sia.tech/jape"
)

type Foo struct {
	Name string
	Tags []string
}

type server struct{}

func (s *server) load(id string) (Foo, error) { return Foo{}, nil }

func (s *server) handleFoo(jc jape.Context) {
	var id string
	foo, err := s.load(id)
	ptr := &foo
	items := make(map[string]Foo)
	for k, v := range items {
		_, _ = k, v
	}
	route := fmt.Sprintf("/foo/%v", id)
	n := len(route)
	conv := (*Foo)(nil)
	jc.Encode(ptr.Tags[0])
	_, _, _, _ = err, n, conv, route
}
"#;

    fn with_typer(check: impl Fn(&Typer<'_, '_>, &dyn Fn(&str) -> GoType)) {
        let program = Program::from_sources(vec![("api/server.go", SRC.to_string())]).unwrap();
        let index = DeclIndex::build(&program);
        let decl = index.method(FileId(0), "api", "server", "handleFoo").unwrap();
        let typer = Typer::enclosing(&index, decl.file, decl.node);
        let find = |expr: &str| -> GoType {
            let source = typer.source();
            let mut stack = vec![decl.node];
            while let Some(node) = stack.pop() {
                if source.text(node) == expr && node.kind() != "expression_list" {
                    return typer.type_of(node);
                }
                stack.extend(named_children(node));
            }
            panic!("expression {expr} not found");
        };
        check(&typer, &find);
    }

    #[test]
    fn test_local_declarations() {
        with_typer(|typer, ty| {
            assert_eq!(ty("jc"), GoType::named("jape", "Context"));
            assert_eq!(ty("foo").to_string(), "api.Foo");
            assert_eq!(ty("err").to_string(), "error");
            assert_eq!(ty("ptr").to_string(), "*api.Foo");
            assert_eq!(ty("items").to_string(), "map[string]api.Foo");
            assert_eq!(ty("k").to_string(), "string");
            assert_eq!(ty("v").to_string(), "api.Foo");
            assert_eq!(ty("route").to_string(), "string");
            assert_eq!(ty("n").to_string(), "int");
            assert!(typer.source().import("jape").is_some());
        });
    }

    #[test]
    fn test_expressions() {
        with_typer(|_, ty| {
            assert_eq!(ty("ptr.Tags[0]").to_string(), "string");
            assert_eq!(ty("ptr.Tags").to_string(), "[]string");
            assert_eq!(ty("(*Foo)(nil)").to_string(), "*api.Foo");
            assert_eq!(ty("\"/foo/%v\""), GoType::string());
            assert_eq!(ty("s.load(id)").to_string(), "api.Foo");
        });
    }

    #[test]
    fn test_sibling_closures_and_shadowing() {
        let src = r#"package api

type A struct{}

type B struct{}

func routes() {
	var v string
	_ = map[string]func(){
		"a": func() {
			var v A
			use(v)
		},
		"b": func() {
			var v B
			use(v)
		},
	}
	if v := 1; v > 0 {
		use(v)
	}
	use(v)
}
"#;
        let program = Program::from_sources(vec![("api/server.go", src.to_string())]).unwrap();
        let index = DeclIndex::build(&program);
        let decl = index.func(FileId(0), "api", "routes").unwrap();
        let typer = Typer::enclosing(&index, decl.file, decl.node);
        let mut uses = Vec::new();
        let mut stack = vec![decl.node];
        while let Some(node) = stack.pop() {
            if node.kind() == "call_expression" {
                uses.push(typer.type_of(call_args(node)[0]).to_string());
            }
            let mut children = named_children(node);
            children.reverse();
            stack.extend(children);
        }
        assert_eq!(uses, vec!["api.A", "api.B", "int", "string"]);
    }
}
