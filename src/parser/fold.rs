//! Constant folding of string-building expressions.
//!
//! Route strings are written as literals, `+` concatenations, string
//! constants, or `fmt.Sprintf` calls. [`fold`] turns such an expression
//! into a [`Template`]: literal text interleaved with holes, where each hole
//! remembers the expression that fills it (if any). Nothing else is
//! evaluated; unrecognized shapes simply become holes.

use tree_sitter::Node;

use super::typeck::Typer;
use super::{call_args, named_children, unquote};

const MAX_DEPTH: usize = 16;

/// One piece of a folded string.
#[derive(Debug, Clone)]
pub enum Piece<'a> {
    Lit(String),
    /// A substituted value; `None` when a format verb had no argument.
    Hole(Option<Node<'a>>),
}

/// A `fmt.Sprintf` call whose verb count disagrees with its arguments.
#[derive(Debug, Clone, Copy)]
pub struct SprintfMismatch<'a> {
    pub call: Node<'a>,
    pub verbs: usize,
    pub supplied: usize,
}

/// Result of folding a string expression.
#[derive(Debug, Clone, Default)]
pub struct Template<'a> {
    pub pieces: Vec<Piece<'a>>,
    pub mismatch: Option<SprintfMismatch<'a>>,
}

impl<'a> Template<'a> {
    fn lit(text: impl Into<String>) -> Self {
        Self {
            pieces: vec![Piece::Lit(text.into())],
            mismatch: None,
        }
    }

    fn hole(node: Option<Node<'a>>) -> Self {
        Self {
            pieces: vec![Piece::Hole(node)],
            mismatch: None,
        }
    }

    fn append(&mut self, other: Template<'a>) {
        for piece in other.pieces {
            match (self.pieces.last_mut(), piece) {
                (Some(Piece::Lit(prev)), Piece::Lit(text)) => prev.push_str(&text),
                (_, piece) => self.pieces.push(piece),
            }
        }
        self.mismatch = self.mismatch.or(other.mismatch);
    }

    /// Render with every hole written as `%s`.
    pub fn render(&self) -> String {
        self.pieces
            .iter()
            .map(|piece| match piece {
                Piece::Lit(text) => text.as_str(),
                Piece::Hole(_) => "%s",
            })
            .collect()
    }

    /// Number of holes.
    pub fn holes(&self) -> usize {
        self.pieces
            .iter()
            .filter(|p| matches!(p, Piece::Hole(_)))
            .count()
    }

    /// Remove `prefix` from the leading literal text, if present.
    pub fn trim_prefix(&mut self, prefix: &str) {
        if prefix.is_empty() {
            return;
        }
        if let Some(Piece::Lit(first)) = self.pieces.first_mut() {
            if let Some(rest) = first.strip_prefix(prefix) {
                *first = rest.to_string();
            }
        }
    }

    /// Expand the format verbs of the literal pieces into holes filled by
    /// `args`, in order.
    fn apply_format(self, call: Node<'a>, args: &[Node<'a>]) -> Template<'a> {
        let mut out = Template::default();
        let mut next = 0;
        for piece in self.pieces {
            match piece {
                Piece::Hole(node) => out.pieces.push(Piece::Hole(node)),
                Piece::Lit(text) => {
                    for segment in split_verbs(&text) {
                        match segment {
                            FormatSegment::Text(t) => out.append(Template::lit(t)),
                            FormatSegment::Verb => {
                                out.pieces.push(Piece::Hole(args.get(next).copied()));
                                next += 1;
                            }
                        }
                    }
                }
            }
        }
        if next != args.len() {
            out.mismatch = Some(SprintfMismatch {
                call,
                verbs: next,
                supplied: args.len(),
            });
        }
        out.mismatch = out.mismatch.or(self.mismatch);
        out
    }
}

enum FormatSegment {
    Text(String),
    Verb,
}

/// Split a format string into literal text and `%` verbs (`%%` is text).
fn split_verbs(format: &str) -> Vec<FormatSegment> {
    let mut out = Vec::new();
    let mut text = String::new();
    let mut chars = format.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            text.push(c);
            continue;
        }
        if chars.peek() == Some(&'%') {
            chars.next();
            text.push('%');
            continue;
        }
        // flags, width, precision, then the verb letter
        while chars
            .peek()
            .is_some_and(|c| matches!(c, '+' | '-' | '#' | ' ' | '0'..='9' | '.' | '*'))
        {
            chars.next();
        }
        if chars.next().is_none() {
            text.push('%');
            break;
        }
        if !text.is_empty() {
            out.push(FormatSegment::Text(std::mem::take(&mut text)));
        }
        out.push(FormatSegment::Verb);
    }
    if !text.is_empty() {
        out.push(FormatSegment::Text(text));
    }
    out
}

/// Fold a string expression into a template.
pub fn fold<'a>(typer: &Typer<'_, 'a>, node: Node<'a>) -> Template<'a> {
    fold_depth(typer, node, 0)
}

fn fold_depth<'a>(typer: &Typer<'_, 'a>, node: Node<'a>, depth: usize) -> Template<'a> {
    if depth > MAX_DEPTH {
        return Template::hole(Some(node));
    }
    match node.kind() {
        "interpreted_string_literal" | "raw_string_literal" => match unquote(typer.text(node)) {
            Some(text) => Template::lit(text),
            None => Template::lit(typer.text(node)),
        },
        "parenthesized_expression" => match named_children(node).into_iter().next() {
            Some(inner) => fold_depth(typer, inner, depth + 1),
            None => Template::hole(Some(node)),
        },
        "binary_expression" => {
            let op = node.child_by_field_name("operator").map(|o| typer.text(o));
            let (Some("+"), Some(left), Some(right)) = (
                op,
                node.child_by_field_name("left"),
                node.child_by_field_name("right"),
            ) else {
                return Template::hole(Some(node));
            };
            let mut out = fold_depth(typer, left, depth + 1);
            out.append(fold_depth(typer, right, depth + 1));
            out
        }
        "call_expression" if typer.is_package_call(node, "fmt", "Sprintf") => {
            let args = call_args(node);
            let Some(format) = args.first() else {
                return Template::hole(Some(node));
            };
            fold_depth(typer, *format, depth + 1).apply_format(node, &args[1..])
        }
        "identifier" => {
            let package = typer.source().package.clone();
            fold_const(typer, &package, node, depth)
        }
        "selector_expression" => {
            let (Some(operand), Some(_)) = (
                node.child_by_field_name("operand"),
                node.child_by_field_name("field"),
            ) else {
                return Template::hole(Some(node));
            };
            match typer.import_of(operand) {
                Some(package) => fold_const(typer, package, node, depth),
                None => Template::hole(Some(node)),
            }
        }
        _ => Template::hole(Some(node)),
    }
}

/// Fold an identifier or `pkg.Name` that refers to a string constant.
fn fold_const<'a>(typer: &Typer<'_, 'a>, package: &str, node: Node<'a>, depth: usize) -> Template<'a> {
    let name_node = node.child_by_field_name("field").unwrap_or(node);
    let name = typer.text(name_node);
    // a local of the same name hides the package constant
    if node.kind() == "identifier" && typer.is_local(node) {
        return Template::hole(Some(node));
    }
    let index = typer.index();
    match index.value(typer.file(), package, name) {
        Some(decl) if decl.is_const => match decl.value() {
            Some(value) => {
                let inner = Typer::new(index, decl.file);
                let folded = fold_depth(&inner, value, depth + 1);
                // holes inside the constant do not bind to call-site arguments
                Template {
                    pieces: folded
                        .pieces
                        .into_iter()
                        .map(|p| match p {
                            Piece::Lit(t) => Piece::Lit(t),
                            Piece::Hole(_) => Piece::Hole(None),
                        })
                        .collect(),
                    mismatch: None,
                }
            }
            None => Template::hole(Some(node)),
        },
        _ => Template::hole(Some(node)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::index::DeclIndex;
    use crate::parser::program::{FileId, Program};

    fn fold_all(body: &str) -> Vec<(String, usize, Option<(usize, usize)>)> {
        let src = format!(
            "package api\n\nimport \"fmt\"\n\nconst prefix = \"/api\"\n\nfunc f(id string, n int) {{\n{}\n}}\n",
            body
        );
        let program = Program::from_sources(vec![("api/client.go", src)]).unwrap();
        let index = DeclIndex::build(&program);
        let decl = index.func(FileId(0), "api", "f").unwrap();
        let typer = Typer::enclosing(&index, decl.file, decl.node);
        let mut out = Vec::new();
        let mut stack = vec![decl.node];
        while let Some(node) = stack.pop() {
            if node.kind() == "expression_statement" {
                let expr = named_children(node)[0];
                let call_arg = call_args(expr)[0];
                let t = fold(&typer, call_arg);
                out.push((
                    t.render(),
                    t.holes(),
                    t.mismatch.map(|m| (m.verbs, m.supplied)),
                ));
            }
            let mut children = named_children(node);
            children.reverse();
            stack.extend(children);
        }
        out
    }

    #[test]
    fn test_fold_shapes() {
        let folded = fold_all(
            r#"use("/foo/" + id + "/bar")
use(prefix + "/x")
use(fmt.Sprintf("/foo/%s/baz?limit=%d&flag=true", id, n))
use(`/raw`)
use(fmt.Sprintf("/a/%v", id, n))
use(fmt.Sprintf("100%%/%v", id))"#,
        );
        assert_eq!(folded[0], ("/foo/%s/bar".to_string(), 1, None));
        assert_eq!(folded[1], ("/api/x".to_string(), 0, None));
        assert_eq!(
            folded[2],
            ("/foo/%s/baz?limit=%s&flag=true".to_string(), 2, None)
        );
        assert_eq!(folded[3], ("/raw".to_string(), 0, None));
        assert_eq!(folded[4], ("/a/%s".to_string(), 1, Some((1, 2))));
        assert_eq!(folded[5], ("100%/%s".to_string(), 1, None));
    }

    #[test]
    fn test_trim_prefix() {
        let mut t = Template::lit("/api/foo");
        t.trim_prefix("/api");
        assert_eq!(t.render(), "/foo");
        t.trim_prefix("/nope");
        assert_eq!(t.render(), "/foo");
    }

    #[test]
    fn test_split_verbs() {
        let segments = split_verbs("/x/%-8.2f/%%/%v");
        let verbs = segments
            .iter()
            .filter(|s| matches!(s, FormatSegment::Verb))
            .count();
        assert_eq!(verbs, 2);
    }
}
