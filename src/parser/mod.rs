//! Go source facade over tree-sitter.
//!
//! Loads a directory of Go files, groups them into packages, and gives the
//! checker the three capabilities it needs from a type checker:
//! type-of-expression ([`Typer`]), identifier → declaration resolution
//! ([`DeclIndex`]), and constant string folding ([`fold`]).

pub mod fold;
pub mod index;
pub mod language;
pub mod program;
pub mod typeck;
pub mod types;

pub use fold::{fold, Piece, SprintfMismatch, Template};
pub use index::{Decl, DeclIndex};
pub use language::{go_language, parse_go, SourceKind};
pub use program::{FileId, Package, Program, SourceFile};
pub use typeck::Typer;
pub use types::GoType;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use tree_sitter::Node;

/// A location in an analyzed source file (1-indexed line and column).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    pub file: PathBuf,
    pub line: usize,
    pub column: usize,
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file.display(), self.line, self.column)
    }
}

/// Named children of a node, skipping comments.
pub fn named_children<'a>(node: Node<'a>) -> Vec<Node<'a>> {
    let mut cursor = node.walk();
    node.named_children(&mut cursor)
        .filter(|child| child.kind() != "comment")
        .collect()
}

/// All children of a node with the given field name.
pub fn field_children<'a>(node: Node<'a>, field: &str) -> Vec<Node<'a>> {
    let mut cursor = node.walk();
    node.children_by_field_name(field, &mut cursor).collect()
}

/// Statements of a block or case clause.
///
/// Newer grammar versions wrap statements in a `statement_list` node; both
/// shapes are flattened here.
pub fn statements<'a>(node: Node<'a>) -> Vec<Node<'a>> {
    let mut out = Vec::new();
    for child in named_children(node) {
        if child.kind() == "statement_list" {
            out.extend(named_children(child));
        } else {
            out.push(child);
        }
    }
    out
}

/// Visit `node` and its named descendants in source order. Returning
/// `false` from `visit` skips that node's children.
pub fn inspect<'a>(node: Node<'a>, mut visit: impl FnMut(Node<'a>) -> bool) {
    let mut stack = vec![node];
    while let Some(current) = stack.pop() {
        if !visit(current) {
            continue;
        }
        let mut children = named_children(current);
        children.reverse();
        stack.extend(children);
    }
}

/// Expressions of an `expression_list`, or the node itself otherwise.
pub fn expression_list<'a>(node: Node<'a>) -> Vec<Node<'a>> {
    if node.kind() == "expression_list" {
        named_children(node)
    } else {
        vec![node]
    }
}

/// Arguments of a call expression.
pub fn call_args<'a>(call: Node<'a>) -> Vec<Node<'a>> {
    call.child_by_field_name("arguments")
        .map(named_children)
        .unwrap_or_default()
}

/// Strip parentheses around an expression.
pub fn unparen(mut node: Node<'_>) -> Node<'_> {
    while node.kind() == "parenthesized_expression" {
        match named_children(node).into_iter().next() {
            Some(inner) => node = inner,
            None => break,
        }
    }
    node
}

/// Unwrap a `literal_element` wrapper (present in newer grammars).
pub fn literal_element(node: Node<'_>) -> Node<'_> {
    if node.kind() == "literal_element" {
        if let Some(inner) = named_children(node).into_iter().next() {
            return inner;
        }
    }
    node
}

/// Decode a Go string literal (interpreted or raw).
pub fn unquote(text: &str) -> Option<String> {
    let text = text.trim();
    if text.len() >= 2 && text.starts_with('`') && text.ends_with('`') {
        return Some(text[1..text.len() - 1].replace('\r', ""));
    }
    if text.len() < 2 || !text.starts_with('"') || !text.ends_with('"') {
        return None;
    }
    let body = &text[1..text.len() - 1];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next()? {
            'n' => out.push('\n'),
            't' => out.push('\t'),
            'r' => out.push('\r'),
            'a' => out.push('\u{07}'),
            'b' => out.push('\u{08}'),
            'f' => out.push('\u{0c}'),
            'v' => out.push('\u{0b}'),
            '\\' => out.push('\\'),
            '"' => out.push('"'),
            '\'' => out.push('\''),
            'x' => {
                let hex: String = chars.by_ref().take(2).collect();
                out.push(u8::from_str_radix(&hex, 16).ok()? as char);
            }
            'u' => {
                let hex: String = chars.by_ref().take(4).collect();
                out.push(char::from_u32(u32::from_str_radix(&hex, 16).ok()?)?);
            }
            'U' => {
                let hex: String = chars.by_ref().take(8).collect();
                out.push(char::from_u32(u32::from_str_radix(&hex, 16).ok()?)?);
            }
            d @ '0'..='7' => {
                let rest: String = chars.by_ref().take(2).collect();
                let octal = format!("{}{}", d, rest);
                out.push(u8::from_str_radix(&octal, 8).ok()? as char);
            }
            _ => return None,
        }
    }
    Some(out)
}
