//! Route model shared by both extractors, and the normalizer that joins them.
//!
//! A server route `GET /foo/:id/bar` and a client call
//! `GET(fmt.Sprintf("/foo/%v/bar", id), ...)` both normalize to the key
//! `GET /foo/%s/bar`; that key is the only thing the parity checker joins on.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tree_sitter::Node;

use crate::parser::{FileId, GoType, Piece, Position, Template};

/// Placeholder that every parameter segment collapses to.
pub const WILDCARD: &str = "%s";

/// Join key of a server route and a client call.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NormalizedKey(String);

impl NormalizedKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NormalizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalize a server route path: `:name` and `*name` segments become `%s`.
pub fn normalize_server(method: &str, path: &str) -> NormalizedKey {
    let segments: Vec<&str> = path
        .split('/')
        .map(|seg| {
            if seg.starts_with(':') || seg.starts_with('*') {
                WILDCARD
            } else {
                seg
            }
        })
        .collect();
    NormalizedKey(format!("{} {}", method, segments.join("/")))
}

/// Normalize a rendered client path: the query string is dropped and any
/// segment starting with a format verb becomes `%s`.
pub fn normalize_client(method: &str, path: &str) -> NormalizedKey {
    let path = path.split('?').next().unwrap_or(path);
    let segments: Vec<&str> = path
        .split('/')
        .map(|seg| {
            if seg.len() > 1 && seg.starts_with('%') {
                WILDCARD
            } else {
                seg
            }
        })
        .collect();
    NormalizedKey(format!("{} {}", method, segments.join("/")))
}

/// Split a `"METHOD /path"` route key into its two fields.
pub fn split_route_key(key: &str) -> Option<(&str, &str)> {
    let mut fields = key.split_whitespace();
    match (fields.next(), fields.next(), fields.next()) {
        (Some(method), Some(path), None) => Some((method, path)),
        _ => None,
    }
}

// ─── Server Side ────────────────────────────────────────────

/// A path parameter declared by a server route.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServerParam {
    pub name: String,
    /// Type the handler decodes the parameter into; `None` until used.
    #[serde(rename = "type")]
    pub ty: Option<GoType>,
}

/// One entry of a server route table, reconstructed from its handler.
#[derive(Debug, Clone, Serialize)]
pub struct ServerRoute {
    pub method: String,
    /// Path template with the server prefix removed.
    pub path: String,
    pub path_params: Vec<ServerParam>,
    pub query_params: BTreeMap<String, GoType>,
    /// Pointer type the handler decodes into, or `UntypedNil`.
    pub request: GoType,
    /// Type the handler encodes, or `UntypedNil`.
    pub response: GoType,
    #[serde(skip)]
    pub seen: bool,
    /// Position of the route key in the route table.
    pub position: Position,
}

impl ServerRoute {
    /// A route with no recorded types yet.
    pub fn new(method: &str, path: &str, position: Position) -> Self {
        let path_params = path
            .split('/')
            .filter(|seg| seg.starts_with(':') || seg.starts_with('*'))
            .map(|seg| ServerParam {
                name: seg[1..].to_string(),
                ty: None,
            })
            .collect();
        Self {
            method: method.to_string(),
            path: path.to_string(),
            path_params,
            query_params: BTreeMap::new(),
            request: GoType::UntypedNil,
            response: GoType::UntypedNil,
            seen: false,
            position,
        }
    }

    pub fn key(&self) -> NormalizedKey {
        normalize_server(&self.method, &self.path)
    }

    pub fn param_mut(&mut self, name: &str) -> Option<&mut ServerParam> {
        self.path_params.iter_mut().find(|p| p.name == name)
    }
}

impl fmt::Display for ServerRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path)
    }
}

/// Server routes of one package, keyed by normalized key.
#[derive(Debug, Default)]
pub struct RouteTable {
    routes: Vec<ServerRoute>,
    by_key: BTreeMap<NormalizedKey, usize>,
    /// Keys whose declaration was rejected during extraction.
    rejected: BTreeMap<NormalizedKey, Position>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a route. Returns the already-present route if its key is taken.
    pub fn insert(&mut self, route: ServerRoute) -> Result<(), &ServerRoute> {
        let key = route.key();
        if let Some(&i) = self.by_key.get(&key) {
            return Err(&self.routes[i]);
        }
        self.by_key.insert(key, self.routes.len());
        self.routes.push(route);
        Ok(())
    }

    pub fn reject(&mut self, key: NormalizedKey, position: Position) {
        self.rejected.entry(key).or_insert(position);
    }

    pub fn is_rejected(&self, key: &NormalizedKey) -> bool {
        self.rejected.contains_key(key)
    }

    pub fn get_mut(&mut self, key: &NormalizedKey) -> Option<&mut ServerRoute> {
        let i = *self.by_key.get(key)?;
        self.routes.get_mut(i)
    }

    pub fn routes(&self) -> &[ServerRoute] {
        &self.routes
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

// ─── Client Side ────────────────────────────────────────────

/// A call through a client handle, with its path folded into a template.
#[derive(Debug, Clone)]
pub struct ClientCall<'a> {
    pub method: String,
    pub path: Template<'a>,
    /// Expressions filling the path holes, in order (`None` when unbound).
    pub path_params: Vec<Option<Node<'a>>>,
    /// Query keys and the expressions filling them, in template order.
    pub query_params: Vec<(String, Option<Node<'a>>)>,
    pub request: Option<Node<'a>>,
    pub response: Option<Node<'a>>,
    pub file: FileId,
    /// The call expression itself.
    pub node: Node<'a>,
    pub position: Position,
}

impl ClientCall<'_> {
    pub fn key(&self) -> NormalizedKey {
        normalize_client(&self.method, &self.path.render())
    }
}

impl fmt::Display for ClientCall<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.method, self.path.render())
    }
}

/// Parameters bound by a client path template.
#[derive(Debug, Default)]
pub struct TemplateParams<'a> {
    pub path: Vec<Option<Node<'a>>>,
    pub query: Vec<(String, Option<Node<'a>>)>,
}

/// Assign each hole of `template` to a path or query slot. Holes before the
/// `?` are positional path parameters; holes after it are query values
/// keyed by the `key=` text right before them. A query hole without a key
/// binds nothing.
pub fn template_params<'a>(template: &Template<'a>) -> TemplateParams<'a> {
    let mut params = TemplateParams::default();
    let mut in_query = false;
    let mut pending_key: Option<String> = None;
    for piece in &template.pieces {
        match piece {
            Piece::Lit(text) => {
                let text = if in_query {
                    text.as_str()
                } else if let Some(i) = text.find('?') {
                    in_query = true;
                    &text[i + 1..]
                } else {
                    pending_key = None;
                    continue;
                };
                let last = text.rsplit('&').next().unwrap_or(text);
                pending_key = last
                    .strip_suffix('=')
                    .filter(|key| !key.is_empty() && !key.contains('='))
                    .map(str::to_string);
            }
            Piece::Hole(node) if !in_query => params.path.push(*node),
            Piece::Hole(node) => {
                if let Some(key) = pending_key.take() {
                    params.query.push((key, *node));
                }
            }
        }
    }
    params
}

/// Count the holes before and after the query separator.
pub fn count_holes(template: &Template<'_>) -> (usize, usize) {
    let mut in_query = false;
    let (mut path, mut form) = (0, 0);
    for piece in &template.pieces {
        match piece {
            Piece::Lit(text) if text.contains('?') => in_query = true,
            Piece::Lit(_) => {}
            Piece::Hole(_) if in_query => form += 1,
            Piece::Hole(_) => path += 1,
        }
    }
    (path, form)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::{fold, DeclIndex, Program, Typer};
    use std::path::PathBuf;

    fn pos() -> Position {
        Position {
            file: PathBuf::from("api/server.go"),
            line: 1,
            column: 1,
        }
    }

    #[test]
    fn test_normalize_round_trip() {
        let server = normalize_server("GET", "/foo/:bar/baz");
        let client = normalize_client("GET", "/foo/%s/baz");
        assert_eq!(server.as_str(), "GET /foo/%s/baz");
        assert_eq!(server, client);
        assert_eq!(
            normalize_client("GET", "/foo/%d/baz?limit=%d"),
            normalize_server("GET", "/foo/*rest/baz")
        );
    }

    #[test]
    fn test_distinct_server_routes_stay_distinct() {
        assert_ne!(
            normalize_server("GET", "/foo/:id"),
            normalize_server("POST", "/foo/:id")
        );
        assert_ne!(
            normalize_server("GET", "/foo/:id"),
            normalize_server("GET", "/foo/:id/bar")
        );
        assert_ne!(
            normalize_server("GET", "/foo/all"),
            normalize_server("GET", "/foo/:id")
        );
    }

    #[test]
    fn test_split_route_key() {
        assert_eq!(split_route_key("GET /foo"), Some(("GET", "/foo")));
        assert_eq!(split_route_key("  PUT\t/foo/:id "), Some(("PUT", "/foo/:id")));
        assert_eq!(split_route_key("/foo"), None);
        assert_eq!(split_route_key("GET /foo extra"), None);
    }

    #[test]
    fn test_server_route_params() {
        let route = ServerRoute::new("GET", "/obj/:id/*path", pos());
        let names: Vec<&str> = route.path_params.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["id", "path"]);
        assert!(route.request.is_nil());
        assert_eq!(route.to_string(), "GET /obj/:id/*path");
    }

    #[test]
    fn test_route_table_keeps_first() {
        let mut table = RouteTable::new();
        assert!(table.insert(ServerRoute::new("GET", "/a/:id", pos())).is_ok());
        let dup = table.insert(ServerRoute::new("GET", "/a/:name", pos()));
        assert_eq!(dup.unwrap_err().path, "/a/:id");
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_template_params() {
        let src = "package api\n\nimport \"fmt\"\n\nfunc f(id string, n int, o int) {\n\tuse(fmt.Sprintf(\"/obj/%s/items?limit=%d&offset=%d&sort=asc\", id, n, o))\n}\n";
        let program = Program::from_sources(vec![("api/client.go", src.to_string())]).unwrap();
        let index = DeclIndex::build(&program);
        let decl = index.func(FileId(0), "api", "f").unwrap();
        let typer = Typer::enclosing(&index, decl.file, decl.node);

        let mut stack = vec![decl.node];
        let mut sprintf = None;
        while let Some(node) = stack.pop() {
            if node.kind() == "call_expression" && typer.text(node).starts_with("fmt.") {
                sprintf = Some(node);
                break;
            }
            stack.extend(crate::parser::named_children(node));
        }
        let template = fold(&typer, sprintf.unwrap());
        let params = template_params(&template);
        assert_eq!(params.path.len(), 1);
        let keys: Vec<&str> = params.query.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["limit", "offset"]);
        assert_eq!(typer.text(params.query[1].1.unwrap()), "o");
        assert_eq!(count_holes(&template), (1, 2));
    }
}
