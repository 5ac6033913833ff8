//! Route-definition extractor.
//!
//! Finds `map[string]jape.Handler` literals, resolves each handler to its
//! body, and reconstructs the route's request, response and parameter
//! types from the `jape.Context` calls the body makes.

use tracing::debug;
use tree_sitter::Node;

use super::diagnostics::Reporter;
use super::route::{normalize_server, split_route_key, NormalizedKey, RouteTable, ServerRoute};
use crate::config::CheckConfig;
use crate::parser::{
    call_args, fold, inspect, literal_element, named_children, unparen, DeclIndex, FileId,
    GoType, Position, Typer,
};

/// Operations a handler can perform on its `jape.Context`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextOp {
    Custom,
    Decode,
    DecodeLimit,
    Encode,
    DecodeForm,
    DecodeParam,
    PathParam,
    Error,
    Check,
}

impl ContextOp {
    pub fn from_name(name: &str) -> Option<Self> {
        let op = match name {
            "Custom" => ContextOp::Custom,
            "Decode" => ContextOp::Decode,
            "DecodeLimit" => ContextOp::DecodeLimit,
            "Encode" => ContextOp::Encode,
            "DecodeForm" => ContextOp::DecodeForm,
            "DecodeParam" => ContextOp::DecodeParam,
            "PathParam" => ContextOp::PathParam,
            "Error" => ContextOp::Error,
            "Check" => ContextOp::Check,
            _ => return None,
        };
        Some(op)
    }

    /// Whether the operation can write a response.
    pub fn is_write(self) -> bool {
        match self {
            ContextOp::Error
            | ContextOp::Check
            | ContextOp::Decode
            | ContextOp::DecodeLimit
            | ContextOp::DecodeParam
            | ContextOp::DecodeForm
            | ContextOp::Encode => true,
            ContextOp::Custom | ContextOp::PathParam => false,
        }
    }
}

/// A `ctx.Op(args...)` call on a `jape.Context` value.
#[derive(Debug, Clone)]
pub struct ContextCall<'a> {
    pub op: ContextOp,
    pub call: Node<'a>,
    pub args: Vec<Node<'a>>,
}

/// Recognize `call` as a context operation.
pub fn context_call<'a>(typer: &Typer<'_, 'a>, call: Node<'a>, jape: &str) -> Option<ContextCall<'a>> {
    if call.kind() != "call_expression" {
        return None;
    }
    let func = call.child_by_field_name("function")?;
    if func.kind() != "selector_expression" {
        return None;
    }
    let op = ContextOp::from_name(typer.text(func.child_by_field_name("field")?))?;
    let operand = func.child_by_field_name("operand")?;
    if !typer.type_of(operand).is_named_through_ptr(jape, "Context") {
        return None;
    }
    Some(ContextCall {
        op,
        call,
        args: call_args(call),
    })
}

/// A resolved handler: a function declaration, method or literal.
#[derive(Debug, Clone, Copy)]
pub struct Handler<'a> {
    pub file: FileId,
    pub node: Node<'a>,
    pub body: Node<'a>,
}

/// Output of route extraction for one package.
#[derive(Debug, Default)]
pub struct ServerRoutes<'a> {
    /// Number of route table literals found.
    pub tables: usize,
    pub table: RouteTable,
    /// Every handler that resolved, in route-table order.
    pub handlers: Vec<Handler<'a>>,
}

impl ServerRoutes<'_> {
    /// Whether the files declare a server at all.
    pub fn defines_server(&self) -> bool {
        self.tables > 0
    }
}

/// Route tables declared in `files`: composite literals of type
/// `map[string]<jape>.Handler`.
pub fn route_tables<'a>(index: &DeclIndex<'a>, files: &[FileId], jape: &str) -> Vec<(FileId, Node<'a>)> {
    let handler_map = GoType::Map(
        Box::new(GoType::string()),
        Box::new(GoType::named(jape, "Handler")),
    );
    let mut tables = Vec::new();
    for &id in files {
        let file = index.program().file(id);
        inspect(file.tree.root_node(), |node| {
            if node.kind() != "composite_literal" {
                return true;
            }
            let is_table = node
                .child_by_field_name("type")
                .is_some_and(|ty| GoType::from_node(ty, file) == handler_map);
            if is_table {
                tables.push((id, node));
            }
            true
        });
    }
    tables
}

/// Extract every server route declared in `files`.
pub fn extract_routes<'a>(
    index: &DeclIndex<'a>,
    files: &[FileId],
    config: &CheckConfig,
    reporter: &mut Reporter,
) -> ServerRoutes<'a> {
    let tables = route_tables(index, files, &config.jape_package);
    let mut out = ServerRoutes {
        tables: tables.len(),
        ..ServerRoutes::default()
    };
    for (file, table) in tables {
        let typer = Typer::enclosing(index, file, table);
        let Some(body) = table.child_by_field_name("body") else {
            continue;
        };
        for element in named_children(body) {
            let element = literal_element(element);
            if element.kind() != "keyed_element" {
                continue;
            }
            let parts: Vec<Node<'a>> = named_children(element)
                .into_iter()
                .map(literal_element)
                .collect();
            let [key, value] = parts[..] else {
                continue;
            };
            let mut extractor = RouteExtractor {
                index,
                config,
                reporter: &mut *reporter,
            };
            match extractor.route(&typer, key, value) {
                Outcome::Accepted(route, handler) => {
                    out.handlers.push(handler);
                    let position = route.position.clone();
                    let label = route.to_string();
                    if out.table.insert(route).is_err() {
                        reporter.report(
                            position,
                            format!("Server defines route {} multiple times", label),
                        );
                    }
                }
                Outcome::Rejected(key, position, handler) => {
                    out.handlers.extend(handler);
                    out.table.reject(key, position);
                }
                Outcome::Invalid => {}
            }
        }
    }
    debug!(routes = out.table.len(), "server routes extracted");
    out
}

enum Outcome<'a> {
    Accepted(ServerRoute, Handler<'a>),
    /// Key parsed, route excluded; client calls to it are not reported.
    Rejected(NormalizedKey, Position, Option<Handler<'a>>),
    Invalid,
}

/// Marker for "report already made, stop extracting this route".
struct Abort;

struct RouteExtractor<'i, 'a, 'r> {
    index: &'i DeclIndex<'a>,
    config: &'r CheckConfig,
    reporter: &'r mut Reporter,
}

/// Types recorded while walking one handler.
struct Recorded {
    route: ServerRoute,
    request: Option<GoType>,
    response: Option<GoType>,
}

impl<'i, 'a, 'r> RouteExtractor<'i, 'a, 'r> {
    fn route(&mut self, typer: &Typer<'i, 'a>, key: Node<'a>, value: Node<'a>) -> Outcome<'a> {
        let source = typer.source();
        let position = source.position(key);
        let rendered = fold(typer, key).render();
        let Some((method, path)) = split_route_key(&rendered) else {
            let fields: Vec<&str> = rendered.split_whitespace().collect();
            self.reporter.report(
                position,
                format!("Server defines invalid route: {:?}", fields),
            );
            return Outcome::Invalid;
        };
        let path = path
            .strip_prefix(self.config.server_prefix.as_str())
            .unwrap_or(path);
        let route = ServerRoute::new(method, path, position.clone());
        let key = normalize_server(method, path);

        let Some(handler) = self.resolve_handler(typer, value) else {
            self.reporter
                .report(position.clone(), "Could not locate handler definition");
            return Outcome::Rejected(key, position, None);
        };

        let mut recorded = Recorded {
            route,
            request: None,
            response: None,
        };
        match self.walk_handler(handler, &mut recorded) {
            Ok(()) => Outcome::Accepted(recorded.route, handler),
            Err(Abort) => Outcome::Rejected(key, position, Some(handler)),
        }
    }

    /// Resolve a handler expression: a func literal, a function name, or a
    /// `recv.Method` / `pkg.Func` selector.
    fn resolve_handler(&self, typer: &Typer<'i, 'a>, value: Node<'a>) -> Option<Handler<'a>> {
        let value = unparen(value);
        let package = &typer.source().package;
        let decl = match value.kind() {
            "func_literal" => {
                return Some(Handler {
                    file: typer.file(),
                    node: value,
                    body: value.child_by_field_name("body")?,
                })
            }
            "identifier" => self.index.func(typer.file(), package, typer.text(value))?,
            "selector_expression" => {
                let operand = value.child_by_field_name("operand")?;
                let name = typer.text(value.child_by_field_name("field")?);
                if let Some(pkg) = typer.import_of(operand) {
                    self.index.func(typer.file(), pkg, name)?
                } else {
                    let by_type = match typer.type_of(operand).elem() {
                        GoType::Named {
                            package: Some(pkg),
                            name: recv,
                        } => self.index.method(typer.file(), &pkg, &recv, name),
                        _ => None,
                    };
                    by_type.or_else(|| self.index.unique_method(typer.file(), package, name))?
                }
            }
            _ => return None,
        };
        Some(Handler {
            file: decl.file,
            node: decl.node,
            body: decl.node.child_by_field_name("body")?,
        })
    }

    fn walk_handler(&mut self, handler: Handler<'a>, recorded: &mut Recorded) -> Result<(), Abort> {
        let typer = Typer::enclosing(self.index, handler.file, handler.node);
        let jape = self.config.jape_package.clone();
        let mut calls = Vec::new();
        inspect(handler.body, |node| {
            if let Some(call) = context_call(&typer, node, &jape) {
                calls.push(call);
            }
            true
        });
        for call in calls {
            self.apply(&typer, &call, recorded)?;
        }

        let route = &mut recorded.route;
        route.request = recorded.request.take().unwrap_or(GoType::UntypedNil);
        route.response = recorded.response.take().unwrap_or(GoType::UntypedNil);
        let body_pos = typer.source().position(handler.body);
        match route.method.as_str() {
            "GET" if route.response.is_nil() => {
                self.shape(body_pos, "GET", "should write a response object")
            }
            "PUT" if route.request.is_nil() => {
                self.shape(body_pos, "PUT", "should read a request object")
            }
            _ => Ok(()),
        }
    }

    fn shape(&mut self, position: Position, method: &str, rule: &str) -> Result<(), Abort> {
        self.reporter
            .report(position, format!("{} routes {}", method, rule));
        Err(Abort)
    }

    fn apply(&mut self, typer: &Typer<'i, 'a>, call: &ContextCall<'a>, recorded: &mut Recorded) -> Result<(), Abort> {
        let source = typer.source();
        let at = |node: Node<'_>| source.position(node);
        let method = recorded.route.method.clone();
        let args = &call.args;

        match call.op {
            ContextOp::Custom => {
                let [req, resp, ..] = args[..] else {
                    return Ok(());
                };
                let req_ty = typer.type_of(req);
                let resp_ty = typer.type_of(resp);
                if !req_ty.is_nil() && !req_ty.is_unknown() && !req_ty.is_pointer() {
                    self.reporter.report(at(req), "request type must be a pointer");
                    return Err(Abort);
                }
                let reads = !req_ty.is_nil();
                let writes = !resp_ty.is_nil();
                match method.as_str() {
                    "GET" if reads => self.shape(at(req), &method, "should not read a request object")?,
                    "GET" if !writes => self.shape(at(req), &method, "should write a response object")?,
                    "PUT" if !reads => self.shape(at(req), &method, "should read a request object")?,
                    "PUT" if writes => self.shape(at(resp), &method, "should not write a response object")?,
                    "DELETE" if reads => self.shape(at(req), &method, "should not read a request object")?,
                    "DELETE" if writes => self.shape(at(resp), &method, "should not write a response object")?,
                    _ => {}
                }
                recorded.request = Some(req_ty);
                recorded.response = Some(resp_ty);
            }
            ContextOp::Decode | ContextOp::DecodeLimit => {
                if matches!(method.as_str(), "GET" | "DELETE") {
                    self.shape(at(call.call), &method, "should not read a request object")?;
                }
                let Some(&arg) = args.first() else {
                    return Ok(());
                };
                let ty = typer.type_of(arg);
                if !ty.is_unknown() && !ty.is_pointer() {
                    self.reporter.report(at(arg), "Decode called on non-pointer value");
                    return Ok(());
                }
                if let Some(prev) = &recorded.request {
                    if conflicts(prev, &ty) {
                        self.reporter.report(
                            at(arg),
                            format!("Decode called on {}, but was previously called on {}", ty, prev),
                        );
                        return Ok(());
                    }
                }
                record(&mut recorded.request, ty);
            }
            ContextOp::Encode => {
                if matches!(method.as_str(), "PUT" | "DELETE") {
                    self.shape(at(call.call), &method, "should not write a response object")?;
                }
                let Some(&arg) = args.first() else {
                    return Ok(());
                };
                let ty = typer.type_of(arg);
                if let Some(prev) = &recorded.response {
                    if conflicts(prev, &ty) {
                        self.reporter.report(
                            at(arg),
                            format!("Encode called on {}, but was previously called on {}", ty, prev),
                        );
                        return Ok(());
                    }
                }
                record(&mut recorded.response, ty);
            }
            ContextOp::DecodeForm => {
                let [name, value, ..] = args[..] else {
                    return Ok(());
                };
                let Some(name) = const_name(typer, name) else {
                    return Ok(());
                };
                let ty = typer.type_of(value);
                let params = &mut recorded.route.query_params;
                match params.get(&name).cloned() {
                    Some(prev) if conflicts(&prev, &ty) => {
                        let message = format!(
                            "form value {:?} decoded as {}, but was previously decoded as {}",
                            name, ty, prev
                        );
                        self.reporter.report(at(call.call), message);
                    }
                    Some(prev) if !prev.contains_unknown() => {}
                    _ => {
                        params.insert(name, ty);
                    }
                }
            }
            ContextOp::DecodeParam => {
                let [name_node, value, ..] = args[..] else {
                    return Ok(());
                };
                let Some(name) = const_name(typer, name_node) else {
                    return Ok(());
                };
                let ty = typer.type_of(value);
                let Some(param) = recorded.route.param_mut(&name) else {
                    self.reporter.report(
                        at(name_node),
                        format!(
                            "DecodeParam called on param ({:?}) not present in route definition",
                            name
                        ),
                    );
                    return Ok(());
                };
                if let Some(prev) = &param.ty {
                    if conflicts(prev, &ty) {
                        let message = format!(
                            "param {:?} decoded as {}, but was previously decoded as {}",
                            name, ty, prev
                        );
                        self.reporter.report(at(value), message);
                        return Ok(());
                    }
                }
                if !ty.is_unknown() && !ty.is_pointer() {
                    self.reporter
                        .report(at(value), "DecodeParam called on non-pointer value");
                    return Ok(());
                }
                record(&mut param.ty, ty);
            }
            ContextOp::PathParam => {
                let Some(&name_node) = args.first() else {
                    return Ok(());
                };
                let Some(name) = const_name(typer, name_node) else {
                    return Ok(());
                };
                let ty = GoType::pointer_to(GoType::string());
                let Some(param) = recorded.route.param_mut(&name) else {
                    self.reporter.report(
                        at(name_node),
                        format!(
                            "PathParam called on param ({:?}) not present in route definition",
                            name
                        ),
                    );
                    return Ok(());
                };
                if let Some(prev) = &param.ty {
                    if conflicts(prev, &ty) {
                        let message = format!(
                            "param {:?} decoded as {}, but was previously decoded as {}",
                            name, ty, prev
                        );
                        self.reporter.report(at(call.call), message);
                        return Ok(());
                    }
                }
                record(&mut param.ty, ty);
            }
            ContextOp::Error | ContextOp::Check => {}
        }
        Ok(())
    }
}

/// Two known types that differ. Unknown types never conflict.
fn conflicts(prev: &GoType, next: &GoType) -> bool {
    !prev.contains_unknown() && !next.contains_unknown() && !prev.identical(next)
}

/// Store `ty` unless a fully known type is already recorded.
fn record(slot: &mut Option<GoType>, ty: GoType) {
    match slot {
        Some(prev) if !prev.contains_unknown() => {}
        _ => *slot = Some(ty),
    }
}

/// A parameter name argument that folds to plain text.
fn const_name(typer: &Typer<'_, '_>, node: Node<'_>) -> Option<String> {
    let template = fold(typer, node);
    if template.holes() > 0 {
        debug!(expr = typer.text(node), "parameter name is not constant");
        return None;
    }
    Some(template.render())
}
