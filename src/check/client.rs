//! Route-call extractor.
//!
//! Finds calls made through a `jape.Client` (value or pointer) and folds
//! their path argument into a [`Template`], binding each hole to the path
//! or query slot it fills.

use tracing::debug;
use tree_sitter::Node;

use super::diagnostics::Reporter;
use super::route::{count_holes, template_params, ClientCall};
use crate::config::CheckConfig;
use crate::parser::{call_args, fold, inspect, named_children, DeclIndex, FileId, Template, Typer};

/// Request methods of `jape.Client`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientOp {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Custom,
}

impl ClientOp {
    pub fn from_name(name: &str) -> Option<Self> {
        let op = match name {
            "GET" => ClientOp::Get,
            "POST" => ClientOp::Post,
            "PUT" => ClientOp::Put,
            "DELETE" => ClientOp::Delete,
            "PATCH" => ClientOp::Patch,
            "Custom" => ClientOp::Custom,
            _ => return None,
        };
        Some(op)
    }

    /// Argument count, not counting a leading `context.Context`.
    pub fn arity(self) -> usize {
        match self {
            ClientOp::Get => 2,
            ClientOp::Post | ClientOp::Patch => 3,
            ClientOp::Put => 2,
            ClientOp::Delete => 1,
            ClientOp::Custom => 4,
        }
    }

    /// HTTP method implied by the call name; `Custom` takes it as an argument.
    pub fn method(self) -> Option<&'static str> {
        match self {
            ClientOp::Get => Some("GET"),
            ClientOp::Post => Some("POST"),
            ClientOp::Put => Some("PUT"),
            ClientOp::Delete => Some("DELETE"),
            ClientOp::Patch => Some("PATCH"),
            ClientOp::Custom => None,
        }
    }
}

/// Whether any file makes a call through a client handle.
pub fn defines_client(index: &DeclIndex<'_>, files: &[FileId], jape: &str) -> bool {
    files.iter().any(|&id| {
        let mut found = false;
        each_client_call(index, id, jape, |_, _, _| found = true);
        found
    })
}

/// Extract client calls from `files`, in file then source order.
pub fn extract_calls<'a>(
    index: &DeclIndex<'a>,
    files: &[FileId],
    config: &CheckConfig,
    reporter: &mut Reporter,
) -> Vec<ClientCall<'a>> {
    let mut calls = Vec::new();
    for &id in files {
        each_client_call(index, id, &config.jape_package, |typer, op, call| {
            if let Some(parsed) = parse_call(typer, op, call, config, reporter) {
                calls.push(parsed);
            }
        });
    }
    debug!(calls = calls.len(), "client calls extracted");
    calls
}

/// Visit every client call in a file, with a typer scoped to its function.
fn each_client_call<'a>(
    index: &DeclIndex<'a>,
    file: FileId,
    jape: &str,
    mut visit: impl FnMut(&Typer<'_, 'a>, ClientOp, Node<'a>),
) {
    let source = index.program().file(file);
    for decl in named_children(source.tree.root_node()) {
        let typer = Typer::enclosing(index, file, decl);
        inspect(decl, |node| {
            if let Some(op) = client_op(&typer, node, jape) {
                visit(&typer, op, node);
            }
            true
        });
    }
}

fn client_op(typer: &Typer<'_, '_>, node: Node<'_>, jape: &str) -> Option<ClientOp> {
    if node.kind() != "call_expression" {
        return None;
    }
    let func = node.child_by_field_name("function")?;
    if func.kind() != "selector_expression" {
        return None;
    }
    let op = ClientOp::from_name(typer.text(func.child_by_field_name("field")?))?;
    let operand = func.child_by_field_name("operand")?;
    typer
        .type_of(operand)
        .is_named_through_ptr(jape, "Client")
        .then_some(op)
}

fn parse_call<'a>(
    typer: &Typer<'_, 'a>,
    op: ClientOp,
    call: Node<'a>,
    config: &CheckConfig,
    reporter: &mut Reporter,
) -> Option<ClientCall<'a>> {
    let source = typer.source();
    let mut args = call_args(call);
    if args.len() == op.arity() + 1 {
        args.remove(0);
    }
    if args.len() != op.arity() {
        debug!(call = typer.text(call), "client call with unexpected arguments");
        return None;
    }

    let (method, path_arg, request, response) = match op {
        ClientOp::Custom => {
            let method = fold(typer, args[0]);
            if method.holes() > 0 {
                debug!(call = typer.text(call), "Custom method is not constant");
                return None;
            }
            (method.render(), args[1], Some(args[2]), Some(args[3]))
        }
        ClientOp::Get => ("GET".to_string(), args[0], None, Some(args[1])),
        ClientOp::Post | ClientOp::Patch => {
            let method = op.method().unwrap_or_default().to_string();
            (method, args[0], Some(args[1]), Some(args[2]))
        }
        ClientOp::Put => ("PUT".to_string(), args[0], Some(args[1]), None),
        ClientOp::Delete => ("DELETE".to_string(), args[0], None, None),
    };

    let mut path: Template<'a> = fold(typer, path_arg);
    if let Some(mismatch) = path.mismatch {
        let (n_path, n_form) = count_holes(&path);
        reporter.report(
            source.position(mismatch.call),
            format!(
                "route contains ({} path + {} form) = {} parameters, but only {} arguments are supplied",
                n_path,
                n_form,
                n_path + n_form,
                mismatch.supplied
            ),
        );
        return None;
    }
    path.trim_prefix(&config.client_prefix);
    let params = template_params(&path);

    Some(ClientCall {
        method,
        path,
        path_params: params.path,
        query_params: params.query,
        request,
        response,
        file: typer.file(),
        node: call,
        position: source.position(call),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Program;

    const CLIENT: &str = r#"package api

import (
	"context"
	"fmt"

	"go.sia.tech/jape"
)

const objRoute = "/obj/"

type Obj struct{}

type Client struct {
	c jape.Client
}

func (c *Client) Obj(ctx context.Context, id string) (resp Obj, err error) {
	err = c.c.GET(ctx, objRoute+id, &resp)
	return
}

func (c *Client) Objects(limit, offset int) (resp []Obj, err error) {
	err = c.c.GET(fmt.Sprintf("/api/objects?limit=%d&offset=%d", limit, offset), &resp)
	return
}

func (c *Client) Put(o Obj) error {
	return c.c.PUT("/obj", o)
}

func (c *Client) Raw(id string) {
	c.c.Custom("POST", "/raw/"+id, (*Obj)(nil), nil)
}

func (c *Client) Broken(id string) error {
	return c.c.DELETE(fmt.Sprintf("/obj/%s/%s", id))
}

func (c *Client) NotAClient(x fakeClient) {
	x.GET("/nope", nil)
}
"#;

    fn calls(config: &CheckConfig) -> (Vec<String>, Vec<String>) {
        let program = Program::from_sources(vec![("api/client.go", CLIENT.to_string())]).unwrap();
        let index = DeclIndex::build(&program);
        let files: Vec<FileId> = program.file_ids().collect();
        let mut reporter = Reporter::new();
        let calls = extract_calls(&index, &files, config, &mut reporter);
        let keys = calls.iter().map(|c| c.key().to_string()).collect();
        let messages = reporter.finish().into_iter().map(|d| d.message).collect();
        (keys, messages)
    }

    #[test]
    fn test_client_op_arity() {
        assert_eq!(ClientOp::from_name("PATCH"), Some(ClientOp::Patch));
        assert_eq!(ClientOp::Patch.arity(), 3);
        assert_eq!(ClientOp::Custom.method(), None);
        assert_eq!(ClientOp::from_name("Get"), None);
    }

    #[test]
    fn test_extract_calls() {
        let config = CheckConfig {
            client_prefix: "/api".into(),
            ..CheckConfig::default()
        };
        let (keys, messages) = calls(&config);
        assert_eq!(
            keys,
            vec!["GET /obj/%s", "GET /objects", "PUT /obj", "POST /raw/%s"]
        );
        assert_eq!(
            messages,
            vec!["route contains (2 path + 0 form) = 2 parameters, but only 1 arguments are supplied"]
        );
    }

    #[test]
    fn test_call_params() {
        let program = Program::from_sources(vec![("api/client.go", CLIENT.to_string())]).unwrap();
        let index = DeclIndex::build(&program);
        let files: Vec<FileId> = program.file_ids().collect();
        let mut reporter = Reporter::new();
        let calls = extract_calls(&index, &files, &CheckConfig::default(), &mut reporter);
        let source = program.file(FileId(0));

        let obj = &calls[0];
        assert_eq!(obj.path_params.len(), 1);
        assert_eq!(source.text(obj.path_params[0].unwrap()), "id");
        assert_eq!(source.text(obj.response.unwrap()), "&resp");
        assert!(obj.request.is_none());

        let objects = &calls[1];
        assert!(objects.path_params.is_empty());
        let keys: Vec<&str> = objects.query_params.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, vec!["limit", "offset"]);

        let raw = &calls[3];
        assert_eq!(raw.method, "POST");
        assert_eq!(source.text(raw.request.unwrap()), "(*Obj)(nil)");
    }

    #[test]
    fn test_defines_client() {
        let program = Program::from_sources(vec![
            ("api/client.go", CLIENT.to_string()),
            ("api/other.go", "package api\n\nfunc f() {}\n".to_string()),
        ])
        .unwrap();
        let index = DeclIndex::build(&program);
        assert!(defines_client(&index, &[FileId(0)], "jape"));
        assert!(!defines_client(&index, &[FileId(1)], "jape"));
    }
}
