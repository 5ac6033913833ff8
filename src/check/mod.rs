//! Client/server parity verifier.
//!
//! Each package is analyzed on its own: server routes come from its route
//! tables, client calls from every call through a `jape.Client`. Both are
//! normalized, joined by key, and compared. Handlers are also checked for
//! paths that write two responses.
//!
//! ```text
//! Program ──► server::extract_routes ──┐
//!        └──► client::extract_calls ───┼──► parity::check_parity ──► Reporter
//!             flow::check_handler ─────┘
//! ```

pub mod client;
pub mod diagnostics;
pub mod flow;
pub mod parity;
pub mod route;
pub mod server;

pub use client::ClientOp;
pub use diagnostics::{render, Diagnostic, Format, Reporter};
pub use route::{normalize_client, normalize_server, ClientCall, NormalizedKey, ServerRoute};
pub use server::ContextOp;

use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use tracing::{debug, info};

use crate::config::CheckConfig;
use crate::error::{CheckError, Result};
use crate::parser::{DeclIndex, Package, Position, Program};

/// Outcome of checking a whole program.
#[derive(Debug, Default, Serialize)]
pub struct Report {
    /// Packages that declare a server.
    pub packages: usize,
    pub routes: usize,
    pub calls: usize,
    pub diagnostics: Vec<Diagnostic>,
}

impl Report {
    pub fn is_clean(&self) -> bool {
        self.diagnostics.is_empty()
    }
}

/// Check every package of `program`.
///
/// Packages without a route table are skipped. A package with a route
/// table but no client calls is a fatal [`CheckError::NoClientDefinition`].
pub fn check_program(program: &Program, config: &CheckConfig) -> Result<Report> {
    let index = DeclIndex::build(program);
    let mut reporter = Reporter::new();
    let mut report = Report::default();

    for package in program.packages() {
        let Some(stats) = check_package(&index, &package, config, &mut reporter)? else {
            debug!(package = %package.name, dir = %package.dir.display(), "no server routes");
            continue;
        };
        report.packages += 1;
        report.routes += stats.routes;
        report.calls += stats.calls;
    }

    report.diagnostics = reporter.finish();
    info!(
        packages = report.packages,
        routes = report.routes,
        calls = report.calls,
        diagnostics = report.diagnostics.len(),
        "check complete"
    );
    Ok(report)
}

struct PackageStats {
    routes: usize,
    calls: usize,
}

fn check_package(
    index: &DeclIndex<'_>,
    package: &Package,
    config: &CheckConfig,
    reporter: &mut Reporter,
) -> Result<Option<PackageStats>> {
    let jape = config.jape_package.as_str();
    let mut routes = server::extract_routes(index, &package.files, config, reporter);
    if !routes.defines_server() {
        return Ok(None);
    }
    if !client::defines_client(index, &package.files, jape) {
        return Err(CheckError::NoClientDefinition {
            package: package_label(package),
        });
    }
    let calls = client::extract_calls(index, &package.files, config, reporter);

    // a handler shared by several routes is checked once
    let mut checked = HashSet::new();
    for handler in &routes.handlers {
        if checked.insert((handler.file, handler.node.id())) {
            flow::check_handler(index, handler, jape, reporter);
        }
    }

    parity::check_parity(index, &mut routes.table, &calls, reporter);
    info!(
        package = %package.name,
        routes = routes.table.len(),
        calls = calls.len(),
        "package checked"
    );
    Ok(Some(PackageStats {
        routes: routes.table.len(),
        calls: calls.len(),
    }))
}

fn package_label(package: &Package) -> String {
    format!("{} ({})", package.name, package.dir.display())
}

// ─── Inventory ──────────────────────────────────────────────

/// A client call as listed by the `routes` command.
#[derive(Debug, Clone, Serialize)]
pub struct CallSummary {
    pub method: String,
    pub path: String,
    pub key: NormalizedKey,
    pub position: Position,
}

/// Extracted routes and calls of one package.
#[derive(Debug, Serialize)]
pub struct PackageRoutes {
    pub package: String,
    pub dir: PathBuf,
    pub routes: Vec<ServerRoute>,
    pub calls: Vec<CallSummary>,
}

/// List the server routes and client calls of every package that has
/// either. Diagnostics raised during extraction are returned alongside.
pub fn inventory(program: &Program, config: &CheckConfig) -> (Vec<PackageRoutes>, Vec<Diagnostic>) {
    let index = DeclIndex::build(program);
    let mut reporter = Reporter::new();
    let mut out = Vec::new();
    for package in program.packages() {
        let routes = server::extract_routes(&index, &package.files, config, &mut reporter);
        let calls = client::extract_calls(&index, &package.files, config, &mut reporter);
        if routes.table.is_empty() && calls.is_empty() {
            continue;
        }
        out.push(PackageRoutes {
            package: package.name.clone(),
            dir: package.dir.clone(),
            routes: routes.table.routes().to_vec(),
            calls: calls
                .iter()
                .map(|call| CallSummary {
                    method: call.method.clone(),
                    path: call.path.render(),
                    key: call.key(),
                    position: call.position.clone(),
                })
                .collect(),
        });
    }
    (out, reporter.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SERVER: &str = r#"package api

import "go.sia.tech/jape"

func (s *server) handleHello(jc jape.Context) {
	var greeting string
	if jc.Decode(&greeting) != nil {
		return
	}
	jc.Encode(greeting + ", " + jc.PathParam("name"))
}

type server struct{}

func NewServer() *jape.Router {
	s := &server{}
	return jape.Mux(map[string]jape.Handler{
		"POST /hello/:name": s.handleHello,
	})
}
"#;

    const CLIENT: &str = r#"package api

import "go.sia.tech/jape"

type Client struct {
	c jape.Client
}

func (c *Client) Hello(name, greeting string) (resp int, err error) {
	err = c.c.POST("/hello/"+name, greeting, &resp)
	return
}
"#;

    #[test]
    fn test_end_to_end_wrong_response() {
        let program = Program::from_sources(vec![
            ("api/client.go", CLIENT.to_string()),
            ("api/server.go", SERVER.to_string()),
        ])
        .unwrap();
        let report = check_program(&program, &CheckConfig::default()).unwrap();
        let messages: Vec<&str> = report
            .diagnostics
            .iter()
            .map(|d| d.message.as_str())
            .collect();
        assert_eq!(
            messages,
            vec!["Client has wrong response type for POST /hello/:name (got int, should be string)"]
        );
        assert_eq!(report.packages, 1);
        assert_eq!(report.routes, 1);
        assert_eq!(report.calls, 1);
        assert_eq!(report.diagnostics[0].position.line, 10);
    }

    #[test]
    fn test_fixed_client_is_clean() {
        let client = CLIENT.replace("resp int", "resp string");
        let program = Program::from_sources(vec![
            ("api/client.go", client),
            ("api/server.go", SERVER.to_string()),
        ])
        .unwrap();
        let report = check_program(&program, &CheckConfig::default()).unwrap();
        assert!(report.is_clean(), "{:?}", report.diagnostics);
    }

    #[test]
    fn test_server_without_client_is_fatal() {
        let program = Program::from_sources(vec![
            ("api/server.go", SERVER.to_string()),
            ("other/lib.go", "package other\n\nfunc f() {}\n".to_string()),
        ])
        .unwrap();
        let err = check_program(&program, &CheckConfig::default()).unwrap_err();
        assert!(matches!(err, CheckError::NoClientDefinition { ref package } if package.starts_with("api")));
    }

    #[test]
    fn test_packages_without_server_are_skipped() {
        let program = Program::from_sources(vec![("api/client.go", CLIENT.to_string())]).unwrap();
        let report = check_program(&program, &CheckConfig::default()).unwrap();
        assert_eq!(report.packages, 0);
        assert!(report.is_clean());
    }

    #[test]
    fn test_inventory() {
        let program = Program::from_sources(vec![
            ("api/client.go", CLIENT.to_string()),
            ("api/server.go", SERVER.to_string()),
        ])
        .unwrap();
        let (packages, diagnostics) = inventory(&program, &CheckConfig::default());
        assert!(diagnostics.is_empty());
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].routes[0].to_string(), "POST /hello/:name");
        assert_eq!(packages[0].calls[0].key.as_str(), "POST /hello/%s");
        assert_eq!(packages[0].calls[0].path, "/hello/%s");
    }

    fn messages(sources: Vec<(&str, &str)>) -> Vec<String> {
        let program = Program::from_sources(
            sources
                .into_iter()
                .map(|(path, src)| (path, src.to_string()))
                .collect(),
        )
        .unwrap();
        check_program(&program, &CheckConfig::default())
            .unwrap()
            .diagnostics
            .into_iter()
            .map(|d| d.message)
            .collect()
    }

    #[test]
    fn test_sibling_closures_keep_their_own_locals() {
        let server = r#"package api

import "go.sia.tech/jape"

type A struct{ X int }

type B struct{ Y string }

func Handler() *jape.Router {
	return jape.Mux(map[string]jape.Handler{
		"GET /a": func(jc jape.Context) {
			var v A
			jc.Encode(v)
		},
		"GET /b": func(jc jape.Context) {
			var v B
			jc.Encode(v)
		},
	})
}
"#;
        let client = r#"package api

import "go.sia.tech/jape"

type Client struct {
	c jape.Client
}

func (c *Client) A() (resp A, err error) {
	err = c.c.GET("/a", &resp)
	return
}

func (c *Client) B() (resp B, err error) {
	err = c.c.GET("/b", &resp)
	return
}
"#;
        assert_eq!(
            messages(vec![("api/client.go", client), ("api/server.go", server)]),
            Vec::<String>::new()
        );

        let swapped = client.replace("(resp A, err error)", "(resp B, err error)");
        assert_eq!(
            messages(vec![("api/client.go", &swapped), ("api/server.go", server)]),
            vec!["Client has wrong response type for GET /a (got api.B, should be api.A)"]
        );
    }

    #[test]
    fn test_same_package_name_in_other_directory() {
        let other = r#"package api

import "go.sia.tech/jape"

func handle(jc jape.Context) {
	jc.Encode(1)
}
"#;
        let server = r#"package api

import "go.sia.tech/jape"

func handle(jc jape.Context) {
	jc.Encode("s")
}

func Handler() *jape.Router {
	return jape.Mux(map[string]jape.Handler{
		"GET /x": handle,
	})
}
"#;
        let client = r#"package api

import "go.sia.tech/jape"

type Client struct {
	c jape.Client
}

func (c *Client) X() (resp string, err error) {
	err = c.c.GET("/x", &resp)
	return
}
"#;
        assert_eq!(
            messages(vec![
                ("a/api/other.go", other),
                ("b/api/client.go", client),
                ("b/api/server.go", server),
            ]),
            Vec::<String>::new()
        );
    }
}
