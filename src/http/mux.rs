//! Routing from a `"METHOD /path"` keyed table.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use axum::response::{IntoResponse, Response};
use axum::routing::{MethodFilter, MethodRouter};
use axum::Router;
use tracing::debug;

use super::context::Context;
use super::error::RouteError;

type BoxFuture = Pin<Box<dyn Future<Output = Response> + Send>>;

/// A type-erased request handler.
#[derive(Clone)]
pub struct Handler(Arc<dyn Fn(Context) -> BoxFuture + Send + Sync>);

impl Handler {
    pub fn new<F, Fut, R>(f: F) -> Self
    where
        F: Fn(Context) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = R> + Send + 'static,
        R: IntoResponse,
    {
        Handler(Arc::new(move |jc| {
            let fut = f(jc);
            Box::pin(async move { fut.await.into_response() })
        }))
    }

    pub async fn call(&self, jc: Context) -> Response {
        (self.0)(jc).await
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Handler")
    }
}

/// Turn a middleware over `(Context, next handler)` into a transformer that
/// wraps individual handlers.
pub fn adapt<M, Fut>(middleware: M) -> impl Fn(Handler) -> Handler
where
    M: Fn(Context, Handler) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    move |next: Handler| {
        let middleware = middleware.clone();
        Handler::new(move |jc| middleware(jc, next.clone()))
    }
}

fn method_filter(method: &str) -> Option<MethodFilter> {
    let filter = match method {
        "GET" => MethodFilter::GET,
        "POST" => MethodFilter::POST,
        "PUT" => MethodFilter::PUT,
        "DELETE" => MethodFilter::DELETE,
        "PATCH" => MethodFilter::PATCH,
        "HEAD" => MethodFilter::HEAD,
        "OPTIONS" => MethodFilter::OPTIONS,
        _ => return None,
    };
    Some(filter)
}

/// Build a router from `routes`. Each key is a method and a path separated
/// by whitespace, e.g. `"GET /foo/:bar"`.
pub fn mux<'k, I>(routes: I) -> Result<Router, RouteError>
where
    I: IntoIterator<Item = (&'k str, Handler)>,
{
    let mut by_path: BTreeMap<String, Vec<(&'k str, MethodFilter, Handler)>> = BTreeMap::new();
    for (key, handler) in routes {
        let fields: Vec<&str> = key.split_whitespace().collect();
        let &[method, path] = fields.as_slice() else {
            return Err(RouteError::InvalidRoute(key.to_string()));
        };
        if !path.starts_with('/') {
            return Err(RouteError::InvalidRoute(key.to_string()));
        }
        let filter =
            method_filter(method).ok_or_else(|| RouteError::UnhandledMethod(method.to_string()))?;
        let entries = by_path.entry(path.to_string()).or_default();
        if entries.iter().any(|(m, _, _)| *m == method) {
            return Err(RouteError::Duplicate(key.to_string()));
        }
        entries.push((method, filter, handler));
    }

    let mut router = Router::new();
    for (path, entries) in by_path {
        let mut methods: MethodRouter = MethodRouter::new();
        for (method, filter, handler) in entries {
            debug!(method, path = %path, "route registered");
            methods = methods.on(filter, move |jc: Context| {
                let handler = handler.clone();
                async move { handler.call(jc).await }
            });
        }
        router = router.route(&path, methods);
    }
    Ok(router)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::serve;

    fn hello() -> Handler {
        Handler::new(|jc: Context| async move { jc.encode(&format!("hello, {}", jc.path_param("name"))) })
    }

    #[test]
    fn test_invalid_routes() {
        assert!(matches!(
            mux([("GET", hello())]),
            Err(RouteError::InvalidRoute(_))
        ));
        assert!(matches!(
            mux([("GET /a /b", hello())]),
            Err(RouteError::InvalidRoute(_))
        ));
        assert!(matches!(
            mux([("FETCH /a", hello())]),
            Err(RouteError::UnhandledMethod(m)) if m == "FETCH"
        ));
        assert!(matches!(
            mux([("GET /a", hello()), ("GET  /a", hello())]),
            Err(RouteError::Duplicate(_))
        ));
        assert!(mux([("GET /a", hello()), ("POST /a", hello())]).is_ok());
    }

    #[tokio::test]
    async fn test_dispatch() {
        let router = mux([
            ("GET /hello/:name", hello()),
            (
                "DELETE /hello/:name",
                Handler::new(|jc: Context| async move { jc.encode(&()) }),
            ),
        ])
        .unwrap();
        let base = serve(router).await;
        let http = reqwest::Client::new();

        let response = http.get(format!("{}/hello/world", base)).send().await.unwrap();
        assert_eq!(response.status().as_u16(), 200);
        assert_eq!(response.text().await.unwrap(), "\"hello, world\"\n");

        let response = http.delete(format!("{}/hello/world", base)).send().await.unwrap();
        assert_eq!(response.status().as_u16(), 204);

        let response = http.put(format!("{}/hello/world", base)).send().await.unwrap();
        assert_eq!(response.status().as_u16(), 405);
    }
}
