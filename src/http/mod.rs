//! Minimal JSON HTTP toolkit.
//!
//! Servers are built from a `"METHOD /path"` keyed table of [`Handler`]s;
//! each handler receives a [`Context`] with the request body and path
//! parameters. [`Client`] is the matching caller. The verifier in
//! [`crate::check`] checks Go code written against the same conventions.

pub mod auth;
pub mod client;
pub mod context;
pub mod error;
pub mod mux;

pub use auth::{authorized, basic_auth, with_basic_auth};
pub use client::Client;
pub use context::{encode, Context, DEFAULT_DECODE_LIMIT};
pub use error::{ApiError, ClientError, RouteError};
pub use mux::{adapt, mux, Handler};

/// Serve `router` on an ephemeral loopback port and return its base URL.
#[cfg(test)]
pub(crate) async fn serve(router: axum::Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{}", addr)
}
