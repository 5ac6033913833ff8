//! HTTP Basic authentication.
//!
//! Only the password is checked; the user name is ignored, matching what
//! [`Client`](super::Client) sends.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::Router;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tracing::debug;

use super::error::ApiError;
use super::mux::{adapt, Handler};

/// Whether `headers` carry Basic credentials with `password`.
pub fn authorized(headers: &HeaderMap, password: &str) -> bool {
    let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    let Some((scheme, encoded)) = value.split_once(' ') else {
        return false;
    };
    if !scheme.eq_ignore_ascii_case("basic") {
        return false;
    }
    let Ok(decoded) = STANDARD.decode(encoded.trim()) else {
        return false;
    };
    match String::from_utf8(decoded) {
        Ok(credentials) => credentials
            .split_once(':')
            .is_some_and(|(_, given)| given == password),
        Err(_) => false,
    }
}

/// A handler transformer enforcing Basic authentication with `password`.
/// Requests without it get `401 Unauthorized`.
pub fn basic_auth(password: impl Into<String>) -> impl Fn(Handler) -> Handler {
    let password: Arc<str> = Arc::from(password.into());
    adapt(move |jc, next: Handler| {
        let password = Arc::clone(&password);
        async move {
            if !authorized(jc.headers(), &password) {
                debug!(uri = %jc.uri(), "rejected request without credentials");
                return ApiError::Unauthorized.into_response();
            }
            next.call(jc).await
        }
    })
}

/// Enforce Basic authentication on every route of `router`.
pub fn with_basic_auth(router: Router, password: impl Into<String>) -> Router {
    let password: Arc<str> = Arc::from(password.into());
    router.layer(middleware::from_fn_with_state(password, require_password))
}

async fn require_password(State(password): State<Arc<str>>, req: Request, next: Next) -> Response {
    if !authorized(req.headers(), &password) {
        return ApiError::Unauthorized.into_response();
    }
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(value: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(value).unwrap());
        headers
    }

    #[test]
    fn test_authorized() {
        let token = STANDARD.encode(":hunter2");
        assert!(authorized(&headers(&format!("Basic {}", token)), "hunter2"));
        assert!(authorized(&headers(&format!("basic {}", token)), "hunter2"));
        // user name is ignored
        let token = STANDARD.encode("admin:hunter2");
        assert!(authorized(&headers(&format!("Basic {}", token)), "hunter2"));

        assert!(!authorized(&headers(&format!("Basic {}", token)), "hunter3"));
        assert!(!authorized(&headers(&format!("Bearer {}", token)), "hunter2"));
        assert!(!authorized(&headers("Basic !!!"), "hunter2"));
        assert!(!authorized(&HeaderMap::new(), "hunter2"));
    }
}
