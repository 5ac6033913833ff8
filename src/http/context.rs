//! Per-request handler context.
//!
//! A [`Context`] is extracted from every request routed through
//! [`mux`](super::mux). It owns the request body until the first decode and
//! carries the matched path parameters.

use std::any::type_name;
use std::convert::Infallible;
use std::fmt::Display;
use std::str::FromStr;

use axum::async_trait;
use axum::body::Body;
use axum::extract::{FromRequest, FromRequestParts, Query, RawPathParams, Request};
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::warn;

use super::error::ApiError;

/// Default limit applied by [`Context::decode`].
pub const DEFAULT_DECODE_LIMIT: usize = 10_000_000;

pub struct Context {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    params: Vec<(String, String)>,
    body: Option<Body>,
}

#[async_trait]
impl<S> FromRequest<S> for Context
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let (mut parts, body) = req.into_parts();
        let params = match RawPathParams::from_request_parts(&mut parts, state).await {
            Ok(raw) => raw
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            Err(_) => Vec::new(),
        };
        Ok(Context {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            params,
            body: Some(body),
        })
    }
}

impl Context {
    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// An error with an explicit status, to be returned from the handler.
    pub fn error(&self, message: impl Display, status: StatusCode) -> ApiError {
        ApiError::new(status, message.to_string())
    }

    /// Prefix a failed `result` with `msg` as a 500 error.
    pub fn check<T, E: Display>(&self, msg: &str, result: Result<T, E>) -> Result<T, ApiError> {
        result.map_err(|err| {
            ApiError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("{}: {}", msg, err),
            )
        })
    }

    /// Encode `value` as the response.
    ///
    /// A value that serializes to `null` yields `204 No Content`. Anything
    /// else is written as indented JSON followed by a newline, so empty
    /// sequences and maps come out as `[]` and `{}`.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Response {
        encode(value)
    }

    /// Decode the JSON body into `T`, limited to [`DEFAULT_DECODE_LIMIT`] bytes.
    pub async fn decode<T: DeserializeOwned>(&mut self) -> Result<T, ApiError> {
        self.decode_limit(DEFAULT_DECODE_LIMIT).await
    }

    /// Decode the JSON body into `T`, failing with
    /// [`ApiError::BodyTooLarge`] past `limit` bytes.
    ///
    /// The body can only be read once; a second decode sees an empty body.
    pub async fn decode_limit<T: DeserializeOwned>(&mut self, limit: usize) -> Result<T, ApiError> {
        let body = self.body.take().unwrap_or_else(Body::empty);
        let bytes = match Limited::new(body, limit).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(err) if err.downcast_ref::<LengthLimitError>().is_some() => {
                return Err(ApiError::BodyTooLarge);
            }
            Err(err) => {
                return Err(ApiError::Decode {
                    ty: type_name::<T>(),
                    reason: err.to_string(),
                });
            }
        };
        serde_json::from_slice(&bytes).map_err(|err| ApiError::Decode {
            ty: type_name::<T>(),
            reason: err.to_string(),
        })
    }

    /// The value of a path parameter, or `""` when the route has none by
    /// that name.
    pub fn path_param(&self, name: &str) -> &str {
        self.params
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
            .unwrap_or_default()
    }

    /// Parse a path parameter.
    pub fn decode_param<T>(&self, name: &str) -> Result<T, ApiError>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.path_param(name)
            .parse()
            .map_err(|err: T::Err| ApiError::Param {
                name: name.to_string(),
                reason: err.to_string(),
            })
    }

    /// The first query value for `key`, or `""`.
    pub fn form_value(&self, key: &str) -> String {
        let Ok(Query(pairs)) = Query::<Vec<(String, String)>>::try_from_uri(&self.uri) else {
            return String::new();
        };
        pairs
            .into_iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
            .unwrap_or_default()
    }

    /// Parse the query value `key` into `out`. An absent or empty value is
    /// not an error and leaves `out` unchanged.
    pub fn decode_form<T>(&self, key: &str, out: &mut T) -> Result<(), ApiError>
    where
        T: FromStr,
        T::Err: Display,
    {
        let value = self.form_value(key);
        if value.is_empty() {
            return Ok(());
        }
        *out = value.parse().map_err(|err: T::Err| ApiError::Form {
            key: key.to_string(),
            reason: err.to_string(),
        })?;
        Ok(())
    }

    /// Declare the request and response types of a handler that does not
    /// speak JSON. Does nothing at runtime.
    pub fn custom<Req: ?Sized, Resp: ?Sized>(&self) {}
}

/// See [`Context::encode`].
pub fn encode<T: Serialize + ?Sized>(value: &T) -> Response {
    let mut body = match serde_json::to_vec_pretty(value) {
        Ok(body) => body,
        Err(err) => {
            warn!(error = %err, "failed to encode response");
            return ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
                .into_response();
        }
    };
    if body == b"null" {
        return StatusCode::NO_CONTENT.into_response();
    }
    body.push(b'\n');
    ([(header::CONTENT_TYPE, "application/json")], body).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn context(uri: &str, body: &str) -> Context {
        Context {
            method: Method::POST,
            uri: uri.parse().unwrap(),
            headers: HeaderMap::new(),
            params: vec![("id".to_string(), "42".to_string())],
            body: Some(Body::from(body.to_string())),
        }
    }

    async fn body_text(response: Response) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_encode_shapes() {
        let empty: Vec<u32> = Vec::new();
        assert_eq!(body_text(encode(&empty)).await, "[]\n");
        let map: BTreeMap<String, u32> = BTreeMap::new();
        assert_eq!(body_text(encode(&map)).await, "{}\n");
        assert_eq!(body_text(encode(&vec![1, 2])).await, "[\n  1,\n  2\n]\n");

        let response = encode(&None::<u32>);
        assert_eq!(response.status(), StatusCode::NO_CONTENT);
        let response = encode(&"hi");
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            "application/json"
        );
    }

    #[tokio::test]
    async fn test_decode_limit() {
        let mut jc = context("/", "\"hello there\"");
        let err = jc.decode_limit::<String>(4).await.unwrap_err();
        assert!(matches!(err, ApiError::BodyTooLarge));
        assert_eq!(err.status_code(), StatusCode::PAYLOAD_TOO_LARGE);

        let mut jc = context("/", "\"hello\"");
        assert_eq!(jc.decode::<String>().await.unwrap(), "hello");
        // the body is consumed
        assert!(matches!(
            jc.decode::<String>().await,
            Err(ApiError::Decode { .. })
        ));
    }

    #[tokio::test]
    async fn test_decode_bad_json() {
        let mut jc = context("/", "{\"a\":");
        let err = jc.decode::<u32>().await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(err.to_string().starts_with("couldn't decode request type (u32)"));
    }

    #[test]
    fn test_params_and_forms() {
        let jc = context("/obj/42?limit=5&limit=9&flag=&name=x", "");
        assert_eq!(jc.path_param("id"), "42");
        assert_eq!(jc.path_param("missing"), "");
        assert_eq!(jc.decode_param::<u64>("id").unwrap(), 42);
        assert!(matches!(
            jc.decode_param::<bool>("id"),
            Err(ApiError::Param { .. })
        ));

        let mut limit = 0u32;
        jc.decode_form("limit", &mut limit).unwrap();
        assert_eq!(limit, 5);

        let mut flag = true;
        jc.decode_form("flag", &mut flag).unwrap();
        assert!(flag);
        jc.decode_form("absent", &mut flag).unwrap();
        assert!(flag);

        let mut n = 0i64;
        let err = jc.decode_form("name", &mut n).unwrap_err();
        assert!(err.to_string().starts_with("invalid form value \"name\""));
    }

    #[test]
    fn test_check() {
        let jc = context("/", "");
        assert_eq!(jc.check("load", Ok::<_, String>(3)).unwrap(), 3);
        let err = jc.check("load", Err::<u32, _>("disk full")).unwrap_err();
        assert_eq!(err.to_string(), "load: disk full");
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
