//! JSON client for servers built with [`mux`](super::mux).

use reqwest::header::CONTENT_TYPE;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::error::ClientError;

pub type Result<T> = std::result::Result<T, ClientError>;

/// A client for one API server.
///
/// Requests go to `base_url` followed by the route. When a password is
/// set, it is sent as Basic credentials with an empty user name.
#[derive(Debug, Clone)]
pub struct Client {
    pub base_url: String,
    pub password: String,
    http: reqwest::Client,
}

impl Client {
    pub fn new(base_url: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            password: password.into(),
            http: reqwest::Client::new(),
        }
    }

    async fn req<D, R>(&self, method: Method, route: &str, data: Option<&D>) -> Result<R>
    where
        D: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, route);
        let mut request = self
            .http
            .request(method.clone(), &url)
            .header(CONTENT_TYPE, "application/json");
        if let Some(data) = data {
            request = request.body(serde_json::to_vec(data).map_err(ClientError::Encode)?);
        }
        if !self.password.is_empty() {
            request = request.basic_auth("", Some(&self.password));
        }

        let response = request.send().await?;
        let status = response.status();
        debug!(%method, %url, status = status.as_u16(), "request complete");
        let body = response.bytes().await?;
        if !status.is_success() {
            return Err(ClientError::Server {
                status: status.as_u16(),
                message: String::from_utf8_lossy(&body).trim().to_string(),
            });
        }
        // an empty body decodes as null, so `()` and `Option<T>` accept it
        let body: &[u8] = if body.is_empty() { b"null" } else { &body };
        serde_json::from_slice(body).map_err(ClientError::Decode)
    }

    /// GET `route`, decoding the response.
    pub async fn get<R: DeserializeOwned>(&self, route: &str) -> Result<R> {
        self.req::<(), R>(Method::GET, route, None).await
    }

    /// POST `data` to `route`, decoding the response. Use `R = ()` to
    /// ignore it.
    pub async fn post<D, R>(&self, route: &str, data: &D) -> Result<R>
    where
        D: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.req(Method::POST, route, Some(data)).await
    }

    /// PUT `data` to `route`.
    pub async fn put<D: Serialize + ?Sized>(&self, route: &str, data: &D) -> Result<()> {
        self.req::<D, serde::de::IgnoredAny>(Method::PUT, route, Some(data))
            .await
            .map(|_| ())
    }

    pub async fn delete(&self, route: &str) -> Result<()> {
        self.req::<(), serde::de::IgnoredAny>(Method::DELETE, route, None)
            .await
            .map(|_| ())
    }

    /// PATCH `data` to `route`, decoding the response.
    pub async fn patch<D, R>(&self, route: &str, data: &D) -> Result<R>
    where
        D: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        self.req(Method::PATCH, route, Some(data)).await
    }

    /// Declare the request and response types of an endpoint that does not
    /// speak JSON. Does nothing at runtime.
    pub fn custom<Req: ?Sized, Resp: ?Sized>(&self, _method: &str, _route: &str) {}
}
