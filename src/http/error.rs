//! Error types for the HTTP runtime.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// Errors a handler returns while serving a request.
///
/// Every variant maps to a status code; the response body is the error
/// message followed by a newline, as plain text.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request body exceeded the decode limit.
    #[error("request body too large")]
    BodyTooLarge,

    /// The request body was not valid JSON for the expected type.
    #[error("couldn't decode request type ({ty}): {reason}")]
    Decode { ty: &'static str, reason: String },

    /// A path parameter failed to parse.
    #[error("couldn't parse param {name:?}: {reason}")]
    Param { name: String, reason: String },

    /// A form value failed to parse.
    #[error("invalid form value {key:?}: {reason}")]
    Form { key: String, reason: String },

    /// Missing or wrong Basic credentials.
    #[error("Unauthorized")]
    Unauthorized,

    /// An error with an explicit status, written by the handler.
    #[error("{message}")]
    Status { status: StatusCode, message: String },
}

impl ApiError {
    /// Build an error with an explicit status code.
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::BodyTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Decode { .. } | Self::Param { .. } | Self::Form { .. } => StatusCode::BAD_REQUEST,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::Status { status, .. } => *status,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        (status, format!("{}\n", self)).into_response()
    }
}

/// Errors building a router from a route table.
#[derive(Debug, Error)]
pub enum RouteError {
    /// The key is not `METHOD /path`.
    #[error("invalid route {0:?}")]
    InvalidRoute(String),

    #[error("unhandled method {0:?}")]
    UnhandledMethod(String),

    /// Two entries share a method and path.
    #[error("duplicate route {0:?}")]
    Duplicate(String),
}

/// Errors returned by [`Client`](super::Client) requests.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] reqwest::Error),

    /// The server answered with a non-2xx status; the message is the
    /// trimmed response body.
    #[error("{message}")]
    Server { status: u16, message: String },

    #[error("couldn't encode request: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("couldn't decode response: {0}")]
    Decode(#[source] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            ApiError::BodyTooLarge.status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            ApiError::Decode {
                ty: "u32",
                reason: "eof".into()
            }
            .status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(ApiError::Unauthorized.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            ApiError::new(StatusCode::NOT_FOUND, "no such object").status_code(),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn test_error_messages() {
        let err = ApiError::Param {
            name: "id".into(),
            reason: "invalid digit found in string".into(),
        };
        assert_eq!(
            err.to_string(),
            "couldn't parse param \"id\": invalid digit found in string"
        );
        assert_eq!(ApiError::BodyTooLarge.to_string(), "request body too large");
        assert_eq!(
            RouteError::InvalidRoute("GET".into()).to_string(),
            "invalid route \"GET\""
        );
    }
}
