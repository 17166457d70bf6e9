//! Error responses of the API.

use axum::{
    Json,
    extract::rejection::{JsonRejection, PathRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};
use tracing::warn;

use crate::{
    error::{Error, ErrorKind},
    redact::scrub,
};

/// Maps an error category to the status code it is answered with.
pub const fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
        ErrorKind::Auth => StatusCode::UNAUTHORIZED,
        ErrorKind::AccessDenied => StatusCode::FORBIDDEN,
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Transport => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// A failed request, answered with `{"detail": …}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiFailure {
    status: StatusCode,
    detail: Value,
}

impl ApiFailure {
    /// Creates a failure with an arbitrary detail.
    pub fn new<V>(status: StatusCode, detail: V) -> Self
    where
        V: Into<Value>,
    {
        Self {
            status,
            detail: detail.into(),
        }
    }

    /// Creates a failure from an error, scrubbing `secret` and token-shaped strings from its message.
    pub fn from_error(err: &Error, secret: Option<&str>) -> Self {
        Self::with_prefix("", err, secret)
    }

    /// Same as [`Self::from_error`], with `prefix` put in front of the message.
    pub fn with_prefix(prefix: &str, err: &Error, secret: Option<&str>) -> Self {
        let status = status_for(err.kind());
        let detail = scrub(&format!("{prefix}{err}"), secret);
        if status.is_server_error() {
            warn!("request failed: {detail}");
        }
        Self::new(status, detail)
    }

    /// Returns a mapper for `?` that scrubs `secret` from the error.
    pub fn scrubbing(secret: &str) -> impl Fn(Error) -> Self + '_ {
        move |err| Self::from_error(&err, Some(secret))
    }

    /// The status code of the response.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// The detail of the response.
    pub fn detail(&self) -> &Value {
        &self.detail
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "detail": self.detail }))).into_response()
    }
}

/// Answers malformed requests with `400` instead of the extractor's own status and plain-text body.
macro_rules! impl_from_rejection {
    ($($rejection:ty),+) => {
        $(
            impl From<$rejection> for ApiFailure {
                fn from(rejection: $rejection) -> Self {
                    Self::new(StatusCode::BAD_REQUEST, scrub(&rejection.body_text(), None))
                }
            }
        )+
    };
}

impl_from_rejection!(JsonRejection, QueryRejection, PathRejection);
