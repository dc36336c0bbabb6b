use std::fmt;

use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::{error, warn};

const UNIQUE_VIOLATION: &str = "23505";
/// Largest JSON body the API accepts.
pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
const QUERY_CANCELED: &str = "57014";
/// Seconds a client should wait before retrying a 503.
const RETRY_AFTER_SECS: &str = "5";

/// One failed check on an inbound payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Violation {
    pub field: &'static str,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Violations(pub Vec<Violation>);

impl Violations {
    pub fn single(field: &'static str, message: impl Into<String>) -> Self {
        Self(vec![Violation {
            field,
            message: message.into(),
        }])
    }

    pub fn push(&mut self, field: &'static str, message: impl Into<String>) {
        self.0.push(Violation {
            field,
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

#[cfg(test)]
impl Violations {
    pub fn fields(&self) -> Vec<&'static str> {
        self.0.iter().map(|v| v.field).collect()
    }
}

impl fmt::Display for Violations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|v| format!("{}: {}", v.field, v.message))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("validation error: {0}")]
    Validation(Violations),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    #[error("database unavailable: {0}")]
    Connectivity(#[source] sqlx::Error),

    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Connectivity(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Unexpected(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Retryable failures carry a `Retry-After` header.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connectivity(_))
    }
}

impl From<Violations> for AppError {
    fn from(v: Violations) -> Self {
        Self::Validation(v)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(e: sqlx::Error) -> Self {
        let code = e
            .as_database_error()
            .and_then(|db_err| db_err.code().map(|c| c.into_owned()));
        match code.as_deref() {
            Some(UNIQUE_VIOLATION) => return Self::Conflict("Email already exists".into()),
            Some(QUERY_CANCELED) => return Self::Connectivity(e),
            _ => {}
        }
        match e {
            sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::WorkerCrashed => Self::Connectivity(e),
            other => Self::Unexpected(anyhow::Error::new(other)),
        }
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            return Self::PayloadTooLarge(MAX_BODY_BYTES);
        }
        Self::Validation(Violations::single("body", rejection.body_text()))
    }
}

impl From<QueryRejection> for AppError {
    fn from(rejection: QueryRejection) -> Self {
        Self::Validation(Violations::single("query", rejection.body_text()))
    }
}

/// `{success:false, message, details?}` body shared by every non-2xx response.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            details: None,
        }
    }
}

/// Internal detail of a 500, kept out of the body until a non-production
/// environment opts in (see `app::expose_error_details`).
#[derive(Debug, Clone)]
pub struct UnexpectedDetail(pub Vec<String>);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let retryable = self.is_retryable();
        let mut res = match self {
            Self::Validation(violations) => {
                let details = serde_json::to_value(&violations).ok();
                let body = ErrorBody {
                    details,
                    ..ErrorBody::new("Validation error")
                };
                (status, Json(body)).into_response()
            }
            Self::NotFound(resource) => {
                (status, Json(ErrorBody::new(format!("{resource} not found")))).into_response()
            }
            Self::Conflict(message) => (status, Json(ErrorBody::new(message))).into_response(),
            Self::PayloadTooLarge(limit) => (
                status,
                Json(ErrorBody::new(format!("Request body exceeds {limit} bytes"))),
            )
                .into_response(),
            Self::Connectivity(e) => {
                warn!(error = %e, "database unavailable");
                (
                    status,
                    Json(ErrorBody::new("Database temporarily unavailable, retry later")),
                )
                    .into_response()
            }
            Self::Unexpected(e) => {
                error!(error = ?e, "unexpected error");
                let chain = e.chain().map(|cause| cause.to_string()).collect();
                let mut res =
                    (status, Json(ErrorBody::new("Internal server error"))).into_response();
                res.extensions_mut().insert(UnexpectedDetail(chain));
                res
            }
        };

        if retryable {
            res.headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from_static(RETRY_AFTER_SECS));
        }
        res
    }
}
