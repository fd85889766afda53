//! Error taxonomy for the query service (§7 of the design).
//!
//! Every request-aborting error maps to one variant here and carries enough
//! context to serialize into the wire error shape. Per-query and per-match
//! failures (`QuerySyntaxError`, `PredicateError`, `DirectiveError`) are also
//! represented so they can be recorded as diagnostics without aborting a
//! batch request.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ServiceError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("query syntax error: {0}")]
    QuerySyntax(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("predicate error: {0}")]
    Predicate(String),

    #[error("directive error: {0}")]
    Directive(String),

    #[error("resource error: {0}")]
    Resource(String),

    #[error("memory error: {0}")]
    Memory(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Short machine-readable tag used in the wire error shape and in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::Validation(_) => "ValidationError",
            ServiceError::UnsupportedLanguage(_) => "UnsupportedLanguage",
            ServiceError::QuerySyntax(_) => "QuerySyntaxError",
            ServiceError::Parse(_) => "ParseError",
            ServiceError::Predicate(_) => "PredicateError",
            ServiceError::Directive(_) => "DirectiveError",
            ServiceError::Resource(_) => "ResourceError",
            ServiceError::Memory(_) => "MemoryError",
            ServiceError::Internal(_) => "InternalError",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            ServiceError::Validation(_) | ServiceError::UnsupportedLanguage(_) => {
                StatusCode::BAD_REQUEST
            }
            ServiceError::QuerySyntax(_) => StatusCode::OK,
            ServiceError::Parse(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ServiceError::Predicate(_) | ServiceError::Directive(_) => StatusCode::OK,
            ServiceError::Resource(_) | ServiceError::Memory(_) => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    errors: Vec<String>,
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = ErrorBody {
            success: false,
            errors: vec![self.to_string()],
        };
        (status, Json(body)).into_response()
    }
}
