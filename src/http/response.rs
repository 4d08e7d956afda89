//! Response handling and transformation.
//!
//! # Responsibilities
//! - Map extraction errors to appropriate HTTP status codes
//! - Keep upstream details out of client-visible bodies
//!
//! # Design Decisions
//! - Extraction timeouts result in 504 Gateway Timeout
//! - Every other extraction failure is 502 Bad Gateway
//! - Error bodies are plain text and never contain calendar data

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::extract::ExtractError;

/// Status code for a failed extraction.
pub fn extract_error_status(err: &ExtractError) -> StatusCode {
    match err {
        ExtractError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        ExtractError::Unreachable(_)
        | ExtractError::UpstreamStatus(_)
        | ExtractError::Malformed(_) => StatusCode::BAD_GATEWAY,
    }
}

fn extract_error_message(err: &ExtractError) -> &'static str {
    match err {
        ExtractError::Timeout(_) => "Upstream calendar timed out",
        ExtractError::Unreachable(_) => "Upstream calendar unreachable",
        ExtractError::UpstreamStatus(_) => "Upstream calendar request failed",
        ExtractError::Malformed(_) => "Upstream calendar could not be parsed",
    }
}

impl IntoResponse for ExtractError {
    fn into_response(self) -> Response {
        (extract_error_status(&self), extract_error_message(&self)).into_response()
    }
}
