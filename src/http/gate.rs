//! Request gate.
//! Only GET reaches the proxy pipeline.

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};

/// Reject every method other than GET with 405 before any work is done.
pub async fn require_get(req: Request<Body>, next: Next) -> Response {
    if req.method() != Method::GET {
        tracing::debug!(method = %req.method(), path = %req.uri().path(), "Method rejected");
        return (
            StatusCode::METHOD_NOT_ALLOWED,
            [(header::ALLOW, "GET")],
            "Method not allowed",
        )
            .into_response();
    }

    next.run(req).await
}
