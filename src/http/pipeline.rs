//! Proxy pipeline: extract the calendar, then stream it to the client.
//!
//! # Data Flow
//! ```text
//! validated GET
//!     → Extractor::extract(resource key)   (bounded by extract deadline)
//!     → Content-Type from the serializer
//!     → spawn_blocking: Serializer writes into BodyWriter
//!     → body chunks streamed to the client
//! ```
//!
//! # Design Decisions
//! - Extraction completes before the first body byte, so extraction
//!   failures still get a clean 5xx response
//! - Serialization failures can only truncate the body; they are logged

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::calendar::{Calendar, IcsSerializer, JsonSerializer, ResourceKey, Serializer};
use crate::extract::{ExtractError, Extractor};
use crate::http::body::{self, BodyWriter};
use crate::http::request::request_id;
use crate::observability::metrics;

/// Output document format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Ics,
    Json,
}

/// Query parameters accepted on the calendar route.
#[derive(Debug, Default, Deserialize)]
pub struct CalendarQuery {
    pub format: Option<Format>,
}

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub extractor: Arc<dyn Extractor>,
    pub resource_key: ResourceKey,
    pub extract_timeout: Duration,
    pub ics: Arc<dyn Serializer>,
    pub json: Arc<dyn Serializer>,
}

impl AppState {
    /// State with the default ICS and JSON serializers.
    pub fn new(extractor: Arc<dyn Extractor>, resource_key: ResourceKey, extract_timeout: Duration) -> Self {
        Self {
            extractor,
            resource_key,
            extract_timeout,
            ics: Arc::new(IcsSerializer),
            json: Arc::new(JsonSerializer),
        }
    }

    /// Replace the serializer used for `format`.
    pub fn with_serializer(mut self, format: Format, serializer: Arc<dyn Serializer>) -> Self {
        match format {
            Format::Ics => self.ics = serializer,
            Format::Json => self.json = serializer,
        }
        self
    }

    pub fn serializer(&self, format: Format) -> Arc<dyn Serializer> {
        match format {
            Format::Ics => Arc::clone(&self.ics),
            Format::Json => Arc::clone(&self.json),
        }
    }
}

/// Handler for `GET /`.
pub async fn calendar_handler(
    State(state): State<AppState>,
    Query(query): Query<CalendarQuery>,
    headers: HeaderMap,
) -> Response {
    let request_id = request_id(&headers);
    let format = query.format.unwrap_or_default();

    tracing::debug!(
        request_id = %request_id,
        key = %state.resource_key,
        format = ?format,
        "Proxying calendar"
    );

    match handle(&state, format, &request_id).await {
        Ok(response) => response,
        Err(e) => {
            tracing::error!(
                request_id = %request_id,
                key = %state.resource_key,
                error = %e,
                "Extraction failed"
            );
            e.into_response()
        }
    }
}

/// Extract the calendar and start streaming it.
///
/// Returns once the response head is ready; the body is still being
/// written when this returns.
pub async fn handle(state: &AppState, format: Format, request_id: &str) -> Result<Response, ExtractError> {
    let calendar = extract_with_deadline(state).await?;

    let serializer = state.serializer(format);
    let content_type = serializer.content_type();
    let (writer, body) = body::channel();
    let request_id = request_id.to_owned();

    tokio::spawn(async move {
        let task_request_id = request_id.clone();
        let task = tokio::task::spawn_blocking(move || {
            stream_calendar(calendar, serializer, writer, &task_request_id)
        });
        // The writer was dropped mid-document, which already failed the body.
        if let Err(e) = task.await {
            metrics::record_serialization_failure();
            tracing::warn!(request_id = %request_id, error = %e, "Serializer panicked, response body truncated");
        }
    });

    Ok(([(header::CONTENT_TYPE, content_type)], body).into_response())
}

async fn extract_with_deadline(state: &AppState) -> Result<Calendar, ExtractError> {
    let started = Instant::now();
    let result = match tokio::time::timeout(
        state.extract_timeout,
        state.extractor.extract(&state.resource_key),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(ExtractError::Timeout(state.extract_timeout)),
    };

    match &result {
        Ok(calendar) => {
            metrics::record_extraction("ok");
            tracing::debug!(
                key = %state.resource_key,
                events = calendar.events.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Extraction finished"
            );
        }
        Err(e) => metrics::record_extraction(e.kind()),
    }

    result
}

fn stream_calendar(calendar: Calendar, serializer: Arc<dyn Serializer>, mut writer: BodyWriter, request_id: &str) {
    match calendar.serialize_to(serializer.as_ref(), &mut writer) {
        Ok(()) => {
            if let Err(e) = writer.finish() {
                metrics::record_serialization_failure();
                tracing::warn!(request_id = %request_id, error = %e, "Client went away before body completed");
            }
        }
        Err(e) => {
            metrics::record_serialization_failure();
            tracing::warn!(request_id = %request_id, error = %e, "Serialization failed, aborting response body");
            writer.abort(e);
        }
    }
}
