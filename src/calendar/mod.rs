//! Calendar model and serializers.
//!
//! # Data Flow
//! ```text
//! Extractor → Calendar (request-scoped, owned by the pipeline)
//!     → Serializer::serialize(&calendar, writer)
//!     → response body stream
//! ```
//!
//! # Design Decisions
//! - Serializers write in a single pass and never seek
//! - Content type belongs to the serializer, not the route

pub mod ics;
pub mod json;
pub mod model;

use std::io::{self, Write};

pub use self::ics::IcsSerializer;
pub use json::JsonSerializer;
pub use model::{Calendar, EmptyResourceKey, Event, ResourceKey};

/// Writes a complete calendar document to an output stream.
pub trait Serializer: Send + Sync {
    /// Media type of the produced document.
    fn content_type(&self) -> &'static str;

    /// Write `calendar` to `out`. Bytes may already be visible to the
    /// reader when an error is returned.
    fn serialize(&self, calendar: &Calendar, out: &mut dyn Write) -> io::Result<()>;
}
