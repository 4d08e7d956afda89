//! JSON serializer.

use std::io::{self, Write};

use crate::calendar::{Calendar, Serializer};

/// Writes the calendar model as a JSON object.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl Serializer for JsonSerializer {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn serialize(&self, calendar: &Calendar, out: &mut dyn Write) -> io::Result<()> {
        serde_json::to_writer(out, calendar).map_err(io::Error::from)
    }
}
