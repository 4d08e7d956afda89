//! In-memory calendar model.

use std::fmt;
use std::io::{self, Write};

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::calendar::Serializer;

/// A named set of scheduled events, produced per request by an extractor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Calendar {
    pub name: String,
    pub events: Vec<Event>,
}

impl Calendar {
    pub fn new(name: impl Into<String>, events: Vec<Event>) -> Self {
        Self {
            name: name.into(),
            events,
        }
    }

    /// Write this calendar as a complete document in a single pass.
    pub fn serialize_to(&self, serializer: &dyn Serializer, writer: &mut dyn Write) -> io::Result<()> {
        serializer.serialize(self, writer)
    }
}

/// A single event on a single day.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub date: NaiveDate,
    pub start: NaiveTime,
    pub end: NaiveTime,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub organizer: Option<String>,
}

/// Returned when a resource key is empty.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("resource key must not be empty")]
pub struct EmptyResourceKey;

/// Opaque identifier of the upstream calendar. Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey(String);

impl ResourceKey {
    pub fn new(key: impl Into<String>) -> Result<Self, EmptyResourceKey> {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(EmptyResourceKey);
        }
        Ok(Self(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for ResourceKey {
    type Err = EmptyResourceKey;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}
