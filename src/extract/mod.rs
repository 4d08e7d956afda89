//! Calendar extraction subsystem.
//!
//! # Data Flow
//! ```text
//! ResourceKey
//!     → rapla.rs (build upstream URL, fetch HTML)
//!     → parser.rs (HTML → Calendar)
//!     → Calendar handed to the proxy pipeline
//! ```
//!
//! # Design Decisions
//! - Extraction never retries; failures surface to the caller as `ExtractError`
//! - Extractors are stateless between calls and shared via Arc

pub mod parser;
pub mod rapla;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::calendar::{Calendar, ResourceKey};

pub use parser::{parse_calendar, ParseError};
pub use rapla::RaplaExtractor;

/// Produces a calendar for a resource key.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, key: &ResourceKey) -> Result<Calendar, ExtractError>;
}

/// Errors that can occur while extracting a calendar.
#[derive(Debug, Error)]
pub enum ExtractError {
    /// Upstream could not be reached.
    #[error("upstream unreachable: {0}")]
    Unreachable(String),

    /// Upstream answered with a non-success status.
    #[error("upstream returned status {0}")]
    UpstreamStatus(u16),

    /// Extraction did not finish before its deadline.
    #[error("extraction timed out after {0:?}")]
    Timeout(Duration),

    /// Upstream content could not be parsed into a calendar.
    #[error("malformed upstream data: {0}")]
    Malformed(#[from] ParseError),
}

impl ExtractError {
    /// Short label used for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            ExtractError::Unreachable(_) => "unreachable",
            ExtractError::UpstreamStatus(_) => "upstream_status",
            ExtractError::Timeout(_) => "timeout",
            ExtractError::Malformed(_) => "malformed",
        }
    }
}
