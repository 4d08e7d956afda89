//! Rapla upstream client.
//!
//! # Responsibilities
//! - Build the upstream calendar URL for a resource key
//! - Fetch the HTML page with connect/request timeouts
//! - Map transport failures to `ExtractError`
//! - Hand the page to the parser

use std::time::Duration;

use async_trait::async_trait;
use chrono::{Datelike, Days, NaiveDate, Utc};
use url::Url;

use crate::calendar::{Calendar, ResourceKey};
use crate::config::{TimeoutConfig, UpstreamConfig};
use crate::extract::{parse_calendar, ExtractError, Extractor};

/// Extractor that scrapes a Rapla week view.
#[derive(Clone)]
pub struct RaplaExtractor {
    client: reqwest::Client,
    base_url: Url,
    salt: Option<String>,
    pages: u32,
    lookback_days: u32,
    timeout: Duration,
}

impl RaplaExtractor {
    /// Create a new extractor from upstream and timeout settings.
    pub fn new(upstream: &UpstreamConfig, timeouts: &TimeoutConfig) -> Result<Self, ExtractError> {
        let base_url = Url::parse(&upstream.base_url)
            .map_err(|e| ExtractError::Unreachable(format!("invalid base URL '{}': {}", upstream.base_url, e)))?;

        let client = reqwest::Client::builder()
            .user_agent(upstream.user_agent.as_str())
            .connect_timeout(Duration::from_secs(timeouts.connect_secs))
            .timeout(Duration::from_secs(timeouts.extract_secs))
            .build()
            .map_err(|e| ExtractError::Unreachable(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            salt: upstream.salt.clone(),
            pages: upstream.pages,
            lookback_days: upstream.lookback_days,
            timeout: Duration::from_secs(timeouts.extract_secs),
        })
    }

    /// Upstream URL for `key`, with the window starting at `start`.
    pub fn calendar_url(&self, key: &ResourceKey, start: NaiveDate) -> Url {
        let mut url = self.base_url.clone();
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("key", key.as_str());
            if let Some(salt) = &self.salt {
                query.append_pair("salt", salt);
            }
            query
                .append_pair("day", &start.day().to_string())
                .append_pair("month", &start.month().to_string())
                .append_pair("year", &start.year().to_string())
                .append_pair("pages", &self.pages.to_string());
        }
        url
    }

    fn window_start(&self) -> NaiveDate {
        let today = Utc::now().date_naive();
        today
            .checked_sub_days(Days::new(u64::from(self.lookback_days)))
            .unwrap_or(today)
    }

    fn map_transport_error(&self, err: reqwest::Error) -> ExtractError {
        if err.is_timeout() {
            ExtractError::Timeout(self.timeout)
        } else {
            ExtractError::Unreachable(err.to_string())
        }
    }
}

#[async_trait]
impl Extractor for RaplaExtractor {
    async fn extract(&self, key: &ResourceKey) -> Result<Calendar, ExtractError> {
        let url = self.calendar_url(key, self.window_start());

        tracing::debug!(url = %url, "Fetching upstream calendar");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExtractError::UpstreamStatus(status.as_u16()));
        }

        let html = response
            .text()
            .await
            .map_err(|e| self.map_transport_error(e))?;

        let calendar = parse_calendar(&html)?;

        tracing::debug!(
            key = %key,
            name = %calendar.name,
            events = calendar.events.len(),
            "Parsed upstream calendar"
        );

        Ok(calendar)
    }
}
