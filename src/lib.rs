//! Rapla calendar proxy library

pub mod calendar;
pub mod config;
pub mod extract;
pub mod http;
pub mod lifecycle;
pub mod observability;

pub use calendar::{Calendar, Event, ResourceKey, Serializer};
pub use config::schema::ProxyConfig;
pub use extract::{ExtractError, Extractor};
pub use http::HttpServer;
pub use lifecycle::Shutdown;
