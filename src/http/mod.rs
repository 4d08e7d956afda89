//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware stack)
//!     → request.rs (request ID)
//!     → gate.rs (GET only, 405 otherwise)
//!     → pipeline.rs (extract, then serialize)
//!     → body.rs (streamed response body)
//!     → Send to client
//! ```

pub mod body;
pub mod gate;
pub mod pipeline;
pub mod request;
pub mod response;
pub mod server;

pub use pipeline::{AppState, Format};
pub use request::X_REQUEST_ID;
pub use server::HttpServer;
