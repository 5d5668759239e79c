//! BT Smart Hub 2 Prometheus Exporter
//!
//! This library polls the hub's unauthenticated status page
//! (`/nonAuth/wan_conn.xml`), decodes the percent-encoded, bracket-nested
//! field values it contains, and exposes connectivity, throughput, byte
//! counters and uptimes as Prometheus metrics.
//!
//! # Modules
//!
//! - [`archive`] - Optional verbatim storage of raw responses
//! - [`config`] - TOML configuration for the router, metrics endpoint and datastore
//! - [`error`] - Decode and poll error types
//! - [`extract`] - Status document walk producing a [`PollResult`] per poll
//! - [`field`] - Decoding of individual field values
//! - [`metrics`] - Prometheus recorder holding the latest poll
//! - [`poller`] - HTTP polling of the hub
//! - [`server`] - HTTP endpoint serving the metrics
//!
//! # Example Usage
//!
//! ```
//! use btsmarthub2_exporter::{extract, Connectivity};
//!
//! let body = r#"<status><link_status value="connected%3Bvdsl%3B462385"/></status>"#;
//! let result = extract(body, 200);
//!
//! assert_eq!(result.connectivity, Connectivity::Connected);
//! assert_eq!(result.connection_uptime_seconds, 462385);
//! ```

/// Raw response archival, keyed by poll time.
pub mod archive;

/// Configuration loading and saving.
/// Handles reading/writing the TOML config file.
pub mod config;

/// Error types for decoding and polling.
/// Uses `thiserror` for ergonomic error handling.
pub mod error;

/// Status extraction from the hub's XML document.
pub mod extract;

/// Field decoding: percent-unescaping, bracket scanning and row parsing.
pub mod field;

/// Prometheus metrics recording.
pub mod metrics;

/// Polling of the hub's status page over HTTP.
pub mod poller;

/// HTTP server exposing the metrics endpoint.
/// Uses Axum to serve `/metrics`, `/status` and a landing page.
pub mod server;

// Re-export the extraction entry point and its result types
pub use extract::{extract, Connectivity, Field, PollResult, PollState, PollTiming};

// Re-export the error types for library users
pub use error::{DecodeError, ErrorKind, PollError};

// Re-export the field decoders
pub use field::{decode_bracketed_field, DecodedRow, Rates, Volumes};

pub use metrics::Recorder;
pub use poller::Poller;
