//! Crate-wide error type.
//!
//! Every fallible path in eventum returns [`Error`]. Variants are grouped the way §7 of the
//! design describes them: configuration errors are always fatal, per-event runtime errors are
//! recoverable and counted, unit-fatal runtime errors tear the owning stage down, and the two
//! batcher errors are the programmer-facing contract of [`crate::batcher`].

use thiserror::Error;

/// Crate-wide error enum.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid schema, unreadable path, bad cron expression, reversed date range, missing
    /// template, bad regex, or any other configuration-time problem. Fatal.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A single event failed to format or render. Recoverable: callers count these and continue.
    #[error("event error: {0}")]
    EventError(String),

    /// A single HTTP/bulk request failed for one event. Recoverable.
    #[error("output delivery error: {0}")]
    DeliveryError(String),

    /// A producer, merger worker, or output plugin failed in a way its owning unit cannot
    /// recover from. The supervisor escalates this into a full pipeline shutdown.
    #[error("unit failure in {unit}: {reason}")]
    UnitFailure {
        /// Which pipeline unit failed (`input`, `event`, `output`).
        unit: &'static str,
        /// Human-readable failure reason.
        reason: String,
    },

    /// `Batcher::add` was called with `block = false` and there was no free capacity.
    #[error("batcher is full")]
    BatcherFull,

    /// `Batcher::add` was called after `Batcher::close`.
    #[error("batcher is closed")]
    BatcherClosed,

    /// YAML parsing error.
    #[error("unable to parse YAML")]
    Yaml(
        #[from]
        #[source]
        serde_yaml::Error,
    ),

    /// JSON parsing error.
    #[error("unable to parse JSON")]
    Json(
        #[from]
        #[source]
        serde_json::Error,
    ),

    /// Template rendering error, surfaced from the renderer.
    #[error("template error: {0}")]
    Template(String),

    /// I/O error from a file, subprocess, or other OS resource.
    #[error("io error: {0}")]
    Io(
        #[from]
        #[source]
        std::io::Error,
    ),

    /// HTTP transport error.
    #[cfg(any(feature = "http", feature = "opensearch", feature = "clickhouse"))]
    #[error("http error: {0}")]
    Http(
        #[from]
        #[source]
        reqwest::Error,
    ),

    /// Composed state serialization exceeded `max_bytes`, or msgpack (de)serialization failed.
    #[error("composed state error: {0}")]
    ComposedState(String),
}
